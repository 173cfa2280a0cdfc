//! End-to-end scenarios driving the adapter the way the OS would, over the
//! in-process store backend.

use std::sync::Arc;

use blobfs::BlobFs;
use blobfs::BlobFsOptions;
use blobfs::Filesystem;
use blobfs::MemoryBlobStore;
use blobfs::MountConfig;
use blobfs::OpenMode;
use blobfs::Status;
use blobfs::WriteOptions;

fn config(subfolder: Option<&str>, read_only: bool) -> MountConfig {
    MountConfig {
        account_name: "testaccount".to_owned(),
        account_key: "testkey".to_owned(),
        container_name: "testcontainer".to_owned(),
        subfolder: subfolder.map(str::to_owned),
        mount_point: "Z".to_owned(),
        read_only,
    }
}

fn mount(store: &Arc<MemoryBlobStore>, subfolder: Option<&str>, read_only: bool) -> BlobFs {
    BlobFs::new(store.clone(), config(subfolder, read_only)).unwrap()
}

fn has_op(store: &MemoryBlobStore, name: &str, key: &str) -> bool {
    store
        .operations()
        .iter()
        .any(|(op, k)| *op == name && k == key)
}

#[test]
fn create_new_under_a_subfolder() {
    let store = Arc::new(MemoryBlobStore::new());
    let fs = mount(&store, Some("data"), false);

    // Prime the parent listing so the invalidation after upload is visible.
    assert!(fs.find_children("\\folder").unwrap().is_empty());

    let context = fs.open("\\folder\\new.txt", OpenMode::CreateNew, false).unwrap();
    assert_eq!(
        fs.write(&context, &[0x41, 0x42, 0x43], 0, WriteOptions::default()),
        Ok(3)
    );
    fs.cleanup(&context);
    fs.close(context);

    assert_eq!(store.get("data/folder/new.txt").unwrap(), vec![0x41, 0x42, 0x43]);
    assert!(has_op(&store, "get_properties", "data/folder/new.txt"));
    assert!(has_op(&store, "upload", "data/folder/new.txt"));

    // The cached (empty) listing of data/folder/ was dropped at cleanup.
    let children = fs.find_children("\\folder").unwrap();
    assert_eq!(children.len(), 1);
    assert_eq!(children[0].name, "new.txt");
    assert_eq!(children[0].size, 3);
}

#[test]
fn read_an_existing_blob() {
    let store = Arc::new(MemoryBlobStore::new());
    store.insert("x.txt", b"hello".to_vec());
    let fs = mount(&store, None, false);

    let context = fs.open("\\x.txt", OpenMode::Open, false).unwrap();
    let mut buf = [0u8; 5];
    assert_eq!(fs.read(&context, &mut buf, 0), Ok(5));
    assert_eq!(&buf, b"hello");

    store.clear_operations();
    fs.cleanup(&context);
    fs.close(context);
    assert!(!store.operations().iter().any(|(op, _)| *op == "upload"));
}

#[test]
fn non_replacing_rename_onto_an_existing_key() {
    let store = Arc::new(MemoryBlobStore::new());
    store.insert("a.txt", b"aaa".to_vec());
    store.insert("b.txt", b"bbb".to_vec());
    let fs = mount(&store, None, false);

    let context = fs.open("\\a.txt", OpenMode::Open, false).unwrap();
    store.clear_operations();
    assert_eq!(
        fs.rename(&context, "\\a.txt", "\\b.txt", false),
        Err(Status::FileExists)
    );
    assert!(!store.operations().iter().any(|(op, _)| *op == "copy"));
    assert!(!store.operations().iter().any(|(op, _)| *op == "delete"));
    assert_eq!(store.get("a.txt").unwrap(), b"aaa");
    assert_eq!(store.get("b.txt").unwrap(), b"bbb");
    fs.cleanup(&context);
    fs.close(context);
}

#[test]
fn replacing_rename_moves_the_content() {
    let store = Arc::new(MemoryBlobStore::new());
    store.insert("a.txt", b"aaa".to_vec());
    store.insert("b.txt", b"bbb".to_vec());
    let fs = mount(&store, None, false);

    let context = fs.open("\\a.txt", OpenMode::Open, false).unwrap();
    assert_eq!(fs.rename(&context, "\\a.txt", "\\b.txt", true), Ok(()));
    assert!(store.get("a.txt").is_none());
    assert_eq!(store.get("b.txt").unwrap(), b"aaa");
    fs.cleanup(&context);
    fs.close(context);
}

#[test]
fn recursive_directory_delete() {
    let store = Arc::new(MemoryBlobStore::new());
    store.insert("photos/a.jpg", vec![1]);
    store.insert("photos/b/c.jpg", vec![2]);
    let fs = mount(&store, None, false);

    let context = fs.open("\\photos", OpenMode::Open, true).unwrap();
    assert_eq!(fs.delete_directory(&context, "\\photos", true), Ok(()));
    store.clear_operations();
    fs.cleanup(&context);
    fs.close(context);

    assert!(has_op(&store, "list_all", "photos/"));
    assert!(has_op(&store, "delete", "photos/a.jpg"));
    assert!(has_op(&store, "delete", "photos/b/c.jpg"));
    assert!(store.get("photos/a.jpg").is_none());
    assert!(store.get("photos/b/c.jpg").is_none());
    assert!(fs.find_children("\\").unwrap().is_empty());
}

#[test]
fn large_content_spills_to_disk() {
    let store = Arc::new(MemoryBlobStore::new());
    let content: Vec<u8> = (0..150 * 1024u32).map(|i| (i % 251) as u8).collect();
    store.insert("big.bin", content.clone());
    let options = BlobFsOptions {
        spill_threshold: 64 * 1024,
        ..BlobFsOptions::default()
    };
    let fs = BlobFs::with_options(store.clone(), config(None, false), options).unwrap();

    let context = fs.open("\\big.bin", OpenMode::Open, false).unwrap();
    let offset = 100 * 1024u64;
    let mut buf = [0u8; 16];
    assert_eq!(fs.read(&context, &mut buf, offset), Ok(16));
    assert_eq!(&buf[..], &content[offset as usize..offset as usize + 16]);
    assert!(context.is_spilled());
    fs.cleanup(&context);
    fs.close(context);
}

#[test]
fn content_at_the_threshold_stays_in_memory() {
    let store = Arc::new(MemoryBlobStore::new());
    store.insert("edge.bin", vec![7u8; 4096]);
    let options = BlobFsOptions {
        spill_threshold: 4096,
        ..BlobFsOptions::default()
    };
    let fs = BlobFs::with_options(store.clone(), config(None, false), options).unwrap();

    let context = fs.open("\\edge.bin", OpenMode::Open, false).unwrap();
    let mut buf = [0u8; 1];
    assert_eq!(fs.read(&context, &mut buf, 4095), Ok(1));
    assert!(!context.is_spilled());
    fs.cleanup(&context);
    fs.close(context);
}

#[test]
fn read_only_mount_rejects_every_write_path() {
    let store = Arc::new(MemoryBlobStore::new());
    store.insert("a.txt", b"aaa".to_vec());
    let fs = mount(&store, None, true);

    let context = fs.open("\\a.txt", OpenMode::Open, false).unwrap();
    assert_eq!(
        fs.write(&context, b"x", 0, WriteOptions::default()),
        Err(Status::AccessDenied)
    );
    assert_eq!(fs.set_end_of_file(&context, 0), Err(Status::AccessDenied));
    assert_eq!(fs.set_allocation_size(&context, 10), Err(Status::AccessDenied));
    assert_eq!(
        fs.delete_file(&context, "\\a.txt", true),
        Err(Status::AccessDenied)
    );
    assert_eq!(
        fs.rename(&context, "\\a.txt", "\\b.txt", true),
        Err(Status::AccessDenied)
    );
    fs.cleanup(&context);
    fs.close(context);

    assert_eq!(
        fs.open("\\new.txt", OpenMode::CreateNew, false).unwrap_err(),
        Status::AccessDenied
    );
    // Opening an existing file stays possible on a read-only mount.
    assert_eq!(
        fs.open("\\missing.txt", OpenMode::OpenOrCreate, false).unwrap_err(),
        Status::AccessDenied
    );
}

#[test]
fn create_new_refuses_an_existing_key() {
    let store = Arc::new(MemoryBlobStore::new());
    store.insert("a.txt", b"aaa".to_vec());
    let fs = mount(&store, None, false);
    assert_eq!(
        fs.open("\\a.txt", OpenMode::CreateNew, false).unwrap_err(),
        Status::FileExists
    );
}

#[test]
fn open_missing_file_is_not_found() {
    let store = Arc::new(MemoryBlobStore::new());
    let fs = mount(&store, None, false);
    assert_eq!(
        fs.open("\\missing.txt", OpenMode::Open, false).unwrap_err(),
        Status::FileNotFound
    );
    assert_eq!(
        fs.open("\\missing.txt", OpenMode::Truncate, false).unwrap_err(),
        Status::FileNotFound
    );
}

#[test]
fn a_key_prefix_opens_as_a_synthesized_directory() {
    let store = Arc::new(MemoryBlobStore::new());
    store.insert("photos/a.jpg", vec![1]);
    let fs = mount(&store, None, false);

    // No directory hint: the adapter discovers the prefix by listing.
    let context = fs.open("\\photos", OpenMode::Open, false).unwrap();
    assert!(context.is_directory());
    let info = fs.get_info(&context, "\\photos").unwrap();
    assert!(info.is_directory());
    assert_eq!(info.name, "photos");
    assert_eq!(info.size, 0);
    fs.cleanup(&context);
    fs.close(context);
}

#[test]
fn get_info_reports_the_buffer_while_editing() {
    let store = Arc::new(MemoryBlobStore::new());
    let fs = mount(&store, None, false);

    let context = fs.open("\\draft.txt", OpenMode::CreateNew, false).unwrap();
    fs.write(&context, b"0123456789", 0, WriteOptions::default()).unwrap();
    let info = fs.get_info(&context, "\\draft.txt").unwrap();
    assert_eq!(info.size, 10);
    assert!(!info.is_directory());

    fs.set_end_of_file(&context, 4).unwrap();
    assert_eq!(fs.get_info(&context, "\\draft.txt").unwrap().size, 4);
    fs.cleanup(&context);
    fs.close(context);
    assert_eq!(store.get("draft.txt").unwrap(), b"0123");
}

#[test]
fn allocation_hints_never_change_the_logical_length() {
    let store = Arc::new(MemoryBlobStore::new());
    store.insert("a.txt", b"aaa".to_vec());
    let fs = mount(&store, None, false);

    let context = fs.open("\\a.txt", OpenMode::Open, false).unwrap();
    fs.set_allocation_size(&context, 1024).unwrap();
    assert_eq!(fs.get_info(&context, "\\a.txt").unwrap().size, 3);

    // A bare allocation hint leaves the content clean: nothing to upload.
    store.clear_operations();
    fs.cleanup(&context);
    fs.close(context);
    assert!(!store.operations().iter().any(|(op, _)| *op == "upload"));
}

#[test]
fn append_mode_writes_at_the_end() {
    let store = Arc::new(MemoryBlobStore::new());
    store.insert("log.txt", b"abc".to_vec());
    let fs = mount(&store, None, false);

    let context = fs.open("\\log.txt", OpenMode::Append, false).unwrap();
    let options = WriteOptions { append_to_end: true };
    assert_eq!(fs.write(&context, b"def", 0, options), Ok(3));
    fs.cleanup(&context);
    fs.close(context);
    assert_eq!(store.get("log.txt").unwrap(), b"abcdef");
}

#[test]
fn create_truncates_an_existing_blob() {
    let store = Arc::new(MemoryBlobStore::new());
    store.insert("a.txt", b"previous content".to_vec());
    let fs = mount(&store, None, false);

    let context = fs.open("\\a.txt", OpenMode::Create, false).unwrap();
    fs.cleanup(&context);
    fs.close(context);
    assert_eq!(store.get("a.txt").unwrap(), b"");
}

#[test]
fn canceled_delete_keeps_the_blob() {
    let store = Arc::new(MemoryBlobStore::new());
    store.insert("a.txt", b"aaa".to_vec());
    let fs = mount(&store, None, false);

    let context = fs.open("\\a.txt", OpenMode::Open, false).unwrap();
    fs.delete_file(&context, "\\a.txt", true).unwrap();
    fs.delete_file(&context, "\\a.txt", false).unwrap();
    fs.cleanup(&context);
    fs.close(context);
    assert_eq!(store.get("a.txt").unwrap(), b"aaa");
}

#[test]
fn pending_delete_removes_the_blob_at_cleanup() {
    let store = Arc::new(MemoryBlobStore::new());
    store.insert("a.txt", b"aaa".to_vec());
    let fs = mount(&store, None, false);

    let context = fs.open("\\a.txt", OpenMode::Open, false).unwrap();
    fs.delete_file(&context, "\\a.txt", true).unwrap();
    fs.cleanup(&context);
    fs.close(context);
    assert!(store.get("a.txt").is_none());
}

#[test]
fn directory_rename_moves_every_key_under_the_prefix() {
    let store = Arc::new(MemoryBlobStore::new());
    store.insert("photos/a.jpg", vec![1]);
    store.insert("photos/b/c.jpg", vec![2]);
    store.insert("unrelated.txt", vec![3]);
    let fs = mount(&store, None, false);

    let context = fs.open("\\photos", OpenMode::Open, true).unwrap();
    assert_eq!(fs.rename(&context, "\\photos", "\\archive", false), Ok(()));
    assert!(store.get("photos/a.jpg").is_none());
    assert_eq!(store.get("archive/a.jpg").unwrap(), vec![1]);
    assert_eq!(store.get("archive/b/c.jpg").unwrap(), vec![2]);
    assert_eq!(store.get("unrelated.txt").unwrap(), vec![3]);
    fs.cleanup(&context);
    fs.close(context);
}

#[test]
fn enumeration_honors_the_subfolder() {
    let store = Arc::new(MemoryBlobStore::new());
    store.insert("data/x.txt", vec![1]);
    store.insert("data/sub/y.txt", vec![2]);
    store.insert("other/z.txt", vec![3]);
    let fs = mount(&store, Some("data"), false);

    let children = fs.find_children("\\").unwrap();
    let names: Vec<&str> = children.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, vec!["sub", "x.txt"]);
    assert!(children[0].is_directory());
    assert!(!children[1].is_directory());
}

#[test]
fn enumeration_with_a_pattern_filters_names() {
    let store = Arc::new(MemoryBlobStore::new());
    store.insert("report.txt", vec![1]);
    store.insert("report.md", vec![2]);
    store.insert("image.png", vec![3]);
    let fs = mount(&store, None, false);

    let children = fs.find_children_with_pattern("\\", "*.txt").unwrap();
    assert_eq!(children.len(), 1);
    assert_eq!(children[0].name, "report.txt");
    assert_eq!(fs.find_children_with_pattern("\\", "*").unwrap().len(), 3);
}

#[test]
fn enumeration_is_served_from_cache_within_ttl() {
    let store = Arc::new(MemoryBlobStore::new());
    store.insert("a.txt", vec![1]);
    let fs = mount(&store, None, false);

    fs.find_children("\\").unwrap();
    store.clear_operations();
    fs.find_children("\\").unwrap();
    assert!(store.operations().is_empty());
}

#[test]
fn get_info_on_a_missing_path_is_not_found() {
    let store = Arc::new(MemoryBlobStore::new());
    let fs = mount(&store, None, false);

    // An open that creates gives the handle a context even though the store
    // has nothing; get-info through a fresh directory-probe path misses.
    let context = fs.open("\\gone.txt", OpenMode::OpenOrCreate, false).unwrap();
    fs.delete_file(&context, "\\gone.txt", true).unwrap();
    fs.cleanup(&context);
    fs.close(context);

    let probe = fs.open("\\gone.txt", OpenMode::Open, false);
    assert_eq!(probe.unwrap_err(), Status::FileNotFound);
}

#[test]
fn mounted_probes_the_store_and_unmounted_clears_the_cache() {
    let store = Arc::new(MemoryBlobStore::new());
    store.insert("a.txt", vec![1]);
    let fs = mount(&store, None, false);

    fs.mounted().unwrap();
    assert!(has_op(&store, "probe", ""));

    fs.find_children("\\").unwrap();
    fs.unmounted();
    store.clear_operations();
    // The listing must be re-fetched after unmount dropped the cache.
    fs.find_children("\\").unwrap();
    assert!(has_op(&store, "list_by_hierarchy", ""));
}
