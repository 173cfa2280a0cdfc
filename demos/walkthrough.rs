// Drives a BlobFs end-to-end over the in-process store backend, issuing the
// same callback sequence the OS kernel bridge would: mount, enumerate, create,
// write, read back, rename, delete, unmount.
//
// Run with: cargo run --example walkthrough -- [--subfolder data] [--read-only]

use std::sync::Arc;

use blobfs::BlobFs;
use blobfs::Filesystem;
use blobfs::MemoryBlobStore;
use blobfs::MountConfig;
use blobfs::OpenMode;
use blobfs::WriteOptions;
use clap::Parser;
use log::LevelFilter;

#[derive(Parser)]
#[command(version, about = "blobfs walkthrough over an in-process store")]
struct Args {
    /// Mount this container-relative subfolder instead of the root.
    #[arg(long)]
    subfolder: Option<String>,

    /// Mount read-only and watch the write paths get refused.
    #[arg(long)]
    read_only: bool,

    /// Log verbosely.
    #[arg(short, long)]
    verbose: bool,
}

fn main() {
    let args = Args::parse();
    env_logger::builder()
        .filter_level(if args.verbose {
            LevelFilter::Debug
        } else {
            LevelFilter::Info
        })
        .init();

    let store = Arc::new(MemoryBlobStore::new());
    let seed_prefix = args
        .subfolder
        .as_deref()
        .map(|s| format!("{s}/"))
        .unwrap_or_default();
    store.insert(format!("{seed_prefix}readme.txt"), b"seeded content".to_vec());
    store.insert(format!("{seed_prefix}photos/cat.jpg"), vec![0xFF; 64]);

    let config = MountConfig {
        account_name: "demoaccount".to_owned(),
        account_key: "demokey".to_owned(),
        container_name: "democontainer".to_owned(),
        subfolder: args.subfolder,
        mount_point: "Z".to_owned(),
        read_only: args.read_only,
    };
    let fs = BlobFs::new(store.clone(), config).expect("building the adapter");

    fs.mounted().expect("probing the store at mount");
    let volume = fs.get_volume_info().expect("volume info");
    println!("mounted {} ({})", volume.label, volume.filesystem_name);

    println!("\nroot listing:");
    for child in fs.find_children("\\").expect("listing the root") {
        let kind = if child.is_directory() { "<dir> " } else { "      " };
        println!("  {kind}{:>8}  {}", child.size, child.name);
    }

    println!("\ncreating \\notes\\today.txt");
    match fs.open("\\notes\\today.txt", OpenMode::CreateNew, false) {
        Ok(context) => {
            fs.write(&context, b"remember the milk", 0, WriteOptions::default())
                .expect("writing");
            fs.cleanup(&context);
            fs.close(context);

            let context = fs
                .open("\\notes\\today.txt", OpenMode::Open, false)
                .expect("reopening");
            let mut buf = [0u8; 32];
            let n = fs.read(&context, &mut buf, 0).expect("reading back");
            println!("read back: {:?}", String::from_utf8_lossy(&buf[..n]));

            fs.rename(&context, "\\notes\\today.txt", "\\notes\\done.txt", false)
                .expect("renaming");
            fs.cleanup(&context);
            fs.close(context);

            let context = fs
                .open("\\notes\\done.txt", OpenMode::Open, false)
                .expect("opening the renamed file");
            fs.delete_file(&context, "\\notes\\done.txt", true)
                .expect("marking for delete");
            fs.cleanup(&context);
            fs.close(context);
            println!("renamed and deleted again");
        }
        Err(status) => println!("create refused: {status}"),
    }

    fs.unmounted();
    let ops = store.operations();
    for (op, key) in &ops {
        log::debug!("store op: {op} {key}");
    }
    println!("\nunmounted ({} store operations issued in total)", ops.len());
}
