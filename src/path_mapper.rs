//! Translation between native paths and blob keys.
//!
//! Native paths are backslash-separated with a leading separator; blob keys
//! are forward-slash-separated with no leading separator, optionally below a
//! container-relative subfolder. Every separator-convention swap lives here
//! so that callers only ever handle one of the two forms.

/// Characters accepted as path separators in caller-supplied input.
const SEPARATORS: &[char] = &['\\', '/'];

/// Maps native paths to blob keys and back, honoring an optional
/// container-relative subfolder prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathMapper {
    /// Normalized subfolder: empty, or `"seg1/seg2/"` with a trailing slash.
    prefix: String,
}

impl PathMapper {
    /// Creates a mapper for the given subfolder.
    ///
    /// The subfolder may use either separator style and may carry surrounding
    /// separators; it is normalized to the internal prefix form. `None` and
    /// all-separator strings normalize to the empty prefix.
    pub fn new(subfolder: Option<&str>) -> Self {
        let mut prefix = subfolder
            .unwrap_or("")
            .trim_matches(|c| SEPARATORS.contains(&c))
            .replace('\\', "/");
        if !prefix.is_empty() {
            prefix.push('/');
        }
        PathMapper { prefix }
    }

    /// The normalized subfolder prefix: empty, or ending in `/`.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Converts a native path into the key of the blob it addresses.
    ///
    /// The root native path maps to the prefix itself (the empty string when
    /// no subfolder is configured).
    pub fn to_blob_path(&self, native_path: &str) -> String {
        let relative = native_path
            .trim_start_matches(|c| SEPARATORS.contains(&c))
            .replace('\\', "/");
        format!("{}{}", self.prefix, relative)
    }

    /// Converts a blob key back into a native path.
    ///
    /// The subfolder prefix is stripped with a case-insensitive compare, as
    /// OS path input is not case-folded while the store is case-sensitive. A
    /// key that differs from the prefix only in case is therefore mis-mapped;
    /// known limitation.
    pub fn to_native_path(&self, blob_key: &str) -> String {
        let relative = if blob_key.len() >= self.prefix.len()
            && blob_key[..self.prefix.len()].eq_ignore_ascii_case(&self.prefix)
        {
            &blob_key[self.prefix.len()..]
        } else {
            blob_key
        };
        format!("\\{}", relative.replace('/', "\\"))
    }

    /// Computes the prefix argument for a hierarchical listing of the
    /// directory addressed by `native_path`.
    ///
    /// This is `to_blob_path` with a trailing `/` appended iff the result is
    /// non-empty and does not already end in one.
    pub fn list_prefix(&self, native_path: &str) -> String {
        let mut key = self.to_blob_path(native_path);
        if !key.is_empty() && !key.ends_with('/') {
            key.push('/');
        }
        key
    }
}

/// True iff a native path addresses the volume root: empty, or separators
/// only.
pub fn is_root_path(native_path: &str) -> bool {
    native_path.chars().all(|c| SEPARATORS.contains(&c))
}

/// Returns the leaf segment of a blob key.
///
/// One trailing `/` (a synthesized directory marker) is ignored; a key with
/// no separator is its own leaf. The result never contains `/`.
pub fn leaf_name(blob_key: &str) -> &str {
    let trimmed = blob_key.strip_suffix('/').unwrap_or(blob_key);
    match trimmed.rfind('/') {
        Some(pos) => &trimmed[pos + 1..],
        None => trimmed,
    }
}

/// Returns the immediate parent prefix of a blob key, ending in `/`.
///
/// Top-level keys have the empty parent. A trailing `/` on the input (a
/// directory marker) is ignored, so `parent_prefix("a/b/")` is `"a/"`.
pub fn parent_prefix(blob_key: &str) -> &str {
    let trimmed = blob_key.strip_suffix('/').unwrap_or(blob_key);
    match trimmed.rfind('/') {
        Some(pos) => &trimmed[..=pos],
        None => "",
    }
}
