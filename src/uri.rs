//! Endpoint parsing for `cp` arguments.
//!
//! An argument is one of three things: an `s3://bucket[/key]` URI, the
//! literal `-` meaning the standard stream, or a local filesystem path.
//! Bucket and key syntax is not validated here; the store rejects invalid
//! names itself.

use std::path::{Path, PathBuf};

/// The scheme prefix that marks a remote endpoint.
const S3_SCHEME: &str = "s3://";

/// A parsed `cp` endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// A local filesystem path.
    Local(PathBuf),
    /// The standard stream (`-`): stdin as a source, stdout as a destination.
    Stdio,
    /// An object in a bucket. The key may be empty (`s3://bucket`).
    Remote { bucket: String, key: String },
}

impl Endpoint {
    /// Parse a command-line argument into an endpoint.
    pub fn parse(s: &str) -> Endpoint {
        if s == "-" {
            return Endpoint::Stdio;
        }
        if let Some(rest) = s.strip_prefix(S3_SCHEME) {
            let (bucket, key) = match rest.find('/') {
                Some(idx) => (&rest[..idx], &rest[idx + 1..]),
                None => (rest, ""),
            };
            return Endpoint::Remote {
                bucket: bucket.to_string(),
                key: key.to_string(),
            };
        }
        Endpoint::Local(PathBuf::from(s))
    }

    pub fn is_remote(&self) -> bool {
        matches!(self, Endpoint::Remote { .. })
    }
}

/// Derive the destination key for a single-object transfer.
///
/// An empty key or a key ending in `/` takes the basename of the source, so
/// `cp file s3://b/` and `cp file s3://b/dir/` both create `file` under the
/// prefix.
pub fn derive_key(key: &str, source_name: &str) -> String {
    if key.is_empty() || key.ends_with('/') {
        let mut derived = key.to_string();
        derived.push_str(source_name);
        return derived;
    }
    key.to_string()
}

/// Last path segment of an object key.
pub fn key_basename(key: &str) -> &str {
    key.rsplit('/').next().unwrap_or(key)
}

/// Join two key segments with a single `/`, tolerating empty parts and
/// stray slashes at the seam.
pub fn join_key(prefix: &str, rest: &str) -> String {
    if prefix.is_empty() {
        return rest.trim_start_matches('/').to_string();
    }
    if rest.is_empty() {
        return prefix.to_string();
    }
    format!(
        "{}/{}",
        prefix.trim_end_matches('/'),
        rest.trim_start_matches('/')
    )
}

/// A filesystem path relative to `root`, rendered with forward slashes for
/// use as an object-key suffix.
pub fn relative_key(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let parts: Vec<String> = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    Some(parts.join("/"))
}

/// An object-key suffix rendered as a filesystem path with OS separators.
pub fn key_to_path(root: &Path, key_suffix: &str) -> PathBuf {
    let mut path = root.to_path_buf();
    for part in key_suffix.split('/').filter(|p| !p.is_empty()) {
        path.push(part);
    }
    path
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_remote_with_key() {
        assert_eq!(
            Endpoint::parse("s3://bucket/path/to/key"),
            Endpoint::Remote {
                bucket: "bucket".into(),
                key: "path/to/key".into()
            }
        );
    }

    #[test]
    fn parse_remote_bucket_only() {
        assert_eq!(
            Endpoint::parse("s3://bucket"),
            Endpoint::Remote {
                bucket: "bucket".into(),
                key: "".into()
            }
        );
        assert_eq!(
            Endpoint::parse("s3://bucket/"),
            Endpoint::Remote {
                bucket: "bucket".into(),
                key: "".into()
            }
        );
    }

    #[test]
    fn parse_stdio_and_local() {
        assert_eq!(Endpoint::parse("-"), Endpoint::Stdio);
        assert_eq!(
            Endpoint::parse("/tmp/file"),
            Endpoint::Local(PathBuf::from("/tmp/file"))
        );
        // A path that merely contains "s3://" later is still local.
        assert_eq!(
            Endpoint::parse("./s3://odd"),
            Endpoint::Local(PathBuf::from("./s3://odd"))
        );
    }

    #[test]
    fn derive_key_appends_basename() {
        assert_eq!(derive_key("", "file.txt"), "file.txt");
        assert_eq!(derive_key("dir/", "file.txt"), "dir/file.txt");
        assert_eq!(derive_key("dir/name", "file.txt"), "dir/name");
    }

    #[test]
    fn key_basename_takes_last_segment() {
        assert_eq!(key_basename("a/b/c.txt"), "c.txt");
        assert_eq!(key_basename("c.txt"), "c.txt");
    }

    #[test]
    fn join_key_handles_seams() {
        assert_eq!(join_key("", "a/b"), "a/b");
        assert_eq!(join_key("p", "a/b"), "p/a/b");
        assert_eq!(join_key("p/", "/a"), "p/a");
        assert_eq!(join_key("p", ""), "p");
    }

    #[test]
    fn relative_key_uses_forward_slashes() {
        let root = Path::new("/data/src");
        let path = Path::new("/data/src/foo/bar/baz.txt");
        assert_eq!(relative_key(root, path).unwrap(), "foo/bar/baz.txt");
    }

    #[test]
    fn key_to_path_splits_segments() {
        let root = Path::new("/out");
        assert_eq!(
            key_to_path(root, "foo/bar/a"),
            PathBuf::from("/out/foo/bar/a")
        );
    }
}
