//! Metadata disk cache.
//!
//! Scanning the time axis of a large dataset is expensive (time is the
//! unlimited dimension and is not laid out contiguously), so the reader
//! caches its reported metadata on disk, keyed by a SHA-1 over the
//! framework version, the data path, the ordered file list, and every
//! reader property. Cache files are named `.<40-hex-key>.tmd` and
//! looked up along a search path; the first readable match wins.
//! Unreadable or corrupt entries fall through to the next path, and a
//! full miss falls back to scanning from scratch.

use crate::error::Result;
use crate::metadata::Metadata;
use crate::stage::{PropertyBag, PropertyValue};
use crate::stream::{BinaryStream, Streamable};
use sha1::{Digest, Sha1};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

/// Cache file extension.
pub const CACHE_EXTENSION: &str = "tmd";

/// Environment variable disabling the reader metadata cache when set
/// to `0` or `false` (overrides the stage property).
pub const CACHE_ENV_VAR: &str = "STRATUS_CF_READER_CACHE_METADATA";

/// Resolve the environment override, when present.
pub fn env_override() -> Option<bool> {
    match std::env::var(CACHE_ENV_VAR) {
        Ok(value) => Some(!matches!(value.as_str(), "0" | "false" | "FALSE")),
        Err(_) => None,
    }
}

fn pack_property(stream: &mut BinaryStream, name: &str, value: &PropertyValue) {
    stream.pack_str(name);
    match value {
        PropertyValue::Int(v) => {
            stream.pack_u8(0);
            stream.pack_i64(*v);
        }
        PropertyValue::Float(v) => {
            stream.pack_u8(1);
            stream.pack_f64(*v);
        }
        PropertyValue::Bool(v) => {
            stream.pack_u8(2);
            stream.pack_u8(*v as u8);
        }
        PropertyValue::Str(v) => {
            stream.pack_u8(3);
            stream.pack_str(v);
        }
        PropertyValue::StrList(v) => {
            stream.pack_u8(4);
            stream.pack_str_vec(v);
        }
        PropertyValue::FloatList(v) => {
            stream.pack_u8(5);
            stream.pack_f64_vec(v);
        }
    }
}

/// Compute the 40-hex cache key.
///
/// The key covers everything whose change would change the reported
/// metadata: the framework version, the absolute data path, the ordered
/// file list, and every property of the reader.
pub fn cache_key(version: &str, root: &Path, files: &[String], properties: &PropertyBag) -> String {
    let mut stream = BinaryStream::new();
    stream.pack_str(version);
    stream.pack_str(&root.to_string_lossy());
    stream.pack_str_vec(files);
    for (name, value) in properties.iter() {
        pack_property(&mut stream, name, value);
    }

    let mut hasher = Sha1::new();
    hasher.update(stream.as_slice());
    let digest = hasher.finalize();
    let mut key = String::with_capacity(40);
    for byte in digest {
        let _ = write!(key, "{byte:02x}");
    }
    key
}

/// The cache search path, most specific directory first:
/// `[user dir, data root, cwd, HOME]`, keeping only the entries that
/// exist. Reads take the first readable match; writes land in the
/// first writable directory, so a user-provided cache dir wins over
/// polluting `$HOME`.
pub fn search_paths(data_root: &Path, user_dir: Option<&Path>) -> Vec<PathBuf> {
    let mut paths = Vec::with_capacity(4);
    if let Some(dir) = user_dir {
        paths.push(dir.to_path_buf());
    }
    paths.push(data_root.to_path_buf());
    paths.push(PathBuf::from("."));
    if let Some(home) = std::env::var_os("HOME") {
        paths.push(PathBuf::from(home));
    }
    paths.retain(|p| p.is_dir());
    paths
}

fn cache_file(dir: &Path, key: &str) -> PathBuf {
    dir.join(format!(".{key}.{CACHE_EXTENSION}"))
}

/// Try each search path for a readable, decodable cache entry.
///
/// A concurrent or interrupted writer can leave a torn entry; a parse
/// failure falls through to the next path.
pub fn try_read(paths: &[PathBuf], key: &str) -> Option<Metadata> {
    for dir in paths {
        let path = cache_file(dir, key);
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(_) => continue,
        };
        let mut stream = BinaryStream::from_bytes(&bytes);
        match Metadata::from_stream(&mut stream) {
            Ok(metadata) => {
                tracing::info!(path = %path.display(), "found metadata cache");
                return Some(metadata);
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e,
                    "failed to read metadata cache");
            }
        }
    }
    None
}

/// Write the cache back to the first writable search path.
///
/// Entries are written create-exclusive so concurrent scanners do not
/// tear each other's files; owner and group get read-write, world gets
/// read. Returns the path written, or `None` when every directory
/// refused.
pub fn write_back(paths: &[PathBuf], key: &str, metadata: &Metadata) -> Result<Option<PathBuf>> {
    let mut stream = BinaryStream::new();
    metadata.to_stream(&mut stream);

    for dir in paths {
        let path = cache_file(dir, key);
        let mut options = std::fs::OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o664);
        }
        match options.open(&path) {
            Ok(mut file) => {
                use std::io::Write;
                file.write_all(stream.as_slice())?;
                tracing::info!(path = %path.display(), "wrote metadata cache");
                return Ok(Some(path));
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                // another scanner won the race; their entry is ours too
                return Ok(Some(path));
            }
            Err(e) => {
                tracing::debug!(path = %path.display(), error = %e,
                    "cache directory refused, trying next");
            }
        }
    }
    tracing::warn!(key = %key, "failed to write a metadata cache in any search path");
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stage::PropertyDescriptor;

    fn bag() -> PropertyBag {
        PropertyBag::from_descriptors(&[
            PropertyDescriptor::new("x_axis_variable", PropertyValue::Str("lon".into()), ""),
            PropertyDescriptor::new("thread_pool_size", PropertyValue::Int(-1), ""),
        ])
    }

    #[test]
    fn test_key_is_40_hex_and_stable() {
        let files = vec!["a.bin".to_string(), "b.bin".to_string()];
        let k1 = cache_key("1.0", Path::new("/data"), &files, &bag());
        let k2 = cache_key("1.0", Path::new("/data"), &files, &bag());
        assert_eq!(k1, k2);
        assert_eq!(k1.len(), 40);
        assert!(k1.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_key_changes_with_any_input() {
        let files = vec!["a.bin".to_string()];
        let base = cache_key("1.0", Path::new("/data"), &files, &bag());

        assert_ne!(base, cache_key("1.1", Path::new("/data"), &files, &bag()));
        assert_ne!(base, cache_key("1.0", Path::new("/other"), &files, &bag()));
        assert_ne!(
            base,
            cache_key(
                "1.0",
                Path::new("/data"),
                &["b.bin".to_string()],
                &bag()
            )
        );

        let mut changed = bag();
        changed
            .set("thread_pool_size", PropertyValue::Int(4))
            .unwrap();
        assert_ne!(base, cache_key("1.0", Path::new("/data"), &files, &changed));
    }

    #[test]
    fn test_read_write_round_trip_and_corruption_fallback() {
        let dir = tempfile::tempdir().unwrap();
        let paths = vec![dir.path().to_path_buf()];
        let key = "0123456789abcdef0123456789abcdef01234567";

        assert!(try_read(&paths, key).is_none());

        let mut md = Metadata::new();
        md.set("number_of_time_steps", 12u64);
        let written = write_back(&paths, key, &md).unwrap().unwrap();
        assert_eq!(try_read(&paths, key).unwrap(), md);

        // corrupt entries fall through rather than fail
        std::fs::write(&written, b"garbage").unwrap();
        assert!(try_read(&paths, key).is_none());
    }
}
