//! Channel names derived from data file paths.
//!
//! A writer and its readers find the same channel by hashing the canonical
//! path of the data file. The hash is FNV-1a over the path bytes, so the
//! name does not depend on the Rust version or the process that computes it.

use serie_common::consts::SHM_NAME_PREFIX;
use std::io;
use std::path::Path;

const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// 64-bit FNV-1a hash.
pub const fn fnv1a64(bytes: &[u8]) -> u64 {
    let mut hash = FNV_OFFSET_BASIS;
    let mut i = 0;
    while i < bytes.len() {
        hash ^= bytes[i] as u64;
        hash = hash.wrapping_mul(FNV_PRIME);
        i += 1;
    }
    hash
}

/// Channel name for a data file, resolving the path first.
///
/// # Errors
///
/// Fails if the path cannot be canonicalized (for example, it does not exist).
pub fn channel_name(path: &Path) -> io::Result<String> {
    let canonical = path.canonicalize()?;
    Ok(channel_name_for_canonical(&canonical))
}

/// Channel name for an already canonical path: `serie_<decimal hash>`.
pub fn channel_name_for_canonical(canonical: &Path) -> String {
    format!(
        "{}_{}",
        SHM_NAME_PREFIX,
        fnv1a64(canonical.as_os_str().as_encoded_bytes())
    )
}

/// Whether `name` looks like a channel created by this crate.
pub fn is_channel_name(name: &str) -> bool {
    name.strip_prefix(SHM_NAME_PREFIX)
        .and_then(|rest| rest.strip_prefix('_'))
        .is_some_and(|digits| !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_fnv1a_reference_values() {
        assert_eq!(fnv1a64(b""), 0xcbf29ce484222325);
        assert_eq!(fnv1a64(b"a"), 0xaf63dc4c8601ec8c);
        assert_eq!(fnv1a64(b"foobar"), 0x85944171f73967e8);
    }

    #[test]
    fn test_name_is_stable_and_prefixed() {
        let path = PathBuf::from("/data/run1/sensors.serie");
        let a = channel_name_for_canonical(&path);
        let b = channel_name_for_canonical(&path);
        assert_eq!(a, b);
        assert!(a.starts_with("serie_"));
        assert!(is_channel_name(&a));
    }

    #[test]
    fn test_distinct_paths_distinct_names() {
        let a = channel_name_for_canonical(Path::new("/data/a.serie"));
        let b = channel_name_for_canonical(Path::new("/data/b.serie"));
        assert_ne!(a, b);
    }

    #[test]
    fn test_relative_and_absolute_resolve_alike() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("x.serie");
        std::fs::write(&file, b"").unwrap();

        let dotted = dir.path().join(".").join("x.serie");
        assert_eq!(
            channel_name(&file).unwrap(),
            channel_name(&dotted).unwrap()
        );
    }

    #[test]
    fn test_missing_file_has_no_name() {
        assert!(channel_name(Path::new("/nonexistent/serie/file")).is_err());
    }

    #[test]
    fn test_is_channel_name() {
        assert!(is_channel_name("serie_123"));
        assert!(!is_channel_name("serie_"));
        assert!(!is_channel_name("serie_12a"));
        assert!(!is_channel_name("other_123"));
    }
}
