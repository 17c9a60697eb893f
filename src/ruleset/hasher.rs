//! Ruleset content hashing
//!
//! The hash identifies a ruleset by content alone. Files are sorted by name
//! and every name and body is prefixed with its byte length, so no two
//! different file sets produce the same byte stream.

use sha2::{Digest, Sha256};

/// Computes the hex SHA-256 ruleset hash over `(file name, content)` pairs.
///
/// Input order does not matter.
pub fn ruleset_hash<'a, I>(files: I) -> String
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let mut sorted: Vec<(&str, &str)> = files.into_iter().collect();
    sorted.sort();

    let mut hasher = Sha256::new();
    for (name, content) in sorted {
        write_field(&mut hasher, name.as_bytes());
        write_field(&mut hasher, content.as_bytes());
    }
    format!("{:x}", hasher.finalize())
}

fn write_field(hasher: &mut Sha256, bytes: &[u8]) {
    hasher.update((bytes.len() as u64).to_le_bytes());
    hasher.update(bytes);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_order_independent() {
        let a = ruleset_hash([("a.dl", "x."), ("b.dl", "y.")]);
        let b = ruleset_hash([("b.dl", "y."), ("a.dl", "x.")]);
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_boundaries_are_unambiguous() {
        let a = ruleset_hash([("a.dl", "bc")]);
        let b = ruleset_hash([("a.dlb", "c")]);
        assert_ne!(a, b);
    }

    #[test]
    fn test_content_change_changes_hash() {
        let a = ruleset_hash([("a.dl", "p(1).")]);
        let b = ruleset_hash([("a.dl", "p(2).")]);
        assert_ne!(a, b);
    }
}
