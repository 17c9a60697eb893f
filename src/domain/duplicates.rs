//! Perceptual-hash helpers for near-duplicate detection

use crate::analysis::ValidationError;
use crate::model::{Fact, Value};

pub const IMG_PHASH: &str = "img_phash";

/// Parses a 64-bit perceptual hash written as hex, with an optional `0x`.
pub fn parse_phash(text: &str) -> Option<u64> {
    let digits = text
        .strip_prefix("0x")
        .or_else(|| text.strip_prefix("0X"))
        .unwrap_or(text);
    if digits.is_empty() || digits.len() > 16 {
        return None;
    }
    u64::from_str_radix(digits, 16).ok()
}

/// Number of differing bits between two hex hashes.
pub fn hamming_hex(a: &str, b: &str) -> Option<u32> {
    Some((parse_phash(a)? ^ parse_phash(b)?).count_ones())
}

/// Rejects hash arguments that are not 64-bit hex.
pub fn check_phash(fact: &Fact, col: usize, col_name: &str) -> Result<(), ValidationError> {
    match fact.args.get(col) {
        Some(Value::Str(text)) if parse_phash(text).is_none() => Err(ValidationError::invalid(
            &fact.pred,
            col_name,
            format!("'{}' is not a 64-bit hex hash", text),
        )),
        _ => Ok(()),
    }
}
