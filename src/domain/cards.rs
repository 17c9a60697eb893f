//! Card validity inputs
//!
//! OCR observations arrive as `ocr_field(card, field, confidence, captured_at)`.
//! Validity itself is decided by the rules; this module only guards the
//! values they rely on.

use crate::analysis::ValidationError;
use crate::model::{Fact, Value};

pub const OCR_FIELD: &str = "ocr_field";
pub const FIELD_TITLE: &str = "title";
pub const FIELD_SET: &str = "set";

/// Rejects confidences outside [0, 1].
pub fn check_confidence(fact: &Fact, col: usize, col_name: &str) -> Result<(), ValidationError> {
    match fact.args.get(col) {
        Some(Value::Num(c)) if !(0.0..=1.0).contains(c) => Err(ValidationError::invalid(
            &fact.pred,
            col_name,
            format!("confidence {} is outside [0, 1]", c),
        )),
        _ => Ok(()),
    }
}
