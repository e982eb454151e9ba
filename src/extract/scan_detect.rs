//! Decide whether a document is digital or scanned.

use schemars::JsonSchema;

use crate::prelude::*;

/// Default minimum amount of digital text, in characters, for a document to
/// count as digital.
pub const DEFAULT_SCAN_THRESHOLD: usize = 100;

/// How a document's text should be obtained.
#[derive(Clone, Copy, Debug, Deserialize, JsonSchema, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    /// The document has a usable text layer.
    Digital,
    /// The document is (mostly) images, so we need OCR.
    Scanned,
}

/// Classify a document from all of its digital text.
///
/// Documents with fewer than `threshold` characters after trimming are
/// treated as scanned.
pub fn classify(full_digital_text: &str, threshold: usize) -> Classification {
    if full_digital_text.trim().chars().count() < threshold {
        Classification::Scanned
    } else {
        Classification::Digital
    }
}
