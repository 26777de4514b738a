//! JSON export of the full signature set.

use super::{SignatureFormatter, SignatureSet};
use crate::SigError;

/// Pretty-printed JSON dump, suitable for tooling.
pub struct JsonFormatter;

impl SignatureFormatter for JsonFormatter {
    fn format(&self, signatures: &SignatureSet, _module: &str) -> Result<String, SigError> {
        Ok(serde_json::to_string_pretty(signatures)?)
    }
}
