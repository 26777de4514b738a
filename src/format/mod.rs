//! Export formatters for generated signatures.
//!
//! All formats are stateless text transforms over a set of signatures;
//! nothing here feeds back into generation.

mod code;
mod json;
mod script;

pub use self::code::{CppFormatter, X64dbgFormatter};
pub use self::json::JsonFormatter;
pub use self::script::{CheatEngineFormatter, IdaFormatter};

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::generator::Signature;
use crate::SigError;

/// Signatures keyed by target identifier, as produced by the generator.
pub type SignatureSet = BTreeMap<String, Vec<Signature>>;

/// Supported export formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    /// Space-separated byte pattern with `??` wildcards.
    Aob,
    /// Pattern plus `x`/`?` mask pair.
    Mask,
    /// IDA Python scanning script.
    Ida,
    /// Cheat Engine auto-assembler script.
    #[value(alias = "cheatengine")]
    CheatEngine,
    /// C/C++ header with byte arrays and masks.
    Cpp,
    /// x64dbg pattern search format.
    X64dbg,
    /// JSON dump of the full signature set.
    Json,
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExportFormat::Aob => write!(f, "aob"),
            ExportFormat::Mask => write!(f, "mask"),
            ExportFormat::Ida => write!(f, "ida"),
            ExportFormat::CheatEngine => write!(f, "cheatengine"),
            ExportFormat::Cpp => write!(f, "cpp"),
            ExportFormat::X64dbg => write!(f, "x64dbg"),
            ExportFormat::Json => write!(f, "json"),
        }
    }
}

impl FromStr for ExportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "aob" => Ok(ExportFormat::Aob),
            "mask" => Ok(ExportFormat::Mask),
            "ida" => Ok(ExportFormat::Ida),
            "cheatengine" | "ce" => Ok(ExportFormat::CheatEngine),
            "cpp" | "c" => Ok(ExportFormat::Cpp),
            "x64dbg" => Ok(ExportFormat::X64dbg),
            "json" => Ok(ExportFormat::Json),
            _ => Err(format!("unknown export format: {s}")),
        }
    }
}

impl ExportFormat {
    pub fn available_formats() -> &'static [Self] {
        &[
            ExportFormat::Aob,
            ExportFormat::Mask,
            ExportFormat::Ida,
            ExportFormat::CheatEngine,
            ExportFormat::Cpp,
            ExportFormat::X64dbg,
            ExportFormat::Json,
        ]
    }

    /// Get a formatter for this export format.
    pub fn get_formatter(&self) -> Box<dyn SignatureFormatter> {
        match self {
            ExportFormat::Aob => Box::new(AobFormatter),
            ExportFormat::Mask => Box::new(MaskFormatter),
            ExportFormat::Ida => Box::new(IdaFormatter),
            ExportFormat::CheatEngine => Box::new(CheatEngineFormatter),
            ExportFormat::Cpp => Box::new(CppFormatter),
            ExportFormat::X64dbg => Box::new(X64dbgFormatter),
            ExportFormat::Json => Box::new(JsonFormatter),
        }
    }
}

/// Formatter trait for signature export.
pub trait SignatureFormatter {
    /// Render the signature set; `module` is used by formats that
    /// address patterns relative to a module.
    fn format(&self, signatures: &SignatureSet, module: &str) -> Result<String, SigError>;
}

/// Turn a target name into a symbol identifier safe for scripts.
pub(crate) fn sanitize_name(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

/// Plain AOB export.
pub struct AobFormatter;

/// Pattern + mask pair export.
pub struct MaskFormatter;

impl SignatureFormatter for AobFormatter {
    fn format(&self, signatures: &SignatureSet, _module: &str) -> Result<String, SigError> {
        let mut lines = vec!["// sigforge - AOB export".to_string(), String::new()];

        for (target, variants) in signatures {
            lines.push(format!("// === {target} ==="));
            for (i, sig) in variants.iter().enumerate() {
                lines.push(format!(
                    "// variant {} ({:.0}% unique, {} stability)",
                    i + 1,
                    sig.uniqueness_score * 100.0,
                    sig.stability
                ));
                lines.push(sig.pattern.clone());
                lines.push(String::new());
            }
        }

        Ok(lines.join("\n"))
    }
}

impl SignatureFormatter for MaskFormatter {
    fn format(&self, signatures: &SignatureSet, _module: &str) -> Result<String, SigError> {
        let mut lines = vec!["// sigforge - pattern/mask export".to_string(), String::new()];

        for (target, variants) in signatures {
            lines.push(format!("// === {target} ==="));
            for (i, sig) in variants.iter().enumerate() {
                let packed = sig.pattern.replace("??", "00").replace(' ', "");
                lines.push(format!(
                    "// variant {} ({:.0}% unique)",
                    i + 1,
                    sig.uniqueness_score * 100.0
                ));
                lines.push(format!("Pattern: {packed}"));
                lines.push(format!("Mask:    {}", sig.mask));
                lines.push(String::new());
            }
        }

        Ok(lines.join("\n"))
    }
}
