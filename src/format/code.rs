//! C/C++ header and x64dbg exports.

use super::{sanitize_name, SignatureFormatter, SignatureSet};
use crate::SigError;

/// C/C++ header with byte arrays and mask strings.
pub struct CppFormatter;

/// x64dbg pattern search format (no spaces, `??` wildcards).
pub struct X64dbgFormatter;

impl SignatureFormatter for CppFormatter {
    fn format(&self, signatures: &SignatureSet, _module: &str) -> Result<String, SigError> {
        let mut lines = vec![
            "/*".to_string(),
            " * sigforge generated pattern header".to_string(),
            " *".to_string(),
            " * Usage: FindPattern(module, NAME_PATTERN, NAME_MASK, NAME_SIZE)".to_string(),
            " */".to_string(),
            String::new(),
            "#ifndef SIGFORGE_PATTERNS_H".to_string(),
            "#define SIGFORGE_PATTERNS_H".to_string(),
            String::new(),
        ];

        for (target, variants) in signatures {
            let Some(sig) = variants.first() else {
                continue;
            };
            let name = sanitize_name(target).to_uppercase();

            let byte_tokens: Vec<String> = sig
                .pattern
                .split(' ')
                .map(|tok| {
                    if tok == "??" {
                        "0x00".to_string()
                    } else {
                        format!("0x{tok}")
                    }
                })
                .collect();

            lines.push(format!("// {target}"));
            lines.push(format!(
                "// uniqueness {:.0}%, stability {}",
                sig.uniqueness_score * 100.0,
                sig.stability
            ));
            lines.push(format!("static const unsigned char {name}_PATTERN[] = {{"));
            for chunk in byte_tokens.chunks(8) {
                lines.push(format!("    {},", chunk.join(", ")));
            }
            lines.push("};".to_string());
            lines.push(format!("static const char {name}_MASK[] = \"{}\";", sig.mask));
            lines.push(format!("#define {name}_SIZE {}", sig.length));
            lines.push(String::new());
        }

        lines.push("#endif // SIGFORGE_PATTERNS_H".to_string());
        Ok(lines.join("\n"))
    }
}

impl SignatureFormatter for X64dbgFormatter {
    fn format(&self, signatures: &SignatureSet, _module: &str) -> Result<String, SigError> {
        let mut lines = vec![
            "// sigforge - x64dbg pattern export".to_string(),
            "// Paste into Ctrl+B (Search for Pattern)".to_string(),
            String::new(),
        ];

        for (target, variants) in signatures {
            lines.push(format!("// === {target} ==="));
            for (i, sig) in variants.iter().enumerate() {
                lines.push(format!(
                    "// variant {} ({:.0}% unique)",
                    i + 1,
                    sig.uniqueness_score * 100.0
                ));
                lines.push(sig.pattern.replace(' ', ""));
                lines.push(String::new());
            }
        }

        Ok(lines.join("\n"))
    }
}
