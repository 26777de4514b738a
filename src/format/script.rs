//! IDA Python and Cheat Engine script exports.

use super::{sanitize_name, SignatureFormatter, SignatureSet};
use crate::SigError;

/// IDA Python scanning script (`?` single-character wildcards).
pub struct IdaFormatter;

/// Cheat Engine auto-assembler script with `aobscanmodule` entries.
pub struct CheatEngineFormatter;

impl SignatureFormatter for IdaFormatter {
    fn format(&self, signatures: &SignatureSet, _module: &str) -> Result<String, SigError> {
        let mut lines = vec![
            "\"\"\"".to_string(),
            "sigforge generated IDA Python script".to_string(),
            String::new(),
            "Usage: File -> Script File".to_string(),
            "\"\"\"".to_string(),
            String::new(),
            "import idc".to_string(),
            String::new(),
            String::new(),
            "def find_pattern(pattern):".to_string(),
            "    ida_pattern = pattern.replace(\"??\", \"?\")".to_string(),
            "    addr = idc.find_binary(0, idc.SEARCH_DOWN, ida_pattern)".to_string(),
            "    results = []".to_string(),
            "    while addr != idc.BADADDR:".to_string(),
            "        results.append(addr)".to_string(),
            "        addr = idc.find_binary(addr + 1, idc.SEARCH_DOWN, ida_pattern)"
                .to_string(),
            "    return results".to_string(),
            String::new(),
            String::new(),
        ];

        for (target, variants) in signatures {
            let Some(sig) = variants.first() else {
                continue;
            };
            let name = sanitize_name(target);

            lines.push(format!("# {target}"));
            lines.push(format!(
                "# uniqueness {:.0}%, stability {}",
                sig.uniqueness_score * 100.0,
                sig.stability
            ));
            lines.push(format!(
                "{}_PATTERN = \"{}\"",
                name.to_uppercase(),
                sig.pattern
            ));
            lines.push(String::new());
            lines.push(format!("def find_{}():", name.to_lowercase()));
            lines.push(format!(
                "    return find_pattern({}_PATTERN)",
                name.to_uppercase()
            ));
            lines.push(String::new());
        }

        lines.push(String::new());
        lines.push("if __name__ == \"__main__\":".to_string());
        for target in signatures.keys() {
            let name = sanitize_name(target).to_lowercase();
            lines.push(format!("    matches = find_{name}()"));
            lines.push(format!(
                "    print(\"{target}: %d match(es)\" % len(matches))"
            ));
        }

        Ok(lines.join("\n"))
    }
}

impl SignatureFormatter for CheatEngineFormatter {
    fn format(&self, signatures: &SignatureSet, module: &str) -> Result<String, SigError> {
        let mut lines = vec![
            "[ENABLE]".to_string(),
            "// sigforge generated Cheat Engine script".to_string(),
            String::new(),
        ];

        for (target, variants) in signatures {
            let Some(sig) = variants.first() else {
                continue;
            };
            let name = sanitize_name(target);

            lines.push(format!(
                "// {target} ({:.0}% unique)",
                sig.uniqueness_score * 100.0
            ));
            lines.push(format!(
                "aobscanmodule({name},{module},{})",
                sig.pattern.replace(' ', "")
            ));
            lines.push(format!("registersymbol({name})"));
            lines.push(String::new());
        }

        lines.push("[DISABLE]".to_string());
        lines.push(String::new());
        for target in signatures.keys() {
            let name = sanitize_name(target);
            lines.push(format!("unregistersymbol({name})"));
        }

        Ok(lines.join("\n"))
    }
}
