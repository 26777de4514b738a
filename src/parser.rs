//! Multi-format disassembly listing parser.
//!
//! Accepts three input shapes:
//! 1. x64dbg/OllyDbg dumps (pipe-separated, leading address)
//! 2. Cheat Engine dumps (dash-separated, `Module+Offset` addressing)
//! 3. Raw hex byte streams (decoded with Capstone, 32-bit mode)
//!
//! Parsing is lenient: lines that do not match the chosen format are
//! skipped, malformed byte fields are dropped and counted, and only a
//! batch with zero usable lines is an error.

use std::collections::{BTreeMap, HashSet};

use clap::ValueEnum;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::analyzer;
use crate::decoder::X86Decoder;
use crate::{Instruction, SigError, MAX_INSTRUCTION_SIZE};

/// Caller-supplied format hint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FormatHint {
    Auto,
    X64dbg,
    #[value(alias = "cheatengine")]
    CheatEngine,
    Hex,
}

/// The format a batch was actually parsed as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ListingFormat {
    X64dbg,
    CheatEngine,
    Hex,
}

impl std::fmt::Display for ListingFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ListingFormat::X64dbg => write!(f, "x64dbg"),
            ListingFormat::CheatEngine => write!(f, "cheatengine"),
            ListingFormat::Hex => write!(f, "hex"),
        }
    }
}

/// One parsed line before analysis enriches it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawInstruction {
    pub address: String,
    pub bytes: Vec<u8>,
    pub mnemonic: String,
    pub operands: String,
    pub operands_normalized: String,
    pub label: Option<String>,
}

/// Aggregate statistics for a parsed batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParseStats {
    pub total: usize,
    pub by_type: BTreeMap<String, usize>,
    pub labeled: usize,
    pub total_bytes: usize,
    /// Lines rejected for malformed or oversized byte fields.
    pub dropped: usize,
}

/// Output of a parse call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParseResult {
    pub instructions: Vec<Instruction>,
    pub labels: Vec<String>,
    pub format: ListingFormat,
    pub module: Option<String>,
    pub stats: ParseStats,
}

static X64DBG_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^\s*([0-9A-Fa-f]{1,16})\s*\|\s*([0-9A-Fa-f][0-9A-Fa-f ]*?)\s*\|\s*([^|]*?)\s*(?:\|\s*(.*?))?\s*$",
    )
    .expect("static regex")
});

static CE_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^\s*([\w.]+)\+([0-9A-Fa-f]+)\s*-\s*([0-9A-Fa-f][0-9A-Fa-f ]*?)\s*-\s*(.*?)\s*$",
    )
    .expect("static regex")
});

static HEX_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[0-9A-Fa-f](?:[0-9A-Fa-f\s])*$").expect("static regex"));

static LABEL_TOKEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("static regex"));

/// Number of leading non-empty lines sampled during format detection.
const DETECT_WINDOW: usize = 20;
/// Minimum fraction of sampled lines that must match the winning shape.
const DETECT_THRESHOLD: f64 = 0.30;

fn is_comment(line: &str) -> bool {
    line.starts_with("//") || line.starts_with('#')
}

/// Lowercase and collapse runs of whitespace.
pub fn normalize_operands(operands: &str) -> String {
    operands
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Score the first `DETECT_WINDOW` content lines against every known
/// line shape and pick the best match.
pub fn detect_format(input: &str) -> Result<ListingFormat, SigError> {
    let sample: Vec<&str> = input
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !is_comment(l))
        .take(DETECT_WINDOW)
        .collect();

    if sample.is_empty() {
        return Err(SigError::UnrecognizedFormat);
    }

    let total = sample.len() as f64;
    let score = |re: &Regex| sample.iter().filter(|l| re.is_match(l)).count() as f64 / total;

    // Scored in priority order; ties go to the more structured shape.
    let candidates = [
        (ListingFormat::X64dbg, score(&X64DBG_LINE)),
        (ListingFormat::CheatEngine, score(&CE_LINE)),
        (ListingFormat::Hex, score(&HEX_LINE)),
    ];

    let mut winner = candidates[0];
    for candidate in &candidates[1..] {
        if candidate.1 > winner.1 {
            winner = *candidate;
        }
    }
    let (format, best) = winner;

    debug!(
        x64dbg = candidates[0].1,
        cheatengine = candidates[1].1,
        hex = candidates[2].1,
        "format detection scores"
    );

    if best >= DETECT_THRESHOLD {
        Ok(format)
    } else {
        Err(SigError::UnrecognizedFormat)
    }
}

/// Normalize to eight uppercase hex digits, left-padded with zero.
fn normalize_address(addr: &str) -> String {
    let upper = addr.to_uppercase();
    if upper.len() >= 8 {
        upper
    } else {
        format!("{upper:0>8}")
    }
}

/// Parse a run of hex pairs; `None` when the field is not a clean byte
/// sequence or exceeds the x86 encoding limit.
fn parse_byte_field(field: &str) -> Option<Vec<u8>> {
    let clean: String = field.chars().filter(|c| !c.is_whitespace()).collect();
    if clean.is_empty() || clean.len() % 2 != 0 || clean.len() / 2 > MAX_INSTRUCTION_SIZE {
        return None;
    }

    let mut bytes = Vec::with_capacity(clean.len() / 2);
    for i in (0..clean.len()).step_by(2) {
        bytes.push(u8::from_str_radix(&clean[i..i + 2], 16).ok()?);
    }
    Some(bytes)
}

/// Split an instruction field into mnemonic + operand text. An empty
/// field becomes the `db` pseudo-instruction.
fn split_instruction_field(field: &str) -> (String, String) {
    let mut parts = field.split_whitespace();
    match parts.next() {
        Some(mnemonic) => (
            mnemonic.to_lowercase(),
            parts.collect::<Vec<_>>().join(" "),
        ),
        None => ("db".to_string(), String::new()),
    }
}

struct FormatOutput {
    raws: Vec<RawInstruction>,
    labels: Vec<String>,
    module: Option<String>,
    dropped: usize,
}

fn parse_x64dbg(input: &str) -> FormatOutput {
    let mut raws = Vec::new();
    let mut labels: Vec<String> = Vec::new();
    let mut seen = HashSet::new();
    let mut dropped = 0usize;

    for line in input.lines().map(str::trim) {
        if line.is_empty() || is_comment(line) {
            continue;
        }
        let Some(caps) = X64DBG_LINE.captures(line) else {
            continue;
        };

        let Some(bytes) = parse_byte_field(&caps[2]) else {
            dropped += 1;
            continue;
        };

        let address = normalize_address(&caps[1]);
        if !seen.insert(address.clone()) {
            dropped += 1;
            continue;
        }

        let (mnemonic, operands) = split_instruction_field(&caps[3]);

        let label = caps.get(4).map(|m| m.as_str().trim()).and_then(|tail| {
            if !tail.is_empty() && LABEL_TOKEN.is_match(tail) {
                Some(tail.to_string())
            } else {
                None
            }
        });
        if let Some(ref l) = label {
            if !labels.contains(l) {
                labels.push(l.clone());
            }
        }

        let operands_normalized = normalize_operands(&operands);
        raws.push(RawInstruction {
            address,
            bytes,
            mnemonic,
            operands,
            operands_normalized,
            label,
        });
    }

    FormatOutput {
        raws,
        labels,
        module: None,
        dropped,
    }
}

/// Rewrite `[Module+HEX]` memory references to `ds:[HEX]`.
fn normalize_module_refs(operands: &str, module: &str) -> String {
    let pattern = format!(r"(?i)\[{}\+([0-9A-Fa-f]+)\]", regex::escape(module));
    match Regex::new(&pattern) {
        Ok(re) => re.replace_all(operands, "ds:[$1]").into_owned(),
        Err(_) => operands.to_string(),
    }
}

fn parse_cheat_engine(input: &str) -> FormatOutput {
    let mut raws = Vec::new();
    let mut seen = HashSet::new();
    let mut module: Option<String> = None;
    let mut dropped = 0usize;

    for line in input.lines().map(str::trim) {
        if line.is_empty() || is_comment(line) {
            continue;
        }
        let Some(caps) = CE_LINE.captures(line) else {
            continue;
        };

        let Some(bytes) = parse_byte_field(&caps[3]) else {
            dropped += 1;
            continue;
        };

        if module.is_none() {
            module = Some(caps[1].to_string());
        }

        let address = normalize_address(&caps[2]);
        if !seen.insert(address.clone()) {
            dropped += 1;
            continue;
        }

        let (mnemonic, operands) = split_instruction_field(&caps[4]);
        let rewritten = match module.as_deref() {
            Some(m) => normalize_module_refs(&operands, m),
            None => operands.clone(),
        };
        let operands_normalized = normalize_operands(&rewritten);

        raws.push(RawInstruction {
            address,
            bytes,
            mnemonic,
            operands,
            operands_normalized,
            label: None,
        });
    }

    FormatOutput {
        raws,
        labels: Vec::new(),
        module,
        dropped,
    }
}

fn parse_hex(input: &str, base: u32) -> Result<FormatOutput, SigError> {
    let clean: String = input.chars().filter(|c| !c.is_whitespace()).collect();
    if clean.is_empty()
        || clean.len() % 2 != 0
        || !clean.chars().all(|c| c.is_ascii_hexdigit())
    {
        return Err(SigError::NoInstructions);
    }

    let mut code = Vec::with_capacity(clean.len() / 2);
    for i in (0..clean.len()).step_by(2) {
        // Every character was checked above.
        code.push(u8::from_str_radix(&clean[i..i + 2], 16).unwrap_or(0));
    }

    let decoder = X86Decoder::new()?;
    let raws = decoder
        .sweep(&code, base)
        .into_iter()
        .map(|insn| {
            let operands_normalized = normalize_operands(&insn.operands);
            RawInstruction {
                address: format!("{:08X}", insn.address),
                bytes: insn.bytes,
                mnemonic: insn.mnemonic,
                operands: insn.operands,
                operands_normalized,
                label: None,
            }
        })
        .collect();

    Ok(FormatOutput {
        raws,
        labels: Vec::new(),
        module: None,
        dropped: 0,
    })
}

/// Parse a listing, auto-detecting the format when asked to.
pub fn parse(input: &str, hint: FormatHint) -> Result<ParseResult, SigError> {
    parse_with_base(input, hint, 0)
}

/// Like [`parse`], with an explicit base address for raw hex input.
pub fn parse_with_base(
    input: &str,
    hint: FormatHint,
    base: u32,
) -> Result<ParseResult, SigError> {
    let format = match hint {
        FormatHint::Auto => detect_format(input)?,
        FormatHint::X64dbg => ListingFormat::X64dbg,
        FormatHint::CheatEngine => ListingFormat::CheatEngine,
        FormatHint::Hex => ListingFormat::Hex,
    };

    let output = match format {
        ListingFormat::X64dbg => parse_x64dbg(input),
        ListingFormat::CheatEngine => parse_cheat_engine(input),
        ListingFormat::Hex => parse_hex(input, base)?,
    };

    if output.raws.is_empty() {
        return Err(SigError::NoInstructions);
    }

    let instructions: Vec<Instruction> =
        output.raws.into_iter().map(analyzer::analyze).collect();

    let mut by_type = BTreeMap::new();
    let mut total_bytes = 0usize;
    for inst in &instructions {
        *by_type.entry(inst.kind.as_str().to_string()).or_insert(0) += 1;
        total_bytes += inst.size;
    }

    let stats = ParseStats {
        total: instructions.len(),
        by_type,
        labeled: output.labels.len(),
        total_bytes,
        dropped: output.dropped,
    };

    info!(
        format = %format,
        instructions = stats.total,
        dropped = stats.dropped,
        "parsed listing"
    );

    Ok(ParseResult {
        instructions,
        labels: output.labels,
        format,
        module: output.module,
        stats,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::InstructionType;

    #[test]
    fn test_detect_x64dbg() {
        let input = "00B27AB0 | 0F84 79050000 | je game.B2802F | Lawnmower_A";
        assert_eq!(detect_format(input).unwrap(), ListingFormat::X64dbg);
    }

    #[test]
    fn test_detect_cheat_engine() {
        let input = "Apr24.2020.exe+46751D - 0F84 85020000 - je Apr24.2020.exe+4677A8";
        assert_eq!(detect_format(input).unwrap(), ListingFormat::CheatEngine);
    }

    #[test]
    fn test_detect_hex() {
        let input = "0F 84 79 05 00 00 8B 8D 2C FE FF FF";
        assert_eq!(detect_format(input).unwrap(), ListingFormat::Hex);
    }

    #[test]
    fn test_detect_rejects_prose() {
        assert!(matches!(
            detect_format("this is not a listing\nnot at all"),
            Err(SigError::UnrecognizedFormat)
        ));
    }

    #[test]
    fn test_parse_x64dbg_line() {
        let input = "00B27AB0 | 0F84 79050000 | je apr24.2020.B2802F | Lawnmower_A";
        let result = parse(input, FormatHint::Auto).unwrap();

        assert_eq!(result.format, ListingFormat::X64dbg);
        assert_eq!(result.instructions.len(), 1);

        let inst = &result.instructions[0];
        assert_eq!(inst.address, "00B27AB0");
        assert_eq!(inst.bytes, vec![0x0F, 0x84, 0x79, 0x05, 0x00, 0x00]);
        assert_eq!(inst.mnemonic, "je");
        assert_eq!(inst.kind, InstructionType::ConditionalJump);
        assert_eq!(inst.label.as_deref(), Some("Lawnmower_A"));
        for pos in [2usize, 3, 4, 5] {
            assert!(inst.wildcard_positions.contains(&pos));
        }
        assert_eq!(result.labels, vec!["Lawnmower_A".to_string()]);
    }

    #[test]
    fn test_parse_cheat_engine_line() {
        let input = "Apr24.2020.exe+46751D - 0F84 85020000 - je Apr24.2020.exe+4677A8";
        let result = parse(input, FormatHint::Auto).unwrap();

        assert_eq!(result.format, ListingFormat::CheatEngine);
        assert_eq!(result.module.as_deref(), Some("Apr24.2020.exe"));

        let inst = &result.instructions[0];
        assert_eq!(inst.address, "0046751D");
        assert_eq!(inst.kind, InstructionType::ConditionalJump);
    }

    #[test]
    fn test_module_ref_normalization() {
        let input = "Apr24.2020.exe+46751D - 8B 0D 40EF5700 - mov ecx,[Apr24.2020.exe+57EF40]";
        let result = parse(input, FormatHint::Auto).unwrap();

        let inst = &result.instructions[0];
        assert!(inst.operands_normalized.contains("ds:[57ef40]"));
    }

    #[test]
    fn test_parse_hex_stream() {
        let input = "0F 84 79 05 00 00 8B 8D 2C FE FF FF";
        let result = parse(input, FormatHint::Auto).unwrap();

        assert_eq!(result.format, ListingFormat::Hex);
        assert_eq!(result.instructions.len(), 2);
        assert_eq!(result.instructions[0].address, "00000000");
        assert_eq!(result.instructions[0].mnemonic, "je");
        assert_eq!(result.instructions[1].address, "00000006");
        assert_eq!(result.instructions[1].mnemonic, "mov");
    }

    #[test]
    fn test_parse_hex_with_base() {
        let input = "90 C3";
        let result = parse_with_base(input, FormatHint::Hex, 0x0040_1000).unwrap();
        assert_eq!(result.instructions[0].address, "00401000");
        assert_eq!(result.instructions[1].address, "00401001");
    }

    #[test]
    fn test_address_padding() {
        let input = "1000 | 90 | nop";
        let result = parse(input, FormatHint::X64dbg).unwrap();
        assert_eq!(result.instructions[0].address, "00001000");
    }

    #[test]
    fn test_oversized_byte_field_dropped() {
        let input = "\
00401000 | 90 | nop
00401001 | 0F84790500000F84790500000F84790500001122 | je 0x1000";
        let result = parse(input, FormatHint::X64dbg).unwrap();

        assert_eq!(result.instructions.len(), 1);
        assert_eq!(result.stats.dropped, 1);
    }

    #[test]
    fn test_duplicate_address_dropped() {
        let input = "\
00401000 | 90 | nop
00401000 | C3 | ret";
        let result = parse(input, FormatHint::X64dbg).unwrap();

        assert_eq!(result.instructions.len(), 1);
        assert_eq!(result.stats.dropped, 1);
        assert_eq!(result.instructions[0].mnemonic, "nop");
    }

    #[test]
    fn test_bytes_without_mnemonic_become_db() {
        let input = "00401000 | CC |";
        let result = parse(input, FormatHint::X64dbg).unwrap();

        let inst = &result.instructions[0];
        assert_eq!(inst.mnemonic, "db");
        assert_eq!(inst.kind, InstructionType::Other);
        assert!(inst.wildcard_positions.is_empty());
    }

    #[test]
    fn test_comments_and_blanks_skipped() {
        let input = "\
// header comment
# another comment

00401000 | 55 | push ebp
00401001 | 8BEC | mov ebp,esp";
        let result = parse(input, FormatHint::Auto).unwrap();
        assert_eq!(result.instructions.len(), 2);
        assert_eq!(result.stats.total_bytes, 3);
    }

    #[test]
    fn test_no_usable_lines_is_error() {
        assert!(matches!(
            parse("zz not hex at all", FormatHint::Hex),
            Err(SigError::NoInstructions)
        ));
    }

    #[test]
    fn test_round_trip_bytes() {
        let input = "\
00401000 | 55 | push ebp
00401001 | 8BEC | mov ebp,esp
00401003 | 8B8D 2CFEFFFF | mov ecx,[ebp-1D4]";
        let result = parse(input, FormatHint::Auto).unwrap();

        let expected = ["55", "8BEC", "8B8D2CFEFFFF"];
        for (inst, field) in result.instructions.iter().zip(expected) {
            assert_eq!(inst.hex_bytes().replace(' ', ""), *field);
        }
    }

    #[test]
    fn test_stats_by_type() {
        let input = "\
00401000 | 55 | push ebp
00401001 | 8BEC | mov ebp,esp
00401003 | C3 | ret";
        let result = parse(input, FormatHint::Auto).unwrap();

        assert_eq!(result.stats.by_type.get("stack"), Some(&1));
        assert_eq!(result.stats.by_type.get("mov"), Some(&1));
        assert_eq!(result.stats.by_type.get("return"), Some(&1));
    }
}
