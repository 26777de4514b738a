//! Signature generation: window construction, wildcard realization,
//! scoring, and similarity deduplication.
//!
//! For every resolved target the generator runs all nine strategies
//! across a set of context variations, then ranks and deduplicates the
//! resulting variants. Generation is fail-soft per target; only
//! inconsistent options are a hard error.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::analyzer::{self, WildcardClasses};
use crate::strategy::{Strategy, WildcardRules};
use crate::{ByteCategory, Instruction, InstructionType, SigError, VolatilityLevel};

/// Options for signature generation. All fields have defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SignatureOptions {
    /// Minimum signature length in bytes.
    pub min_length: usize,
    /// Maximum signature length in bytes.
    pub max_length: usize,
    /// Hard cap on variants per target, applied after deduplication.
    pub variants: usize,
    /// Instructions included before the anchor.
    pub context_before: usize,
    /// Instructions included after the anchor.
    pub context_after: usize,
    pub wildcard_rules: WildcardRules,
}

impl Default for SignatureOptions {
    fn default() -> Self {
        SignatureOptions {
            min_length: 20,
            max_length: 50,
            variants: 10,
            context_before: 0,
            context_after: 10,
            wildcard_rules: WildcardRules::default(),
        }
    }
}

impl SignatureOptions {
    pub fn validate(&self) -> Result<(), SigError> {
        if self.min_length > self.max_length {
            return Err(SigError::InvalidOptions {
                min: self.min_length,
                max: self.max_length,
            });
        }
        Ok(())
    }
}

/// How resilient a signature is expected to be across rebuilds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stability {
    High,
    Medium,
    Low,
}

impl Stability {
    /// Rank for sorting; higher is better.
    pub fn rank(&self) -> u8 {
        match self {
            Stability::High => 2,
            Stability::Medium => 1,
            Stability::Low => 0,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Stability::High => "high",
            Stability::Medium => "medium",
            Stability::Low => "low",
        }
    }
}

impl fmt::Display for Stability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a byte position became a wildcard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WildcardClass {
    RelativeJump,
    RelativeCall,
    StackOffset,
    GlobalAddress,
    Immediate,
    StructOffset,
    MemoryDisplacement,
}

impl WildcardClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            WildcardClass::RelativeJump => "relative_jump",
            WildcardClass::RelativeCall => "relative_call",
            WildcardClass::StackOffset => "stack_offset",
            WildcardClass::GlobalAddress => "global_address",
            WildcardClass::Immediate => "immediate",
            WildcardClass::StructOffset => "struct_offset",
            WildcardClass::MemoryDisplacement => "memory_displacement",
        }
    }

    fn describe(&self) -> &'static str {
        match self {
            WildcardClass::RelativeJump => "relative jump offset",
            WildcardClass::RelativeCall => "relative call offset",
            WildcardClass::StackOffset => "stack frame offset",
            WildcardClass::GlobalAddress => "global absolute address",
            WildcardClass::Immediate => "immediate value",
            WildcardClass::StructOffset => "structure offset",
            WildcardClass::MemoryDisplacement => "memory displacement",
        }
    }
}

/// Per-wildcard explanation attached to a signature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WildcardReason {
    /// Byte position within the signature.
    pub position: usize,
    pub reason: WildcardClass,
    pub detail: String,
    pub instruction_address: String,
}

/// One generated signature variant. Immutable after construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signature {
    /// Space-separated tokens: uppercase hex pairs or `??`.
    pub pattern: String,
    /// `x` for concrete bytes, `?` for wildcards.
    pub mask: String,
    /// Byte values, `None` at wildcard positions.
    pub bytes: Vec<Option<u8>>,
    pub length: usize,
    pub wildcard_count: usize,
    pub wildcard_positions: Vec<usize>,
    pub wildcard_reasons: Vec<WildcardReason>,
    /// In `[0, 1]`; higher is more selective.
    pub uniqueness_score: f64,
    pub stability: Stability,
    /// Strategy tag, e.g. `conservative`.
    pub strategy: String,
    pub description: String,
    pub start_address: String,
    pub end_address: String,
    pub warnings: Vec<String>,
}

/// What to generate signatures for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetSelection {
    /// Labels, addresses, `jump@<addr>` / `call@<addr>` forms, or
    /// decimal instruction indices.
    Explicit(Vec<String>),
    All,
    AllLabeled,
    AllJumps,
    AllCalls,
}

impl TargetSelection {
    /// Parse the special tokens; anything else is a single explicit id.
    pub fn from_token(token: &str) -> Self {
        match token {
            "all" => TargetSelection::All,
            "all_labeled" => TargetSelection::AllLabeled,
            "all_jumps" => TargetSelection::AllJumps,
            "all_calls" => TargetSelection::AllCalls,
            other => TargetSelection::Explicit(vec![other.to_string()]),
        }
    }
}

/// Result of a generate call, keyed by target identifier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateResult {
    pub signatures: BTreeMap<String, Vec<Signature>>,
    /// Explicit identifiers that did not resolve.
    pub unresolved: Vec<String>,
    pub targets_processed: usize,
    pub total_variants: usize,
}

impl GenerateResult {
    /// True when some requested targets were skipped.
    pub fn is_partial(&self) -> bool {
        !self.unresolved.is_empty()
    }
}

// Similarity dedup parameters. The threshold is tuned against real
// listings; see DESIGN.md.
const SIMILARITY_THRESHOLD: f64 = 0.75;
const UNIQUENESS_MARGIN: f64 = 0.10;

/// Context variations tried for every strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ContextVariation {
    /// Fixed instruction counts around the anchor.
    Window { before: usize, after: usize },
    /// Extend forward until the next `ret` (inclusive).
    ToRet { before: usize },
    /// Re-anchor on the most stable instruction within ±3 positions.
    AnchorShift,
}

impl ContextVariation {
    fn label(&self) -> String {
        match self {
            ContextVariation::Window { before, after } => format!("context {before}/{after}"),
            ContextVariation::ToRet { before } => format!("context {before}/ret"),
            ContextVariation::AnchorShift => "anchor shift".to_string(),
        }
    }
}

fn context_variations(options: &SignatureOptions) -> Vec<ContextVariation> {
    let mut pairs = vec![(options.context_before, options.context_after)];
    for pair in [
        (0, 4),
        (0, 6),
        (0, 8),
        (0, 10),
        (1, 4),
        (1, 8),
        (2, 6),
        (2, 10),
    ] {
        if !pairs.contains(&pair) {
            pairs.push(pair);
        }
    }
    pairs.truncate(9);

    let mut variations: Vec<ContextVariation> = pairs
        .into_iter()
        .map(|(before, after)| ContextVariation::Window { before, after })
        .collect();
    variations.push(ContextVariation::ToRet {
        before: options.context_before,
    });
    variations.push(ContextVariation::AnchorShift);
    variations
}

/// One byte of a signature window, with its provenance.
#[derive(Debug, Clone, Copy)]
struct WindowByte {
    value: u8,
    pos_in_inst: usize,
    inst_idx: usize,
}

/// Collect a window of bytes around the anchor.
///
/// Stops at `max_length` bytes or `after` post-anchor instructions,
/// whichever comes first. Too-short windows are extended forward past
/// the context limit, then backward; if the stream itself is shorter
/// than `min_length`, the best-effort window carries a warning.
fn build_window(
    instructions: &[Instruction],
    anchor: usize,
    before: usize,
    after: usize,
    options: &SignatureOptions,
) -> (Vec<WindowByte>, Vec<String>) {
    let mut start = anchor.saturating_sub(before);
    let mut window: Vec<WindowByte> = Vec::new();
    let mut idx = start;
    let mut consumed_after = 0usize;

    while idx < instructions.len() && window.len() < options.max_length {
        if idx > anchor && consumed_after >= after {
            break;
        }
        for (pos, value) in instructions[idx].bytes.iter().enumerate() {
            if window.len() >= options.max_length {
                break;
            }
            window.push(WindowByte {
                value: *value,
                pos_in_inst: pos,
                inst_idx: idx,
            });
        }
        if idx > anchor {
            consumed_after += 1;
        }
        idx += 1;
    }

    // Extend forward past the context limit if the window is short.
    while idx < instructions.len() && window.len() < options.min_length {
        for (pos, value) in instructions[idx].bytes.iter().enumerate() {
            if window.len() >= options.max_length {
                break;
            }
            window.push(WindowByte {
                value: *value,
                pos_in_inst: pos,
                inst_idx: idx,
            });
        }
        idx += 1;
    }

    // Then backward, pulling in earlier instructions.
    while start > 0 && window.len() < options.min_length {
        start -= 1;
        let mut prefix: Vec<WindowByte> = instructions[start]
            .bytes
            .iter()
            .enumerate()
            .map(|(pos, value)| WindowByte {
                value: *value,
                pos_in_inst: pos,
                inst_idx: start,
            })
            .collect();
        prefix.extend(window);
        window = prefix;
        window.truncate(options.max_length);
    }

    let mut warnings = Vec::new();
    if window.len() < options.min_length {
        warnings.push(format!(
            "window is {} bytes, below the requested minimum of {}",
            window.len(),
            options.min_length
        ));
    }

    (window, warnings)
}

/// Instructions from the anchor to the next return, inclusive.
fn instructions_to_ret(instructions: &[Instruction], anchor: usize) -> usize {
    instructions
        .iter()
        .skip(anchor + 1)
        .position(|inst| inst.kind == InstructionType::Return)
        .map(|offset| offset + 1)
        .unwrap_or_else(|| instructions.len().saturating_sub(anchor + 1))
}

/// The most stable instruction within ±3 positions of the anchor.
fn shifted_anchor(
    instructions: &[Instruction],
    classes: &[WildcardClasses],
    anchor: usize,
) -> usize {
    let lo = anchor.saturating_sub(3);
    let hi = (anchor + 3).min(instructions.len().saturating_sub(1));

    (lo..=hi)
        .min_by_key(|&idx| {
            let inst = &instructions[idx];
            (
                inst.volatility.operand,
                classes[idx].all().len(),
                idx.abs_diff(anchor),
                idx,
            )
        })
        .unwrap_or(anchor)
}

fn decide_wildcard(
    inst: &Instruction,
    classes: &WildcardClasses,
    pos: usize,
    rules: &WildcardRules,
    strategy: Strategy,
) -> Option<WildcardClass> {
    if classes.relative.contains(&pos) {
        if inst.kind.is_jump() && rules.relative_jumps {
            return Some(WildcardClass::RelativeJump);
        }
        if inst.kind == InstructionType::Call && rules.relative_calls {
            return Some(WildcardClass::RelativeCall);
        }
        return None;
    }
    if rules.stack_offsets && classes.stack.contains(&pos) {
        return Some(WildcardClass::StackOffset);
    }
    if rules.global_addresses && classes.global.contains(&pos) {
        return Some(WildcardClass::GlobalAddress);
    }
    if rules.immediates && classes.immediate.contains(&pos) {
        return Some(WildcardClass::Immediate);
    }
    if rules.struct_offsets && classes.struct_offset.contains(&pos) {
        return Some(WildcardClass::StructOffset);
    }
    if rules.memory_displacements && classes.memory.contains(&pos) {
        return Some(WildcardClass::MemoryDisplacement);
    }
    // Max-stability additionally wildcards structurally inferred
    // immediates the analyzer could not confirm from the operand text.
    if strategy == Strategy::MaxStability
        && inst.byte_categories.get(pos) == Some(&ByteCategory::Immediate)
    {
        return Some(WildcardClass::Immediate);
    }
    None
}

fn longest_wildcard_run(bytes: &[Option<u8>]) -> usize {
    let mut longest = 0usize;
    let mut current = 0usize;
    for byte in bytes {
        if byte.is_none() {
            current += 1;
            longest = longest.max(current);
        } else {
            current = 0;
        }
    }
    longest
}

/// `concrete/total * length_bonus * consecutive_penalty`, clamped.
fn uniqueness_score(bytes: &[Option<u8>]) -> f64 {
    let total = bytes.len();
    if total == 0 {
        return 0.0;
    }
    let wild = bytes.iter().filter(|b| b.is_none()).count();
    let concrete = (total - wild) as f64;

    let length_bonus = (0.8 + total as f64 / 100.0).min(1.2);
    let penalty = 0.9_f64.powf(longest_wildcard_run(bytes) as f64 / 4.0);

    (concrete / total as f64 * length_bonus * penalty).clamp(0.0, 1.0)
}

fn rate_stability(
    window: &[WindowByte],
    bytes: &[Option<u8>],
    instructions: &[Instruction],
    classes: &[WildcardClasses],
) -> Stability {
    let total = bytes.len();
    if total == 0 {
        return Stability::Low;
    }
    let wild = bytes.iter().filter(|b| b.is_none()).count();
    let ratio = wild as f64 / total as f64;

    // Every byte of a high-volatility operand (relative targets and
    // absolute addresses) must be wildcarded for a high rating.
    let all_hot_covered = window.iter().zip(bytes).all(|(wb, out)| {
        let inst = &instructions[wb.inst_idx];
        let cls = &classes[wb.inst_idx];
        let hot = inst.volatility.operand == VolatilityLevel::High
            && (cls.relative.contains(&wb.pos_in_inst) || cls.global.contains(&wb.pos_in_inst));
        !hot || out.is_none()
    });

    if ratio >= 0.25 && all_hot_covered {
        Stability::High
    } else if ratio < 0.08 {
        Stability::Low
    } else {
        Stability::Medium
    }
}

fn realize_variant(
    instructions: &[Instruction],
    classes: &[WildcardClasses],
    window: &[WindowByte],
    strategy: Strategy,
    options: &SignatureOptions,
    variation_label: &str,
    warnings: Vec<String>,
) -> Option<Signature> {
    if window.is_empty() {
        return None;
    }

    let rules = strategy.rules(&options.wildcard_rules);
    let mut bytes: Vec<Option<u8>> = Vec::with_capacity(window.len());
    let mut wildcard_positions = Vec::new();
    let mut wildcard_reasons = Vec::new();

    for (i, wb) in window.iter().enumerate() {
        let inst = &instructions[wb.inst_idx];
        match decide_wildcard(inst, &classes[wb.inst_idx], wb.pos_in_inst, &rules, strategy) {
            Some(class) => {
                bytes.push(None);
                wildcard_positions.push(i);
                wildcard_reasons.push(WildcardReason {
                    position: i,
                    reason: class,
                    detail: format!(
                        "{} in {} at {}",
                        class.describe(),
                        inst.mnemonic,
                        inst.address
                    ),
                    instruction_address: inst.address.clone(),
                });
            }
            None => bytes.push(Some(wb.value)),
        }
    }

    let pattern = bytes
        .iter()
        .map(|b| match b {
            Some(v) => format!("{v:02X}"),
            None => "??".to_string(),
        })
        .collect::<Vec<_>>()
        .join(" ");
    let mask: String = bytes
        .iter()
        .map(|b| if b.is_none() { '?' } else { 'x' })
        .collect();

    let wildcard_count = wildcard_positions.len();
    let length = bytes.len();
    let score = uniqueness_score(&bytes);
    let stability = rate_stability(window, &bytes, instructions, classes);

    let start_address = instructions[window[0].inst_idx].address.clone();
    let end_address = instructions[window[window.len() - 1].inst_idx].address.clone();

    Some(Signature {
        pattern,
        mask,
        bytes,
        length,
        wildcard_count,
        wildcard_positions,
        wildcard_reasons,
        uniqueness_score: score,
        stability,
        strategy: strategy.tag().to_string(),
        description: format!(
            "{strategy} ({variation_label}) - {wildcard_count}/{length} bytes wildcarded"
        ),
        start_address,
        end_address,
        warnings,
    })
}

fn mask_similarity(a: &str, b: &str) -> f64 {
    let max_len = a.len().max(b.len());
    if max_len == 0 {
        return 1.0;
    }
    let a = a.as_bytes();
    let b = b.as_bytes();
    let matches = (0..max_len)
        .filter(|&i| {
            a.get(i).copied().unwrap_or(b'?') == b.get(i).copied().unwrap_or(b'?')
        })
        .count();
    matches as f64 / max_len as f64
}

/// Rank, deduplicate by mask similarity, and cap.
fn dedup_and_rank(mut variants: Vec<Signature>, cap: usize) -> Vec<Signature> {
    // Stable sort: full ties keep generation order, which is fixed by
    // the strategy and variation tables.
    variants.sort_by(|a, b| {
        b.uniqueness_score
            .total_cmp(&a.uniqueness_score)
            .then(b.stability.rank().cmp(&a.stability.rank()))
            .then(b.length.cmp(&a.length))
    });

    let mut retained: Vec<Signature> = Vec::new();
    for candidate in variants {
        let redundant = retained.iter().any(|kept| {
            mask_similarity(&kept.mask, &candidate.mask) > SIMILARITY_THRESHOLD
                && candidate.uniqueness_score < kept.uniqueness_score + UNIQUENESS_MARGIN
        });
        if !redundant {
            retained.push(candidate);
        }
        if retained.len() >= cap {
            break;
        }
    }
    retained
}

/// Generate ranked variants for one anchor instruction.
pub(crate) fn generate_for_anchor(
    instructions: &[Instruction],
    classes: &[WildcardClasses],
    anchor: usize,
    options: &SignatureOptions,
) -> Vec<Signature> {
    if anchor >= instructions.len() {
        return Vec::new();
    }

    let variations = context_variations(options);
    let mut variants = Vec::new();

    for strategy in Strategy::all() {
        for variation in &variations {
            let (effective_anchor, before, after) = match variation {
                ContextVariation::Window { before, after } => (anchor, *before, *after),
                ContextVariation::ToRet { before } => {
                    (anchor, *before, instructions_to_ret(instructions, anchor))
                }
                ContextVariation::AnchorShift => (
                    shifted_anchor(instructions, classes, anchor),
                    options.context_before,
                    options.context_after,
                ),
            };

            let (window, warnings) =
                build_window(instructions, effective_anchor, before, after, options);
            if let Some(sig) = realize_variant(
                instructions,
                classes,
                &window,
                *strategy,
                options,
                &variation.label(),
                warnings,
            ) {
                variants.push(sig);
            }
        }
    }

    debug!(
        anchor,
        candidates = variants.len(),
        "generated raw variants before dedup"
    );

    dedup_and_rank(variants, options.variants)
}

fn resolve_explicit(
    instructions: &[Instruction],
    id: &str,
) -> Option<(usize, String)> {
    if let Some(addr) = id.strip_prefix("jump@").or_else(|| id.strip_prefix("call@")) {
        let addr = addr.to_uppercase();
        return instructions
            .iter()
            .position(|inst| inst.address == addr)
            .map(|idx| (idx, id.to_string()));
    }

    if id.chars().all(|c| c.is_ascii_digit()) && !id.is_empty() {
        if let Ok(idx) = id.parse::<usize>() {
            if idx < instructions.len() {
                let inst = &instructions[idx];
                let name = inst
                    .label
                    .clone()
                    .unwrap_or_else(|| format!("inst_{}", inst.address));
                return Some((idx, name));
            }
        }
    }

    let upper = id.to_uppercase();
    instructions
        .iter()
        .position(|inst| inst.label.as_deref() == Some(id) || inst.address == upper)
        .map(|idx| {
            let inst = &instructions[idx];
            let name = inst.label.clone().unwrap_or_else(|| inst.address.clone());
            (idx, name)
        })
}

/// Resolve a target selection to `(index, name)` pairs plus the list of
/// identifiers that did not resolve.
pub fn find_targets(
    instructions: &[Instruction],
    selection: &TargetSelection,
) -> (Vec<(usize, String)>, Vec<String>) {
    let mut targets = Vec::new();
    let mut unresolved = Vec::new();

    match selection {
        TargetSelection::Explicit(ids) => {
            for id in ids {
                match resolve_explicit(instructions, id) {
                    Some(target) => targets.push(target),
                    None => unresolved.push(id.clone()),
                }
            }
        }
        TargetSelection::All => {
            for (i, inst) in instructions.iter().enumerate() {
                let name = inst
                    .label
                    .clone()
                    .unwrap_or_else(|| format!("inst_{}", inst.address));
                targets.push((i, name));
            }
        }
        TargetSelection::AllLabeled => {
            for (i, inst) in instructions.iter().enumerate() {
                if let Some(label) = &inst.label {
                    targets.push((i, label.clone()));
                }
            }
        }
        TargetSelection::AllJumps => {
            for (i, inst) in instructions.iter().enumerate() {
                if inst.kind.is_jump() {
                    let name = inst
                        .label
                        .clone()
                        .unwrap_or_else(|| format!("jump_{}", inst.address));
                    targets.push((i, name));
                }
            }
        }
        TargetSelection::AllCalls => {
            for (i, inst) in instructions.iter().enumerate() {
                if inst.kind == InstructionType::Call {
                    let name = inst
                        .label
                        .clone()
                        .unwrap_or_else(|| format!("call_{}", inst.address));
                    targets.push((i, name));
                }
            }
        }
    }

    (targets, unresolved)
}

/// Generate signatures for a pre-resolved list of anchors.
pub(crate) fn generate_for_targets(
    instructions: &[Instruction],
    targets: &[(usize, String)],
    options: &SignatureOptions,
) -> BTreeMap<String, Vec<Signature>> {
    let classes: Vec<WildcardClasses> =
        instructions.iter().map(analyzer::wildcard_classes).collect();

    let mut signatures = BTreeMap::new();
    for (idx, name) in targets {
        let variants = generate_for_anchor(instructions, &classes, *idx, options);
        if !variants.is_empty() {
            signatures.insert(name.clone(), variants);
        }
    }
    signatures
}

/// Generate ranked signature variants for the selected targets.
pub fn generate(
    instructions: &[Instruction],
    selection: &TargetSelection,
    options: &SignatureOptions,
) -> Result<GenerateResult, SigError> {
    options.validate()?;

    let (targets, unresolved) = find_targets(instructions, selection);
    let signatures = generate_for_targets(instructions, &targets, options);

    let total_variants = signatures.values().map(Vec::len).sum();
    Ok(GenerateResult {
        targets_processed: signatures.len(),
        total_variants,
        signatures,
        unresolved,
    })
}

/// Generate signatures anchored on the first instruction, keyed by a
/// synthesized `auto@<first-addr>` identifier.
pub fn generate_targeted(
    instructions: &[Instruction],
    options: &SignatureOptions,
) -> Result<GenerateResult, SigError> {
    options.validate()?;

    let Some(first) = instructions.first() else {
        return Ok(GenerateResult {
            signatures: BTreeMap::new(),
            unresolved: Vec::new(),
            targets_processed: 0,
            total_variants: 0,
        });
    };

    let name = format!("auto@{}", first.address);
    let signatures = generate_for_targets(instructions, &[(0, name)], options);
    let total_variants = signatures.values().map(Vec::len).sum();

    Ok(GenerateResult {
        targets_processed: signatures.len(),
        total_variants,
        signatures,
        unresolved: Vec::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::{self, FormatHint};

    const LISTING: &str = "\
00401000 | 55 | push ebp
00401001 | 8BEC | mov ebp,esp
00401003 | 83EC 10 | sub esp,10
00401006 | 8B4D 08 | mov ecx,dword ptr [ebp+8]
00401009 | 0F84 79050000 | je 0x401588 | CheckHealth
0040100F | 8B8D 2CFEFFFF | mov ecx,dword ptr [ebp-1D4]
00401015 | E8 12345678 | call 0x78997a2c
0040101A | 85C0 | test eax,eax
0040101C | 5D | pop ebp
0040101D | C3 | ret";

    fn parsed() -> Vec<crate::Instruction> {
        parser::parse(LISTING, FormatHint::X64dbg).unwrap().instructions
    }

    #[test]
    fn test_invalid_options_rejected() {
        let options = SignatureOptions {
            min_length: 60,
            max_length: 50,
            ..SignatureOptions::default()
        };
        assert!(matches!(
            generate(&parsed(), &TargetSelection::All, &options),
            Err(SigError::InvalidOptions { .. })
        ));
    }

    #[test]
    fn test_window_respects_max_length() {
        let instructions = parsed();
        let options = SignatureOptions {
            min_length: 4,
            max_length: 8,
            ..SignatureOptions::default()
        };
        let (window, warnings) = build_window(&instructions, 0, 0, 10, &options);
        assert_eq!(window.len(), 8);
        assert!(warnings.is_empty());
    }

    #[test]
    fn test_window_extends_backward_when_stream_ends() {
        let instructions = parsed();
        let options = SignatureOptions {
            min_length: 6,
            max_length: 50,
            ..SignatureOptions::default()
        };
        // Anchor on the final ret; everything usable lies behind it.
        let (window, warnings) = build_window(&instructions, 9, 0, 10, &options);
        assert!(window.len() >= 6);
        assert!(warnings.is_empty());
    }

    #[test]
    fn test_short_stream_warns() {
        let instructions = parsed();
        let options = SignatureOptions::default();
        // The whole stream is 30 bytes; ask for more.
        let big = SignatureOptions {
            min_length: 40,
            max_length: 50,
            ..options
        };
        let (window, warnings) = build_window(&instructions, 0, 0, 20, &big);
        assert_eq!(window.len(), 30);
        assert_eq!(warnings.len(), 1);
    }

    #[test]
    fn test_uniqueness_formula() {
        // 2 concrete of 6, one run of 4 wildcards.
        let bytes = vec![Some(0x0F), Some(0x84), None, None, None, None];
        let expected = (2.0 / 6.0) * 0.86 * 0.9_f64.powf(1.0);
        assert!((uniqueness_score(&bytes) - expected).abs() < 1e-9);
    }

    #[test]
    fn test_uniqueness_no_wildcards() {
        let bytes = vec![Some(1), Some(2), Some(3), Some(4)];
        let expected = 1.0 * 0.84;
        assert!((uniqueness_score(&bytes) - expected).abs() < 1e-9);
    }

    #[test]
    fn test_mask_similarity() {
        assert!((mask_similarity("xx????", "xx????") - 1.0).abs() < 1e-9);
        assert!((mask_similarity("xxxxxx", "xx????") - 2.0 / 6.0).abs() < 1e-9);
        // Shorter mask padded with '?'.
        assert!((mask_similarity("xx??", "xx????") - 4.0 / 6.0).abs() < 1e-9);
    }

    #[test]
    fn test_generate_ranking_is_monotonic() {
        let result = generate(
            &parsed(),
            &TargetSelection::AllLabeled,
            &SignatureOptions::default(),
        )
        .unwrap();

        for variants in result.signatures.values() {
            for pair in variants.windows(2) {
                assert!(pair[0].uniqueness_score >= pair[1].uniqueness_score);
            }
        }
    }

    #[test]
    fn test_variant_cap_and_distinct_masks() {
        let options = SignatureOptions {
            variants: 3,
            ..SignatureOptions::default()
        };
        let result = generate(&parsed(), &TargetSelection::AllLabeled, &options).unwrap();

        for variants in result.signatures.values() {
            assert!(variants.len() <= 3);
            for i in 0..variants.len() {
                for j in i + 1..variants.len() {
                    assert_ne!(variants[i].mask, variants[j].mask);
                }
            }
        }
    }

    #[test]
    fn test_dedup_discipline() {
        let result = generate(
            &parsed(),
            &TargetSelection::All,
            &SignatureOptions::default(),
        )
        .unwrap();

        for variants in result.signatures.values() {
            for i in 0..variants.len() {
                for j in i + 1..variants.len() {
                    let sim = mask_similarity(&variants[i].mask, &variants[j].mask);
                    let diff =
                        (variants[i].uniqueness_score - variants[j].uniqueness_score).abs();
                    assert!(
                        sim <= SIMILARITY_THRESHOLD + 1e-9 || diff >= UNIQUENESS_MARGIN - 1e-9,
                        "similar retained pair without score separation"
                    );
                }
            }
        }
    }

    #[test]
    fn test_pattern_mask_bytes_consistency() {
        let result = generate(
            &parsed(),
            &TargetSelection::All,
            &SignatureOptions::default(),
        )
        .unwrap();

        for variants in result.signatures.values() {
            for sig in variants {
                let tokens: Vec<&str> = sig.pattern.split(' ').collect();
                assert_eq!(tokens.len(), sig.mask.len());
                assert_eq!(tokens.len(), sig.bytes.len());
                assert_eq!(tokens.len(), sig.length);

                for (i, token) in tokens.iter().enumerate() {
                    let mask_char = sig.mask.as_bytes()[i] as char;
                    match sig.bytes[i] {
                        None => {
                            assert_eq!(*token, "??");
                            assert_eq!(mask_char, '?');
                        }
                        Some(v) => {
                            assert_eq!(*token, format!("{v:02X}"));
                            assert_eq!(mask_char, 'x');
                        }
                    }
                }

                assert_eq!(
                    sig.wildcard_count,
                    sig.mask.chars().filter(|c| *c == '?').count()
                );
                assert_eq!(
                    sig.wildcard_count,
                    sig.pattern.split(' ').filter(|t| *t == "??").count()
                );
            }
        }
    }

    #[test]
    fn test_candidate_subset_for_plain_strategies() {
        let instructions = parsed();
        let result = generate(
            &instructions,
            &TargetSelection::All,
            &SignatureOptions::default(),
        )
        .unwrap();

        for variants in result.signatures.values() {
            for sig in variants {
                if sig.strategy == "aggressive" || sig.strategy == "max_stability" {
                    continue;
                }
                // Every wildcard must come from an analyzer candidate
                // of the class the reason names.
                for reason in &sig.wildcard_reasons {
                    let inst = instructions
                        .iter()
                        .find(|i| i.address == reason.instruction_address)
                        .unwrap();
                    let classes = crate::analyzer::wildcard_classes(inst);
                    let class_positions = match reason.reason {
                        WildcardClass::RelativeJump | WildcardClass::RelativeCall => {
                            &classes.relative
                        }
                        WildcardClass::StackOffset => &classes.stack,
                        WildcardClass::GlobalAddress => &classes.global,
                        WildcardClass::Immediate => &classes.immediate,
                        WildcardClass::StructOffset => &classes.struct_offset,
                        WildcardClass::MemoryDisplacement => &classes.memory,
                    };
                    assert!(!class_positions.is_empty());
                    for pos in class_positions {
                        assert!(inst.wildcard_positions.contains(pos));
                    }
                }
            }
        }
    }

    #[test]
    fn test_unresolved_targets_reported() {
        let result = generate(
            &parsed(),
            &TargetSelection::Explicit(vec![
                "CheckHealth".to_string(),
                "NoSuchLabel".to_string(),
            ]),
            &SignatureOptions::default(),
        )
        .unwrap();

        assert!(result.is_partial());
        assert_eq!(result.unresolved, vec!["NoSuchLabel".to_string()]);
        assert!(result.signatures.contains_key("CheckHealth"));
    }

    #[test]
    fn test_jump_at_address_resolution() {
        let result = generate(
            &parsed(),
            &TargetSelection::Explicit(vec!["jump@00401009".to_string()]),
            &SignatureOptions::default(),
        )
        .unwrap();
        assert!(result.signatures.contains_key("jump@00401009"));
    }

    #[test]
    fn test_index_resolution() {
        let result = generate(
            &parsed(),
            &TargetSelection::Explicit(vec!["0".to_string()]),
            &SignatureOptions::default(),
        )
        .unwrap();
        assert!(result.signatures.contains_key("inst_00401000"));
    }

    #[test]
    fn test_generate_targeted_key() {
        let result = generate_targeted(&parsed(), &SignatureOptions::default()).unwrap();
        assert_eq!(result.signatures.len(), 1);
        assert!(result.signatures.contains_key("auto@00401000"));
    }

    #[test]
    fn test_determinism() {
        let instructions = parsed();
        let options = SignatureOptions::default();
        let a = generate(&instructions, &TargetSelection::All, &options).unwrap();
        let b = generate(&instructions, &TargetSelection::All, &options).unwrap();

        assert_eq!(a.signatures, b.signatures);
    }

    #[test]
    fn test_target_selection_tokens() {
        assert_eq!(TargetSelection::from_token("all"), TargetSelection::All);
        assert_eq!(
            TargetSelection::from_token("all_jumps"),
            TargetSelection::AllJumps
        );
        assert_eq!(
            TargetSelection::from_token("MyLabel"),
            TargetSelection::Explicit(vec!["MyLabel".to_string()])
        );
    }
}
