//! Smart analysis: scores every instruction as a potential signature
//! anchor, detects stable regions, and drives generation for the best
//! candidates.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::generator::{self, GenerateResult, SignatureOptions};
use crate::{ByteCategory, Instruction, InstructionType, SigError, VolatilityLevel};

const STABILITY_WEIGHT: f64 = 0.45;
const UNIQUENESS_WEIGHT: f64 = 0.35;
const CONTEXT_WEIGHT: f64 = 0.20;

/// Total score above which an instruction counts as a strong anchor.
const STRONG_ANCHOR_SCORE: f64 = 70.0;
/// Per-instruction stability floor for stable-region membership.
const REGION_STABILITY_FLOOR: f64 = 60.0;
/// Minimum run length of a stable region, in instructions.
const REGION_MIN_RUN: usize = 4;
/// Targets below this total score are not worth generating for.
const GENERATION_FLOOR: f64 = 45.0;

/// A recommended anchor from smart analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SmartTarget {
    pub instruction_index: usize,
    pub address: String,
    pub mnemonic: String,
    pub operands: String,
    /// Weighted combination of the three sub-scores, in `[0, 100]`.
    pub score: f64,
    pub stability_score: f64,
    pub uniqueness_score: f64,
    pub context_score: f64,
    pub reasons: Vec<String>,
    pub warnings: Vec<String>,
}

/// A contiguous run of stable instructions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StableRegion {
    pub start_index: usize,
    pub end_index: usize,
    pub start_address: String,
    pub end_address: String,
    pub avg_score: f64,
    pub byte_count: usize,
}

/// Result of a smart analysis pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SmartAnalysisResult {
    pub top_targets: Vec<SmartTarget>,
    pub stable_regions: Vec<StableRegion>,
    pub analysis_summary: String,
    pub total_instructions: usize,
    pub avg_stability: f64,
}

const STABLE_TYPES: &[InstructionType] = &[
    InstructionType::Mov,
    InstructionType::Compare,
    InstructionType::Logic,
    InstructionType::Arithmetic,
    InstructionType::Stack,
];

const VOLATILE_TYPES: &[InstructionType] = &[
    InstructionType::ConditionalJump,
    InstructionType::UnconditionalJump,
    InstructionType::Call,
];

/// Static commonness weights for x86 opcode bigrams, measured over
/// typical 32-bit compiler output. Higher means more common, so less
/// useful as an anchor. Pairs not listed fall back to the first-byte
/// table, then to a moderately-rare default.
const BIGRAM_COMMONNESS: &[(u8, u8, f64)] = &[
    (0x55, 0x8B, 0.95), // push ebp / mov
    (0x8B, 0xEC, 0.95), // mov ebp, esp
    (0x8B, 0x45, 0.90), // mov eax, [ebp+disp8]
    (0x8B, 0x4D, 0.85), // mov ecx, [ebp+disp8]
    (0x8B, 0x55, 0.80), // mov edx, [ebp+disp8]
    (0x8B, 0xFF, 0.75), // mov edi, edi (hot-patch pad)
    (0x89, 0x45, 0.80), // mov [ebp+disp8], eax
    (0x89, 0x4D, 0.70),
    (0x83, 0xEC, 0.90), // sub esp, imm8
    (0x83, 0xC4, 0.90), // add esp, imm8
    (0x33, 0xC0, 0.85), // xor eax, eax
    (0x85, 0xC0, 0.90), // test eax, eax
    (0x85, 0xC9, 0.75), // test ecx, ecx
    (0x85, 0xD2, 0.70), // test edx, edx
    (0x3B, 0xC6, 0.50),
    (0x5D, 0xC3, 0.90), // pop ebp / ret
    (0x8D, 0x45, 0.65), // lea eax, [ebp+disp8]
    (0x8D, 0x4D, 0.60),
    (0x0F, 0x84, 0.70), // jcc near
    (0x0F, 0x85, 0.70),
    (0x0F, 0xB6, 0.35), // movzx r32, r/m8
    (0x0F, 0xB7, 0.30),
    (0x0F, 0xBE, 0.30),
    (0x0F, 0xAF, 0.20), // imul r32, r/m32
    (0x0F, 0x57, 0.25), // xorps
    (0x0F, 0x2F, 0.20), // comiss
    (0xC7, 0x45, 0.70), // mov [ebp+disp8], imm32
    (0xC6, 0x45, 0.55),
    (0xF3, 0x0F, 0.40), // scalar SSE prefix pair
    (0xF2, 0x0F, 0.35),
    (0x66, 0x0F, 0.40),
];

const FIRST_BYTE_COMMONNESS: &[(u8, f64)] = &[
    (0x90, 0.95), // nop
    (0xC3, 0.95), // ret
    (0x50, 0.90),
    (0x51, 0.90),
    (0x52, 0.85),
    (0x53, 0.85),
    (0x55, 0.95),
    (0x56, 0.90),
    (0x57, 0.90),
    (0x58, 0.85),
    (0x59, 0.85),
    (0x5D, 0.90),
    (0x5E, 0.85),
    (0x5F, 0.85),
    (0x6A, 0.80), // push imm8
    (0x68, 0.70), // push imm32
    (0x74, 0.90), // je short
    (0x75, 0.90), // jne short
    (0xEB, 0.80), // jmp short
    (0xE8, 0.90), // call rel32
    (0xE9, 0.70), // jmp rel32
    (0xB8, 0.70), // mov eax, imm32
];

const DEFAULT_COMMONNESS: f64 = 0.35;

/// Commonness of an instruction's leading opcode bigram.
///
/// When the second byte is volatile (a displacement, immediate, or
/// relative offset) the pair carries no signal, so the first byte alone
/// is consulted.
fn bigram_commonness(inst: &Instruction, next: Option<&Instruction>) -> f64 {
    let b0 = inst.bytes[0];
    let structural_second = inst.size >= 2
        && matches!(
            inst.byte_categories[1],
            ByteCategory::Opcode | ByteCategory::ModRm | ByteCategory::Sib
        );

    let b1 = if structural_second {
        Some(inst.bytes[1])
    } else {
        next.map(|n| n.bytes[0])
    };

    if let Some(b1) = b1 {
        if let Some((_, _, c)) = BIGRAM_COMMONNESS
            .iter()
            .find(|(a, b, _)| *a == b0 && *b == b1)
        {
            return *c;
        }
    }

    FIRST_BYTE_COMMONNESS
        .iter()
        .find(|(b, _)| *b == b0)
        .map(|(_, c)| *c)
        .unwrap_or(DEFAULT_COMMONNESS)
}

/// Pull a branch-target address out of operand text, normalized to the
/// batch address format.
fn branch_target_address(operands: &str) -> Option<String> {
    let token = operands.split_whitespace().last()?;
    let token = token.rsplit('.').next().unwrap_or(token);
    let token = token.trim_start_matches("0x").trim_start_matches("0X");
    if token.len() < 4 || !token.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    Some(format!("{:0>8}", token.to_uppercase()))
}

struct Scored {
    total: f64,
    stability: f64,
    uniqueness: f64,
    context: f64,
    reasons: Vec<String>,
    warnings: Vec<String>,
}

fn score_instruction(
    idx: usize,
    instructions: &[Instruction],
    addresses: &HashSet<String>,
    mnemonic_counts: &std::collections::HashMap<String, usize>,
) -> Scored {
    let inst = &instructions[idx];
    let mut stability = 50.0f64;
    let mut uniqueness = 50.0f64;
    let mut context = 50.0f64;
    let mut reasons = Vec::new();
    let mut warnings = Vec::new();

    // --- stability ---

    if STABLE_TYPES.contains(&inst.kind) {
        stability += 20.0;
        reasons.push(format!("{} instructions are version-stable", inst.kind));
    } else if VOLATILE_TYPES.contains(&inst.kind) {
        stability -= 25.0;
        warnings.push(format!("{} has volatile offsets", inst.kind));
    } else if inst.kind == InstructionType::Return {
        stability -= 30.0;
        warnings.push("ret terminates the window and anchors poorly".to_string());
    }

    match inst.volatility.operand {
        VolatilityLevel::Low => {
            stability += 15.0;
            reasons.push("operands are stable registers or small values".to_string());
        }
        VolatilityLevel::Medium => stability -= 5.0,
        VolatilityLevel::High => {
            stability -= 20.0;
            warnings.push("operands contain volatile addresses".to_string());
        }
    }

    match inst.volatility.opcode {
        VolatilityLevel::Low => stability += 10.0,
        _ => stability -= 10.0,
    }

    if inst.size == 1 {
        stability -= 20.0;
        warnings.push("single-byte opcodes are too common to anchor on".to_string());
    }

    let wildcards = inst.wildcard_positions.len();
    if wildcards == 0 {
        stability += 15.0;
        reasons.push("no wildcards needed in this instruction".to_string());
    } else if wildcards <= 2 {
        stability += 5.0;
    } else {
        stability -= 3.0 * wildcards as f64;
        warnings.push(format!("needs {wildcards} wildcards"));
    }

    if inst.has_relative_offset() {
        if let Some(target) = branch_target_address(&inst.operands_normalized) {
            if !addresses.contains(&target) {
                stability -= 15.0;
                warnings.push("branch target lies outside this window".to_string());
            }
        }
    }

    // --- uniqueness ---

    let commonness = bigram_commonness(inst, instructions.get(idx + 1));
    uniqueness += (0.5 - commonness) * 40.0;
    if commonness <= 0.3 {
        reasons.push(format!("{} starts an uncommon opcode sequence", inst.mnemonic));
    }

    let occurrences = mnemonic_counts.get(&inst.mnemonic).copied().unwrap_or(0);
    if occurrences == 1 {
        uniqueness += 20.0;
        reasons.push("only occurrence of this mnemonic in the window".to_string());
    } else if occurrences <= 3 {
        uniqueness += 10.0;
    } else if occurrences > 10 {
        uniqueness -= 15.0;
        warnings.push(format!("common pattern ({occurrences} similar instructions)"));
    }

    if inst.size >= 6 {
        uniqueness += 15.0;
        reasons.push(format!("long encoding ({} bytes) is distinctive", inst.size));
    } else if inst.size >= 4 {
        uniqueness += 8.0;
    } else if inst.size <= 2 {
        uniqueness -= 10.0;
    }

    // --- context ---

    let good = |other: &Instruction| {
        !VOLATILE_TYPES.contains(&other.kind)
            && other.kind != InstructionType::Return
            && other.volatility.operand != VolatilityLevel::High
    };

    let before = &instructions[idx.saturating_sub(5)..idx];
    let after_end = (idx + 6).min(instructions.len());
    let after = &instructions[(idx + 1).min(after_end)..after_end];

    if before.iter().filter(|i| good(i)).count() >= 3 {
        context += 15.0;
        reasons.push("solid stable context before".to_string());
    }
    if after.iter().filter(|i| good(i)).count() >= 3 {
        context += 15.0;
        reasons.push("solid stable context after".to_string());
    }
    if before.len() < 3 {
        context -= 10.0;
        warnings.push("limited context before".to_string());
    }
    if after.len() < 3 {
        context -= 15.0;
        warnings.push("limited context after".to_string());
    }

    let density: usize = after.iter().take(5).map(|i| i.size).sum();
    if density >= 15 {
        context += 10.0;
    }

    let stability = stability.clamp(0.0, 100.0);
    let uniqueness = uniqueness.clamp(0.0, 100.0);
    let context = context.clamp(0.0, 100.0);
    let total = stability * STABILITY_WEIGHT
        + uniqueness * UNIQUENESS_WEIGHT
        + context * CONTEXT_WEIGHT;

    Scored {
        total,
        stability,
        uniqueness,
        context,
        reasons,
        warnings,
    }
}

fn find_stable_regions(instructions: &[Instruction], stability: &[f64]) -> Vec<StableRegion> {
    let mut regions = Vec::new();
    let mut run_start: Option<usize> = None;

    let close_run = |start: usize, end: usize, regions: &mut Vec<StableRegion>| {
        let len = end - start;
        if len >= REGION_MIN_RUN {
            let avg = stability[start..end].iter().sum::<f64>() / len as f64;
            regions.push(StableRegion {
                start_index: start,
                end_index: end - 1,
                start_address: instructions[start].address.clone(),
                end_address: instructions[end - 1].address.clone(),
                avg_score: avg,
                byte_count: instructions[start..end].iter().map(|i| i.size).sum(),
            });
        }
    };

    for (i, score) in stability.iter().enumerate() {
        if *score >= REGION_STABILITY_FLOOR {
            run_start.get_or_insert(i);
        } else if let Some(start) = run_start.take() {
            close_run(start, i, &mut regions);
        }
    }
    if let Some(start) = run_start {
        close_run(start, stability.len(), &mut regions);
    }

    regions
}

/// Score every instruction and return the best `max_targets` anchors,
/// stable regions, and aggregate metrics.
pub fn smart_analyze(instructions: &[Instruction], max_targets: usize) -> SmartAnalysisResult {
    if instructions.is_empty() {
        return SmartAnalysisResult {
            top_targets: Vec::new(),
            stable_regions: Vec::new(),
            analysis_summary:
                "Analyzed 0 instructions; found 0 strong anchors; average stability 0%."
                    .to_string(),
            total_instructions: 0,
            avg_stability: 0.0,
        };
    }

    let addresses: HashSet<String> =
        instructions.iter().map(|i| i.address.clone()).collect();
    let mut mnemonic_counts = std::collections::HashMap::new();
    for inst in instructions {
        *mnemonic_counts.entry(inst.mnemonic.clone()).or_insert(0) += 1;
    }

    let scored: Vec<Scored> = (0..instructions.len())
        .map(|i| score_instruction(i, instructions, &addresses, &mnemonic_counts))
        .collect();

    let stability_scores: Vec<f64> = scored.iter().map(|s| s.stability).collect();
    let avg_stability =
        stability_scores.iter().sum::<f64>() / stability_scores.len() as f64;
    let strong = scored.iter().filter(|s| s.total >= STRONG_ANCHOR_SCORE).count();

    // Rank by score; ties break toward the earliest instruction.
    let mut order: Vec<usize> = (0..instructions.len()).collect();
    order.sort_by(|&a, &b| scored[b].total.total_cmp(&scored[a].total).then(a.cmp(&b)));

    let top_targets: Vec<SmartTarget> = order
        .into_iter()
        .take(max_targets)
        .map(|i| {
            let s = &scored[i];
            let inst = &instructions[i];
            SmartTarget {
                instruction_index: i,
                address: inst.address.clone(),
                mnemonic: inst.mnemonic.clone(),
                operands: inst.operands.clone(),
                score: s.total,
                stability_score: s.stability,
                uniqueness_score: s.uniqueness,
                context_score: s.context,
                reasons: s.reasons.clone(),
                warnings: s.warnings.clone(),
            }
        })
        .collect();

    let stable_regions = find_stable_regions(instructions, &stability_scores);

    debug!(
        total = instructions.len(),
        strong,
        regions = stable_regions.len(),
        "smart analysis complete"
    );

    SmartAnalysisResult {
        analysis_summary: format!(
            "Analyzed {} instructions; found {} strong anchors; average stability {:.0}%.",
            instructions.len(),
            strong,
            avg_stability
        ),
        total_instructions: instructions.len(),
        avg_stability,
        top_targets,
        stable_regions,
    }
}

/// `smart_analyze` followed by generation for the top `top_n` anchors.
pub fn smart_generate(
    instructions: &[Instruction],
    options: &SignatureOptions,
    top_n: usize,
) -> Result<GenerateResult, SigError> {
    options.validate()?;

    let analysis = smart_analyze(instructions, top_n.max(1) * 2);

    let targets: Vec<(usize, String)> = analysis
        .top_targets
        .iter()
        .take(top_n)
        .filter(|t| t.score >= GENERATION_FLOOR)
        .map(|t| (t.instruction_index, format!("{}@{}", t.mnemonic, t.address)))
        .collect();

    let signatures = generator::generate_for_targets(instructions, &targets, options);
    let total_variants = signatures.values().map(Vec::len).sum();

    Ok(GenerateResult {
        targets_processed: signatures.len(),
        total_variants,
        signatures,
        unresolved: Vec::new(),
    })
}
