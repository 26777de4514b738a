//! Core IR, classification enums, and error type for the SigForge
//! signature generator.
//!
//! This library turns disassembly listings into ranked byte signatures
//! with wildcards (`??`) that survive rebuilds of the same program. It
//! parses several listing formats, classifies every instruction byte by
//! volatility, and synthesizes signature variants under a set of named
//! wildcarding strategies.
//!
//! # Basic Usage
//!
//! ```rust,no_run
//! use sigforge::{
//!     parser::{self, FormatHint},
//!     generator::{self, SignatureOptions, TargetSelection},
//! };
//!
//! let listing = "00B27AB0 | 0F84 79050000 | je game.B2802F | Lawnmower_A";
//!
//! // Parse the listing (format is auto-detected)
//! let parsed = parser::parse(listing, FormatHint::Auto).unwrap();
//!
//! // Generate signature variants for every labeled instruction
//! let result = generator::generate(
//!     &parsed.instructions,
//!     &TargetSelection::AllLabeled,
//!     &SignatureOptions::default(),
//! )
//! .unwrap();
//!
//! for (target, variants) in &result.signatures {
//!     println!("{target}: {}", variants[0].pattern);
//! }
//! ```

pub mod analyzer;
pub mod decoder;
pub mod format;
pub mod generator;
pub mod logging;
pub mod parser;
pub mod smart;
pub mod strategy;

use std::fmt;

use serde::{Deserialize, Serialize};

/// Maximum x86 instruction encoding length in bytes.
pub const MAX_INSTRUCTION_SIZE: usize = 15;

/// Closed classification of x86 instructions by mnemonic family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstructionType {
    ConditionalJump,
    UnconditionalJump,
    Call,
    Return,
    Mov,
    Arithmetic,
    Logic,
    Compare,
    Stack,
    Float,
    String,
    Other,
}

impl InstructionType {
    /// Stable snake_case tag used in statistics and target names.
    pub fn as_str(&self) -> &'static str {
        match self {
            InstructionType::ConditionalJump => "conditional_jump",
            InstructionType::UnconditionalJump => "unconditional_jump",
            InstructionType::Call => "call",
            InstructionType::Return => "return",
            InstructionType::Mov => "mov",
            InstructionType::Arithmetic => "arithmetic",
            InstructionType::Logic => "logic",
            InstructionType::Compare => "compare",
            InstructionType::Stack => "stack",
            InstructionType::Float => "float",
            InstructionType::String => "string",
            InstructionType::Other => "other",
        }
    }

    /// True for conditional and unconditional jumps.
    pub fn is_jump(&self) -> bool {
        matches!(
            self,
            InstructionType::ConditionalJump | InstructionType::UnconditionalJump
        )
    }

    /// True for any control transfer with a relative target encoding.
    pub fn is_branch(&self) -> bool {
        self.is_jump() || matches!(self, InstructionType::Call)
    }
}

impl fmt::Display for InstructionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Estimate of how likely a byte is to change across recompilations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VolatilityLevel {
    Low,
    Medium,
    High,
}

impl VolatilityLevel {
    /// One step toward `Low`, saturating.
    pub fn downgraded(self) -> Self {
        match self {
            VolatilityLevel::High => VolatilityLevel::Medium,
            VolatilityLevel::Medium | VolatilityLevel::Low => VolatilityLevel::Low,
        }
    }
}

impl fmt::Display for VolatilityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VolatilityLevel::Low => write!(f, "low"),
            VolatilityLevel::Medium => write!(f, "medium"),
            VolatilityLevel::High => write!(f, "high"),
        }
    }
}

/// Volatility pair for an instruction's opcode and operand bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Volatility {
    pub opcode: VolatilityLevel,
    pub operand: VolatilityLevel,
}

impl Default for Volatility {
    fn default() -> Self {
        Volatility {
            opcode: VolatilityLevel::Low,
            operand: VolatilityLevel::Low,
        }
    }
}

/// Semantic role of a single instruction byte.
///
/// `Opcode` covers legacy prefixes and the `0F` escape byte in addition
/// to the opcode proper.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ByteCategory {
    Opcode,
    ModRm,
    Sib,
    Displacement,
    Immediate,
    RelativeOffset,
}

/// One analyzed instruction. Immutable after construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instruction {
    /// 8-hex-digit uppercase address, unique within a batch.
    pub address: String,
    /// Raw machine bytes, 1-15 of them.
    pub bytes: Vec<u8>,
    /// Length of `bytes`.
    pub size: usize,
    /// Lowercase mnemonic.
    pub mnemonic: String,
    /// Operand text as written by the source disassembler.
    pub operands: String,
    /// Lowercased, whitespace-collapsed operand text.
    pub operands_normalized: String,
    /// Optional label harvested from the input.
    pub label: Option<String>,
    pub kind: InstructionType,
    pub volatility: Volatility,
    /// Byte offsets that are candidate wildcard positions.
    pub wildcard_positions: Vec<usize>,
    /// Semantic category of every byte; same length as `bytes`.
    pub byte_categories: Vec<ByteCategory>,
}

impl Instruction {
    /// Bytes re-encoded as uppercase hex pairs, space-separated.
    pub fn hex_bytes(&self) -> String {
        self.bytes
            .iter()
            .map(|b| format!("{b:02X}"))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// True when the instruction encodes a relative branch target
    /// (rather than an indirect or register branch).
    pub fn has_relative_offset(&self) -> bool {
        self.byte_categories
            .iter()
            .any(|c| *c == ByteCategory::RelativeOffset)
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.address, self.mnemonic, self.operands)
    }
}

/// Error type for the whole crate.
#[derive(Debug, thiserror::Error)]
pub enum SigError {
    /// No listing format scored above the detection threshold.
    #[error("unrecognized input format: no known listing shape matched")]
    UnrecognizedFormat,

    /// A format was chosen but not a single line produced an instruction.
    #[error("no instructions could be parsed from the input")]
    NoInstructions,

    /// Caller-supplied options are inconsistent.
    #[error("invalid options: min_length {min} exceeds max_length {max}")]
    InvalidOptions { min: usize, max: usize },

    /// Capstone failed to initialize or decode.
    #[error("decoder error: {0}")]
    Decode(#[from] capstone::Error),

    /// I/O error reading input.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization of an export payload failed.
    #[error("export error: {0}")]
    Export(#[from] serde_json::Error),
}
