//! Named wildcarding strategies.
//!
//! Each strategy decides which candidate byte classes actually become
//! `??` in the emitted pattern. The generator runs every strategy over
//! every context variation and lets deduplication sort out the rest.

use std::fmt;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

/// Configuration of the seven wildcard rule classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WildcardRules {
    /// rel8/rel32 displacements of conditional and unconditional jumps.
    pub relative_jumps: bool,
    /// rel32 displacement of near calls.
    pub relative_calls: bool,
    /// Displacements in `[ebp±X]` / `[esp±X]` operands.
    pub stack_offsets: bool,
    /// 4-byte absolute displacements with no base register.
    pub global_addresses: bool,
    /// Trailing immediate operand bytes.
    pub immediates: bool,
    /// Non-stack `[reg+X]` 1-byte displacements.
    pub struct_offsets: bool,
    /// Every memory displacement byte (superset of the above classes).
    pub memory_displacements: bool,
}

impl Default for WildcardRules {
    fn default() -> Self {
        WildcardRules {
            relative_jumps: true,
            relative_calls: true,
            stack_offsets: true,
            global_addresses: true,
            immediates: false,
            struct_offsets: false,
            memory_displacements: false,
        }
    }
}

impl WildcardRules {
    /// All classes disabled; strategies build up from here.
    pub fn none() -> Self {
        WildcardRules {
            relative_jumps: false,
            relative_calls: false,
            stack_offsets: false,
            global_addresses: false,
            immediates: false,
            struct_offsets: false,
            memory_displacements: false,
        }
    }

    /// Every class enabled.
    pub fn everything() -> Self {
        WildcardRules {
            relative_jumps: true,
            relative_calls: true,
            stack_offsets: true,
            global_addresses: true,
            immediates: true,
            struct_offsets: true,
            memory_displacements: true,
        }
    }
}

/// The nine signature generation strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Relative jumps and calls only.
    Minimal,
    /// The caller's configured rules (the default posture).
    Conservative,
    /// Conservative plus struct offsets.
    Balanced,
    /// Every candidate position.
    Aggressive,
    /// Stack offsets only.
    StackFocus,
    /// Global absolute addresses only.
    GlobalFocus,
    /// All memory displacements.
    MemoryHeavy,
    /// Every candidate plus trailing immediates, confirmed or not.
    MaxStability,
    /// Immediate values only.
    ImmediatesOnly,
}

impl Strategy {
    /// All strategies, in the order variants are generated.
    pub fn all() -> &'static [Strategy] {
        &[
            Strategy::Minimal,
            Strategy::Conservative,
            Strategy::Balanced,
            Strategy::Aggressive,
            Strategy::StackFocus,
            Strategy::GlobalFocus,
            Strategy::MemoryHeavy,
            Strategy::MaxStability,
            Strategy::ImmediatesOnly,
        ]
    }

    /// Stable snake_case tag recorded on emitted signatures.
    pub fn tag(&self) -> &'static str {
        match self {
            Strategy::Minimal => "minimal",
            Strategy::Conservative => "conservative",
            Strategy::Balanced => "balanced",
            Strategy::Aggressive => "aggressive",
            Strategy::StackFocus => "stack_focus",
            Strategy::GlobalFocus => "global_focus",
            Strategy::MemoryHeavy => "memory_heavy",
            Strategy::MaxStability => "max_stability",
            Strategy::ImmediatesOnly => "immediates_only",
        }
    }

    /// The rule set this strategy realizes, given the caller's
    /// configured rules.
    pub fn rules(&self, configured: &WildcardRules) -> WildcardRules {
        match self {
            Strategy::Minimal => WildcardRules {
                relative_jumps: true,
                relative_calls: true,
                ..WildcardRules::none()
            },
            Strategy::Conservative => *configured,
            Strategy::Balanced => WildcardRules {
                struct_offsets: true,
                ..*configured
            },
            Strategy::Aggressive => WildcardRules::everything(),
            Strategy::StackFocus => WildcardRules {
                stack_offsets: true,
                ..WildcardRules::none()
            },
            Strategy::GlobalFocus => WildcardRules {
                global_addresses: true,
                ..WildcardRules::none()
            },
            Strategy::MemoryHeavy => WildcardRules {
                stack_offsets: true,
                global_addresses: true,
                struct_offsets: true,
                memory_displacements: true,
                ..WildcardRules::none()
            },
            Strategy::MaxStability => WildcardRules::everything(),
            Strategy::ImmediatesOnly => WildcardRules {
                immediates: true,
                ..WildcardRules::none()
            },
        }
    }

    /// Whether the strategy may wildcard beyond the analyzer's candidate
    /// set (structurally inferred immediates without textual backing).
    pub fn exceeds_candidates(&self) -> bool {
        matches!(self, Strategy::Aggressive | Strategy::MaxStability)
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_rules() {
        let rules = WildcardRules::default();
        assert!(rules.relative_jumps);
        assert!(rules.relative_calls);
        assert!(rules.stack_offsets);
        assert!(rules.global_addresses);
        assert!(!rules.immediates);
        assert!(!rules.struct_offsets);
        assert!(!rules.memory_displacements);
    }

    #[test]
    fn test_nine_strategies() {
        assert_eq!(Strategy::all().len(), 9);
    }

    #[test]
    fn test_minimal_only_touches_branches() {
        let rules = Strategy::Minimal.rules(&WildcardRules::default());
        assert!(rules.relative_jumps);
        assert!(rules.relative_calls);
        assert!(!rules.stack_offsets);
        assert!(!rules.global_addresses);
        assert!(!rules.immediates);
    }

    #[test]
    fn test_balanced_extends_configured() {
        let mut configured = WildcardRules::default();
        configured.stack_offsets = false;
        let rules = Strategy::Balanced.rules(&configured);
        assert!(rules.struct_offsets);
        assert!(!rules.stack_offsets);
    }

    #[test]
    fn test_aggressive_enables_everything() {
        let rules = Strategy::Aggressive.rules(&WildcardRules::none());
        assert_eq!(rules, WildcardRules::everything());
    }

    #[test]
    fn test_tags_are_snake_case() {
        for strategy in Strategy::all() {
            let tag = strategy.tag();
            assert!(tag.chars().all(|c| c.is_ascii_lowercase() || c == '_'));
        }
    }
}
