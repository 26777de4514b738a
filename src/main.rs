//! SigForge CLI
//!
//! Parses a disassembly listing, generates wildcarded byte signatures,
//! and prints them in the chosen export format.

use std::io::Read;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use sigforge::format::ExportFormat;
use sigforge::generator::{self, GenerateResult, SignatureOptions, TargetSelection};
use sigforge::parser::{self, FormatHint};
use sigforge::strategy::WildcardRules;
use sigforge::{logging, smart, SigError};

/// Byte-signature generator for 32-bit x86 disassembly listings.
///
/// Reads an x64dbg dump, a Cheat Engine dump, or raw hex bytes and
/// emits ranked wildcard signatures for the selected targets.
#[derive(Parser, Debug)]
#[command(name = "sigforge")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Input listing file; stdin when omitted or "-"
    input: Option<PathBuf>,

    /// Input format
    #[arg(short, long, default_value = "auto")]
    format: FormatHint,

    /// Base address for raw hex input (hex, optional 0x prefix)
    #[arg(long, default_value = "0", value_parser = parse_base)]
    base: u32,

    /// Export format
    #[arg(short, long, default_value = "aob")]
    export: ExportFormat,

    /// Targets: comma-separated labels/addresses, or one of
    /// all, all_labeled, all_jumps, all_calls
    #[arg(short, long)]
    targets: Option<String>,

    /// Anchor on the first instruction instead of resolving targets
    #[arg(long)]
    targeted: bool,

    /// Pick anchors automatically and generate for the best ones
    #[arg(long)]
    smart: bool,

    /// Print the smart-analysis report as JSON and exit
    #[arg(long)]
    analyze: bool,

    /// Number of anchors used with --smart
    #[arg(long, default_value_t = 3)]
    top: usize,

    /// Number of anchors reported with --analyze
    #[arg(long, default_value_t = 10)]
    max_targets: usize,

    /// Minimum signature length in bytes
    #[arg(long, default_value_t = 20)]
    min_length: usize,

    /// Maximum signature length in bytes
    #[arg(long, default_value_t = 50)]
    max_length: usize,

    /// Variant cap per target
    #[arg(long, default_value_t = 10)]
    variants: usize,

    /// Instructions of context before the anchor
    #[arg(long, default_value_t = 0)]
    context_before: usize,

    /// Instructions of context after the anchor
    #[arg(long, default_value_t = 10)]
    context_after: usize,

    /// Also wildcard immediate operand bytes
    #[arg(long)]
    wildcard_immediates: bool,

    /// Also wildcard short struct-offset displacements
    #[arg(long)]
    wildcard_struct_offsets: bool,

    /// Module name for module-relative export formats
    #[arg(short, long)]
    module: Option<String>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn parse_base(s: &str) -> Result<u32, String> {
    let digits = s.trim_start_matches("0x").trim_start_matches("0X");
    u32::from_str_radix(digits, 16).map_err(|e| format!("invalid base address: {e}"))
}

fn read_input(path: Option<&PathBuf>) -> std::io::Result<String> {
    match path {
        Some(p) if p.as_os_str() != "-" => std::fs::read_to_string(p),
        _ => {
            let mut buf = String::new();
            std::io::stdin().read_to_string(&mut buf)?;
            Ok(buf)
        }
    }
}

fn build_options(args: &Args) -> SignatureOptions {
    SignatureOptions {
        min_length: args.min_length,
        max_length: args.max_length,
        variants: args.variants,
        context_before: args.context_before,
        context_after: args.context_after,
        wildcard_rules: WildcardRules {
            immediates: args.wildcard_immediates,
            struct_offsets: args.wildcard_struct_offsets,
            ..WildcardRules::default()
        },
    }
}

fn target_selection(args: &Args, labels: &[String]) -> TargetSelection {
    match args.targets.as_deref() {
        Some(raw) => {
            let ids: Vec<&str> = raw.split(',').map(str::trim).collect();
            if ids.len() == 1 {
                TargetSelection::from_token(ids[0])
            } else {
                TargetSelection::Explicit(ids.iter().map(|s| s.to_string()).collect())
            }
        }
        // Labeled instructions are the natural targets; fall back to
        // jumps when the listing carries no labels.
        None if !labels.is_empty() => TargetSelection::AllLabeled,
        None => TargetSelection::AllJumps,
    }
}

fn run(args: &Args) -> Result<String, SigError> {
    let input = read_input(args.input.as_ref())?;

    let parsed = parser::parse_with_base(&input, args.format, args.base)?;

    if args.analyze {
        let report = smart::smart_analyze(&parsed.instructions, args.max_targets);
        return Ok(serde_json::to_string_pretty(&report)?);
    }

    let options = build_options(args);
    let result: GenerateResult = if args.smart {
        smart::smart_generate(&parsed.instructions, &options, args.top)?
    } else if args.targeted {
        generator::generate_targeted(&parsed.instructions, &options)?
    } else {
        let selection = target_selection(args, &parsed.labels);
        generator::generate(&parsed.instructions, &selection, &options)?
    };

    if result.is_partial() {
        eprintln!("warning: unresolved targets: {}", result.unresolved.join(", "));
    }

    let module = args
        .module
        .clone()
        .or(parsed.module)
        .unwrap_or_else(|| "game.exe".to_string());

    args.export.get_formatter().format(&result.signatures, &module)
}

fn main() -> ExitCode {
    let args = Args::parse();
    logging::init_tracing(args.verbose);

    match run(&args) {
        Ok(output) => {
            println!("{output}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}
