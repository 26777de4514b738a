//! Per-byte classification, volatility rating, and wildcard candidates.
//!
//! The analyzer combines two views of each instruction: a *textual* view
//! recovered from the disassembler's operand string, and a *structural*
//! view derived from the encoding itself (prefixes, ModR/M, SIB,
//! displacement, immediate). When the views disagree the structural one
//! wins and the operand volatility is downgraded one step.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::parser::RawInstruction;
use crate::{ByteCategory, Instruction, InstructionType, Volatility, VolatilityLevel};

// Mnemonic tables, grouped the way debugger listings use them.

const CONDITIONAL_JUMPS: &[&str] = &[
    "je", "jne", "jz", "jnz", "ja", "jae", "jb", "jbe", "jg", "jge", "jl", "jle", "jo", "jno",
    "js", "jns", "jp", "jnp", "jpe", "jpo", "jecxz", "jcxz", "loop", "loope", "loopne", "loopz",
    "loopnz",
];

const RETURNS: &[&str] = &["ret", "retn", "retf", "iret", "iretd"];

const MOVES: &[&str] = &[
    "mov", "movzx", "movsx", "movss", "movaps", "movups", "movdqa", "movdqu", "lea", "xchg",
    "cmove", "cmovne", "cmovz", "cmovnz", "cmova", "cmovae", "cmovb", "cmovbe", "cmovg", "cmovge",
    "cmovl", "cmovle", "cmovo", "cmovno", "cmovs", "cmovns", "cmovp", "cmovnp",
];

const ARITHMETIC: &[&str] = &[
    "add", "sub", "mul", "imul", "div", "idiv", "inc", "dec", "neg", "adc", "sbb",
];

const LOGIC: &[&str] = &[
    "and", "or", "xor", "not", "shl", "shr", "sal", "sar", "rol", "ror", "rcl", "rcr", "bt",
    "bts", "btr", "btc", "bsf", "bsr",
];

const COMPARES: &[&str] = &["cmp", "test", "comiss", "comisd", "ucomiss", "ucomisd"];

const STACK_OPS: &[&str] = &[
    "push", "pop", "pusha", "pushad", "popa", "popad", "pushf", "pushfd", "popf", "popfd",
    "enter", "leave",
];

const FLOAT_OPS: &[&str] = &[
    "fld", "fst", "fstp", "fadd", "fsub", "fmul", "fdiv", "fcom", "fcomp", "fcompp", "fcomi",
    "fcomip", "fucomi", "fucomip", "fxch", "fild", "fist", "fistp", "finit", "fninit", "fstsw",
    "fnstsw", "fstcw", "fnstcw", "fldcw", "addss", "subss", "mulss", "divss", "addsd", "subsd",
    "mulsd", "divsd", "cvtsi2ss", "cvtsi2sd", "cvtss2si", "cvtsd2si", "cvtss2sd", "cvtsd2ss",
];

const STRING_OPS: &[&str] = &[
    "movs", "cmps", "scas", "lods", "stos", "rep", "repe", "repz", "repne", "repnz", "movsb",
    "movsw", "movsd", "cmpsb", "cmpsw", "cmpsd", "scasb", "scasw", "scasd", "lodsb", "lodsw",
    "lodsd", "stosb", "stosw", "stosd",
];

/// Classify a mnemonic into the closed instruction-type enumeration.
///
/// `movsd` is ambiguous between the SSE move and the string op; listings
/// that matter here use the SSE form, so it lands in `Mov` first.
pub fn classify_mnemonic(mnemonic: &str) -> InstructionType {
    let m = mnemonic.to_lowercase();
    let m = m.as_str();

    if CONDITIONAL_JUMPS.contains(&m) {
        InstructionType::ConditionalJump
    } else if m == "jmp" {
        InstructionType::UnconditionalJump
    } else if m == "call" {
        InstructionType::Call
    } else if RETURNS.contains(&m) {
        InstructionType::Return
    } else if m == "movsd" || MOVES.contains(&m) {
        InstructionType::Mov
    } else if ARITHMETIC.contains(&m) {
        InstructionType::Arithmetic
    } else if LOGIC.contains(&m) {
        InstructionType::Logic
    } else if COMPARES.contains(&m) {
        InstructionType::Compare
    } else if STACK_OPS.contains(&m) {
        InstructionType::Stack
    } else if FLOAT_OPS.contains(&m) {
        InstructionType::Float
    } else if STRING_OPS.contains(&m) {
        InstructionType::String
    } else {
        InstructionType::Other
    }
}

// Encoding constants (32-bit mode).

const LEGACY_PREFIXES: &[u8] = &[
    0xF0, 0xF2, 0xF3, 0x66, 0x67, 0x2E, 0x36, 0x3E, 0x26, 0x64, 0x65,
];

/// Two-byte `0F` opcodes common enough to rate low opcode volatility.
fn common_two_byte(second: u8) -> bool {
    matches!(second,
        0x40..=0x4F        // cmovcc
        | 0x80..=0x9F      // jcc rel32, setcc
        | 0xB6 | 0xB7      // movzx
        | 0xBE | 0xBF      // movsx
        | 0xAF             // imul
        | 0x1F)            // multi-byte nop
}

/// Immediate length for opcodes that never carry a ModR/M byte.
/// Returns the 32-bit-mode length; a 66 prefix shrinks dword forms.
fn no_modrm_imm_len(opcode: u8, operand_size_16: bool) -> Option<usize> {
    let dword = if operand_size_16 { 2 } else { 4 };
    match opcode {
        0xB0..=0xB7 => Some(1),
        0xB8..=0xBF => Some(dword),
        0x6A => Some(1),
        0x68 => Some(dword),
        0x04 | 0x0C | 0x14 | 0x1C | 0x24 | 0x2C | 0x34 | 0x3C | 0xA8 => Some(1),
        0x05 | 0x0D | 0x15 | 0x1D | 0x25 | 0x2D | 0x35 | 0x3D | 0xA9 => Some(dword),
        0xC2 | 0xCA => Some(2),
        0xCD | 0xD4 | 0xD5 | 0xE4 | 0xE5 | 0xE6 | 0xE7 => Some(1),
        _ => None,
    }
}

const REGISTERS_32: &[&str] = &["eax", "ebx", "ecx", "edx", "esi", "edi", "ebp", "esp"];
const REGISTERS_SMALL: &[&str] = &[
    "ax", "bx", "cx", "dx", "si", "di", "bp", "sp", "al", "ah", "bl", "bh", "cl", "ch", "dl",
    "dh",
];

fn is_register(token: &str) -> bool {
    REGISTERS_32.contains(&token) || REGISTERS_SMALL.contains(&token)
}

/// Where a displacement points, decided primarily from the operand text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispKind {
    /// `[ebp±X]` / `[esp±X]` frame or stack references.
    Stack,
    /// `[reg+X]` with a non-stack base.
    Struct,
    /// Absolute 4-byte address with no base register.
    Global,
}

static STACK_REF: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[\s*e(?:bp|sp)\b").expect("static regex"));
static GLOBAL_REF: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[\s*(?:0x)?[0-9a-f]{4,9}\s*\]").expect("static regex"));
static BRACKET_DISP: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[[^\]]*[+-]\s*(?:0x)?([0-9a-f]+)\s*\]").expect("static regex"));
static IMMEDIATE_TAIL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^-?(?:0x)?[0-9a-f]+h?$").expect("static regex"));

/// The textual view: what the operand string claims about the encoding.
#[derive(Debug, Clone, Copy, Default)]
struct TextView {
    has_memory: bool,
    disp_kind: Option<DispKind>,
    disp_size: Option<usize>,
    has_immediate: bool,
}

impl TextView {
    fn from_operands(operands: &str) -> Self {
        let mut view = TextView {
            has_memory: operands.contains('['),
            ..TextView::default()
        };

        if view.has_memory {
            if STACK_REF.is_match(operands) {
                view.disp_kind = Some(DispKind::Stack);
            } else if GLOBAL_REF.is_match(operands) {
                view.disp_kind = Some(DispKind::Global);
                view.disp_size = Some(4);
            } else if BRACKET_DISP.is_match(operands) {
                view.disp_kind = Some(DispKind::Struct);
            }

            if view.disp_size.is_none() {
                if let Some(caps) = BRACKET_DISP.captures(operands) {
                    if let Ok(value) = u64::from_str_radix(&caps[1], 16) {
                        view.disp_size = Some(if value <= 0x80 { 1 } else { 4 });
                    }
                }
            }
        }

        // A trailing bare number (last operand, or the only operand)
        // reads as an immediate.
        if let Some(tail) = operands.rsplit(',').next() {
            let tail = tail.trim();
            if !tail.is_empty() && IMMEDIATE_TAIL.is_match(tail) && !is_register(tail) {
                view.has_immediate = true;
            }
        }

        view
    }
}

/// The structural view: byte ranges recovered from the encoding.
#[derive(Debug, Clone)]
pub(crate) struct ByteLayout {
    pub categories: Vec<ByteCategory>,
    pub disp: Option<(usize, usize, DispKind)>,
    pub imm: Option<(usize, usize)>,
    pub has_prefix: bool,
    pub two_byte_opcode: u8,
    /// False when the textual view had to be overridden.
    pub text_agrees: bool,
}

impl ByteLayout {
    fn opcode_only(n: usize, has_prefix: bool, two_byte: u8, agrees: bool) -> Self {
        ByteLayout {
            categories: vec![ByteCategory::Opcode; n],
            disp: None,
            imm: None,
            has_prefix,
            two_byte_opcode: two_byte,
            text_agrees: agrees,
        }
    }
}

/// Classify every byte of an instruction into exactly one category.
pub(crate) fn layout_bytes(
    bytes: &[u8],
    kind: InstructionType,
    operands_normalized: &str,
) -> ByteLayout {
    let n = bytes.len();
    let text = TextView::from_operands(operands_normalized);

    let mut head = 0;
    while head + 1 < n && LEGACY_PREFIXES.contains(&bytes[head]) {
        head += 1;
    }
    let has_prefix = head > 0;
    let operand_size_16 = bytes[..head].contains(&0x66);
    let two_byte = bytes[head] == 0x0F && head + 1 < n;
    let second = if two_byte { bytes[head + 1] } else { 0 };
    let opcode_end = head + if two_byte { 2 } else { 1 };
    let rem = n - opcode_end;

    let mut cats = vec![ByteCategory::Opcode; n];

    if rem == 0 {
        let agrees = !text.has_memory;
        return ByteLayout::opcode_only(n, has_prefix, second, agrees);
    }

    // Relative control transfers write their target as a bare address or
    // label; indirect forms go through memory or a register and fall
    // through to the ModR/M path below.
    let first_token = operands_normalized
        .split_whitespace()
        .next()
        .unwrap_or("")
        .trim_end_matches(',');
    let indirect = text.has_memory || is_register(first_token);
    if kind.is_branch() && !indirect && matches!(rem, 1 | 2 | 4) {
        for cat in cats.iter_mut().skip(opcode_end) {
            *cat = ByteCategory::RelativeOffset;
        }
        return ByteLayout {
            categories: cats,
            disp: None,
            imm: None,
            has_prefix,
            two_byte_opcode: second,
            text_agrees: true,
        };
    }

    // moffs forms (A0-A3): absolute 4-byte address, no ModR/M.
    if !two_byte && matches!(bytes[head], 0xA0..=0xA3) && rem == 4 {
        for cat in cats.iter_mut().skip(opcode_end) {
            *cat = ByteCategory::Displacement;
        }
        return ByteLayout {
            categories: cats,
            disp: Some((opcode_end, 4, DispKind::Global)),
            imm: None,
            has_prefix,
            two_byte_opcode: second,
            text_agrees: text.has_memory,
        };
    }

    // Opcodes that embed their register and carry only an immediate.
    if !two_byte {
        if let Some(imm_len) = no_modrm_imm_len(bytes[head], operand_size_16) {
            if rem == imm_len {
                for cat in cats.iter_mut().skip(opcode_end) {
                    *cat = ByteCategory::Immediate;
                }
                return ByteLayout {
                    categories: cats,
                    disp: None,
                    imm: Some((opcode_end, n)),
                    has_prefix,
                    two_byte_opcode: second,
                    text_agrees: !text.has_memory,
                };
            }
        }
    }

    // Generic ModR/M path: opcode, ModR/M, optional SIB, displacement,
    // then whatever trails is the immediate.
    let modrm = bytes[opcode_end];
    let mod_bits = modrm >> 6;
    let rm = modrm & 0x07;
    let has_sib = mod_bits != 3 && rm == 4 && opcode_end + 1 < n;
    let sib_base_disp32 =
        has_sib && mod_bits == 0 && (bytes[opcode_end + 1] & 0x07) == 5;

    let disp_start = opcode_end + 1 + usize::from(has_sib);
    let disp_len = match mod_bits {
        1 => 1,
        2 => 4,
        0 if rm == 5 || sib_base_disp32 => 4,
        _ => 0,
    };

    if disp_start + disp_len <= n {
        cats[opcode_end] = ByteCategory::ModRm;
        if has_sib {
            cats[opcode_end + 1] = ByteCategory::Sib;
        }
        for cat in cats.iter_mut().skip(disp_start).take(disp_len) {
            *cat = ByteCategory::Displacement;
        }
        let imm_start = disp_start + disp_len;
        for cat in cats.iter_mut().skip(imm_start) {
            *cat = ByteCategory::Immediate;
        }

        let absolute = mod_bits == 0 && (rm == 5 || sib_base_disp32);
        let disp = if disp_len > 0 {
            let kind = if absolute {
                DispKind::Global
            } else if let Some(k) = text.disp_kind {
                k
            } else if rm == 5 || (has_sib && matches!(bytes[opcode_end + 1] & 0x07, 4 | 5)) {
                // ebp/esp base without operand text to confirm it
                DispKind::Stack
            } else {
                DispKind::Struct
            };
            Some((disp_start, disp_len, kind))
        } else {
            None
        };

        let mem_agrees = text.has_memory == (mod_bits != 3);
        let size_agrees = match (text.disp_size, disp_len) {
            (Some(predicted), actual) if actual > 0 => predicted == actual,
            _ => true,
        };
        let imm_agrees = !(text.has_immediate && imm_start >= n && disp_len == 0 && mod_bits == 3);

        return ByteLayout {
            categories: cats,
            disp,
            imm: if imm_start < n {
                Some((imm_start, n))
            } else {
                None
            },
            has_prefix,
            two_byte_opcode: second,
            text_agrees: mem_agrees && size_agrees && imm_agrees,
        };
    }

    // The ModR/M interpretation overruns the encoding: a short form we
    // do not have a table entry for. Treat the tail as immediate and
    // record the disagreement.
    for cat in cats.iter_mut().skip(opcode_end) {
        *cat = ByteCategory::Immediate;
    }
    ByteLayout {
        categories: cats,
        disp: None,
        imm: Some((opcode_end, n)),
        has_prefix,
        two_byte_opcode: second,
        text_agrees: false,
    }
}

/// Per-instruction wildcard candidate positions, split by rule class.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WildcardClasses {
    pub relative: Vec<usize>,
    pub stack: Vec<usize>,
    pub global: Vec<usize>,
    pub struct_offset: Vec<usize>,
    pub immediate: Vec<usize>,
    pub memory: Vec<usize>,
}

impl WildcardClasses {
    /// Union of every class, sorted and deduplicated.
    pub fn all(&self) -> Vec<usize> {
        let mut union: Vec<usize> = self
            .relative
            .iter()
            .chain(&self.stack)
            .chain(&self.global)
            .chain(&self.struct_offset)
            .chain(&self.immediate)
            .chain(&self.memory)
            .copied()
            .collect();
        union.sort_unstable();
        union.dedup();
        union
    }
}

fn classes_from_layout(
    layout: &ByteLayout,
    operands_normalized: &str,
) -> WildcardClasses {
    let mut classes = WildcardClasses::default();
    let text = TextView::from_operands(operands_normalized);

    for (i, cat) in layout.categories.iter().enumerate() {
        if *cat == ByteCategory::RelativeOffset {
            classes.relative.push(i);
        }
    }

    if let Some((start, len, kind)) = layout.disp {
        let range: Vec<usize> = (start..start + len).collect();
        classes.memory.extend(&range);
        match kind {
            DispKind::Stack => classes.stack.extend(&range),
            DispKind::Global => classes.global.extend(&range),
            DispKind::Struct => {
                // Only the short struct-style displacement is a
                // dedicated rule class; dword displacements stay under
                // the memory superset.
                if len == 1 {
                    classes.struct_offset.extend(&range);
                }
            }
        }
    }

    // Immediate candidates require the operand text to confirm that an
    // immediate operand exists; structurally inferred tails without
    // textual backing are left to the max-stability strategy.
    if text.has_immediate {
        if let Some((start, end)) = layout.imm {
            classes.immediate.extend(start..end);
        }
    }

    classes
}

/// Compute the candidate classes for an already-analyzed instruction.
pub fn wildcard_classes(inst: &Instruction) -> WildcardClasses {
    let layout = layout_bytes(&inst.bytes, inst.kind, &inst.operands_normalized);
    classes_from_layout(&layout, &inst.operands_normalized)
}

fn rate_volatility(layout: &ByteLayout, classes: &WildcardClasses) -> Volatility {
    let opcode = if layout.has_prefix {
        VolatilityLevel::Medium
    } else if layout.two_byte_opcode != 0 && !common_two_byte(layout.two_byte_opcode) {
        VolatilityLevel::Medium
    } else {
        VolatilityLevel::Low
    };

    let mut operand = if !classes.relative.is_empty() || !classes.global.is_empty() {
        VolatilityLevel::High
    } else if !classes.stack.is_empty() || !classes.struct_offset.is_empty()
        || !classes.memory.is_empty()
    {
        VolatilityLevel::Medium
    } else {
        VolatilityLevel::Low
    };

    if !layout.text_agrees {
        operand = operand.downgraded();
    }

    Volatility { opcode, operand }
}

/// Enrich a raw parsed record into a fully analyzed `Instruction`.
///
/// Pure: repeated invocations with the same input yield the same output.
pub fn analyze(raw: RawInstruction) -> Instruction {
    let kind = classify_mnemonic(&raw.mnemonic);

    // The db pseudo-instruction carries bytes we cannot interpret.
    let layout = if raw.mnemonic == "db" {
        ByteLayout::opcode_only(raw.bytes.len(), false, 0, true)
    } else {
        layout_bytes(&raw.bytes, kind, &raw.operands_normalized)
    };

    let classes = classes_from_layout(&layout, &raw.operands_normalized);
    let volatility = rate_volatility(&layout, &classes);
    let size = raw.bytes.len();

    Instruction {
        address: raw.address,
        bytes: raw.bytes,
        size,
        mnemonic: raw.mnemonic,
        operands: raw.operands,
        operands_normalized: raw.operands_normalized,
        label: raw.label,
        kind,
        volatility,
        wildcard_positions: classes.all(),
        byte_categories: layout.categories,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::normalize_operands;

    fn raw(bytes: &[u8], mnemonic: &str, operands: &str) -> RawInstruction {
        RawInstruction {
            address: "00401000".to_string(),
            bytes: bytes.to_vec(),
            mnemonic: mnemonic.to_string(),
            operands: operands.to_string(),
            operands_normalized: normalize_operands(operands),
            label: None,
        }
    }

    #[test]
    fn test_classify_mnemonics() {
        assert_eq!(classify_mnemonic("je"), InstructionType::ConditionalJump);
        assert_eq!(classify_mnemonic("JMP"), InstructionType::UnconditionalJump);
        assert_eq!(classify_mnemonic("call"), InstructionType::Call);
        assert_eq!(classify_mnemonic("retn"), InstructionType::Return);
        assert_eq!(classify_mnemonic("movzx"), InstructionType::Mov);
        assert_eq!(classify_mnemonic("sub"), InstructionType::Arithmetic);
        assert_eq!(classify_mnemonic("xor"), InstructionType::Logic);
        assert_eq!(classify_mnemonic("test"), InstructionType::Compare);
        assert_eq!(classify_mnemonic("push"), InstructionType::Stack);
        assert_eq!(classify_mnemonic("fld"), InstructionType::Float);
        assert_eq!(classify_mnemonic("stosb"), InstructionType::String);
        assert_eq!(classify_mnemonic("cpuid"), InstructionType::Other);
    }

    #[test]
    fn test_near_conditional_jump_layout() {
        // je rel32: 0F 84 79 05 00 00
        let inst = analyze(raw(&[0x0F, 0x84, 0x79, 0x05, 0x00, 0x00], "je", "game.B2802F"));

        assert_eq!(
            inst.byte_categories,
            vec![
                ByteCategory::Opcode,
                ByteCategory::Opcode,
                ByteCategory::RelativeOffset,
                ByteCategory::RelativeOffset,
                ByteCategory::RelativeOffset,
                ByteCategory::RelativeOffset,
            ]
        );
        assert_eq!(inst.wildcard_positions, vec![2, 3, 4, 5]);
        assert_eq!(inst.volatility.operand, VolatilityLevel::High);
        assert_eq!(inst.volatility.opcode, VolatilityLevel::Low);
    }

    #[test]
    fn test_short_jump_layout() {
        // jne +0x0c: 75 0C
        let inst = analyze(raw(&[0x75, 0x0C], "jne", "0x40100e"));
        assert_eq!(
            inst.byte_categories,
            vec![ByteCategory::Opcode, ByteCategory::RelativeOffset]
        );
        assert_eq!(inst.wildcard_positions, vec![1]);
    }

    #[test]
    fn test_near_call_layout() {
        // call rel32: E8 12 34 56 78
        let inst = analyze(raw(&[0xE8, 0x12, 0x34, 0x56, 0x78], "call", "0x78995647"));
        assert_eq!(inst.wildcard_positions, vec![1, 2, 3, 4]);
        assert!(inst.has_relative_offset());
    }

    #[test]
    fn test_indirect_call_is_not_relative() {
        // call dword ptr [eax]: FF 10
        let inst = analyze(raw(&[0xFF, 0x10], "call", "dword ptr [eax]"));
        assert!(!inst.has_relative_offset());
        assert_eq!(inst.byte_categories[1], ByteCategory::ModRm);
    }

    #[test]
    fn test_stack_disp32_layout() {
        // mov ecx, [ebp-1D4]: 8B 8D 2C FE FF FF
        let inst = analyze(raw(
            &[0x8B, 0x8D, 0x2C, 0xFE, 0xFF, 0xFF],
            "mov",
            "ecx, dword ptr [ebp-1D4]",
        ));

        assert_eq!(inst.byte_categories[0], ByteCategory::Opcode);
        assert_eq!(inst.byte_categories[1], ByteCategory::ModRm);
        for i in 2..6 {
            assert_eq!(inst.byte_categories[i], ByteCategory::Displacement);
        }
        let classes = wildcard_classes(&inst);
        assert_eq!(classes.stack, vec![2, 3, 4, 5]);
        assert!(classes.global.is_empty());
        assert_eq!(inst.volatility.operand, VolatilityLevel::Medium);
    }

    #[test]
    fn test_stack_disp8_layout() {
        // mov eax, [ebp+8]: 8B 45 08
        let inst = analyze(raw(&[0x8B, 0x45, 0x08], "mov", "eax, dword ptr [ebp+8]"));
        let classes = wildcard_classes(&inst);
        assert_eq!(classes.stack, vec![2]);
        assert_eq!(classes.memory, vec![2]);
        assert!(classes.struct_offset.is_empty());
    }

    #[test]
    fn test_global_address_layout() {
        // mov eax, [0x57EF40]: A1 40 EF 57 00
        let inst = analyze(raw(&[0xA1, 0x40, 0xEF, 0x57, 0x00], "mov", "eax, ds:[57EF40]"));
        let classes = wildcard_classes(&inst);
        assert_eq!(classes.global, vec![1, 2, 3, 4]);
        assert_eq!(inst.volatility.operand, VolatilityLevel::High);
    }

    #[test]
    fn test_modrm_absolute_disp32() {
        // mov ecx, [0x57EF40]: 8B 0D 40 EF 57 00
        let inst = analyze(raw(
            &[0x8B, 0x0D, 0x40, 0xEF, 0x57, 0x00],
            "mov",
            "ecx, dword ptr ds:[57EF40]",
        ));
        let classes = wildcard_classes(&inst);
        assert_eq!(classes.global, vec![2, 3, 4, 5]);
    }

    #[test]
    fn test_struct_offset_layout() {
        // mov eax, [ecx+0x10]: 8B 41 10
        let inst = analyze(raw(&[0x8B, 0x41, 0x10], "mov", "eax, dword ptr [ecx+10]"));
        let classes = wildcard_classes(&inst);
        assert_eq!(classes.struct_offset, vec![2]);
        assert_eq!(classes.memory, vec![2]);
        assert!(classes.stack.is_empty());
    }

    #[test]
    fn test_mov_imm_short_form() {
        // mov eax, 1: B8 01 00 00 00 -- register embedded in the opcode
        let inst = analyze(raw(&[0xB8, 0x01, 0x00, 0x00, 0x00], "mov", "eax, 1"));
        assert_eq!(inst.byte_categories[0], ByteCategory::Opcode);
        for i in 1..5 {
            assert_eq!(inst.byte_categories[i], ByteCategory::Immediate);
        }
        let classes = wildcard_classes(&inst);
        assert_eq!(classes.immediate, vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_arith_modrm_imm8() {
        // sub esp, 0x10: 83 EC 10
        let inst = analyze(raw(&[0x83, 0xEC, 0x10], "sub", "esp, 10"));
        assert_eq!(inst.byte_categories[1], ByteCategory::ModRm);
        assert_eq!(inst.byte_categories[2], ByteCategory::Immediate);
        let classes = wildcard_classes(&inst);
        assert_eq!(classes.immediate, vec![2]);
    }

    #[test]
    fn test_sib_layout() {
        // mov eax, [esp+8]: 8B 44 24 08
        let inst = analyze(raw(&[0x8B, 0x44, 0x24, 0x08], "mov", "eax, dword ptr [esp+8]"));
        assert_eq!(
            inst.byte_categories,
            vec![
                ByteCategory::Opcode,
                ByteCategory::ModRm,
                ByteCategory::Sib,
                ByteCategory::Displacement,
            ]
        );
        let classes = wildcard_classes(&inst);
        assert_eq!(classes.stack, vec![3]);
    }

    #[test]
    fn test_every_byte_covered() {
        let samples: &[(&[u8], &str, &str)] = &[
            (&[0x55], "push", "ebp"),
            (&[0x8B, 0xEC], "mov", "ebp, esp"),
            (&[0x0F, 0x84, 0x79, 0x05, 0x00, 0x00], "je", "0x1000"),
            (&[0x8B, 0x8D, 0x2C, 0xFE, 0xFF, 0xFF], "mov", "ecx, [ebp-1D4]"),
            (&[0xC7, 0x45, 0xFC, 0x00, 0x00, 0x00, 0x00], "mov", "dword ptr [ebp-4], 0"),
            (&[0xF3, 0x0F, 0x10, 0x45, 0x08], "movss", "xmm0, [ebp+8]"),
            (&[0xC3], "ret", ""),
            (&[0x83, 0xC4, 0x08], "add", "esp, 8"),
        ];

        for (bytes, mnemonic, operands) in samples {
            let inst = analyze(raw(bytes, mnemonic, operands));
            assert_eq!(inst.byte_categories.len(), inst.size);
            assert!(inst.wildcard_positions.iter().all(|p| *p < inst.size));
        }
    }

    #[test]
    fn test_prefixed_opcode_volatility() {
        // rep stosd: F3 AB
        let inst = analyze(raw(&[0xF3, 0xAB], "rep", "stosd"));
        assert_eq!(inst.volatility.opcode, VolatilityLevel::Medium);
    }

    #[test]
    fn test_mov_imm_to_stack_slot() {
        // mov dword ptr [ebp-4], 0: C7 45 FC 00 00 00 00
        let inst = analyze(raw(
            &[0xC7, 0x45, 0xFC, 0x00, 0x00, 0x00, 0x00],
            "mov",
            "dword ptr [ebp-4], 0",
        ));
        let classes = wildcard_classes(&inst);
        assert_eq!(classes.stack, vec![2]);
        assert_eq!(classes.immediate, vec![3, 4, 5, 6]);
    }
}
