//! Capstone-based x86 decoder for the raw-hex input path.
//!
//! Instructions are decoded assuming 32-bit semantics; the rest of the
//! pipeline relies on that for displacement sizing and stack register
//! recognition.

use capstone::arch::x86::ArchMode as X86Mode;
use capstone::prelude::BuildsCapstone;
use capstone::Capstone;
use tracing::debug;

use crate::{SigError, MAX_INSTRUCTION_SIZE};

/// One instruction recovered from a raw byte buffer, before analysis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedInsn {
    /// Address assigned during the sweep (base + offset).
    pub address: u32,
    pub bytes: Vec<u8>,
    pub mnemonic: String,
    pub operands: String,
}

/// A 32-bit x86 decoder wrapping a Capstone handle.
pub struct X86Decoder {
    cs: Capstone,
}

impl X86Decoder {
    pub fn new() -> Result<Self, SigError> {
        let cs = Capstone::new()
            .x86()
            .mode(X86Mode::Mode32)
            .detail(false)
            .build()?;
        Ok(X86Decoder { cs })
    }

    /// Decode a single instruction at `offset` into `image`.
    ///
    /// Returns `None` when the bytes at `offset` do not form a valid
    /// instruction.
    pub fn decode_at(&self, image: &[u8], offset: usize, base: u32) -> Option<DecodedInsn> {
        if offset >= image.len() {
            return None;
        }

        // Capstone only needs one encoding's worth of bytes.
        let end = (offset + MAX_INSTRUCTION_SIZE + 1).min(image.len());
        let at = base as u64 + offset as u64;

        let decoded = self.cs.disasm_all(&image[offset..end], at).ok()?;
        let insn = decoded.iter().next()?;
        if insn.address() != at {
            return None;
        }

        Some(DecodedInsn {
            address: insn.address() as u32,
            bytes: insn.bytes().to_vec(),
            mnemonic: insn.mnemonic().unwrap_or("").to_lowercase(),
            operands: insn.op_str().unwrap_or("").to_string(),
        })
    }

    /// Linear sweep over `image`, skipping one byte past anything that
    /// fails to decode.
    pub fn sweep(&self, image: &[u8], base: u32) -> Vec<DecodedInsn> {
        let mut insns = Vec::new();
        let mut offset = 0usize;
        let mut skipped = 0usize;

        while offset < image.len() {
            match self.decode_at(image, offset, base) {
                Some(insn) if !insn.bytes.is_empty() => {
                    offset += insn.bytes.len();
                    insns.push(insn);
                }
                _ => {
                    offset += 1;
                    skipped += 1;
                }
            }
        }

        debug!(
            decoded = insns.len(),
            skipped, "linear sweep over {} bytes complete",
            image.len()
        );

        insns
    }
}
