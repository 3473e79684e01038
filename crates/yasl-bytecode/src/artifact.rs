//! Compiled bytecode artifact.
//!
//! Layout:
//!
//! ```text
//! [8: constant pool length][8: global count][constant pool][code][HALT]
//! ```
//!
//! Offsets stored in instructions are absolute offsets into the artifact,
//! so the first constant lives at offset 16.

use std::fmt::Write;

use thiserror::Error;

use crate::emitter::read_int;
use crate::opcode::Op;

/// Size of the two fixed header fields.
pub const HEADER_PREFIX_LEN: usize = 16;

/// Errors raised when loading an artifact from raw bytes.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ArtifactError {
    #[error("artifact too short: {0} bytes")]
    Truncated(usize),

    #[error("constant pool of {pool} bytes does not fit in an artifact of {len} bytes")]
    PoolOverflow { pool: i64, len: usize },

    #[error("invalid global count {0}")]
    InvalidGlobalCount(i64),

    #[error("artifact does not end with HALT")]
    MissingHalt,
}

/// An immutable header + code image ready to execute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    bytes: Vec<u8>,
}

impl Artifact {
    /// Join a header (including its 16-byte prefix) and a code region,
    /// appending the final HALT.
    pub fn assemble(header: Vec<u8>, code: &[u8]) -> Self {
        let mut bytes = header;
        bytes.extend_from_slice(code);
        bytes.push(Op::Halt as u8);
        Self { bytes }
    }

    /// Validate and wrap bytes produced by a previous compile.
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self, ArtifactError> {
        if bytes.len() <= HEADER_PREFIX_LEN {
            return Err(ArtifactError::Truncated(bytes.len()));
        }
        let pool = read_int(&bytes, 0).ok_or(ArtifactError::Truncated(bytes.len()))?;
        let fits = usize::try_from(pool)
            .ok()
            .and_then(|p| p.checked_add(HEADER_PREFIX_LEN))
            .is_some_and(|end| end < bytes.len());
        if !fits {
            return Err(ArtifactError::PoolOverflow {
                pool,
                len: bytes.len(),
            });
        }
        let globals = read_int(&bytes, 8).ok_or(ArtifactError::Truncated(bytes.len()))?;
        if globals < 0 {
            return Err(ArtifactError::InvalidGlobalCount(globals));
        }
        if bytes.last() != Some(&(Op::Halt as u8)) {
            return Err(ArtifactError::MissingHalt);
        }
        Ok(Self { bytes })
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Byte length of the constant pool after the prefix.
    pub fn pool_len(&self) -> usize {
        read_int(&self.bytes, 0).map_or(0, |n| n as usize)
    }

    /// Number of global slots the program uses.
    pub fn global_count(&self) -> usize {
        read_int(&self.bytes, 8).map_or(0, |n| n as usize)
    }

    /// Offset of the first top-level instruction.
    pub fn entry_point(&self) -> usize {
        HEADER_PREFIX_LEN + self.pool_len()
    }

    /// The header, prefix included.
    pub fn header(&self) -> &[u8] {
        &self.bytes[..self.entry_point()]
    }

    /// Top-level code, including the final HALT.
    pub fn code(&self) -> &[u8] {
        &self.bytes[self.entry_point()..]
    }

    /// Read the length-prefixed string stored at a header offset.
    pub fn string_at(&self, offset: usize) -> Option<&[u8]> {
        let len = usize::try_from(read_int(&self.bytes, offset)?).ok()?;
        let start = offset.checked_add(8)?;
        self.bytes.get(start..start.checked_add(len)?)
    }

    /// Hex dump of the whole artifact, sixteen bytes per row.
    pub fn hex_dump(&self) -> String {
        let mut out = String::new();
        for (row, chunk) in self.bytes.chunks(16).enumerate() {
            let _ = write!(out, "{:04x}:", row * 16);
            for byte in chunk {
                let _ = write!(out, " {byte:02x}");
            }
            out.push('\n');
        }
        out
    }

    /// Disassemble the top-level code region.
    pub fn disassemble(&self) -> String {
        disassemble(&self.bytes, self.entry_point(), self.bytes.len())
    }
}

/// Disassemble `bytes[start..end]`, one instruction per line.
///
/// Offsets in the listing are absolute. Branch targets are resolved.
pub fn disassemble(bytes: &[u8], start: usize, end: usize) -> String {
    let mut out = String::new();
    let mut pc = start;
    while pc < end {
        let byte = bytes[pc];
        let Some(op) = Op::from_byte(byte) else {
            let _ = writeln!(out, "{pc:04x}  .byte 0x{byte:02x}");
            pc += 1;
            continue;
        };
        let width = op.operand_width();
        if width == 0 {
            let _ = writeln!(out, "{pc:04x}  {op}");
        } else {
            match read_int(bytes, pc + 1) {
                Some(operand) if op.is_branch() => {
                    let target = (pc + 1 + width) as i64 + operand;
                    let _ = writeln!(out, "{pc:04x}  {op:<10} {operand} (-> {target:04x})");
                }
                Some(operand) if op == Op::DConst => {
                    let _ = writeln!(
                        out,
                        "{pc:04x}  {op:<10} {}",
                        f64::from_bits(operand as u64)
                    );
                }
                Some(operand) => {
                    let _ = writeln!(out, "{pc:04x}  {op:<10} {operand}");
                }
                None => {
                    let _ = writeln!(out, "{pc:04x}  {op:<10} <truncated>");
                    break;
                }
            }
        }
        pc += 1 + width;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emitter::ByteBuffer;

    fn header_with_string(s: &str) -> Vec<u8> {
        let mut header = ByteBuffer::new();
        header.reserve_placeholder();
        header.reserve_placeholder();
        header.add_int(s.len() as i64);
        header.append(s.as_bytes());
        header.rewrite_int(0, (header.len() - HEADER_PREFIX_LEN) as i64);
        header.into_bytes()
    }

    #[test]
    fn test_assemble_empty() {
        let artifact = Artifact::assemble(vec![0; 16], &[Op::BConstT as u8, Op::Print as u8]);
        assert_eq!(artifact.pool_len(), 0);
        assert_eq!(artifact.entry_point(), 16);
        assert_eq!(
            artifact.code(),
            &[Op::BConstT as u8, Op::Print as u8, Op::Halt as u8]
        );
    }

    #[test]
    fn test_string_at() {
        let artifact = Artifact::assemble(header_with_string("YASL"), &[]);
        assert_eq!(artifact.pool_len(), 12);
        assert_eq!(artifact.string_at(16), Some(&b"YASL"[..]));
        assert_eq!(artifact.string_at(1000), None);
    }

    #[test]
    fn test_from_bytes_validates() {
        assert_eq!(
            Artifact::from_bytes(vec![0; 4]),
            Err(ArtifactError::Truncated(4))
        );
        let mut bytes = vec![0; 16];
        bytes.push(Op::Pop as u8);
        assert_eq!(Artifact::from_bytes(bytes), Err(ArtifactError::MissingHalt));

        let mut bytes = vec![0; 16];
        bytes[0] = 40;
        bytes.push(Op::Halt as u8);
        assert!(matches!(
            Artifact::from_bytes(bytes),
            Err(ArtifactError::PoolOverflow { pool: 40, .. })
        ));

        let good = Artifact::assemble(header_with_string("a"), &[Op::Nop as u8]);
        assert_eq!(Artifact::from_bytes(good.as_bytes().to_vec()), Ok(good));
    }

    #[test]
    fn test_disassemble_resolves_branches() {
        let mut code = ByteBuffer::new();
        code.add_op(Op::BConstT);
        code.add_op(Op::Brf8);
        code.add_int(1);
        code.add_op(Op::Nop);
        let artifact = Artifact::assemble(vec![0; 16], code.as_bytes());
        let listing = artifact.disassemble();
        assert!(listing.contains("0010  BCONST_T"));
        assert!(listing.contains("BRF_8      1 (-> 001b)"));
        assert!(listing.ends_with("001b  HALT\n"));
    }

    #[test]
    fn test_hex_dump() {
        let artifact = Artifact::assemble(vec![0; 16], &[]);
        assert_eq!(
            artifact.hex_dump(),
            "0000: 00 00 00 00 00 00 00 00 00 00 00 00 00 00 00 00\n0010: 0f\n"
        );
    }
}
