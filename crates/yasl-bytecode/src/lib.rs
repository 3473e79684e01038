//! YASL bytecode - instruction set, byte emitter and artifact format.
//!
//! Every multi-byte operand is 8 bytes, little endian.

pub mod artifact;
pub mod emitter;
pub mod opcode;

pub use artifact::{disassemble, Artifact, ArtifactError, HEADER_PREFIX_LEN};
pub use emitter::{read_float, read_int, ByteBuffer};
pub use opcode::{Op, OPERAND_WIDTH};
