//! YASL opcode definitions.
//!
//! Opcodes are organized by category. Each instruction is a single opcode
//! byte followed by either no operand or one 8-byte little-endian operand.

use std::fmt;

/// Width in bytes of every multi-byte operand.
pub const OPERAND_WIDTH: usize = 8;

/// Bytecode opcodes for the YASL VM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Op {
    // =========================================================================
    // Execution Control (0x0B-0x0F)
    // =========================================================================
    /// Stop execution successfully.
    Halt = 0x0F,
    /// No operation.
    Nop = 0x0E,
    /// Pop and print the top of the stack.
    Print = 0x0D,
    /// Discard the top of the stack.
    Pop = 0x0C,
    /// Duplicate the top of the stack.
    Dup = 0x0B,

    // =========================================================================
    // Literals (0x01-0x09)
    // =========================================================================
    /// Push undef.
    NConst = 0x01,
    /// Push false.
    BConstF = 0x02,
    /// Push true.
    BConstT = 0x03,
    /// Push the 8-byte integer operand.
    IConst = 0x04,
    /// Push the 8-byte float operand.
    DConst = 0x05,
    /// Push NaN.
    DConstN = 0x06,
    /// Push positive infinity.
    DConstI = 0x07,
    /// Push a new string read from the header at the operand offset.
    NewStr = 0x08,
    /// Push a function whose chunk starts at the operand header offset.
    FConst = 0x09,

    // =========================================================================
    // Variables (0x10-0x1F)
    // =========================================================================
    /// Push global slot.
    GLoad = 0x10,
    /// Pop into global slot.
    GStore = 0x11,
    /// Push local slot, relative to the frame pointer.
    LLoad = 0x12,
    /// Pop into local slot, relative to the frame pointer.
    LStore = 0x13,

    // =========================================================================
    // Arithmetic (0x20-0x2F)
    // =========================================================================
    Add = 0x20,
    Sub = 0x21,
    Mul = 0x22,
    /// Float division (`/`).
    FDiv = 0x23,
    /// Integer division (`//`).
    IDiv = 0x24,
    Mod = 0x25,
    Exp = 0x26,
    Neg = 0x27,

    // =========================================================================
    // Bitwise (0x30-0x3F)
    // =========================================================================
    BAnd = 0x30,
    BOr = 0x31,
    BXor = 0x32,
    /// `a & ^b`.
    BAndNot = 0x33,
    BNot = 0x34,
    /// Shift left.
    Bsl = 0x35,
    /// Shift right.
    Bsr = 0x36,

    // =========================================================================
    // Comparison and Logic (0x40-0x4F)
    // =========================================================================
    /// Structural equality.
    Eq = 0x40,
    /// Identity.
    Id = 0x41,
    Gt = 0x42,
    Ge = 0x43,
    /// Logical negation of truthiness.
    Not = 0x44,

    // =========================================================================
    // Strings and Collections (0x50-0x5F)
    // =========================================================================
    /// String concatenation.
    Cnct = 0x50,
    Len = 0x51,
    /// Mark the start of a list or table literal.
    End = 0x52,
    /// Collect values down to the last mark into a list.
    NewList = 0x53,
    /// Collect key/value pairs down to the last mark into a table.
    NewTable = 0x54,
    /// Pop key and collection, push the element.
    Get = 0x55,
    /// Pop value, key and collection, store, push the value back.
    Set = 0x56,

    // =========================================================================
    // Branches (0x60-0x6F)
    // =========================================================================
    /// Unconditional relative branch.
    Br8 = 0x60,
    /// Pop and branch if falsy.
    Brf8 = 0x61,
    /// Pop and branch if truthy.
    Brt8 = 0x62,
    /// Pop and branch if not undef.
    Brn8 = 0x63,

    // =========================================================================
    // Calls (0x70-0x7F)
    // =========================================================================
    /// Mark the callee below the arguments.
    InitCall = 0x70,
    /// Pop the receiver, push the named method and the receiver.
    InitMCall = 0x71,
    /// Call the callee marked by the last `InitCall`/`InitMCall`.
    Call = 0x72,
    /// Return from the current function.
    Ret = 0x73,

    // =========================================================================
    // Iteration (0x80-0x8F)
    // =========================================================================
    /// Pop a collection and open an iterator over it.
    InitFor = 0x80,
    /// Push the next value and true, or false when exhausted.
    Iter = 0x81,
    /// Close the iterator of a `for` loop.
    EndFor = 0x82,
    /// Close the iterator of a comprehension.
    EndComp = 0x83,
}

impl Op {
    /// All opcodes, used for decoding.
    pub const ALL: [Op; 57] = [
        Op::Halt,
        Op::Nop,
        Op::Print,
        Op::Pop,
        Op::Dup,
        Op::NConst,
        Op::BConstF,
        Op::BConstT,
        Op::IConst,
        Op::DConst,
        Op::DConstN,
        Op::DConstI,
        Op::NewStr,
        Op::FConst,
        Op::GLoad,
        Op::GStore,
        Op::LLoad,
        Op::LStore,
        Op::Add,
        Op::Sub,
        Op::Mul,
        Op::FDiv,
        Op::IDiv,
        Op::Mod,
        Op::Exp,
        Op::Neg,
        Op::BAnd,
        Op::BOr,
        Op::BXor,
        Op::BAndNot,
        Op::BNot,
        Op::Bsl,
        Op::Bsr,
        Op::Eq,
        Op::Id,
        Op::Gt,
        Op::Ge,
        Op::Not,
        Op::Cnct,
        Op::Len,
        Op::End,
        Op::NewList,
        Op::NewTable,
        Op::Get,
        Op::Set,
        Op::Br8,
        Op::Brf8,
        Op::Brt8,
        Op::Brn8,
        Op::InitCall,
        Op::InitMCall,
        Op::Call,
        Op::Ret,
        Op::InitFor,
        Op::Iter,
        Op::EndFor,
        Op::EndComp,
    ];

    /// Decode an opcode byte.
    pub fn from_byte(byte: u8) -> Option<Op> {
        Op::ALL.iter().copied().find(|op| *op as u8 == byte)
    }

    /// Number of operand bytes following this opcode.
    pub fn operand_width(self) -> usize {
        match self {
            Op::IConst
            | Op::DConst
            | Op::NewStr
            | Op::FConst
            | Op::GLoad
            | Op::GStore
            | Op::LLoad
            | Op::LStore
            | Op::Br8
            | Op::Brf8
            | Op::Brt8
            | Op::Brn8
            | Op::InitMCall => OPERAND_WIDTH,
            _ => 0,
        }
    }

    /// Whether the operand is a relative branch distance.
    pub fn is_branch(self) -> bool {
        matches!(self, Op::Br8 | Op::Brf8 | Op::Brt8 | Op::Brn8)
    }

    /// Assembly mnemonic.
    pub fn mnemonic(self) -> &'static str {
        match self {
            Op::Halt => "HALT",
            Op::Nop => "NOP",
            Op::Print => "PRINT",
            Op::Pop => "POP",
            Op::Dup => "DUP",
            Op::NConst => "NCONST",
            Op::BConstF => "BCONST_F",
            Op::BConstT => "BCONST_T",
            Op::IConst => "ICONST",
            Op::DConst => "DCONST",
            Op::DConstN => "DCONST_N",
            Op::DConstI => "DCONST_I",
            Op::NewStr => "NEWSTR",
            Op::FConst => "FCONST",
            Op::GLoad => "GLOAD",
            Op::GStore => "GSTORE",
            Op::LLoad => "LLOAD",
            Op::LStore => "LSTORE",
            Op::Add => "ADD",
            Op::Sub => "SUB",
            Op::Mul => "MUL",
            Op::FDiv => "FDIV",
            Op::IDiv => "IDIV",
            Op::Mod => "MOD",
            Op::Exp => "EXP",
            Op::Neg => "NEG",
            Op::BAnd => "BAND",
            Op::BOr => "BOR",
            Op::BXor => "BXOR",
            Op::BAndNot => "BANDNOT",
            Op::BNot => "BNOT",
            Op::Bsl => "BSL",
            Op::Bsr => "BSR",
            Op::Eq => "EQ",
            Op::Id => "ID",
            Op::Gt => "GT",
            Op::Ge => "GE",
            Op::Not => "NOT",
            Op::Cnct => "CNCT",
            Op::Len => "LEN",
            Op::End => "END",
            Op::NewList => "NEWLIST",
            Op::NewTable => "NEWTABLE",
            Op::Get => "GET",
            Op::Set => "SET",
            Op::Br8 => "BR_8",
            Op::Brf8 => "BRF_8",
            Op::Brt8 => "BRT_8",
            Op::Brn8 => "BRN_8",
            Op::InitCall => "INIT_CALL",
            Op::InitMCall => "INIT_MCALL",
            Op::Call => "CALL",
            Op::Ret => "RET",
            Op::InitFor => "INITFOR",
            Op::Iter => "ITER_1",
            Op::EndFor => "ENDFOR",
            Op::EndComp => "ENDCOMP",
        }
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.mnemonic())
    }
}

impl From<Op> for u8 {
    fn from(op: Op) -> u8 {
        op as u8
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_operand_width() {
        assert_eq!(Op::Halt.operand_width(), 0);
        assert_eq!(Op::Add.operand_width(), 0);
        assert_eq!(Op::IConst.operand_width(), 8);
        assert_eq!(Op::GStore.operand_width(), 8);
        assert_eq!(Op::Brf8.operand_width(), 8);
        assert_eq!(Op::InitMCall.operand_width(), 8);
    }

    #[test]
    fn test_from_byte() {
        for op in Op::ALL {
            assert_eq!(Op::from_byte(op as u8), Some(op));
        }
        assert_eq!(Op::from_byte(0x00), None);
        assert_eq!(Op::from_byte(0xFF), None);
    }

    #[test]
    fn test_opcodes_are_distinct() {
        let bytes: HashSet<u8> = Op::ALL.iter().map(|op| *op as u8).collect();
        assert_eq!(bytes.len(), Op::ALL.len());
    }

    #[test]
    fn test_display() {
        assert_eq!(format!("{}", Op::BConstT), "BCONST_T");
        assert_eq!(format!("{}", Op::Brn8), "BRN_8");
        assert_eq!(format!("{}", Op::InitMCall), "INIT_MCALL");
    }
}
