//! Opcode set and command-word field extraction.
//!
//! Every instruction in a data specification starts with a 32-bit command
//! word whose bit-fields encode the opcode, the instruction length, register
//! selectors, and per-opcode immediate fields. This module decodes that word;
//! the handlers in [`crate::executor`] interpret the results.
//!
//! The bit layout is part of the versioned wire contract (keyed by
//! [`DSE_VERSION`](crate::constants::DSE_VERSION)) and must not be changed:
//!
//! ```text
//!  31 30 29 28 | 27 .. 20 | 19 | 18 17 16 | 15..12 | 11..8 | 7..4 | 3..0
//!     length   |  opcode  |sign| reg flags|  dest  | src1  | src2 | imm
//! ```
//!
//! Low-byte fields (region index, repeat count, condition code, struct id,
//! relative/unfilled/referenceable flags) overlay the `src2`/`imm` area and
//! are only meaningful for the opcodes that define them.

use bitflags::bitflags;
use strum::{EnumCount, EnumIter, FromRepr};

/// Shift of the length field (instruction words minus one).
const LENGTH_FIELD: u32 = 28;
/// Shift of the opcode field.
const OPCODE_FIELD: u32 = 20;
/// Bit flagging that the destination operand is a register.
const DEST_FLAG: u32 = 18;
/// Bit flagging that the first source operand is a register.
const SRC1_FLAG: u32 = 17;
/// Bit flagging that the second source operand is a register.
const SRC2_FLAG: u32 = 16;
/// Shift of the destination register field.
const DEST_FIELD: u32 = 12;
/// Shift of the first source register field.
const SRC1_FIELD: u32 = 8;
/// Shift of the second source register field.
const SRC2_FIELD: u32 = 4;
/// Bit flagging signed arithmetic in ARITH_OP.
const SIGNED_FLAG: u32 = 19;

const LENGTH_MASK: u32 = 0b11;
const OPCODE_MASK: u32 = 0xFF;
// Register fields are packed at 4-bit strides; a wider mask would bleed the
// dest field's low bit into src1, and src1's into src2
const REGISTER_MASK: u32 = 0b1111;
const REGION_MASK: u32 = 0b1_1111;
const DATA_LEN_MASK: u32 = 0b11;

bitflags! {
    /// Flag bits in the low byte of a RESERVE command word.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct RegionFlags: u32 {
        /// The region reserves address space but receives no content.
        const UNFILLED = 0x80;
        /// The region can be referenced from other regions/specs.
        const REFERENCEABLE = 0x40;
    }
}

/// Set of opcodes for the spec executor.
///
/// The discriminant values come from the data specification language itself;
/// gaps are opcodes that were never assigned or that belong to obsolete
/// revisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, FromRepr, EnumIter, EnumCount)]
#[repr(u8)]
pub enum Commands {
    /// Halts spec execution with an error.
    Break = 0x00,
    /// No operation. Can be used as a filler.
    Nop = 0x01,
    /// Reserves a block of memory ready for filling.
    Reserve = 0x02,
    /// Releases previously reserved memory.
    Free = 0x03,
    /// Declares a region as a reference to another region or spec.
    Reference = 0x04,
    /// Declares a new random number generator.
    DeclareRng = 0x05,
    /// Declares a new random distribution.
    DeclareRandomDist = 0x06,
    /// Draws a random number from the given distribution.
    GetRandomNumber = 0x07,
    /// Begins declaration of a new structure.
    StartStruct = 0x10,
    /// Declares a single element in a structure.
    StructElem = 0x11,
    /// Ends declaration of a new structure.
    EndStruct = 0x12,
    /// Begins definition of a packing specification.
    StartPackspec = 0x1A,
    /// Writes one bit field inside a single parameter.
    PackParam = 0x1B,
    /// Ends definition of a packing specification.
    EndPackspec = 0x1C,
    /// Begins definition of a function to write data structures to memory.
    StartConstructor = 0x20,
    /// Ends definition of the write function.
    EndConstructor = 0x25,
    /// Invokes a constructor to build a data structure.
    Construct = 0x40,
    /// Performs a simple read operation.
    Read = 0x41,
    /// Performs a simple write or block write operation.
    Write = 0x42,
    /// Performs a write from an array.
    WriteArray = 0x43,
    /// Performs a write from a predefined structure.
    WriteStruct = 0x44,
    /// Copies a block of data from one place to another.
    BlockCopy = 0x45,
    /// Swaps between reserved memory regions.
    SwitchFocus = 0x50,
    /// Sets up a counting loop.
    Loop = 0x51,
    /// Early exit from the innermost loop.
    BreakLoop = 0x52,
    /// Ends a loop body.
    EndLoop = 0x53,
    /// Executes the following instructions only if a condition holds.
    If = 0x55,
    /// Else clause for the associated IF.
    Else = 0x56,
    /// Closes a block of instructions begun with IF.
    EndIf = 0x57,
    /// Places a value in a register, from an immediate or another register.
    Mv = 0x60,
    /// Copies the current write address to a register.
    GetWrPtr = 0x63,
    /// Moves the write pointer to a new location.
    SetWrPtr = 0x64,
    /// Moves the write pointer up to a given address granularity.
    AlignWrPtr = 0x65,
    /// Performs an arithmetic operation.
    ArithOp = 0x67,
    /// Performs a logical operation.
    LogicOp = 0x68,
    /// Creates an identical copy of a structure.
    CopyStruct = 0x70,
    /// Copies a parameter from one structure to another.
    CopyParam = 0x71,
    /// Modifies a single parameter in a structure.
    WriteParam = 0x72,
    /// Loads the value of a structure parameter into a register.
    ReadParam = 0x73,
    /// Modifies a bit-field component of a structure parameter.
    WriteParamComponent = 0x74,
    /// Outputs the value of a register to the log.
    PrintVal = 0x80,
    /// Prints a text string to the log.
    PrintTxt = 0x81,
    /// Prints the current state of one structure to the log.
    PrintStruct = 0x82,
    /// Cleanly ends the parsing of the data spec.
    EndSpec = 0xFF,
}

/// A decoded 32-bit command word.
///
/// Wraps the raw word and exposes the packed fields. Field accessors never
/// fail; whether a field is meaningful is decided by the opcode's handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandWord(pub u32);

impl CommandWord {
    /// The raw command word.
    #[must_use]
    pub fn raw(self) -> u32 {
        self.0
    }

    /// The opcode, if the opcode byte maps to a known command.
    #[must_use]
    pub fn command(self) -> Option<Commands> {
        #[allow(clippy::cast_possible_truncation)]
        Commands::from_repr(((self.0 >> OPCODE_FIELD) & OPCODE_MASK) as u8)
    }

    /// The raw opcode byte.
    #[must_use]
    pub fn opcode(self) -> u8 {
        #[allow(clippy::cast_possible_truncation)]
        let op = ((self.0 >> OPCODE_FIELD) & OPCODE_MASK) as u8;
        op
    }

    /// Total instruction length in words, including the command word itself.
    #[must_use]
    pub fn length_words(self) -> usize {
        (((self.0 >> LENGTH_FIELD) & LENGTH_MASK) + 1) as usize
    }

    /// Number of trailing operand words.
    #[must_use]
    pub fn operand_words(self) -> usize {
        self.length_words() - 1
    }

    /// The destination register, or `None` when the dest operand is not a
    /// register.
    #[must_use]
    pub fn dest_register(self) -> Option<usize> {
        if self.0 & (1 << DEST_FLAG) != 0 {
            Some(((self.0 >> DEST_FIELD) & REGISTER_MASK) as usize)
        } else {
            None
        }
    }

    /// The first source register, or `None` when src1 is not a register.
    #[must_use]
    pub fn src1_register(self) -> Option<usize> {
        if self.0 & (1 << SRC1_FLAG) != 0 {
            Some(((self.0 >> SRC1_FIELD) & REGISTER_MASK) as usize)
        } else {
            None
        }
    }

    /// The second source register, or `None` when src2 is not a register.
    #[must_use]
    pub fn src2_register(self) -> Option<usize> {
        if self.0 & (1 << SRC2_FLAG) != 0 {
            Some(((self.0 >> SRC2_FIELD) & REGISTER_MASK) as usize)
        } else {
            None
        }
    }

    /// The raw dest field value regardless of the register flag.
    #[must_use]
    pub fn dest_field(self) -> usize {
        ((self.0 >> DEST_FIELD) & REGISTER_MASK) as usize
    }

    /// The raw src1 field value regardless of the register flag.
    #[must_use]
    pub fn src1_field(self) -> usize {
        ((self.0 >> SRC1_FIELD) & REGISTER_MASK) as usize
    }

    /// The raw src2 field value regardless of the register flag.
    #[must_use]
    pub fn src2_field(self) -> usize {
        ((self.0 >> SRC2_FIELD) & REGISTER_MASK) as usize
    }

    /// Width in bytes of the data handled by a WRITE-family instruction.
    #[must_use]
    pub fn data_length(self) -> usize {
        1 << ((self.0 >> DEST_FIELD) & DATA_LEN_MASK)
    }

    /// The region index field (bits 0-4).
    #[must_use]
    pub fn region(self) -> u8 {
        #[allow(clippy::cast_possible_truncation)]
        let region = (self.0 & REGION_MASK) as u8;
        region
    }

    /// RESERVE flag bits from the low byte.
    #[must_use]
    pub fn region_flags(self) -> RegionFlags {
        RegionFlags::from_bits_truncate(self.0)
    }

    /// Whether the signed-arithmetic bit is set.
    #[must_use]
    pub fn is_signed(self) -> bool {
        self.0 & (1 << SIGNED_FLAG) != 0
    }

    /// Whether the relative-addressing bit is set (SET_WR_PTR).
    #[must_use]
    pub fn is_relative(self) -> bool {
        self.0 & 0x01 != 0
    }

    /// The repeat-count field (bits 0-7), used by WRITE and PRINT_TXT.
    #[must_use]
    pub fn repeats(self) -> u32 {
        self.0 & 0xFF
    }

    /// The immediate id field (bits 0-3): struct, constructor, packspec,
    /// RNG or distribution slot, or IF condition code.
    #[must_use]
    pub fn id(self) -> u8 {
        #[allow(clippy::cast_possible_truncation)]
        let id = (self.0 & 0x0F) as u8;
        id
    }

    /// Secondary id field (bits 4-7): RNG id in DECLARE_RANDOM_DIST.
    #[must_use]
    pub fn id2(self) -> u8 {
        #[allow(clippy::cast_possible_truncation)]
        let id = ((self.0 >> 4) & 0x0F) as u8;
        id
    }

    /// Tertiary id field (bits 8-11): distribution kind in DECLARE_RANDOM_DIST,
    /// element index low bits in the struct parameter opcodes.
    #[must_use]
    pub fn id3(self) -> u8 {
        #[allow(clippy::cast_possible_truncation)]
        let id = ((self.0 >> 8) & 0x0F) as u8;
        id
    }

    /// Struct element index (bits 4-11), used by the parameter opcodes.
    #[must_use]
    pub fn element_index(self) -> usize {
        ((self.0 >> 4) & 0xFF) as usize
    }
}

/// Comparison codes used by the IF instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromRepr)]
#[repr(u8)]
pub enum Condition {
    /// Left operand equals right operand.
    Equal = 0,
    /// Left operand differs from right operand.
    NotEqual = 1,
    /// Left operand is less than or equal to right operand.
    LessThanOrEqual = 2,
    /// Left operand is less than right operand.
    LessThan = 3,
    /// Left operand is greater than or equal to right operand.
    GreaterThanOrEqual = 4,
    /// Left operand is greater than right operand.
    GreaterThan = 5,
}

impl Condition {
    /// Evaluate the condition over two register-sized values.
    #[must_use]
    pub fn evaluate(self, left: i64, right: i64) -> bool {
        match self {
            Condition::Equal => left == right,
            Condition::NotEqual => left != right,
            Condition::LessThanOrEqual => left <= right,
            Condition::LessThan => left < right,
            Condition::GreaterThanOrEqual => left >= right,
            Condition::GreaterThan => left > right,
        }
    }
}

/// Operation codes used by ARITH_OP.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromRepr)]
#[repr(u8)]
pub enum ArithOperation {
    /// Addition.
    Add = 0,
    /// Subtraction.
    Subtract = 1,
    /// Multiplication.
    Multiply = 2,
    /// Division. Division by zero is fatal.
    Divide = 3,
    /// Modulo. Modulo by zero is fatal.
    Modulo = 4,
}

/// Operation codes used by LOGIC_OP.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromRepr)]
#[repr(u8)]
pub enum LogicOperation {
    /// Logical shift left.
    LeftShift = 0,
    /// Logical shift right.
    RightShift = 1,
    /// Bitwise or.
    Or = 2,
    /// Bitwise and.
    And = 3,
    /// Bitwise exclusive or.
    Xor = 4,
    /// Bitwise complement of the first operand; the second is ignored.
    Not = 5,
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn test_opcode_roundtrip() {
        for cmd in Commands::iter() {
            let word = CommandWord((cmd as u32) << 20);
            assert_eq!(word.command(), Some(cmd));
        }
    }

    #[test]
    fn test_unknown_opcode() {
        // 0x99 was never assigned
        let word = CommandWord(0x099 << 20);
        assert_eq!(word.command(), None);
        assert_eq!(word.opcode(), 0x99);
    }

    #[test]
    fn test_length_field() {
        assert_eq!(CommandWord(0x0000_0000).length_words(), 1);
        assert_eq!(CommandWord(0x1000_0000).length_words(), 2);
        assert_eq!(CommandWord(0x3000_0000).length_words(), 4);
    }

    #[test]
    fn test_register_fields() {
        // dest flag + dest=5, src1 flag + src1=3
        let word = CommandWord((1 << 18) | (5 << 12) | (1 << 17) | (3 << 8));
        assert_eq!(word.dest_register(), Some(5));
        assert_eq!(word.src1_register(), Some(3));
        assert_eq!(word.src2_register(), None);
    }

    #[test]
    fn test_adjacent_register_fields_do_not_overlap() {
        // Odd register values set the low bit of their field, which sits
        // directly above the next field; each extraction must stay 4 bits
        let word =
            CommandWord((1 << 18) | (3 << 12) | (1 << 17) | (2 << 8) | (1 << 16) | (7 << 4));
        assert_eq!(word.dest_register(), Some(3));
        assert_eq!(word.src1_register(), Some(2));
        assert_eq!(word.src2_register(), Some(7));
        assert_eq!(word.dest_field(), 3);
        assert_eq!(word.src1_field(), 2);
        assert_eq!(word.src2_field(), 7);
    }

    #[test]
    fn test_data_length_selector() {
        assert_eq!(CommandWord(0 << 12).data_length(), 1);
        assert_eq!(CommandWord(1 << 12).data_length(), 2);
        assert_eq!(CommandWord(2 << 12).data_length(), 4);
        assert_eq!(CommandWord(3 << 12).data_length(), 8);
    }

    #[test]
    fn test_region_flags() {
        let word = CommandWord(0x80 | 0x40 | 3);
        assert_eq!(word.region(), 3);
        assert!(word.region_flags().contains(RegionFlags::UNFILLED));
        assert!(word.region_flags().contains(RegionFlags::REFERENCEABLE));
    }

    #[test]
    fn test_condition_evaluation() {
        assert!(Condition::Equal.evaluate(4, 4));
        assert!(Condition::NotEqual.evaluate(4, 5));
        assert!(Condition::LessThan.evaluate(-1, 0));
        assert!(Condition::GreaterThanOrEqual.evaluate(0, 0));
        assert!(!Condition::GreaterThan.evaluate(0, 0));
    }
}
