use thiserror::Error;

macro_rules! malformed_error {
    // Single string version
    ($msg:expr) => {
        crate::Error::Malformed {
            message: $msg.to_string(),
            file: file!(),
            line: line!(),
        }
    };

    // Format string with arguments version
    ($fmt:expr, $($arg:tt)*) => {
        crate::Error::Malformed {
            message: format!($fmt, $($arg)*),
            file: file!(),
            line: line!(),
        }
    };
}

/// The generic Error type, which provides coverage for all errors this library can potentially
/// return.
///
/// The taxonomy follows the failure modes of spec execution: format errors in
/// the instruction stream (always fatal), resource errors raised by individual
/// operations (always fatal, no partial-success mode), and I/O errors reading
/// the spec source (propagated as-is). A failed execution produces no usable
/// output; callers must discard the executor after any error from
/// [`execute`](crate::Executor::execute).
#[derive(Error, Debug)]
pub enum Error {
    /// An out of bound read was attempted while decoding the spec stream.
    ///
    /// This occurs when an instruction claims more operand words than the
    /// stream contains, or the stream ends without an END_SPEC instruction.
    #[error("Out of Bound read would have occurred!")]
    OutOfBounds,

    /// The spec stream is damaged and could not be interpreted.
    ///
    /// The error includes the source location where the malformation was
    /// detected for debugging purposes.
    #[error("Malformed - {file}:{line}: {message}")]
    Malformed {
        /// The message to be printed for the Malformed error
        message: String,
        /// The source file in which this error occured
        file: &'static str,
        /// The source line in which this error occured
        line: u32,
    },

    /// The command word decodes to an opcode this executor does not know.
    ///
    /// Identifies the raw command word and the byte offset at which it was
    /// read, so the offending instruction can be located in the spec.
    #[error("Unimplemented command {command:#010X} at offset {offset}")]
    UnimplementedCommand {
        /// The raw 32-bit command word
        command: u32,
        /// Byte offset of the command word within the spec
        offset: usize,
    },

    /// A BREAK instruction was executed.
    ///
    /// BREAK halts the whole execution with an error, by design; it is how a
    /// generator plants an explicit trap in a spec.
    #[error("BREAK instruction reached at offset {offset}")]
    ExecuteBreak {
        /// Byte offset of the BREAK command word
        offset: usize,
    },

    /// RESERVE was applied to a region slot that is already occupied.
    #[error("Region {0} was already reserved")]
    RegionInUse(u8),

    /// An operation referenced a region slot that was never reserved.
    #[error("Region {0} has not been reserved")]
    RegionNotReserved(u8),

    /// A write-family operation ran with no region in focus.
    #[error("No current region has been selected")]
    NoRegionSelected,

    /// A write-family operation targeted an unfilled region.
    ///
    /// Unfilled regions reserve address space only; their content is left for
    /// the target hardware. Writing to one is always fatal.
    #[error("Region {0} is marked unfilled and cannot be written")]
    RegionUnfilled(u8),

    /// A write would run past the end of the focused region's buffer.
    #[error("Region {region} has {remaining} bytes left but {needed} were required")]
    NoMoreSpace {
        /// Bytes left between the cursor and the end of the region
        remaining: usize,
        /// Bytes the operation needed
        needed: usize,
        /// Index of the focused region
        region: u8,
    },

    /// RESERVE would exceed the total memory available on the target.
    #[error("Allocation of {requested} bytes exceeds the remaining budget of {remaining}")]
    MemoryLimitExceeded {
        /// Rounded-up size of the rejected reservation
        requested: u64,
        /// Budget left before the reservation
        remaining: u64,
    },

    /// ARITH_OP attempted a division or modulo by zero.
    #[error("Division by zero in arithmetic operation")]
    DivideByZero,

    /// ALIGN_WR_PTR was given an unsupported boundary.
    #[error("Cannot align write pointer to 2^{0} bytes")]
    InvalidAlignment(u32),

    /// An operation referenced a struct slot that was never declared.
    #[error("Structure {0} has not been declared")]
    NoSuchStruct(u8),

    /// An operation referenced a struct element that does not exist.
    #[error("Structure {structure} has no element {element}")]
    NoSuchElement {
        /// The struct slot that was addressed
        structure: u8,
        /// The element index that was out of range
        element: usize,
    },

    /// CONSTRUCT referenced a constructor that was never declared.
    #[error("Constructor {0} has not been declared")]
    NoSuchConstructor(u8),

    /// An operation referenced an RNG slot that was never declared.
    #[error("Random number generator {0} has not been declared")]
    NoSuchRng(u8),

    /// GET_RANDOM_NUMBER referenced a distribution that was never declared.
    #[error("Random distribution {0} has not been declared")]
    NoSuchDistribution(u8),

    /// Loop/conditional/constructor nesting exceeded the fixed bound.
    #[error("Nesting of control structures exceeds the limit of {0}")]
    NestingLimit(usize),

    /// File I/O error reading the spec source.
    ///
    /// Wraps standard I/O errors from opening or mapping the spec file.
    /// Retrying is the caller's concern, never the executor's.
    #[error("{0}")]
    FileError(#[from] std::io::Error),
}
