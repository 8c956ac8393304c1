//! Fixed constants of the data specification binary contract.
//!
//! These values are shared between the generator that emits specs, this
//! executor, and the firmware that consumes the constructed memory image.
//! None of them are tunable; changing any of them breaks interoperability
//! with deployed hardware.

/// Bytes per word. All stream operands and table entries are 32-bit words.
pub const WORD_SIZE: usize = 4;

/// Bytes per double word, used by 64-bit WRITE payloads.
pub const DOUBLE_WORD_SIZE: usize = 8;

/// Magic number marking a block of target memory as application data
/// produced by this executor.
pub const APPDATA_MAGIC_NUM: u32 = 0xAD13_0AD6;

/// Version of the memory image layout produced by the executor.
pub const DSE_VERSION: u32 = 0x0001_0000;

/// The number of registers in the executor model.
pub const MAX_REGISTERS: usize = 16;

/// The number of memory regions in the executor model.
pub const MAX_MEM_REGIONS: usize = 32;

/// The number of structure slots in the executor model.
pub const MAX_STRUCT_SLOTS: usize = 16;

/// The maximum number of elements in a single structure.
pub const MAX_STRUCT_ELEMENTS: usize = 255;

/// The number of packing specification slots in the executor model.
pub const MAX_PACKSPEC_SLOTS: usize = 16;

/// The number of constructor (reusable sub-procedure) slots.
pub const MAX_CONSTRUCTORS: usize = 16;

/// The number of basic random number generators.
pub const MAX_RNGS: usize = 16;

/// The number of random number distributions.
pub const MAX_RANDOM_DISTS: usize = 16;

/// Bound on nesting of LOOP/IF/CONSTRUCT frames. The wire format bounds all
/// other tables to 16 slots; control nesting follows the same bound so the
/// control stack can never grow without limit.
pub const MAX_NESTED_BLOCKS: usize = 16;

/// The size of the image header: two words (magic number, version).
pub const APP_PTR_TABLE_HEADER_SIZE: usize = 2 * WORD_SIZE;

/// The size of the pointer table proper: one start-address word per region
/// slot, in index order.
pub const APP_PTR_TABLE_SIZE: usize = MAX_MEM_REGIONS * WORD_SIZE;

/// The combined size of the header and pointer table, in bytes. Region
/// contents start at this offset within the constructed image.
pub const APP_PTR_TABLE_BYTE_SIZE: usize = APP_PTR_TABLE_HEADER_SIZE + APP_PTR_TABLE_SIZE;

/// The operand value END_SPEC must carry to terminate execution.
pub const END_SPEC_SENTINEL: i32 = -1;
