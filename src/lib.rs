//! # dsexec
//!
//! An executor for binary data specifications: compact bytecode programs that
//! describe how to lay out and populate blocks of memory on the cores of a
//! remote accelerator. Running a spec produces concrete memory regions plus a
//! header and pointer table describing where those regions live in target
//! memory, ready for upload.
//!
//! The instruction set covers memory reservation, typed writes, registers and
//! arithmetic, loops and conditionals, reusable structures and constructors,
//! and seeded random data. Generating specs and transporting the constructed
//! image to the hardware are jobs for other tools.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use dsexec::Executor;
//!
//! // Execute a spec against 8 MiB of target memory
//! let mut executor = Executor::from_file("core.spec", 8 * 1024 * 1024)?;
//! executor.execute()?;
//!
//! // Serialize the image: header, pointer table, then the region contents
//! let mut image = Vec::with_capacity(executor.get_constructed_data_size() as usize);
//! executor.append_header(&mut image);
//! executor.append_pointer_table(&mut image, Some(0x6000_0000));
//! # Ok::<(), dsexec::Error>(())
//! ```
//!
//! # Architecture
//!
//! - [`executor`] - the public [`Executor`] and the opcode interpreter
//! - [`commands`] - the opcode set and command-word field decoding
//! - [`region`] - constructed memory regions and the fixed region table
//! - [`structure`] - structure templates and typed elements
//! - [`random`] - seeded generators and distributions
//! - [`file`] - spec sources, the stream [`Parser`], endian primitives
//!
//! Executors are single-shot and self-contained; run one per spec, on as many
//! threads as needed.

#![deny(missing_docs)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

#[macro_use]
mod error;

pub mod commands;
pub mod constants;
pub mod executor;
pub mod file;
pub mod random;
pub mod region;
pub mod structure;

pub use crate::{error::Error, executor::Executor, file::parser::Parser};

/// Convenience alias for all fallible operations in this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Common imports for working with spec execution.
///
/// ```rust
/// use dsexec::prelude::*;
/// ```
pub mod prelude {
    pub use crate::{
        commands::{CommandWord, Commands},
        constants::{APPDATA_MAGIC_NUM, APP_PTR_TABLE_BYTE_SIZE, DSE_VERSION, MAX_MEM_REGIONS},
        region::{MemoryRegion, MemoryRegionReal},
        structure::DataType,
        Error, Executor, Parser, Result,
    };
}
