//! Spec execution and memory image serialization.
//!
//! [`Executor`] is the public entry point of the crate: construct one over a
//! spec (in memory or memory-mapped from a file), call
//! [`execute`](Executor::execute) once, then read the constructed regions and
//! serialize the image header and pointer table for upload.
//!
//! # Examples
//!
//! ```rust,no_run
//! use dsexec::Executor;
//!
//! let mut executor = Executor::from_file("spec.bin", 1024 * 1024)?;
//! executor.execute()?;
//!
//! let mut image = Vec::new();
//! executor.append_header(&mut image);
//! executor.append_pointer_table(&mut image, Some(0x6000_0000));
//! # Ok::<(), dsexec::Error>(())
//! ```

mod functions;

use std::path::Path;

use crate::{
    constants::{APPDATA_MAGIC_NUM, APP_PTR_TABLE_BYTE_SIZE, DSE_VERSION, MAX_MEM_REGIONS},
    executor::functions::Functions,
    file::SpecSource,
    region::{MemoryRegion, MemoryRegionCollection},
    Result,
};

/// Executes a data specification against a fixed amount of target memory.
///
/// The executor is single-shot: one spec, executed once, synchronously, to
/// completion or to the first fatal error. A failed execution produces no
/// usable output. Independent executors are fully isolated and may run on
/// separate threads.
pub struct Executor {
    source: SpecSource,
    memory_space: u32,
    regions: MemoryRegionCollection,
}

impl Executor {
    /// An executor over an in-memory spec, with `memory_space` bytes of
    /// target memory available for reservations. Nothing executes until
    /// [`execute`](Self::execute) is called.
    #[must_use]
    pub fn new(spec: Vec<u8>, memory_space: u32) -> Self {
        Executor {
            source: SpecSource::from_bytes(spec),
            memory_space,
            regions: MemoryRegionCollection::new(),
        }
    }

    /// An executor over a spec file, memory-mapped rather than read into a
    /// buffer.
    ///
    /// # Errors
    /// Returns [`crate::Error::FileError`] if the file cannot be opened or
    /// mapped.
    pub fn from_file<P: AsRef<Path>>(path: P, memory_space: u32) -> Result<Self> {
        Ok(Executor {
            source: SpecSource::from_file(path.as_ref())?,
            memory_space,
            regions: MemoryRegionCollection::new(),
        })
    }

    /// Run the spec to its END_SPEC instruction.
    ///
    /// # Errors
    /// Any decoding or semantic failure aborts execution; see
    /// [`crate::Error`] for the taxonomy. There is no partial-success mode:
    /// after an error the constructed regions must not be used.
    pub fn execute(&mut self) -> Result<()> {
        let mut vm = Functions::new(self.source.data(), self.memory_space);
        vm.run()?;
        self.regions = vm.finish();
        Ok(())
    }

    /// The region at `index`, if that slot was populated by the spec.
    #[must_use]
    pub fn get_region(&self, index: usize) -> Option<&MemoryRegion> {
        self.regions.get(index)
    }

    /// Populated region slots in index order.
    pub fn regions(&self) -> impl Iterator<Item = &MemoryRegion> {
        self.regions.iter()
    }

    /// Slot indexes of regions reserved with the referenceable flag.
    #[must_use]
    pub fn referenceable_regions(&self) -> Vec<u8> {
        self.regions
            .iter()
            .filter_map(MemoryRegion::as_real)
            .filter(|region| region.reference().is_some())
            .map(crate::region::MemoryRegionReal::index)
            .collect()
    }

    /// Slot indexes declared as references, whose pointers must be filled in
    /// after execution.
    #[must_use]
    pub fn regions_to_fill(&self) -> Vec<u8> {
        self.regions
            .iter()
            .filter(|region| matches!(region, MemoryRegion::Reference(_)))
            .map(MemoryRegion::index)
            .collect()
    }

    /// Total bytes reserved by the spec, unfilled regions included. The
    /// header and pointer table are not counted.
    #[must_use]
    pub fn total_space_allocated(&self) -> u64 {
        self.regions.total_allocated()
    }

    /// Total bytes the host must transfer to the target: the allocated sizes
    /// of regions that received content. Unfilled regions and regions whose
    /// cursor never moved reserve address space only.
    #[must_use]
    pub fn total_bytes_to_write(&self) -> u64 {
        self.regions.bytes_to_write()
    }

    /// Size of the complete constructed image: header, pointer table, and
    /// every reserved region.
    #[must_use]
    pub fn get_constructed_data_size(&self) -> u64 {
        APP_PTR_TABLE_BYTE_SIZE as u64 + self.regions.total_allocated()
    }

    /// Append the image header: the magic number, then the format version.
    pub fn append_header(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&APPDATA_MAGIC_NUM.to_le_bytes());
        out.extend_from_slice(&DSE_VERSION.to_le_bytes());
    }

    /// Append the pointer table: one start-address word per region slot.
    ///
    /// A populated slot's entry is the offset of its region within the image
    /// (regions are packed after the header and table in index order), plus
    /// `base` when the image's target address is known. Empty slots and
    /// reference slots get a zero entry.
    #[allow(clippy::cast_possible_truncation)]
    pub fn append_pointer_table(&self, out: &mut Vec<u8>, base: Option<u32>) {
        let base = u64::from(base.unwrap_or(0));
        // Offsets accumulate in 64 bits; region sizes near the 4 GiB budget
        // ceiling can carry the running sum past what one entry word holds
        let mut offset = APP_PTR_TABLE_BYTE_SIZE as u64;
        for index in 0..MAX_MEM_REGIONS {
            let entry = match self.regions.get(index).and_then(MemoryRegion::as_real) {
                Some(region) => {
                    let pointer = base.wrapping_add(offset) as u32;
                    offset += region.size() as u64;
                    pointer
                }
                None => 0,
            };
            out.extend_from_slice(&entry.to_le_bytes());
        }
    }

    /// Release the spec source. Constructed regions survive; calling this
    /// more than once is harmless.
    pub fn close(&mut self) {
        self.source.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        constants::{APP_PTR_TABLE_HEADER_SIZE, APP_PTR_TABLE_SIZE},
        file::io::read_le_at,
    };

    #[test]
    fn test_header_layout() {
        let executor = Executor::new(Vec::new(), 0);
        let mut out = Vec::new();
        executor.append_header(&mut out);

        assert_eq!(out.len(), APP_PTR_TABLE_HEADER_SIZE);
        let mut offset = 0;
        assert_eq!(read_le_at::<u32>(&out, &mut offset).unwrap(), 0xAD13_0AD6);
        assert_eq!(read_le_at::<u32>(&out, &mut offset).unwrap(), 0x0001_0000);
    }

    #[test]
    fn test_empty_pointer_table() {
        let executor = Executor::new(Vec::new(), 0);
        let mut out = Vec::new();
        executor.append_pointer_table(&mut out, None);

        assert_eq!(out.len(), APP_PTR_TABLE_SIZE);
        assert!(out.iter().all(|&byte| byte == 0));
    }
}
