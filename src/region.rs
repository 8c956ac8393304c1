//! Memory region model and the fixed-capacity region table.
//!
//! Execution of a spec produces up to [`MAX_MEM_REGIONS`] memory regions.
//! A slot is either a [`MemoryRegionReal`] with storage allocated by RESERVE,
//! or a [`MemoryRegionReference`] declared by REFERENCE, which points at a
//! region owned elsewhere and carries no storage of its own.
//!
//! All write-family bounds and fill checks live here, next to the buffer they
//! protect; the opcode handlers only decode operands and pick the region.

use crate::{constants::MAX_MEM_REGIONS, Result};

/// A region slot with allocated storage.
///
/// The buffer is zero-filled at reservation time. `write_pointer` is the
/// cursor the write-family instructions serialize at; `max_write_pointer` is
/// the high-water mark, raised by writes and by explicit cursor moves, and is
/// what determines how many bytes of the region must reach the target.
#[derive(Debug)]
pub struct MemoryRegionReal {
    index: u8,
    unfilled: bool,
    reference: Option<u32>,
    buffer: Vec<u8>,
    write_pointer: usize,
    max_write_pointer: usize,
    base_address: Option<u32>,
}

impl MemoryRegionReal {
    /// Allocate a zero-filled region of `size` bytes at slot `index`.
    #[must_use]
    pub fn new(index: u8, size: usize, unfilled: bool, reference: Option<u32>) -> Self {
        MemoryRegionReal {
            index,
            unfilled,
            reference,
            buffer: vec![0; size],
            write_pointer: 0,
            max_write_pointer: 0,
            base_address: None,
        }
    }

    /// The slot index this region occupies.
    #[must_use]
    pub fn index(&self) -> u8 {
        self.index
    }

    /// Allocated size in bytes. Always a word multiple.
    #[must_use]
    pub fn size(&self) -> usize {
        self.buffer.len()
    }

    /// Whether the region reserves address space without content.
    #[must_use]
    pub fn is_unfilled(&self) -> bool {
        self.unfilled
    }

    /// The reference id other specs can use to locate this region, if the
    /// region was reserved referenceable.
    #[must_use]
    pub fn reference(&self) -> Option<u32> {
        self.reference
    }

    /// The region contents.
    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.buffer
    }

    /// Current write cursor, in bytes from the region start.
    #[must_use]
    pub fn write_pointer(&self) -> usize {
        self.write_pointer
    }

    /// High-water mark of the cursor.
    #[must_use]
    pub fn max_write_pointer(&self) -> usize {
        self.max_write_pointer
    }

    /// Bytes left between the cursor and the end of the buffer.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.buffer.len() - self.write_pointer
    }

    /// Base address in target memory, once assigned.
    #[must_use]
    pub fn base_address(&self) -> Option<u32> {
        self.base_address
    }

    /// Record where this region will live in target memory.
    pub fn set_base_address(&mut self, address: u32) {
        self.base_address = Some(address);
    }

    fn check_writable(&self, needed: usize) -> Result<()> {
        if self.unfilled {
            return Err(crate::Error::RegionUnfilled(self.index));
        }
        if needed > self.remaining() {
            return Err(crate::Error::NoMoreSpace {
                remaining: self.remaining(),
                needed,
                region: self.index,
            });
        }
        Ok(())
    }

    /// Serialize `bytes` at the cursor, advancing it.
    ///
    /// # Errors
    /// Returns [`crate::Error::RegionUnfilled`] for unfilled regions and
    /// [`crate::Error::NoMoreSpace`] when the bytes do not fit.
    pub fn write_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        self.check_writable(bytes.len())?;

        self.buffer[self.write_pointer..self.write_pointer + bytes.len()].copy_from_slice(bytes);
        self.write_pointer += bytes.len();
        self.max_write_pointer = self.max_write_pointer.max(self.write_pointer);
        Ok(())
    }

    /// Read `width` bytes at the cursor, advancing it.
    ///
    /// # Errors
    /// Returns [`crate::Error::NoMoreSpace`] when fewer than `width` bytes
    /// remain.
    pub fn read_bytes(&mut self, width: usize) -> Result<&[u8]> {
        if width > self.remaining() {
            return Err(crate::Error::NoMoreSpace {
                remaining: self.remaining(),
                needed: width,
                region: self.index,
            });
        }

        let bytes = &self.buffer[self.write_pointer..self.write_pointer + width];
        self.write_pointer += width;
        Ok(bytes)
    }

    /// Move the cursor to `address`, raising the high-water mark.
    ///
    /// The target firmware treats every byte up to the furthest cursor
    /// position as meaningful, whether or not it was written.
    ///
    /// # Errors
    /// Returns [`crate::Error::RegionUnfilled`] for unfilled regions and
    /// [`crate::Error::NoMoreSpace`] when `address` is beyond the allocation.
    pub fn set_write_pointer(&mut self, address: usize) -> Result<()> {
        if self.unfilled {
            return Err(crate::Error::RegionUnfilled(self.index));
        }
        if address > self.buffer.len() {
            return Err(crate::Error::NoMoreSpace {
                remaining: self.buffer.len(),
                needed: address,
                region: self.index,
            });
        }

        self.write_pointer = address;
        self.max_write_pointer = self.max_write_pointer.max(address);
        Ok(())
    }

    /// Copy `length` bytes within the region from `src` to `dest`.
    /// Overlapping ranges behave like `memmove`.
    ///
    /// # Errors
    /// Returns [`crate::Error::RegionUnfilled`] for unfilled regions and
    /// [`crate::Error::NoMoreSpace`] when either range leaves the buffer.
    pub fn block_copy(&mut self, dest: usize, src: usize, length: usize) -> Result<()> {
        if self.unfilled {
            return Err(crate::Error::RegionUnfilled(self.index));
        }
        let end = dest.max(src).saturating_add(length);
        if end > self.buffer.len() {
            return Err(crate::Error::NoMoreSpace {
                remaining: self.buffer.len(),
                needed: end,
                region: self.index,
            });
        }

        self.buffer.copy_within(src..src + length, dest);
        self.max_write_pointer = self.max_write_pointer.max(dest + length);
        Ok(())
    }
}

/// A region slot declared by REFERENCE.
///
/// Carries only the id of the region it aliases; the actual pointer is filled
/// in after execution by whoever resolves references across specs.
#[derive(Debug)]
pub struct MemoryRegionReference {
    index: u8,
    reference: u32,
}

impl MemoryRegionReference {
    /// Declare a reference region at slot `index` aliasing `reference`.
    #[must_use]
    pub fn new(index: u8, reference: u32) -> Self {
        MemoryRegionReference { index, reference }
    }

    /// The slot index this reference occupies.
    #[must_use]
    pub fn index(&self) -> u8 {
        self.index
    }

    /// The id of the region this slot aliases.
    #[must_use]
    pub fn reference(&self) -> u32 {
        self.reference
    }
}

/// One occupied region slot.
#[derive(Debug)]
pub enum MemoryRegion {
    /// Storage-backed region created by RESERVE.
    Real(MemoryRegionReal),
    /// Storage-less alias created by REFERENCE.
    Reference(MemoryRegionReference),
}

impl MemoryRegion {
    /// The slot index of the region.
    #[must_use]
    pub fn index(&self) -> u8 {
        match self {
            MemoryRegion::Real(real) => real.index(),
            MemoryRegion::Reference(reference) => reference.index(),
        }
    }

    /// The real region, if this slot has storage.
    #[must_use]
    pub fn as_real(&self) -> Option<&MemoryRegionReal> {
        match self {
            MemoryRegion::Real(real) => Some(real),
            MemoryRegion::Reference(_) => None,
        }
    }
}

/// Fixed table of [`MAX_MEM_REGIONS`] region slots.
#[derive(Debug, Default)]
pub struct MemoryRegionCollection {
    slots: [Option<MemoryRegion>; MAX_MEM_REGIONS],
}

impl MemoryRegionCollection {
    /// An empty collection.
    #[must_use]
    pub fn new() -> Self {
        MemoryRegionCollection::default()
    }

    /// Occupy a slot.
    ///
    /// # Errors
    /// Returns [`crate::Error::RegionInUse`] if the slot is already occupied.
    pub fn insert(&mut self, region: MemoryRegion) -> Result<()> {
        let index = region.index() as usize;
        if self.slots[index].is_some() {
            return Err(crate::Error::RegionInUse(region.index()));
        }

        self.slots[index] = Some(region);
        Ok(())
    }

    /// Empty a slot, returning what occupied it.
    ///
    /// # Errors
    /// Returns [`crate::Error::RegionNotReserved`] if the slot was empty.
    pub fn remove(&mut self, index: u8) -> Result<MemoryRegion> {
        self.slots[index as usize]
            .take()
            .ok_or(crate::Error::RegionNotReserved(index))
    }

    /// The region at `index`, if the slot is occupied.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&MemoryRegion> {
        self.slots.get(index).and_then(Option::as_ref)
    }

    /// The real region at `index`.
    ///
    /// # Errors
    /// Returns [`crate::Error::RegionNotReserved`] if the slot is empty or
    /// holds a reference region.
    pub fn get_real_mut(&mut self, index: usize) -> Result<&mut MemoryRegionReal> {
        #[allow(clippy::cast_possible_truncation)]
        let id = index as u8;
        match self.slots.get_mut(index).and_then(Option::as_mut) {
            Some(MemoryRegion::Real(real)) => Ok(real),
            _ => Err(crate::Error::RegionNotReserved(id)),
        }
    }

    /// Whether the slot at `index` is unoccupied.
    #[must_use]
    pub fn is_empty(&self, index: usize) -> bool {
        self.get(index).is_none()
    }

    /// Whether the slot holds an unfilled real region.
    #[must_use]
    pub fn is_unfilled(&self, index: usize) -> bool {
        matches!(self.get(index), Some(MemoryRegion::Real(real)) if real.is_unfilled())
    }

    /// Total bytes allocated across all real regions, unfilled included.
    #[must_use]
    pub fn total_allocated(&self) -> u64 {
        self.iter()
            .filter_map(MemoryRegion::as_real)
            .fold(0u64, |total, region| total + region.size() as u64)
    }

    /// Total bytes that must be transferred to the target: allocated sizes of
    /// real regions that carry content. Unfilled regions and regions whose
    /// cursor never moved reserve address space only.
    #[must_use]
    pub fn bytes_to_write(&self) -> u64 {
        self.iter()
            .filter_map(MemoryRegion::as_real)
            .filter(|region| !region.is_unfilled() && region.max_write_pointer() > 0)
            .fold(0u64, |total, region| total + region.size() as u64)
    }

    /// Occupied slots in index order.
    pub fn iter(&self) -> impl Iterator<Item = &MemoryRegion> {
        self.slots.iter().filter_map(Option::as_ref)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    #[test]
    fn test_write_advances_cursor_and_high_water() {
        let mut region = MemoryRegionReal::new(0, 16, false, None);
        region.write_bytes(&[1, 2, 3, 4]).unwrap();
        assert_eq!(region.write_pointer(), 4);
        assert_eq!(region.max_write_pointer(), 4);

        region.set_write_pointer(2).unwrap();
        assert_eq!(region.write_pointer(), 2);
        // Rewinding does not lower the high-water mark
        assert_eq!(region.max_write_pointer(), 4);
    }

    #[test]
    fn test_set_write_pointer_raises_high_water() {
        let mut region = MemoryRegionReal::new(0, 32, false, None);
        region.set_write_pointer(24).unwrap();
        assert_eq!(region.max_write_pointer(), 24);
        assert!(region.set_write_pointer(33).is_err());
    }

    #[test]
    fn test_write_overflow() {
        let mut region = MemoryRegionReal::new(3, 4, false, None);
        let err = region.write_bytes(&[0; 8]).unwrap_err();
        assert!(matches!(
            err,
            Error::NoMoreSpace {
                remaining: 4,
                needed: 8,
                region: 3
            }
        ));
    }

    #[test]
    fn test_unfilled_rejects_writes() {
        let mut region = MemoryRegionReal::new(1, 8, true, None);
        assert!(matches!(
            region.write_bytes(&[0]),
            Err(Error::RegionUnfilled(1))
        ));
        assert!(matches!(
            region.set_write_pointer(4),
            Err(Error::RegionUnfilled(1))
        ));
    }

    #[test]
    fn test_block_copy_overlapping() {
        let mut region = MemoryRegionReal::new(0, 8, false, None);
        region.write_bytes(&[1, 2, 3, 4]).unwrap();
        region.block_copy(2, 0, 4).unwrap();
        assert_eq!(&region.data()[..6], &[1, 2, 1, 2, 3, 4]);
        assert_eq!(region.max_write_pointer(), 6);
    }

    #[test]
    fn test_bytes_to_write_excludes_untouched_regions() {
        let mut regions = MemoryRegionCollection::new();
        let mut written = MemoryRegionReal::new(0, 8, false, None);
        written.write_bytes(&[1]).unwrap();
        regions.insert(MemoryRegion::Real(written)).unwrap();
        // Reserved but never written
        regions
            .insert(MemoryRegion::Real(MemoryRegionReal::new(1, 8, false, None)))
            .unwrap();
        // Unfilled
        regions
            .insert(MemoryRegion::Real(MemoryRegionReal::new(2, 8, true, None)))
            .unwrap();

        assert_eq!(regions.total_allocated(), 24);
        assert_eq!(regions.bytes_to_write(), 8);
    }

    #[test]
    fn test_collection_slot_reuse_is_fatal() {
        let mut regions = MemoryRegionCollection::new();
        regions
            .insert(MemoryRegion::Real(MemoryRegionReal::new(5, 4, false, None)))
            .unwrap();
        let err = regions
            .insert(MemoryRegion::Real(MemoryRegionReal::new(5, 4, false, None)))
            .unwrap_err();
        assert!(matches!(err, Error::RegionInUse(5)));
    }

    #[test]
    fn test_collection_remove_and_queries() {
        let mut regions = MemoryRegionCollection::new();
        regions
            .insert(MemoryRegion::Real(MemoryRegionReal::new(2, 12, true, None)))
            .unwrap();
        regions
            .insert(MemoryRegion::Reference(MemoryRegionReference::new(4, 77)))
            .unwrap();

        assert!(regions.is_unfilled(2));
        assert!(!regions.is_unfilled(4));
        assert_eq!(regions.total_allocated(), 12);
        assert_eq!(regions.bytes_to_write(), 0);
        assert!(regions.get_real_mut(4).is_err());

        regions.remove(2).unwrap();
        assert!(regions.is_empty(2));
        assert!(matches!(regions.remove(2), Err(Error::RegionNotReserved(2))));
    }
}
