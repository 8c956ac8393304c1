//! Cursor-based parser over the spec byte stream.
//!
//! The executor decodes the instruction stream through [`Parser`], a simple
//! bounds-checked cursor over a byte slice. Control-flow opcodes reposition
//! the cursor with [`Parser::seek`]; everything else reads forward with
//! [`Parser::read_le`].
//!
//! # Examples
//!
//! ```rust
//! use dsexec::Parser;
//!
//! let data = [0x01, 0x02, 0x03, 0x04];
//! let mut parser = Parser::new(&data);
//!
//! let value = parser.read_le::<u16>()?;
//! assert_eq!(value, 0x0201);
//! assert_eq!(parser.pos(), 2);
//! # Ok::<(), dsexec::Error>(())
//! ```

use crate::{
    file::io::{read_le_at, SpecIO},
    Result,
};

/// A bounds-checked cursor over binary spec data.
///
/// `Parser` maintains a position within a byte slice and provides typed
/// little-endian reads that advance it. All operations validate data
/// availability before reading, so a truncated or corrupted spec surfaces as
/// [`crate::Error::OutOfBounds`] rather than a panic.
pub struct Parser<'a> {
    /// The binary data being parsed
    data: &'a [u8],
    /// Current position within the data buffer
    position: usize,
}

impl<'a> Parser<'a> {
    /// Create a new [`Parser`] from a byte slice.
    #[must_use]
    pub fn new(data: &'a [u8]) -> Self {
        Parser { data, position: 0 }
    }

    /// Returns the length of the underlying data buffer.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns `true` if the parser has no data.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Returns `true` if there is more data available to parse.
    #[must_use]
    pub fn has_more_data(&self) -> bool {
        self.position < self.data.len()
    }

    /// Get the current position of the parser within the data buffer.
    #[must_use]
    pub fn pos(&self) -> usize {
        self.position
    }

    /// Returns the number of bytes remaining from the current position.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.position)
    }

    /// Move the current position to the specified index.
    ///
    /// Positioning at exactly `len()` is allowed; it means the stream is
    /// exhausted, which is how a spec whose last instruction ends flush with
    /// the buffer terminates.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if `pos` is beyond the data length.
    pub fn seek(&mut self, pos: usize) -> Result<()> {
        if pos > self.data.len() {
            return Err(crate::Error::OutOfBounds);
        }

        self.position = pos;
        Ok(())
    }

    /// Move the position forward by the specified number of bytes.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if advancing would exceed the data length.
    pub fn advance_by(&mut self, step: usize) -> Result<()> {
        let end = self
            .position
            .checked_add(step)
            .ok_or(crate::Error::OutOfBounds)?;
        if end > self.data.len() {
            return Err(crate::Error::OutOfBounds);
        }

        self.position = end;
        Ok(())
    }

    /// Read a type `T` from the current position in little-endian format and
    /// advance the position.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if reading would exceed the data length.
    pub fn read_le<T: SpecIO>(&mut self) -> Result<T> {
        read_le_at::<T>(self.data, &mut self.position)
    }

    /// Peek at a value of type `T` in little-endian format without advancing
    /// the position.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if reading `T` would exceed the data length.
    pub fn peek_le<T: SpecIO>(&self) -> Result<T> {
        let mut temp_position = self.position;
        read_le_at::<T>(self.data, &mut temp_position)
    }

    /// Reads a slice of bytes of the specified length from the current
    /// position, advancing past it.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if reading `length` bytes would exceed the data.
    pub fn read_bytes(&mut self, length: usize) -> Result<&'a [u8]> {
        let end = self
            .position
            .checked_add(length)
            .ok_or(crate::Error::OutOfBounds)?;
        if end > self.data.len() {
            return Err(crate::Error::OutOfBounds);
        }

        let bytes = &self.data[self.position..end];
        self.position = end;
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    #[test]
    fn test_sequential_reads() {
        let data = [0x01, 0x00, 0x00, 0x00, 0x02, 0x00, 0x00, 0x00];
        let mut parser = Parser::new(&data);

        assert_eq!(parser.read_le::<u32>().unwrap(), 1);
        assert_eq!(parser.read_le::<u32>().unwrap(), 2);
        assert!(!parser.has_more_data());
        assert!(matches!(parser.read_le::<u32>(), Err(Error::OutOfBounds)));
    }

    #[test]
    fn test_seek() {
        let data = [0x01, 0x02, 0x03, 0x04];
        let mut parser = Parser::new(&data);

        parser.seek(2).unwrap();
        assert_eq!(parser.read_le::<u8>().unwrap(), 0x03);

        // Seeking to the end is legal, past it is not
        parser.seek(4).unwrap();
        assert!(!parser.has_more_data());
        assert!(matches!(parser.seek(5), Err(Error::OutOfBounds)));
    }

    #[test]
    fn test_peek_does_not_advance() {
        let data = [0x01, 0x02, 0x03, 0x04];
        let parser = Parser::new(&data);

        assert_eq!(parser.peek_le::<u32>().unwrap(), 0x0403_0201);
        assert_eq!(parser.pos(), 0);
    }

    #[test]
    fn test_read_bytes() {
        let data = [0x01, 0x02, 0x03, 0x04, 0x05];
        let mut parser = Parser::new(&data);

        assert_eq!(parser.read_bytes(3).unwrap(), &[0x01, 0x02, 0x03]);
        assert_eq!(parser.pos(), 3);
        assert!(parser.read_bytes(3).is_err());
    }

    #[test]
    fn test_advance_by() {
        let data = [0u8; 8];
        let mut parser = Parser::new(&data);
        parser.advance_by(8).unwrap();
        assert_eq!(parser.remaining(), 0);
        assert!(matches!(parser.advance_by(1), Err(Error::OutOfBounds)));
    }
}
