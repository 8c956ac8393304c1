//! Structure templates declared by the struct opcode family.
//!
//! A structure is an ordered list of typed elements with current values.
//! START_STRUCT/STRUCT_ELEM/END_STRUCT declare one into a fixed table of
//! [`MAX_STRUCT_SLOTS`] slots; WRITE_STRUCT serializes it to the focused
//! region, and the parameter opcodes mutate or read individual elements.

use strum::FromRepr;

use crate::{
    constants::{MAX_STRUCT_ELEMENTS, MAX_STRUCT_SLOTS},
    Result,
};

/// Element types a structure can hold.
///
/// The code's low two bits select the width (1 << bits); bit 2 selects
/// signedness. Values are stored widened to `i64` and truncated to the
/// declared width at serialization time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromRepr)]
#[repr(u8)]
pub enum DataType {
    /// Unsigned 8-bit integer.
    U8 = 0,
    /// Unsigned 16-bit integer.
    U16 = 1,
    /// Unsigned 32-bit integer.
    U32 = 2,
    /// Unsigned 64-bit integer.
    U64 = 3,
    /// Signed 8-bit integer.
    I8 = 4,
    /// Signed 16-bit integer.
    I16 = 5,
    /// Signed 32-bit integer.
    I32 = 6,
    /// Signed 64-bit integer.
    I64 = 7,
}

impl DataType {
    /// Width of the type in bytes.
    #[must_use]
    pub fn width(self) -> usize {
        1 << ((self as u8) & 0b11)
    }
}

/// A single typed element of a structure.
#[derive(Debug, Clone)]
pub struct StructElement {
    data_type: DataType,
    value: i64,
}

impl StructElement {
    /// A new element holding `value` as its default.
    #[must_use]
    pub fn new(data_type: DataType, value: i64) -> Self {
        StructElement { data_type, value }
    }

    /// The declared type of the element.
    #[must_use]
    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    /// The current value, widened to a register.
    #[must_use]
    pub fn value(&self) -> i64 {
        self.value
    }

    /// Replace the current value.
    pub fn set_value(&mut self, value: i64) {
        self.value = value;
    }

    /// Serialize the current value at the declared width, little-endian.
    pub fn append_to(&self, out: &mut Vec<u8>) {
        #[allow(clippy::cast_possible_truncation)]
        match self.data_type.width() {
            1 => out.extend_from_slice(&(self.value as u8).to_le_bytes()),
            2 => out.extend_from_slice(&(self.value as u16).to_le_bytes()),
            4 => out.extend_from_slice(&(self.value as u32).to_le_bytes()),
            _ => out.extend_from_slice(&self.value.to_le_bytes()),
        }
    }
}

/// A declared structure: an ordered element list.
#[derive(Debug, Clone, Default)]
pub struct StructDef {
    elements: Vec<StructElement>,
}

impl StructDef {
    /// A structure with no elements yet.
    #[must_use]
    pub fn new() -> Self {
        StructDef::default()
    }

    /// Append one element to the declaration.
    ///
    /// # Errors
    /// Returns a format error once [`MAX_STRUCT_ELEMENTS`] is exceeded.
    pub fn push(&mut self, element: StructElement) -> Result<()> {
        if self.elements.len() >= MAX_STRUCT_ELEMENTS {
            return Err(malformed_error!(
                "structure exceeds {} elements",
                MAX_STRUCT_ELEMENTS
            ));
        }

        self.elements.push(element);
        Ok(())
    }

    /// Number of declared elements.
    #[must_use]
    pub fn len(&self) -> usize {
        self.elements.len()
    }

    /// Whether the structure has no elements.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    /// Serialized size of the structure in bytes.
    #[must_use]
    pub fn byte_size(&self) -> usize {
        self.elements
            .iter()
            .map(|element| element.data_type().width())
            .sum()
    }

    /// The element at `index`, if declared.
    #[must_use]
    pub fn element(&self, index: usize) -> Option<&StructElement> {
        self.elements.get(index)
    }

    /// Mutable access to the element at `index`, if declared.
    #[must_use]
    pub fn element_mut(&mut self, index: usize) -> Option<&mut StructElement> {
        self.elements.get_mut(index)
    }

    /// The declared elements in order.
    pub fn elements(&self) -> impl Iterator<Item = &StructElement> {
        self.elements.iter()
    }

    /// Serialize every element in declaration order, little-endian.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.byte_size());
        for element in &self.elements {
            element.append_to(&mut out);
        }
        out
    }
}

/// Fixed table of structure slots, indexed by the 4-bit id field.
#[derive(Debug, Default)]
pub struct StructTable {
    slots: [Option<StructDef>; MAX_STRUCT_SLOTS],
}

impl StructTable {
    /// An empty table.
    #[must_use]
    pub fn new() -> Self {
        StructTable::default()
    }

    /// Store a completed declaration.
    ///
    /// # Errors
    /// Returns a format error if the slot already holds a declaration.
    pub fn declare(&mut self, id: u8, def: StructDef) -> Result<()> {
        let slot = &mut self.slots[id as usize];
        if slot.is_some() {
            return Err(malformed_error!("structure {} is already declared", id));
        }

        *slot = Some(def);
        Ok(())
    }

    /// Replace a slot unconditionally. Used by COPY_STRUCT.
    pub fn replace(&mut self, id: u8, def: StructDef) {
        self.slots[id as usize] = Some(def);
    }

    /// The declaration in slot `id`.
    ///
    /// # Errors
    /// Returns [`crate::Error::NoSuchStruct`] if the slot is empty.
    pub fn get(&self, id: u8) -> Result<&StructDef> {
        self.slots[id as usize]
            .as_ref()
            .ok_or(crate::Error::NoSuchStruct(id))
    }

    /// Mutable access to the declaration in slot `id`.
    ///
    /// # Errors
    /// Returns [`crate::Error::NoSuchStruct`] if the slot is empty.
    pub fn get_mut(&mut self, id: u8) -> Result<&mut StructDef> {
        self.slots[id as usize]
            .as_mut()
            .ok_or(crate::Error::NoSuchStruct(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_type_widths() {
        assert_eq!(DataType::U8.width(), 1);
        assert_eq!(DataType::U16.width(), 2);
        assert_eq!(DataType::U32.width(), 4);
        assert_eq!(DataType::U64.width(), 8);
        assert_eq!(DataType::I8.width(), 1);
        assert_eq!(DataType::I64.width(), 8);
    }

    #[test]
    fn test_struct_serialization() {
        let mut def = StructDef::new();
        def.push(StructElement::new(DataType::U8, 0xAB)).unwrap();
        def.push(StructElement::new(DataType::U16, 0x1234)).unwrap();
        def.push(StructElement::new(DataType::I32, -2)).unwrap();

        assert_eq!(def.byte_size(), 7);
        assert_eq!(
            def.to_bytes(),
            vec![0xAB, 0x34, 0x12, 0xFE, 0xFF, 0xFF, 0xFF]
        );
    }

    #[test]
    fn test_element_truncation() {
        let mut out = Vec::new();
        StructElement::new(DataType::U8, 0x1FF).append_to(&mut out);
        assert_eq!(out, vec![0xFF]);
    }

    #[test]
    fn test_table_redeclaration_is_fatal() {
        let mut table = StructTable::new();
        table.declare(3, StructDef::new()).unwrap();
        assert!(table.declare(3, StructDef::new()).is_err());
        // COPY_STRUCT may overwrite regardless
        table.replace(3, StructDef::new());
        assert!(table.get(3).is_ok());
    }

    #[test]
    fn test_missing_struct() {
        let table = StructTable::new();
        assert!(matches!(table.get(7), Err(crate::Error::NoSuchStruct(7))));
    }
}
