// ==============================================================================
// Read-Only Buffer Views
// ==============================================================================
//
// Minimal bounds-checked accessors over a finished buffer: follow the root
// offset, look fields up through the vtable, and read scalars, strings,
// vectors, inline structs, and sub-tables. Every accessor returns `None` for
// absent fields and for offsets that would leave the buffer, so a corrupt
// buffer never panics.

use crate::builder::FILE_IDENTIFIER_LENGTH;
use crate::model::schema::{Scalar, ScalarKind, field_index_to_offset};

fn read_u16(buf: &[u8], at: usize) -> Option<u16> {
    let bytes = buf.get(at..at.checked_add(2)?)?;
    Some(u16::from_le_bytes([bytes[0], bytes[1]]))
}

fn read_u32(buf: &[u8], at: usize) -> Option<u32> {
    let bytes = buf.get(at..at.checked_add(4)?)?;
    Some(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

/// Follow the uoffset stored at `at`.
fn follow(buf: &[u8], at: usize) -> Option<usize> {
    at.checked_add(read_u32(buf, at)? as usize)
}

/// The 4-byte identifier following the root offset, if the buffer is long
/// enough to hold one.
pub fn file_identifier(buf: &[u8]) -> Option<&[u8]> {
    buf.get(4..4 + FILE_IDENTIFIER_LENGTH)
}

/// A table inside a buffer.
#[derive(Debug, Clone, Copy)]
pub struct Table<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Table<'a> {
    /// The root table of a finished buffer.
    pub fn root(buf: &'a [u8]) -> Option<Table<'a>> {
        Table::at(buf, follow(buf, 0)?)
    }

    fn at(buf: &'a [u8], pos: usize) -> Option<Table<'a>> {
        // The soffset must be readable for the table to be usable at all.
        read_u32(buf, pos)?;
        Some(Table { buf, pos })
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    fn vtable(&self) -> Option<usize> {
        let soffset = read_u32(self.buf, self.pos)? as i32;
        let vtable = self.pos as i64 - i64::from(soffset);
        usize::try_from(vtable).ok()
    }

    /// Absolute position of field `slot`, or `None` when it is absent.
    pub fn field_position(&self, slot: usize) -> Option<usize> {
        let vtable = self.vtable()?;
        let vtable_len = read_u16(self.buf, vtable)? as usize;
        let entry = field_index_to_offset(slot) as usize;
        if entry + 2 > vtable_len {
            return None;
        }
        match read_u16(self.buf, vtable + entry)? {
            0 => None,
            offset => Some(self.pos + offset as usize),
        }
    }

    pub fn is_present(&self, slot: usize) -> bool {
        self.field_position(slot).is_some()
    }

    pub fn scalar(&self, slot: usize, kind: ScalarKind) -> Option<Scalar> {
        let at = self.field_position(slot)?;
        kind.decode(self.buf.get(at..)?)
    }

    /// A scalar field, falling back to `default` when absent.
    pub fn scalar_or(&self, slot: usize, kind: ScalarKind, default: Scalar) -> Scalar {
        self.scalar(slot, kind).unwrap_or(default)
    }

    pub fn string(&self, slot: usize) -> Option<&'a str> {
        read_string(self.buf, follow(self.buf, self.field_position(slot)?)?)
    }

    pub fn table(&self, slot: usize) -> Option<Table<'a>> {
        Table::at(self.buf, follow(self.buf, self.field_position(slot)?)?)
    }

    pub fn vector(&self, slot: usize) -> Option<Vector<'a>> {
        Vector::at(self.buf, follow(self.buf, self.field_position(slot)?)?)
    }

    /// The bytes of an inline struct field of `size` bytes.
    pub fn struct_bytes(&self, slot: usize, size: usize) -> Option<&'a [u8]> {
        let at = self.field_position(slot)?;
        self.buf.get(at..at.checked_add(size)?)
    }
}

fn read_string(buf: &[u8], pos: usize) -> Option<&str> {
    let len = read_u32(buf, pos)? as usize;
    let start = pos.checked_add(4)?;
    let bytes = buf.get(start..start.checked_add(len)?)?;
    std::str::from_utf8(bytes).ok()
}

/// A vector inside a buffer.
#[derive(Debug, Clone, Copy)]
pub struct Vector<'a> {
    buf: &'a [u8],
    /// Position of the first element.
    start: usize,
    len: usize,
}

impl<'a> Vector<'a> {
    fn at(buf: &'a [u8], pos: usize) -> Option<Vector<'a>> {
        let len = read_u32(buf, pos)? as usize;
        Some(Vector {
            buf,
            start: pos.checked_add(4)?,
            len,
        })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Position of the first element.
    pub fn position(&self) -> usize {
        self.start
    }

    fn element(&self, index: usize, size: usize) -> Option<usize> {
        (index < self.len).then(|| self.start + index * size)
    }

    pub fn scalar(&self, index: usize, kind: ScalarKind) -> Option<Scalar> {
        let at = self.element(index, kind.size())?;
        kind.decode(self.buf.get(at..)?)
    }

    pub fn string(&self, index: usize) -> Option<&'a str> {
        read_string(self.buf, follow(self.buf, self.element(index, 4)?)?)
    }

    pub fn table(&self, index: usize) -> Option<Table<'a>> {
        Table::at(self.buf, follow(self.buf, self.element(index, 4)?)?)
    }

    /// The bytes of inline struct element `index`, each `size` bytes long.
    pub fn struct_bytes(&self, index: usize, size: usize) -> Option<&'a [u8]> {
        let at = self.element(index, size)?;
        self.buf.get(at..at.checked_add(size)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Root table with one int field (slot 0 = 42) and slot 1 absent.
    #[test]
    fn reads_hand_built_table() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&16u32.to_le_bytes()); // root offset
        buf.extend_from_slice(b"TINY");
        // vtable at 8
        buf.extend_from_slice(&6u16.to_le_bytes());
        buf.extend_from_slice(&8u16.to_le_bytes());
        buf.extend_from_slice(&4u16.to_le_bytes());
        buf.extend_from_slice(&[0, 0]);
        // table at 16, soffset = 16 - 8
        buf.extend_from_slice(&8i32.to_le_bytes());
        buf.extend_from_slice(&42i32.to_le_bytes());

        assert_eq!(file_identifier(&buf), Some(&b"TINY"[..]));
        let root = Table::root(&buf).unwrap();
        assert_eq!(root.position(), 16);
        assert_eq!(root.scalar(0, ScalarKind::Int), Some(Scalar::Int(42)));
        assert!(!root.is_present(1));
        assert_eq!(
            root.scalar_or(1, ScalarKind::Int, Scalar::Int(-1)),
            Scalar::Int(-1)
        );
    }

    #[test]
    fn truncated_buffers_yield_none() {
        assert!(Table::root(&[]).is_none());
        assert!(Table::root(&[200, 0, 0, 0]).is_none());
    }
}
