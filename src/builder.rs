// ==============================================================================
// Binary Buffer Builder
// ==============================================================================
//
// The encoder never touches bytes directly; it drives a `BufferBuilder`. The
// trait mirrors the primitive operations of the wire format (tables, inline
// structs, vectors, strings, finishing) so the encoder can be tested against a
// recording mock, while `FlatBufferBuilder` produces real buffers.
//
// `FlatBufferBuilder` grows backward: data is written from the end of an owned
// `Vec<u8>` towards its start, so children are always complete before the
// parent that points at them. Offsets handed out are distances from the end of
// the buffer, which stay valid as the buffer grows.
//
// Wire format summary (all little-endian):
//   - uoffset (u32): forward offset from its own position to the target
//   - table:  soffset (i32) = table position - vtable position, then fields
//   - vtable: u16 vtable size, u16 table size, one u16 per field (0 = absent)
//   - vector: u32 element count, then elements
//   - string: u32 byte length, bytes, NUL terminator
//   - buffer: uoffset to root table, optional 4-byte file identifier

use crate::layout::padding_bytes;
use crate::model::schema::{Scalar, ScalarKind, field_index_to_offset};

const SIZE_UOFFSET: usize = 4;

/// Length of a file identifier.
pub const FILE_IDENTIFIER_LENGTH: usize = 4;

/// A position in a buffer under construction, measured from its end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Offset(pub u32);

impl Offset {
    pub fn value(self) -> u32 {
        self.0
    }
}

/// The operations the value encoder needs from a buffer.
pub trait BufferBuilder {
    /// Begin a table. Field writes until `end_table` belong to it.
    fn start_table(&mut self) -> Offset;

    /// Finish a table of a type with `num_fields` vtable slots, writing (or
    /// reusing) its vtable.
    fn end_table(&mut self, start: Offset, num_fields: usize) -> Offset;

    /// Prepare for `size` bytes of inline struct data aligned to `alignment`.
    fn start_struct(&mut self, alignment: usize);

    /// Position of the struct bytes written since `start_struct`.
    fn end_struct(&mut self) -> Offset;

    /// Write a scalar table field, unless it equals its default.
    fn add_scalar(&mut self, slot: usize, kind: ScalarKind, value: Scalar, default: Scalar);

    /// Write a table field pointing at previously written data.
    fn add_offset(&mut self, slot: usize, target: Offset);

    /// Record an inline struct just written between `start_struct` and
    /// `end_struct` as a table field.
    fn add_struct(&mut self, slot: usize, location: Offset);

    /// Begin a vector of `count` elements of `elem_size` bytes.
    fn start_vector(&mut self, elem_size: usize, count: usize, alignment: usize);

    /// Write the element count and return the vector's position.
    fn end_vector(&mut self, count: usize) -> Offset;

    /// Push one scalar vector element or inline struct field.
    fn push_scalar(&mut self, kind: ScalarKind, value: Scalar);

    /// Push one offset vector element.
    fn push_offset(&mut self, target: Offset);

    fn create_string(&mut self, value: &str) -> Offset;

    /// Insert `n` zero bytes.
    fn pad(&mut self, n: usize);

    /// Insert zero bytes until the buffer size is a multiple of `alignment`.
    fn align(&mut self, alignment: usize);

    /// Write the root offset and optional file identifier.
    fn finish(&mut self, root: Offset, file_identifier: Option<&str>);
}

#[derive(Debug, Clone, Copy)]
struct FieldLoc {
    slot: usize,
    offset: u32,
}

/// A backward-growing buffer producing the binary wire format.
#[derive(Debug)]
pub struct FlatBufferBuilder {
    buf: Vec<u8>,
    /// Index of the first written byte in `buf`.
    head: usize,
    min_align: usize,
    field_locs: Vec<FieldLoc>,
    /// Positions of every vtable written so far, for deduplication.
    vtables: Vec<u32>,
    finished: bool,
}

impl Default for FlatBufferBuilder {
    fn default() -> Self {
        FlatBufferBuilder::with_capacity(1024)
    }
}

impl FlatBufferBuilder {
    pub fn new() -> Self {
        FlatBufferBuilder::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        FlatBufferBuilder {
            buf: vec![0; capacity],
            head: capacity,
            min_align: 1,
            field_locs: Vec::new(),
            vtables: Vec::new(),
            finished: false,
        }
    }

    /// Bytes written so far.
    pub fn size(&self) -> usize {
        self.buf.len() - self.head
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// The written bytes, from the root offset to the end.
    pub fn data(&self) -> &[u8] {
        &self.buf[self.head..]
    }

    /// Number of distinct vtables written.
    pub fn vtable_count(&self) -> usize {
        self.vtables.len()
    }

    pub fn into_vec(mut self) -> Vec<u8> {
        self.buf.drain(..self.head);
        self.buf
    }

    fn offset(&self) -> Offset {
        Offset(self.size() as u32)
    }

    /// Double the buffer until `additional` more bytes fit below `head`.
    fn reserve(&mut self, additional: usize) {
        if self.head >= additional {
            return;
        }
        let used = self.size();
        let mut capacity = self.buf.len().max(1);
        while capacity - used < additional {
            capacity *= 2;
        }
        let mut grown = vec![0; capacity];
        grown[capacity - used..].copy_from_slice(&self.buf[self.head..]);
        self.buf = grown;
        self.head = capacity - used;
    }

    /// Claim `n` zeroed bytes at the front and return their index.
    fn make_space(&mut self, n: usize) -> usize {
        self.reserve(n);
        self.head -= n;
        self.buf[self.head..self.head + n].fill(0);
        self.head
    }

    /// Pad so that after writing `len` more bytes the size is a multiple of
    /// `alignment`.
    fn pre_align(&mut self, len: usize, alignment: usize) {
        self.min_align = self.min_align.max(alignment);
        let padding = padding_bytes(self.size() + len, alignment);
        self.make_space(padding);
    }

    fn write_bytes(&mut self, bytes: &[u8]) {
        let at = self.make_space(bytes.len());
        self.buf[at..at + bytes.len()].copy_from_slice(bytes);
    }

    fn push_u32(&mut self, value: u32) {
        self.pre_align(0, SIZE_UOFFSET);
        self.write_bytes(&value.to_le_bytes());
    }

    fn track_field(&mut self, slot: usize) {
        self.field_locs.push(FieldLoc {
            slot,
            offset: self.size() as u32,
        });
    }

    /// Index into `buf` of an offset handed out earlier.
    fn position(&self, offset: u32) -> usize {
        self.buf.len() - offset as usize
    }

    fn read_u16(&self, at: usize) -> u16 {
        u16::from_le_bytes([self.buf[at], self.buf[at + 1]])
    }

    /// Serialize the vtable describing the fields tracked since
    /// `start_table`. Trailing absent slots are trimmed.
    fn vtable_bytes(&self, object_offset: u32, object_size: u32, num_fields: usize) -> Vec<u8> {
        let used_slots = self
            .field_locs
            .iter()
            .map(|loc| loc.slot + 1)
            .max()
            .unwrap_or(0);
        debug_assert!(used_slots <= num_fields, "field slot beyond table size");
        let len = field_index_to_offset(used_slots) as usize;
        let mut vtable = vec![0u8; len];
        vtable[0..2].copy_from_slice(&(len as u16).to_le_bytes());
        vtable[2..4].copy_from_slice(&(object_size as u16).to_le_bytes());
        for loc in &self.field_locs {
            let at = field_index_to_offset(loc.slot) as usize;
            let field_offset = (object_offset - loc.offset) as u16;
            vtable[at..at + 2].copy_from_slice(&field_offset.to_le_bytes());
        }
        vtable
    }

    /// An identical vtable written earlier, if any.
    fn find_vtable(&self, vtable: &[u8]) -> Option<u32> {
        self.vtables.iter().copied().find(|&existing| {
            let at = self.position(existing);
            let len = self.read_u16(at) as usize;
            self.buf[at..at + len] == *vtable
        })
    }
}

impl BufferBuilder for FlatBufferBuilder {
    fn start_table(&mut self) -> Offset {
        self.field_locs.clear();
        self.offset()
    }

    fn end_table(&mut self, start: Offset, num_fields: usize) -> Offset {
        // Placeholder for the soffset to the vtable, patched below.
        self.push_u32(0);
        let object_offset = self.size() as u32;
        let object_size = object_offset - start.value();
        let vtable = self.vtable_bytes(object_offset, object_size, num_fields);

        let vtable_offset = match self.find_vtable(&vtable) {
            Some(existing) => existing,
            None => {
                self.write_bytes(&vtable);
                let written = self.size() as u32;
                self.vtables.push(written);
                written
            }
        };

        let table_at = self.position(object_offset);
        let soffset = vtable_offset as i32 - object_offset as i32;
        self.buf[table_at..table_at + 4].copy_from_slice(&soffset.to_le_bytes());
        self.field_locs.clear();
        Offset(object_offset)
    }

    fn start_struct(&mut self, alignment: usize) {
        self.pre_align(0, alignment);
    }

    fn end_struct(&mut self) -> Offset {
        self.offset()
    }

    fn add_scalar(&mut self, slot: usize, kind: ScalarKind, value: Scalar, default: Scalar) {
        let bytes = kind.encode(value);
        if bytes == kind.encode(default) {
            return;
        }
        self.pre_align(0, kind.size());
        self.write_bytes(&bytes);
        self.track_field(slot);
    }

    fn add_offset(&mut self, slot: usize, target: Offset) {
        self.push_offset(target);
        self.track_field(slot);
    }

    fn add_struct(&mut self, slot: usize, location: Offset) {
        self.field_locs.push(FieldLoc {
            slot,
            offset: location.value(),
        });
    }

    fn start_vector(&mut self, elem_size: usize, count: usize, alignment: usize) {
        let len = elem_size * count;
        self.pre_align(len, SIZE_UOFFSET);
        self.pre_align(len, alignment.max(1));
    }

    fn end_vector(&mut self, count: usize) -> Offset {
        self.push_u32(count as u32);
        self.offset()
    }

    fn push_scalar(&mut self, kind: ScalarKind, value: Scalar) {
        self.pre_align(0, kind.size());
        self.write_bytes(&kind.encode(value));
    }

    fn push_offset(&mut self, target: Offset) {
        self.pre_align(0, SIZE_UOFFSET);
        let relative = self.size() as u32 - target.value() + SIZE_UOFFSET as u32;
        self.write_bytes(&relative.to_le_bytes());
    }

    fn create_string(&mut self, value: &str) -> Offset {
        self.pre_align(value.len() + 1, SIZE_UOFFSET);
        self.write_bytes(&[0]);
        self.write_bytes(value.as_bytes());
        self.push_u32(value.len() as u32);
        self.offset()
    }

    fn pad(&mut self, n: usize) {
        self.make_space(n);
    }

    fn align(&mut self, alignment: usize) {
        self.pre_align(0, alignment);
    }

    fn finish(&mut self, root: Offset, file_identifier: Option<&str>) {
        let ident_len = if file_identifier.is_some() {
            FILE_IDENTIFIER_LENGTH
        } else {
            0
        };
        let min_align = self.min_align.max(SIZE_UOFFSET);
        self.pre_align(SIZE_UOFFSET + ident_len, min_align);
        if let Some(ident) = file_identifier {
            let mut bytes = [0u8; FILE_IDENTIFIER_LENGTH];
            for (dst, src) in bytes.iter_mut().zip(ident.bytes()) {
                *dst = src;
            }
            self.write_bytes(&bytes);
        }
        self.push_offset(root);
        self.finished = true;
    }
}
