// ==============================================================================
// Struct Layout
// ==============================================================================
//
// Fixed-layout structs have every field at a byte offset computed while the
// declaration is parsed. Each field is aligned to its own alignment by padding
// inserted after the previous field; the struct's size is finally rounded up to
// its minimum alignment, which is the largest member alignment unless a
// `force_align` attribute widens it.

use crate::model::schema::{FieldDef, StructDef};

/// Largest alignment `force_align` may request.
pub const MAX_FORCE_ALIGN: usize = 16;

/// Bytes needed to bring `buf_size` up to a multiple of `alignment`, which
/// must be a power of two.
pub fn padding_bytes(buf_size: usize, alignment: usize) -> usize {
    (!buf_size).wrapping_add(1) & (alignment - 1)
}

/// Pad the struct to `alignment`, attributing the padding to the last field.
pub fn pad_last_field(def: &mut StructDef, alignment: usize) {
    let padding = padding_bytes(def.bytesize, alignment);
    def.bytesize += padding;
    if let Some(last) = def.fields.last_mut() {
        last.padding += padding;
    }
}

/// Place `field` at the next suitably aligned offset of a fixed struct.
/// Must be called before the field is added to `def.fields`.
pub fn place_fixed_field(def: &mut StructDef, field: &mut FieldDef, size: usize, alignment: usize) {
    def.minalign = def.minalign.max(alignment);
    pad_last_field(def, alignment);
    field.offset = def.bytesize;
    def.bytesize += size;
}

/// Apply a `force_align` value to a finished struct.
pub fn apply_force_align(def: &mut StructDef, align: usize) -> Result<(), String> {
    if align < def.minalign || align > MAX_FORCE_ALIGN || !align.is_power_of_two() {
        return Err(format!(
            "force_align must be a power of two integer ranging from the \
             struct's natural alignment to {MAX_FORCE_ALIGN}"
        ));
    }
    def.minalign = align;
    pad_last_field(def, align);
    Ok(())
}
