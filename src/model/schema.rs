// ==============================================================================
// Schema Model
// ==============================================================================
//
// The in-memory form of a parsed schema. Definitions live in arenas owned by
// `resolve::Schema` and refer to each other through `StructId` and `EnumId`
// handles, so a struct referenced before it is declared can be created as a
// placeholder and completed in place later.

use indexmap::IndexMap;

use crate::lexer::Location;
use crate::resolve::SymbolTable;

/// Handle to a struct or table in `Schema::structs`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StructId(pub usize);

/// Handle to an enum or union in `Schema::enums`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EnumId(pub usize);

// ==========================================================================
// Scalars
// ==========================================================================

/// The fixed-width scalar kinds of the wire format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarKind {
    Bool,
    Byte,
    UByte,
    Short,
    UShort,
    Int,
    UInt,
    Long,
    ULong,
    Float,
    Double,
}

impl ScalarKind {
    pub fn from_name(name: &str) -> Option<ScalarKind> {
        Some(match name {
            "bool" => ScalarKind::Bool,
            "byte" => ScalarKind::Byte,
            "ubyte" => ScalarKind::UByte,
            "short" => ScalarKind::Short,
            "ushort" => ScalarKind::UShort,
            "int" => ScalarKind::Int,
            "uint" => ScalarKind::UInt,
            "long" => ScalarKind::Long,
            "ulong" => ScalarKind::ULong,
            "float" => ScalarKind::Float,
            "double" => ScalarKind::Double,
            _ => return None,
        })
    }

    pub fn name(self) -> &'static str {
        match self {
            ScalarKind::Bool => "bool",
            ScalarKind::Byte => "byte",
            ScalarKind::UByte => "ubyte",
            ScalarKind::Short => "short",
            ScalarKind::UShort => "ushort",
            ScalarKind::Int => "int",
            ScalarKind::UInt => "uint",
            ScalarKind::Long => "long",
            ScalarKind::ULong => "ulong",
            ScalarKind::Float => "float",
            ScalarKind::Double => "double",
        }
    }

    /// Width in bytes; scalars are always aligned to their own width.
    pub fn size(self) -> usize {
        match self {
            ScalarKind::Bool | ScalarKind::Byte | ScalarKind::UByte => 1,
            ScalarKind::Short | ScalarKind::UShort => 2,
            ScalarKind::Int | ScalarKind::UInt | ScalarKind::Float => 4,
            ScalarKind::Long | ScalarKind::ULong | ScalarKind::Double => 8,
        }
    }

    pub fn bits(self) -> u32 {
        self.size() as u32 * 8
    }

    pub fn is_float(self) -> bool {
        matches!(self, ScalarKind::Float | ScalarKind::Double)
    }

    /// Integral kinds usable as an enum's underlying type.
    pub fn is_integer(self) -> bool {
        !self.is_float() && self != ScalarKind::Bool
    }

    /// Whether an integer literal fits this kind. Both the signed and the
    /// unsigned range of the width are accepted, so `0xFF` fits a `byte`.
    pub fn fits(self, value: i128) -> bool {
        if self.is_float() {
            return true;
        }
        let bits = self.bits();
        let min = -(1i128 << (bits - 1));
        let max = (1i128 << bits) - 1;
        (min..=max).contains(&value)
    }

    /// Encode `value` as little-endian bytes of this kind's width.
    ///
    /// Integers are truncated to the width, which keeps the two's-complement
    /// bit pattern for both signed and unsigned interpretations.
    pub fn encode(self, value: Scalar) -> Vec<u8> {
        match self {
            ScalarKind::Float => (value.as_f64() as f32).to_le_bytes().to_vec(),
            ScalarKind::Double => value.as_f64().to_le_bytes().to_vec(),
            ScalarKind::Bool => vec![u8::from(value.as_i64() != 0)],
            _ => (value.as_i64() as u64).to_le_bytes()[..self.size()].to_vec(),
        }
    }

    /// Decode a value of this kind from little-endian bytes.
    pub fn decode(self, bytes: &[u8]) -> Option<Scalar> {
        let bytes = bytes.get(..self.size())?;
        let mut wide = [0u8; 8];
        wide[..bytes.len()].copy_from_slice(bytes);
        let raw = u64::from_le_bytes(wide);
        Some(match self {
            ScalarKind::Float => Scalar::Float(f64::from(f32::from_bits(raw as u32))),
            ScalarKind::Double => Scalar::Float(f64::from_bits(raw)),
            ScalarKind::Bool | ScalarKind::UByte | ScalarKind::UShort | ScalarKind::UInt => {
                Scalar::Int(raw as i64)
            }
            ScalarKind::ULong => Scalar::Int(raw as i64),
            ScalarKind::Byte => Scalar::Int(i64::from(raw as u8 as i8)),
            ScalarKind::Short => Scalar::Int(i64::from(raw as u16 as i16)),
            ScalarKind::Int => Scalar::Int(i64::from(raw as u32 as i32)),
            ScalarKind::Long => Scalar::Int(raw as i64),
        })
    }
}

/// A scalar value. `ulong` values above `i64::MAX` are stored by bit pattern.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Scalar {
    Int(i64),
    Float(f64),
}

impl Scalar {
    pub fn as_i64(self) -> i64 {
        match self {
            Scalar::Int(v) => v,
            Scalar::Float(v) => v as i64,
        }
    }

    pub fn as_f64(self) -> f64 {
        match self {
            Scalar::Int(v) => v as f64,
            Scalar::Float(v) => v,
        }
    }
}

impl Default for Scalar {
    fn default() -> Self {
        Scalar::Int(0)
    }
}

// ==========================================================================
// Types
// ==========================================================================

/// The type of a field, vector element, or value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Type {
    /// A scalar, optionally typed by an enum. A union's hidden `_type` field
    /// is a `ubyte` typed by the union itself.
    Scalar {
        kind: ScalarKind,
        enum_def: Option<EnumId>,
    },
    String,
    Vector(Box<Type>),
    /// A struct (inline) or table (by offset); which one depends on the
    /// definition's `fixed` flag.
    Struct(StructId),
    Union(EnumId),
}

impl Type {
    pub fn scalar(kind: ScalarKind) -> Type {
        Type::Scalar {
            kind,
            enum_def: None,
        }
    }

    pub fn is_scalar(&self) -> bool {
        matches!(self, Type::Scalar { .. })
    }
}

// ==========================================================================
// Definitions
// ==========================================================================

/// A declared value of an attribute: `(id: 3)`, `(hash: "fnv1a_32")`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Literal {
    Integer(String),
    Float(String),
    String(String),
}

impl Literal {
    pub fn text(&self) -> &str {
        match self {
            Literal::Integer(s) | Literal::Float(s) | Literal::String(s) => s,
        }
    }
}

/// Attribute name to optional value, in declaration order.
pub type Attributes = IndexMap<String, Option<Literal>>;

/// The parts every named definition shares.
#[derive(Debug, Clone, Default)]
pub struct Definition {
    pub name: String,
    /// Index into `Schema::namespaces`.
    pub namespace: usize,
    pub doc_comment: Vec<String>,
    pub attributes: Attributes,
    /// Set for definitions that came from an included file.
    pub generated: bool,
}

/// Lifecycle of a struct or table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefState {
    /// Referenced but not yet declared.
    Predeclared,
    Defined,
}

#[derive(Debug, Clone)]
pub struct FieldDef {
    pub name: String,
    pub ty: Type,
    /// Vtable slot index for table fields, declaration position for struct
    /// fields.
    pub slot: usize,
    /// Byte offset inside a struct; unused for tables.
    pub offset: usize,
    /// Padding inserted after this field inside a struct.
    pub padding: usize,
    pub default: Scalar,
    pub deprecated: bool,
    pub required: bool,
    pub key: bool,
    pub doc_comment: Vec<String>,
    pub attributes: Attributes,
}

impl FieldDef {
    pub fn new(name: impl Into<String>, ty: Type) -> Self {
        FieldDef {
            name: name.into(),
            ty,
            slot: 0,
            offset: 0,
            padding: 0,
            default: Scalar::default(),
            deprecated: false,
            required: false,
            key: false,
            doc_comment: Vec::new(),
            attributes: Attributes::new(),
        }
    }

    /// Byte offset of this field's entry in a table's vtable.
    pub fn vtable_offset(&self) -> u16 {
        field_index_to_offset(self.slot)
    }

    pub fn string_attribute(&self, name: &str) -> Option<&str> {
        match self.attributes.get(name) {
            Some(Some(Literal::String(s))) => Some(s),
            _ => None,
        }
    }
}

/// Vtable entries start after the vtable size and object size fields.
pub fn field_index_to_offset(slot: usize) -> u16 {
    ((slot + 2) * 2) as u16
}

#[derive(Debug, Clone)]
pub struct StructDef {
    pub def: Definition,
    pub fields: SymbolTable<FieldDef>,
    /// A fixed-layout `struct` rather than a `table`.
    pub fixed: bool,
    pub state: DefState,
    /// Emit table fields largest-first; cleared by `original_order`.
    pub sort_by_size: bool,
    pub minalign: usize,
    pub bytesize: usize,
    pub has_key: bool,
    /// Where the definition was first referenced or declared.
    pub location: Location,
}

impl StructDef {
    pub fn predeclared(name: impl Into<String>, namespace: usize, location: Location) -> Self {
        StructDef {
            def: Definition {
                name: name.into(),
                namespace,
                ..Definition::default()
            },
            fields: SymbolTable::new(),
            fixed: false,
            state: DefState::Predeclared,
            sort_by_size: true,
            minalign: 1,
            bytesize: 0,
            has_key: false,
            location,
        }
    }
}

#[derive(Debug, Clone)]
pub struct EnumVal {
    pub name: String,
    pub value: i64,
    pub doc_comment: Vec<String>,
    /// The table a union variant selects; `None` for plain enums and `NONE`.
    pub struct_def: Option<StructId>,
}

#[derive(Debug, Clone)]
pub struct EnumDef {
    pub def: Definition,
    pub values: SymbolTable<EnumVal>,
    pub is_union: bool,
    pub underlying: ScalarKind,
    pub bit_flags: bool,
}

impl EnumDef {
    /// The first value declared with `value`.
    pub fn reverse_lookup(&self, value: i64) -> Option<&EnumVal> {
        self.values.iter().find(|v| v.value == value)
    }
}

#[derive(Debug, Clone)]
pub struct RpcCall {
    pub name: String,
    pub request: StructId,
    pub response: StructId,
    pub doc_comment: Vec<String>,
    pub attributes: Attributes,
    pub location: Location,
}

#[derive(Debug, Clone)]
pub struct ServiceDef {
    pub def: Definition,
    pub calls: SymbolTable<RpcCall>,
}

/// A dotted namespace path; the root namespace has no components.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Namespace {
    pub components: Vec<String>,
}

impl Namespace {
    /// Prefix `name` with this namespace.
    pub fn qualify(&self, name: &str) -> String {
        self.qualify_prefix(self.components.len(), name)
    }

    /// Prefix `name` with the first `depth` components of this namespace.
    pub fn qualify_prefix(&self, depth: usize, name: &str) -> String {
        let mut full = String::new();
        for component in &self.components[..depth] {
            full.push_str(component);
            full.push('.');
        }
        full.push_str(name);
        full
    }
}

impl std::fmt::Display for Namespace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.components.join("."))
    }
}
