// ==============================================================================
// Value Parser and Encoder
// ==============================================================================
//
// Parses a JSON-like literal object against a table type and encodes it while
// parsing. Children are always encoded before their parent: a nested table,
// string, or vector is written as soon as its literal has been read, and only
// its offset is kept. Scalars and inline struct bytes wait in a pending list
// (kept sorted by slot) until the enclosing object's closing brace, when the
// table is written in one go.
//
// Table fields are emitted largest scalar first (8, 4, 2, then 1 byte wide),
// each size group in reverse slot order, followed by every offset and inline
// struct field. Since the buffer grows backward this keeps padding between
// fields to a minimum. `original_order` tables skip the grouping.
//
// All byte writing goes through the `BufferBuilder` trait, so this module can
// be tested against a recorder instead of a real buffer.

use crate::builder::{BufferBuilder, Offset};
use crate::error::{Result, Warning};
use crate::hash::HashFunction;
use crate::lexer::{Lexer, Location, Token};
use crate::model::schema::{EnumId, FieldDef, Scalar, ScalarKind, StructId, Type};
use crate::reader::ParseOptions;
use crate::resolve::Schema;
use crate::suggest::with_suggestion;

/// A parsed value waiting to be stored in its parent.
#[derive(Debug, Clone, PartialEq)]
enum Value {
    Scalar(ScalarKind, Scalar),
    /// Something already written to the buffer.
    Offset(Offset),
    /// Inline struct contents, not yet written.
    Struct {
        pieces: Vec<StructPiece>,
        alignment: usize,
    },
}

/// One step of an inline struct, in declaration order. Nested structs are
/// flattened into their parent.
#[derive(Debug, Clone, PartialEq)]
enum StructPiece {
    Scalar(ScalarKind, Scalar),
    Padding(usize),
}

pub struct Encoder<'a, B: BufferBuilder> {
    lexer: &'a mut Lexer,
    schema: &'a Schema,
    options: &'a ParseOptions,
    warnings: &'a mut Vec<Warning>,
    builder: &'a mut B,
}

impl<'a, B: BufferBuilder> Encoder<'a, B> {
    pub fn new(
        lexer: &'a mut Lexer,
        schema: &'a Schema,
        options: &'a ParseOptions,
        warnings: &'a mut Vec<Warning>,
        builder: &'a mut B,
    ) -> Self {
        Encoder {
            lexer,
            schema,
            options,
            warnings,
            builder,
        }
    }

    /// Parse a `{ ... }` literal of table `id` and write it to the buffer.
    pub fn encode_table(&mut self, id: StructId) -> Result<Offset> {
        let fields = self.parse_object(id)?;
        let schema = self.schema;
        let def = schema.struct_def(id);

        let start = self.builder.start_table();
        if def.sort_by_size {
            for size in [8, 4, 2, 1] {
                for (field, value) in fields.iter().rev() {
                    if matches!(value, Value::Scalar(kind, _) if kind.size() == size) {
                        self.add_field(field, value);
                    }
                }
            }
            for (field, value) in fields.iter().rev() {
                if !matches!(value, Value::Scalar(..)) {
                    self.add_field(field, value);
                }
            }
        } else {
            for (field, value) in fields.iter().rev() {
                self.add_field(field, value);
            }
        }
        Ok(self.builder.end_table(start, def.fields.len()))
    }

    fn add_field(&mut self, field: &FieldDef, value: &Value) {
        match value {
            Value::Scalar(kind, scalar) => {
                self.builder
                    .add_scalar(field.slot, *kind, *scalar, field.default);
            }
            Value::Offset(offset) => self.builder.add_offset(field.slot, *offset),
            Value::Struct { pieces, alignment } => {
                self.builder.start_struct(*alignment);
                self.write_struct(pieces);
                let location = self.builder.end_struct();
                self.builder.add_struct(field.slot, location);
            }
        }
    }

    /// Write struct contents back to front, so they read in declaration
    /// order. The caller has aligned the buffer to the struct's alignment.
    fn write_struct(&mut self, pieces: &[StructPiece]) {
        for piece in pieces.iter().rev() {
            match *piece {
                StructPiece::Scalar(kind, scalar) => self.builder.push_scalar(kind, scalar),
                StructPiece::Padding(n) => self.builder.pad(n),
            }
        }
    }

    /// Parse a literal of fixed struct `id` into its inline contents.
    fn encode_struct(&mut self, id: StructId) -> Result<Value> {
        let fields = self.parse_object(id)?;
        let def = self.schema.struct_def(id);
        let mut pieces = Vec::with_capacity(fields.len());
        for (field, value) in fields {
            match value {
                Value::Scalar(kind, scalar) => pieces.push(StructPiece::Scalar(kind, scalar)),
                Value::Struct { pieces: inner, .. } => pieces.extend(inner),
                // Struct fields are never offsets.
                Value::Offset(_) => continue,
            }
            if field.padding > 0 {
                pieces.push(StructPiece::Padding(field.padding));
            }
        }
        Ok(Value::Struct {
            pieces,
            alignment: def.minalign,
        })
    }

    /// Parse `{ key: value, ... }` for struct or table `id`, returning the
    /// fields that were given, sorted by slot.
    fn parse_object(&mut self, id: StructId) -> Result<Vec<(&'a FieldDef, Value)>> {
        let schema = self.schema;
        let def = schema.struct_def(id);
        let location = self.lexer.location();
        self.lexer.expect_char('{')?;

        let mut fields: Vec<(&'a FieldDef, Value)> = Vec::new();
        // Slots given so far, including those set to `null`.
        let mut seen: Vec<usize> = Vec::new();
        let mut count = 0;
        loop {
            if (!self.options.strict_json || count == 0) && self.lexer.is_next(Token::Char('}'))? {
                break;
            }
            let key_location = self.lexer.location();
            let name = self.parse_key()?;
            self.lexer.expect_char(':')?;

            match def.fields.get(&name) {
                None if self.options.skip_unknown_fields => {
                    self.warnings
                        .push(self.lexer.warning(format!("skipping unknown field: {name}")));
                    self.skip_value()?;
                }
                None => {
                    return Err(self.lexer.error_at(
                        &key_location,
                        with_suggestion(format!("unknown field: {name}"), &name, def.fields.names()),
                    ));
                }
                Some(field) if field.deprecated => {
                    self.warnings.push(
                        self.lexer
                            .warning(format!("ignoring value of deprecated field: {name}")),
                    );
                    self.skip_value()?;
                }
                Some(field) => {
                    if def.fixed && field.slot != seen.len() {
                        return Err(self.lexer.error_at(
                            &key_location,
                            format!("struct field appearing out of order: {name}"),
                        ));
                    }
                    if seen.contains(&field.slot) {
                        return Err(self
                            .lexer
                            .error_at(&key_location, format!("field set more than once: {name}")));
                    }
                    seen.push(field.slot);
                    if !def.fixed && self.lexer.is(Token::Null) {
                        self.lexer.next()?;
                    } else {
                        let value = self.parse_field_value(field, &fields)?;
                        let at = fields.partition_point(|(f, _)| f.slot < field.slot);
                        fields.insert(at, (field, value));
                    }
                }
            }

            count += 1;
            if !self.lexer.is_next(Token::Char(','))? {
                self.lexer.expect_char('}')?;
                break;
            }
        }

        if def.fixed {
            if fields.len() != def.fields.len() {
                return Err(self.lexer.error_at(
                    &location,
                    format!("incomplete struct initialization: {}", def.def.name),
                ));
            }
        } else if let Some(missing) = def
            .fields
            .iter()
            .find(|f| f.required && !fields.iter().any(|(given, _)| given.slot == f.slot))
        {
            return Err(self.lexer.error_at(
                &location,
                format!("required field is missing: {} in {}", missing.name, def.def.name),
            ));
        }
        Ok(fields)
    }

    fn parse_key(&mut self) -> Result<String> {
        match self.lexer.token() {
            Token::StringConstant => self.lexer.expect_string(),
            Token::Identifier if !self.options.strict_json => self.lexer.expect_identifier(),
            _ => {
                let expected = if self.options.strict_json {
                    "string constant"
                } else {
                    "field name"
                };
                Err(self.lexer.error(format!(
                    "expecting: {expected} instead got: {}",
                    self.lexer.describe()
                )))
            }
        }
    }

    fn parse_field_value(
        &mut self,
        field: &'a FieldDef,
        parsed: &[(&'a FieldDef, Value)],
    ) -> Result<Value> {
        let Type::Union(union) = field.ty else {
            return self.parse_value(&field.ty, field.string_attribute("hash"));
        };

        // The discriminant is the `_type` field in the slot just before.
        let discriminant = field
            .slot
            .checked_sub(1)
            .and_then(|slot| parsed.iter().find(|(f, _)| f.slot == slot))
            .and_then(|(_, value)| match value {
                Value::Scalar(_, scalar) => Some(scalar.as_i64()),
                _ => None,
            });
        let Some(discriminant) = discriminant else {
            return Err(self.lexer.error(format!(
                "missing type field before this union value: {}",
                field.name
            )));
        };
        let variant = self
            .schema
            .enum_def(union)
            .reverse_lookup(discriminant)
            .and_then(|v| v.struct_def);
        let Some(table) = variant else {
            return Err(self
                .lexer
                .error(format!("illegal type id for: {}", field.name)));
        };
        self.encode_table(table).map(Value::Offset)
    }

    fn parse_value(&mut self, ty: &Type, hash: Option<&str>) -> Result<Value> {
        let schema = self.schema;
        match ty {
            Type::Scalar { kind, enum_def } => {
                let scalar = scalar_value(self.lexer, schema, *kind, *enum_def, hash)?;
                Ok(Value::Scalar(*kind, scalar))
            }
            Type::String => {
                let text = self.lexer.expect_string()?;
                Ok(Value::Offset(self.builder.create_string(&text)))
            }
            Type::Vector(element) => self.encode_vector(element).map(Value::Offset),
            Type::Struct(id) if schema.struct_def(*id).fixed => self.encode_struct(*id),
            Type::Struct(id) => self.encode_table(*id).map(Value::Offset),
            Type::Union(_) => Err(self
                .lexer
                .error("union values can only appear as table fields")),
        }
    }

    fn encode_vector(&mut self, element: &Type) -> Result<Offset> {
        self.lexer.expect_char('[')?;
        let mut values = Vec::new();
        loop {
            if (!self.options.strict_json || values.is_empty())
                && self.lexer.is_next(Token::Char(']'))?
            {
                break;
            }
            values.push(self.parse_value(element, None)?);
            if !self.lexer.is_next(Token::Char(','))? {
                self.lexer.expect_char(']')?;
                break;
            }
        }

        let schema = self.schema;
        self.builder.start_vector(
            schema.inline_size(element),
            values.len(),
            schema.inline_alignment(element),
        );
        for value in values.iter().rev() {
            match value {
                Value::Scalar(kind, scalar) => self.builder.push_scalar(*kind, *scalar),
                Value::Offset(offset) => self.builder.push_offset(*offset),
                Value::Struct { pieces, alignment } => {
                    self.builder.align(*alignment);
                    self.write_struct(pieces);
                }
            }
        }
        Ok(self.builder.end_vector(values.len()))
    }

    /// Skip over one value of any shape.
    fn skip_value(&mut self) -> Result<()> {
        match self.lexer.token() {
            Token::Char('{') => {
                self.lexer.next()?;
                loop {
                    if self.lexer.is_next(Token::Char('}'))? {
                        break;
                    }
                    self.parse_key()?;
                    self.lexer.expect_char(':')?;
                    self.skip_value()?;
                    if !self.lexer.is_next(Token::Char(','))? {
                        self.lexer.expect_char('}')?;
                        break;
                    }
                }
            }
            Token::Char('[') => {
                self.lexer.next()?;
                loop {
                    if self.lexer.is_next(Token::Char(']'))? {
                        break;
                    }
                    self.skip_value()?;
                    if !self.lexer.is_next(Token::Char(','))? {
                        self.lexer.expect_char(']')?;
                        break;
                    }
                }
            }
            Token::StringConstant
            | Token::IntegerConstant
            | Token::FloatConstant
            | Token::Null => self.lexer.next()?,
            Token::Identifier => {
                self.lexer.next()?;
                while self.lexer.is_next(Token::Char('.'))? {
                    self.lexer.expect_identifier()?;
                }
            }
            _ => {
                return Err(self.lexer.error(format!(
                    "expecting: value instead got: {}",
                    self.lexer.describe()
                )));
            }
        }
        Ok(())
    }
}

// ==============================================================================
// Scalars
// ==============================================================================
//
// Shared with the declaration parser, which reads field defaults with the same
// rules as literal data.

/// Parse the text of an integer constant: optional sign, decimal or `0x` hex.
pub(crate) fn integer_value(text: &str) -> Option<i128> {
    let (negative, digits) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text.strip_prefix('+').unwrap_or(text)),
    };
    let magnitude = match digits
        .strip_prefix("0x")
        .or_else(|| digits.strip_prefix("0X"))
    {
        Some(hex) => i128::from_str_radix(hex, 16).ok()?,
        None => digits.parse::<i128>().ok()?,
    };
    Some(if negative { -magnitude } else { magnitude })
}

/// Parse one scalar literal for a field of `kind`, typed by `enum_def` when it
/// is an enum. Integer and float constants, enumerant names (bare for enum
/// fields, `Enum.Value` otherwise), space-separated flag strings, and, with
/// a `hash` attribute, strings to be hashed are accepted.
pub(crate) fn scalar_value(
    lexer: &mut Lexer,
    schema: &Schema,
    kind: ScalarKind,
    enum_def: Option<EnumId>,
    hash: Option<&str>,
) -> Result<Scalar> {
    if let (Token::StringConstant, Some(algorithm)) = (lexer.token(), hash) {
        let Some(function) = HashFunction::find(algorithm, kind.bits()) else {
            return Err(lexer.error(format!(
                "Unknown hashing algorithm for {} bit types: {algorithm}",
                kind.bits()
            )));
        };
        let hashed = function.hash(lexer.text().as_bytes());
        lexer.next()?;
        return Ok(Scalar::Int(hashed as i64));
    }

    match lexer.token() {
        Token::IntegerConstant => {
            let Some(value) = integer_value(lexer.text()) else {
                return Err(lexer.error(format!("invalid integer constant: {}", lexer.text())));
            };
            if !kind.fits(value) {
                return Err(lexer.error(format!(
                    "constant does not fit in a {}-bit field",
                    kind.bits()
                )));
            }
            lexer.next()?;
            Ok(if kind.is_float() {
                Scalar::Float(value as f64)
            } else {
                Scalar::Int(value as i64)
            })
        }
        Token::FloatConstant => {
            if !kind.is_float() {
                return Err(lexer.error(format!(
                    "type mismatch: expecting: {}, found: float constant",
                    kind.name()
                )));
            }
            let Ok(value) = lexer.text().parse::<f64>() else {
                return Err(lexer.error(format!("invalid float constant: {}", lexer.text())));
            };
            lexer.next()?;
            Ok(Scalar::Float(value))
        }
        Token::StringConstant => {
            let location = lexer.location();
            let text = lexer.text().to_string();
            lexer.next()?;
            let mut value = 0i64;
            for word in text.split_whitespace() {
                value |= enum_value(lexer, schema, enum_def, word, &location)?;
            }
            Ok(Scalar::Int(value))
        }
        Token::Identifier => {
            let location = lexer.location();
            let mut name = lexer.text().to_string();
            lexer.next()?;
            while lexer.is_next(Token::Char('.'))? {
                name.push('.');
                name.push_str(&lexer.expect_identifier()?);
            }
            enum_value(lexer, schema, enum_def, &name, &location).map(Scalar::Int)
        }
        _ => Err(lexer.error(format!(
            "expecting: {} value instead got: {}",
            kind.name(),
            lexer.describe()
        ))),
    }
}

/// Resolve one enumerant name. Fields typed by an enum accept bare names;
/// plain integer fields need `Enum.Value`.
fn enum_value(
    lexer: &Lexer,
    schema: &Schema,
    enum_def: Option<EnumId>,
    word: &str,
    location: &Location,
) -> Result<i64> {
    let (id, bare) = match enum_def {
        Some(id) => {
            let def = schema.enum_def(id);
            let qualified = schema.qualify(def.def.namespace, &def.def.name);
            let bare = [qualified.as_str(), def.def.name.as_str()]
                .into_iter()
                .find_map(|prefix| word.strip_prefix(prefix)?.strip_prefix('.'))
                .unwrap_or(word);
            (id, bare)
        }
        None => {
            let Some((prefix, bare)) = word.rsplit_once('.') else {
                return Err(lexer.error_at(
                    location,
                    "enum values need to be qualified by an enum type",
                ));
            };
            let found = schema.find_enum(prefix).or_else(|| {
                schema
                    .enums
                    .iter_slots()
                    .find(|(_, e)| e.def.name == prefix)
                    .map(|(slot, _)| EnumId(slot))
            });
            let Some(id) = found else {
                return Err(lexer.error_at(location, format!("unknown enum: {prefix}")));
            };
            (id, bare)
        }
    };

    let def = schema.enum_def(id);
    match def.values.get(bare) {
        Some(value) => Ok(value.value),
        None => Err(lexer.error_at(
            location,
            with_suggestion(
                format!("unknown enum value: {bare}, for enum: {}", def.def.name),
                bare,
                def.values.names(),
            ),
        )),
    }
}
