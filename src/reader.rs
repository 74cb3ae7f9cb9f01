// ==============================================================================
// Declaration Parser
// ==============================================================================
//
// A recursive-descent parser over the token stream produced by `Lexer`. One
// `Parser` is one parsing session: it owns the lexer, the schema registry being
// populated, the active namespace, the include bookkeeping, and the buffer a
// literal data block is encoded into. Nothing is global, so independent
// sessions can run side by side.
//
// Top-level declarations are handled one at a time. Struct and table
// references that are not yet known become `Predeclared` placeholders in the
// registry, which is what lets declarations refer to each other in any order;
// `Schema::validate` rejects any placeholder still open at the end.
//
// An `include` is parsed depth-first the moment it is met: the includer's lexer
// is set aside, the included file runs through the same declaration loop, and
// the includer resumes afterwards with its namespace restored.

use std::fs;
use std::path::{Path, PathBuf};

use crate::builder::{BufferBuilder, FILE_IDENTIFIER_LENGTH, FlatBufferBuilder};
use crate::doc_comments::Misplaced;
use crate::encode::{Encoder, integer_value, scalar_value};
use crate::error::{IdlError, Result, Warning};
use crate::hash::HashFunction;
use crate::import::IncludeContext;
use crate::layout::{apply_force_align, pad_last_field, place_fixed_field};
use crate::lexer::{Lexer, Location, Token};
use crate::model::schema::{
    Attributes, DefState, Definition, EnumDef, EnumId, EnumVal, FieldDef, Literal, RpcCall,
    ScalarKind, ServiceDef, StructDef, StructId, Type,
};
use crate::resolve::{Schema, SymbolTable};
use crate::suggest::with_suggestion;

/// Knobs that change how schemas and literal data are accepted.
#[derive(Debug, Clone, Default)]
pub struct ParseOptions {
    /// Literal data keys must be quoted and trailing commas are rejected.
    pub strict_json: bool,
    /// Unknown literal data fields are skipped with a warning.
    pub skip_unknown_fields: bool,
    /// Enum values may be declared in any order.
    pub proto_compat: bool,
    /// Searched, in order, after the including file's own directory.
    pub include_dirs: Vec<PathBuf>,
}

/// One parsing session.
pub struct Parser {
    lexer: Lexer,
    schema: Schema,
    options: ParseOptions,
    includes: IncludeContext,
    warnings: Vec<Warning>,
    builder: FlatBufferBuilder,
    /// Index into `schema.namespaces` of the active namespace.
    namespace: usize,
    /// Directory of the file being parsed, for relative includes.
    current_dir: PathBuf,
    /// Include nesting depth; definitions parsed below depth 0 are generated.
    depth: usize,
    /// Set once the current file has declared anything, after which an
    /// `include` is no longer allowed.
    decl_seen: bool,
    /// Set once the current file has encoded its literal object.
    object_encoded: bool,
}

impl Parser {
    pub fn new(options: ParseOptions) -> Self {
        let includes = IncludeContext::new(options.include_dirs.clone());
        Parser {
            lexer: Lexer::new("<input>", ""),
            schema: Schema::new(),
            options,
            includes,
            warnings: Vec::new(),
            builder: FlatBufferBuilder::new(),
            namespace: 0,
            current_dir: PathBuf::from("."),
            depth: 0,
            decl_seen: false,
            object_encoded: false,
        }
    }

    #[cfg(test)]
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn into_schema(self) -> Schema {
        self.schema
    }

    pub fn drain_warnings(&mut self) -> Vec<Warning> {
        std::mem::take(&mut self.warnings)
    }

    /// The buffer encoded by the most recent parse, if it contained a
    /// literal object.
    pub fn take_buffer(&mut self) -> Option<Vec<u8>> {
        if !self.builder.is_finished() {
            return None;
        }
        Some(std::mem::take(&mut self.builder).into_vec())
    }

    /// Parse a schema or data file from disk.
    pub fn parse_file(&mut self, path: &Path) -> Result<()> {
        let source = fs::read_to_string(path).map_err(|source| IdlError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        if let Ok(canonical) = path.canonicalize() {
            self.includes.mark_parsed(&canonical);
        }
        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
        self.parse_source(path.display().to_string(), source, dir)
    }

    /// Parse in-memory text. Relative includes resolve against the working
    /// directory.
    pub fn parse_str(&mut self, source: &str, name: &str) -> Result<()> {
        self.parse_source(name.to_string(), source.to_string(), PathBuf::from("."))
    }

    fn parse_source(&mut self, name: String, source: String, dir: PathBuf) -> Result<()> {
        self.lexer = Lexer::new(name, source);
        self.builder = FlatBufferBuilder::new();
        self.object_encoded = false;
        self.namespace = 0;
        self.current_dir = dir;
        self.decl_seen = false;
        self.depth = 0;

        self.lexer.next()?;
        self.parse_declarations()?;

        if let Err(unresolved) = self.schema.validate() {
            return Err(self.lexer.error_at(&unresolved.location, unresolved.message));
        }
        if let Some(root) = self.schema.root_struct {
            let def = self.schema.struct_def(root);
            if def.fixed {
                return Err(self.lexer.error_at(&def.location, "root type must be a table"));
            }
        }
        Ok(())
    }

    fn generated(&self) -> bool {
        self.depth > 0
    }

    // ==========================================================================
    // Top-level declarations
    // ==========================================================================

    fn parse_declarations(&mut self) -> Result<()> {
        loop {
            let token = self.lexer.token();
            match token {
                Token::Eof => {
                    self.reject_orphan_doc()?;
                    return Ok(());
                }
                Token::Include => {
                    if self.decl_seen {
                        return Err(self.lexer.error("includes must come before declarations"));
                    }
                    self.parse_include()?;
                    continue;
                }
                _ => self.decl_seen = true,
            }
            match token {
                Token::Namespace => self.parse_namespace()?,
                Token::Char('{') => self.parse_root_object()?,
                Token::Enum => self.parse_enum(false).map(drop)?,
                Token::Union => self.parse_enum(true).map(drop)?,
                Token::RootType => self.parse_root_type()?,
                Token::FileIdentifier => self.parse_file_identifier()?,
                Token::FileExtension => {
                    self.lexer.next()?;
                    let extension = self.lexer.expect_string()?;
                    self.schema.file_extension = Some(extension);
                    self.lexer.expect_char(';')?;
                }
                Token::Attribute => {
                    self.lexer.next()?;
                    let name = self.lexer.expect_string()?;
                    self.schema.known_attributes.insert(name);
                    self.lexer.expect_char(';')?;
                }
                Token::Service => self.parse_service()?,
                Token::Table => self.parse_struct(false).map(drop)?,
                Token::Struct => self.parse_struct(true).map(drop)?,
                _ => {
                    return Err(self.lexer.error(format!(
                        "expected a declaration instead got: {}",
                        self.lexer.describe()
                    )));
                }
            }
        }
    }

    /// Doc lines directly before a `}` or the end of the file document
    /// nothing.
    fn reject_orphan_doc(&self) -> Result<()> {
        if self.lexer.has_doc_comment() {
            return Err(self.lexer.error(Misplaced::NotAdjacent.message()));
        }
        Ok(())
    }

    fn parse_namespace(&mut self) -> Result<()> {
        self.lexer.next()?;
        let mut components = Vec::new();
        if !self.lexer.is_char(';') {
            components.push(self.lexer.expect_identifier()?);
            while self.lexer.is_next(Token::Char('.'))? {
                components.push(self.lexer.expect_identifier()?);
            }
        }
        self.lexer.expect_char(';')?;
        self.namespace = self.schema.intern_namespace(components);
        Ok(())
    }

    fn parse_root_type(&mut self) -> Result<()> {
        self.lexer.next()?;
        let location = self.lexer.location();
        let name = self.parse_dotted_name()?;
        let Some(id) = self.schema.lookup_struct(self.namespace, &name) else {
            let candidates: Vec<&str> = self.schema.structs.iter().map(|s| s.def.name.as_str()).collect();
            return Err(self.lexer.error_at(
                &location,
                with_suggestion(format!("unknown root type: {name}"), &name, candidates),
            ));
        };
        if self.schema.struct_def(id).fixed {
            return Err(self.lexer.error_at(&location, "root type must be a table"));
        }
        self.schema.root_struct = Some(id);
        self.lexer.expect_char(';')
    }

    fn parse_file_identifier(&mut self) -> Result<()> {
        self.lexer.next()?;
        if self.lexer.is(Token::StringConstant) && self.lexer.text().len() != FILE_IDENTIFIER_LENGTH {
            return Err(self.lexer.error(format!(
                "file_identifier must be exactly {FILE_IDENTIFIER_LENGTH} characters"
            )));
        }
        let identifier = self.lexer.expect_string()?;
        self.schema.file_identifier = Some(identifier);
        self.lexer.expect_char(';')
    }

    fn parse_root_object(&mut self) -> Result<()> {
        let Some(root) = self.schema.root_struct else {
            return Err(self.lexer.error("no root type set to parse json with"));
        };
        if self.object_encoded {
            return Err(self.lexer.error("cannot have more than one json object in a file"));
        }
        if self.schema.struct_def(root).state != DefState::Defined {
            return Err(self.lexer.error(format!(
                "root type is not defined yet: {}",
                self.schema.struct_def(root).def.name
            )));
        }
        let table = Encoder::new(
            &mut self.lexer,
            &self.schema,
            &self.options,
            &mut self.warnings,
            &mut self.builder,
        )
        .encode_table(root)?;
        let identifier = self.schema.file_identifier.as_deref();
        self.builder.finish(table, identifier);
        self.object_encoded = true;
        Ok(())
    }

    // ==========================================================================
    // Includes
    // ==========================================================================

    fn parse_include(&mut self) -> Result<()> {
        self.lexer.next()?;
        let location = self.lexer.location();
        let include = self.lexer.expect_string()?;
        let resolved = self
            .includes
            .resolve(&include, &self.current_dir)
            .map_err(|message| self.lexer.error_at(&location, message))?;
        self.lexer.expect_char(';')?;
        if self.includes.mark_parsed(&resolved) {
            return Ok(());
        }

        let source = fs::read_to_string(&resolved).map_err(|source| IdlError::Io {
            path: resolved.clone(),
            source,
        })?;
        let dir = resolved.parent().map_or_else(PathBuf::new, Path::to_path_buf);
        let outer_lexer = std::mem::replace(&mut self.lexer, Lexer::new(include, source));
        let outer_namespace = std::mem::replace(&mut self.namespace, 0);
        let outer_dir = std::mem::replace(&mut self.current_dir, dir);
        let outer_decl_seen = std::mem::replace(&mut self.decl_seen, false);
        self.depth += 1;

        let result = self.lexer.next().and_then(|()| self.parse_declarations());

        self.depth -= 1;
        self.lexer = outer_lexer;
        self.namespace = outer_namespace;
        self.current_dir = outer_dir;
        self.decl_seen = outer_decl_seen;
        result
    }

    // ==========================================================================
    // Enums and unions
    // ==========================================================================

    fn parse_enum(&mut self, is_union: bool) -> Result<EnumId> {
        let doc_comment = self.lexer.doc_comment();
        self.lexer.next()?;
        let location = self.lexer.location();
        let name = self.lexer.expect_identifier()?;
        let qualified = self.schema.qualify(self.namespace, &name);
        if self.schema.enums.contains(&qualified) {
            return Err(self.lexer.error_at(&location, format!("enum already exists: {name}")));
        }

        let underlying = if is_union {
            ScalarKind::UByte
        } else {
            if !self.lexer.is_next(Token::Char(':'))? {
                return Err(self
                    .lexer
                    .error("must specify the underlying integer type for this enum"));
            }
            let type_location = self.lexer.location();
            let type_name = self.parse_dotted_name()?;
            match ScalarKind::from_name(&type_name) {
                Some(kind) if kind.is_integer() => kind,
                _ => {
                    return Err(self
                        .lexer
                        .error_at(&type_location, "underlying enum type must be integral"));
                }
            }
        };

        let attributes = self.parse_metadata()?;
        let bit_flags = attributes.contains_key("bit_flags");
        let ordered = !is_union && !bit_flags && !self.options.proto_compat;

        let mut values = SymbolTable::new();
        let mut previous: Option<i128> = None;
        if is_union {
            values
                .insert(
                    "NONE",
                    EnumVal {
                        name: "NONE".to_string(),
                        value: 0,
                        doc_comment: Vec::new(),
                        struct_def: None,
                    },
                )
                .map_err(|_| self.lexer.error("enum value already exists: NONE"))?;
            previous = Some(0);
        }

        self.lexer.expect_char('{')?;
        loop {
            if self.lexer.is_char('}') {
                break;
            }
            let value_doc = self.lexer.doc_comment();
            let value_location = self.lexer.location();
            let full_name = self.parse_dotted_name()?;
            let value_name = full_name.replace('.', "_");
            if values.contains(&value_name) {
                return Err(self
                    .lexer
                    .error_at(&value_location, format!("enum value already exists: {value_name}")));
            }

            let raw = if self.lexer.is_next(Token::Char('='))? {
                self.integer_constant()?
            } else {
                previous.map_or(0, |p| p + 1)
            };
            if ordered && previous.is_some_and(|p| raw < p) {
                return Err(self.lexer.error_at(
                    &value_location,
                    format!("enum values must be specified in ascending order: {value_name}"),
                ));
            }
            previous = Some(raw);

            let value = if bit_flags {
                if raw < 0 || raw >= i128::from(underlying.bits()) {
                    return Err(self.lexer.error_at(
                        &value_location,
                        format!("bit flag out of range of underlying integral type: {value_name}"),
                    ));
                }
                (1u64 << raw) as i64
            } else {
                if !underlying.fits(raw) {
                    return Err(self.lexer.error_at(
                        &value_location,
                        format!(
                            "enum value does not fit in {}: {value_name}",
                            underlying.name()
                        ),
                    ));
                }
                raw as i64
            };

            let struct_def = is_union.then(|| {
                let generated = self.generated();
                self.schema
                    .lookup_create_struct(self.namespace, &full_name, value_location, generated)
            });
            // Checked above, so the insert cannot collide.
            let _ = values.insert(
                value_name.clone(),
                EnumVal {
                    name: value_name,
                    value,
                    doc_comment: value_doc,
                    struct_def,
                },
            );

            if !self.lexer.is_next(Token::Char(','))? {
                break;
            }
        }
        self.reject_orphan_doc()?;
        self.lexer.expect_char('}')?;

        let def = EnumDef {
            def: Definition {
                name,
                namespace: self.namespace,
                doc_comment,
                attributes,
                generated: self.generated(),
            },
            values,
            is_union,
            underlying,
            bit_flags,
        };
        let slot = self
            .schema
            .enums
            .insert(qualified, def)
            .map_err(|_| self.lexer.error_at(&location, "enum already exists"))?;
        Ok(EnumId(slot))
    }

    /// An integer constant, returned wide enough for any scalar.
    fn integer_constant(&mut self) -> Result<i128> {
        if !self.lexer.is(Token::IntegerConstant) {
            return Err(self.lexer.error(format!(
                "expecting: integer constant instead got: {}",
                self.lexer.describe()
            )));
        }
        let Some(value) = integer_value(self.lexer.text()) else {
            return Err(self
                .lexer
                .error(format!("invalid integer constant: {}", self.lexer.text())));
        };
        self.lexer.next()?;
        Ok(value)
    }

    // ==========================================================================
    // Structs and tables
    // ==========================================================================

    fn parse_struct(&mut self, fixed: bool) -> Result<StructId> {
        let doc_comment = self.lexer.doc_comment();
        self.lexer.next()?;
        let location = self.lexer.location();
        let name = self.lexer.expect_identifier()?;
        let qualified = self.schema.qualify(self.namespace, &name);

        let id = match self.schema.find_struct(&qualified) {
            Some(id) if self.schema.struct_def(id).state == DefState::Defined => {
                return Err(self
                    .lexer
                    .error_at(&location, format!("datatype already exists: {name}")));
            }
            Some(id) => id,
            None => {
                let placeholder = StructDef::predeclared(&name, self.namespace, location.clone());
                match self.schema.structs.insert(qualified.clone(), placeholder) {
                    Ok(slot) | Err(slot) => StructId(slot),
                }
            }
        };
        let attributes = self.parse_metadata()?;
        {
            let generated = self.generated();
            let namespace = self.namespace;
            let def = self.schema.struct_def_mut(id);
            def.state = DefState::Defined;
            def.fixed = fixed;
            def.location = location.clone();
            def.def.namespace = namespace;
            def.def.doc_comment = doc_comment;
            def.def.generated = generated;
            def.sort_by_size = !attributes.contains_key("original_order");
            def.def.attributes = attributes;
        }
        self.schema.structs.move_to_back(&qualified);

        self.lexer.expect_char('{')?;
        while !self.lexer.is_char('}') {
            self.parse_field(id)?;
        }
        self.reject_orphan_doc()?;
        self.lexer.next()?;

        if fixed {
            let force_align = self.schema.struct_def(id).def.attributes.get("force_align").cloned();
            let def = self.schema.struct_def_mut(id);
            let minalign = def.minalign;
            pad_last_field(def, minalign);
            if let Some(value) = force_align {
                let align = value
                    .as_ref()
                    .and_then(|v| integer_value(v.text()))
                    .and_then(|v| usize::try_from(v).ok())
                    .unwrap_or(0);
                apply_force_align(self.schema.struct_def_mut(id), align)
                    .map_err(|message| self.lexer.error_at(&location, message))?;
            }
        } else {
            self.assign_field_ids(id, &location)?;
        }
        Ok(id)
    }

    /// Honour explicit `id` attributes: all fields or none carry one, the ids
    /// are exactly `0..n`, and fields are renumbered and reordered by id.
    fn assign_field_ids(&mut self, id: StructId, location: &Location) -> Result<()> {
        let def = self.schema.struct_def(id);
        let with_id = def
            .fields
            .iter()
            .filter(|f| f.attributes.contains_key("id"))
            .count();
        if with_id == 0 {
            return Ok(());
        }
        if with_id != def.fields.len() {
            return Err(self.lexer.error_at(
                location,
                "either all fields or no fields must have an 'id' attribute",
            ));
        }

        let mut fields = std::mem::take(&mut self.schema.struct_def_mut(id).fields).into_ordered();
        let mut ids = Vec::with_capacity(fields.len());
        for (name, field) in &fields {
            let value = field
                .attributes
                .get("id")
                .and_then(Option::as_ref)
                .and_then(|v| integer_value(v.text()))
                .and_then(|v| usize::try_from(v).ok());
            let Some(value) = value else {
                return Err(self
                    .lexer
                    .error_at(location, format!("field id must be a non-negative integer: {name}")));
            };
            ids.push(value);
        }
        for ((_, field), value) in fields.iter_mut().zip(ids) {
            field.slot = value;
        }
        fields.sort_by_key(|(_, field)| field.slot);
        for (expected, (_, field)) in fields.iter().enumerate() {
            if field.slot != expected {
                return Err(self.lexer.error_at(
                    location,
                    format!("field id's must be consecutive from 0, id {expected} missing or set twice"),
                ));
            }
        }

        let def = self.schema.struct_def_mut(id);
        for (name, field) in fields {
            // Names were unique in the original table.
            let _ = def.fields.insert(name, field);
        }
        Ok(())
    }

    fn parse_field(&mut self, owner: StructId) -> Result<()> {
        let doc_comment = self.lexer.doc_comment();
        let location = self.lexer.location();
        let name = self.lexer.expect_identifier()?;
        self.lexer.expect_char(':')?;
        let type_location = self.lexer.location();
        let ty = self.parse_type()?;
        let fixed = self.schema.struct_def(owner).fixed;

        if fixed && !ty.is_scalar() && !self.schema.is_fixed_struct(&ty) {
            return Err(self
                .lexer
                .error_at(&type_location, "structs may contain only scalar or struct fields"));
        }
        // The struct's own size is not known until its closing brace.
        if fixed && ty == Type::Struct(owner) {
            return Err(self.lexer.error_at(
                &type_location,
                format!("struct can't contain itself: {}", self.schema.struct_def(owner).def.name),
            ));
        }

        let mut field = FieldDef::new(&name, ty.clone());
        field.doc_comment = doc_comment;
        if self.lexer.is_next(Token::Char('='))? {
            let Type::Scalar { kind, enum_def } = &ty else {
                return Err(self
                    .lexer
                    .error("default values currently only supported for scalars"));
            };
            field.default = scalar_value(&mut self.lexer, &self.schema, *kind, *enum_def, None)?;
        }
        field.attributes = self.parse_metadata()?;
        self.check_field_attributes(owner, &mut field, &location)?;
        self.lexer.expect_char(';')?;

        if let Type::Union(union) = ty {
            let mut type_field = FieldDef::new(
                format!("{name}_type"),
                Type::Scalar {
                    kind: ScalarKind::UByte,
                    enum_def: Some(union),
                },
            );
            if let Some(value) = field.attributes.get("id") {
                let id = value.as_ref().and_then(|v| integer_value(v.text()));
                match id {
                    Some(id) if id >= 1 => {
                        type_field
                            .attributes
                            .insert("id".to_string(), Some(Literal::Integer((id - 1).to_string())));
                    }
                    _ => {
                        return Err(self.lexer.error_at(
                            &location,
                            format!("a union field with an id needs an id of at least 1: {name}"),
                        ));
                    }
                }
            }
            self.add_field(owner, type_field, &location)?;
        }
        self.add_field(owner, field, &location)
    }

    fn add_field(&mut self, owner: StructId, mut field: FieldDef, location: &Location) -> Result<()> {
        let size = self.schema.inline_size(&field.ty);
        let alignment = self.schema.inline_alignment(&field.ty);
        let def = self.schema.struct_def_mut(owner);
        if def.fields.contains(&field.name) {
            return Err(self
                .lexer
                .error_at(location, format!("field already exists: {}", field.name)));
        }
        field.slot = def.fields.len();
        if def.fixed {
            place_fixed_field(def, &mut field, size, alignment);
        }
        let name = field.name.clone();
        let _ = def.fields.insert(name, field);
        Ok(())
    }

    /// Apply and validate the built-in field attributes.
    fn check_field_attributes(
        &mut self,
        owner: StructId,
        field: &mut FieldDef,
        location: &Location,
    ) -> Result<()> {
        let fixed = self.schema.struct_def(owner).fixed;

        if field.attributes.contains_key("deprecated") {
            if fixed {
                return Err(self
                    .lexer
                    .error_at(location, "can't deprecate fields in a struct"));
            }
            field.deprecated = true;
        }

        if field.attributes.contains_key("required") {
            if fixed || field.ty.is_scalar() {
                return Err(self
                    .lexer
                    .error_at(location, "only non-scalar fields in tables may be 'required'"));
            }
            field.required = true;
        }

        if field.attributes.contains_key("key") {
            if self.schema.struct_def(owner).has_key {
                return Err(self
                    .lexer
                    .error_at(location, "only one field may be set as 'key'"));
            }
            if !field.ty.is_scalar() && field.ty != Type::String {
                return Err(self
                    .lexer
                    .error_at(location, "'key' field must be string or scalar type"));
            }
            field.key = true;
            self.schema.struct_def_mut(owner).has_key = true;
        }

        if let Some(value) = field.attributes.get("hash") {
            let algorithm = value.as_ref().map(Literal::text).unwrap_or_default();
            let bits = match field.ty {
                Type::Scalar {
                    kind:
                        kind @ (ScalarKind::Short
                        | ScalarKind::UShort
                        | ScalarKind::Int
                        | ScalarKind::UInt
                        | ScalarKind::Long
                        | ScalarKind::ULong),
                    enum_def: None,
                } => kind.bits(),
                _ => {
                    return Err(self.lexer.error_at(
                        location,
                        "only short, ushort, int, uint, long and ulong data types support hashing.",
                    ));
                }
            };
            if HashFunction::find(algorithm, bits).is_none() {
                return Err(self.lexer.error_at(
                    location,
                    with_suggestion(
                        format!("Unknown hashing algorithm for {bits} bit types: {algorithm}"),
                        algorithm,
                        HashFunction::names_for(bits),
                    ),
                ));
            }
        }

        if let Some(value) = field.attributes.get("nested_flatbuffer") {
            let Some(Literal::String(table)) = value else {
                return Err(self
                    .lexer
                    .error_at(location, "nested_flatbuffer attribute must name a table"));
            };
            if !Schema::is_byte_vector(&field.ty) {
                return Err(self.lexer.error_at(
                    location,
                    "nested_flatbuffer attribute may only apply to a vector of ubyte",
                ));
            }
            let table = table.clone();
            let generated = self.generated();
            self.schema
                .lookup_create_struct(self.namespace, &table, location.clone(), generated);
        }
        Ok(())
    }

    // ==========================================================================
    // Services
    // ==========================================================================

    fn parse_service(&mut self) -> Result<()> {
        let doc_comment = self.lexer.doc_comment();
        self.lexer.next()?;
        let location = self.lexer.location();
        let name = self.lexer.expect_identifier()?;
        let qualified = self.schema.qualify(self.namespace, &name);
        if self.schema.services.contains(&qualified) {
            return Err(self
                .lexer
                .error_at(&location, format!("service already exists: {name}")));
        }
        let attributes = self.parse_metadata()?;

        let mut calls = SymbolTable::new();
        self.lexer.expect_char('{')?;
        while !self.lexer.is_char('}') {
            let call_doc = self.lexer.doc_comment();
            let call_location = self.lexer.location();
            let call_name = self.lexer.expect_identifier()?;
            self.lexer.expect_char('(')?;
            let request = self.parse_rpc_table()?;
            self.lexer.expect_char(')')?;
            self.lexer.expect_char(':')?;
            let response = self.parse_rpc_table()?;
            let call_attributes = self.parse_metadata()?;
            self.lexer.expect_char(';')?;

            let call = RpcCall {
                name: call_name.clone(),
                request,
                response,
                doc_comment: call_doc,
                attributes: call_attributes,
                location: call_location.clone(),
            };
            if calls.insert(call_name.clone(), call).is_err() {
                return Err(self
                    .lexer
                    .error_at(&call_location, format!("rpc call already exists: {call_name}")));
            }
        }
        self.reject_orphan_doc()?;
        self.lexer.next()?;

        let def = ServiceDef {
            def: Definition {
                name,
                namespace: self.namespace,
                doc_comment,
                attributes,
                generated: self.generated(),
            },
            calls,
        };
        // Checked for duplicates above.
        let _ = self.schema.services.insert(qualified, def);
        Ok(())
    }

    fn parse_rpc_table(&mut self) -> Result<StructId> {
        let location = self.lexer.location();
        let name = self.parse_dotted_name()?;
        let generated = self.generated();
        let id = self
            .schema
            .lookup_create_struct(self.namespace, &name, location.clone(), generated);
        if self.schema.struct_def(id).fixed {
            return Err(self
                .lexer
                .error_at(&location, "rpc request and response types must be tables"));
        }
        Ok(id)
    }

    // ==========================================================================
    // Types, names, and attributes
    // ==========================================================================

    fn parse_dotted_name(&mut self) -> Result<String> {
        let mut name = self.lexer.expect_identifier()?;
        while self.lexer.is_next(Token::Char('.'))? {
            name.push('.');
            name.push_str(&self.lexer.expect_identifier()?);
        }
        Ok(name)
    }

    fn parse_type(&mut self) -> Result<Type> {
        if self.lexer.is_char('[') {
            self.lexer.next()?;
            let element_location = self.lexer.location();
            let element = self.parse_type()?;
            match element {
                Type::Vector(_) => {
                    return Err(self.lexer.error_at(
                        &element_location,
                        "nested vector types not supported (wrap in table first).",
                    ));
                }
                Type::Union(_) => {
                    return Err(self.lexer.error_at(
                        &element_location,
                        "vector of union types not supported (wrap in table first).",
                    ));
                }
                _ => {}
            }
            self.lexer.expect_char(']')?;
            return Ok(Type::Vector(Box::new(element)));
        }

        let location = self.lexer.location();
        let name = self.parse_dotted_name()?;
        if name == "string" {
            return Ok(Type::String);
        }
        if let Some(kind) = ScalarKind::from_name(&name) {
            return Ok(Type::scalar(kind));
        }
        let generated = self.generated();
        Ok(self
            .schema
            .resolve_type_name(self.namespace, &name, location, generated))
    }

    /// `( name [: constant], ... )`, or nothing.
    fn parse_metadata(&mut self) -> Result<Attributes> {
        let mut attributes = Attributes::new();
        if !self.lexer.is_next(Token::Char('('))? {
            return Ok(attributes);
        }
        loop {
            let location = self.lexer.location();
            let name = self.lexer.expect_identifier()?;
            if !self.schema.known_attributes.contains(&name) {
                return Err(self.lexer.error_at(
                    &location,
                    with_suggestion(
                        format!("user define attributes must be declared before use: {name}"),
                        &name,
                        self.schema.known_attributes.iter().map(String::as_str),
                    ),
                ));
            }
            let value = if self.lexer.is_next(Token::Char(':'))? {
                Some(self.parse_literal()?)
            } else {
                None
            };
            attributes.insert(name, value);
            if self.lexer.is_next(Token::Char(')'))? {
                return Ok(attributes);
            }
            self.lexer.expect_char(',')?;
        }
    }

    fn parse_literal(&mut self) -> Result<Literal> {
        let text = self.lexer.text().to_string();
        let literal = match self.lexer.token() {
            Token::IntegerConstant => Literal::Integer(text),
            Token::FloatConstant => Literal::Float(text),
            Token::StringConstant => Literal::String(text),
            _ => {
                return Err(self.lexer.error(format!(
                    "expecting: constant instead got: {}",
                    self.lexer.describe()
                )));
            }
        };
        self.lexer.next()?;
        Ok(literal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::schema::Scalar;
    use pretty_assertions::assert_eq;

    fn parse(source: &str) -> Parser {
        let mut parser = Parser::new(ParseOptions::default());
        if let Err(e) = parser.parse_str(source, "<test>") {
            panic!("schema should parse: {e}");
        }
        parser
    }

    fn parse_error_with(options: ParseOptions, source: &str) -> String {
        let mut parser = Parser::new(options);
        match parser.parse_str(source, "<test>") {
            Ok(()) => panic!("schema parsed without error"),
            Err(IdlError::Parse(diag)) => diag.message,
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    fn parse_error(source: &str) -> String {
        parse_error_with(ParseOptions::default(), source)
    }

    fn field_names(schema: &Schema, name: &str) -> Vec<(String, usize)> {
        let id = schema.find_struct(name).expect("struct exists");
        schema
            .struct_def(id)
            .fields
            .iter()
            .map(|f| (f.name.clone(), f.slot))
            .collect()
    }

    #[test]
    fn struct_layout_of_three_floats() {
        let parser = parse("struct V3 { x:float; y:float; z:float; }");
        let schema = parser.schema();
        let def = schema.struct_def(schema.find_struct("V3").unwrap());
        assert!(def.fixed);
        assert_eq!(def.minalign, 4);
        assert_eq!(def.bytesize, 12);
        let offsets: Vec<usize> = def.fields.iter().map(|f| f.offset).collect();
        assert_eq!(offsets, vec![0, 4, 8]);
    }

    #[test]
    fn nested_struct_layout() {
        let parser = parse(
            "struct Inner { a:byte; b:int; }
             struct Outer { flag:bool; inner:Inner; big:double; }",
        );
        let schema = parser.schema();
        let outer = schema.struct_def(schema.find_struct("Outer").unwrap());
        let offsets: Vec<(usize, usize)> = outer.fields.iter().map(|f| (f.offset, f.padding)).collect();
        assert_eq!(offsets, vec![(0, 3), (4, 4), (16, 0)]);
        assert_eq!(outer.bytesize, 24);
        assert_eq!(outer.minalign, 8);
    }

    #[test]
    fn enum_values_count_up() {
        let parser = parse("enum Color:byte { Red, Green = 4, Blue }");
        let schema = parser.schema();
        let color = schema.enum_def(schema.find_enum("Color").unwrap());
        let values: Vec<(&str, i64)> = color.values.iter().map(|v| (v.name.as_str(), v.value)).collect();
        assert_eq!(values, vec![("Red", 0), ("Green", 4), ("Blue", 5)]);
        assert_eq!(color.underlying, ScalarKind::Byte);
    }

    #[test]
    fn enum_values_must_not_decrease() {
        assert_eq!(
            parse_error("enum Color:byte { Red = 2, Green = 1 }"),
            "enum values must be specified in ascending order: Green"
        );
        // Equal values are allowed.
        parse("enum Alias:int { A = 1, B = 1 }");
        let options = ParseOptions {
            proto_compat: true,
            ..ParseOptions::default()
        };
        let mut parser = Parser::new(options);
        parser
            .parse_str("enum Color:byte { Red = 2, Green = 1 }", "<test>")
            .unwrap();
    }

    #[test]
    fn enum_needs_integral_underlying_type() {
        assert_eq!(
            parse_error("enum E { A }"),
            "must specify the underlying integer type for this enum"
        );
        assert_eq!(
            parse_error("enum E:float { A }"),
            "underlying enum type must be integral"
        );
        assert_eq!(
            parse_error("enum E:ubyte { A = 256 }"),
            "enum value does not fit in ubyte: A"
        );
    }

    #[test]
    fn bit_flags_shift_values() {
        let parser = parse("enum Flags:ubyte (bit_flags) { A, B, C = 7 }");
        let schema = parser.schema();
        let flags = schema.enum_def(schema.find_enum("Flags").unwrap());
        let values: Vec<i64> = flags.values.iter().map(|v| v.value).collect();
        assert_eq!(values, vec![1, 2, 128]);
        assert_eq!(
            parse_error("enum Flags:ubyte (bit_flags) { A = 8 }"),
            "bit flag out of range of underlying integral type: A"
        );
    }

    #[test]
    fn union_gets_none_and_type_field() {
        let parser = parse(
            "table Sword { damage:int; }
             table Shield { armor:int; }
             union Equipment { Sword, Shield }
             table Hero { name:string; gear:Equipment; }",
        );
        let schema = parser.schema();
        let equipment = schema.enum_def(schema.find_enum("Equipment").unwrap());
        assert!(equipment.is_union);
        let names: Vec<&str> = equipment.values.iter().map(|v| v.name.as_str()).collect();
        assert_eq!(names, vec!["NONE", "Sword", "Shield"]);
        assert_eq!(
            field_names(schema, "Hero"),
            vec![
                ("name".to_string(), 0),
                ("gear_type".to_string(), 1),
                ("gear".to_string(), 2)
            ]
        );
    }

    #[test]
    fn forward_references_resolve() {
        let parser = parse(
            "table Monster { weapon:Weapon; pos:Vec3; }
             table Weapon { owner:Monster; }
             struct Vec3 { x:float; y:float; z:float; }",
        );
        let schema = parser.schema();
        let order: Vec<&str> = schema.structs.names().collect();
        assert_eq!(order, vec!["Monster", "Weapon", "Vec3"]);
    }

    #[test]
    fn dangling_reference_is_reported() {
        assert_eq!(
            parse_error("table Monster { weapon:Wepon; }\ntable Weapon {}"),
            "type referenced but not defined: Wepon (did you mean `Weapon`?)"
        );
    }

    #[test]
    fn struct_fields_must_be_fixed() {
        assert_eq!(
            parse_error("struct S { name:string; }"),
            "structs may contain only scalar or struct fields"
        );
        assert_eq!(
            parse_error("table T {} struct S { t:T; }"),
            "structs may contain only scalar or struct fields"
        );
    }

    #[test]
    fn struct_cannot_contain_itself() {
        assert_eq!(
            parse_error("struct A { x:int; a:A; }"),
            "struct can't contain itself: A"
        );
        assert_eq!(
            parse_error("namespace N; struct A { x:int; a:N.A; }"),
            "struct can't contain itself: A"
        );
        // A struct declared further down has no layout yet.
        assert_eq!(
            parse_error("struct A { b:B; } struct B { x:int; }"),
            "structs may contain only scalar or struct fields"
        );
    }

    #[test]
    fn ids_are_all_or_nothing() {
        assert_eq!(
            parse_error("table T { a:int (id: 0); b:int; }"),
            "either all fields or no fields must have an 'id' attribute"
        );
        assert_eq!(
            parse_error("table T { a:int (id: 0); b:int (id: 2); }"),
            "field id's must be consecutive from 0, id 1 missing or set twice"
        );
        assert_eq!(
            parse_error("table T { a:int (id: 1); b:int (id: 1); }"),
            "field id's must be consecutive from 0, id 0 missing or set twice"
        );
    }

    #[test]
    fn ids_reorder_fields() {
        let parser = parse(
            "table U { x:int; }
             union Any { U }
             table T { b:int (id: 3); a:string (id: 0); u:Any (id: 2); }",
        );
        assert_eq!(
            field_names(parser.schema(), "T"),
            vec![
                ("a".to_string(), 0),
                ("u_type".to_string(), 1),
                ("u".to_string(), 2),
                ("b".to_string(), 3)
            ]
        );
    }

    #[test]
    fn nested_vectors_are_rejected() {
        assert_eq!(
            parse_error("table T { v:[[int]]; }"),
            "nested vector types not supported (wrap in table first)."
        );
        assert_eq!(
            parse_error("table A {} union U { A } table T { v:[U]; }"),
            "vector of union types not supported (wrap in table first)."
        );
    }

    #[test]
    fn field_attribute_rules() {
        assert_eq!(
            parse_error("struct S { a:int (deprecated); }"),
            "can't deprecate fields in a struct"
        );
        assert_eq!(
            parse_error("table T { a:int (required); }"),
            "only non-scalar fields in tables may be 'required'"
        );
        assert_eq!(
            parse_error("table T { a:int (key); b:int (key); }"),
            "only one field may be set as 'key'"
        );
        assert_eq!(
            parse_error("table T { v:[int] (key); }"),
            "'key' field must be string or scalar type"
        );
        assert_eq!(
            parse_error("table T { a:string = 3; }"),
            "default values currently only supported for scalars"
        );
        assert_eq!(
            parse_error("table T { a:int; a:int; }"),
            "field already exists: a"
        );
    }

    #[test]
    fn hash_attribute_is_validated() {
        parse("table T { id:uint (hash: \"fnv1a_32\"); }");
        assert_eq!(
            parse_error("table T { id:float (hash: \"fnv1a_32\"); }"),
            "only short, ushort, int, uint, long and ulong data types support hashing."
        );
        assert_eq!(
            parse_error("table T { id:long (hash: \"fnv1a_32\"); }"),
            "Unknown hashing algorithm for 64 bit types: fnv1a_32 (did you mean `fnv1a_64`?)"
        );
    }

    #[test]
    fn nested_flatbuffer_needs_ubyte_vector() {
        parse("table Inner {} table T { data:[ubyte] (nested_flatbuffer: \"Inner\"); }");
        assert_eq!(
            parse_error("table Inner {} table T { data:[int] (nested_flatbuffer: \"Inner\"); }"),
            "nested_flatbuffer attribute may only apply to a vector of ubyte"
        );
    }

    #[test]
    fn user_attributes_must_be_declared() {
        assert_eq!(
            parse_error("table T { a:int (priority: 1); }"),
            "user define attributes must be declared before use: priority"
        );
        let parser = parse("attribute \"priority\"; table T { a:int (priority: 1); }");
        let schema = parser.schema();
        let t = schema.struct_def(schema.find_struct("T").unwrap());
        let a = t.fields.get("a").unwrap();
        assert_eq!(
            a.attributes.get("priority"),
            Some(&Some(Literal::Integer("1".into())))
        );
    }

    #[test]
    fn force_align_is_applied() {
        let parser = parse("struct V (force_align: 16) { x:float; y:float; z:float; }");
        let schema = parser.schema();
        let v = schema.struct_def(schema.find_struct("V").unwrap());
        assert_eq!((v.minalign, v.bytesize), (16, 16));
    }

    #[test]
    fn defaults_and_enum_defaults() {
        let parser = parse(
            "enum Color:byte { Red, Green, Blue }
             table T { hp:short = 100; color:Color = Blue; ratio:float = 0.5; alive:bool = true; }",
        );
        let schema = parser.schema();
        let t = schema.struct_def(schema.find_struct("T").unwrap());
        let defaults: Vec<Scalar> = t.fields.iter().map(|f| f.default).collect();
        assert_eq!(
            defaults,
            vec![Scalar::Int(100), Scalar::Int(2), Scalar::Float(0.5), Scalar::Int(1)]
        );
    }

    #[test]
    fn namespaces_qualify_definitions() {
        let parser = parse(
            "namespace Game.Sample;
             struct Vec3 { x:float; }
             namespace Game;
             table Monster { pos:Sample.Vec3; }
             root_type Monster;",
        );
        let schema = parser.schema();
        let monster = schema.find_struct("Game.Monster").unwrap();
        assert_eq!(schema.root_struct, Some(monster));
        let pos = schema.struct_def(monster).fields.get("pos").unwrap();
        assert_eq!(pos.ty, Type::Struct(schema.find_struct("Game.Sample.Vec3").unwrap()));
    }

    #[test]
    fn root_type_checks() {
        assert_eq!(
            parse_error("table Monster {} root_type Monstr;"),
            "unknown root type: Monstr (did you mean `Monster`?)"
        );
        assert_eq!(
            parse_error("struct S { a:int; } root_type S;"),
            "root type must be a table"
        );
        assert_eq!(
            parse_error("file_identifier \"ABCDE\";"),
            "file_identifier must be exactly 4 characters"
        );
    }

    #[test]
    fn services_reference_tables() {
        let parser = parse(
            "table Req {} table Resp {}
             rpc_service Store { Get(Req):Resp; }",
        );
        let schema = parser.schema();
        let service = schema.services.get("Store").unwrap();
        assert_eq!(service.calls.names().collect::<Vec<_>>(), vec!["Get"]);
        assert_eq!(
            parse_error("struct S { a:int; } table Resp {} rpc_service Store { Get(S):Resp; }"),
            "rpc request and response types must be tables"
        );
    }

    #[test]
    fn doc_comments_attach_to_declarations() {
        let parser = parse("/// A monster.\ntable Monster {\n  /// Hit points.\n  hp:int;\n}");
        let schema = parser.schema();
        let monster = schema.struct_def(schema.find_struct("Monster").unwrap());
        assert_eq!(monster.def.doc_comment, vec![" A monster.".to_string()]);
        assert_eq!(
            monster.fields.get("hp").unwrap().doc_comment,
            vec![" Hit points.".to_string()]
        );
        assert_eq!(
            parse_error("table T {\n  a:int;\n  /// dangling\n}"),
            "a documentation comment must directly precede a declaration"
        );
    }

    #[test]
    fn duplicate_declarations() {
        assert_eq!(
            parse_error("table T {} table T {}"),
            "datatype already exists: T"
        );
        assert_eq!(
            parse_error("enum E:int { A } enum E:int { B }"),
            "enum already exists: E"
        );
        assert_eq!(
            parse_error("enum E:int { A, A }"),
            "enum value already exists: A"
        );
    }

    #[test]
    fn includes_are_parsed_once_and_marked_generated() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("common.fbs"),
            "namespace Common; struct Vec2 { x:float; y:float; }",
        )
        .unwrap();
        fs::write(
            dir.path().join("other.fbs"),
            "include \"common.fbs\"; table Other { v:Common.Vec2; }",
        )
        .unwrap();
        let main = dir.path().join("main.fbs");
        fs::write(
            &main,
            "include \"common.fbs\";\ninclude \"other.fbs\";\ntable Main { v:Common.Vec2; }",
        )
        .unwrap();

        let mut parser = Parser::new(ParseOptions::default());
        parser.parse_file(&main).unwrap();
        let schema = parser.schema();
        let vec2 = schema.struct_def(schema.find_struct("Common.Vec2").unwrap());
        assert!(vec2.def.generated);
        let main_def = schema.struct_def(schema.find_struct("Main").unwrap());
        assert!(!main_def.def.generated);
        // The include's namespace does not leak into the includer.
        assert!(schema.find_struct("Other").is_some());
    }

    #[test]
    fn include_after_declaration_is_rejected() {
        assert_eq!(
            parse_error("table T {}\ninclude \"x.fbs\";"),
            "includes must come before declarations"
        );
    }

    #[test]
    fn unexpected_top_level_token() {
        assert_eq!(
            parse_error("monster"),
            "expected a declaration instead got: identifier `monster`"
        );
    }
}
