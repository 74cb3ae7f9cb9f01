// ==============================================================================
// Symbol Tables and the Schema Registry
// ==============================================================================
//
// Schema definitions are stored in arenas: a `SymbolTable<T>` keeps items in a
// `Vec` (so handles stay stable) alongside an `IndexMap` from name to slot that
// records declaration order. A struct referenced before it is declared gets a
// `Predeclared` placeholder; when the declaration arrives the placeholder is
// completed in place and moved to the back of the declaration order.
//
// Type names resolve relative to the active namespace: the innermost namespace
// is searched first, then each enclosing one, ending at the root.

use indexmap::{IndexMap, IndexSet};

use crate::lexer::Location;
use crate::model::schema::{
    DefState, EnumDef, EnumId, Namespace, ScalarKind, ServiceDef, StructDef, StructId, Type,
};
use crate::suggest::with_suggestion;

/// Attributes the compiler understands without an `attribute` declaration.
pub const BUILTIN_ATTRIBUTES: &[&str] = &[
    "id",
    "deprecated",
    "required",
    "key",
    "hash",
    "force_align",
    "bit_flags",
    "original_order",
    "nested_flatbuffer",
];

// ==============================================================================
// SymbolTable
// ==============================================================================

/// A name-indexed arena that remembers declaration order.
#[derive(Debug, Clone)]
pub struct SymbolTable<T> {
    items: Vec<T>,
    order: IndexMap<String, usize>,
}

impl<T> Default for SymbolTable<T> {
    fn default() -> Self {
        SymbolTable {
            items: Vec::new(),
            order: IndexMap::new(),
        }
    }
}

impl<T> SymbolTable<T> {
    pub fn new() -> Self {
        SymbolTable::default()
    }

    /// Add `item` under `name`. Returns the existing slot if the name is taken.
    pub fn insert(&mut self, name: impl Into<String>, item: T) -> Result<usize, usize> {
        let name = name.into();
        if let Some(&existing) = self.order.get(&name) {
            return Err(existing);
        }
        let slot = self.items.len();
        self.items.push(item);
        self.order.insert(name, slot);
        Ok(slot)
    }

    pub fn slot_of(&self, name: &str) -> Option<usize> {
        self.order.get(name).copied()
    }

    pub fn get(&self, name: &str) -> Option<&T> {
        self.slot_of(name).map(|slot| &self.items[slot])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.order.contains_key(name)
    }

    /// Items in declaration order.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &T> + '_ {
        self.order.values().map(|&slot| &self.items[slot])
    }

    /// `(slot, item)` pairs in declaration order.
    pub fn iter_slots(&self) -> impl Iterator<Item = (usize, &T)> + '_ {
        self.order.values().map(|&slot| (slot, &self.items[slot]))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> + '_ {
        self.order.keys().map(String::as_str)
    }

    /// The most recently declared item.
    pub fn last(&self) -> Option<&T> {
        self.order.last().map(|(_, &slot)| &self.items[slot])
    }

    pub fn last_mut(&mut self) -> Option<&mut T> {
        let slot = *self.order.last()?.1;
        Some(&mut self.items[slot])
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Move `name` to the end of the declaration order. Slots are unaffected.
    pub fn move_to_back(&mut self, name: &str) {
        if let Some(slot) = self.order.shift_remove(name) {
            self.order.insert(name.to_string(), slot);
        }
    }

    /// Consume the table, yielding `(name, item)` in declaration order.
    pub fn into_ordered(self) -> Vec<(String, T)> {
        let mut items: Vec<Option<T>> = self.items.into_iter().map(Some).collect();
        self.order
            .into_iter()
            .filter_map(|(name, slot)| items[slot].take().map(|item| (name, item)))
            .collect()
    }
}

impl<T> std::ops::Index<usize> for SymbolTable<T> {
    type Output = T;

    fn index(&self, slot: usize) -> &T {
        &self.items[slot]
    }
}

impl<T> std::ops::IndexMut<usize> for SymbolTable<T> {
    fn index_mut(&mut self, slot: usize) -> &mut T {
        &mut self.items[slot]
    }
}

// ==============================================================================
// Schema Registry
// ==============================================================================

/// Every definition parsed so far, plus the file-level pragmas.
#[derive(Debug, Clone)]
pub struct Schema {
    pub namespaces: Vec<Namespace>,
    /// Structs and tables, keyed by fully qualified name.
    pub structs: SymbolTable<StructDef>,
    /// Enums and unions, keyed by fully qualified name.
    pub enums: SymbolTable<EnumDef>,
    pub services: SymbolTable<ServiceDef>,
    pub root_struct: Option<StructId>,
    pub file_identifier: Option<String>,
    pub file_extension: Option<String>,
    pub known_attributes: IndexSet<String>,
}

/// An end-of-parse validation failure, reported at a remembered location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unresolved {
    pub location: Location,
    pub message: String,
}

impl Default for Schema {
    fn default() -> Self {
        Schema::new()
    }
}

impl Schema {
    pub fn new() -> Self {
        Schema {
            namespaces: vec![Namespace::default()],
            structs: SymbolTable::new(),
            enums: SymbolTable::new(),
            services: SymbolTable::new(),
            root_struct: None,
            file_identifier: None,
            file_extension: None,
            known_attributes: BUILTIN_ATTRIBUTES.iter().map(|a| a.to_string()).collect(),
        }
    }

    pub fn struct_def(&self, id: StructId) -> &StructDef {
        &self.structs[id.0]
    }

    pub fn struct_def_mut(&mut self, id: StructId) -> &mut StructDef {
        &mut self.structs[id.0]
    }

    pub fn enum_def(&self, id: EnumId) -> &EnumDef {
        &self.enums[id.0]
    }

    /// Look up a struct or table by its fully qualified name.
    pub fn find_struct(&self, qualified: &str) -> Option<StructId> {
        self.structs.slot_of(qualified).map(StructId)
    }

    /// Look up an enum or union by its fully qualified name.
    pub fn find_enum(&self, qualified: &str) -> Option<EnumId> {
        self.enums.slot_of(qualified).map(EnumId)
    }

    /// Index of the namespace with these components, registering it if new.
    pub fn intern_namespace(&mut self, components: Vec<String>) -> usize {
        if let Some(i) = self
            .namespaces
            .iter()
            .position(|ns| ns.components == components)
        {
            return i;
        }
        self.namespaces.push(Namespace { components });
        self.namespaces.len() - 1
    }

    /// Fully qualified name of a definition declared in `namespace`.
    pub fn qualify(&self, namespace: usize, name: &str) -> String {
        self.namespaces[namespace].qualify(name)
    }

    /// Search `table` for `name` from the innermost namespace outwards.
    fn find_scoped<T>(&self, table: &SymbolTable<T>, namespace: usize, name: &str) -> Option<usize> {
        let ns = &self.namespaces[namespace];
        (0..=ns.components.len())
            .rev()
            .find_map(|depth| table.slot_of(&ns.qualify_prefix(depth, name)))
    }

    pub fn lookup_enum(&self, namespace: usize, name: &str) -> Option<EnumId> {
        self.find_scoped(&self.enums, namespace, name).map(EnumId)
    }

    pub fn lookup_struct(&self, namespace: usize, name: &str) -> Option<StructId> {
        self.find_scoped(&self.structs, namespace, name).map(StructId)
    }

    /// Resolve a struct reference, creating a placeholder in the active
    /// namespace when nothing by that name is visible yet.
    pub fn lookup_create_struct(
        &mut self,
        namespace: usize,
        name: &str,
        location: Location,
        generated: bool,
    ) -> StructId {
        if let Some(id) = self.lookup_struct(namespace, name) {
            return id;
        }
        let qualified = self.qualify(namespace, name);
        let (namespace, bare) = self.split_qualified(namespace, name);
        let mut def = StructDef::predeclared(bare, namespace, location);
        def.def.generated = generated;
        let slot = match self.structs.insert(qualified, def) {
            Ok(slot) | Err(slot) => slot,
        };
        StructId(slot)
    }

    /// For a dotted reference like `Sample.Vec3` made inside namespace `N`,
    /// the placeholder belongs to `N.Sample` and is named `Vec3`.
    fn split_qualified(&mut self, namespace: usize, name: &str) -> (usize, String) {
        match name.rsplit_once('.') {
            None => (namespace, name.to_string()),
            Some((prefix, bare)) => {
                let mut components = self.namespaces[namespace].components.clone();
                components.extend(prefix.split('.').map(str::to_string));
                (self.intern_namespace(components), bare.to_string())
            }
        }
    }

    /// Resolve a named type reference: enums take priority, anything else is
    /// a struct or table (possibly a placeholder).
    pub fn resolve_type_name(
        &mut self,
        namespace: usize,
        name: &str,
        location: Location,
        generated: bool,
    ) -> Type {
        if let Some(id) = self.lookup_enum(namespace, name) {
            let def = self.enum_def(id);
            return if def.is_union {
                Type::Union(id)
            } else {
                Type::Scalar {
                    kind: def.underlying,
                    enum_def: Some(id),
                }
            };
        }
        Type::Struct(self.lookup_create_struct(namespace, name, location, generated))
    }

    // ==========================================================================
    // Layout queries
    // ==========================================================================

    /// Bytes a value of `ty` occupies inline in its parent.
    pub fn inline_size(&self, ty: &Type) -> usize {
        match ty {
            Type::Scalar { kind, .. } => kind.size(),
            Type::Struct(id) if self.struct_def(*id).fixed => self.struct_def(*id).bytesize,
            Type::String | Type::Vector(_) | Type::Struct(_) | Type::Union(_) => 4,
        }
    }

    /// Alignment of a value of `ty` stored inline.
    pub fn inline_alignment(&self, ty: &Type) -> usize {
        match ty {
            Type::Scalar { kind, .. } => kind.size(),
            Type::Struct(id) if self.struct_def(*id).fixed => self.struct_def(*id).minalign,
            Type::String | Type::Vector(_) | Type::Struct(_) | Type::Union(_) => 4,
        }
    }

    /// Whether `ty` is a struct stored inline.
    pub fn is_fixed_struct(&self, ty: &Type) -> bool {
        matches!(ty, Type::Struct(id) if self.struct_def(*id).fixed)
    }

    /// Whether `ty` is `[ubyte]`, the only type `nested_flatbuffer` applies to.
    pub fn is_byte_vector(ty: &Type) -> bool {
        matches!(ty, Type::Vector(elem) if **elem == Type::scalar(ScalarKind::UByte))
    }

    // ==========================================================================
    // End-of-parse validation
    // ==========================================================================

    /// Names a "did you mean" hint may propose for an unresolved type.
    fn defined_type_names(&self) -> impl Iterator<Item = &str> + '_ {
        let structs = self
            .structs
            .iter()
            .filter(|s| s.state == DefState::Defined)
            .map(|s| s.def.name.as_str());
        let enums = self.enums.iter().map(|e| e.def.name.as_str());
        structs.chain(enums)
    }

    /// Check that every referenced type was declared and that unions and
    /// services only name tables.
    pub fn validate(&self) -> Result<(), Unresolved> {
        for def in self.structs.iter() {
            if def.state == DefState::Predeclared {
                return Err(Unresolved {
                    location: def.location.clone(),
                    message: with_suggestion(
                        format!("type referenced but not defined: {}", def.def.name),
                        &def.def.name,
                        self.defined_type_names(),
                    ),
                });
            }
        }
        for enum_def in self.enums.iter().filter(|e| e.is_union) {
            for value in enum_def.values.iter() {
                if let Some(id) = value.struct_def
                    && self.struct_def(id).fixed
                {
                    return Err(Unresolved {
                        location: self.struct_def(id).location.clone(),
                        message: format!(
                            "only tables can be union elements: {} in union {}",
                            value.name, enum_def.def.name
                        ),
                    });
                }
            }
        }
        for service in self.services.iter() {
            for call in service.calls.iter() {
                if self.struct_def(call.request).fixed || self.struct_def(call.response).fixed {
                    return Err(Unresolved {
                        location: call.location.clone(),
                        message: format!(
                            "rpc request and response types must be tables: {}.{}",
                            service.def.name, call.name
                        ),
                    });
                }
            }
        }
        Ok(())
    }
}
