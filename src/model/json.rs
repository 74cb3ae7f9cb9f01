// ==============================================================================
// Schema Reflection as JSON
// ==============================================================================
//
// Serializes a parsed `Schema` to a JSON document describing every object,
// enum, and service along with its computed layout: field slots and offsets,
// struct sizes and alignment, defaults, and attributes. This is what
// `--dump-schema` prints, and it is handy for diffing what the parser made of a
// schema against what the author intended.
//
// Key order inside each object is fixed (serde_json's `preserve_order`), and
// definitions appear in declaration order, so the output is stable enough to
// snapshot.

use serde_json::{Map, Value, json};

use super::schema::{Attributes, FieldDef, Literal, Scalar, ScalarKind, StructDef, Type};
use crate::resolve::{BUILTIN_ATTRIBUTES, Schema};

/// Serialize `schema` to its reflection form.
pub fn schema_to_json(schema: &Schema) -> Value {
    let mut obj = Map::new();

    let objects: Vec<Value> = schema
        .structs
        .iter()
        .map(|def| struct_to_json(schema, def))
        .collect();
    obj.insert("objects".to_string(), Value::Array(objects));

    let enums: Vec<Value> = schema
        .enums
        .iter()
        .map(|def| {
            let values: Vec<Value> = def
                .values
                .iter()
                .map(|val| {
                    let mut v = Map::new();
                    v.insert("name".to_string(), json!(val.name));
                    v.insert("value".to_string(), json!(val.value));
                    if let Some(id) = val.struct_def {
                        let table = schema.struct_def(id);
                        v.insert(
                            "union_type".to_string(),
                            json!(schema.qualify(table.def.namespace, &table.def.name)),
                        );
                    }
                    insert_docs(&mut v, &val.doc_comment);
                    Value::Object(v)
                })
                .collect();

            let mut e = Map::new();
            e.insert(
                "name".to_string(),
                json!(schema.qualify(def.def.namespace, &def.def.name)),
            );
            e.insert("values".to_string(), Value::Array(values));
            e.insert("is_union".to_string(), json!(def.is_union));
            e.insert("underlying_type".to_string(), json!(def.underlying.name()));
            if def.bit_flags {
                e.insert("bit_flags".to_string(), json!(true));
            }
            insert_attributes(&mut e, &def.def.attributes);
            insert_docs(&mut e, &def.def.doc_comment);
            if def.def.generated {
                e.insert("generated".to_string(), json!(true));
            }
            Value::Object(e)
        })
        .collect();
    obj.insert("enums".to_string(), Value::Array(enums));

    let services: Vec<Value> = schema
        .services
        .iter()
        .map(|service| {
            let calls: Vec<Value> = service
                .calls
                .iter()
                .map(|call| {
                    let mut c = Map::new();
                    c.insert("name".to_string(), json!(call.name));
                    c.insert("request".to_string(), json!(struct_name(schema, schema.struct_def(call.request))));
                    c.insert("response".to_string(), json!(struct_name(schema, schema.struct_def(call.response))));
                    insert_attributes(&mut c, &call.attributes);
                    insert_docs(&mut c, &call.doc_comment);
                    Value::Object(c)
                })
                .collect();
            let mut s = Map::new();
            s.insert(
                "name".to_string(),
                json!(schema.qualify(service.def.namespace, &service.def.name)),
            );
            s.insert("calls".to_string(), Value::Array(calls));
            insert_attributes(&mut s, &service.def.attributes);
            insert_docs(&mut s, &service.def.doc_comment);
            Value::Object(s)
        })
        .collect();
    if !services.is_empty() {
        obj.insert("services".to_string(), Value::Array(services));
    }

    if let Some(root) = schema.root_struct {
        obj.insert(
            "root_table".to_string(),
            json!(struct_name(schema, schema.struct_def(root))),
        );
    }
    if let Some(ident) = &schema.file_identifier {
        obj.insert("file_ident".to_string(), json!(ident));
    }
    if let Some(ext) = &schema.file_extension {
        obj.insert("file_ext".to_string(), json!(ext));
    }

    let declared: Vec<&str> = schema
        .known_attributes
        .iter()
        .map(String::as_str)
        .filter(|a| !BUILTIN_ATTRIBUTES.contains(a))
        .collect();
    if !declared.is_empty() {
        obj.insert("declared_attributes".to_string(), json!(declared));
    }

    Value::Object(obj)
}

fn struct_name(schema: &Schema, def: &StructDef) -> String {
    schema.qualify(def.def.namespace, &def.def.name)
}

fn struct_to_json(schema: &Schema, def: &StructDef) -> Value {
    let fields: Vec<Value> = def
        .fields
        .iter()
        .map(|field| field_to_json(schema, def, field))
        .collect();

    let mut obj = Map::new();
    obj.insert("name".to_string(), json!(struct_name(schema, def)));
    obj.insert("is_struct".to_string(), json!(def.fixed));
    obj.insert("fields".to_string(), Value::Array(fields));
    if def.fixed {
        obj.insert("minalign".to_string(), json!(def.minalign));
        obj.insert("bytesize".to_string(), json!(def.bytesize));
    }
    insert_attributes(&mut obj, &def.def.attributes);
    insert_docs(&mut obj, &def.def.doc_comment);
    if def.def.generated {
        obj.insert("generated".to_string(), json!(true));
    }
    Value::Object(obj)
}

fn field_to_json(schema: &Schema, parent: &StructDef, field: &FieldDef) -> Value {
    let mut obj = Map::new();
    obj.insert("name".to_string(), json!(field.name));
    obj.insert("type".to_string(), type_to_json(schema, &field.ty));
    obj.insert("id".to_string(), json!(field.slot));
    if parent.fixed {
        obj.insert("offset".to_string(), json!(field.offset));
        if field.padding > 0 {
            obj.insert("padding".to_string(), json!(field.padding));
        }
    } else {
        obj.insert("offset".to_string(), json!(field.vtable_offset()));
    }
    if let Type::Scalar { kind, .. } = &field.ty {
        obj.insert("default".to_string(), scalar_to_json(*kind, field.default));
    }
    for (flag, set) in [
        ("deprecated", field.deprecated),
        ("required", field.required),
        ("key", field.key),
    ] {
        if set {
            obj.insert(flag.to_string(), json!(true));
        }
    }
    insert_attributes(&mut obj, &field.attributes);
    insert_docs(&mut obj, &field.doc_comment);
    Value::Object(obj)
}

fn type_to_json(schema: &Schema, ty: &Type) -> Value {
    match ty {
        Type::Scalar { kind, enum_def } => {
            let mut obj = Map::new();
            obj.insert("base_type".to_string(), json!(kind.name()));
            if let Some(id) = enum_def {
                let def = schema.enum_def(*id);
                obj.insert(
                    "enum".to_string(),
                    json!(schema.qualify(def.def.namespace, &def.def.name)),
                );
            }
            Value::Object(obj)
        }
        Type::String => json!({ "base_type": "string" }),
        Type::Vector(elem) => json!({
            "base_type": "vector",
            "element": type_to_json(schema, elem),
        }),
        Type::Struct(id) => {
            let def = schema.struct_def(*id);
            json!({
                "base_type": if def.fixed { "struct" } else { "table" },
                "name": struct_name(schema, def),
            })
        }
        Type::Union(id) => {
            let def = schema.enum_def(*id);
            json!({
                "base_type": "union",
                "name": schema.qualify(def.def.namespace, &def.def.name),
            })
        }
    }
}

/// Defaults print in their declared domain: floats as JSON floats, `ulong`
/// values above `i64::MAX` unsigned.
fn scalar_to_json(kind: ScalarKind, value: Scalar) -> Value {
    match (kind, value) {
        (ScalarKind::Float | ScalarKind::Double, v) => json!(v.as_f64()),
        (ScalarKind::ULong, Scalar::Int(v)) => json!(v as u64),
        (_, v) => json!(v.as_i64()),
    }
}

fn insert_attributes(obj: &mut Map<String, Value>, attributes: &Attributes) {
    if attributes.is_empty() {
        return;
    }
    let attrs: Map<String, Value> = attributes
        .iter()
        .map(|(name, value)| {
            let value = match value {
                None => Value::Null,
                Some(Literal::Integer(s) | Literal::Float(s) | Literal::String(s)) => {
                    Value::String(s.clone())
                }
            };
            (name.clone(), value)
        })
        .collect();
    obj.insert("attributes".to_string(), Value::Object(attrs));
}

fn insert_docs(obj: &mut Map<String, Value>, doc: &[String]) {
    if !doc.is_empty() {
        obj.insert("documentation".to_string(), json!(doc));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::{ParseOptions, Parser};
    use pretty_assertions::assert_eq;

    fn reflect(source: &str) -> Value {
        let mut parser = Parser::new(ParseOptions::default());
        parser.parse_str(source, "<input>").unwrap();
        schema_to_json(parser.schema())
    }

    #[test]
    fn struct_layout_is_reported() {
        let json = reflect("struct Vec3 { x: float; y: float; z: float; w: double; }");
        assert_eq!(
            json["objects"][0],
            json!({
                "name": "Vec3",
                "is_struct": true,
                "fields": [
                    { "name": "x", "type": { "base_type": "float" }, "id": 0, "offset": 0, "default": 0.0 },
                    { "name": "y", "type": { "base_type": "float" }, "id": 1, "offset": 4, "default": 0.0 },
                    { "name": "z", "type": { "base_type": "float" }, "id": 2, "offset": 8, "padding": 4, "default": 0.0 },
                    { "name": "w", "type": { "base_type": "double" }, "id": 3, "offset": 16, "default": 0.0 },
                ],
                "minalign": 8,
                "bytesize": 24,
            })
        );
    }

    #[test]
    fn table_fields_carry_slots_and_flags() {
        let json = reflect(
            r#"
            namespace Game;
            enum Color : byte { Red = 1, Green }
            /// A monster.
            table Monster {
                hp: short = 100;
                name: string (required);
                color: Color = Green;
                old: int (deprecated);
            }
            root_type Monster;
            file_identifier "MONS";
            "#,
        );
        let monster = &json["objects"][0];
        assert_eq!(monster["name"], json!("Game.Monster"));
        assert_eq!(monster["documentation"], json!([" A monster."]));
        assert_eq!(monster["fields"][0]["default"], json!(100));
        assert_eq!(monster["fields"][1]["required"], json!(true));
        assert_eq!(monster["fields"][1]["offset"], json!(6));
        assert_eq!(
            monster["fields"][2]["type"],
            json!({ "base_type": "byte", "enum": "Game.Color" })
        );
        assert_eq!(monster["fields"][2]["default"], json!(2));
        assert_eq!(monster["fields"][3]["deprecated"], json!(true));
        assert_eq!(json["root_table"], json!("Game.Monster"));
        assert_eq!(json["file_ident"], json!("MONS"));
        assert_eq!(
            json["enums"][0]["values"],
            json!([{ "name": "Red", "value": 1 }, { "name": "Green", "value": 2 }])
        );
    }

    #[test]
    fn unions_name_their_tables() {
        let json = reflect("table A {} table B {} union Any { A, B } table T { u: Any; }");
        let any = &json["enums"][0];
        assert_eq!(any["is_union"], json!(true));
        assert_eq!(any["values"][0], json!({ "name": "NONE", "value": 0 }));
        assert_eq!(any["values"][2]["union_type"], json!("B"));
        let fields = &json["objects"][2]["fields"];
        assert_eq!(fields[0]["name"], json!("u_type"));
        assert_eq!(fields[1]["type"], json!({ "base_type": "union", "name": "Any" }));
    }

    #[test]
    fn declared_attributes_and_services() {
        let json = reflect(
            r#"
            attribute "priority";
            table Req { } table Resp { }
            rpc_service Api { Call(Req): Resp (priority: 1); }
            "#,
        );
        assert_eq!(json["declared_attributes"], json!(["priority"]));
        assert_eq!(
            json["services"][0]["calls"][0],
            json!({
                "name": "Call",
                "request": "Req",
                "response": "Resp",
                "attributes": { "priority": "1" },
            })
        );
        assert!(json.get("root_table").is_none());
    }
}
