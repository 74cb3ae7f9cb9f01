// ==============================================================================
// Integration Tests: Compile Schemas, Encode Data, Read the Buffers Back
// ==============================================================================
//
// Each test compiles an inline schema (plus, usually, a trailing literal
// object) through the public `Compiler` API and then decodes the resulting
// buffer with the read-only views. Decoded values are compared rather than raw
// bytes, since vtable sharing and padding are free to vary.

mod common;

use std::fs;

use flatidl::Compiler;
use flatidl::model::schema::{Scalar, ScalarKind};
use flatidl::view::{Table, file_identifier};
use pretty_assertions::assert_eq;

use common::{compile_error, encode};

// ==============================================================================
// Schema Shape
// ==============================================================================

#[test]
fn struct_layout_has_natural_offsets() {
    let output = Compiler::new()
        .compile_str("struct V3 { x:float; y:float; z:float; }")
        .unwrap();
    let id = output.schema.find_struct("V3").unwrap();
    let def = output.schema.struct_def(id);
    assert_eq!(def.minalign, 4);
    assert_eq!(def.bytesize, 12);
    let offsets: Vec<usize> = def.fields.iter().map(|f| f.offset).collect();
    assert_eq!(offsets, vec![0, 4, 8]);
}

#[test]
fn mixed_struct_is_padded_to_its_alignment() {
    let output = Compiler::new()
        .compile_str("struct S { a: byte; b: long; c: short; }")
        .unwrap();
    let def = output.schema.struct_def(output.schema.find_struct("S").unwrap());
    assert_eq!(def.minalign, 8);
    assert_eq!(def.bytesize, 24);
    let sizes: usize = def.fields.iter().map(|f| output.schema.inline_size(&f.ty)).sum();
    let padding: usize = def.fields.iter().map(|f| f.padding).sum();
    assert_eq!(sizes + padding, def.bytesize);
}

#[test]
fn enum_values_count_up_from_zero() {
    let output = Compiler::new()
        .compile_str("enum Color:byte { Red, Green, Blue }")
        .unwrap();
    let color = output.schema.enum_def(output.schema.find_enum("Color").unwrap());
    let values: Vec<(&str, i64)> = color
        .values
        .iter()
        .map(|v| (v.name.as_str(), v.value))
        .collect();
    assert_eq!(values, vec![("Red", 0), ("Green", 1), ("Blue", 2)]);
}

#[test]
fn descending_enum_is_rejected_unless_proto_compat() {
    let source = "enum Color:byte { Red=2, Green=1 }";
    assert!(compile_error(source).contains("enum values must be specified in ascending order: Green"));
    assert!(Compiler::new().proto_compat(true).compile_str(source).is_ok());
}

#[test]
fn partial_field_ids_are_rejected() {
    let err = compile_error("table T { a: int (id: 0); b: int; }");
    assert!(err.contains("either all fields or no fields must have an 'id' attribute"), "{err}");
}

#[test]
fn nested_vectors_are_rejected() {
    let err = compile_error("table T { v: [[int]]; }");
    assert!(err.contains("nested vector types not supported"), "{err}");
}

#[test]
fn dangling_reference_is_reported_at_the_end() {
    let err = compile_error("table T { m: Missing; }");
    assert!(err.contains("Missing"), "{err}");
}

// ==============================================================================
// Encoding Round Trips
// ==============================================================================

#[test]
fn scalar_and_string_fields_round_trip() {
    let buf = encode(r#"table T { a:int; b:string; } root_type T; { a: 5, b: "hi" }"#);
    let root = Table::root(&buf).unwrap();
    assert_eq!(root.scalar(0, ScalarKind::Int), Some(Scalar::Int(5)));
    assert_eq!(root.string(1), Some("hi"));
}

#[test]
fn field_set_twice_is_rejected() {
    let err = compile_error("table T { a:int; } root_type T; { a: 1, a: 2 }");
    assert!(err.contains("field set more than once: a"), "{err}");
}

#[test]
fn defaults_are_not_stored() {
    let buf = encode(
        "table T { hp: short = 100; mana: short = 150; } root_type T; { hp: 100, mana: 20 }",
    );
    let root = Table::root(&buf).unwrap();
    assert!(!root.is_present(0));
    assert_eq!(
        root.scalar_or(0, ScalarKind::Short, Scalar::Int(100)),
        Scalar::Int(100)
    );
    assert_eq!(root.scalar(1, ScalarKind::Short), Some(Scalar::Int(20)));
}

#[test]
fn literal_order_does_not_change_the_decoded_values() {
    let schema = "table T { a: byte; b: long; c: string; d: short; } root_type T;";
    let forward = encode(&format!("{schema} {{ a: 1, b: 2, c: \"x\", d: 4 }}"));
    let backward = encode(&format!("{schema} {{ d: 4, c: \"x\", b: 2, a: 1 }}"));
    assert_eq!(forward, backward);
}

#[test]
fn vectors_keep_element_order() {
    let buf = encode(
        r#"
        table Item { id: int; }
        table Inventory { nums: [int]; names: [string]; items: [Item]; }
        root_type Inventory;
        { nums: [1, 2, 3], names: ["a", "b"], items: [{ id: 7 }, { id: 9 }] }
        "#,
    );
    let root = Table::root(&buf).unwrap();

    let nums = root.vector(0).unwrap();
    let values: Vec<Option<Scalar>> = (0..nums.len())
        .map(|i| nums.scalar(i, ScalarKind::Int))
        .collect();
    assert_eq!(
        values,
        vec![Some(Scalar::Int(1)), Some(Scalar::Int(2)), Some(Scalar::Int(3))]
    );

    let names = root.vector(1).unwrap();
    assert_eq!(names.len(), 2);
    assert_eq!(names.string(1), Some("b"));

    let items = root.vector(2).unwrap();
    let second = items.table(1).unwrap();
    assert_eq!(second.scalar(0, ScalarKind::Int), Some(Scalar::Int(9)));
}

#[test]
fn empty_vector_is_present_but_empty() {
    let buf = encode("table T { v: [ubyte]; } root_type T; { v: [] }");
    let root = Table::root(&buf).unwrap();
    assert!(root.vector(0).unwrap().is_empty());
}

#[test]
fn structs_are_stored_inline() {
    let buf = encode(
        r#"
        struct Vec3 { x: float; y: float; z: float; }
        table Monster { pos: Vec3; hp: short; }
        root_type Monster;
        { pos: { x: 1.0, y: 2.0, z: 3.0 }, hp: 80 }
        "#,
    );
    let root = Table::root(&buf).unwrap();
    let pos = root.struct_bytes(0, 12).unwrap();
    assert_eq!(ScalarKind::Float.decode(&pos[4..]), Some(Scalar::Float(2.0)));
    assert_eq!(ScalarKind::Float.decode(&pos[8..]), Some(Scalar::Float(3.0)));
    assert_eq!(root.scalar(1, ScalarKind::Short), Some(Scalar::Int(80)));
}

#[test]
fn nested_structs_keep_their_padding() {
    let buf = encode(
        r#"
        struct Inner { a: byte; b: int; }
        struct Outer { flag: bool; inner: Inner; big: double; }
        table T { items: [Outer]; }
        root_type T;
        { items: [
            { flag: 1, inner: { a: -1, b: 7 }, big: 2.5 },
            { flag: 0, inner: { a: 3, b: -2 }, big: 0.5 }
        ] }
        "#,
    );
    let items = Table::root(&buf).unwrap().vector(0).unwrap();
    assert_eq!(items.len(), 2);
    let second = items.struct_bytes(1, 24).unwrap();
    assert_eq!(second.as_ptr() as usize % 8, buf.as_ptr() as usize % 8);
    assert_eq!(&second[..4], &[0, 0, 0, 0]);
    assert_eq!(ScalarKind::Byte.decode(&second[4..]), Some(Scalar::Int(3)));
    assert_eq!(&second[5..8], &[0, 0, 0]);
    assert_eq!(ScalarKind::Int.decode(&second[8..]), Some(Scalar::Int(-2)));
    assert_eq!(&second[12..16], &[0, 0, 0, 0]);
    assert_eq!(ScalarKind::Double.decode(&second[16..]), Some(Scalar::Float(0.5)));
    let first = items.struct_bytes(0, 24).unwrap();
    assert_eq!(first[0], 1);
    assert_eq!(ScalarKind::Byte.decode(&first[4..]), Some(Scalar::Int(-1)));
}

#[test]
fn incomplete_struct_is_rejected() {
    let err = compile_error(
        "struct P { x: int; y: int; } table T { p: P; } root_type T; { p: { x: 1 } }",
    );
    assert!(err.contains("incomplete struct initialization: P"), "{err}");
}

#[test]
fn unions_select_a_table() {
    let buf = encode(
        r#"
        table Sword { damage: int; }
        table Shield { armor: int; }
        union Equipment { Sword, Shield }
        table Hero { equipped: Equipment; }
        root_type Hero;
        { equipped_type: Shield, equipped: { armor: 5 } }
        "#,
    );
    let root = Table::root(&buf).unwrap();
    assert_eq!(root.scalar(0, ScalarKind::UByte), Some(Scalar::Int(2)));
    let shield = root.table(1).unwrap();
    assert_eq!(shield.scalar(0, ScalarKind::Int), Some(Scalar::Int(5)));
}

#[test]
fn union_value_before_its_type_is_rejected() {
    let err = compile_error(
        r#"
        table A { x: int; }
        union U { A }
        table T { u: U; }
        root_type T;
        { u: { x: 1 }, u_type: A }
        "#,
    );
    assert!(err.contains("missing type field before this union value: u"), "{err}");
}

#[test]
fn enums_and_bit_flags_encode_by_name() {
    let buf = encode(
        r#"
        enum Color : byte { Red = 1, Green, Blue }
        enum Flags : ubyte (bit_flags) { A, B, C }
        table T { color: Color = Red; flags: Flags; }
        root_type T;
        { color: Blue, flags: "A C" }
        "#,
    );
    let root = Table::root(&buf).unwrap();
    assert_eq!(root.scalar(0, ScalarKind::Byte), Some(Scalar::Int(3)));
    assert_eq!(root.scalar(1, ScalarKind::UByte), Some(Scalar::Int(5)));
}

#[test]
fn hashed_strings_become_integers() {
    let buf = encode(
        r#"table T { id: uint (hash: "fnv1a_32"); } root_type T; { id: "hello" }"#,
    );
    let root = Table::root(&buf).unwrap();
    assert_eq!(
        root.scalar(0, ScalarKind::UInt),
        Some(Scalar::Int(1_335_831_723))
    );
}

#[test]
fn file_identifier_follows_the_root_offset() {
    let buf = encode(
        r#"table T { a: int; } root_type T; file_identifier "MONS"; { a: 1 }"#,
    );
    assert_eq!(file_identifier(&buf), Some(&b"MONS"[..]));
    let root = Table::root(&buf).unwrap();
    assert_eq!(root.scalar(0, ScalarKind::Int), Some(Scalar::Int(1)));
}

#[test]
fn missing_required_field_is_rejected() {
    let err = compile_error(
        "table T { name: string (required); hp: int; } root_type T; { hp: 1 }",
    );
    assert!(err.contains("required field is missing: name in T"), "{err}");
}

// ==============================================================================
// Options
// ==============================================================================

#[test]
fn unknown_fields_can_be_skipped_with_a_warning() {
    let source = "table T { a: int; } root_type T; { a: 1, extra: { deep: [1, 2] } }";
    assert!(compile_error(source).contains("unknown field: extra"));

    let output = Compiler::new()
        .skip_unknown_fields(true)
        .compile_str(source)
        .unwrap();
    assert_eq!(output.warnings.len(), 1);
    assert_eq!(output.warnings[0].to_string(), "skipping unknown field: extra");
    let buf = output.buffer.unwrap();
    let root = Table::root(&buf).unwrap();
    assert_eq!(root.scalar(0, ScalarKind::Int), Some(Scalar::Int(1)));
}

#[test]
fn strict_json_wants_quoted_keys() {
    let source = r#"table T { a: int; } root_type T; { a: 1 }"#;
    let err = Compiler::new()
        .strict_json(true)
        .compile_str(source)
        .unwrap_err();
    assert!(err.to_string().contains("string constant"), "{err}");

    let quoted = r#"table T { a: int; } root_type T; { "a": 1 }"#;
    assert!(Compiler::new().strict_json(true).compile_str(quoted).is_ok());
}

// ==============================================================================
// Files and Includes
// ==============================================================================

#[test]
fn includes_resolve_across_namespaces() {
    let dir = tempfile::tempdir().unwrap();
    fs::create_dir(dir.path().join("shared")).unwrap();
    fs::write(
        dir.path().join("shared/point.fbs"),
        "namespace Shared;\nstruct Point { x: int; y: int; }\n",
    )
    .unwrap();
    let main = dir.path().join("game.fbs");
    fs::write(
        &main,
        r#"include "shared/point.fbs";
namespace Game;
table Spot { at: Shared.Point; }
root_type Spot;
{ at: { x: 3, y: 4 } }
"#,
    )
    .unwrap();

    let output = Compiler::new().compile(&main).unwrap();
    let point = output.schema.find_struct("Shared.Point").unwrap();
    assert!(output.schema.struct_def(point).def.generated);
    let spot = output.schema.find_struct("Game.Spot").unwrap();
    assert!(!output.schema.struct_def(spot).def.generated);

    let buf = output.buffer.unwrap();
    let at = Table::root(&buf).unwrap().struct_bytes(0, 8).unwrap();
    assert_eq!(ScalarKind::Int.decode(&at[4..]), Some(Scalar::Int(4)));
}

#[test]
fn include_dirs_are_searched_after_the_local_directory() {
    let schemas = tempfile::tempdir().unwrap();
    let common = tempfile::tempdir().unwrap();
    fs::write(common.path().join("color.fbs"), "enum Color : ubyte { Red, Green }").unwrap();
    let main = schemas.path().join("main.fbs");
    fs::write(&main, "include \"color.fbs\";\ntable T { c: Color; }\n").unwrap();

    assert!(Compiler::new().compile(&main).is_err());
    let output = Compiler::new()
        .include_dir(common.path())
        .compile(&main)
        .unwrap();
    assert!(output.schema.find_enum("Color").is_some());
}

#[test]
fn diamond_includes_parse_each_file_once() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("base.fbs"), "table Base { id: int; }").unwrap();
    fs::write(dir.path().join("left.fbs"), "include \"base.fbs\";\ntable Left { b: Base; }").unwrap();
    fs::write(dir.path().join("right.fbs"), "include \"base.fbs\";\ntable Right { b: Base; }").unwrap();
    let main = dir.path().join("main.fbs");
    fs::write(&main, "include \"left.fbs\";\ninclude \"right.fbs\";\n").unwrap();

    let output = Compiler::new().compile(&main).unwrap();
    assert_eq!(output.schema.structs.len(), 3);
}

#[test]
fn data_files_are_encoded_against_the_schema() {
    let dir = tempfile::tempdir().unwrap();
    let schema = dir.path().join("monster.fbs");
    fs::write(
        &schema,
        "table Monster { name: string; hp: short = 100; }\nroot_type Monster;\n",
    )
    .unwrap();
    let orc = dir.path().join("orc.json");
    fs::write(&orc, r#"{ "name": "orc", "hp": 300 }"#).unwrap();

    let output = Compiler::new().compile_with_data(&schema, &[&orc]).unwrap();
    let root = Table::root(&output.buffers[0].bytes).unwrap();
    assert_eq!(root.string(0), Some("orc"));
    assert_eq!(root.scalar(1, ScalarKind::Short), Some(Scalar::Int(300)));
}
