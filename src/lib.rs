//! Schema compiler for a FlatBuffers-style interface definition language.
//!
//! `flatidl` parses `.fbs` schema declarations (tables, structs, enums,
//! unions, services, namespaces, includes) into a resolved [`Schema`] with
//! computed struct layouts, and encodes JSON-like literal data against that
//! schema straight into a little-endian binary buffer.
//!
//! The entry point is [`Compiler`], a non-consuming builder that can be
//! reused across calls.
//!
//! # Compiling a schema and its data
//!
//! ```no_run
//! use flatidl::Compiler;
//!
//! let output = Compiler::new()
//!     .include_dir("schemas/common/")
//!     .compile_with_data("schemas/monster.fbs", &["data/orc.json"])?;
//! for buffer in &output.buffers {
//!     println!("{}: {} bytes", buffer.path.display(), buffer.bytes.len());
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! # Reading a buffer back
//!
//! ```no_run
//! use flatidl::Compiler;
//! use flatidl::view::Table;
//!
//! let output = Compiler::new().compile_str(
//!     "table T { name: string; } root_type T; { name: \"orc\" }",
//! )?;
//! let buffer = output.buffer.unwrap_or_default();
//! let root = Table::root(&buffer).expect("a root table");
//! assert_eq!(root.string(0), Some("orc"));
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! # Error handling
//!
//! All fallible methods return [`miette::Result`], which renders the
//! offending source line with a label when printed with `{:?}`.

pub mod builder;
pub(crate) mod compiler;
pub(crate) mod doc_comments;
pub(crate) mod encode;
pub mod error;
pub(crate) mod hash;
pub(crate) mod import;
pub(crate) mod layout;
pub mod lexer;
pub mod model;
pub(crate) mod reader;
pub mod resolve;
pub(crate) mod suggest;
pub mod view;

// Re-export the small number of public API at the crate root.
pub use compiler::{CompileOutput, Compiler, DataBuffer, DataOutput};
pub use resolve::Schema;
