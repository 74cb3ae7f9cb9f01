// ==============================================================================
// Library API: The `Compiler` Builder
// ==============================================================================
//
// `Compiler` is the public entry point. It follows the non-consuming `&mut self`
// builder pattern, so the same builder can be configured once and reused for
// many calls. Every call starts a fresh `Parser` session; nothing carries over
// between calls except the configuration.
//
// A schema file may end with a literal object, in which case the encoded buffer
// comes back alongside the schema. `compile_with_data` covers the other common
// shape: one schema plus separate data files parsed in the same session, each
// producing its own buffer.

use std::path::{Path, PathBuf};

use crate::error::{IdlError, Warning};
use crate::reader::{ParseOptions, Parser};
use crate::resolve::Schema;

/// Builder for compiling schemas and literal data into binary buffers.
///
/// # Examples
///
/// ```no_run
/// use flatidl::Compiler;
///
/// let output = Compiler::new()
///     .include_dir("schemas/common/")
///     .compile("schemas/monster.fbs")?;
/// if let Some(buffer) = &output.buffer {
///     std::fs::write("monster.bin", buffer)?;
/// }
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub struct Compiler {
    options: ParseOptions,
    /// Warnings from the most recent call. Populated even when the call
    /// returns `Err`, so callers can report them before the error.
    accumulated_warnings: Vec<miette::Report>,
}

/// Result of compiling one schema source.
pub struct CompileOutput {
    /// Every definition parsed, including those pulled in by includes.
    pub schema: Schema,
    /// The encoded buffer, present when the source ended in a literal object.
    pub buffer: Option<Vec<u8>>,
    /// Non-fatal warnings, each a [`miette::Report`] with `Severity::Warning`.
    pub warnings: Vec<miette::Report>,
}

impl std::fmt::Debug for CompileOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompileOutput")
            .field("structs", &self.schema.structs.len())
            .field("enums", &self.schema.enums.len())
            .field("buffer", &self.buffer.as_ref().map(Vec::len))
            .field(
                "warnings",
                &format_args!("[{} warnings]", self.warnings.len()),
            )
            .finish()
    }
}

/// One data file's encoded buffer.
#[derive(Debug)]
pub struct DataBuffer {
    /// The data file the buffer was encoded from.
    pub path: PathBuf,
    pub bytes: Vec<u8>,
}

/// Result of compiling a schema together with separate data files.
pub struct DataOutput {
    pub schema: Schema,
    /// The schema's own trailing literal object, if it had one.
    pub buffer: Option<Vec<u8>>,
    /// One buffer per data file, in the order the files were given.
    pub buffers: Vec<DataBuffer>,
    pub warnings: Vec<miette::Report>,
}

impl std::fmt::Debug for DataOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataOutput")
            .field("buffer", &self.buffer.as_ref().map(Vec::len))
            .field("buffers", &self.buffers)
            .field(
                "warnings",
                &format_args!("[{} warnings]", self.warnings.len()),
            )
            .finish()
    }
}

impl Default for Compiler {
    fn default() -> Self {
        Self::new()
    }
}

impl Compiler {
    /// Create a builder with default options and no include directories.
    pub fn new() -> Self {
        Compiler {
            options: ParseOptions::default(),
            accumulated_warnings: Vec::new(),
        }
    }

    /// Add an include search directory. Searched in order added, after the
    /// including file's own directory.
    pub fn include_dir(&mut self, dir: impl Into<PathBuf>) -> &mut Self {
        self.options.include_dirs.push(dir.into());
        self
    }

    /// Require quoted keys and reject trailing commas in literal data.
    pub fn strict_json(&mut self, strict: bool) -> &mut Self {
        self.options.strict_json = strict;
        self
    }

    /// Skip unknown fields in literal data with a warning instead of failing.
    pub fn skip_unknown_fields(&mut self, skip: bool) -> &mut Self {
        self.options.skip_unknown_fields = skip;
        self
    }

    /// Accept enum values declared out of order.
    pub fn proto_compat(&mut self, compat: bool) -> &mut Self {
        self.options.proto_compat = compat;
        self
    }

    /// Drain warnings accumulated during the most recent call.
    ///
    /// On success the same warnings are in the output struct. On failure this
    /// is the only way to see warnings raised before the error. Each call
    /// drains the internal buffer.
    pub fn drain_warnings(&mut self) -> Vec<miette::Report> {
        std::mem::take(&mut self.accumulated_warnings)
    }

    /// Compile a schema file from disk.
    pub fn compile(&mut self, path: impl AsRef<Path>) -> miette::Result<CompileOutput> {
        let path = path.as_ref();
        self.run(|parser| parser.parse_file(path))
    }

    /// Compile schema text. Uses `"<input>"` as the source name in
    /// diagnostics.
    pub fn compile_str(&mut self, source: &str) -> miette::Result<CompileOutput> {
        self.compile_str_named(source, "<input>")
    }

    /// Compile schema text with a custom source name for diagnostics.
    pub fn compile_str_named(&mut self, source: &str, name: &str) -> miette::Result<CompileOutput> {
        self.run(|parser| parser.parse_str(source, name))
    }

    /// Compile a schema, then parse each data file against it in the same
    /// session. Every data file must contain exactly one literal object; an
    /// empty `data` slice compiles the schema alone.
    pub fn compile_with_data<P: AsRef<Path>>(
        &mut self,
        schema: impl AsRef<Path>,
        data: &[P],
    ) -> miette::Result<DataOutput> {
        self.accumulated_warnings.clear();
        let mut parser = Parser::new(self.options.clone());

        let result = encode_data(&mut parser, schema.as_ref(), data);
        let warnings: Vec<miette::Report> =
            parser.drain_warnings().into_iter().map(report).collect();
        match result {
            Ok((buffer, buffers)) => Ok(DataOutput {
                schema: parser.into_schema(),
                buffer,
                buffers,
                warnings,
            }),
            Err(e) => {
                self.accumulated_warnings = warnings;
                Err(e.into())
            }
        }
    }

    /// Run one fresh session, stashing warnings on failure.
    fn run(
        &mut self,
        parse: impl FnOnce(&mut Parser) -> Result<(), IdlError>,
    ) -> miette::Result<CompileOutput> {
        self.accumulated_warnings.clear();
        let mut parser = Parser::new(self.options.clone());

        let result = parse(&mut parser);
        let warnings: Vec<miette::Report> =
            parser.drain_warnings().into_iter().map(report).collect();
        if let Err(e) = result {
            self.accumulated_warnings = warnings;
            return Err(e.into());
        }

        let buffer = parser.take_buffer();
        Ok(CompileOutput {
            schema: parser.into_schema(),
            buffer,
            warnings,
        })
    }
}

fn encode_data<P: AsRef<Path>>(
    parser: &mut Parser,
    schema: &Path,
    data: &[P],
) -> Result<(Option<Vec<u8>>, Vec<DataBuffer>), IdlError> {
    parser.parse_file(schema)?;
    let schema_buffer = parser.take_buffer();

    let mut buffers = Vec::with_capacity(data.len());
    for path in data {
        let path = path.as_ref();
        parser.parse_file(path)?;
        let Some(bytes) = parser.take_buffer() else {
            return Err(IdlError::Other(format!(
                "{}: no literal object to encode",
                path.display()
            )));
        };
        buffers.push(DataBuffer {
            path: path.to_path_buf(),
            bytes,
        });
    }
    Ok((schema_buffer, buffers))
}

fn report(warning: Warning) -> miette::Report {
    miette::Report::new(warning)
}
