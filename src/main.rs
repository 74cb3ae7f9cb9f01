// ==============================================================================
// CLI for the Schema Compiler
// ==============================================================================
//
//   flatidl [-I DIR]... [-o OUT] [--strict-json] [--skip-unknown]
//           [--proto-compat] [--dump-schema] SCHEMA [DATA...]
//
// The schema is always parsed. Each DATA file is then parsed against it in the
// same session and its buffer written to `OUT/<stem>.<ext>`, where `ext` is the
// schema's `file_extension` or `bin`. A literal object at the end of the schema
// itself is written the same way under the schema's stem.

use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

use miette::Context;

use flatidl::Compiler;
use flatidl::error::IdlError;
use flatidl::model::json::schema_to_json;

const USAGE: &str = "\
usage: flatidl [-I DIR]... [-o OUT] [--strict-json] [--skip-unknown]
               [--proto-compat] [--dump-schema] SCHEMA [DATA...]";

// ==============================================================================
// Argument Parsing
// ==============================================================================

#[derive(Debug, Default)]
struct Args {
    include_dirs: Vec<PathBuf>,
    out_dir: Option<PathBuf>,
    strict_json: bool,
    skip_unknown: bool,
    proto_compat: bool,
    dump_schema: bool,
    schema: PathBuf,
    data: Vec<PathBuf>,
}

enum Parsed {
    Run(Args),
    Help,
    Version,
}

fn parse_args(args: impl IntoIterator<Item = OsString>) -> Result<Parsed, lexopt::Error> {
    use lexopt::prelude::*;

    let mut parser = lexopt::Parser::from_args(args);
    let mut parsed = Args::default();
    let mut positional: Vec<PathBuf> = Vec::new();

    while let Some(arg) = parser.next()? {
        match arg {
            Short('I') | Long("include") => parsed.include_dirs.push(parser.value()?.into()),
            Short('o') | Long("out") => parsed.out_dir = Some(parser.value()?.into()),
            Long("strict-json") => parsed.strict_json = true,
            Long("skip-unknown") => parsed.skip_unknown = true,
            Long("proto-compat") => parsed.proto_compat = true,
            Long("dump-schema") => parsed.dump_schema = true,
            Short('h') | Long("help") => return Ok(Parsed::Help),
            Short('V') | Long("version") => return Ok(Parsed::Version),
            Value(value) => positional.push(value.into()),
            _ => return Err(arg.unexpected()),
        }
    }

    let mut positional = positional.into_iter();
    let Some(schema) = positional.next() else {
        return Err("missing SCHEMA argument".into());
    };
    parsed.schema = schema;
    parsed.data = positional.collect();
    Ok(Parsed::Run(parsed))
}

// ==============================================================================
// Entry Point
// ==============================================================================

fn main() -> miette::Result<()> {
    miette::set_hook(Box::new(|_| {
        Box::new(miette::MietteHandlerOpts::new().build())
    }))?;

    let args = match parse_args(std::env::args_os().skip(1)) {
        Ok(Parsed::Run(args)) => args,
        Ok(Parsed::Help) => {
            println!("{USAGE}");
            return Ok(());
        }
        Ok(Parsed::Version) => {
            println!("flatidl {}", env!("CARGO_PKG_VERSION"));
            return Ok(());
        }
        Err(e) => {
            return Err(IdlError::Other(format!("{e}\n{USAGE}"))).map_err(miette::Report::new);
        }
    };

    run(&args)
}

fn run(args: &Args) -> miette::Result<()> {
    let mut compiler = Compiler::new();
    for dir in &args.include_dirs {
        compiler.include_dir(dir);
    }
    compiler
        .strict_json(args.strict_json)
        .skip_unknown_fields(args.skip_unknown)
        .proto_compat(args.proto_compat);

    let out_dir = args.out_dir.clone().unwrap_or_else(|| PathBuf::from("."));

    let output = match compiler.compile_with_data(&args.schema, &args.data) {
        Ok(output) => output,
        Err(e) => {
            print_warnings(compiler.drain_warnings());
            return Err(e);
        }
    };
    print_warnings(output.warnings);

    if args.dump_schema {
        let json = serde_json::to_string_pretty(&schema_to_json(&output.schema))
            .map_err(|e| IdlError::Other(format!("serialize schema JSON: {e}")))
            .map_err(miette::Report::new)?;
        println!("{json}");
    }

    let extension = output.schema.file_extension.as_deref().unwrap_or("bin");
    if let Some(buffer) = &output.buffer {
        write_buffer(&out_dir, &args.schema, extension, buffer)?;
    }
    for buffer in &output.buffers {
        write_buffer(&out_dir, &buffer.path, extension, &buffer.bytes)?;
    }
    Ok(())
}

fn print_warnings(warnings: Vec<miette::Report>) {
    for warning in warnings {
        eprintln!("{warning:?}");
    }
}

fn write_buffer(out_dir: &Path, source: &Path, extension: &str, bytes: &[u8]) -> miette::Result<()> {
    let stem = source
        .file_stem()
        .map_or_else(|| "out".into(), |s| s.to_string_lossy());
    fs::create_dir_all(out_dir)
        .map_err(|e| IdlError::Io {
            path: out_dir.to_path_buf(),
            source: e,
        })
        .map_err(miette::Report::new)
        .wrap_err("create output directory")?;
    let path = out_dir.join(format!("{stem}.{extension}"));
    fs::write(&path, bytes)
        .map_err(|e| IdlError::Io {
            path: path.clone(),
            source: e,
        })
        .map_err(miette::Report::new)
        .wrap_err_with(|| format!("write {}", path.display()))
}
