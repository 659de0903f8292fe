// Copyright 2024 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! `cdvc` command line wrapper around the compiler.
//!
//! Exit status: 0 for a clean compile, 1 when diagnostics were produced,
//! 2 for invalid invocation arguments.

use argh::FromArgs;
use std::path::{Path, PathBuf};
use std::process::exit;

use cdv_compiler::{compile, dump_layout, CompileResult};

#[derive(FromArgs, Debug)]
/// Struct description to DataView accessor class compiler.
struct Opt {
    #[argh(switch)]
    /// print tool version and exit.
    version: bool,

    #[argh(option)]
    /// apply a pragma ahead of the source, as "name=value". May be
    /// repeated; overrides apply in order.
    pragma: Vec<String>,

    #[argh(switch)]
    /// print the computed type layouts as JSON to stdout instead of
    /// writing generated code.
    dump_layout: bool,

    #[argh(positional)]
    /// input file, then optional output file; output defaults to the input
    /// path with the extension swapped to the output language.
    files: Vec<String>,
}

/// Default output path: input path with the extension replaced by the
/// output language's.
fn default_output_path(input: &Path, extension: &str) -> PathBuf {
    input.with_extension(extension)
}

/// Parse a repeatable "name=value" override.
fn parse_override(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((name, value)) if !name.is_empty() => Ok((name.to_owned(), value.to_owned())),
        _ => Err(format!("invalid pragma override {:?}, expected \"name=value\"", raw)),
    }
}

/// Diagnostics block prepended to the generated file, kept syntactically
/// inert by commenting every line.
fn comment_out(diagnostics: &str) -> String {
    let mut block = String::new();
    for line in diagnostics.lines() {
        if line.is_empty() {
            block.push_str("//\n");
        } else {
            block.push_str("// ");
            block.push_str(line);
            block.push('\n');
        }
    }
    block
}

fn invocation_error(message: &str) -> ! {
    eprintln!("cdvc: {}", message);
    exit(2);
}

fn main() {
    let args: Vec<String> = std::env::args().collect();
    let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
    let opt = match Opt::from_args(&arg_refs[..1], &arg_refs[1..]) {
        Ok(opt) => opt,
        Err(early_exit) => match early_exit.status {
            Ok(()) => {
                println!("{}", early_exit.output);
                exit(0);
            }
            Err(()) => {
                eprintln!("{}", early_exit.output);
                exit(2);
            }
        },
    };

    if opt.version {
        println!("cdvc {}", env!("CARGO_PKG_VERSION"));
        exit(0);
    }

    if opt.files.len() > 2 {
        invocation_error("too many positional arguments");
    }
    let Some(input_file) = opt.files.first().map(String::as_str) else {
        invocation_error("no input file specified");
    };
    let mut overrides = Vec::new();
    for raw in &opt.pragma {
        match parse_override(raw) {
            Ok(pair) => overrides.push(pair),
            Err(message) => invocation_error(&message),
        }
    }

    let source = match std::fs::read_to_string(input_file) {
        Ok(source) => source,
        Err(error) => invocation_error(&format!("could not read '{}': {}", input_file, error)),
    };

    if opt.dump_layout {
        match dump_layout(&source, &overrides) {
            Ok(json) => {
                println!("{}", json);
                exit(0);
            }
            Err(message) => {
                eprintln!("cdvc: {}", message);
                exit(1);
            }
        }
    }

    let CompileResult { code, diagnostics, language, .. } = compile(&source, &overrides);

    let output_path = match opt.files.get(1).map(String::as_str) {
        Some(path) => PathBuf::from(path),
        None => default_output_path(Path::new(input_file), &language.to_string()),
    };

    let contents = if diagnostics.is_empty() {
        code
    } else {
        eprintln!("{}", diagnostics);
        format!("{}{}", comment_out(&diagnostics), code)
    };
    if let Err(error) = std::fs::write(&output_path, contents) {
        eprintln!("cdvc: could not write '{}': {}", output_path.display(), error);
        exit(1);
    }

    exit(if diagnostics.is_empty() { 0 } else { 1 });
}
