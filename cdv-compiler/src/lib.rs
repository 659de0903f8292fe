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

//! Compiler from a C-struct layout description language to DataView
//! accessor classes.
//!
//! The input is a small struct/union/enum description language with a
//! restricted preprocessor; the output is a module of classes exposing
//! typed accessor properties over a fixed-layout byte buffer, in one of
//! two dialects. Compilation never fails outright: diagnostics accumulate
//! per statement and the generated code covers whatever parsed cleanly.

pub mod ast;
pub mod backends;
pub mod diagnostics;
pub mod eval;
pub mod lexer;
pub mod parser;
pub mod pragma;
pub mod preprocessor;

pub use pragma::{Language, Platform};

use std::io;
use std::path::Path;

/// Result of one compilation. `code` is always produced, possibly
/// representing only the successfully parsed subset of declarations;
/// `diagnostics` is a rendered, possibly empty report.
#[derive(Debug)]
pub struct CompileResult {
    pub code: String,
    pub diagnostics: String,
    pub language: Language,
    pub platform: Platform,
}

/// Compile DSL source text. `pragma_overrides` are applied in order ahead
/// of the source, as if each pair were its own `#pragma name(value)`
/// line. Each call owns all of its state; concurrent calls do not share
/// anything.
pub fn compile(source: &str, pragma_overrides: &[(String, String)]) -> CompileResult {
    let output = parser::compile_source(source, pragma_overrides);
    CompileResult {
        diagnostics: output.diagnostics.render_to_string(&output.sources),
        code: output.code,
        language: output.language,
        platform: output.platform,
    }
}

/// Read and compile a source file.
pub fn compile_file(
    path: impl AsRef<Path>,
    pragma_overrides: &[(String, String)],
) -> io::Result<CompileResult> {
    let source = std::fs::read_to_string(path)?;
    Ok(compile(&source, pragma_overrides))
}

/// Compile and return the computed type layouts as JSON, for inspection
/// and tests.
pub fn dump_layout(
    source: &str,
    pragma_overrides: &[(String, String)],
) -> Result<String, String> {
    let output = parser::compile_source(source, pragma_overrides);
    backends::json::generate(&output.registry)
}
