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

//! Diagnostic collection for the compiler pipeline.
//!
//! Errors never abort the compilation (except the single fatal lex error);
//! they accumulate here, tagged with the offending source line, and the
//! statement loop resumes at the next declaration boundary.

use codespan_reporting::diagnostic::{Diagnostic, Label};
use codespan_reporting::files::{self, SimpleFiles};
use codespan_reporting::term;
use codespan_reporting::term::termcolor;

/// File identifier. References a source file in the source database.
pub type FileId = usize;

/// Source database. Stores the source file contents for reference.
pub type SourceDatabase = SimpleFiles<String, String>;

/// List of unique errors reported as compiler diagnostics.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[repr(u16)]
pub enum ErrorCode {
    UnterminatedComment = 1,
    InvalidDirective = 2,
    ElseWithoutIf = 3,
    DuplicateElseBranch = 4,
    EndifWithoutIf = 5,
    UnterminatedConditional = 6,
    ErrorDirective = 7,
    InvalidPragma = 8,
    InvalidPragmaValue = 9,
    MisplacedPragma = 10,
    DuplicateTypeIdentifier = 11,
    DuplicateFieldIdentifier = 12,
    UndeclaredTypeIdentifier = 13,
    UndeclaredParentIdentifier = 14,
    InvalidBitCount = 15,
    InvalidBitfieldType = 16,
    InvalidArrayCount = 17,
    InvalidValueExpression = 18,
    NestedDeclaration = 19,
    UnexpectedToken = 20,
    MissingToken = 21,
    EmptyDeclaration = 22,
    UnterminatedDeclaration = 23,
    InvalidFlexibleArray = 24,
    DuplicateFlexibleArray = 25,
    InvalidEnumValue = 26,
    InvalidEnumBackingType = 27,
}

impl From<ErrorCode> for String {
    fn from(code: ErrorCode) -> Self {
        format!("E{}", code as u16)
    }
}

/// A structural error raised while handling one statement. Converted into a
/// [`Diagnostic`] at the statement boundary; never escapes the main loop.
#[derive(Debug)]
pub struct CompileError {
    pub code: ErrorCode,
    pub message: String,
    pub line: u32,
}

impl CompileError {
    pub fn new(code: ErrorCode, line: u32, message: impl Into<String>) -> CompileError {
        CompileError { code, message: message.into(), line }
    }
}

/// Aggregate compiler diagnostics.
#[derive(Debug, Default)]
pub struct Diagnostics {
    pub diagnostics: Vec<Diagnostic<FileId>>,
}

impl Diagnostics {
    pub fn is_empty(&self) -> bool {
        self.diagnostics.is_empty()
    }

    pub fn push(&mut self, diagnostic: Diagnostic<FileId>) {
        self.diagnostics.push(diagnostic)
    }

    pub fn emit(
        &self,
        sources: &SourceDatabase,
        writer: &mut dyn termcolor::WriteColor,
    ) -> Result<(), files::Error> {
        let config = term::Config::default();
        for d in self.diagnostics.iter() {
            term::emit(writer, &config, sources, d)?;
        }
        Ok(())
    }

    /// Render all diagnostics without color, for the `compile()` string
    /// contract. Always well formed, possibly empty.
    pub fn render_to_string(&self, sources: &SourceDatabase) -> String {
        let mut buffer = termcolor::NoColor::new(Vec::new());
        self.emit(sources, &mut buffer).expect("diagnostic rendering failed");
        String::from_utf8(buffer.into_inner()).expect("diagnostics are valid UTF-8")
    }
}

/// Byte offsets at which each line of `source` starts, used to turn the
/// lexer's line numbers back into spans for diagnostic labels.
pub fn line_starts(source: &str) -> Vec<usize> {
    files::line_starts(source).collect()
}

/// Builds the primary label covering one full source line (1-based).
/// Lines outside the file (synthetic input, end of file) yield no label.
pub fn line_label(file: FileId, starts: &[usize], source_len: usize, line: u32) -> Option<Label<FileId>> {
    if line == 0 {
        return None;
    }
    let index = (line - 1) as usize;
    let start = *starts.get(index)?;
    let end = starts.get(index + 1).map(|s| s.saturating_sub(1)).unwrap_or(source_len);
    Some(Label::primary(file, start..end.max(start)))
}

impl CompileError {
    /// Convert into a rendered diagnostic, attaching the source line when
    /// it exists.
    pub fn into_diagnostic(
        self,
        file: FileId,
        starts: &[usize],
        source_len: usize,
    ) -> Diagnostic<FileId> {
        let mut diagnostic =
            Diagnostic::error().with_code(self.code).with_message(self.message);
        if let Some(label) = line_label(file, starts, source_len, self.line) {
            diagnostic = diagnostic.with_labels(vec![label]);
        }
        diagnostic
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_label_ranges() {
        let source = "first\nsecond\nthird";
        let starts = line_starts(source);
        let label = line_label(0, &starts, source.len(), 2).unwrap();
        assert_eq!(label.range, 6..12);
        let label = line_label(0, &starts, source.len(), 3).unwrap();
        assert_eq!(label.range, 13..18);
        assert!(line_label(0, &starts, source.len(), 0).is_none());
        assert!(line_label(0, &starts, source.len(), 9).is_none());
    }

    #[test]
    fn render_includes_code_and_line() {
        let mut sources = SourceDatabase::new();
        let source = "struct P {\n};\n".to_owned();
        let file = sources.add("input".to_owned(), source.clone());
        let starts = line_starts(&source);

        let mut diagnostics = Diagnostics::default();
        diagnostics.push(
            CompileError::new(ErrorCode::EmptyDeclaration, 2, "empty struct")
                .into_diagnostic(file, &starts, source.len()),
        );

        let rendered = diagnostics.render_to_string(&sources);
        assert!(rendered.contains("E22"));
        assert!(rendered.contains("empty struct"));
        assert!(rendered.contains("};"));
    }
}
