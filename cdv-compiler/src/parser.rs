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

//! Declaration parser and layout engine.
//!
//! A state machine over the filtered token stream. At most one declaration
//! context is open at a time; fields are laid out as their lines parse and
//! accessors are emitted immediately. Every error is caught at the
//! statement boundary, recorded as a diagnostic, and parsing resumes at
//! the next statement.

use crate::ast::{
    align_up, ContextKind, EnumContext, FieldDescriptor, FieldKind, JsonField, NumericType,
    PendingBitfield, StructContext, TypeInfo, TypeKind, TypeRegistry, UnionState,
};
use crate::backends::CodeBuilder;
use crate::diagnostics::{
    line_starts, CompileError, Diagnostics, ErrorCode, FileId, SourceDatabase,
};
use crate::eval::{self, Scope, Value};
use crate::lexer::{self, Token};
use crate::pragma::{CommentMode, Language, Platform, PragmaError, PragmaState};
use crate::preprocessor::{CondError, CondStack};

/// Value of the `__COMPILEDATAVIEW` feature flag.
const COMPILER_VERSION: f64 = 2.0;

/// Tokens that resynchronize error recovery at a statement boundary.
const SYNC_TOKENS: [&str; 5] = ["struct", "typedef", "union", "enum", "#pragma"];

type ParseResult<T> = Result<T, CompileError>;

/// Everything produced by one compilation pass.
pub struct CompilerOutput {
    pub code: String,
    pub diagnostics: Diagnostics,
    pub sources: SourceDatabase,
    pub registry: TypeRegistry,
    pub language: Language,
    pub platform: Platform,
}

/// Compile DSL source into generated accessor classes. `overrides` are
/// applied ahead of the source, as if each were a `#pragma` line of its
/// own. All state lives in this call; the function is re-entrant.
pub fn compile_source(source: &str, overrides: &[(String, String)]) -> CompilerOutput {
    let mut sources = SourceDatabase::new();
    let file = sources.add("input".to_owned(), source.to_owned());
    let mut compiler = Compiler::new(source, file);

    for (name, value) in overrides {
        if let Err(error) = compiler.pragmas.apply(name, value) {
            compiler.diagnostics.push(
                codespan_reporting::diagnostic::Diagnostic::error()
                    .with_code(pragma_error_code(&error))
                    .with_message(format!("pragma override: {}", error)),
            );
        }
    }

    match lexer::split(source) {
        Ok(tokens) => compiler.tokens = tokens,
        Err(lexer::LexError::UnterminatedComment { line }) => {
            // The single fatal lex error: the token stream stays empty and
            // no declarations are produced.
            compiler.report(CompileError::new(
                ErrorCode::UnterminatedComment,
                line,
                "unterminated block comment",
            ));
        }
    }

    compiler.run();

    let code = compiler.builder.assemble(&compiler.pragmas, source);
    CompilerOutput {
        code,
        diagnostics: compiler.diagnostics,
        sources,
        registry: compiler.registry,
        language: compiler.pragmas.language,
        platform: compiler.pragmas.platform,
    }
}

fn pragma_error_code(error: &PragmaError) -> String {
    match error {
        PragmaError::Unknown(_) => ErrorCode::InvalidPragma.into(),
        PragmaError::InvalidValue { .. } => ErrorCode::InvalidPragmaValue.into(),
    }
}

struct Compiler<'s> {
    source: &'s str,
    file: FileId,
    starts: Vec<usize>,
    tokens: Vec<Token>,
    pos: usize,
    pragmas: PragmaState,
    cond: CondStack,
    /// Enum constants defined so far, shared by every value expression.
    constants: Scope,
    registry: TypeRegistry,
    diagnostics: Diagnostics,
    builder: CodeBuilder,
    ctx: Option<StructContext>,
    any_declaration: bool,
    last_line: u32,
}

impl<'s> Compiler<'s> {
    fn new(source: &'s str, file: FileId) -> Compiler<'s> {
        Compiler {
            source,
            file,
            starts: line_starts(source),
            tokens: Vec::new(),
            pos: 0,
            pragmas: PragmaState::default(),
            cond: CondStack::default(),
            constants: Scope::default(),
            registry: TypeRegistry::default(),
            diagnostics: Diagnostics::default(),
            builder: CodeBuilder::default(),
            ctx: None,
            any_declaration: false,
            last_line: 1,
        }
    }

    fn report(&mut self, error: CompileError) {
        self.diagnostics.push(error.into_diagnostic(self.file, &self.starts, self.source.len()));
    }

    // ----- token access ---------------------------------------------------

    /// The fixed feature flags: compiler version plus the current target
    /// language and platform.
    fn define_feature_flags(&self, scope: &mut Scope) {
        scope.define("__COMPILEDATAVIEW", Value::Number(COMPILER_VERSION));
        match self.pragmas.language {
            Language::JavaScript => scope.define("__JAVASCRIPT", Value::Bool(true)),
            Language::TypeScript => scope.define("__TYPESCRIPT", Value::Bool(true)),
        }
        match self.pragmas.platform {
            Platform::Xs => scope.define("__XS", Value::Bool(true)),
            Platform::Node => scope.define("__NODE", Value::Bool(true)),
            Platform::Web => scope.define("__WEB", Value::Bool(true)),
        }
    }

    /// Scope visible to `#if` conditions: the `defined()` predicate plus
    /// the fixed feature flags, nothing else.
    fn feature_scope(&self) -> Scope {
        let mut scope = Scope::default();
        self.define_feature_flags(&mut scope);
        scope
    }

    /// Scope for enum values and array sizes: previously defined enum
    /// constants plus the feature flags.
    fn value_scope(&self) -> Scope {
        let mut scope = self.constants.clone();
        self.define_feature_flags(&mut scope);
        scope
    }

    /// Advance past preprocessor directives, inactive regions and
    /// directive-line terminators, leaving `pos` at the next deliverable
    /// token.
    fn normalize(&mut self) {
        loop {
            let Some(token) = self.tokens.get(self.pos) else { return };
            let line = token.line;
            match token.text.as_str() {
                "#if" => {
                    self.pos += 1;
                    let expr: Vec<Token> =
                        self.directive_tail().into_iter().filter(|t| !t.is_comment()).collect();
                    if !self.cond.wants_condition() {
                        self.cond.push(false);
                    } else if expr.is_empty() {
                        self.report(CompileError::new(
                            ErrorCode::InvalidDirective,
                            line,
                            "`#if` requires a condition",
                        ));
                        self.cond.push(false);
                    } else {
                        match eval::evaluate(&expr, &self.feature_scope()) {
                            Ok(value) => self.cond.push(value.truthy()),
                            Err(error) => {
                                self.report(CompileError::new(
                                    ErrorCode::InvalidValueExpression,
                                    line,
                                    format!("invalid `#if` condition: {}", error),
                                ));
                                self.cond.push(false);
                            }
                        }
                    }
                }
                "#else" => {
                    self.pos += 1;
                    self.directive_tail();
                    if let Err(error) = self.cond.flip_else() {
                        self.report(CompileError::new(cond_error_code(&error), line, error.to_string()));
                    }
                }
                "#endif" => {
                    self.pos += 1;
                    self.directive_tail();
                    if let Err(error) = self.cond.pop() {
                        self.report(CompileError::new(cond_error_code(&error), line, error.to_string()));
                    }
                }
                "#error" => {
                    self.pos += 1;
                    let message = self
                        .tokens
                        .get(self.pos)
                        .filter(|t| t.text != "\n")
                        .map(|t| t.text.clone());
                    self.directive_tail();
                    if self.cond.is_active() {
                        self.report(CompileError::new(
                            ErrorCode::ErrorDirective,
                            line,
                            message.unwrap_or_else(|| "#error".to_owned()),
                        ));
                    }
                }
                "\n" => self.pos += 1,
                _ if !self.cond.is_active() => self.pos += 1,
                _ => return,
            }
        }
    }

    /// Raw tokens from the current position up to the end of the
    /// directive line, consuming the terminating newline.
    fn directive_tail(&mut self) -> Vec<Token> {
        let mut tail = Vec::new();
        while let Some(token) = self.tokens.get(self.pos) {
            self.pos += 1;
            if token.text == "\n" {
                break;
            }
            tail.push(token.clone());
        }
        tail
    }

    fn peek(&mut self) -> Option<Token> {
        self.normalize();
        self.tokens.get(self.pos).cloned()
    }

    fn next(&mut self) -> Option<Token> {
        self.normalize();
        let token = self.tokens.get(self.pos).cloned();
        if let Some(token) = &token {
            self.last_line = token.line;
            self.pos += 1;
        }
        token
    }

    /// Like `peek`/`next` but transparent to block comments, for use
    /// inside a statement.
    fn peek_code(&mut self) -> Option<Token> {
        loop {
            let token = self.peek()?;
            if token.is_comment() {
                self.pos += 1;
                continue;
            }
            return Some(token);
        }
    }

    fn next_code(&mut self) -> Option<Token> {
        self.peek_code()?;
        self.next()
    }

    /// Consume the expected token, or fail without consuming so that
    /// recovery can resynchronize on it.
    fn expect(&mut self, text: &str) -> ParseResult<Token> {
        match self.peek_code() {
            Some(token) if token.text == text => {
                self.next();
                Ok(token)
            }
            Some(token) => Err(CompileError::new(
                ErrorCode::MissingToken,
                token.line,
                format!("expected `{}`, found `{}`", text, token.text),
            )),
            None => Err(CompileError::new(
                ErrorCode::MissingToken,
                self.last_line,
                format!("expected `{}` before end of input", text),
            )),
        }
    }

    fn expect_identifier(&mut self, what: &str) -> ParseResult<Token> {
        match self.peek_code() {
            Some(token) if token.is_identifier() => {
                self.next();
                Ok(token)
            }
            Some(token) => Err(CompileError::new(
                ErrorCode::MissingToken,
                token.line,
                format!("{} expected, found `{}`", what, token.text),
            )),
            None => Err(CompileError::new(
                ErrorCode::MissingToken,
                self.last_line,
                format!("{} expected before end of input", what),
            )),
        }
    }

    /// Collect expression tokens until one of `terminators` (left in
    /// place). Comments are dropped; `}` and `;` always stop collection.
    fn expression_until(&mut self, terminators: &[&str]) -> ParseResult<Vec<Token>> {
        let mut expr = Vec::new();
        loop {
            let Some(token) = self.peek_code() else {
                return Err(CompileError::new(
                    ErrorCode::MissingToken,
                    self.last_line,
                    "unexpected end of input in expression",
                ));
            };
            if terminators.contains(&token.text.as_str()) {
                return Ok(expr);
            }
            if token.text == ";" || token.text == "}" {
                return Err(CompileError::new(
                    ErrorCode::MissingToken,
                    token.line,
                    format!("expected `{}` in expression", terminators[0]),
                ));
            }
            expr.push(token);
            self.pos += 1;
        }
    }

    // ----- main loop ------------------------------------------------------

    fn run(&mut self) {
        while let Some(token) = self.peek() {
            let before = self.pos;
            if let Err(error) = self.statement(token) {
                self.report(error);
                self.recover(before);
            }
        }
        self.finish_input();
    }

    /// Resynchronize after an error. A statement that already consumed its
    /// terminating `;` needs no skipping; otherwise skip past the next
    /// `;`, balancing braces, and stop short of a closing brace or a
    /// top-level keyword.
    fn recover(&mut self, before: usize) {
        if self.pos > before {
            if let Some(previous) = self.tokens.get(self.pos - 1) {
                if previous.text == ";" {
                    return;
                }
            }
        } else {
            self.pos += 1;
        }
        let mut depth = 0usize;
        while let Some(token) = self.peek() {
            match token.text.as_str() {
                ";" => {
                    self.next();
                    if depth == 0 {
                        return;
                    }
                }
                "{" => {
                    depth += 1;
                    self.next();
                }
                "}" => {
                    if depth == 0 {
                        return;
                    }
                    depth -= 1;
                    self.next();
                }
                text if depth == 0 && SYNC_TOKENS.contains(&text) => return,
                _ => {
                    self.next();
                }
            }
        }
    }

    fn statement(&mut self, token: Token) -> ParseResult<()> {
        match token.text.as_str() {
            "#pragma" => self.stmt_pragma(),
            "}" => self.stmt_close(),
            "struct" => self.stmt_struct(),
            "typedef" => self.stmt_typedef(),
            "union" => self.stmt_union(),
            "enum" => self.stmt_enum(),
            text if text.starts_with("/*") => {
                self.next();
                self.passthrough_comment(&token);
                Ok(())
            }
            text if text.starts_with('#') => {
                self.next();
                Err(CompileError::new(
                    ErrorCode::InvalidDirective,
                    token.line,
                    format!("invalid preprocessor instruction `{}`", token.text),
                ))
            }
            _ => self.stmt_field(token),
        }
    }

    fn passthrough_comment(&mut self, token: &Token) {
        match self.pragmas.comments {
            CommentMode::None => (),
            CommentMode::Header => {
                if !self.any_declaration && self.ctx.is_none() {
                    self.builder.chunks.push(token.text.clone());
                }
            }
            CommentMode::All => match &mut self.ctx {
                Some(ctx) => ctx.body.extend(CodeBuilder::comment_lines(&token.text, true)),
                None => self.builder.chunks.push(token.text.clone()),
            },
        }
    }

    // ----- pragmas --------------------------------------------------------

    fn stmt_pragma(&mut self) -> ParseResult<()> {
        let keyword = self.next().expect("pragma token present");
        let line = keyword.line;
        // The argument blob is the raw token following the directive; the
        // newline terminator is skipped by normalization later.
        let blob = match self.tokens.get(self.pos) {
            Some(token) if token.text != "\n" => {
                let token = token.clone();
                self.pos += 1;
                token
            }
            _ => {
                return Err(CompileError::new(
                    ErrorCode::InvalidPragma,
                    line,
                    "pragma name expected",
                ))
            }
        };

        let text = blob.text.as_str();
        let open = text.find('(').ok_or_else(|| {
            CompileError::new(ErrorCode::InvalidPragma, line, "open parenthesis expected")
        })?;
        let close = text.rfind(')').filter(|close| *close > open).ok_or_else(|| {
            CompileError::new(ErrorCode::InvalidPragma, line, "close parenthesis expected")
        })?;
        let name = text[..open].trim();
        let value = text[open + 1..close].trim();
        if name.is_empty() {
            return Err(CompileError::new(ErrorCode::InvalidPragma, line, "pragma name expected"));
        }
        if value.is_empty() {
            return Err(CompileError::new(
                ErrorCode::InvalidPragmaValue,
                line,
                "pragma value expected",
            ));
        }
        if name == "hostEndian" && self.any_declaration {
            return Err(CompileError::new(
                ErrorCode::MisplacedPragma,
                line,
                "`hostEndian` must precede all declarations",
            ));
        }
        self.pragmas.apply(name, value).map_err(|error| {
            let code = match error {
                PragmaError::Unknown(_) => ErrorCode::InvalidPragma,
                PragmaError::InvalidValue { .. } => ErrorCode::InvalidPragmaValue,
            };
            CompileError::new(code, line, error.to_string())
        })
    }

    // ----- declarations ---------------------------------------------------

    fn stmt_struct(&mut self) -> ParseResult<()> {
        let keyword = self.next().expect("struct token present");
        if self.ctx.is_some() {
            return Err(CompileError::new(
                ErrorCode::NestedDeclaration,
                keyword.line,
                "cannot nest structure declarations",
            ));
        }
        let name = self.expect_identifier("structure name")?;
        if self.registry.contains(&name.text) {
            return Err(CompileError::new(
                ErrorCode::DuplicateTypeIdentifier,
                name.line,
                format!("duplicate type `{}`", name.text),
            ));
        }

        let mut ctx = StructContext::open(ContextKind::Struct, Some(name.text.clone()), keyword.line);
        if self.peek_code().map(|t| t.text == ":").unwrap_or(false) {
            self.next_code();
            let parent = self.expect_identifier("parent structure name")?;
            let info = self.registry.get(&parent.text).ok_or_else(|| {
                CompileError::new(
                    ErrorCode::UndeclaredParentIdentifier,
                    parent.line,
                    format!("unknown parent type `{}`", parent.text),
                )
            })?;
            if matches!(info.kind, TypeKind::Enum { .. }) {
                return Err(CompileError::new(
                    ErrorCode::UndeclaredParentIdentifier,
                    parent.line,
                    format!("`{}` is an enum and cannot be extended", parent.text),
                ));
            }
            // Inherited layout: the child's fields start after the parent.
            ctx.cursor = info.byte_length;
            ctx.alignment = info.alignment;
            ctx.parent = Some(parent.text.clone());
        }
        self.expect("{")?;
        self.any_declaration = true;
        self.ctx = Some(ctx);
        Ok(())
    }

    fn stmt_typedef(&mut self) -> ParseResult<()> {
        let keyword = self.next().expect("typedef token present");
        if self.ctx.is_some() {
            return Err(CompileError::new(
                ErrorCode::NestedDeclaration,
                keyword.line,
                "cannot nest structure declarations",
            ));
        }
        self.expect("struct")?;
        self.expect("{")?;
        self.any_declaration = true;
        self.ctx = Some(StructContext::open(ContextKind::Typedef, None, keyword.line));
        Ok(())
    }

    fn stmt_union(&mut self) -> ParseResult<()> {
        let keyword = self.next().expect("union token present");
        let anonymous = self.peek_code().map(|t| t.text == "{").unwrap_or(false);
        if anonymous {
            self.next_code();
            let Some(ctx) = &mut self.ctx else {
                return Err(CompileError::new(
                    ErrorCode::UnexpectedToken,
                    keyword.line,
                    "anonymous union must be inside a struct",
                ));
            };
            if ctx.union.is_some() {
                return Err(CompileError::new(
                    ErrorCode::NestedDeclaration,
                    keyword.line,
                    "unions cannot nest",
                ));
            }
            // A union is a hard boundary for any open bitfield run.
            let mut ctx = self.ctx.take().expect("context present");
            self.flush_bitfields(&mut ctx, 0);
            ctx.union = Some(UnionState { base: ctx.cursor, max: 0 });
            self.ctx = Some(ctx);
            return Ok(());
        }

        if self.ctx.is_some() {
            return Err(CompileError::new(
                ErrorCode::NestedDeclaration,
                keyword.line,
                "named unions must be declared at the top level",
            ));
        }
        let name = self.expect_identifier("union name")?;
        if self.registry.contains(&name.text) {
            return Err(CompileError::new(
                ErrorCode::DuplicateTypeIdentifier,
                name.line,
                format!("duplicate type `{}`", name.text),
            ));
        }
        self.expect("{")?;
        self.any_declaration = true;
        self.ctx = Some(StructContext::open(ContextKind::Union, Some(name.text), keyword.line));
        Ok(())
    }

    fn stmt_close(&mut self) -> ParseResult<()> {
        let brace = self.next().expect("closing brace present");
        let Some(mut ctx) = self.ctx.take() else {
            return Err(CompileError::new(
                ErrorCode::UnexpectedToken,
                brace.line,
                "unexpected `}`",
            ));
        };
        self.flush_bitfields(&mut ctx, 0);

        // Closing an anonymous union folds its maximum into the cursor
        // and returns to the enclosing struct.
        if ctx.union.is_some() && ctx.kind != ContextKind::Union {
            let union = ctx.union.take().expect("union state present");
            self.ctx = Some(ctx);
            self.expect(";")?;
            if union.max == 0 {
                return Err(CompileError::new(
                    ErrorCode::EmptyDeclaration,
                    brace.line,
                    "empty union",
                ));
            }
            let ctx = self.ctx.as_mut().expect("context present");
            ctx.end_field(union.max);
            return Ok(());
        }

        let name = match ctx.kind {
            ContextKind::Typedef => {
                let name = self.expect_identifier("typedef name")?;
                self.expect(";")?;
                name.text
            }
            _ => {
                self.expect(";")?;
                ctx.name.clone().expect("named declaration")
            }
        };

        if ctx.kind == ContextKind::Union {
            let union = ctx.union.take().expect("union state present");
            ctx.cursor = union.base + union.max;
        }
        if ctx.cursor == 0 {
            return Err(CompileError::new(
                ErrorCode::EmptyDeclaration,
                brace.line,
                format!("empty {}", if ctx.kind == ContextKind::Union { "union" } else { "struct" }),
            ));
        }
        if self.registry.contains(&name) {
            return Err(CompileError::new(
                ErrorCode::DuplicateTypeIdentifier,
                brace.line,
                format!("duplicate type `{}`", name),
            ));
        }

        let alignment = ctx.alignment.max(1);
        let info = TypeInfo {
            byte_length: ctx.cursor,
            alignment,
            aligned_length: align_up(ctx.cursor, alignment),
            parent: ctx.parent.clone(),
            kind: if ctx.kind == ContextKind::Union { TypeKind::Union } else { TypeKind::Struct },
        };

        let chunk = self.builder.class_chunk(
            &self.pragmas,
            &name,
            ctx.parent.as_deref(),
            ctx.cursor,
            ctx.flexible_member.is_some(),
            &ctx.body,
            &ctx.json_fields,
        );
        self.builder.chunks.push(chunk);
        self.builder.exports.push(name.clone());
        self.registry.insert(&name, info).expect("duplicate checked above");
        Ok(())
    }

    // ----- fields ---------------------------------------------------------

    fn stmt_field(&mut self, token: Token) -> ParseResult<()> {
        let Some(mut ctx) = self.ctx.take() else {
            self.next();
            return Err(CompileError::new(
                ErrorCode::UnexpectedToken,
                token.line,
                format!("unexpected token `{}`", token.text),
            ));
        };
        let result = self.field_in(&mut ctx);
        self.ctx = Some(ctx);
        result
    }

    fn field_in(&mut self, ctx: &mut StructContext) -> ParseResult<()> {
        let type_token = self.next_code().expect("type token present");
        let line = type_token.line;
        if !type_token.is_identifier() {
            return Err(CompileError::new(
                ErrorCode::UnexpectedToken,
                line,
                format!("unexpected token `{}`", type_token.text),
            ));
        }
        if ctx.flexible_member.is_some() {
            return Err(CompileError::new(
                ErrorCode::InvalidFlexibleArray,
                line,
                "flexible array member must be the last field",
            ));
        }
        let name = self.expect_identifier("field name")?;

        let mut bits: Option<u32> = None;
        let mut array: Option<usize> = None;
        match self.peek_code().map(|t| t.text) {
            Some(colon) if colon == ":" => {
                self.next_code();
                let expr = self.expression_until(&[";"])?;
                let value = eval::evaluate(&expr, &self.value_scope()).map_err(|error| {
                    CompileError::new(ErrorCode::InvalidBitCount, line, format!("invalid bit count: {}", error))
                })?;
                let count = value.as_array_count().map_err(|_| {
                    CompileError::new(ErrorCode::InvalidBitCount, line, "invalid bit count")
                })?;
                if !(1..=32).contains(&count) {
                    return Err(CompileError::new(
                        ErrorCode::InvalidBitCount,
                        line,
                        format!("bit count {} outside 1..32", count),
                    ));
                }
                bits = Some(count as u32);
            }
            Some(bracket) if bracket == "[" => {
                self.next_code();
                let expr = self.expression_until(&["]"])?;
                self.expect("]")?;
                let value = eval::evaluate(&expr, &self.value_scope()).map_err(|error| {
                    CompileError::new(
                        ErrorCode::InvalidArrayCount,
                        line,
                        format!("invalid array count: {}", error),
                    )
                })?;
                array = Some(value.as_array_count().map_err(|_| {
                    CompileError::new(ErrorCode::InvalidArrayCount, line, "invalid array count")
                })?);
            }
            _ => (),
        }
        self.expect(";")?;

        if !ctx.field_names.insert(name.text.clone()) {
            return Err(CompileError::new(
                ErrorCode::DuplicateFieldIdentifier,
                name.line,
                format!("duplicate field `{}`", name.text),
            ));
        }
        let is_padding = name.text.starts_with(&self.pragmas.pad_prefix);

        self.resolve_field(ctx, &type_token, name.text, bits, array, is_padding, line)
    }

    #[allow(clippy::too_many_arguments)]
    fn resolve_field(
        &mut self,
        ctx: &mut StructContext,
        type_token: &Token,
        name: String,
        bits: Option<u32>,
        array: Option<usize>,
        is_padding: bool,
        line: u32,
    ) -> ParseResult<()> {
        let type_name = type_token.text.as_str();

        // Bitfield pseudo-type.
        if type_name == "Uint" {
            let Some(bits) = bits else {
                return Err(CompileError::new(
                    ErrorCode::InvalidBitCount,
                    line,
                    "number of bits in bitfield missing",
                ));
            };
            self.push_bitfield(ctx, name, bits, 0, false, is_padding, line);
            return Ok(());
        }

        // Boolean: a one-bit bitfield.
        if matches!(type_name, "Boolean" | "boolean" | "bool") {
            if bits.is_some() {
                return Err(CompileError::new(
                    ErrorCode::InvalidBitfieldType,
                    line,
                    "cannot use a bit count with `Boolean`",
                ));
            }
            if array.is_some() {
                return Err(CompileError::new(
                    ErrorCode::InvalidBitfieldType,
                    line,
                    "`Boolean` cannot have an array",
                ));
            }
            self.push_bitfield(ctx, name, 1, 0, true, is_padding, line);
            return Ok(());
        }

        if type_name == "char" {
            if bits.is_some() {
                return Err(CompileError::new(
                    ErrorCode::InvalidBitfieldType,
                    line,
                    "`char` cannot use a bit count",
                ));
            }
            let (kind, byte_length) = match array {
                None => (FieldKind::Char, 1),
                Some(0) => (FieldKind::FlexibleBytes { element: NumericType::Uint8 }, 0),
                Some(count) => (FieldKind::CharArray { count }, count),
            };
            return self.place_field(ctx, name, kind, 1, byte_length, is_padding, line);
        }

        if let Some(ty) = NumericType::from_alias(type_name) {
            if let Some(bits) = bits {
                if !ty.is_integer() {
                    return Err(CompileError::new(
                        ErrorCode::InvalidBitfieldType,
                        line,
                        format!("cannot use a bit count with `{}`", type_name),
                    ));
                }
                if ty.byte_count() > 4 {
                    return Err(CompileError::new(
                        ErrorCode::InvalidBitfieldType,
                        line,
                        format!("`{}` is too wide to back a bitfield", type_name),
                    ));
                }
                if bits as usize > ty.byte_count() * 8 {
                    return Err(CompileError::new(
                        ErrorCode::InvalidBitfieldType,
                        line,
                        format!("`{}` is too narrow to hold {} bits", type_name, bits),
                    ));
                }
                self.push_bitfield(ctx, name, bits, ty.byte_count(), false, is_padding, line);
                return Ok(());
            }
            if array == Some(0) {
                if ty.byte_count() != 1 {
                    return Err(CompileError::new(
                        ErrorCode::InvalidFlexibleArray,
                        line,
                        "flexible array member requires a one-byte element type",
                    ));
                }
                let kind = FieldKind::FlexibleBytes { element: ty };
                return self.place_field(ctx, name, kind, 1, 0, is_padding, line);
            }
            let count = array.unwrap_or(1);
            let byte_length = ty.byte_count() * count;
            let kind = FieldKind::Numeric { ty, array };
            return self.place_field(ctx, name, kind, ty.byte_count(), byte_length, is_padding, line);
        }

        // User-declared type.
        let Some(info) = self.registry.get(type_name).cloned() else {
            return Err(CompileError::new(
                ErrorCode::UndeclaredTypeIdentifier,
                line,
                format!("unknown type `{}`", type_name),
            ));
        };
        if bits.is_some() {
            return Err(CompileError::new(
                ErrorCode::InvalidBitfieldType,
                line,
                format!("cannot use a bit count with `{}`", type_name),
            ));
        }
        match info.kind {
            TypeKind::Enum { backing } => {
                // Enums lay out exactly like their backing integer.
                let count = array.unwrap_or(1);
                let kind = FieldKind::Numeric { ty: backing, array };
                self.place_field(
                    ctx,
                    name,
                    kind,
                    backing.byte_count(),
                    backing.byte_count() * count,
                    is_padding,
                    line,
                )
            }
            TypeKind::Struct | TypeKind::Union => {
                if array == Some(0) {
                    return Err(CompileError::new(
                        ErrorCode::InvalidFlexibleArray,
                        line,
                        "flexible array member requires a one-byte element type",
                    ));
                }
                let stride = info.aligned_length;
                let byte_length = match array {
                    None => info.byte_length,
                    Some(count) => stride * count,
                };
                let kind = FieldKind::Nested {
                    type_name: type_name.to_owned(),
                    array,
                    stride,
                    element_length: info.byte_length,
                };
                self.place_field(ctx, name, kind, info.alignment, byte_length, is_padding, line)
            }
        }
    }

    /// Append a sub-byte field to the pending run, flushing first when the
    /// run would overflow its 32-bit ceiling.
    #[allow(clippy::too_many_arguments)]
    fn push_bitfield(
        &mut self,
        ctx: &mut StructContext,
        name: String,
        bits: u32,
        declared_bytes: usize,
        boolean: bool,
        is_padding: bool,
        line: u32,
    ) {
        self.flush_bitfields(ctx, bits);
        ctx.pending_bitfields.push(PendingBitfield {
            name,
            bits,
            declared_bytes,
            boolean,
            is_padding,
            line,
        });
    }

    /// Flush the pending bitfield run into one backing word. With
    /// `incoming` > 0 the flush only happens if adding that many bits
    /// would overflow 32; with `incoming` == 0 any pending run flushes
    /// (field/union/struct boundary).
    fn flush_bitfields(&mut self, ctx: &mut StructContext, incoming: u32) {
        let total: u32 = ctx.pending_bitfields.iter().map(|b| b.bits).sum();
        if total == 0 {
            return;
        }
        if incoming > 0 && total + incoming <= 32 {
            return;
        }

        // Smallest of 8/16/32 bits holding the run, widened to the largest
        // declared storage type in it.
        let fit = if total <= 8 {
            1
        } else if total <= 16 {
            2
        } else {
            4
        };
        let declared =
            ctx.pending_bitfields.iter().map(|b| b.declared_bytes).max().unwrap_or(0);
        let word_bytes = fit.max(declared);

        let alignment = word_bytes.min(self.pragmas.pack);
        if ctx.union.is_none() {
            ctx.cursor = align_up(ctx.cursor, alignment);
        }
        ctx.note_alignment(alignment);
        let offset = ctx.field_offset();

        let run = std::mem::take(&mut ctx.pending_bitfields);
        let lines = self.builder.bitfield_accessors(&self.pragmas, &run, offset, word_bytes);
        ctx.body.extend(lines);
        for field in &run {
            if !field.is_padding {
                ctx.json_fields.push(JsonField::Plain { name: field.name.clone() });
            }
        }
        ctx.end_field(word_bytes);
    }

    /// Lay out a non-bitfield field and emit its accessors.
    #[allow(clippy::too_many_arguments)]
    fn place_field(
        &mut self,
        ctx: &mut StructContext,
        name: String,
        kind: FieldKind,
        natural_alignment: usize,
        byte_length: usize,
        is_padding: bool,
        line: u32,
    ) -> ParseResult<()> {
        self.flush_bitfields(ctx, 0);

        let flexible = matches!(kind, FieldKind::FlexibleBytes { .. });
        if flexible && ctx.union.is_some() {
            return Err(CompileError::new(
                ErrorCode::InvalidFlexibleArray,
                line,
                "flexible array member cannot live in a union",
            ));
        }

        let alignment = natural_alignment.min(self.pragmas.pack).max(1);
        if ctx.union.is_none() {
            ctx.cursor = align_up(ctx.cursor, alignment);
        }
        ctx.note_alignment(alignment);
        let offset = ctx.field_offset();

        let descriptor =
            FieldDescriptor { name: name.clone(), kind, offset, byte_length, is_padding, line };
        if !is_padding {
            let lines = self.builder.field_accessors(&self.pragmas, &descriptor);
            ctx.body.extend(lines);
            ctx.json_fields.push(json_field(&descriptor));
        }

        if flexible {
            ctx.flexible_member = Some(name);
        } else {
            ctx.end_field(byte_length);
        }
        Ok(())
    }

    // ----- enums ----------------------------------------------------------

    fn stmt_enum(&mut self) -> ParseResult<()> {
        let keyword = self.next().expect("enum token present");
        if self.ctx.is_some() {
            return Err(CompileError::new(
                ErrorCode::NestedDeclaration,
                keyword.line,
                "enums cannot be declared inside a struct",
            ));
        }
        let name = match self.peek_code() {
            Some(token) if token.is_identifier() => {
                self.next_code();
                Some(token.text)
            }
            _ => None,
        };
        let mut backing = NumericType::Int32;
        if self.peek_code().map(|t| t.text == ":").unwrap_or(false) {
            self.next_code();
            let token = self.expect_identifier("enum backing type")?;
            backing = NumericType::from_alias(&token.text)
                .filter(|ty| ty.is_integer() && !ty.is_big())
                .ok_or_else(|| {
                    CompileError::new(
                        ErrorCode::InvalidEnumBackingType,
                        token.line,
                        format!("invalid enum backing type `{}`", token.text),
                    )
                })?;
        }
        if let Some(name) = &name {
            if self.registry.contains(name) {
                return Err(CompileError::new(
                    ErrorCode::DuplicateTypeIdentifier,
                    keyword.line,
                    format!("duplicate type `{}`", name),
                ));
            }
        }
        self.expect("{")?;
        self.any_declaration = true;

        let mut ctx = EnumContext::open(name, backing, keyword.line);
        loop {
            let Some(token) = self.peek_code() else {
                return Err(CompileError::new(
                    ErrorCode::UnterminatedDeclaration,
                    keyword.line,
                    "incomplete enum at end of file",
                ));
            };
            if token.text == "}" {
                self.next_code();
                break;
            }
            if let Err(error) = self.enum_member(&mut ctx) {
                // A bad member does not abort the enum; skip to the next.
                self.report(error);
                while let Some(token) = self.peek_code() {
                    if token.text == "," {
                        self.next_code();
                        break;
                    }
                    if token.text == "}" {
                        break;
                    }
                    self.next_code();
                }
            }
        }
        self.expect(";")?;

        if let Some(name) = ctx.name.clone() {
            let info = TypeInfo {
                byte_length: ctx.backing.byte_count(),
                alignment: ctx.backing.byte_count(),
                aligned_length: ctx.backing.byte_count(),
                parent: None,
                kind: TypeKind::Enum { backing: ctx.backing },
            };
            self.registry.insert(&name, info).expect("duplicate checked above");
            let chunk = self.builder.enum_chunk(&self.pragmas, &name, &ctx.members);
            self.builder.chunks.push(chunk);
            self.builder.exports.push(name);
        }
        Ok(())
    }

    fn enum_member(&mut self, ctx: &mut EnumContext) -> ParseResult<()> {
        let member = self.expect_identifier("enum member name")?;
        if !ctx.seen.insert(member.text.clone()) {
            return Err(CompileError::new(
                ErrorCode::DuplicateFieldIdentifier,
                member.line,
                format!("duplicate enum member `{}`", member.text),
            ));
        }
        let value = if self.peek_code().map(|t| t.text == "=").unwrap_or(false) {
            self.next_code();
            let expr = self.expression_until(&[",", "}"])?;
            eval::evaluate(&expr, &self.value_scope()).map_err(|error| {
                CompileError::new(
                    ErrorCode::InvalidEnumValue,
                    member.line,
                    format!("invalid value for `{}`: {}", member.text, error),
                )
            })?
        } else {
            ctx.next_implicit().ok_or_else(|| {
                CompileError::new(
                    ErrorCode::InvalidEnumValue,
                    member.line,
                    format!("`{}` needs an explicit value", member.text),
                )
            })?
        };
        if self.peek_code().map(|t| t.text == ",").unwrap_or(false) {
            self.next_code();
        }
        self.constants.define(member.text.clone(), value.clone());
        ctx.members.push((member.text, value));
        Ok(())
    }

    // ----- end of input ---------------------------------------------------

    fn finish_input(&mut self) {
        if let Some(ctx) = self.ctx.take() {
            self.report(CompileError::new(
                ErrorCode::UnterminatedDeclaration,
                ctx.line,
                "incomplete struct at end of file",
            ));
        }
        let unclosed = self.cond.unclosed();
        if unclosed > 0 {
            self.report(CompileError::new(
                ErrorCode::UnterminatedConditional,
                self.last_line,
                format!("{} unterminated conditional(s) at end of file", unclosed),
            ));
        }
    }
}

fn cond_error_code(error: &CondError) -> ErrorCode {
    match error {
        CondError::ElseWithoutIf => ErrorCode::ElseWithoutIf,
        CondError::DuplicateElse => ErrorCode::DuplicateElseBranch,
        CondError::EndifWithoutIf => ErrorCode::EndifWithoutIf,
    }
}

fn json_field(field: &FieldDescriptor) -> JsonField {
    let name = field.name.clone();
    match &field.kind {
        FieldKind::Numeric { array: Some(_), .. } => JsonField::ArrayFrom { name },
        FieldKind::Numeric { .. } | FieldKind::Char | FieldKind::CharArray { .. } => {
            JsonField::Plain { name }
        }
        FieldKind::Nested { type_name, array: None, .. } => {
            JsonField::Nested { name, type_name: type_name.clone() }
        }
        FieldKind::Nested { type_name, array: Some(count), .. } => {
            JsonField::NestedArray { name, type_name: type_name.clone(), count: *count }
        }
        FieldKind::FlexibleBytes { .. } => JsonField::Flexible { name },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compile(source: &str) -> CompilerOutput {
        compile_source(source, &[])
    }

    fn assert_clean(output: &CompilerOutput) {
        assert!(
            output.diagnostics.is_empty(),
            "unexpected diagnostics: {}",
            output.diagnostics.render_to_string(&output.sources)
        );
    }

    #[test]
    fn point_layout() {
        let output = compile("struct Point {\n   int32_t x;\n   int32_t y;\n};\n");
        assert_clean(&output);
        let info = output.registry.get("Point").unwrap();
        assert_eq!(info.byte_length, 8);
        assert!(output.code.contains("return this.getInt32(0, true);"));
        assert!(output.code.contains("return this.getInt32(4, true);"));
    }

    #[test]
    fn packed_layout_by_default() {
        let output = compile("struct S {\n   uint8_t a;\n   uint32_t b;\n};\n");
        assert_clean(&output);
        assert_eq!(output.registry.get("S").unwrap().byte_length, 5);
        assert!(output.code.contains("this.getUint32(1, true)"));
    }

    #[test]
    fn pack_pragma_aligns_fields() {
        let output =
            compile("#pragma pack(4)\nstruct S {\n   uint8_t a;\n   uint32_t b;\n};\n");
        assert_clean(&output);
        let info = output.registry.get("S").unwrap();
        assert_eq!(info.byte_length, 8);
        assert_eq!(info.alignment, 4);
        assert!(output.code.contains("this.getUint32(4, true)"));
    }

    #[test]
    fn declared_bitfield_type_widens_word() {
        let output = compile("struct Flags {\n   boolean a;\n   uint32_t b:3;\n};\n");
        assert_clean(&output);
        assert_eq!(output.registry.get("Flags").unwrap().byte_length, 4);
        assert!(output.code.contains("return Boolean(this.getUint32(0, true) & 0x1);"));
        assert!(output.code.contains("return (this.getUint32(0, true) >> 1) & 0x7;"));
    }

    #[test]
    fn pseudo_type_run_uses_smallest_word() {
        let output = compile("struct Small {\n   Uint a:3;\n   Uint b:4;\n};\n");
        assert_clean(&output);
        assert_eq!(output.registry.get("Small").unwrap().byte_length, 1);
        assert!(output.code.contains("this.getUint8(0)"));
    }

    #[test]
    fn bitfield_overflow_starts_new_word() {
        let output = compile(
            "struct Wide {\n   uint32_t a:20;\n   uint32_t b:13;\n};\n",
        );
        assert_clean(&output);
        // 20 + 13 > 32: the first run flushes into a 4-byte word, the
        // second occupies its own.
        assert_eq!(output.registry.get("Wide").unwrap().byte_length, 8);
        assert!(output.code.contains("this.getUint32(4, true)"));
    }

    #[test]
    fn padding_field_consumes_space_silently() {
        let output = compile(
            "#pragma outputSource(false)\nstruct P {\n   uint8_t __pad0[4];\n   uint8_t value;\n};\n",
        );
        assert_clean(&output);
        assert_eq!(output.registry.get("P").unwrap().byte_length, 5);
        assert!(!output.code.contains("__pad0"));
        assert!(output.code.contains("this.getUint8(4)"));
    }

    #[test]
    fn duplicate_names_are_single_diagnostics() {
        let output = compile(
            "struct A {\n   uint8_t x;\n   uint8_t x;\n   uint8_t y;\n};\nstruct A {\n   uint8_t z;\n};\n",
        );
        assert_eq!(output.diagnostics.diagnostics.len(), 2);
        // The first `A` still compiled with its valid fields.
        assert_eq!(output.registry.get("A").unwrap().byte_length, 2);
    }

    #[test]
    fn unknown_type_resumes_parsing() {
        let output = compile("struct B {\n   Mystery m;\n   uint8_t ok;\n};\n");
        assert_eq!(output.diagnostics.diagnostics.len(), 1);
        assert_eq!(output.registry.get("B").unwrap().byte_length, 1);
        assert!(output.code.contains("get ok()"));
    }

    #[test]
    fn conditional_compilation_selects_else() {
        let output = compile(
            "#if 0\nstruct A {\n   uint8_t a;\n};\n#else\nstruct B {\n   uint8_t b;\n};\n#endif\n",
        );
        assert_clean(&output);
        assert!(output.registry.get("A").is_none());
        assert!(output.registry.get("B").is_some());
    }

    #[test]
    fn nested_inactive_conditions_never_evaluate() {
        let output = compile(
            "#if 0\n#if UNDEFINED_SYMBOL\nstruct A {\n   uint8_t a;\n};\n#endif\n#endif\nstruct B {\n   uint8_t b;\n};\n",
        );
        assert_clean(&output);
        assert!(output.registry.get("B").is_some());
    }

    #[test]
    fn unmatched_endif_is_diagnosed() {
        let output = compile("#endif\nstruct S {\n   uint8_t a;\n};\n");
        assert_eq!(output.diagnostics.diagnostics.len(), 1);
        assert!(output.registry.get("S").is_some());
    }

    #[test]
    fn unterminated_conditional_is_diagnosed() {
        let output = compile("#if 1\nstruct S {\n   uint8_t a;\n};\n");
        assert_eq!(output.diagnostics.diagnostics.len(), 1);
        assert!(output.registry.get("S").is_some());
    }

    #[test]
    fn error_directive_only_fires_when_active() {
        let output = compile("#if 0\n#error dead branch\n#endif\nstruct S {\n   uint8_t a;\n};\n");
        assert_clean(&output);
        let output = compile("#error boom\n");
        assert_eq!(output.diagnostics.diagnostics.len(), 1);
    }

    #[test]
    fn enum_values_feed_later_expressions() {
        let output = compile(
            "enum Sizes {\n   small = 4,\n   large = small * 4\n};\nstruct Buffer {\n   uint8_t data[large];\n};\n",
        );
        assert_clean(&output);
        assert_eq!(output.registry.get("Buffer").unwrap().byte_length, 16);
        assert!(output.code.contains("large: 16,"));
    }

    #[test]
    fn enum_implicit_values_autoincrement() {
        let output = compile("enum E {\n   a,\n   b,\n   c = 10,\n   d\n};\n");
        assert_clean(&output);
        assert!(output.code.contains("a: 0,"));
        assert!(output.code.contains("b: 1,"));
        assert!(output.code.contains("d: 11,"));
    }

    #[test]
    fn enum_field_uses_backing_type() {
        let output = compile(
            "enum Mode : uint8_t {\n   off,\n   on\n};\nstruct S {\n   Mode mode;\n   uint16_t value;\n};\n",
        );
        assert_clean(&output);
        assert_eq!(output.registry.get("S").unwrap().byte_length, 3);
        assert!(output.code.contains("return this.getUint8(0);"));
    }

    #[test]
    fn typedef_struct_names_at_close() {
        let output = compile("typedef struct {\n   float f[2];\n} FloatArray;\n");
        assert_clean(&output);
        assert_eq!(output.registry.get("FloatArray").unwrap().byte_length, 8);
        assert!(output.code.contains("class FloatArray"));
    }

    #[test]
    fn anonymous_union_overlaps_members() {
        let output = compile(
            "struct Integers {\n   uint32_t i;\n};\nstruct U {\n   uint8_t kind;\n   union {\n      char text[16];\n      Integers i;\n   };\n};\n",
        );
        assert_clean(&output);
        assert_eq!(output.registry.get("U").unwrap().byte_length, 17);
        // Both members start right after `kind`.
        assert!(output.code.contains("new Integers(this.buffer, this.byteOffset + 1)"));
    }

    #[test]
    fn named_union_is_max_sized() {
        let output = compile(
            "union Ints {\n   uint8_t a;\n   uint16_t b;\n   uint32_t c;\n};\n",
        );
        assert_clean(&output);
        assert_eq!(output.registry.get("Ints").unwrap().byte_length, 4);
        assert!(output.code.contains("return this.getUint16(0, true);"));
    }

    #[test]
    fn inherited_struct_extends_parent() {
        let output = compile(
            "struct Base {\n   uint32_t id;\n};\nstruct Child : Base {\n   uint8_t extra;\n};\n",
        );
        assert_clean(&output);
        let child = output.registry.get("Child").unwrap();
        assert_eq!(child.byte_length, 5);
        assert_eq!(child.parent.as_deref(), Some("Base"));
        assert!(output.code.contains("class Child extends Base {"));
        assert!(output.code.contains("this.getUint8(4)"));
    }

    #[test]
    fn flexible_array_member_must_be_last() {
        let output = compile("struct Packet {\n   uint16_t id;\n   uint8_t payload[0];\n};\n");
        assert_clean(&output);
        assert_eq!(output.registry.get("Packet").unwrap().byte_length, 2);
        assert!(output.code.contains("this.byteLength - 2"));

        let output = compile(
            "struct Bad {\n   uint8_t payload[0];\n   uint8_t tail;\n};\n",
        );
        assert_eq!(output.diagnostics.diagnostics.len(), 1);

        let output = compile("struct Bad2 {\n   uint32_t payload[0];\n};\n");
        assert!(!output.diagnostics.is_empty());
    }

    #[test]
    fn empty_struct_is_an_error() {
        let output = compile("struct Nothing {\n};\n");
        assert_eq!(output.diagnostics.diagnostics.len(), 1);
        assert!(output.registry.get("Nothing").is_none());
    }

    #[test]
    fn incomplete_struct_reported_at_eof() {
        let output = compile("struct Open {\n   uint8_t a;\n");
        assert_eq!(output.diagnostics.diagnostics.len(), 1);
    }

    #[test]
    fn host_endian_pragma_must_precede_declarations() {
        let output = compile(
            "struct S {\n   uint8_t a;\n};\n#pragma hostEndian(little)\n",
        );
        assert_eq!(output.diagnostics.diagnostics.len(), 1);
    }

    #[test]
    fn fatal_lex_error_produces_no_declarations() {
        let output = compile("struct S {\n   uint8_t a;\n};\n/* unterminated");
        assert_eq!(output.diagnostics.diagnostics.len(), 1);
        assert!(output.registry.get("S").is_none());
    }

    #[test]
    fn pragma_overrides_apply_before_source() {
        let output = compile_source(
            "struct S {\n   uint16_t v;\n};\n",
            &[("endian".to_owned(), "big".to_owned())],
        );
        assert_clean(&output);
        assert!(output.code.contains("this.getUint16(0, false)"));
    }

    #[test]
    fn json_methods_round_trip_shape() {
        let output = compile(
            "#pragma json(true)\nstruct Inner {\n   uint8_t v;\n};\nstruct Outer {\n   uint16_t id;\n   Inner inner;\n   uint8_t raw[4];\n};\n",
        );
        assert_clean(&output);
        assert!(output.code.contains("id: this.id,"));
        assert!(output.code.contains("inner: this.inner.toJSON(),"));
        assert!(output.code.contains("raw: Array.from(this.raw),"));
        assert!(output.code.contains("if (\"inner\" in obj) result.inner = Inner.from(obj.inner);"));
    }

    #[test]
    fn output_ends_with_source_comment() {
        let source = "struct S {\n   uint8_t a;\n};\n";
        let output = compile(source);
        assert!(output.code.contains("// struct S {"));
        assert!(output.code.contains("//    uint8_t a;"));
    }
}
