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

//! Splitter for the struct description language.
//!
//! A single forward pass turns the source text into a flat token sequence
//! with a parallel line number per token. Tokens are bare text fragments;
//! classification happens in the parser. The only fatal condition is an
//! unterminated block comment, which empties the token stream and fails the
//! whole compile.

use thiserror::Error;

/// One source fragment: an identifier, number, punctuation, block comment
/// (kept verbatim, including the delimiters), `#`-directive word, directive
/// argument blob, or an explicit `"\n"` terminating a directive line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub text: String,
    pub line: u32,
}

impl Token {
    fn new(text: impl Into<String>, line: u32) -> Token {
        Token { text: text.into(), line }
    }

    /// Block comments survive tokenization so they can be passed through
    /// to the generated output.
    pub fn is_comment(&self) -> bool {
        self.text.starts_with("/*")
    }

    pub fn is_identifier(&self) -> bool {
        self.text
            .chars()
            .next()
            .map(|c| c.is_ascii_alphabetic() || c == '_')
            .unwrap_or(false)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LexError {
    #[error("unterminated block comment starting on line {line}")]
    UnterminatedComment { line: u32 },
}

/// Directive words recognized at the start of a line. `#pragma` and
/// `#error` swallow the rest of the line into a single blob token; the
/// other directives are followed by normally split tokens. Every directive
/// line is closed by an explicit `"\n"` token.
const DIRECTIVES: [&str; 5] = ["#pragma", "#if", "#else", "#endif", "#error"];

/// Operator pairs collapsed into one token.
const DOUBLED: [&str; 8] = ["==", "!=", "<=", ">=", "&&", "||", "<<", ">>"];

struct Splitter<'a> {
    chars: std::iter::Peekable<std::str::Chars<'a>>,
    line: u32,
    at_line_start: bool,
    in_directive: bool,
    tokens: Vec<Token>,
}

/// Split `source` into tokens. Line numbers are 1-based.
pub fn split(source: &str) -> Result<Vec<Token>, LexError> {
    let mut splitter = Splitter {
        chars: source.chars().peekable(),
        line: 1,
        at_line_start: true,
        in_directive: false,
        tokens: Vec::new(),
    };
    splitter.run()?;
    Ok(splitter.tokens)
}

impl<'a> Splitter<'a> {
    fn run(&mut self) -> Result<(), LexError> {
        while let Some(c) = self.chars.next() {
            match c {
                '\n' => self.newline(),
                c if c.is_whitespace() => (),
                '/' if self.chars.peek() == Some(&'*') => self.block_comment()?,
                '/' if self.chars.peek() == Some(&'/') => self.line_comment(),
                '#' if self.at_line_start => self.directive(),
                '"' => self.string_literal(),
                c if c.is_ascii_alphanumeric() || c == '_' => {
                    self.word(c);
                    self.at_line_start = false;
                }
                c => {
                    self.operator(c);
                    self.at_line_start = false;
                }
            }
        }
        if self.in_directive {
            self.push("\n");
        }
        Ok(())
    }

    fn push(&mut self, text: impl Into<String>) {
        self.tokens.push(Token::new(text, self.line));
    }

    fn newline(&mut self) {
        if self.in_directive {
            self.push("\n");
            self.in_directive = false;
        }
        self.line += 1;
        self.at_line_start = true;
    }

    fn block_comment(&mut self) -> Result<(), LexError> {
        let start_line = self.line;
        let mut text = String::from("/");
        let mut closed = false;
        while let Some(c) = self.chars.next() {
            if c == '\n' {
                self.line += 1;
            }
            text.push(c);
            if text.len() >= 4 && text.ends_with("*/") {
                closed = true;
                break;
            }
        }
        if !closed {
            return Err(LexError::UnterminatedComment { line: start_line });
        }
        self.tokens.push(Token::new(text, start_line));
        self.at_line_start = false;
        Ok(())
    }

    fn line_comment(&mut self) {
        while let Some(&c) = self.chars.peek() {
            if c == '\n' {
                break;
            }
            self.chars.next();
        }
    }

    fn directive(&mut self) {
        let mut word = String::from("#");
        while let Some(&c) = self.chars.peek() {
            if c.is_ascii_alphabetic() {
                word.push(c);
                self.chars.next();
            } else {
                break;
            }
        }
        self.at_line_start = false;
        if !DIRECTIVES.contains(&word.as_str()) {
            // Not a known directive; surface the word and let the parser
            // report it with the right line attached.
            self.push(word);
            return;
        }
        self.in_directive = true;
        let blob = word == "#pragma" || word == "#error";
        self.push(word);
        if blob {
            self.rest_of_line();
        }
    }

    /// Capture the remainder of a `#pragma`/`#error` line as one blob,
    /// with any trailing line comment stripped.
    fn rest_of_line(&mut self) {
        let mut text = String::new();
        while let Some(&c) = self.chars.peek() {
            if c == '\n' {
                break;
            }
            text.push(c);
            self.chars.next();
        }
        if let Some(cut) = text.find("//") {
            text.truncate(cut);
        }
        let text = text.trim();
        if !text.is_empty() {
            self.push(text);
        }
    }

    fn string_literal(&mut self) {
        let mut text = String::from("\"");
        while let Some(c) = self.chars.next() {
            if c == '\n' {
                self.line += 1;
            }
            text.push(c);
            if c == '"' {
                break;
            }
        }
        self.push(text);
    }

    fn word(&mut self, first: char) {
        let mut text = String::new();
        text.push(first);
        let numeric = first.is_ascii_digit();
        while let Some(&c) = self.chars.peek() {
            let more = if numeric {
                // Keep hex/binary literals and decimal points together.
                c.is_ascii_alphanumeric() || c == '.' || c == '_'
            } else {
                c.is_ascii_alphanumeric() || c == '_'
            };
            if more {
                text.push(c);
                self.chars.next();
            } else {
                break;
            }
        }
        self.push(text);
    }

    fn operator(&mut self, first: char) {
        if let Some(&next) = self.chars.peek() {
            let pair: String = [first, next].iter().collect();
            if DOUBLED.contains(&pair.as_str()) {
                self.chars.next();
                self.push(pair);
                return;
            }
        }
        self.push(first.to_string());
    }
}
