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

//! Constant expression evaluator.
//!
//! A small recursive-descent evaluator over tokens already produced by the
//! splitter, used for enum values, array sizes and `#if` conditions. The
//! scope is a plain map seeded by the caller (earlier enum constants plus
//! feature flags) with a `defined()` predicate; there is no other way for
//! an expression to reach outside itself.
//!
//! Arithmetic follows the generated language's rules: values are `f64`,
//! bitwise and shift operators wrap through 32-bit signed integers, so
//! `1 << 31` evaluates to -2147483648.

use crate::lexer::Token;
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Number(f64),
    Bool(bool),
    Str(String),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EvalError {
    #[error("unexpected end of expression")]
    UnexpectedEnd,
    #[error("unexpected token `{0}` in expression")]
    UnexpectedToken(String),
    #[error("undefined identifier `{0}`")]
    UndefinedIdentifier(String),
    #[error("invalid number `{0}`")]
    InvalidNumber(String),
    #[error("{0}")]
    TypeError(String),
    #[error("invalid array count")]
    InvalidCount,
}

impl Value {
    pub fn truthy(&self) -> bool {
        match self {
            Value::Number(n) => *n != 0.0 && !n.is_nan(),
            Value::Bool(b) => *b,
            Value::Str(s) => !s.is_empty(),
        }
    }

    fn as_number(&self) -> Result<f64, EvalError> {
        match self {
            Value::Number(n) => Ok(*n),
            Value::Bool(b) => Ok(if *b { 1.0 } else { 0.0 }),
            Value::Str(_) => Err(EvalError::TypeError("expected a numeric operand".into())),
        }
    }

    /// Interpret the value as an array element count: a finite non-negative
    /// integer of reasonable magnitude.
    pub fn as_array_count(&self) -> Result<usize, EvalError> {
        match self {
            Value::Number(n)
                if n.is_finite() && n.fract() == 0.0 && *n >= 0.0 && *n <= 0x7fff_ffff as f64 =>
            {
                Ok(*n as usize)
            }
            _ => Err(EvalError::InvalidCount),
        }
    }

    /// Format the value as a literal in the generated source.
    pub fn js_literal(&self) -> String {
        match self {
            Value::Number(n) if n.fract() == 0.0 && n.abs() < 9.007_199_254_740_992e15 => {
                format!("{}", *n as i64)
            }
            Value::Number(n) => format!("{}", n),
            Value::Bool(b) => format!("{}", b),
            Value::Str(s) => format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\"")),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Str(s) => write!(f, "{}", s),
            other => write!(f, "{}", other.js_literal()),
        }
    }
}

/// Identifier scope for one compilation: enum constants accumulate here,
/// feature flags are seeded at construction.
#[derive(Debug, Default, Clone)]
pub struct Scope {
    symbols: HashMap<String, Value>,
}

impl Scope {
    pub fn define(&mut self, name: impl Into<String>, value: Value) {
        self.symbols.insert(name.into(), value);
    }

    pub fn is_defined(&self, name: &str) -> bool {
        self.symbols.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.symbols.get(name)
    }
}

/// 32-bit signed wrap, the conversion applied by the generated language
/// before every bitwise or shift operation.
fn to_int32(n: f64) -> i32 {
    if !n.is_finite() {
        return 0;
    }
    let n = n.trunc();
    let m = n.rem_euclid(4_294_967_296.0);
    if m >= 2_147_483_648.0 {
        (m - 4_294_967_296.0) as i32
    } else {
        m as i32
    }
}

fn parse_number(text: &str) -> Result<f64, EvalError> {
    let digits = text.replace('_', "");
    let parsed = if let Some(hex) = digits.strip_prefix("0x").or_else(|| digits.strip_prefix("0X")) {
        u64::from_str_radix(hex, 16).map(|v| v as f64).ok()
    } else if let Some(bin) = digits.strip_prefix("0b").or_else(|| digits.strip_prefix("0B")) {
        u64::from_str_radix(bin, 2).map(|v| v as f64).ok()
    } else if let Some(oct) = digits.strip_prefix("0o").or_else(|| digits.strip_prefix("0O")) {
        u64::from_str_radix(oct, 8).map(|v| v as f64).ok()
    } else {
        digits.parse::<f64>().ok()
    };
    parsed.ok_or_else(|| EvalError::InvalidNumber(text.to_owned()))
}

/// Evaluate an expression over the given tokens. The whole slice must be
/// consumed; trailing tokens are an error.
pub fn evaluate(tokens: &[Token], scope: &Scope) -> Result<Value, EvalError> {
    let mut parser = ExprParser { tokens, pos: 0, scope };
    let value = parser.ternary(false)?;
    match parser.peek() {
        None => Ok(value),
        Some(tok) => Err(EvalError::UnexpectedToken(tok.to_owned())),
    }
}

struct ExprParser<'a> {
    tokens: &'a [Token],
    pos: usize,
    scope: &'a Scope,
}

impl<'a> ExprParser<'a> {
    fn peek(&self) -> Option<&str> {
        self.tokens.get(self.pos).map(|t| t.text.as_str())
    }

    fn next(&mut self) -> Result<&'a str, EvalError> {
        let tok = self.tokens.get(self.pos).ok_or(EvalError::UnexpectedEnd)?;
        self.pos += 1;
        Ok(tok.text.as_str())
    }

    fn expect(&mut self, text: &str) -> Result<(), EvalError> {
        match self.next()? {
            t if t == text => Ok(()),
            t => Err(EvalError::UnexpectedToken(t.to_owned())),
        }
    }

    fn eat(&mut self, text: &str) -> bool {
        if self.peek() == Some(text) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    // `dead` propagates through short-circuited branches: the structure is
    // still parsed, but identifier lookups are suppressed so that
    // `defined(X) && X > 2` never reports an undefined `X`.

    fn ternary(&mut self, dead: bool) -> Result<Value, EvalError> {
        let condition = self.logical_or(dead)?;
        if !self.eat("?") {
            return Ok(condition);
        }
        let take_first = !dead && condition.truthy();
        let first = self.ternary(dead || !take_first)?;
        self.expect(":")?;
        let second = self.ternary(dead || take_first)?;
        Ok(if take_first { first } else { second })
    }

    fn logical_or(&mut self, dead: bool) -> Result<Value, EvalError> {
        let mut value = self.logical_and(dead)?;
        while self.eat("||") {
            let short = !dead && value.truthy();
            let rhs = self.logical_and(dead || short)?;
            if !short {
                value = rhs;
            }
        }
        Ok(value)
    }

    fn logical_and(&mut self, dead: bool) -> Result<Value, EvalError> {
        let mut value = self.bit_or(dead)?;
        while self.eat("&&") {
            let short = !dead && !value.truthy();
            let rhs = self.bit_or(dead || short)?;
            if !short {
                value = rhs;
            }
        }
        Ok(value)
    }

    fn bit_or(&mut self, dead: bool) -> Result<Value, EvalError> {
        let mut value = self.bit_xor(dead)?;
        while self.eat("|") {
            let rhs = self.bit_xor(dead)?;
            value = Value::Number((to_int32(value.as_number()?) | to_int32(rhs.as_number()?)) as f64);
        }
        Ok(value)
    }

    fn bit_xor(&mut self, dead: bool) -> Result<Value, EvalError> {
        let mut value = self.bit_and(dead)?;
        while self.eat("^") {
            let rhs = self.bit_and(dead)?;
            value = Value::Number((to_int32(value.as_number()?) ^ to_int32(rhs.as_number()?)) as f64);
        }
        Ok(value)
    }

    fn bit_and(&mut self, dead: bool) -> Result<Value, EvalError> {
        let mut value = self.equality(dead)?;
        while self.eat("&") {
            let rhs = self.equality(dead)?;
            value = Value::Number((to_int32(value.as_number()?) & to_int32(rhs.as_number()?)) as f64);
        }
        Ok(value)
    }

    fn equality(&mut self, dead: bool) -> Result<Value, EvalError> {
        let mut value = self.relational(dead)?;
        loop {
            let negate = if self.eat("==") {
                false
            } else if self.eat("!=") {
                true
            } else {
                return Ok(value);
            };
            let rhs = self.relational(dead)?;
            let equal = match (&value, &rhs) {
                (Value::Str(l), Value::Str(r)) => l == r,
                (Value::Str(_), _) | (_, Value::Str(_)) => false,
                (l, r) => l.as_number()? == r.as_number()?,
            };
            value = Value::Bool(equal != negate);
        }
    }

    fn relational(&mut self, dead: bool) -> Result<Value, EvalError> {
        let mut value = self.shift(dead)?;
        loop {
            let op = match self.peek() {
                Some(op @ ("<" | "<=" | ">" | ">=")) => op.to_owned(),
                _ => return Ok(value),
            };
            self.pos += 1;
            let rhs = self.shift(dead)?;
            let (l, r) = (value.as_number()?, rhs.as_number()?);
            value = Value::Bool(match op.as_str() {
                "<" => l < r,
                "<=" => l <= r,
                ">" => l > r,
                _ => l >= r,
            });
        }
    }

    fn shift(&mut self, dead: bool) -> Result<Value, EvalError> {
        let mut value = self.additive(dead)?;
        loop {
            let left = if self.eat("<<") {
                true
            } else if self.eat(">>") {
                false
            } else {
                return Ok(value);
            };
            let rhs = self.additive(dead)?;
            let l = to_int32(value.as_number()?);
            let count = (to_int32(rhs.as_number()?) & 31) as u32;
            value = Value::Number(if left { l.wrapping_shl(count) } else { l >> count } as f64);
        }
    }

    fn additive(&mut self, dead: bool) -> Result<Value, EvalError> {
        let mut value = self.multiplicative(dead)?;
        loop {
            let add = if self.eat("+") {
                true
            } else if self.eat("-") {
                false
            } else {
                return Ok(value);
            };
            let rhs = self.multiplicative(dead)?;
            value = match (&value, &rhs) {
                (Value::Str(_), _) | (_, Value::Str(_)) if add => {
                    Value::Str(format!("{}{}", value, rhs))
                }
                _ => {
                    let (l, r) = (value.as_number()?, rhs.as_number()?);
                    Value::Number(if add { l + r } else { l - r })
                }
            };
        }
    }

    fn multiplicative(&mut self, dead: bool) -> Result<Value, EvalError> {
        let mut value = self.unary(dead)?;
        loop {
            let op = match self.peek() {
                Some(op @ ("*" | "/" | "%")) => op.to_owned(),
                _ => return Ok(value),
            };
            self.pos += 1;
            let rhs = self.unary(dead)?;
            let (l, r) = (value.as_number()?, rhs.as_number()?);
            value = Value::Number(match op.as_str() {
                "*" => l * r,
                "/" => l / r,
                _ => l % r,
            });
        }
    }

    fn unary(&mut self, dead: bool) -> Result<Value, EvalError> {
        match self.peek() {
            Some("-") => {
                self.pos += 1;
                Ok(Value::Number(-self.unary(dead)?.as_number()?))
            }
            Some("+") => {
                self.pos += 1;
                Ok(Value::Number(self.unary(dead)?.as_number()?))
            }
            Some("!") => {
                self.pos += 1;
                let value = self.unary(dead)?;
                Ok(Value::Bool(!value.truthy()))
            }
            Some("~") => {
                self.pos += 1;
                let value = self.unary(dead)?;
                Ok(Value::Number(!to_int32(value.as_number()?) as f64))
            }
            _ => self.primary(dead),
        }
    }

    fn primary(&mut self, dead: bool) -> Result<Value, EvalError> {
        let tok = self.next()?;
        if tok == "(" {
            let value = self.ternary(dead)?;
            self.expect(")")?;
            return Ok(value);
        }
        let first = tok.chars().next().ok_or(EvalError::UnexpectedEnd)?;
        if first.is_ascii_digit() {
            return Ok(Value::Number(parse_number(tok)?));
        }
        if first == '"' {
            return Ok(Value::Str(tok.trim_matches('"').to_owned()));
        }
        match tok {
            "true" => Ok(Value::Bool(true)),
            "false" => Ok(Value::Bool(false)),
            "defined" => {
                self.expect("(")?;
                let name = self.next()?;
                self.expect(")")?;
                Ok(Value::Bool(self.scope.is_defined(name)))
            }
            name if first.is_ascii_alphabetic() || first == '_' => {
                if dead {
                    return Ok(Value::Number(0.0));
                }
                self.scope
                    .get(name)
                    .cloned()
                    .ok_or_else(|| EvalError::UndefinedIdentifier(name.to_owned()))
            }
            other => Err(EvalError::UnexpectedToken(other.to_owned())),
        }
    }
}
