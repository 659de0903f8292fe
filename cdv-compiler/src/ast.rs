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

//! Core data model: field kinds, the open declaration context, and the
//! registry of finished types.

use crate::eval::Value;
use serde::Serialize;
use std::collections::{HashMap, HashSet};

/// Fixed-width storage types of the generated view accessors. The names
/// mirror the DataView accessor suffixes.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
pub enum NumericType {
    Int8,
    Uint8,
    Int16,
    Uint16,
    Int32,
    Uint32,
    BigInt64,
    BigUint64,
    Float32,
    Float64,
}

impl NumericType {
    pub fn byte_count(self) -> usize {
        match self {
            NumericType::Int8 | NumericType::Uint8 => 1,
            NumericType::Int16 | NumericType::Uint16 => 2,
            NumericType::Int32 | NumericType::Uint32 | NumericType::Float32 => 4,
            NumericType::BigInt64 | NumericType::BigUint64 | NumericType::Float64 => 8,
        }
    }

    /// Accessor suffix: `this.get{js_name}(...)`.
    pub fn js_name(self) -> &'static str {
        match self {
            NumericType::Int8 => "Int8",
            NumericType::Uint8 => "Uint8",
            NumericType::Int16 => "Int16",
            NumericType::Uint16 => "Uint16",
            NumericType::Int32 => "Int32",
            NumericType::Uint32 => "Uint32",
            NumericType::BigInt64 => "BigInt64",
            NumericType::BigUint64 => "BigUint64",
            NumericType::Float32 => "Float32",
            NumericType::Float64 => "Float64",
        }
    }

    pub fn typed_array(self) -> String {
        format!("{}Array", self.js_name())
    }

    /// 64-bit integers surface as `bigint` in the generated code.
    pub fn is_big(self) -> bool {
        matches!(self, NumericType::BigInt64 | NumericType::BigUint64)
    }

    pub fn is_integer(self) -> bool {
        !matches!(self, NumericType::Float32 | NumericType::Float64)
    }

    /// Resolve a DSL type name through the fixed alias table. Covers the
    /// C-style fixed width names and the generated language's own names.
    pub fn from_alias(name: &str) -> Option<NumericType> {
        Some(match name {
            "uint8_t" | "Uint8" => NumericType::Uint8,
            "int8_t" | "Int8" => NumericType::Int8,
            "uint16_t" | "Uint16" => NumericType::Uint16,
            "int16_t" | "Int16" => NumericType::Int16,
            "uint32_t" | "Uint32" => NumericType::Uint32,
            "int32_t" | "Int32" => NumericType::Int32,
            "uint64_t" | "BigUint64" => NumericType::BigUint64,
            "int64_t" | "BigInt64" => NumericType::BigInt64,
            "float" | "Float32" => NumericType::Float32,
            "double" | "Float64" => NumericType::Float64,
            _ => return None,
        })
    }
}

/// A resolved field, handed to the emitter the moment its declaration line
/// parses; never persisted beyond the enclosing declaration.
#[derive(Debug, Clone)]
pub struct FieldDescriptor {
    pub name: String,
    pub kind: FieldKind,
    pub offset: usize,
    pub byte_length: usize,
    pub is_padding: bool,
    pub line: u32,
}

/// One variant per layout rule; emission is an exhaustive match over this.
#[derive(Debug, Clone)]
pub enum FieldKind {
    /// Fixed-width scalar or contiguous array of them.
    Numeric { ty: NumericType, array: Option<usize> },
    /// Single character, one byte.
    Char,
    /// Fixed-length text buffer of `count` bytes.
    CharArray { count: usize },
    /// Embedded previously declared struct or union, possibly an array
    /// with an alignment-padded stride. `element_length` is the nested
    /// type's raw byte length, the amount copied by setters.
    Nested { type_name: String, array: Option<usize>, stride: usize, element_length: usize },
    /// Trailing zero-length byte array; length comes from the backing
    /// buffer at construction time.
    FlexibleBytes { element: NumericType },
}

/// A sub-byte field waiting for its run to flush into a backing word.
#[derive(Debug, Clone)]
pub struct PendingBitfield {
    pub name: String,
    pub bits: u32,
    /// Declared storage width in bytes (`uint16_t f:3` forces at least a
    /// 16-bit word); zero for `Uint:N` and booleans.
    pub declared_bytes: usize,
    pub boolean: bool,
    pub is_padding: bool,
    pub line: u32,
}

/// Accounting for an open union: members overlap at `base`, the union
/// consumes the maximum member size.
#[derive(Debug, Clone, Copy)]
pub struct UnionState {
    pub base: usize,
    pub max: usize,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ContextKind {
    Struct,
    /// Named union declared at the top level; produces a class of its own.
    Union,
    /// `typedef struct { ... } Name;` — the name arrives at the close.
    Typedef,
}

/// The single open declaration. Exactly one may exist at a time; nesting
/// is forbidden (anonymous unions are a sub-state, not a second context).
#[derive(Debug)]
pub struct StructContext {
    pub kind: ContextKind,
    pub name: Option<String>,
    pub parent: Option<String>,
    pub cursor: usize,
    /// Running maximum alignment requirement, already capped by `pack`.
    pub alignment: usize,
    pub field_names: HashSet<String>,
    pub pending_bitfields: Vec<PendingBitfield>,
    pub union: Option<UnionState>,
    pub flexible_member: Option<String>,
    /// Generated class-body lines, accumulated as fields close.
    pub body: Vec<String>,
    /// Fields participating in JSON serialization, in order.
    pub json_fields: Vec<JsonField>,
    pub line: u32,
}

impl StructContext {
    pub fn open(kind: ContextKind, name: Option<String>, line: u32) -> StructContext {
        StructContext {
            kind,
            name,
            parent: None,
            cursor: 0,
            alignment: 1,
            field_names: HashSet::new(),
            pending_bitfields: Vec::new(),
            union: if kind == ContextKind::Union {
                Some(UnionState { base: 0, max: 0 })
            } else {
                None
            },
            flexible_member: None,
            body: Vec::new(),
            json_fields: Vec::new(),
            line,
        }
    }

    /// Advance the cursor past a field, or fold it into the open union's
    /// maximum. The cursor only ever grows.
    pub fn end_field(&mut self, byte_count: usize) {
        match &mut self.union {
            Some(union) => union.max = union.max.max(byte_count),
            None => self.cursor += byte_count,
        }
    }

    /// Offset at which the next field starts.
    pub fn field_offset(&self) -> usize {
        match &self.union {
            Some(union) => union.base,
            None => self.cursor,
        }
    }

    pub fn note_alignment(&mut self, alignment: usize) {
        self.alignment = self.alignment.max(alignment);
    }
}

/// How a field round-trips through `toJSON` / `from`.
#[derive(Debug, Clone)]
pub enum JsonField {
    Plain { name: String },
    ArrayFrom { name: String },
    Nested { name: String, type_name: String },
    NestedArray { name: String, type_name: String, count: usize },
    Flexible { name: String },
}

impl JsonField {
    pub fn name(&self) -> &str {
        match self {
            JsonField::Plain { name }
            | JsonField::ArrayFrom { name }
            | JsonField::Nested { name, .. }
            | JsonField::NestedArray { name, .. }
            | JsonField::Flexible { name } => name,
        }
    }
}

/// An open `enum` declaration.
#[derive(Debug)]
pub struct EnumContext {
    pub name: Option<String>,
    pub backing: NumericType,
    pub members: Vec<(String, Value)>,
    pub seen: HashSet<String>,
    pub line: u32,
}

impl EnumContext {
    pub fn open(name: Option<String>, backing: NumericType, line: u32) -> EnumContext {
        EnumContext { name, backing, members: Vec::new(), seen: HashSet::new(), line }
    }

    /// Value for a member without an explicit initializer: previous
    /// member plus one, counting from -1.
    pub fn next_implicit(&self) -> Option<Value> {
        match self.members.last() {
            None => Some(Value::Number(0.0)),
            Some((_, Value::Number(n))) => Some(Value::Number(n + 1.0)),
            Some(_) => None,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum TypeKind {
    Struct,
    Union,
    Enum { backing: NumericType },
}

/// Layout facts recorded for every finished declaration, used to resolve
/// nested fields and inheritance.
#[derive(Debug, Clone, Serialize)]
pub struct TypeInfo {
    pub byte_length: usize,
    pub alignment: usize,
    pub aligned_length: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    #[serde(flatten)]
    pub kind: TypeKind,
}

/// Append-only map of declared type names. Duplicates are a hard error at
/// the declaration site.
#[derive(Debug, Default)]
pub struct TypeRegistry {
    types: HashMap<String, TypeInfo>,
    order: Vec<String>,
}

impl TypeRegistry {
    pub fn insert(&mut self, name: &str, info: TypeInfo) -> Result<(), ()> {
        if self.types.contains_key(name) {
            return Err(());
        }
        self.types.insert(name.to_owned(), info);
        self.order.push(name.to_owned());
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&TypeInfo> {
        self.types.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.types.contains_key(name)
    }

    /// Declaration order, for deterministic output.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &TypeInfo)> {
        self.order.iter().map(|name| (name, &self.types[name]))
    }
}

pub fn align_up(offset: usize, alignment: usize) -> usize {
    if alignment <= 1 {
        offset
    } else {
        offset.div_ceil(alignment) * alignment
    }
}
