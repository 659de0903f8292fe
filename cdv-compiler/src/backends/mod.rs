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

//! Code emission.
//!
//! The layout engine hands finished field descriptors here one at a time;
//! accessor bodies are shared between the two output dialects, while
//! everything dialect-specific (signatures, annotations, export style)
//! goes through the [`EmitTarget`] capability trait.

pub mod javascript;
pub mod json;
pub mod preamble;
pub mod typescript;

use crate::ast::{FieldDescriptor, FieldKind, JsonField, NumericType, PendingBitfield};
use crate::pragma::{BitOrder, Endian, HostEndian, Language, Platform, PragmaState};

/// Indentation unit of the generated source.
pub const INDENT: &str = "   ";

/// Everything a dialect must know how to phrase.
pub trait EmitTarget: Sync {
    fn language(&self) -> Language;
    /// Class header line, e.g. `export class Point extends DataView {`.
    fn class_open(&self, name: &str, extends: &str, implements: Option<&str>, export: bool)
        -> String;
    fn constructor_open(&self) -> String;
    fn getter_open(&self, name: &str, value_type: &str) -> String;
    fn setter_open(&self, name: &str, value_type: &str) -> String;
    fn static_byte_length(&self, byte_length: usize) -> String;
    /// A full enum declaration from pre-formatted member literals.
    fn enum_declaration(&self, name: &str, members: &[(String, String)], export: bool) -> String;
    fn to_json_open(&self) -> String;
    fn from_open(&self, class: &str, strict: bool) -> String;
    /// One `if ("x" in obj) result.x = ...;` line of `static from`.
    fn from_member(&self, class: &str, field: &JsonField, strict: bool) -> String;
    fn endian_probe_declaration(&self) -> &'static str;
    fn helper_snippets(&self, proxy: bool, struct_array: bool) -> Vec<&'static str>;
    /// Trailing export list; the dynamically-typed dialect exports inline
    /// and returns `None`.
    fn export_trailer(&self, names: &[String]) -> Option<String>;
}

pub fn dialect(language: Language) -> &'static dyn EmitTarget {
    match language {
        Language::JavaScript => &javascript::JavaScript,
        Language::TypeScript => &typescript::TypeScript,
    }
}

/// Hexadecimal mask literal, trimmed to the given storage width.
pub(crate) fn hex(value: u32, byte_count: usize) -> String {
    const DIGITS: [char; 16] = [
        '0', '1', '2', '3', '4', '5', '6', '7', '8', '9', 'A', 'B', 'C', 'D', 'E', 'F',
    ];
    let mut result = String::new();
    let mut value = value;
    let mut nybbles = byte_count * 2;
    while value != 0 && nybbles > 0 {
        result.insert(0, DIGITS[(value & 15) as usize]);
        value >>= 4;
        nybbles -= 1;
    }
    if result.is_empty() {
        "0x0".to_owned()
    } else {
        format!("0x{}", result)
    }
}

/// `base` or `base + off`.
fn plus(base: &str, off: usize) -> String {
    if off == 0 {
        base.to_owned()
    } else {
        format!("{} + {}", base, off)
    }
}

/// Per-instance view offset expression for a field.
fn view_offset(off: usize) -> String {
    plus("this.byteOffset", off)
}

/// Incremental code assembly for one compilation.
#[derive(Debug, Default)]
pub struct CodeBuilder {
    /// Module-level chunks (enums, classes, passthrough comments) in
    /// source order.
    pub chunks: Vec<String>,
    pub exports: Vec<String>,
    needs_proxy: bool,
    needs_struct_array: bool,
    needs_probe: bool,
}

impl CodeBuilder {
    /// Endianness argument appended to a DataView accessor call, empty for
    /// single-byte accesses.
    fn endian_arg(&mut self, pragmas: &PragmaState, byte_count: usize) -> String {
        if byte_count == 1 {
            return String::new();
        }
        match (pragmas.endian, pragmas.host_endian) {
            (Endian::Little, _) => ", true".to_owned(),
            (Endian::Big, _) => ", false".to_owned(),
            (Endian::Host, HostEndian::Little) => ", true".to_owned(),
            (Endian::Host, HostEndian::Big) => ", false".to_owned(),
            (Endian::Host, HostEndian::Unknown) => {
                self.needs_probe = true;
                ", isLittleEndian".to_owned()
            }
        }
    }

    /// Whether multi-byte array fields may be exposed as plain typed-array
    /// views. Anything but compile-time little endian goes through the
    /// bounds-checked proxy.
    fn plain_view(&self, pragmas: &PragmaState) -> bool {
        matches!(
            (pragmas.endian, pragmas.host_endian),
            (Endian::Little, _) | (Endian::Host, HostEndian::Little)
        )
    }

    /// Emit the getter/setter pair for a non-bitfield field into
    /// class-body lines. Padding fields produce nothing.
    pub fn field_accessors(
        &mut self,
        pragmas: &PragmaState,
        field: &FieldDescriptor,
    ) -> Vec<String> {
        if field.is_padding {
            return Vec::new();
        }
        let target = dialect(pragmas.language);
        let mut lines = Vec::new();
        let (get_body, get_type) = self.getter(pragmas, field);
        if pragmas.emit_get {
            lines.push(target.getter_open(&field.name, &get_type));
            for line in &get_body {
                lines.push(format!("{}{}{}", INDENT, INDENT, line));
            }
            lines.push(format!("{}}}", INDENT));
        }
        if pragmas.emit_set {
            let (set_body, set_type) = self.setter(pragmas, field);
            lines.push(target.setter_open(&field.name, &set_type));
            for line in &set_body {
                lines.push(format!("{}{}{}", INDENT, INDENT, line));
            }
            lines.push(format!("{}}}", INDENT));
        }
        lines
    }

    fn getter(&mut self, pragmas: &PragmaState, field: &FieldDescriptor) -> (Vec<String>, String) {
        let off = field.offset;
        match &field.kind {
            FieldKind::Numeric { ty, array: None } => {
                let endian = self.endian_arg(pragmas, ty.byte_count());
                let body = vec![format!("return this.get{}({}{});", ty.js_name(), off, endian)];
                let value_type = if ty.is_big() { "bigint" } else { "number" };
                (body, value_type.to_owned())
            }
            FieldKind::Numeric { ty, array: Some(count) } => {
                if ty.byte_count() == 1 || self.plain_view(pragmas) {
                    let body = vec![format!(
                        "return new {}(this.buffer, {}, {});",
                        ty.typed_array(),
                        view_offset(off),
                        count
                    )];
                    (body, ty.typed_array())
                } else {
                    self.needs_proxy = true;
                    let endian = self.endian_arg(pragmas, ty.byte_count());
                    let width = ty.byte_count();
                    let element = if off == 0 {
                        format!("index * {}", width)
                    } else {
                        format!("{} + index * {}", off, width)
                    };
                    let body = vec![format!(
                        "return proxyArray({}, (index) => this.get{}({}{}), (index, value) => this.set{}({}, value{}));",
                        count,
                        ty.js_name(),
                        element,
                        endian,
                        ty.js_name(),
                        element,
                        endian
                    )];
                    let value_type =
                        if ty.is_big() { "ArrayLike<bigint>" } else { "ArrayLike<number>" };
                    (body, value_type.to_owned())
                }
            }
            FieldKind::Char => {
                let body = vec![format!("return String.fromCharCode(this.getUint8({}));", off)];
                (body, "string".to_owned())
            }
            FieldKind::CharArray { count } => {
                let start = view_offset(off);
                let end = format!("{} + {}", start, count);
                let body = vec![match pragmas.platform {
                    Platform::Xs => format!(
                        "return String.fromArrayBuffer(this.buffer.slice({}, {}));",
                        start, end
                    ),
                    Platform::Node => format!(
                        "return Buffer.from(this.buffer, {}, {}).toString();",
                        view_offset(off),
                        count
                    ),
                    Platform::Web => format!(
                        "return new TextDecoder().decode(new Uint8Array(this.buffer, {}, {}));",
                        view_offset(off),
                        count
                    ),
                }];
                (body, "string".to_owned())
            }
            FieldKind::Nested { type_name, array: None, .. } => {
                let body =
                    vec![format!("return new {}(this.buffer, {});", type_name, view_offset(off))];
                (body, type_name.clone())
            }
            FieldKind::Nested { type_name, array: Some(count), stride, .. } => {
                self.needs_proxy = true;
                self.needs_struct_array = true;
                let body = vec![format!(
                    "return structArray(this, {}, {}, {}, {});",
                    type_name, off, stride, count
                )];
                (body, format!("ArrayLike<{}>", type_name))
            }
            FieldKind::FlexibleBytes { element } => {
                let body = vec![format!(
                    "return new {}(this.buffer, {}, this.byteLength - {});",
                    element.typed_array(),
                    view_offset(off),
                    off
                )];
                (body, element.typed_array())
            }
        }
    }

    fn setter(&mut self, pragmas: &PragmaState, field: &FieldDescriptor) -> (Vec<String>, String) {
        let off = field.offset;
        match &field.kind {
            FieldKind::Numeric { ty, array: None } => {
                let endian = self.endian_arg(pragmas, ty.byte_count());
                let body = vec![format!("this.set{}({}, value{});", ty.js_name(), off, endian)];
                let value_type = if ty.is_big() { "bigint" } else { "number" };
                (body, value_type.to_owned())
            }
            FieldKind::Numeric { ty, array: Some(count) } => {
                let endian = self.endian_arg(pragmas, ty.byte_count());
                let width = ty.byte_count();
                let body = vec![
                    format!("for (let i = 0, j = {}; i < {}; i++, j += {})", off, count, width),
                    format!("{}this.set{}(j, value[i]{});", INDENT, ty.js_name(), endian),
                ];
                let value_type = if ty.is_big() { "ArrayLike<bigint>" } else { "ArrayLike<number>" };
                (body, value_type.to_owned())
            }
            FieldKind::Char => {
                let body = vec![format!("this.setUint8({}, value.charCodeAt(0));", off)];
                (body, "string".to_owned())
            }
            FieldKind::CharArray { count } => {
                let encode = match pragmas.platform {
                    Platform::Xs => "new Uint8Array(ArrayBuffer.fromString(value))",
                    Platform::Node => "Buffer.from(value)",
                    Platform::Web => "new TextEncoder().encode(value)",
                };
                let body = vec![
                    format!("const encoded = {};", encode),
                    format!("if (encoded.byteLength > {})", count),
                    format!("{}throw new RangeError(\"string too long\");", INDENT),
                    "for (let i = 0; i < encoded.byteLength; i++)".to_owned(),
                    format!("{}this.setUint8({} + i, encoded[i]);", INDENT, off),
                    format!("for (let i = encoded.byteLength; i < {}; i++)", count),
                    format!("{}this.setUint8({} + i, 0);", INDENT, off),
                ];
                (body, "string".to_owned())
            }
            FieldKind::Nested { type_name, array: None, element_length, .. } => {
                let body = vec![
                    format!("for (let i = 0; i < {}; i++)", element_length),
                    format!("{}this.setUint8({}, value.getUint8(i));", INDENT, plus("i", off)),
                ];
                (body, type_name.clone())
            }
            FieldKind::Nested { type_name, array: Some(count), stride, element_length } => {
                let base = if off == 0 {
                    format!("index * {}", stride)
                } else {
                    format!("{} + index * {}", off, stride)
                };
                let body = vec![
                    format!("for (let index = 0; index < {}; index++)", count),
                    format!("{}for (let i = 0; i < {}; i++)", INDENT, element_length),
                    format!(
                        "{}{}this.setUint8({} + i, value[index].getUint8(i));",
                        INDENT, INDENT, base
                    ),
                ];
                (body, format!("ArrayLike<{}>", type_name))
            }
            FieldKind::FlexibleBytes { element } => {
                let body = vec![
                    format!("if (value.length > this.byteLength - {})", off),
                    format!("{}throw new RangeError(\"too long\");", INDENT),
                    "for (let i = 0; i < value.length; i++)".to_owned(),
                    format!("{}this.set{}({} + i, value[i]);", INDENT, element.js_name(), off),
                ];
                (body, "ArrayLike<number>".to_owned())
            }
        }
    }

    /// Emit accessors for a flushed bitfield run backed by one word of
    /// `word_bytes` bytes at `offset`.
    pub fn bitfield_accessors(
        &mut self,
        pragmas: &PragmaState,
        run: &[PendingBitfield],
        offset: usize,
        word_bytes: usize,
    ) -> Vec<String> {
        let target = dialect(pragmas.language);
        let word = match word_bytes {
            1 => NumericType::Uint8,
            2 => NumericType::Uint16,
            _ => NumericType::Uint32,
        };
        let endian = self.endian_arg(pragmas, word_bytes);
        let word_mask = ((1u64 << (word_bytes * 8)) - 1) as u32;
        let mut lines = Vec::new();

        let word_bits: u32 = (word_bytes * 8) as u32;
        let mut consumed: u32 = 0;
        for field in run {
            let shift = match pragmas.bit_order {
                BitOrder::Lsb => consumed,
                BitOrder::Msb => word_bits - consumed - field.bits,
            };
            consumed += field.bits;
            if field.is_padding {
                continue;
            }

            let mask = ((1u64 << field.bits) - 1) as u32;
            let placed = mask << shift;
            let inverse = hex(!placed & word_mask, word_bytes);
            let read = format!("this.get{}({}{})", word.js_name(), offset, endian);
            let value_type = if field.boolean { "boolean" } else { "number" };

            if pragmas.emit_get {
                lines.push(target.getter_open(&field.name, value_type));
                let body = if field.boolean {
                    format!("return Boolean({} & {});", read, hex(placed, word_bytes))
                } else if shift == 0 {
                    format!("return {} & {};", read, hex(mask, word_bytes))
                } else {
                    format!("return ({} >> {}) & {};", read, shift, hex(mask, word_bytes))
                };
                lines.push(format!("{}{}{}", INDENT, INDENT, body));
                lines.push(format!("{}}}", INDENT));
            }

            if pragmas.emit_set {
                lines.push(target.setter_open(&field.name, value_type));
                let set = |value: &str| {
                    format!("this.set{}({}, {}{});", word.js_name(), offset, value, endian)
                };
                if field.boolean || field.bits == 1 {
                    let test = if field.boolean { "value" } else { "(value & 1)" };
                    lines.push(format!("{}{}const t = {};", INDENT, INDENT, read));
                    lines.push(format!(
                        "{}{}{}",
                        INDENT,
                        INDENT,
                        set(&format!(
                            "{} ? (t | {}) : (t & {})",
                            test,
                            hex(placed, word_bytes),
                            inverse
                        ))
                    ));
                } else {
                    lines.push(format!("{}{}const t = {} & {};", INDENT, INDENT, read, inverse));
                    let update = if shift == 0 {
                        format!("t | (value & {})", hex(mask, word_bytes))
                    } else {
                        format!("t | ((value & {}) << {})", hex(mask, word_bytes), shift)
                    };
                    lines.push(format!("{}{}{}", INDENT, INDENT, set(&update)));
                }
                lines.push(format!("{}}}", INDENT));
            }
        }
        lines
    }

    /// Assemble a finished class chunk from the accumulated body lines.
    #[allow(clippy::too_many_arguments)]
    pub fn class_chunk(
        &mut self,
        pragmas: &PragmaState,
        name: &str,
        parent: Option<&str>,
        byte_length: usize,
        has_flexible_member: bool,
        body: &[String],
        json_fields: &[JsonField],
    ) -> String {
        let target = dialect(pragmas.language);
        let extends = parent.unwrap_or(&pragmas.extends);
        let mut lines = Vec::new();
        lines.push(target.class_open(
            name,
            extends,
            pragmas.implements.as_deref(),
            pragmas.export,
        ));
        if pragmas.language == Language::TypeScript {
            for inject in &pragmas.inject_interface {
                lines.push(format!("{}{}", INDENT, inject));
            }
        }
        if pragmas.output_byte_length {
            lines.push(target.static_byte_length(byte_length));
            lines.push(String::new());
        }

        // Constructor.
        let default_length = if has_flexible_member {
            "byteLength ?? (data.byteLength - (offset ?? 0))".to_owned()
        } else {
            format!("byteLength ?? {}", byte_length)
        };
        lines.push(target.constructor_open());
        if pragmas.check_byte_length {
            lines.push(format!(
                "{}{}if (data && ({}) > data.byteLength - (offset ?? 0))",
                INDENT, INDENT, default_length
            ));
            lines.push(format!(
                "{}{}{}throw new RangeError(\"{}: buffer too small\");",
                INDENT, INDENT, INDENT, name
            ));
        }
        lines.push(format!("{}{}if (data)", INDENT, INDENT));
        lines.push(format!(
            "{}{}{}super(data, offset ?? 0, {});",
            INDENT, INDENT, INDENT, default_length
        ));
        lines.push(format!("{}{}else", INDENT, INDENT));
        lines.push(format!(
            "{}{}{}super(new ArrayBuffer({}), 0, {});",
            INDENT, INDENT, INDENT, byte_length, byte_length
        ));
        if self.needs_probe {
            lines.push(format!("{}{}if (undefined === isLittleEndian)", INDENT, INDENT));
            lines.push(format!("{}{}{}{}", INDENT, INDENT, INDENT, preamble::PROBE_ASSIGN));
        }
        lines.push(format!("{}}}", INDENT));

        lines.extend(body.iter().cloned());

        if pragmas.json {
            lines.push(target.to_json_open());
            lines.push(format!("{}{}return {{", INDENT, INDENT));
            for field in json_fields {
                let entry = match field {
                    JsonField::Plain { name } => format!("{}: this.{},", name, name),
                    JsonField::ArrayFrom { name } | JsonField::Flexible { name } => {
                        format!("{}: Array.from(this.{}),", name, name)
                    }
                    JsonField::Nested { name, .. } => format!("{}: this.{}.toJSON(),", name, name),
                    JsonField::NestedArray { name, .. } => {
                        format!("{}: Array.from(this.{}, (element) => element.toJSON()),", name, name)
                    }
                };
                lines.push(format!("{}{}{}{}", INDENT, INDENT, INDENT, entry));
            }
            lines.push(format!("{}{}}};", INDENT, INDENT));
            lines.push(format!("{}}}", INDENT));

            lines.push(target.from_open(name, pragmas.strict_from));
            lines.push(format!("{}{}const result = new {};", INDENT, INDENT, name));
            for field in json_fields {
                if matches!(field, JsonField::Flexible { .. }) {
                    continue;
                }
                lines.push(format!(
                    "{}{}{}",
                    INDENT,
                    INDENT,
                    target.from_member(name, field, pragmas.strict_from)
                ));
            }
            lines.push(format!("{}{}return result;", INDENT, INDENT));
            lines.push(format!("{}}}", INDENT));
        }

        lines.push("}".to_owned());
        lines.join("\n")
    }

    /// Assemble an enum chunk from evaluated members.
    pub fn enum_chunk(
        &mut self,
        pragmas: &PragmaState,
        name: &str,
        members: &[(String, crate::eval::Value)],
    ) -> String {
        let target = dialect(pragmas.language);
        let formatted: Vec<(String, String)> =
            members.iter().map(|(id, value)| (id.clone(), value.js_literal())).collect();
        target.enum_declaration(name, &formatted, pragmas.export)
    }

    /// Pass a block comment through to the output. Inside a class the
    /// lines pick up the body indentation.
    pub fn comment_lines(comment: &str, in_class: bool) -> Vec<String> {
        comment
            .lines()
            .map(|line| {
                let line = line.trim_end();
                if in_class && !line.is_empty() {
                    format!("{}{}", INDENT, line.trim_start())
                } else {
                    line.to_owned()
                }
            })
            .collect()
    }

    /// Final assembly: prologue (imports, injected code, helper snippets,
    /// endianness probe), the accumulated chunks, the provenance trailer
    /// and the export list.
    pub fn assemble(&self, pragmas: &PragmaState, source: &str) -> String {
        let target = dialect(pragmas.language);
        let mut sections: Vec<String> = Vec::new();

        let mut prologue: Vec<String> = Vec::new();
        for import in &pragmas.imports {
            prologue.push(format!("import {};", import));
        }
        prologue.extend(pragmas.injects.iter().cloned());
        if !prologue.is_empty() {
            sections.push(prologue.join("\n"));
        }

        for snippet in target.helper_snippets(self.needs_proxy, self.needs_struct_array) {
            sections.push(snippet.to_owned());
        }
        if self.needs_probe {
            sections.push(target.endian_probe_declaration().to_owned());
        }

        sections.extend(self.chunks.iter().cloned());

        if pragmas.output_source {
            let mut trailer = String::new();
            trailer.push_str("/*\n");
            trailer.push_str(&format!(
                "{}View classes generated by cdvc from the following description.\n",
                INDENT
            ));
            trailer.push_str("*/\n");
            for line in source.lines() {
                let line = line.trim_end();
                if line.is_empty() {
                    trailer.push_str("//\n");
                } else {
                    trailer.push_str(&format!("// {}\n", line));
                }
            }
            sections.push(trailer.trim_end().to_owned());
        }

        if pragmas.export {
            if let Some(trailer) = target.export_trailer(&self.exports) {
                sections.push(trailer);
            }
        }

        let mut code = sections.join("\n\n");
        code.push('\n');
        code
    }
}
