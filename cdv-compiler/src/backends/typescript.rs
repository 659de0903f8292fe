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

//! Statically-typed output dialect.
//!
//! Classes are declared without inline `export`; all exported symbols are
//! listed once at the end of the module.

use super::{preamble, EmitTarget, INDENT};
use crate::ast::JsonField;
use crate::pragma::Language;

pub struct TypeScript;

impl EmitTarget for TypeScript {
    fn language(&self) -> Language {
        Language::TypeScript
    }

    fn class_open(
        &self,
        name: &str,
        extends: &str,
        implements: Option<&str>,
        _export: bool,
    ) -> String {
        match implements {
            Some(interface) => {
                format!("class {} extends {} implements {} {{", name, extends, interface)
            }
            None => format!("class {} extends {} {{", name, extends),
        }
    }

    fn constructor_open(&self) -> String {
        format!("{}constructor(data?: ArrayBuffer, offset?: number, byteLength?: number) {{", INDENT)
    }

    fn getter_open(&self, name: &str, value_type: &str) -> String {
        format!("{}get {}(): {} {{", INDENT, name, value_type)
    }

    fn setter_open(&self, name: &str, value_type: &str) -> String {
        format!("{}set {}(value: {}) {{", INDENT, name, value_type)
    }

    fn static_byte_length(&self, byte_length: usize) -> String {
        format!("{}static byteLength = {};", INDENT, byte_length)
    }

    fn enum_declaration(&self, name: &str, members: &[(String, String)], _export: bool) -> String {
        let mut lines = vec![format!("enum {} {{", name)];
        for (id, literal) in members {
            lines.push(format!("{}{} = {},", INDENT, id, literal));
        }
        lines.push("};".to_owned());
        lines.join("\n")
    }

    fn to_json_open(&self) -> String {
        format!("{}toJSON(): object {{", INDENT)
    }

    fn from_open(&self, class: &str, strict: bool) -> String {
        if strict {
            format!("{}static from(obj: Partial<{}>): {} {{", INDENT, class, class)
        } else {
            format!("{}static from(obj: object): {} {{", INDENT, class)
        }
    }

    fn from_member(&self, class: &str, field: &JsonField, strict: bool) -> String {
        let name = field.name();
        let access = if strict {
            format!("obj.{}!", name)
        } else {
            format!("(<{}> obj).{}", class, name)
        };
        let assign = match field {
            JsonField::Plain { .. } | JsonField::ArrayFrom { .. } | JsonField::Flexible { .. } => {
                access
            }
            JsonField::Nested { type_name, .. } => format!("{}.from({})", type_name, access),
            JsonField::NestedArray { type_name, .. } => {
                format!("Array.from({}, (element) => {}.from(element))", access, type_name)
            }
        };
        format!("if (\"{}\" in obj) result.{} = {};", name, name, assign)
    }

    fn endian_probe_declaration(&self) -> &'static str {
        preamble::PROBE_DECL_TS
    }

    fn helper_snippets(&self, proxy: bool, struct_array: bool) -> Vec<&'static str> {
        let mut snippets = Vec::new();
        if proxy {
            snippets.push(preamble::PROXY_ARRAY_TS);
        }
        if struct_array {
            snippets.push(preamble::STRUCT_ARRAY_TS);
        }
        snippets
    }

    fn export_trailer(&self, names: &[String]) -> Option<String> {
        if names.is_empty() {
            None
        } else {
            Some(format!("export {{ {} }};", names.join(", ")))
        }
    }
}
