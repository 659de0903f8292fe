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

//! Dynamically-typed output dialect.

use super::{preamble, EmitTarget, INDENT};
use crate::ast::JsonField;
use crate::pragma::Language;

pub struct JavaScript;

impl EmitTarget for JavaScript {
    fn language(&self) -> Language {
        Language::JavaScript
    }

    fn class_open(
        &self,
        name: &str,
        extends: &str,
        _implements: Option<&str>,
        export: bool,
    ) -> String {
        let export = if export { "export " } else { "" };
        format!("{}class {} extends {} {{", export, name, extends)
    }

    fn constructor_open(&self) -> String {
        format!("{}constructor(data, offset, byteLength) {{", INDENT)
    }

    fn getter_open(&self, name: &str, _value_type: &str) -> String {
        format!("{}get {}() {{", INDENT, name)
    }

    fn setter_open(&self, name: &str, _value_type: &str) -> String {
        format!("{}set {}(value) {{", INDENT, name)
    }

    fn static_byte_length(&self, byte_length: usize) -> String {
        format!("{}static byteLength = {};", INDENT, byte_length)
    }

    fn enum_declaration(&self, name: &str, members: &[(String, String)], export: bool) -> String {
        let export = if export { "export " } else { "" };
        let mut lines = vec![format!("{}const {} = Object.freeze({{", export, name)];
        for (id, literal) in members {
            lines.push(format!("{}{}: {},", INDENT, id, literal));
        }
        lines.push("});".to_owned());
        lines.join("\n")
    }

    fn to_json_open(&self) -> String {
        format!("{}toJSON() {{", INDENT)
    }

    fn from_open(&self, _class: &str, _strict: bool) -> String {
        format!("{}static from(obj) {{", INDENT)
    }

    fn from_member(&self, _class: &str, field: &JsonField, _strict: bool) -> String {
        let name = field.name();
        let assign = match field {
            JsonField::Plain { .. } | JsonField::ArrayFrom { .. } => format!("obj.{}", name),
            JsonField::Nested { type_name, .. } => format!("{}.from(obj.{})", type_name, name),
            JsonField::NestedArray { type_name, .. } => {
                format!("Array.from(obj.{}, (element) => {}.from(element))", name, type_name)
            }
            JsonField::Flexible { .. } => format!("obj.{}", name),
        };
        format!("if (\"{}\" in obj) result.{} = {};", name, name, assign)
    }

    fn endian_probe_declaration(&self) -> &'static str {
        preamble::PROBE_DECL_JS
    }

    fn helper_snippets(&self, proxy: bool, struct_array: bool) -> Vec<&'static str> {
        let mut snippets = Vec::new();
        if proxy {
            snippets.push(preamble::PROXY_ARRAY_JS);
        }
        if struct_array {
            snippets.push(preamble::STRUCT_ARRAY_JS);
        }
        snippets
    }

    fn export_trailer(&self, _names: &[String]) -> Option<String> {
        // Symbols are exported inline.
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn class_header_with_export() {
        assert_eq!(
            JavaScript.class_open("Point", "DataView", None, true),
            "export class Point extends DataView {"
        );
        assert_eq!(
            JavaScript.class_open("Point", "Base", Some("I"), false),
            "class Point extends Base {"
        );
    }

    #[test]
    fn enum_renders_frozen_object() {
        let members =
            vec![("a".to_owned(), "1".to_owned()), ("b".to_owned(), "-13".to_owned())];
        let decl = JavaScript.enum_declaration("Masks", &members, true);
        assert_eq!(decl, "export const Masks = Object.freeze({\n   a: 1,\n   b: -13,\n});");
    }

    #[test]
    fn from_member_nested() {
        let field = JsonField::Nested { name: "i".to_owned(), type_name: "Integers".to_owned() };
        assert_eq!(
            JavaScript.from_member("Outer", &field, false),
            "if (\"i\" in obj) result.i = Integers.from(obj.i);"
        );
    }
}
