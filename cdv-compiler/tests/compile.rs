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

//! End-to-end tests over the public `compile` entry point.

use cdv_compiler::{compile, compile_file, dump_layout, CompileResult, Language, Platform};
use std::io::Write;

/// Check that `haystack` contains `needle`, with a useful panic message.
#[track_caller]
fn assert_contains(haystack: &str, needle: &str) {
    assert!(haystack.contains(needle), "could not find {:?} in:\n{}", needle, haystack);
}

#[track_caller]
fn assert_clean(result: &CompileResult) {
    assert!(result.diagnostics.is_empty(), "unexpected diagnostics:\n{}", result.diagnostics);
}

fn clean_compile(source: &str) -> CompileResult {
    let result = compile(source, &[]);
    assert!(result.diagnostics.is_empty(), "unexpected diagnostics:\n{}", result.diagnostics);
    result
}

#[test]
fn point_compiles_to_little_endian_accessors() {
    let result = clean_compile("struct Point {\n   int32_t x;\n   int32_t y;\n};\n");
    assert_eq!(result.language, Language::JavaScript);
    assert_eq!(result.platform, Platform::Xs);
    assert_contains(&result.code, "export class Point extends DataView {");
    assert_contains(&result.code, "return this.getInt32(0, true);");
    assert_contains(&result.code, "this.setInt32(0, value, true);");
    assert_contains(&result.code, "return this.getInt32(4, true);");
    assert_contains(&result.code, "super(data, offset ?? 0, byteLength ?? 8);");
}

#[test]
fn field_consumption_adds_up_to_byte_length() {
    let json = dump_layout(
        "#pragma pack(4)\nstruct Mixed {\n   uint8_t a;\n   uint32_t b;\n   uint16_t c;\n   double d;\n};\n",
        &[],
    )
    .unwrap();
    // a at 0, b at 4, c at 8, d at 12 (pack caps the 8-byte alignment).
    assert_contains(&json, "\"byte_length\": 20");
    assert_contains(&json, "\"alignment\": 4");
}

#[test]
fn flags_pack_into_one_32_bit_word() {
    let result = clean_compile("struct Flags {\n   boolean a;\n   uint32_t b:3;\n};\n");
    assert_contains(&result.code, "super(data, offset ?? 0, byteLength ?? 4);");
    assert_contains(&result.code, "return Boolean(this.getUint32(0, true) & 0x1);");
    assert_contains(&result.code, "return (this.getUint32(0, true) >> 1) & 0x7;");
}

#[test]
fn pseudo_typed_bitfield_run_uses_smallest_backing_word() {
    let result = clean_compile("struct Small {\n   Uint a:3;\n   Uint b:4;\n   boolean c;\n};\n");
    // 8 bits total: one Uint8 word, no endianness argument.
    assert_contains(&result.code, "super(data, offset ?? 0, byteLength ?? 1);");
    assert_contains(&result.code, "return this.getUint8(0) & 0x7;");
    assert_contains(&result.code, "return Boolean(this.getUint8(0) & 0x80);");
}

#[test]
fn bitfield_overflow_by_one_bit_forces_flush() {
    // 30 bits fit in one word; adding 3 more would overflow 32.
    let result = clean_compile(
        "struct Runs {\n   Uint a:30;\n   Uint b:3;\n};\n",
    );
    assert_contains(&result.code, "this.getUint32(0, true)");
    assert_contains(&result.code, "return this.getUint8(4) & 0x7;");
}

#[test]
fn msb_bit_order_assigns_from_the_top() {
    let result = compile(
        "#pragma bitfields(msb)\nstruct M {\n   Uint top:2;\n   Uint rest:6;\n};\n",
        &[],
    );
    assert_clean(&result);
    assert_contains(&result.code, "return (this.getUint8(0) >> 6) & 0x3;");
    assert_contains(&result.code, "return this.getUint8(0) & 0x3F;");
}

#[test]
fn padding_fields_reserve_space_without_accessors() {
    let result = clean_compile(
        "#pragma outputSource(false)\nstruct Reserved {\n   uint8_t __pad0[4];\n   uint8_t value;\n};\n",
    );
    assert!(!result.code.contains("__pad0"));
    assert_contains(&result.code, "return this.getUint8(4);");
    assert_contains(&result.code, "super(data, offset ?? 0, byteLength ?? 5);");
}

#[test]
fn pad_prefix_is_configurable() {
    let result = compile(
        "#pragma outputSource(false)\n#pragma padPrefix(reserved_)\nstruct R {\n   uint16_t reserved_a;\n   uint8_t v;\n};\n",
        &[],
    );
    assert_clean(&result);
    assert!(!result.code.contains("reserved_a"));
    assert_contains(&result.code, "return this.getUint8(2);");
}

#[test]
fn duplicate_and_unknown_names_produce_one_diagnostic_each() {
    let result = compile(
        "struct A {\n   uint8_t x;\n   uint8_t x;\n};\nstruct A {\n   uint8_t y;\n};\nstruct B {\n   Mystery m;\n   uint8_t ok;\n};\n",
        &[],
    );
    assert_contains(&result.diagnostics, "duplicate field `x`");
    assert_contains(&result.diagnostics, "duplicate type `A`");
    assert_contains(&result.diagnostics, "unknown type `Mystery`");
    assert_eq!(result.diagnostics.matches("error[").count(), 3);
    // Compilation continued past every error.
    assert_contains(&result.code, "export class A extends DataView {");
}

#[test]
fn conditional_compilation_selects_branches() {
    let result = clean_compile(
        "#if 0\nstruct Dead {\n   uint8_t a;\n};\n#else\nstruct Live {\n   uint8_t b;\n};\n#endif\n",
    );
    assert!(!result.code.contains("class Dead"));
    assert_contains(&result.code, "class Live");

    let result = compile("#endif\n", &[]);
    assert_contains(&result.diagnostics, "`#endif` without matching `#if`");
}

#[test]
fn dead_branches_never_evaluate_conditions() {
    let result = clean_compile(
        "#if 0\n#if TOTALLY_UNDEFINED\nstruct A {\n   uint8_t a;\n};\n#endif\n#error never reached\n#endif\nstruct B {\n   uint8_t b;\n};\n",
    );
    assert_contains(&result.code, "class B");
}

#[test]
fn feature_flags_are_visible_to_conditions() {
    let result = clean_compile(
        "#if defined(__COMPILEDATAVIEW)\n#pragma json(true)\n#endif\nstruct S {\n   uint8_t a;\n};\n",
    );
    assert_contains(&result.code, "toJSON() {");
}

#[test]
fn enum_constants_resolve_in_later_expressions() {
    let result = clean_compile(
        "enum Masks {\n   a = 1 << 31,\n   b = 0x00FF0000,\n   c = 0b001100,\n   notC = ~c\n};\nstruct S {\n   uint8_t data[c];\n};\n",
    );
    assert_contains(&result.code, "a: -2147483648,");
    assert_contains(&result.code, "b: 16711680,");
    assert_contains(&result.code, "notC: -13,");
    assert_contains(&result.code, "super(data, offset ?? 0, byteLength ?? 12);");
}

#[test]
fn json_methods_have_round_trip_shape() {
    let result = compile(
        "#pragma json(true)\nstruct Integers {\n   uint16_t size;\n   uint8_t uuid[16];\n};\nstruct Outer {\n   Integers i;\n};\n",
        &[],
    );
    assert_clean(&result);
    assert_contains(&result.code, "size: this.size,");
    assert_contains(&result.code, "uuid: Array.from(this.uuid),");
    assert_contains(&result.code, "i: this.i.toJSON(),");
    assert_contains(&result.code, "static from(obj) {");
    assert_contains(&result.code, "if (\"size\" in obj) result.size = obj.size;");
    assert_contains(&result.code, "if (\"i\" in obj) result.i = Integers.from(obj.i);");
    assert_contains(&result.code, "return result;");
}

#[test]
fn typescript_dialect_annotates_and_exports_at_the_end() {
    let result = compile(
        "#pragma language(typescript)\n#pragma json(true)\nstruct Integers {\n   uint16_t size;\n   int64_t big;\n   char name[8];\n};\n",
        &[],
    );
    assert_clean(&result);
    assert_eq!(result.language, Language::TypeScript);
    assert_contains(&result.code, "class Integers extends DataView {");
    assert_contains(&result.code, "get size(): number {");
    assert_contains(&result.code, "get big(): bigint {");
    assert_contains(&result.code, "get name(): string {");
    assert_contains(&result.code, "set size(value: number) {");
    assert_contains(&result.code, "constructor(data?: ArrayBuffer, offset?: number, byteLength?: number) {");
    assert_contains(&result.code, "static from(obj: object): Integers {");
    assert_contains(&result.code, "result.size = (<Integers> obj).size;");
    assert_contains(&result.code, "export { Integers };");
    assert!(!result.code.contains("export class"));
}

#[test]
fn strict_from_uses_partial_typing() {
    let result = compile(
        "#pragma language(typescript)\n#pragma json(true)\n#pragma strictFrom(true)\nstruct P {\n   uint8_t v;\n};\n",
        &[],
    );
    assert_clean(&result);
    assert_contains(&result.code, "static from(obj: Partial<P>): P {");
    assert_contains(&result.code, "result.v = obj.v!;");
}

#[test]
fn platform_selects_string_codec() {
    let xs = clean_compile("struct S {\n   char text[8];\n};\n");
    assert_contains(&xs.code, "String.fromArrayBuffer");
    assert_contains(&xs.code, "ArrayBuffer.fromString(value)");

    let node = compile("#pragma language(javascript/node)\nstruct S {\n   char text[8];\n};\n", &[]);
    assert_clean(&node);
    assert_eq!(node.platform, Platform::Node);
    assert_contains(&node.code, "Buffer.from(this.buffer, this.byteOffset, 8).toString();");
    assert_contains(&node.code, "Buffer.from(value)");

    let web = compile("#pragma language(typescript/web)\nstruct S {\n   char text[8];\n};\n", &[]);
    assert_clean(&web);
    assert_contains(&web.code, "new TextDecoder().decode(new Uint8Array(this.buffer, this.byteOffset, 8));");
    assert_contains(&web.code, "new TextEncoder().encode(value)");
}

#[test]
fn string_setters_truncate_with_error_and_zero_fill() {
    let result = clean_compile("struct S {\n   char text[15];\n};\n");
    assert_contains(&result.code, "if (encoded.byteLength > 15)");
    assert_contains(&result.code, "throw new RangeError(\"string too long\");");
    assert_contains(&result.code, "for (let i = encoded.byteLength; i < 15; i++)");
    assert_contains(&result.code, "this.setUint8(0 + i, 0);");
}

#[test]
fn host_endianness_probe_lives_in_generated_code() {
    let result = compile("#pragma endian(host)\nstruct S {\n   uint32_t v;\n};\n", &[]);
    assert_clean(&result);
    assert_contains(&result.code, "let isLittleEndian;");
    assert_contains(&result.code, "if (undefined === isLittleEndian)");
    assert_contains(&result.code, "isLittleEndian = !!new Uint8Array(new Uint16Array([1]).buffer)[0];");
    assert_contains(&result.code, "return this.getUint32(0, isLittleEndian);");
}

#[test]
fn known_host_endianness_resolves_at_compile_time() {
    let result = compile(
        "#pragma hostEndian(big)\n#pragma endian(host)\nstruct S {\n   uint32_t v;\n};\n",
        &[],
    );
    assert_clean(&result);
    assert!(!result.code.contains("isLittleEndian"));
    assert_contains(&result.code, "return this.getUint32(0, false);");
}

#[test]
fn big_endian_arrays_use_the_proxy_helper() {
    let result = compile("#pragma endian(big)\nstruct S {\n   uint16_t values[4];\n};\n", &[]);
    assert_clean(&result);
    assert_contains(&result.code, "function proxyArray(");
    assert_contains(&result.code, "return proxyArray(4, (index) => this.getUint16(index * 2, false)");
    // Little-endian compilations don't carry the helper.
    let little = clean_compile("struct S {\n   uint16_t values[4];\n};\n");
    assert!(!little.code.contains("proxyArray"));
    assert_contains(&little.code, "return new Uint16Array(this.buffer, this.byteOffset, 4);");
}

#[test]
fn nested_struct_arrays_use_the_stride_helper() {
    let result = clean_compile(
        "#pragma pack(4)\nstruct Inner {\n   uint32_t a;\n   uint8_t b;\n};\nstruct Outer {\n   Inner items[3];\n};\n",
    );
    // Inner is 5 bytes, padded to an 8-byte... no: alignment 4 pads to 8.
    assert_contains(&result.code, "function structArray(");
    assert_contains(&result.code, "return structArray(this, Inner, 0, 8, 3);");
    assert_contains(&result.code, "super(data, offset ?? 0, byteLength ?? 24);");
}

#[test]
fn unions_overlap_and_size_to_the_largest_member() {
    let result = clean_compile(
        "struct Integers {\n   uint32_t v;\n};\nstruct U {\n   uint8_t kind;\n   union {\n      char text[16];\n      Integers i;\n   };\n};\nunion Ints {\n   uint8_t a;\n   uint32_t c;\n};\n",
    );
    assert_contains(&result.code, "super(data, offset ?? 0, byteLength ?? 17);");
    assert_contains(&result.code, "new Integers(this.buffer, this.byteOffset + 1)");
    assert_contains(&result.code, "export class Ints extends DataView {");
    assert_contains(&result.code, "super(data, offset ?? 0, byteLength ?? 4);");
}

#[test]
fn typedef_struct_takes_its_trailing_name() {
    let result = clean_compile("typedef struct {\n   float f[2];\n} FloatArray;\n");
    assert_contains(&result.code, "export class FloatArray extends DataView {");
    assert_contains(&result.code, "return new Float32Array(this.buffer, this.byteOffset, 2);");
}

#[test]
fn inheritance_seeds_layout_and_extends_parent() {
    let result = clean_compile(
        "struct Base {\n   uint32_t id;\n};\nstruct Child : Base {\n   uint8_t extra;\n};\n",
    );
    assert_contains(&result.code, "export class Child extends Base {");
    assert_contains(&result.code, "return this.getUint8(4);");
    assert_contains(&result.code, "super(data, offset ?? 0, byteLength ?? 5);");
}

#[test]
fn flexible_array_member_takes_the_buffer_remainder() {
    let result = clean_compile("struct Packet {\n   uint16_t id;\n   uint8_t payload[0];\n};\n");
    assert_contains(
        &result.code,
        "super(data, offset ?? 0, byteLength ?? (data.byteLength - (offset ?? 0)));",
    );
    assert_contains(&result.code, "return new Uint8Array(this.buffer, this.byteOffset + 2, this.byteLength - 2);");
    assert_contains(&result.code, "if (value.length > this.byteLength - 2)");
}

#[test]
fn accessor_emission_toggles() {
    let result = compile(
        "#pragma set(false)\nstruct S {\n   uint8_t a;\n};\n",
        &[],
    );
    assert_clean(&result);
    assert_contains(&result.code, "get a() {");
    assert!(!result.code.contains("set a(value)"));

    let result = compile("#pragma get(false)\nstruct S {\n   uint8_t a;\n};\n", &[]);
    assert_clean(&result);
    assert!(!result.code.contains("get a() {"));
    assert_contains(&result.code, "set a(value) {");
}

#[test]
fn class_shape_pragmas() {
    let result = compile(
        "#pragma extends(Base)\n#pragma export(false)\n#pragma outputByteLength(true)\n#pragma checkByteLength(true)\nstruct S {\n   uint8_t a;\n};\n",
        &[],
    );
    assert_clean(&result);
    assert_contains(&result.code, "class S extends Base {");
    assert!(!result.code.contains("export class"));
    assert_contains(&result.code, "static byteLength = 1;");
    assert_contains(&result.code, "throw new RangeError(\"S: buffer too small\");");
}

#[test]
fn imports_injections_and_implements() {
    let result = compile(
        "#pragma language(typescript)\n#pragma import({ MyInterface } from \"./MyInterface\")\n#pragma inject(const MAGIC = 42;)\n#pragma implements(MyInterface)\n#pragma injectInterface(marker!: number;)\nstruct S {\n   uint8_t a;\n};\n",
        &[],
    );
    assert_clean(&result);
    assert_contains(&result.code, "import { MyInterface } from \"./MyInterface\";");
    assert_contains(&result.code, "const MAGIC = 42;");
    assert_contains(&result.code, "class S extends DataView implements MyInterface {");
    assert_contains(&result.code, "   marker!: number;");
}

#[test]
fn comment_passthrough_modes() {
    // The provenance trailer would echo the source; disable it so the
    // assertions below only see passed-through comments.
    let source = "#pragma outputSource(false)\n/* header */\nstruct S {\n   /* inner */\n   uint8_t a;\n};\n/* tail */\nstruct T {\n   uint8_t b;\n};\n";

    let header_only = clean_compile(source);
    assert_contains(&header_only.code, "/* header */");
    assert!(!header_only.code.contains("/* inner */"));
    assert!(!header_only.code.contains("/* tail */"));

    let all = compile(&format!("#pragma comments(true)\n{}", source), &[]);
    assert_clean(&all);
    assert_contains(&all.code, "/* inner */");
    assert_contains(&all.code, "/* tail */");

    let none = compile(&format!("#pragma comments(false)\n{}", source), &[]);
    assert_clean(&none);
    assert!(!none.code.contains("/* header */"));
}

#[test]
fn output_source_trailer_is_optional() {
    let with = clean_compile("struct S {\n   uint8_t a;\n};\n");
    assert_contains(&with.code, "// struct S {");

    let without = compile("#pragma outputSource(false)\nstruct S {\n   uint8_t a;\n};\n", &[]);
    assert_clean(&without);
    assert!(!without.code.contains("// struct S {"));
}

#[test]
fn partial_output_survives_errors() {
    let result = compile(
        "struct Good {\n   uint8_t a;\n};\nstruct Bad {\n   Missing m;\n};\nstruct AlsoGood {\n   uint16_t b;\n};\n",
        &[],
    );
    assert!(!result.diagnostics.is_empty());
    assert_contains(&result.code, "class Good");
    assert_contains(&result.code, "class AlsoGood");
}

#[test]
fn error_directive_reports_its_message() {
    let result = compile("#error custom failure text\n", &[]);
    assert_contains(&result.diagnostics, "custom failure text");
}

#[test]
fn unterminated_comment_fails_the_whole_compile() {
    let result = compile("struct S {\n   uint8_t a;\n};\n/* never closed", &[]);
    assert_contains(&result.diagnostics, "unterminated block comment");
    assert!(!result.code.contains("class S"));
}

#[test]
fn compile_file_reads_source_from_disk() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(file, "struct Point {{\n   int32_t x;\n   int32_t y;\n}};\n").unwrap();
    let result = compile_file(file.path(), &[]).unwrap();
    assert!(result.diagnostics.is_empty());
    assert_contains(&result.code, "export class Point extends DataView {");

    assert!(compile_file("/nonexistent/input.cdv.h", &[]).is_err());
}

#[test]
fn overrides_apply_as_leading_pragmas() {
    let result = compile(
        "struct S {\n   uint16_t v;\n};\n",
        &[
            ("language".to_owned(), "typescript/web".to_owned()),
            ("endian".to_owned(), "big".to_owned()),
        ],
    );
    assert_clean(&result);
    assert_eq!(result.language, Language::TypeScript);
    assert_eq!(result.platform, Platform::Web);
    assert_contains(&result.code, "return this.getUint16(0, false);");

    let bad = compile("struct S {\n   uint8_t a;\n};\n", &[("endian".to_owned(), "sideways".to_owned())]);
    assert_contains(&bad.diagnostics, "invalid endian");
}
