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

//! Runtime helper snippets bundled into the generated output.
//!
//! Two helpers exist: a bounds-checked proxy over index accesses (used for
//! big/host-endian numeric array fields, which cannot be plain typed-array
//! views) and a fixed-stride wrapper for arrays of nested structs. They are
//! emitted at most once, and only when some field in the compilation
//! required them.

/// Endianness probe. Declared at module level, assigned on first
/// construction of any generated class.
pub const PROBE_DECL_JS: &str = "let isLittleEndian;";
pub const PROBE_DECL_TS: &str = "let isLittleEndian: boolean | undefined;";

pub const PROBE_ASSIGN: &str =
    "isLittleEndian = !!new Uint8Array(new Uint16Array([1]).buffer)[0];";

pub const PROXY_ARRAY_JS: &str = r#"function proxyArray(count, getAt, setAt) {
   return new Proxy({}, {
      get(target, property) {
         if ("symbol" === typeof property)
            return target[property];
         if ("length" === property)
            return count;
         const index = Number(property);
         if (!Number.isInteger(index) || (index < 0) || (index >= count))
            throw new RangeError(`index ${String(property)} out of range`);
         return getAt(index);
      },
      set(target, property, value) {
         const index = Number(property);
         if (!Number.isInteger(index) || (index < 0) || (index >= count))
            throw new RangeError(`index ${String(property)} out of range`);
         setAt(index, value);
         return true;
      }
   });
}"#;

pub const PROXY_ARRAY_TS: &str = r#"function proxyArray<T>(count: number, getAt: (index: number) => T, setAt: (index: number, value: T) => void): any {
   return new Proxy({}, {
      get(target: any, property: string | symbol) {
         if ("symbol" === typeof property)
            return target[property];
         if ("length" === property)
            return count;
         const index = Number(property);
         if (!Number.isInteger(index) || (index < 0) || (index >= count))
            throw new RangeError(`index ${String(property)} out of range`);
         return getAt(index);
      },
      set(target: any, property: string | symbol, value: T) {
         const index = Number(property as string);
         if (!Number.isInteger(index) || (index < 0) || (index >= count))
            throw new RangeError(`index ${String(property)} out of range`);
         setAt(index, value);
         return true;
      }
   });
}"#;

pub const STRUCT_ARRAY_JS: &str = r#"function structArray(view, Type, byteOffset, byteStride, count) {
   return proxyArray(count,
      (index) => new Type(view.buffer, view.byteOffset + byteOffset + index * byteStride),
      (index, value) => {
         for (let i = 0; i < byteStride; i++)
            view.setUint8(byteOffset + index * byteStride + i, value.getUint8(i));
      });
}"#;

pub const STRUCT_ARRAY_TS: &str = r#"function structArray(view: DataView, Type: any, byteOffset: number, byteStride: number, count: number): any {
   return proxyArray(count,
      (index: number) => new Type(view.buffer, view.byteOffset + byteOffset + index * byteStride),
      (index: number, value: DataView) => {
         for (let i = 0; i < byteStride; i++)
            view.setUint8(byteOffset + index * byteStride + i, value.getUint8(i));
      });
}"#;
