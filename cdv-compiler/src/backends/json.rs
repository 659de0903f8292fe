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

//! Debug backend: dump the computed type layouts as JSON.

use crate::ast::{TypeInfo, TypeRegistry};
use serde::Serialize;

#[derive(Serialize)]
struct Entry<'a> {
    name: &'a str,
    #[serde(flatten)]
    info: &'a TypeInfo,
}

/// Turn the registry into a JSON representation, in declaration order.
pub fn generate(registry: &TypeRegistry) -> Result<String, String> {
    let entries: Vec<Entry> =
        registry.iter().map(|(name, info)| Entry { name: name.as_str(), info }).collect();
    serde_json::to_string_pretty(&entries)
        .map_err(|err| format!("could not JSON serialize layouts: {err}"))
}
