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

//! `#pragma` settings.
//!
//! One compilation owns one [`PragmaState`]; it is reset at the start of
//! every `compile()` call and mutated only through `apply`, either from
//! `#pragma name(value)` lines or from caller-provided overrides.

use serde::Serialize;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PragmaError {
    #[error("unknown pragma `{0}`")]
    Unknown(String),
    #[error("invalid {name} `{value}` specified")]
    InvalidValue { name: String, value: String },
}

fn invalid(name: &str, value: &str) -> PragmaError {
    PragmaError::InvalidValue { name: name.to_owned(), value: value.to_owned() }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    JavaScript,
    TypeScript,
}

impl fmt::Display for Language {
    /// The output file extension for the dialect.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Language::JavaScript => write!(f, "js"),
            Language::TypeScript => write!(f, "ts"),
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Xs,
    Node,
    Web,
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Platform::Xs => write!(f, "xs"),
            Platform::Node => write!(f, "node"),
            Platform::Web => write!(f, "web"),
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Endian {
    Little,
    Big,
    Host,
}

impl FromStr for Endian {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input {
            "little" => Ok(Endian::Little),
            "big" => Ok(Endian::Big),
            "host" => Ok(Endian::Host),
            _ => Err(input.to_owned()),
        }
    }
}

/// What the compiler may assume about the device the generated code runs
/// on, for `endian(host)`. `Unknown` defers detection to the generated
/// constructor.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum HostEndian {
    Little,
    Big,
    Unknown,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum BitOrder {
    Lsb,
    Msb,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CommentMode {
    /// Only block comments ahead of the first declaration pass through.
    Header,
    All,
    None,
}

fn boolean_setting(name: &str, value: &str) -> Result<bool, PragmaError> {
    match value {
        "true" => Ok(true),
        "false" => Ok(false),
        _ => Err(invalid(name, value)),
    }
}

#[derive(Debug, Clone)]
pub struct PragmaState {
    pub extends: String,
    pub endian: Endian,
    pub host_endian: HostEndian,
    pub pack: usize,
    pub language: Language,
    pub platform: Platform,
    pub emit_get: bool,
    pub emit_set: bool,
    pub export: bool,
    pub output_byte_length: bool,
    pub check_byte_length: bool,
    pub json: bool,
    pub bit_order: BitOrder,
    pub comments: CommentMode,
    pub implements: Option<String>,
    pub imports: Vec<String>,
    pub injects: Vec<String>,
    pub inject_interface: Vec<String>,
    pub output_source: bool,
    pub strict_from: bool,
    pub pad_prefix: String,
}

impl Default for PragmaState {
    fn default() -> PragmaState {
        PragmaState {
            extends: "DataView".to_owned(),
            endian: Endian::Little,
            host_endian: HostEndian::Unknown,
            pack: 1,
            language: Language::JavaScript,
            platform: Platform::Xs,
            emit_get: true,
            emit_set: true,
            export: true,
            output_byte_length: false,
            check_byte_length: false,
            json: false,
            bit_order: BitOrder::Lsb,
            comments: CommentMode::Header,
            implements: None,
            imports: Vec::new(),
            injects: Vec::new(),
            inject_interface: Vec::new(),
            output_source: true,
            strict_from: false,
            pad_prefix: "__pad".to_owned(),
        }
    }
}

impl PragmaState {
    /// Apply one `setting(value)` pair. The caller is responsible for
    /// ordering constraints (`hostEndian` ahead of declarations).
    pub fn apply(&mut self, setting: &str, value: &str) -> Result<(), PragmaError> {
        match setting {
            "extends" => self.extends = value.to_owned(),
            "endian" => {
                self.endian = value.parse().map_err(|_| invalid(setting, value))?;
            }
            "hostEndian" => {
                self.host_endian = match value {
                    "little" => HostEndian::Little,
                    "big" => HostEndian::Big,
                    "unknown" => HostEndian::Unknown,
                    _ => return Err(invalid(setting, value)),
                };
            }
            "pack" => {
                self.pack = match value {
                    "1" => 1,
                    "2" => 2,
                    "4" => 4,
                    "8" => 8,
                    "16" => 16,
                    _ => return Err(invalid(setting, value)),
                };
            }
            "language" => {
                let (language, platform) = value.split_once('/').unwrap_or((value, ""));
                self.language = match language {
                    "javascript" => Language::JavaScript,
                    "typescript" => Language::TypeScript,
                    _ => return Err(invalid(setting, value)),
                };
                self.platform = match platform {
                    "" | "xs" => Platform::Xs,
                    "node" => Platform::Node,
                    "web" => Platform::Web,
                    _ => return Err(invalid(setting, value)),
                };
            }
            "get" => self.emit_get = boolean_setting(setting, value)?,
            "set" => self.emit_set = boolean_setting(setting, value)?,
            "export" => self.export = boolean_setting(setting, value)?,
            "outputByteLength" => self.output_byte_length = boolean_setting(setting, value)?,
            "checkByteLength" => self.check_byte_length = boolean_setting(setting, value)?,
            "json" => self.json = boolean_setting(setting, value)?,
            "bitfields" => {
                self.bit_order = match value {
                    "lsb" => BitOrder::Lsb,
                    "msb" => BitOrder::Msb,
                    _ => return Err(invalid(setting, value)),
                };
            }
            "comments" => {
                self.comments = match value {
                    "header" => CommentMode::Header,
                    "true" => CommentMode::All,
                    "false" => CommentMode::None,
                    _ => return Err(invalid(setting, value)),
                };
            }
            "implements" => {
                self.implements = if value == "none" { None } else { Some(value.to_owned()) };
            }
            "import" => self.imports.push(value.to_owned()),
            "inject" => self.injects.push(value.to_owned()),
            "injectInterface" => self.inject_interface.push(value.to_owned()),
            "outputSource" => self.output_source = boolean_setting(setting, value)?,
            "strictFrom" => self.strict_from = boolean_setting(setting, value)?,
            "padPrefix" => self.pad_prefix = value.to_owned(),
            _ => return Err(PragmaError::Unknown(setting.to_owned())),
        }
        Ok(())
    }
}
