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

//! Conditional-compilation state for `#if` / `#else` / `#endif`.
//!
//! A stack of frames toggles token visibility. An `#if` inside an inactive
//! region pushes an inactive frame without evaluating its condition, so
//! dead branches never raise undefined-symbol errors.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CondError {
    #[error("`#else` without matching `#if`")]
    ElseWithoutIf,
    #[error("duplicate `#else` branch")]
    DuplicateElse,
    #[error("`#endif` without matching `#if`")]
    EndifWithoutIf,
}

#[derive(Debug)]
struct Frame {
    active: bool,
    /// Whether any branch of this conditional has been active yet; `#else`
    /// only activates when none was.
    taken: bool,
    else_seen: bool,
    parent_active: bool,
}

/// Conditional stack, initialized with one always-active root frame.
#[derive(Debug)]
pub struct CondStack {
    frames: Vec<Frame>,
}

impl Default for CondStack {
    fn default() -> CondStack {
        CondStack {
            frames: vec![Frame { active: true, taken: true, else_seen: false, parent_active: true }],
        }
    }
}

impl CondStack {
    pub fn is_active(&self) -> bool {
        self.frames.last().map(|f| f.active).unwrap_or(true)
    }

    /// Whether the condition of an incoming `#if` should be evaluated at
    /// all. Inside an inactive region the answer is no; the caller then
    /// pushes with `condition = false`.
    pub fn wants_condition(&self) -> bool {
        self.is_active()
    }

    pub fn push(&mut self, condition: bool) {
        let parent_active = self.is_active();
        let active = parent_active && condition;
        self.frames.push(Frame { active, taken: active, else_seen: false, parent_active });
    }

    pub fn flip_else(&mut self) -> Result<(), CondError> {
        if self.frames.len() < 2 {
            return Err(CondError::ElseWithoutIf);
        }
        let frame = self.frames.last_mut().expect("frame present");
        if frame.else_seen {
            return Err(CondError::DuplicateElse);
        }
        frame.else_seen = true;
        frame.active = frame.parent_active && !frame.taken;
        frame.taken |= frame.active;
        Ok(())
    }

    pub fn pop(&mut self) -> Result<(), CondError> {
        if self.frames.len() < 2 {
            return Err(CondError::EndifWithoutIf);
        }
        self.frames.pop();
        Ok(())
    }

    /// Number of conditionals left open at end of input.
    pub fn unclosed(&self) -> usize {
        self.frames.len() - 1
    }
}
