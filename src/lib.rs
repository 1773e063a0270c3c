// Copyright 2025 Johann Kempter
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

#![doc(html_no_source)]
#![deny(missing_docs)]
#![allow(clippy::too_many_arguments)]

//! # cilpatch
//!
//! An in-place patch engine for managed CIL modules. `cilpatch` loads a module, finds a fixed
//! anchor routine, installs a call to a generated bootstrap routine at its head and writes the
//! result back with a backup of the original. The same engine detects an installed patch,
//! upgrades a patch written by an earlier release and removes it again.
//!
//! The bootstrap routine enumerates a plugin directory at runtime, loads every matching file
//! and then calls a caller supplied entry point, all inside an exception handler that logs the
//! failure through the host and terminates it.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use cilpatch::prelude::*;
//!
//! let entry = MethodRefSpec::new_static(
//!     AssemblyName::new("SRML2"), "SRML2.Main", "PreLoad", SigType::Void, vec![]);
//! let mut patcher = Patcher::open("Managed/Assembly-CSharp.dll", entry, PatchConfig::default())?;
//! match patcher.patch()? {
//!     PatchState::Unpatched => println!("installing"),
//!     previous => println!("updating {previous} module"),
//! }
//! patcher.save(&mut |_: &std::path::Path| true)?;
//! # Ok::<(), cilpatch::Error>(())
//! ```
//!
//! ## Architecture
//!
//! - [`file`] - memory-mapped input, owned buffers, PE headers and the memory-mapped output file
//! - [`metadata`] - metadata root, heaps, tables, signatures and method bodies (ECMA-335 II)
//! - [`assembly`] - opcodes and the editable instruction stream with its encoder and decoder
//! - [`module`] - the owned [`Module`] model: loading, lookups, imports and writing
//! - [`patch`] - anchor lookup, patch detection, the bootstrap builder and the commit logic
//! - [`Error`] and [`Result`] - error handling
//!
//! ## Image format
//!
//! Modules are managed PE images. The CLR runtime header locates the metadata root (`BSJB`)
//! with its `#~`, `#Strings`, `#US`, `#GUID` and `#Blob` streams, and method RVAs locate the
//! bodies. Tables the model does not interpret are carried through row for row.
//!
//! Writing keeps the headers and sections of the loaded image and appends one section,
//! `.cilmeta`, with the re-encoded bodies and metadata; the CLR header is repointed to it. A
//! module built from scratch is written on top of a minimal PE32 library. Output is
//! deterministic, so writing a module loaded from the writer's own output reproduces its bytes.

#[macro_use]
pub(crate) mod error;

/// Shared functionality which is used in unit tests
#[cfg(test)]
pub(crate) mod test;

/// Convenient re-exports of the most commonly used types.
///
/// # Example
///
/// ```rust,no_run
/// use cilpatch::prelude::*;
///
/// let module = Module::from_path("Assembly-CSharp.dll")?;
/// let anchor = locate_anchor(&module, &PatchConfig::default())?;
/// println!("{}", classify(&module, anchor.method));
/// # Ok::<(), cilpatch::Error>(())
/// ```
pub mod prelude;

/// Reading and writing of module images
pub mod file;

/// ECMA-335 metadata structures
///
/// The metadata root and stream directory, the four heaps, the supported tables, signature
/// blobs and method body headers, each with a reader and a writer.
pub mod metadata;

/// CIL instructions and method bodies
///
/// - [`assembly::OpCode`] - the opcode table with operand encodings and stack effects
/// - [`assembly::Instruction`] and [`assembly::Operand`] - one instruction
/// - [`assembly::InstructionStream`] - the editable stream addressed by stable handles
/// - [`assembly::encode_body`] and [`assembly::decode_body`] - conversion to and from bytes
///
/// # Examples
///
/// ```rust
/// use cilpatch::assembly::{Instruction, InstructionStream, OpCode};
///
/// let mut stream = InstructionStream::new();
/// let ret = stream.push(Instruction::simple(OpCode::Ret));
/// stream.push_front(Instruction::branch(OpCode::BrS, ret));
/// stream.validate()?;
/// # Ok::<(), cilpatch::Error>(())
/// ```
pub mod assembly;

/// The owned module model
pub mod module;

/// Installing, detecting and removing the bootstrap patch
pub mod patch;

/// `cilpatch` Result type
///
/// A type alias for [`std::result::Result<T, Error>`] where the error type is always [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// `cilpatch` Error type
///
/// # Examples
///
/// ```rust,no_run
/// use cilpatch::{Error, Module};
///
/// match Module::from_path("Assembly-CSharp.dll") {
///     Ok(module) => println!("Loaded {}", module.name()),
///     Err(Error::Load { path, message }) => println!("{}: {}", path.display(), message),
///     Err(e) => println!("Error: {}", e),
/// }
/// ```
pub use error::Error;

/// The module model, see [`module::Module`]
pub use module::Module;

/// Patch front end, see [`patch::Patcher`]
pub use patch::{PatchConfig, PatchState, Patcher};

/// Low-level input handling
pub use file::{parser::Parser, File};
