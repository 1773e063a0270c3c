//! # cilpatch Prelude
//!
//! The most commonly used types of the library, for glob imports.

// ================================================================================================
// Core Types and Error Handling
// ================================================================================================

/// The main error type for all cilpatch operations
pub use crate::Error;

/// The result type used throughout cilpatch
pub use crate::Result;

/// Low-level file parsing utilities
pub use crate::{File, Parser};

// ================================================================================================
// Module Model
// ================================================================================================

pub use crate::module::{
    AssemblyName, FieldId, MethodDef, MethodId, MethodRef, MethodRefSpec, Module, ModuleBuilder,
    SigType, TypeDef, TypeId, TypeName,
};

/// Metadata tokens
pub use crate::metadata::token::Token;

// ================================================================================================
// Instructions
// ================================================================================================

pub use crate::assembly::{
    Body, ExceptionRegion, InstrId, Instruction, InstructionStream, OpCode, Operand, RegionKind,
};

// ================================================================================================
// Patching
// ================================================================================================

pub use crate::patch::{
    classify, locate_anchor, strip_patch, Anchor, BootstrapBuilder, Confirm, LoadFailurePolicy,
    PatchConfig, PatchPaths, PatchState, Patcher, UninstallPath, CURRENT_MARKER, LEGACY_MARKER,
};
