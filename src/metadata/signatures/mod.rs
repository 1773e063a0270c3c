//! Signature blobs (ECMA-335 II.23.2).
//!
//! Signatures are stored in the `#Blob` heap and describe method prototypes, field types, local
//! variable slots and generic instantiations. This module decodes them into [`TypeSignature`]
//! trees and encodes them back. Class and value type references stay as the raw `TypeDefOrRef`
//! tokens found in the blob, since those rows are never renumbered.
//!
//! # Example
//!
//! ```rust
//! use cilpatch::metadata::signatures::{encode_method_signature, parse_method_signature};
//!
//! let blob = [0x20, 0x01, 0x01, 0x0E];
//! let sig = parse_method_signature(&blob)?;
//! assert!(sig.has_this);
//! assert_eq!(encode_method_signature(&sig)?, blob);
//! # Ok::<(), cilpatch::Error>(())
//! ```

mod encoder;
mod parser;
mod types;

pub use encoder::*;
pub use parser::*;
pub use types::*;

use crate::Result;

/// Parse a method signature blob
///
/// # Errors
/// Returns an error if the signature data is malformed
pub fn parse_method_signature(data: &[u8]) -> Result<SignatureMethod> {
    let mut parser = SignatureParser::new(data);
    parser.parse_method_signature()
}

/// Parse a field signature blob
///
/// # Errors
/// Returns an error if the signature data is malformed
pub fn parse_field_signature(data: &[u8]) -> Result<SignatureField> {
    let mut parser = SignatureParser::new(data);
    parser.parse_field_signature()
}

/// Parse a local variable signature blob
///
/// # Errors
/// Returns an error if the signature data is malformed
pub fn parse_local_var_signature(data: &[u8]) -> Result<SignatureLocalVariables> {
    let mut parser = SignatureParser::new(data);
    parser.parse_local_var_signature()
}

/// Parse a method instantiation blob
///
/// # Errors
/// Returns an error if the signature data is malformed
pub fn parse_method_spec_signature(data: &[u8]) -> Result<SignatureMethodSpec> {
    let mut parser = SignatureParser::new(data);
    parser.parse_method_spec_signature()
}

/// Parse a type specification blob
///
/// # Errors
/// Returns an error if the signature data is malformed
pub fn parse_type_spec_signature(data: &[u8]) -> Result<TypeSignature> {
    let mut parser = SignatureParser::new(data);
    parser.parse_type_spec_signature()
}
