//! ECMA-335 metadata: the on-disk structures of a module image.
//!
//! This layer knows bytes, not semantics. It parses and serializes the metadata root, the heaps,
//! the `#~` tables, signature blobs and method bodies. The object model built on top of it lives
//! in [`crate::module`].
//!
//! # Key Components
//!
//! - [`cor20header`] - The CLR runtime header that locates the metadata
//! - [`root`] - The `BSJB` root and stream directory
//! - [`streams`] - String, GUID, blob and user string heaps
//! - [`tables`] - Raw table rows and coded index sizing
//! - [`signatures`] - Signature blob parsing and encoding
//! - [`method`] - Method body headers and exception sections
//! - [`token`] - Table and row references

pub mod cor20header;
pub mod method;
pub mod root;
pub mod signatures;
pub mod streams;
pub mod tables;
/// Metadata tokens: a table id and a row number
pub mod token;
