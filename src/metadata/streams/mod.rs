//! Metadata heaps and stream headers.
//!
//! Each heap has a borrowed reader used while loading and an owning builder used by the
//! writer. Builders deduplicate their entries, and the order entries are added in fixes the
//! layout, so writing the same model twice produces the same bytes.

mod blob;
mod guid;
mod streamheader;
mod strings;
mod userstrings;

pub use blob::{Blob, BlobBuilder};
pub use guid::{Guid, GuidBuilder};
pub use streamheader::{StreamHeader, STREAM_NAMES};
pub use strings::{Strings, StringsBuilder};
pub use userstrings::{UserStrings, UserStringsBuilder};
