//! Method attributes and the binary layout of method bodies.

mod body;
mod exceptions;
mod types;

pub use body::{MethodBody, TINY_MAX_STACK};
pub use exceptions::{ExceptionHandler, ExceptionHandlerFlags};
pub use types::*;
