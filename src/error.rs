use std::path::PathBuf;

use thiserror::Error;

macro_rules! malformed_error {
    // Single string version
    ($msg:expr) => {
        crate::Error::Malformed {
            message: $msg.to_string(),
            file: file!(),
            line: line!(),
        }
    };

    // Format string with arguments version
    ($fmt:expr, $($arg:tt)*) => {
        crate::Error::Malformed {
            message: format!($fmt, $($arg)*),
            file: file!(),
            line: line!(),
        }
    };
}

macro_rules! out_of_bounds_error {
    () => {
        crate::Error::OutOfBounds {
            file: file!(),
            line: line!(),
        }
    };
}

/// The generic Error type, which provides coverage for all errors this library can potentially
/// return.
///
/// # Error Categories
///
/// ## Loading
/// - [`Error::Load`] - A module could not be opened or is not a valid module image
/// - [`Error::Malformed`], [`Error::OutOfBounds`], [`Error::Empty`], [`Error::NotSupported`],
///   [`Error::GoblinErr`] - structural failures raised while parsing; surfaced as
///   [`Error::Load`] once a path is known
///
/// ## Patching
/// - [`Error::TargetNotFound`] - The anchor type or routine does not exist
/// - [`Error::MissingDependencyType`] - A type reference the bootstrap routine needs is absent
/// - [`Error::DanglingReference`] - An edit would leave a branch or handler boundary dangling
/// - [`Error::InvalidInstruction`] - An instruction or operand does not fit its opcode
///
/// ## Persistence
/// - [`Error::Collision`] - A stale output file exists and deletion was declined
/// - [`Error::Uninstall`] - The forceful uninstall path could not proceed
/// - [`Error::FileError`], [`Error::WriteFailed`] - I/O failures
///
/// # Examples
///
/// ```rust,no_run
/// use cilpatch::{Error, Module};
/// use std::path::Path;
///
/// match Module::from_path(Path::new("Assembly-CSharp.dll")) {
///     Ok(module) => println!("Loaded {}", module.name()),
///     Err(Error::Load { path, message }) => eprintln!("{}: {}", path.display(), message),
///     Err(e) => eprintln!("Other error: {}", e),
/// }
/// ```
#[derive(Error, Debug)]
pub enum Error {
    /// The module could not be loaded from disk.
    ///
    /// Raised when the file is missing, unreadable, or not a module image of the
    /// supported format. The message carries the underlying cause.
    #[error("Couldn't load {}: {message}", .path.display())]
    Load {
        /// The path that failed to load
        path: PathBuf,
        /// Description of the underlying failure
        message: String,
    },

    /// The file is damaged and could not be parsed.
    ///
    /// # Fields
    ///
    /// * `message` - Detailed description of what was malformed
    /// * `file` - Source file where the error was detected
    /// * `line` - Source line where the error was detected
    #[error("Malformed - {file}:{line}: {message}")]
    Malformed {
        /// The message to be printed for the Malformed error
        message: String,
        /// The source file in which this error occured
        file: &'static str,
        /// The source line in which this error occured
        line: u32,
    },

    /// An out of bound access was attempted while parsing the file.
    #[error("Out of Bound read would have occurred! - {file}:{line}")]
    OutOfBounds {
        /// The source file in which this error occured
        file: &'static str,
        /// The source line in which this error occured
        line: u32,
    },

    /// This file type or feature is not supported.
    #[error("This file type is not supported")]
    NotSupported,

    /// Provided input was empty.
    #[error("Provided input was empty")]
    Empty,

    /// Nesting limit reached while decoding a signature blob.
    #[error("Reached the maximum recursion level allowed - {0}")]
    RecursionLimit(usize),

    /// The anchor type, or the anchor routine on it, does not exist.
    ///
    /// Fatal for every patch operation on the module.
    #[error("Couldn't find {type_name}{}", .method.as_ref().map(|m| format!("::{m}")).unwrap_or_default())]
    TargetNotFound {
        /// Full name of the type that was searched
        type_name: String,
        /// Name of the routine, if the type itself was found
        method: Option<String>,
    },

    /// The module lacks a type reference required to build the bootstrap routine.
    #[error("Couldn't find {0}!")]
    MissingDependencyType(String),

    /// A stale output file exists and its deletion was not confirmed.
    ///
    /// No file has been modified when this error is returned.
    #[error("Cannot continue while {} exists", .0.display())]
    Collision(PathBuf),

    /// The uninstall could not be completed.
    #[error("Uninstall failed: {0}")]
    Uninstall(String),

    /// An edit or a lowered stream would reference an instruction that is not live.
    #[error("Dangling reference - {0}")]
    DanglingReference(String),

    /// An instruction carries an operand its opcode can not take.
    #[error("Invalid instruction - {0}")]
    InvalidInstruction(String),

    /// File I/O error.
    #[error("{0}")]
    FileError(#[from] std::io::Error),

    /// Failed to produce an output file.
    #[error("Failed to write output - {message}")]
    WriteFailed {
        /// Description of the failure
        message: String,
    },

    /// Generic error for miscellaneous failures.
    #[error("{0}")]
    Error(String),

    /// Error from the goblin crate while parsing the PE container.
    #[error("{0}")]
    GoblinErr(#[from] goblin::error::Error),
}

impl Error {
    /// Wraps a structural error as a [`Error::Load`] for the given path.
    ///
    /// Errors that already describe a load failure, or that are unrelated to the file content,
    /// are passed through unchanged.
    #[must_use]
    pub fn into_load_error(self, path: impl Into<PathBuf>) -> Self {
        match self {
            Error::Load { .. } => self,
            Error::FileError(io) => Error::Load {
                path: path.into(),
                message: io.to_string(),
            },
            other => Error::Load {
                path: path.into(),
                message: other.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn malformed_macro_records_location() {
        let err = malformed_error!("bad {}", 7);
        match err {
            Error::Malformed { message, file, .. } => {
                assert_eq!(message, "bad 7");
                assert!(file.ends_with("error.rs"));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn target_not_found_message() {
        let err = Error::TargetNotFound {
            type_name: "GameContext".into(),
            method: Some("Awake".into()),
        };
        assert_eq!(err.to_string(), "Couldn't find GameContext::Awake");

        let err = Error::TargetNotFound {
            type_name: "GameContext".into(),
            method: None,
        };
        assert_eq!(err.to_string(), "Couldn't find GameContext");
    }

    #[test]
    fn into_load_error_wraps_structural_errors() {
        let err = Error::Empty.into_load_error("a.dll");
        assert!(matches!(err, Error::Load { ref message, .. } if message == "Provided input was empty"));

        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err = Error::FileError(io).into_load_error("b.dll");
        assert!(matches!(err, Error::Load { ref path, .. } if path.ends_with("b.dll")));
    }
}
