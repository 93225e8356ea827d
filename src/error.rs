//! Error types for the Eyedentify bindings.
//!
//! Every failure crossing the native boundary is turned into an [`EdfError`].
//! Native calls that return a non-zero code produce [`EdfError::Native`],
//! which carries the name of the failing entry point and the raw code
//! decoded through [`NativeCode`].

use std::fmt;
use std::os::raw::c_int;
use std::path::PathBuf;
use thiserror::Error;

use crate::ffi::bindings;

/// Represents all possible errors that can occur in the Eyedentify bindings.
#[derive(Error, Debug)]
pub enum EdfError {
    /// The shared library file was not found at the resolved path.
    #[error("Eyedentify library not found: {}", .0.display())]
    LibraryNotFound(PathBuf),

    /// The dynamic loader failed to open the library or to resolve a symbol.
    #[error("Failed to load Eyedentify library: {0}")]
    Library(#[from] libloading::Error),

    /// A required entry point is not exported by the loaded library.
    #[error("Missing symbol `{name}` in Eyedentify library")]
    MissingSymbol { name: String },

    /// A native function returned a non-zero code.
    ///
    /// This error occurs when:
    /// - Module initialization fails (missing model file, GPU unavailable)
    /// - Cropping, descriptor computation or classification is rejected
    /// - Freeing a classification result fails
    #[error("{function} failed: {code}")]
    Native {
        function: &'static str,
        code: NativeCode,
    },

    /// Parameters rejected before reaching the native library.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// A native allocator returned no memory for a non-empty request.
    #[error("{0} did not allocate the requested memory")]
    AllocationFailed(&'static str),

    /// The native module state is missing.
    #[error("Eyedentify module is not initialized")]
    Uninitialized,

    /// The loaded library build does not export an optional entry point.
    #[error("Unsupported by the loaded library: {0}")]
    Unsupported(String),

    /// Indicates a failure in file system operations.
    ///
    /// This error occurs when:
    /// - A configuration or annotation file can't be read
    /// - A raw image file can't be loaded into memory
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Indicates a failure in JSON serialization or deserialization.
    ///
    /// This error occurs when:
    /// - An [`crate::InitConfig`] file is not valid JSON
    /// - The JSON structure doesn't match the expected fields
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Indicates a failure of the Rust side image decoder.
    ///
    /// This error occurs when:
    /// - [`crate::Image::open`] is given an unsupported or corrupt file
    /// - The decoded pixel buffer doesn't match its dimensions
    #[error("Image decoding error: {0}")]
    Image(#[from] ::image::ImageError),
}

impl EdfError {
    pub(crate) fn native(function: &'static str, code: c_int) -> Self {
        EdfError::Native {
            function,
            code: NativeCode(code),
        }
    }

    /// Raw native return code, if this error came from a native call.
    pub fn code(&self) -> Option<c_int> {
        match self {
            EdfError::Native { code, .. } => Some(code.0),
            _ => None,
        }
    }
}

/// Raw return code of a native call.
///
/// The SDK documents a handful of GPU related codes; those print a readable
/// description, everything else prints as the bare number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NativeCode(pub c_int);

impl NativeCode {
    pub fn description(&self) -> Option<&'static str> {
        match self.0 {
            bindings::EDF_ERROR_GPU_MODE_NOT_SUPPORTED => {
                Some("GPU computation mode is not supported by this build")
            }
            bindings::EDF_ERROR_GPU_DEVICE_ID_FAILED => Some("failed to select GPU device"),
            bindings::EDF_ERROR_GPU_DEVICE_BUSY => Some("GPU device is busy"),
            bindings::EDF_ERROR_GPU_DEVICE_COUNT => Some("failed to query GPU device count"),
            bindings::EDF_ERROR_NO_GPU_DEVICE => Some("no GPU device found"),
            bindings::EDF_ERROR_GPU_DEVICE_ID_INVALID => Some("invalid GPU device id"),
            _ => None,
        }
    }
}

impl fmt::Display for NativeCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.description() {
            Some(text) => write!(f, "error code {} ({})", self.0, text),
            None => write!(f, "error code {}", self.0),
        }
    }
}

pub type Result<T, E = EdfError> = std::result::Result<T, E>;

/// Maps a native return code to `Ok(())` or [`EdfError::Native`].
pub(crate) fn check(function: &'static str, code: c_int) -> Result<()> {
    if code == 0 {
        Ok(())
    } else {
        Err(EdfError::native(function, code))
    }
}
