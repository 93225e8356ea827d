//! # Eyedentify
//!
//! Safe Rust bindings for the Eyedentify SDK, a closed-source recognition
//! library distributed as a shared object.
//!
//! The library is loaded at runtime into an [`EdfApi`] table. An
//! [`Eyedentify`] module state then runs the recognition pipeline:
//!
//! 1. read or wrap an input [`Image`]
//! 2. crop the object with [`Eyedentify::crop_image`] and [`CropParams`]
//! 3. compute a [`Descriptor`] from the crop
//! 4. classify the descriptor or compare it with another one
//!
//! Every buffer the library allocates is owned by a Rust value that returns
//! it to the matching native free function when dropped. Results are copied
//! into owned Rust values first, so nothing returned by this crate points
//! into native memory.
//!
//! The [`mmr`] module carries the conventions of the vehicle make and model
//! recognition modules.

pub mod crop;
pub mod descriptor;
pub mod engine;
pub mod error;
pub mod ffi;
pub mod image;
pub mod mmr;
pub mod types;

pub use crop::{CropParams, NativeCropParams, Point};
pub use descriptor::{Descriptor, NativeDescriptor};
pub use engine::Eyedentify;
pub use error::{EdfError, NativeCode, Result};
pub use ffi::{library_file_name, library_path, EdfApi};
pub use image::{AsErImage, ColorModel, CroppedImage, DataType, Image};
pub use types::{
    ClassifyConfig, ClassifyResult, ClassifyResultValue, ComputationMode, ComputeDescConfig,
    CropImageConfig, CropMode, DependencyRules, InitConfig, Setting, TopScores,
};

#[cfg(test)]
pub(crate) mod tests;
