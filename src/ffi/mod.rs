//! Native interface of the Eyedentify SDK.
//!
//! - [`bindings`]: `#[repr(C)]` structures, constants and function pointer types
//! - [`library`]: runtime loading of the shared library into an [`EdfApi`] table

pub mod bindings;
pub mod library;

pub use library::{library_file_name, library_path, EdfApi};
