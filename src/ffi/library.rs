//! Loading the Eyedentify shared library and resolving its entry points.

use std::path::{Path, PathBuf};

use libloading::Library;
use tracing::{debug, info};

use super::bindings::*;
use crate::error::{EdfError, Result};

/// Platform specific file name of the Eyedentify library.
///
/// Linux builds are named after the machine architecture
/// (`libeyedentify-x86_64.so`), Windows builds after the pointer width
/// (`eyedentify-x64.dll`, `eyedentify-Win32.dll`).
pub fn library_file_name() -> Result<String> {
    if cfg!(target_os = "linux") {
        Ok(format!("libeyedentify-{}.so", std::env::consts::ARCH))
    } else if cfg!(target_os = "windows") {
        if cfg!(target_pointer_width = "64") {
            Ok("eyedentify-x64.dll".to_string())
        } else {
            Ok("eyedentify-Win32.dll".to_string())
        }
    } else {
        Err(EdfError::Unsupported(format!(
            "platform {} has no Eyedentify build",
            std::env::consts::OS
        )))
    }
}

/// Path of the library inside an SDK directory: `<sdk>/lib/<file name>`.
pub fn library_path<P: AsRef<Path>>(sdk_dir: P) -> Result<PathBuf> {
    Ok(sdk_dir.as_ref().join("lib").join(library_file_name()?))
}

/// Table of resolved Eyedentify entry points.
///
/// The table owns the [`Library`] it was resolved from, so the function
/// pointers stay valid for as long as the table is alive. Share it through
/// an `Arc` between module states and images.
#[allow(non_snake_case)]
pub struct EdfApi {
    pub edfInitEyedentify: fcn_edfInitEyedentify,
    pub edfInitEyedentify_ExternalInference: Option<fcn_edfInitEyedentify_ExternalInference>,
    pub edfFreeEyedentify: fcn_edfFreeEyedentify,
    pub edfComputeDesc: fcn_edfComputeDesc,
    pub edfCompareDescs: fcn_edfCompareDescs,
    pub edfAllocDesc: fcn_edfAllocDesc,
    pub edfFreeDesc: fcn_edfFreeDesc,
    pub edfCropParamsAllocate: fcn_edfCropParamsAllocate,
    pub edfCropParamsWrap: fcn_edfCropParamsWrap,
    pub edfCropParamsFree: fcn_edfCropParamsFree,
    pub edfCropImage: fcn_edfCropImage,
    pub edfFreeCropImage: fcn_edfFreeCropImage,
    pub edfModelVersion: fcn_edfModelVersion,
    pub edfClassify: fcn_edfClassify,
    pub edfFreeClassifyResult: fcn_edfFreeClassifyResult,
    pub erImageAllocateAndWrap: fcn_erImageAllocateAndWrap,
    pub erImageRead: fcn_erImageRead,
    pub erImageWrite: fcn_erImageWrite,
    pub erImageFree: fcn_erImageFree,
    // Dropped last: the library, then the libraries it depends on.
    pub(crate) library: Option<Library>,
    pub(crate) support_libraries: Vec<Library>,
}

impl std::fmt::Debug for EdfApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EdfApi")
            .field("loaded", &self.library.is_some())
            .field(
                "external_inference",
                &self.edfInitEyedentify_ExternalInference.is_some(),
            )
            .field("support_libraries", &self.support_libraries.len())
            .finish()
    }
}

unsafe fn required<T: Copy>(library: &Library, name: &'static str) -> Result<T> {
    match library.get::<T>(name.as_bytes()) {
        Ok(symbol) => Ok(*symbol),
        Err(e) => {
            debug!("Failed to resolve {}: {}", name, e);
            Err(EdfError::MissingSymbol {
                name: name.to_string(),
            })
        }
    }
}

unsafe fn optional<T: Copy>(library: &Library, name: &'static str) -> Option<T> {
    match library.get::<T>(name.as_bytes()) {
        Ok(symbol) => Some(*symbol),
        Err(e) => {
            debug!("Optional symbol {} not available: {}", name, e);
            None
        }
    }
}

impl EdfApi {
    /// Loads the library at `path` and resolves every entry point.
    ///
    /// # Errors
    ///
    /// * [`EdfError::LibraryNotFound`] if `path` does not exist
    /// * [`EdfError::Library`] if the dynamic loader rejects the file
    /// * [`EdfError::MissingSymbol`] if a required entry point is absent
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::load_with_support_libraries(path, &[] as &[PathBuf])
    }

    /// Loads the library from an SDK directory, see [`library_path`].
    pub fn load_from_sdk<P: AsRef<Path>>(sdk_dir: P) -> Result<Self> {
        Self::load(library_path(sdk_dir)?)
    }

    /// Loads the library after opening dependency libraries that the
    /// dynamic loader would not find on its own (such as a BLAS build
    /// shipped next to the SDK). The dependencies stay loaded as long as
    /// the returned table.
    pub fn load_with_support_libraries<P, S>(path: P, support: &[S]) -> Result<Self>
    where
        P: AsRef<Path>,
        S: AsRef<Path>,
    {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(EdfError::LibraryNotFound(path.to_path_buf()));
        }

        let mut support_libraries = Vec::with_capacity(support.len());
        for lib in support {
            debug!("Loading support library {}", lib.as_ref().display());
            support_libraries.push(unsafe { Library::new(lib.as_ref()) }?);
        }

        info!("Loading Eyedentify library from {}", path.display());
        let library = unsafe { Library::new(path) }?;
        let mut api = unsafe { Self::from_library(library) }?;
        api.support_libraries = support_libraries;
        Ok(api)
    }

    /// Resolves the entry points from an already opened library.
    ///
    /// # Safety
    ///
    /// `library` must be an Eyedentify build whose exports match the
    /// signatures in [`super::bindings`].
    pub unsafe fn from_library(library: Library) -> Result<Self> {
        let api = Self {
            edfInitEyedentify: required(&library, "edfInitEyedentify")?,
            edfInitEyedentify_ExternalInference: optional(
                &library,
                "edfInitEyedentify_ExternalInference",
            ),
            edfFreeEyedentify: required(&library, "edfFreeEyedentify")?,
            edfComputeDesc: required(&library, "edfComputeDesc")?,
            edfCompareDescs: required(&library, "edfCompareDescs")?,
            edfAllocDesc: required(&library, "edfAllocDesc")?,
            edfFreeDesc: required(&library, "edfFreeDesc")?,
            edfCropParamsAllocate: required(&library, "edfCropParamsAllocate")?,
            edfCropParamsWrap: required(&library, "edfCropParamsWrap")?,
            edfCropParamsFree: required(&library, "edfCropParamsFree")?,
            edfCropImage: required(&library, "edfCropImage")?,
            edfFreeCropImage: required(&library, "edfFreeCropImage")?,
            edfModelVersion: required(&library, "edfModelVersion")?,
            edfClassify: required(&library, "edfClassify")?,
            edfFreeClassifyResult: required(&library, "edfFreeClassifyResult")?,
            erImageAllocateAndWrap: required(&library, "erImageAllocateAndWrap")?,
            erImageRead: required(&library, "erImageRead")?,
            erImageWrite: required(&library, "erImageWrite")?,
            erImageFree: required(&library, "erImageFree")?,
            library: Some(library),
            support_libraries: Vec::new(),
        };
        debug!("Resolved Eyedentify entry points: {:?}", api);
        Ok(api)
    }

    /// Whether the library exports `edfInitEyedentify_ExternalInference`.
    pub fn supports_external_inference(&self) -> bool {
        self.edfInitEyedentify_ExternalInference.is_some()
    }
}
