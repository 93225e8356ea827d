//! Descriptors: the feature vectors computed from a cropped image.
//!
//! [`Descriptor`] is an owned copy living in Rust memory. [`NativeDescriptor`]
//! wraps a buffer obtained from the library allocator and hands it back to
//! `edfFreeDesc` when dropped.

use serde::{Deserialize, Serialize};
use std::os::raw::c_uint;
use tracing::debug;

use crate::error::{EdfError, Result};
use crate::ffi::bindings::EdfDescriptor;
use crate::ffi::EdfApi;

/// Descriptor data copied out of the library.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Descriptor {
    /// Version of the model that computed the descriptor. Descriptors of
    /// different versions cannot be compared.
    pub version: u32,
    pub data: Vec<u8>,
}

impl Descriptor {
    pub fn new(version: u32, data: Vec<u8>) -> Self {
        Self { version, data }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }
}

/// Descriptor buffer owned by the native allocator.
pub struct NativeDescriptor<'a> {
    api: &'a EdfApi,
    raw: EdfDescriptor,
}

impl<'a> NativeDescriptor<'a> {
    /// Allocates `size` bytes through `edfAllocDesc`.
    pub fn alloc(api: &'a EdfApi, size: usize, version: u32) -> Result<Self> {
        let size = c_uint::try_from(size).map_err(|_| {
            EdfError::InvalidInput(format!("descriptor of {} bytes is too large", size))
        })?;

        let mut raw = EdfDescriptor::default();
        unsafe { (api.edfAllocDesc)(&mut raw, size, version) };
        let descriptor = Self { api, raw };
        if size > 0 && descriptor.raw.data.is_null() {
            return Err(EdfError::AllocationFailed("edfAllocDesc"));
        }
        Ok(descriptor)
    }

    /// Allocates a native buffer and copies `descriptor` into it.
    pub fn from_descriptor(api: &'a EdfApi, descriptor: &Descriptor) -> Result<Self> {
        let mut native = Self::alloc(api, descriptor.len(), descriptor.version)?;
        native.as_bytes_mut().copy_from_slice(&descriptor.data);
        Ok(native)
    }

    /// Takes ownership of a descriptor filled by the library.
    ///
    /// # Safety
    ///
    /// `raw.data` must come from the library allocator (`edfAllocDesc` or
    /// `edfComputeDesc`) and must not be freed elsewhere.
    pub(crate) unsafe fn from_raw(api: &'a EdfApi, raw: EdfDescriptor) -> Self {
        Self { api, raw }
    }

    pub fn version(&self) -> u32 {
        self.raw.version
    }

    pub fn len(&self) -> usize {
        self.raw.size as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_bytes(&self) -> &[u8] {
        if self.raw.data.is_null() {
            return &[];
        }
        unsafe { std::slice::from_raw_parts(self.raw.data, self.len()) }
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        if self.raw.data.is_null() {
            return &mut [];
        }
        unsafe { std::slice::from_raw_parts_mut(self.raw.data, self.len()) }
    }

    /// Copies the native buffer into an owned [`Descriptor`].
    pub fn to_descriptor(&self) -> Descriptor {
        Descriptor {
            version: self.version(),
            data: self.as_bytes().to_vec(),
        }
    }

    pub(crate) fn as_ptr(&self) -> *const EdfDescriptor {
        &self.raw
    }
}

impl Drop for NativeDescriptor<'_> {
    fn drop(&mut self) {
        debug!("edfFreeDesc: {} bytes", self.raw.size);
        unsafe { (self.api.edfFreeDesc)(&mut self.raw) };
    }
}
