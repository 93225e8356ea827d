//! The Eyedentify module state and the operations running on it.
//!
//! An [`Eyedentify`] owns one initialized native module (one model loaded
//! from one module directory). The typical pipeline is:
//!
//! ```no_run
//! use std::sync::Arc;
//! use eyedentify::{CropParams, EdfApi, Eyedentify, Image, InitConfig};
//!
//! # fn main() -> Result<(), eyedentify::EdfError> {
//! let api = Arc::new(EdfApi::load_from_sdk("sdk")?);
//! let config = InitConfig::new("sdk/modules/edftf2lite/", "MMR_VCMMCT_FAST_2024Q2.dat");
//! let engine = Eyedentify::new(Arc::clone(&api), &config)?;
//!
//! let image = Image::read(&api, "car.jpg")?;
//! let params = CropParams::new().with_point(475.0, 573.0).with_value(257.7).with_value(1.0);
//! let crop = engine.crop_image(&image, &params, None)?;
//! drop(image);
//!
//! let descriptor = engine.compute_desc(&crop, None)?;
//! drop(crop);
//!
//! let result = engine.classify(&descriptor, None)?;
//! println!("{}", result);
//! # Ok(())
//! # }
//! ```

use std::os::raw::{c_char, c_uint, c_void};
use std::ptr;
use std::sync::Arc;

use tracing::{debug, info};

use crate::crop::{CropParams, NativeCropParams};
use crate::descriptor::{Descriptor, NativeDescriptor};
use crate::error::{check, EdfError, Result};
use crate::ffi::bindings::{
    self, fcn_edfInferenceCallback, EdfClassifyResult, EdfCropParams, EdfDescriptor, ERImage,
};
use crate::ffi::EdfApi;
use crate::image::{AsErImage, CroppedImage};
use crate::types::{
    ClassifyConfig, ClassifyResult, ClassifyResultValue, ComputeDescConfig, CropImageConfig,
    InitConfig,
};

/// An initialized Eyedentify module.
///
/// The native library is not thread safe: an `Eyedentify` may move between
/// threads but cannot be shared by them.
pub struct Eyedentify {
    api: Arc<EdfApi>,
    state: *mut c_void,
}

// The state is only reachable through `&self`/`&mut self` and the type is
// not `Sync`, so at most one thread uses it at a time.
unsafe impl Send for Eyedentify {}

impl Eyedentify {
    /// Initializes a module with `edfInitEyedentify`.
    ///
    /// # Errors
    ///
    /// * [`EdfError::InvalidInput`] if a configuration string contains a NUL byte
    /// * [`EdfError::Native`] with the library's return code, for example
    ///   a GPU error when [`crate::ComputationMode::Gpu`] is unavailable
    /// * [`EdfError::Uninitialized`] if the library reports success without
    ///   producing a module state
    pub fn new(api: Arc<EdfApi>, config: &InitConfig) -> Result<Self> {
        let native = config.to_native()?;
        let raw = native.as_raw();
        let mut state: *mut c_void = ptr::null_mut();

        info!(
            "Initializing Eyedentify module {} ({})",
            config.model_file,
            config.module_path.display()
        );
        check("edfInitEyedentify", unsafe {
            (api.edfInitEyedentify)(&raw, &mut state)
        })?;
        Self::from_state(api, state)
    }

    /// Initializes a module whose network inference runs in `callback`.
    ///
    /// The library calls `callback` with the prepared network input and an
    /// output buffer of `output_buffer_size` bytes to fill.
    pub fn with_external_inference(
        api: Arc<EdfApi>,
        config: &InitConfig,
        callback: fcn_edfInferenceCallback,
        output_buffer_size: u32,
    ) -> Result<Self> {
        let init = api.edfInitEyedentify_ExternalInference.ok_or_else(|| {
            EdfError::Unsupported("edfInitEyedentify_ExternalInference".to_string())
        })?;

        let native = config.to_native()?;
        let raw = native.as_raw();
        let mut state: *mut c_void = ptr::null_mut();

        info!(
            "Initializing Eyedentify module {} with external inference",
            config.model_file
        );
        check("edfInitEyedentify_ExternalInference", unsafe {
            init(&raw, callback, output_buffer_size, &mut state)
        })?;
        Self::from_state(api, state)
    }

    fn from_state(api: Arc<EdfApi>, state: *mut c_void) -> Result<Self> {
        if state.is_null() {
            return Err(EdfError::Uninitialized);
        }
        Ok(Self { api, state })
    }

    pub fn api(&self) -> &Arc<EdfApi> {
        &self.api
    }

    pub(crate) fn state_ptr(&self) -> *mut c_void {
        self.state
    }

    /// Version of the loaded model. Descriptors carry the same number.
    pub fn model_version(&self) -> Result<u32> {
        let version = unsafe { (self.api.edfModelVersion)(self.state) };
        if version == 0 {
            return Err(EdfError::native("edfModelVersion", 0));
        }
        Ok(version)
    }

    /// Crops and normalizes the object described by `params` out of `image`.
    ///
    /// `config` of `None` lets the module use its defaults.
    pub fn crop_image<I: AsErImage>(
        &self,
        image: &I,
        params: &CropParams,
        config: Option<&CropImageConfig>,
    ) -> Result<CroppedImage<'_>> {
        let mut wrapped = params.wrap(&self.api)?;
        self.crop_raw(image.as_er_image(), wrapped.as_mut_ptr(), config)
    }

    /// Same as [`Self::crop_image`] with parameters in library owned memory.
    pub fn crop_image_native<I: AsErImage>(
        &self,
        image: &I,
        params: &mut NativeCropParams<'_>,
        config: Option<&CropImageConfig>,
    ) -> Result<CroppedImage<'_>> {
        self.crop_raw(image.as_er_image(), params.as_mut_ptr(), config)
    }

    fn crop_raw(
        &self,
        image: &ERImage,
        params: *mut EdfCropParams,
        config: Option<&CropImageConfig>,
    ) -> Result<CroppedImage<'_>> {
        let mut raw_config = config.map(bindings::EdfCropImageConfig::from);
        let config_ptr = raw_config.as_mut().map_or(ptr::null_mut(), |c| c as *mut _);
        let mut cropped = ERImage::empty();

        debug!("edfCropImage: {}x{} input", image.width, image.height);
        check("edfCropImage", unsafe {
            (self.api.edfCropImage)(image, params, self.state, &mut cropped, config_ptr)
        })?;
        Ok(unsafe { CroppedImage::from_raw(self, cropped) })
    }

    /// Computes the descriptor of a single crop.
    ///
    /// The native descriptor is copied out and released before returning.
    pub fn compute_desc<I: AsErImage>(
        &self,
        crop: &I,
        config: Option<&ComputeDescConfig>,
    ) -> Result<Descriptor> {
        if let Some(config) = config {
            if config.batch_size > 1 {
                return Err(EdfError::InvalidInput(format!(
                    "batch size {} given for a single image, use compute_desc_batch",
                    config.batch_size
                )));
            }
        }
        let mut raw_config = config.map(bindings::EdfComputeDescConfig::from);
        let config_ptr = raw_config.as_mut().map_or(ptr::null_mut(), |c| c as *mut _);
        let mut raw = EdfDescriptor::default();

        debug!("edfComputeDesc");
        check("edfComputeDesc", unsafe {
            (self.api.edfComputeDesc)(crop.as_er_image(), self.state, &mut raw, config_ptr)
        })?;
        let native = unsafe { NativeDescriptor::from_raw(&self.api, raw) };
        Ok(native.to_descriptor())
    }

    /// Computes descriptors of several crops in one native call.
    pub fn compute_desc_batch<I: AsErImage>(&self, crops: &[&I]) -> Result<Vec<Descriptor>> {
        if crops.is_empty() {
            return Err(EdfError::InvalidInput("empty descriptor batch".to_string()));
        }
        let batch_size = c_uint::try_from(crops.len()).map_err(|_| {
            EdfError::InvalidInput(format!("batch of {} images is too large", crops.len()))
        })?;

        let images: Vec<ERImage> = crops.iter().map(|crop| *crop.as_er_image()).collect();
        let mut raw = vec![EdfDescriptor::default(); crops.len()];
        let mut config = bindings::EdfComputeDescConfig { batch_size };

        debug!("edfComputeDesc: batch of {}", batch_size);
        let code = unsafe {
            (self.api.edfComputeDesc)(images.as_ptr(), self.state, raw.as_mut_ptr(), &mut config)
        };
        if code != 0 {
            // Release the entries filled before the failure.
            for desc in raw.into_iter().filter(|desc| !desc.data.is_null()) {
                drop(unsafe { NativeDescriptor::from_raw(&self.api, desc) });
            }
            return Err(EdfError::native("edfComputeDesc", code));
        }

        let natives: Vec<NativeDescriptor<'_>> = raw
            .into_iter()
            .map(|desc| unsafe { NativeDescriptor::from_raw(&self.api, desc) })
            .collect();
        Ok(natives.iter().map(NativeDescriptor::to_descriptor).collect())
    }

    /// Similarity score of two descriptors computed by the same model.
    pub fn compare_descs(&self, a: &Descriptor, b: &Descriptor) -> Result<f32> {
        let native_a = NativeDescriptor::from_descriptor(&self.api, a)?;
        let native_b = NativeDescriptor::from_descriptor(&self.api, b)?;
        let mut score = 0.0f32;

        check("edfCompareDescs", unsafe {
            (self.api.edfCompareDescs)(native_a.as_ptr(), native_b.as_ptr(), self.state, &mut score)
        })?;
        debug!("edfCompareDescs: {}", score);
        Ok(score)
    }

    /// Classifies a descriptor.
    ///
    /// Every entry is copied into the returned [`ClassifyResult`] before
    /// `edfFreeClassifyResult` releases the native result.
    pub fn classify(
        &self,
        descriptor: &Descriptor,
        config: Option<&ClassifyConfig>,
    ) -> Result<ClassifyResult> {
        let native = NativeDescriptor::from_descriptor(&self.api, descriptor)?;
        let mut raw_config = config.map(bindings::EdfClassifyConfig::from);
        let config_ptr = raw_config.as_mut().map_or(ptr::null_mut(), |c| c as *mut _);
        let mut result: *mut EdfClassifyResult = ptr::null_mut();

        check("edfClassify", unsafe {
            (self.api.edfClassify)(native.as_ptr(), self.state, &mut result, config_ptr)
        })?;
        if result.is_null() {
            return Ok(ClassifyResult::default());
        }

        let values = unsafe { copy_classify_result(&*result) };
        debug!("edfClassify: {} values", values.len());

        check("edfFreeClassifyResult", unsafe {
            (self.api.edfFreeClassifyResult)(&mut result, self.state)
        })?;
        Ok(ClassifyResult { values })
    }
}

unsafe fn copy_classify_result(result: &EdfClassifyResult) -> Vec<ClassifyResultValue> {
    if result.values.is_null() {
        return Vec::new();
    }
    std::slice::from_raw_parts(result.values, result.num_values as usize)
        .iter()
        .map(|value| ClassifyResultValue {
            task_name: copy_string(value.task_name, value.task_name_length),
            class_name: copy_string(value.class_name, value.class_name_length),
            class_id: value.class_id,
            score: value.score,
        })
        .collect()
}

/// Copies `length` bytes; the native strings are not required to be
/// NUL terminated.
unsafe fn copy_string(data: *const c_char, length: c_uint) -> String {
    if data.is_null() || length == 0 {
        return String::new();
    }
    let bytes = std::slice::from_raw_parts(data.cast::<u8>(), length as usize);
    String::from_utf8_lossy(bytes).into_owned()
}

impl Drop for Eyedentify {
    fn drop(&mut self) {
        debug!("edfFreeEyedentify");
        unsafe { (self.api.edfFreeEyedentify)(&mut self.state) };
    }
}

impl std::fmt::Debug for Eyedentify {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Eyedentify")
            .field("state", &self.state)
            .finish()
    }
}
