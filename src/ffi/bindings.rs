//! Raw C layout of the Eyedentify SDK.
//!
//! Every type here is `#[repr(C)]` and matches the SDK headers field for
//! field. Nothing in this module owns memory: ownership is tracked by the
//! RAII wrappers in the rest of the crate.

#![allow(non_camel_case_types)]
#![allow(non_snake_case)]

use std::os::raw::{c_char, c_int, c_uchar, c_uint, c_void};

/// Memory alignment used by the SDK allocators.
pub const EDF_MEMORY_ALIGNMENT: usize = 32;

pub const EDF_CONFIG_VALUE_ENABLED: c_int = 1;
pub const EDF_CONFIG_VALUE_DISABLED: c_int = -1;
pub const EDF_CONFIG_VALUE_DEFAULT: c_int = 0;

pub const EDF_ERROR_GPU_MODE_NOT_SUPPORTED: c_int = -67856865;
pub const EDF_ERROR_GPU_DEVICE_ID_FAILED: c_int = -67856866;
pub const EDF_ERROR_GPU_DEVICE_BUSY: c_int = -67856867;
pub const EDF_ERROR_GPU_DEVICE_COUNT: c_int = -67856868;
pub const EDF_ERROR_NO_GPU_DEVICE: c_int = -67856869;
pub const EDF_ERROR_GPU_DEVICE_ID_INVALID: c_int = -67856870;

/// License plate crop: one point (plate center), two values (scale, rotation).
pub const EDF_MMR_CROP_POINTS: c_int = 1;
pub const EDF_MMR_CROP_VALUES: c_int = 2;
/// Car box crop: two points (top-left, bottom-right), no values.
pub const EDF_MMRBOX_CROP_POINTS: c_int = 2;
pub const EDF_MMRBOX_CROP_VALUES: c_int = 0;

pub type ERComputationMode = c_int;
pub const ER_COMPUTATION_MODE_CPU: ERComputationMode = 0;
pub const ER_COMPUTATION_MODE_GPU: ERComputationMode = 1;

pub type ERImageColorModel = c_int;
pub const ER_IMAGE_COLORMODEL_UNK: ERImageColorModel = 0;
pub const ER_IMAGE_COLORMODEL_GRAY: ERImageColorModel = 1;
pub const ER_IMAGE_COLORMODEL_BGR: ERImageColorModel = 2;
pub const ER_IMAGE_COLORMODEL_YCBCR420: ERImageColorModel = 3;
pub const ER_IMAGE_COLORMODEL_BGRA: ERImageColorModel = 4;

pub type ERImageDataType = c_int;
pub const ER_IMAGE_DATATYPE_UNK: ERImageDataType = 0;
pub const ER_IMAGE_DATATYPE_UCHAR: ERImageDataType = 1;
pub const ER_IMAGE_DATATYPE_FLOAT: ERImageDataType = 2;

/// Image container shared by all SDK calls.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct ERImage {
    pub color_model: ERImageColorModel,
    pub data_type: ERImageDataType,
    /// Number of bytes in `data`. Zero means "no image".
    pub size: c_uint,
    pub width: c_uint,
    pub height: c_uint,
    /// Bytes per row.
    pub step: c_uint,
    /// Bytes per pixel.
    pub depth: c_uint,
    pub row_data: *mut *mut c_uchar,
    pub data: *mut c_uchar,
    /// Non-zero when `data` is owned by the SDK.
    pub data_allocated: c_uchar,
}

impl ERImage {
    pub const fn empty() -> Self {
        Self {
            color_model: ER_IMAGE_COLORMODEL_UNK,
            data_type: ER_IMAGE_DATATYPE_UNK,
            size: 0,
            width: 0,
            height: 0,
            step: 0,
            depth: 0,
            row_data: std::ptr::null_mut(),
            data: std::ptr::null_mut(),
            data_allocated: 0,
        }
    }
}

impl Default for ERImage {
    fn default() -> Self {
        Self::empty()
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct EdfDescriptor {
    /// Version of the model that produced the descriptor.
    pub version: c_uint,
    /// Number of bytes in `data`.
    pub size: c_uint,
    pub data: *mut c_uchar,
}

impl Default for EdfDescriptor {
    fn default() -> Self {
        Self {
            version: 0,
            size: 0,
            data: std::ptr::null_mut(),
        }
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct EdfPoints {
    pub length: c_int,
    pub rows: *mut f64,
    pub cols: *mut f64,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct EdfValues {
    pub length: c_int,
    pub values: *mut f64,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct EdfCropParams {
    pub points: EdfPoints,
    pub values: EdfValues,
}

impl Default for EdfCropParams {
    fn default() -> Self {
        Self {
            points: EdfPoints {
                length: 0,
                rows: std::ptr::null_mut(),
                cols: std::ptr::null_mut(),
            },
            values: EdfValues {
                length: 0,
                values: std::ptr::null_mut(),
            },
        }
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct EdfClassifyResultValue {
    pub task_name: *mut c_char,
    pub task_name_length: c_uint,
    pub class_name: *mut c_char,
    pub class_name_length: c_uint,
    pub class_id: c_int,
    pub score: f32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct EdfClassifyResult {
    pub num_values: c_uint,
    pub values: *mut EdfClassifyResultValue,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct EdfInitConfig {
    pub module_path: *const c_char,
    pub model_file: *const c_char,
    pub computation_mode: ERComputationMode,
    /// Only used with `ER_COMPUTATION_MODE_GPU`.
    pub gpu_device_id: c_int,
    pub num_threads: c_int,
    pub onnx_provider: *const c_char,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct EdfComputeDescConfig {
    pub batch_size: c_uint,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct EdfCropImageConfig {
    pub full_crop: c_int,
    pub color_normalization: c_int,
    pub use_antialiasing: c_int,
    pub antialiasing_kernel_size: c_uint,
    pub antialiasing_sigma: f32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct EdfClassifyConfig {
    pub use_dependency_rules: c_int,
    pub num_top_scores: c_int,
}

pub type fcn_edfInferenceCallback =
    unsafe extern "C" fn(input: *const ERImage, output: *mut c_uchar) -> c_int;

pub type fcn_edfInitEyedentify =
    unsafe extern "C" fn(config: *const EdfInitConfig, module_state: *mut *mut c_void) -> c_int;
pub type fcn_edfInitEyedentify_ExternalInference = unsafe extern "C" fn(
    config: *const EdfInitConfig,
    inference_callback: fcn_edfInferenceCallback,
    output_buffer_size: c_uint,
    module_state: *mut *mut c_void,
) -> c_int;
pub type fcn_edfFreeEyedentify = unsafe extern "C" fn(module_state: *mut *mut c_void);
pub type fcn_edfComputeDesc = unsafe extern "C" fn(
    image: *const ERImage,
    module_state: *const c_void,
    descriptor: *mut EdfDescriptor,
    config: *mut EdfComputeDescConfig,
) -> c_int;
pub type fcn_edfCompareDescs = unsafe extern "C" fn(
    desc_a: *const EdfDescriptor,
    desc_b: *const EdfDescriptor,
    module_state: *const c_void,
    score: *mut f32,
) -> c_int;
pub type fcn_edfAllocDesc =
    unsafe extern "C" fn(desc: *mut EdfDescriptor, size: c_uint, version: c_uint);
pub type fcn_edfFreeDesc = unsafe extern "C" fn(desc: *mut EdfDescriptor);
pub type fcn_edfCropParamsAllocate =
    unsafe extern "C" fn(num_points: c_int, num_values: c_int, params: *mut EdfCropParams);
pub type fcn_edfCropParamsWrap = unsafe extern "C" fn(
    num_points: c_int,
    rows: *mut f64,
    cols: *mut f64,
    num_values: c_int,
    values: *mut f64,
    params: *mut EdfCropParams,
);
pub type fcn_edfCropParamsFree = unsafe extern "C" fn(params: *mut EdfCropParams);
pub type fcn_edfCropImage = unsafe extern "C" fn(
    image_in: *const ERImage,
    params: *mut EdfCropParams,
    module_state: *mut c_void,
    cropped_image: *mut ERImage,
    config: *mut EdfCropImageConfig,
) -> c_int;
pub type fcn_edfFreeCropImage =
    unsafe extern "C" fn(module_state: *mut c_void, cropped_image: *mut ERImage) -> c_int;
pub type fcn_edfModelVersion = unsafe extern "C" fn(module_state: *const c_void) -> c_uint;
pub type fcn_edfClassify = unsafe extern "C" fn(
    desc: *const EdfDescriptor,
    module_state: *mut c_void,
    classify_result: *mut *mut EdfClassifyResult,
    config: *mut EdfClassifyConfig,
) -> c_int;
pub type fcn_edfFreeClassifyResult = unsafe extern "C" fn(
    classify_result: *mut *mut EdfClassifyResult,
    module_state: *mut c_void,
) -> c_int;

pub type fcn_erImageAllocateAndWrap = unsafe extern "C" fn(
    image: *mut ERImage,
    width: c_uint,
    height: c_uint,
    color_model: ERImageColorModel,
    data_type: ERImageDataType,
    data: *mut c_uchar,
    step: c_uint,
) -> c_int;
pub type fcn_erImageRead = unsafe extern "C" fn(image: *mut ERImage, filename: *const c_char) -> c_int;
pub type fcn_erImageWrite =
    unsafe extern "C" fn(image: *const ERImage, filename: *const c_char) -> c_int;
pub type fcn_erImageFree = unsafe extern "C" fn(image: *mut ERImage);
