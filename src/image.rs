//! Images passed to and returned from the library.
//!
//! - [`Image`]: an input image, decoded by the library (`erImageRead`) or
//!   wrapping pixels owned by Rust (`erImageAllocateAndWrap`)
//! - [`CroppedImage`]: the normalized crop produced by
//!   [`crate::Eyedentify::crop_image`]
//!
//! Both implement [`AsErImage`], which gives read access to the underlying
//! [`ERImage`] and conversions into the `image` crate types.

use std::ffi::CString;
use std::path::Path;
use std::ptr;
use std::sync::Arc;

use ::image::{DynamicImage, GrayImage, RgbImage, RgbaImage};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::engine::Eyedentify;
use crate::error::{check, EdfError, Result};
use crate::ffi::bindings::{self, ERImage};
use crate::ffi::EdfApi;

/// Pixel layout of an [`ERImage`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColorModel {
    Unknown,
    Gray,
    Bgr,
    /// Planar YCbCr 4:2:0: a full resolution luma plane followed by the
    /// subsampled chroma planes.
    YCbCr420,
    Bgra,
}

impl ColorModel {
    /// Bytes per pixel of the first plane.
    pub fn channels(&self) -> u32 {
        match self {
            ColorModel::Gray | ColorModel::YCbCr420 => 1,
            ColorModel::Bgr => 3,
            ColorModel::Bgra => 4,
            ColorModel::Unknown => 0,
        }
    }

    /// Buffer size needed for `height` rows of `step` bytes.
    pub fn buffer_size(&self, step: u32, height: u32) -> usize {
        let plane = step as usize * height as usize;
        match self {
            ColorModel::YCbCr420 => plane * 3 / 2,
            _ => plane,
        }
    }
}

impl From<bindings::ERImageColorModel> for ColorModel {
    fn from(value: bindings::ERImageColorModel) -> Self {
        match value {
            bindings::ER_IMAGE_COLORMODEL_GRAY => ColorModel::Gray,
            bindings::ER_IMAGE_COLORMODEL_BGR => ColorModel::Bgr,
            bindings::ER_IMAGE_COLORMODEL_YCBCR420 => ColorModel::YCbCr420,
            bindings::ER_IMAGE_COLORMODEL_BGRA => ColorModel::Bgra,
            _ => ColorModel::Unknown,
        }
    }
}

impl From<ColorModel> for bindings::ERImageColorModel {
    fn from(model: ColorModel) -> Self {
        match model {
            ColorModel::Unknown => bindings::ER_IMAGE_COLORMODEL_UNK,
            ColorModel::Gray => bindings::ER_IMAGE_COLORMODEL_GRAY,
            ColorModel::Bgr => bindings::ER_IMAGE_COLORMODEL_BGR,
            ColorModel::YCbCr420 => bindings::ER_IMAGE_COLORMODEL_YCBCR420,
            ColorModel::Bgra => bindings::ER_IMAGE_COLORMODEL_BGRA,
        }
    }
}

/// Element type of an [`ERImage`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    Unknown,
    UChar,
    Float,
}

impl From<bindings::ERImageDataType> for DataType {
    fn from(value: bindings::ERImageDataType) -> Self {
        match value {
            bindings::ER_IMAGE_DATATYPE_UCHAR => DataType::UChar,
            bindings::ER_IMAGE_DATATYPE_FLOAT => DataType::Float,
            _ => DataType::Unknown,
        }
    }
}

/// Read access to a native image.
pub trait AsErImage {
    fn as_er_image(&self) -> &ERImage;

    fn width(&self) -> u32 {
        self.as_er_image().width
    }

    fn height(&self) -> u32 {
        self.as_er_image().height
    }

    /// Bytes per row.
    fn step(&self) -> u32 {
        self.as_er_image().step
    }

    fn color_model(&self) -> ColorModel {
        self.as_er_image().color_model.into()
    }

    fn data_type(&self) -> DataType {
        self.as_er_image().data_type.into()
    }

    /// Raw image bytes, including row padding.
    fn as_bytes(&self) -> &[u8] {
        let raw = self.as_er_image();
        if raw.data.is_null() {
            return &[];
        }
        unsafe { std::slice::from_raw_parts(raw.data, raw.size as usize) }
    }

    fn to_vec(&self) -> Vec<u8> {
        self.as_bytes().to_vec()
    }

    /// Copies the image into an `image` crate buffer, dropping row padding
    /// and reordering BGR(A) into RGB(A).
    fn to_dynamic_image(&self) -> Result<DynamicImage> {
        if self.data_type() != DataType::UChar {
            return Err(EdfError::InvalidInput(format!(
                "cannot convert {:?} image data",
                self.data_type()
            )));
        }

        let (width, height) = (self.width(), self.height());
        let model = self.color_model();
        let channels = model.channels() as usize;
        let row_len = width as usize * channels;
        let step = self.step() as usize;
        let bytes = self.as_bytes();
        if height > 0 && (step < row_len || bytes.len() < step * (height as usize - 1) + row_len) {
            return Err(EdfError::InvalidInput(
                "image buffer is smaller than its dimensions".to_string(),
            ));
        }

        let mut packed = Vec::with_capacity(row_len * height as usize);
        for y in 0..height as usize {
            packed.extend_from_slice(&bytes[y * step..y * step + row_len]);
        }

        let image = match model {
            ColorModel::Gray => GrayImage::from_raw(width, height, packed).map(DynamicImage::ImageLuma8),
            ColorModel::Bgr => {
                packed.chunks_exact_mut(3).for_each(|px| px.swap(0, 2));
                RgbImage::from_raw(width, height, packed).map(DynamicImage::ImageRgb8)
            }
            ColorModel::Bgra => {
                packed.chunks_exact_mut(4).for_each(|px| px.swap(0, 2));
                RgbaImage::from_raw(width, height, packed).map(DynamicImage::ImageRgba8)
            }
            ColorModel::YCbCr420 => {
                // Luma plane only.
                GrayImage::from_raw(width, height, packed).map(DynamicImage::ImageLuma8)
            }
            ColorModel::Unknown => None,
        };
        image.ok_or_else(|| EdfError::InvalidInput(format!("cannot convert {:?} image", model)))
    }
}

/// Input image handed to the library.
///
/// Images decoded by the library own their pixels; wrapped images keep the
/// Rust buffer alive next to the native header. Either way `erImageFree`
/// runs on drop, and it never frees a wrapped Rust buffer.
pub struct Image {
    api: Arc<EdfApi>,
    raw: ERImage,
    buffer: Option<Vec<u8>>,
}

impl Image {
    /// Decodes an image file with the library's own reader.
    pub fn read<P: AsRef<Path>>(api: &Arc<EdfApi>, path: P) -> Result<Self> {
        let path = path.as_ref();
        let filename = path
            .to_str()
            .and_then(|s| CString::new(s).ok())
            .ok_or_else(|| {
                EdfError::InvalidInput(format!("unusable image path: {}", path.display()))
            })?;

        let mut raw = ERImage::empty();
        debug!("erImageRead: {}", path.display());
        check("erImageRead", unsafe { (api.erImageRead)(&mut raw, filename.as_ptr()) })?;

        let image = Self {
            api: Arc::clone(api),
            raw,
            buffer: None,
        };
        if image.raw.size == 0 {
            return Err(EdfError::InvalidInput(format!(
                "no image data read from {}",
                path.display()
            )));
        }
        Ok(image)
    }

    /// Wraps 8-bit pixels owned by Rust.
    ///
    /// `data` must hold at least [`ColorModel::buffer_size`] bytes and
    /// `step` must cover a full row.
    pub fn from_raw(
        api: &Arc<EdfApi>,
        width: u32,
        height: u32,
        color_model: ColorModel,
        mut data: Vec<u8>,
        step: u32,
    ) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(EdfError::InvalidInput(format!(
                "invalid image dimensions {}x{}",
                width, height
            )));
        }
        if color_model == ColorModel::Unknown {
            return Err(EdfError::InvalidInput("unknown color model".to_string()));
        }
        let min_step = u64::from(width) * u64::from(color_model.channels());
        if u64::from(step) < min_step {
            return Err(EdfError::InvalidInput(format!(
                "step {} is shorter than a row of {} bytes",
                step, min_step
            )));
        }
        let required = color_model.buffer_size(step, height);
        if data.len() < required {
            return Err(EdfError::InvalidInput(format!(
                "image buffer has {} bytes, {} required",
                data.len(),
                required
            )));
        }

        let mut raw = ERImage::empty();
        debug!(
            "erImageAllocateAndWrap: {}x{} {:?} step {}",
            width, height, color_model, step
        );
        let code = unsafe {
            (api.erImageAllocateAndWrap)(
                &mut raw,
                width,
                height,
                color_model.into(),
                bindings::ER_IMAGE_DATATYPE_UCHAR,
                data.as_mut_ptr(),
                step,
            )
        };
        if code != 0 {
            // The header may already hold library memory such as the row table.
            raw.data = ptr::null_mut();
            unsafe { (api.erImageFree)(&mut raw) };
            return Err(EdfError::native("erImageAllocateAndWrap", code));
        }

        Ok(Self {
            api: Arc::clone(api),
            raw,
            buffer: Some(data),
        })
    }

    /// Wraps a decoded `image` crate image. Luma images stay gray, everything
    /// else is converted to BGR.
    pub fn from_dynamic_image(api: &Arc<EdfApi>, image: &DynamicImage) -> Result<Self> {
        let (width, height) = (image.width(), image.height());
        match image {
            DynamicImage::ImageLuma8(gray) => {
                Self::from_raw(api, width, height, ColorModel::Gray, gray.as_raw().clone(), width)
            }
            other => {
                let mut data = other.to_rgb8().into_raw();
                data.chunks_exact_mut(3).for_each(|px| px.swap(0, 2));
                Self::from_raw(api, width, height, ColorModel::Bgr, data, width * 3)
            }
        }
    }

    /// Decodes `path` with the `image` crate and wraps the result.
    pub fn open<P: AsRef<Path>>(api: &Arc<EdfApi>, path: P) -> Result<Self> {
        let decoded = ::image::open(path)?;
        Self::from_dynamic_image(api, &decoded)
    }

    /// Encodes the image to `path` with the library's writer.
    pub fn write<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        write_image(&self.api, &self.raw, path.as_ref())
    }

    /// Whether the pixels live in a Rust buffer.
    pub fn is_wrapped(&self) -> bool {
        self.buffer.is_some()
    }
}

impl AsErImage for Image {
    fn as_er_image(&self) -> &ERImage {
        &self.raw
    }
}

impl Drop for Image {
    fn drop(&mut self) {
        debug!(
            "erImageFree: {}x{} (wrapped: {})",
            self.raw.width,
            self.raw.height,
            self.buffer.is_some()
        );
        // erImageFree must only see pixels the library allocated.
        if self.buffer.is_some() {
            self.raw.data = ptr::null_mut();
        }
        unsafe { (self.api.erImageFree)(&mut self.raw) };
    }
}

impl std::fmt::Debug for Image {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Image")
            .field("width", &self.raw.width)
            .field("height", &self.raw.height)
            .field("color_model", &self.color_model())
            .field("wrapped", &self.buffer.is_some())
            .finish()
    }
}

fn write_image(api: &EdfApi, raw: &ERImage, path: &Path) -> Result<()> {
    let filename = path
        .to_str()
        .and_then(|s| CString::new(s).ok())
        .ok_or_else(|| EdfError::InvalidInput(format!("unusable image path: {}", path.display())))?;
    debug!("erImageWrite: {}", path.display());
    check("erImageWrite", unsafe { (api.erImageWrite)(raw, filename.as_ptr()) })
}

/// Crop produced by [`Eyedentify::crop_image`].
///
/// Freed through `edfFreeCropImage` with the module state that created it,
/// so it cannot outlive its [`Eyedentify`].
pub struct CroppedImage<'e> {
    engine: &'e Eyedentify,
    raw: ERImage,
}

impl<'e> CroppedImage<'e> {
    /// # Safety
    ///
    /// `raw` must have been filled by `edfCropImage` with `engine`'s state.
    pub(crate) unsafe fn from_raw(engine: &'e Eyedentify, raw: ERImage) -> Self {
        Self { engine, raw }
    }

    pub fn write<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        write_image(self.engine.api(), &self.raw, path.as_ref())
    }
}

impl std::fmt::Debug for CroppedImage<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CroppedImage")
            .field("width", &self.raw.width)
            .field("height", &self.raw.height)
            .field("color_model", &self.color_model())
            .finish()
    }
}

impl AsErImage for CroppedImage<'_> {
    fn as_er_image(&self) -> &ERImage {
        &self.raw
    }
}

impl Drop for CroppedImage<'_> {
    fn drop(&mut self) {
        debug!("edfFreeCropImage: {}x{}", self.raw.width, self.raw.height);
        let code = unsafe {
            (self.engine.api().edfFreeCropImage)(self.engine.state_ptr(), &mut self.raw)
        };
        if code != 0 {
            warn!("edfFreeCropImage returned {}", code);
        }
    }
}
