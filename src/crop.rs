//! Crop parameters: the point and value sets that tell a module where the
//! object is in the input image.
//!
//! The layout of the sets depends on the module. For the MMR modules see
//! [`crate::mmr`].

use serde::{Deserialize, Serialize};
use std::os::raw::c_int;
use tracing::debug;

use crate::error::{EdfError, Result};
use crate::ffi::bindings::EdfCropParams;
use crate::ffi::EdfApi;

/// Image position, `col` is the x coordinate and `row` the y coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub col: f64,
    pub row: f64,
}

impl Point {
    pub fn new(col: f64, row: f64) -> Self {
        Self { col, row }
    }
}

/// Crop parameters held in Rust memory.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CropParams {
    pub points: Vec<Point>,
    pub values: Vec<f64>,
}

impl CropParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_point(mut self, col: f64, row: f64) -> Self {
        self.points.push(Point::new(col, row));
        self
    }

    pub fn with_value(mut self, value: f64) -> Self {
        self.values.push(value);
        self
    }

    /// Builds parameters from split coordinate arrays. When `cols` and
    /// `rows` differ in length the extra coordinates are ignored.
    pub fn from_columns(cols: &[f64], rows: &[f64], values: &[f64]) -> Self {
        Self {
            points: cols
                .iter()
                .zip(rows)
                .map(|(&col, &row)| Point::new(col, row))
                .collect(),
            values: values.to_vec(),
        }
    }

    /// Lends the parameters to the library through `edfCropParamsWrap`.
    ///
    /// The arrays stay owned by the returned value and must never reach
    /// `edfCropParamsFree`.
    pub(crate) fn wrap(&self, api: &EdfApi) -> Result<WrappedCropParams> {
        let num_points = count("points", self.points.len())?;
        let num_values = count("values", self.values.len())?;

        let mut wrapped = WrappedCropParams {
            rows: self.points.iter().map(|p| p.row).collect(),
            cols: self.points.iter().map(|p| p.col).collect(),
            values: self.values.clone(),
            raw: EdfCropParams::default(),
        };
        unsafe {
            (api.edfCropParamsWrap)(
                num_points,
                wrapped.rows.as_mut_ptr(),
                wrapped.cols.as_mut_ptr(),
                num_values,
                wrapped.values.as_mut_ptr(),
                &mut wrapped.raw,
            )
        };
        Ok(wrapped)
    }
}

fn count(what: &str, len: usize) -> Result<c_int> {
    c_int::try_from(len)
        .map_err(|_| EdfError::InvalidInput(format!("too many crop {}: {}", what, len)))
}

/// Crop parameters pointing into Rust owned arrays.
pub(crate) struct WrappedCropParams {
    rows: Vec<f64>,
    cols: Vec<f64>,
    values: Vec<f64>,
    raw: EdfCropParams,
}

impl WrappedCropParams {
    pub(crate) fn as_mut_ptr(&mut self) -> *mut EdfCropParams {
        &mut self.raw
    }
}

/// Crop parameters allocated by `edfCropParamsAllocate`.
///
/// Released with `edfCropParamsFree` on drop.
pub struct NativeCropParams<'a> {
    api: &'a EdfApi,
    raw: EdfCropParams,
}

impl<'a> NativeCropParams<'a> {
    pub fn alloc(api: &'a EdfApi, num_points: usize, num_values: usize) -> Result<Self> {
        let num_points = count("points", num_points)?;
        let num_values = count("values", num_values)?;

        let mut raw = EdfCropParams::default();
        unsafe { (api.edfCropParamsAllocate)(num_points, num_values, &mut raw) };
        let params = Self { api, raw };

        let missing_points = num_points > 0
            && (params.raw.points.rows.is_null() || params.raw.points.cols.is_null());
        let missing_values = num_values > 0 && params.raw.values.values.is_null();
        if missing_points || missing_values {
            return Err(EdfError::AllocationFailed("edfCropParamsAllocate"));
        }
        Ok(params)
    }

    /// Copies `params` into library owned storage.
    pub fn from_params(api: &'a EdfApi, params: &CropParams) -> Result<Self> {
        let mut native = Self::alloc(api, params.points.len(), params.values.len())?;
        for (index, point) in params.points.iter().enumerate() {
            native.set_point(index, *point)?;
        }
        for (index, value) in params.values.iter().enumerate() {
            native.set_value(index, *value)?;
        }
        Ok(native)
    }

    pub fn num_points(&self) -> usize {
        self.raw.points.length.max(0) as usize
    }

    pub fn num_values(&self) -> usize {
        self.raw.values.length.max(0) as usize
    }

    pub fn set_point(&mut self, index: usize, point: Point) -> Result<()> {
        if index >= self.num_points() {
            return Err(EdfError::InvalidInput(format!(
                "point index {} out of range ({} points)",
                index,
                self.num_points()
            )));
        }
        unsafe {
            *self.raw.points.cols.add(index) = point.col;
            *self.raw.points.rows.add(index) = point.row;
        }
        Ok(())
    }

    pub fn set_value(&mut self, index: usize, value: f64) -> Result<()> {
        if index >= self.num_values() {
            return Err(EdfError::InvalidInput(format!(
                "value index {} out of range ({} values)",
                index,
                self.num_values()
            )));
        }
        unsafe { *self.raw.values.values.add(index) = value };
        Ok(())
    }

    pub fn point(&self, index: usize) -> Option<Point> {
        (index < self.num_points()).then(|| unsafe {
            Point::new(
                *self.raw.points.cols.add(index),
                *self.raw.points.rows.add(index),
            )
        })
    }

    pub fn values(&self) -> &[f64] {
        if self.raw.values.values.is_null() {
            return &[];
        }
        unsafe { std::slice::from_raw_parts(self.raw.values.values, self.num_values()) }
    }

    /// Copies the parameters back into Rust memory.
    pub fn to_params(&self) -> CropParams {
        CropParams {
            points: (0..self.num_points()).filter_map(|i| self.point(i)).collect(),
            values: self.values().to_vec(),
        }
    }

    pub(crate) fn as_mut_ptr(&mut self) -> *mut EdfCropParams {
        &mut self.raw
    }
}

impl Drop for NativeCropParams<'_> {
    fn drop(&mut self) {
        debug!(
            "edfCropParamsFree: {} points, {} values",
            self.raw.points.length, self.raw.values.length
        );
        unsafe { (self.api.edfCropParamsFree)(&mut self.raw) };
    }
}
