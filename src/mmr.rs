//! Helpers for the MMR (vehicle make and model recognition) modules.
//!
//! MMR models crop the vehicle either around its license plate or from a
//! detected car box; each model file is trained for one of the two. The
//! helpers here name the model files and build crop parameters in the layout
//! those models expect.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::crop::{CropParams, NativeCropParams, Point};
use crate::error::{EdfError, Result};
use crate::ffi::bindings;
use crate::ffi::EdfApi;

/// Module shipped with the MMR models.
pub const DEFAULT_MODULE: &str = "edftf2lite";

/// Release tag of the bundled models.
pub const MODEL_RELEASE: &str = "2024Q2";

/// Set of attributes a model classifies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MmrTask {
    /// Category, make, model, generation and variation.
    Vcmmgvct,
    /// Category, make and model.
    #[default]
    Vcmmct,
    /// Category and make.
    Vcmct,
    /// Category only.
    Vcct,
}

impl MmrTask {
    pub fn code(&self) -> &'static str {
        match self {
            MmrTask::Vcmmgvct => "VCMMGVCT",
            MmrTask::Vcmmct => "VCMMCT",
            MmrTask::Vcmct => "VCMCT",
            MmrTask::Vcct => "VCCT",
        }
    }
}

impl fmt::Display for MmrTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for MmrTask {
    type Err = EdfError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "VCMMGVCT" => Ok(MmrTask::Vcmmgvct),
            "VCMMCT" => Ok(MmrTask::Vcmmct),
            "VCMCT" => Ok(MmrTask::Vcmct),
            "VCCT" => Ok(MmrTask::Vcct),
            _ => Err(EdfError::InvalidInput(format!("unknown MMR task: {}", s))),
        }
    }
}

/// How the vehicle is located in the input image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MmrType {
    /// Aligned on the license plate.
    #[default]
    Lp,
    /// Aligned on the vehicle bounding box.
    Carbox,
}

/// Speed/accuracy trade-off of a model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelVariant {
    #[default]
    Fast,
    /// Larger models, meant for servers with a GPU.
    Precise,
}

/// Model file name, for example `MMR_VCMMCT_FAST_2024Q2.dat` or
/// `MMRBOX_VCCT_PREC_2024Q2.dat`.
pub fn model_file(task: MmrTask, kind: MmrType, variant: ModelVariant) -> String {
    let prefix = match kind {
        MmrType::Lp => "MMR",
        MmrType::Carbox => "MMRBOX",
    };
    let speed = match variant {
        ModelVariant::Fast => "FAST",
        ModelVariant::Precise => "PREC",
    };
    format!("{}_{}_{}_{}.dat", prefix, task.code(), speed, MODEL_RELEASE)
}

/// Module directory inside an SDK: `<sdk>/modules/<module>/`.
pub fn module_path<P: AsRef<Path>>(sdk_dir: P, module: &str) -> PathBuf {
    // Empty component keeps the trailing separator the library expects.
    sdk_dir.as_ref().join("modules").join(module).join("")
}

/// License plate position in the input image.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct LicensePlatePosition {
    /// Column of the plate center in pixels, from the left edge.
    pub center_x: f64,
    /// Row of the plate center in pixels, from the top edge.
    pub center_y: f64,
    /// Plate width in pixels divided by its real width in meters. A Czech
    /// plate 134 px wide (0.52 m) gives 257.7.
    pub resolution_ppm: f64,
    /// Counter clockwise rotation in degrees.
    pub rotation_deg: f64,
}

impl LicensePlatePosition {
    pub fn new(center_x: f64, center_y: f64, resolution_ppm: f64, rotation_deg: f64) -> Self {
        Self {
            center_x,
            center_y,
            resolution_ppm,
            rotation_deg,
        }
    }

    /// One point (plate center), then the values scale and rotation.
    pub fn crop_params(&self) -> CropParams {
        CropParams::new()
            .with_point(self.center_x, self.center_y)
            .with_value(self.resolution_ppm)
            .with_value(self.rotation_deg)
    }

    /// Same layout as [`Self::crop_params`] in library owned memory.
    pub fn native_crop_params<'a>(&self, api: &'a EdfApi) -> Result<NativeCropParams<'a>> {
        let mut params = NativeCropParams::alloc(
            api,
            bindings::EDF_MMR_CROP_POINTS as usize,
            bindings::EDF_MMR_CROP_VALUES as usize,
        )?;
        params.set_point(0, Point::new(self.center_x, self.center_y))?;
        params.set_value(0, self.resolution_ppm)?;
        params.set_value(1, self.rotation_deg)?;
        Ok(params)
    }
}

/// Vehicle bounding box in the input image.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct CarBoxPosition {
    pub top_left_x: f64,
    pub top_left_y: f64,
    pub bottom_right_x: f64,
    pub bottom_right_y: f64,
}

impl CarBoxPosition {
    pub fn new(top_left_x: f64, top_left_y: f64, bottom_right_x: f64, bottom_right_y: f64) -> Self {
        Self {
            top_left_x,
            top_left_y,
            bottom_right_x,
            bottom_right_y,
        }
    }

    /// Two points: top-left then bottom-right corner. No values.
    pub fn crop_params(&self) -> CropParams {
        CropParams::new()
            .with_point(self.top_left_x, self.top_left_y)
            .with_point(self.bottom_right_x, self.bottom_right_y)
    }

    pub fn native_crop_params<'a>(&self, api: &'a EdfApi) -> Result<NativeCropParams<'a>> {
        let mut params = NativeCropParams::alloc(
            api,
            bindings::EDF_MMRBOX_CROP_POINTS as usize,
            bindings::EDF_MMRBOX_CROP_VALUES as usize,
        )?;
        params.set_point(0, Point::new(self.top_left_x, self.top_left_y))?;
        params.set_point(1, Point::new(self.bottom_right_x, self.bottom_right_y))?;
        Ok(params)
    }
}

/// Annotated input image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MmrInput {
    pub image: PathBuf,
    /// Dimensions of a headerless YCbCr 4:2:0 file. `None` for encoded
    /// images (JPEG, PNG, ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_ycbcr420: Option<(u32, u32)>,
    pub lp: LicensePlatePosition,
    pub carbox: CarBoxPosition,
}

impl MmrInput {
    pub fn crop_params(&self, kind: MmrType) -> CropParams {
        match kind {
            MmrType::Lp => self.lp.crop_params(),
            MmrType::Carbox => self.carbox.crop_params(),
        }
    }

    pub fn native_crop_params<'a>(
        &self,
        api: &'a EdfApi,
        kind: MmrType,
    ) -> Result<NativeCropParams<'a>> {
        match kind {
            MmrType::Lp => self.lp.native_crop_params(api),
            MmrType::Carbox => self.carbox.native_crop_params(api),
        }
    }
}

/// The annotated sample images distributed in `<data_dir>/images-mmr/`.
pub fn sample_inputs<P: AsRef<Path>>(data_dir: P) -> Vec<MmrInput> {
    let dir = data_dir.as_ref().join("images-mmr");
    let sample = |name: &str, raw, lp: [f64; 4], carbox: [f64; 4]| MmrInput {
        image: dir.join(name),
        raw_ycbcr420: raw,
        lp: LicensePlatePosition::new(lp[0], lp[1], lp[2], lp[3]),
        carbox: CarBoxPosition::new(carbox[0], carbox[1], carbox[2], carbox[3]),
    };

    vec![
        sample("car_cz.jpg", None, [475.0, 573.0, 257.7, 1.0], [282.0, 142.0, 754.0, 640.0]),
        sample(
            "car_cz2.raw",
            Some((1400, 1050)),
            [714.0, 775.0, 265.7, 1.0],
            [478.0, 218.0, 943.0, 850.0],
        ),
        sample("car_cz3.png", None, [390.0, 668.0, 259.6, -8.0], [167.0, 131.0, 746.0, 758.0]),
        sample("car_cz4.jpg", None, [728.0, 835.0, 384.6, 0.0], [399.0, 119.0, 1057.0, 917.0]),
        sample("car_it.jpg", None, [515.0, 810.0, 344.4, 1.0], [223.0, 47.0, 1161.0, 931.0]),
        sample(
            "car_cz_rear.jpg",
            None,
            [616.0, 488.0, 286.5, 1.0],
            [245.0, 141.0, 868.0, 630.0],
        ),
        sample(
            "car_cz2_rear.jpg",
            None,
            [286.0, 520.0, 160.7, 0.0],
            [196.0, 221.0, 370.0, 627.0],
        ),
    ]
}
