//! Configuration and result types used throughout the Eyedentify bindings.
//!
//! These are the safe counterparts of the `Edf*Config` and `EdfClassifyResult*`
//! structures in [`crate::ffi::bindings`]. Configurations convert into their
//! raw form right before a native call; results are copied out of native
//! memory into owned values before the native buffers are released.

use serde::{Deserialize, Serialize};
use std::ffi::CString;
use std::fmt;
use std::os::raw::c_int;
use std::path::{Path, PathBuf, MAIN_SEPARATOR};

use crate::error::{EdfError, Result};
use crate::ffi::bindings;

/// Hardware used by the module for computation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComputationMode {
    #[default]
    Cpu,
    Gpu,
}

impl From<ComputationMode> for bindings::ERComputationMode {
    fn from(mode: ComputationMode) -> Self {
        match mode {
            ComputationMode::Cpu => bindings::ER_COMPUTATION_MODE_CPU,
            ComputationMode::Gpu => bindings::ER_COMPUTATION_MODE_GPU,
        }
    }
}

/// Tri-state switch used by the crop configuration.
///
/// `Default` leaves the choice to the loaded module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Setting {
    #[default]
    Default,
    Enabled,
    Disabled,
}

impl From<Setting> for c_int {
    fn from(setting: Setting) -> Self {
        match setting {
            Setting::Default => bindings::EDF_CONFIG_VALUE_DEFAULT,
            Setting::Enabled => bindings::EDF_CONFIG_VALUE_ENABLED,
            Setting::Disabled => bindings::EDF_CONFIG_VALUE_DISABLED,
        }
    }
}

impl From<bool> for Setting {
    fn from(enabled: bool) -> Self {
        if enabled {
            Setting::Enabled
        } else {
            Setting::Disabled
        }
    }
}

/// Parameters for [`crate::Eyedentify::new`].
///
/// # Example
///
/// ```no_run
/// use eyedentify::{ComputationMode, InitConfig};
///
/// let config = InitConfig::new("sdk/modules/edftf2lite/", "MMR_VCMMCT_FAST_2024Q2.dat")
///     .with_computation_mode(ComputationMode::Gpu)
///     .with_gpu_device_id(1);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InitConfig {
    /// Directory of the module, the library expects a trailing separator.
    pub module_path: PathBuf,
    /// Model file name inside `module_path`.
    pub model_file: String,
    pub computation_mode: ComputationMode,
    /// Only used in [`ComputationMode::Gpu`].
    pub gpu_device_id: i32,
    /// CPU threads. `0` runs single threaded, negative values let the
    /// library pick based on the hardware concurrency.
    pub num_threads: i32,
    /// ONNX execution provider, honored by `edfonnx` modules only.
    pub onnx_provider: String,
}

impl Default for InitConfig {
    fn default() -> Self {
        Self {
            module_path: PathBuf::new(),
            model_file: String::new(),
            computation_mode: ComputationMode::Cpu,
            gpu_device_id: 0,
            num_threads: 1,
            onnx_provider: "cpu".to_string(),
        }
    }
}

impl InitConfig {
    pub fn new<P: Into<PathBuf>, S: Into<String>>(module_path: P, model_file: S) -> Self {
        Self {
            module_path: module_path.into(),
            model_file: model_file.into(),
            ..Default::default()
        }
    }

    pub fn with_computation_mode(mut self, mode: ComputationMode) -> Self {
        self.computation_mode = mode;
        self
    }

    pub fn with_gpu_device_id(mut self, id: i32) -> Self {
        self.gpu_device_id = id;
        self
    }

    pub fn with_num_threads(mut self, threads: i32) -> Self {
        self.num_threads = threads;
        self
    }

    pub fn with_onnx_provider<S: Into<String>>(mut self, provider: S) -> Self {
        self.onnx_provider = provider.into();
        self
    }

    /// Reads a configuration from a JSON file. Missing fields take their
    /// default values.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&contents)?)
    }

    pub(crate) fn to_native(&self) -> Result<NativeInitConfig> {
        let mut module_path = self
            .module_path
            .to_str()
            .ok_or_else(|| {
                EdfError::InvalidInput(format!(
                    "module path is not valid UTF-8: {}",
                    self.module_path.display()
                ))
            })?
            .to_string();
        if !module_path.is_empty() && !module_path.ends_with(['/', MAIN_SEPARATOR]) {
            module_path.push(MAIN_SEPARATOR);
        }

        Ok(NativeInitConfig {
            module_path: c_string("module_path", module_path)?,
            model_file: c_string("model_file", self.model_file.clone())?,
            onnx_provider: c_string("onnx_provider", self.onnx_provider.clone())?,
            computation_mode: self.computation_mode.into(),
            gpu_device_id: self.gpu_device_id,
            num_threads: self.num_threads,
        })
    }
}

fn c_string(field: &str, value: String) -> Result<CString> {
    CString::new(value)
        .map_err(|_| EdfError::InvalidInput(format!("{} contains an interior NUL byte", field)))
}

/// Owned C strings backing an [`bindings::EdfInitConfig`].
pub(crate) struct NativeInitConfig {
    module_path: CString,
    model_file: CString,
    onnx_provider: CString,
    computation_mode: bindings::ERComputationMode,
    gpu_device_id: c_int,
    num_threads: c_int,
}

impl NativeInitConfig {
    /// The returned struct borrows the strings of `self`.
    pub(crate) fn as_raw(&self) -> bindings::EdfInitConfig {
        bindings::EdfInitConfig {
            module_path: self.module_path.as_ptr(),
            model_file: self.model_file.as_ptr(),
            computation_mode: self.computation_mode,
            gpu_device_id: self.gpu_device_id,
            num_threads: self.num_threads,
            onnx_provider: self.onnx_provider.as_ptr(),
        }
    }
}

/// Batching for descriptor computation. A batch size of 0 or 1 disables
/// batching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ComputeDescConfig {
    pub batch_size: u32,
}

impl From<&ComputeDescConfig> for bindings::EdfComputeDescConfig {
    fn from(config: &ComputeDescConfig) -> Self {
        Self {
            batch_size: config.batch_size,
        }
    }
}

/// Which crop the module produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CropMode {
    #[default]
    Default,
    /// Full crop, slower but usable for visualization.
    Full,
    /// Crop only what the descriptor computation needs.
    Standard,
}

impl From<CropMode> for c_int {
    fn from(mode: CropMode) -> Self {
        match mode {
            CropMode::Default => bindings::EDF_CONFIG_VALUE_DEFAULT,
            CropMode::Full => bindings::EDF_CONFIG_VALUE_ENABLED,
            CropMode::Standard => bindings::EDF_CONFIG_VALUE_DISABLED,
        }
    }
}

/// Options for [`crate::Eyedentify::crop_image`].
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CropImageConfig {
    pub full_crop: CropMode,
    pub color_normalization: Setting,
    pub use_antialiasing: Setting,
    /// Gaussian kernel size, `0` selects the module default.
    pub antialiasing_kernel_size: u32,
    /// Gaussian sigma, `0.0` selects the module default.
    pub antialiasing_sigma: f32,
}

impl From<&CropImageConfig> for bindings::EdfCropImageConfig {
    fn from(config: &CropImageConfig) -> Self {
        Self {
            full_crop: config.full_crop.into(),
            color_normalization: config.color_normalization.into(),
            use_antialiasing: config.use_antialiasing.into(),
            antialiasing_kernel_size: config.antialiasing_kernel_size,
            antialiasing_sigma: config.antialiasing_sigma,
        }
    }
}

/// How the classifier applies the dependency rules between tasks
/// (for example a model must belong to the predicted make).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DependencyRules {
    #[default]
    Applied,
    /// Return both variants; the unconstrained entries carry a `_NODEP`
    /// suffix in their task name.
    Both,
    NotApplied,
}

impl From<DependencyRules> for c_int {
    fn from(rules: DependencyRules) -> Self {
        match rules {
            DependencyRules::Applied => 0,
            DependencyRules::Both => 1,
            DependencyRules::NotApplied => -1,
        }
    }
}

/// Number of scores returned per task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TopScores {
    /// Best class only.
    #[default]
    Top1,
    /// The `n` best classes, sorted by score.
    Best(u16),
    /// Every class, in model order.
    All,
}

impl From<TopScores> for c_int {
    fn from(top: TopScores) -> Self {
        match top {
            TopScores::Top1 => 0,
            TopScores::Best(n) => c_int::from(n),
            TopScores::All => -1,
        }
    }
}

/// Options for [`crate::Eyedentify::classify`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifyConfig {
    pub dependency_rules: DependencyRules,
    pub top_scores: TopScores,
}

impl From<&ClassifyConfig> for bindings::EdfClassifyConfig {
    fn from(config: &ClassifyConfig) -> Self {
        Self {
            use_dependency_rules: config.dependency_rules.into(),
            num_top_scores: config.top_scores.into(),
        }
    }
}

/// One classified value, for example `mmr_make: skoda (42)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifyResultValue {
    pub task_name: String,
    pub class_name: String,
    pub class_id: i32,
    pub score: f32,
}

impl fmt::Display for ClassifyResultValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} ({}) {:.4}",
            self.task_name, self.class_name, self.class_id, self.score
        )
    }
}

/// Owned copy of a classification result.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClassifyResult {
    pub values: Vec<ClassifyResultValue>,
}

impl ClassifyResult {
    /// First value produced for `task_name`.
    pub fn get(&self, task_name: &str) -> Option<&ClassifyResultValue> {
        self.values.iter().find(|v| v.task_name == task_name)
    }

    /// All values produced for `task_name`, in library order.
    pub fn task<'a>(
        &'a self,
        task_name: &'a str,
    ) -> impl Iterator<Item = &'a ClassifyResultValue> + 'a {
        self.values.iter().filter(move |v| v.task_name == task_name)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ClassifyResultValue> {
        self.values.iter()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl<'a> IntoIterator for &'a ClassifyResult {
    type Item = &'a ClassifyResultValue;
    type IntoIter = std::slice::Iter<'a, ClassifyResultValue>;

    fn into_iter(self) -> Self::IntoIter {
        self.values.iter()
    }
}

impl fmt::Display for ClassifyResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for value in &self.values {
            writeln!(f, "\t{}: {} ({})", value.task_name, value.class_name, value.class_id)?;
        }
        let scores: Vec<String> = self.values.iter().map(|v| v.score.to_string()).collect();
        write!(f, "Scores: [ {} ]", scores.join(", "))
    }
}
