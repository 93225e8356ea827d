//! In-process stand-in for the Eyedentify library and pipeline tests.
//!
//! [`fake`] implements every entry point as a Rust `extern "C"` function and
//! installs them in an [`EdfApi`] table. It keeps a per-thread ledger of the
//! memory it hands out, so tests can check that each buffer returns to the
//! free function matching its allocator exactly once.

pub(crate) mod fake {
    use std::cell::RefCell;
    use std::collections::HashMap;
    use std::ffi::CStr;
    use std::os::raw::{c_char, c_int, c_uchar, c_uint, c_void};
    use std::sync::Arc;

    use crate::ffi::bindings::*;
    use crate::ffi::EdfApi;

    pub const READ_ERROR: c_int = -1001;
    pub const INIT_ERROR: c_int = -1002;
    pub const CROP_ERROR: c_int = -1003;
    pub const COMPUTE_ERROR: c_int = -1004;
    pub const COMPARE_ERROR: c_int = -1005;
    pub const CLASSIFY_ERROR: c_int = -1006;
    pub const WRAP_ERROR: c_int = -1007;
    pub const MODEL_VERSION: c_uint = 2024;
    /// Model file name that makes initialization fail.
    pub const FAIL_MODEL: &str = "fail.dat";
    /// Size of the crops produced by `edfCropImage`: 4x2 BGR.
    pub const CROP_WIDTH: c_uint = 4;
    pub const CROP_HEIGHT: c_uint = 2;
    /// Width that `erImageAllocateAndWrap` rejects after filling the header.
    pub const WRAP_FAIL_WIDTH: c_uint = 13;

    struct FakeState {
        version: c_uint,
    }

    struct ClassifyAllocation {
        _result: Box<EdfClassifyResult>,
        _values: Vec<EdfClassifyResultValue>,
        _strings: Vec<Vec<u8>>,
    }

    enum Allocation {
        Bytes(Vec<u8>),
        CropParams(Vec<f64>, Vec<f64>, Vec<f64>),
        Rows(Vec<*mut c_uchar>),
        State(Box<FakeState>),
        Classify(ClassifyAllocation),
    }

    impl Allocation {
        fn kind(&self) -> &'static str {
            match self {
                Allocation::Bytes(_) => "bytes",
                Allocation::CropParams(..) => "crop params",
                Allocation::Rows(_) => "row table",
                Allocation::State(_) => "module state",
                Allocation::Classify(_) => "classify result",
            }
        }
    }

    #[derive(Debug, Clone, PartialEq)]
    pub struct InitRecord {
        pub module_path: String,
        pub model_file: String,
        pub computation_mode: ERComputationMode,
        pub gpu_device_id: c_int,
        pub num_threads: c_int,
        pub onnx_provider: String,
    }

    #[derive(Debug, Clone, PartialEq)]
    pub struct CropRecord {
        pub cols: Vec<f64>,
        pub rows: Vec<f64>,
        pub values: Vec<f64>,
        pub config: Option<(c_int, c_int, c_int, c_uint)>,
        pub input_first_byte: u8,
    }

    #[derive(Default)]
    struct Ledger {
        live: HashMap<usize, Allocation>,
        calls: HashMap<&'static str, usize>,
        errors: Vec<String>,
        last_init: Option<InitRecord>,
        last_crop: Option<CropRecord>,
        last_classify_config: Option<Option<(c_int, c_int)>>,
        last_batch_size: Option<Option<c_uint>>,
        free_classify_code: c_int,
        fail_allocations: bool,
        callback: Option<(c_int, u8)>,
    }

    thread_local! {
        static LEDGER: RefCell<Ledger> = RefCell::new(Ledger::default());
    }

    fn with_ledger<R>(f: impl FnOnce(&mut Ledger) -> R) -> R {
        LEDGER.with(|ledger| f(&mut ledger.borrow_mut()))
    }

    fn called(function: &'static str) {
        with_ledger(|l| *l.calls.entry(function).or_insert(0) += 1);
    }

    fn record(ptr: usize, allocation: Allocation) {
        with_ledger(|l| {
            if l.live.insert(ptr, allocation).is_some() {
                l.errors.push(format!("address {:#x} handed out twice", ptr));
            }
        });
    }

    fn release(ptr: usize, kind: &'static str, function: &'static str) {
        with_ledger(|l| match l.live.remove(&ptr) {
            Some(allocation) if allocation.kind() == kind => (),
            Some(allocation) => {
                l.errors.push(format!(
                    "{}: {:#x} is a {}, expected {}",
                    function,
                    ptr,
                    allocation.kind(),
                    kind
                ));
            }
            None => l.errors.push(format!(
                "{}: {:#x} was not allocated by the library or is already freed",
                function, ptr
            )),
        });
    }

    fn is_live(ptr: usize, kind: &'static str) -> bool {
        with_ledger(|l| matches!(l.live.get(&ptr), Some(a) if a.kind() == kind))
    }

    fn check_live(ptr: usize, kind: &'static str, function: &'static str) -> bool {
        let live = is_live(ptr, kind);
        if !live {
            with_ledger(|l| {
                l.errors
                    .push(format!("{}: {:#x} is not a live {}", function, ptr, kind))
            });
        }
        live
    }

    fn alloc_bytes(mut bytes: Vec<u8>) -> *mut c_uchar {
        assert!(!bytes.is_empty());
        let ptr = bytes.as_mut_ptr();
        record(ptr as usize, Allocation::Bytes(bytes));
        ptr
    }

    fn new_state() -> *mut c_void {
        let mut state = Box::new(FakeState {
            version: MODEL_VERSION,
        });
        let ptr = &mut *state as *mut FakeState as *mut c_void;
        record(ptr as usize, Allocation::State(state));
        ptr
    }

    unsafe fn string(ptr: *const c_char) -> String {
        if ptr.is_null() {
            return String::new();
        }
        CStr::from_ptr(ptr).to_string_lossy().into_owned()
    }

    unsafe extern "C" fn init(config: *const EdfInitConfig, state: *mut *mut c_void) -> c_int {
        called("edfInitEyedentify");
        let config = &*config;
        let record = InitRecord {
            module_path: string(config.module_path),
            model_file: string(config.model_file),
            computation_mode: config.computation_mode,
            gpu_device_id: config.gpu_device_id,
            num_threads: config.num_threads,
            onnx_provider: string(config.onnx_provider),
        };
        let fail = record.model_file == FAIL_MODEL;
        with_ledger(|l| l.last_init = Some(record));

        if fail {
            return INIT_ERROR;
        }
        if config.computation_mode == ER_COMPUTATION_MODE_GPU {
            return EDF_ERROR_NO_GPU_DEVICE;
        }
        *state = new_state();
        0
    }

    unsafe extern "C" fn init_external(
        config: *const EdfInitConfig,
        callback: fcn_edfInferenceCallback,
        output_buffer_size: c_uint,
        state: *mut *mut c_void,
    ) -> c_int {
        called("edfInitEyedentify_ExternalInference");
        if string((*config).model_file) == FAIL_MODEL {
            return INIT_ERROR;
        }

        let mut pixels = vec![7u8; 12];
        let mut input = ERImage::empty();
        input.color_model = ER_IMAGE_COLORMODEL_BGR;
        input.data_type = ER_IMAGE_DATATYPE_UCHAR;
        input.width = 2;
        input.height = 2;
        input.step = 6;
        input.depth = 3;
        input.size = 12;
        input.data = pixels.as_mut_ptr();

        let mut output = vec![0u8; output_buffer_size.max(1) as usize];
        let code = callback(&input, output.as_mut_ptr());
        with_ledger(|l| l.callback = Some((code, output[0])));
        if code != 0 {
            return code;
        }
        *state = new_state();
        0
    }

    unsafe extern "C" fn free_eyedentify(state: *mut *mut c_void) {
        called("edfFreeEyedentify");
        if state.is_null() || (*state).is_null() {
            return;
        }
        release(*state as usize, "module state", "edfFreeEyedentify");
        *state = std::ptr::null_mut();
    }

    unsafe extern "C" fn compute_desc(
        image: *const ERImage,
        state: *const c_void,
        descriptor: *mut EdfDescriptor,
        config: *mut EdfComputeDescConfig,
    ) -> c_int {
        called("edfComputeDesc");
        if !check_live(state as usize, "module state", "edfComputeDesc") {
            return -1;
        }
        let batch_size = config.as_ref().map(|c| c.batch_size);
        with_ledger(|l| l.last_batch_size = Some(batch_size));

        // Descriptors are filled in order, so a bad image later in a batch
        // leaves the earlier ones allocated.
        let count = batch_size.unwrap_or(1).max(1) as usize;
        for i in 0..count {
            let img = &*image.add(i);
            if img.size == 0 || img.data.is_null() {
                return COMPUTE_ERROR;
            }
            let data = alloc_bytes(vec![img.width as u8, img.height as u8, *img.data, i as u8]);
            *descriptor.add(i) = EdfDescriptor {
                version: MODEL_VERSION,
                size: 4,
                data,
            };
        }
        0
    }

    unsafe extern "C" fn compare_descs(
        a: *const EdfDescriptor,
        b: *const EdfDescriptor,
        state: *const c_void,
        score: *mut f32,
    ) -> c_int {
        called("edfCompareDescs");
        let (a, b) = (&*a, &*b);
        if !check_live(state as usize, "module state", "edfCompareDescs")
            || !check_live(a.data as usize, "bytes", "edfCompareDescs")
            || !check_live(b.data as usize, "bytes", "edfCompareDescs")
        {
            return -1;
        }
        if a.size != b.size || a.version != b.version {
            return COMPARE_ERROR;
        }
        let a = std::slice::from_raw_parts(a.data, a.size as usize);
        let b = std::slice::from_raw_parts(b.data, b.size as usize);
        let same = a.iter().zip(b).filter(|(x, y)| x == y).count();
        *score = same as f32 / a.len() as f32;
        0
    }

    unsafe extern "C" fn alloc_desc(desc: *mut EdfDescriptor, size: c_uint, version: c_uint) {
        called("edfAllocDesc");
        let data = if size == 0 || allocations_fail() {
            std::ptr::null_mut()
        } else {
            alloc_bytes(vec![0; size as usize])
        };
        *desc = EdfDescriptor {
            version,
            size,
            data,
        };
    }

    unsafe extern "C" fn free_desc(desc: *mut EdfDescriptor) {
        called("edfFreeDesc");
        let desc = &mut *desc;
        if desc.data.is_null() {
            return;
        }
        release(desc.data as usize, "bytes", "edfFreeDesc");
        *desc = EdfDescriptor::default();
    }

    unsafe extern "C" fn crop_params_allocate(
        num_points: c_int,
        num_values: c_int,
        params: *mut EdfCropParams,
    ) {
        called("edfCropParamsAllocate");
        if allocations_fail() {
            *params = EdfCropParams::default();
            (*params).points.length = num_points;
            (*params).values.length = num_values;
            return;
        }
        let mut rows = vec![0.0; num_points.max(1) as usize];
        let mut cols = vec![0.0; num_points.max(1) as usize];
        let mut values = vec![0.0; num_values.max(1) as usize];
        *params = EdfCropParams {
            points: EdfPoints {
                length: num_points,
                rows: rows.as_mut_ptr(),
                cols: cols.as_mut_ptr(),
            },
            values: EdfValues {
                length: num_values,
                values: values.as_mut_ptr(),
            },
        };
        record(rows.as_ptr() as usize, Allocation::CropParams(rows, cols, values));
    }

    unsafe extern "C" fn crop_params_wrap(
        num_points: c_int,
        rows: *mut f64,
        cols: *mut f64,
        num_values: c_int,
        values: *mut f64,
        params: *mut EdfCropParams,
    ) {
        called("edfCropParamsWrap");
        *params = EdfCropParams {
            points: EdfPoints {
                length: num_points,
                rows,
                cols,
            },
            values: EdfValues {
                length: num_values,
                values,
            },
        };
    }

    unsafe extern "C" fn crop_params_free(params: *mut EdfCropParams) {
        called("edfCropParamsFree");
        let params = &mut *params;
        if params.points.rows.is_null() {
            return;
        }
        release(params.points.rows as usize, "crop params", "edfCropParamsFree");
        *params = EdfCropParams::default();
    }

    unsafe extern "C" fn crop_image(
        image_in: *const ERImage,
        params: *mut EdfCropParams,
        state: *mut c_void,
        cropped: *mut ERImage,
        config: *mut EdfCropImageConfig,
    ) -> c_int {
        called("edfCropImage");
        if !check_live(state as usize, "module state", "edfCropImage") {
            return -1;
        }
        let input = &*image_in;
        let params = &*params;
        if input.size == 0 || input.data.is_null() || params.points.length < 1 {
            return CROP_ERROR;
        }

        let points = params.points.length as usize;
        let values = params.values.length.max(0) as usize;
        let record = CropRecord {
            cols: std::slice::from_raw_parts(params.points.cols, points).to_vec(),
            rows: std::slice::from_raw_parts(params.points.rows, points).to_vec(),
            values: if values == 0 {
                Vec::new()
            } else {
                std::slice::from_raw_parts(params.values.values, values).to_vec()
            },
            config: config.as_ref().map(|c| {
                (
                    c.full_crop,
                    c.color_normalization,
                    c.use_antialiasing,
                    c.antialiasing_kernel_size,
                )
            }),
            input_first_byte: *input.data,
        };
        let fill = record.cols[0] as u8;
        with_ledger(|l| l.last_crop = Some(record));

        let size = CROP_WIDTH * CROP_HEIGHT * 3;
        *cropped = ERImage {
            color_model: ER_IMAGE_COLORMODEL_BGR,
            data_type: ER_IMAGE_DATATYPE_UCHAR,
            size,
            width: CROP_WIDTH,
            height: CROP_HEIGHT,
            step: CROP_WIDTH * 3,
            depth: 3,
            row_data: std::ptr::null_mut(),
            data: alloc_bytes(vec![fill; size as usize]),
            data_allocated: 1,
        };
        0
    }

    unsafe extern "C" fn free_crop_image(state: *mut c_void, image: *mut ERImage) -> c_int {
        called("edfFreeCropImage");
        if !check_live(state as usize, "module state", "edfFreeCropImage") {
            return -1;
        }
        let image = &mut *image;
        if image.data.is_null() {
            return -1;
        }
        release(image.data as usize, "bytes", "edfFreeCropImage");
        *image = ERImage::empty();
        0
    }

    unsafe extern "C" fn model_version(state: *const c_void) -> c_uint {
        called("edfModelVersion");
        if !is_live(state as usize, "module state") {
            return 0;
        }
        (*(state as *const FakeState)).version
    }

    unsafe extern "C" fn classify(
        desc: *const EdfDescriptor,
        state: *mut c_void,
        result: *mut *mut EdfClassifyResult,
        config: *mut EdfClassifyConfig,
    ) -> c_int {
        called("edfClassify");
        let desc = &*desc;
        if !check_live(state as usize, "module state", "edfClassify")
            || !check_live(desc.data as usize, "bytes", "edfClassify")
        {
            return -1;
        }
        let config = config
            .as_ref()
            .map(|c| (c.use_dependency_rules, c.num_top_scores));
        with_ledger(|l| l.last_classify_config = Some(config));
        if desc.size < 3 {
            return CLASSIFY_ERROR;
        }

        let first = *desc.data as c_int;
        let mut entries = vec![
            ("mmr_make", "skoda", first, 0.75f32),
            ("mmr_model", "octavia", 7, 0.5),
        ];
        if matches!(config, Some((1, _))) {
            entries.push(("mmr_make_NODEP", "skoda", first, 0.7));
        }

        // Strings are handed out without a NUL terminator.
        let mut strings: Vec<Vec<u8>> = Vec::new();
        let mut values = Vec::new();
        for (task, class, class_id, score) in entries {
            strings.push(task.as_bytes().to_vec());
            let task_ptr = strings.last_mut().map_or(std::ptr::null_mut(), |s| s.as_mut_ptr());
            strings.push(class.as_bytes().to_vec());
            let class_ptr = strings.last_mut().map_or(std::ptr::null_mut(), |s| s.as_mut_ptr());
            values.push(EdfClassifyResultValue {
                task_name: task_ptr as *mut c_char,
                task_name_length: task.len() as c_uint,
                class_name: class_ptr as *mut c_char,
                class_name_length: class.len() as c_uint,
                class_id,
                score,
            });
        }
        let mut boxed = Box::new(EdfClassifyResult {
            num_values: values.len() as c_uint,
            values: values.as_mut_ptr(),
        });
        let ptr = &mut *boxed as *mut EdfClassifyResult;
        record(
            ptr as usize,
            Allocation::Classify(ClassifyAllocation {
                _result: boxed,
                _values: values,
                _strings: strings,
            }),
        );
        *result = ptr;
        0
    }

    unsafe extern "C" fn free_classify_result(
        result: *mut *mut EdfClassifyResult,
        state: *mut c_void,
    ) -> c_int {
        called("edfFreeClassifyResult");
        if !check_live(state as usize, "module state", "edfFreeClassifyResult") {
            return -1;
        }
        release(*result as usize, "classify result", "edfFreeClassifyResult");
        *result = std::ptr::null_mut();
        with_ledger(|l| l.free_classify_code)
    }

    unsafe extern "C" fn image_allocate_and_wrap(
        image: *mut ERImage,
        width: c_uint,
        height: c_uint,
        color_model: ERImageColorModel,
        data_type: ERImageDataType,
        data: *mut c_uchar,
        step: c_uint,
    ) -> c_int {
        called("erImageAllocateAndWrap");
        if data.is_null() || height == 0 {
            return -1;
        }
        let plane = step * height;
        let (size, depth) = match color_model {
            ER_IMAGE_COLORMODEL_YCBCR420 => (plane * 3 / 2, 1),
            ER_IMAGE_COLORMODEL_BGR => (plane, 3),
            ER_IMAGE_COLORMODEL_BGRA => (plane, 4),
            _ => (plane, 1),
        };
        let mut rows: Vec<*mut c_uchar> = (0..height as usize)
            .map(|y| data.add(y * step as usize))
            .collect();
        let row_data = rows.as_mut_ptr();
        record(row_data as usize, Allocation::Rows(rows));

        *image = ERImage {
            color_model,
            data_type,
            size,
            width,
            height,
            step,
            depth,
            row_data,
            data,
            data_allocated: 0,
        };
        if width == WRAP_FAIL_WIDTH {
            return WRAP_ERROR;
        }
        0
    }

    unsafe extern "C" fn image_read(image: *mut ERImage, filename: *const c_char) -> c_int {
        called("erImageRead");
        let bytes = match std::fs::read(string(filename)) {
            Ok(bytes) => bytes,
            Err(_) => return READ_ERROR,
        };
        if bytes.is_empty() {
            *image = ERImage::empty();
            return 0;
        }
        let len = bytes.len() as c_uint;
        *image = ERImage {
            color_model: ER_IMAGE_COLORMODEL_GRAY,
            data_type: ER_IMAGE_DATATYPE_UCHAR,
            size: len,
            width: len,
            height: 1,
            step: len,
            depth: 1,
            row_data: std::ptr::null_mut(),
            data: alloc_bytes(bytes),
            data_allocated: 1,
        };
        0
    }

    unsafe extern "C" fn image_write(image: *const ERImage, filename: *const c_char) -> c_int {
        called("erImageWrite");
        let image = &*image;
        if image.data.is_null() {
            return -1;
        }
        let bytes = std::slice::from_raw_parts(image.data, image.size as usize);
        match std::fs::write(string(filename), bytes) {
            Ok(()) => 0,
            Err(_) => -1,
        }
    }

    unsafe extern "C" fn image_free(image: *mut ERImage) {
        called("erImageFree");
        let image = &mut *image;
        if !image.data.is_null() {
            if image.data_allocated != 0 {
                release(image.data as usize, "bytes", "erImageFree");
            } else {
                with_ledger(|l| {
                    l.errors.push(format!(
                        "erImageFree: {:#x} belongs to the caller",
                        image.data as usize
                    ))
                });
            }
        }
        if !image.row_data.is_null() {
            release(image.row_data as usize, "row table", "erImageFree");
        }
        *image = ERImage::empty();
    }

    fn table(external: bool) -> EdfApi {
        EdfApi {
            edfInitEyedentify: init,
            edfInitEyedentify_ExternalInference: if external {
                Some(init_external)
            } else {
                None
            },
            edfFreeEyedentify: free_eyedentify,
            edfComputeDesc: compute_desc,
            edfCompareDescs: compare_descs,
            edfAllocDesc: alloc_desc,
            edfFreeDesc: free_desc,
            edfCropParamsAllocate: crop_params_allocate,
            edfCropParamsWrap: crop_params_wrap,
            edfCropParamsFree: crop_params_free,
            edfCropImage: crop_image,
            edfFreeCropImage: free_crop_image,
            edfModelVersion: model_version,
            edfClassify: classify,
            edfFreeClassifyResult: free_classify_result,
            erImageAllocateAndWrap: image_allocate_and_wrap,
            erImageRead: image_read,
            erImageWrite: image_write,
            erImageFree: image_free,
            library: None,
            support_libraries: Vec::new(),
        }
    }

    /// Function table backed by the fake library.
    pub fn api() -> Arc<EdfApi> {
        Arc::new(table(true))
    }

    /// Fake library built without `edfInitEyedentify_ExternalInference`.
    pub fn api_without_external_inference() -> Arc<EdfApi> {
        Arc::new(table(false))
    }

    pub fn live_allocations() -> usize {
        with_ledger(|l| l.live.len())
    }

    pub fn free_count(function: &str) -> usize {
        with_ledger(|l| l.calls.get(function).copied().unwrap_or(0))
    }

    pub fn call_count(function: &str) -> usize {
        free_count(function)
    }

    pub fn last_init() -> Option<InitRecord> {
        with_ledger(|l| l.last_init.clone())
    }

    pub fn last_crop() -> Option<CropRecord> {
        with_ledger(|l| l.last_crop.clone())
    }

    pub fn last_classify_config() -> Option<Option<(c_int, c_int)>> {
        with_ledger(|l| l.last_classify_config)
    }

    pub fn last_batch_size() -> Option<Option<c_uint>> {
        with_ledger(|l| l.last_batch_size)
    }

    pub fn callback_result() -> Option<(c_int, u8)> {
        with_ledger(|l| l.callback)
    }

    pub fn set_free_classify_code(code: c_int) {
        with_ledger(|l| l.free_classify_code = code);
    }

    /// Makes `edfAllocDesc` and `edfCropParamsAllocate` return no memory.
    pub fn set_allocations_fail(fail: bool) {
        with_ledger(|l| l.fail_allocations = fail);
    }

    fn allocations_fail() -> bool {
        with_ledger(|l| l.fail_allocations)
    }

    /// Panics if memory is still held by the library or a free function
    /// received memory it did not allocate.
    pub fn assert_clean() {
        with_ledger(|l| {
            assert!(l.errors.is_empty(), "ownership errors: {:?}", l.errors);
            let live: Vec<&'static str> = l.live.values().map(Allocation::kind).collect();
            assert!(live.is_empty(), "leaked native allocations: {:?}", live);
        });
    }
}

mod pipeline {
    use std::os::raw::{c_int, c_uchar};
    use std::sync::Arc;

    use tracing_test::traced_test;

    use super::fake;
    use crate::ffi::bindings::{self, ERImage};
    use crate::mmr::{self, LicensePlatePosition, MmrType, ModelVariant};
    use crate::{
        AsErImage, ClassifyConfig, ColorModel, ComputationMode, ComputeDescConfig,
        CropImageConfig, CropMode, CropParams, DependencyRules, Descriptor, EdfApi, EdfError,
        Eyedentify, Image, InitConfig, Setting, TopScores,
    };

    fn init_config() -> InitConfig {
        InitConfig::new(
            mmr::module_path("sdk", mmr::DEFAULT_MODULE),
            mmr::model_file(mmr::MmrTask::Vcmmct, MmrType::Lp, ModelVariant::Fast),
        )
    }

    fn engine(api: &Arc<EdfApi>) -> Eyedentify {
        Eyedentify::new(Arc::clone(api), &init_config()).unwrap()
    }

    fn bgr_image(api: &Arc<EdfApi>, value: u8) -> Image {
        Image::from_raw(api, 8, 8, ColorModel::Bgr, vec![value; 8 * 8 * 3], 8 * 3).unwrap()
    }

    #[test]
    fn test_full_pipeline_releases_everything() {
        let api = fake::api();
        {
            let engine = engine(&api);
            let image = bgr_image(&api, 9);
            let lp = LicensePlatePosition::new(120.0, 80.0, 257.7, 1.0);

            let crop = engine.crop_image(&image, &lp.crop_params(), None).unwrap();
            drop(image);
            assert_eq!(crop.width(), fake::CROP_WIDTH);
            assert_eq!(crop.color_model(), ColorModel::Bgr);

            let descriptor = engine.compute_desc(&crop, None).unwrap();
            drop(crop);
            assert_eq!(descriptor.version, fake::MODEL_VERSION);
            assert_eq!(descriptor.data, vec![4, 2, 120, 0]);

            let result = engine.classify(&descriptor, None).unwrap();
            assert_eq!(result.len(), 2);
            let make = result.get("mmr_make").unwrap();
            assert_eq!(make.class_name, "skoda");
            assert_eq!(make.class_id, 4);
            assert_eq!(make.score, 0.75);
            assert_eq!(result.get("mmr_model").unwrap().class_name, "octavia");
        }

        assert_eq!(fake::free_count("erImageFree"), 1);
        assert_eq!(fake::free_count("edfFreeCropImage"), 1);
        // One for the computed descriptor, one for the copy classified.
        assert_eq!(fake::free_count("edfFreeDesc"), 2);
        assert_eq!(fake::free_count("edfFreeClassifyResult"), 1);
        assert_eq!(fake::free_count("edfFreeEyedentify"), 1);
        fake::assert_clean();
    }

    #[test]
    fn test_init_passes_configuration() {
        let api = fake::api();
        let config = init_config().with_num_threads(4).with_onnx_provider("openvino");
        let engine = Eyedentify::new(Arc::clone(&api), &config).unwrap();

        let record = fake::last_init().unwrap();
        assert!(record.module_path.ends_with("edftf2lite/"));
        assert_eq!(record.model_file, "MMR_VCMMCT_FAST_2024Q2.dat");
        assert_eq!(record.computation_mode, bindings::ER_COMPUTATION_MODE_CPU);
        assert_eq!(record.num_threads, 4);
        assert_eq!(record.onnx_provider, "openvino");
        assert_eq!(engine.model_version().unwrap(), fake::MODEL_VERSION);
    }

    #[test]
    fn test_init_failure_returns_native_code() {
        let api = fake::api();
        let config = InitConfig::new("modules/", fake::FAIL_MODEL);
        match Eyedentify::new(Arc::clone(&api), &config) {
            Err(EdfError::Native { function, code }) => {
                assert_eq!(function, "edfInitEyedentify");
                assert_eq!(code.0, fake::INIT_ERROR);
            }
            other => panic!("Expected native init error, got {:?}", other),
        }
        assert_eq!(fake::free_count("edfFreeEyedentify"), 0);
        fake::assert_clean();
    }

    #[test]
    fn test_gpu_error_is_described() {
        let api = fake::api();
        let config = init_config().with_computation_mode(ComputationMode::Gpu);
        let err = Eyedentify::new(api, &config).unwrap_err();
        assert_eq!(err.code(), Some(bindings::EDF_ERROR_NO_GPU_DEVICE));
        assert!(err.to_string().contains("no GPU device found"));
    }

    #[test]
    fn test_crop_with_native_params_and_config() {
        let api = fake::api();
        let engine = engine(&api);
        let image = bgr_image(&api, 33);
        let carbox = mmr::CarBoxPosition::new(1.0, 2.0, 6.0, 7.0);
        let config = CropImageConfig {
            full_crop: CropMode::Full,
            color_normalization: Setting::Enabled,
            use_antialiasing: Setting::Disabled,
            antialiasing_kernel_size: 3,
            antialiasing_sigma: 0.5,
        };

        {
            let mut params = carbox.native_crop_params(&api).unwrap();
            let crop = engine
                .crop_image_native(&image, &mut params, Some(&config))
                .unwrap();
            assert_eq!(crop.as_bytes()[0], 1);
        }

        let record = fake::last_crop().unwrap();
        assert_eq!(record.cols, vec![1.0, 6.0]);
        assert_eq!(record.rows, vec![2.0, 7.0]);
        assert!(record.values.is_empty());
        assert_eq!(record.config, Some((1, 1, -1, 3)));
        assert_eq!(record.input_first_byte, 33);
        assert_eq!(fake::free_count("edfCropParamsFree"), 1);
    }

    #[test]
    fn test_crop_without_config_passes_null() {
        let api = fake::api();
        let engine = engine(&api);
        let image = bgr_image(&api, 1);
        let params = CropParams::from_columns(&[3.0, 9.0], &[4.0], &[2.0]);
        let _crop = engine.crop_image(&image, &params, None).unwrap();

        let record = fake::last_crop().unwrap();
        assert_eq!(record.config, None);
        assert_eq!(record.cols, vec![3.0]);
        assert_eq!(record.values, vec![2.0]);
    }

    #[test]
    fn test_crop_failure_leaks_nothing() {
        let api = fake::api();
        {
            let engine = engine(&api);
            let image = bgr_image(&api, 1);
            let err = engine.crop_image(&image, &CropParams::new(), None).unwrap_err();
            assert_eq!(err.code(), Some(fake::CROP_ERROR));
        }
        assert_eq!(fake::free_count("edfFreeCropImage"), 0);
        fake::assert_clean();
    }

    #[test]
    fn test_crop_can_be_written_and_converted() {
        let api = fake::api();
        let engine = engine(&api);
        let image = bgr_image(&api, 1);
        let crop = engine
            .crop_image(&image, &CropParams::new().with_point(200.0, 1.0), None)
            .unwrap();

        let rgb = crop.to_dynamic_image().unwrap().to_rgb8();
        assert_eq!(rgb.dimensions(), (fake::CROP_WIDTH, fake::CROP_HEIGHT));
        assert_eq!(rgb.get_pixel(0, 0).0, [200, 200, 200]);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("crop.raw");
        crop.write(&path).unwrap();
        assert_eq!(std::fs::read(&path).unwrap().len(), 24);
    }

    #[test]
    fn test_compute_desc_batch() {
        let api = fake::api();
        {
            let engine = engine(&api);
            let image = bgr_image(&api, 1);
            let crops: Vec<_> = [10.0, 20.0, 30.0]
                .iter()
                .map(|&x| {
                    engine
                        .crop_image(&image, &CropParams::new().with_point(x, 1.0), None)
                        .unwrap()
                })
                .collect();
            let refs: Vec<_> = crops.iter().collect();

            let descriptors = engine.compute_desc_batch(&refs).unwrap();
            assert_eq!(fake::last_batch_size(), Some(Some(3)));
            assert_eq!(descriptors.len(), 3);
            for (i, descriptor) in descriptors.iter().enumerate() {
                assert_eq!(descriptor.data[2], 10 * (i as u8 + 1));
                assert_eq!(descriptor.data[3], i as u8);
            }
            assert_eq!(fake::free_count("edfFreeDesc"), 3);
        }
        fake::assert_clean();
    }

    struct RawImage(ERImage);

    impl AsErImage for RawImage {
        fn as_er_image(&self) -> &ERImage {
            &self.0
        }
    }

    #[test]
    fn test_compute_desc_batch_failure_frees_filled_entries() {
        let api = fake::api();
        {
            let engine = engine(&api);
            let image = bgr_image(&api, 1);
            let crop = engine
                .crop_image(&image, &CropParams::new().with_point(10.0, 1.0), None)
                .unwrap();
            let good = RawImage(*crop.as_er_image());
            let blank = RawImage(ERImage::empty());

            match engine.compute_desc_batch(&[&good, &blank, &good]) {
                Err(err) => assert_eq!(err.code(), Some(fake::COMPUTE_ERROR)),
                Ok(_) => panic!("Expected the batch to fail on the blank image"),
            }
            assert_eq!(fake::free_count("edfFreeDesc"), 1);
        }
        fake::assert_clean();
    }

    #[test]
    fn test_compute_desc_rejects_bad_batches() {
        let api = fake::api();
        let engine = engine(&api);
        let image = bgr_image(&api, 1);
        let crop = engine
            .crop_image(&image, &CropParams::new().with_point(1.0, 1.0), None)
            .unwrap();

        let config = ComputeDescConfig { batch_size: 2 };
        assert!(matches!(
            engine.compute_desc(&crop, Some(&config)),
            Err(EdfError::InvalidInput(_))
        ));
        let empty: [&Image; 0] = [];
        assert!(matches!(
            engine.compute_desc_batch(&empty),
            Err(EdfError::InvalidInput(_))
        ));
        assert_eq!(fake::call_count("edfComputeDesc"), 0);

        engine
            .compute_desc(&crop, Some(&ComputeDescConfig { batch_size: 1 }))
            .unwrap();
        assert_eq!(fake::last_batch_size(), Some(Some(1)));
    }

    #[test]
    fn test_compare_descs() {
        let api = fake::api();
        {
            let engine = engine(&api);
            let a = Descriptor::new(fake::MODEL_VERSION, vec![1, 2, 3, 4]);
            let b = Descriptor::new(fake::MODEL_VERSION, vec![1, 2, 0, 0]);
            assert_eq!(engine.compare_descs(&a, &a).unwrap(), 1.0);
            assert_eq!(engine.compare_descs(&a, &b).unwrap(), 0.5);

            let short = Descriptor::new(fake::MODEL_VERSION, vec![1]);
            let err = engine.compare_descs(&a, &short).unwrap_err();
            assert_eq!(err.code(), Some(fake::COMPARE_ERROR));
        }
        // Both copies are freed for each comparison, failed ones included.
        assert_eq!(fake::free_count("edfFreeDesc"), 6);
        fake::assert_clean();
    }

    #[test]
    fn test_classify_config_and_dependency_variants() {
        let api = fake::api();
        let engine = engine(&api);
        let descriptor = Descriptor::new(fake::MODEL_VERSION, vec![5, 0, 0]);

        engine.classify(&descriptor, None).unwrap();
        assert_eq!(fake::last_classify_config(), Some(None));

        let config = ClassifyConfig {
            dependency_rules: DependencyRules::Both,
            top_scores: TopScores::Best(3),
        };
        let result = engine.classify(&descriptor, Some(&config)).unwrap();
        assert_eq!(fake::last_classify_config(), Some(Some((1, 3))));
        assert_eq!(result.len(), 3);
        assert_eq!(result.get("mmr_make_NODEP").unwrap().class_id, 5);
    }

    #[test]
    fn test_classify_failure_frees_descriptor_copy() {
        let api = fake::api();
        {
            let engine = engine(&api);
            let descriptor = Descriptor::new(fake::MODEL_VERSION, vec![1]);
            let err = engine.classify(&descriptor, None).unwrap_err();
            assert_eq!(err.code(), Some(fake::CLASSIFY_ERROR));
            assert_eq!(fake::free_count("edfFreeClassifyResult"), 0);
        }
        assert_eq!(fake::free_count("edfFreeDesc"), 1);
        fake::assert_clean();
    }

    #[test]
    fn test_classify_free_failure_is_reported() {
        let api = fake::api();
        let engine = engine(&api);
        fake::set_free_classify_code(-9);
        let descriptor = Descriptor::new(fake::MODEL_VERSION, vec![1, 2, 3, 4]);
        match engine.classify(&descriptor, None) {
            Err(EdfError::Native { function, code }) => {
                assert_eq!(function, "edfFreeClassifyResult");
                assert_eq!(code.0, -9);
            }
            other => panic!("Expected edfFreeClassifyResult error, got {:?}", other),
        }
    }

    unsafe extern "C" fn inference(input: *const ERImage, output: *mut c_uchar) -> c_int {
        *output = (*input).width as u8 + *(*input).data;
        0
    }

    unsafe extern "C" fn failing_inference(_input: *const ERImage, _output: *mut c_uchar) -> c_int {
        -77
    }

    #[test]
    fn test_external_inference() {
        let api = fake::api();
        {
            let engine =
                Eyedentify::with_external_inference(Arc::clone(&api), &init_config(), inference, 16)
                    .unwrap();
            assert_eq!(fake::callback_result(), Some((0, 9)));
            assert_eq!(engine.model_version().unwrap(), fake::MODEL_VERSION);
        }
        fake::assert_clean();

        let err = Eyedentify::with_external_inference(api, &init_config(), failing_inference, 16)
            .unwrap_err();
        assert_eq!(err.code(), Some(-77));
    }

    #[test]
    fn test_external_inference_unsupported() {
        let api = fake::api_without_external_inference();
        assert!(!api.supports_external_inference());
        match Eyedentify::with_external_inference(api, &init_config(), inference, 16) {
            Err(EdfError::Unsupported(name)) => {
                assert_eq!(name, "edfInitEyedentify_ExternalInference")
            }
            other => panic!("Expected Unsupported, got {:?}", other),
        }
    }

    #[test]
    fn test_wrapped_ycbcr_input_pipeline() {
        let api = fake::api();
        {
            let engine = engine(&api);
            let image =
                Image::from_raw(&api, 16, 8, ColorModel::YCbCr420, vec![50; 16 * 12], 16).unwrap();
            let params = mmr::sample_inputs("data")[1].crop_params(MmrType::Lp);
            let crop = engine.crop_image(&image, &params, None).unwrap();
            assert_eq!(fake::last_crop().unwrap().values, vec![265.7, 1.0]);
            engine.compute_desc(&crop, None).unwrap();
        }
        fake::assert_clean();
    }

    #[test]
    fn test_engine_is_send() {
        fn assert_send<T: Send>() {}
        assert_send::<Eyedentify>();
    }

    #[test]
    #[traced_test]
    fn test_native_calls_are_logged() {
        let api = fake::api();
        {
            let engine = engine(&api);
            let descriptor = Descriptor::new(fake::MODEL_VERSION, vec![1, 2, 3, 4]);
            engine.classify(&descriptor, None).unwrap();
        }
        assert!(logs_contain("Initializing Eyedentify module MMR_VCMMCT_FAST_2024Q2.dat"));
        assert!(logs_contain("edfClassify: 2 values"));
        assert!(logs_contain("edfFreeEyedentify"));
    }
}
