//! Vehicle Make and Model Recognition Example
//!
//! Loads the Eyedentify library from an SDK directory, initializes an MMR
//! module and classifies a set of annotated vehicle images. Each image is
//! read, cropped around its license plate (or car box), turned into a
//! descriptor and classified.
//!
//! Usage:
//!   cargo run --example example_mmr -- --sdk <sdk_dir> --data <data_dir> [--task vcmmgvct] [--carbox] [--precise] [--gpu]
//!
//! Annotations default to the sample images shipped in `<data_dir>/images-mmr/`.
//! Other images can be given as a JSON list with `--inputs`:
//!
//! ```json
//! [{"image": "car.jpg",
//!   "lp": {"center_x": 475.0, "center_y": 573.0, "resolution_ppm": 257.7, "rotation_deg": 1.0},
//!   "carbox": {"top_left_x": 282.0, "top_left_y": 142.0, "bottom_right_x": 754.0, "bottom_right_y": 640.0}}]
//! ```

use clap::Parser;
use eyedentify::mmr::{self, MmrInput, MmrTask, MmrType, ModelVariant};
use eyedentify::{
    ClassifyResult, ColorModel, ComputationMode, EdfApi, Eyedentify, Image, InitConfig,
};
use serde::Serialize;
use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

/// Command line parameters for the MMR example
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the Eyedentify SDK directory (containing lib/ and modules/)
    #[arg(long, default_value = "sdk")]
    sdk: PathBuf,

    /// Directory with the sample images (containing images-mmr/)
    #[arg(long, default_value = "data")]
    data: PathBuf,

    /// Module directory name under <sdk>/modules/
    #[arg(long, default_value = mmr::DEFAULT_MODULE)]
    module: String,

    /// Recognition task: vcmmgvct, vcmmct, vcmct or vcct
    #[arg(short, long, default_value = "vcmmct")]
    task: MmrTask,

    /// Align the vehicle on its car box instead of the license plate
    #[arg(long, default_value_t = false)]
    carbox: bool,

    /// Use the precise models (suited for servers with a GPU)
    #[arg(long, default_value_t = false)]
    precise: bool,

    /// Run the recognition on a GPU
    #[arg(long, default_value_t = false)]
    gpu: bool,

    /// GPU device used with --gpu
    #[arg(long, default_value_t = 0)]
    gpu_id: i32,

    /// CPU threads, -1 uses the hardware concurrency
    #[arg(long, default_value_t = 1, allow_negative_numbers = true)]
    threads: i32,

    /// ONNX provider: cpu, cuda, tensorrt, rocm or openvino
    #[arg(long, default_value = "cpu")]
    onnx_provider: String,

    /// JSON file with annotated input images
    #[arg(short, long)]
    inputs: Option<PathBuf>,

    /// Print results as JSON lines
    #[arg(long, default_value_t = false)]
    json: bool,
}

#[derive(Serialize)]
struct Report<'a> {
    image: &'a std::path::Path,
    result: &'a ClassifyResult,
    crop_ms: f64,
    descriptor_ms: f64,
    classify_ms: f64,
}

fn millis(duration: Duration) -> f64 {
    duration.as_secs_f64() * 1000.0
}

fn load_image(api: &Arc<EdfApi>, input: &MmrInput) -> Result<Image, Box<dyn Error>> {
    match input.raw_ycbcr420 {
        Some((width, height)) => {
            let data = std::fs::read(&input.image)?;
            Ok(Image::from_raw(
                api,
                width,
                height,
                ColorModel::YCbCr420,
                data,
                width,
            )?)
        }
        None => Ok(Image::read(api, &input.image)?),
    }
}

fn process(
    engine: &Eyedentify,
    input: &MmrInput,
    kind: MmrType,
    json: bool,
) -> Result<(), Box<dyn Error>> {
    let api = engine.api();
    let image = load_image(api, input)?;
    let mut params = input.native_crop_params(api, kind)?;

    let start = Instant::now();
    let crop = engine.crop_image_native(&image, &mut params, None)?;
    let crop_time = start.elapsed();
    drop(params);
    drop(image);

    let start = Instant::now();
    let descriptor = engine.compute_desc(&crop, None)?;
    let descriptor_time = start.elapsed();
    drop(crop);

    let start = Instant::now();
    let result = engine.classify(&descriptor, None)?;
    let classify_time = start.elapsed();

    if json {
        let report = Report {
            image: &input.image,
            result: &result,
            crop_ms: millis(crop_time),
            descriptor_ms: millis(descriptor_time),
            classify_ms: millis(classify_time),
        };
        println!("{}", serde_json::to_string(&report)?);
    } else {
        println!("Image cropping time: {:.3} ms", millis(crop_time));
        println!("Descriptor computation time: {:.3} ms", millis(descriptor_time));
        println!("Classification time: {:.3} ms", millis(classify_time));
        println!();
        println!("Vehicle classification:");
        println!("Result:");
        println!("{}", result);
    }
    Ok(())
}

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let kind = if args.carbox {
        MmrType::Carbox
    } else {
        MmrType::Lp
    };
    let variant = if args.precise {
        ModelVariant::Precise
    } else {
        ModelVariant::Fast
    };
    let mode = if args.gpu {
        ComputationMode::Gpu
    } else {
        ComputationMode::Cpu
    };

    let inputs = match &args.inputs {
        Some(path) => serde_json::from_str::<Vec<MmrInput>>(&std::fs::read_to_string(path)?)?,
        None => mmr::sample_inputs(&args.data),
    };

    let api = Arc::new(EdfApi::load_from_sdk(&args.sdk)?);

    let config = InitConfig::new(
        mmr::module_path(&args.sdk, &args.module),
        mmr::model_file(args.task, kind, variant),
    )
    .with_computation_mode(mode)
    .with_gpu_device_id(args.gpu_id)
    .with_num_threads(args.threads)
    .with_onnx_provider(args.onnx_provider.clone());

    println!("Eyedentify MMR module initialization...");
    let start = Instant::now();
    let engine = Eyedentify::new(Arc::clone(&api), &config)?;
    println!("Initialization time: {:.3} ms", millis(start.elapsed()));
    println!("MMR module model version: {}", engine.model_version()?);

    let mut failures = 0;
    for input in &inputs {
        if !args.json {
            println!();
            println!("File: {}", input.image.display());
            println!("--------------------------------------------------");
        }
        if let Err(e) = process(&engine, input, kind, args.json) {
            eprintln!("Processing {} failed: {}", input.image.display(), e);
            failures += 1;
        }
    }

    drop(engine);
    if failures > 0 {
        return Err(format!("{} of {} inputs failed", failures, inputs.len()).into());
    }
    Ok(())
}
