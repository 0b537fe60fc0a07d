use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use crossbeam::channel::unbounded;
use opencv::core::Vector;
use opencv::imgcodecs::{imread, imwrite, IMREAD_COLOR};
use opencv::prelude::MatTraitConst;
use plate_reader::logging::{init_logging, LogFormat};
use plate_reader::plate_detection::bounding_box_render::annotate;
use plate_reader::{metrics, BoundingBox, PlateReader, PlateReading, ReaderConfig, DETECT_FAILED};
use serde::Serialize;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "read_plates", about = "Read vehicle number plates from still images")]
struct Args {
    /// Images to read
    #[arg(required = true)]
    images: Vec<PathBuf>,

    /// TOML reader configuration
    #[arg(long, env = "PLATE_READER_CONFIG")]
    config: Option<PathBuf>,

    /// Worker threads sharing the loaded models. Each worker gets its own
    /// Tesseract handle unless `ocr.engine_instances` asks for more
    #[arg(long, default_value_t = 1)]
    workers: usize,

    /// Write a copy of each image with the plate box drawn on it
    #[arg(long)]
    annotate_dir: Option<PathBuf>,

    /// Run OCR on the whole image when no plate region is found
    #[arg(long)]
    full_image_ocr: bool,

    /// Print Prometheus metrics to stderr when done
    #[arg(long)]
    metrics: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ImageReport {
    image: String,
    vehicle_number: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    plate_box: Option<BoundingBox>,
    #[serde(skip_serializing_if = "Option::is_none")]
    failure: Option<&'static str>,
    vehicles: usize,
    candidates: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl ImageReport {
    fn from_reading(image: &Path, reading: &PlateReading) -> Self {
        Self {
            image: image.display().to_string(),
            vehicle_number: reading
                .text
                .as_plate()
                .unwrap_or(DETECT_FAILED)
                .to_string(),
            plate_box: reading.plate_box,
            failure: reading.failure.map(|f| f.as_str()),
            vehicles: reading.vehicles,
            candidates: reading.candidates,
            error: None,
        }
    }

    fn unreadable(image: &Path, error: String) -> Self {
        Self {
            image: image.display().to_string(),
            vehicle_number: DETECT_FAILED.to_string(),
            plate_box: None,
            failure: None,
            vehicles: 0,
            candidates: 0,
            error: Some(error),
        }
    }
}

fn main() -> Result<()> {
    init_logging(LogFormat::from_env());
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => ReaderConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => ReaderConfig::default(),
    };
    config = config.apply_env().context("applying environment overrides")?;
    if args.full_image_ocr {
        config.ocr_full_image_when_no_plate = true;
    }
    let workers = args.workers.max(1);
    config.ocr.engine_instances = config.ocr.engine_instances.max(workers);

    if let Some(dir) = &args.annotate_dir {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("creating annotation dir {}", dir.display()))?;
    }

    let reader = Arc::new(PlateReader::from_config(config));
    info!(
        capability = ?reader.capability(),
        engines = reader.config().ocr.engine_instances,
        workers,
        "plate reader ready"
    );

    let (job_tx, job_rx) = unbounded::<(usize, PathBuf)>();
    let (report_tx, report_rx) = unbounded::<(usize, ImageReport)>();
    for job in args.images.iter().cloned().enumerate() {
        job_tx.send(job).context("queueing image")?;
    }
    drop(job_tx);

    crossbeam::scope(|scope| {
        for _ in 0..workers {
            let job_rx = job_rx.clone();
            let report_tx = report_tx.clone();
            let reader = reader.clone();
            let annotate_dir = args.annotate_dir.as_deref();
            scope.spawn(move |_| {
                for (index, path) in job_rx.iter() {
                    let report = process_image(&reader, &path, annotate_dir);
                    if report_tx.send((index, report)).is_err() {
                        break;
                    }
                }
            });
        }
    })
    .map_err(|_| anyhow::anyhow!("a worker thread panicked"))?;
    drop(report_tx);

    let mut reports: Vec<(usize, ImageReport)> = report_rx.iter().collect();
    reports.sort_by_key(|(index, _)| *index);
    for (_, report) in reports {
        println!("{}", serde_json::to_string(&report)?);
    }

    if args.metrics {
        eprintln!("{}", metrics::gather_text()?);
    }
    Ok(())
}

fn process_image(reader: &PlateReader, path: &Path, annotate_dir: Option<&Path>) -> ImageReport {
    let image = match imread(&path.to_string_lossy(), IMREAD_COLOR) {
        Ok(image) if !image.empty() => image,
        Ok(_) => return ImageReport::unreadable(path, "cannot decode image".to_string()),
        Err(e) => return ImageReport::unreadable(path, e.to_string()),
    };

    let reading = reader.read(&image);

    if let (Some(dir), Some(plate_box)) = (annotate_dir, reading.plate_box) {
        if let Err(e) = write_annotated(&image, &plate_box, &reading, path, dir) {
            warn!("annotating {} failed: {:#}", path.display(), e);
        }
    }

    ImageReport::from_reading(path, &reading)
}

fn write_annotated(
    image: &opencv::prelude::Mat,
    plate_box: &BoundingBox,
    reading: &PlateReading,
    path: &Path,
    dir: &Path,
) -> Result<()> {
    let annotated = annotate(image, plate_box, &reading.text)?;
    let name = path.file_name().context("image path has no file name")?;
    let target = dir.join(name);
    let written = imwrite(&target.to_string_lossy(), &annotated, &Vector::new())?;
    if !written {
        anyhow::bail!("encoder refused {}", target.display());
    }
    Ok(())
}
