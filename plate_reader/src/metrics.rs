use lazy_static::lazy_static;
use prometheus::{Histogram, HistogramOpts, IntCounterVec, Opts, Registry};

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();

    pub static ref PLATE_EXTRACTIONS: IntCounterVec = {
        let metric = IntCounterVec::new(
            Opts::new(
                "plate_extractions_total",
                "Plate extractions by result",
            ),
            &["result"],
        )
        .expect("metric can be created");
        REGISTRY.register(Box::new(metric.clone())).ok();
        metric
    };

    pub static ref PLATE_FAILURES: IntCounterVec = {
        let metric = IntCounterVec::new(
            Opts::new(
                "plate_extraction_failures_total",
                "Failed plate extractions by stage",
            ),
            &["kind"],
        )
        .expect("metric can be created");
        REGISTRY.register(Box::new(metric.clone())).ok();
        metric
    };

    pub static ref OCR_TRIALS: IntCounterVec = {
        let metric = IntCounterVec::new(
            Opts::new("plate_ocr_trials_total", "OCR engine invocations"),
            &["engine"],
        )
        .expect("metric can be created");
        REGISTRY.register(Box::new(metric.clone())).ok();
        metric
    };

    pub static ref EXTRACTION_DURATION: Histogram = {
        let metric = Histogram::with_opts(
            HistogramOpts::new(
                "plate_extraction_duration_seconds",
                "Wall time of one plate extraction",
            )
            .buckets(vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]),
        )
        .expect("metric can be created");
        REGISTRY.register(Box::new(metric.clone())).ok();
        metric
    };
}

/// Text exposition of every plate reader metric.
pub fn gather_text() -> Result<String, prometheus::Error> {
    let encoder = prometheus::TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    prometheus::Encoder::encode(&encoder, &metric_families, &mut buffer)?;
    String::from_utf8(buffer)
        .map_err(|e| prometheus::Error::Msg(format!("metrics are not UTF-8: {}", e)))
}
