pub mod capture;
pub mod client;
mod config;
pub mod error;
pub mod media;
pub mod orchestrator;
pub mod request;
pub mod validate;

pub use capture::{
    capture_with_release, decode_data_url, CaptureError, CaptureSource, FileCapture, RawImage,
};
pub use client::{AnalysisBackend, CannedBackend, GeminiBackend};
pub use error::PipelineError;
pub use media::{normalize_for_analysis, render_thumbnail, thumbnail_data_url, NormalizedImage};
pub use orchestrator::{analyze_image, AnalysisOutcome, RetryPolicy};
pub use request::{build_request, AnalysisRequest};
pub use validate::validate_report;
