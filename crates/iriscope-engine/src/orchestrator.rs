use std::thread;
use std::time::Duration;

use serde_json::Value;

use iriscope_contracts::log::{LogFields, SessionLog};
use iriscope_contracts::report::AnalysisReport;

use crate::capture::RawImage;
use crate::client::AnalysisBackend;
use crate::config::env_f64;
use crate::error::PipelineError;
use crate::media::{normalize_for_analysis, NormalizedImage};
use crate::request::build_request;
use crate::request::AnalysisRequest;
use crate::validate::validate_report;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Attempt budget and backoff base for one analysis invocation.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    backoff_base: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff_base: Duration) -> Self {
        Self {
            max_attempts: max_attempts.clamp(1, 5),
            backoff_base,
        }
    }

    pub fn from_env() -> Self {
        let attempts = env_f64(
            "IRISCOPE_MAX_ATTEMPTS",
            f64::from(DEFAULT_MAX_ATTEMPTS),
            1.0,
            5.0,
        )
        .round() as u32;
        let backoff = env_f64("IRISCOPE_RETRY_BACKOFF", 1.0, 0.0, 10.0);
        Self::new(attempts, Duration::from_secs_f64(backoff))
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn backoff_base(&self) -> Duration {
        self.backoff_base
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ATTEMPTS, Duration::from_secs(1))
    }
}

/// Exponential backoff: `base * 2^attempt`, so 1s, 2s, 4s for the defaults.
pub fn backoff_delay(policy: &RetryPolicy, attempt: u32) -> Duration {
    policy.backoff_base * 2u32.saturating_pow(attempt)
}

/// A validated report plus the normalized image the caller may want for
/// fingerprints or thumbnails.
#[derive(Debug, Clone)]
pub struct AnalysisOutcome {
    pub report: AnalysisReport,
    pub image: NormalizedImage,
}

/// Full pipeline: validate capture bytes, normalize, assemble the request,
/// then drive the attempt loop. Decode and payload failures surface
/// immediately; only delivered-but-unusable attempts are retried. The caller
/// receives either a fully validated report or a single terminal error,
/// never a partial result.
pub fn analyze_image(
    raw: &RawImage,
    backend: &dyn AnalysisBackend,
    policy: &RetryPolicy,
    status: &mut dyn FnMut(&str),
    log: Option<&SessionLog>,
) -> Result<AnalysisOutcome, PipelineError> {
    status("Validating image data...");
    if raw.bytes.is_empty() {
        return Err(PipelineError::Decode("empty capture buffer".to_string()));
    }

    status("Processing image (resizing and compressing)...");
    let image = normalize_for_analysis(&raw.bytes)?;
    if let Some(log) = log {
        let mut fields = LogFields::new();
        fields.insert("original_size".to_string(), Value::from(image.original_len));
        fields.insert("new_size".to_string(), Value::from(image.encoded_len));
        let _ = log.info("image normalized", fields);
    }

    let request = build_request(&image)?;
    let report = run_attempts(backend, &request, policy, status, log)?;
    Ok(AnalysisOutcome { report, image })
}

/// The attempt loop. A transport success whose payload fails to parse or
/// validate counts as an attempt failure, identical to a transport failure.
/// Non-retryable errors end the loop immediately.
pub fn run_attempts(
    backend: &dyn AnalysisBackend,
    request: &AnalysisRequest,
    policy: &RetryPolicy,
    status: &mut dyn FnMut(&str),
    log: Option<&SessionLog>,
) -> Result<AnalysisReport, PipelineError> {
    let total = policy.max_attempts();

    for attempt in 0..total {
        status(&format!(
            "Contacting analysis service (attempt {}/{})...",
            attempt + 1,
            total
        ));
        if let Some(log) = log {
            let mut fields = LogFields::new();
            fields.insert("backend".to_string(), Value::from(backend.name()));
            fields.insert("attempt".to_string(), Value::from(attempt + 1));
            fields.insert("max_attempts".to_string(), Value::from(total));
            fields.insert(
                "payload_bytes".to_string(),
                Value::from(request.image.bytes.len()),
            );
            let _ = log.info("contacting analysis service", fields);
        }

        let outcome = backend.complete(request).and_then(|text| {
            status("Parsing service response...");
            let parsed: Value = serde_json::from_str(&text).map_err(|err| {
                PipelineError::SchemaViolation(format!("payload was not valid JSON: {err}"))
            })?;
            validate_report(&parsed)
        });

        match outcome {
            Ok(report) => {
                status("Analysis complete.");
                if let Some(log) = log {
                    let mut fields = LogFields::new();
                    fields.insert("attempt".to_string(), Value::from(attempt + 1));
                    let _ = log.info("analysis succeeded", fields);
                }
                return Ok(report);
            }
            Err(err) => {
                if let Some(log) = log {
                    let mut fields = LogFields::new();
                    fields.insert("attempt".to_string(), Value::from(attempt + 1));
                    fields.insert("error".to_string(), Value::from(err.to_string()));
                    let _ = log.error("analysis attempt failed", fields);
                }
                // Another attempt cannot fix a configuration problem.
                if !err.is_retryable() {
                    return Err(err);
                }
                if attempt + 1 >= total {
                    return Err(PipelineError::AttemptsExhausted {
                        attempts: total,
                        last: err.to_string(),
                    });
                }
                let delay = backoff_delay(policy, attempt);
                status(&format!(
                    "Analysis service failed. Retrying in {}s...",
                    format_seconds(delay)
                ));
                thread::sleep(delay);
            }
        }
    }

    unreachable!("attempt loop always returns a report or an error")
}

fn format_seconds(delay: Duration) -> String {
    let secs = delay.as_secs_f64();
    if secs.fract() == 0.0 {
        format!("{}", secs as u64)
    } else {
        format!("{secs:.1}")
    }
}
