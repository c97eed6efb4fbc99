use thiserror::Error;

/// Failure taxonomy for the analysis pipeline.
///
/// Decode, payload, and configuration errors are terminal and surface
/// immediately; transport and schema errors are absorbed by the retry loop
/// and only surface once the attempt budget is spent, consolidated into
/// `AttemptsExhausted`.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("image decode failed: {0}")]
    Decode(String),

    #[error("analysis request is missing its image payload")]
    MissingPayload,

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("transport failure: {0}")]
    Transport(String),

    #[error("response schema violation: {0}")]
    SchemaViolation(String),

    #[error("analysis service failed after {attempts} attempts; final error: {last}")]
    AttemptsExhausted { attempts: u32, last: String },
}

impl PipelineError {
    /// Whether another attempt against the service could change the outcome.
    /// A well-formed transport response with an invalid shape counts the same
    /// as a failed transport: the attempt produced nothing usable.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PipelineError::Transport(_) | PipelineError::SchemaViolation(_)
        )
    }

    /// Short user-facing message. The `Display` rendering carries the
    /// technical detail for an expandable view or the session log.
    pub fn user_message(&self) -> &'static str {
        match self {
            PipelineError::Decode(_) => {
                "The selected image could not be read. It may be corrupted or in an \
                 unsupported format; try a different photo or the camera."
            }
            PipelineError::MissingPayload => {
                "The image could not be prepared for analysis. Please try again with \
                 a different photo."
            }
            PipelineError::Configuration(_) => {
                "The analysis service is not configured. Set an API key and try \
                 again."
            }
            PipelineError::Transport(_) => {
                "The analysis service could not be reached. Check your connection and \
                 try again."
            }
            PipelineError::SchemaViolation(_) => {
                "The analysis service returned an incomplete result. Please try again."
            }
            PipelineError::AttemptsExhausted { .. } => {
                "The analysis service is not responding right now. Please try again \
                 in a few minutes."
            }
        }
    }
}
