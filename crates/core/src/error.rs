#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Validation failed: {0}")]
    Validation(String),
}

/// Type-erased error returned by the stream and storage collaborators.
///
/// Adapters keep their own concrete error types; the processing pipeline
/// only needs to log and classify them.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;
