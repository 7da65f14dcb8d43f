use std::path::PathBuf;

/// Result alias that carries the custom [`BeatSyncError`] type.
pub type Result<T> = std::result::Result<T, BeatSyncError>;

/// Common error type for the core crate.
#[derive(Debug, thiserror::Error)]
pub enum BeatSyncError {
    /// Free-form failure that does not warrant its own variant.
    #[error("{0}")]
    Message(String),
    /// A caller handed in data the engine cannot work with.
    #[error("invalid input: {0}")]
    InvalidInput(&'static str),
    /// Wrapper around standard IO errors.
    #[error("{0}")]
    Io(#[from] std::io::Error),
    /// The audio file is missing, unreadable or corrupt.
    #[error("failed to decode audio file '{}': {reason}", path.display())]
    Decode { path: PathBuf, reason: String },
    #[error("beat grid not found: '{}'", .0.display())]
    GridNotFound(PathBuf),
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("wav: {0}")]
    Wav(#[from] hound::Error),
    #[error("image: {0}")]
    Image(#[from] image::ImageError),
    #[error("fft: {0}")]
    Fft(String),
    /// The encoder process could not be started or exited with a failure.
    #[error("encoder: {0}")]
    Encoder(String),
    /// The encoder closed its input while frames were still being written.
    #[error("encoder pipe closed mid-stream")]
    BrokenPipe,
    /// The frame persistence worker stopped before the producer did.
    #[error("frame persistence worker is no longer running")]
    WorkerClosed,
}

impl BeatSyncError {
    /// Creates a new error that simply wraps the provided message.
    pub fn msg<T: Into<String>>(msg: T) -> Self {
        Self::Message(msg.into())
    }

    pub fn decode(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::Decode {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Returns true when a render run cannot continue past this error.
    pub fn is_fatal_for_render(&self) -> bool {
        matches!(
            self,
            Self::BrokenPipe | Self::Encoder(_) | Self::WorkerClosed | Self::Io(_)
        )
    }
}

impl From<&str> for BeatSyncError {
    fn from(value: &str) -> Self {
        Self::msg(value)
    }
}

impl From<String> for BeatSyncError {
    fn from(value: String) -> Self {
        Self::Message(value)
    }
}

impl From<realfft::FftError> for BeatSyncError {
    fn from(value: realfft::FftError) -> Self {
        Self::Fft(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_errors_mention_the_path() {
        let err = BeatSyncError::decode("/tmp/missing.wav", "no such file");
        let text = err.to_string();
        assert!(text.contains("missing.wav"));
        assert!(text.contains("no such file"));
    }

    #[test]
    fn pipe_failures_are_fatal_for_rendering() {
        assert!(BeatSyncError::BrokenPipe.is_fatal_for_render());
        assert!(!BeatSyncError::InvalidInput("x").is_fatal_for_render());
    }
}
