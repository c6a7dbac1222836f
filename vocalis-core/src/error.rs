use thiserror::Error;

/// All errors produced by vocalis-core.
#[derive(Debug, Error)]
pub enum VocalisError {
    /// Unsupported channel/format/rate combination. An integration mistake,
    /// never retried.
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("synthesis failed: {0}")]
    Synthesis(String),

    #[error("resampler error: {0}")]
    Resample(String),

    #[error("engine initialisation failed: {0}")]
    EngineInit(String),

    #[error("no earcon with id {id}")]
    EarconNotFound { id: usize },

    #[error("invalid earcon file: {0}")]
    InvalidEarconFile(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("audio device error: {0}")]
    AudioDevice(String),

    #[error("audio stream error: {0}")]
    AudioStream(String),

    #[error("no default output device found")]
    NoDefaultOutputDevice,

    #[error("service is already running")]
    AlreadyRunning,

    #[error("service is not running")]
    NotRunning,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl VocalisError {
    pub(crate) fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, VocalisError>;
