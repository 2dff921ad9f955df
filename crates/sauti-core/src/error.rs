use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Error kinds shared across the pipeline services.
#[derive(Debug, Error)]
pub enum Error {
    /// Bad JSON, unknown event tag, or a missing/invalid required field.
    #[error("protocol error: {0}")]
    Protocol(String),
    /// A peer socket closed or errored.
    #[error("downstream error: {0}")]
    Downstream(String),
    /// ASR/TTS/resampler invocation failed or timed out.
    #[error("subprocess error: {0}")]
    Subprocess(String),
    /// Filesystem or temp-dir failure.
    #[error("resource error: {0}")]
    Resource(String),
    /// Missing model/binary or unparseable setting at startup.
    #[error("config error: {0}")]
    Config(String),
    /// A bounded queue or buffer dropped data.
    #[error("overflow: {0}")]
    Overflow(String),
}
