use crate::normalizer::InvalidDate;

/// Fatal outcomes of one run, named after the stage that failed. Adapter
/// errors are rendered with their full context chain in the message.
///
/// Empty upstream data is not an error; see `RunResult`.
#[derive(Debug, thiserror::Error)]
pub enum EtlError {
    /// Transport failure, non-2xx status or undecodable body. Nothing written.
    #[error("fetch failed: {0:#}")]
    Fetch(anyhow::Error),

    /// Upstream row with a value but no usable date. Nothing written.
    #[error("normalize failed: {0}")]
    Normalize(InvalidDate),

    /// Object-store write failed. Warehouse not touched.
    #[error("archive failed: {0:#}")]
    Archive(anyhow::Error),

    /// Warehouse append failed. The archive object may already exist.
    #[error("load failed: {0:#}")]
    Load(anyhow::Error),
}

impl From<InvalidDate> for EtlError {
    fn from(e: InvalidDate) -> Self {
        EtlError::Normalize(e)
    }
}

impl EtlError {
    pub fn stage(&self) -> &'static str {
        match self {
            EtlError::Fetch(_) => "fetch",
            EtlError::Normalize(_) => "normalize",
            EtlError::Archive(_) => "archive",
            EtlError::Load(_) => "load",
        }
    }
}
