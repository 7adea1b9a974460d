use haven_assets::AssetStatus;

/// Why a provider preference could not be resolved to an engine.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum SelectError {
    #[error("local model not ready (status: {0})")]
    LocalNotReady(AssetStatus),
    #[error("no local engine configured")]
    LocalUnavailable,
    #[error("no network engine configured")]
    NetworkUnavailable,
}

#[derive(thiserror::Error, Debug)]
pub enum ChatError {
    #[error("{engine} request failed: {message}")]
    Http {
        engine: &'static str,
        message: String,
    },
    #[error("{engine} returned status {status}")]
    Status { engine: &'static str, status: u16 },
    #[error("{0} returned an empty reply")]
    EmptyReply(&'static str),
    #[error(transparent)]
    Select(#[from] SelectError),
}

impl ChatError {
    pub(crate) fn http(engine: &'static str, err: impl std::fmt::Display) -> Self {
        ChatError::Http {
            engine,
            message: err.to_string(),
        }
    }
}
