use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Capability missing: {capability} - {message}")]
    CapabilityMissing { capability: String, message: String },

    #[error("Unknown client: {0}")]
    UnknownClient(String),

    #[error("Runtime error: {0}")]
    Runtime(#[from] core_runtime::Error),

    #[error("Offline cache error: {0}")]
    Offline(#[from] core_offline::OfflineError),
}

impl CoreError {
    /// Returns `true` if the request never reached a controller.
    pub fn is_no_controller(&self) -> bool {
        matches!(self, CoreError::Offline(core_offline::OfflineError::NoController))
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
