use thiserror::Error;

use crate::dap_tokio::DapError;

pub type Result<T> = std::result::Result<T, ServerError>;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Dap(#[from] DapError),

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}
