//! Strategy error types.

use clotho_exchange::ApiError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StrategyError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Exchange error: {0}")]
    Exchange(#[from] ApiError),
}

pub type StrategyResult<T> = Result<T, StrategyError>;
