use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum FilterError {
    #[error("Unknown response filter: {0}")]
    UnknownFilter(String),
}
