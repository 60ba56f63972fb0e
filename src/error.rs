use thiserror::Error;

#[derive(Debug, Error)]
pub enum SimError {
    #[error("shape mismatch: {0}")]
    Shape(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("thread pool error: {0}")]
    ThreadPool(String),
    #[error("non-finite value for species {species} at time index {time_index}")]
    Numerical { time_index: usize, species: usize },
    #[error("cell {cell} produced no accepted trajectory after {attempts} attempts")]
    NoConvergence { cell: usize, attempts: usize },
    #[error("malformed input: {0}")]
    Input(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
    #[error("model file error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("config error: {0}")]
    Config(#[from] toml::de::Error),
}
