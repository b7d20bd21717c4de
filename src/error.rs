use derive_more::{Display, Error};

#[derive(Debug, Display, Error)]
pub enum ConfigError {
    #[display("failed to read config file")]
    ReadFile,
    #[display("failed to parse config: {reason}")]
    Parse { reason: String },
    #[display("invalid config: {field}")]
    Validation { field: String },
}

#[derive(Debug, Display, Error)]
pub enum SourceError {
    #[display("failed to open price source")]
    Open,
    #[display("price source unavailable")]
    Unavailable,
    #[display("price source returned no rows")]
    NoData,
}

#[derive(Debug, Display, Error)]
pub enum SinkError {
    #[display("alert delivery failed: code {code}, {message}")]
    DeliveryFailed { code: i64, message: String },
    #[display("alert transport error")]
    Transport,
}

#[derive(Debug, Display, Error)]
pub enum EngineError {
    #[display("invalid baseline price {baseline}")]
    InvalidBaseline { baseline: i64 },
    #[display("failed to load persisted baselines")]
    Source,
    #[display("engine is {state}, cannot {action}")]
    InvalidState {
        state: &'static str,
        action: &'static str,
    },
    #[display("engine runtime error")]
    Runtime,
}
