use thiserror::Error;

/// Configuration errors for the risk supervisor itself. Rule firings are data
/// (`RiskViolation`), not errors — only malformed configuration raises here.
#[derive(Debug, Error)]
pub enum RiskError {
    #[error("{field} must be positive, got {value}")]
    NonPositiveLimit { field: &'static str, value: String },

    #[error("order rate window must be at least 1 order, got {value}")]
    InvalidRateWindow { value: u32 },
}
