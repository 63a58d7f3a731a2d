use thiserror::Error;

/// Failures reported by external collaborators (routing, road attributes)
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProviderError {
    #[error("Network timeout")]
    NetworkTimeout,

    #[error("HTTP error: {0}")]
    Http(u16),

    #[error("Rate limited by provider")]
    RateLimited,

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("No data returned")]
    NoData,

    #[error("Network error: {0}")]
    Network(String),
}

impl From<reqwest::Error> for ProviderError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ProviderError::NetworkTimeout
        } else if let Some(status) = e.status() {
            ProviderError::Http(status.as_u16())
        } else {
            ProviderError::Network(e.to_string())
        }
    }
}

/// Curve advisor error types
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AdvisorError {
    #[error("Invalid sensor fix: {0}")]
    SensorFixInvalid(String),

    #[error("Routing failed: {0}")]
    RoutingFailure(String),

    #[error("Road attributes unavailable: {0}")]
    RoadAttributeUnavailable(#[from] ProviderError),

    #[error("Filter diverged: innovation {0:.1} m")]
    FilterDivergence(f64),

    #[error("Invalid route: {0}")]
    InvalidRoute(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Advisor runtime has stopped")]
    RuntimeStopped,
}

/// Result type for curve advisor operations
pub type Result<T> = std::result::Result<T, AdvisorError>;
