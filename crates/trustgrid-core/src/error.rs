use thiserror::Error;

/// TrustGrid gateway errors.
///
/// Every variant carries a human-readable reason; no rejection is silent.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TrustGridError {
    #[error("Unauthenticated: {0}")]
    Unauthenticated(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl TrustGridError {
    pub fn not_found(what: &str, id: impl std::fmt::Display) -> Self {
        Self::NotFound(format!("{what} '{id}' not found"))
    }

    pub fn storage(detail: impl std::fmt::Display) -> Self {
        Self::Internal(format!("storage failure: {detail}"))
    }

    /// The reason string without the variant prefix.
    pub fn reason(&self) -> &str {
        match self {
            Self::Unauthenticated(reason)
            | Self::Forbidden(reason)
            | Self::NotFound(reason)
            | Self::Conflict(reason)
            | Self::BadRequest(reason)
            | Self::Internal(reason) => reason,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reason_strips_variant_prefix() {
        let err = TrustGridError::not_found("citizen", "ayo");
        assert_eq!(err.reason(), "citizen 'ayo' not found");
        assert_eq!(err.to_string(), "Not found: citizen 'ayo' not found");
    }
}
