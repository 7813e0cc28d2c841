use std::{collections::BTreeMap, fmt};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FxErrorCode {
    InvalidResponse,
    UpstreamError,
    BadRequest,
    Timeout,
}

impl FxErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            FxErrorCode::InvalidResponse => "FX_INVALID_RESPONSE",
            FxErrorCode::UpstreamError => "FX_UPSTREAM_ERROR",
            FxErrorCode::BadRequest => "FX_BAD_REQUEST",
            FxErrorCode::Timeout => "FX_TIMEOUT",
        }
    }
}

impl fmt::Display for FxErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unrecoverable failure while resolving a rate.
///
/// `details` carries upstream context (response body, last cause) and is only
/// meant for logs.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{code}: {message}")]
pub struct FxError {
    pub code: FxErrorCode,
    pub message: String,
    pub details: BTreeMap<&'static str, String>,
}

impl FxError {
    pub fn new(code: FxErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: BTreeMap::new(),
        }
    }

    pub fn with_detail(mut self, key: &'static str, value: impl Into<String>) -> Self {
        self.details.insert(key, value.into());
        self
    }

    pub fn invalid_response(message: impl Into<String>) -> Self {
        Self::new(FxErrorCode::InvalidResponse, message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_includes_code() {
        let err = FxError::new(FxErrorCode::BadRequest, "FX service 4xx: 404")
            .with_detail("body", "nope");

        assert_eq!(err.to_string(), "FX_BAD_REQUEST: FX service 4xx: 404");
        assert_eq!(err.details.get("body").map(String::as_str), Some("nope"));
    }

    #[test]
    fn test_codes_render_wire_names() {
        assert_eq!(FxErrorCode::InvalidResponse.to_string(), "FX_INVALID_RESPONSE");
        assert_eq!(FxErrorCode::UpstreamError.to_string(), "FX_UPSTREAM_ERROR");
        assert_eq!(FxErrorCode::Timeout.as_str(), "FX_TIMEOUT");
    }
}
