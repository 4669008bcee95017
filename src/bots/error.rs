// Bot layer error type
// One enum for every failure a bot, its platform client, or the manager can report.

use serde::Serialize;

/// Result alias used across the bot layer.
pub type BotResult<T> = Result<T, BotError>;

#[derive(Debug, thiserror::Error)]
pub enum BotError {
    /// Required credentials missing or blank. Raised before any request is issued.
    #[error("Bot config incomplete: {0}")]
    ConfigIncomplete(String),

    /// A platform name with no adapter (OPENAI, CLAUDE, CUSTOM, or unknown).
    #[error("Unsupported platform: {0}")]
    UnsupportedPlatform(String),

    #[error("Bot not initialized")]
    NotInitialized,

    #[error("Bot not ready")]
    NotReady,

    /// Transport failure (connect, reset, body read).
    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    /// The caller stopped the request.
    #[error("Request cancelled")]
    Cancelled,

    /// Non-success HTTP status.
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    /// The platform reported an application error (error frame or non-zero code).
    #[error("{0}")]
    Backend(String),

    /// The platform answered but the payload was unusable.
    #[error("Invalid response: {0}")]
    Decode(String),

    #[error("Upload failed for {file}: {reason}")]
    Upload { file: String, reason: String },
}

/// Coarse classification shown to callers deciding how to react.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    ConfigIncomplete,
    NetworkFailure,
    BackendApplicationError,
    UnsupportedPlatform,
}

impl BotError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ConfigIncomplete(_) | Self::NotInitialized | Self::NotReady => {
                ErrorKind::ConfigIncomplete
            }
            Self::UnsupportedPlatform(_) => ErrorKind::UnsupportedPlatform,
            Self::Network(_) | Self::Timeout(_) | Self::Cancelled => ErrorKind::NetworkFailure,
            Self::Http { .. } | Self::Backend(_) | Self::Decode(_) | Self::Upload { .. } => {
                ErrorKind::BackendApplicationError
            }
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    fn kind_tag(&self) -> &'static str {
        match self {
            Self::ConfigIncomplete(_) => "config_incomplete",
            Self::UnsupportedPlatform(_) => "unsupported_platform",
            Self::NotInitialized => "not_initialized",
            Self::NotReady => "not_ready",
            Self::Network(_) => "network",
            Self::Timeout(_) => "timeout",
            Self::Cancelled => "cancelled",
            Self::Http { .. } => "http",
            Self::Backend(_) => "backend",
            Self::Decode(_) => "decode",
            Self::Upload { .. } => "upload",
        }
    }
}

impl From<reqwest::Error> for BotError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout(e.to_string())
        } else if e.is_decode() {
            Self::Decode(e.to_string())
        } else {
            Self::Network(e.to_string())
        }
    }
}

impl From<serde_json::Error> for BotError {
    fn from(e: serde_json::Error) -> Self {
        Self::Decode(e.to_string())
    }
}

/// Serialized as `{ error: "...", kind: "..." }` for the UI layer.
impl Serialize for BotError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeStruct;
        let mut s = serializer.serialize_struct("BotError", 2)?;
        s.serialize_field("error", &self.to_string())?;
        s.serialize_field("kind", self.kind_tag())?;
        s.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_taxonomy() {
        assert_eq!(
            BotError::ConfigIncomplete("difyKey".into()).kind(),
            ErrorKind::ConfigIncomplete
        );
        assert_eq!(BotError::Cancelled.kind(), ErrorKind::NetworkFailure);
        assert_eq!(
            BotError::Timeout("10s".into()).kind(),
            ErrorKind::NetworkFailure
        );
        assert_eq!(
            BotError::Backend("quota".into()).kind(),
            ErrorKind::BackendApplicationError
        );
        assert_eq!(
            BotError::UnsupportedPlatform("OPENAI".into()).kind(),
            ErrorKind::UnsupportedPlatform
        );
    }

    #[test]
    fn test_serialize_shape() {
        let v = serde_json::to_value(BotError::Http {
            status: 401,
            body: "bad key".into(),
        })
        .unwrap();
        assert_eq!(v["kind"], "http");
        assert_eq!(v["error"], "HTTP 401: bad key");
    }

    #[test]
    fn test_manager_messages() {
        assert_eq!(BotError::NotInitialized.to_string(), "Bot not initialized");
        assert_eq!(BotError::NotReady.to_string(), "Bot not ready");
    }
}
