use std::fmt;
use thiserror::Error;
use url::Url;

/// Opaque identifier of a recorded session. The gateway keys sessions by
/// integer id, but the client never interprets the value.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SessionId(String);

impl SessionId {
    pub fn new(raw: impl AsRef<str>) -> Result<Self, SessionError> {
        let trimmed = raw.as_ref().trim();
        if trimmed.is_empty() {
            return Err(SessionError::EmptySessionId);
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Location of the gateway that serves replay sockets.
#[derive(Clone, Debug)]
pub struct GatewayConfig {
    base: Url,
}

impl GatewayConfig {
    pub fn new(gateway: impl AsRef<str>) -> Result<Self, SessionError> {
        let mut base = gateway.as_ref().trim().trim_end_matches('/').to_string();
        if base.is_empty() {
            return Err(SessionError::InvalidGateway(
                "gateway host cannot be empty".into(),
            ));
        }
        if !base.starts_with("ws://") && !base.starts_with("wss://") {
            // Plain websockets for local development, TLS everywhere else.
            if base.contains("localhost") || base.contains("127.0.0.1") {
                base = format!("ws://{}", base);
            } else {
                base = format!("wss://{}", base);
            }
        }
        let parsed = Url::parse(&base)
            .map_err(|err| SessionError::InvalidGateway(format!("invalid gateway url: {err}")))?;
        Ok(Self { base: parsed })
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    /// Replay endpoint for one session: `<base>/api/sessions/<id>/replay`.
    pub fn replay_url(&self, session: &SessionId) -> Result<Url, SessionError> {
        let raw = format!(
            "{}/api/sessions/{}/replay",
            self.base.as_str().trim_end_matches('/'),
            session
        );
        Url::parse(&raw).map_err(|err| {
            SessionError::InvalidGateway(format!(
                "unable to construct replay url for session {session}: {err}"
            ))
        })
    }
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session id cannot be empty")]
    EmptySessionId,
    #[error("invalid gateway configuration: {0}")]
    InvalidGateway(String),
}
