use std::fmt;

/// Single error taxonomy rooting every fallible boundary: store, pool,
/// rotation, gateway, admin, config. Handler code matches on variant,
/// never on string content.
#[derive(Debug)]
#[allow(dead_code)]
pub enum GengarError {
    /// An origin or upstream rejected the request (status/body/redirect/transport).
    Blocked(String),
    /// Timed out, connection refused/reset while reaching an upstream.
    Transport(String),
    /// The rotation engine had no healthy proxy to offer.
    RotationExhausted,
    /// The client's request line/headers could not be parsed.
    MalformedRequest(String),
    /// The shared state store failed to service an operation.
    Store(String),
    /// An admin endpoint rejected the request (bad input, unknown strategy, ...).
    AdminBadRequest(String),
    /// Bearer token missing or did not match `API_SECRET`.
    AdminUnauthorized,
    /// A downstream call made on behalf of an admin endpoint failed.
    AdminUpstreamFailure(String),
    Config(String),
    Internal(String),
}

impl fmt::Display for GengarError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GengarError::Blocked(msg) => write!(f, "upstream blocked: {}", msg),
            GengarError::Transport(msg) => write!(f, "transport error: {}", msg),
            GengarError::RotationExhausted => write!(f, "no healthy proxies available"),
            GengarError::MalformedRequest(msg) => write!(f, "malformed request: {}", msg),
            GengarError::Store(msg) => write!(f, "store error: {}", msg),
            GengarError::AdminBadRequest(msg) => write!(f, "bad request: {}", msg),
            GengarError::AdminUnauthorized => write!(f, "unauthorized"),
            GengarError::AdminUpstreamFailure(msg) => write!(f, "upstream failure: {}", msg),
            GengarError::Config(msg) => write!(f, "config error: {}", msg),
            GengarError::Internal(msg) => write!(f, "internal error: {}", msg),
        }
    }
}

impl std::error::Error for GengarError {}
