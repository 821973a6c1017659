//! Broker failure taxonomy (§4.1, §7 "Broker transient" / "Broker fatal").

/// Recoverable within one iteration: network hiccup, timeout, rate limit.
/// The core treats these as skippable and increments a health counter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrokerTransient {
    Timeout { op: String, timeout_ms: u64 },
    RateLimited,
    Disconnected,
    Other(String),
}

impl std::fmt::Display for BrokerTransient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BrokerTransient::Timeout { op, timeout_ms } => {
                write!(f, "broker transient: {op} timed out after {timeout_ms}ms")
            }
            BrokerTransient::RateLimited => write!(f, "broker transient: rate limited"),
            BrokerTransient::Disconnected => write!(f, "broker transient: disconnected"),
            BrokerTransient::Other(msg) => write!(f, "broker transient: {msg}"),
        }
    }
}

impl std::error::Error for BrokerTransient {}

/// Rejected by the server with a diagnostic code; propagates to the
/// iteration-level error handler rather than being retried in-step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerFatal {
    pub code: String,
    pub message: String,
}

impl std::fmt::Display for BrokerFatal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "broker fatal [{}]: {}", self.code, self.message)
    }
}

impl std::error::Error for BrokerFatal {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrokerError {
    Transient(BrokerTransient),
    Fatal(BrokerFatal),
}

impl std::fmt::Display for BrokerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BrokerError::Transient(t) => write!(f, "{t}"),
            BrokerError::Fatal(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for BrokerError {}

impl From<BrokerTransient> for BrokerError {
    fn from(t: BrokerTransient) -> Self {
        BrokerError::Transient(t)
    }
}

impl From<BrokerFatal> for BrokerError {
    fn from(f: BrokerFatal) -> Self {
        BrokerError::Fatal(f)
    }
}
