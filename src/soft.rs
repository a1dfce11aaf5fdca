//! Outcomes of best-effort side effects.
//!
//! Calendar and notification calls return `Result<T, SoftFailure>`. The
//! booking workflow logs a `SoftFailure` and carries on with degraded
//! fields; it never turns one into a request error.

/// Why a best-effort side effect did not happen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SoftFailure {
    /// No calendar provider configured, or the mentor never connected one.
    NotConnected,
    /// The external provider failed (auth, network, quota, bad response).
    ProviderError(String),
    /// The backing store refused the write (not provisioned, WAL down).
    StoreUnavailable(String),
}

impl SoftFailure {
    /// Short tag for logs, metrics and the booking receipt.
    pub fn reason(&self) -> &'static str {
        match self {
            SoftFailure::NotConnected => "not_connected",
            SoftFailure::ProviderError(_) => "provider_error",
            SoftFailure::StoreUnavailable(_) => "store_unavailable",
        }
    }
}

impl std::fmt::Display for SoftFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SoftFailure::NotConnected => write!(f, "calendar not connected"),
            SoftFailure::ProviderError(e) => write!(f, "provider error: {e}"),
            SoftFailure::StoreUnavailable(e) => write!(f, "store unavailable: {e}"),
        }
    }
}

impl std::error::Error for SoftFailure {}

pub type SoftResult<T> = Result<T, SoftFailure>;
