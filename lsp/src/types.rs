//! Public configuration types for a connection.
//!
//! Callers build [`ClientOptions`] (usually from the settings file) and pass
//! them to `Connection::start`.

use std::time::Duration;

use serde::Deserialize;

/// What to do when the server's capabilities omit `textDocumentSync`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CapabilityPolicy {
    /// Fail the handshake.
    #[default]
    Strict,
    /// Log a warning and proceed.
    Lenient,
}

/// Timeouts and policies for one connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientOptions {
    /// Upper bound for any single request after the handshake.
    pub request_timeout: Duration,
    /// Upper bound for the `initialize` request.
    pub initialize_timeout: Duration,
    /// Grace period for `shutdown`/`exit` and for the process to leave.
    pub shutdown_timeout: Duration,
    pub capability_policy: CapabilityPolicy,
    /// Send `$/cancelRequest` when a request times out.
    pub cancel_on_timeout: bool,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            initialize_timeout: Duration::from_secs(30),
            shutdown_timeout: Duration::from_secs(2),
            capability_policy: CapabilityPolicy::Strict,
            cancel_on_timeout: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = ClientOptions::default();
        assert_eq!(options.request_timeout, Duration::from_secs(30));
        assert_eq!(options.shutdown_timeout, Duration::from_secs(2));
        assert_eq!(options.capability_policy, CapabilityPolicy::Strict);
        assert!(options.cancel_on_timeout);
    }

    #[test]
    fn test_capability_policy_deserializes_lowercase() {
        let policy: CapabilityPolicy = serde_json::from_str("\"lenient\"").unwrap();
        assert_eq!(policy, CapabilityPolicy::Lenient);
        assert!(serde_json::from_str::<CapabilityPolicy>("\"Lenient\"").is_err());
    }
}
