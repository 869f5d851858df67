//! Reachability probe trait and implementations.

use async_trait::async_trait;
use reqwest::Client;
use std::sync::atomic::{AtomicBool, Ordering};
use url::Url;

use tillsync_common::{Error, Result};

/// One active reachability round trip.
///
/// The monitor bounds each check with its own timeout; implementations
/// should not retry internally.
#[async_trait]
pub trait ReachabilityProbe: Send + Sync {
    /// Attempt one cheap round trip. `Ok` means the remote side answered.
    async fn check(&self) -> Result<()>;
}

/// Probe that issues a HEAD request with no body.
///
/// Any response proves the path to the service is up, except a 5xx,
/// which means the service answered but is not usable.
pub struct HttpProbe {
    http: Client,
    url: String,
}

impl HttpProbe {
    /// Create a probe against the given endpoint.
    ///
    /// # Errors
    /// - Returns error if the URL does not parse or the HTTP client
    ///   cannot be built
    pub fn new(url: &str) -> Result<Self> {
        let parsed =
            Url::parse(url).map_err(|e| Error::InvalidInput(format!("Invalid probe URL: {}", e)))?;

        let http = Client::builder()
            .user_agent("tillsync/0.1")
            .build()
            .map_err(|e| Error::Network(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http,
            url: parsed.to_string(),
        })
    }
}

#[async_trait]
impl ReachabilityProbe for HttpProbe {
    async fn check(&self) -> Result<()> {
        let response = self
            .http
            .head(&self.url)
            .send()
            .await
            .map_err(|e| Error::Network(format!("Probe failed: {}", e)))?;

        let status = response.status();
        if status.is_server_error() {
            Err(Error::Remote(format!("Probe answered {}", status)))
        } else {
            Ok(())
        }
    }
}

/// Probe with a settable answer, for tests and development.
pub struct StaticProbe {
    online: AtomicBool,
}

impl StaticProbe {
    /// Create a probe that reports the given status until told otherwise.
    pub fn new(online: bool) -> Self {
        Self {
            online: AtomicBool::new(online),
        }
    }

    /// Change the answer future checks will report.
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }
}

#[async_trait]
impl ReachabilityProbe for StaticProbe {
    async fn check(&self) -> Result<()> {
        if self.online.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(Error::Network("probe target unreachable".to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_probe_toggle() {
        let probe = StaticProbe::new(true);
        assert!(probe.check().await.is_ok());

        probe.set_online(false);
        assert!(probe.check().await.is_err());
    }

    #[test]
    fn test_http_probe_rejects_invalid_url() {
        assert!(HttpProbe::new("not a url").is_err());
        assert!(HttpProbe::new("https://api.example.com/health").is_ok());
    }
}
