//! Single-shot HTTP availability probe and its bounded retry window.

use std::borrow::Cow;
use std::net::Ipv6Addr;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::time::Instant;
use tracing::debug;

use crate::error::KuvError;

/// Per-call timeout for one probe.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// Externally reachable endpoint under test.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Target {
    pub host: String,
    pub port: u16,
}

impl Target {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Build a target from a load-balancer ingress point.
    ///
    /// The IP wins over the hostname when both are set.
    pub fn from_ingress(
        ip: Option<&str>,
        hostname: Option<&str>,
        port: u16,
    ) -> Result<Self, KuvError> {
        ip.filter(|s| !s.is_empty())
            .or_else(|| hostname.filter(|s| !s.is_empty()))
            .map(|host| Self::new(host, port))
            .ok_or_else(|| {
                KuvError::KubernetesApi(
                    "Load balancer ingress has neither IP nor hostname".to_string(),
                )
            })
    }

    /// Host as it appears in a URL authority; IPv6 literals are bracketed.
    fn authority_host(&self) -> Cow<'_, str> {
        if self.host.parse::<Ipv6Addr>().is_ok() {
            Cow::Owned(format!("[{}]", self.host))
        } else {
            Cow::Borrowed(self.host.as_str())
        }
    }

    /// Probe URL for this target.
    pub fn url(&self) -> String {
        if self.port == 80 {
            format!("http://{}/", self.authority_host())
        } else {
            format!("http://{}:{}/", self.authority_host(), self.port)
        }
    }
}

impl std::fmt::Display for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.authority_host(), self.port)
    }
}

/// Classification of a single probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum ProbeOutcome {
    Healthy { status: u16 },
    Unhealthy { status: u16 },
    Unreachable { error: String },
}

impl ProbeOutcome {
    /// Classify an HTTP status code.
    pub const fn from_status(status: u16) -> Self {
        if is_healthy_status(status) {
            Self::Healthy { status }
        } else {
            Self::Unhealthy { status }
        }
    }

    pub const fn is_healthy(&self) -> bool {
        matches!(self, Self::Healthy { .. })
    }
}

impl std::fmt::Display for ProbeOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Healthy { status } => write!(f, "healthy (status {status})"),
            Self::Unhealthy { status } => write!(f, "bad response (status {status})"),
            Self::Unreachable { error } => write!(f, "unreachable ({error})"),
        }
    }
}

/// Success window for probe responses: `[200, 404)`.
///
/// Redirects and 4xx below 404 count as healthy while a master restarts.
/// Keep the boundary as is.
pub const fn is_healthy_status(status: u16) -> bool {
    status >= 200 && status < 404
}

/// One bounded health check against a target.
#[async_trait]
pub trait Probe: Send + Sync {
    async fn probe(&self, target: &Target) -> ProbeOutcome;
}

/// HTTP GET probe with a fixed per-call timeout.
#[derive(Clone)]
pub struct HttpProbe {
    client: reqwest::Client,
}

impl HttpProbe {
    /// Create a probe whose calls give up after `timeout`.
    ///
    /// Redirects are not followed so 3xx responses are classified as received.
    pub fn new(timeout: Duration) -> Result<Self, KuvError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| KuvError::Config(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Probe for HttpProbe {
    async fn probe(&self, target: &Target) -> ProbeOutcome {
        let url = target.url();
        match self.client.get(&url).send().await {
            Ok(response) => {
                let outcome = ProbeOutcome::from_status(response.status().as_u16());
                if !outcome.is_healthy() {
                    debug!(target = %target, "Bad response; {}", outcome);
                }
                outcome
            }
            Err(e) => {
                debug!(target = %target, error = %e, "Error reaching target");
                ProbeOutcome::Unreachable {
                    error: e.to_string(),
                }
            }
        }
    }
}

/// Result of a bounded retry window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowResult {
    /// Probes sent during the window.
    pub attempts: u32,
    /// The healthy outcome, or the last failure if the budget expired.
    pub outcome: ProbeOutcome,
}

impl WindowResult {
    pub const fn is_healthy(&self) -> bool {
        self.outcome.is_healthy()
    }
}

/// Probe `target` every `interval` until it reports healthy or `budget` elapses.
///
/// The first probe is sent immediately and the last one no later than the deadline.
pub async fn poll_until_healthy(
    probe: &dyn Probe,
    target: &Target,
    interval: Duration,
    budget: Duration,
) -> WindowResult {
    // A budget past the clock's range never expires.
    let deadline = Instant::now().checked_add(budget);
    let mut attempts = 0;

    loop {
        attempts += 1;
        let outcome = probe.probe(target).await;
        if outcome.is_healthy() {
            return WindowResult { attempts, outcome };
        }

        let now = Instant::now();
        let pause = match deadline {
            Some(deadline) if now >= deadline => return WindowResult { attempts, outcome },
            Some(deadline) => interval.min(deadline - now),
            None => interval,
        };
        tokio::time::sleep(pause).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct Scripted {
        outcomes: Mutex<Vec<ProbeOutcome>>,
    }

    impl Scripted {
        fn new(mut outcomes: Vec<ProbeOutcome>) -> Self {
            outcomes.reverse();
            Self {
                outcomes: Mutex::new(outcomes),
            }
        }
    }

    #[async_trait]
    impl Probe for Scripted {
        async fn probe(&self, _target: &Target) -> ProbeOutcome {
            let mut outcomes = self.outcomes.lock().unwrap();
            if outcomes.len() > 1 {
                outcomes.pop().unwrap()
            } else {
                outcomes[0].clone()
            }
        }
    }

    #[test]
    fn test_status_window_boundaries() {
        assert!(!is_healthy_status(199));
        assert!(is_healthy_status(200));
        assert!(is_healthy_status(302));
        assert!(is_healthy_status(403));
        assert!(!is_healthy_status(404));
        assert!(!is_healthy_status(500));
        assert!(!is_healthy_status(503));
    }

    #[test]
    fn test_outcome_from_status() {
        assert_eq!(
            ProbeOutcome::from_status(403),
            ProbeOutcome::Healthy { status: 403 }
        );
        assert_eq!(
            ProbeOutcome::from_status(404),
            ProbeOutcome::Unhealthy { status: 404 }
        );
    }

    #[test]
    fn test_target_url() {
        assert_eq!(Target::new("10.0.0.1", 80).url(), "http://10.0.0.1/");
        assert_eq!(
            Target::new("lb.example.com", 8080).url(),
            "http://lb.example.com:8080/"
        );
        assert_eq!(Target::new("10.0.0.1", 80).to_string(), "10.0.0.1:80");
    }

    #[test]
    fn test_target_url_brackets_ipv6() {
        assert_eq!(Target::new("::1", 8080).url(), "http://[::1]:8080/");
        assert_eq!(
            Target::new("2001:db8::10", 80).url(),
            "http://[2001:db8::10]/"
        );
        assert_eq!(Target::new("2001:db8::10", 80).to_string(), "[2001:db8::10]:80");
        let t = Target::from_ingress(Some("fd00::1"), None, 80).unwrap();
        assert_eq!(t.url(), "http://[fd00::1]/");
    }

    #[test]
    fn test_target_from_ingress_prefers_ip() {
        let t = Target::from_ingress(Some("1.2.3.4"), Some("lb.example.com"), 80).unwrap();
        assert_eq!(t.host, "1.2.3.4");
        let t = Target::from_ingress(Some(""), Some("lb.example.com"), 80).unwrap();
        assert_eq!(t.host, "lb.example.com");
        assert!(Target::from_ingress(None, None, 80).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_until_healthy_recovers() {
        let probe = Scripted::new(vec![
            ProbeOutcome::Unreachable {
                error: "connection refused".into(),
            },
            ProbeOutcome::Unhealthy { status: 503 },
            ProbeOutcome::Healthy { status: 200 },
        ]);
        let result = poll_until_healthy(
            &probe,
            &Target::new("svc", 80),
            Duration::from_secs(1),
            Duration::from_secs(30),
        )
        .await;
        assert!(result.is_healthy());
        assert_eq!(result.attempts, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_until_healthy_expires_with_last_outcome() {
        let probe = Scripted::new(vec![ProbeOutcome::Unhealthy { status: 500 }]);
        let start = Instant::now();
        let result = poll_until_healthy(
            &probe,
            &Target::new("svc", 80),
            Duration::from_secs(2),
            Duration::from_secs(10),
        )
        .await;
        assert!(!result.is_healthy());
        assert_eq!(result.outcome, ProbeOutcome::Unhealthy { status: 500 });
        // t = 0, 2, 4, 6, 8, 10
        assert_eq!(result.attempts, 6);
        assert_eq!(start.elapsed(), Duration::from_secs(10));
    }
}
