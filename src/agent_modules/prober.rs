//! Reachability probing with bounded retries.
//!
//! A probe never fails as far as its caller is concerned: timeouts,
//! resolution errors and ICMP errors all turn into an unsuccessful
//! [`ProbeReport`].

use async_trait::async_trait;
use rand::random;
use std::future::Future;
use std::net::IpAddr;
use std::time::{Duration, Instant};
use surge_ping::{Client, Config, PingIdentifier, PingSequence, SurgeError, ICMP};
use thiserror::Error;
use tracing::{debug, info, warn};

pub const DEFAULT_ATTEMPT_TIMEOUT_MS: u64 = 2000;
pub const DEFAULT_RETRIES: u32 = 2;

#[derive(Debug, Clone, PartialEq)]
pub struct ProbeReport {
    pub success: bool,
    /// Milliseconds taken by the successful attempt.
    pub latency_ms: Option<f64>,
    pub attempts: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempt_timeout: Duration,
    /// Extra attempts after the first one fails.
    pub retries: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempt_timeout: Duration::from_millis(DEFAULT_ATTEMPT_TIMEOUT_MS),
            retries: DEFAULT_RETRIES,
        }
    }
}

#[derive(Error, Debug)]
pub enum AttemptError {
    #[error("Failed to resolve '{0}'")]
    Resolve(String),
    #[error("No ICMP client available for {0}")]
    NoClient(&'static str),
    #[error("ICMP error: {0}")]
    Icmp(#[from] SurgeError),
    #[error("Attempt timed out after {0:?}")]
    Timeout(Duration),
}

#[async_trait]
pub trait Prober: Send + Sync {
    async fn probe(&self, address: &str) -> ProbeReport;
}

/// Runs `attempt` up to `1 + policy.retries` times, each bounded by
/// `policy.attempt_timeout`, stopping at the first success.
pub async fn probe_with_retries<F, Fut>(address: &str, policy: &RetryPolicy, mut attempt: F) -> ProbeReport
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<(), AttemptError>>,
{
    let total_attempts = policy.retries + 1;

    for attempt_no in 1..=total_attempts {
        let started = Instant::now();
        let outcome = match tokio::time::timeout(policy.attempt_timeout, attempt(attempt_no)).await {
            Ok(result) => result,
            Err(_) => Err(AttemptError::Timeout(policy.attempt_timeout)),
        };

        match outcome {
            Ok(()) => {
                let latency_ms = round_ms(started.elapsed());
                if attempt_no > 1 {
                    info!(address, attempt = attempt_no, "Probe succeeded after retry.");
                }
                return ProbeReport {
                    success: true,
                    latency_ms: Some(latency_ms),
                    attempts: attempt_no,
                };
            }
            Err(e) => {
                debug!(address, attempt = attempt_no, error = %e, "Probe attempt failed.");
            }
        }
    }

    ProbeReport {
        success: false,
        latency_ms: None,
        attempts: total_attempts,
    }
}

fn round_ms(elapsed: Duration) -> f64 {
    // Hundredths of a millisecond are tens of microseconds.
    (elapsed.as_micros() as f64 / 10.0).round() / 100.0
}

/// ICMP echo prober.
pub struct IcmpProber {
    v4: Client,
    v6: Option<Client>,
    policy: RetryPolicy,
}

impl IcmpProber {
    /// Opens the ICMP sockets. Fails when the process lacks the privileges
    /// to send ICMP echo requests.
    pub fn new(policy: RetryPolicy) -> std::io::Result<Self> {
        let v4 = Client::new(&Config::default())?;
        let v6 = match Client::new(&Config::builder().kind(ICMP::V6).build()) {
            Ok(client) => Some(client),
            Err(e) => {
                warn!(error = %e, "ICMPv6 unavailable; IPv6 hosts will report as down.");
                None
            }
        };
        Ok(Self { v4, v6, policy })
    }

    async fn attempt(&self, address: &str, seq: u16) -> Result<(), AttemptError> {
        let target = resolve(address).await?;
        let client = match target {
            IpAddr::V4(_) => &self.v4,
            IpAddr::V6(_) => self.v6.as_ref().ok_or(AttemptError::NoClient("IPv6"))?,
        };

        let mut pinger = client.pinger(target, PingIdentifier(random())).await;
        pinger.timeout(self.policy.attempt_timeout);
        pinger.ping(PingSequence(seq), &[0; 16]).await?;
        Ok(())
    }
}

#[async_trait]
impl Prober for IcmpProber {
    async fn probe(&self, address: &str) -> ProbeReport {
        probe_with_retries(address, &self.policy, |attempt_no| {
            self.attempt(address, attempt_no as u16)
        })
        .await
    }
}

/// Accepts IP literals directly; anything else goes through the system
/// resolver on the blocking pool.
async fn resolve(address: &str) -> Result<IpAddr, AttemptError> {
    if let Ok(ip) = address.parse::<IpAddr>() {
        return Ok(ip);
    }

    let host = address.to_owned();
    let resolved = tokio::task::spawn_blocking(move || {
        use std::net::ToSocketAddrs;
        format!("{host}:0").to_socket_addrs()
    })
    .await;

    match resolved {
        Ok(Ok(mut addrs)) => addrs
            .next()
            .map(|a| a.ip())
            .ok_or_else(|| AttemptError::Resolve(address.to_owned())),
        _ => Err(AttemptError::Resolve(address.to_owned())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn policy(retries: u32) -> RetryPolicy {
        RetryPolicy {
            attempt_timeout: Duration::from_millis(500),
            retries,
        }
    }

    #[tokio::test]
    async fn first_success_stops_retrying() {
        let calls = AtomicU32::new(0);
        let report = probe_with_retries("10.0.0.1", &policy(2), |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok(()) }
        })
        .await;

        assert!(report.success);
        assert_eq!(report.attempts, 1);
        assert!(report.latency_ms.is_some());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retries_until_success() {
        let report = probe_with_retries("10.0.0.1", &policy(2), |attempt_no| async move {
            if attempt_no < 3 {
                Err(AttemptError::Resolve("10.0.0.1".into()))
            } else {
                Ok(())
            }
        })
        .await;

        assert!(report.success);
        assert_eq!(report.attempts, 3);
    }

    #[tokio::test]
    async fn exhausted_retries_report_failure_without_latency() {
        let calls = AtomicU32::new(0);
        let report = probe_with_retries("10.0.0.1", &policy(2), |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(AttemptError::Resolve("nowhere".into())) }
        })
        .await;

        assert_eq!(
            report,
            ProbeReport {
                success: false,
                latency_ms: None,
                attempts: 3
            }
        );
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn hung_attempts_are_cut_off_by_the_timeout() {
        let started = tokio::time::Instant::now();
        let report = probe_with_retries("10.0.0.1", &policy(1), |_| async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(())
        })
        .await;

        assert!(!report.success);
        assert_eq!(report.attempts, 2);
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn latency_is_rounded_to_hundredths() {
        assert_eq!(round_ms(Duration::from_micros(12_346)), 12.35);
        assert_eq!(round_ms(Duration::from_millis(3)), 3.0);
    }

    #[tokio::test]
    async fn ip_literals_resolve_without_lookup() {
        assert_eq!(resolve("127.0.0.1").await.unwrap(), "127.0.0.1".parse::<IpAddr>().unwrap());
        assert!(resolve("::1").await.unwrap().is_ipv6());
    }
}
