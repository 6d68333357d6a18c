use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::blocking::Client;

use crate::normalize::CanonicalUrl;

// Sites routinely answer bots differently from people, so checks identify as
// an ordinary desktop browser.
pub const DEFAULT_BROWSER_USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/80.0.3987.116 Safari/537.36";
pub const DEFAULT_TIMEOUT_MS: u64 = 60_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeError {
    Ssl(String),
    Dns(String),
    Connect(String),
    Timeout(String),
    RedirectLoop(String),
    Request(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidReason {
    Ssl,
    DnsUnresolved,
    TooManyRedirects,
    ClientError(u16),
}

impl fmt::Display for InvalidReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ssl => f.write_str("SSL error"),
            Self::DnsUnresolved => f.write_str("domain name not resolved"),
            Self::TooManyRedirects => f.write_str("too many redirects"),
            Self::ClientError(status) => write!(f, "{status}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Valid,
    Invalid(InvalidReason),
    Indeterminate,
}

pub trait StatusProbe {
    fn probe(&self, url: &CanonicalUrl) -> Result<u16, ProbeError>;
}

impl<P: StatusProbe> StatusProbe for &P {
    fn probe(&self, url: &CanonicalUrl) -> Result<u16, ProbeError> {
        P::probe(*self, url)
    }
}

#[derive(Debug, Clone)]
pub struct ProbeOptions {
    pub user_agent: String,
    pub timeout_ms: u64,
}

impl Default for ProbeOptions {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_BROWSER_USER_AGENT.to_string(),
            timeout_ms: DEFAULT_TIMEOUT_MS,
        }
    }
}

pub struct HttpProbe {
    client: Client,
}

impl HttpProbe {
    pub fn new(options: &ProbeOptions) -> Result<Self> {
        let client = Client::builder()
            .user_agent(options.user_agent.clone())
            .timeout(Duration::from_millis(options.timeout_ms))
            .build()
            .context("failed to build link check HTTP client")?;
        Ok(Self { client })
    }
}

impl StatusProbe for HttpProbe {
    // GET rather than HEAD: too many sites answer HEAD with 4xx or nothing.
    // The body is never read; only the status line matters.
    fn probe(&self, url: &CanonicalUrl) -> Result<u16, ProbeError> {
        match self.client.get(url.as_str()).send() {
            Ok(response) => Ok(response.status().as_u16()),
            Err(error) => Err(categorize_error(&error)),
        }
    }
}

// TLS handshake failures also report is_connect, so the certificate check
// has to run before the connect checks.
fn categorize_error(error: &reqwest::Error) -> ProbeError {
    let detail = error.to_string();
    let lowered = detail.to_ascii_lowercase();
    if lowered.contains("certificate") || lowered.contains("ssl") || lowered.contains("tls") {
        return ProbeError::Ssl(detail);
    }
    if error.is_connect() {
        if lowered.contains("dns")
            || lowered.contains("resolve")
            || lowered.contains("name or service not known")
        {
            return ProbeError::Dns(detail);
        }
        return ProbeError::Connect(detail);
    }
    if error.is_redirect() {
        return ProbeError::RedirectLoop(detail);
    }
    if error.is_timeout() {
        return ProbeError::Timeout(detail);
    }
    ProbeError::Request(detail)
}

#[derive(Debug, Default)]
struct VerdictCache {
    valid: HashSet<CanonicalUrl>,
    invalid: HashMap<CanonicalUrl, InvalidReason>,
    indeterminate: HashSet<CanonicalUrl>,
}

impl VerdictCache {
    fn lookup(&self, url: &CanonicalUrl) -> Option<Verdict> {
        if self.valid.contains(url) {
            return Some(Verdict::Valid);
        }
        if let Some(reason) = self.invalid.get(url) {
            return Some(Verdict::Invalid(*reason));
        }
        if self.indeterminate.contains(url) {
            return Some(Verdict::Indeterminate);
        }
        None
    }

    // The partitions stay disjoint: a later deterministic verdict moves a
    // url instead of leaving it in two partitions at once.
    fn record(&mut self, url: &CanonicalUrl, verdict: Verdict) {
        self.valid.remove(url);
        self.invalid.remove(url);
        self.indeterminate.remove(url);
        match verdict {
            Verdict::Valid => {
                self.valid.insert(url.clone());
            }
            Verdict::Invalid(reason) => {
                self.invalid.insert(url.clone(), reason);
            }
            Verdict::Indeterminate => {
                self.indeterminate.insert(url.clone());
            }
        }
    }
}

/// Classifies URLs and remembers every deterministic verdict for the rest of
/// the run. Shared across worker threads through `&self`.
pub struct LinkChecker<P> {
    probe: P,
    cache: Mutex<VerdictCache>,
}

impl<P: StatusProbe> LinkChecker<P> {
    pub fn new(probe: P) -> Self {
        Self {
            probe,
            cache: Mutex::new(VerdictCache::default()),
        }
    }

    pub fn cached(&self, url: &CanonicalUrl) -> Option<Verdict> {
        self.cache
            .lock()
            .expect("verdict cache mutex poisoned")
            .lookup(url)
    }

    pub fn check(&self, url: &CanonicalUrl) -> Verdict {
        if let Some(cached) = self.cached(url) {
            return cached;
        }

        log::info!("checking {url}");
        // Arm order is deliberate: TLS and DNS failures are permanent and
        // cacheable, other connection-level failures are transient and must
        // be probed again next time they appear.
        let (verdict, cacheable) = match self.probe.probe(url) {
            Err(ProbeError::Ssl(detail)) => {
                log::error!("SSL error for {url}: {detail}");
                (Verdict::Invalid(InvalidReason::Ssl), true)
            }
            Err(ProbeError::Dns(detail)) => {
                log::error!("domain name not resolved for {url}: {detail}");
                (Verdict::Invalid(InvalidReason::DnsUnresolved), true)
            }
            Err(ProbeError::Connect(detail)) => {
                log::warn!("connection error for {url}: {detail}");
                (Verdict::Indeterminate, false)
            }
            Err(ProbeError::Timeout(detail)) => {
                log::warn!("timeout while checking {url}: {detail}");
                (Verdict::Indeterminate, false)
            }
            Err(ProbeError::RedirectLoop(detail)) => {
                log::error!("too many redirects for {url}: {detail}");
                (Verdict::Invalid(InvalidReason::TooManyRedirects), true)
            }
            Err(ProbeError::Request(detail)) => {
                log::error!("check of {url} aborted: {detail}");
                (Verdict::Indeterminate, false)
            }
            Ok(status) if (200..300).contains(&status) => (Verdict::Valid, true),
            Ok(status) if (400..500).contains(&status) => {
                log::error!("status {status} for {url}");
                (Verdict::Invalid(InvalidReason::ClientError(status)), true)
            }
            Ok(status) => {
                log::warn!("indeterminate status {status} for {url}");
                (Verdict::Indeterminate, true)
            }
        };

        if cacheable {
            self.cache
                .lock()
                .expect("verdict cache mutex poisoned")
                .record(url, verdict);
        }
        verdict
    }
}
