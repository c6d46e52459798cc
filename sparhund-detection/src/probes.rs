//! ## sparhund-detection::probes
//! **Aho-Corasick prefiltered service probes with thread-safe updates**
//!
//! Each probe has a literal anchor used to build a single Aho-Corasick
//! automaton. Only probes whose anchor occurs in the input have their
//! regular expressions evaluated, so classification of unrelated traffic
//! costs one automaton scan.

use aho_corasick::{AhoCorasick, AhoCorasickBuilder};
use parking_lot::RwLock;
use regex::bytes::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("Invalid probe expression for {service}: {source}")]
    Expression {
        service: String,
        #[source]
        source: regex::Error,
    },

    #[error("Pattern compilation failed: {0}")]
    Automaton(String),

    #[error("Probe for {0} has an empty anchor")]
    EmptyAnchor(String),
}

/// Result of a successful classification.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ProbeMatch {
    pub service: String,
    pub product: String,
    pub version: String,
}

/// A single service fingerprint.
#[derive(Debug, Clone)]
pub struct ServiceProbe {
    pub service: String,
    anchor: Vec<u8>,
    /// Must match for the probe to fire.
    require: Option<Regex>,
    /// Optional extraction of `product` and `version` named groups.
    info: Option<Regex>,
}

impl ServiceProbe {
    pub fn new(
        service: &str,
        anchor: &[u8],
        require: Option<&str>,
        info: Option<&str>,
    ) -> Result<Self, ProbeError> {
        if anchor.is_empty() {
            return Err(ProbeError::EmptyAnchor(service.to_string()));
        }
        let compile = |expr: &str| {
            Regex::new(expr).map_err(|source| ProbeError::Expression {
                service: service.to_string(),
                source,
            })
        };
        Ok(Self {
            service: service.to_string(),
            anchor: anchor.to_vec(),
            require: require.map(compile).transpose()?,
            info: info.map(compile).transpose()?,
        })
    }

    fn evaluate(&self, data: &[u8]) -> Option<ProbeMatch> {
        if let Some(require) = &self.require {
            if !require.is_match(data) {
                return None;
            }
        }

        let mut result = ProbeMatch {
            service: self.service.clone(),
            ..Default::default()
        };
        if let Some(caps) = self.info.as_ref().and_then(|re| re.captures(data)) {
            let text = |name: &str| {
                caps.name(name)
                    .map(|m| String::from_utf8_lossy(m.as_bytes()).trim().to_string())
                    .unwrap_or_default()
            };
            result.product = text("product");
            result.version = text("version");
        }
        Some(result)
    }
}

/// Thread-safe probe set. Probes are evaluated in insertion order.
pub struct ServiceProbes {
    probes: RwLock<Vec<ServiceProbe>>,
    matcher: RwLock<Option<AhoCorasick>>,
}

impl ServiceProbes {
    pub fn new() -> Self {
        Self {
            probes: RwLock::new(Vec::new()),
            matcher: RwLock::new(None),
        }
    }

    /// Probe set covering common plaintext services.
    pub fn with_defaults() -> Result<Self, ProbeError> {
        let probes = Self::new();
        for probe in default_probes()? {
            probes.probes.write().push(probe);
        }
        probes.rebuild_matcher()?;
        Ok(probes)
    }

    pub fn probe_add(&self, probe: ServiceProbe) -> Result<(), ProbeError> {
        self.probes.write().push(probe);
        self.rebuild_matcher()
    }

    pub fn len(&self) -> usize {
        self.probes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn rebuild_matcher(&self) -> Result<(), ProbeError> {
        let probes = self.probes.read();
        let matcher = AhoCorasickBuilder::new()
            .build(probes.iter().map(|p| p.anchor.as_slice()))
            .map_err(|e| ProbeError::Automaton(e.to_string()))?;

        *self.matcher.write() = Some(matcher);
        Ok(())
    }

    /// Returns the first probe (in insertion order) that fires on `data`.
    #[inline]
    pub fn classify(&self, data: &[u8]) -> Option<ProbeMatch> {
        if data.is_empty() {
            return None;
        }

        let mut candidates: Vec<usize> = {
            let matcher = self.matcher.read();
            let matcher = matcher.as_ref()?;
            matcher
                .find_overlapping_iter(data)
                .map(|m| m.pattern().as_usize())
                .collect()
        };
        candidates.sort_unstable();
        candidates.dedup();

        let probes = self.probes.read();
        candidates
            .into_iter()
            .filter_map(|idx| probes.get(idx))
            .find_map(|probe| probe.evaluate(data))
    }
}

impl Default for ServiceProbes {
    fn default() -> Self {
        Self::new()
    }
}

const SERVER_HEADER: &str =
    r"(?mi)^Server:[ \t]*(?P<product>[^/\r\n ]+)(?:/(?P<version>[^\s]+))?";

fn default_probes() -> Result<Vec<ServiceProbe>, ProbeError> {
    Ok(vec![
        ServiceProbe::new(
            "ssh",
            b"SSH-",
            Some(r"(?m)^SSH-\d\.\d+-"),
            Some(r"(?m)^SSH-\d\.\d+-(?P<product>[^_\s-]+)(?:[_-](?P<version>[^\s]+))?"),
        )?,
        ServiceProbe::new("http", b"HTTP/1.", Some(r"(?m)^HTTP/1\.[01] \d{3}"), Some(SERVER_HEADER))?,
        ServiceProbe::new("rtsp", b"RTSP/1.0", Some(r"(?m)^RTSP/1\.0 \d{3}"), Some(SERVER_HEADER))?,
        ServiceProbe::new("sip", b"SIP/2.0", Some(r"(?m)^SIP/2\.0 \d{3}"), Some(SERVER_HEADER))?,
        ServiceProbe::new(
            "smtp",
            b"220",
            Some(r"(?mi)^220[ -].*\bE?SMTP\b"),
            Some(r"(?mi)^220[ -]\S+ E?SMTP (?P<product>[A-Za-z][\w.-]*)"),
        )?,
        ServiceProbe::new(
            "ftp",
            b"220",
            Some(r"(?mi)^220[ -].*FTP"),
            Some(r"(?mi)^220[ -].*?(?P<product>ProFTPD|vsFTPd|Pure-FTPd|FileZilla Server)[ \t]*(?P<version>[\d.]+[a-z]?)?"),
        )?,
        ServiceProbe::new("pop3", b"+OK", Some(r"(?m)^\+OK"), Some(r"(?i)(?P<product>Dovecot|Courier|Qpopper)"))?,
        ServiceProbe::new("imap", b"* OK", Some(r"(?m)^\* OK"), Some(r"(?i)(?P<product>Dovecot|Cyrus|Courier)"))?,
        ServiceProbe::new("redis", b"+PONG", Some(r"(?m)^\+PONG\r?$"), None)?,
        ServiceProbe::new("memcached", b"STAT pid", Some(r"(?m)^STAT pid \d+"), Some(r"STAT version (?P<version>[\d.]+)"))?,
    ])
}
