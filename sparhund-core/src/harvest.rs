//! Banner harvesting: guesses which service a conversation talks to.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sparhund_detection::{ProbeMatch, ServiceProbes};
use tracing::debug;

use crate::flow::TransportFlow;
use crate::resolve::NameLookup;

/// Label used when neither probes nor the port give a name.
pub const UNKNOWN_SERVICE: &str = "unknown";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Identification {
    /// Directory-safe service label.
    pub label: String,
    pub probe: Option<ProbeMatch>,
}

pub struct BannerHarvester {
    probes: Arc<ServiceProbes>,
    lookup: Arc<dyn NameLookup>,
}

impl BannerHarvester {
    pub fn new(probes: Arc<ServiceProbes>, lookup: Arc<dyn NameLookup>) -> Self {
        Self { probes, lookup }
    }

    /// Runs the probes over `raw`, falling back to the server port's name.
    pub fn harvest(
        &self,
        raw: &[u8],
        transport: &TransportFlow,
        ident: &str,
        first_seen: DateTime<Utc>,
    ) -> Identification {
        let probe = self.probes.classify(raw);
        let label = match &probe {
            Some(matched) => matched.service.clone(),
            None => {
                let name = self
                    .lookup
                    .lookup_service_name(transport.dst_port, transport.protocol);
                if name.is_empty() {
                    UNKNOWN_SERVICE.to_string()
                } else {
                    name
                }
            }
        };

        debug!(
            ident,
            service = %label,
            first_seen = %first_seen,
            bytes = raw.len(),
            "Harvested conversation"
        );

        Identification {
            label: sanitize_label(&label),
            probe,
        }
    }
}

fn sanitize_label(label: &str) -> String {
    let cleaned: String = label
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    match cleaned.trim_matches('.') {
        "" => UNKNOWN_SERVICE.to_string(),
        trimmed => trimmed.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::TransportProtocol;
    use crate::resolve::{LocalResolver, NoLookup};

    fn harvester(lookup: Arc<dyn NameLookup>) -> BannerHarvester {
        BannerHarvester::new(Arc::new(ServiceProbes::with_defaults().unwrap()), lookup)
    }

    #[test]
    fn probe_then_port_then_unknown() {
        let tr = TransportFlow::new(TransportProtocol::Udp, 5353, 53);
        let h = harvester(Arc::new(LocalResolver::new()));

        let sip = h.harvest(b"OPTIONS sip:x SIP/2.0\r\n\r\nSIP/2.0 200 OK\r\n", &tr, "x", Utc::now());
        assert_eq!(sip.label, "sip");
        assert!(sip.probe.is_some());

        let dns = h.harvest(b"\x12\x34\x01\x00", &tr, "x", Utc::now());
        assert_eq!(dns.label, "domain");
        assert!(dns.probe.is_none());

        let h = harvester(Arc::new(NoLookup));
        assert_eq!(h.harvest(b"\x00", &tr, "x", Utc::now()).label, UNKNOWN_SERVICE);
    }

    #[test]
    fn labels_are_path_safe() {
        assert_eq!(sanitize_label("http/alt"), "http_alt");
        assert_eq!(sanitize_label(".."), UNKNOWN_SERVICE);
        assert_eq!(sanitize_label("ntp"), "ntp");
    }
}
