//! ## sparhund-core::service
//! **Service registry**
//!
//! One record per `ip:port` for the lifetime of the process. The first
//! conversation to reach the registry decides banner and identity; later
//! conversations only add their flow ident.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use sparhund_detection::ServiceProbes;
use tracing::debug;

use crate::flow::{NetworkFlow, TransportFlow};
use crate::resolve::NameLookup;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceRecord {
    pub timestamp: DateTime<Utc>,
    pub ip: String,
    pub port: u16,
    /// `TCP` or `UDP`.
    pub protocol: String,
    /// Name from the services database.
    pub name: String,
    pub hostname: String,
    #[serde(with = "serde_bytes")]
    pub banner: Vec<u8>,
    pub product: String,
    pub version: String,
    pub client_bytes: u64,
    pub server_bytes: u64,
    pub flows: Vec<String>,
}

/// A conversation as presented to the registry.
#[derive(Clone, Copy, Debug)]
pub struct ServiceSighting<'a> {
    pub banner: &'a [u8],
    pub flow_ident: &'a str,
    pub service_ident: &'a str,
    pub first_seen: DateTime<Utc>,
    pub server_bytes: usize,
    pub client_bytes: usize,
    pub network: NetworkFlow,
    pub transport: TransportFlow,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RegistryOutcome {
    Created,
    FlowAdded,
    AlreadyKnown,
}

type SharedRecord = Arc<Mutex<ServiceRecord>>;

pub struct ServiceRegistry {
    services: RwLock<HashMap<String, SharedRecord>>,
    banner_size: usize,
    probes: Arc<ServiceProbes>,
    lookup: Arc<dyn NameLookup>,
}

impl ServiceRegistry {
    pub fn new(banner_size: usize, probes: Arc<ServiceProbes>, lookup: Arc<dyn NameLookup>) -> Self {
        Self {
            services: RwLock::new(HashMap::new()),
            banner_size,
            probes,
            lookup,
        }
    }

    pub fn record_service(&self, sighting: ServiceSighting<'_>) -> RegistryOutcome {
        {
            let services = self.services.read();
            if let Some(record) = services.get(sighting.service_ident) {
                return append_flow(record, sighting.flow_ident);
            }
        }

        // built without holding the map lock; probe matching may be slow
        let record = self.build_record(&sighting);

        let mut services = self.services.write();
        match services.get(sighting.service_ident) {
            Some(winner) => {
                debug!(
                    service = sighting.service_ident,
                    "Lost first-sighting race, attaching flow to existing record"
                );
                append_flow(winner, sighting.flow_ident)
            }
            None => {
                services.insert(
                    sighting.service_ident.to_string(),
                    Arc::new(Mutex::new(record)),
                );
                RegistryOutcome::Created
            }
        }
    }

    fn build_record(&self, sighting: &ServiceSighting<'_>) -> ServiceRecord {
        let banner = &sighting.banner[..sighting.banner.len().min(self.banner_size)];
        let ip = sighting.network.dst.to_string();
        let port = sighting.transport.dst_port;
        let protocol = sighting.transport.protocol;

        let mut record = ServiceRecord {
            timestamp: sighting.first_seen,
            hostname: self.lookup.lookup_dns_name(&ip),
            ip,
            port,
            protocol: protocol.record_label().to_string(),
            name: self.lookup.lookup_service_name(port, protocol),
            banner: banner.to_vec(),
            product: String::new(),
            version: String::new(),
            client_bytes: sighting.client_bytes as u64,
            server_bytes: sighting.server_bytes as u64,
            flows: vec![sighting.flow_ident.to_string()],
        };

        if let Some(matched) = self.probes.classify(banner) {
            if record.name.is_empty() {
                record.name = matched.service;
            }
            record.product = matched.product;
            record.version = matched.version;
        }
        record
    }

    pub fn len(&self) -> usize {
        self.services.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, service_ident: &str) -> Option<ServiceRecord> {
        let services = self.services.read();
        let record = services.get(service_ident)?;
        let record = record.lock().clone();
        Some(record)
    }

    /// Copies of all records ordered by `ip:port`.
    pub fn snapshot(&self) -> Vec<ServiceRecord> {
        let services = self.services.read();
        let mut keys: Vec<&String> = services.keys().collect();
        keys.sort();
        keys.into_iter()
            .filter_map(|k| services.get(k))
            .map(|r| r.lock().clone())
            .collect()
    }
}

/// Caller holds the map lock; takes the record lock.
fn append_flow(record: &SharedRecord, flow_ident: &str) -> RegistryOutcome {
    let mut record = record.lock();
    if record.flows.iter().any(|f| f == flow_ident) {
        RegistryOutcome::AlreadyKnown
    } else {
        record.flows.push(flow_ident.to_string());
        RegistryOutcome::FlowAdded
    }
}
