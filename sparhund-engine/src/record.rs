//! Audit records produced by the decoders and the service registry.

use chrono::{DateTime, Utc};
use opentelemetry::KeyValue;
use serde::{Deserialize, Serialize};
use sparhund_core::service::ServiceRecord;
use sparhund_protocols::HttpCookie;

/// One HTTP request paired with its response.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct HttpRecord {
    /// Time the request was complete on the wire.
    pub timestamp: DateTime<Utc>,
    pub proto: String,
    pub method: String,
    pub host: String,
    pub url: String,
    pub user_agent: String,
    pub referer: String,
    pub src_ip: String,
    pub dst_ip: String,
    pub src_port: u16,
    pub dst_port: u16,

    pub req_content_length: Option<u64>,
    pub req_content_encoding: String,
    /// Declared request content type.
    pub content_type: String,
    /// Sniffed from the (decompressed) request body.
    pub content_type_detected: String,
    pub req_cookies: Vec<HttpCookie>,

    pub status_code: u16,
    pub server_name: String,
    /// Declared length, or the received body length when undeclared.
    pub res_content_length: u64,
    pub res_content_encoding: String,
    pub res_content_type: String,
    pub res_content_type_detected: String,
    pub res_cookies: Vec<HttpCookie>,
}

/// Identification exchange of one SSH connection.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SshRecord {
    pub timestamp: DateTime<Utc>,
    pub client_ip: String,
    pub server_ip: String,
    pub client_port: u16,
    pub server_port: u16,
    /// Full identification line sent by the client, if seen.
    pub client_ident: Option<String>,
    pub server_ident: Option<String>,
    pub client_software: String,
    pub server_software: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum AuditRecord {
    Http(HttpRecord),
    Ssh(SshRecord),
    Service(ServiceRecord),
}

impl AuditRecord {
    /// Record type name, also the base name of its output file.
    pub fn record_type(&self) -> &'static str {
        match self {
            AuditRecord::Http(_) => "HTTP",
            AuditRecord::Ssh(_) => "SSH",
            AuditRecord::Service(_) => "Service",
        }
    }

    /// Summary attributes for structured logging.
    pub fn attributes(&self) -> Vec<KeyValue> {
        match self {
            AuditRecord::Http(r) => vec![
                KeyValue::new("method", r.method.clone()),
                KeyValue::new("host", r.host.clone()),
                KeyValue::new("url", r.url.clone()),
                KeyValue::new("status", i64::from(r.status_code)),
                KeyValue::new("client", r.src_ip.clone()),
                KeyValue::new("server", r.dst_ip.clone()),
            ],
            AuditRecord::Ssh(r) => vec![
                KeyValue::new("client", format!("{}:{}", r.client_ip, r.client_port)),
                KeyValue::new("server", format!("{}:{}", r.server_ip, r.server_port)),
                KeyValue::new("client_software", r.client_software.clone()),
                KeyValue::new("server_software", r.server_software.clone()),
            ],
            AuditRecord::Service(r) => vec![
                KeyValue::new("service", format!("{}:{}", r.ip, r.port)),
                KeyValue::new("protocol", r.protocol.clone()),
                KeyValue::new("name", r.name.clone()),
                KeyValue::new("flows", r.flows.len() as i64),
            ],
        }
    }
}
