//! Local name databases used to label hosts and ports.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use validator::{self, Validate};

#[derive(Debug, Serialize, Deserialize, Validate, Clone)]
pub struct ResolverConfig {
    /// Hosts file mapping addresses to names. Missing files are ignored.
    #[serde(default = "default_hosts_file")]
    pub hosts_file: Option<PathBuf>,

    /// Services database mapping `port/proto` to names. Missing files are ignored.
    #[serde(default = "default_services_file")]
    pub services_file: Option<PathBuf>,
}

fn default_hosts_file() -> Option<PathBuf> {
    Some(PathBuf::from("/etc/hosts"))
}

fn default_services_file() -> Option<PathBuf> {
    Some(PathBuf::from("/etc/services"))
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            hosts_file: default_hosts_file(),
            services_file: default_services_file(),
        }
    }
}
