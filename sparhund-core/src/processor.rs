//! Harvest, persist and register a drained conversation.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::error;

use crate::conversation::Conversation;
use crate::error::PersistError;
use crate::harvest::{BannerHarvester, Identification};
use crate::persist::ConnectionWriter;
use crate::service::{RegistryOutcome, ServiceRegistry, ServiceSighting};

#[derive(Debug)]
pub struct ProcessOutcome {
    pub identification: Identification,
    pub saved: Option<PathBuf>,
    pub registry: RegistryOutcome,
}

/// Counters over every processed conversation.
#[derive(Debug, Default)]
pub struct ProcessorStats {
    pub conversations: AtomicU64,
    pub saved: AtomicU64,
    pub persist_errors: AtomicU64,
    pub services_created: AtomicU64,
}

pub struct ConversationProcessor {
    harvester: BannerHarvester,
    writer: ConnectionWriter,
    registry: Arc<ServiceRegistry>,
    stats: ProcessorStats,
}

impl ConversationProcessor {
    pub fn new(
        harvester: BannerHarvester,
        writer: ConnectionWriter,
        registry: Arc<ServiceRegistry>,
    ) -> Self {
        Self {
            harvester,
            writer,
            registry,
            stats: ProcessorStats::default(),
        }
    }

    pub fn registry(&self) -> &Arc<ServiceRegistry> {
        &self.registry
    }

    pub fn stats(&self) -> &ProcessorStats {
        &self.stats
    }

    /// Harvests, persists and registers one conversation.
    ///
    /// The registry is updated even when writing the conversation fails; the
    /// write error is logged and returned afterwards.
    pub fn process(&self, conversation: &Conversation) -> Result<ProcessOutcome, PersistError> {
        self.stats.conversations.fetch_add(1, Ordering::Relaxed);

        let identification = self.harvester.harvest(
            &conversation.raw,
            &conversation.client_transport,
            &conversation.ident,
            conversation.first_seen,
        );

        let saved = self.writer.persist(conversation, &identification.label);

        let registry = self.registry.record_service(ServiceSighting {
            banner: &conversation.banner,
            flow_ident: &conversation.ident,
            service_ident: &conversation.service_ident,
            first_seen: conversation.first_seen,
            server_bytes: conversation.server_bytes,
            client_bytes: conversation.client_bytes,
            network: conversation.client_network,
            transport: conversation.client_transport,
        });
        if registry == RegistryOutcome::Created {
            self.stats.services_created.fetch_add(1, Ordering::Relaxed);
        }

        match saved {
            Ok(saved) => {
                if saved.is_some() {
                    self.stats.saved.fetch_add(1, Ordering::Relaxed);
                }
                Ok(ProcessOutcome {
                    identification,
                    saved,
                    registry,
                })
            }
            Err(e) => {
                self.stats.persist_errors.fetch_add(1, Ordering::Relaxed);
                error!(ident = %conversation.ident, error = %e, "Failed to save conversation");
                Err(e)
            }
        }
    }
}
