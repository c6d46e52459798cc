//! # sparhund-core
//!
//! Conversation reconstruction and service bookkeeping shared by the engine.
//!
//! ### Key Submodules:
//! - `flow`: flow tuples, the direction-independent `FlowKey` and idents
//! - `conversation` / `pool`: fragment buffers and the concurrent pool
//! - `harvest` / `service`: banner probes and the first-writer-wins registry
//! - `persist`: append-only conversation files
//! - `resolve`: local host and service name lookups

pub mod conversation;
pub mod error;
pub mod flow;
pub mod harvest;
pub mod packet;
pub mod persist;
pub mod pool;
pub mod processor;
pub mod resolve;
pub mod service;

pub mod prelude {
    pub use crate::conversation::{Conversation, ConversationBuffer, Fragment};
    pub use crate::error::PersistError;
    pub use crate::flow::{
        flow_ident, sanitize_ident, service_ident, FlowKey, NetworkFlow, TransportFlow,
        TransportProtocol,
    };
    pub use crate::harvest::{BannerHarvester, Identification};
    pub use crate::packet::{CapturedPacket, TcpHeader};
    pub use crate::persist::ConnectionWriter;
    pub use crate::pool::ConversationPool;
    pub use crate::processor::{ConversationProcessor, ProcessOutcome};
    pub use crate::resolve::{LocalResolver, NameLookup, NoLookup};
    pub use crate::service::{RegistryOutcome, ServiceRecord, ServiceRegistry, ServiceSighting};
}

pub use error::PersistError;
