//! # sparhund-engine
//!
//! Turns captured packets into audit records and persisted conversations.
//!
//! ### Key Submodules:
//! - `decoder`: plugin lifecycle framework plus the HTTP and SSH decoders
//! - `stream`: TCP stream assembly, the deadline-bounded driver and fan-out
//! - `runtime`: engine wiring, worker pool and finalize
//! - `sink` / `emit`: record destinations
//! - `report`: final statistics tables

pub mod decoder;
pub mod emit;
pub mod error;
pub mod record;
pub mod report;
pub mod runtime;
pub mod sink;
pub mod source;
pub mod stats;
pub mod stream;

pub use decoder::{CustomDecoder, DecoderPlugin, DecoderRegistry, HttpDecoder, SshDecoder};
pub use error::{DecodeError, EngineError, ErrorKind};
pub use record::{AuditRecord, HttpRecord, SshRecord};
pub use report::FinalReport;
pub use runtime::{Engine, EngineBuilder};
pub use sink::{JsonLinesSink, MemorySink, RecordSink};
pub use source::{LiveSource, MemorySource, PacketSource, PcapFileSource};
pub use stats::SharedStats;
pub use stream::{
    PassthroughAssembler, StreamAssembler, StreamContext, StreamHandler, TcpStreamDriver,
};
