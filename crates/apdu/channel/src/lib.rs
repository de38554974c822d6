//! Logical channel pipelines for secure element applets
//!
//! This crate runs sequences of APDU commands against an applet through a
//! logical channel, handling:
//!
//! - mutual exclusion of runs against the same applet ([`ChannelGate`])
//! - opening, reusing and closing the channel, with its handle persisted in a
//!   [`KeyValueStore`] so a restarted process can recover it
//! - `61 XX` response continuations ([`ResponseReassembler`])
//! - sessions that keep channels open between runs ([`SessionManager`])
//! - delivery of exactly one outcome per run on a [`Dispatcher`] thread
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use nexum_apdu_channel::{
//!     ApduSender, BuildError, FileStore, LogicalChannelTransport, RequestBuilder,
//! };
//! use nexum_apdu_core::Aid;
//!
//! # fn run(transport: Arc<dyn LogicalChannelTransport>) -> Result<(), Box<dyn std::error::Error>> {
//! let aid = Aid::from_hex("A0000005591010FFFFFFFF8900000100")?;
//! let sender = ApduSender::builder(aid, transport)
//!     .store(Arc::new(FileStore::open("channels.json")?))
//!     .build()?;
//!
//! // close a channel a previous process may have left open
//! sender.close_any_open_channel();
//!
//! let payload = sender.send_and_wait(|_select: &[u8], request: &mut RequestBuilder| {
//!     request.add_store_data(vec![0xBF, 0x2D, 0x00]);
//!     Ok::<_, BuildError>(())
//! })?;
//! println!("{}", hex::encode(payload));
//! # Ok(())
//! # }
//! ```
#![cfg_attr(not(test), warn(unused_crate_dependencies))]
#![forbid(unsafe_code)]
#![warn(missing_docs, rustdoc::missing_crate_level_docs)]

pub mod callback;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod executor;
pub mod gate;
pub mod lifecycle;
pub mod reassembler;
pub mod registry;
pub mod request;
pub mod sender;
pub mod session;
pub mod store;
pub mod transport;

pub use callback::ResultCallback;
pub use config::SenderConfig;
pub use dispatcher::Dispatcher;
pub use error::{PipelineError, StoreError};
pub use executor::CommandPipeline;
pub use gate::{ChannelGate, GatePermit};
pub use lifecycle::{ChannelLifecycle, OpenChannel};
pub use reassembler::ResponseReassembler;
pub use registry::{ChannelRegistry, ChannelSlot};
pub use request::{BuildError, RequestBuilder, RequestProvider};
pub use sender::{ApduSender, ApduSenderBuilder};
pub use session::{ChannelOwner, NoSessions, SessionManager, SessionTracker};
pub use store::{FileStore, KeyValueStore, MemoryStore, StoreEdit, StoredValue};
pub use transport::{
    LogicalChannelTransport, ManagedChannelTransport, OpenChannelResponse, OpenChannelStatus,
};

/// Prelude module containing commonly used traits and types
pub mod prelude {
    pub use crate::{
        ApduSender, BuildError, KeyValueStore, LogicalChannelTransport, PipelineError,
        RequestBuilder, RequestProvider, ResultCallback, SenderConfig, SessionManager,
        SessionTracker,
    };
}
