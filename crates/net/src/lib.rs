#![warn(missing_docs)]
//! Networking for the voxel client: protocol types, the binary codec, the
//! decode worker pool and the websocket connection manager.

pub mod codec;
mod connection;
mod error;
mod protocol;
mod transport;
mod worker_pool;

pub use codec::{decode, encode};
pub use connection::{ConnectionConfig, ConnectionEvent, ConnectionManager, ConnectionState};
pub use error::{NetError, ProtocolError, TransportError, WorkerFailure};
pub use protocol::{ChatMessage, EntityDelta, EntityOperation, Message, MessageType, PeerInfo};
pub use transport::endpoint_url;
pub use worker_pool::{DecodeOutcome, JobHandle, WorkerPool};
