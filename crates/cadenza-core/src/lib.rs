//! Cadenza core - cross-process command/query runtime.
//!
//! The Cadenza desktop app splits into a UI-facing initiator process and
//! a privileged responder process; this crate is the runtime between
//! them. It provides the message transport (sync and async call paths
//! with error marshaling), the datastore client that turns typed CRUD
//! calls into wire messages, and the concurrency primitives composed
//! around expensive calls: a TTL+LRU cache and a single-flight
//! coordinator.
//!
//! # Example
//!
//! ```rust,ignore
//! use cadenza_core::ipc::Transport;
//! use cadenza_core::store::{Collection, CollectionSpec, IndexSpec};
//! use std::sync::Arc;
//!
//! # async fn run(addr: std::net::SocketAddr) -> cadenza_core::Result<()> {
//! let transport = Arc::new(Transport::connect(addr).await?);
//! let tracks = Collection::open(
//!     transport,
//!     CollectionSpec::new("tracks", vec![IndexSpec::new("path", true)]),
//! )?;
//!
//! let all = tracks.find(serde_json::json!({}), serde_json::json!({})).await?;
//! println!("{} tracks", all.len());
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod cancel;
pub mod config;
pub mod error;
pub mod ipc;
pub mod single_flight;
pub mod store;

// Re-export commonly used types
pub use cache::Cache;
pub use cancel::{CancellationToken, CancelledError};
pub use error::{CoreError, Result};
pub use ipc::{ErrorEnvelope, RemoteError, Responder, ResponderHandle, Transport};
pub use single_flight::{Completion, SingleFlight};
pub use store::{Collection, CollectionSpec, IndexSpec};
