//! Cross-process command/query runtime.
//!
//! The UI-facing initiator process never touches privileged resources
//! directly; it talks to the backend responder over a narrow message
//! channel. This module owns that channel end to end: the channel
//! registry, the wire format and framing, the error codec that carries
//! failures across the boundary, the initiator-side [`Transport`] and the
//! responder-side handler registry.

pub mod channels;
pub mod codec;
pub mod protocol;
pub mod responder;
pub mod transport;

pub use codec::{ErrorEnvelope, RemoteError};
pub use responder::{Responder, ResponderHandle};
pub use transport::Transport;
