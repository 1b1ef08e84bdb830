//! BitTorrent wire protocol codec.
//!
//! Pure (de)serialization of the two wire formats defined by BEP 3: the
//! handshake and the length-prefixed message frame. Nothing here owns a
//! socket or any protocol state.

pub mod handshake;
pub mod messages;
pub mod types;

// Re-export public API
pub use handshake::HandshakeCodec;
pub use messages::{MAX_MESSAGE_LENGTH, MessageCodec};
pub use types::{Message, MessageId, PROTOCOL_NAME, PeerHandshake, PeerId};
