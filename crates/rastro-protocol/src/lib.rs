//! Wire decoders for the supported tracker protocols: Suntech ST910/ST940
//! TCP frames, Coban TK102 compact text codes, and the SPOT Trace XML feed.
//!
//! Decoders turn one raw frame into zero or one canonical update and never
//! panic past their boundary; malformed input becomes a typed error (or an
//! `Unrecognized` report) for the transport layer to log and drop.

pub mod coban;
pub mod error;
pub mod frame;
pub mod spot;
pub mod suntech;

pub use coban::{parse_tcp_frame, CobanFrame, CobanParser};
pub use error::{ProtocolError, Result};
pub use frame::{classify, FrameKind, MIN_FRAME_LEN};
pub use spot::parse_feed;
pub use suntech::{ack_frame, parse_frame, SuntechFrame, SuntechMessageType};
