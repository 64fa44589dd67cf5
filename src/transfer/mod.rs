//! Reliable transfer engine for udpft.
//!
//! Layers a request/response protocol over an unreliable datagram transport.
//!
//! # Architecture
//!
//! ```text
//! +--------------+     +--------------+     +--------------+
//! |   protocol   | <-- |   channel    | <-- |   ops::*     |
//! | (frame codec)|     | (send, wait, |     | (per-op state|
//! |              |     |   resend)    |     |  machines)   |
//! +--------------+     +--------------+     +--------------+
//!                                                  |
//!                                           +--------------+
//!                                           |   tracker    |
//!                                           | (bitmap +    |
//!                                           |  cursor)     |
//!                                           +--------------+
//! ```
//!
//! # Protocol
//!
//! Every operation is an Init -> (Data) -> Done handshake of fixed 1032-byte
//! frames. Bulk data is selective repeat: the receiving side keeps a
//! received-flag per frame index and asks for the lowest missing one.

pub mod channel;
pub mod protocol;
pub mod tracker;

pub use channel::{recv_any, Link, RetryPolicy};
pub use tracker::{FrameSource, Tracker};

pub use protocol::{
    CursorReport, DataFrame, Frame, LengthReply, Listing, NameRequest, Operation, Phase, Status,
    UploadInit, FRAME_BODY_SIZE, MAX_FILE_LEN, MAX_FRAMES, MESSAGE_SIZE, PAYLOAD_SIZE,
};
