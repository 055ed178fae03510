//! Terminal attach: the client/runtime socket pairing and the ferry between them.

mod error;
mod proxy;
mod socket;

pub use error::{AttachError, AttachResult};
pub use proxy::{
    AttachChannel, AttachProxy, ChannelState, DEFAULT_CONNECT_TIMEOUT, Direction, FerryReport,
    PumpEnd, PumpReport,
};
pub use socket::{ClientSocket, Frame, FrameSink, FrameSocket, FrameStream, RuntimeSocket};
