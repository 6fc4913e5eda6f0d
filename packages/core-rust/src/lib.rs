//! `Hearth` Core: wire envelope, frame validation, and the packet catalogue.

pub mod envelope;
pub mod packet;
pub mod payload;

pub use envelope::{decode_frame, decode_text, Envelope, FrameError, Payload};
pub use packet::{PacketKind, UnknownPacket};
pub use payload::{decode_payload, Credentials};
