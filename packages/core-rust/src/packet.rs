//! Catalogue of known packet types and their wire identifiers.
//!
//! The id space on the wire is open: an id missing from this catalogue is
//! not a protocol error, it simply has no handler.

use serde_json::Number;

/// Wire identifiers for the packets the server knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u64)]
pub enum PacketKind {
    /// Client credentials for an existing account.
    SignIn = 1,
    /// Account creation request; also used as the sign-in reply.
    SignUp = 2,
    CreateActor = 3,
    SelectActor = 4,
    /// Message of the day.
    Motd = 5,
}

impl PacketKind {
    /// Every catalogued kind, in id order.
    pub const ALL: [PacketKind; 5] = [
        PacketKind::SignIn,
        PacketKind::SignUp,
        PacketKind::CreateActor,
        PacketKind::SelectActor,
        PacketKind::Motd,
    ];

    /// The numeric wire id.
    #[must_use]
    pub const fn id(self) -> u64 {
        self as u64
    }

    /// Human-readable name for logs.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::SignIn => "sign_in",
            Self::SignUp => "sign_up",
            Self::CreateActor => "create_actor",
            Self::SelectActor => "select_actor",
            Self::Motd => "motd",
        }
    }
}

/// Returned when converting an id that is not in the catalogue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("unknown packet id {0}")]
pub struct UnknownPacket(pub u64);

impl TryFrom<u64> for PacketKind {
    type Error = UnknownPacket;

    fn try_from(id: u64) -> Result<Self, Self::Error> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.id() == id)
            .ok_or(UnknownPacket(id))
    }
}

impl From<PacketKind> for u64 {
    fn from(kind: PacketKind) -> Self {
        kind.id()
    }
}

impl From<PacketKind> for Number {
    fn from(kind: PacketKind) -> Self {
        Number::from(kind.id())
    }
}
