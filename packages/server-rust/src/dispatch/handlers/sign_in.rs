use hearth_core::{decode_payload, Credentials, Envelope, PacketKind, Payload};
use tracing::debug;

use crate::dispatch::table::{Packet, PacketHandler};
use crate::network::{ConnectionListener, SlotId};
use crate::service::registry::ServiceRegistry;

/// Message id of the reply sent back to a signing-in client.
pub const SIGN_IN_REPLY_ID: u64 = 2;

/// Sign-in request. Replies to the sender with the credentials it sent.
#[derive(Debug)]
pub struct SignIn {
    credentials: Credentials,
}

impl SignIn {
    #[must_use]
    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }
}

impl Packet for SignIn {
    const KIND: PacketKind = PacketKind::SignIn;

    fn from_payload(data: Payload) -> anyhow::Result<Self> {
        Ok(Self {
            credentials: decode_payload(data)?,
        })
    }
}

impl PacketHandler for SignIn {
    fn handle(self: Box<Self>, registry: &ServiceRegistry, sender: SlotId) -> anyhow::Result<()> {
        let Some(listener) = registry.get::<ConnectionListener>() else {
            debug!(slot = %sender, "listener unavailable; sign-in reply skipped");
            return Ok(());
        };

        let reply = Envelope::from_payload(SIGN_IN_REPLY_ID, &self.credentials)?;
        if !listener.send(sender, &reply) {
            debug!(slot = %sender, "sign-in reply not delivered");
        }
        Ok(())
    }
}
