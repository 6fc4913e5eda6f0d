//! Packet routing: maps a message-type id to a handler factory.

use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};

use hearth_core::{Envelope, PacketKind, Payload};
use tracing::{debug, error, warn};

use crate::network::SlotId;
use crate::service::registry::ServiceRegistry;
use crate::telemetry::metric_names;

// ---------------------------------------------------------------------------
// Handler traits
// ---------------------------------------------------------------------------

/// A packet instance ready to run. Built fresh for every inbound message.
pub trait PacketHandler: Send {
    /// Runs on the session event loop; must not block.
    ///
    /// # Errors
    ///
    /// Any error is logged at the dispatch boundary and goes no further.
    fn handle(self: Box<Self>, registry: &ServiceRegistry, sender: SlotId) -> anyhow::Result<()>;
}

/// A handler bound to a catalogued packet kind.
pub trait Packet: PacketHandler + Sized + 'static {
    const KIND: PacketKind;

    /// Builds the handler from the envelope's `data` object.
    ///
    /// # Errors
    ///
    /// Returns an error when `data` does not have the expected shape.
    fn from_payload(data: Payload) -> anyhow::Result<Self>;
}

/// Constructs a handler from a message payload.
pub type HandlerFactory = fn(Payload) -> anyhow::Result<Box<dyn PacketHandler>>;

fn build<P: Packet>(data: Payload) -> anyhow::Result<Box<dyn PacketHandler>> {
    Ok(Box::new(P::from_payload(data)?))
}

/// A single dispatch table entry.
#[derive(Debug, Clone, Copy)]
pub struct Route {
    pub name: &'static str,
    pub factory: HandlerFactory,
}

/// What happened to a dispatched envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The handler ran to completion.
    Handled,
    /// No route for the id; ignored.
    Unrouted,
    /// The payload did not match the packet's shape.
    Rejected,
    /// The handler returned an error.
    Failed,
    /// The handler panicked.
    Panicked,
}

impl DispatchOutcome {
    fn label(self) -> &'static str {
        match self {
            Self::Handled => "handled",
            Self::Unrouted => "unrouted",
            Self::Rejected => "rejected",
            Self::Failed => "failed",
            Self::Panicked => "panicked",
        }
    }
}

// ---------------------------------------------------------------------------
// DispatchTable
// ---------------------------------------------------------------------------

/// Fixed mapping from message-type id to handler factory.
///
/// Built before the dispatcher is constructed and read-only afterwards.
#[derive(Debug, Clone, Default)]
pub struct DispatchTable {
    routes: BTreeMap<u64, Route>,
}

impl DispatchTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Table with every packet handler shipped with the server.
    #[must_use]
    pub fn standard() -> Self {
        Self::new().with::<super::handlers::SignIn>()
    }

    /// Routes `P::KIND` to `P`. A later entry for the same id replaces the
    /// earlier one.
    #[must_use]
    pub fn with<P: Packet>(mut self) -> Self {
        self.register::<P>();
        self
    }

    pub fn register<P: Packet>(&mut self) -> &mut Self {
        self.route(P::KIND.id(), P::KIND.name(), build::<P>)
    }

    /// Routes an arbitrary id, catalogued or not.
    pub fn route(&mut self, id: u64, name: &'static str, factory: HandlerFactory) -> &mut Self {
        self.routes.insert(id, Route { name, factory });
        self
    }

    #[must_use]
    pub fn lookup(&self, id: u64) -> Option<&Route> {
        self.routes.get(&id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Routed ids in ascending order.
    pub fn ids(&self) -> impl Iterator<Item = u64> + '_ {
        self.routes.keys().copied()
    }

    /// Builds and runs the handler for `envelope`.
    ///
    /// Unknown ids are silently ignored. Payload, handler, and panic
    /// failures are logged and contained here; none reach the caller.
    pub fn dispatch(
        &self,
        registry: &ServiceRegistry,
        sender: SlotId,
        envelope: Envelope,
    ) -> DispatchOutcome {
        let Some((id, route)) = envelope
            .message_id()
            .and_then(|id| self.lookup(id).map(|route| (id, *route)))
        else {
            debug!(slot = %sender, id = %envelope.id, "no handler for message id");
            metrics::counter!(metric_names::PACKETS_UNROUTED).increment(1);
            return DispatchOutcome::Unrouted;
        };

        let outcome = catch_unwind(AssertUnwindSafe(|| {
            let handler = match (route.factory)(envelope.data) {
                Ok(handler) => handler,
                Err(err) => {
                    warn!(slot = %sender, id, packet = route.name, error = %err, "payload rejected");
                    return DispatchOutcome::Rejected;
                }
            };
            match handler.handle(registry, sender) {
                Ok(()) => DispatchOutcome::Handled,
                Err(err) => {
                    error!(slot = %sender, id, packet = route.name, error = %err, "handler failed");
                    DispatchOutcome::Failed
                }
            }
        }))
        .unwrap_or_else(|_| {
            error!(slot = %sender, id, packet = route.name, "handler panicked");
            DispatchOutcome::Panicked
        });

        if outcome == DispatchOutcome::Handled {
            metrics::counter!(metric_names::PACKETS_DISPATCHED, "packet" => route.name).increment(1);
        } else {
            metrics::counter!(
                metric_names::HANDLER_FAILURES,
                "packet" => route.name,
                "outcome" => outcome.label()
            )
            .increment(1);
        }
        outcome
    }
}
