//! # In-flight table: outstanding queries and route watches.
//!
//! Every request accepted by the netlink service is recorded here until it
//! completes. Replies coming off the socket are correlated against the
//! table and fanned out to the owning clients.
//!
//! ## Rules
//! - A Query entry is erased after the first DONE/ERROR/OVERRUN reply, or
//!   after any reply when the multi-part flag is absent.
//! - RouteWatch entries are long-lived: every NEWROUTE and DELROUTE
//!   message is fanned out to them, in addition to any sequence-matched
//!   query. They are removed only when their owning client has
//!   deregistered.
//! - NOOP messages are dropped silently.
//! - Replies that match no entry are ignored (stale sequence numbers after
//!   a caller departed).

use std::sync::Arc;

use netlink_packet_core::{NetlinkMessage, NetlinkPayload, NLM_F_MULTIPART};
use netlink_packet_route::RouteNetlinkMessage;

use crate::events::ClientId;

use super::{ExchangeKind, NetlinkExchange};

struct Entry {
    exchange: Arc<NetlinkExchange>,
    caller: ClientId,
}

/// Ordered list of outstanding netlink exchanges.
pub(crate) struct InFlightTable {
    entries: Vec<Entry>,
}

impl InFlightTable {
    pub(crate) fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Records an exchange on behalf of `caller`; replies will be
    /// dispatched back to it.
    pub(crate) fn register(&mut self, exchange: Arc<NetlinkExchange>, caller: ClientId) {
        self.entries.push(Entry { exchange, caller });
    }

    /// Drops entries whose caller is no longer alive.
    pub(crate) fn prune(&mut self, alive: impl Fn(ClientId) -> bool) {
        self.entries.retain(|entry| alive(entry.caller));
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    /// Correlates one received message. Returns the (caller, exchange)
    /// pairs that must be notified with a NETLINK event; the message has
    /// already been copied into each returned exchange's reply queue.
    pub(crate) fn handle_message(
        &mut self,
        msg: &NetlinkMessage<RouteNetlinkMessage>,
    ) -> Vec<(ClientId, Arc<NetlinkExchange>)> {
        if matches!(msg.payload, NetlinkPayload::Noop) {
            return Vec::new();
        }

        let mut notify = Vec::new();

        if matches!(
            msg.payload,
            NetlinkPayload::InnerMessage(
                RouteNetlinkMessage::NewRoute(_) | RouteNetlinkMessage::DelRoute(_)
            )
        ) {
            for entry in &self.entries {
                if entry.exchange.kind() != ExchangeKind::RouteWatch {
                    continue;
                }
                entry.exchange.push_reply(msg.clone());
                notify.push((entry.caller, entry.exchange.clone()));
            }
        }

        let seq = msg.header.sequence_number;
        let Some(pos) = self.entries.iter().position(|entry| {
            entry.exchange.kind() == ExchangeKind::Query && entry.exchange.sequence() == seq
        }) else {
            return notify;
        };

        let entry = &self.entries[pos];
        entry.exchange.push_reply(msg.clone());
        notify.push((entry.caller, entry.exchange.clone()));

        let terminal = matches!(
            msg.payload,
            NetlinkPayload::Done(_) | NetlinkPayload::Error(_) | NetlinkPayload::Overrun(_)
        ) || msg.header.flags & NLM_F_MULTIPART == 0;
        if terminal {
            self.entries.remove(pos);
        }

        notify
    }
}
