//! # Kernel-routing service.
//!
//! Owns a raw RTNETLINK socket subscribed to the IPv4 and IPv6 route
//! multicast groups and mediates between it and event clients.
//!
//! **Query path.** A client pushes a NETLINK event whose payload is a
//! [`NetlinkExchange`] of kind Query. The service assigns the next
//! sequence number, sends a `NLM_F_REQUEST|NLM_F_DUMP` request for the
//! query kind, and records the exchange in the in-flight table so replies
//! flow back to the caller.
//!
//! **Reply path.** Each received message is correlated by sequence number;
//! the matched exchange's reply queue grows by one copy and the caller
//! gets a NETLINK event. Multi-part dumps keep their entry until
//! DONE/ERROR/OVERRUN.
//!
//! **Route-watch path.** NEWROUTE/DELROUTE messages fan out to every
//! RouteWatch exchange. Watches live until their owner deregisters.
//!
//! Query state machine:
//! ```text
//! INITIAL ─► SENT (request sent)
//! SENT ─► FILLING (first reply, multi-part flag set)
//! FILLING ─► FILLING (intermediate replies)
//! FILLING ─► DONE (DONE/ERROR/OVERRUN)
//! SENT ─► DONE (single reply, flag clear)
//! DONE ─► entry removed
//! ```
//!
//! Socket I/O is non-blocking: when the socket is drained the worker
//! services its own inbox with a bounded timeout, honoring QUIT and
//! accepting new client requests. Sequence numbers wrap counter-only,
//! skipping zero.

mod table;

use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicU32, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, error, warn};
use netlink_packet_core::{
    NetlinkBuffer, NetlinkMessage, NetlinkPayload, NLM_F_DUMP, NLM_F_REQUEST,
};
use netlink_packet_route::address::AddressMessage;
use netlink_packet_route::link::LinkMessage;
use netlink_packet_route::neighbour::NeighbourMessage;
use netlink_packet_route::route::RouteMessage;
use netlink_packet_route::rule::RuleMessage;
use netlink_packet_route::tc::TcMessage;
use netlink_packet_route::RouteNetlinkMessage;
use netlink_sys::{protocols::NETLINK_ROUTE, Socket, SocketAddr};

use crate::config::Config;
use crate::error::RuntimeError;
use crate::events::{Event, EventClient, EventKind};
use crate::services::SystemServices;
use crate::util::page_size;
use crate::worker::Worker;

use table::InFlightTable;

// linux/rtnetlink.h multicast masks.
const RTMGRP_IPV4_ROUTE: u32 = 0x40;
const RTMGRP_IPV6_ROUTE: u32 = 0x400;

/// Dump kinds a Query exchange may request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetlinkQuery {
    Link,
    Address,
    Route,
    Neighbour,
    Rule,
    QueueDiscipline,
    TrafficClass,
    TrafficFilter,
}

impl NetlinkQuery {
    fn request(self) -> RouteNetlinkMessage {
        match self {
            NetlinkQuery::Link => RouteNetlinkMessage::GetLink(LinkMessage::default()),
            NetlinkQuery::Address => RouteNetlinkMessage::GetAddress(AddressMessage::default()),
            NetlinkQuery::Route => RouteNetlinkMessage::GetRoute(RouteMessage::default()),
            NetlinkQuery::Neighbour => {
                RouteNetlinkMessage::GetNeighbour(NeighbourMessage::default())
            }
            NetlinkQuery::Rule => RouteNetlinkMessage::GetRule(RuleMessage::default()),
            NetlinkQuery::QueueDiscipline => {
                RouteNetlinkMessage::GetQueueDiscipline(TcMessage::default())
            }
            NetlinkQuery::TrafficClass => {
                RouteNetlinkMessage::GetTrafficClass(TcMessage::default())
            }
            NetlinkQuery::TrafficFilter => {
                RouteNetlinkMessage::GetTrafficFilter(TcMessage::default())
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeKind {
    /// One dump request, finitely many replies.
    Query,
    /// Long-lived subscription to route changes.
    RouteWatch,
}

/// Shared state of one request/reply conversation with the kernel.
///
/// The exchange travels inside NETLINK events. The caller keeps its `Arc`
/// and drains replies with [`pop_reply`](Self::pop_reply) as notification
/// events arrive. Exchanges are the one event payload that refuses
/// cloning: two consumers racing over one reply queue would tear the
/// conversation apart.
#[derive(Debug)]
pub struct NetlinkExchange {
    kind: ExchangeKind,
    query: Option<NetlinkQuery>,
    sequence: AtomicU32,
    replies: Mutex<VecDeque<NetlinkMessage<RouteNetlinkMessage>>>,
}

impl NetlinkExchange {
    pub fn query(kind: NetlinkQuery) -> Arc<Self> {
        Arc::new(Self {
            kind: ExchangeKind::Query,
            query: Some(kind),
            sequence: AtomicU32::new(0),
            replies: Mutex::new(VecDeque::new()),
        })
    }

    pub fn route_watch() -> Arc<Self> {
        Arc::new(Self {
            kind: ExchangeKind::RouteWatch,
            query: None,
            sequence: AtomicU32::new(0),
            replies: Mutex::new(VecDeque::new()),
        })
    }

    pub fn kind(&self) -> ExchangeKind {
        self.kind
    }

    pub fn query_kind(&self) -> Option<NetlinkQuery> {
        self.query
    }

    /// Sequence number assigned when the request was sent; zero until then.
    pub fn sequence(&self) -> u32 {
        self.sequence.load(AtomicOrdering::Acquire)
    }

    pub(crate) fn set_sequence(&self, seq: u32) {
        self.sequence.store(seq, AtomicOrdering::Release);
    }

    /// Takes the oldest unconsumed reply, if any.
    pub fn pop_reply(&self) -> Option<NetlinkMessage<RouteNetlinkMessage>> {
        self.replies
            .lock()
            .expect("netlink reply lock poisoned")
            .pop_front()
    }

    pub(crate) fn push_reply(&self, msg: NetlinkMessage<RouteNetlinkMessage>) {
        self.replies
            .lock()
            .expect("netlink reply lock poisoned")
            .push_back(msg);
    }
}

/// Worker owning the RTNETLINK socket.
pub struct NetlinkService {
    socket: Socket,
    table: InFlightTable,
    seq: u32,
    wait: Duration,
    buf: Vec<u8>,
    buf_size: usize,
}

impl NetlinkService {
    /// Opens and binds the routing socket and installs the given client id
    /// as the process singleton service address. Fails with
    /// `AlreadyExists` on a second construction.
    pub fn new(
        services: &SystemServices,
        cfg: &Config,
        address: crate::events::ClientId,
    ) -> Result<Box<Self>, RuntimeError> {
        let mut socket =
            Socket::new(NETLINK_ROUTE).map_err(|e| RuntimeError::os("netlink socket", e))?;
        let local = SocketAddr::new(std::process::id(), RTMGRP_IPV4_ROUTE | RTMGRP_IPV6_ROUTE);
        socket
            .bind(&local)
            .map_err(|e| RuntimeError::os("netlink bind", e))?;
        socket
            .set_non_blocking(true)
            .map_err(|e| RuntimeError::os("netlink set_non_blocking", e))?;

        services.install_netlink(address)?;

        let buf_size = page_size();
        Ok(Box::new(Self {
            socket,
            table: InFlightTable::new(),
            seq: 0,
            wait: cfg.netlink_wait,
            buf: Vec::with_capacity(buf_size),
            buf_size,
        }))
    }

    fn next_sequence(&mut self) -> u32 {
        self.seq = self.seq.wrapping_add(1);
        if self.seq == 0 {
            self.seq = 1;
        }
        self.seq
    }

    /// Handles a client-emitted NETLINK event: sends the dump request for
    /// queries, and records the exchange so replies reach the caller.
    fn process_request(&mut self, event: Event) {
        let Some(exchange) = event.netlink_exchange() else {
            debug!("netlink: event without exchange payload");
            return;
        };
        let Some(caller) = event.source() else {
            warn!("netlink: request without a source client");
            return;
        };

        if exchange.kind() == ExchangeKind::Query {
            self.send_query(exchange);
        }
        self.table.register(exchange.clone(), caller);
    }

    fn send_query(&mut self, exchange: &Arc<NetlinkExchange>) {
        let Some(kind) = exchange.query_kind() else {
            return;
        };
        let seq = self.next_sequence();
        exchange.set_sequence(seq);

        let mut msg = NetlinkMessage::from(kind.request());
        msg.header.flags = NLM_F_REQUEST | NLM_F_DUMP;
        msg.header.sequence_number = seq;
        msg.header.port_number = std::process::id();
        msg.finalize();

        let mut out = vec![0u8; msg.buffer_len()];
        msg.serialize(&mut out);
        // The socket is unconnected; address the kernel explicitly.
        let kernel = SocketAddr::new(0, 0);
        if let Err(err) = self.socket.send_to(&out, &kernel, 0) {
            error!("netlink: send: {err}");
        }
    }

    /// Walks every message in one received datagram.
    fn process_datagram(&mut self, client: &EventClient, data: &[u8]) {
        let mut offset = 0;
        while offset < data.len() {
            let bytes = &data[offset..];
            let length = match NetlinkBuffer::new_checked(&bytes) {
                Ok(buffer) => buffer.length() as usize,
                Err(err) => {
                    warn!("netlink: truncated datagram: {err}");
                    return;
                }
            };
            if length == 0 {
                return;
            }

            match NetlinkMessage::<RouteNetlinkMessage>::deserialize(bytes) {
                Ok(msg) => {
                    match &msg.payload {
                        NetlinkPayload::Error(e) => error!("netlink: NLMSG_ERROR: {e:?}"),
                        NetlinkPayload::Overrun(_) => error!("netlink: NLMSG_OVERRUN"),
                        _ => {}
                    }
                    self.table.prune(|id| client.bus().is_registered(id));
                    for (caller, exchange) in self.table.handle_message(&msg) {
                        if !client.push_to(caller, Event::netlink(exchange)) {
                            debug!("netlink: caller {caller} is gone");
                        }
                    }
                }
                Err(err) => warn!("netlink: undecodable message: {err}"),
            }

            // Messages are 4-byte aligned within a datagram.
            offset += (length + 3) & !3;
        }
    }
}

#[async_trait]
impl Worker for NetlinkService {
    fn name(&self) -> &str {
        "netlink-service"
    }

    async fn run(mut self: Box<Self>, client: EventClient) {
        debug!("Netlink service started.");

        loop {
            self.buf.clear();
            self.buf.reserve(self.buf_size);
            match self.socket.recv(&mut self.buf, 0) {
                Ok(len) => {
                    let data = std::mem::take(&mut self.buf);
                    self.process_datagram(&client, &data[..len.min(data.len())]);
                    self.buf = data;
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                    match client.pop_wait(Some(self.wait)).await {
                        Some(ev) => match ev.kind() {
                            EventKind::Quit => {
                                debug!("Netlink service terminated.");
                                return;
                            }
                            EventKind::Netlink => self.process_request(ev),
                            kind => debug!("netlink: unhandled event: {kind:?}"),
                        },
                        None => {}
                    }
                }
                Err(err) => {
                    // A dead routing socket would silently lose kernel
                    // state changes; stop the whole process instead.
                    error!("netlink: recv: {err}");
                    let _ = client.broadcast(Event::quit());
                    return;
                }
            }
        }
    }
}
