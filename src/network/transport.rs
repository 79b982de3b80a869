//! Datagram Transport
//!
//! One unicast socket for control traffic, one multicast socket joined to the
//! discovery group. Outbound envelopes that need acknowledgement are kept in a
//! retry queue keyed by sequence until the matching Ack arrives.
//!
//! Sending and receiving are split: [`Transport`] lives inside the session
//! controller (behind its lock) while [`TransportReceiver`] is owned by the
//! inbound poll task.

use std::collections::BTreeMap;
use std::io;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::Arc;
use std::time::Duration;

use socket2::{Domain, Protocol, Socket, Type};
use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use crate::game::field::PeerId;
use crate::network::config::NodeConfig;
use crate::network::protocol::{Envelope, Payload, ProtocolError, MAX_DATAGRAM_SIZE};

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Unicast socket could not be bound
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Requested address
        addr: SocketAddr,
        /// Cause
        source: io::Error,
    },

    /// Multicast socket could not join the discovery group
    #[error("failed to join multicast group {group}: {source}")]
    JoinGroup {
        /// Discovery group
        group: SocketAddrV4,
        /// Cause
        source: io::Error,
    },

    /// Other socket failure
    #[error("socket error: {0}")]
    Io(#[from] io::Error),

    /// Envelope could not be encoded or decoded
    #[error(transparent)]
    Codec(#[from] ProtocolError),
}

// =============================================================================
// SOCKETS
// =============================================================================

/// Non-blocking datagram send side.
pub trait DatagramSocket: Send + Sync + 'static {
    /// Send one datagram without waiting.
    fn send_datagram(&self, buf: &[u8], target: SocketAddr) -> io::Result<usize>;

    /// Bound address.
    fn local_addr(&self) -> io::Result<SocketAddr>;
}

impl DatagramSocket for UdpSocket {
    fn send_datagram(&self, buf: &[u8], target: SocketAddr) -> io::Result<usize> {
        self.try_send_to(buf, target)
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        UdpSocket::local_addr(self)
    }
}

/// Which socket a datagram arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    /// Point-to-point control traffic
    Unicast,
    /// Discovery group
    Multicast,
}

/// A decoded inbound datagram.
#[derive(Debug, Clone, PartialEq)]
pub struct Received {
    /// Decoded envelope
    pub envelope: Envelope,
    /// Datagram source
    pub from: SocketAddr,
    /// Arrival socket
    pub channel: Channel,
}

// =============================================================================
// RETRY QUEUE
// =============================================================================

/// A sent envelope awaiting acknowledgement.
#[derive(Debug, Clone)]
pub struct PendingSend {
    /// Envelope as sent
    pub envelope: Envelope,
    /// Where it goes
    pub destination: SocketAddr,
    /// Last (re)transmission
    pub last_sent_at: Instant,
    /// Retransmissions so far
    pub retry_count: u32,
}

/// Send half of the transport.
pub struct Transport {
    socket: Arc<dyn DatagramSocket>,
    group: SocketAddr,
    next_sequence: u64,
    pending: BTreeMap<u64, PendingSend>,
    last_seen: BTreeMap<SocketAddr, Instant>,
    last_sent: BTreeMap<SocketAddr, Instant>,
}

impl Transport {
    /// Wrap a bound socket.
    pub fn new(socket: Arc<dyn DatagramSocket>, group: SocketAddr) -> Self {
        Self {
            socket,
            group,
            next_sequence: 0,
            pending: BTreeMap::new(),
            last_seen: BTreeMap::new(),
            last_sent: BTreeMap::new(),
        }
    }

    /// Bind the unicast socket and join the discovery group.
    ///
    /// Either failure is fatal for the node.
    pub async fn bind(config: &NodeConfig) -> Result<(Transport, TransportReceiver), TransportError> {
        let unicast = UdpSocket::bind(config.bind_addr)
            .await
            .map_err(|source| TransportError::Bind { addr: config.bind_addr, source })?;
        let unicast = Arc::new(unicast);

        let multicast = join_group(config.multicast_group)
            .map_err(|source| TransportError::JoinGroup { group: config.multicast_group, source })?;

        let group = SocketAddr::V4(config.multicast_group);
        let transport = Transport::new(unicast.clone(), group);
        let receiver = TransportReceiver::new(unicast, Some(multicast));
        Ok((transport, receiver))
    }

    /// Bound unicast address.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Allocate the next sequence number.
    pub fn next_sequence(&mut self) -> u64 {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        sequence
    }

    /// Build an envelope with a fresh sequence and send it to `destination`.
    pub fn send(
        &mut self,
        payload: Payload,
        sender_id: Option<PeerId>,
        receiver_id: Option<PeerId>,
        destination: SocketAddr,
    ) -> u64 {
        let sequence = self.next_sequence();
        let envelope = Envelope::new(sequence, payload)
            .with_sender(sender_id)
            .with_receiver(receiver_id);
        self.send_unicast(envelope, destination);
        sequence
    }

    /// Send `envelope`, tracking it for retransmission if its kind needs an Ack.
    pub fn send_unicast(&mut self, envelope: Envelope, destination: SocketAddr) {
        if !self.transmit(&envelope, destination) {
            return;
        }

        if envelope.kind().requires_ack() {
            self.pending.insert(envelope.sequence, PendingSend {
                envelope,
                destination,
                last_sent_at: Instant::now(),
                retry_count: 0,
            });
        }
    }

    /// Acknowledge `sequence` back to `destination`.
    pub fn send_ack(
        &mut self,
        sequence: u64,
        sender_id: Option<PeerId>,
        receiver_id: Option<PeerId>,
        destination: SocketAddr,
    ) {
        let ack = Envelope::new(sequence, Payload::Ack)
            .with_sender(sender_id)
            .with_receiver(receiver_id);
        self.transmit(&ack, destination);
    }

    /// Broadcast to the discovery group. Never retransmitted.
    pub fn send_multicast(&mut self, payload: Payload, sender_id: Option<PeerId>) {
        let sequence = self.next_sequence();
        let envelope = Envelope::new(sequence, payload).with_sender(sender_id);
        let group = self.group;
        self.transmit(&envelope, group);
    }

    /// Encode and send once. Returns `false` only if encoding failed.
    fn transmit(&mut self, envelope: &Envelope, destination: SocketAddr) -> bool {
        let bytes = match envelope.to_bytes() {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(sequence = envelope.sequence, kind = ?envelope.kind(), error = %e, "dropping unencodable envelope");
                return false;
            }
        };

        trace!(sequence = envelope.sequence, kind = ?envelope.kind(), %destination, len = bytes.len(), "send");
        if let Err(e) = self.socket.send_datagram(&bytes, destination) {
            warn!(sequence = envelope.sequence, %destination, error = %e, "send failed");
        }
        self.last_sent.insert(destination, Instant::now());
        true
    }

    /// Drop the pending send for `sequence`.
    pub fn ack(&mut self, sequence: u64) -> Option<PendingSend> {
        let removed = self.pending.remove(&sequence);
        if removed.is_some() {
            trace!(sequence, "acknowledged");
        }
        removed
    }

    /// Resend every pending envelope older than `interval`. Returns how many went out.
    pub fn retransmit_due(&mut self, interval: Duration) -> usize {
        let now = Instant::now();
        let due: Vec<u64> = self
            .pending
            .iter()
            .filter(|(_, p)| now.duration_since(p.last_sent_at) >= interval)
            .map(|(seq, _)| *seq)
            .collect();

        for sequence in &due {
            let Some(pending) = self.pending.get_mut(sequence) else { continue };
            pending.last_sent_at = now;
            pending.retry_count += 1;
            let (envelope, destination) = (pending.envelope.clone(), pending.destination);
            self.transmit(&envelope, destination);
        }

        if !due.is_empty() {
            debug!(count = due.len(), "retransmitted");
        }
        due.len()
    }

    /// Redirect every pending envelope bound for `old` to `new`.
    pub fn rebind_destination(&mut self, old: SocketAddr, new: SocketAddr) -> usize {
        let mut moved = 0;
        for pending in self.pending.values_mut() {
            if pending.destination == old {
                pending.destination = new;
                moved += 1;
            }
        }
        if moved > 0 {
            debug!(%old, %new, moved, "rebound pending sends");
        }
        moved
    }

    /// Note that a datagram just arrived from `addr`.
    pub fn record_inbound(&mut self, addr: SocketAddr) {
        self.last_seen.insert(addr, Instant::now());
    }

    /// Restart the liveness clock for `addr` as if it had just been heard.
    pub fn touch(&mut self, addr: SocketAddr) {
        self.record_inbound(addr);
    }

    /// Time since `addr` was last heard; `Duration::MAX` if never.
    pub fn time_since_last_seen(&self, addr: SocketAddr) -> Duration {
        self.last_seen
            .get(&addr)
            .map(|at| Instant::now().duration_since(*at))
            .unwrap_or(Duration::MAX)
    }

    /// Time since anything was sent to `addr`; `Duration::MAX` if never.
    pub fn time_since_last_sent(&self, addr: SocketAddr) -> Duration {
        self.last_sent
            .get(&addr)
            .map(|at| Instant::now().duration_since(*at))
            .unwrap_or(Duration::MAX)
    }

    /// Drop all pending sends and clocks.
    pub fn clear(&mut self) {
        self.pending.clear();
        self.last_seen.clear();
        self.last_sent.clear();
    }

    /// Pending send for `sequence`, if still unacknowledged.
    pub fn pending(&self, sequence: u64) -> Option<&PendingSend> {
        self.pending.get(&sequence)
    }

    /// Number of unacknowledged sends.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

fn join_group(group: SocketAddrV4) -> io::Result<UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    #[cfg(unix)]
    socket.set_reuse_port(true)?;

    let bind_addr = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, group.port());
    socket.bind(&SocketAddr::V4(bind_addr).into())?;
    socket.join_multicast_v4(group.ip(), &Ipv4Addr::UNSPECIFIED)?;
    socket.set_multicast_loop_v4(true)?;
    socket.set_nonblocking(true)?;

    UdpSocket::from_std(socket.into())
}

// =============================================================================
// RECEIVE SIDE
// =============================================================================

/// Receive half of the transport, owned by the poll task.
pub struct TransportReceiver {
    unicast: Arc<UdpSocket>,
    multicast: Option<UdpSocket>,
    unicast_buf: Vec<u8>,
    multicast_buf: Vec<u8>,
}

impl TransportReceiver {
    /// Wrap bound sockets.
    pub fn new(unicast: Arc<UdpSocket>, multicast: Option<UdpSocket>) -> Self {
        Self {
            unicast,
            multicast,
            unicast_buf: vec![0; MAX_DATAGRAM_SIZE],
            multicast_buf: vec![0; MAX_DATAGRAM_SIZE],
        }
    }

    /// Wait up to `timeout` for one datagram on either socket.
    ///
    /// Returns `None` on timeout, socket error or an undecodable datagram.
    pub async fn receive(&mut self, timeout: Duration) -> Option<Received> {
        let Self { unicast, multicast, unicast_buf, multicast_buf } = self;

        let on_multicast = async {
            match multicast {
                Some(socket) => socket.recv_from(multicast_buf).await,
                None => std::future::pending().await,
            }
        };

        let result = tokio::time::timeout(timeout, async {
            tokio::select! {
                r = unicast.recv_from(unicast_buf) => r.map(|(len, from)| (len, from, Channel::Unicast)),
                r = on_multicast => r.map(|(len, from)| (len, from, Channel::Multicast)),
            }
        })
        .await;

        let (len, from, channel) = match result {
            Err(_elapsed) => return None,
            Ok(Err(e)) => {
                warn!(error = %e, "receive failed");
                return None;
            }
            Ok(Ok(received)) => received,
        };

        let buf = match channel {
            Channel::Unicast => &unicast_buf[..len],
            Channel::Multicast => &multicast_buf[..len],
        };
        match Envelope::from_bytes(buf) {
            Ok(envelope) => {
                trace!(sequence = envelope.sequence, kind = ?envelope.kind(), %from, ?channel, "recv");
                Some(Received { envelope, from, channel })
            }
            Err(e) => {
                debug!(%from, error = %e, "dropping undecodable datagram");
                None
            }
        }
    }
}

// =============================================================================
// IN-MEMORY SOCKET
// =============================================================================
