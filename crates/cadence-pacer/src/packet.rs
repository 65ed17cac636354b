//! # Packet Model
//!
//! The scheduler's view of an outgoing packet: a payload buffer plus the
//! metadata pacing decisions are made on — media kind, owning stream, and
//! sizes. Packets arrive fully formed from the packetizers; nothing here
//! touches wire format.

use bytes::Bytes;
use std::fmt;

use crate::units::{DataSize, TimeDelta, Timestamp};

/// RTP-style stream identifier.
pub type Ssrc = u32;

// ─── MediaKind ──────────────────────────────────────────────────────────────

/// Traffic classification of a packet, as tagged by the producer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaKind {
    /// Interactive low-latency media (voice).
    Audio,
    /// Bulk media frames.
    Video,
    /// Retransmitted media.
    Retransmission,
    /// Forward-error-correction repair data.
    ForwardErrorCorrection,
    /// Filler traffic with no media content.
    Padding,
}

impl MediaKind {
    /// Scheduling priority for this kind. Lower is sent first.
    pub fn priority(self) -> PacketPriority {
        match self {
            MediaKind::Audio => PacketPriority::Interactive,
            MediaKind::Retransmission => PacketPriority::Retransmission,
            MediaKind::Video | MediaKind::ForwardErrorCorrection => PacketPriority::Bulk,
            MediaKind::Padding => PacketPriority::Padding,
        }
    }

    pub(crate) fn index(self) -> usize {
        match self {
            MediaKind::Audio => 0,
            MediaKind::Video => 1,
            MediaKind::Retransmission => 2,
            MediaKind::ForwardErrorCorrection => 3,
            MediaKind::Padding => 4,
        }
    }

    pub(crate) const COUNT: usize = 5;
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MediaKind::Audio => "audio",
            MediaKind::Video => "video",
            MediaKind::Retransmission => "rtx",
            MediaKind::ForwardErrorCorrection => "fec",
            MediaKind::Padding => "padding",
        };
        write!(f, "{s}")
    }
}

// ─── PacketPriority ─────────────────────────────────────────────────────────

/// The closed set of scheduling levels. Round-robin fairness applies among
/// streams within a level, never across levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(usize)]
pub enum PacketPriority {
    /// Interactive low-latency traffic (audio). Always first.
    Interactive = 0,
    /// Retransmissions — late media is better than lost media.
    Retransmission = 1,
    /// Bulk media: video frames and FEC repair.
    Bulk = 2,
    /// Filler traffic. Only sent when nothing else is waiting.
    Padding = 3,
}

impl PacketPriority {
    pub(crate) const COUNT: usize = 4;

    pub fn index(self) -> usize {
        self as usize
    }
}

// ─── QueuedPacket ───────────────────────────────────────────────────────────

/// A packet waiting in (or popped from) the pacer queue.
///
/// Owns its payload buffer. Ownership transfers to the caller on pop and to
/// the [`PacketSender`](crate::controller::PacketSender) on transmission.
#[derive(Debug, Clone)]
pub struct QueuedPacket {
    /// Traffic class, as tagged by the producer.
    pub kind: MediaKind,
    /// Owning stream.
    pub ssrc: Ssrc,
    /// Payload buffer (ref-counted, cheap to clone).
    pub payload: Bytes,
    /// Padding bytes carried in addition to the payload.
    pub padding_size: DataSize,
    /// When the packet entered the queue. Stamped on push.
    pub enqueue_time: Timestamp,
    /// Time spent queued, pause-adjusted. Stamped on pop.
    pub time_in_queue: Option<TimeDelta>,
    /// Pause-time total at enqueue, for queue-time accounting.
    pub(crate) pause_sum_at_enqueue: TimeDelta,
}

impl QueuedPacket {
    /// Create a packet ready for [`enqueue_packet`](crate::controller::PacingController::enqueue_packet).
    pub fn new(kind: MediaKind, ssrc: Ssrc, payload: Bytes) -> Self {
        QueuedPacket {
            kind,
            ssrc,
            payload,
            padding_size: DataSize::ZERO,
            enqueue_time: Timestamp::minus_infinity(),
            time_in_queue: None,
            pause_sum_at_enqueue: TimeDelta::ZERO,
        }
    }

    /// A pure padding packet of the given size (no payload buffer).
    pub fn padding(ssrc: Ssrc, size: DataSize) -> Self {
        QueuedPacket {
            kind: MediaKind::Padding,
            ssrc,
            payload: Bytes::new(),
            padding_size: size,
            enqueue_time: Timestamp::minus_infinity(),
            time_in_queue: None,
            pause_sum_at_enqueue: TimeDelta::ZERO,
        }
    }

    pub fn payload_size(&self) -> DataSize {
        DataSize::bytes(self.payload.len() as i64)
    }

    /// Total bytes this packet puts on the wire (payload + padding).
    pub fn size(&self) -> DataSize {
        self.payload_size() + self.padding_size
    }

    pub fn priority(&self) -> PacketPriority {
        self.kind.priority()
    }
}
