//! # Prioritized Packet Queue
//!
//! Holds not-yet-sent packets grouped by stream and priority level. Packets
//! go in per-stream in arrival order and come out priority-first, with
//! round-robin rotation among streams sharing a level so no stream starves
//! another at equal priority.
//!
//! Queue-time telemetry is kept with a lazy elapsed×count accumulator —
//! O(1) amortized per call, never a walk over queued packets. Pausing the
//! queue diverts elapsed time into a separate paused-time sum so paused
//! intervals never count against packet latency.

use std::collections::{HashMap, VecDeque};

use crate::packet::{MediaKind, PacketPriority, QueuedPacket, Ssrc};
use crate::units::{DataSize, TimeDelta, Timestamp};

/// Sentinel for "no active priority level".
const NO_ACTIVE_LEVEL: usize = PacketPriority::COUNT;

// ─── Configuration ──────────────────────────────────────────────────────────

/// Packet queue tuning parameters.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// How often empty per-stream state is swept out.
    pub cull_interval: TimeDelta,
    /// Idle time after which an empty stream entry is dropped.
    pub stream_timeout: TimeDelta,
}

impl Default for QueueConfig {
    fn default() -> Self {
        QueueConfig {
            cull_interval: TimeDelta::from_seconds(10),
            stream_timeout: TimeDelta::from_seconds(30),
        }
    }
}

// ─── Stream Queue ───────────────────────────────────────────────────────────

/// Per-stream FIFO lanes, one per priority level.
///
/// Created lazily on the first push for a stream id and culled once empty
/// and idle past [`QueueConfig::stream_timeout`].
struct StreamQueue {
    lanes: [VecDeque<QueuedPacket>; PacketPriority::COUNT],
    /// Last push or pop touching this stream.
    last_active: Timestamp,
}

impl StreamQueue {
    fn new(now: Timestamp) -> Self {
        StreamQueue {
            lanes: std::array::from_fn(|_| VecDeque::new()),
            last_active: now,
        }
    }

    fn is_empty(&self) -> bool {
        self.lanes.iter().all(VecDeque::is_empty)
    }
}

// ─── Packet Queue ───────────────────────────────────────────────────────────

/// Priority queue with per-level round-robin fairness among streams.
///
/// Capacity is unbounded — back-pressure is the caller's responsibility.
pub struct PacketQueue {
    config: QueueConfig,
    streams: HashMap<Ssrc, StreamQueue>,
    /// Per-priority service order. A stream id appears in `rotation[p]`
    /// exactly when its lane at `p` is non-empty.
    rotation: [VecDeque<Ssrc>; PacketPriority::COUNT],
    /// Index of the highest-priority non-empty level, `NO_ACTIVE_LEVEL`
    /// when the queue is empty.
    top_level: usize,

    packet_count: usize,
    queued_bytes: DataSize,
    kind_counts: [usize; MediaKind::COUNT],

    /// Sum of (unpaused) time-in-queue across currently queued packets.
    queue_time_sum: TimeDelta,
    /// Total time spent paused since creation. Monotonic.
    pause_time_sum: TimeDelta,
    paused: bool,
    last_update: Option<Timestamp>,
    last_cull: Option<Timestamp>,
}

impl PacketQueue {
    pub fn new(config: QueueConfig) -> Self {
        PacketQueue {
            config,
            streams: HashMap::new(),
            rotation: std::array::from_fn(|_| VecDeque::new()),
            top_level: NO_ACTIVE_LEVEL,
            packet_count: 0,
            queued_bytes: DataSize::ZERO,
            kind_counts: [0; MediaKind::COUNT],
            queue_time_sum: TimeDelta::ZERO,
            pause_time_sum: TimeDelta::ZERO,
            paused: false,
            last_update: None,
            last_cull: None,
        }
    }

    /// Admit a packet. Stamps the enqueue time and appends it to the tail
    /// of the owning stream's lane for the packet's priority level.
    pub fn push(&mut self, now: Timestamp, mut packet: QueuedPacket) {
        self.update_average_queue_time(now);

        packet.enqueue_time = now;
        packet.pause_sum_at_enqueue = self.pause_time_sum;

        let level = packet.priority().index();
        let ssrc = packet.ssrc;
        let size = packet.size();
        let kind = packet.kind;

        let stream = self
            .streams
            .entry(ssrc)
            .or_insert_with(|| StreamQueue::new(now));
        stream.last_active = now;
        if stream.lanes[level].is_empty() {
            // First packet at this level for the stream: it takes the back
            // of the service rotation.
            self.rotation[level].push_back(ssrc);
        }
        stream.lanes[level].push_back(packet);

        self.packet_count += 1;
        self.queued_bytes += size;
        self.kind_counts[kind.index()] += 1;
        self.top_level = self.top_level.min(level);

        self.maybe_cull(now);
    }

    /// Remove and return the packet at the front of the highest-priority
    /// non-empty level, taken from the stream whose turn it is.
    ///
    /// The returned packet carries its pause-adjusted time in queue.
    pub fn pop(&mut self, now: Timestamp) -> Option<QueuedPacket> {
        self.update_average_queue_time(now);

        let level = self.top_level;
        if level == NO_ACTIVE_LEVEL {
            return None;
        }
        debug_assert!(
            !self.rotation[level].is_empty(),
            "active level {level} has no streams in rotation"
        );

        let ssrc = self.rotation[level].pop_front()?;
        let stream = self.streams.get_mut(&ssrc)?;
        let mut packet = stream.lanes[level].pop_front()?;
        stream.last_active = now;
        if !stream.lanes[level].is_empty() {
            // Still packets at this level: the stream rotates to the back.
            self.rotation[level].push_back(ssrc);
        }

        let paused_while_queued = self
            .pause_time_sum
            .saturating_sub(packet.pause_sum_at_enqueue);
        let waited = now
            .saturating_duration_since(packet.enqueue_time)
            .saturating_sub(paused_while_queued)
            .clamped_non_negative();
        packet.time_in_queue = Some(waited);

        self.queue_time_sum = self.queue_time_sum.saturating_sub(waited);
        debug_assert!(
            self.queue_time_sum >= TimeDelta::ZERO,
            "queue time sum went negative"
        );
        self.queue_time_sum = self.queue_time_sum.clamped_non_negative();

        self.packet_count -= 1;
        self.queued_bytes = self.queued_bytes.saturating_sub(packet.size());
        self.kind_counts[packet.kind.index()] -= 1;
        if self.packet_count == 0 {
            // Clock-regression clamps can leave a residue; an empty queue
            // has zero queue time by definition.
            self.queue_time_sum = TimeDelta::ZERO;
        }

        // Advance the cursor past emptied levels.
        let mut level = level;
        while level < NO_ACTIVE_LEVEL && self.rotation[level].is_empty() {
            level += 1;
        }
        self.top_level = level;

        self.maybe_cull(now);
        Some(packet)
    }

    /// Advance the lazy queue-time accumulators to `now`.
    ///
    /// While unpaused, elapsed time accrues once per queued packet; while
    /// paused it accrues into the paused-time sum instead. Backward clock
    /// jumps clamp to zero elapsed.
    pub fn update_average_queue_time(&mut self, now: Timestamp) {
        let Some(last) = self.last_update else {
            self.last_update = Some(now);
            return;
        };
        let elapsed = now.saturating_duration_since(last);
        if self.paused {
            self.pause_time_sum += elapsed;
        } else {
            self.queue_time_sum += elapsed * self.packet_count as i64;
        }
        self.last_update = Some(now);
    }

    /// Switch pause accounting. Idempotent.
    pub fn set_pause_state(&mut self, paused: bool, now: Timestamp) {
        if self.paused == paused {
            return;
        }
        self.update_average_queue_time(now);
        self.paused = paused;
    }

    /// Mean time-in-queue over currently queued packets, as of the last
    /// accumulator update. Zero when empty.
    pub fn average_queue_time(&self) -> TimeDelta {
        if self.packet_count == 0 {
            return TimeDelta::ZERO;
        }
        self.queue_time_sum / self.packet_count as i64
    }

    // ─── Accessors ──────────────────────────────────────────────────────

    pub fn packet_count(&self) -> usize {
        self.packet_count
    }

    pub fn is_empty(&self) -> bool {
        self.packet_count == 0
    }

    /// Total bytes queued (payload plus padding).
    pub fn queued_bytes(&self) -> DataSize {
        self.queued_bytes
    }

    /// Number of queued packets of the given kind.
    pub fn packet_count_of(&self, kind: MediaKind) -> usize {
        self.kind_counts[kind.index()]
    }

    /// The packet the next [`pop`](Self::pop) would return, if any.
    pub fn leading_packet(&self) -> Option<&QueuedPacket> {
        if self.top_level == NO_ACTIVE_LEVEL {
            return None;
        }
        let ssrc = self.rotation[self.top_level].front()?;
        self.streams.get(ssrc)?.lanes[self.top_level].front()
    }

    /// Kind of the head-of-queue packet.
    pub fn leading_kind(&self) -> Option<MediaKind> {
        self.leading_packet().map(|p| p.kind)
    }

    /// Enqueue time of the head-of-queue packet.
    pub fn leading_enqueue_time(&self) -> Option<Timestamp> {
        self.leading_packet().map(|p| p.enqueue_time)
    }

    /// Earliest enqueue time across all queued packets. Scans lane fronts,
    /// O(streams).
    pub fn oldest_enqueue_time(&self) -> Option<Timestamp> {
        self.streams
            .values()
            .flat_map(|s| s.lanes.iter())
            .filter_map(|lane| lane.front())
            .map(|p| p.enqueue_time)
            .min()
    }

    /// Number of stream entries currently held (including empty ones not
    /// yet culled).
    pub fn stream_count(&self) -> usize {
        self.streams.len()
    }

    // ─── Culling ────────────────────────────────────────────────────────

    /// Sweep out empty stream entries idle past the timeout, at most once
    /// per cull interval. Non-empty streams are never touched, so the
    /// rotation lists stay valid.
    fn maybe_cull(&mut self, now: Timestamp) {
        let Some(last) = self.last_cull else {
            self.last_cull = Some(now);
            return;
        };
        if now.saturating_duration_since(last) < self.config.cull_interval {
            return;
        }
        let timeout = self.config.stream_timeout;
        self.streams
            .retain(|_, s| !s.is_empty() || now.saturating_duration_since(s.last_active) < timeout);
        self.last_cull = Some(now);
    }
}
