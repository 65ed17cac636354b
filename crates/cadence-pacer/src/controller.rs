//! # Pacing Controller
//!
//! The single scheduling authority. Pure logic — no I/O, no clock reads,
//! no sleeping. A driver repeatedly asks [`PacingController::next_send_time`]
//! when to wake up, then calls [`PacingController::process_packets`] at or
//! near that time; everything due is handed to the injected
//! [`PacketSender`] and charged against the rate budget.
//!
//! ## Debt accounting
//!
//! Two independent accumulators track bytes sent in excess of what the
//! configured media and padding rates would allow by now. Debt drains as
//! time elapses at the (effective) rate, grows with every send, and is
//! capped at rate × a maximum horizon so a long idle period never grants
//! an unbounded burst.
//!
//! ## Gating axes
//!
//! Paused and congested are orthogonal. Pausing halts everything except
//! keepalives; congestion lets audio and retransmissions through but
//! suppresses all other media and all padding.

use tracing::{debug, trace, warn};

use crate::packet::{MediaKind, QueuedPacket, Ssrc};
use crate::prober::{BandwidthProber, ProbeClusterConfig, ProbeMeta, ProberConfig};
use crate::queue::{PacketQueue, QueueConfig};
use crate::stats::{PacerSnapshot, PacerStats};
use crate::units::{DataRate, DataSize, TimeDelta, Timestamp};

// ─── Collaborator Interface ─────────────────────────────────────────────────

/// Transmission collaborator, injected per [`PacingController::process_packets`]
/// call. Implementations perform the actual socket write.
pub trait PacketSender {
    /// Transmit a packet. `probe` carries cluster metadata when the send is
    /// part of a bandwidth probe.
    fn send_packet(&mut self, packet: QueuedPacket, probe: Option<ProbeMeta>);

    /// Produce padding packets totalling approximately `size` bytes. An
    /// empty return means padding is unavailable right now.
    fn generate_padding(&mut self, size: DataSize) -> Vec<QueuedPacket>;

    /// FEC repair packets produced as a side effect of recent sends, to be
    /// re-enqueued behind media.
    fn fetch_fec(&mut self) -> Vec<QueuedPacket> {
        Vec::new()
    }

    /// RTX stream paired with a media stream, for senders that put filler
    /// on the retransmission stream.
    fn rtx_ssrc_for_media(&self, _ssrc: Ssrc) -> Option<Ssrc> {
        None
    }
}

// ─── Configuration ──────────────────────────────────────────────────────────

/// Pacing controller tuning parameters.
#[derive(Debug, Clone)]
pub struct PacerConfig {
    /// Wake-up cadence while paused, congested or before the first send.
    pub paused_poll_interval: TimeDelta,
    /// Silence threshold after which a keepalive padding packet goes out.
    pub keepalive_interval: TimeDelta,
    /// Debt is capped at rate × this horizon.
    pub max_debt_horizon: TimeDelta,
    /// Padding is synthesized in bursts worth this much time at the
    /// padding rate.
    pub padding_burst: TimeDelta,
    /// Target upper bound on time a packet spends queued; the effective
    /// rate is raised (never lowered) to keep the queue within it.
    pub queue_time_limit: TimeDelta,
    /// Hard ceiling on the effective media rate.
    pub max_pacing_rate: DataRate,
    /// Hard cap on send-loop iterations per tick.
    pub max_iterations_per_tick: usize,
    /// Media kinds that bypass rate pacing entirely.
    pub unpaced_kinds: Vec<MediaKind>,
    /// Whether bandwidth probing is enabled.
    pub probing_enabled: bool,
    /// Whether the drain-relief valve may raise the effective rate.
    pub drain_large_queues: bool,
    pub prober: ProberConfig,
    pub queue: QueueConfig,
}

impl Default for PacerConfig {
    fn default() -> Self {
        PacerConfig {
            paused_poll_interval: TimeDelta::from_millis(500),
            keepalive_interval: TimeDelta::from_millis(500),
            max_debt_horizon: TimeDelta::from_millis(500),
            padding_burst: TimeDelta::from_millis(5),
            queue_time_limit: TimeDelta::from_seconds(2),
            max_pacing_rate: DataRate::bytes_per_sec(1_250_000_000),
            max_iterations_per_tick: 1_000,
            unpaced_kinds: vec![MediaKind::Audio],
            probing_enabled: true,
            drain_large_queues: true,
            prober: ProberConfig::default(),
            queue: QueueConfig::default(),
        }
    }
}

/// Traffic allowed through while congested.
fn congestion_exempt(kind: MediaKind) -> bool {
    matches!(kind, MediaKind::Audio | MediaKind::Retransmission)
}

// ─── Tick Actions ───────────────────────────────────────────────────────────

/// What the send loop should do next, evaluated once per iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TickAction {
    /// Nothing is due.
    Idle,
    /// A probe packet is due; real media is preferred, filler otherwise.
    Probe,
    /// The head of the packet queue is admissible.
    DrainQueue,
    /// Queue is empty and padding debt has drained: synthesize filler.
    Pad,
}

// ─── Pacing Controller ──────────────────────────────────────────────────────

/// Decides when each packet may leave the host. Externally driven and
/// single-threaded; see the crate docs for the driver contract.
pub struct PacingController {
    config: PacerConfig,
    queue: PacketQueue,
    prober: BandwidthProber,

    media_rate: DataRate,
    padding_rate: DataRate,
    /// Configured media rate, possibly raised by the drain-relief valve.
    effective_media_rate: DataRate,
    media_debt: DataSize,
    padding_debt: DataSize,

    queue_time_limit: TimeDelta,
    drain_boost_active: bool,

    paused: bool,
    congested: bool,

    /// Last `process_packets` invocation, lazily anchored on first use.
    last_process_time: Option<Timestamp>,
    /// Last actual send; `None` until the first packet goes out.
    last_send_time: Option<Timestamp>,

    stats: PacerStats,
}

impl PacingController {
    pub fn new(config: PacerConfig) -> Self {
        let mut prober = BandwidthProber::new(config.prober.clone());
        prober.set_enabled(config.probing_enabled);
        let queue = PacketQueue::new(config.queue.clone());
        PacingController {
            queue,
            prober,
            media_rate: DataRate::ZERO,
            padding_rate: DataRate::ZERO,
            effective_media_rate: DataRate::ZERO,
            media_debt: DataSize::ZERO,
            padding_debt: DataSize::ZERO,
            queue_time_limit: config.queue_time_limit,
            drain_boost_active: false,
            paused: false,
            congested: false,
            last_process_time: None,
            last_send_time: None,
            stats: PacerStats::new(),
            config,
        }
    }

    // ─── Configuration From the Congestion Controller ───────────────────

    /// Set the media and padding pacing rates. A padding rate above the
    /// media rate is clamped down, never propagated as an error.
    pub fn set_pacing_rates(&mut self, media_rate: DataRate, padding_rate: DataRate) {
        let padding_rate = if padding_rate > media_rate {
            warn!(%padding_rate, %media_rate, "padding rate above media rate, clamping");
            media_rate
        } else {
            padding_rate
        };
        self.media_rate = media_rate;
        self.padding_rate = padding_rate;
        self.update_effective_rate();
    }

    /// Request bandwidth measurement bursts, served FIFO.
    pub fn create_probe_clusters(&mut self, now: Timestamp, configs: Vec<ProbeClusterConfig>) {
        for config in configs {
            self.prober.create_probe_cluster(now, config);
        }
    }

    /// Congestion gating: while set, only audio and retransmissions are
    /// sent and all padding is suppressed.
    pub fn set_congested(&mut self, congested: bool) {
        self.congested = congested;
    }

    /// Upper bound on how long packets may sit queued before the effective
    /// rate is raised to drain the backlog.
    pub fn set_queue_time_limit(&mut self, limit: TimeDelta) {
        self.queue_time_limit = limit;
        self.update_effective_rate();
    }

    /// Halt all sending except keepalives.
    pub fn pause(&mut self, now: Timestamp) {
        if !self.paused {
            debug!("pacer paused");
            self.paused = true;
            self.queue.set_pause_state(true, now);
        }
    }

    pub fn resume(&mut self, now: Timestamp) {
        if self.paused {
            debug!("pacer resumed");
            self.paused = false;
            self.queue.set_pause_state(false, now);
        }
    }

    // ─── Packet Admission ───────────────────────────────────────────────

    /// Admit a packet for paced transmission.
    ///
    /// The schedule is derived, never cached, so an empty→non-empty
    /// transition is visible through [`next_send_time`](Self::next_send_time)
    /// immediately; the driver should process promptly on that transition.
    pub fn enqueue_packet(&mut self, now: Timestamp, packet: QueuedPacket) {
        if self.last_process_time.is_none() {
            self.last_process_time = Some(now);
        }
        self.prober.on_incoming_packet(now, packet.size());
        self.queue.push(now, packet);
        self.update_effective_rate();
    }

    // ─── Scheduling ─────────────────────────────────────────────────────

    /// When the driver should next invoke
    /// [`process_packets`](Self::process_packets).
    ///
    /// Returns plus-infinity when there is nothing to do and no padding
    /// rate is set.
    pub fn next_send_time(&self, now: Timestamp) -> Timestamp {
        let reference = self.last_send_time.or(self.last_process_time).unwrap_or(now);
        if self.paused {
            // Keepalives still fire on the slow poll cadence.
            return reference + self.config.paused_poll_interval;
        }
        let probe_time = self.prober.next_probe_time(now);
        if probe_time.is_finite() {
            return probe_time;
        }
        if let Some(kind) = self.queue.leading_kind() {
            if self.is_unpaced(kind) && (!self.congested || congestion_exempt(kind)) {
                return now;
            }
        }
        if self.congested || self.last_send_time.is_none() {
            return reference + self.config.paused_poll_interval;
        }
        let last_process = self.last_process_time.unwrap_or(now);
        if !self.queue.is_empty() {
            // Time at which the media debt has drained enough to admit the
            // head of the queue. A zero rate never drains.
            return last_process + self.media_debt / self.effective_media_rate;
        }
        if !self.padding_rate.is_zero() {
            return last_process + self.padding_debt / self.padding_rate;
        }
        if !self.media_debt.is_zero() {
            // Residual debt still schedules a wake so the budget settles.
            return last_process + self.media_debt / self.effective_media_rate;
        }
        Timestamp::plus_infinity()
    }

    /// Send everything that is due at `now`.
    ///
    /// Bounded: the loop yields once the derived target time moves into
    /// the future, and a hard iteration cap guarantees termination under
    /// pathological inputs.
    pub fn process_packets<S: PacketSender>(&mut self, now: Timestamp, sender: &mut S) {
        let last_process = self.last_process_time.unwrap_or(now);
        // A regressing caller clock is clamped, never a negative elapsed.
        let now = now.max(last_process);

        if self.keepalive_due(now) {
            for packet in sender.generate_padding(DataSize::bytes(1)) {
                self.stats.keepalives_sent += 1;
                self.dispatch(now, packet, None, sender);
            }
        }

        if self.paused {
            self.queue.update_average_queue_time(now);
            self.last_process_time = Some(now);
            return;
        }

        let elapsed = now.saturating_duration_since(last_process);
        self.media_debt = self
            .media_debt
            .saturating_sub(self.effective_media_rate * elapsed);
        self.padding_debt = self.padding_debt.saturating_sub(self.padding_rate * elapsed);
        self.last_process_time = Some(now);
        self.queue.update_average_queue_time(now);
        self.update_effective_rate();

        let recommended_probe_size = self.prober.recommended_min_probe_size();
        let mut probe_bytes_sent = DataSize::ZERO;
        let mut iterations = 0usize;
        loop {
            if iterations >= self.config.max_iterations_per_tick {
                self.stats.iteration_cap_hits += 1;
                warn!(iterations, "send loop hit iteration cap, yielding");
                break;
            }
            iterations += 1;

            let probe = self.prober.current_cluster(now);
            match self.next_action(probe.is_some()) {
                TickAction::Idle => break,
                TickAction::Probe => {
                    let sent = if let Some(packet) = self.queue.pop(now) {
                        self.dispatch(now, packet, probe, sender)
                    } else {
                        let want = recommended_probe_size.max(DataSize::bytes(1));
                        let filler = sender.generate_padding(want);
                        if filler.is_empty() {
                            // Nothing to probe with; the prober suspends.
                            self.prober.probe_sent(now, DataSize::ZERO);
                            break;
                        }
                        let mut total = DataSize::ZERO;
                        for packet in filler {
                            total += self.dispatch(now, packet, probe, sender);
                        }
                        total
                    };
                    self.prober.probe_sent(now, sent);
                    probe_bytes_sent += sent;
                    if probe_bytes_sent >= recommended_probe_size {
                        break;
                    }
                }
                TickAction::DrainQueue => {
                    let Some(packet) = self.queue.pop(now) else {
                        break;
                    };
                    self.dispatch(now, packet, None, sender);
                }
                TickAction::Pad => {
                    let target =
                        (self.padding_rate * self.config.padding_burst).max(DataSize::bytes(1));
                    let filler = sender.generate_padding(target);
                    if filler.is_empty() {
                        break;
                    }
                    for packet in filler {
                        self.dispatch(now, packet, None, sender);
                    }
                }
            }

            if self.next_send_time(now) > now {
                break;
            }
        }
    }

    // ─── Accessors ──────────────────────────────────────────────────────

    pub fn pacing_rate(&self) -> DataRate {
        self.media_rate
    }

    pub fn padding_rate(&self) -> DataRate {
        self.padding_rate
    }

    /// The configured rate plus any active drain-relief boost.
    pub fn effective_pacing_rate(&self) -> DataRate {
        self.effective_media_rate
    }

    pub fn media_debt(&self) -> DataSize {
        self.media_debt
    }

    pub fn padding_debt(&self) -> DataSize {
        self.padding_debt
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn is_congested(&self) -> bool {
        self.congested
    }

    /// Read access to the packet queue, for embedder diagnostics.
    pub fn queue(&self) -> &PacketQueue {
        &self.queue
    }

    pub fn stats(&self) -> &PacerStats {
        &self.stats
    }

    pub fn snapshot(&self) -> PacerSnapshot {
        PacerSnapshot {
            queued_packets: self.queue.packet_count(),
            queued_bytes: self.queue.queued_bytes().as_bytes(),
            average_queue_time_us: self.queue.average_queue_time().as_micros(),
            media_debt_bytes: self.media_debt.as_bytes(),
            padding_debt_bytes: self.padding_debt.as_bytes(),
            pacing_rate_bps: self.media_rate.as_bytes_per_sec(),
            padding_rate_bps: self.padding_rate.as_bytes_per_sec(),
            effective_pacing_rate_bps: self.effective_media_rate.as_bytes_per_sec(),
            paused: self.paused,
            congested: self.congested,
            probe_clusters_requested: self.prober.clusters_requested(),
            probe_clusters_completed: self.prober.clusters_completed(),
            probe_clusters_abandoned: self.prober.clusters_abandoned(),
            totals: self.stats.clone(),
        }
    }

    // ─── Internals ──────────────────────────────────────────────────────

    fn is_unpaced(&self, kind: MediaKind) -> bool {
        self.config.unpaced_kinds.contains(&kind)
    }

    /// Decide what the send loop should do, evaluated fresh per iteration.
    fn next_action(&self, probing: bool) -> TickAction {
        if probing {
            return TickAction::Probe;
        }
        if let Some(kind) = self.queue.leading_kind() {
            let gate_ok = !self.congested || congestion_exempt(kind);
            let pace_ok = self.is_unpaced(kind)
                || (self.media_debt.is_zero() && !self.effective_media_rate.is_zero());
            if gate_ok && pace_ok {
                return TickAction::DrainQueue;
            }
            // Head is blocked on debt or congestion; padding never
            // overtakes queued media.
            return TickAction::Idle;
        }
        if self.padding_due() {
            TickAction::Pad
        } else {
            TickAction::Idle
        }
    }

    fn padding_due(&self) -> bool {
        !self.congested
            && self.last_send_time.is_some()
            && !self.padding_rate.is_zero()
            && self.padding_debt.is_zero()
    }

    fn keepalive_due(&self, now: Timestamp) -> bool {
        if !(self.paused || self.congested || self.last_send_time.is_none()) {
            return false;
        }
        match self.last_send_time.or(self.last_process_time) {
            Some(anchor) => {
                now.saturating_duration_since(anchor) >= self.config.keepalive_interval
            }
            None => false,
        }
    }

    /// Hand one packet to the sender, charge both debts, and re-enqueue
    /// any FEC the send produced. Returns the size charged.
    fn dispatch<S: PacketSender>(
        &mut self,
        now: Timestamp,
        packet: QueuedPacket,
        probe: Option<ProbeMeta>,
        sender: &mut S,
    ) -> DataSize {
        let size = packet.size();
        let kind = packet.kind;
        trace!(%kind, %size, probe = probe.is_some(), "sending packet");
        sender.send_packet(packet, probe);

        self.media_debt = (self.media_debt + size)
            .min(self.effective_media_rate * self.config.max_debt_horizon);
        self.padding_debt =
            (self.padding_debt + size).min(self.padding_rate * self.config.max_debt_horizon);
        self.last_send_time = Some(now);
        self.stats.note_sent(kind, size, probe.is_some());

        for fec in sender.fetch_fec() {
            self.prober.on_incoming_packet(now, fec.size());
            self.queue.push(now, fec);
        }
        size
    }

    /// Drain-relief valve: when the backlog could not drain within the
    /// queue time limit at the configured rate, raise the effective rate
    /// just enough (bounded by the hard ceiling). Never lowers the rate.
    /// The precise curve is policy, kept in this one place.
    fn update_effective_rate(&mut self) {
        let base = self.media_rate;
        let mut effective = base;
        if self.config.drain_large_queues && !base.is_zero() && !self.queue.is_empty() {
            let time_left = self
                .queue_time_limit
                .saturating_sub(self.queue.average_queue_time())
                .max(TimeDelta::from_millis(1));
            let drain_rate = self.queue.queued_bytes() / time_left;
            if drain_rate > effective {
                effective = drain_rate.min(self.config.max_pacing_rate);
            }
        }
        if effective > base {
            if !self.drain_boost_active {
                self.drain_boost_active = true;
                self.stats.drain_boosts += 1;
                debug!(
                    configured = %base,
                    effective = %effective,
                    "raising effective rate to drain oversized queue"
                );
            }
        } else {
            self.drain_boost_active = false;
        }
        self.effective_media_rate = effective;
    }
}
