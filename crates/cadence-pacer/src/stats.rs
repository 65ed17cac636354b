//! # Pacer Statistics
//!
//! Cumulative counters and point-in-time snapshots for the pacing
//! controller. Everything serializes to JSON for dashboard export; the
//! snapshot type is `Clone` so embedders can ship copies across threads
//! however they like.

use serde::Serialize;

use crate::packet::MediaKind;
use crate::units::DataSize;

// ─── Counters ───────────────────────────────────────────────────────────────

/// Cumulative send counters, owned by the pacing controller.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PacerStats {
    /// Total packets handed to the sender (all kinds).
    pub packets_sent: u64,
    /// Total bytes handed to the sender (payload + padding).
    pub bytes_sent: u64,
    /// Audio packets sent.
    pub audio_packets_sent: u64,
    /// Video packets sent.
    pub video_packets_sent: u64,
    /// Retransmissions sent.
    pub retransmissions_sent: u64,
    /// FEC repair packets sent.
    pub fec_packets_sent: u64,
    /// Padding packets sent (probe filler and rate filler).
    pub padding_packets_sent: u64,
    /// Bytes of padding sent.
    pub padding_bytes_sent: u64,
    /// Keepalive padding packets sent during silence.
    pub keepalives_sent: u64,
    /// Packets sent as part of a probe cluster.
    pub probe_packets_sent: u64,
    /// Times the per-tick send loop hit its iteration cap.
    pub iteration_cap_hits: u64,
    /// Times the effective rate was raised above the configured rate to
    /// drain an oversized queue.
    pub drain_boosts: u64,
}

impl PacerStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fraction of sent bytes that were padding.
    pub fn padding_ratio(&self) -> f64 {
        if self.bytes_sent == 0 {
            0.0
        } else {
            self.padding_bytes_sent as f64 / self.bytes_sent as f64
        }
    }

    pub(crate) fn note_sent(&mut self, kind: MediaKind, size: DataSize, probe: bool) {
        self.packets_sent += 1;
        self.bytes_sent += size.as_bytes() as u64;
        if probe {
            self.probe_packets_sent += 1;
        }
        match kind {
            MediaKind::Audio => self.audio_packets_sent += 1,
            MediaKind::Video => self.video_packets_sent += 1,
            MediaKind::Retransmission => self.retransmissions_sent += 1,
            MediaKind::ForwardErrorCorrection => self.fec_packets_sent += 1,
            MediaKind::Padding => {
                self.padding_packets_sent += 1;
                self.padding_bytes_sent += size.as_bytes() as u64;
            }
        }
    }
}

// ─── Snapshot ───────────────────────────────────────────────────────────────

/// Point-in-time view of the controller's scheduling state.
#[derive(Debug, Clone, Serialize)]
pub struct PacerSnapshot {
    /// Packets waiting in the queue.
    pub queued_packets: usize,
    /// Bytes waiting in the queue.
    pub queued_bytes: i64,
    /// Mean time-in-queue in µs, as of the last update.
    pub average_queue_time_us: i64,
    /// Current media debt in bytes.
    pub media_debt_bytes: i64,
    /// Current padding debt in bytes.
    pub padding_debt_bytes: i64,
    /// Configured media pacing rate in bytes/sec.
    pub pacing_rate_bps: i64,
    /// Configured padding rate in bytes/sec.
    pub padding_rate_bps: i64,
    /// Effective media rate in bytes/sec — equals the configured rate
    /// unless the drain-relief valve has raised it.
    pub effective_pacing_rate_bps: i64,
    /// Whether sending is paused.
    pub paused: bool,
    /// Whether congestion gating is active.
    pub congested: bool,
    /// Probe clusters requested so far.
    pub probe_clusters_requested: u64,
    /// Probe clusters completed so far.
    pub probe_clusters_completed: u64,
    /// Probe clusters abandoned so far.
    pub probe_clusters_abandoned: u64,
    /// Cumulative send counters.
    pub totals: PacerStats,
}
