//! # Bandwidth Prober
//!
//! Decides, independently of ordinary media pacing, when a measurement
//! burst is due and how large the next packet in it must be. Clusters are
//! served FIFO; each one targets a rate, a duration and a packet count, and
//! completes only when both its byte and packet targets are met so a
//! handful of oversized packets cannot end a measurement early.
//!
//! Probing is strictly best-effort: an overdue cluster is abandoned rather
//! than sent late, and a failed send suspends the prober until fresh media
//! traffic revives it. Probe failure never blocks or delays media.

use std::collections::VecDeque;

use tracing::{debug, warn};

use crate::units::{DataRate, DataSize, TimeDelta, Timestamp};

// ─── Configuration ──────────────────────────────────────────────────────────

/// Prober tuning parameters.
#[derive(Debug, Clone)]
pub struct ProberConfig {
    /// Minimum spacing between probe packets. Probe packets are sized to
    /// cover at least two deltas at the target rate, so real spacing never
    /// falls below this.
    pub min_probe_delta: TimeDelta,
    /// How late a due probe may run before its cluster is abandoned.
    pub max_probe_delay: TimeDelta,
    /// Smallest media packet that can revive a suspended prober.
    pub min_packet_size: DataSize,
    /// Bounded cluster queue depth; the oldest request is dropped beyond it.
    pub max_cluster_queue: usize,
}

impl Default for ProberConfig {
    fn default() -> Self {
        ProberConfig {
            min_probe_delta: TimeDelta::from_millis(2),
            max_probe_delay: TimeDelta::from_millis(10),
            min_packet_size: DataSize::bytes(200),
            max_cluster_queue: 5,
        }
    }
}

// ─── Probe Clusters ─────────────────────────────────────────────────────────

/// A requested measurement burst.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeClusterConfig {
    /// Unique id, chosen by the congestion controller.
    pub id: i32,
    /// Rate the burst should be sent at.
    pub target_rate: DataRate,
    /// How long the burst should last.
    pub target_duration: TimeDelta,
    /// Minimum packets the burst must contain.
    pub target_packet_count: u32,
}

/// A live cluster: the config plus progress.
#[derive(Debug, Clone)]
struct ProbeCluster {
    config: ProbeClusterConfig,
    /// Byte target derived from rate × duration at creation.
    min_bytes: DataSize,
    sent_bytes: DataSize,
    sent_packets: u32,
    #[allow(dead_code)]
    requested_at: Timestamp,
    /// Stamped on the first probe packet actually sent.
    started_at: Option<Timestamp>,
}

impl ProbeCluster {
    fn done(&self) -> bool {
        self.sent_bytes >= self.min_bytes && self.sent_packets >= self.config.target_packet_count
    }
}

/// Pacing metadata attached to packets sent as part of a probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeMeta {
    /// Cluster the packet belongs to.
    pub cluster_id: i32,
    /// Bytes already sent for the cluster before this packet.
    pub bytes_sent: DataSize,
}

// ─── Prober ─────────────────────────────────────────────────────────────────

/// Prober lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProberState {
    /// Feature off. Cluster requests are ignored.
    Disabled,
    /// Enabled, no cluster in flight.
    Inactive,
    /// A cluster is being sent.
    Active,
    /// A send failed; waiting for media traffic before trying again.
    Suspended,
}

/// FIFO queue of probe clusters plus the timing state machine.
pub struct BandwidthProber {
    config: ProberConfig,
    state: ProberState,
    clusters: VecDeque<ProbeCluster>,
    /// When the next probe packet of the head cluster should go out.
    /// Plus-infinity when nothing is scheduled.
    probe_time: Timestamp,

    clusters_requested: u64,
    clusters_completed: u64,
    clusters_abandoned: u64,
}

impl BandwidthProber {
    pub fn new(config: ProberConfig) -> Self {
        BandwidthProber {
            config,
            state: ProberState::Disabled,
            clusters: VecDeque::new(),
            probe_time: Timestamp::plus_infinity(),
            clusters_requested: 0,
            clusters_completed: 0,
            clusters_abandoned: 0,
        }
    }

    /// Turn the feature on or off. Disabling drops all queued clusters.
    pub fn set_enabled(&mut self, enabled: bool) {
        if enabled {
            if self.state == ProberState::Disabled {
                self.state = ProberState::Inactive;
            }
        } else {
            self.state = ProberState::Disabled;
            self.clusters.clear();
            self.probe_time = Timestamp::plus_infinity();
        }
    }

    pub fn state(&self) -> ProberState {
        self.state
    }

    /// Whether a cluster is currently in flight.
    pub fn is_probing(&self) -> bool {
        self.state == ProberState::Active && !self.clusters.is_empty()
    }

    /// Enqueue a measurement burst request. Served FIFO; moves the prober
    /// to Active when it was idle.
    pub fn create_probe_cluster(&mut self, now: Timestamp, config: ProbeClusterConfig) {
        if self.state == ProberState::Disabled {
            debug!(cluster = config.id, "probe cluster ignored, prober disabled");
            return;
        }
        self.clusters_requested += 1;
        if self.clusters.len() >= self.config.max_cluster_queue {
            let dropped = self.clusters.pop_front();
            self.clusters_abandoned += 1;
            warn!(
                dropped = dropped.map(|c| c.config.id),
                "probe cluster queue full, dropping oldest"
            );
        }
        let min_bytes = config.target_rate * config.target_duration;
        debug!(
            cluster = config.id,
            rate = %config.target_rate,
            bytes = %min_bytes,
            packets = config.target_packet_count,
            "probe cluster queued"
        );
        self.clusters.push_back(ProbeCluster {
            config,
            min_bytes,
            sent_bytes: DataSize::ZERO,
            sent_packets: 0,
            requested_at: now,
            started_at: None,
        });
        if self.state == ProberState::Inactive {
            self.state = ProberState::Active;
            self.probe_time = now;
        }
    }

    /// Note a regular media packet about to be sent. Large enough packets
    /// revive a suspended prober so queued clusters get another chance once
    /// traffic is demonstrably flowing again.
    pub fn on_incoming_packet(&mut self, now: Timestamp, size: DataSize) {
        if size < self.config.min_packet_size {
            return;
        }
        if self.state == ProberState::Suspended {
            if self.clusters.is_empty() {
                self.state = ProberState::Inactive;
            } else {
                debug!("media traffic resumed, reviving suspended prober");
                self.state = ProberState::Active;
                self.probe_time = now;
            }
        }
    }

    /// When the next probe packet should be sent, or plus-infinity when no
    /// probe is pending or the head cluster has already missed its window.
    pub fn next_probe_time(&self, now: Timestamp) -> Timestamp {
        if !self.is_probing() {
            return Timestamp::plus_infinity();
        }
        if now.saturating_duration_since(self.probe_time) > self.config.max_probe_delay {
            // Too late to send without corrupting the measurement; the
            // cluster is dropped on the next `current_cluster` call.
            return Timestamp::plus_infinity();
        }
        self.probe_time
    }

    /// Pacing metadata of the cluster a probe packet should be sent for
    /// right now, or `None` when no probe is due. Abandons a cluster whose
    /// window has been missed.
    pub fn current_cluster(&mut self, now: Timestamp) -> Option<ProbeMeta> {
        if !self.is_probing() {
            return None;
        }
        if now.saturating_duration_since(self.probe_time) > self.config.max_probe_delay {
            let late = now.saturating_duration_since(self.probe_time);
            warn!(late = %late, "probe window missed, abandoning cluster");
            self.abandon_head(now);
        }
        if !self.is_probing() || self.probe_time > now {
            return None;
        }
        let cluster = self.clusters.front()?;
        Some(ProbeMeta {
            cluster_id: cluster.config.id,
            bytes_sent: cluster.sent_bytes,
        })
    }

    /// Minimum packet size that keeps the head cluster's rate target
    /// achievable: two minimum deltas' worth of data at the target rate.
    pub fn recommended_min_probe_size(&self) -> DataSize {
        let Some(cluster) = self.clusters.front() else {
            return DataSize::ZERO;
        };
        cluster.config.target_rate * (self.config.min_probe_delta * 2)
    }

    /// Record a probe send against the head cluster. A zero-byte send
    /// counts as failure: the cluster is abandoned and the prober suspends
    /// until media traffic revives it.
    pub fn probe_sent(&mut self, now: Timestamp, size: DataSize) {
        if !self.is_probing() {
            return;
        }
        if size.is_zero() {
            warn!("probe send produced no data, suspending prober");
            self.abandon_head(now);
            self.state = ProberState::Suspended;
            self.probe_time = Timestamp::plus_infinity();
            return;
        }
        let Some(cluster) = self.clusters.front_mut() else {
            return;
        };
        let started_at = *cluster.started_at.get_or_insert(now);
        cluster.sent_bytes += size;
        cluster.sent_packets += 1;

        let done = cluster.done();
        let id = cluster.config.id;
        let sent_bytes = cluster.sent_bytes;
        let sent_packets = cluster.sent_packets;
        // Keep the burst on its rate: the next probe is due once the bytes
        // sent so far have "earned" their time at the target rate.
        let next_on_rate = started_at + sent_bytes / cluster.config.target_rate;

        if done {
            debug!(
                cluster = id,
                bytes = %sent_bytes,
                packets = sent_packets,
                "probe cluster completed"
            );
            self.clusters_completed += 1;
            self.clusters.pop_front();
            if self.clusters.is_empty() {
                self.state = ProberState::Inactive;
                self.probe_time = Timestamp::plus_infinity();
            } else {
                self.probe_time = now + self.config.min_probe_delta;
            }
        } else {
            self.probe_time = next_on_rate;
        }
    }

    // ─── Telemetry ──────────────────────────────────────────────────────

    pub fn clusters_requested(&self) -> u64 {
        self.clusters_requested
    }

    pub fn clusters_completed(&self) -> u64 {
        self.clusters_completed
    }

    pub fn clusters_abandoned(&self) -> u64 {
        self.clusters_abandoned
    }

    fn abandon_head(&mut self, now: Timestamp) {
        if self.clusters.pop_front().is_some() {
            self.clusters_abandoned += 1;
        }
        if self.clusters.is_empty() {
            self.state = ProberState::Inactive;
            self.probe_time = Timestamp::plus_infinity();
        } else {
            self.probe_time = now;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(ms: i64) -> Timestamp {
        Timestamp::from_millis(ms)
    }

    fn cluster(id: i32) -> ProbeClusterConfig {
        ProbeClusterConfig {
            id,
            target_rate: DataRate::bytes_per_sec(300_000),
            target_duration: TimeDelta::from_millis(15),
            target_packet_count: 5,
        }
    }

    fn enabled_prober() -> BandwidthProber {
        let mut p = BandwidthProber::new(ProberConfig::default());
        p.set_enabled(true);
        p
    }

    #[test]
    fn disabled_prober_ignores_clusters() {
        let mut p = BandwidthProber::new(ProberConfig::default());
        p.create_probe_cluster(at(0), cluster(1));
        assert_eq!(p.state(), ProberState::Disabled);
        assert!(!p.is_probing());
        assert_eq!(p.next_probe_time(at(0)), Timestamp::plus_infinity());
    }

    #[test]
    fn cluster_creation_activates_idle_prober() {
        let mut p = enabled_prober();
        assert_eq!(p.state(), ProberState::Inactive);
        p.create_probe_cluster(at(5), cluster(1));
        assert_eq!(p.state(), ProberState::Active);
        assert_eq!(p.next_probe_time(at(5)), at(5));
    }

    #[test]
    fn probe_size_covers_two_min_deltas() {
        let mut p = enabled_prober();
        p.create_probe_cluster(at(0), cluster(1));
        // 300 000 B/s over 2 × 2 ms.
        assert_eq!(p.recommended_min_probe_size(), DataSize::bytes(1_200));
    }

    #[test]
    fn cluster_completes_when_both_targets_met() {
        let mut p = enabled_prober();
        p.create_probe_cluster(at(0), cluster(1));
        // Byte target is 4 500 B; after 4 × 1 200 B the bytes are met but
        // the packet count is not.
        for i in 0..4 {
            assert!(p.current_cluster(at(i * 4)).is_some());
            p.probe_sent(at(i * 4), DataSize::bytes(1_200));
        }
        assert!(p.is_probing(), "cluster must wait for the packet target");
        p.probe_sent(at(16), DataSize::bytes(1_200));
        assert!(!p.is_probing());
        assert_eq!(p.state(), ProberState::Inactive);
        assert_eq!(p.clusters_completed(), 1);
    }

    #[test]
    fn big_packets_alone_do_not_finish_a_cluster() {
        let mut p = enabled_prober();
        p.create_probe_cluster(at(0), cluster(1));
        p.probe_sent(at(0), DataSize::bytes(100_000));
        assert!(p.is_probing(), "one giant packet must not end the burst");
    }

    #[test]
    fn probe_pacing_follows_cluster_rate() {
        let mut p = enabled_prober();
        p.create_probe_cluster(at(0), cluster(1));
        p.probe_sent(at(0), DataSize::bytes(1_200));
        // 1 200 B at 300 000 B/s = 4 ms after the cluster start.
        assert_eq!(p.next_probe_time(at(0)), at(4));
        assert!(p.current_cluster(at(2)).is_none(), "not due before 4 ms");
        let meta = p.current_cluster(at(4)).unwrap();
        assert_eq!(meta.cluster_id, 1);
        assert_eq!(meta.bytes_sent, DataSize::bytes(1_200));
    }

    #[test]
    fn overdue_cluster_is_abandoned_not_sent_late() {
        let mut p = enabled_prober();
        p.create_probe_cluster(at(0), cluster(1));
        // Due at t=0, max delay 10 ms; by 20 ms the window is gone.
        assert_eq!(p.next_probe_time(at(20)), Timestamp::plus_infinity());
        assert!(p.current_cluster(at(20)).is_none());
        assert!(!p.is_probing());
        assert_eq!(p.clusters_abandoned(), 1);
        assert_eq!(p.state(), ProberState::Inactive);
    }

    #[test]
    fn abandoning_head_promotes_next_cluster() {
        let mut p = enabled_prober();
        p.create_probe_cluster(at(0), cluster(1));
        p.create_probe_cluster(at(0), cluster(2));
        let meta = p.current_cluster(at(20)).unwrap();
        assert_eq!(meta.cluster_id, 2, "next cluster takes over immediately");
        assert_eq!(p.clusters_abandoned(), 1);
    }

    #[test]
    fn zero_byte_send_suspends_prober() {
        let mut p = enabled_prober();
        p.create_probe_cluster(at(0), cluster(1));
        p.probe_sent(at(0), DataSize::ZERO);
        assert_eq!(p.state(), ProberState::Suspended);
        assert_eq!(p.clusters_abandoned(), 1);
        assert!(!p.is_probing());
    }

    #[test]
    fn media_traffic_revives_suspended_prober() {
        let mut p = enabled_prober();
        p.create_probe_cluster(at(0), cluster(1));
        p.create_probe_cluster(at(0), cluster(2));
        p.probe_sent(at(0), DataSize::ZERO);
        assert_eq!(p.state(), ProberState::Suspended);

        // Too small to prove traffic is flowing.
        p.on_incoming_packet(at(10), DataSize::bytes(50));
        assert_eq!(p.state(), ProberState::Suspended);

        p.on_incoming_packet(at(12), DataSize::bytes(1_000));
        assert_eq!(p.state(), ProberState::Active);
        assert_eq!(p.next_probe_time(at(12)), at(12));
    }

    #[test]
    fn clusters_serve_fifo() {
        let mut p = enabled_prober();
        p.create_probe_cluster(at(0), cluster(1));
        p.create_probe_cluster(at(0), cluster(2));
        assert_eq!(p.current_cluster(at(0)).unwrap().cluster_id, 1);

        // Finish cluster 1.
        for i in 0..5u32 {
            p.probe_sent(at(i as i64 * 4), DataSize::bytes(1_200));
        }
        assert!(p.is_probing());
        assert_eq!(p.current_cluster(at(25)).unwrap().cluster_id, 2);
    }

    #[test]
    fn cluster_queue_depth_is_bounded() {
        let mut p = enabled_prober();
        for id in 0..7 {
            p.create_probe_cluster(at(0), cluster(id));
        }
        // Depth 5: ids 0 and 1 were dropped as oldest.
        assert_eq!(p.current_cluster(at(0)).unwrap().cluster_id, 2);
        assert_eq!(p.clusters_abandoned(), 2);
        assert_eq!(p.clusters_requested(), 7);
    }

    #[test]
    fn disabling_clears_everything() {
        let mut p = enabled_prober();
        p.create_probe_cluster(at(0), cluster(1));
        p.set_enabled(false);
        assert_eq!(p.state(), ProberState::Disabled);
        assert!(p.current_cluster(at(0)).is_none());
    }
}
