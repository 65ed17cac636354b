//! # Integration tests: driver loop ↔ controller ↔ queue ↔ prober
//!
//! These tests drive the full stack the way an embedding timer would:
//! repeatedly ask `next_send_time`, then call `process_packets` at that
//! time. No actual network I/O — the sender records what it is handed.

use bytes::Bytes;

use cadence_pacer::controller::{PacerConfig, PacingController, PacketSender};
use cadence_pacer::packet::{MediaKind, QueuedPacket, Ssrc};
use cadence_pacer::prober::{ProbeClusterConfig, ProbeMeta};
use cadence_pacer::units::{DataRate, DataSize, TimeDelta, Timestamp};

// ─── Helpers ────────────────────────────────────────────────────────────────

/// Opt-in scheduler logs: `RUST_LOG=cadence_pacer=trace cargo test`.
fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

#[derive(Debug, Clone)]
struct SentRecord {
    at: Timestamp,
    kind: MediaKind,
    ssrc: Ssrc,
    size: i64,
    probe: Option<ProbeMeta>,
}

/// Records everything the pacer hands it. `now` is set by the driver loop
/// before each tick so records carry send times.
struct RecordingSender {
    now: Timestamp,
    sent: Vec<SentRecord>,
    padding_ssrc: Ssrc,
}

impl RecordingSender {
    fn new() -> Self {
        RecordingSender {
            now: Timestamp::zero(),
            sent: Vec::new(),
            padding_ssrc: 9_999,
        }
    }

    fn bytes_sent(&self) -> i64 {
        self.sent.iter().map(|r| r.size).sum()
    }

    fn kinds(&self) -> Vec<MediaKind> {
        self.sent.iter().map(|r| r.kind).collect()
    }
}

impl PacketSender for RecordingSender {
    fn send_packet(&mut self, packet: QueuedPacket, probe: Option<ProbeMeta>) {
        self.sent.push(SentRecord {
            at: self.now,
            kind: packet.kind,
            ssrc: packet.ssrc,
            size: packet.size().as_bytes(),
            probe,
        });
    }

    fn generate_padding(&mut self, size: DataSize) -> Vec<QueuedPacket> {
        vec![QueuedPacket::padding(self.padding_ssrc, size)]
    }
}

fn at(ms: i64) -> Timestamp {
    Timestamp::from_millis(ms)
}

fn media(kind: MediaKind, ssrc: Ssrc, bytes: usize) -> QueuedPacket {
    QueuedPacket::new(kind, ssrc, Bytes::from(vec![0u8; bytes]))
}

fn controller(media_rate: i64, padding_rate: i64) -> PacingController {
    let mut c = PacingController::new(PacerConfig::default());
    c.set_pacing_rates(
        DataRate::bytes_per_sec(media_rate),
        DataRate::bytes_per_sec(padding_rate),
    );
    c
}

/// Run the driver loop from `from` until the schedule moves past `until`
/// (or goes idle). Returns the last tick time.
fn drive(c: &mut PacingController, s: &mut RecordingSender, from: Timestamp, until: Timestamp) -> Timestamp {
    let mut now = from;
    s.now = now;
    c.process_packets(now, s);
    loop {
        let next = c.next_send_time(now);
        if !next.is_finite() || next > until {
            return now;
        }
        now = next.max(now);
        s.now = now;
        c.process_packets(now, s);
    }
}

// ─── Priority Ordering ──────────────────────────────────────────────────────

#[test]
fn audio_goes_out_before_video() {
    init_logging();
    let mut c = controller(8_000, 0);
    let mut s = RecordingSender::new();
    c.enqueue_packet(at(0), media(MediaKind::Video, 1, 1_000));
    for _ in 0..3 {
        c.enqueue_packet(at(0), media(MediaKind::Audio, 2, 100));
    }

    drive(&mut c, &mut s, at(0), at(1_000));
    assert_eq!(
        s.kinds(),
        vec![
            MediaKind::Audio,
            MediaKind::Audio,
            MediaKind::Audio,
            MediaKind::Video
        ]
    );
}

#[test]
fn retransmissions_jump_queued_video_but_not_audio() {
    let mut c = controller(1_000_000, 0);
    let mut s = RecordingSender::new();
    c.enqueue_packet(at(0), media(MediaKind::Video, 1, 1_000));
    c.enqueue_packet(at(0), media(MediaKind::Retransmission, 1, 300));
    c.enqueue_packet(at(0), media(MediaKind::Audio, 2, 100));

    drive(&mut c, &mut s, at(0), at(1_000));
    assert_eq!(
        s.kinds(),
        vec![
            MediaKind::Audio,
            MediaKind::Retransmission,
            MediaKind::Video
        ]
    );
}

// ─── Round-Robin Fairness ───────────────────────────────────────────────────

#[test]
fn two_video_streams_alternate() {
    let mut c = controller(1_000_000, 0);
    let mut s = RecordingSender::new();
    for _ in 0..4 {
        c.enqueue_packet(at(0), media(MediaKind::Video, 10, 500));
        c.enqueue_packet(at(0), media(MediaKind::Video, 20, 500));
    }

    drive(&mut c, &mut s, at(0), at(1_000));
    let order: Vec<Ssrc> = s.sent.iter().map(|r| r.ssrc).collect();
    assert_eq!(order, vec![10, 20, 10, 20, 10, 20, 10, 20]);
}

// ─── Rate Conformance ───────────────────────────────────────────────────────

#[test]
fn egress_stays_within_configured_rate_plus_one_packet() {
    let mut c = controller(10_000, 0);
    let mut s = RecordingSender::new();
    // Twice the rate's worth of traffic for a one second window.
    for _ in 0..40 {
        c.enqueue_packet(at(0), media(MediaKind::Video, 1, 500));
    }

    drive(&mut c, &mut s, at(0), at(1_000));
    let window = s
        .sent
        .iter()
        .filter(|r| r.at <= at(1_000))
        .map(|r| r.size)
        .sum::<i64>();
    assert!(
        window <= 10_000 + 500,
        "sent {window} B in 1 s at 10 000 B/s"
    );
    // The pacer is work-conserving: it must not fall behind either.
    assert!(window >= 10_000 - 500, "sent only {window} B in 1 s");

    drive(&mut c, &mut s, at(1_000), at(3_000));
    assert_eq!(s.bytes_sent(), 20_000, "backlog fully drains");
}

#[test]
fn spaced_sends_match_debt_drain_times() {
    let mut c = controller(1_000, 0);
    let mut s = RecordingSender::new();
    c.enqueue_packet(at(0), media(MediaKind::Video, 1, 500));
    c.enqueue_packet(at(0), media(MediaKind::Video, 1, 500));

    drive(&mut c, &mut s, at(0), at(2_000));
    assert_eq!(s.sent[0].at, at(0), "first send releases immediately");
    assert_eq!(s.sent[1].at, at(500), "second waits for the debt to drain");
}

// ─── Padding ────────────────────────────────────────────────────────────────

#[test]
fn padding_only_flows_once_the_queue_is_empty() {
    let mut c = controller(100_000, 20_000);
    let mut s = RecordingSender::new();
    for _ in 0..5 {
        c.enqueue_packet(at(0), media(MediaKind::Video, 1, 1_000));
    }

    drive(&mut c, &mut s, at(0), at(1_000));
    let first_padding = s
        .sent
        .iter()
        .position(|r| r.kind == MediaKind::Padding)
        .expect("padding should fill the silence");
    let last_media = s
        .sent
        .iter()
        .rposition(|r| r.kind == MediaKind::Video)
        .unwrap();
    assert!(first_padding > last_media, "no padding before media drained");

    // Padding itself is rate-conformant against the padding rate.
    let padding_bytes: i64 = s
        .sent
        .iter()
        .filter(|r| r.kind == MediaKind::Padding && r.at <= at(1_000))
        .map(|r| r.size)
        .sum();
    assert!(padding_bytes <= 20_000 + 100, "padding sent {padding_bytes} B");
}

// ─── Probing ────────────────────────────────────────────────────────────────

#[test]
fn probe_cluster_bursts_at_probe_rate_with_empty_queue() {
    init_logging();
    let mut c = controller(100_000, 0);
    let mut s = RecordingSender::new();
    // One media send anchors the pacer; the queue is empty afterwards.
    c.enqueue_packet(at(0), media(MediaKind::Video, 1, 200));
    drive(&mut c, &mut s, at(0), at(5));

    c.create_probe_clusters(
        at(10),
        vec![ProbeClusterConfig {
            id: 1,
            target_rate: DataRate::bytes_per_sec(300_000),
            target_duration: TimeDelta::from_millis(15),
            target_packet_count: 5,
        }],
    );
    drive(&mut c, &mut s, at(10), at(100));

    let probes: Vec<&SentRecord> = s.sent.iter().filter(|r| r.probe.is_some()).collect();
    assert_eq!(probes.len(), 5);
    assert_eq!(c.snapshot().probe_clusters_completed, 1);
    // Filler is sized for the probe rate (2 × 2 ms at 300 000 B/s), not
    // the padding rate — which is zero here.
    for probe in &probes {
        assert_eq!(probe.size, 1_200);
        assert_eq!(probe.probe.unwrap().cluster_id, 1);
    }
    // The whole burst lands within the cluster's intended window.
    let last = probes.last().unwrap().at;
    assert!(last <= at(10) + TimeDelta::from_millis(20), "burst ended at {last}");
}

#[test]
fn queued_media_is_used_as_probe_payload() {
    let mut c = controller(100_000, 0);
    let mut s = RecordingSender::new();
    c.enqueue_packet(at(0), media(MediaKind::Video, 1, 200));
    drive(&mut c, &mut s, at(0), at(5));

    for _ in 0..5 {
        c.enqueue_packet(at(10), media(MediaKind::Video, 1, 1_200));
    }
    c.create_probe_clusters(
        at(10),
        vec![ProbeClusterConfig {
            id: 2,
            target_rate: DataRate::bytes_per_sec(300_000),
            target_duration: TimeDelta::from_millis(15),
            target_packet_count: 5,
        }],
    );
    drive(&mut c, &mut s, at(10), at(100));

    let probes: Vec<&SentRecord> = s.sent.iter().filter(|r| r.probe.is_some()).collect();
    assert!(probes.len() >= 5);
    assert!(
        probes.iter().all(|r| r.kind == MediaKind::Video),
        "real media is preferred over filler while probing"
    );
}

// ─── Pause & Congestion ─────────────────────────────────────────────────────

#[test]
fn paused_pacer_polls_slowly_and_sends_nothing() {
    let mut c = controller(1_000_000, 0);
    let mut s = RecordingSender::new();
    c.enqueue_packet(at(0), media(MediaKind::Video, 1, 500));
    drive(&mut c, &mut s, at(0), at(1));
    assert_eq!(s.sent.len(), 1);

    c.pause(at(2));
    c.enqueue_packet(at(2), media(MediaKind::Video, 1, 500));
    // Last send was at t=0: the next poll is one paused interval later.
    assert_eq!(c.next_send_time(at(2)), at(500));

    s.now = at(500);
    c.process_packets(at(500), &mut s);
    let videos = s.sent.iter().filter(|r| r.kind == MediaKind::Video).count();
    assert_eq!(videos, 1, "paused: media stays queued");
    // Keepalives are the one thing a paused pacer still emits.
    assert_eq!(c.stats().keepalives_sent, 1);

    c.resume(at(600));
    drive(&mut c, &mut s, at(600), at(700));
    let videos = s.sent.iter().filter(|r| r.kind == MediaKind::Video).count();
    assert_eq!(videos, 2);
    // Time spent paused does not count as queueing delay.
    assert_eq!(c.queue().average_queue_time(), TimeDelta::ZERO);
}

#[test]
fn congestion_gates_everything_but_audio_and_rtx() {
    let mut c = controller(1_000_000, 50_000);
    let mut s = RecordingSender::new();
    c.enqueue_packet(at(0), media(MediaKind::Video, 1, 500));
    drive(&mut c, &mut s, at(0), at(1));

    c.set_congested(true);
    c.enqueue_packet(at(2), media(MediaKind::Video, 1, 1_000));
    c.enqueue_packet(at(2), media(MediaKind::ForwardErrorCorrection, 1, 400));
    c.enqueue_packet(at(2), media(MediaKind::Retransmission, 1, 300));
    c.enqueue_packet(at(2), media(MediaKind::Audio, 2, 100));
    drive(&mut c, &mut s, at(2), at(2_000));

    let gated: Vec<&SentRecord> = s.sent[1..].iter().collect();
    assert!(gated.iter().any(|r| r.kind == MediaKind::Audio));
    assert!(gated.iter().any(|r| r.kind == MediaKind::Retransmission));
    assert!(gated.iter().all(|r| r.kind != MediaKind::Video));
    assert!(gated.iter().all(|r| r.kind != MediaKind::ForwardErrorCorrection));
    // Rate-filler padding is suppressed; only 1-byte keepalives may pass.
    assert!(gated
        .iter()
        .all(|r| r.kind != MediaKind::Padding || r.size <= 1));

    c.set_congested(false);
    drive(&mut c, &mut s, at(2_000), at(2_100));
    let kinds = s.kinds();
    assert!(kinds.contains(&MediaKind::Video));
    assert!(kinds.contains(&MediaKind::ForwardErrorCorrection));
}

// ─── Queue Time Limit ───────────────────────────────────────────────────────

#[test]
fn backlog_drains_within_the_queue_time_limit() {
    let mut c = controller(1_000, 0);
    c.set_queue_time_limit(TimeDelta::from_millis(100));
    let mut s = RecordingSender::new();
    // 20 000 B would take 20 s at the configured rate.
    for _ in 0..20 {
        c.enqueue_packet(at(0), media(MediaKind::Video, 1, 1_000));
    }

    drive(&mut c, &mut s, at(0), at(400));
    assert!(
        c.queue().is_empty(),
        "relief valve should have drained the backlog, {} left",
        c.queue().packet_count()
    );
    let last = s.sent.last().unwrap().at;
    assert!(last <= at(200), "drained by {last}");
    // The configured rate is a contract: only the effective rate moved.
    assert_eq!(c.pacing_rate(), DataRate::bytes_per_sec(1_000));
    assert!(c.stats().drain_boosts >= 1);
}

// ─── Telemetry ──────────────────────────────────────────────────────────────

#[test]
fn snapshot_exports_to_json() {
    let mut c = controller(125_000, 20_000);
    let mut s = RecordingSender::new();
    c.enqueue_packet(at(0), media(MediaKind::Video, 1, 1_200));
    c.enqueue_packet(at(0), media(MediaKind::Audio, 2, 100));
    drive(&mut c, &mut s, at(0), at(50));

    let snap = c.snapshot();
    let json = serde_json::to_string(&snap).unwrap();
    assert!(json.contains("\"pacing_rate_bps\":125000"));
    assert!(json.contains("\"totals\""));
    assert_eq!(snap.totals.audio_packets_sent, 1);
    assert_eq!(snap.totals.video_packets_sent, 1);
}
