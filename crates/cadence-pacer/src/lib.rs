//! # cadence-pacer
//!
//! Packet-pacing scheduler for real-time packetized-media transport.
//!
//! Decides, for every outgoing packet, when it may leave the host so that
//! aggregate egress matches a dynamically-assigned target rate, while
//! preserving priority among traffic classes (audio before retransmissions
//! before video/FEC before padding), supporting bandwidth-probing bursts,
//! and degrading gracefully when the queue grows too deep.
//!
//! Single-threaded, cooperative and non-blocking: the controller performs
//! no I/O and never sleeps. A driver asks
//! [`controller::PacingController::next_send_time`] when to wake up, calls
//! [`controller::PacingController::process_packets`] at or near that time,
//! and processes promptly whenever the queue goes from empty to non-empty.
//!
//! ## Crate structure
//!
//! - [`units`] — Semantic time/size/rate quantities with infinity sentinels
//! - [`packet`] — Media kinds, priority levels, queued packets
//! - [`queue`] — Priority queue with per-level round-robin fairness
//! - [`prober`] — Bandwidth probe clusters and timing
//! - [`controller`] — Debt accounting, scheduling, the sender interface
//! - [`stats`] — Serializable counters and snapshots
//! - [`clock`] — Monotonic clock helper for embedding drivers

pub mod clock;
pub mod controller;
pub mod packet;
pub mod prober;
pub mod queue;
pub mod stats;
pub mod units;
