//! This crate implements the control node of a power-grid simulation exhibit board.
//!
//! The board reads operator controls, drives local indicators, aggregates plant-count reports from a relay
//! station over a serial link, and keeps a remote game server informed of its production over HTTP.
//!
//! It is split into three layers:
//! * [`frame`] - the CRC16-protected framing used on the serial link to the relay station.
//! * [`aggregator`] - merges local control state with debounced relay reports and drives device commands.
//! * [`client`] - the binary protocol client for the game server.
//!
//! [`node::ControlNode`] wires the aggregator and the client together on the control/network task, while
//! [`io::IoTask`] services the controls and indicators on the high-rate I/O task. Both share one
//! [`plant::PlantTable`] behind an `Arc`.
//!
//! The relay serial link is any interface implementing [embedded_io::Read] & [embedded_io::Write]. It should be
//! configured like so:
//! * Baud rate: 115200
//! * Data bits: 8
//! * Stop bits: 1
//! * Parity: None
//!
//! Reads are expected to be non-blocking. An error of kind [embedded_io::ErrorKind::Other] or
//! [embedded_io::ErrorKind::TimedOut] is treated as "no more data for now".

pub mod aggregator;
pub mod client;
pub mod command;
pub mod config;
pub mod error;
pub mod frame;
pub mod http;
pub mod io;
pub mod node;
pub mod plant;
pub mod protocol;
pub mod reconcile;

#[cfg(test)]
mod mock_http;
#[cfg(test)]
mod mock_serial;

/// Millisecond timestamp supplied by the caller to every timed operation.
pub type Instant = fugit::TimerInstantU64<1000>;
/// Millisecond duration.
pub type Duration = fugit::MillisDurationU64;

/// Time elapsed from `since` to `now`, zero if the clock appears to have gone backwards.
pub(crate) fn elapsed(now: Instant, since: Instant) -> Duration {
    now.checked_duration_since(since)
        .unwrap_or(Duration::from_ticks(0))
}
