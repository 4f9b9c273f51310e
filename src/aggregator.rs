use std::sync::Arc;

use embedded_io::Error;
use tracing::{debug, info, warn};

use crate::{
    Duration, Instant,
    command::{CoefficientThresholds, command_for},
    elapsed,
    error::{LinkError, LinkResult},
    frame::{FrameDecoder, LinkStats, MAX_PAYLOAD, send_frame},
    plant::{PlantTable, STATUS_TYPE_ID, compute_power_per_plant},
    reconcile::{MAX_REMOTE_TYPES, Reconciler, RemoteSlaveReport, parse_report},
};

/// Payload of the liveness probe, and the tag the relay echoes back.
pub const STATUS_REQUEST: [u8; 2] = [STATUS_TYPE_ID, 0x33];

/// Timing and threshold parameters of the relay link.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinkSettings {
    /// How long a decrease must stand before it is committed.
    pub decrease_grace: Duration,
    /// Minimum spacing between command cycles.
    pub command_interval: Duration,
    /// Minimum spacing between status requests.
    pub heartbeat_interval: Duration,
    /// Silence after which the relay counts as disconnected.
    pub relay_timeout: Duration,
    pub thresholds: CoefficientThresholds,
}

impl Default for LinkSettings {
    fn default() -> Self {
        Self {
            decrease_grace: Duration::millis(500),
            command_interval: Duration::millis(200),
            heartbeat_interval: Duration::millis(2000),
            relay_timeout: Duration::millis(3000),
            thresholds: CoefficientThresholds::default(),
        }
    }
}

/// You can create a LinkAggregator using any interface which implements [embedded_io::Read] &
/// [embedded_io::Write].
///
/// The aggregator owns the relay link: it pumps received bytes through the frame decoder, merges relay
/// reports, sends device commands and keeps track of relay liveness. Plant state is shared with the I/O
/// task through the [`PlantTable`].
pub struct LinkAggregator<S: embedded_io::Read + embedded_io::Write> {
    interface: S,
    decoder: FrameDecoder,
    reconciler: Reconciler,
    plants: Arc<PlantTable>,
    settings: LinkSettings,
    connected: bool,
    last_frame_at: Option<Instant>,
    last_heartbeat_at: Option<Instant>,
    last_command_at: Option<Instant>,
}

impl<S: embedded_io::Read + embedded_io::Write> LinkAggregator<S> {
    pub fn new(interface: S, plants: Arc<PlantTable>, settings: LinkSettings) -> Self {
        Self {
            interface,
            decoder: FrameDecoder::new(),
            reconciler: Reconciler::new(settings.decrease_grace),
            plants,
            settings,
            connected: false,
            last_frame_at: None,
            last_heartbeat_at: None,
            last_command_at: None,
        }
    }

    pub fn plants(&self) -> &Arc<PlantTable> {
        &self.plants
    }

    pub fn stats(&self) -> LinkStats {
        self.decoder.stats()
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn committed_count(&self, type_id: u8) -> u8 {
        self.reconciler.committed_count(type_id)
    }

    pub fn reconciler(&self) -> &Reconciler {
        &self.reconciler
    }

    /// Give the serial interface back.
    pub fn release(self) -> S {
        self.interface
    }

    /// Drain every byte currently available on the link and handle the frames they complete.
    ///
    /// Returns the number of valid frames seen.
    pub fn poll_link(&mut self, now: Instant) -> LinkResult<usize, S::Error> {
        let mut frames = 0;
        let mut buf = [0u8; 64];
        loop {
            match self.interface.read(&mut buf) {
                Ok(0) => break,
                Ok(bytes_read) => {
                    for &byte in &buf[..bytes_read] {
                        if self.decoder.process_byte(byte) {
                            frames += 1;
                            let payload: heapless::Vec<u8, MAX_PAYLOAD> =
                                heapless::Vec::from_slice(self.decoder.payload())
                                    .unwrap_or_default();
                            self.decoder.reset();
                            self.handle_payload(&payload, now);
                        }
                    }
                }
                Err(e) => {
                    // Nothing more to read right now.
                    if matches!(
                        e.kind(),
                        embedded_io::ErrorKind::Other | embedded_io::ErrorKind::TimedOut
                    ) {
                        break;
                    }
                    return Err(LinkError::Serial(e));
                }
            }
        }
        Ok(frames)
    }

    fn handle_payload(&mut self, payload: &[u8], now: Instant) {
        if payload.first() == Some(&STATUS_TYPE_ID) {
            debug!("relay status response");
            self.mark_alive(now);
            return;
        }
        match parse_report::<S::Error>(payload) {
            Ok(report) => {
                self.mark_alive(now);
                self.reconciler.ingest(&report, now);
            }
            Err(error) => warn!(%error, "relay report dropped"),
        }
    }

    /// Merge a relay report directly, bypassing the serial link.
    pub fn ingest_report(&mut self, report: &[RemoteSlaveReport], now: Instant) {
        self.reconciler.ingest(report, now);
    }

    fn mark_alive(&mut self, now: Instant) {
        self.last_frame_at = Some(now);
        if !self.connected {
            info!("relay link connected");
            self.connected = true;
            self.plants.set_relay_connected(true);
        }
    }

    /// Send a throttled status request and expire the link if the relay has gone quiet.
    ///
    /// Returns whether the relay currently counts as connected.
    pub fn update_link_status(&mut self, now: Instant) -> LinkResult<bool, S::Error> {
        let heartbeat_due = self
            .last_heartbeat_at
            .is_none_or(|last| elapsed(now, last) >= self.settings.heartbeat_interval);
        if heartbeat_due {
            self.last_heartbeat_at = Some(now);
            send_frame(&STATUS_REQUEST, &mut self.interface)?;
        }

        let silent = self
            .last_frame_at
            .is_none_or(|last| elapsed(now, last) > self.settings.relay_timeout);
        if self.connected && silent {
            warn!("relay link lost");
            self.connected = false;
            self.plants.set_relay_connected(false);
        }
        Ok(self.connected)
    }

    /// Run one command cycle if the command interval has passed.
    ///
    /// Due decreases are committed first, then every committed type with units connected gets one
    /// `[type_id, cmd4]` pair, all sent in a single frame. Returns the number of pairs sent.
    pub fn update_commands(&mut self, now: Instant) -> LinkResult<usize, S::Error> {
        if self
            .last_command_at
            .is_some_and(|last| elapsed(now, last) < self.settings.command_interval)
        {
            return Ok(0);
        }
        self.last_command_at = Some(now);

        self.reconciler.apply_due(now);
        self.publish();

        let game_active = self.plants.game_active();
        let mut payload: heapless::Vec<u8, MAX_PAYLOAD> = heapless::Vec::new();
        for remote in self.reconciler.committed().iter().filter(|r| r.count > 0) {
            let snapshot = self.plants.get(remote.type_id).map(|slot| slot.snapshot());
            let command = command_for(snapshot.as_ref(), game_active, &self.settings.thresholds);
            if payload
                .extend_from_slice(&[remote.type_id, command.code() & 0x0F])
                .is_err()
            {
                warn!("command frame full, remaining types skipped");
                break;
            }
            debug!(
                type_id = remote.type_id,
                count = remote.count,
                ?command,
                "device command"
            );
        }

        if payload.is_empty() {
            return Ok(0);
        }
        send_frame(&payload, &mut self.interface)?;
        Ok(payload.len() / 2)
    }

    /// Copy committed counts and totals into the shared slots for the I/O task.
    fn publish(&self) {
        for slot in self.plants.slots() {
            let type_id = slot.type_id();
            slot.publish(
                self.reconciler.committed_count(type_id),
                self.total_power_for_type(type_id),
            );
        }
    }

    /// Power of every connected unit of a type combined.
    ///
    /// Zero when the board has no slot for the type, no units are connected or the type is disabled.
    pub fn total_power_for_type(&self, type_id: u8) -> f32 {
        let Some(slot) = self.plants.get(type_id) else {
            return 0.0;
        };
        let count = self.reconciler.committed_count(type_id);
        let snapshot = slot.snapshot();
        if count == 0 || snapshot.max_watts <= 0.0 {
            return 0.0;
        }
        compute_power_per_plant(&snapshot, self.plants.game_active()) * count as f32
    }

    /// `(type_id, total power)` for every committed type with units connected.
    pub fn connected_power_plants(&self) -> heapless::Vec<(u8, f32), MAX_REMOTE_TYPES> {
        self.reconciler
            .committed()
            .iter()
            .filter(|r| r.count > 0)
            .map(|r| (r.type_id, self.total_power_for_type(r.type_id)))
            .collect()
    }

    /// Sum of every connected type's power. This is what the board reports as generation.
    pub fn total_production(&self) -> f32 {
        self.connected_power_plants()
            .iter()
            .map(|(_, power)| power)
            .sum()
    }
}
