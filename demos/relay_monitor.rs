use std::{env, sync::Arc, time::Duration as StdDuration};

use grid_board::{
    Instant,
    aggregator::{LinkAggregator, LinkSettings},
    config::BoardProfile,
    plant::{PlantTable, PlantType, PlantTypeControl},
};
use inquire::Select;
use serialport::SerialPort;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

const BAUD_RATE: u32 = 115200;
// Reads must return quickly, the link is polled from the main loop.
const SERIAL_TIMEOUT_MS: u64 = 10;
const LOOP_DELAY_MS: u64 = 20;
const STATS_INTERVAL_MS: u64 = 5000;

pub struct PortWrapper(Box<dyn SerialPort>);

#[derive(Debug)]
pub struct IoError(std::io::Error);

impl core::fmt::Display for IoError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for IoError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.0)
    }
}

impl embedded_io::Error for IoError {
    fn kind(&self) -> embedded_io::ErrorKind {
        match self.0.kind() {
            std::io::ErrorKind::NotFound => embedded_io::ErrorKind::NotFound,
            std::io::ErrorKind::PermissionDenied => embedded_io::ErrorKind::PermissionDenied,
            std::io::ErrorKind::BrokenPipe => embedded_io::ErrorKind::BrokenPipe,
            std::io::ErrorKind::InvalidInput => embedded_io::ErrorKind::InvalidInput,
            std::io::ErrorKind::InvalidData => embedded_io::ErrorKind::InvalidData,
            std::io::ErrorKind::TimedOut => embedded_io::ErrorKind::TimedOut,
            std::io::ErrorKind::Interrupted => embedded_io::ErrorKind::Interrupted,
            std::io::ErrorKind::Unsupported => embedded_io::ErrorKind::Unsupported,
            _ => embedded_io::ErrorKind::Other,
        }
    }
}

impl embedded_io::ErrorType for PortWrapper {
    type Error = IoError;
}

impl embedded_io::Read for PortWrapper {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        std::io::Read::read(&mut self.0, buf).map_err(IoError)
    }
}

impl embedded_io::Write for PortWrapper {
    fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        std::io::Write::write(&mut self.0, buf).map_err(IoError)
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        std::io::Write::flush(&mut self.0).map_err(IoError)
    }
}

/// Plants used when no profile is given, all at half output.
fn default_plants() -> PlantTable {
    let mut table = PlantTable::new();
    for plant_type in [PlantType::Photovoltaic, PlantType::Wind, PlantType::Gas, PlantType::Coal] {
        table
            .register(PlantTypeControl::new(plant_type as u8, 0.0, 500.0, true))
            .expect("default plant table");
    }
    table
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    // Usage: relay_monitor [PORT] [PROFILE.toml]
    let port_name = env::args().nth(1).unwrap_or_else(|| {
        let ports = serialport::available_ports().expect("Failed to enumerate serial ports");

        if ports.is_empty() {
            eprintln!("No serial ports found!");
            std::process::exit(1);
        }

        let port_names: Vec<String> = ports.iter().map(|p| p.port_name.clone()).collect();

        Select::new("Select the relay serial port:", port_names)
            .prompt()
            .expect("Failed to select port")
    });

    let (plants, settings) = match env::args().nth(2) {
        Some(path) => {
            let profile = BoardProfile::load(&path).expect("Failed to load board profile");
            info!(%path, board = %profile.board.name, "profile loaded");
            (
                profile.plant_table().expect("Invalid plant table"),
                profile.link_settings(),
            )
        }
        None => (default_plants(), LinkSettings::default()),
    };
    let plants = Arc::new(plants);
    plants.set_game_active(true);

    info!(port = %port_name, "opening relay link");
    let port = serialport::new(&port_name, BAUD_RATE)
        .timeout(StdDuration::from_millis(SERIAL_TIMEOUT_MS))
        .open()
        .expect("Failed to open serial port");

    let mut link = LinkAggregator::new(PortWrapper(port), plants, settings);

    let started = std::time::Instant::now();
    let mut last_stats = 0;
    loop {
        let now_ms = started.elapsed().as_millis() as u64;
        let now = Instant::from_ticks(now_ms);

        if let Err(error) = link.poll_link(now) {
            warn!(%error, "relay read failed");
        }
        if let Err(error) = link.update_link_status(now) {
            warn!(%error, "status request failed");
        }
        match link.update_commands(now) {
            Ok(0) => {}
            Ok(sent) => {
                debug!(sent, "commands sent");
                for (type_id, power) in link.connected_power_plants() {
                    debug!(
                        type_id,
                        count = link.committed_count(type_id),
                        power,
                        "connected plants"
                    );
                }
            }
            Err(error) => warn!(%error, "command send failed"),
        }

        if now_ms - last_stats >= STATS_INTERVAL_MS {
            last_stats = now_ms;
            let stats = link.stats();
            info!(
                connected = link.is_connected(),
                total = link.total_production(),
                ?stats,
                "link status"
            );
        }

        std::thread::sleep(StdDuration::from_millis(LOOP_DELAY_MS));
    }
}
