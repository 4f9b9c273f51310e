//! Runtime board profile.
//!
//! Everything that distinguishes one exhibit board from another (identity, server, plants and timing) is
//! loaded from a TOML profile at startup. Every field has a default, so a minimal profile only names the
//! board and its plants:
//!
//! ```toml
//! [board]
//! id = 3
//! name = "Coal and gas"
//!
//! [[plants]]
//! type_id = 7
//! max_watts = 500.0
//! control_channel = 0
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{
    Duration,
    aggregator::LinkSettings,
    client::{ClientSettings, DEFAULT_COEFFICIENTS_PATH, DEFAULT_RANGES_PATH},
    command::CoefficientThresholds,
    error::ConfigError,
    io::SlotBinding,
    node::NodeSettings,
    plant::{MAX_PLANT_TYPES, PlantTable, PlantTypeControl, RegisterError, is_valid_type_id},
    protocol::{BOARD_NAME_LEN, BoardType},
};

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BoardProfile {
    pub board: BoardSection,
    pub server: ServerSection,
    pub timing: TimingSection,
    pub thresholds: ThresholdSection,
    pub plants: Vec<PlantProfile>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BoardSection {
    pub id: u32,
    pub name: String,
    #[serde(rename = "type")]
    pub board_type: BoardType,
    /// Display showing the board's combined production.
    pub total_display: Option<u8>,
}

impl Default for BoardSection {
    fn default() -> Self {
        Self {
            id: 1,
            name: "Board".to_owned(),
            board_type: BoardType::Generic,
            total_display: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub base_url: String,
    pub username: String,
    pub password: String,
    pub ranges_path: String,
    pub coefficients_path: String,
    pub request_timeout_ms: u64,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            base_url: "http://localhost".to_owned(),
            username: "board".to_owned(),
            password: String::new(),
            ranges_path: DEFAULT_RANGES_PATH.to_owned(),
            coefficients_path: DEFAULT_COEFFICIENTS_PATH.to_owned(),
            request_timeout_ms: 5000,
        }
    }
}

/// All intervals in milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingSection {
    pub decrease_grace_ms: u64,
    pub command_interval_ms: u64,
    pub heartbeat_interval_ms: u64,
    pub relay_timeout_ms: u64,
    pub refresh_interval_ms: u64,
    pub poll_interval_ms: u64,
    pub submit_interval_ms: u64,
    pub blink_interval_ms: u64,
}

impl Default for TimingSection {
    fn default() -> Self {
        Self {
            decrease_grace_ms: 500,
            command_interval_ms: 200,
            heartbeat_interval_ms: 2000,
            relay_timeout_ms: 3000,
            refresh_interval_ms: 3000,
            poll_interval_ms: 2000,
            submit_interval_ms: 500,
            blink_interval_ms: 500,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThresholdSection {
    pub wind: f32,
    pub hydro: f32,
    pub solar: f32,
}

impl Default for ThresholdSection {
    fn default() -> Self {
        let defaults = CoefficientThresholds::default();
        Self {
            wind: defaults.wind,
            hydro: defaults.hydro,
            solar: defaults.solar,
        }
    }
}

/// One plant slot on the board.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlantProfile {
    pub type_id: u8,
    #[serde(default)]
    pub min_watts: f32,
    #[serde(default)]
    pub max_watts: f32,
    /// Control input for the slot. Slots without one are driven by the server coefficient.
    #[serde(default)]
    pub control_channel: Option<u8>,
    #[serde(default)]
    pub display: Option<u8>,
    #[serde(default)]
    pub bargraph: Option<u8>,
}

impl BoardProfile {
    /// Read, parse and validate a profile file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let profile: BoardProfile = toml::from_str(contents)?;
        profile.validate()?;
        Ok(profile)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.board.name.is_empty() || self.board.name.len() >= BOARD_NAME_LEN {
            return Err(ConfigError::Invalid(format!(
                "board name must be 1 to {} bytes",
                BOARD_NAME_LEN - 1
            )));
        }
        if self.server.base_url.is_empty() {
            return Err(ConfigError::Invalid("server base_url is empty".to_owned()));
        }
        if self.plants.len() > MAX_PLANT_TYPES {
            return Err(ConfigError::Invalid(format!(
                "{} plants configured, at most {MAX_PLANT_TYPES} supported",
                self.plants.len()
            )));
        }
        for (index, plant) in self.plants.iter().enumerate() {
            if !is_valid_type_id(plant.type_id) {
                return Err(ConfigError::Invalid(format!(
                    "plant type id {} is reserved",
                    plant.type_id
                )));
            }
            if self.plants[..index]
                .iter()
                .any(|other| other.type_id == plant.type_id)
            {
                return Err(ConfigError::Invalid(format!(
                    "plant type id {} configured twice",
                    plant.type_id
                )));
            }
        }
        Ok(())
    }

    /// Build the shared plant table from the configured slots.
    pub fn plant_table(&self) -> Result<PlantTable, ConfigError> {
        let mut table = PlantTable::new();
        for plant in &self.plants {
            table
                .register(PlantTypeControl::new(
                    plant.type_id,
                    plant.min_watts,
                    plant.max_watts,
                    plant.control_channel.is_some(),
                ))
                .map_err(|error| {
                    ConfigError::Invalid(match error {
                        RegisterError::TableFull => "too many plants".to_owned(),
                        RegisterError::Duplicate(id) => format!("plant type id {id} configured twice"),
                        RegisterError::InvalidType(id) => format!("plant type id {id} is reserved"),
                    })
                })?;
        }
        Ok(table)
    }

    /// Control and indicator wiring of every plant slot.
    pub fn io_bindings(&self) -> Vec<SlotBinding> {
        self.plants
            .iter()
            .map(|plant| SlotBinding {
                type_id: plant.type_id,
                control_channel: plant.control_channel,
                display: plant.display,
                bargraph: plant.bargraph,
            })
            .collect()
    }

    pub fn blink_interval(&self) -> Duration {
        Duration::millis(self.timing.blink_interval_ms)
    }

    pub fn thresholds(&self) -> CoefficientThresholds {
        CoefficientThresholds {
            wind: self.thresholds.wind,
            hydro: self.thresholds.hydro,
            solar: self.thresholds.solar,
        }
    }

    pub fn link_settings(&self) -> LinkSettings {
        LinkSettings {
            decrease_grace: Duration::millis(self.timing.decrease_grace_ms),
            command_interval: Duration::millis(self.timing.command_interval_ms),
            heartbeat_interval: Duration::millis(self.timing.heartbeat_interval_ms),
            relay_timeout: Duration::millis(self.timing.relay_timeout_ms),
            thresholds: self.thresholds(),
        }
    }

    pub fn client_settings(&self) -> ClientSettings {
        ClientSettings {
            base_url: self.server.base_url.clone(),
            board_id: self.board.id,
            board_name: self.board.name.clone(),
            board_type: self.board.board_type,
            ranges_path: self.server.ranges_path.clone(),
            coefficients_path: self.server.coefficients_path.clone(),
            refresh_interval: Duration::millis(self.timing.refresh_interval_ms),
        }
    }

    pub fn node_settings(&self) -> NodeSettings {
        NodeSettings {
            username: self.server.username.clone(),
            password: self.server.password.clone(),
            poll_interval: Duration::millis(self.timing.poll_interval_ms),
            submit_interval: Duration::millis(self.timing.submit_interval_ms),
        }
    }

    pub fn request_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.server.request_timeout_ms)
    }
}
