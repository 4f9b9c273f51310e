//! Wire formats spoken with the game server.
//!
//! Every binary struct is big-endian and starts with [`PROTOCOL_VERSION`]. Power values travel as signed
//! centiwatts, with [`POWER_NULL`] standing in for "no value".

use modular_bitfield::prelude::*;
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString, IntoStaticStr};

use crate::error::ClientError;

pub const PROTOCOL_VERSION: u8 = 0x01;
/// Sentinel for an absent power value.
pub const POWER_NULL: i32 = 0x7FFF_FFFF;
/// What an absent power value decodes to.
pub const POWER_ABSENT: f32 = -1.0;

pub const BOARD_NAME_LEN: usize = 32;
pub const BOARD_TYPE_LEN: usize = 16;
pub const REGISTRATION_MESSAGE_LEN: usize = 64;

pub const REGISTRATION_REQUEST_SIZE: usize = 1 + 4 + BOARD_NAME_LEN + BOARD_TYPE_LEN;
/// Version, success and message length. The message itself is optional.
pub const REGISTRATION_RESPONSE_MIN_SIZE: usize = 3;
pub const POWER_DATA_REQUEST_SIZE: usize = 1 + 4 + 8 + 4 + 4 + 1;
pub const POLL_RESPONSE_SIZE: usize = 1 + 8 + 2 + 4 + 4 + 4 + 1;

/// Round status reported by the server.
#[bitfield(bytes = 1)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusFlags {
    /// Day round when set, night otherwise.
    pub day: bool,
    pub game_active: bool,
    /// The server wants power data this round.
    pub expecting_data: bool,
    #[skip]
    __: B5,
}

impl StatusFlags {
    pub fn is_day(&self) -> bool {
        self.day()
    }

    pub fn is_game_active(&self) -> bool {
        self.game_active()
    }

    pub fn is_expecting_data(&self) -> bool {
        self.expecting_data()
    }
}

impl From<u8> for StatusFlags {
    fn from(value: u8) -> Self {
        StatusFlags::from_bytes([value])
    }
}

impl From<StatusFlags> for u8 {
    fn from(value: StatusFlags) -> Self {
        value.into_bytes()[0]
    }
}

/// Which values of a power submission are present.
#[bitfield(bytes = 1)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataFlags {
    pub generation_present: bool,
    pub consumption_present: bool,
    #[skip]
    __: B6,
}

impl From<u8> for DataFlags {
    fn from(value: u8) -> Self {
        DataFlags::from_bytes([value])
    }
}

impl From<DataFlags> for u8 {
    fn from(value: DataFlags) -> Self {
        value.into_bytes()[0]
    }
}

/// Board category announced at registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display, EnumString, IntoStaticStr)]
#[derive(Serialize, Deserialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum BoardType {
    Solar,
    Wind,
    Battery,
    #[default]
    Generic,
}

/// Watts to centiwatts, rounded to nearest. Saturates below [`POWER_NULL`] so a real value is never
/// read as absent.
pub fn to_centiwatts(watts: f32) -> i32 {
    (watts as f64 * 100.0)
        .round()
        .clamp(i32::MIN as f64, (POWER_NULL - 1) as f64) as i32
}

/// Centiwatts to watts, with the sentinel decoding to [`POWER_ABSENT`].
pub fn from_centiwatts(raw: i32) -> f32 {
    if raw == POWER_NULL {
        POWER_ABSENT
    } else {
        (raw as f64 / 100.0) as f32
    }
}

/// Encode a value for the wire, substituting the sentinel when it is flagged absent or negative.
pub fn encode_power(watts: f32, present: bool) -> i32 {
    if present && watts >= 0.0 {
        to_centiwatts(watts)
    } else {
        POWER_NULL
    }
}

/// Copy `text` into a NUL-terminated fixed-width field, truncating to leave room for the terminator.
fn write_fixed_str(field: &mut [u8], text: &str) {
    let len = text.len().min(field.len() - 1);
    field[..len].copy_from_slice(&text.as_bytes()[..len]);
}

fn check_length(bytes: &[u8], expected: usize) -> Result<(), ClientError> {
    if bytes.len() < expected {
        return Err(ClientError::ResponseTooShort {
            expected,
            actual: bytes.len(),
        });
    }
    Ok(())
}

fn check_version(version: u8) -> Result<(), ClientError> {
    if version != PROTOCOL_VERSION {
        return Err(ClientError::VersionMismatch(version));
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrationRequest<'a> {
    pub board_id: u32,
    pub board_name: &'a str,
    pub board_type: BoardType,
}

impl RegistrationRequest<'_> {
    pub fn encode(&self) -> [u8; REGISTRATION_REQUEST_SIZE] {
        let mut bytes = [0u8; REGISTRATION_REQUEST_SIZE];
        bytes[0] = PROTOCOL_VERSION;
        bytes[1..5].copy_from_slice(&self.board_id.to_be_bytes());
        write_fixed_str(&mut bytes[5..5 + BOARD_NAME_LEN], self.board_name);
        let board_type: &'static str = self.board_type.into();
        write_fixed_str(&mut bytes[5 + BOARD_NAME_LEN..], board_type);
        bytes
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrationResponse {
    pub version: u8,
    pub success: bool,
    /// Server message, bounded by the advertised length and what was actually received.
    pub message: String,
}

impl RegistrationResponse {
    pub fn decode(bytes: &[u8]) -> Result<Self, ClientError> {
        check_length(bytes, REGISTRATION_RESPONSE_MIN_SIZE)?;
        let advertised = (bytes[2] as usize).min(REGISTRATION_MESSAGE_LEN);
        let body = &bytes[REGISTRATION_RESPONSE_MIN_SIZE..];
        let message = &body[..advertised.min(body.len())];
        let message = message.split(|&b| b == 0).next().unwrap_or_default();
        Ok(Self {
            version: bytes[0],
            success: bytes[1] == 0x01,
            message: String::from_utf8_lossy(message).into_owned(),
        })
    }

    pub fn is_accepted(&self) -> bool {
        self.version == PROTOCOL_VERSION && self.success
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PowerDataRequest {
    pub board_id: u32,
    /// Unix seconds.
    pub timestamp: u64,
    pub generation_cw: i32,
    pub consumption_cw: i32,
    pub flags: DataFlags,
}

impl PowerDataRequest {
    pub fn new(
        board_id: u32,
        timestamp: u64,
        generation: f32,
        consumption: f32,
        flags: DataFlags,
    ) -> Self {
        Self {
            board_id,
            timestamp,
            generation_cw: encode_power(generation, flags.generation_present()),
            consumption_cw: encode_power(consumption, flags.consumption_present()),
            flags,
        }
    }

    pub fn encode(&self) -> [u8; POWER_DATA_REQUEST_SIZE] {
        let mut bytes = [0u8; POWER_DATA_REQUEST_SIZE];
        bytes[0] = PROTOCOL_VERSION;
        bytes[1..5].copy_from_slice(&self.board_id.to_be_bytes());
        bytes[5..13].copy_from_slice(&self.timestamp.to_be_bytes());
        bytes[13..17].copy_from_slice(&self.generation_cw.to_be_bytes());
        bytes[17..21].copy_from_slice(&self.consumption_cw.to_be_bytes());
        bytes[21] = self.flags.into();
        bytes
    }
}

/// Decoded poll response. Absent power values are [`POWER_ABSENT`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PollResponse {
    pub timestamp: u64,
    pub round: u16,
    pub score: u32,
    pub generation: f32,
    pub consumption: f32,
    pub flags: StatusFlags,
}

impl PollResponse {
    pub fn decode(bytes: &[u8]) -> Result<Self, ClientError> {
        check_length(bytes, POLL_RESPONSE_SIZE)?;
        check_version(bytes[0])?;

        let mut timestamp = [0u8; 8];
        timestamp.copy_from_slice(&bytes[1..9]);
        let mut round = [0u8; 2];
        round.copy_from_slice(&bytes[9..11]);
        let mut score = [0u8; 4];
        score.copy_from_slice(&bytes[11..15]);
        let mut generation = [0u8; 4];
        generation.copy_from_slice(&bytes[15..19]);
        let mut consumption = [0u8; 4];
        consumption.copy_from_slice(&bytes[19..23]);

        Ok(Self {
            timestamp: u64::from_be_bytes(timestamp),
            round: u16::from_be_bytes(round),
            score: u32::from_be_bytes(score),
            generation: from_centiwatts(i32::from_be_bytes(generation)),
            consumption: from_centiwatts(i32::from_be_bytes(consumption)),
            flags: StatusFlags::from(bytes[23]),
        })
    }
}

#[derive(Debug, Serialize)]
pub struct LoginRequest<'a> {
    pub username: &'a str,
    pub password: &'a str,
}

#[derive(Debug, Deserialize)]
pub struct LoginResponse {
    pub token: Option<String>,
}

/// Server `(min, max)` bounds for one source type.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProductionRange {
    pub source_id: u32,
    pub min_power: f32,
    pub max_power: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProductionCoefficient {
    pub source_id: u32,
    pub coefficient: f32,
}
