//! Shared types, error enum, and BaseStation message model for sbs-core.

use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use thiserror::Error;

/// All errors produced by sbs-core.
#[derive(Debug, Error)]
pub enum SbsError {
    #[error("unknown message kind: {0:?}")]
    UnknownKind(String),
    #[error("field count mismatch for {kind}: expected {expected}, got {actual}")]
    FieldCountMismatch {
        kind: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("invalid field: {0}")]
    InvalidField(&'static str),
    #[error("payload is not single-byte text")]
    Decode,
    #[error("no payload")]
    AbsentPayload,
    #[error("record longer than {0} bytes")]
    Oversize(usize),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("config error: {0}")]
    Config(String),
    #[error("message log error: {0}")]
    Log(String),
}

pub type Result<T> = std::result::Result<T, SbsError>;

// ---------------------------------------------------------------------------
// ICAO address helpers
// ---------------------------------------------------------------------------

/// 3-byte ICAO address. Stored as raw bytes so lookups never depend on the
/// letter case the feed happened to use.
pub type Icao = [u8; 3];

/// Format ICAO address as 6-char uppercase hex string.
pub fn icao_to_string(icao: &Icao) -> String {
    format!("{:02X}{:02X}{:02X}", icao[0], icao[1], icao[2])
}

/// Parse a 6-char hex string (either case) into an ICAO address.
pub fn icao_from_hex(hex: &str) -> Option<Icao> {
    if hex.len() != 6 || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    let val = u32::from_str_radix(hex, 16).ok()?;
    Some([
        ((val >> 16) & 0xFF) as u8,
        ((val >> 8) & 0xFF) as u8,
        (val & 0xFF) as u8,
    ])
}

/// Serialize an ICAO address as its hex string rather than a byte array.
pub fn serialize_icao<S: Serializer>(icao: &Icao, serializer: S) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_str(&icao_to_string(icao))
}

// ---------------------------------------------------------------------------
// Position
// ---------------------------------------------------------------------------

/// Geodetic point. Only constructible with both coordinates in range, so a
/// half-filled position cannot exist.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Position {
    latitude: f64,
    longitude: f64,
}

impl Position {
    pub fn new(latitude: f64, longitude: f64) -> Result<Self> {
        let pos = Position {
            latitude,
            longitude,
        };
        if pos.is_valid() {
            Ok(pos)
        } else {
            Err(SbsError::InvalidField("position"))
        }
    }

    pub fn latitude(&self) -> f64 {
        self.latitude
    }

    pub fn longitude(&self) -> f64 {
        self.longitude
    }

    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
    }
}

// ---------------------------------------------------------------------------
// Enumerations
// ---------------------------------------------------------------------------

/// Record kind, selected by the first field of a line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum MessageKind {
    Status,
    NewAircraft,
    Id,
    Transmission,
}

impl MessageKind {
    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "STA" => Some(MessageKind::Status),
            "AIR" => Some(MessageKind::NewAircraft),
            "ID" => Some(MessageKind::Id),
            "MSG" => Some(MessageKind::Transmission),
            _ => None,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            MessageKind::Status => "STA",
            MessageKind::NewAircraft => "AIR",
            MessageKind::Id => "ID",
            MessageKind::Transmission => "MSG",
        }
    }

    /// Number of comma-separated fields a record of this kind carries.
    pub fn field_count(&self) -> usize {
        match self {
            MessageKind::Status => 11,
            MessageKind::NewAircraft => 10,
            MessageKind::Id => 11,
            MessageKind::Transmission => 22,
        }
    }
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

/// Status codes carried by `STA` records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StatusKind {
    PositionLost,
    SignalLost,
    Remove,
    Delete,
    Ok,
}

impl StatusKind {
    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "PL" => Some(StatusKind::PositionLost),
            "SL" => Some(StatusKind::SignalLost),
            "RM" => Some(StatusKind::Remove),
            "AD" => Some(StatusKind::Delete),
            "OK" => Some(StatusKind::Ok),
            _ => None,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            StatusKind::PositionLost => "PL",
            StatusKind::SignalLost => "SL",
            StatusKind::Remove => "RM",
            StatusKind::Delete => "AD",
            StatusKind::Ok => "OK",
        }
    }
}

/// `MSG` subtype (second field, 1-8).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TransmissionType {
    IdentificationAndCategory,
    SurfacePosition,
    AirbornePosition,
    AirborneVelocity,
    SurveillanceAltitude,
    SurveillanceId,
    AirToAir,
    AllCallReply,
}

impl TransmissionType {
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(TransmissionType::IdentificationAndCategory),
            2 => Some(TransmissionType::SurfacePosition),
            3 => Some(TransmissionType::AirbornePosition),
            4 => Some(TransmissionType::AirborneVelocity),
            5 => Some(TransmissionType::SurveillanceAltitude),
            6 => Some(TransmissionType::SurveillanceId),
            7 => Some(TransmissionType::AirToAir),
            8 => Some(TransmissionType::AllCallReply),
            _ => None,
        }
    }

    pub fn code(&self) -> u8 {
        match self {
            TransmissionType::IdentificationAndCategory => 1,
            TransmissionType::SurfacePosition => 2,
            TransmissionType::AirbornePosition => 3,
            TransmissionType::AirborneVelocity => 4,
            TransmissionType::SurveillanceAltitude => 5,
            TransmissionType::SurveillanceId => 6,
            TransmissionType::AirToAir => 7,
            TransmissionType::AllCallReply => 8,
        }
    }
}

// ---------------------------------------------------------------------------
// Parsed message types
// ---------------------------------------------------------------------------

/// STA: status change for an aircraft.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusMsg {
    #[serde(serialize_with = "serialize_icao")]
    pub icao: Icao,
    pub status: StatusKind,
    pub generated_at: Option<DateTime<Utc>>,
    pub received_at: DateTime<Utc>,
}

/// AIR: first sighting of an address.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewAircraftMsg {
    #[serde(serialize_with = "serialize_icao")]
    pub icao: Icao,
    pub generated_at: Option<DateTime<Utc>>,
    pub received_at: DateTime<Utc>,
}

/// ID: identity (call sign) report.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IdMsg {
    #[serde(serialize_with = "serialize_icao")]
    pub icao: Icao,
    pub call_sign: Option<String>,
    pub generated_at: Option<DateTime<Utc>>,
    pub received_at: DateTime<Utc>,
}

/// MSG: transponder transmission, subtype in `transmission_type`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransmissionMsg {
    #[serde(serialize_with = "serialize_icao")]
    pub icao: Icao,
    pub transmission_type: TransmissionType,
    pub call_sign: Option<String>,
    pub altitude: Option<f32>,
    pub ground_speed: Option<f32>,
    pub track: Option<f32>,
    pub position: Option<Position>,
    pub vertical_rate: Option<i32>,
    pub squawk: Option<u16>,
    pub alert: Option<bool>,
    pub emergency: Option<bool>,
    pub ident_active: Option<bool>,
    pub on_ground: Option<bool>,
    pub generated_at: Option<DateTime<Utc>>,
    pub received_at: DateTime<Utc>,
}

/// Union type for all parsed BaseStation records.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum Message {
    Status(StatusMsg),
    NewAircraft(NewAircraftMsg),
    Id(IdMsg),
    Transmission(TransmissionMsg),
}

impl Message {
    /// Get the ICAO address from any message type.
    pub fn icao(&self) -> &Icao {
        match self {
            Message::Status(m) => &m.icao,
            Message::NewAircraft(m) => &m.icao,
            Message::Id(m) => &m.icao,
            Message::Transmission(m) => &m.icao,
        }
    }

    /// Get the reception time from any message type.
    pub fn received_at(&self) -> DateTime<Utc> {
        match self {
            Message::Status(m) => m.received_at,
            Message::NewAircraft(m) => m.received_at,
            Message::Id(m) => m.received_at,
            Message::Transmission(m) => m.received_at,
        }
    }

    pub fn generated_at(&self) -> Option<DateTime<Utc>> {
        match self {
            Message::Status(m) => m.generated_at,
            Message::NewAircraft(m) => m.generated_at,
            Message::Id(m) => m.generated_at,
            Message::Transmission(m) => m.generated_at,
        }
    }

    /// Call sign for the variants that carry one. Blank values never get here.
    pub fn call_sign(&self) -> Option<&str> {
        match self {
            Message::Id(m) => m.call_sign.as_deref(),
            Message::Transmission(m) => m.call_sign.as_deref(),
            Message::Status(_) | Message::NewAircraft(_) => None,
        }
    }

    pub fn kind(&self) -> MessageKind {
        match self {
            Message::Status(_) => MessageKind::Status,
            Message::NewAircraft(_) => MessageKind::NewAircraft,
            Message::Id(_) => MessageKind::Id,
            Message::Transmission(_) => MessageKind::Transmission,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
