//! # Packet module
//!
//! Definitions of the packets exchanged between the field controller (FMS) and a robot, and the
//! codec that converts them to and from the wire format.
//!
//! On the wire every packet is a JSON envelope of the form
//!
//! ```json
//! {"type":"STATUS","data":"ENABLE"}
//! ```
//!
//! where `type` selects how `data` is interpreted. Envelopes are sent back to back with no length
//! prefix or delimiter, see [`crate::net::framing`] for how they are recovered from a stream.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde::{Serialize, Deserialize};
use serde_json::error::Category;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// One sampled joystick frame.
///
/// Stick values are in raw controller units and must be normalised with [`MovementData::scale`]
/// before use.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementData {
    /// Side-to-side stick position, positive right.
    pub stick_x: i32,

    /// Fore-aft stick position, positive forward.
    pub stick_y: i32,

    /// State of each controller button, in controller order.
    pub buttons: Vec<bool>,

    /// Additional analog axes (triggers, second stick), in raw controller units.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub axes: Vec<i32>,
}

/// Stick positions normalised into the canonical `-128..=127` range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScaledSticks {
    /// Turn axis
    pub x: i32,

    /// Forward axis
    pub y: i32,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// A packet, as sent over the control link.
///
/// The variant is the envelope's `type`, the variant's content is its `data`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Packet {
    /// Commands a robot state change
    Status(RobotState),

    /// Asks the peer for information
    Request(Request),

    /// Answers a request
    Response(RobotState),

    /// Driver input
    Data(MovementPayload),
}

/// The discriminant of a [`Packet`], as found in the envelope's `type` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PacketType {
    Status,
    Request,
    Response,
    Data,
}

/// Robot operating state, as commanded or reported over the link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RobotState {
    Enable,
    Disable,
    EStop,
}

/// Things the FMS can ask a robot for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Request {
    Status,
}

/// Payload of a `DATA` packet: either one frame or a batch of frames to be processed in order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MovementPayload {
    Single(MovementData),
    Batch(Vec<MovementData>),
}

/// Errors which can occur while decoding a packet.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("Packet is not valid JSON: {0}")]
    InvalidJson(serde_json::Error),

    #[error("Packet is incomplete: {0}")]
    Incomplete(serde_json::Error),

    #[error("Packet is not a recognised envelope: {0}")]
    InvalidEnvelope(serde_json::Error),
}

/// Errors which can occur while encoding a packet.
#[derive(Debug, thiserror::Error)]
#[error("Could not serialize the packet: {0}")]
pub struct EncodeError(#[from] serde_json::Error);

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Packet {

    /// Decode a packet from the bytes of a single frame.
    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        serde_json::from_slice(bytes).map_err(|e| match e.classify() {
            Category::Eof => DecodeError::Incomplete(e),
            Category::Data => DecodeError::InvalidEnvelope(e),
            Category::Syntax | Category::Io => DecodeError::InvalidJson(e),
        })
    }

    /// Encode this packet into its wire representation.
    ///
    /// The output is compact JSON with fields in a fixed order, so encoding is deterministic.
    pub fn encode(&self) -> Result<Vec<u8>, EncodeError> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Get the type of this packet
    pub fn packet_type(&self) -> PacketType {
        match self {
            Packet::Status(_) => PacketType::Status,
            Packet::Request(_) => PacketType::Request,
            Packet::Response(_) => PacketType::Response,
            Packet::Data(_) => PacketType::Data,
        }
    }
}

impl MovementPayload {
    /// Iterate over the movement frames in this payload, in the order they were sent.
    pub fn frames(&self) -> std::slice::Iter<'_, MovementData> {
        match self {
            MovementPayload::Single(m) => std::slice::from_ref(m).iter(),
            MovementPayload::Batch(v) => v.iter(),
        }
    }
}

impl MovementData {

    /// Normalise the raw stick values into the canonical `-128..=127` range.
    ///
    /// `raw_max` is the raw value the controller reports at full deflection.
    pub fn scale(&self, raw_max: i32) -> ScaledSticks {
        ScaledSticks {
            x: scale_axis(self.stick_x, raw_max),
            y: scale_axis(self.stick_y, raw_max),
        }
    }

    /// Get the state of a button, buttons which weren't sent are released.
    pub fn button(&self, index: usize) -> bool {
        self.buttons.get(index).copied().unwrap_or(false)
    }

    /// Get the raw value of an additional axis, axes which weren't sent are centred.
    pub fn axis(&self, index: usize) -> i32 {
        self.axes.get(index).copied().unwrap_or(0)
    }
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Map a raw axis value onto `-128..=127`.
pub fn scale_axis(raw: i32, raw_max: i32) -> i32 {
    if raw_max <= 0 {
        return 0;
    }

    let scaled = (raw as f64 * 128.0 / raw_max as f64).round();
    scaled.max(-128.0).min(127.0) as i32
}
