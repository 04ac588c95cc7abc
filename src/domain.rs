use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::error::DashError;

/// a single controller field value as it travels on the wire
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Bool(bool),
    Number(f64),
}

impl FieldValue {
    /// scalar json values only; null, strings, arrays and objects are not field values
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::Bool(b) => Some(Self::Bool(*b)),
            serde_json::Value::Number(n) => n.as_f64().map(Self::Number),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            Self::Bool(_) => None,
        }
    }

    /// truthiness the way the controller treats it: non-zero numbers are on
    pub fn as_bool(&self) -> bool {
        match self {
            Self::Bool(b) => *b,
            Self::Number(n) => *n != 0.0,
        }
    }
}

impl From<bool> for FieldValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<f64> for FieldValue {
    fn from(n: f64) -> Self {
        Self::Number(n)
    }
}

/// the two regulators that make up a rig
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ControllerKind {
    Fridge,
    Heater,
}

impl ControllerKind {
    pub fn wire_name(&self) -> &'static str {
        match self {
            Self::Fridge => "Fridge",
            Self::Heater => "Heater",
        }
    }

    /// key under which the rig snapshot reports this controller's field
    pub fn store_key(&self, field: ControlField) -> &'static str {
        match (self, field) {
            (Self::Fridge, ControlField::Power) => "power",
            (Self::Fridge, ControlField::Enabled) => "enabled",
            (Self::Fridge, ControlField::Automatic) => "automatic",
            (Self::Fridge, ControlField::Setpoint) => "setpoint",
            (Self::Heater, ControlField::Power) => "heater_power",
            (Self::Heater, ControlField::Enabled) => "heater_enabled",
            (Self::Heater, ControlField::Automatic) => "heater_automatic",
            (Self::Heater, ControlField::Setpoint) => "heater_setpoint",
        }
    }
}

impl FromStr for ControllerKind {
    type Err = DashError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Fridge" | "fridge" => Ok(Self::Fridge),
            "Heater" | "heater" => Ok(Self::Heater),
            other => Err(DashError::MalformedPayload(format!(
                "unknown controller '{}'",
                other
            ))),
        }
    }
}

/// fields a command may mutate
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ControlField {
    Power,
    Enabled,
    Automatic,
    Setpoint,
}

impl ControlField {
    pub fn wire_name(&self) -> &'static str {
        match self {
            Self::Power => "power",
            Self::Enabled => "enabled",
            Self::Automatic => "automatic",
            Self::Setpoint => "setpoint",
        }
    }
}

/// one-shot mutation intent sent over the live channel
///
/// serializes flat: `{"controller": "Fridge", "power": 100}`. there is no
/// acknowledgment; success shows up as the field in a later patch.
#[derive(Clone, Debug, PartialEq)]
pub struct CommandMessage {
    pub controller: ControllerKind,
    pub field: ControlField,
    pub value: FieldValue,
}

impl CommandMessage {
    pub fn new(controller: ControllerKind, field: ControlField, value: impl Into<FieldValue>) -> Self {
        Self {
            controller,
            field,
            value: value.into(),
        }
    }
}

impl Serialize for CommandMessage {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(2))?;
        map.serialize_entry("controller", self.controller.wire_name())?;
        map.serialize_entry(self.field.wire_name(), &self.value)?;
        map.end()
    }
}

/// free-text operational commands for the system channel
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SystemCommand {
    Reboot,
    Poweroff,
    LaunchKeyboard,
    CloseKeyboard,
}

impl SystemCommand {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Reboot => "reboot",
            Self::Poweroff => "poweroff",
            Self::LaunchKeyboard => "launch_keyboard",
            Self::CloseKeyboard => "close_keyboard",
        }
    }
}

impl fmt::Display for SystemCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SystemCommand {
    type Err = DashError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "reboot" => Ok(Self::Reboot),
            "poweroff" => Ok(Self::Poweroff),
            "launch_keyboard" => Ok(Self::LaunchKeyboard),
            "close_keyboard" => Ok(Self::CloseKeyboard),
            other => Err(DashError::MalformedPayload(format!(
                "unknown system command '{}'",
                other
            ))),
        }
    }
}

/// chartable metrics; the key doubles as history array name and snapshot field
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Metric {
    Gravity,
    Abv,
    Atten,
    Ograv,
    Temperature,
    W1Temperature,
    Setpoint,
    HeaterSetpoint,
    Power,
    HeaterPower,
}

impl Metric {
    pub const ALL: [Metric; 10] = [
        Metric::Gravity,
        Metric::Abv,
        Metric::Atten,
        Metric::Ograv,
        Metric::Temperature,
        Metric::W1Temperature,
        Metric::Setpoint,
        Metric::HeaterSetpoint,
        Metric::Power,
        Metric::HeaterPower,
    ];

    pub fn key(&self) -> &'static str {
        match self {
            Self::Gravity => "gravity",
            Self::Abv => "abv",
            Self::Atten => "atten",
            Self::Ograv => "ograv",
            Self::Temperature => "temperature",
            Self::W1Temperature => "w1temperature",
            Self::Setpoint => "setpoint",
            Self::HeaterSetpoint => "heater_setpoint",
            Self::Power => "power",
            Self::HeaterPower => "heater_power",
        }
    }

    /// legend label used by the charts
    pub fn label(&self) -> &'static str {
        match self {
            Self::Gravity => "Gravity",
            Self::Abv => "ABV",
            Self::Atten => "Attenuation",
            Self::Ograv => "OG",
            Self::Temperature => "Beer Temp",
            Self::W1Temperature => "Fridge Temp",
            Self::Setpoint => "Cold Target",
            Self::HeaterSetpoint => "Hot Target",
            Self::Power => "Cold Power",
            Self::HeaterPower => "Hot Power",
        }
    }
}

/// `(timestamp_ms, value)`; value is None where the controller had no reading
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct TimePoint {
    pub timestamp_ms: i64,
    pub value: Option<f64>,
}

impl TimePoint {
    pub fn new(timestamp_ms: i64, value: Option<f64>) -> Self {
        Self { timestamp_ms, value }
    }
}

/// user-selected retention window, in minutes
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct RetentionWindow(u32);

impl RetentionWindow {
    pub const ALLOWED: [u32; 5] = [30, 60, 240, 1440, 10080];

    pub fn minutes(&self) -> u32 {
        self.0
    }

    pub fn as_millis(&self) -> i64 {
        i64::from(self.0) * 60_000
    }

    /// oldest timestamp still inside the window (inclusive)
    pub fn cutoff(&self, now_ms: i64) -> i64 {
        now_ms - self.as_millis()
    }
}

impl Default for RetentionWindow {
    fn default() -> Self {
        Self(240)
    }
}

impl TryFrom<u32> for RetentionWindow {
    type Error = DashError;

    fn try_from(minutes: u32) -> Result<Self, Self::Error> {
        if Self::ALLOWED.contains(&minutes) {
            Ok(Self(minutes))
        } else {
            Err(DashError::InvalidWindow(minutes))
        }
    }
}

impl From<RetentionWindow> for u32 {
    fn from(window: RetentionWindow) -> Self {
        window.0
    }
}
