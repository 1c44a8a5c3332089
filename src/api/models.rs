//! Contains the data models for the controller's API requests and responses.

use crate::pins::PinMap;
use serde::de::{DeserializeOwned, Error as _};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Control mode value for manual (setpoint) operation. Any other value runs a profile.
pub const MODE_MANUAL: i64 = 0;
/// Control mode value for running the stored profile.
pub const MODE_PROFILE: i64 = 1;

/// Decode an optional field; a value of the wrong type reads as absent.
pub(crate) fn lenient<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).ok())
}

/// Decode a list, dropping the entries that do not fit `T`.
fn lenient_list<'de, D, T>(deserializer: D) -> Result<Option<Vec<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    match Value::deserialize(deserializer)? {
        Value::Array(items) => Ok(Some(
            items.into_iter().filter_map(|item| serde_json::from_value(item).ok()).collect(),
        )),
        _ => Ok(None),
    }
}

/// The controller reports the mode either as its number or by name.
fn control_mode<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(name) => match name.trim().to_ascii_lowercase().as_str() {
            "profile" => Some(MODE_PROFILE),
            "manual" | "dynamic" => Some(MODE_MANUAL),
            _ => None,
        },
        _ => None,
    })
}

/// Step durations may arrive fractional; partial seconds are dropped.
fn whole_seconds<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    let sec = f64::deserialize(deserializer)?;
    if sec.is_finite() && sec >= 0.0 {
        Ok(sec as u64)
    } else {
        Err(D::Error::custom(format!("invalid step duration {}", sec)))
    }
}

/// Snapshot returned by `GET /api/state`. Every field is optional; a missing
/// or mistyped field only disables the projection that reads it.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct DeviceState {
    #[serde(default, deserialize_with = "control_mode")]
    pub mode: Option<i64>,
    #[serde(default, deserialize_with = "lenient")]
    pub setpoint: Option<f64>,
    #[serde(default, deserialize_with = "lenient")]
    pub temp: Option<f64>,
    #[serde(default, deserialize_with = "lenient")]
    pub out: Option<f64>,
    #[serde(default, deserialize_with = "lenient")]
    pub active: Option<bool>,
    #[serde(default, rename = "maxTempC", deserialize_with = "lenient")]
    pub max_temp_c: Option<f64>,
    #[serde(default, rename = "sampleSec", deserialize_with = "lenient")]
    pub sample_sec: Option<f64>,
    #[serde(default, deserialize_with = "lenient")]
    pub profile: Option<Profile>,
    #[serde(default, deserialize_with = "lenient")]
    pub pins: Option<PinMap>,
    #[serde(default, deserialize_with = "lenient")]
    pub pid: Option<PidGains>,
    #[serde(default, deserialize_with = "lenient")]
    pub net: Option<NetConfig>,
}

impl DeviceState {
    pub fn is_manual(&self) -> Option<bool> {
        self.mode.map(|m| m == MODE_MANUAL)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct Profile {
    #[serde(default, deserialize_with = "lenient_list")]
    pub steps: Option<Vec<ProfileStep>>,
}

/// One heating program step: target temperature and duration in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct ProfileStep {
    pub t: f64,
    #[serde(deserialize_with = "whole_seconds")]
    pub sec: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct PidGains {
    #[serde(default, rename = "Kp", deserialize_with = "lenient")]
    pub kp: Option<f64>,
    #[serde(default, rename = "Ki", deserialize_with = "lenient")]
    pub ki: Option<f64>,
    #[serde(default, rename = "Kd", deserialize_with = "lenient")]
    pub kd: Option<f64>,
    #[serde(default, rename = "windowMs", deserialize_with = "lenient")]
    pub window_ms: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct NetConfig {
    #[serde(default, rename = "staEnabled", deserialize_with = "lenient")]
    pub sta_enabled: Option<bool>,
}

/// Body of `POST /api/mode`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ModeRequest {
    pub mode: i64,
    pub set: f64,
}

/// Body of `POST /api/profile/save`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProfileSaveRequest {
    pub steps: Vec<ProfileStep>,
}

/// Body of `POST /api/pid`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PidSaveRequest {
    #[serde(rename = "Kp")]
    pub kp: f64,
    #[serde(rename = "Ki")]
    pub ki: f64,
    #[serde(rename = "Kd")]
    pub kd: f64,
    #[serde(rename = "windowMs")]
    pub window_ms: u64,
    #[serde(rename = "sampleSec")]
    pub sample_sec: u64,
    #[serde(rename = "maxTempC")]
    pub max_temp_c: f64,
}
