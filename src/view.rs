// src/view.rs - Display targets the synchronizer projects device state onto
use crate::pins::RoleSelector;
use std::collections::BTreeMap;

pub const HEATING_LABEL: &str = "HEATING";
pub const IDLE_LABEL: &str = "OFF";

/// A bindable display target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Field {
    /// Mode selector
    Mode,
    /// Setpoint input
    Setpoint,
    /// Setpoint input container, visible only in manual mode
    SetpointBox,
    TempNow,
    SetpointNow,
    OutputNow,
    MaxTempNow,
    SampleNow,
    HeatIndicator,
    Kp,
    Ki,
    Kd,
    WindowMs,
    SampleSec,
    MaxTemp,
    StaEnabled,
}

impl Field {
    pub const LIVE: [Field; 9] = [
        Field::Mode,
        Field::Setpoint,
        Field::SetpointBox,
        Field::TempNow,
        Field::SetpointNow,
        Field::OutputNow,
        Field::MaxTempNow,
        Field::SampleNow,
        Field::HeatIndicator,
    ];

    pub const CONFIG: [Field; 7] = [
        Field::Kp,
        Field::Ki,
        Field::Kd,
        Field::WindowMs,
        Field::SampleSec,
        Field::MaxTemp,
        Field::StaEnabled,
    ];
}

#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Text(String),
    Flag(bool),
    Indicator { on: bool, label: String },
}

impl FieldValue {
    pub fn text(value: impl Into<String>) -> Self {
        FieldValue::Text(value.into())
    }

    pub fn heating(active: bool) -> Self {
        FieldValue::Indicator {
            on: active,
            label: if active { HEATING_LABEL } else { IDLE_LABEL }.to_string(),
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s),
            FieldValue::Indicator { label, .. } => Some(label),
            FieldValue::Flag(_) => None,
        }
    }
}

/// The set of targets present in the current view and their last values.
/// Writes to targets that are not bound are dropped.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Bindings {
    fields: BTreeMap<Field, Option<FieldValue>>,
}

impl Bindings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_fields(fields: impl IntoIterator<Item = Field>) -> Self {
        let mut bindings = Self::new();
        for field in fields {
            bindings.bind(field);
        }
        bindings
    }

    /// Every target the dashboard knows about.
    pub fn all() -> Self {
        Self::with_fields(Field::LIVE.into_iter().chain(Field::CONFIG))
    }

    pub fn bind(&mut self, field: Field) {
        self.fields.entry(field).or_insert(None);
    }

    pub fn is_bound(&self, field: Field) -> bool {
        self.fields.contains_key(&field)
    }

    /// Update a bound target. Returns false when the target is absent.
    pub fn set(&mut self, field: Field, value: FieldValue) -> bool {
        match self.fields.get_mut(&field) {
            Some(slot) => {
                *slot = Some(value);
                true
            }
            None => false,
        }
    }

    pub fn get(&self, field: Field) -> Option<&FieldValue> {
        self.fields.get(&field).and_then(|v| v.as_ref())
    }

    pub fn text(&self, field: Field) -> Option<&str> {
        self.get(field).and_then(FieldValue::as_text)
    }

    pub fn flag(&self, field: Field) -> Option<bool> {
        match self.get(field)? {
            FieldValue::Flag(b) => Some(*b),
            FieldValue::Indicator { on, .. } => Some(*on),
            FieldValue::Text(_) => None,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (Field, &FieldValue)> {
        self.fields.iter().filter_map(|(f, v)| v.as_ref().map(|v| (*f, v)))
    }
}

/// One editable profile row.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepRow {
    pub temp_c: f64,
    pub minutes: u64,
}

impl StepRow {
    /// Row for a step of `sec` seconds; partial minutes are dropped.
    pub fn from_seconds(temp_c: f64, sec: u64) -> Self {
        Self { temp_c, minutes: sec / 60 }
    }

    pub fn seconds(&self) -> u64 {
        self.minutes * 60
    }
}

/// Everything the operator sees, minus the chart surface.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DashboardView {
    pub fields: Bindings,
    pub steps: Vec<StepRow>,
    pub pin_selectors: Vec<RoleSelector>,
}

impl DashboardView {
    pub fn new(fields: Bindings) -> Self {
        Self { fields, steps: Vec::new(), pin_selectors: Vec::new() }
    }
}

/// Render a number the way the controller reports it: integral values without a fraction.
pub fn plain_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{}", value)
    }
}
