// src/pins.rs - Hardware pin roles, the board's pin catalog and conflict resolution
//
// Every configurable role must sit on its own physical pin. The catalog may list
// the same pin more than once (LED_BUILTIN shares GPIO2 with D4), so conflicts are
// computed from the assigned roles and never from catalog entries.

use crate::api::models::lenient;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// I2C data line is wired on the board and cannot be reassigned.
pub const FIXED_I2C_SDA: i32 = 14;
/// I2C clock line is wired on the board and cannot be reassigned.
pub const FIXED_I2C_SCL: i32 = 12;

/// Suffix appended to options already claimed by another role.
pub const TAKEN_SUFFIX: &str = " (taken)";

/// A named hardware function bound to one physical pin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PinRole {
    Ssr,
    Led,
    Buzz,
    BtnA,
    BtnB,
    I2cSda,
    I2cScl,
    SpiCs,
    SpiMosi,
    SpiMiso,
}

impl PinRole {
    pub const ALL: [PinRole; 10] = [
        PinRole::Ssr,
        PinRole::Led,
        PinRole::Buzz,
        PinRole::BtnA,
        PinRole::BtnB,
        PinRole::I2cSda,
        PinRole::I2cScl,
        PinRole::SpiCs,
        PinRole::SpiMosi,
        PinRole::SpiMiso,
    ];

    /// Key used by the controller's JSON pin map.
    pub fn key(self) -> &'static str {
        match self {
            PinRole::Ssr => "SSR",
            PinRole::Led => "LED",
            PinRole::Buzz => "BUZZ",
            PinRole::BtnA => "BTN_A",
            PinRole::BtnB => "BTN_B",
            PinRole::I2cSda => "I2C_SDA",
            PinRole::I2cScl => "I2C_SCL",
            PinRole::SpiCs => "SPI_CS",
            PinRole::SpiMosi => "SPI_MOSI",
            PinRole::SpiMiso => "SPI_MISO",
        }
    }

    /// I2C lines are fixed on the board and shown read-only.
    pub fn is_configurable(self) -> bool {
        !matches!(self, PinRole::I2cSda | PinRole::I2cScl)
    }

    pub fn configurable() -> impl Iterator<Item = PinRole> {
        Self::ALL.into_iter().filter(|r| r.is_configurable())
    }
}

impl fmt::Display for PinRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

#[derive(Debug, Error, PartialEq)]
#[error("unknown pin role '{0}'")]
pub struct UnknownRole(pub String);

impl FromStr for PinRole {
    type Err = UnknownRole;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_ascii_uppercase();
        PinRole::ALL
            .into_iter()
            .find(|r| r.key() == upper)
            .ok_or_else(|| UnknownRole(s.to_string()))
    }
}

/// Role → physical pin, as reported by (and saved to) the controller.
/// Negative values mean the role is unassigned.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct PinMap {
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "lenient")]
    pub ssr: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "lenient")]
    pub led: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "lenient")]
    pub buzz: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "lenient")]
    pub btn_a: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "lenient")]
    pub btn_b: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "lenient")]
    pub i2c_sda: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "lenient")]
    pub i2c_scl: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "lenient")]
    pub spi_cs: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "lenient")]
    pub spi_mosi: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "lenient")]
    pub spi_miso: Option<i32>,
}

impl PinMap {
    fn slot(&self, role: PinRole) -> &Option<i32> {
        match role {
            PinRole::Ssr => &self.ssr,
            PinRole::Led => &self.led,
            PinRole::Buzz => &self.buzz,
            PinRole::BtnA => &self.btn_a,
            PinRole::BtnB => &self.btn_b,
            PinRole::I2cSda => &self.i2c_sda,
            PinRole::I2cScl => &self.i2c_scl,
            PinRole::SpiCs => &self.spi_cs,
            PinRole::SpiMosi => &self.spi_mosi,
            PinRole::SpiMiso => &self.spi_miso,
        }
    }

    fn slot_mut(&mut self, role: PinRole) -> &mut Option<i32> {
        match role {
            PinRole::Ssr => &mut self.ssr,
            PinRole::Led => &mut self.led,
            PinRole::Buzz => &mut self.buzz,
            PinRole::BtnA => &mut self.btn_a,
            PinRole::BtnB => &mut self.btn_b,
            PinRole::I2cSda => &mut self.i2c_sda,
            PinRole::I2cScl => &mut self.i2c_scl,
            PinRole::SpiCs => &mut self.spi_cs,
            PinRole::SpiMosi => &mut self.spi_mosi,
            PinRole::SpiMiso => &mut self.spi_miso,
        }
    }

    pub fn get(&self, role: PinRole) -> Option<i32> {
        *self.slot(role)
    }

    pub fn set(&mut self, role: PinRole, pin: i32) {
        *self.slot_mut(role) = Some(pin);
    }

    pub fn with(mut self, role: PinRole, pin: i32) -> Self {
        self.set(role, pin);
        self
    }

    /// Copy of the map as sent to `POST /api/pins`: the I2C lines are always
    /// the board's fixed pins, whatever the editor holds.
    pub fn for_save(&self) -> PinMap {
        self.clone()
            .with(PinRole::I2cSda, FIXED_I2C_SDA)
            .with(PinRole::I2cScl, FIXED_I2C_SCL)
    }
}

/// One selectable physical pin with its board label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PinChoice {
    pub label: &'static str,
    pub pin: i32,
}

/// Selectable pins of the NodeMCU-style board. GPIO2 is listed twice.
pub const PIN_CATALOG: [PinChoice; 10] = [
    PinChoice { label: "D0 (16)", pin: 16 },
    PinChoice { label: "D1 (5)", pin: 5 },
    PinChoice { label: "D2 (4)", pin: 4 },
    PinChoice { label: "D3 (0)", pin: 0 },
    PinChoice { label: "D4 (2)", pin: 2 },
    PinChoice { label: "D5 (14)", pin: 14 },
    PinChoice { label: "D6 (12)", pin: 12 },
    PinChoice { label: "D7 (13)", pin: 13 },
    PinChoice { label: "D8 (15)", pin: 15 },
    PinChoice { label: "LED_BUILTIN (2)", pin: 2 },
];

/// An entry of a role's pin selector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PinOption {
    pub label: String,
    pub pin: i32,
    pub selected: bool,
    pub disabled: bool,
}

/// Options presented for one role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleSelector {
    pub role: PinRole,
    pub read_only: bool,
    pub options: Vec<PinOption>,
}

impl RoleSelector {
    pub fn selected(&self) -> Option<&PinOption> {
        self.options.iter().find(|o| o.selected)
    }
}

/// Physical pins claimed by configurable roles. I2C lines and unassigned
/// (negative) values never count.
pub fn pins_in_use(pins: &PinMap) -> BTreeSet<i32> {
    PinRole::configurable()
        .filter_map(|role| pins.get(role))
        .filter(|pin| *pin >= 0)
        .collect()
}

/// Build one role's selector options from the catalog.
pub fn options_for(own: Option<i32>, in_use: &BTreeSet<i32>, catalog: &[PinChoice]) -> Vec<PinOption> {
    let mut selected_done = false;
    catalog
        .iter()
        .map(|choice| {
            let is_own = own == Some(choice.pin);
            let selected = is_own && !selected_done;
            selected_done |= selected;
            let taken = !is_own && in_use.contains(&choice.pin);
            PinOption {
                label: if taken {
                    format!("{}{}", choice.label, TAKEN_SUFFIX)
                } else {
                    choice.label.to_string()
                },
                pin: choice.pin,
                selected,
                disabled: taken,
            }
        })
        .collect()
}

/// Resolve selectors for every configurable role.
pub fn resolve(pins: &PinMap, catalog: &[PinChoice]) -> Vec<RoleSelector> {
    let in_use = pins_in_use(pins);
    PinRole::configurable()
        .map(|role| RoleSelector {
            role,
            read_only: false,
            options: options_for(pins.get(role), &in_use, catalog),
        })
        .collect()
}

/// Read-only selector for a fixed role holding the single server-reported pin.
pub fn fixed_selector(role: PinRole, pins: &PinMap, catalog: &[PinChoice]) -> Option<RoleSelector> {
    let pin = pins.get(role)?;
    let label = catalog
        .iter()
        .find(|c| c.pin == pin)
        .map(|c| c.label.to_string())
        .unwrap_or_else(|| format!("GPIO{}", pin));
    Some(RoleSelector {
        role,
        read_only: true,
        options: vec![PinOption { label, pin, selected: true, disabled: false }],
    })
}

/// Pin map as currently chosen in a set of selectors (the selected option of each).
pub fn pins_from_selectors(selectors: &[RoleSelector]) -> PinMap {
    let mut pins = PinMap::default();
    for selector in selectors {
        if let Some(option) = selector.selected() {
            pins.set(selector.role, option.pin);
        }
    }
    pins
}

/// Why a pin assignment cannot be saved.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PinError {
    #[error("pin {pin} is assigned to both {first} and {second}")]
    Conflict { pin: i32, first: PinRole, second: PinRole },
    #[error("{0} is wired on the board and cannot be reassigned")]
    Fixed(PinRole),
    #[error("pin {pin} is not selectable for {role}")]
    Unavailable { role: PinRole, pin: i32 },
    #[error("pin {pin} is already taken; {role} cannot use it")]
    Taken { role: PinRole, pin: i32 },
}

/// Reject a map in which two configurable roles share a physical pin.
pub fn check_conflicts(pins: &PinMap) -> Result<(), PinError> {
    let mut owners: BTreeMap<i32, PinRole> = BTreeMap::new();
    for role in PinRole::configurable() {
        let Some(pin) = pins.get(role).filter(|pin| *pin >= 0) else {
            continue;
        };
        if let Some(first) = owners.insert(pin, role) {
            return Err(PinError::Conflict { pin, first, second: role });
        }
    }
    Ok(())
}

/// Check one choice against the role's selector: a negative pin unassigns the
/// role, anything else must be an enabled option.
pub fn choose(selectors: &[RoleSelector], role: PinRole, pin: i32) -> Result<(), PinError> {
    if !role.is_configurable() {
        return Err(PinError::Fixed(role));
    }
    if pin < 0 {
        return Ok(());
    }
    let option = selectors
        .iter()
        .find(|s| s.role == role)
        .and_then(|s| s.options.iter().find(|o| o.pin == pin))
        .ok_or(PinError::Unavailable { role, pin })?;
    if option.disabled {
        return Err(PinError::Taken { role, pin });
    }
    Ok(())
}
