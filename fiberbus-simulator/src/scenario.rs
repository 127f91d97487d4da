//! ## fiberbus-simulator::scenario
//! **YAML description of one simulated run**
//!
//! ```yaml
//! name: busy-drop
//! listeners:
//!   - name: slow
//!     source: 7
//!     value: 0
//!     flags: [drop_if_busy]
//!     sleep_ms: 20
//! steps:
//!   - { op: send, source: 7, value: 1 }
//!   - { op: wait, ms: 5 }
//!   - { op: send, source: 7, value: 2 }
//! ```

use std::collections::HashSet;
use std::path::Path;

use fiberbus_config::BusConfig;
use fiberbus_core::ListenerFlags;
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::error::SimulationError;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Scenario {
    pub name: String,

    /// Bus sizing; defaults apply when absent.
    #[serde(default)]
    pub bus: Option<BusConfig>,

    /// Overrides the simulator's tick period for this run.
    #[serde(default)]
    pub tick_period_ms: Option<u64>,

    #[serde(default)]
    pub listeners: Vec<ListenerSpec>,

    #[serde(default)]
    pub steps: Vec<Step>,

    /// Virtual time granted after the last step.
    #[serde(default = "default_settle")]
    pub settle_ms: u64,
}

fn default_settle() -> u64 {
    100
}

/// A scripted listener: records its deliveries, sleeps, then sends `emit`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ListenerSpec {
    pub name: String,
    pub source: u16,
    pub value: u16,
    #[serde(default)]
    pub flags: Vec<String>,
    #[serde(default)]
    pub sleep_ms: u64,
    #[serde(default)]
    pub emit: Vec<EventSpec>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct EventSpec {
    pub source: u16,
    pub value: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Step {
    /// `send` from the main fiber.
    Send { source: u16, value: u16 },
    /// Standard listeners run on the spot; the queue is bypassed.
    Fire { source: u16, value: u16 },
    /// `send` from interrupt context `after_ms` from now.
    Interrupt { after_ms: u64, source: u16, value: u16 },
    Wait { ms: u64 },
    /// Rejections by the bus, like ignoring twice, are logged and skipped.
    Ignore { listener: String },
    /// Registers a declared listener again.
    Listen { listener: String },
}

impl ListenerSpec {
    /// No names means the bus default.
    pub fn listener_flags(&self) -> Result<ListenerFlags, SimulationError> {
        if self.flags.is_empty() {
            return Ok(ListenerFlags::default());
        }
        self.flags.iter().try_fold(ListenerFlags::empty(), |flags, name| {
            name.parse::<ListenerFlags>()
                .map(|flag| flags | flag)
                .map_err(|_| SimulationError::InvalidFlag(name.clone()))
        })
    }
}

impl Scenario {
    pub fn from_yaml_str(text: &str) -> Result<Self, SimulationError> {
        let scenario: Self = serde_yaml::from_str(text)?;
        scenario.check()?;
        Ok(scenario)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, SimulationError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(SimulationError::ScenarioNotFound(path.to_path_buf()));
        }
        Self::from_yaml_str(&std::fs::read_to_string(path)?)
    }

    pub fn to_yaml(&self) -> Result<String, SimulationError> {
        Ok(serde_yaml::to_string(self)?)
    }

    pub fn listener(&self, name: &str) -> Option<&ListenerSpec> {
        self.listeners.iter().find(|spec| spec.name == name)
    }

    /// Rejects bad bus sizing, unknown flags, and steps that name
    /// undeclared listeners.
    pub fn check(&self) -> Result<(), SimulationError> {
        if let Some(bus) = &self.bus {
            bus.validate()
                .map_err(|errors| SimulationError::Config(errors.into()))?;
        }

        let mut names = HashSet::new();
        for spec in &self.listeners {
            if !names.insert(spec.name.as_str()) {
                return Err(SimulationError::DuplicateListener(spec.name.clone()));
            }
            spec.listener_flags()?;
        }

        for step in &self.steps {
            if let Step::Ignore { listener } | Step::Listen { listener } = step {
                if !names.contains(listener.as_str()) {
                    return Err(SimulationError::UnknownListener(listener.clone()));
                }
            }
        }
        Ok(())
    }
}
