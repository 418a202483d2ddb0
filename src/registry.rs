//! Register catalogue
//!
//! Maps holding-register addresses to their metadata (name, unit, gain,
//! access, description). Readers always observe a consistent snapshot.

use std::collections::BTreeMap;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::{LinkError, Result};

/// Register access mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccessType {
    #[serde(rename = "Read")]
    ReadOnly,
    #[serde(rename = "Write")]
    WriteOnly,
    #[serde(rename = "Read/Write")]
    ReadWrite,
}

impl Default for AccessType {
    fn default() -> Self {
        AccessType::ReadOnly
    }
}

/// Metadata for a single holding register
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisterConfig {
    #[serde(default)]
    pub address: u16,
    pub name: String,
    #[serde(default)]
    pub unit: String,
    /// Scaling divisor; zero means "no scaling". Never negative.
    #[serde(default = "default_gain")]
    pub gain: f64,
    #[serde(default)]
    pub access: AccessType,
    #[serde(default)]
    pub description: String,
}

fn default_gain() -> f64 {
    1.0
}

/// Thread-safe catalogue of register metadata
#[derive(Debug, Default)]
pub struct RegisterCatalogue {
    registers: RwLock<BTreeMap<u16, RegisterConfig>>,
}

impl RegisterCatalogue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a catalogue from a pre-validated register map.
    pub fn from_map(registers: BTreeMap<u16, RegisterConfig>) -> Self {
        Self {
            registers: RwLock::new(registers),
        }
    }

    pub fn get(&self, address: u16) -> Option<RegisterConfig> {
        self.registers.read().get(&address).cloned()
    }

    pub fn has(&self, address: u16) -> bool {
        self.registers.read().contains_key(&address)
    }

    /// Insert or replace a register configuration.
    ///
    /// The stored `address` field always matches the map key.
    pub fn set(&self, address: u16, mut config: RegisterConfig) -> Result<()> {
        if config.gain < 0.0 {
            return Err(LinkError::invalid_argument(format!(
                "negative gain {} for register {address}",
                config.gain
            )));
        }
        config.address = address;
        self.registers.write().insert(address, config);
        Ok(())
    }

    pub fn remove(&self, address: u16) -> bool {
        self.registers.write().remove(&address).is_some()
    }

    /// Consistent snapshot of the whole catalogue, ordered by address.
    pub fn all(&self) -> BTreeMap<u16, RegisterConfig> {
        self.registers.read().clone()
    }

    /// All configured addresses in ascending order.
    pub fn addresses(&self) -> Vec<u16> {
        self.registers.read().keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.registers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.registers.read().is_empty()
    }
}
