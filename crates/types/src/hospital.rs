//! Static registry of hospitals allowed to request patient records.

use crate::address::{Address, AddressError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Hospitals known to a fresh deployment. Placeholder addresses; real
/// deployments override them through configuration.
pub const DEFAULT_HOSPITALS: &[(&str, &str)] = &[
    ("Apollo Hospital", "0x1111111111111111111111111111111111111111"),
    ("AIIMS Hospital", "0x2222222222222222222222222222222222222222"),
    ("KIMS Hospital", "0x3333333333333333333333333333333333333333"),
];

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("hospital '{0}' is not registered")]
    UnknownHospital(String),
    #[error("hospital '{0}' is registered more than once")]
    DuplicateHospital(String),
    #[error("hospital name must not be empty")]
    EmptyName,
    #[error("hospital registry must contain at least one hospital")]
    Empty,
    #[error("invalid address for hospital '{name}': {source}")]
    InvalidAddress {
        name: String,
        #[source]
        source: AddressError,
    },
}

/// A hospital and the ledger account it is granted access under.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hospital {
    pub name: String,
    pub address: Address,
}

/// Name → address lookup, immutable once built. Registration order is kept
/// so forms list hospitals the way the operator configured them.
#[derive(Debug, Clone)]
pub struct HospitalRegistry {
    hospitals: Vec<Hospital>,
    by_name: HashMap<String, usize>,
}

impl HospitalRegistry {
    /// Names are stored trimmed, matching how requests are looked up.
    pub fn new(mut hospitals: Vec<Hospital>) -> Result<Self, RegistryError> {
        if hospitals.is_empty() {
            return Err(RegistryError::Empty);
        }

        let mut by_name = HashMap::with_capacity(hospitals.len());
        for (idx, hospital) in hospitals.iter_mut().enumerate() {
            let trimmed = hospital.name.trim();
            if trimmed.is_empty() {
                return Err(RegistryError::EmptyName);
            }
            if trimmed.len() != hospital.name.len() {
                hospital.name = trimmed.to_string();
            }
            if by_name.insert(hospital.name.clone(), idx).is_some() {
                return Err(RegistryError::DuplicateHospital(hospital.name.clone()));
            }
        }

        Ok(Self { hospitals, by_name })
    }

    /// Build from `(name, address)` string pairs, e.g. a config table.
    pub fn from_pairs<I, N, A>(pairs: I) -> Result<Self, RegistryError>
    where
        I: IntoIterator<Item = (N, A)>,
        N: Into<String>,
        A: AsRef<str>,
    {
        let mut hospitals = Vec::new();
        for (name, address) in pairs {
            let name = name.into();
            let address = address
                .as_ref()
                .parse::<Address>()
                .map_err(|source| RegistryError::InvalidAddress {
                    name: name.clone(),
                    source,
                })?;
            hospitals.push(Hospital { name, address });
        }
        Self::new(hospitals)
    }

    pub fn with_defaults() -> Self {
        Self::from_pairs(DEFAULT_HOSPITALS.iter().copied())
            .expect("built-in hospital table is valid")
    }

    pub fn get(&self, name: &str) -> Option<&Hospital> {
        self.by_name.get(name).map(|idx| &self.hospitals[*idx])
    }

    /// Resolve a hospital name to its ledger address.
    pub fn resolve(&self, name: &str) -> Result<Address, RegistryError> {
        self.get(name)
            .map(|hospital| hospital.address)
            .ok_or_else(|| RegistryError::UnknownHospital(name.to_string()))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.hospitals.iter().map(|hospital| hospital.name.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Hospital> {
        self.hospitals.iter()
    }

    pub fn len(&self) -> usize {
        self.hospitals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hospitals.is_empty()
    }
}

impl Default for HospitalRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}
