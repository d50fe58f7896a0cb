use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::NeuroVoxelError;

pub type Entities = BTreeMap<String, String>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRecord {
    pub path: PathBuf,
    pub entities: Entities,
}

impl ImageRecord {
    pub fn subject(&self) -> Option<&str> {
        self.entities.get("subject").map(String::as_str)
    }

    pub fn session(&self) -> Option<&str> {
        self.entities.get("session").map(String::as_str)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MultiSessionPolicy {
    First,
    Last,
    Random,
    #[default]
    All,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ZeroVoxelPolicy {
    #[default]
    Keep,
    Exclude,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Standardization {
    #[default]
    None,
    Center,
    Scale,
}

fn unknown_policy(kind: &str, value: &str, allowed: &[&str]) -> NeuroVoxelError {
    NeuroVoxelError::Configuration(format!(
        "unrecognized {kind} `{value}`; expected one of {}",
        allowed.join(", ")
    ))
}

impl FromStr for MultiSessionPolicy {
    type Err = NeuroVoxelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "first" => Ok(Self::First),
            "last" => Ok(Self::Last),
            "random" => Ok(Self::Random),
            "all" => Ok(Self::All),
            _ => Err(unknown_policy(
                "multi-session policy",
                s,
                &["first", "last", "random", "all"],
            )),
        }
    }
}

impl FromStr for ZeroVoxelPolicy {
    type Err = NeuroVoxelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "keep" => Ok(Self::Keep),
            "exclude" => Ok(Self::Exclude),
            _ => Err(unknown_policy("zero-voxel policy", s, &["keep", "exclude"])),
        }
    }
}

impl FromStr for Standardization {
    type Err = NeuroVoxelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" => Ok(Self::None),
            "center" => Ok(Self::Center),
            "scale" => Ok(Self::Scale),
            _ => Err(unknown_policy(
                "standardization",
                s,
                &["none", "center", "scale"],
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum StatKind {
    Beta,
    T,
    Tfce,
    Size,
    Mass,
    LogpMaxT,
    LogpMaxTfce,
    LogpMaxSize,
    LogpMaxMass,
}

impl StatKind {
    pub const ALL: [StatKind; 9] = [
        StatKind::Beta,
        StatKind::T,
        StatKind::Tfce,
        StatKind::Size,
        StatKind::Mass,
        StatKind::LogpMaxT,
        StatKind::LogpMaxTfce,
        StatKind::LogpMaxSize,
        StatKind::LogpMaxMass,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StatKind::Beta => "beta",
            StatKind::T => "t",
            StatKind::Tfce => "tfce",
            StatKind::Size => "size",
            StatKind::Mass => "mass",
            StatKind::LogpMaxT => "logp_max_t",
            StatKind::LogpMaxTfce => "logp_max_tfce",
            StatKind::LogpMaxSize => "logp_max_size",
            StatKind::LogpMaxMass => "logp_max_mass",
        }
    }

    pub fn file_token(&self) -> String {
        self.as_str().replace('_', "")
    }

    pub fn is_log_p(&self) -> bool {
        matches!(
            self,
            StatKind::LogpMaxT
                | StatKind::LogpMaxTfce
                | StatKind::LogpMaxSize
                | StatKind::LogpMaxMass
        )
    }
}

impl fmt::Display for StatKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StatKind {
    type Err = NeuroVoxelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        StatKind::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| {
                let allowed: Vec<&str> = StatKind::ALL.iter().map(StatKind::as_str).collect();
                unknown_policy("statistic", s, &allowed)
            })
    }
}
