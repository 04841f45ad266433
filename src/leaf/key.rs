//! Leaf addressing
//!
//! A configuration document is split into exactly 30 leaves:
//! - 8 `config:<variant>`
//! - 13 `moduleConfig:<variant>`
//! - 8 `channel:<0..7>`
//! - 1 `user`

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::SyncError;

/// Number of addressable leaves
pub const LEAF_COUNT: usize = 30;

/// Number of channel slots on a device
pub const CHANNEL_COUNT: u8 = 8;

/// Device configuration categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ConfigVariant {
    Device,
    Position,
    Power,
    Network,
    Display,
    Lora,
    Bluetooth,
    Security,
}

impl ConfigVariant {
    pub const ALL: [ConfigVariant; 8] = [
        ConfigVariant::Device,
        ConfigVariant::Position,
        ConfigVariant::Power,
        ConfigVariant::Network,
        ConfigVariant::Display,
        ConfigVariant::Lora,
        ConfigVariant::Bluetooth,
        ConfigVariant::Security,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ConfigVariant::Device => "device",
            ConfigVariant::Position => "position",
            ConfigVariant::Power => "power",
            ConfigVariant::Network => "network",
            ConfigVariant::Display => "display",
            ConfigVariant::Lora => "lora",
            ConfigVariant::Bluetooth => "bluetooth",
            ConfigVariant::Security => "security",
        }
    }
}

impl FromStr for ConfigVariant {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ConfigVariant::ALL
            .into_iter()
            .find(|v| v.as_str() == s)
            .ok_or_else(|| SyncError::InvalidVariant {
                change_type: ChangeType::Config.as_str().to_string(),
                variant: s.to_string(),
            })
    }
}

/// Module configuration categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ModuleConfigVariant {
    Mqtt,
    Serial,
    ExternalNotification,
    StoreForward,
    RangeTest,
    Telemetry,
    CannedMessage,
    Audio,
    RemoteHardware,
    NeighborInfo,
    AmbientLighting,
    DetectionSensor,
    Paxcounter,
}

impl ModuleConfigVariant {
    pub const ALL: [ModuleConfigVariant; 13] = [
        ModuleConfigVariant::Mqtt,
        ModuleConfigVariant::Serial,
        ModuleConfigVariant::ExternalNotification,
        ModuleConfigVariant::StoreForward,
        ModuleConfigVariant::RangeTest,
        ModuleConfigVariant::Telemetry,
        ModuleConfigVariant::CannedMessage,
        ModuleConfigVariant::Audio,
        ModuleConfigVariant::RemoteHardware,
        ModuleConfigVariant::NeighborInfo,
        ModuleConfigVariant::AmbientLighting,
        ModuleConfigVariant::DetectionSensor,
        ModuleConfigVariant::Paxcounter,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ModuleConfigVariant::Mqtt => "mqtt",
            ModuleConfigVariant::Serial => "serial",
            ModuleConfigVariant::ExternalNotification => "externalNotification",
            ModuleConfigVariant::StoreForward => "storeForward",
            ModuleConfigVariant::RangeTest => "rangeTest",
            ModuleConfigVariant::Telemetry => "telemetry",
            ModuleConfigVariant::CannedMessage => "cannedMessage",
            ModuleConfigVariant::Audio => "audio",
            ModuleConfigVariant::RemoteHardware => "remoteHardware",
            ModuleConfigVariant::NeighborInfo => "neighborInfo",
            ModuleConfigVariant::AmbientLighting => "ambientLighting",
            ModuleConfigVariant::DetectionSensor => "detectionSensor",
            ModuleConfigVariant::Paxcounter => "paxcounter",
        }
    }
}

impl FromStr for ModuleConfigVariant {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ModuleConfigVariant::ALL
            .into_iter()
            .find(|v| v.as_str() == s)
            .ok_or_else(|| SyncError::InvalidVariant {
                change_type: ChangeType::ModuleConfig.as_str().to_string(),
                variant: s.to_string(),
            })
    }
}

/// A validated channel slot (0..=7)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "u8")]
pub struct ChannelIndex(u8);

impl ChannelIndex {
    pub fn new(index: i64) -> Result<Self, SyncError> {
        if (0..i64::from(CHANNEL_COUNT)).contains(&index) {
            Ok(ChannelIndex(index as u8))
        } else {
            Err(SyncError::InvalidChannelIndex(index))
        }
    }

    pub fn get(&self) -> u8 {
        self.0
    }

    pub fn all() -> impl Iterator<Item = ChannelIndex> {
        (0..CHANNEL_COUNT).map(ChannelIndex)
    }
}

impl TryFrom<i64> for ChannelIndex {
    type Error = SyncError;

    fn try_from(index: i64) -> Result<Self, Self::Error> {
        ChannelIndex::new(index)
    }
}

impl From<ChannelIndex> for u8 {
    fn from(index: ChannelIndex) -> u8 {
        index.0
    }
}

impl fmt::Display for ChannelIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Kind of configuration section a leaf or pending change addresses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ChangeType {
    Config,
    ModuleConfig,
    Channel,
    User,
}

impl ChangeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeType::Config => "config",
            ChangeType::ModuleConfig => "moduleConfig",
            ChangeType::Channel => "channel",
            ChangeType::User => "user",
        }
    }
}

impl FromStr for ChangeType {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "config" => Ok(ChangeType::Config),
            "moduleConfig" => Ok(ChangeType::ModuleConfig),
            "channel" => Ok(ChangeType::Channel),
            "user" => Ok(ChangeType::User),
            other => Err(SyncError::InvalidChangeType(other.to_string())),
        }
    }
}

/// One independently hashable configuration section
///
/// The derived ordering (config variants, module variants, channels by
/// index, user) is the canonical leaf order used for root hashing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum LeafKey {
    Config(ConfigVariant),
    ModuleConfig(ModuleConfigVariant),
    Channel(ChannelIndex),
    User,
}

impl LeafKey {
    /// All 30 leaves in canonical order
    pub fn all() -> impl Iterator<Item = LeafKey> {
        ConfigVariant::ALL
            .into_iter()
            .map(LeafKey::Config)
            .chain(ModuleConfigVariant::ALL.into_iter().map(LeafKey::ModuleConfig))
            .chain(ChannelIndex::all().map(LeafKey::Channel))
            .chain(std::iter::once(LeafKey::User))
    }

    pub fn change_type(&self) -> ChangeType {
        match self {
            LeafKey::Config(_) => ChangeType::Config,
            LeafKey::ModuleConfig(_) => ChangeType::ModuleConfig,
            LeafKey::Channel(_) => ChangeType::Channel,
            LeafKey::User => ChangeType::User,
        }
    }

    /// Variant name for config/moduleConfig leaves
    pub fn variant(&self) -> Option<&'static str> {
        match self {
            LeafKey::Config(v) => Some(v.as_str()),
            LeafKey::ModuleConfig(v) => Some(v.as_str()),
            LeafKey::Channel(_) | LeafKey::User => None,
        }
    }

    pub fn channel_index(&self) -> Option<ChannelIndex> {
        match self {
            LeafKey::Channel(index) => Some(*index),
            _ => None,
        }
    }

    /// Rebuild a leaf from its addressing components
    ///
    /// This is the inverse of (`change_type`, `variant`, `channel_index`).
    pub fn from_parts(
        change_type: ChangeType,
        variant: Option<&str>,
        channel_index: Option<i64>,
    ) -> Result<Self, SyncError> {
        let missing = |what: &str| SyncError::InvalidLeafKey(format!("{} leaf without {}", change_type.as_str(), what));

        match change_type {
            ChangeType::Config => Ok(LeafKey::Config(variant.ok_or_else(|| missing("variant"))?.parse()?)),
            ChangeType::ModuleConfig => Ok(LeafKey::ModuleConfig(
                variant.ok_or_else(|| missing("variant"))?.parse()?,
            )),
            ChangeType::Channel => Ok(LeafKey::Channel(ChannelIndex::new(
                channel_index.ok_or_else(|| missing("index"))?,
            )?)),
            ChangeType::User => Ok(LeafKey::User),
        }
    }
}

impl fmt::Display for LeafKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LeafKey::Config(v) => write!(f, "config:{}", v.as_str()),
            LeafKey::ModuleConfig(v) => write!(f, "moduleConfig:{}", v.as_str()),
            LeafKey::Channel(index) => write!(f, "channel:{}", index),
            LeafKey::User => f.write_str("user"),
        }
    }
}

/// Parse the leaf key grammar
///
/// `config:<variant>`, `moduleConfig:<variant>`, `channel:<digit>` or `user`.
impl FromStr for LeafKey {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || SyncError::InvalidLeafKey(s.to_string());

        if s == "user" {
            return Ok(LeafKey::User);
        }

        let (prefix, rest) = s.split_once(':').ok_or_else(invalid)?;
        match prefix {
            "config" => rest.parse().map(LeafKey::Config).map_err(|_| invalid()),
            "moduleConfig" => rest.parse().map(LeafKey::ModuleConfig).map_err(|_| invalid()),
            "channel" => {
                let mut chars = rest.chars();
                match (chars.next(), chars.next()) {
                    (Some(d), None) if d.is_ascii_digit() => {
                        ChannelIndex::new(i64::from(d as u8 - b'0')).map(LeafKey::Channel).map_err(|_| invalid())
                    }
                    _ => Err(invalid()),
                }
            }
            _ => Err(invalid()),
        }
    }
}

/// Free-function form of [`LeafKey::from_str`]
pub fn parse_leaf_key(s: &str) -> Result<LeafKey, SyncError> {
    s.parse()
}

impl TryFrom<String> for LeafKey {
    type Error = SyncError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<LeafKey> for String {
    fn from(key: LeafKey) -> String {
        key.to_string()
    }
}
