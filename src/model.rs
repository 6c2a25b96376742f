//! Card records and their enumerated fields.
//!
//! These types are shared by the store, the HTTP layer and the pipeline, and
//! are serialized to JSON both in API responses and in the store snapshot.
//! Enumerated fields serialize as their short codes (`"S"`, `"SR"`,
//! `"available"`); human-readable labels are exposed separately.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Store-assigned card identifier.
pub type CardId = u64;

/// A code that does not name any variant of the enumerated field.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown code '{0}'")]
pub struct UnknownCode(pub String);

/// Physical grading of a card.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Condition {
    S,
    A,
    B,
    C,
}

impl Condition {
    pub fn code(self) -> &'static str {
        match self {
            Condition::S => "S",
            Condition::A => "A",
            Condition::B => "B",
            Condition::C => "C",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Condition::S => "S grade",
            Condition::A => "A grade",
            Condition::B => "B grade",
            Condition::C => "C grade",
        }
    }
}

impl FromStr for Condition {
    type Err = UnknownCode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "S" => Ok(Condition::S),
            "A" => Ok(Condition::A),
            "B" => Ok(Condition::B),
            "C" => Ok(Condition::C),
            other => Err(UnknownCode(other.to_string())),
        }
    }
}

/// Print rarity of a card. Defaults to [`Rarity::Normal`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Rarity {
    #[default]
    #[serde(rename = "N")]
    Normal,
    #[serde(rename = "R")]
    Rare,
    #[serde(rename = "SR")]
    SuperRare,
    #[serde(rename = "UR")]
    UltraRare,
    #[serde(rename = "SE")]
    SecretRare,
    #[serde(rename = "UL")]
    UltimateRare,
    #[serde(rename = "HR")]
    HolographicRare,
}

impl Rarity {
    pub fn code(self) -> &'static str {
        match self {
            Rarity::Normal => "N",
            Rarity::Rare => "R",
            Rarity::SuperRare => "SR",
            Rarity::UltraRare => "UR",
            Rarity::SecretRare => "SE",
            Rarity::UltimateRare => "UL",
            Rarity::HolographicRare => "HR",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Rarity::Normal => "Normal (N)",
            Rarity::Rare => "Rare (R)",
            Rarity::SuperRare => "Super Rare (SR)",
            Rarity::UltraRare => "Ultra Rare (UR)",
            Rarity::SecretRare => "Secret Rare (SE)",
            Rarity::UltimateRare => "Ultimate Rare (UL)",
            Rarity::HolographicRare => "Holographic Rare (HR)",
        }
    }
}

impl FromStr for Rarity {
    type Err = UnknownCode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "N" => Ok(Rarity::Normal),
            "R" => Ok(Rarity::Rare),
            "SR" => Ok(Rarity::SuperRare),
            "UR" => Ok(Rarity::UltraRare),
            "SE" => Ok(Rarity::SecretRare),
            "UL" => Ok(Rarity::UltimateRare),
            "HR" => Ok(Rarity::HolographicRare),
            other => Err(UnknownCode(other.to_string())),
        }
    }
}

/// Marketplace visibility of a listing.
///
/// Every status can move to every other status; there is no forced order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SaleStatus {
    #[default]
    Available,
    Reserved,
    Sold,
}

impl SaleStatus {
    pub fn code(self) -> &'static str {
        match self {
            SaleStatus::Available => "available",
            SaleStatus::Reserved => "reserved",
            SaleStatus::Sold => "sold",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            SaleStatus::Available => "On sale",
            SaleStatus::Reserved => "Reserved",
            SaleStatus::Sold => "Sold",
        }
    }
}

impl FromStr for SaleStatus {
    type Err = UnknownCode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "available" => Ok(SaleStatus::Available),
            "reserved" => Ok(SaleStatus::Reserved),
            "sold" => Ok(SaleStatus::Sold),
            other => Err(UnknownCode(other.to_string())),
        }
    }
}

/// A listed trading card.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Card {
    pub id: CardId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub serial_number: Option<String>,
    /// Stored name of the raw upload, relative to the media root.
    pub image: String,
    /// Stored name of the derivative, once the pipeline has produced it.
    #[serde(default)]
    pub image_optimized: Option<String>,
    pub condition: Condition,
    #[serde(default)]
    pub rarity: Rarity,
    pub price: i64,
    #[serde(default)]
    pub sale_status: SaleStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl fmt::Display for Card {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}, {}) - {}",
            self.name,
            self.condition.label(),
            self.rarity.label(),
            self.sale_status.label()
        )
    }
}

/// Fields of a card about to be inserted. The store assigns id and timestamps.
#[derive(Debug, Clone, PartialEq)]
pub struct NewCard {
    pub name: String,
    pub serial_number: Option<String>,
    pub image: String,
    pub condition: Condition,
    pub rarity: Rarity,
    pub price: i64,
    pub sale_status: SaleStatus,
}

/// A partial update. `None` leaves the field unchanged.
///
/// `serial_number: Some(None)` clears the serial number.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CardPatch {
    pub name: Option<String>,
    pub serial_number: Option<Option<String>>,
    pub image: Option<String>,
    pub condition: Option<Condition>,
    pub rarity: Option<Rarity>,
    pub price: Option<i64>,
    pub sale_status: Option<SaleStatus>,
}

impl CardPatch {
    pub fn status(status: SaleStatus) -> Self {
        Self {
            sale_status: Some(status),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Listing filter. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CardFilter {
    pub sale_status: Option<SaleStatus>,
    pub rarity: Option<Rarity>,
    pub condition: Option<Condition>,
}

impl CardFilter {
    pub fn matches(&self, card: &Card) -> bool {
        self.sale_status.is_none_or(|s| s == card.sale_status)
            && self.rarity.is_none_or(|r| r == card.rarity)
            && self.condition.is_none_or(|c| c == card.condition)
    }
}
