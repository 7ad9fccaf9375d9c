use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use super::is_valid_identifier;

pub const DEFAULT_CURRENCY: &str = "USD";

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum AssetType {
    Server,
    Network,
    Storage,
    Workstation,
    Other(String),
}

impl AssetType {
    pub fn as_str(&self) -> &str {
        match self {
            AssetType::Server => "server",
            AssetType::Network => "network",
            AssetType::Storage => "storage",
            AssetType::Workstation => "workstation",
            AssetType::Other(name) => name,
        }
    }

    /// Prefix for generated ids, e.g. `SRV-001`.
    pub fn id_prefix(&self) -> &'static str {
        match self {
            AssetType::Server => "SRV",
            AssetType::Network => "NET",
            AssetType::Storage => "STG",
            AssetType::Workstation => "WS",
            AssetType::Other(_) => "AST",
        }
    }
}

impl From<String> for AssetType {
    fn from(value: String) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "server" => AssetType::Server,
            "network" => AssetType::Network,
            "storage" => AssetType::Storage,
            "workstation" => AssetType::Workstation,
            other => AssetType::Other(other.to_string()),
        }
    }
}

impl From<AssetType> for String {
    fn from(value: AssetType) -> Self {
        value.as_str().to_string()
    }
}

impl FromStr for AssetType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().is_empty() {
            return Err("asset type must not be empty".to_string());
        }
        Ok(AssetType::from(s.to_string()))
    }
}

impl fmt::Display for AssetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetStatus {
    Online,
    Offline,
    Maintenance,
    Decommissioned,
}

impl AssetStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            AssetStatus::Online => "online",
            AssetStatus::Offline => "offline",
            AssetStatus::Maintenance => "maintenance",
            AssetStatus::Decommissioned => "decommissioned",
        }
    }

    /// Decommissioned assets keep their row but accept no further change.
    pub fn is_terminal(self) -> bool {
        matches!(self, AssetStatus::Decommissioned)
    }
}

impl FromStr for AssetStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "online" => Ok(AssetStatus::Online),
            "offline" => Ok(AssetStatus::Offline),
            "maintenance" => Ok(AssetStatus::Maintenance),
            "decommissioned" => Ok(AssetStatus::Decommissioned),
            other => Err(format!("unknown asset status '{other}'")),
        }
    }
}

impl fmt::Display for AssetStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetCost {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub purchase_price: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annual_cost: Option<f64>,
    #[serde(default = "default_currency")]
    pub currency: String,
}

fn default_currency() -> String {
    DEFAULT_CURRENCY.to_string()
}

impl Default for AssetCost {
    fn default() -> Self {
        Self {
            purchase_price: None,
            annual_cost: None,
            currency: default_currency(),
        }
    }
}

/// A configuration item. `status` only moves through approved workflows;
/// `active_workflow_id` marks the asset as locked while one is pending.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Asset {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub asset_type: AssetType,
    pub status: AssetStatus,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub owner: String,
    #[serde(default)]
    pub department: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
    #[serde(flatten)]
    pub cost: AssetCost,
    #[serde(default)]
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_workflow_id: Option<String>,
    #[serde(default)]
    pub version: u64,
}

impl Asset {
    pub fn is_locked(&self) -> bool {
        self.active_workflow_id.is_some()
    }

    pub fn is_decommissioned(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn snapshot(&self) -> serde_json::Value {
        super::snapshot(self)
    }
}

/// Registration request. The id is generated from the type when absent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewAsset {
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    #[serde(rename = "type")]
    pub asset_type: Option<AssetType>,
    /// Honoured only by the `direct` onboarding policy.
    #[serde(default)]
    pub initial_status: Option<AssetStatus>,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub owner: String,
    #[serde(default)]
    pub department: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub ip_address: Option<String>,
    #[serde(default)]
    pub purchase_price: Option<f64>,
    #[serde(default)]
    pub annual_cost: Option<f64>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl NewAsset {
    pub fn new(name: impl Into<String>, asset_type: AssetType) -> Self {
        Self {
            name: name.into(),
            asset_type: Some(asset_type),
            ..Default::default()
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_initial_status(mut self, status: AssetStatus) -> Self {
        self.initial_status = Some(status);
        self
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("asset name is required".to_string());
        }
        if self.asset_type.is_none() {
            return Err("asset type is required".to_string());
        }
        if let Some(id) = &self.id {
            if !is_valid_identifier(id) {
                return Err(format!("'{id}' is not a valid asset id"));
            }
        }
        match self.initial_status {
            None | Some(AssetStatus::Online) | Some(AssetStatus::Offline) => {}
            Some(other) => {
                return Err(format!(
                    "assets can only be created online or offline, not {other}"
                ))
            }
        }
        validate_ip(self.ip_address.as_deref())?;
        validate_cost(self.purchase_price, "purchase price")?;
        validate_cost(self.annual_cost, "annual cost")?;
        validate_currency(self.currency.as_deref())?;
        Ok(())
    }

    pub(crate) fn into_asset(
        self,
        id: String,
        status: AssetStatus,
        now: DateTime<Utc>,
    ) -> Asset {
        Asset {
            id,
            name: self.name.trim().to_string(),
            asset_type: self.asset_type.unwrap_or(AssetType::Other("unknown".to_string())),
            status,
            location: self.location,
            owner: self.owner,
            department: self.department,
            description: self.description,
            ip_address: self.ip_address,
            cost: AssetCost {
                purchase_price: self.purchase_price,
                annual_cost: self.annual_cost,
                currency: self.currency.unwrap_or_else(default_currency),
            },
            tags: self.tags,
            created_at: now,
            updated_at: now,
            active_workflow_id: None,
            version: 0,
        }
    }
}

/// Editable descriptive fields. There is deliberately no status here.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetDetailsPatch {
    pub name: Option<String>,
    pub location: Option<String>,
    pub owner: Option<String>,
    pub department: Option<String>,
    pub description: Option<String>,
    pub ip_address: Option<String>,
    pub tags: Option<Vec<String>>,
    pub purchase_price: Option<f64>,
    pub annual_cost: Option<f64>,
    pub currency: Option<String>,
}

impl AssetDetailsPatch {
    pub fn is_empty(&self) -> bool {
        self == &AssetDetailsPatch::default()
    }

    pub fn validate(&self) -> Result<(), String> {
        if let Some(name) = &self.name {
            if name.trim().is_empty() {
                return Err("asset name must not be blank".to_string());
            }
        }
        validate_ip(self.ip_address.as_deref())?;
        validate_cost(self.purchase_price, "purchase price")?;
        validate_cost(self.annual_cost, "annual cost")?;
        validate_currency(self.currency.as_deref())?;
        Ok(())
    }

    /// Applies the patch and reports whether anything actually changed.
    pub fn apply(&self, asset: &mut Asset) -> bool {
        let before = asset.clone();
        if let Some(name) = &self.name {
            asset.name = name.trim().to_string();
        }
        if let Some(location) = &self.location {
            asset.location = location.clone();
        }
        if let Some(owner) = &self.owner {
            asset.owner = owner.clone();
        }
        if let Some(department) = &self.department {
            asset.department = department.clone();
        }
        if let Some(description) = &self.description {
            asset.description = description.clone();
        }
        if let Some(ip) = &self.ip_address {
            asset.ip_address = if ip.is_empty() { None } else { Some(ip.clone()) };
        }
        if let Some(tags) = &self.tags {
            asset.tags = tags.clone();
        }
        if let Some(price) = self.purchase_price {
            asset.cost.purchase_price = Some(price);
        }
        if let Some(annual) = self.annual_cost {
            asset.cost.annual_cost = Some(annual);
        }
        if let Some(currency) = &self.currency {
            asset.cost.currency = currency.to_ascii_uppercase();
        }
        *asset != before
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetFilter {
    #[serde(rename = "type")]
    pub asset_type: Option<AssetType>,
    pub status: Option<AssetStatus>,
    pub department: Option<String>,
    pub location: Option<String>,
}

impl AssetFilter {
    pub fn matches(&self, asset: &Asset) -> bool {
        self.asset_type
            .as_ref()
            .is_none_or(|t| &asset.asset_type == t)
            && self.status.is_none_or(|s| asset.status == s)
            && self
                .department
                .as_ref()
                .is_none_or(|d| asset.department.eq_ignore_ascii_case(d))
            && self
                .location
                .as_ref()
                .is_none_or(|l| asset.location.eq_ignore_ascii_case(l))
    }
}

fn validate_ip(ip: Option<&str>) -> Result<(), String> {
    match ip {
        Some(ip) if !ip.is_empty() && ip.parse::<IpAddr>().is_err() => {
            Err(format!("'{ip}' is not a valid IP address"))
        }
        _ => Ok(()),
    }
}

fn validate_cost(value: Option<f64>, field: &str) -> Result<(), String> {
    match value {
        Some(v) if !v.is_finite() || v < 0.0 => Err(format!("{field} must be a non-negative amount")),
        _ => Ok(()),
    }
}

fn validate_currency(currency: Option<&str>) -> Result<(), String> {
    match currency {
        Some(c) if c.len() != 3 || !c.chars().all(|ch| ch.is_ascii_alphabetic()) => {
            Err(format!("'{c}' is not a three-letter currency code"))
        }
        _ => Ok(()),
    }
}
