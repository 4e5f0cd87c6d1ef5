//! Asset (equipment item) model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::enums::AssetStatus;

/// A physical, uniquely tagged piece of equipment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Asset {
    pub id: i32,
    /// Inventory tag printed on the item
    pub tag: String,
    pub name: String,
    pub category: Option<String>,
    pub location: Option<String>,
    pub status: AssetStatus,
    /// Last time a maintenance ticket on this asset was closed
    pub last_serviced_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Create asset request
#[derive(Debug, Clone, Deserialize)]
pub struct CreateAsset {
    pub tag: String,
    pub name: String,
    pub category: Option<String>,
    pub location: Option<String>,
}
