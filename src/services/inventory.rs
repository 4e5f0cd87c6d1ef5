//! Inventory ledger: asset registry and availability

use serde_json::json;

use crate::{
    error::{AppError, AppResult},
    models::{
        asset::{Asset, CreateAsset},
        AssetStatus, EntityType,
    },
    repository::{AssetStatusChange, ChangeSet, Sequence},
};

use super::LedgerContext;

#[derive(Clone)]
pub struct InventoryService {
    ctx: LedgerContext,
}

impl InventoryService {
    pub fn new(ctx: LedgerContext) -> Self {
        Self { ctx }
    }

    /// Add an asset to the inventory; new assets start `available`
    pub async fn create_asset(&self, actor_id: i32, data: CreateAsset) -> AppResult<Asset> {
        let tag = data.tag.trim();
        let name = data.name.trim();
        if tag.is_empty() || name.is_empty() {
            return Err(AppError::Validation("tag and name are required".to_string()));
        }

        let now = self.ctx.clock.now();
        let asset = Asset {
            id: self.ctx.repository.next_id(Sequence::Asset).await?,
            tag: tag.to_string(),
            name: name.to_string(),
            category: data.category,
            location: data.location,
            status: AssetStatus::Available,
            last_serviced_at: None,
            created_at: now,
            updated_at: now,
        };

        let mut changes = ChangeSet::new(now);
        changes.new_assets.push(asset.clone());
        changes.audit(
            Some(actor_id),
            EntityType::Asset,
            asset.id,
            "created",
            json!({ "tag": asset.tag, "name": asset.name }),
        );
        self.ctx.repository.commit(changes).await?;

        tracing::info!(asset_id = asset.id, tag = %asset.tag, "Asset created");
        Ok(asset)
    }

    /// Get asset by ID
    pub async fn get(&self, asset_id: i32) -> AppResult<Asset> {
        self.ctx
            .repository
            .get_asset(asset_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Asset {} not found", asset_id)))
    }

    /// List all assets, ordered by tag
    pub async fn list(&self) -> AppResult<Vec<Asset>> {
        self.ctx.repository.list_assets().await
    }

    /// True iff the asset's status is `available` and no open loan exists for it
    pub async fn is_available(&self, asset_id: i32) -> AppResult<bool> {
        let asset = self.get(asset_id).await?;
        if asset.status != AssetStatus::Available {
            return Ok(false);
        }
        Ok(self.ctx.repository.open_loan_for_asset(asset_id).await?.is_none())
    }

    /// Manually move an asset between `available`, `out_of_service` and `retired`.
    ///
    /// `checked_out` is owned by the loan lifecycle: an asset cannot be put into
    /// it, nor taken out of it, through this path.
    pub async fn set_status(&self, actor_id: i32, asset_id: i32, status: AssetStatus) -> AppResult<Asset> {
        let _guard = self.ctx.locks.lock(asset_id).await;

        self.ctx
            .with_retry("set_asset_status", || self.set_status_once(actor_id, asset_id, status))
            .await
    }

    async fn set_status_once(&self, actor_id: i32, asset_id: i32, status: AssetStatus) -> AppResult<Asset> {
        let mut asset = self.get(asset_id).await?;
        if asset.status == status {
            return Ok(asset);
        }
        if status == AssetStatus::CheckedOut || asset.status == AssetStatus::CheckedOut {
            return Err(AppError::transition("asset", asset.status, "manually change status of"));
        }

        let now = self.ctx.clock.now();
        let mut changes = ChangeSet::new(now);
        changes.asset_changes.push(AssetStatusChange {
            asset_id,
            from: asset.status,
            to: status,
        });
        changes.audit(
            Some(actor_id),
            EntityType::Asset,
            asset_id,
            "status_changed",
            json!({ "from": asset.status, "to": status }),
        );
        self.ctx.repository.commit(changes).await?;

        tracing::info!(asset_id, from = %asset.status, to = %status, "Asset status changed");
        asset.status = status;
        asset.updated_at = now;
        Ok(asset)
    }
}
