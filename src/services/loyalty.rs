//! Append-only loyalty-points ledger. A balance is always the fold of a
//! user's signed deltas; nothing here caches or mutates history.

use sea_orm::sea_query::OnConflict;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DbErr, EntityTrait, QueryFilter, QueryOrder, QuerySelect, Set,
};
use std::sync::Arc;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::{
    db::DbPool,
    entities::loyalty_history::{self, Entity as LoyaltyHistoryEntity, Model as LoyaltyHistoryModel},
    errors::ServiceError,
};

/// Purpose of an order-scoped ledger entry. Award and redemption are
/// independently dedupable for the same order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum LedgerPurpose {
    Award,
    Redemption,
}

impl LedgerPurpose {
    pub fn as_str(self) -> &'static str {
        self.into()
    }
}

#[derive(Clone)]
pub struct LoyaltyService {
    db: Arc<DbPool>,
}

impl LoyaltyService {
    pub fn new(db: Arc<DbPool>) -> Self {
        Self { db }
    }

    /// Appends a signed-delta entry with no order context. The ledger does
    /// not enforce non-negative balances; callers bound redemptions before
    /// calling.
    #[instrument(skip(self, reason), fields(user_id = %user_id, points_delta = points_delta))]
    pub async fn award(
        &self,
        user_id: Uuid,
        points_delta: i32,
        reason: impl Into<String>,
    ) -> Result<LoyaltyHistoryModel, ServiceError> {
        let entry = loyalty_history::ActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(user_id),
            points_delta: Set(points_delta),
            reason: Set(reason.into()),
            order_id: Set(None),
            purpose: Set(None),
            ..Default::default()
        }
        .insert(&*self.db)
        .await?;

        info!(entry_id = %entry.id, "Loyalty entry appended");
        Ok(entry)
    }

    /// Appends an order-scoped entry exactly once per `(order, purpose)`.
    /// Returns `false` when an entry already exists, which makes
    /// re-delivery of the same payment event a silent no-op.
    #[instrument(skip(self, reason), fields(user_id = %user_id, order_id = %order_id, purpose = %purpose))]
    pub async fn award_for_order(
        &self,
        user_id: Uuid,
        order_id: Uuid,
        purpose: LedgerPurpose,
        points_delta: i32,
        reason: impl Into<String>,
    ) -> Result<bool, ServiceError> {
        let entry = loyalty_history::ActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(user_id),
            points_delta: Set(points_delta),
            reason: Set(reason.into()),
            order_id: Set(Some(order_id)),
            purpose: Set(Some(purpose.as_str().to_string())),
            created_at: Set(chrono::Utc::now()),
        };

        let result = LoyaltyHistoryEntity::insert(entry)
            .on_conflict(
                OnConflict::columns([
                    loyalty_history::Column::OrderId,
                    loyalty_history::Column::Purpose,
                ])
                .do_nothing()
                .to_owned(),
            )
            .exec(&*self.db)
            .await;

        match result {
            Ok(_) => {
                info!(points_delta = points_delta, "Order-scoped loyalty entry appended");
                Ok(true)
            }
            Err(DbErr::RecordNotInserted) => {
                debug!("Loyalty entry already exists for this order and purpose; skipping");
                Ok(false)
            }
            Err(e) => Err(ServiceError::DatabaseError(e)),
        }
    }

    /// Current balance: the sum of all deltas, computed fresh on every
    /// call. Correctness over latency.
    #[instrument(skip(self), fields(user_id = %user_id))]
    pub async fn get_balance(&self, user_id: Uuid) -> Result<i64, ServiceError> {
        let entries = LoyaltyHistoryEntity::find()
            .filter(loyalty_history::Column::UserId.eq(user_id))
            .all(&*self.db)
            .await?;

        Ok(entries
            .iter()
            .fold(0i64, |acc, entry| acc + i64::from(entry.points_delta)))
    }

    /// Most recent history entries for a user
    #[instrument(skip(self), fields(user_id = %user_id))]
    pub async fn get_history(
        &self,
        user_id: Uuid,
        limit: u64,
    ) -> Result<Vec<LoyaltyHistoryModel>, ServiceError> {
        let entries = LoyaltyHistoryEntity::find()
            .filter(loyalty_history::Column::UserId.eq(user_id))
            .order_by_desc(loyalty_history::Column::CreatedAt)
            .limit(limit)
            .all(&*self.db)
            .await?;

        Ok(entries)
    }
}
