//! PostgreSQL billing store (sqlx)

use async_trait::async_trait;
use sqlx::postgres::{PgConnection, PgPool};
use sqlx::{Postgres, Transaction};
use time::{Date, OffsetDateTime};
use uuid::Uuid;

use super::{BillingStore, BillingTx, EntitlementFootprint};
use crate::error::{db_err, BillingError, BillingResult};
use crate::payments::{NewPurchaseIntent, PaymentStatus, PurchaseIntent};
use crate::plans::ResourceKind;
use crate::resources::{ResourceCensus, ResourceStatus};
use crate::subscriptions::{NewSubscription, Subscription};

const INTENT_COLUMNS: &str = "id, owner_id, plan, period, reference, amount_cents, currency, \
     status, created_at, updated_at";

const SUBSCRIPTION_COLUMNS: &str =
    "id, owner_id, plan, status, start_date, end_date, pending_unlock, created_at";

/// Row type for purchase_intents
#[derive(Debug, sqlx::FromRow)]
struct IntentRow {
    id: Uuid,
    owner_id: Uuid,
    plan: String,
    period: String,
    reference: String,
    amount_cents: i64,
    currency: String,
    status: String,
    created_at: OffsetDateTime,
    updated_at: OffsetDateTime,
}

impl TryFrom<IntentRow> for PurchaseIntent {
    type Error = BillingError;

    fn try_from(row: IntentRow) -> Result<Self, Self::Error> {
        Ok(PurchaseIntent {
            id: row.id,
            owner_id: row.owner_id,
            plan: row.plan,
            period: row
                .period
                .parse()
                .map_err(|_| BillingError::Database(format!("Unknown period '{}'", row.period)))?,
            reference: row.reference,
            amount_cents: row.amount_cents,
            currency: row.currency,
            status: row.status.parse()?,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// Row type for subscriptions
#[derive(Debug, sqlx::FromRow)]
struct SubscriptionRow {
    id: Uuid,
    owner_id: Uuid,
    plan: String,
    status: String,
    start_date: Date,
    end_date: Date,
    pending_unlock: bool,
    created_at: OffsetDateTime,
}

impl TryFrom<SubscriptionRow> for Subscription {
    type Error = BillingError;

    fn try_from(row: SubscriptionRow) -> Result<Self, Self::Error> {
        Ok(Subscription {
            id: row.id,
            owner_id: row.owner_id,
            plan: row.plan,
            status: row.status.parse()?,
            start_date: row.start_date,
            end_date: row.end_date,
            pending_unlock: row.pending_unlock,
            created_at: row.created_at,
        })
    }
}

/// Row type for the entitlement footprint query
#[derive(Debug, sqlx::FromRow)]
struct FootprintRow {
    owner_id: Uuid,
    plan: String,
    pending_unlock: bool,
    active_organizations: i64,
    active_auditors: i64,
}

/// Table and ownership filter for a resource kind. Auditor accounts are
/// `users` rows owned by the tenant other than the tenant's own account.
fn resource_scope(kind: ResourceKind) -> (&'static str, &'static str) {
    match kind {
        ResourceKind::Organization => ("organizations", "owner_id = $1"),
        ResourceKind::Auditor => ("users", "owner_id = $1 AND id <> $1 AND role <> 'owner'"),
    }
}

fn count(value: i64) -> u64 {
    u64::try_from(value).unwrap_or(0)
}

const CENSUS_SQL: &str = r#"
    SELECT
        (SELECT COUNT(*) FROM organizations
          WHERE owner_id = $1 AND status <> 'deleted') AS organizations,
        (SELECT COUNT(*) FROM users
          WHERE owner_id = $1 AND id <> $1 AND role <> 'owner' AND status <> 'deleted') AS auditors
"#;

async fn census(conn: &mut PgConnection, owner_id: Uuid) -> BillingResult<ResourceCensus> {
    let (organizations, auditors): (i64, i64) = sqlx::query_as(CENSUS_SQL)
        .bind(owner_id)
        .fetch_one(conn)
        .await
        .map_err(db_err)?;
    Ok(ResourceCensus {
        organizations: count(organizations),
        auditors: count(auditors),
    })
}

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

pub struct PgTx {
    tx: Option<Transaction<'static, Postgres>>,
}

impl PgTx {
    fn conn(&mut self) -> BillingResult<&mut PgConnection> {
        self.tx
            .as_deref_mut()
            .ok_or_else(|| BillingError::Database("Transaction already committed".to_string()))
    }

    /// Owner-level lock taken before reading or changing the owner's
    /// subscriptions. Once it is granted, the next statement sees every row the
    /// previous holder committed, including newly inserted active rows.
    async fn lock_owner(&mut self, owner_id: Uuid) -> BillingResult<()> {
        sqlx::query("SELECT id FROM users WHERE id = $1 FOR UPDATE")
            .bind(owner_id)
            .fetch_optional(self.conn()?)
            .await
            .map_err(db_err)?;
        Ok(())
    }
}

#[async_trait]
impl BillingTx for PgTx {
    async fn delete_pending_intents(&mut self, owner_id: Uuid) -> BillingResult<u64> {
        let result =
            sqlx::query("DELETE FROM purchase_intents WHERE owner_id = $1 AND status = 'pending'")
                .bind(owner_id)
                .execute(self.conn()?)
                .await
                .map_err(db_err)?;
        Ok(result.rows_affected())
    }

    async fn insert_intent(&mut self, intent: &NewPurchaseIntent) -> BillingResult<PurchaseIntent> {
        let sql = format!(
            r#"
            INSERT INTO purchase_intents
                (id, owner_id, plan, period, reference, amount_cents, currency, status)
            VALUES ($1, $2, $3, $4, $5, $6, $7, 'pending')
            RETURNING {}
            "#,
            INTENT_COLUMNS
        );
        let row: IntentRow = sqlx::query_as(&sql)
            .bind(Uuid::new_v4())
            .bind(intent.owner_id)
            .bind(&intent.plan)
            .bind(intent.period.as_str())
            .bind(&intent.reference)
            .bind(intent.amount_cents)
            .bind(&intent.currency)
            .fetch_one(self.conn()?)
            .await
            .map_err(|e| {
                let unique = e
                    .as_database_error()
                    .map(|db| db.is_unique_violation())
                    .unwrap_or(false);
                if unique {
                    BillingError::DuplicateReference(intent.reference.clone())
                } else {
                    db_err(e)
                }
            })?;
        row.try_into()
    }

    async fn lock_intent(&mut self, reference: &str) -> BillingResult<Option<PurchaseIntent>> {
        let sql = format!(
            "SELECT {} FROM purchase_intents WHERE reference = $1 FOR UPDATE",
            INTENT_COLUMNS
        );
        let row: Option<IntentRow> = sqlx::query_as(&sql)
            .bind(reference)
            .fetch_optional(self.conn()?)
            .await
            .map_err(db_err)?;
        row.map(PurchaseIntent::try_from).transpose()
    }

    async fn update_intent_status(
        &mut self,
        intent_id: Uuid,
        status: PaymentStatus,
    ) -> BillingResult<()> {
        sqlx::query("UPDATE purchase_intents SET status = $1, updated_at = NOW() WHERE id = $2")
            .bind(status.as_str())
            .bind(intent_id)
            .execute(self.conn()?)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn deactivate_active_subscriptions(&mut self, owner_id: Uuid) -> BillingResult<u64> {
        self.lock_owner(owner_id).await?;
        let result = sqlx::query(
            r#"
            UPDATE subscriptions
            SET status = 'inactive', updated_at = NOW()
            WHERE owner_id = $1 AND status = 'active'
            "#,
        )
        .bind(owner_id)
        .execute(self.conn()?)
        .await
        .map_err(db_err)?;
        Ok(result.rows_affected())
    }

    async fn insert_subscription(
        &mut self,
        subscription: &NewSubscription,
    ) -> BillingResult<Subscription> {
        let sql = format!(
            r#"
            INSERT INTO subscriptions
                (id, owner_id, plan, status, start_date, end_date, pending_unlock)
            VALUES ($1, $2, $3, 'active', $4, $5, $6)
            RETURNING {}
            "#,
            SUBSCRIPTION_COLUMNS
        );
        let row: SubscriptionRow = sqlx::query_as(&sql)
            .bind(Uuid::new_v4())
            .bind(subscription.owner_id)
            .bind(&subscription.plan)
            .bind(subscription.start_date)
            .bind(subscription.end_date)
            .bind(subscription.pending_unlock)
            .fetch_one(self.conn()?)
            .await
            .map_err(db_err)?;
        row.try_into()
    }

    async fn lock_active_subscription(
        &mut self,
        owner_id: Uuid,
    ) -> BillingResult<Option<Subscription>> {
        self.lock_owner(owner_id).await?;
        let sql = format!(
            r#"
            SELECT {} FROM subscriptions
            WHERE owner_id = $1 AND status = 'active'
            ORDER BY created_at DESC
            LIMIT 1
            FOR UPDATE
            "#,
            SUBSCRIPTION_COLUMNS
        );
        let row: Option<SubscriptionRow> = sqlx::query_as(&sql)
            .bind(owner_id)
            .fetch_optional(self.conn()?)
            .await
            .map_err(db_err)?;
        row.map(Subscription::try_from).transpose()
    }

    async fn clear_pending_unlock(&mut self, subscription_id: Uuid) -> BillingResult<()> {
        sqlx::query(
            "UPDATE subscriptions SET pending_unlock = false, updated_at = NOW() WHERE id = $1",
        )
        .bind(subscription_id)
        .execute(self.conn()?)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn resource_census(&mut self, owner_id: Uuid) -> BillingResult<ResourceCensus> {
        census(self.conn()?, owner_id).await
    }

    async fn set_all_resources(
        &mut self,
        owner_id: Uuid,
        kind: ResourceKind,
        status: ResourceStatus,
    ) -> BillingResult<u64> {
        let (table, scope) = resource_scope(kind);
        let sql = format!(
            "UPDATE {} SET status = $2, updated_at = NOW() WHERE {} AND status <> 'deleted'",
            table, scope
        );
        let result = sqlx::query(&sql)
            .bind(owner_id)
            .bind(status.as_str())
            .execute(self.conn()?)
            .await
            .map_err(db_err)?;
        Ok(result.rows_affected())
    }

    async fn activate_selected(
        &mut self,
        owner_id: Uuid,
        kind: ResourceKind,
        ids: &[Uuid],
    ) -> BillingResult<u64> {
        let (table, scope) = resource_scope(kind);
        let sql = format!(
            "UPDATE {} SET status = 'active', updated_at = NOW() \
             WHERE {} AND id = ANY($2) AND status <> 'deleted'",
            table, scope
        );
        let result = sqlx::query(&sql)
            .bind(owner_id)
            .bind(ids)
            .execute(self.conn()?)
            .await
            .map_err(db_err)?;
        Ok(result.rows_affected())
    }

    async fn activate_owner_account(&mut self, owner_id: Uuid) -> BillingResult<u64> {
        let result =
            sqlx::query("UPDATE users SET status = 'active', updated_at = NOW() WHERE id = $1")
                .bind(owner_id)
                .execute(self.conn()?)
                .await
                .map_err(db_err)?;
        Ok(result.rows_affected())
    }

    async fn commit(&mut self) -> BillingResult<()> {
        let tx = self
            .tx
            .take()
            .ok_or_else(|| BillingError::Database("Transaction already committed".to_string()))?;
        tx.commit().await.map_err(db_err)
    }
}

#[async_trait]
impl BillingStore for PgStore {
    async fn begin(&self) -> BillingResult<Box<dyn BillingTx>> {
        let tx = self.pool.begin().await.map_err(db_err)?;
        Ok(Box::new(PgTx { tx: Some(tx) }))
    }

    async fn active_subscription(&self, owner_id: Uuid) -> BillingResult<Option<Subscription>> {
        let sql = format!(
            r#"
            SELECT {} FROM subscriptions
            WHERE owner_id = $1 AND status = 'active'
            ORDER BY created_at DESC
            LIMIT 1
            "#,
            SUBSCRIPTION_COLUMNS
        );
        let row: Option<SubscriptionRow> = sqlx::query_as(&sql)
            .bind(owner_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.map(Subscription::try_from).transpose()
    }

    async fn resource_census(&self, owner_id: Uuid) -> BillingResult<ResourceCensus> {
        let mut conn = self.pool.acquire().await.map_err(db_err)?;
        census(&mut conn, owner_id).await
    }

    async fn lapsed_subscriptions(&self, today: Date) -> BillingResult<Vec<Subscription>> {
        let sql = format!(
            "SELECT {} FROM subscriptions WHERE status = 'active' AND end_date < $1",
            SUBSCRIPTION_COLUMNS
        );
        let rows: Vec<SubscriptionRow> = sqlx::query_as(&sql)
            .bind(today)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        rows.into_iter().map(Subscription::try_from).collect()
    }

    async fn owners_with_multiple_active(&self) -> BillingResult<Vec<(Uuid, u64)>> {
        let rows: Vec<(Uuid, i64)> = sqlx::query_as(
            r#"
            SELECT owner_id, COUNT(*) AS active_count
            FROM subscriptions
            WHERE status = 'active'
            GROUP BY owner_id
            HAVING COUNT(*) > 1
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(rows
            .into_iter()
            .map(|(owner_id, n)| (owner_id, count(n)))
            .collect())
    }

    async fn entitlement_footprints(&self) -> BillingResult<Vec<EntitlementFootprint>> {
        let rows: Vec<FootprintRow> = sqlx::query_as(
            r#"
            SELECT
                s.owner_id,
                s.plan,
                s.pending_unlock,
                (SELECT COUNT(*) FROM organizations o
                  WHERE o.owner_id = s.owner_id AND o.status = 'active') AS active_organizations,
                (SELECT COUNT(*) FROM users u
                  WHERE u.owner_id = s.owner_id AND u.id <> s.owner_id
                    AND u.role <> 'owner' AND u.status = 'active') AS active_auditors
            FROM subscriptions s
            WHERE s.status = 'active'
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(rows
            .into_iter()
            .map(|row| EntitlementFootprint {
                owner_id: row.owner_id,
                plan: row.plan,
                pending_unlock: row.pending_unlock,
                active_organizations: count(row.active_organizations),
                active_auditors: count(row.active_auditors),
            })
            .collect())
    }
}
