//! Product pack repository implementation
//!
//! Read-mostly storage for the purchasable token packs; writes happen only
//! through the catalog sync.

use sqlx::{PgPool, Postgres};
use tally_core::models::ProductPack;
use tally_core::AppResult;
use tracing::{debug, error, instrument};
use uuid::Uuid;

/// PostgreSQL product pack repository
#[derive(Clone)]
pub struct PackRepository {
    pool: PgPool,
}

const PACK_COLUMNS: &str = "id, provider_price_id, tokens, price_cents, currency, active";

impl PackRepository {
    /// Create a new pack repository
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// All currently purchasable packs, cheapest first
    #[instrument(skip(self))]
    pub async fn list_active(&self) -> AppResult<Vec<ProductPack>> {
        debug!("Listing active product packs");

        let rows = sqlx::query_as::<Postgres, PackRow>(&format!(
            "SELECT {PACK_COLUMNS} FROM product_packs WHERE active = TRUE ORDER BY price_cents"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            error!("Database error listing packs: {}", e);
            crate::db_err("Failed to list packs", e)
        })?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    /// Resolve a pack by the provider price id on a checkout session
    #[instrument(skip(self))]
    pub async fn find_by_price_id(&self, price_id: &str) -> AppResult<Option<ProductPack>> {
        let row = sqlx::query_as::<Postgres, PackRow>(&format!(
            "SELECT {PACK_COLUMNS} FROM product_packs WHERE provider_price_id = $1"
        ))
        .bind(price_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            error!("Database error finding pack {}: {}", price_id, e);
            crate::db_err("Failed to find pack", e)
        })?;

        Ok(row.map(Into::into))
    }

    /// Upsert a pack from the provider catalog sync
    #[instrument(skip(self, pack))]
    pub async fn upsert(&self, pack: &ProductPack) -> AppResult<ProductPack> {
        let row = sqlx::query_as::<Postgres, PackRow>(&format!(
            r#"
            INSERT INTO product_packs (id, provider_price_id, tokens, price_cents, currency, active)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (provider_price_id) DO UPDATE
            SET tokens = EXCLUDED.tokens,
                price_cents = EXCLUDED.price_cents,
                currency = EXCLUDED.currency,
                active = EXCLUDED.active
            RETURNING {PACK_COLUMNS}
            "#
        ))
        .bind(pack.id)
        .bind(&pack.provider_price_id)
        .bind(pack.tokens)
        .bind(pack.price_cents)
        .bind(&pack.currency)
        .bind(pack.active)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to upsert pack {}: {}", pack.provider_price_id, e);
            crate::db_err("Failed to upsert pack", e)
        })?;

        Ok(row.into())
    }
}

/// Helper struct for mapping database rows
#[derive(Debug, sqlx::FromRow)]
struct PackRow {
    id: Uuid,
    provider_price_id: String,
    tokens: i64,
    price_cents: i64,
    currency: String,
    active: bool,
}

impl From<PackRow> for ProductPack {
    fn from(row: PackRow) -> Self {
        Self {
            id: row.id,
            provider_price_id: row.provider_price_id,
            tokens: row.tokens,
            price_cents: row.price_cents,
            currency: row.currency,
            active: row.active,
        }
    }
}
