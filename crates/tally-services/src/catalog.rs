//! Product catalog
//!
//! DB-first pack lookup with a configured fallback so checkout keeps working
//! before the first provider sync lands, plus the sync itself: active provider
//! prices that advertise a token grant are upserted into `product_packs`.

use crate::provider::ProviderClient;
use async_trait::async_trait;
use tally_core::config::ProviderConfig;
use tally_core::models::ProductPack;
use tally_core::AppResult;
use tally_db::PackRepository;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Pack lookup seam used by checkout validation
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PackSource: Send + Sync {
    /// Resolve one pack by provider price id
    async fn pack_by_price_id(&self, price_id: &str) -> AppResult<Option<ProductPack>>;
}

/// Fallback pack sizes, used only when the catalog table is empty
const FALLBACK_PACKS: &[(FallbackSlot, i64, i64)] = &[
    (FallbackSlot::Small, 1_000, 499),
    (FallbackSlot::Medium, 5_000, 1_999),
    (FallbackSlot::Large, 15_000, 4_999),
];

#[derive(Debug, Clone, Copy)]
enum FallbackSlot {
    Small,
    Medium,
    Large,
}

/// Catalog of purchasable token packs
#[derive(Clone)]
pub struct ProductCatalog {
    packs: PackRepository,
    provider_config: ProviderConfig,
}

impl ProductCatalog {
    /// Create a new catalog
    pub fn new(packs: PackRepository, provider_config: ProviderConfig) -> Self {
        Self {
            packs,
            provider_config,
        }
    }

    fn fallback_packs(&self) -> Vec<ProductPack> {
        FALLBACK_PACKS
            .iter()
            .filter_map(|(slot, tokens, price_cents)| {
                let price_id = match slot {
                    FallbackSlot::Small => &self.provider_config.price_small,
                    FallbackSlot::Medium => &self.provider_config.price_medium,
                    FallbackSlot::Large => &self.provider_config.price_large,
                };
                if price_id.is_empty() {
                    return None;
                }
                Some(ProductPack {
                    id: Uuid::new_v4(),
                    provider_price_id: price_id.clone(),
                    tokens: *tokens,
                    price_cents: *price_cents,
                    currency: "usd".to_string(),
                    active: true,
                })
            })
            .collect()
    }

    /// Active packs: the table when populated, the configured fallback otherwise
    #[instrument(skip(self))]
    pub async fn list_active(&self) -> AppResult<Vec<ProductPack>> {
        let stored = self.packs.list_active().await?;
        if !stored.is_empty() {
            return Ok(stored);
        }

        let fallback = self.fallback_packs();
        if !fallback.is_empty() {
            warn!("product_packs table empty, serving configured fallback catalog");
        }
        Ok(fallback)
    }

    /// Resolve one pack by provider price id, fallback included
    #[instrument(skip(self))]
    pub async fn find_by_price_id(&self, price_id: &str) -> AppResult<Option<ProductPack>> {
        if let Some(pack) = self.packs.find_by_price_id(price_id).await? {
            return Ok(Some(pack));
        }
        Ok(self
            .fallback_packs()
            .into_iter()
            .find(|p| p.provider_price_id == price_id))
    }

    /// Upsert packs from the provider's active price list.
    ///
    /// Prices without a token grant in their metadata are skipped; they are
    /// not token packs.
    #[instrument(skip(self, provider))]
    pub async fn sync_from_provider(&self, provider: &dyn ProviderClient) -> AppResult<usize> {
        let prices = provider.list_prices().await?;
        let mut synced = 0;

        for price in prices {
            let Some(tokens) = price.tokens() else {
                continue;
            };
            let Some(unit_amount) = price.unit_amount else {
                continue;
            };

            let pack = ProductPack {
                id: Uuid::new_v4(),
                provider_price_id: price.id.clone(),
                tokens,
                price_cents: unit_amount,
                currency: price.currency.clone().unwrap_or_else(|| "usd".to_string()),
                active: price.active,
            };
            self.packs.upsert(&pack).await?;
            synced += 1;
        }

        info!(count = synced, "synced product packs from provider");
        Ok(synced)
    }
}

#[async_trait]
impl PackSource for ProductCatalog {
    async fn pack_by_price_id(&self, price_id: &str) -> AppResult<Option<ProductPack>> {
        self.find_by_price_id(price_id).await
    }
}
