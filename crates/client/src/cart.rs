// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Guest carts, one per mall, kept locally until the user signs in.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info, warn};

use crate::http::{ApiRequest, HttpClient};
use crate::store::LocalStore;
use crate::token::epoch_millis;

/// Storage key of the mall id → payload mapping.
pub const GUEST_CART_KEY: &str = "guest_cart_v1";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuestCartItem {
    pub product_id: u64,
    pub quantity: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

impl GuestCartItem {
    pub fn new(product_id: u64, quantity: u32) -> Self {
        Self { product_id, quantity, name: None, price: None, image: None }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuestCartPayload {
    pub mall_id: String,
    pub items: Vec<GuestCartItem>,
    /// Epoch milliseconds of the last mutation.
    pub updated_at: u64,
}

impl GuestCartPayload {
    pub fn item(&self, product_id: u64) -> Option<&GuestCartItem> {
        self.items.iter().find(|i| i.product_id == product_id)
    }

    pub fn total_quantity(&self) -> u64 {
        self.items.iter().map(|i| u64::from(i.quantity)).sum()
    }
}

/// Result of pushing one mall's guest cart to the server.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MergeReport {
    pub mall_id: String,
    pub merged: Vec<u64>,
    pub failed: Vec<u64>,
}

#[derive(Clone)]
pub struct GuestCartStore {
    store: Arc<dyn LocalStore>,
}

impl GuestCartStore {
    pub fn new(store: Arc<dyn LocalStore>) -> Self {
        Self { store }
    }

    /// Every mall's guest cart. Unreadable or corrupt data reads as empty.
    pub fn get_all(&self) -> BTreeMap<String, GuestCartPayload> {
        let raw = match self.store.get(GUEST_CART_KEY) {
            Ok(Some(raw)) => raw,
            Ok(None) => return BTreeMap::new(),
            Err(e) => {
                warn!("guest cart read failed: {e:#}");
                return BTreeMap::new();
            }
        };
        serde_json::from_str(&raw).unwrap_or_else(|e| {
            warn!("guest cart data corrupt, ignoring: {e}");
            BTreeMap::new()
        })
    }

    pub fn get(&self, mall_id: &str) -> Option<GuestCartPayload> {
        self.get_all().remove(mall_id)
    }

    /// Add `item`, accumulating quantity if the product is already present.
    pub fn add_item(&self, mall_id: &str, item: GuestCartItem) -> anyhow::Result<()> {
        self.mutate(mall_id, |items| {
            match items.iter_mut().find(|i| i.product_id == item.product_id) {
                Some(existing) => {
                    existing.quantity = existing.quantity.saturating_add(item.quantity);
                    if item.name.is_some() {
                        existing.name = item.name;
                    }
                    if item.price.is_some() {
                        existing.price = item.price;
                    }
                    if item.image.is_some() {
                        existing.image = item.image;
                    }
                }
                None => items.push(item),
            }
        })
    }

    /// Set a product's quantity. Zero or less removes it; unknown products
    /// are left alone.
    pub fn update_quantity(&self, mall_id: &str, product_id: u64, quantity: i64) -> anyhow::Result<()> {
        if quantity <= 0 {
            return self.remove_item(mall_id, product_id);
        }
        let quantity = u32::try_from(quantity).unwrap_or(u32::MAX);
        self.mutate(mall_id, |items| {
            if let Some(item) = items.iter_mut().find(|i| i.product_id == product_id) {
                item.quantity = quantity;
            }
        })
    }

    pub fn remove_item(&self, mall_id: &str, product_id: u64) -> anyhow::Result<()> {
        self.mutate(mall_id, |items| items.retain(|i| i.product_id != product_id))
    }

    pub fn clear(&self, mall_id: &str) -> anyhow::Result<()> {
        let mut all = self.get_all();
        if all.remove(mall_id).is_some() {
            self.save_all(&all)?;
        }
        Ok(())
    }

    pub fn clear_all(&self) -> anyhow::Result<()> {
        self.store.delete(GUEST_CART_KEY)
    }

    /// Push one mall's guest cart into the signed-in user's server cart.
    ///
    /// Items the server rejects are skipped. The local payload is cleared
    /// afterwards whatever the per-item outcome.
    pub async fn merge_into_server(&self, http: &HttpClient, mall_id: &str) -> anyhow::Result<MergeReport> {
        let mut report = MergeReport { mall_id: mall_id.to_owned(), ..Default::default() };
        let Some(payload) = self.get(mall_id) else {
            debug!(mall_id, "no guest cart to merge");
            self.clear(mall_id)?;
            return Ok(report);
        };

        let path = http.endpoints().cart_add.clone();
        for item in &payload.items {
            let body = json!({ "product_id": item.product_id, "quantity": item.quantity });
            match http.send(ApiRequest::post(path.as_str(), body)).await {
                Ok(_) => report.merged.push(item.product_id),
                Err(e) => {
                    warn!(mall_id, product_id = item.product_id, err = %e, "guest cart item not merged");
                    report.failed.push(item.product_id);
                }
            }
        }

        self.clear(mall_id)?;
        info!(mall_id, merged = report.merged.len(), failed = report.failed.len(), "guest cart merged");
        Ok(report)
    }

    fn mutate(&self, mall_id: &str, f: impl FnOnce(&mut Vec<GuestCartItem>)) -> anyhow::Result<()> {
        let mut all = self.get_all();
        let mut items = all.remove(mall_id).map(|p| p.items).unwrap_or_default();
        f(&mut items);
        items.retain(|i| i.quantity > 0);
        if !items.is_empty() {
            let payload =
                GuestCartPayload { mall_id: mall_id.to_owned(), items, updated_at: epoch_millis() };
            all.insert(mall_id.to_owned(), payload);
        }
        self.save_all(&all)
    }

    fn save_all(&self, all: &BTreeMap<String, GuestCartPayload>) -> anyhow::Result<()> {
        if all.is_empty() {
            return self.store.delete(GUEST_CART_KEY);
        }
        self.store.set(GUEST_CART_KEY, &serde_json::to_string(all)?)
    }
}

impl std::fmt::Debug for GuestCartStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GuestCartStore").finish_non_exhaustive()
    }
}

#[cfg(test)]
#[path = "cart_tests.rs"]
mod tests;
