use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use kedai_domain::DomainResult;
use kedai_domain::ports::BoxFuture;
use kedai_domain::ports::storefront::{CustomerRecords, UserDirectory};
use kedai_domain::storefront::{CartSnapshot, DeliverySummary, OrderSummary, UserProfile};
use serde::Deserialize;
use tokio::sync::RwLock;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct StorefrontFixture {
    pub users: Vec<UserProfile>,
    pub carts: Vec<CartSnapshot>,
    pub orders: Vec<OrderSummary>,
    pub deliveries: Vec<DeliverySummary>,
    pub wishlists: HashMap<String, Vec<String>>,
}

#[derive(Default)]
struct StorefrontState {
    users: HashMap<String, UserProfile>,
    user_ids_by_username: HashMap<String, String>,
    carts: HashMap<String, CartSnapshot>,
    orders: HashMap<String, Vec<OrderSummary>>,
    deliveries: HashMap<String, Vec<DeliverySummary>>,
    wishlists: HashMap<String, Vec<String>>,
}

/// Read side of the catalogue, account, cart and order stores the support
/// desk looks into.
#[derive(Default)]
pub struct InMemoryStorefront {
    state: Arc<RwLock<StorefrontState>>,
}

impl InMemoryStorefront {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn from_fixture(fixture: StorefrontFixture) -> Self {
        let storefront = Self::new();
        for user in fixture.users {
            storefront.upsert_user(user).await;
        }
        for cart in fixture.carts {
            storefront.put_cart(cart).await;
        }
        for order in fixture.orders {
            storefront.add_order(order).await;
        }
        for delivery in fixture.deliveries {
            storefront.add_delivery(delivery).await;
        }
        for (user_id, product_ids) in fixture.wishlists {
            storefront.set_wishlist(&user_id, product_ids).await;
        }
        storefront
    }

    pub async fn from_fixture_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let raw = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("failed to read storefront fixture {}", path.display()))?;
        let fixture: StorefrontFixture = serde_json::from_str(&raw)
            .with_context(|| format!("invalid storefront fixture {}", path.display()))?;
        let storefront = Self::from_fixture(fixture).await;
        tracing::info!(
            path = %path.display(),
            users = storefront.state.read().await.users.len(),
            "storefront fixture loaded"
        );
        Ok(storefront)
    }

    pub async fn upsert_user(&self, user: UserProfile) {
        let mut state = self.state.write().await;
        if let Some(previous) = state.users.get(&user.user_id).map(|p| p.username.clone()) {
            state.user_ids_by_username.remove(&previous);
        }
        state
            .user_ids_by_username
            .insert(user.username.clone(), user.user_id.clone());
        state.users.insert(user.user_id.clone(), user);
    }

    pub async fn put_cart(&self, cart: CartSnapshot) {
        self.state
            .write()
            .await
            .carts
            .insert(cart.user_id.clone(), cart);
    }

    pub async fn add_order(&self, order: OrderSummary) {
        let mut state = self.state.write().await;
        let orders = state.orders.entry(order.user_id.clone()).or_default();
        orders.push(order);
        orders.sort_by(|a, b| b.placed_at_ms.cmp(&a.placed_at_ms));
    }

    pub async fn add_delivery(&self, delivery: DeliverySummary) {
        let mut state = self.state.write().await;
        let deliveries = state.deliveries.entry(delivery.user_id.clone()).or_default();
        deliveries.push(delivery);
        deliveries.sort_by(|a, b| b.updated_at_ms.cmp(&a.updated_at_ms));
    }

    pub async fn set_wishlist(&self, user_id: &str, product_ids: Vec<String>) {
        self.state
            .write()
            .await
            .wishlists
            .insert(user_id.to_string(), product_ids);
    }
}

impl UserDirectory for InMemoryStorefront {
    fn find_by_username(&self, username: &str) -> BoxFuture<'_, DomainResult<Option<UserProfile>>> {
        let username = username.trim().to_string();
        let state = self.state.clone();
        Box::pin(async move {
            let state = state.read().await;
            Ok(state
                .user_ids_by_username
                .get(&username)
                .and_then(|user_id| state.users.get(user_id))
                .cloned())
        })
    }

    fn find_by_id(&self, user_id: &str) -> BoxFuture<'_, DomainResult<Option<UserProfile>>> {
        let user_id = user_id.to_string();
        let state = self.state.clone();
        Box::pin(async move { Ok(state.read().await.users.get(&user_id).cloned()) })
    }
}

impl CustomerRecords for InMemoryStorefront {
    fn cart(&self, user_id: &str) -> BoxFuture<'_, DomainResult<Option<CartSnapshot>>> {
        let user_id = user_id.to_string();
        let state = self.state.clone();
        Box::pin(async move { Ok(state.read().await.carts.get(&user_id).cloned()) })
    }

    fn orders(&self, user_id: &str) -> BoxFuture<'_, DomainResult<Vec<OrderSummary>>> {
        let user_id = user_id.to_string();
        let state = self.state.clone();
        Box::pin(async move {
            Ok(state
                .read()
                .await
                .orders
                .get(&user_id)
                .cloned()
                .unwrap_or_default())
        })
    }

    fn deliveries(&self, user_id: &str) -> BoxFuture<'_, DomainResult<Vec<DeliverySummary>>> {
        let user_id = user_id.to_string();
        let state = self.state.clone();
        Box::pin(async move {
            Ok(state
                .read()
                .await
                .deliveries
                .get(&user_id)
                .cloned()
                .unwrap_or_default())
        })
    }

    fn wishlist_product_ids(&self, user_id: &str) -> BoxFuture<'_, DomainResult<Vec<String>>> {
        let user_id = user_id.to_string();
        let state = self.state.clone();
        Box::pin(async move {
            Ok(state
                .read()
                .await
                .wishlists
                .get(&user_id)
                .cloned()
                .unwrap_or_default())
        })
    }
}
