use crate::DomainResult;
use crate::ports::BoxFuture;
use crate::storefront::{CartSnapshot, DeliverySummary, OrderSummary, UserProfile};

pub trait UserDirectory: Send + Sync {
    fn find_by_username(
        &self,
        username: &str,
    ) -> BoxFuture<'_, DomainResult<Option<UserProfile>>>;

    fn find_by_id(&self, user_id: &str) -> BoxFuture<'_, DomainResult<Option<UserProfile>>>;
}

/// Read-only lookups into the cart, order, delivery and wishlist stores.
pub trait CustomerRecords: Send + Sync {
    fn cart(&self, user_id: &str) -> BoxFuture<'_, DomainResult<Option<CartSnapshot>>>;

    fn orders(&self, user_id: &str) -> BoxFuture<'_, DomainResult<Vec<OrderSummary>>>;

    fn deliveries(&self, user_id: &str) -> BoxFuture<'_, DomainResult<Vec<DeliverySummary>>>;

    fn wishlist_product_ids(&self, user_id: &str) -> BoxFuture<'_, DomainResult<Vec<String>>>;
}
