use chrono::{DateTime, Utc};
use common::ProductId;

use crate::{MovementReason, StockMovement};

/// Builder for filtering the movement log.
///
/// Results are always ordered newest first.
#[derive(Debug, Clone, Default)]
pub struct MovementQuery {
    /// Filter by product.
    pub product_id: Option<ProductId>,

    /// Filter by reason.
    pub reason: Option<MovementReason>,

    /// Movements created at or after this timestamp.
    pub from_timestamp: Option<DateTime<Utc>>,

    /// Movements created at or before this timestamp.
    pub to_timestamp: Option<DateTime<Utc>>,

    /// Maximum number of movements to return.
    pub limit: Option<usize>,

    /// Number of movements to skip.
    pub offset: Option<usize>,
}

impl MovementQuery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a query for all movements of one product.
    pub fn for_product(product_id: ProductId) -> Self {
        Self {
            product_id: Some(product_id),
            ..Default::default()
        }
    }

    pub fn product_id(mut self, product_id: ProductId) -> Self {
        self.product_id = Some(product_id);
        self
    }

    pub fn reason(mut self, reason: MovementReason) -> Self {
        self.reason = Some(reason);
        self
    }

    pub fn from_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.from_timestamp = Some(timestamp);
        self
    }

    pub fn to_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.to_timestamp = Some(timestamp);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Returns true if the movement passes every filter of this query.
    /// Paging is not considered.
    pub fn matches(&self, movement: &StockMovement) -> bool {
        if let Some(id) = self.product_id
            && movement.product_id != id
        {
            return false;
        }
        if let Some(reason) = self.reason
            && movement.reason != reason
        {
            return false;
        }
        if let Some(from) = self.from_timestamp
            && movement.created_at < from
        {
            return false;
        }
        if let Some(to) = self.to_timestamp
            && movement.created_at > to
        {
            return false;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::ActorId;

    #[test]
    fn query_builder_sets_fields() {
        let product_id = ProductId::new();
        let query = MovementQuery::for_product(product_id)
            .reason(MovementReason::Sale)
            .limit(10)
            .offset(5);

        assert_eq!(query.product_id, Some(product_id));
        assert_eq!(query.reason, Some(MovementReason::Sale));
        assert_eq!(query.limit, Some(10));
        assert_eq!(query.offset, Some(5));
    }

    #[test]
    fn matches_filters_by_product_and_reason() {
        let product_id = ProductId::new();
        let sale = StockMovement::new(product_id, -2, MovementReason::Sale, ActorId::new(), None);
        let other = StockMovement::new(
            ProductId::new(),
            4,
            MovementReason::Purchase,
            ActorId::new(),
            None,
        );

        let query = MovementQuery::for_product(product_id).reason(MovementReason::Sale);
        assert!(query.matches(&sale));
        assert!(!query.matches(&other));
        assert!(MovementQuery::new().matches(&other));
    }
}
