//! Sticky, weighted variant assignment
//!
//! A visitor's first contact with a test draws a variant from the cumulative
//! weight distribution and persists a [`VisitorSession`]; every later call
//! returns the variant recorded in that session.
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use splitpage::assignment::AssignmentEngine;
//! use splitpage::experiment::{ContentVersionId, PageId, SplitTest, TestType, Variant, VisitorId};
//! use splitpage::store::{MemoryStore, SplitTestStore};
//!
//! # async fn example() -> splitpage::Result<()> {
//! let store = Arc::new(MemoryStore::new());
//! let test = store
//!     .insert_test(SplitTest::builder(PageId(1), "Hero", TestType::Content).build())
//!     .await?;
//! store
//!     .insert_variant(Variant::builder(test.id(), "A", ContentVersionId(1)).build())
//!     .await?;
//!
//! let engine = AssignmentEngine::seeded(Arc::clone(&store), 7);
//! let visitor = VisitorId::new("v-1");
//! let first = engine.assign_variant(test.id(), &visitor).await?;
//! let again = engine.assign_variant(test.id(), &visitor).await?;
//! assert_eq!(first, again);
//! # Ok(())
//! # }
//! ```

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

use crate::experiment::{
    ContentVersionId, PageId, TestId, TestType, Variant, VariantId, VisitorId, VisitorSession,
};
use crate::store::{Inserted, SplitTestStore};
use crate::{Error, Result};

/// Pick an index from `weights` with probability `weight / sum(weights)`.
///
/// Draws once, uniformly in `[0, sum)`, and walks the cumulative sums.
/// Weights below 1 violate the caller contract and count as 1.
/// Returns `None` for an empty slice.
pub fn pick_weighted<R: Rng + ?Sized>(weights: &[u32], rng: &mut R) -> Option<usize> {
    if weights.is_empty() {
        return None;
    }
    let total: u64 = weights.iter().map(|w| u64::from((*w).max(1))).sum();
    let mut ticket = rng.gen_range(0..total);
    for (idx, weight) in weights.iter().enumerate() {
        let weight = u64::from((*weight).max(1));
        if ticket < weight {
            return Some(idx);
        }
        ticket -= weight;
    }
    Some(weights.len() - 1)
}

/// The variant a visitor sees on a page, with its test context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariantAssignment {
    /// Active test on the page
    pub test_id: TestId,
    /// Test name
    pub test_name: String,
    /// Test type
    pub test_type: TestType,
    /// Assigned variant
    pub variant_id: VariantId,
    /// Variant name
    pub variant_name: String,
    /// Content version to serve
    pub content_version_id: ContentVersionId,
}

/// Assigns visitors to variants and keeps them there.
///
/// The random source is injected so tests can seed it; it is only locked
/// for the draw itself, never across a store call.
pub struct AssignmentEngine<S, R = StdRng> {
    store: Arc<S>,
    rng: Mutex<R>,
}

impl<S: SplitTestStore> AssignmentEngine<S, StdRng> {
    /// Create an engine drawing from OS entropy.
    #[must_use]
    pub fn new(store: Arc<S>) -> Self {
        Self::with_rng(store, StdRng::from_entropy())
    }

    /// Create an engine with a reproducible random sequence.
    #[must_use]
    pub fn seeded(store: Arc<S>, seed: u64) -> Self {
        Self::with_rng(store, StdRng::seed_from_u64(seed))
    }
}

impl<S: SplitTestStore, R: Rng + Send> AssignmentEngine<S, R> {
    /// Create an engine with a caller-supplied random source.
    pub fn with_rng(store: Arc<S>, rng: R) -> Self {
        Self {
            store,
            rng: Mutex::new(rng),
        }
    }

    /// The underlying store.
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Return the visitor's variant for a test, assigning one on first contact.
    ///
    /// Returns `Ok(None)` without writing anything when the test has no variants.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn assign_variant(
        &self,
        test_id: TestId,
        visitor_id: &VisitorId,
    ) -> Result<Option<Variant>> {
        if let Some(session) = self.store.find_session(test_id, visitor_id).await? {
            debug!(%test_id, %visitor_id, variant_id = %session.variant_id(), "sticky assignment");
            return self.session_variant(&session).await;
        }

        let variants = self.store.variants_for_test(test_id).await?;
        let weights: Vec<u32> = variants.iter().map(Variant::weight).collect();
        let Some(idx) = self.draw(&weights)? else {
            return Ok(None);
        };
        let chosen = &variants[idx];

        let session = VisitorSession::new(test_id, chosen.id(), visitor_id.clone());
        match self.store.insert_session(session).await? {
            Inserted::Created(_) => {
                info!(%test_id, %visitor_id, variant_id = %chosen.id(), "assigned variant");
                Ok(Some(chosen.clone()))
            }
            Inserted::Existing(existing) => {
                warn!(%test_id, %visitor_id, "concurrent first visit; keeping stored assignment");
                self.session_variant(&existing).await
            }
        }
    }

    /// Look up the active test on a page and assign the visitor within it.
    ///
    /// Returns `Ok(None)` when the page has no active test (of the requested
    /// type) or the test has no variants.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn variant_for_visitor(
        &self,
        page_id: PageId,
        visitor_id: &VisitorId,
        test_type: Option<TestType>,
    ) -> Result<Option<VariantAssignment>> {
        let Some(test) = self.store.active_test_for_page(page_id, test_type).await? else {
            return Ok(None);
        };
        let Some(variant) = self.assign_variant(test.id(), visitor_id).await? else {
            return Ok(None);
        };
        Ok(Some(VariantAssignment {
            test_id: test.id(),
            test_name: test.name().to_string(),
            test_type: test.test_type(),
            variant_id: variant.id(),
            variant_name: variant.name().to_string(),
            content_version_id: variant.content_version_id(),
        }))
    }

    async fn session_variant(&self, session: &VisitorSession) -> Result<Option<Variant>> {
        let variant = self.store.get_variant(session.variant_id()).await?;
        if variant.is_none() {
            warn!(variant_id = %session.variant_id(), "session points at a missing variant");
        }
        Ok(variant)
    }

    fn draw(&self, weights: &[u32]) -> Result<Option<usize>> {
        let mut rng = self
            .rng
            .lock()
            .map_err(|_| Error::Other("assignment rng mutex poisoned".to_string()))?;
        Ok(pick_weighted(weights, &mut *rng))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::experiment::SplitTest;
    use crate::store::MemoryStore;

    #[test]
    fn test_pick_weighted_empty() {
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(pick_weighted(&[], &mut rng), None);
    }

    #[test]
    fn test_pick_weighted_single() {
        let mut rng = StdRng::seed_from_u64(1);
        for _ in 0..20 {
            assert_eq!(pick_weighted(&[5], &mut rng), Some(0));
        }
    }

    #[test]
    fn test_pick_weighted_frequencies() {
        let mut rng = StdRng::seed_from_u64(42);
        let weights = [1, 3];
        let mut counts = [0u32; 2];
        for _ in 0..20_000 {
            counts[pick_weighted(&weights, &mut rng).unwrap()] += 1;
        }
        let share = f64::from(counts[1]) / 20_000.0;
        assert!((share - 0.75).abs() < 0.02, "share was {share}");
    }

    #[test]
    fn test_pick_weighted_zero_weight_counts_as_one() {
        let mut rng = StdRng::seed_from_u64(3);
        let mut seen = [false; 2];
        for _ in 0..200 {
            seen[pick_weighted(&[0, 1], &mut rng).unwrap()] = true;
        }
        assert_eq!(seen, [true, true]);
    }

    #[tokio::test]
    async fn test_assign_without_variants_writes_nothing() {
        let store = Arc::new(MemoryStore::new());
        let test = store
            .insert_test(SplitTest::builder(PageId(1), "Empty", TestType::Content).build())
            .await
            .unwrap();
        let engine = AssignmentEngine::seeded(Arc::clone(&store), 1);

        let assigned = engine
            .assign_variant(test.id(), &VisitorId::new("v"))
            .await
            .unwrap();
        assert!(assigned.is_none());
        assert_eq!(store.session_count(), 0);
    }

    #[tokio::test]
    async fn test_variant_for_visitor_without_active_test() {
        let store = Arc::new(MemoryStore::new());
        let engine = AssignmentEngine::seeded(store, 1);
        let found = engine
            .variant_for_visitor(PageId(9), &VisitorId::new("v"), None)
            .await
            .unwrap();
        assert!(found.is_none());
    }
}
