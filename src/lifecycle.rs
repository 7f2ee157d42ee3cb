//! Creating, starting and stopping split tests
//!
//! A page runs at most one active test per test type. Creation and start
//! both check that rule against [`SplitTestStore::active_test_for_page`].

use std::sync::Arc;
use tracing::info;

use crate::clock::{Clock, SystemClock};
use crate::experiment::{NewSplitTest, NewVariant, SplitTest, TestId, Variant};
use crate::store::SplitTestStore;
use crate::{Error, Result};

/// Fewest variants a test needs before it can be started.
pub const MIN_VARIANTS_TO_START: usize = 2;

/// Marketer-side test management.
pub struct TestManager<S, C = SystemClock> {
    store: Arc<S>,
    clock: C,
}

impl<S: SplitTestStore> TestManager<S, SystemClock> {
    /// Create a manager using the system clock.
    #[must_use]
    pub const fn new(store: Arc<S>) -> Self {
        Self::with_clock(store, SystemClock)
    }
}

impl<S: SplitTestStore, C: Clock> TestManager<S, C> {
    /// Create a manager with an explicit clock.
    pub const fn with_clock(store: Arc<S>, clock: C) -> Self {
        Self { store, clock }
    }

    /// Store a new test.
    ///
    /// # Errors
    ///
    /// `InvalidInput` for an empty name or when the test would be a second
    /// active test of its type on the page.
    pub async fn create_test(&self, test: NewSplitTest) -> Result<SplitTest> {
        if test.name.trim().is_empty() {
            return Err(Error::InvalidInput("Test name is required".to_string()));
        }
        if test.is_active {
            if let Some(active) = self
                .store
                .active_test_for_page(test.page_id, Some(test.test_type))
                .await?
            {
                return Err(already_running(&active));
            }
        }
        let test = self.store.insert_test(test).await?;
        info!(test_id = %test.id(), page_id = %test.page_id(), "created split test");
        Ok(test)
    }

    /// Add a variant to an existing test.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown test, `InvalidInput` for an empty name.
    pub async fn add_variant(&self, variant: NewVariant) -> Result<Variant> {
        if variant.name.trim().is_empty() {
            return Err(Error::InvalidInput("Variant name is required".to_string()));
        }
        self.store.insert_variant(variant).await
    }

    /// Activate a test from now on.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown test; `InvalidInput` when it has fewer than
    /// two variants or another test of its type is already running on the page.
    pub async fn start_test(&self, test_id: TestId) -> Result<SplitTest> {
        let mut test = self
            .store
            .get_test(test_id)
            .await?
            .ok_or_else(|| Error::not_found("split test", test_id))?;

        let variants = self.store.variants_for_test(test_id).await?;
        if variants.len() < MIN_VARIANTS_TO_START {
            return Err(Error::InvalidInput(format!(
                "A split test needs at least {MIN_VARIANTS_TO_START} variants to start"
            )));
        }
        if let Some(active) = self
            .store
            .active_test_for_page(test.page_id(), Some(test.test_type()))
            .await?
            .filter(|active| active.id() != test_id)
        {
            return Err(already_running(&active));
        }

        test.start(self.clock.now());
        self.store.update_test(&test).await?;
        info!(%test_id, "started split test");
        Ok(test)
    }

    /// Deactivate a test as of now.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown test.
    pub async fn stop_test(&self, test_id: TestId) -> Result<SplitTest> {
        let mut test = self
            .store
            .get_test(test_id)
            .await?
            .ok_or_else(|| Error::not_found("split test", test_id))?;
        test.stop(self.clock.now());
        self.store.update_test(&test).await?;
        info!(%test_id, "stopped split test");
        Ok(test)
    }

    /// Delete a test with its variants, sessions and conversions.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown test.
    pub async fn delete_test(&self, test_id: TestId) -> Result<()> {
        if self.store.delete_test(test_id).await? {
            info!(%test_id, "deleted split test");
            Ok(())
        } else {
            Err(Error::not_found("split test", test_id))
        }
    }
}

fn already_running(active: &SplitTest) -> Error {
    Error::InvalidInput(format!(
        "Page {} already has an active {} test ({})",
        active.page_id(),
        active.test_type().as_str(),
        active.id()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::experiment::{ContentVersionId, PageId, TestType};
    use crate::store::MemoryStore;
    use chrono::{TimeZone, Utc};

    fn manager() -> TestManager<MemoryStore, FixedClock> {
        let clock = FixedClock(Utc.with_ymd_and_hms(2024, 6, 1, 9, 0, 0).unwrap());
        TestManager::with_clock(Arc::new(MemoryStore::new()), clock)
    }

    #[tokio::test]
    async fn test_start_requires_two_variants() {
        let mgr = manager();
        let test = mgr
            .create_test(
                SplitTest::builder(PageId(1), "Hero", TestType::Content)
                    .inactive()
                    .build(),
            )
            .await
            .unwrap();
        mgr.add_variant(Variant::builder(test.id(), "A", ContentVersionId(1)).build())
            .await
            .unwrap();

        let err = mgr.start_test(test.id()).await.unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));

        mgr.add_variant(Variant::builder(test.id(), "B", ContentVersionId(2)).build())
            .await
            .unwrap();
        let started = mgr.start_test(test.id()).await.unwrap();
        assert!(started.is_active());
        assert_eq!(started.end_date(), None);
    }

    #[tokio::test]
    async fn test_second_active_test_of_same_type_is_rejected() {
        let mgr = manager();
        mgr.create_test(SplitTest::builder(PageId(1), "First", TestType::Design).build())
            .await
            .unwrap();
        let err = mgr
            .create_test(SplitTest::builder(PageId(1), "Second", TestType::Design).build())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));

        mgr.create_test(SplitTest::builder(PageId(1), "Copy", TestType::Content).build())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_stop_and_delete() {
        let mgr = manager();
        let test = mgr
            .create_test(SplitTest::builder(PageId(4), "Run", TestType::Content).build())
            .await
            .unwrap();
        let stopped = mgr.stop_test(test.id()).await.unwrap();
        assert!(!stopped.is_active());
        assert!(stopped.end_date().is_some());

        mgr.delete_test(test.id()).await.unwrap();
        assert!(matches!(
            mgr.delete_test(test.id()).await,
            Err(Error::NotFound { .. })
        ));
    }
}
