//! In-memory store implementation using `DashMap`.
//!
//! This is the default backend for tests and ephemeral deployments - data is
//! lost on process restart. For persistence, use [`super::SqliteStore`].

use super::{Inserted, SplitTestStore};
use crate::experiment::{
    Conversion, NewConversion, NewPageView, NewSplitTest, NewVariant, NewVisitorSession, PageId,
    PageView, RecordId, SplitTest, TestId, TestType, Variant, VariantId, VisitorId,
    VisitorSession, WebsiteId,
};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// In-memory split-test store using lock-free concurrent hashmaps.
///
/// Sessions and conversions are keyed by `(test, visitor)`, so the entry API
/// gives the uniqueness guarantee without a separate lock.
///
/// # Example
///
/// ```rust
/// use splitpage::experiment::{TestId, VariantId, VisitorId, VisitorSession};
/// use splitpage::store::{MemoryStore, SplitTestStore};
///
/// # async fn example() -> splitpage::Result<()> {
/// let store = MemoryStore::new();
/// let visitor = VisitorId::new("v-1");
/// let first = store
///     .insert_session(VisitorSession::new(TestId(1), VariantId(1), visitor.clone()))
///     .await?;
/// let second = store
///     .insert_session(VisitorSession::new(TestId(1), VariantId(2), visitor))
///     .await?;
/// assert!(first.is_created());
/// assert_eq!(second.into_inner().variant_id(), VariantId(1));
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct MemoryStore {
    next_id: AtomicU64,
    tests: DashMap<TestId, SplitTest>,
    variants: DashMap<VariantId, Variant>,
    sessions: DashMap<(TestId, VisitorId), VisitorSession>,
    conversions: DashMap<(TestId, VisitorId), Conversion>,
    pages: DashMap<PageId, WebsiteId>,
    page_views: DashMap<RecordId, PageView>,
}

impl MemoryStore {
    /// Create a new, empty in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            tests: DashMap::new(),
            variants: DashMap::new(),
            sessions: DashMap::new(),
            conversions: DashMap::new(),
            pages: DashMap::new(),
            page_views: DashMap::new(),
        }
    }

    /// Number of stored visitor sessions.
    #[must_use]
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Number of stored conversions.
    #[must_use]
    pub fn conversion_count(&self) -> usize {
        self.conversions.len()
    }

    /// Number of stored page views.
    #[must_use]
    pub fn page_view_count(&self) -> usize {
        self.page_views.len()
    }

    /// Check if the store holds no tests and no events.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tests.is_empty()
            && self.sessions.is_empty()
            && self.conversions.is_empty()
            && self.page_views.is_empty()
    }

    // One sequence for every table keeps ids globally ordered by creation.
    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SplitTestStore for MemoryStore {
    async fn insert_test(&self, test: NewSplitTest) -> Result<SplitTest> {
        let record = test.into_record(TestId(self.next_id()));
        self.tests.insert(record.id(), record.clone());
        Ok(record)
    }

    async fn get_test(&self, test_id: TestId) -> Result<Option<SplitTest>> {
        Ok(self.tests.get(&test_id).map(|t| t.value().clone()))
    }

    async fn active_test_for_page(
        &self,
        page_id: PageId,
        test_type: Option<TestType>,
    ) -> Result<Option<SplitTest>> {
        Ok(self
            .tests
            .iter()
            .filter(|t| {
                t.page_id() == page_id
                    && t.is_active()
                    && test_type.map_or(true, |ty| t.test_type() == ty)
            })
            .min_by_key(|t| t.id())
            .map(|t| t.value().clone()))
    }

    async fn update_test(&self, test: &SplitTest) -> Result<()> {
        match self.tests.get_mut(&test.id()) {
            Some(mut stored) => {
                *stored = test.clone();
                Ok(())
            }
            None => Err(Error::not_found("split test", test.id())),
        }
    }

    async fn delete_test(&self, test_id: TestId) -> Result<bool> {
        let existed = self.tests.remove(&test_id).is_some();
        self.variants.retain(|_, v| v.test_id() != test_id);
        self.sessions.retain(|(t, _), _| *t != test_id);
        self.conversions.retain(|(t, _), _| *t != test_id);
        Ok(existed)
    }

    async fn insert_variant(&self, variant: NewVariant) -> Result<Variant> {
        if !self.tests.contains_key(&variant.test_id) {
            return Err(Error::not_found("split test", variant.test_id));
        }
        let record = variant.into_record(VariantId(self.next_id()));
        self.variants.insert(record.id(), record.clone());
        Ok(record)
    }

    async fn get_variant(&self, variant_id: VariantId) -> Result<Option<Variant>> {
        Ok(self.variants.get(&variant_id).map(|v| v.value().clone()))
    }

    async fn variants_for_test(&self, test_id: TestId) -> Result<Vec<Variant>> {
        let mut variants: Vec<Variant> = self
            .variants
            .iter()
            .filter(|v| v.test_id() == test_id)
            .map(|v| v.value().clone())
            .collect();
        variants.sort_by_key(Variant::id);
        Ok(variants)
    }

    async fn find_session(
        &self,
        test_id: TestId,
        visitor_id: &VisitorId,
    ) -> Result<Option<VisitorSession>> {
        Ok(self
            .sessions
            .get(&(test_id, visitor_id.clone()))
            .map(|s| s.value().clone()))
    }

    async fn insert_session(&self, session: NewVisitorSession) -> Result<Inserted<VisitorSession>> {
        let key = (session.split_test_id, session.visitor_id.clone());
        Ok(match self.sessions.entry(key) {
            Entry::Occupied(existing) => Inserted::Existing(existing.get().clone()),
            Entry::Vacant(slot) => {
                let record = session.into_record(RecordId(self.next_id()));
                slot.insert(record.clone());
                Inserted::Created(record)
            }
        })
    }

    async fn count_sessions(&self, test_id: TestId, variant_id: VariantId) -> Result<u64> {
        Ok(self
            .sessions
            .iter()
            .filter(|s| s.split_test_id() == test_id && s.variant_id() == variant_id)
            .count() as u64)
    }

    async fn find_conversion(
        &self,
        test_id: TestId,
        visitor_id: &VisitorId,
    ) -> Result<Option<Conversion>> {
        Ok(self
            .conversions
            .get(&(test_id, visitor_id.clone()))
            .map(|c| c.value().clone()))
    }

    async fn insert_conversion(&self, conversion: NewConversion) -> Result<Inserted<Conversion>> {
        let key = (conversion.split_test_id, conversion.visitor_id.clone());
        Ok(match self.conversions.entry(key) {
            Entry::Occupied(existing) => Inserted::Existing(existing.get().clone()),
            Entry::Vacant(slot) => {
                let record = conversion.into_record(RecordId(self.next_id()));
                slot.insert(record.clone());
                Inserted::Created(record)
            }
        })
    }

    async fn count_conversions(&self, test_id: TestId, variant_id: VariantId) -> Result<u64> {
        Ok(self
            .conversions
            .iter()
            .filter(|c| c.split_test_id() == test_id && c.variant_id() == variant_id)
            .count() as u64)
    }

    async fn register_page(&self, website_id: WebsiteId, page_id: PageId) -> Result<()> {
        self.pages.insert(page_id, website_id);
        Ok(())
    }

    async fn pages_for_website(&self, website_id: WebsiteId) -> Result<Vec<PageId>> {
        let mut pages: Vec<PageId> = self
            .pages
            .iter()
            .filter(|p| *p.value() == website_id)
            .map(|p| *p.key())
            .collect();
        pages.sort_unstable();
        Ok(pages)
    }

    async fn insert_page_view(&self, view: NewPageView) -> Result<PageView> {
        let record = view.into_record(RecordId(self.next_id()));
        self.page_views.insert(record.id(), record.clone());
        Ok(record)
    }

    async fn page_views_since(
        &self,
        page_ids: &[PageId],
        since: DateTime<Utc>,
    ) -> Result<Vec<PageView>> {
        let mut views: Vec<PageView> = self
            .page_views
            .iter()
            .filter(|v| page_ids.contains(&v.page_id()) && v.created_at() >= since)
            .map(|v| v.value().clone())
            .collect();
        views.sort_by_key(|v| (v.created_at(), v.id()));
        Ok(views)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::experiment::ContentVersionId;
    use std::sync::Arc;

    async fn seeded() -> (MemoryStore, SplitTest, Variant, Variant) {
        let store = MemoryStore::new();
        let test = store
            .insert_test(SplitTest::builder(PageId(1), "Hero", TestType::Content).build())
            .await
            .unwrap();
        let a = store
            .insert_variant(Variant::builder(test.id(), "A", ContentVersionId(1)).build())
            .await
            .unwrap();
        let b = store
            .insert_variant(Variant::builder(test.id(), "B", ContentVersionId(2)).build())
            .await
            .unwrap();
        (store, test, a, b)
    }

    #[tokio::test]
    async fn test_variants_in_creation_order() {
        let (store, test, a, b) = seeded().await;
        let ids: Vec<_> = store
            .variants_for_test(test.id())
            .await
            .unwrap()
            .iter()
            .map(Variant::id)
            .collect();
        assert_eq!(ids, vec![a.id(), b.id()]);
    }

    #[tokio::test]
    async fn test_insert_variant_unknown_test() {
        let store = MemoryStore::new();
        let err = store
            .insert_variant(Variant::builder(TestId(99), "A", ContentVersionId(1)).build())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_conversion_unique_per_visitor() {
        let (store, test, a, b) = seeded().await;
        let visitor = VisitorId::new("v");
        let first = store
            .insert_conversion(Conversion::new(test.id(), a.id(), visitor.clone()))
            .await
            .unwrap();
        let second = store
            .insert_conversion(Conversion::new(test.id(), b.id(), visitor))
            .await
            .unwrap();
        assert!(first.is_created());
        assert!(!second.is_created());
        assert_eq!(store.conversion_count(), 1);
        assert_eq!(store.count_conversions(test.id(), a.id()).await.unwrap(), 1);
        assert_eq!(store.count_conversions(test.id(), b.id()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_delete_cascades() {
        let (store, test, a, _) = seeded().await;
        store
            .insert_session(VisitorSession::new(test.id(), a.id(), VisitorId::new("v")))
            .await
            .unwrap();
        store
            .insert_conversion(Conversion::new(test.id(), a.id(), VisitorId::new("v")))
            .await
            .unwrap();

        assert!(store.delete_test(test.id()).await.unwrap());
        assert!(store.get_test(test.id()).await.unwrap().is_none());
        assert!(store.variants_for_test(test.id()).await.unwrap().is_empty());
        assert_eq!(store.session_count(), 0);
        assert_eq!(store.conversion_count(), 0);
        assert!(!store.delete_test(test.id()).await.unwrap());
    }

    #[tokio::test]
    async fn test_active_test_filters_by_type() {
        let store = MemoryStore::new();
        let design = store
            .insert_test(SplitTest::builder(PageId(1), "Layout", TestType::Design).build())
            .await
            .unwrap();
        store
            .insert_test(
                SplitTest::builder(PageId(1), "Old", TestType::Content)
                    .inactive()
                    .build(),
            )
            .await
            .unwrap();

        let found = store
            .active_test_for_page(PageId(1), Some(TestType::Design))
            .await
            .unwrap();
        assert_eq!(found.map(|t| t.id()), Some(design.id()));
        assert!(store
            .active_test_for_page(PageId(1), Some(TestType::Content))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_concurrent_first_visits_create_one_session() {
        let (store, test, a, b) = seeded().await;
        let store = Arc::new(store);
        let mut handles = vec![];

        for i in 0..50 {
            let store = Arc::clone(&store);
            let variant = if i % 2 == 0 { a.id() } else { b.id() };
            let test_id = test.id();
            handles.push(tokio::spawn(async move {
                store
                    .insert_session(VisitorSession::new(test_id, variant, VisitorId::new("same")))
                    .await
                    .unwrap()
                    .is_created()
            }));
        }

        let mut created = 0;
        for handle in handles {
            if handle.await.unwrap() {
                created += 1;
            }
        }
        assert_eq!(created, 1);
        assert_eq!(store.session_count(), 1);
    }

    #[test]
    fn test_memory_store_default() {
        let store = MemoryStore::default();
        assert!(store.is_empty());
    }
}
