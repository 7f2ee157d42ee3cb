//! Storage capability for split tests, assignments, conversions and page views
//!
//! Engines depend on the [`SplitTestStore`] trait rather than a concrete
//! database handle. Two backends ship with the crate:
//! - [`MemoryStore`]: `DashMap`-backed, data is lost on process restart
//! - [`SqliteStore`]: durable, file-backed (or `:memory:`) SQLite
//!
//! Both enforce one visitor session and one conversion per
//! `(split_test_id, visitor_id)`. A second insert for the same pair is not an
//! error: it reports [`Inserted::Existing`] carrying the row that won.
//!
//! # Example
//!
//! ```rust
//! use splitpage::experiment::{PageId, SplitTest, TestType};
//! use splitpage::store::{MemoryStore, SplitTestStore};
//!
//! # async fn example() -> splitpage::Result<()> {
//! let store = MemoryStore::new();
//! let test = store
//!     .insert_test(SplitTest::builder(PageId(1), "Hero", TestType::Content).build())
//!     .await?;
//! let active = store.active_test_for_page(PageId(1), None).await?;
//! assert_eq!(active.map(|t| t.id()), Some(test.id()));
//! # Ok(())
//! # }
//! ```

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use crate::experiment::{
    Conversion, NewConversion, NewPageView, NewSplitTest, NewVariant, NewVisitorSession, PageId,
    PageView, SplitTest, TestId, TestType, Variant, VariantId, VisitorId, VisitorSession,
    WebsiteId,
};
use crate::Result;
use chrono::{DateTime, Utc};
use std::future::Future;

/// Outcome of an insert guarded by a uniqueness constraint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inserted<T> {
    /// The row was written.
    Created(T),
    /// A row for the same key already existed; it is returned unchanged.
    Existing(T),
}

impl<T> Inserted<T> {
    /// True when this call wrote the row.
    #[must_use]
    pub const fn is_created(&self) -> bool {
        matches!(self, Self::Created(_))
    }

    /// The stored row, whichever call wrote it.
    pub fn into_inner(self) -> T {
        match self {
            Self::Created(row) | Self::Existing(row) => row,
        }
    }
}

/// Repository interface used by the assignment, conversion, statistics and
/// page-view components.
///
/// Listing methods return rows in creation order (ascending id), which is
/// what makes "first variant = control" a stable rule.
pub trait SplitTestStore: Send + Sync {
    /// Persist a new test and return it with its assigned id.
    fn insert_test(&self, test: NewSplitTest) -> impl Future<Output = Result<SplitTest>> + Send;

    /// Get a test by id.
    fn get_test(&self, test_id: TestId) -> impl Future<Output = Result<Option<SplitTest>>> + Send;

    /// The active test for a page, optionally restricted to one type.
    ///
    /// When several match, the earliest created wins.
    fn active_test_for_page(
        &self,
        page_id: PageId,
        test_type: Option<TestType>,
    ) -> impl Future<Output = Result<Option<SplitTest>>> + Send;

    /// Overwrite a test's mutable fields (active flag, start/end dates).
    ///
    /// Returns `Error::NotFound` when the test does not exist.
    fn update_test(&self, test: &SplitTest) -> impl Future<Output = Result<()>> + Send;

    /// Delete a test together with its variants, sessions and conversions.
    ///
    /// Returns whether the test existed.
    fn delete_test(&self, test_id: TestId) -> impl Future<Output = Result<bool>> + Send;

    /// Persist a new variant. Returns `Error::NotFound` for an unknown test.
    fn insert_variant(&self, variant: NewVariant) -> impl Future<Output = Result<Variant>> + Send;

    /// Get a variant by id.
    fn get_variant(
        &self,
        variant_id: VariantId,
    ) -> impl Future<Output = Result<Option<Variant>>> + Send;

    /// All variants of a test in creation order.
    fn variants_for_test(&self, test_id: TestId) -> impl Future<Output = Result<Vec<Variant>>> + Send;

    /// The sticky assignment of a visitor in a test, if any.
    fn find_session(
        &self,
        test_id: TestId,
        visitor_id: &VisitorId,
    ) -> impl Future<Output = Result<Option<VisitorSession>>> + Send;

    /// Persist a session unless one already exists for `(test, visitor)`.
    fn insert_session(
        &self,
        session: NewVisitorSession,
    ) -> impl Future<Output = Result<Inserted<VisitorSession>>> + Send;

    /// Number of visitors assigned to a variant.
    fn count_sessions(
        &self,
        test_id: TestId,
        variant_id: VariantId,
    ) -> impl Future<Output = Result<u64>> + Send;

    /// The conversion of a visitor in a test, if any.
    fn find_conversion(
        &self,
        test_id: TestId,
        visitor_id: &VisitorId,
    ) -> impl Future<Output = Result<Option<Conversion>>> + Send;

    /// Persist a conversion unless one already exists for `(test, visitor)`.
    fn insert_conversion(
        &self,
        conversion: NewConversion,
    ) -> impl Future<Output = Result<Inserted<Conversion>>> + Send;

    /// Number of conversions credited to a variant.
    fn count_conversions(
        &self,
        test_id: TestId,
        variant_id: VariantId,
    ) -> impl Future<Output = Result<u64>> + Send;

    /// Record that a page belongs to a website. Re-registering moves it.
    fn register_page(
        &self,
        website_id: WebsiteId,
        page_id: PageId,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Pages of a website in ascending id order.
    fn pages_for_website(
        &self,
        website_id: WebsiteId,
    ) -> impl Future<Output = Result<Vec<PageId>>> + Send;

    /// Append a page view.
    fn insert_page_view(&self, view: NewPageView) -> impl Future<Output = Result<PageView>> + Send;

    /// Views of the given pages created at or after `since`, oldest first.
    fn page_views_since(
        &self,
        page_ids: &[PageId],
        since: DateTime<Utc>,
    ) -> impl Future<Output = Result<Vec<PageView>>> + Send;
}
