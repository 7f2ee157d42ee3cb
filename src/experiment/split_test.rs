//! Split Test - root entity of an experiment bound to one page

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::{PageId, TestId};
use crate::Error;

/// What a split test varies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestType {
    /// Variants differ in page text.
    Content,
    /// Variants differ in page design.
    Design,
}

impl TestType {
    /// Wire/storage name of the type.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Content => "content",
            Self::Design => "design",
        }
    }
}

impl fmt::Display for TestType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TestType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "content" => Ok(Self::Content),
            "design" => Ok(Self::Design),
            other => Err(Error::InvalidInput(format!("Invalid test type: {other}"))),
        }
    }
}

/// Split Test represents an A/B experiment on a single page.
///
/// A test owns its variants; deleting it removes them together with their
/// visitor sessions and conversions. The "one active test per page and type"
/// rule belongs to the creation workflow, which checks
/// [`crate::store::SplitTestStore::active_test_for_page`] first.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SplitTest {
    pub(crate) id: TestId,
    pub(crate) page_id: PageId,
    pub(crate) name: String,
    pub(crate) test_type: TestType,
    pub(crate) goal_page_id: Option<PageId>,
    pub(crate) is_active: bool,
    pub(crate) start_date: DateTime<Utc>,
    pub(crate) end_date: Option<DateTime<Utc>>,
    pub(crate) created_at: DateTime<Utc>,
}

impl SplitTest {
    /// Create a builder for a test that has not been stored yet.
    #[must_use]
    pub fn builder(page_id: PageId, name: impl Into<String>, test_type: TestType) -> SplitTestBuilder {
        SplitTestBuilder::new(page_id, name, test_type)
    }

    /// Get the test ID.
    #[must_use]
    pub const fn id(&self) -> TestId {
        self.id
    }

    /// Get the page under test.
    #[must_use]
    pub const fn page_id(&self) -> PageId {
        self.page_id
    }

    /// Get the test name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the test type.
    #[must_use]
    pub const fn test_type(&self) -> TestType {
        self.test_type
    }

    /// Get the conversion goal page, if any.
    #[must_use]
    pub const fn goal_page_id(&self) -> Option<PageId> {
        self.goal_page_id
    }

    /// Whether the test is currently serving variants.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.is_active
    }

    /// Get the (last) start timestamp.
    #[must_use]
    pub const fn start_date(&self) -> DateTime<Utc> {
        self.start_date
    }

    /// Get the end timestamp, if the test has been stopped.
    #[must_use]
    pub const fn end_date(&self) -> Option<DateTime<Utc>> {
        self.end_date
    }

    /// Get the creation timestamp.
    #[must_use]
    pub const fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Mark the test active from `at`, clearing any previous end date.
    pub fn start(&mut self, at: DateTime<Utc>) {
        self.is_active = true;
        self.start_date = at;
        self.end_date = None;
    }

    /// Mark the test inactive as of `at`.
    pub fn stop(&mut self, at: DateTime<Utc>) {
        self.is_active = false;
        self.end_date = Some(at);
    }
}

/// An unsaved split test; stores assign the id on insert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewSplitTest {
    /// Page under test
    pub page_id: PageId,
    /// Human-readable name
    pub name: String,
    /// Content or design test
    pub test_type: TestType,
    /// Conversion goal page
    pub goal_page_id: Option<PageId>,
    /// Initial active flag
    pub is_active: bool,
    /// Creation (and initial start) timestamp
    pub created_at: DateTime<Utc>,
}

impl NewSplitTest {
    /// Attach the store-assigned id.
    #[must_use]
    pub fn into_record(self, id: TestId) -> SplitTest {
        SplitTest {
            id,
            page_id: self.page_id,
            name: self.name,
            test_type: self.test_type,
            goal_page_id: self.goal_page_id,
            is_active: self.is_active,
            start_date: self.created_at,
            end_date: None,
            created_at: self.created_at,
        }
    }
}

/// Builder for `NewSplitTest`.
#[derive(Debug)]
pub struct SplitTestBuilder {
    inner: NewSplitTest,
}

impl SplitTestBuilder {
    /// Create a new builder with required fields. Tests start out active.
    #[must_use]
    pub fn new(page_id: PageId, name: impl Into<String>, test_type: TestType) -> Self {
        Self {
            inner: NewSplitTest {
                page_id,
                name: name.into(),
                test_type,
                goal_page_id: None,
                is_active: true,
                created_at: Utc::now(),
            },
        }
    }

    /// Set the conversion goal page.
    #[must_use]
    pub const fn goal_page(mut self, goal_page_id: PageId) -> Self {
        self.inner.goal_page_id = Some(goal_page_id);
        self
    }

    /// Create the test in the inactive state.
    #[must_use]
    pub const fn inactive(mut self) -> Self {
        self.inner.is_active = false;
        self
    }

    /// Set a custom creation timestamp (useful for testing).
    #[must_use]
    pub const fn created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.inner.created_at = created_at;
        self
    }

    /// Build the `NewSplitTest`.
    #[must_use]
    pub fn build(self) -> NewSplitTest {
        self.inner
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_test_type_parse() {
        assert_eq!("content".parse::<TestType>().unwrap(), TestType::Content);
        assert_eq!("design".parse::<TestType>().unwrap(), TestType::Design);
        assert!("layout".parse::<TestType>().is_err());
    }

    #[test]
    fn test_split_test_lifecycle() {
        let mut test = SplitTest::builder(PageId(1), "Headline", TestType::Content)
            .goal_page(PageId(2))
            .build()
            .into_record(TestId(9));
        assert!(test.is_active());
        assert_eq!(test.goal_page_id(), Some(PageId(2)));

        let stop_at = Utc::now();
        test.stop(stop_at);
        assert!(!test.is_active());
        assert_eq!(test.end_date(), Some(stop_at));

        test.start(Utc::now());
        assert!(test.is_active());
        assert!(test.end_date().is_none());
    }
}
