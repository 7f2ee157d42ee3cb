//! Visitor-facing event records: sessions, conversions and page views
//!
//! All three are written once and never updated.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{PageId, RecordId, TestId, VariantId, VisitorId};

/// Sticky binding of a visitor to one variant of a test.
///
/// At most one exists per `(split_test_id, visitor_id)`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VisitorSession {
    pub(crate) id: RecordId,
    pub(crate) split_test_id: TestId,
    pub(crate) variant_id: VariantId,
    pub(crate) visitor_id: VisitorId,
    pub(crate) created_at: DateTime<Utc>,
}

impl VisitorSession {
    /// Create an unsaved session stamped with the current time.
    #[must_use]
    pub fn new(split_test_id: TestId, variant_id: VariantId, visitor_id: VisitorId) -> NewVisitorSession {
        NewVisitorSession {
            split_test_id,
            variant_id,
            visitor_id,
            created_at: Utc::now(),
        }
    }

    /// Get the row ID.
    #[must_use]
    pub const fn id(&self) -> RecordId {
        self.id
    }

    /// Get the test ID.
    #[must_use]
    pub const fn split_test_id(&self) -> TestId {
        self.split_test_id
    }

    /// Get the assigned variant.
    #[must_use]
    pub const fn variant_id(&self) -> VariantId {
        self.variant_id
    }

    /// Get the visitor.
    #[must_use]
    pub const fn visitor_id(&self) -> &VisitorId {
        &self.visitor_id
    }

    /// Get the assignment timestamp.
    #[must_use]
    pub const fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

/// An unsaved visitor session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewVisitorSession {
    /// Test the visitor was assigned in
    pub split_test_id: TestId,
    /// Chosen variant
    pub variant_id: VariantId,
    /// Visitor
    pub visitor_id: VisitorId,
    /// Assignment timestamp
    pub created_at: DateTime<Utc>,
}

impl NewVisitorSession {
    /// Attach the store-assigned id.
    #[must_use]
    pub fn into_record(self, id: RecordId) -> VisitorSession {
        VisitorSession {
            id,
            split_test_id: self.split_test_id,
            variant_id: self.variant_id,
            visitor_id: self.visitor_id,
            created_at: self.created_at,
        }
    }
}

/// A goal completion by a visitor within a test.
///
/// At most one exists per `(split_test_id, visitor_id)`, whatever the variant.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Conversion {
    pub(crate) id: RecordId,
    pub(crate) split_test_id: TestId,
    pub(crate) variant_id: VariantId,
    pub(crate) visitor_id: VisitorId,
    pub(crate) created_at: DateTime<Utc>,
}

impl Conversion {
    /// Create an unsaved conversion stamped with the current time.
    #[must_use]
    pub fn new(split_test_id: TestId, variant_id: VariantId, visitor_id: VisitorId) -> NewConversion {
        NewConversion {
            split_test_id,
            variant_id,
            visitor_id,
            created_at: Utc::now(),
        }
    }

    /// Get the row ID.
    #[must_use]
    pub const fn id(&self) -> RecordId {
        self.id
    }

    /// Get the test ID.
    #[must_use]
    pub const fn split_test_id(&self) -> TestId {
        self.split_test_id
    }

    /// Get the credited variant.
    #[must_use]
    pub const fn variant_id(&self) -> VariantId {
        self.variant_id
    }

    /// Get the visitor.
    #[must_use]
    pub const fn visitor_id(&self) -> &VisitorId {
        &self.visitor_id
    }

    /// Get the conversion timestamp.
    #[must_use]
    pub const fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

/// An unsaved conversion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewConversion {
    /// Test the goal belongs to
    pub split_test_id: TestId,
    /// Variant credited with the conversion
    pub variant_id: VariantId,
    /// Visitor
    pub visitor_id: VisitorId,
    /// Conversion timestamp
    pub created_at: DateTime<Utc>,
}

impl NewConversion {
    /// Attach the store-assigned id.
    #[must_use]
    pub fn into_record(self, id: RecordId) -> Conversion {
        Conversion {
            id,
            split_test_id: self.split_test_id,
            variant_id: self.variant_id,
            visitor_id: self.visitor_id,
            created_at: self.created_at,
        }
    }
}

/// A single page load.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PageView {
    pub(crate) id: RecordId,
    pub(crate) page_id: PageId,
    pub(crate) visitor_id: VisitorId,
    pub(crate) user_agent: Option<String>,
    pub(crate) ip_address: Option<String>,
    pub(crate) referrer: Option<String>,
    pub(crate) created_at: DateTime<Utc>,
}

impl PageView {
    /// Create a builder for an unsaved page view.
    #[must_use]
    pub fn builder(page_id: PageId, visitor_id: VisitorId) -> PageViewBuilder {
        PageViewBuilder::new(page_id, visitor_id)
    }

    /// Get the row ID.
    #[must_use]
    pub const fn id(&self) -> RecordId {
        self.id
    }

    /// Get the viewed page.
    #[must_use]
    pub const fn page_id(&self) -> PageId {
        self.page_id
    }

    /// Get the visitor.
    #[must_use]
    pub const fn visitor_id(&self) -> &VisitorId {
        &self.visitor_id
    }

    /// Get the browser user agent, if sent.
    #[must_use]
    pub fn user_agent(&self) -> Option<&str> {
        self.user_agent.as_deref()
    }

    /// Get the anonymized IP address, if known.
    #[must_use]
    pub fn ip_address(&self) -> Option<&str> {
        self.ip_address.as_deref()
    }

    /// Get the referrer URL, if sent.
    #[must_use]
    pub fn referrer(&self) -> Option<&str> {
        self.referrer.as_deref()
    }

    /// Get the view timestamp.
    #[must_use]
    pub const fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

/// An unsaved page view. `ip_address` must already be anonymized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPageView {
    /// Viewed page
    pub page_id: PageId,
    /// Visitor
    pub visitor_id: VisitorId,
    /// Browser user agent
    pub user_agent: Option<String>,
    /// Anonymized IP address
    pub ip_address: Option<String>,
    /// Referrer URL
    pub referrer: Option<String>,
    /// View timestamp
    pub created_at: DateTime<Utc>,
}

impl NewPageView {
    /// Attach the store-assigned id.
    #[must_use]
    pub fn into_record(self, id: RecordId) -> PageView {
        PageView {
            id,
            page_id: self.page_id,
            visitor_id: self.visitor_id,
            user_agent: self.user_agent,
            ip_address: self.ip_address,
            referrer: self.referrer,
            created_at: self.created_at,
        }
    }
}

/// Builder for `NewPageView`.
#[derive(Debug)]
pub struct PageViewBuilder {
    inner: NewPageView,
}

impl PageViewBuilder {
    /// Create a new builder with required fields.
    #[must_use]
    pub fn new(page_id: PageId, visitor_id: VisitorId) -> Self {
        Self {
            inner: NewPageView {
                page_id,
                visitor_id,
                user_agent: None,
                ip_address: None,
                referrer: None,
                created_at: Utc::now(),
            },
        }
    }

    /// Set the user agent.
    #[must_use]
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.inner.user_agent = Some(user_agent.into());
        self
    }

    /// Set the (already anonymized) IP address.
    #[must_use]
    pub fn ip_address(mut self, ip_address: impl Into<String>) -> Self {
        self.inner.ip_address = Some(ip_address.into());
        self
    }

    /// Set the referrer.
    #[must_use]
    pub fn referrer(mut self, referrer: impl Into<String>) -> Self {
        self.inner.referrer = Some(referrer.into());
        self
    }

    /// Set a custom timestamp.
    #[must_use]
    pub const fn created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.inner.created_at = created_at;
        self
    }

    /// Build the `NewPageView`.
    #[must_use]
    pub fn build(self) -> NewPageView {
        self.inner
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_view_builder() {
        let view = PageView::builder(PageId(3), VisitorId::new("v-1"))
            .user_agent("curl/8")
            .referrer("https://example.com/")
            .build()
            .into_record(RecordId(1));
        assert_eq!(view.page_id(), PageId(3));
        assert_eq!(view.user_agent(), Some("curl/8"));
        assert!(view.ip_address().is_none());
    }

    #[test]
    fn test_session_into_record() {
        let session = VisitorSession::new(TestId(1), VariantId(2), VisitorId::new("v"))
            .into_record(RecordId(5));
        assert_eq!(session.variant_id(), VariantId(2));
        assert_eq!(session.visitor_id().as_str(), "v");
    }
}
