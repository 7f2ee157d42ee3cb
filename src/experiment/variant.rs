//! Variant - one arm of a split test

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{ContentVersionId, TestId, VariantId};

/// Variant represents one arm of a split test.
///
/// The `weight` controls its share of traffic: a variant is picked with
/// probability `weight / sum(weights)`. Weights are expected to be ≥ 1.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Variant {
    pub(crate) id: VariantId,
    pub(crate) test_id: TestId,
    pub(crate) name: String,
    pub(crate) content_version_id: ContentVersionId,
    pub(crate) weight: u32,
    pub(crate) created_at: DateTime<Utc>,
}

impl Variant {
    /// Create a builder for a variant that has not been stored yet.
    #[must_use]
    pub fn builder(
        test_id: TestId,
        name: impl Into<String>,
        content_version_id: ContentVersionId,
    ) -> VariantBuilder {
        VariantBuilder::new(test_id, name, content_version_id)
    }

    /// Get the variant ID.
    #[must_use]
    pub const fn id(&self) -> VariantId {
        self.id
    }

    /// Get the owning test ID.
    #[must_use]
    pub const fn test_id(&self) -> TestId {
        self.test_id
    }

    /// Get the variant name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the content version served for this variant.
    #[must_use]
    pub const fn content_version_id(&self) -> ContentVersionId {
        self.content_version_id
    }

    /// Get the traffic weight.
    #[must_use]
    pub const fn weight(&self) -> u32 {
        self.weight
    }

    /// Get the creation timestamp.
    #[must_use]
    pub const fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

/// An unsaved variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewVariant {
    /// Owning test
    pub test_id: TestId,
    /// Human-readable name
    pub name: String,
    /// Content snapshot served to visitors
    pub content_version_id: ContentVersionId,
    /// Traffic weight
    pub weight: u32,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
}

impl NewVariant {
    /// Attach the store-assigned id.
    #[must_use]
    pub fn into_record(self, id: VariantId) -> Variant {
        Variant {
            id,
            test_id: self.test_id,
            name: self.name,
            content_version_id: self.content_version_id,
            weight: self.weight,
            created_at: self.created_at,
        }
    }
}

/// Builder for `NewVariant`.
#[derive(Debug)]
pub struct VariantBuilder {
    inner: NewVariant,
}

impl VariantBuilder {
    /// Create a new builder with required fields and weight 1.
    #[must_use]
    pub fn new(test_id: TestId, name: impl Into<String>, content_version_id: ContentVersionId) -> Self {
        Self {
            inner: NewVariant {
                test_id,
                name: name.into(),
                content_version_id,
                weight: 1,
                created_at: Utc::now(),
            },
        }
    }

    /// Set the traffic weight.
    #[must_use]
    pub const fn weight(mut self, weight: u32) -> Self {
        self.inner.weight = weight;
        self
    }

    /// Set a custom creation timestamp.
    #[must_use]
    pub const fn created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.inner.created_at = created_at;
        self
    }

    /// Build the `NewVariant`.
    #[must_use]
    pub fn build(self) -> NewVariant {
        self.inner
    }
}
