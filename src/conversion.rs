//! At-most-once conversion recording per visitor and test

use std::sync::Arc;
use tracing::{debug, info};

use crate::experiment::{Conversion, TestId, VariantId, VisitorId};
use crate::store::{Inserted, SplitTestStore};
use crate::Result;

/// Records goal completions.
///
/// A visitor converts at most once per test, whichever variant the caller
/// credits. A repeat attempt returns `Ok(None)` ("already converted").
pub struct ConversionRecorder<S> {
    store: Arc<S>,
}

impl<S: SplitTestStore> ConversionRecorder<S> {
    /// Create a recorder over a store.
    #[must_use]
    pub const fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Record a conversion unless the visitor already converted in this test.
    ///
    /// # Errors
    ///
    /// Propagates store failures; nothing is retried.
    pub async fn record_conversion(
        &self,
        test_id: TestId,
        variant_id: VariantId,
        visitor_id: &VisitorId,
    ) -> Result<Option<Conversion>> {
        if self.store.find_conversion(test_id, visitor_id).await?.is_some() {
            debug!(%test_id, %visitor_id, "already converted");
            return Ok(None);
        }

        let conversion = Conversion::new(test_id, variant_id, visitor_id.clone());
        match self.store.insert_conversion(conversion).await? {
            Inserted::Created(conversion) => {
                info!(%test_id, %variant_id, %visitor_id, "recorded conversion");
                Ok(Some(conversion))
            }
            Inserted::Existing(_) => {
                debug!(%test_id, %visitor_id, "conversion raced; already converted");
                Ok(None)
            }
        }
    }
}
