//! # splitpage: split-test assignment, conversion tracking and page analytics
//!
//! splitpage is the experiment core of a page-hosting backend. It assigns
//! visitors to weighted variants of a page, keeps that assignment sticky,
//! records at most one conversion per visitor and test, and reports
//! conversion statistics and daily page traffic.
//!
//! ## Design Principles
//!
//! - **Sticky assignment**: the first draw for `(test, visitor)` is persisted and reused
//! - **Outcomes, not errors**: "already assigned" and "already converted" are `Ok` values
//! - **Injected seams**: store, random source and clock are all swappable for tests
//! - **Privacy**: client IPs are truncated before they are stored
//!
//! ## Example Usage
//!
//! ```rust
//! use std::sync::Arc;
//! use splitpage::assignment::AssignmentEngine;
//! use splitpage::conversion::ConversionRecorder;
//! use splitpage::experiment::{ContentVersionId, PageId, SplitTest, TestType, Variant, VisitorId};
//! use splitpage::stats::StatisticsEngine;
//! use splitpage::store::{MemoryStore, SplitTestStore};
//!
//! # async fn example() -> splitpage::Result<()> {
//! let store = Arc::new(MemoryStore::new());
//! let test = store
//!     .insert_test(SplitTest::builder(PageId(1), "Headline", TestType::Content).build())
//!     .await?;
//! for (name, version) in [("Control", 10), ("Bold", 11)] {
//!     store
//!         .insert_variant(Variant::builder(test.id(), name, ContentVersionId(version)).build())
//!         .await?;
//! }
//!
//! let visitor = VisitorId::generate();
//! let engine = AssignmentEngine::new(Arc::clone(&store));
//! let shown = engine.variant_for_visitor(PageId(1), &visitor, None).await?;
//!
//! if let Some(shown) = shown {
//!     ConversionRecorder::new(Arc::clone(&store))
//!         .record_conversion(shown.test_id, shown.variant_id, &visitor)
//!         .await?;
//! }
//!
//! let report = StatisticsEngine::new(store).test_results(test.id()).await?;
//! assert_eq!(report.map(|r| r.total_conversions), Some(1));
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

pub mod anonymize;
pub mod assignment;
pub mod clock;
pub mod config;
pub mod conversion;
pub mod error;
pub mod experiment;
pub mod lifecycle;
pub mod server;
pub mod stats;
pub mod store;
pub mod views;
pub mod visitor;

pub use error::{Error, Result};
