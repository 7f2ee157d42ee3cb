//! Split-test records
//!
//! ## Schema Overview
//!
//! ```text
//! SplitTest (1) ──< Variant (N)
//!     │                 │
//!     ├──< VisitorSession (N)  [unique per (test, visitor)]
//!     └──< Conversion (N)      [unique per (test, visitor)]
//!
//! Page (external) ──< PageView (N) [append-only]
//! ```
//!
//! Stored records carry an id assigned by the store; the `New*` types are
//! their unsaved drafts.
//!
//! ## Usage
//!
//! ```rust
//! use splitpage::experiment::{ContentVersionId, PageId, SplitTest, TestId, TestType, Variant};
//!
//! let draft = SplitTest::builder(PageId(1), "Hero copy", TestType::Content)
//!     .goal_page(PageId(2))
//!     .build();
//! let test = draft.into_record(TestId(1));
//!
//! let control = Variant::builder(test.id(), "Control", ContentVersionId(10)).build();
//! let challenger = Variant::builder(test.id(), "Challenger", ContentVersionId(11))
//!     .weight(3)
//!     .build();
//! assert_eq!(challenger.weight, 3);
//! # let _ = control;
//! ```

mod events;
mod ids;
mod split_test;
mod variant;

pub use events::{
    Conversion, NewConversion, NewPageView, NewVisitorSession, PageView, PageViewBuilder,
    VisitorSession,
};
pub use ids::{ContentVersionId, PageId, RecordId, TestId, VariantId, VisitorId, WebsiteId};
pub use split_test::{NewSplitTest, SplitTest, SplitTestBuilder, TestType};
pub use variant::{NewVariant, Variant, VariantBuilder};
