//! Page-view recording and time-bucketed traffic reports
//!
//! Windows are whole UTC calendar days: `days = 3` covers today and the two
//! days before it, zero-filled, in chronological order. Windows longer than
//! [`MAX_REPORT_DAYS`] are rejected.

use chrono::{Duration, NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tracing::debug;

use crate::anonymize::anonymize_ip;
use crate::clock::{Clock, SystemClock};
use crate::experiment::{PageId, PageView, VisitorId, WebsiteId};
use crate::store::SplitTestStore;
use crate::{Error, Result};

/// Longest report window accepted, in days.
pub const MAX_REPORT_DAYS: u32 = 3650;

/// Traffic summary for every page of a website.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct WebsiteStats {
    /// Views in the window
    pub total_views: u64,
    /// Distinct visitor ids in the window
    pub unique_visitors: u64,
    /// Views per page
    pub views_by_page: BTreeMap<PageId, u64>,
    /// Views per `YYYY-MM-DD` day
    pub views_by_date: BTreeMap<String, u64>,
}

/// Traffic summary for a single page.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PageStats {
    /// Page
    pub page_id: PageId,
    /// Views in the window
    pub total_views: u64,
    /// Distinct visitor ids in the window
    pub unique_visitors: u64,
    /// Views per `YYYY-MM-DD` day
    pub views_by_date: BTreeMap<String, u64>,
    /// Views per referrer; views without a referrer are not counted
    pub referrers: BTreeMap<String, u64>,
}

/// Caller-supplied request details for a page view.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ViewContext {
    /// `User-Agent` header
    pub user_agent: Option<String>,
    /// Client address before anonymization
    pub ip_address: Option<String>,
    /// `Referer` header
    pub referrer: Option<String>,
}

/// Records page views and aggregates them into daily buckets.
pub struct PageViewAggregator<S, C = SystemClock> {
    store: Arc<S>,
    clock: C,
}

impl<S: SplitTestStore> PageViewAggregator<S, SystemClock> {
    /// Create an aggregator using the system clock.
    #[must_use]
    pub const fn new(store: Arc<S>) -> Self {
        Self::with_clock(store, SystemClock)
    }
}

impl<S: SplitTestStore, C: Clock> PageViewAggregator<S, C> {
    /// Create an aggregator with an explicit clock.
    pub const fn with_clock(store: Arc<S>, clock: C) -> Self {
        Self { store, clock }
    }

    /// Store a page view with the client address anonymized.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn record_page_view(
        &self,
        page_id: PageId,
        visitor_id: &VisitorId,
        context: ViewContext,
    ) -> Result<PageView> {
        let mut builder =
            PageView::builder(page_id, visitor_id.clone()).created_at(self.clock.now());
        if let Some(ua) = context.user_agent {
            builder = builder.user_agent(ua);
        }
        if let Some(ip) = anonymize_ip(context.ip_address.as_deref()) {
            builder = builder.ip_address(ip);
        }
        if let Some(referrer) = context.referrer {
            builder = builder.referrer(referrer);
        }
        self.store.insert_page_view(builder.build()).await
    }

    /// Daily view counts for one page over the last `days` days.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidInput`] if `days` exceeds [`MAX_REPORT_DAYS`];
    /// otherwise propagates store failures.
    pub async fn views_by_date(
        &self,
        page_id: PageId,
        days: u32,
    ) -> Result<BTreeMap<NaiveDate, u64>> {
        let Some(window) = self.window(days)? else {
            return Ok(BTreeMap::new());
        };
        let views = self.views_in(&[page_id], &window).await?;
        Ok(window.bucket(&views))
    }

    /// Traffic summary for all pages registered to a website.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidInput`] if `days` exceeds [`MAX_REPORT_DAYS`];
    /// otherwise propagates store failures.
    pub async fn website_stats(&self, website_id: WebsiteId, days: u32) -> Result<WebsiteStats> {
        let window = self.window(days)?;
        let pages = self.store.pages_for_website(website_id).await?;
        let Some(window) = window else {
            return Ok(WebsiteStats::default());
        };
        if pages.is_empty() {
            return Ok(WebsiteStats::default());
        }

        let views = self.views_in(&pages, &window).await?;
        let mut views_by_page: BTreeMap<PageId, u64> = pages.iter().map(|p| (*p, 0)).collect();
        for view in &views {
            *views_by_page.entry(view.page_id()).or_default() += 1;
        }
        debug!(%website_id, pages = pages.len(), views = views.len(), "website stats");

        Ok(WebsiteStats {
            total_views: views.len() as u64,
            unique_visitors: unique_visitors(&views),
            views_by_page,
            views_by_date: iso_keys(window.bucket(&views)),
        })
    }

    /// Traffic summary for a single page, including referrers.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidInput`] if `days` exceeds [`MAX_REPORT_DAYS`];
    /// otherwise propagates store failures.
    pub async fn page_stats(&self, page_id: PageId, days: u32) -> Result<PageStats> {
        let Some(window) = self.window(days)? else {
            return Ok(PageStats {
                page_id,
                ..PageStats::default()
            });
        };
        let views = self.views_in(&[page_id], &window).await?;

        let mut referrers = BTreeMap::new();
        for referrer in views.iter().filter_map(PageView::referrer) {
            if !referrer.is_empty() {
                *referrers.entry(referrer.to_string()).or_default() += 1;
            }
        }

        Ok(PageStats {
            page_id,
            total_views: views.len() as u64,
            unique_visitors: unique_visitors(&views),
            views_by_date: iso_keys(window.bucket(&views)),
            referrers,
        })
    }

    fn window(&self, days: u32) -> Result<Option<Window>> {
        if days > MAX_REPORT_DAYS {
            return Err(Error::InvalidInput(format!(
                "days must be at most {MAX_REPORT_DAYS}"
            )));
        }
        if days == 0 {
            return Ok(None);
        }
        let last = self.clock.today();
        let first = last
            .checked_sub_signed(Duration::days(i64::from(days) - 1))
            .ok_or_else(|| Error::InvalidInput(format!("days out of range: {days}")))?;
        Ok(Some(Window { first, last }))
    }

    async fn views_in(&self, pages: &[PageId], window: &Window) -> Result<Vec<PageView>> {
        let since = window.first.and_time(NaiveTime::MIN).and_utc();
        let views = self.store.page_views_since(pages, since).await?;
        Ok(views
            .into_iter()
            .filter(|v| window.contains(v.created_at().date_naive()))
            .collect())
    }
}

struct Window {
    first: NaiveDate,
    last: NaiveDate,
}

impl Window {
    fn contains(&self, day: NaiveDate) -> bool {
        self.first <= day && day <= self.last
    }

    fn bucket(&self, views: &[PageView]) -> BTreeMap<NaiveDate, u64> {
        let mut buckets: BTreeMap<NaiveDate, u64> = self
            .first
            .iter_days()
            .take_while(|d| *d <= self.last)
            .map(|d| (d, 0))
            .collect();
        for view in views {
            if let Some(count) = buckets.get_mut(&view.created_at().date_naive()) {
                *count += 1;
            }
        }
        buckets
    }
}

fn unique_visitors(views: &[PageView]) -> u64 {
    views
        .iter()
        .map(PageView::visitor_id)
        .collect::<HashSet<_>>()
        .len() as u64
}

fn iso_keys(buckets: BTreeMap<NaiveDate, u64>) -> BTreeMap<String, u64> {
    buckets
        .into_iter()
        .map(|(day, count)| (day.format("%Y-%m-%d").to_string(), count))
        .collect()
}
