//! HTTP surface over the assignment, conversion and reporting engines
//!
//! Visitor-facing endpoints:
//! - `GET  /api/test/variant?page_id=&test_type=`
//! - `POST /api/test/conversion`
//! - `POST /api/page_view`
//!
//! Reporting and management:
//! - `GET  /api/page/:page_id/views?days=`
//! - `GET  /api/page/:page_id/stats?days=`
//! - `GET  /api/website/:website_id/stats?days=`
//! - `GET  /api/test/:test_id/results`
//! - `GET  /api/test/:test_id/significance`
//! - `GET  /api/test/:test_id/export`
//! - `POST /api/test/:test_id/start`
//! - `POST /api/test/:test_id/stop`
//!
//! Errors are JSON `{"error": "..."}` with 400/404/500 status codes.

mod error;
mod extract;
mod handlers;

pub use error::ApiError;
pub use extract::Visitor;

use axum::extract::{DefaultBodyLimit, FromRef};
use axum::routing::{get, post};
use axum::Router;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;

use crate::assignment::AssignmentEngine;
use crate::config::ServerConfig;
use crate::conversion::ConversionRecorder;
use crate::lifecycle::TestManager;
use crate::stats::StatisticsEngine;
use crate::store::SplitTestStore;
use crate::views::PageViewAggregator;
use crate::visitor::CookiePolicy;

/// Shared handler state. Cloning is cheap.
pub struct AppState<S> {
    /// Backing store
    pub store: Arc<S>,
    /// Variant assignment
    pub assignment: Arc<AssignmentEngine<S>>,
    /// Conversion recording
    pub conversions: Arc<ConversionRecorder<S>>,
    /// Test reports
    pub stats: Arc<StatisticsEngine<S>>,
    /// Page-view recording and reports
    pub views: Arc<PageViewAggregator<S>>,
    /// Test lifecycle
    pub tests: Arc<TestManager<S>>,
    /// Visitor cookie settings
    pub cookie_policy: Arc<CookiePolicy>,
    /// Window used when `days` is omitted
    pub report_days: u32,
}

impl<S: SplitTestStore> AppState<S> {
    /// Wire every engine to one store.
    pub fn new(store: Arc<S>, config: &ServerConfig) -> Self {
        let assignment = match config.rng_seed {
            Some(seed) => AssignmentEngine::seeded(Arc::clone(&store), seed),
            None => AssignmentEngine::new(Arc::clone(&store)),
        };
        Self {
            assignment: Arc::new(assignment),
            conversions: Arc::new(ConversionRecorder::new(Arc::clone(&store))),
            stats: Arc::new(StatisticsEngine::new(Arc::clone(&store))),
            views: Arc::new(PageViewAggregator::new(Arc::clone(&store))),
            tests: Arc::new(TestManager::new(Arc::clone(&store))),
            cookie_policy: Arc::new(config.cookie_policy()),
            report_days: config.report_days,
            store,
        }
    }
}

impl<S> Clone for AppState<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            assignment: Arc::clone(&self.assignment),
            conversions: Arc::clone(&self.conversions),
            stats: Arc::clone(&self.stats),
            views: Arc::clone(&self.views),
            tests: Arc::clone(&self.tests),
            cookie_policy: Arc::clone(&self.cookie_policy),
            report_days: self.report_days,
        }
    }
}

impl<S> FromRef<AppState<S>> for Arc<CookiePolicy> {
    fn from_ref(state: &AppState<S>) -> Self {
        Arc::clone(&state.cookie_policy)
    }
}

/// Build the application router.
pub fn build_router<S: SplitTestStore + 'static>(state: AppState<S>, max_body_bytes: usize) -> Router {
    Router::new()
        .route("/healthz", get(handlers::healthz))
        .route("/api/test/variant", get(handlers::variant::<S>))
        .route("/api/test/conversion", post(handlers::conversion::<S>))
        .route("/api/page_view", post(handlers::page_view::<S>))
        .route("/api/page/:page_id/views", get(handlers::page_views::<S>))
        .route("/api/page/:page_id/stats", get(handlers::page_stats::<S>))
        .route("/api/website/:website_id/stats", get(handlers::website_stats::<S>))
        .route("/api/test/:test_id/results", get(handlers::test_results::<S>))
        .route("/api/test/:test_id/significance", get(handlers::significance::<S>))
        .route("/api/test/:test_id/export", get(handlers::export::<S>))
        .route("/api/test/:test_id/start", post(handlers::start_test::<S>))
        .route("/api/test/:test_id/stop", post(handlers::stop_test::<S>))
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .with_state(state)
}

/// Serve `router` on `listener` until `shutdown` resolves.
///
/// Handlers see the peer address through `ConnectInfo<SocketAddr>`.
///
/// # Errors
///
/// Returns the listener's IO error.
pub async fn serve(
    listener: TcpListener,
    router: Router,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await
}
