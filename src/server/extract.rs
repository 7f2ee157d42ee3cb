use async_trait::async_trait;
use axum::extract::{FromRef, FromRequestParts};
use axum::http::request::Parts;
use axum::response::{IntoResponseParts, ResponseParts};
use std::convert::Infallible;
use std::sync::Arc;

use crate::experiment::VisitorId;
use crate::visitor::{CookiePolicy, ResolvedVisitor};

/// The request's visitor.
///
/// Resolution is cached in the request extensions, so extracting twice
/// yields the same id. Returning the extractor as a response part sets
/// the visitor cookie when the id was minted for this request.
#[derive(Debug, Clone)]
pub struct Visitor {
    resolved: ResolvedVisitor,
    policy: Arc<CookiePolicy>,
}

impl Visitor {
    /// The visitor id.
    #[must_use]
    pub const fn id(&self) -> &VisitorId {
        self.resolved.visitor_id()
    }

    /// Whether the id was minted for this request.
    #[must_use]
    pub const fn is_new(&self) -> bool {
        self.resolved.is_minted()
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for Visitor
where
    Arc<CookiePolicy>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let policy = Arc::<CookiePolicy>::from_ref(state);
        let resolved = if let Some(cached) = parts.extensions.get::<ResolvedVisitor>() {
            cached.clone()
        } else {
            let resolved = ResolvedVisitor::resolve(&parts.headers, &policy);
            parts.extensions.insert(resolved.clone());
            resolved
        };
        Ok(Self { resolved, policy })
    }
}

impl IntoResponseParts for Visitor {
    type Error = Infallible;

    fn into_response_parts(self, mut res: ResponseParts) -> Result<ResponseParts, Self::Error> {
        self.resolved.apply(&self.policy, res.headers_mut());
        Ok(res)
    }
}
