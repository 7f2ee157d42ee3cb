use axum::extract::rejection::JsonRejection;
use axum::extract::{ConnectInfo, Path, Query, State};
use axum::http::header::{CONTENT_DISPOSITION, CONTENT_TYPE, REFERER, USER_AGENT};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Deserializer};
use serde_json::{json, Value};
use std::net::SocketAddr;

use super::{ApiError, AppState, Visitor};
use crate::experiment::{PageId, TestId, TestType, VariantId, WebsiteId};
use crate::store::SplitTestStore;
use crate::views::ViewContext;
use crate::Error;

type ApiResult<T> = std::result::Result<T, ApiError>;

/// Id sent as a JSON number or a numeric string; anything else reads as absent.
fn lenient_id<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<u64>, D::Error> {
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::Number(n)) => n.as_u64(),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    })
}

fn json_body<T>(body: std::result::Result<Json<T>, JsonRejection>) -> ApiResult<T> {
    body.map(|Json(value)| value)
        .map_err(|rejection| Error::InvalidInput(rejection.body_text()).into())
}

pub async fn healthz() -> &'static str {
    "ok"
}

#[derive(Debug, Deserialize)]
pub struct VariantQuery {
    page_id: Option<String>,
    test_type: Option<String>,
}

pub async fn variant<S: SplitTestStore + 'static>(
    State(state): State<AppState<S>>,
    visitor: Visitor,
    Query(query): Query<VariantQuery>,
) -> ApiResult<(Visitor, Json<Value>)> {
    let page_id = query
        .page_id
        .as_deref()
        .and_then(|p| p.trim().parse::<u64>().ok())
        .map(PageId)
        .ok_or_else(|| Error::InvalidInput("Page ID is required".to_string()))?;
    let test_type = query
        .test_type
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::parse::<TestType>)
        .transpose()?;

    let assignment = state
        .assignment
        .variant_for_visitor(page_id, visitor.id(), test_type)
        .await?;

    let body = match assignment {
        Some(a) => json!({
            "active_test": true,
            "test_id": a.test_id,
            "test_name": a.test_name,
            "test_type": a.test_type,
            "variant_id": a.variant_id,
            "variant_name": a.variant_name,
            "content_version_id": a.content_version_id,
        }),
        None => json!({ "active_test": false }),
    };
    Ok((visitor, Json(body)))
}

#[derive(Debug, Deserialize)]
pub struct ConversionRequest {
    #[serde(default, deserialize_with = "lenient_id")]
    test_id: Option<u64>,
    #[serde(default, deserialize_with = "lenient_id")]
    variant_id: Option<u64>,
}

pub async fn conversion<S: SplitTestStore + 'static>(
    State(state): State<AppState<S>>,
    visitor: Visitor,
    body: std::result::Result<Json<ConversionRequest>, JsonRejection>,
) -> ApiResult<(Visitor, Json<Value>)> {
    let request = json_body(body)?;
    let (Some(test_id), Some(variant_id)) = (request.test_id, request.variant_id) else {
        return Err(Error::InvalidInput("Test ID and variant ID are required".to_string()).into());
    };
    let (test_id, variant_id) = (TestId(test_id), VariantId(variant_id));

    if state.store.get_test(test_id).await?.is_none() {
        return Err(Error::not_found("split test", test_id).into());
    }
    match state.store.get_variant(variant_id).await? {
        Some(v) if v.test_id() == test_id => {}
        _ => return Err(Error::not_found("variant", variant_id).into()),
    }

    let recorded = state
        .conversions
        .record_conversion(test_id, variant_id, visitor.id())
        .await?;
    let body = if recorded.is_some() {
        json!({ "success": true })
    } else {
        json!({ "success": false, "reason": "Already converted" })
    };
    Ok((visitor, Json(body)))
}

#[derive(Debug, Deserialize)]
pub struct PageViewRequest {
    #[serde(default, deserialize_with = "lenient_id")]
    page_id: Option<u64>,
}

pub async fn page_view<S: SplitTestStore + 'static>(
    State(state): State<AppState<S>>,
    visitor: Visitor,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    body: std::result::Result<Json<PageViewRequest>, JsonRejection>,
) -> ApiResult<(Visitor, Json<Value>)> {
    let page_id = json_body(body)?
        .page_id
        .map(PageId)
        .ok_or_else(|| Error::InvalidInput("Page ID is required".to_string()))?;

    let context = ViewContext {
        user_agent: header_string(&headers, USER_AGENT.as_str()),
        ip_address: client_ip(&headers, peer.map(|ConnectInfo(addr)| addr)),
        referrer: header_string(&headers, REFERER.as_str()),
    };
    state
        .views
        .record_page_view(page_id, visitor.id(), context)
        .await?;
    Ok((visitor, Json(json!({ "success": true }))))
}

#[derive(Debug, Deserialize)]
pub struct DaysQuery {
    days: Option<u32>,
}

pub async fn page_views<S: SplitTestStore + 'static>(
    State(state): State<AppState<S>>,
    Path(page_id): Path<u64>,
    Query(query): Query<DaysQuery>,
) -> ApiResult<Json<Value>> {
    let days = query.days.unwrap_or(state.report_days);
    let series = state.views.views_by_date(PageId(page_id), days).await?;
    let views_by_date: serde_json::Map<String, Value> = series
        .into_iter()
        .map(|(day, count)| (day.format("%Y-%m-%d").to_string(), json!(count)))
        .collect();
    Ok(Json(json!({
        "page_id": page_id,
        "days": days,
        "views_by_date": views_by_date,
    })))
}

pub async fn page_stats<S: SplitTestStore + 'static>(
    State(state): State<AppState<S>>,
    Path(page_id): Path<u64>,
    Query(query): Query<DaysQuery>,
) -> ApiResult<impl IntoResponse> {
    let days = query.days.unwrap_or(state.report_days);
    Ok(Json(state.views.page_stats(PageId(page_id), days).await?))
}

pub async fn website_stats<S: SplitTestStore + 'static>(
    State(state): State<AppState<S>>,
    Path(website_id): Path<u64>,
    Query(query): Query<DaysQuery>,
) -> ApiResult<impl IntoResponse> {
    let days = query.days.unwrap_or(state.report_days);
    Ok(Json(
        state.views.website_stats(WebsiteId(website_id), days).await?,
    ))
}

pub async fn test_results<S: SplitTestStore + 'static>(
    State(state): State<AppState<S>>,
    Path(test_id): Path<u64>,
) -> ApiResult<impl IntoResponse> {
    let test_id = TestId(test_id);
    let results = state
        .stats
        .test_results(test_id)
        .await?
        .ok_or_else(|| Error::not_found("split test", test_id))?;
    Ok(Json(results))
}

pub async fn significance<S: SplitTestStore + 'static>(
    State(state): State<AppState<S>>,
    Path(test_id): Path<u64>,
) -> ApiResult<Json<Value>> {
    let test_id = TestId(test_id);
    if let Some(rows) = state.stats.statistical_significance(test_id).await? {
        return Ok(Json(json!({ "test_id": test_id, "results": rows })));
    }
    if state.store.get_test(test_id).await?.is_none() {
        return Err(Error::not_found("split test", test_id).into());
    }
    Ok(Json(json!({
        "test_id": test_id,
        "results": Value::Null,
        "message": "At least two variants are required",
    })))
}

pub async fn export<S: SplitTestStore + 'static>(
    State(state): State<AppState<S>>,
    Path(test_id): Path<u64>,
) -> ApiResult<impl IntoResponse> {
    let test_id = TestId(test_id);
    let csv = state
        .stats
        .export_csv(test_id)
        .await?
        .ok_or_else(|| Error::not_found("split test", test_id))?;
    Ok((
        [
            (CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
            (
                CONTENT_DISPOSITION,
                format!("attachment; filename=\"test_{test_id}_results.csv\""),
            ),
        ],
        csv,
    ))
}

pub async fn start_test<S: SplitTestStore + 'static>(
    State(state): State<AppState<S>>,
    Path(test_id): Path<u64>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.tests.start_test(TestId(test_id)).await?))
}

pub async fn stop_test<S: SplitTestStore + 'static>(
    State(state): State<AppState<S>>,
    Path(test_id): Path<u64>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.tests.stop_test(TestId(test_id)).await?))
}

fn header_string(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// First `X-Forwarded-For` hop, else the socket peer.
fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> Option<String> {
    header_string(headers, "x-forwarded-for")
        .and_then(|v| v.split(',').next().map(|hop| hop.trim().to_string()))
        .filter(|hop| !hop.is_empty())
        .or_else(|| peer.map(|addr| addr.ip().to_string()))
}
