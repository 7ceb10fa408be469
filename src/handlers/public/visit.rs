use axum::{extract::State, http::HeaderMap};
use axum_extra::extract::cookie::{Cookie, CookieJar};
use serde::{Deserialize, Serialize};

use crate::db::{AppState, queries};
use crate::error::{AppError, Result, msg};
use crate::extractors::{Json, Path};
use crate::models::{Funnel, UtmParams, VisitContext};
use crate::tracking::session;
use crate::util::{extract_referrer, extract_request_info};

pub const VISITOR_COOKIE: &str = "fp_visitor";

pub fn session_cookie_name(funnel: &Funnel) -> String {
    format!("fp_session_{}", funnel.id)
}

pub fn affiliate_cookie_name(funnel: &Funnel) -> String {
    format!("fp_aff_{}", funnel.id)
}

#[derive(Debug, Default, Deserialize)]
pub struct VisitRequest {
    #[serde(default)]
    pub step_slug: Option<String>,
    #[serde(default, rename = "ref")]
    pub ref_code: Option<String>,
    #[serde(flatten)]
    pub utm: UtmParams,
}

#[derive(Debug, Serialize)]
pub struct VisitResponse {
    pub session_uuid: String,
    pub visitor_id: String,
    pub is_new: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub affiliate_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step: Option<String>,
    /// False when this session already saw the step today.
    pub pageview_credited: bool,
}

/// Record a visit to a funnel (optionally a specific step).
///
/// Reads and refreshes the session, visitor and affiliate cookies.
pub async fn record_visit(
    State(state): State<AppState>,
    Path(slug): Path<String>,
    jar: CookieJar,
    headers: HeaderMap,
    Json(request): Json<VisitRequest>,
) -> Result<(CookieJar, Json<VisitResponse>)> {
    let mut conn = state.db.get()?;

    let funnel = queries::get_funnel_by_slug(&conn, &slug)?
        .ok_or_else(|| AppError::NotFound(msg::FUNNEL_NOT_FOUND.into()))?;

    let step = match request.step_slug.as_deref().filter(|s| !s.is_empty()) {
        Some(step_slug) => Some(
            queries::get_step_by_slug(&conn, &funnel.id, step_slug)?
                .ok_or_else(|| AppError::NotFound("Step not found".into()))?,
        ),
        None => None,
    };

    let session_cookie = session_cookie_name(&funnel);
    let affiliate_cookie = affiliate_cookie_name(&funnel);
    let (ip_address, user_agent) = extract_request_info(&headers);

    let ctx = VisitContext {
        utm: request.utm,
        referrer: extract_referrer(&headers),
        ip_address,
        user_agent,
        ref_code: request.ref_code,
        affiliate_cookie: jar.get(&affiliate_cookie).map(|c| c.value().to_string()),
        entry_step_id: step.as_ref().map(|s| s.id.clone()),
    };

    let cookie_session = jar.get(&session_cookie).map(|c| c.value().to_string());
    let cookie_visitor = jar.get(VISITOR_COOKIE).map(|c| c.value().to_string());

    let tracked = session::get_or_create_session(
        &conn,
        &funnel,
        cookie_session.as_deref(),
        cookie_visitor.as_deref(),
        &ctx,
        state.session_ttl_minutes,
    )?;

    let pageview_credited = match step.as_ref() {
        Some(step) => session::track_pageview(&mut conn, &tracked.session, step)?,
        None => false,
    };

    let mut jar = jar
        .add(
            Cookie::build((session_cookie, tracked.session.uuid.clone()))
                .path("/")
                .http_only(true),
        )
        .add(
            Cookie::build((VISITOR_COOKIE, tracked.session.visitor_id.clone()))
                .path("/")
                .http_only(true)
                .permanent(),
        );
    if let Some(affiliate_id) = tracked.affiliate_id() {
        jar = jar.add(
            Cookie::build((affiliate_cookie, affiliate_id.to_string()))
                .path("/")
                .http_only(true)
                .permanent(),
        );
    }

    Ok((
        jar,
        Json(VisitResponse {
            session_uuid: tracked.session.uuid.clone(),
            visitor_id: tracked.session.visitor_id.clone(),
            is_new: tracked.is_new,
            affiliate_id: tracked.session.affiliate_id.clone(),
            step: step.map(|s| s.slug),
            pageview_credited,
        }),
    ))
}
