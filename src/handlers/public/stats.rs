use axum::extract::State;
use chrono::NaiveDate;
use serde::Deserialize;

use crate::db::{AppState, queries};
use crate::error::{AppError, Result, msg};
use crate::extractors::{Json, Path, Query};
use crate::tracking::ledger::{self, DailyReport};

#[derive(Debug, Deserialize)]
pub struct StatsQuery {
    /// `YYYY-MM-DD`, inclusive. Both default to today.
    pub from: Option<String>,
    pub to: Option<String>,
}

fn parse_date(field: &str, value: Option<&str>) -> Result<Option<NaiveDate>> {
    value
        .filter(|v| !v.is_empty())
        .map(|v| {
            NaiveDate::parse_from_str(v, "%Y-%m-%d")
                .map_err(|_| AppError::BadRequest(format!("{} must be YYYY-MM-DD", field)))
        })
        .transpose()
}

pub async fn funnel_stats(
    State(state): State<AppState>,
    Path(slug): Path<String>,
    Query(query): Query<StatsQuery>,
) -> Result<Json<DailyReport>> {
    let conn = state.db.get()?;
    let funnel = queries::get_funnel_by_slug(&conn, &slug)?
        .ok_or_else(|| AppError::NotFound(msg::FUNNEL_NOT_FOUND.into()))?;

    let to = parse_date("to", query.to.as_deref())?.unwrap_or_else(ledger::today);
    let from = parse_date("from", query.from.as_deref())?.unwrap_or(to);
    Ok(Json(ledger::daily_report(&conn, &funnel.id, from, to)?))
}
