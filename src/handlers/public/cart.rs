use axum::extract::State;

use crate::db::{AppState, queries};
use crate::error::{AppError, Result, msg};
use crate::extractors::{Json, Path};
use crate::id::is_valid_prefixed_id;
use crate::models::Cart;
use crate::tracking::cart;

pub async fn get_cart(
    State(state): State<AppState>,
    Path(session_uuid): Path<String>,
) -> Result<Json<Cart>> {
    let conn = state.db.get()?;
    let session = queries::get_session(&conn, &session_uuid)?
        .ok_or_else(|| AppError::NotFound(msg::SESSION_NOT_FOUND.into()))?;
    Ok(Json(cart::get_or_create_cart(&conn, &session)?))
}

pub async fn toggle_cart_product(
    State(state): State<AppState>,
    Path((session_uuid, product_id)): Path<(String, String)>,
) -> Result<Json<Cart>> {
    if !is_valid_prefixed_id(&product_id) {
        return Err(AppError::NotFound("Product not found".into()));
    }
    let mut conn = state.db.get()?;
    let session = queries::get_session(&conn, &session_uuid)?
        .ok_or_else(|| AppError::NotFound(msg::SESSION_NOT_FOUND.into()))?;
    let current = cart::get_or_create_cart(&conn, &session)?;
    Ok(Json(cart::toggle_product(&mut conn, &current.id, &product_id)?))
}

pub async fn toggle_cart_bump(
    State(state): State<AppState>,
    Path((session_uuid, bump_id)): Path<(String, String)>,
) -> Result<Json<Cart>> {
    if !is_valid_prefixed_id(&bump_id) {
        return Err(AppError::NotFound("Bump not found".into()));
    }
    let mut conn = state.db.get()?;
    let session = queries::get_session(&conn, &session_uuid)?
        .ok_or_else(|| AppError::NotFound(msg::SESSION_NOT_FOUND.into()))?;
    let current = cart::get_or_create_cart(&conn, &session)?;
    Ok(Json(cart::toggle_bump(&mut conn, &current.id, &bump_id)?))
}
