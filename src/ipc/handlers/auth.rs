use crate::auth::{hash_password, verify_password};
use crate::ipc::error::ok;
use crate::ipc::handlers::users::{load_user, user_json};
use crate::ipc::helpers::{db_conn, opt_str, required_str, today, HandlerErr};
use crate::ipc::types::{AppState, Request};
use rusqlite::OptionalExtension;
use serde_json::json;
use uuid::Uuid;

fn handle_register(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = db_conn(state)?;
    let username = required_str(&req.params, "username")?;
    let password = req
        .params
        .get("password")
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| HandlerErr::bad_params("missing password"))?;
    let email = opt_str(&req.params, "email")?.unwrap_or_default();
    let full_name = opt_str(&req.params, "fullName")?.unwrap_or_default();
    let region = opt_str(&req.params, "region")?.unwrap_or_default();
    let country = opt_str(&req.params, "country")?.unwrap_or_default();

    let taken: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM users WHERE username = ?",
            [&username],
            |r| r.get(0),
        )
        .optional()
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    if taken.is_some() {
        return Err(HandlerErr::new("already_exists", "username is already taken")
            .with_details(json!({ "username": username })));
    }

    // The first account in a workspace administers the catalog.
    let user_count: i64 = conn
        .query_row("SELECT COUNT(*) FROM users", [], |r| r.get(0))
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    let is_staff = user_count == 0;

    let user_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO users(id, username, email, password_hash, full_name, region, country, is_staff, registered_on)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &user_id,
            &username,
            &email,
            hash_password(password),
            &full_name,
            &region,
            &country,
            is_staff as i64,
            today(),
        ),
    )
    .map_err(|e| HandlerErr::db("db_insert_failed", e).with_details(json!({ "table": "users" })))?;

    log::info!("registered user {} (staff: {})", username, is_staff);
    let user = load_user(conn, &user_id)?;
    Ok(user_json(&user))
}

fn handle_token(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = db_conn(state)?;
    let Some(tokens) = state.tokens.as_ref() else {
        return Err(HandlerErr::new("no_workspace", "select a workspace first"));
    };
    let username = required_str(&req.params, "username")?;
    let password = req
        .params
        .get("password")
        .and_then(|v| v.as_str())
        .ok_or_else(|| HandlerErr::bad_params("missing password"))?;

    let row: Option<(String, String)> = conn
        .query_row(
            "SELECT id, password_hash FROM users WHERE username = ?",
            [&username],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;

    let verified = match &row {
        Some((_, hash)) => verify_password(password, hash)?,
        None => false,
    };
    let (Some((user_id, _)), true) = (row, verified) else {
        log::warn!("failed login for {}", username);
        return Err(HandlerErr::unauthorized("invalid username or password"));
    };

    let pair = tokens.issue_pair(&user_id, &username)?;
    let user = load_user(conn, &user_id)?;
    log::info!("issued tokens for {}", username);
    Ok(json!({
        "access": pair.access,
        "refresh": pair.refresh,
        "user": user_json(&user),
    }))
}

fn handle_refresh(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = db_conn(state)?;
    let Some(tokens) = state.tokens.as_ref() else {
        return Err(HandlerErr::new("no_workspace", "select a workspace first"));
    };
    let refresh = required_str(&req.params, "refresh")?;
    let claims = tokens.verify(&refresh, crate::auth::TokenKind::Refresh)?;
    let exists: Option<i64> = conn
        .query_row("SELECT 1 FROM users WHERE id = ?", [&claims.sub], |r| r.get(0))
        .optional()
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    if exists.is_none() {
        return Err(HandlerErr::unauthorized("user no longer exists"));
    }
    let access = tokens.refresh_access(&refresh)?;
    log::debug!("refreshed access token for {}", claims.username);
    Ok(json!({ "access": access }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "auth.register" => handle_register(state, req),
        "auth.token" => handle_token(state, req),
        "auth.refresh" => handle_refresh(state, req),
        _ => return None,
    };
    Some(match result {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    })
}
