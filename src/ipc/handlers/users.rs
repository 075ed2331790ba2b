use crate::ipc::handlers::{footprints, recommendations, recycling};
use crate::ipc::helpers::{
    opt_str, required_str, run_authenticated, search_clause, HandlerErr, Session,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;

#[derive(Debug, Clone)]
pub struct UserRow {
    pub id: String,
    pub username: String,
    pub email: String,
    pub full_name: String,
    pub registered_on: String,
    pub region: String,
    pub country: String,
    pub is_staff: bool,
}

const USER_COLUMNS: &str =
    "id, username, email, full_name, registered_on, region, country, is_staff";

fn user_from_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<UserRow> {
    Ok(UserRow {
        id: r.get(0)?,
        username: r.get(1)?,
        email: r.get(2)?,
        full_name: r.get(3)?,
        registered_on: r.get(4)?,
        region: r.get(5)?,
        country: r.get(6)?,
        is_staff: r.get::<_, i64>(7)? != 0,
    })
}

pub fn user_json(u: &UserRow) -> serde_json::Value {
    json!({
        "id": u.id,
        "username": u.username,
        "email": u.email,
        "fullName": u.full_name,
        "registeredOn": u.registered_on,
        "region": u.region,
        "country": u.country,
        "isStaff": u.is_staff,
    })
}

pub fn load_user(conn: &Connection, user_id: &str) -> Result<UserRow, HandlerErr> {
    conn.query_row(
        &format!("SELECT {} FROM users WHERE id = ?", USER_COLUMNS),
        [user_id],
        user_from_row,
    )
    .optional()
    .map_err(|e| HandlerErr::db("db_query_failed", e))?
    .ok_or_else(|| HandlerErr::not_found("user not found"))
}

/// Non-staff callers can only see themselves; anyone else reads as missing.
fn visible_user(s: &Session<'_>, user_id: &str) -> Result<UserRow, HandlerErr> {
    if !s.user.is_staff && user_id != s.user.id {
        return Err(HandlerErr::not_found("user not found"));
    }
    load_user(s.conn, user_id)
}

fn target_user_id(s: &Session<'_>, params: &serde_json::Value) -> Result<String, HandlerErr> {
    Ok(opt_str(params, "userId")?.unwrap_or_else(|| s.user.id.clone()))
}

fn users_me(s: &Session<'_>, _params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    Ok(user_json(&load_user(s.conn, &s.user.id)?))
}

fn users_list(s: &Session<'_>, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let search = opt_str(params, "search")?;
    let (filter, mut args) =
        search_clause(search.as_deref(), &["username", "email", "full_name"]);
    let mut sql = format!("SELECT {} FROM users WHERE 1 = 1", USER_COLUMNS);
    if !s.user.is_staff {
        sql.push_str(" AND id = ?");
        args.insert(0, s.user.id.clone());
    }
    sql.push_str(&filter);
    sql.push_str(" ORDER BY username");

    let mut stmt = s
        .conn
        .prepare(&sql)
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    let users = stmt
        .query_map(rusqlite::params_from_iter(args.iter()), user_from_row)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    let users: Vec<_> = users.iter().map(user_json).collect();
    Ok(json!({ "users": users }))
}

fn users_get(s: &Session<'_>, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let user_id = required_str(params, "userId")?;
    Ok(user_json(&visible_user(s, &user_id)?))
}

fn users_update(s: &Session<'_>, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let user_id = target_user_id(s, params)?;
    let existing = visible_user(s, &user_id)?;

    let field = |key: &str, current: &str| -> Result<String, HandlerErr> {
        match params.get(key) {
            None => Ok(current.to_string()),
            Some(_) => Ok(opt_str(params, key)?.unwrap_or_default()),
        }
    };
    let email = field("email", &existing.email)?;
    let full_name = field("fullName", &existing.full_name)?;
    let region = field("region", &existing.region)?;
    let country = field("country", &existing.country)?;

    s.conn
        .execute(
            "UPDATE users SET email = ?, full_name = ?, region = ?, country = ? WHERE id = ?",
            (&email, &full_name, &region, &country, &user_id),
        )
        .map_err(|e| HandlerErr::db("db_update_failed", e))?;
    Ok(user_json(&load_user(s.conn, &user_id)?))
}

fn users_delete(s: &Session<'_>, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let user_id = required_str(params, "userId")?;
    let user = visible_user(s, &user_id)?;

    let tx = s
        .conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::db("db_tx_failed", e))?;

    // Explicitly delete in dependency order.
    let steps: [&str; 9] = [
        "DELETE FROM user_recommendations WHERE user_id = ?",
        "DELETE FROM recycled_materials WHERE recycling_record_id IN (SELECT id FROM recycling_records WHERE user_id = ?)",
        "DELETE FROM recycling_records WHERE user_id = ?",
        "DELETE FROM consumption_details WHERE record_id IN (SELECT id FROM footprint_records WHERE user_id = ?)",
        "DELETE FROM transport_details WHERE record_id IN (SELECT id FROM footprint_records WHERE user_id = ?)",
        "DELETE FROM energy_details WHERE record_id IN (SELECT id FROM footprint_records WHERE user_id = ?)",
        "DELETE FROM waste_details WHERE record_id IN (SELECT id FROM footprint_records WHERE user_id = ?)",
        "DELETE FROM footprint_records WHERE user_id = ?",
        "DELETE FROM users WHERE id = ?",
    ];
    for sql in steps {
        if let Err(e) = tx.execute(sql, [&user_id]) {
            let _ = tx.rollback();
            return Err(HandlerErr::db("db_delete_failed", e));
        }
    }
    tx.commit().map_err(|e| HandlerErr::db("db_tx_failed", e))?;

    log::info!("deleted user {}", user.username);
    Ok(json!({ "ok": true }))
}

fn users_dashboard(s: &Session<'_>, _params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let footprint = footprints::latest_record_json(s.conn, &s.user.id)?;
    let recent = recycling::recent_records_json(s.conn, &s.user.id, 5)?;
    let recs = recommendations::personalized_json(
        s.conn,
        &s.user.id,
        s.config.recommendation_limit,
    )?;
    Ok(json!({
        "footprint": footprint,
        "recentRecycling": recent,
        "recommendations": recs,
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let handler: crate::ipc::helpers::Handler = match req.method.as_str() {
        "users.me" => users_me,
        "users.list" => users_list,
        "users.get" => users_get,
        "users.update" => users_update,
        "users.delete" => users_delete,
        "users.dashboard" => users_dashboard,
        _ => return None,
    };
    Some(run_authenticated(state, req, handler))
}
