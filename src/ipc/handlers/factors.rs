use crate::ipc::helpers::{
    opt_str, parse_date, required_f64, required_str, run_authenticated, search_clause, today,
    Handler, HandlerErr, Session,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::{json, Value};
use uuid::Uuid;

const FACTOR_COLUMNS: &str =
    "id, category, subcategory, description, value, unit, region, updated_on, source";

fn factor_json(r: &rusqlite::Row<'_>) -> rusqlite::Result<Value> {
    let id: String = r.get(0)?;
    let category: String = r.get(1)?;
    let subcategory: String = r.get(2)?;
    let description: String = r.get(3)?;
    let value: f64 = r.get(4)?;
    let unit: String = r.get(5)?;
    let region: String = r.get(6)?;
    let updated_on: String = r.get(7)?;
    let source: String = r.get(8)?;
    Ok(json!({
        "id": id,
        "category": category,
        "subcategory": subcategory,
        "description": description,
        "value": value,
        "unit": unit,
        "region": region,
        "updatedOn": updated_on,
        "source": source,
    }))
}

fn load_factor(conn: &Connection, factor_id: &str) -> Result<Value, HandlerErr> {
    conn.query_row(
        &format!("SELECT {} FROM emission_factors WHERE id = ?", FACTOR_COLUMNS),
        [factor_id],
        factor_json,
    )
    .optional()
    .map_err(|e| HandlerErr::db("db_query_failed", e))?
    .ok_or_else(|| HandlerErr::not_found("emission factor not found"))
}

fn factors_list(s: &Session<'_>, params: &Value) -> Result<Value, HandlerErr> {
    let search = opt_str(params, "search")?;
    let (filter, args) = search_clause(
        search.as_deref(),
        &["category", "subcategory", "region"],
    );
    let sql = format!(
        "SELECT {} FROM emission_factors WHERE 1 = 1{} ORDER BY updated_on DESC, category, subcategory",
        FACTOR_COLUMNS, filter
    );
    let mut stmt = s
        .conn
        .prepare(&sql)
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    let factors = stmt
        .query_map(rusqlite::params_from_iter(args.iter()), factor_json)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    Ok(json!({ "factors": factors }))
}

fn factors_get(s: &Session<'_>, params: &Value) -> Result<Value, HandlerErr> {
    let factor_id = required_str(params, "factorId")?;
    load_factor(s.conn, &factor_id)
}

fn factors_create(s: &Session<'_>, params: &Value) -> Result<Value, HandlerErr> {
    s.require_staff()?;
    let category = required_str(params, "category")?;
    let subcategory = opt_str(params, "subcategory")?.unwrap_or_default();
    let description = opt_str(params, "description")?.unwrap_or_default();
    let value = required_f64(params, "value")?;
    let unit = required_str(params, "unit")?;
    let region = opt_str(params, "region")?.unwrap_or_default();
    let updated_on = match opt_str(params, "updatedOn")? {
        Some(raw) => parse_date(&raw)?,
        None => today(),
    };
    let source = opt_str(params, "source")?.unwrap_or_default();

    let factor_id = Uuid::new_v4().to_string();
    s.conn
        .execute(
            &format!(
                "INSERT INTO emission_factors({}) VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?)",
                FACTOR_COLUMNS
            ),
            rusqlite::params![
                factor_id,
                category,
                subcategory,
                description,
                value,
                unit,
                region,
                updated_on,
                source
            ],
        )
        .map_err(|e| {
            HandlerErr::db("db_insert_failed", e)
                .with_details(json!({ "table": "emission_factors" }))
        })?;
    load_factor(s.conn, &factor_id)
}

fn newest_match(
    conn: &Connection,
    category: &str,
    subcategory: Option<&str>,
    region: Option<&str>,
) -> Result<Option<Value>, HandlerErr> {
    let mut sql = format!(
        "SELECT {} FROM emission_factors WHERE category = ?",
        FACTOR_COLUMNS
    );
    let mut args = vec![category.to_string()];
    if let Some(sub) = subcategory {
        sql.push_str(" AND subcategory = ?");
        args.push(sub.to_string());
    }
    if let Some(region) = region {
        sql.push_str(" AND region = ?");
        args.push(region.to_string());
    }
    sql.push_str(" ORDER BY updated_on DESC, rowid DESC LIMIT 1");
    conn.query_row(&sql, rusqlite::params_from_iter(args.iter()), factor_json)
        .optional()
        .map_err(|e| HandlerErr::db("db_query_failed", e))
}

/// Regional factor if one exists, otherwise the region-less default.
fn factors_by_region(s: &Session<'_>, params: &Value) -> Result<Value, HandlerErr> {
    let category = required_str(params, "category")?;
    let subcategory = opt_str(params, "subcategory")?;
    let region = opt_str(params, "region")?;

    let mut found = newest_match(
        s.conn,
        &category,
        subcategory.as_deref(),
        region.as_deref(),
    )?;
    if found.is_none() && region.is_some() {
        found = newest_match(s.conn, &category, subcategory.as_deref(), Some(""))?;
    }
    found.ok_or_else(|| {
        HandlerErr::not_found("no emission factor matches").with_details(json!({
            "category": category,
            "subcategory": subcategory,
            "region": region,
        }))
    })
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let handler: Handler = match req.method.as_str() {
        "factors.list" => factors_list,
        "factors.get" => factors_get,
        "factors.create" => factors_create,
        "factors.byRegion" => factors_by_region,
        _ => return None,
    };
    Some(run_authenticated(state, req, handler))
}
