use crate::calc::{self, Category};
use crate::ipc::handlers::assignments::{assignment_json, insert_assignment};
use crate::ipc::handlers::footprints::latest_record;
use crate::ipc::helpers::{
    non_negative, opt_f64, opt_i64, opt_str, required_f64, required_str, run_authenticated,
    search_clause, Handler, HandlerErr, Session,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::{json, Value};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct RecommendationRow {
    pub id: String,
    pub category: Category,
    pub description: String,
    pub potential_impact: f64,
    pub difficulty: i64,
    pub estimated_savings: f64,
}

const RECOMMENDATION_COLUMNS: &str =
    "id, category, description, potential_impact, difficulty, estimated_savings";

fn recommendation_from_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<RecommendationRow> {
    let category: String = r.get(1)?;
    Ok(RecommendationRow {
        id: r.get(0)?,
        category: Category::parse(&category).unwrap_or(Category::General),
        description: r.get(2)?,
        potential_impact: r.get(3)?,
        difficulty: r.get(4)?,
        estimated_savings: r.get(5)?,
    })
}

pub fn recommendation_json(r: &RecommendationRow) -> Value {
    json!({
        "id": r.id,
        "category": r.category.code(),
        "categoryDisplay": r.category.display(),
        "description": r.description,
        "potentialImpact": r.potential_impact,
        "difficulty": r.difficulty,
        "estimatedSavings": r.estimated_savings,
    })
}

pub fn load_recommendation(conn: &Connection, id: &str) -> Result<RecommendationRow, HandlerErr> {
    conn.query_row(
        &format!(
            "SELECT {} FROM recommendations WHERE id = ?",
            RECOMMENDATION_COLUMNS
        ),
        [id],
        recommendation_from_row,
    )
    .optional()
    .map_err(|e| HandlerErr::db("db_query_failed", e))?
    .ok_or_else(|| HandlerErr::not_found("recommendation not found"))
}

fn top_in_category(
    conn: &Connection,
    category: Category,
    limit: usize,
) -> Result<Vec<RecommendationRow>, HandlerErr> {
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {} FROM recommendations WHERE category = ?
             ORDER BY potential_impact DESC, rowid
             LIMIT ?",
            RECOMMENDATION_COLUMNS
        ))
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    stmt.query_map(
        rusqlite::params![category.code(), limit as i64],
        recommendation_from_row,
    )
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(|e| HandlerErr::db("db_query_failed", e))
}

/// Priority-category picks padded with general ones, each scored for the
/// caller's latest footprint.
pub fn personalized(
    conn: &Connection,
    user_id: &str,
    limit: usize,
) -> Result<(Option<Category>, Vec<Value>), HandlerErr> {
    let latest = latest_record(conn, user_id)?.map(|r| r.breakdown);
    let priority = latest.as_ref().map(calc::priority_category);

    let mut picks = match priority {
        Some(cat) => top_in_category(conn, cat, limit)?,
        None => Vec::new(),
    };
    if picks.len() < limit && priority != Some(Category::General) {
        let general = top_in_category(conn, Category::General, limit - picks.len())?;
        picks.extend(general);
    }

    let items = picks
        .iter()
        .map(|r| {
            let mut v = recommendation_json(r);
            v["adjustedImpact"] = json!(calc::adjusted_impact(
                r.potential_impact,
                r.category,
                latest.as_ref()
            ));
            v
        })
        .collect();
    Ok((priority, items))
}

pub fn personalized_json(conn: &Connection, user_id: &str, limit: usize) -> Result<Vec<Value>, HandlerErr> {
    Ok(personalized(conn, user_id, limit)?.1)
}

fn recommendations_list(s: &Session<'_>, params: &Value) -> Result<Value, HandlerErr> {
    let search = opt_str(params, "search")?;
    let (filter, args) = search_clause(search.as_deref(), &["category", "description"]);
    let sql = format!(
        "SELECT {} FROM recommendations WHERE 1 = 1{} ORDER BY potential_impact DESC, rowid",
        RECOMMENDATION_COLUMNS, filter
    );
    let mut stmt = s
        .conn
        .prepare(&sql)
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    let rows = stmt
        .query_map(
            rusqlite::params_from_iter(args.iter()),
            recommendation_from_row,
        )
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    let items: Vec<Value> = rows.iter().map(recommendation_json).collect();
    Ok(json!({ "recommendations": items }))
}

fn recommendations_get(s: &Session<'_>, params: &Value) -> Result<Value, HandlerErr> {
    let id = required_str(params, "recommendationId")?;
    Ok(recommendation_json(&load_recommendation(s.conn, &id)?))
}

fn recommendations_create(s: &Session<'_>, params: &Value) -> Result<Value, HandlerErr> {
    s.require_staff()?;
    let category = match opt_str(params, "category")? {
        Some(raw) => Category::parse(&raw).ok_or_else(|| {
            HandlerErr::bad_params("unknown category").with_details(json!({ "category": raw }))
        })?,
        None => Category::General,
    };
    let description = required_str(params, "description")?;
    let potential_impact =
        non_negative("potentialImpact", required_f64(params, "potentialImpact")?)?;
    let difficulty = opt_i64(params, "difficulty")?.unwrap_or(1);
    if !(1..=5).contains(&difficulty) {
        return Err(HandlerErr::bad_params("difficulty must be between 1 and 5"));
    }
    let estimated_savings = non_negative(
        "estimatedSavings",
        opt_f64(params, "estimatedSavings")?.unwrap_or(0.0),
    )?;

    let id = Uuid::new_v4().to_string();
    s.conn
        .execute(
            &format!(
                "INSERT INTO recommendations({}) VALUES(?, ?, ?, ?, ?, ?)",
                RECOMMENDATION_COLUMNS
            ),
            rusqlite::params![
                id,
                category.code(),
                description,
                potential_impact,
                difficulty,
                estimated_savings
            ],
        )
        .map_err(|e| {
            HandlerErr::db("db_insert_failed", e)
                .with_details(json!({ "table": "recommendations" }))
        })?;
    Ok(recommendation_json(&load_recommendation(s.conn, &id)?))
}

fn recommendations_personalized(s: &Session<'_>, params: &Value) -> Result<Value, HandlerErr> {
    let limit = match opt_i64(params, "limit")? {
        Some(n) if n < 1 => return Err(HandlerErr::bad_params("limit must be at least 1")),
        Some(n) => n as usize,
        None => s.config.recommendation_limit,
    };
    let (priority, items) = personalized(s.conn, &s.user.id, limit)?;
    Ok(json!({
        "priorityCategory": priority.map(|c| c.code()),
        "recommendations": items,
    }))
}

fn recommendations_assign(s: &Session<'_>, params: &Value) -> Result<Value, HandlerErr> {
    let id = required_str(params, "recommendationId")?;
    let assignment = insert_assignment(s.conn, &s.user.id, &id)?;
    assignment_json(s.conn, &assignment)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let handler: Handler = match req.method.as_str() {
        "recommendations.list" => recommendations_list,
        "recommendations.get" => recommendations_get,
        "recommendations.create" => recommendations_create,
        "recommendations.personalized" => recommendations_personalized,
        "recommendations.assign" => recommendations_assign,
        _ => return None,
    };
    Some(run_authenticated(state, req, handler))
}
