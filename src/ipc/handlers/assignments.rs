use crate::calc::{self, AssignmentStatus, EFFECTIVENESS_RANGE};
use crate::ipc::handlers::recommendations::{load_recommendation, recommendation_json};
use crate::ipc::helpers::{
    in_tx, now_ts, opt_str, required_str, run_authenticated, Handler, HandlerErr, Session,
};
use crate::ipc::types::{AppState, Request};
use rand::Rng;
use rusqlite::{Connection, OptionalExtension};
use serde_json::{json, Value};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct AssignmentRow {
    pub id: String,
    pub recommendation_id: String,
    pub status: AssignmentStatus,
    pub assigned_at: String,
    pub implemented_at: Option<String>,
    pub actual_impact: Option<f64>,
}

const ASSIGNMENT_COLUMNS: &str =
    "id, recommendation_id, status, assigned_at, implemented_at, actual_impact";

fn assignment_from_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<AssignmentRow> {
    let status: String = r.get(2)?;
    Ok(AssignmentRow {
        id: r.get(0)?,
        recommendation_id: r.get(1)?,
        status: AssignmentStatus::parse(&status).unwrap_or(AssignmentStatus::Pending),
        assigned_at: r.get(3)?,
        implemented_at: r.get(4)?,
        actual_impact: r.get(5)?,
    })
}

pub fn assignment_json(conn: &Connection, a: &AssignmentRow) -> Result<Value, HandlerErr> {
    let rec = load_recommendation(conn, &a.recommendation_id)?;
    Ok(json!({
        "id": a.id,
        "recommendationId": a.recommendation_id,
        "recommendation": recommendation_json(&rec),
        "status": a.status.code(),
        "statusDisplay": a.status.display(),
        "assignedAt": a.assigned_at,
        "implementedAt": a.implemented_at,
        "actualImpact": a.actual_impact,
    }))
}

fn owned_assignment(conn: &Connection, user_id: &str, id: &str) -> Result<AssignmentRow, HandlerErr> {
    conn.query_row(
        &format!(
            "SELECT {} FROM user_recommendations WHERE id = ? AND user_id = ?",
            ASSIGNMENT_COLUMNS
        ),
        [id, user_id],
        assignment_from_row,
    )
    .optional()
    .map_err(|e| HandlerErr::db("db_query_failed", e))?
    .ok_or_else(|| HandlerErr::not_found("assignment not found"))
}

/// Creates a pending assignment; each recommendation can be assigned once per user.
pub fn insert_assignment(
    conn: &Connection,
    user_id: &str,
    recommendation_id: &str,
) -> Result<AssignmentRow, HandlerErr> {
    load_recommendation(conn, recommendation_id)?;
    let existing: Option<String> = conn
        .query_row(
            "SELECT id FROM user_recommendations WHERE user_id = ? AND recommendation_id = ?",
            [user_id, recommendation_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    if let Some(assignment_id) = existing {
        return Err(
            HandlerErr::new("already_assigned", "recommendation is already assigned")
                .with_details(json!({ "assignmentId": assignment_id })),
        );
    }

    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO user_recommendations(id, user_id, recommendation_id, status, assigned_at)
         VALUES(?, ?, ?, ?, ?)",
        (
            &id,
            user_id,
            recommendation_id,
            AssignmentStatus::Pending.code(),
            now_ts(),
        ),
    )
    .map_err(|e| {
        HandlerErr::db("db_insert_failed", e)
            .with_details(json!({ "table": "user_recommendations" }))
    })?;
    owned_assignment(conn, user_id, &id)
}

/// Moves an assignment to `status`. The first move to completed stamps the
/// implementation time and draws the realized impact.
fn set_status(
    conn: &Connection,
    assignment: &AssignmentRow,
    status: AssignmentStatus,
) -> Result<(), HandlerErr> {
    let mut implemented_at = assignment.implemented_at.clone();
    let mut actual_impact = assignment.actual_impact;
    if status == AssignmentStatus::Completed && implemented_at.is_none() {
        let rec = load_recommendation(conn, &assignment.recommendation_id)?;
        let effectiveness = rand::thread_rng().gen_range(EFFECTIVENESS_RANGE);
        implemented_at = Some(now_ts());
        actual_impact = Some(calc::realized_impact(rec.potential_impact, effectiveness));
    }
    conn.execute(
        "UPDATE user_recommendations SET status = ?, implemented_at = ?, actual_impact = ? WHERE id = ?",
        rusqlite::params![status.code(), implemented_at, actual_impact, assignment.id],
    )
    .map_err(|e| HandlerErr::db("db_update_failed", e))?;
    Ok(())
}

fn parse_status(raw: &str) -> Result<AssignmentStatus, HandlerErr> {
    AssignmentStatus::parse(raw).ok_or_else(|| {
        HandlerErr::bad_params("unknown status").with_details(json!({
            "status": raw,
            "allowed": AssignmentStatus::ALL.iter().map(|s| s.code()).collect::<Vec<_>>(),
        }))
    })
}

fn my_list(s: &Session<'_>, _params: &Value) -> Result<Value, HandlerErr> {
    let mut stmt = s
        .conn
        .prepare(&format!(
            "SELECT {} FROM user_recommendations WHERE user_id = ? ORDER BY assigned_at DESC, rowid DESC",
            ASSIGNMENT_COLUMNS
        ))
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    let rows = stmt
        .query_map([&s.user.id], assignment_from_row)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    let items = rows
        .iter()
        .map(|a| assignment_json(s.conn, a))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "assignments": items }))
}

fn my_get(s: &Session<'_>, params: &Value) -> Result<Value, HandlerErr> {
    let id = required_str(params, "assignmentId")?;
    assignment_json(s.conn, &owned_assignment(s.conn, &s.user.id, &id)?)
}

fn my_create(s: &Session<'_>, params: &Value) -> Result<Value, HandlerErr> {
    let recommendation_id = required_str(params, "recommendationId")?;
    let status = opt_str(params, "status")?
        .map(|raw| parse_status(&raw))
        .transpose()?;
    let assignment = in_tx(s.conn, |conn| {
        let assignment = insert_assignment(conn, &s.user.id, &recommendation_id)?;
        match status {
            Some(status) => {
                set_status(conn, &assignment, status)?;
                owned_assignment(conn, &s.user.id, &assignment.id)
            }
            None => Ok(assignment),
        }
    })?;
    assignment_json(s.conn, &assignment)
}

fn my_update(s: &Session<'_>, params: &Value) -> Result<Value, HandlerErr> {
    let id = required_str(params, "assignmentId")?;
    let assignment = owned_assignment(s.conn, &s.user.id, &id)?;
    if let Some(raw) = opt_str(params, "status")? {
        set_status(s.conn, &assignment, parse_status(&raw)?)?;
    }
    assignment_json(s.conn, &owned_assignment(s.conn, &s.user.id, &id)?)
}

fn my_update_status(s: &Session<'_>, params: &Value) -> Result<Value, HandlerErr> {
    let id = required_str(params, "assignmentId")?;
    let status = parse_status(&required_str(params, "status")?)?;
    let assignment = owned_assignment(s.conn, &s.user.id, &id)?;
    set_status(s.conn, &assignment, status)?;
    assignment_json(s.conn, &owned_assignment(s.conn, &s.user.id, &id)?)
}

fn my_delete(s: &Session<'_>, params: &Value) -> Result<Value, HandlerErr> {
    let id = required_str(params, "assignmentId")?;
    owned_assignment(s.conn, &s.user.id, &id)?;
    s.conn
        .execute("DELETE FROM user_recommendations WHERE id = ?", [&id])
        .map_err(|e| HandlerErr::db("db_delete_failed", e))?;
    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let handler: Handler = match req.method.as_str() {
        "myRecommendations.list" => my_list,
        "myRecommendations.get" => my_get,
        "myRecommendations.create" => my_create,
        "myRecommendations.update" => my_update,
        "myRecommendations.updateStatus" => my_update_status,
        "myRecommendations.delete" => my_delete,
        _ => return None,
    };
    Some(run_authenticated(state, req, handler))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    fn seeded_db() -> Connection {
        let conn = Connection::open_in_memory().expect("open memory db");
        db::create_schema(&conn).expect("create schema");
        conn.execute(
            "INSERT INTO users(id, username, password_hash, registered_on)
             VALUES('u1', 'ana', 'x', '2025-01-01T00:00:00Z')",
            [],
        )
        .expect("user");
        conn.execute(
            "INSERT INTO recommendations(id, category, description, potential_impact)
             VALUES('r1', 'energy', 'Switch to LED bulbs', 40.0)",
            [],
        )
        .expect("recommendation");
        conn
    }

    fn assignment_count(conn: &Connection) -> i64 {
        conn.query_row("SELECT COUNT(*) FROM user_recommendations", [], |r| r.get(0))
            .expect("count")
    }

    #[test]
    fn failed_status_change_leaves_no_pending_row() {
        let conn = seeded_db();
        let failed = in_tx(&conn, |conn| {
            insert_assignment(conn, "u1", "r1")?;
            Err::<AssignmentRow, _>(HandlerErr::new("db_update_failed", "status write failed"))
        });
        assert_eq!(failed.unwrap_err().code, "db_update_failed");
        assert_eq!(assignment_count(&conn), 0);

        let retried = in_tx(&conn, |conn| {
            let a = insert_assignment(conn, "u1", "r1")?;
            set_status(conn, &a, AssignmentStatus::Completed)?;
            owned_assignment(conn, "u1", &a.id)
        })
        .expect("retry");
        assert_eq!(retried.status, AssignmentStatus::Completed);
        assert!(retried.implemented_at.is_some());
        let impact = retried.actual_impact.expect("realized impact");
        assert!((28.0..=48.0).contains(&impact), "{}", impact);
        assert_eq!(assignment_count(&conn), 1);
    }

    #[test]
    fn completing_twice_keeps_first_result() {
        let conn = seeded_db();
        let a = insert_assignment(&conn, "u1", "r1").expect("assign");
        set_status(&conn, &a, AssignmentStatus::Completed).expect("complete");
        let first = owned_assignment(&conn, "u1", &a.id).expect("first");
        set_status(&conn, &first, AssignmentStatus::Completed).expect("complete again");
        let second = owned_assignment(&conn, "u1", &a.id).expect("second");
        assert_eq!(first.implemented_at, second.implemented_at);
        assert_eq!(first.actual_impact, second.actual_impact);

        let dup = insert_assignment(&conn, "u1", "r1").unwrap_err();
        assert_eq!(dup.code, "already_assigned");
    }
}
