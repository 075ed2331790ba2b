use crate::auth::{AuthError, TokenKind};
use crate::calc::CalcError;
use crate::config::Config;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension};
use serde_json::Value;

#[derive(Debug)]
pub struct HandlerErr {
    pub code: &'static str,
    pub message: String,
    pub details: Option<Value>,
}

impl HandlerErr {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn bad_params(message: impl Into<String>) -> Self {
        Self::new("bad_params", message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new("not_found", message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new("forbidden", message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new("unauthorized", message)
    }

    /// Database failures are logged here so callers only map the code.
    pub fn db(code: &'static str, e: impl std::fmt::Display) -> Self {
        log::error!("{}: {}", code, e);
        Self::new(code, e.to_string())
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn response(self, id: &str) -> Value {
        err(id, self.code, self.message, self.details)
    }
}

impl From<CalcError> for HandlerErr {
    fn from(e: CalcError) -> Self {
        Self {
            code: "bad_params",
            message: e.message,
            details: e.details,
        }
    }
}

impl From<AuthError> for HandlerErr {
    fn from(e: AuthError) -> Self {
        match e {
            AuthError::MalformedHash => Self::db("db_query_failed", e),
            other => Self::unauthorized(other.to_string()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AuthUser {
    pub id: String,
    pub username: String,
    pub is_staff: bool,
}

pub struct Session<'a> {
    pub conn: &'a Connection,
    pub user: AuthUser,
    pub config: &'a Config,
}

impl Session<'_> {
    pub fn require_staff(&self) -> Result<(), HandlerErr> {
        if self.user.is_staff {
            Ok(())
        } else {
            Err(HandlerErr::forbidden("staff permission required"))
        }
    }
}

pub type Handler = fn(&Session<'_>, &Value) -> Result<Value, HandlerErr>;

pub fn db_conn(state: &AppState) -> Result<&Connection, HandlerErr> {
    state
        .db
        .as_ref()
        .ok_or_else(|| HandlerErr::new("no_workspace", "select a workspace first"))
}

pub fn authenticate(state: &AppState, req: &Request) -> Result<AuthUser, HandlerErr> {
    let conn = db_conn(state)?;
    let Some(tokens) = state.tokens.as_ref() else {
        return Err(HandlerErr::new("no_workspace", "select a workspace first"));
    };
    let Some(token) = req.token.as_deref() else {
        return Err(AuthError::MissingToken.into());
    };
    let claims = tokens.verify(token, TokenKind::Access)?;
    let row: Option<(String, i64)> = conn
        .query_row(
            "SELECT username, is_staff FROM users WHERE id = ?",
            [&claims.sub],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    let Some((username, is_staff)) = row else {
        return Err(HandlerErr::unauthorized("user no longer exists"));
    };
    Ok(AuthUser {
        id: claims.sub,
        username,
        is_staff: is_staff != 0,
    })
}

/// Resolves the workspace and caller, then runs `handler` and wraps its result.
pub fn run_authenticated(state: &AppState, req: &Request, handler: Handler) -> Value {
    let result = db_conn(state).and_then(|conn| {
        let user = authenticate(state, req)?;
        let session = Session {
            conn,
            user,
            config: &state.config,
        };
        handler(&session, &req.params)
    });
    match result {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    }
}

pub fn required_str(params: &Value, key: &str) -> Result<String, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}

/// Absent and null both read as `None`; blank strings too.
pub fn opt_str(params: &Value, key: &str) -> Result<Option<String>, HandlerErr> {
    match params.get(key) {
        None => Ok(None),
        Some(v) if v.is_null() => Ok(None),
        Some(v) => {
            let s = v
                .as_str()
                .ok_or_else(|| HandlerErr::bad_params(format!("{} must be string", key)))?
                .trim()
                .to_string();
            Ok(if s.is_empty() { None } else { Some(s) })
        }
    }
}

/// Distinguishes "not supplied" (`None`) from "explicitly cleared" (`Some(None)`).
pub fn opt_nullable_str(params: &Value, key: &str) -> Result<Option<Option<String>>, HandlerErr> {
    match params.get(key) {
        None => Ok(None),
        Some(v) if v.is_null() => Ok(Some(None)),
        Some(_) => Ok(Some(opt_str(params, key)?)),
    }
}

pub fn required_f64(params: &Value, key: &str) -> Result<f64, HandlerErr> {
    opt_f64(params, key)?.ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}

pub fn opt_f64(params: &Value, key: &str) -> Result<Option<f64>, HandlerErr> {
    match params.get(key) {
        None => Ok(None),
        Some(v) if v.is_null() => Ok(None),
        Some(v) => v
            .as_f64()
            .filter(|n| n.is_finite())
            .map(Some)
            .ok_or_else(|| HandlerErr::bad_params(format!("{} must be a number", key))),
    }
}

pub fn opt_i64(params: &Value, key: &str) -> Result<Option<i64>, HandlerErr> {
    match params.get(key) {
        None => Ok(None),
        Some(v) if v.is_null() => Ok(None),
        Some(v) => v
            .as_i64()
            .map(Some)
            .ok_or_else(|| HandlerErr::bad_params(format!("{} must be integer", key))),
    }
}

pub fn non_negative(key: &str, v: f64) -> Result<f64, HandlerErr> {
    if v < 0.0 {
        return Err(HandlerErr::bad_params(format!("{} must not be negative", key)));
    }
    Ok(v)
}

pub fn now_ts() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

pub fn today() -> String {
    Utc::now().date_naive().format("%Y-%m-%d").to_string()
}

/// Accepts RFC 3339 or a bare `YYYY-MM-DD` (midnight UTC), normalized to UTC.
pub fn parse_timestamp(raw: &str) -> Result<String, HandlerErr> {
    let t = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(t) {
        return Ok(dt
            .with_timezone(&Utc)
            .to_rfc3339_opts(SecondsFormat::Secs, true));
    }
    if let Ok(d) = NaiveDate::parse_from_str(t, "%Y-%m-%d") {
        if let Some(dt) = d.and_hms_opt(0, 0, 0) {
            return Ok(dt.and_utc().to_rfc3339_opts(SecondsFormat::Secs, true));
        }
    }
    Err(HandlerErr::bad_params(
        "timestamp must be RFC 3339 or YYYY-MM-DD",
    ))
}

pub fn parse_date(raw: &str) -> Result<String, HandlerErr> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map(|d| d.format("%Y-%m-%d").to_string())
        .map_err(|_| HandlerErr::bad_params("date must be YYYY-MM-DD"))
}

/// `YYYY-MM` bucket of a stored timestamp.
pub fn month_key(ts: &str) -> String {
    DateTime::parse_from_rfc3339(ts)
        .map(|dt| dt.with_timezone(&Utc).format("%Y-%m").to_string())
        .unwrap_or_else(|_| ts.chars().take(7).collect())
}

/// Runs `f` inside a transaction, rolling back on any error.
pub fn in_tx<T>(
    conn: &Connection,
    f: impl FnOnce(&Connection) -> Result<T, HandlerErr>,
) -> Result<T, HandlerErr> {
    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::db("db_tx_failed", e))?;
    match f(&*tx) {
        Ok(v) => {
            tx.commit().map_err(|e| HandlerErr::db("db_tx_failed", e))?;
            Ok(v)
        }
        Err(e) => {
            let _ = tx.rollback();
            Err(e)
        }
    }
}

/// Escapes `LIKE` metacharacters so a term only ever matches itself.
fn like_literal(term: &str) -> String {
    let mut out = String::with_capacity(term.len());
    for ch in term.chars() {
        if matches!(ch, '\\' | '%' | '_') {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}

/// Builds an `AND (...)` filter where every whitespace-separated term must
/// match at least one column as a literal substring. Case folding is ASCII
/// only, the same as SQLite's `LOWER()`.
pub fn search_clause(search: Option<&str>, columns: &[&str]) -> (String, Vec<String>) {
    let mut sql = String::new();
    let mut args = Vec::new();
    let Some(search) = search else {
        return (sql, args);
    };
    for term in search.split_whitespace() {
        let pattern = format!("%{}%", like_literal(&term.to_ascii_lowercase()));
        let ors: Vec<String> = columns
            .iter()
            .map(|c| format!("LOWER({}) LIKE ? ESCAPE '\\'", c))
            .collect();
        sql.push_str(&format!(" AND ({})", ors.join(" OR ")));
        for _ in columns {
            args.push(pattern.clone());
        }
    }
    (sql, args)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn timestamps_normalize_to_utc_seconds() {
        assert_eq!(
            parse_timestamp("2025-03-04").expect("date"),
            "2025-03-04T00:00:00Z"
        );
        assert_eq!(
            parse_timestamp("2025-03-04T10:30:15.250-06:00").expect("rfc3339"),
            "2025-03-04T16:30:15Z"
        );
        assert!(parse_timestamp("04/03/2025").is_err());
        assert_eq!(month_key("2025-03-31T23:00:00Z"), "2025-03");
    }

    #[test]
    fn param_readers_treat_null_as_absent() {
        let p = json!({ "a": null, "b": "  x ", "c": 3, "d": "", "e": 1.5 });
        assert_eq!(opt_str(&p, "a").expect("a"), None);
        assert_eq!(opt_str(&p, "b").expect("b").as_deref(), Some("x"));
        assert_eq!(opt_str(&p, "d").expect("d"), None);
        assert!(opt_str(&p, "c").is_err());
        assert_eq!(opt_nullable_str(&p, "a").expect("a"), Some(None));
        assert_eq!(opt_nullable_str(&p, "zz").expect("zz"), None);
        assert_eq!(opt_i64(&p, "c").expect("c"), Some(3));
        assert!(opt_i64(&p, "e").is_err());
        assert_eq!(required_f64(&p, "c").expect("c"), 3.0);
        assert_eq!(required_str(&p, "d").unwrap_err().code, "bad_params");
    }

    #[test]
    fn search_clause_requires_every_term() {
        let (sql, args) = search_clause(Some("Glass  BOT"), &["name", "material_type"]);
        assert_eq!(
            sql,
            " AND (LOWER(name) LIKE ? ESCAPE '\\' OR LOWER(material_type) LIKE ? ESCAPE '\\') AND (LOWER(name) LIKE ? ESCAPE '\\' OR LOWER(material_type) LIKE ? ESCAPE '\\')"
        );
        assert_eq!(args, vec!["%glass%", "%glass%", "%bot%", "%bot%"]);
        assert_eq!(search_clause(None, &["name"]).0, "");
    }

    #[test]
    fn search_terms_match_literally() {
        let (_, args) = search_clause(Some("50% a_b c\\d"), &["name"]);
        assert_eq!(args, vec!["%50\\%%", "%a\\_b%", "%c\\\\d%"]);

        let (_, args) = search_clause(Some("Élodie"), &["name"]);
        assert_eq!(args, vec!["%Élodie%"]);

        let conn = Connection::open_in_memory().expect("open memory db");
        conn.execute_batch(
            "CREATE TABLE t(name TEXT);
             INSERT INTO t(name) VALUES('Glass bottles'), ('50% recycled'), ('a_b'), ('axb'), ('Élodie');",
        )
        .expect("fixture");
        let count = |search: &str| -> i64 {
            let (filter, args) = search_clause(Some(search), &["name"]);
            conn.query_row(
                &format!("SELECT COUNT(*) FROM t WHERE 1 = 1{}", filter),
                rusqlite::params_from_iter(args.iter()),
                |r| r.get(0),
            )
            .expect("count")
        };
        assert_eq!(count("_"), 1);
        assert_eq!(count("%"), 1);
        assert_eq!(count("a_b"), 1);
        assert_eq!(count("GLASS"), 1);
        assert_eq!(count("Élodie"), 1);
        assert_eq!(count("\\"), 0);
    }
}
