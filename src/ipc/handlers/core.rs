use crate::auth::{self, TokenIssuer};
use crate::catalog;
use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use anyhow::Context;
use rusqlite::Connection;
use serde_json::json;
use std::path::{Path, PathBuf};

const TOKEN_SECRET_KEY: &str = "auth.tokenSecret";

/// Opens (or creates) a workspace and makes it the active one.
pub fn open_workspace(state: &mut AppState, path: &Path) -> anyhow::Result<()> {
    let conn = db::open_db(path)?;
    let secret = resolve_token_secret(&conn, state.config.token_secret.as_deref())?;

    if state.config.seed_catalog {
        if let Some(summary) = catalog::seed_if_needed(&conn)? {
            log::info!(
                "seeded catalog: {} materials, {} factors, {} recommendations",
                summary.materials,
                summary.factors,
                summary.recommendations
            );
        }
    }

    state.tokens = Some(TokenIssuer::new(
        &secret,
        state.config.access_ttl_secs,
        state.config.refresh_ttl_secs,
    ));
    state.db = Some(conn);
    state.workspace = Some(path.to_path_buf());
    log::info!("workspace opened: {}", path.to_string_lossy());
    Ok(())
}

fn resolve_token_secret(conn: &Connection, configured: Option<&str>) -> anyhow::Result<String> {
    if let Some(s) = configured {
        return Ok(s.to_string());
    }
    let stored = db::settings_get_json(conn, TOKEN_SECRET_KEY)?
        .and_then(|v| v.as_str().map(|s| s.to_string()))
        .filter(|s| !s.is_empty());
    if let Some(s) = stored {
        return Ok(s);
    }
    let secret = auth::generate_secret();
    db::settings_set_json(conn, TOKEN_SECRET_KEY, &json!(secret))
        .context("failed to persist token secret")?;
    log::info!("generated a new token secret for this workspace");
    Ok(secret)
}

fn handle_health(state: &mut AppState, req: &Request) -> serde_json::Value {
    ok(
        &req.id,
        json!({
            "version": env!("CARGO_PKG_VERSION"),
            "workspacePath": state.workspace.as_ref().map(|p| p.to_string_lossy().to_string())
        }),
    )
}

fn handle_api_root(_state: &mut AppState, req: &Request) -> serde_json::Value {
    ok(
        &req.id,
        json!({
            "name": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION"),
            "authentication": {
                "obtain": "auth.token {username, password} -> {access, refresh}",
                "refresh": "auth.refresh {refresh} -> {access}",
                "usage": "send the access token in the request's \"token\" field",
            },
            "methods": {
                "core": ["health", "api.root", "workspace.select"],
                "auth": ["auth.register", "auth.token", "auth.refresh"],
                "users": ["users.me", "users.list", "users.get", "users.update", "users.delete", "users.dashboard"],
                "footprints": [
                    "footprints.create", "footprints.list", "footprints.get", "footprints.update",
                    "footprints.delete", "footprints.details", "footprints.history", "footprints.compareAverage"
                ],
                "materials": ["materials.list", "materials.get", "materials.byType", "materials.create"],
                "recycling": [
                    "recycling.create", "recycling.list", "recycling.get", "recycling.update",
                    "recycling.delete", "recycling.addMaterial", "recycling.stats"
                ],
                "factors": ["factors.list", "factors.get", "factors.create", "factors.byRegion"],
                "recommendations": [
                    "recommendations.list", "recommendations.get", "recommendations.create",
                    "recommendations.personalized", "recommendations.assign"
                ],
                "myRecommendations": [
                    "myRecommendations.list", "myRecommendations.get", "myRecommendations.create",
                    "myRecommendations.update", "myRecommendations.updateStatus", "myRecommendations.delete"
                ],
            }
        }),
    )
}

fn handle_workspace_select(state: &mut AppState, req: &Request) -> serde_json::Value {
    let p = req
        .params
        .get("path")
        .and_then(|v| v.as_str())
        .filter(|s| !s.trim().is_empty())
        .map(PathBuf::from);
    let Some(path) = p else {
        return err(&req.id, "bad_params", "missing params.path", None);
    };

    match open_workspace(state, &path) {
        Ok(()) => ok(&req.id, json!({ "workspacePath": path.to_string_lossy() })),
        Err(e) => {
            log::error!("failed to open workspace {}: {:?}", path.to_string_lossy(), e);
            err(&req.id, "db_open_failed", format!("{e:?}"), None)
        }
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "health" => Some(handle_health(state, req)),
        "api.root" => Some(handle_api_root(state, req)),
        "workspace.select" => Some(handle_workspace_select(state, req)),
        _ => None,
    }
}
