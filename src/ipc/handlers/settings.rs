use crate::audit::{AuditAction, AuditCategory, AuditEvent, AuditSink, SqliteAuditLog};
use crate::error::EngineError;
use crate::ipc::error::{engine_err, err, no_workspace, ok};
use crate::ipc::params;
use crate::ipc::types::{AppState, Request};
use crate::model::Role;
use crate::settings::{self, Settings};
use serde_json::{json, Value};

fn settings_json(id: &str, s: &Settings) -> Value {
    match serde_json::to_value(s) {
        Ok(v) => ok(id, json!({ "settings": v })),
        Err(e) => err(id, "store_failed", e.to_string(), None),
    }
}

fn handle_settings_get(state: &mut AppState, req: &Request) -> Value {
    let Some(conn) = state.db.as_ref() else {
        return no_workspace(&req.id);
    };
    match settings::load_settings(conn) {
        Ok(s) => settings_json(&req.id, &s),
        Err(e) => err(&req.id, "store_failed", e.to_string(), None),
    }
}

fn handle_settings_update(state: &mut AppState, req: &Request) -> Value {
    let Some(conn) = state.db.as_ref() else {
        return no_workspace(&req.id);
    };
    let actor = match params::actor(&req.params) {
        Ok(a) => a,
        Err(e) => return engine_err(&req.id, &e),
    };
    if actor.role != Role::Admin {
        return engine_err(
            &req.id,
            &EngineError::forbidden("update settings", actor.role.as_str()),
        );
    }
    let Some(patch) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "patch must be an object", None);
    };

    let current = match settings::load_settings(conn) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "store_failed", e.to_string(), None),
    };
    let next = match settings::merge_patch(&current, patch) {
        Ok(s) => s,
        Err(msg) => return err(&req.id, "bad_params", msg, None),
    };
    if let Err(e) = settings::save_settings(conn, &next) {
        return err(&req.id, "store_failed", e.to_string(), None);
    }

    SqliteAuditLog::new(conn).record(AuditEvent {
        actor_id: actor.id.clone(),
        action: AuditAction::UpdateSettings,
        category: AuditCategory::Settings,
        details: json!({ "fields": patch.keys().collect::<Vec<_>>() }),
    });
    settings_json(&req.id, &next)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    match req.method.as_str() {
        "settings.get" => Some(handle_settings_get(state, req)),
        "settings.update" => Some(handle_settings_update(state, req)),
        _ => None,
    }
}
