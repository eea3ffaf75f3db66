use crate::audit;
use crate::error::EngineError;
use crate::ipc::error::{engine_err, err, no_workspace, ok};
use crate::ipc::params;
use crate::ipc::types::{AppState, Request};
use crate::model::Role;
use serde_json::{json, Value};

const DEFAULT_LIMIT: i64 = 100;
const MAX_LIMIT: i64 = 1000;

fn handle_audit_list(state: &mut AppState, req: &Request) -> Value {
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
            &EngineError::forbidden("read the audit log", actor.role.as_str()),
        );
    }
    let limit = match req.params.get("limit") {
        None | Some(Value::Null) => DEFAULT_LIMIT,
        Some(v) => match v.as_i64() {
            Some(n) if (1..=MAX_LIMIT).contains(&n) => n,
            _ => {
                return err(
                    &req.id,
                    "bad_params",
                    format!("limit must be an integer in 1..={}", MAX_LIMIT),
                    None,
                )
            }
        },
    };
    match audit::list_events(conn, limit) {
        Ok(events) => ok(&req.id, json!({ "events": events })),
        Err(e) => err(&req.id, "store_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    match req.method.as_str() {
        "audit.list" => Some(handle_audit_list(state, req)),
        _ => None,
    }
}
