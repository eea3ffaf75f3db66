pub mod audit;
pub mod calc;
pub mod core;
pub mod results;
pub mod settings;

use crate::audit::SqliteAuditLog;
use crate::error::EngineResult;
use crate::ipc::error::{engine_err, err, no_workspace, ok};
use crate::ipc::types::{AppState, Request};
use crate::settings as portal_settings;
use crate::store::SqliteResultStore;
use crate::workflow::ResultEngine;
use serde_json::Value;

/// Builds an engine over the workspace database with the current settings
/// and maps the outcome onto the response envelope.
fn with_engine<F>(state: &AppState, req: &Request, f: F) -> Value
where
    F: FnOnce(&ResultEngine<'_>) -> EngineResult<Value>,
{
    let Some(conn) = state.db.as_ref() else {
        return no_workspace(&req.id);
    };
    let settings = match portal_settings::load_settings(conn) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "store_failed", e.to_string(), None),
    };
    let store = SqliteResultStore::new(conn);
    let audit = SqliteAuditLog::new(conn);
    let engine = ResultEngine::new(&store, &audit, &settings);
    match f(&engine) {
        Ok(v) => ok(&req.id, v),
        Err(e) => engine_err(&req.id, &e),
    }
}
