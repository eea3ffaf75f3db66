use super::with_engine;
use crate::ipc::params;
use crate::ipc::types::{AppState, Request};
use serde_json::Value;

fn handle_preview(state: &mut AppState, req: &Request) -> Value {
    with_engine(state, req, |engine| {
        let actor = params::actor(&req.params)?;
        let input = params::result_input(req.params.get("result").unwrap_or(&Value::Null))?;
        let preview = engine.preview(&actor, &input)?;
        Ok(serde_json::to_value(preview)?)
    })
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    match req.method.as_str() {
        "calc.preview" => Some(handle_preview(state, req)),
        _ => None,
    }
}
