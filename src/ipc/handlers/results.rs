use super::with_engine;
use crate::error::EngineError;
use crate::ipc::params;
use crate::ipc::types::{AppState, Request};
use crate::model::ResultSet;
use crate::rank::{RankBy, RankOrder};
use serde_json::{json, Value};

fn handle_submit(state: &mut AppState, req: &Request) -> Value {
    with_engine(state, req, |engine| {
        let actor = params::actor(&req.params)?;
        let key = params::required_str(&req.params, "key")?;
        let input = params::result_input(req.params.get("result").unwrap_or(&Value::Null))?;
        let outcome = engine.submit(&actor, key, &input)?;
        Ok(serde_json::to_value(outcome)?)
    })
}

fn handle_publish(state: &mut AppState, req: &Request) -> Value {
    with_engine(state, req, |engine| {
        let actor = params::actor(&req.params)?;
        let keys = params::keys(&req.params)?;
        let inline = params::inline_results(&req.params)?;
        let outcomes = engine.publish(&actor, &keys, &inline)?;
        Ok(json!({ "outcomes": outcomes }))
    })
}

fn handle_delete_published(state: &mut AppState, req: &Request) -> Value {
    with_engine(state, req, |engine| {
        let actor = params::actor(&req.params)?;
        let keys = params::keys(&req.params)?;
        let outcomes = engine.delete_published(&actor, &keys)?;
        Ok(json!({ "outcomes": outcomes }))
    })
}

fn handle_list(state: &mut AppState, req: &Request) -> Value {
    with_engine(state, req, |engine| {
        let actor = params::actor(&req.params)?;
        Ok(serde_json::to_value(engine.view(&actor)?)?)
    })
}

fn handle_get(state: &mut AppState, req: &Request) -> Value {
    with_engine(state, req, |engine| {
        let actor = params::actor(&req.params)?;
        let key = params::required_str(&req.params, "key")?;
        Ok(serde_json::to_value(engine.get(&actor, key)?)?)
    })
}

fn handle_cohort(state: &mut AppState, req: &Request) -> Value {
    with_engine(state, req, |engine| {
        let actor = params::actor(&req.params)?;
        let set = match params::optional_str(&req.params, "set") {
            None => ResultSet::Published,
            Some(s) => ResultSet::parse(s).ok_or_else(|| {
                EngineError::BadInput("set must be one of: pending, published".into())
            })?,
        };
        let grade = params::required_str(&req.params, "grade")?;
        let section = params::required_str(&req.params, "section")?;
        let by = match params::optional_str(&req.params, "by") {
            None => None,
            Some(s) => Some(RankBy::parse(s).ok_or_else(|| {
                EngineError::BadInput("by must be one of: average, total".into())
            })?),
        };
        let order = match params::optional_str(&req.params, "order") {
            None => RankOrder::default(),
            Some(s) => RankOrder::parse(s).ok_or_else(|| {
                EngineError::BadInput("order must be one of: asc, desc".into())
            })?,
        };
        let entries = engine.cohort(&actor, set, grade, section, by, order)?;
        Ok(json!({
            "set": set.as_str(),
            "grade": grade,
            "section": section,
            "entries": entries,
        }))
    })
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    match req.method.as_str() {
        "results.submit" => Some(handle_submit(state, req)),
        "results.publish" => Some(handle_publish(state, req)),
        "results.deletePublished" => Some(handle_delete_published(state, req)),
        "results.list" => Some(handle_list(state, req)),
        "results.get" => Some(handle_get(state, req)),
        "results.cohort" => Some(handle_cohort(state, req)),
        _ => None,
    }
}
