mod audit;
mod calc;
mod classify;
mod db;
mod error;
mod ipc;
mod logging;
mod model;
mod rank;
mod settings;
mod store;
mod workflow;

use std::io::{self, BufRead, Write};
use tracing::{debug, info, warn};

fn main() {
    if let Err(e) = logging::init_logging() {
        eprintln!("resultd: logging disabled: {e}");
    }
    info!(target: "resultd", version = env!("CARGO_PKG_VERSION"), "resultd starting");

    let mut state = ipc::AppState {
        workspace: None,
        db: None,
    };

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(v) => v,
            Err(e) => {
                warn!(target: "resultd", error = %e, "stdin closed");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let req: ipc::Request = match serde_json::from_str(&line) {
            Ok(v) => v,
            Err(e) => {
                // No id to reply to.
                warn!(target: "resultd::ipc", error = %e, "malformed request line");
                let resp = serde_json::json!({
                    "ok": false,
                    "error": { "code": "bad_json", "message": e.to_string() }
                });
                let _ = writeln!(stdout, "{}", resp);
                let _ = stdout.flush();
                continue;
            }
        };

        debug!(target: "resultd::ipc", id = %req.id, method = %req.method, "request");
        let resp = ipc::handle_request(&mut state, req);
        let _ = writeln!(
            stdout,
            "{}",
            serde_json::to_string(&resp).unwrap_or_else(|_| "{\"ok\":false}".to_string())
        );
        let _ = stdout.flush();
    }
    info!(target: "resultd", "resultd stopped");
}
