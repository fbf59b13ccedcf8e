//! Best-effort raw-response dumps, keyed by patch/platform/match id.
//! Purely a debugging side effect: any failure is logged at debug level and
//! never changes the fetch outcome.

use std::fs;
use std::path::Path;

use serde_json::Value;
use tracing::debug;

use crate::model::Task;

pub fn write_raw(base: &Path, patch: &str, task: &Task, raw: &Value) {
    let patch = if patch.is_empty() { "unknown" } else { patch };
    let dir = base.join(patch).join(&task.platform);
    if let Err(err) = fs::create_dir_all(&dir) {
        debug!(error = %err, path = %dir.display(), "snapshot dir create failed");
        return;
    }
    let path = dir.join(format!("{}_{}.json", task.platform, task.match_id));
    let body = match serde_json::to_vec(raw) {
        Ok(body) => body,
        Err(err) => {
            debug!(error = %err, "snapshot serialize failed");
            return;
        }
    };
    if let Err(err) = fs::write(&path, body) {
        debug!(error = %err, path = %path.display(), "snapshot write failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn writes_under_patch_and_platform() {
        let tmp = std::env::temp_dir().join(format!("details-dump-{}", std::process::id()));
        let task = Task::new("NA", 42);
        write_raw(&tmp, "13.14", &task, &json!({"info": {"queueId": 420}}));
        let path = tmp.join("13.14").join("NA").join("NA_42.json");
        assert!(path.is_file());
        let _ = fs::remove_dir_all(&tmp);
    }
}
