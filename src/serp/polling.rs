//! Two independently bounded waits on a submitted SERP task: first for the
//! task to complete, then for the AI overview to appear in its result.

use std::time::Duration;

use anyhow::{bail, Result};
use serde_json::Value;
use tracing::{debug, info, warn};

use super::SerpSource;

/// Task status code meaning "completed, results available".
pub const READY_STATUS: i64 = 20000;
pub const AI_OVERVIEW: &str = "ai_overview";

/// Fixed-delay retry ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
        }
    }
}

fn status_code(data: &Value) -> Option<i64> {
    data["tasks"].get(0).and_then(|t| t["status_code"].as_i64())
}

/// `item_types` of the first result, or `None` when the task has no result.
fn item_types(data: &Value) -> Option<Vec<String>> {
    let result = data["tasks"].get(0)?["result"].get(0)?;
    Some(
        result["item_types"]
            .as_array()
            .map(|types| {
                types
                    .iter()
                    .filter_map(|t| t.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default(),
    )
}

/// Wait for `task_id` to complete, then give the AI overview its own
/// bounded chance to appear.
///
/// Exhausting the readiness ceiling is an error. Exhausting the feature
/// ceiling is not: the last payload is returned as-is.
pub async fn poll_task(
    source: &dyn SerpSource,
    task_id: &str,
    readiness: RetryPolicy,
    feature: RetryPolicy,
) -> Result<Value> {
    let mut data = Value::Null;
    let mut ready = false;
    for attempt in 1..=readiness.max_attempts {
        data = source.get_task(task_id).await?;
        let status = status_code(&data);
        debug!(task_id, attempt, status = ?status, "polled SERP task");
        if status == Some(READY_STATUS) {
            ready = true;
            break;
        }
        if attempt < readiness.max_attempts {
            tokio::time::sleep(readiness.delay).await;
        }
    }
    if !ready {
        bail!(
            "SERP task {} not ready after {} polling attempts",
            task_id,
            readiness.max_attempts
        );
    }

    let Some(types) = item_types(&data) else {
        warn!(task_id, "SERP task completed without a result");
        return Ok(data);
    };
    debug!(task_id, item_types = ?types, "SERP task ready");
    if types.iter().any(|t| t == AI_OVERVIEW) {
        return Ok(data);
    }

    info!(task_id, "AI overview missing from result, retrying");
    for retry in 1..=feature.max_attempts {
        tokio::time::sleep(feature.delay).await;
        data = source.get_task(task_id).await?;
        let present = item_types(&data)
            .map(|types| types.iter().any(|t| t == AI_OVERVIEW))
            .unwrap_or(false);
        if present {
            info!(task_id, retry, "AI overview found");
            return Ok(data);
        }
    }

    warn!(
        task_id,
        retries = feature.max_attempts,
        "AI overview still missing"
    );
    Ok(data)
}
