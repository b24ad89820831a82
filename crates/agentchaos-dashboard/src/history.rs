//! Historical run summaries
//!
//! Rebuilds dashboard data from persisted run directories
//! (`runs/<id>/logs/proxy.log` plus optional `agent_metrics.json`), so past
//! experiments remain inspectable after the proxy exits.

use crate::events::DashboardEvent;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

/// One entry of `GET /api/runs`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunInfo {
    pub id: String,
    pub has_log: bool,
}

/// Aggregated metrics for one run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: String,
    pub total_requests: u64,
    pub error_requests: u64,
    pub error_rate: f64,
    pub chaos_injections: u64,
    pub chaos_requests: u64,
    pub chaos_hit_rate: f64,
    pub success_rate: f64,
    pub tool_requests: u64,
    pub tool_errors: u64,
    pub tool_error_rate: f64,
    pub llm_requests: u64,
    pub llm_errors: u64,
    pub llm_error_rate: f64,
    pub agent_requests: u64,
    pub input_validation_errors: u64,
    pub input_error_rate: f64,
    pub agent_metrics: serde_json::Value,
}

/// One parsed line of the structured proxy log.
#[derive(Debug, Deserialize)]
struct LogLine {
    method: Option<String>,
    url: Option<String>,
    status_code: Option<u16>,
    chaos_applied: Option<String>,
    agent_role: Option<String>,
    traffic_type: Option<String>,
    traffic_subtype: Option<String>,
}

fn chaos_list(raw: Option<&str>) -> Vec<String> {
    raw.map(|joined| {
        joined
            .split(',')
            .filter(|item| !item.is_empty())
            .map(str::to_owned)
            .collect()
    })
    .unwrap_or_default()
}

/// List run directories under the runs root, newest first.
pub fn list_runs(runs_dir: &Path) -> Vec<RunInfo> {
    let Ok(entries) = std::fs::read_dir(runs_dir) else {
        return Vec::new();
    };

    let mut runs: Vec<RunInfo> = entries
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.path().is_dir())
        .map(|entry| {
            let id = entry.file_name().to_string_lossy().into_owned();
            let has_log = entry.path().join("logs/proxy.log").exists();
            RunInfo { id, has_log }
        })
        .collect();
    runs.sort_by(|a, b| b.id.cmp(&a.id));
    runs
}

/// Aggregate one run's `proxy.log` (plus optional `agent_metrics.json`).
pub fn run_summary(runs_dir: &Path, run_id: &str) -> Option<RunSummary> {
    let log_path = runs_dir.join(run_id).join("logs/proxy.log");
    let contents = std::fs::read_to_string(&log_path).ok()?;

    let mut summary = RunSummary {
        run_id: run_id.to_owned(),
        agent_metrics: serde_json::Value::Object(serde_json::Map::new()),
        ..Default::default()
    };

    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let Ok(entry) = serde_json::from_str::<LogLine>(line) else {
            debug!("Skipping unparseable log line in {}", log_path.display());
            continue;
        };

        summary.total_requests += 1;
        let status = entry.status_code.unwrap_or(0);
        let is_error = status >= 400;
        if is_error {
            summary.error_requests += 1;
        }
        if status == 400 || status == 422 {
            summary.input_validation_errors += 1;
        }

        let chaos = chaos_list(entry.chaos_applied.as_deref());
        summary.chaos_injections += chaos.len() as u64;
        if !chaos.is_empty() {
            summary.chaos_requests += 1;
        }

        match entry.traffic_type.as_deref() {
            Some("TOOL_CALL") => {
                summary.tool_requests += 1;
                if is_error {
                    summary.tool_errors += 1;
                }
            }
            Some("LLM_API") => {
                summary.llm_requests += 1;
                if is_error {
                    summary.llm_errors += 1;
                }
            }
            Some("AGENT_TO_AGENT") => {
                summary.agent_requests += 1;
            }
            _ => {}
        }
    }

    let total = summary.total_requests as f64;
    if summary.total_requests > 0 {
        summary.error_rate = summary.error_requests as f64 / total;
        summary.success_rate = (summary.total_requests - summary.error_requests) as f64 / total;
        summary.chaos_hit_rate = summary.chaos_requests as f64 / total;
        summary.input_error_rate = summary.input_validation_errors as f64 / total;
    }
    if summary.tool_requests > 0 {
        summary.tool_error_rate = summary.tool_errors as f64 / summary.tool_requests as f64;
    }
    if summary.llm_requests > 0 {
        summary.llm_error_rate = summary.llm_errors as f64 / summary.llm_requests as f64;
    }

    let metrics_path = runs_dir.join(run_id).join("logs/agent_metrics.json");
    if let Ok(raw) = std::fs::read_to_string(metrics_path) {
        if let Ok(metrics) = serde_json::from_str(&raw) {
            summary.agent_metrics = metrics;
        }
    }

    Some(summary)
}

/// Denormalize one run's log into dashboard events.
pub fn run_events(runs_dir: &Path, run_id: &str) -> Option<Vec<DashboardEvent>> {
    let log_path = runs_dir.join(run_id).join("logs/proxy.log");
    let contents = std::fs::read_to_string(&log_path).ok()?;

    let mut events = Vec::new();
    for (index, line) in contents.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let Ok(entry) = serde_json::from_str::<LogLine>(line) else {
            continue;
        };

        let request_id = format!("run_{run_id}_{index}");
        let traffic_type = entry.traffic_type.clone().unwrap_or_else(|| "UNKNOWN".to_owned());

        events.push(DashboardEvent::request_started(
            &request_id,
            entry.method.clone().unwrap_or_default(),
            entry.url.clone().unwrap_or_default(),
            entry.agent_role.clone(),
            traffic_type.clone(),
            entry.traffic_subtype.clone(),
        ));

        let chaos = chaos_list(entry.chaos_applied.as_deref());
        for strategy in &chaos {
            events.push(DashboardEvent::chaos_injected(&request_id, strategy, "request", None));
        }

        if let Some(status) = entry.status_code {
            events.push(DashboardEvent::response_received(&request_id, status, None, None));
        }

        if traffic_type == "AGENT_TO_AGENT" {
            events.push(DashboardEvent::swarm_message(
                &request_id,
                entry.agent_role.clone(),
                None,
                entry.traffic_subtype.clone().unwrap_or_else(|| "agent_to_agent".to_owned()),
                !chaos.is_empty(),
            ));
        }
    }

    Some(events)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_run(dir: &Path, id: &str, lines: &[&str]) {
        let logs = dir.join(id).join("logs");
        std::fs::create_dir_all(&logs).unwrap();
        std::fs::write(logs.join("proxy.log"), lines.join("\n")).unwrap();
    }

    const LINE_OK: &str = r#"{"timestamp":"t","method":"POST","url":"http://h/search_flights","status_code":200,"chaos_applied":"delay","tool_name":"search_flights","fuzzed":false,"agent_role":null,"traffic_type":"TOOL_CALL","traffic_subtype":null}"#;
    const LINE_ERR: &str = r#"{"timestamp":"t","method":"POST","url":"http://h/v1/chat/completions","status_code":503,"chaos_applied":"err,delay","tool_name":"llm_request","fuzzed":false,"agent_role":null,"traffic_type":"LLM_API","traffic_subtype":null}"#;
    const LINE_AGENT: &str = r#"{"timestamp":"t","method":"POST","url":"http://h/agent-w/messages","status_code":200,"chaos_applied":null,"tool_name":null,"fuzzed":false,"agent_role":"worker","traffic_type":"AGENT_TO_AGENT","traffic_subtype":"worker_communication"}"#;

    #[test]
    fn test_list_runs_sorted_desc() {
        let dir = tempfile::tempdir().unwrap();
        write_run(dir.path(), "20250101-a", &[LINE_OK]);
        write_run(dir.path(), "20250301-b", &[LINE_OK]);
        std::fs::create_dir_all(dir.path().join("20250201-empty")).unwrap();

        let runs = list_runs(dir.path());
        let ids: Vec<&str> = runs.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["20250301-b", "20250201-empty", "20250101-a"]);
        assert!(!runs[1].has_log);
    }

    #[test]
    fn test_list_runs_missing_root() {
        assert!(list_runs(Path::new("/definitely/not/here")).is_empty());
    }

    #[test]
    fn test_run_summary_counts() {
        let dir = tempfile::tempdir().unwrap();
        write_run(dir.path(), "run1", &[LINE_OK, LINE_ERR, LINE_AGENT, "", "not json"]);

        let summary = run_summary(dir.path(), "run1").unwrap();
        assert_eq!(summary.total_requests, 3);
        assert_eq!(summary.error_requests, 1);
        assert_eq!(summary.chaos_injections, 3); // "delay" + "err,delay"
        assert_eq!(summary.chaos_requests, 2);
        assert_eq!(summary.tool_requests, 1);
        assert_eq!(summary.llm_requests, 1);
        assert_eq!(summary.llm_errors, 1);
        assert_eq!(summary.agent_requests, 1);
        assert!((summary.error_rate - 1.0 / 3.0).abs() < 1e-9);
        assert!((summary.llm_error_rate - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_run_summary_reads_agent_metrics() {
        let dir = tempfile::tempdir().unwrap();
        write_run(dir.path(), "run1", &[LINE_OK]);
        std::fs::write(
            dir.path().join("run1/logs/agent_metrics.json"),
            r#"{"goal_completed": true}"#,
        )
        .unwrap();

        let summary = run_summary(dir.path(), "run1").unwrap();
        assert_eq!(summary.agent_metrics["goal_completed"], true);
    }

    #[test]
    fn test_run_summary_missing_run() {
        let dir = tempfile::tempdir().unwrap();
        assert!(run_summary(dir.path(), "ghost").is_none());
    }

    #[test]
    fn test_run_events_denormalization() {
        let dir = tempfile::tempdir().unwrap();
        write_run(dir.path(), "run1", &[LINE_ERR, LINE_AGENT]);

        let events = run_events(dir.path(), "run1").unwrap();
        let types: Vec<String> = events
            .iter()
            .map(|e| {
                serde_json::to_value(e).unwrap()["event_type"].as_str().unwrap().to_owned()
            })
            .collect();

        // LINE_ERR: started + 2 chaos + response; LINE_AGENT: started + response + swarm
        assert_eq!(
            types,
            vec![
                "request_started",
                "chaos_injected",
                "chaos_injected",
                "response_received",
                "request_started",
                "response_received",
                "swarm_message",
            ]
        );
    }
}
