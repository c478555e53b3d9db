//! # Health and Metrics Endpoints
//!
//! Plain HTTP endpoints next to the WebSocket paths: `/health` for liveness
//! probes and `/metrics` for a more detailed runtime snapshot.

use crate::state::AppState;
use actix_web::{web, HttpResponse};
use serde_json::json;

pub async fn health_check(state: web::Data<AppState>) -> HttpResponse {
    let metrics = state.get_metrics_snapshot();
    let config = state.get_config();
    let uptime_seconds = state.get_uptime_seconds();

    let active_sessions = metrics.active_pipeline_sessions + metrics.active_proxy_sessions;
    let system_status = get_system_status(&config, active_sessions);

    HttpResponse::Ok().json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": uptime_seconds,
        "service": {
            "name": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION"),
            "host": config.server.host,
            "port": config.server.port
        },
        "sessions": {
            "pipeline": metrics.active_pipeline_sessions,
            "proxy": metrics.active_proxy_sessions,
            "total": active_sessions
        },
        "memory": get_memory_info(),
        "system": system_status
    }))
}

pub async fn detailed_metrics(state: web::Data<AppState>) -> HttpResponse {
    let metrics = state.get_metrics_snapshot();
    let config = state.get_config();
    let uptime_seconds = state.get_uptime_seconds();

    let turns_total = metrics.turns_completed + metrics.turns_failed;

    HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": uptime_seconds,
        "sessions": {
            "pipeline": metrics.active_pipeline_sessions,
            "proxy": metrics.active_proxy_sessions
        },
        "turns": {
            "completed": metrics.turns_completed,
            "failed": metrics.turns_failed,
            "failure_rate": if turns_total > 0 {
                metrics.turns_failed as f64 / turns_total as f64
            } else {
                0.0
            },
            "per_second": if uptime_seconds > 0 {
                turns_total as f64 / uptime_seconds as f64
            } else {
                0.0
            }
        },
        "proxy": {
            "frames_relayed": metrics.frames_relayed
        },
        "memory": get_memory_info(),
        "performance": {
            "max_concurrent_sessions": config.performance.max_concurrent_sessions,
            "history_window": config.performance.history_window
        }
    }))
}

fn get_memory_info() -> serde_json::Value {
    #[cfg(target_os = "linux")]
    if let Ok(status) = std::fs::read_to_string("/proc/self/status") {
        // Values in /proc/<pid>/status are reported in kB.
        let field_bytes = |name: &str| {
            status
                .lines()
                .find(|line| line.starts_with(name))
                .and_then(|line| line.split_whitespace().nth(1))
                .and_then(|kb| kb.parse::<u64>().ok())
                .map_or(0, |kb| kb * 1024)
        };

        return json!({
            "resident_memory_bytes": field_bytes("VmRSS:"),
            "virtual_memory_bytes": field_bytes("VmSize:"),
            "available": true
        });
    }

    json!({
        "resident_memory_bytes": 0,
        "virtual_memory_bytes": 0,
        "available": false,
        "note": "Memory info not available on this platform"
    })
}

fn get_system_status(config: &crate::config::AppConfig, active_sessions: u32) -> serde_json::Value {
    let session_usage = if config.performance.max_concurrent_sessions > 0 {
        active_sessions as f64 / config.performance.max_concurrent_sessions as f64
    } else {
        0.0
    };

    let status = if session_usage > 0.9 {
        "high_load"
    } else if session_usage > 0.7 {
        "moderate_load"
    } else {
        "normal"
    };

    json!({
        "status": status,
        "session_usage_percent": (session_usage * 100.0).round(),
        "max_sessions": config.performance.max_concurrent_sessions,
        "current_sessions": active_sessions,
        "load_warnings": if session_usage > 0.8 {
            vec!["High session usage - consider increasing max_concurrent_sessions"]
        } else {
            vec![]
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;

    #[cfg(target_os = "linux")]
    #[test]
    fn test_memory_info_reads_proc_status() {
        let info = get_memory_info();
        assert_eq!(info["available"], true);
        assert!(info["resident_memory_bytes"].as_u64().unwrap() > 0);
    }

    #[test]
    fn test_system_status_thresholds() {
        let config = AppConfig::default(); // max 10 sessions

        assert_eq!(get_system_status(&config, 0)["status"], "normal");
        assert_eq!(get_system_status(&config, 8)["status"], "moderate_load");
        assert_eq!(get_system_status(&config, 10)["status"], "high_load");
    }
}
