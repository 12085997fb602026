use crate::exam::session::RegistrySummary;
use crate::state::AppState;
use actix_web::{web, HttpResponse};
use serde_json::json;

pub async fn health_check(state: web::Data<AppState>) -> HttpResponse {
    let metrics = state.get_metrics_snapshot();
    let config = state.get_config();
    let sessions = state.sessions.summary().await;

    HttpResponse::Ok().json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": state.get_uptime_seconds(),
        "service": {
            "name": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION"),
            "host": config.server.host,
            "port": config.server.port
        },
        "metrics": {
            "total_requests": metrics.request_count,
            "total_errors": metrics.error_count,
            "error_rate": error_rate(metrics.error_count, metrics.request_count),
            "active_connections": metrics.active_connections
        },
        "ai_service": {
            "base_url": config.ai.base_url,
            "timeout_secs": config.ai.timeout_secs
        },
        "question_pool": {
            "issued": state.pipeline.questions().pool().len(),
            "capacity": state.pipeline.questions().pool().capacity()
        },
        "memory": memory_info(),
        "system": load_status(&sessions)
    }))
}

pub async fn detailed_metrics(state: web::Data<AppState>) -> HttpResponse {
    let metrics = state.get_metrics_snapshot();
    let uptime_seconds = state.get_uptime_seconds();
    let sessions = state.sessions.summary().await;

    let mut endpoint_stats: Vec<_> = metrics
        .endpoint_metrics
        .iter()
        .map(|(endpoint, metric)| {
            json!({
                "endpoint": endpoint,
                "request_count": metric.request_count,
                "error_count": metric.error_count,
                "error_rate": metric.error_rate(),
                "average_duration_ms": metric.average_duration_ms(),
                "total_duration_ms": metric.total_duration_ms
            })
        })
        .collect();
    endpoint_stats.sort_by(|a, b| a["endpoint"].as_str().cmp(&b["endpoint"].as_str()));

    HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": uptime_seconds,
        "overall": {
            "total_requests": metrics.request_count,
            "total_errors": metrics.error_count,
            "error_rate": error_rate(metrics.error_count, metrics.request_count),
            "requests_per_second": if uptime_seconds > 0 {
                metrics.request_count as f64 / uptime_seconds as f64
            } else {
                0.0
            }
        },
        "connections": {
            "active": metrics.active_connections,
            "total": metrics.total_connections
        },
        "sessions": sessions,
        "endpoints": endpoint_stats,
        "memory": memory_info()
    }))
}

fn error_rate(errors: u64, requests: u64) -> f64 {
    if requests > 0 {
        errors as f64 / requests as f64
    } else {
        0.0
    }
}

#[cfg(target_os = "linux")]
fn memory_info() -> serde_json::Value {
    let Ok(status) = std::fs::read_to_string("/proc/self/status") else {
        return json!({ "available": false });
    };

    let field_bytes = |name: &str| {
        status
            .lines()
            .find(|line| line.starts_with(name))
            .and_then(|line| line.split_whitespace().nth(1))
            .and_then(|kb| kb.parse::<u64>().ok())
            .map(|kb| kb * 1024)
            .unwrap_or(0)
    };

    json!({
        "resident_memory_bytes": field_bytes("VmRSS:"),
        "virtual_memory_bytes": field_bytes("VmSize:"),
        "available": true
    })
}

#[cfg(not(target_os = "linux"))]
fn memory_info() -> serde_json::Value {
    json!({
        "available": false,
        "note": "Memory info not available on this platform"
    })
}

fn load_status(sessions: &RegistrySummary) -> serde_json::Value {
    let usage = if sessions.max_sessions > 0 {
        sessions.total_sessions as f64 / sessions.max_sessions as f64
    } else {
        0.0
    };

    let status = if usage > 0.9 {
        "high_load"
    } else if usage > 0.7 {
        "moderate_load"
    } else {
        "normal"
    };

    json!({
        "status": status,
        "session_usage_percent": (usage * 100.0).round(),
        "max_sessions": sessions.max_sessions,
        "current_sessions": sessions.total_sessions,
        "connected_sessions": sessions.connected_sessions,
        "load_warnings": if usage > 0.8 {
            vec!["High session usage - consider increasing max_concurrent_sessions"]
        } else {
            vec![]
        }
    })
}
