use crate::auth::{require_role, CurrentUser};
use crate::db::models::Role;
use crate::error::AppError;
use crate::state::AppState;
use actix_web::{web, HttpResponse};
use serde_json::json;
use std::process;

pub async fn health_check(state: web::Data<AppState>) -> HttpResponse {
    let metrics = state.get_metrics_snapshot();
    let config = state.get_config();
    let uptime_seconds = state.get_uptime_seconds();
    let engine = state.engine.get_performance_stats();

    let database = match state.db.conn().and_then(|conn| {
        conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
            .map_err(AppError::from)
    }) {
        Ok(_) => "ok",
        Err(_) => "unavailable",
    };

    HttpResponse::Ok().json(json!({
        "status": if database == "ok" { "healthy" } else { "degraded" },
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": uptime_seconds,
        "service": {
            "name": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION"),
            "host": config.server.host,
            "port": config.server.port
        },
        "metrics": {
            "total_requests": metrics.request_count,
            "total_errors": metrics.error_count,
            "error_rate": if metrics.request_count > 0 {
                metrics.error_count as f64 / metrics.request_count as f64
            } else {
                0.0
            },
            "active_transcriptions": state.active_transcriptions()
        },
        "memory": get_memory_info(),
        "database": database,
        "transcription": {
            "provider": engine.provider,
            "model": config.transcription.model,
            "configured": !config.transcription.api_key.is_empty()
        },
        "system": get_system_status(engine.in_flight, engine.max_concurrent)
    }))
}

pub async fn detailed_metrics(state: web::Data<AppState>, user: CurrentUser) -> Result<HttpResponse, AppError> {
    require_role(&user, Role::Admin)?;

    let metrics = state.get_metrics_snapshot();
    let uptime_seconds = state.get_uptime_seconds();
    let config = state.get_config();

    let mut endpoint_stats = Vec::new();
    for (endpoint, metric) in metrics.endpoint_metrics.iter() {
        endpoint_stats.push(json!({
            "endpoint": endpoint,
            "request_count": metric.request_count,
            "error_count": metric.error_count,
            "error_rate": metric.error_rate(),
            "average_duration_ms": metric.average_duration_ms(),
            "total_duration_ms": metric.total_duration_ms
        }));
    }

    Ok(HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": uptime_seconds,
        "overall": {
            "total_requests": metrics.request_count,
            "total_errors": metrics.error_count,
            "error_rate": if metrics.request_count > 0 {
                metrics.error_count as f64 / metrics.request_count as f64
            } else {
                0.0
            },
            "active_transcriptions": state.active_transcriptions(),
            "requests_per_second": if uptime_seconds > 0 {
                metrics.request_count as f64 / uptime_seconds as f64
            } else {
                0.0
            }
        },
        "endpoints": endpoint_stats,
        "memory": get_memory_info(),
        "transcription": state.engine.get_performance_stats(),
        "retention": {
            "enabled": config.retention.enabled,
            "inactive_days": config.retention.inactive_days,
            "sweep_interval_hours": config.retention.sweep_interval_hours,
            "tiers": config.retention.tiers
        }
    })))
}

fn get_memory_info() -> serde_json::Value {
    let pid = process::id();

    #[cfg(target_os = "linux")]
    {
        if let Ok(status) = std::fs::read_to_string(format!("/proc/{}/status", pid)) {
            let mut vm_rss = 0;
            let mut vm_size = 0;

            for line in status.lines() {
                if line.starts_with("VmRSS:") {
                    if let Some(kb_str) = line.split_whitespace().nth(1) {
                        vm_rss = kb_str.parse::<u64>().unwrap_or(0) * 1024;
                    }
                } else if line.starts_with("VmSize:") {
                    if let Some(kb_str) = line.split_whitespace().nth(1) {
                        vm_size = kb_str.parse::<u64>().unwrap_or(0) * 1024;
                    }
                }
            }

            return json!({
                "resident_memory_bytes": vm_rss,
                "virtual_memory_bytes": vm_size,
                "available": true
            });
        }
    }

    let _ = pid;
    json!({
        "resident_memory_bytes": 0,
        "virtual_memory_bytes": 0,
        "available": false,
        "note": "Memory info not available on this platform"
    })
}

/// Load classification from transcription slot usage.
fn get_system_status(in_flight: u64, max_concurrent: usize) -> serde_json::Value {
    let usage = if max_concurrent > 0 {
        in_flight as f64 / max_concurrent as f64
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
        "transcription_usage_percent": (usage * 100.0).round(),
        "max_concurrent_transcriptions": max_concurrent,
        "current_transcriptions": in_flight,
        "load_warnings": if usage > 0.8 {
            vec!["High transcription load - consider increasing transcription.max_concurrent"]
        } else {
            vec![]
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_status_levels() {
        assert_eq!(get_system_status(0, 4)["status"], "normal");
        assert_eq!(get_system_status(3, 4)["status"], "moderate_load");
        assert_eq!(get_system_status(4, 4)["status"], "high_load");
        assert_eq!(get_system_status(4, 4)["load_warnings"].as_array().unwrap().len(), 1);
    }
}
