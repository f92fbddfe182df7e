use crate::state::AppState;
use actix_web::{web, HttpResponse};
use serde_json::json;
use std::process;

pub async fn health_check(state: web::Data<AppState>) -> HttpResponse {
    let metrics = state.get_metrics_snapshot();
    let config = state.get_config();
    let uptime_seconds = state.get_uptime_seconds();
    let services = &state.services;

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
            "active": metrics.active_sessions,
            "total": metrics.total_sessions,
            "rejected": metrics.rejected_sessions,
            "max": config.performance.max_concurrent_sessions,
            "load": session_load(metrics.active_sessions, config.performance.max_concurrent_sessions)
        },
        "providers": {
            "transcription": {
                "provider": services.transcriber.provider_name(),
                "model": config.stt.model
            },
            "generation": {
                "provider": services.engine.provider_name(),
                "model": config.llm.model
            },
            "synthesis": {
                "provider": services.synthesizer.provider_name(),
                "model": config.tts.model,
                "voice": config.tts.voice
            }
        },
        "tracking": {
            "enabled": state.tracker.is_enabled()
        },
        "memory": get_memory_info()
    }))
}

pub async fn detailed_metrics(state: web::Data<AppState>) -> HttpResponse {
    let metrics = state.get_metrics_snapshot();
    let uptime_seconds = state.get_uptime_seconds();

    let endpoint_stats: Vec<_> = metrics
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

    HttpResponse::Ok().json(json!({
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
            "requests_per_second": if uptime_seconds > 0 {
                metrics.request_count as f64 / uptime_seconds as f64
            } else {
                0.0
            }
        },
        "sessions": {
            "active": metrics.active_sessions,
            "total": metrics.total_sessions,
            "rejected": metrics.rejected_sessions,
            "completed_turns": metrics.completed_turns,
            "by_endpoint": metrics.sessions_by_endpoint,
            "ended": metrics.sessions_ended
        },
        "endpoints": endpoint_stats,
        "memory": get_memory_info()
    }))
}

fn session_load(active: usize, max: usize) -> &'static str {
    let usage = if max > 0 { active as f64 / max as f64 } else { 0.0 };
    if usage > 0.9 {
        "high_load"
    } else if usage > 0.7 {
        "moderate_load"
    } else {
        "normal"
    }
}

fn get_memory_info() -> serde_json::Value {
    #[cfg(target_os = "linux")]
    {
        if let Ok(status) = std::fs::read_to_string(format!("/proc/{}/status", process::id())) {
            let field = |name: &str| {
                status
                    .lines()
                    .find(|line| line.starts_with(name))
                    .and_then(|line| line.split_whitespace().nth(1))
                    .and_then(|kb| kb.parse::<u64>().ok())
                    .unwrap_or(0)
                    * 1024
            };

            return json!({
                "resident_memory_bytes": field("VmRSS:"),
                "virtual_memory_bytes": field("VmSize:"),
                "available": true
            });
        }
    }

    json!({
        "resident_memory_bytes": 0,
        "virtual_memory_bytes": 0,
        "available": false,
        "pid": process::id()
    })
}
