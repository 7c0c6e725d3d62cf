//! # Health and Metrics Endpoints
//!
//! Operational views of the relay. Neither endpoint reveals the provider
//! credential; only whether one is configured.

use crate::state::{AppMetrics, AppState};
use actix_web::{web, HttpResponse};
use serde_json::json;
use std::process;

/// `GET /health` and `GET /api/v1/health`
pub async fn health_check(state: web::Data<AppState>) -> HttpResponse {
    let metrics = state.get_metrics_snapshot();
    let config = state.config();

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
            "error_rate": error_rate(&metrics),
            "active_streams": metrics.active_streams
        },
        "providers": {
            "base_url": config.providers.base_url,
            "credential_configured": config.has_api_key(),
            "transcription_model": state.transcriber.model(),
            "completion_model": state.completions.model()
        },
        "memory": get_memory_info()
    }))
}

/// `GET /api/v1/metrics`
pub async fn detailed_metrics(state: web::Data<AppState>) -> HttpResponse {
    let metrics = state.get_metrics_snapshot();
    let uptime_seconds = state.get_uptime_seconds();

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
            "error_rate": error_rate(&metrics),
            "requests_per_second": if uptime_seconds > 0 {
                metrics.request_count as f64 / uptime_seconds as f64
            } else {
                0.0
            }
        },
        "streams": {
            "active": metrics.active_streams,
            "completed": metrics.completed_streams,
            "truncated": metrics.truncated_streams,
            "cancelled": metrics.cancelled_streams
        },
        "uploads": {
            "directory": state.artifacts.dir().display().to_string(),
            "max_upload_bytes": state.config().uploads.max_upload_bytes,
            "cleanup_failures": metrics.cleanup_failures
        },
        "endpoints": endpoint_stats,
        "memory": get_memory_info()
    }))
}

fn error_rate(metrics: &AppMetrics) -> f64 {
    if metrics.request_count > 0 {
        metrics.error_count as f64 / metrics.request_count as f64
    } else {
        0.0
    }
}

fn get_memory_info() -> serde_json::Value {
    #[cfg(target_os = "linux")]
    {
        let pid = process::id();
        if let Ok(status) = std::fs::read_to_string(format!("/proc/{}/status", pid)) {
            let kib = |prefix: &str| -> u64 {
                status
                    .lines()
                    .find(|line| line.starts_with(prefix))
                    .and_then(|line| line.split_whitespace().nth(1))
                    .and_then(|value| value.parse::<u64>().ok())
                    .unwrap_or(0)
            };

            return json!({
                "resident_memory_bytes": kib("VmRSS:") * 1024,
                "virtual_memory_bytes": kib("VmSize:") * 1024,
                "available": true
            });
        }
    }

    json!({
        "pid": process::id(),
        "available": false,
        "note": "Memory info not available on this platform"
    })
}
