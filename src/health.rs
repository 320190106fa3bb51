use crate::state::AppState;
use actix_web::{web, HttpResponse};
use serde_json::json;

pub async fn health_check(state: web::Data<AppState>) -> HttpResponse {
    let metrics = state.get_metrics_snapshot();
    let config = &state.config;
    let active_sessions = state.sessions.session_count().await;

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
            "error_rate": metrics.error_rate(),
            "diagnoses_succeeded": metrics.diagnoses_succeeded,
            "diagnoses_failed": metrics.diagnoses_failed,
            "active_chat_sessions": active_sessions
        },
        "collaborators": {
            "diagnostic_engine": state.orchestrator.engine_description(),
            "report_store": state.orchestrator.publisher_description(),
            "chat_model": state.sessions.model_name(),
            "chat_api_key_configured": !config.chat.api_key.is_empty()
        },
        "memory": get_memory_info()
    }))
}

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
            "error_rate": metrics.error_rate(),
            "requests_per_second": if uptime_seconds > 0 {
                metrics.request_count as f64 / uptime_seconds as f64
            } else {
                0.0
            }
        },
        "diagnosis": {
            "succeeded": metrics.diagnoses_succeeded,
            "failed": metrics.diagnoses_failed
        },
        "chat": {
            "active_sessions": state.sessions.session_count().await,
            "max_sessions": state.config.chat.max_sessions,
            "max_history": state.config.chat.max_history
        },
        "endpoints": endpoint_stats,
        "memory": get_memory_info()
    }))
}

/// Resident and virtual memory of this process, read from `/proc` on Linux.
fn get_memory_info() -> serde_json::Value {
    #[cfg(target_os = "linux")]
    {
        let pid = std::process::id();
        if let Ok(status) = std::fs::read_to_string(format!("/proc/{}/status", pid)) {
            let kib = |prefix: &str| {
                status
                    .lines()
                    .find(|line| line.starts_with(prefix))
                    .and_then(|line| line.split_whitespace().nth(1))
                    .and_then(|kb| kb.parse::<u64>().ok())
                    .unwrap_or(0)
                    * 1024
            };

            return json!({
                "resident_memory_bytes": kib("VmRSS:"),
                "virtual_memory_bytes": kib("VmSize:"),
                "available": true
            });
        }
    }

    json!({
        "resident_memory_bytes": 0,
        "virtual_memory_bytes": 0,
        "available": false,
        "note": "Memory info not available on this platform"
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::tests::test_state;
    use actix_web::{test, App};
    use serde_json::Value;

    #[actix_web::test]
    async fn test_health_reports_collaborators_and_counts() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(dir.path());
        state.record_diagnosis(true);
        state.sessions.respond("s1", "hello").await.unwrap();

        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .route("/health", web::get().to(health_check)),
        )
        .await;
        let req = test::TestRequest::get().uri("/health").to_request();
        let resp: Value = test::call_and_read_body_json(&app, req).await;

        assert_eq!(resp["status"], "healthy");
        assert_eq!(resp["metrics"]["diagnoses_succeeded"], 1);
        assert_eq!(resp["metrics"]["active_chat_sessions"], 1);
        assert_eq!(resp["collaborators"]["chat_model"], "mixtral-8x7b-32768");
        assert_eq!(resp["collaborators"]["chat_api_key_configured"], false);
    }

    #[actix_web::test]
    async fn test_metrics_lists_endpoints_sorted() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(dir.path());
        state.record_endpoint_request("POST /process_audio", 40, true);
        state.record_endpoint_request("POST /chat", 10, false);

        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .route("/api/v1/metrics", web::get().to(detailed_metrics)),
        )
        .await;
        let req = test::TestRequest::get().uri("/api/v1/metrics").to_request();
        let resp: Value = test::call_and_read_body_json(&app, req).await;

        let endpoints = resp["endpoints"].as_array().unwrap();
        assert_eq!(endpoints.len(), 2);
        assert_eq!(endpoints[0]["endpoint"], "POST /chat");
        assert_eq!(endpoints[1]["error_count"], 1);
    }
}
