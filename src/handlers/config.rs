use crate::{error::AppError, state::AppState};
use actix_web::{web, HttpResponse};
use serde_json::json;

/// Current configuration with credentials masked.
pub async fn get_config(state: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    let config = state.get_config();
    let unresolved = config.unresolved_keys();

    Ok(HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "config": config.redacted(),
        "unresolved_keys": unresolved
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::tests::test_state;
    use actix_web::{test as actix_test, App};

    #[actix_web::test]
    async fn test_config_is_redacted() {
        let state = web::Data::new(test_state(3));
        state.config.write().unwrap().llm.api_key = "sk-live-secret".to_string();

        let app = actix_test::init_service(
            App::new()
                .app_data(state.clone())
                .route("/api/v1/config", web::get().to(get_config)),
        )
        .await;

        let req = actix_test::TestRequest::get().uri("/api/v1/config").to_request();
        let body: serde_json::Value = actix_test::call_and_read_body_json(&app, req).await;

        assert_eq!(body["config"]["llm"]["api_key"], "***");
        assert_eq!(body["config"]["performance"]["max_concurrent_sessions"], 3);
        assert!(!body.to_string().contains("sk-live-secret"));
    }
}
