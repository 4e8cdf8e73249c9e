use crate::{error::AppError, state::AppState};
use actix_web::{http::header::ContentType, web, HttpResponse};
use tracing::warn;

/// Built-in browser player.
const CLIENT_PAGE: &str = include_str!("../../static/client.html");

/// `GET /` - serves the player page.
///
/// `server.client_page` replaces the built-in page with a file from disk;
/// if that file cannot be read the built-in page is served instead.
pub async fn index(state: web::Data<AppState>) -> HttpResponse {
    let page = match &state.get_config().server.client_page {
        Some(path) => match tokio::fs::read_to_string(path).await {
            Ok(page) => page,
            Err(e) => {
                warn!(path = %path, error = %e, "Failed to read client page, using built-in page");
                CLIENT_PAGE.to_string()
            }
        },
        None => CLIENT_PAGE.to_string(),
    };

    HttpResponse::Ok()
        .content_type(ContentType::html())
        .body(page)
}

/// `POST /offer` - answers a `{sdp, type}` offer.
///
/// The raw body is handed to the signaling layer so that every malformed
/// description, including non-JSON bodies, maps to the same 400 error.
pub async fn offer(state: web::Data<AppState>, body: web::Bytes) -> Result<HttpResponse, AppError> {
    let answer = state.stream.handle_offer(&body).await?;
    Ok(HttpResponse::Ok().json(answer))
}

#[cfg(test)]
mod tests {
    use crate::config::AppConfig;
    use crate::handlers::configure;
    use crate::service::StreamService;
    use crate::state::AppState;
    use crate::testing::{offer_json, FakeHost, FakeTransport};
    use actix_web::{http::StatusCode, test, web, App};
    use serde_json::Value;
    use std::sync::Arc;

    fn app_state(transport: Arc<FakeTransport>, start: bool) -> AppState {
        let config = AppConfig::default();
        let host = Arc::new(FakeHost::new(&["Microphone", "CABLE Output (VB-Audio)"]));
        let stream = Arc::new(StreamService::new(&config, host, transport));
        if start {
            stream.on_start().expect("capture starts");
        }
        AppState::new(config, stream)
    }

    macro_rules! init_app {
        ($state:expr) => {
            test::init_service(
                App::new()
                    .app_data(web::Data::new($state))
                    .configure(configure),
            )
            .await
        };
    }

    fn post_offer(body: String) -> test::TestRequest {
        test::TestRequest::post()
            .uri("/offer")
            .insert_header(("content-type", "application/json"))
            .set_payload(body)
    }

    #[actix_web::test]
    async fn test_index_serves_player_page() {
        let app = init_app!(app_state(Arc::new(FakeTransport::new()), true));

        let resp = test::call_service(&app, test::TestRequest::get().uri("/").to_request()).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let content_type = resp
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        assert!(content_type.starts_with("text/html"));

        let body = test::read_body(resp).await;
        assert!(String::from_utf8_lossy(&body).contains("RTCPeerConnection"));
    }

    #[actix_web::test]
    async fn test_offer_is_answered() {
        let transport = Arc::new(FakeTransport::new());
        let state = app_state(transport.clone(), true);
        let stream = state.stream.clone();
        let app = init_app!(state);

        let resp = test::call_service(&app, post_offer(offer_json()).to_request()).await;
        assert_eq!(resp.status(), StatusCode::OK);

        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["type"], "answer");
        assert!(body["sdp"].as_str().is_some_and(|sdp| sdp.starts_with("v=0")));

        assert_eq!(stream.registry().active_count(), 1);
        assert_eq!(transport.sessions().len(), 1);
        assert!(transport.sessions()[0].has_source());

        stream.on_stop().await;
    }

    #[actix_web::test]
    async fn test_offer_without_sdp_is_rejected() {
        let transport = Arc::new(FakeTransport::new());
        let state = app_state(transport.clone(), true);
        let stream = state.stream.clone();
        let app = init_app!(state);

        let request = post_offer(r#"{"type":"offer"}"#.to_string()).to_request();
        let resp = test::call_service(&app, request).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["error"]["type"], "bad_request");
        assert_eq!(stream.registry().active_count(), 0);
        assert!(transport.sessions().is_empty());

        stream.on_stop().await;
    }

    #[actix_web::test]
    async fn test_offer_while_not_streaming_is_unavailable() {
        let app = init_app!(app_state(Arc::new(FakeTransport::new()), false));

        let resp = test::call_service(&app, post_offer(offer_json()).to_request()).await;
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);

        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["error"]["type"], "service_unavailable");
    }

    #[actix_web::test]
    async fn test_rejected_negotiation_leaves_no_session() {
        let transport = Arc::new(FakeTransport::new());
        transport.reject_negotiation(true);
        let state = app_state(transport.clone(), true);
        let stream = state.stream.clone();
        let app = init_app!(state);

        let resp = test::call_service(&app, post_offer(offer_json()).to_request()).await;
        assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);

        assert_eq!(stream.registry().active_count(), 0);
        assert!(transport.sessions()[0].is_closed());

        stream.on_stop().await;
    }

    #[actix_web::test]
    async fn test_health_reflects_stream_state() {
        let app = init_app!(app_state(Arc::new(FakeTransport::new()), true));
        let resp = test::call_service(&app, test::TestRequest::get().uri("/health").to_request()).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["stream"]["device"], "CABLE Output (VB-Audio)");

        let app = init_app!(app_state(Arc::new(FakeTransport::new()), false));
        let resp = test::call_service(
            &app,
            test::TestRequest::get().uri("/api/v1/health").to_request(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[actix_web::test]
    async fn test_config_reports_audio_format() {
        let app = init_app!(app_state(Arc::new(FakeTransport::new()), false));

        let resp = test::call_service(
            &app,
            test::TestRequest::get().uri("/api/v1/config").to_request(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::OK);

        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["config"]["audio"]["sample_rate"], 48_000);
        assert_eq!(body["config"]["audio"]["channels"], 2);
        assert_eq!(body["config"]["audio"]["queue_capacity"], 20);
    }
}
