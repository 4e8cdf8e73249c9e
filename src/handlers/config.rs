use crate::{error::AppError, state::AppState};
use actix_web::{web, HttpResponse};
use serde_json::json;

/// `GET /api/v1/config` - the effective configuration plus the fixed audio format.
pub async fn get_config(state: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    let config = state.get_config();

    Ok(HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "config": {
            "server": {
                "host": config.server.host,
                "port": config.server.port,
                "client_page": config.server.client_page
            },
            "audio": {
                "device": config.audio.device,
                "queue_capacity": config.audio.queue_capacity,
                "subscriber_queue_capacity": config.audio.subscriber_queue_capacity,
                "sample_rate": crate::audio::SAMPLE_RATE,
                "channels": crate::audio::CHANNELS,
                "frame_samples": crate::audio::FRAME_SAMPLES
            },
            "transport": {
                "ice_servers": config.transport.ice_servers,
                "opus_bitrate": config.transport.opus_bitrate
            },
            "performance": {
                "max_concurrent_sessions": config.performance.max_concurrent_sessions
            }
        }
    })))
}
