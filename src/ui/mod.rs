pub mod pages;

use axum::extract::{Form, State};
use axum::http::StatusCode;
use axum::response::Html;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{error, info};

use crate::error::DownloadError;
use crate::pipeline::{DownloadRequest, Pipeline};
use crate::sources::AudioFormat;
use pages::{FormValues, Status};

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<Pipeline>,
    pub default_format: AudioFormat,
}

/// Campos del formulario tal como llegan en el POST
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DownloadForm {
    pub url: String,
    #[serde(default)]
    pub format: String,
    #[serde(default)]
    pub filename: String,
}

impl DownloadForm {
    pub fn to_request(&self, default_format: AudioFormat) -> Result<DownloadRequest, DownloadError> {
        let format = if self.format.trim().is_empty() {
            default_format
        } else {
            self.format.parse()?
        };

        Ok(DownloadRequest::new(self.url.trim(), format)
            .with_custom_name(Some(self.filename.clone())))
    }

    fn values(&self, default_format: AudioFormat) -> FormValues {
        FormValues {
            url: self.url.clone(),
            format: self.format.parse().unwrap_or(default_format),
            filename: self.filename.clone(),
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/download", post(download))
        .route("/health", get(health))
        .with_state(state)
}

async fn index(State(state): State<AppState>) -> Html<String> {
    let values = FormValues {
        format: state.default_format,
        ..FormValues::default()
    };
    Html(pages::render_page(&values, None))
}

async fn download(
    State(state): State<AppState>,
    Form(form): Form<DownloadForm>,
) -> (StatusCode, Html<String>) {
    info!("📝 Petición de descarga: {} ({})", form.url, form.format);
    let values = form.values(state.default_format);

    let result = match form.to_request(state.default_format) {
        Ok(request) => state.pipeline.run(&request).await,
        Err(err) => Err(err),
    };

    match result {
        Ok(outcome) => (
            StatusCode::OK,
            Html(pages::render_page(&values, Some(Status::Success(&outcome)))),
        ),
        Err(err) => {
            error!("❌ Descarga fallida para {}: {}", form.url, err);
            (
                status_for(&err),
                Html(pages::render_page(
                    &values,
                    Some(Status::Failure(err.user_message())),
                )),
            )
        }
    }
}

async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "download_dir": state.pipeline.store().root().display().to_string(),
        "drm_fallback": state.pipeline.has_drm_fallback(),
    }))
}

/// Código HTTP que acompaña al mensaje de error en la página
pub fn status_for(err: &DownloadError) -> StatusCode {
    match err {
        DownloadError::EmptyUrl | DownloadError::UnsupportedFormat(_) => StatusCode::BAD_REQUEST,
        DownloadError::UnsupportedPlatform(_) => StatusCode::UNPROCESSABLE_ENTITY,
        DownloadError::Blocked(_)
        | DownloadError::Drm(_)
        | DownloadError::SearchExhausted { .. }
        | DownloadError::MetadataUnavailable { .. }
        | DownloadError::Http(_) => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}
