use anyhow::Result;
use std::sync::Arc;
use tracing::{error, info};

mod config;
mod error;
mod pipeline;
mod sources;
mod storage;
mod transcode;
mod ui;

use crate::config::Config;
use crate::pipeline::Pipeline;
use crate::ui::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    // Inicializar logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("open_music_dl=debug".parse()?)
                .add_directive("hyper=info".parse()?),
        )
        .init();

    info!("🎵 Iniciando Open Music DL v{}", env!("CARGO_PKG_VERSION"));

    // Cargar configuración
    let config = Config::load()?;
    info!("{}", config.summary());

    if std::env::args().any(|arg| arg == "--health-check") {
        return health_check(&config).await;
    }

    let pipeline = Pipeline::from_config(&config)?;
    if pipeline.has_drm_fallback() {
        info!("🔐 Descargador DRM alternativo activado");
    }

    let state = AppState {
        pipeline: Arc::new(pipeline),
        default_format: config.default_format,
    };
    let app = ui::router(state);

    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    info!("🚀 Servidor escuchando en http://{}", config.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Error al registrar Ctrl+C: {}", e);
            }
            info!("⚠️ Señal de shutdown recibida, cerrando...");
        })
        .await?;

    Ok(())
}

async fn health_check(config: &Config) -> Result<()> {
    // Verificar dependencias críticas
    let yt_dlp = async_process::Command::new(&config.ytdlp_path)
        .arg("--version")
        .output()
        .await?;

    let ffmpeg = async_process::Command::new(&config.ffmpeg_path)
        .arg("-version")
        .output()
        .await?;

    if yt_dlp.status.success() && ffmpeg.status.success() {
        println!("OK");
        Ok(())
    } else {
        anyhow::bail!("Dependencias faltantes");
    }
}
