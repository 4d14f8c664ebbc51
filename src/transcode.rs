use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::error::DownloadError;

/// Envoltorio mínimo sobre ffmpeg para convertir entre contenedores de audio
#[derive(Debug, Clone)]
pub struct Transcoder {
    program: PathBuf,
}

impl Transcoder {
    pub fn new(program: PathBuf) -> Self {
        Self { program }
    }

    pub fn build_args(input: &Path, output: &Path) -> Vec<String> {
        vec![
            "-y".into(),
            "-loglevel".into(),
            "error".into(),
            "-i".into(),
            input.display().to_string(),
            "-vn".into(),
            output.display().to_string(),
        ]
    }

    /// Convierte `input` en `output`; el códec lo decide la extensión de salida
    pub async fn convert(&self, input: &Path, output: &Path) -> Result<(), DownloadError> {
        info!("🎛️ Convirtiendo {} -> {}", input.display(), output.display());

        let result = tokio::process::Command::new(&self.program)
            .args(Self::build_args(input, output))
            .kill_on_drop(true)
            .output()
            .await?;

        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr).trim().to_string();
            warn!("❌ ffmpeg falló: {}", stderr);
            return Err(DownloadError::ToolFailed {
                tool: "ffmpeg".to_string(),
                code: result.status.code(),
                stderr,
            });
        }

        Ok(())
    }
}
