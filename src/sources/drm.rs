use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::error::DownloadError;

/// Extensiones que se aceptan como salida del descargador externo
pub const RECOGNIZED_EXTENSIONS: &[&str] =
    &["mp3", "wav", "aac", "m4a", "flac", "ogg", "opus", "webm", "mp4"];

/// Descargador alternativo para contenido con DRM
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DrmDownloader: Send + Sync {
    /// Descarga `url` dentro de `dest_dir` y devuelve el archivo producido
    async fn fetch(&self, url: &str, dest_dir: &Path) -> Result<PathBuf, DownloadError>;
}

/// Binario externo invocado como `<program> --url <url> --output <dir>`.
///
/// El éxito se decide solo por el código de salida; el archivo se localiza
/// buscando extensiones conocidas en el directorio.
pub struct ExternalDrmDownloader {
    program: PathBuf,
}

impl ExternalDrmDownloader {
    pub fn new(program: PathBuf) -> Self {
        Self { program }
    }

    pub fn program_name(&self) -> String {
        self.program
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.program.display().to_string())
    }

    /// Primer archivo (por nombre) con una extensión reconocida
    pub async fn find_output(dir: &Path) -> Result<PathBuf, DownloadError> {
        let mut entries = tokio::fs::read_dir(dir).await?;
        let mut candidates = Vec::new();

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if !entry.file_type().await?.is_file() {
                continue;
            }

            let recognized = path
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| RECOGNIZED_EXTENSIONS.contains(&e.to_lowercase().as_str()))
                .unwrap_or(false);

            if recognized {
                candidates.push(path);
            } else {
                debug!("🔍 Ignorando {}", path.display());
            }
        }

        candidates.sort();
        candidates
            .into_iter()
            .next()
            .ok_or_else(|| DownloadError::MissingOutput(dir.to_path_buf()))
    }
}

#[async_trait]
impl DrmDownloader for ExternalDrmDownloader {
    async fn fetch(&self, url: &str, dest_dir: &Path) -> Result<PathBuf, DownloadError> {
        info!("🔐 Usando descargador DRM {} para: {}", self.program_name(), url);

        let output = tokio::process::Command::new(&self.program)
            .arg("--url")
            .arg(url)
            .arg("--output")
            .arg(dest_dir)
            .kill_on_drop(true)
            .output()
            .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            warn!("❌ {} terminó con {:?}", self.program_name(), output.status.code());
            return Err(DownloadError::ToolFailed {
                tool: self.program_name(),
                code: output.status.code(),
                stderr,
            });
        }

        let path = Self::find_output(dest_dir).await?;
        info!("✅ Descargador DRM produjo: {}", path.display());
        Ok(path)
    }
}
