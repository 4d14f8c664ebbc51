use bytes::Bytes;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info, warn};

use crate::error::DownloadError;
use crate::sources::AudioFormat;

/// Nombre usado cuando el título queda vacío tras sanearlo
const FALLBACK_STEM: &str = "audio";

/// Carpeta de descargas compartida.
///
/// Los archivos se llaman `<título-o-nombre>.<ext>`; no hay índice, limpieza
/// ni bloqueo: dos descargas con el mismo nombre se sobrescriben.
#[derive(Debug, Clone)]
pub struct DownloadStore {
    root: PathBuf,
}

impl DownloadStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Crea la carpeta si no existe
    pub async fn ensure(&self) -> Result<(), DownloadError> {
        fs::create_dir_all(&self.root).await?;
        debug!("📁 Carpeta de descargas lista: {}", self.root.display());
        Ok(())
    }

    /// Sanea un nombre para usarlo como nombre de archivo en cualquier sistema
    pub fn sanitize_file_stem(name: &str) -> String {
        let cleaned: String = name
            .chars()
            .map(|c| match c {
                '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
                c if c.is_control() => '_',
                c => c,
            })
            .collect();

        let trimmed = cleaned.trim_matches(|c: char| c == '.' || c.is_whitespace());
        if trimmed.is_empty() {
            FALLBACK_STEM.to_string()
        } else {
            trimmed.to_string()
        }
    }

    pub fn path_for(&self, stem: &str, format: AudioFormat) -> PathBuf {
        self.root.join(format!(
            "{}.{}",
            Self::sanitize_file_stem(stem),
            format.extension()
        ))
    }

    /// Plantilla `-o` para yt-dlp: nombre personalizado o título de la fuente
    pub fn output_template(&self, custom_name: Option<&str>) -> String {
        let stem = match custom_name {
            Some(name) => Self::sanitize_file_stem(name).replace('%', "%%"),
            None => "%(title)s".to_string(),
        };
        self.root
            .join(format!("{}.%(ext)s", stem))
            .display()
            .to_string()
    }

    pub async fn exists(&self, path: &Path) -> bool {
        fs::metadata(path).await.map(|m| m.is_file()).unwrap_or(false)
    }

    /// Lee el archivo completo en memoria para la respuesta
    pub async fn read(&self, path: &Path) -> Result<Bytes, DownloadError> {
        let data = fs::read(path).await?;
        debug!("📖 Leídos {} bytes de {}", data.len(), path.display());
        Ok(Bytes::from(data))
    }

    /// Directorio temporal dentro de la carpeta de descargas
    pub fn staging_dir(&self) -> Result<tempfile::TempDir, DownloadError> {
        Ok(tempfile::Builder::new()
            .prefix(".staging-")
            .tempdir_in(&self.root)?)
    }

    /// Mueve un archivo preparado a `<root>/<stem>.<ext>`, sobrescribiendo
    pub async fn adopt(
        &self,
        staged: &Path,
        stem: &str,
        format: AudioFormat,
    ) -> Result<PathBuf, DownloadError> {
        let target = self.path_for(stem, format);

        if let Err(e) = fs::rename(staged, &target).await {
            warn!("⚠️ rename falló ({}), copiando {}", e, staged.display());
            fs::copy(staged, &target).await?;
            fs::remove_file(staged).await?;
        }

        info!("💾 Archivo guardado en: {}", target.display());
        Ok(target)
    }
}
