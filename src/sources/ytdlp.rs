use async_trait::async_trait;
use serde::Deserialize;
use std::path::PathBuf;
use tracing::{debug, info, warn};

use super::AudioFormat;
use crate::error::DownloadError;

/// Qué debe descargar yt-dlp
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaTarget {
    /// Enlace directo a un vídeo o pista
    Url(String),
    /// Resultado número `rank` (desde 1) de una búsqueda en YouTube
    Search { query: String, rank: u32 },
}

impl MediaTarget {
    pub fn describe(&self) -> String {
        match self {
            MediaTarget::Url(url) => url.clone(),
            MediaTarget::Search { query, rank } => format!("'{}' (resultado #{})", query, rank),
        }
    }
}

/// Parámetros de una descarga concreta
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchJob {
    pub format: AudioFormat,
    /// Plantilla `-o` de yt-dlp, p. ej. `downloads/%(title)s.%(ext)s`
    pub output_template: String,
}

/// Lo que yt-dlp informa tras mover el archivo final
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractedMedia {
    pub title: Option<String>,
    pub path: Option<PathBuf>,
}

/// Biblioteca de extracción: resuelve un objetivo y deja el audio en disco
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MediaExtractor: Send + Sync {
    async fn fetch(&self, target: &MediaTarget, job: &FetchJob)
        -> Result<ExtractedMedia, DownloadError>;
}

#[derive(Debug, Deserialize)]
struct PrintedInfo {
    title: Option<String>,
    filepath: Option<String>,
}

/// Cliente que ejecuta el binario yt-dlp con extracción de audio vía ffmpeg
pub struct YtDlpClient {
    program: PathBuf,
    ffmpeg_location: Option<PathBuf>,
    cookies_file: Option<PathBuf>,
    audio_quality: u32,
}

impl YtDlpClient {
    pub fn new(program: PathBuf, audio_quality: u32) -> Self {
        Self {
            program,
            ffmpeg_location: None,
            cookies_file: None,
            audio_quality,
        }
    }

    pub fn with_ffmpeg_location(mut self, ffmpeg: PathBuf) -> Self {
        self.ffmpeg_location = Some(ffmpeg);
        self
    }

    pub fn with_cookies(mut self, cookies: Option<PathBuf>) -> Self {
        self.cookies_file = cookies;
        self
    }

    /// Argumentos completos para una descarga
    pub fn build_args(&self, target: &MediaTarget, job: &FetchJob) -> Vec<String> {
        let mut args: Vec<String> = vec![
            "--format".into(),
            "bestaudio/best".into(),
            "--extract-audio".into(),
            "--audio-format".into(),
            job.format.extension().into(),
            "--audio-quality".into(),
            format!("{}K", self.audio_quality),
            "--no-playlist".into(),
            "--windows-filenames".into(),
            "--no-progress".into(),
            "--no-simulate".into(),
            "--print".into(),
            "after_move:%(.{title,filepath})j".into(),
            "--output".into(),
            job.output_template.clone(),
        ];

        if let Some(ffmpeg) = &self.ffmpeg_location {
            args.push("--ffmpeg-location".into());
            args.push(ffmpeg.display().to_string());
        }

        if let Some(cookies) = &self.cookies_file {
            args.push("--cookies".into());
            args.push(cookies.display().to_string());
        }

        match target {
            MediaTarget::Url(url) => args.push(url.clone()),
            MediaTarget::Search { query, rank } => {
                args.push("--playlist-items".into());
                args.push(rank.to_string());
                args.push(format!("ytsearch{}:{}", rank, query));
            }
        }

        args
    }

    /// Interpreta la salida de `--print after_move:...`
    fn parse_printed(stdout: &str) -> Result<ExtractedMedia, DownloadError> {
        let Some(line) = stdout.lines().rev().find(|l| !l.trim().is_empty()) else {
            return Ok(ExtractedMedia::default());
        };

        let info: PrintedInfo =
            serde_json::from_str(line.trim()).map_err(|e| DownloadError::InvalidOutput {
                tool: "yt-dlp".to_string(),
                reason: e.to_string(),
            })?;

        Ok(ExtractedMedia {
            title: info.title,
            path: info.filepath.map(PathBuf::from),
        })
    }
}

#[async_trait]
impl MediaExtractor for YtDlpClient {
    async fn fetch(
        &self,
        target: &MediaTarget,
        job: &FetchJob,
    ) -> Result<ExtractedMedia, DownloadError> {
        info!("⬇️ Descargando {} como {}", target.describe(), job.format);

        let args = self.build_args(target, job);
        debug!("🔧 yt-dlp {:?}", args);

        let output = tokio::process::Command::new(&self.program)
            .args(&args)
            .kill_on_drop(true)
            .output()
            .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!("❌ yt-dlp falló ({:?}): {}", output.status.code(), stderr.trim());
            return Err(DownloadError::from_tool_stderr(
                "yt-dlp",
                output.status.code(),
                &stderr,
            ));
        }

        let media = Self::parse_printed(&String::from_utf8_lossy(&output.stdout))?;
        debug!("📄 yt-dlp informó: {:?}", media);
        Ok(media)
    }
}
