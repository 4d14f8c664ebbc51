use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::sources::AudioFormat;

#[derive(Debug, Clone)]
pub struct Config {
    // Servidor
    pub bind_addr: SocketAddr,

    // Paths
    pub download_dir: PathBuf,
    pub ytdlp_path: PathBuf,
    pub ffmpeg_path: PathBuf,
    pub cookies_file: Option<PathBuf>,
    pub drm_downloader: Option<PathBuf>,

    // Audio
    pub audio_quality: u32, // kbps
    pub default_format: AudioFormat,

    // Red
    pub http_timeout: Duration,
    pub user_agent: String,
}

impl Config {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self::from_lookup(|key| std::env::var(key).ok())?;

        // Crear la carpeta de descargas si no existe
        std::fs::create_dir_all(&config.download_dir).with_context(|| {
            format!("No se pudo crear {}", config.download_dir.display())
        })?;

        config.validate()?;

        Ok(config)
    }

    /// Builds the configuration from any key lookup (environment, map in tests).
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        Ok(Self {
            bind_addr: match var("BIND_ADDR") {
                Some(val) => val.parse().context("BIND_ADDR inválido")?,
                None => defaults.bind_addr,
            },

            download_dir: var("DOWNLOAD_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.download_dir),
            ytdlp_path: var("YTDLP_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.ytdlp_path),
            ffmpeg_path: var("FFMPEG_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.ffmpeg_path),
            cookies_file: var("COOKIES_FILE").map(PathBuf::from),
            drm_downloader: var("DRM_DOWNLOADER_PATH").map(PathBuf::from),

            audio_quality: match var("AUDIO_QUALITY") {
                Some(val) => val.parse().context("AUDIO_QUALITY inválido")?,
                None => defaults.audio_quality,
            },
            default_format: match var("DEFAULT_FORMAT") {
                Some(val) => val
                    .parse()
                    .map_err(|e| anyhow::anyhow!("DEFAULT_FORMAT inválido: {}", e))?,
                None => defaults.default_format,
            },

            http_timeout: match var("HTTP_TIMEOUT_SECS") {
                Some(val) => Duration::from_secs(val.parse().context("HTTP_TIMEOUT_SECS inválido")?),
                None => defaults.http_timeout,
            },
            user_agent: var("USER_AGENT").unwrap_or(defaults.user_agent),
        })
    }

    /// Validates configuration values for correctness.
    ///
    /// # Validation Rules
    ///
    /// - Audio quality must be between 32 and 320 kbps
    /// - HTTP timeout must be greater than zero
    /// - The cookies file, when set, must exist
    pub fn validate(&self) -> Result<()> {
        if !(32..=320).contains(&self.audio_quality) {
            anyhow::bail!(
                "Audio quality must be between 32 and 320 kbps, got: {}",
                self.audio_quality
            );
        }

        if self.http_timeout.is_zero() {
            anyhow::bail!("HTTP timeout must be greater than 0");
        }

        if let Some(cookies) = &self.cookies_file {
            if !cookies.exists() {
                anyhow::bail!("Cookies file not found: {}", cookies.display());
            }
        }

        Ok(())
    }

    /// Returns a summary of the current configuration for logging.
    pub fn summary(&self) -> String {
        format!(
            "Config Summary:\n  \
            Server: {}\n  \
            Downloads: {}\n  \
            Tools: yt-dlp={}, ffmpeg={}, drm={}\n  \
            Audio: {} by default, {}kbps\n  \
            Network: {}s timeout, cookies={}",
            self.bind_addr,
            self.download_dir.display(),
            self.ytdlp_path.display(),
            self.ffmpeg_path.display(),
            self.drm_downloader
                .as_ref()
                .map_or("disabled".to_string(), |p| p.display().to_string()),
            self.default_format,
            self.audio_quality,
            self.http_timeout.as_secs(),
            self.cookies_file.is_some(),
        )
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 8501)),

            download_dir: "downloads".into(),
            ytdlp_path: "yt-dlp".into(),
            ffmpeg_path: "ffmpeg".into(),
            cookies_file: None,
            drm_downloader: None,

            audio_quality: 192,
            default_format: AudioFormat::Mp3,

            http_timeout: Duration::from_secs(15),
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36".to_string(),
        }
    }
}
