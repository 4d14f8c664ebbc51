use async_trait::async_trait;
use regex::Regex;
use std::sync::OnceLock;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::DownloadError;

/// Sufijos que las plataformas añaden al `<title>` de sus páginas
const TITLE_SUFFIXES: &[&str] = &[
    "| Listen online for free on SoundCloud",
    "| Spotify",
    "- SoundCloud",
];

/// Obtiene un texto usable como consulta de búsqueda a partir de una página
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MetadataResolver: Send + Sync {
    async fn resolve_title(&self, url: &str) -> Result<String, DownloadError>;
}

/// Resuelve el título descargando el HTML y leyendo la etiqueta `<title>`
pub struct PageTitleResolver {
    client: reqwest::Client,
}

impl PageTitleResolver {
    pub fn new(timeout: Duration, user_agent: &str) -> Result<Self, DownloadError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(user_agent)
            .build()?;

        Ok(Self { client })
    }

    /// Extrae y limpia el contenido de `<title>`
    pub fn extract_title(html: &str) -> Option<String> {
        static TITLE_RE: OnceLock<Regex> = OnceLock::new();
        let re = TITLE_RE.get_or_init(|| {
            Regex::new(r"(?is)<title[^>]*>(.*?)</title>").expect("regex de título válida")
        });

        let raw = re.captures(html)?.get(1)?.as_str();
        let mut title = decode_entities(raw)
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ");

        for suffix in TITLE_SUFFIXES {
            if let Some(stripped) = title.strip_suffix(suffix) {
                title = stripped.trim_end().to_string();
            }
        }

        if title.is_empty() {
            None
        } else {
            Some(title)
        }
    }
}

#[async_trait]
impl MetadataResolver for PageTitleResolver {
    async fn resolve_title(&self, url: &str) -> Result<String, DownloadError> {
        let unavailable = |reason: String| DownloadError::MetadataUnavailable {
            url: url.to_string(),
            reason,
        };

        url::Url::parse(url).map_err(|e| unavailable(format!("URL mal formada: {}", e)))?;

        debug!("🌐 Descargando página para metadatos: {}", url);
        let response = self.client.get(url).send().await?;

        if !response.status().is_success() {
            warn!("❌ La página respondió {}: {}", response.status(), url);
            return Err(unavailable(format!("HTTP {}", response.status())));
        }

        let html = response.text().await?;
        let title = Self::extract_title(&html)
            .ok_or_else(|| unavailable("la página no tiene <title>".to_string()))?;

        info!("🏷️ Título resuelto: {}", title);
        Ok(title)
    }
}

fn decode_entities(text: &str) -> String {
    text.replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&#x27;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
}
