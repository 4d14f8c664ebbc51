use regex::Regex;
use std::path::PathBuf;
use std::sync::OnceLock;
use thiserror::Error;

fn drm_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\bdrm\b").expect("regex DRM válida"))
}

fn blocked_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\b(403|forbidden)\b").expect("regex 403 válida"))
}

/// Errores del pipeline de descarga.
///
/// Internamente son estructurados; la UI los convierte una sola vez en un
/// mensaje legible con [`DownloadError::user_message`].
#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("no se proporcionó ningún enlace")]
    EmptyUrl,

    #[error("plataforma no soportada: {0}")]
    UnsupportedPlatform(String),

    #[error("formato de salida no soportado: {0}")]
    UnsupportedFormat(String),

    #[error("acceso bloqueado por la fuente: {0}")]
    Blocked(String),

    #[error("contenido protegido por DRM: {0}")]
    Drm(String),

    #[error("no se pudieron obtener metadatos de {url}: {reason}")]
    MetadataUnavailable { url: String, reason: String },

    #[error("búsqueda agotada para '{query}' tras {attempts} intentos: {last}")]
    SearchExhausted {
        query: String,
        attempts: u32,
        last: Box<DownloadError>,
    },

    #[error("archivo de salida no encontrado: {}", .0.display())]
    MissingOutput(PathBuf),

    #[error("{tool} terminó con código {code:?}: {stderr}")]
    ToolFailed {
        tool: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("error de E/S: {0}")]
    Io(#[from] std::io::Error),

    #[error("error HTTP: {0}")]
    Http(#[from] reqwest::Error),

    #[error("respuesta inválida de {tool}: {reason}")]
    InvalidOutput { tool: String, reason: String },
}

impl DownloadError {
    /// Clasifica el stderr de una herramienta externa.
    ///
    /// Solo cuentan las líneas `ERROR:`; los `WARNING:` de reintentos previos
    /// no deciden la categoría. Sin líneas `ERROR:` se usa el texto completo.
    /// El orden importa: un mensaje de DRM suele llevar también un 403.
    pub fn from_tool_stderr(tool: &str, code: Option<i32>, stderr: &str) -> Self {
        let detail = stderr.trim().to_string();
        let errors: Vec<&str> = stderr
            .lines()
            .map(str::trim_start)
            .filter(|l| l.starts_with("ERROR:"))
            .collect();
        let relevant = if errors.is_empty() {
            detail.clone()
        } else {
            errors.join("\n")
        };

        if drm_regex().is_match(&relevant) {
            return DownloadError::Drm(detail);
        }

        if blocked_regex().is_match(&relevant) {
            return DownloadError::Blocked(detail);
        }

        DownloadError::ToolFailed {
            tool: tool.to_string(),
            code,
            stderr: detail,
        }
    }

    pub fn is_blocked(&self) -> bool {
        matches!(self, DownloadError::Blocked(_))
    }

    pub fn is_drm(&self) -> bool {
        matches!(self, DownloadError::Drm(_))
    }

    /// Mensaje mostrado en la página de resultados
    pub fn user_message(&self) -> String {
        match self {
            DownloadError::EmptyUrl => "Introduce un enlace válido.".to_string(),
            DownloadError::UnsupportedPlatform(_) => {
                "Plataforma no soportada. Usa un enlace de YouTube, SoundCloud o Spotify.".to_string()
            }
            DownloadError::Blocked(_) => {
                "El contenido está bloqueado (403). Puede ser privado o estar restringido por región."
                    .to_string()
            }
            DownloadError::Drm(_) => {
                "El contenido está protegido por DRM y no hay descargador alternativo configurado."
                    .to_string()
            }
            DownloadError::SearchExhausted { query, attempts, .. } => format!(
                "No se encontró una versión descargable de '{}' tras {} intentos.",
                query, attempts
            ),
            DownloadError::MissingOutput(_) => {
                "La conversión terminó pero no se encontró el archivo de audio.".to_string()
            }
            other => format!("Error durante la descarga: {}", other),
        }
    }
}
