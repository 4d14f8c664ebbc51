use std::fmt;

/// Plataforma de origen de un enlace
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Spotify,
    SoundCloud,
    YouTube,
    Unknown,
}

impl Platform {
    /// Clasifica un enlace por subcadenas de dominio.
    ///
    /// El orden es fijo: Spotify, SoundCloud, YouTube. No se normaliza ni se
    /// siguen redirecciones.
    pub fn classify(url: &str) -> Self {
        if url.contains("spotify.com") {
            Platform::Spotify
        } else if url.contains("soundcloud.com") {
            Platform::SoundCloud
        } else if url.contains("youtube.com") || url.contains("youtu.be") {
            Platform::YouTube
        } else {
            Platform::Unknown
        }
    }

    /// Spotify y SoundCloud se resuelven por título y búsqueda en YouTube
    pub fn needs_search(&self) -> bool {
        matches!(self, Platform::Spotify | Platform::SoundCloud)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Spotify => "Spotify",
            Platform::SoundCloud => "SoundCloud",
            Platform::YouTube => "YouTube",
            Platform::Unknown => "Desconocida",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
