use std::fmt;
use std::str::FromStr;

use crate::error::DownloadError;

/// Formato de audio de salida
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AudioFormat {
    #[default]
    Mp3,
    Wav,
    Aac,
    M4a,
    Flac,
    Opus,
}

impl AudioFormat {
    /// Orden en el que aparecen en el selector del formulario
    pub const ALL: [AudioFormat; 6] = [
        AudioFormat::Mp3,
        AudioFormat::Wav,
        AudioFormat::Aac,
        AudioFormat::M4a,
        AudioFormat::Flac,
        AudioFormat::Opus,
    ];

    /// Extensión del archivo y valor de `--audio-format` para yt-dlp
    pub fn extension(&self) -> &'static str {
        match self {
            AudioFormat::Mp3 => "mp3",
            AudioFormat::Wav => "wav",
            AudioFormat::Aac => "aac",
            AudioFormat::M4a => "m4a",
            AudioFormat::Flac => "flac",
            AudioFormat::Opus => "opus",
        }
    }

    pub fn media_type(&self) -> &'static str {
        match self {
            AudioFormat::Mp3 => "audio/mpeg",
            AudioFormat::Wav => "audio/wav",
            AudioFormat::Aac => "audio/aac",
            AudioFormat::M4a => "audio/mp4",
            AudioFormat::Flac => "audio/flac",
            AudioFormat::Opus => "audio/ogg",
        }
    }

    pub fn from_extension(ext: &str) -> Option<Self> {
        ext.parse().ok()
    }
}

impl FromStr for AudioFormat {
    type Err = DownloadError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "mp3" => Ok(AudioFormat::Mp3),
            "wav" => Ok(AudioFormat::Wav),
            "aac" => Ok(AudioFormat::Aac),
            // mp4 solo audio es un contenedor m4a
            "m4a" | "mp4" => Ok(AudioFormat::M4a),
            "flac" => Ok(AudioFormat::Flac),
            "opus" => Ok(AudioFormat::Opus),
            other => Err(DownloadError::UnsupportedFormat(other.to_string())),
        }
    }
}

impl fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}
