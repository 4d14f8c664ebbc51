use base64::{engine::general_purpose::STANDARD, Engine as _};
use std::fmt::Write as _;
use std::time::Duration;

use crate::pipeline::DownloadOutcome;
use crate::sources::AudioFormat;

/// Paleta de colores estandarizada para la página
pub mod colors {
    pub const SUCCESS_GREEN: &str = "#43b581";
    pub const ERROR_RED: &str = "#dc3545";
    pub const INFO_BLUE: &str = "#3490dc";
    pub const MUSIC_PURPLE: &str = "#8a2be2";
    pub const NEUTRAL_GRAY: &str = "#6c757d";
}

/// Aviso legal al pie de la página
const STANDARD_FOOTER: &str = "Esta aplicación usa yt-dlp y FFmpeg para descargar y convertir el \
    contenido. Úsala respetando los derechos de autor.";

/// Valores con los que se vuelve a rellenar el formulario
#[derive(Debug, Clone, Default)]
pub struct FormValues {
    pub url: String,
    pub format: AudioFormat,
    pub filename: String,
}

/// Mensaje de estado bajo el formulario
#[derive(Debug)]
pub enum Status<'a> {
    Success(&'a DownloadOutcome),
    Failure(String),
}

/// Página completa: formulario y, si lo hay, el estado de la última petición
pub fn render_page(values: &FormValues, status: Option<Status<'_>>) -> String {
    let status_html = match status {
        Some(Status::Success(outcome)) => render_success(outcome),
        Some(Status::Failure(message)) => render_failure(&message),
        None => String::new(),
    };

    format!(
        r#"<!DOCTYPE html>
<html lang="es">
<head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width, initial-scale=1">
<title>🎵 Open Music DL</title>
<style>
body {{ font-family: sans-serif; max-width: 720px; margin: 2rem auto; padding: 0 1rem; }}
h1 {{ color: {purple}; }}
label {{ display: block; margin-top: 1rem; font-weight: bold; }}
input, select {{ width: 100%; padding: .5rem; box-sizing: border-box; }}
button {{ margin-top: 1.5rem; padding: .6rem 1.4rem; background: {purple}; color: #fff; border: 0; cursor: pointer; }}
.status {{ margin-top: 2rem; padding: 1rem; border-left: 4px solid; }}
.ok {{ border-color: {green}; }}
.error {{ border-color: {red}; color: {red}; }}
footer {{ margin-top: 3rem; color: {gray}; font-size: .85rem; border-top: 1px solid {gray}; padding-top: 1rem; }}
</style>
</head>
<body>
<h1>🎵 Descargador universal de audio</h1>
<p>Pega un enlace de YouTube, SoundCloud o Spotify.</p>
<form method="post" action="/download">
<label for="url">🔗 Enlace</label>
<input id="url" name="url" type="url" required value="{url}" placeholder="https://www.youtube.com/watch?v=...">
<label for="format">🎚️ Formato de salida</label>
<select id="format" name="format">{options}</select>
<label for="filename">📝 Nombre del archivo (opcional)</label>
<input id="filename" name="filename" type="text" value="{filename}" placeholder="Se usa el título si se deja vacío">
<button type="submit">⬇️ Descargar</button>
</form>
{status}
<footer>{footer}</footer>
</body>
</html>
"#,
        purple = colors::MUSIC_PURPLE,
        green = colors::SUCCESS_GREEN,
        red = colors::ERROR_RED,
        gray = colors::NEUTRAL_GRAY,
        url = escape_html(&values.url),
        options = render_format_options(values.format),
        filename = escape_html(&values.filename),
        status = status_html,
        footer = STANDARD_FOOTER,
    )
}

fn render_format_options(selected: AudioFormat) -> String {
    let mut html = String::new();
    for format in AudioFormat::ALL {
        let _ = write!(
            html,
            r#"<option value="{ext}"{sel}>{label}</option>"#,
            ext = format.extension(),
            sel = if format == selected { " selected" } else { "" },
            label = format.extension().to_uppercase(),
        );
    }
    html
}

/// Reproductor y enlace de descarga con los bytes incrustados
pub fn render_success(outcome: &DownloadOutcome) -> String {
    let data_uri = format!(
        "data:{};base64,{}",
        outcome.media_type(),
        STANDARD.encode(&outcome.bytes)
    );
    let file_name = escape_html(&outcome.file_name());

    format!(
        r#"<div class="status ok">
<p>✅ Descarga completada: <strong>{title}</strong></p>
<p style="color: {blue}">🔗 Fuente: {platform} · 💾 {size} · ⏱️ {elapsed}</p>
<audio controls><source src="{uri}" type="{media}"></audio>
<p><a href="{uri}" download="{file}">⬇️ Guardar {file}</a></p>
</div>"#,
        title = escape_html(&outcome.title),
        blue = colors::INFO_BLUE,
        platform = outcome.platform,
        size = format_size(outcome.size()),
        elapsed = format_elapsed(outcome.elapsed),
        uri = data_uri,
        media = outcome.media_type(),
        file = file_name,
    )
}

pub fn render_failure(message: &str) -> String {
    format!(
        r#"<div class="status error"><p>❌ {}</p></div>"#,
        escape_html(message)
    )
}

pub fn format_size(bytes: usize) -> String {
    const KB: f64 = 1024.0;
    const MB: f64 = KB * 1024.0;

    let b = bytes as f64;
    if b >= MB {
        format!("{:.1} MB", b / MB)
    } else if b >= KB {
        format!("{:.1} KB", b / KB)
    } else {
        format!("{} B", bytes)
    }
}

/// Redondea a segundos para no mostrar nanosegundos
pub fn format_elapsed(elapsed: Duration) -> String {
    humantime::format_duration(Duration::from_secs(elapsed.as_secs())).to_string()
}

pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}
