use bytes::Bytes;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use crate::config::Config;
use crate::error::DownloadError;
use crate::sources::{
    AudioFormat, DrmDownloader, ExternalDrmDownloader, ExtractedMedia, FetchJob, MediaExtractor,
    MediaTarget, MetadataResolver, PageTitleResolver, Platform, YtDlpClient,
};
use crate::storage::DownloadStore;
use crate::transcode::Transcoder;

/// Número máximo de resultados de búsqueda que se prueban
pub const MAX_SEARCH_ATTEMPTS: u32 = 3;

/// Parámetros de una petición del formulario
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadRequest {
    pub url: String,
    pub format: AudioFormat,
    pub custom_name: Option<String>,
}

impl DownloadRequest {
    pub fn new(url: impl Into<String>, format: AudioFormat) -> Self {
        Self {
            url: url.into(),
            format,
            custom_name: None,
        }
    }

    /// Un nombre vacío o solo con espacios equivale a no indicar ninguno
    pub fn with_custom_name(mut self, name: Option<String>) -> Self {
        self.custom_name = name
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty());
        self
    }
}

/// Resultado de una descarga completada
#[derive(Debug, Clone)]
pub struct DownloadOutcome {
    pub title: String,
    pub platform: Platform,
    pub format: AudioFormat,
    pub path: PathBuf,
    pub bytes: Bytes,
    pub elapsed: Duration,
}

impl DownloadOutcome {
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    pub fn media_type(&self) -> &'static str {
        self.format.media_type()
    }

    pub fn size(&self) -> usize {
        self.bytes.len()
    }
}

/// Busca `query` y descarga el resultado de mayor rango no bloqueado.
///
/// Solo un error de acceso bloqueado hace avanzar al siguiente resultado;
/// cualquier otro error se devuelve de inmediato. Nunca más de
/// [`MAX_SEARCH_ATTEMPTS`] intentos y sin esperas entre ellos.
pub async fn search_with_retry(
    extractor: &dyn MediaExtractor,
    query: &str,
    job: &FetchJob,
) -> Result<ExtractedMedia, DownloadError> {
    let mut last_blocked = None;

    for rank in 1..=MAX_SEARCH_ATTEMPTS {
        info!("🔄 Intento {} de {} para '{}'", rank, MAX_SEARCH_ATTEMPTS, query);

        let target = MediaTarget::Search {
            query: query.to_string(),
            rank,
        };

        match extractor.fetch(&target, job).await {
            Ok(media) => {
                info!("✅ Descarga completada con el resultado #{}", rank);
                return Ok(media);
            }
            Err(err) if err.is_blocked() => {
                warn!("🚫 Resultado #{} bloqueado: {}", rank, err);
                last_blocked = Some(err);
            }
            Err(err) => return Err(err),
        }
    }

    Err(DownloadError::SearchExhausted {
        query: query.to_string(),
        attempts: MAX_SEARCH_ATTEMPTS,
        last: Box::new(
            last_blocked.unwrap_or_else(|| DownloadError::Blocked("sin resultados".to_string())),
        ),
    })
}

/// Enlace → plataforma → (título → búsqueda) → descarga → bytes
pub struct Pipeline {
    extractor: Arc<dyn MediaExtractor>,
    metadata: Arc<dyn MetadataResolver>,
    drm: Option<Arc<dyn DrmDownloader>>,
    transcoder: Transcoder,
    store: DownloadStore,
}

impl Pipeline {
    pub fn new(
        extractor: Arc<dyn MediaExtractor>,
        metadata: Arc<dyn MetadataResolver>,
        transcoder: Transcoder,
        store: DownloadStore,
    ) -> Self {
        Self {
            extractor,
            metadata,
            drm: None,
            transcoder,
            store,
        }
    }

    pub fn with_drm_downloader(mut self, drm: Arc<dyn DrmDownloader>) -> Self {
        self.drm = Some(drm);
        self
    }

    pub fn from_config(config: &Config) -> Result<Self, DownloadError> {
        let extractor = YtDlpClient::new(config.ytdlp_path.clone(), config.audio_quality)
            .with_ffmpeg_location(config.ffmpeg_path.clone())
            .with_cookies(config.cookies_file.clone());
        let metadata = PageTitleResolver::new(config.http_timeout, &config.user_agent)?;

        let pipeline = Self::new(
            Arc::new(extractor),
            Arc::new(metadata),
            Transcoder::new(config.ffmpeg_path.clone()),
            DownloadStore::new(config.download_dir.clone()),
        );

        Ok(match &config.drm_downloader {
            Some(program) => {
                pipeline.with_drm_downloader(Arc::new(ExternalDrmDownloader::new(program.clone())))
            }
            None => pipeline,
        })
    }

    pub fn store(&self) -> &DownloadStore {
        &self.store
    }

    pub fn has_drm_fallback(&self) -> bool {
        self.drm.is_some()
    }

    pub async fn run(&self, request: &DownloadRequest) -> Result<DownloadOutcome, DownloadError> {
        let started = Instant::now();
        let url = request.url.trim();
        if url.is_empty() {
            return Err(DownloadError::EmptyUrl);
        }

        let platform = Platform::classify(url);
        info!("🎯 Enlace de {}: {}", platform, url);
        if platform == Platform::Unknown {
            return Err(DownloadError::UnsupportedPlatform(url.to_string()));
        }

        self.store.ensure().await?;
        let job = FetchJob {
            format: request.format,
            output_template: self.store.output_template(request.custom_name.as_deref()),
        };

        let mut query_title = None;
        let primary = if platform.needs_search() {
            let title = self.metadata.resolve_title(url).await?;
            let result = search_with_retry(self.extractor.as_ref(), &title, &job).await;
            query_title = Some(title);
            result
        } else {
            self.extractor
                .fetch(&MediaTarget::Url(url.to_string()), &job)
                .await
        };

        let (title, path) = match primary {
            Ok(media) => {
                let path = self.locate_output(&media, request, query_title.as_deref())?;
                let title = media
                    .title
                    .or(query_title)
                    .unwrap_or_else(|| stem_of(&path));
                (title, path)
            }
            Err(err) if err.is_drm() => match &self.drm {
                Some(drm) => {
                    warn!("🔐 DRM detectado, usando descargador alternativo");
                    self.drm_fallback(drm.as_ref(), url, request, query_title)
                        .await?
                }
                None => return Err(err),
            },
            Err(err) => return Err(err),
        };

        if !self.store.exists(&path).await {
            warn!("❌ No existe el archivo esperado: {}", path.display());
            return Err(DownloadError::MissingOutput(path));
        }

        let bytes = self.store.read(&path).await?;
        let outcome = DownloadOutcome {
            title,
            platform,
            format: request.format,
            path,
            bytes,
            elapsed: started.elapsed(),
        };

        info!(
            "🎵 '{}' listo: {} ({} bytes en {:?})",
            outcome.title,
            outcome.file_name(),
            outcome.size(),
            outcome.elapsed
        );
        Ok(outcome)
    }

    /// Ruta del audio final según lo que informó yt-dlp.
    ///
    /// Sin ruta informada no hubo archivo nuevo, aunque exista uno anterior
    /// con el mismo nombre.
    fn locate_output(
        &self,
        media: &ExtractedMedia,
        request: &DownloadRequest,
        query_title: Option<&str>,
    ) -> Result<PathBuf, DownloadError> {
        if let Some(path) = &media.path {
            return Ok(path.clone());
        }

        let expected = request
            .custom_name
            .as_deref()
            .or(media.title.as_deref())
            .or(query_title)
            .map(|stem| self.store.path_for(stem, request.format))
            .unwrap_or_else(|| self.store.root().to_path_buf());
        warn!("❌ yt-dlp no informó ningún archivo (esperado {})", expected.display());
        Err(DownloadError::MissingOutput(expected))
    }

    async fn drm_fallback(
        &self,
        drm: &dyn DrmDownloader,
        url: &str,
        request: &DownloadRequest,
        query_title: Option<String>,
    ) -> Result<(String, PathBuf), DownloadError> {
        // El directorio temporal se borra al salir de la función
        let staging = self.store.staging_dir()?;
        let produced = drm.fetch(url, staging.path()).await?;

        let title = query_title.unwrap_or_else(|| stem_of(&produced));
        let stem = request.custom_name.clone().unwrap_or_else(|| title.clone());

        let produced_format = produced
            .extension()
            .and_then(|e| e.to_str())
            .and_then(AudioFormat::from_extension);

        let path = if produced_format == Some(request.format) {
            self.store.adopt(&produced, &stem, request.format).await?
        } else {
            let target = self.store.path_for(&stem, request.format);
            self.transcoder.convert(&produced, &target).await?;
            target
        };

        Ok((title, path))
    }
}

fn stem_of(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::drm::MockDrmDownloader;
    use crate::sources::metadata::MockMetadataResolver;
    use crate::sources::ytdlp::MockMediaExtractor;
    use mockall::Sequence;
    use pretty_assertions::assert_eq;

    fn job() -> FetchJob {
        FetchJob {
            format: AudioFormat::Mp3,
            output_template: "downloads/%(title)s.%(ext)s".to_string(),
        }
    }

    fn blocked() -> DownloadError {
        DownloadError::Blocked("HTTP Error 403: Forbidden".to_string())
    }

    fn is_rank(rank: u32) -> impl Fn(&MediaTarget, &FetchJob) -> bool {
        move |target: &MediaTarget, _: &FetchJob| {
            matches!(target, MediaTarget::Search { rank: r, .. } if *r == rank)
        }
    }

    fn pipeline(
        dir: &Path,
        extractor: MockMediaExtractor,
        metadata: MockMetadataResolver,
    ) -> Pipeline {
        pipeline_with_transcoder(dir, extractor, metadata, Transcoder::new("ffmpeg".into()))
    }

    fn pipeline_with_transcoder(
        dir: &Path,
        extractor: MockMediaExtractor,
        metadata: MockMetadataResolver,
        transcoder: Transcoder,
    ) -> Pipeline {
        Pipeline::new(
            Arc::new(extractor),
            Arc::new(metadata),
            transcoder,
            DownloadStore::new(dir),
        )
    }

    /// Script ejecutable que sustituye a ffmpeg: recibe
    /// `-y -loglevel error -i <in> -vn <out>`
    #[cfg(unix)]
    fn fake_ffmpeg(dir: &Path, body: &str) -> Transcoder {
        use std::os::unix::fs::PermissionsExt;

        let script = dir.join("fake-ffmpeg.sh");
        std::fs::write(&script, format!("#!/bin/sh\n{}\n", body)).unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        Transcoder::new(script)
    }

    fn drm_blocked_extractor() -> MockMediaExtractor {
        let mut extractor = MockMediaExtractor::new();
        extractor
            .expect_fetch()
            .times(1)
            .returning(|_, _| Err(DownloadError::Drm("DRM protected".into())));
        extractor
    }

    fn webm_drm_downloader() -> MockDrmDownloader {
        let mut drm = MockDrmDownloader::new();
        drm.expect_fetch().times(1).returning(|_, dir| {
            let path = dir.join("x.webm");
            std::fs::write(&path, vec![7u8; 4096]).unwrap();
            Ok(path)
        });
        drm
    }

    #[tokio::test]
    async fn test_retry_stops_after_three_blocked_attempts() {
        let mut extractor = MockMediaExtractor::new();
        extractor
            .expect_fetch()
            .times(3)
            .returning(|_, _| Err(blocked()));

        let err = search_with_retry(&extractor, "song", &job()).await.unwrap_err();
        match err {
            DownloadError::SearchExhausted { query, attempts, last } => {
                assert_eq!(query, "song");
                assert_eq!(attempts, 3);
                assert!(last.is_blocked());
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_retry_advances_rank_until_success() {
        let mut seq = Sequence::new();
        let mut extractor = MockMediaExtractor::new();
        extractor
            .expect_fetch()
            .withf(is_rank(1))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Err(blocked()));
        extractor
            .expect_fetch()
            .withf(is_rank(2))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| {
                Ok(ExtractedMedia {
                    title: Some("second hit".into()),
                    path: None,
                })
            });

        let media = search_with_retry(&extractor, "song", &job()).await.unwrap();
        assert_eq!(media.title.as_deref(), Some("second hit"));
    }

    #[tokio::test]
    async fn test_retry_short_circuits_on_other_error() {
        let mut extractor = MockMediaExtractor::new();
        extractor
            .expect_fetch()
            .withf(is_rank(1))
            .times(1)
            .returning(|_, _| {
                Err(DownloadError::ToolFailed {
                    tool: "yt-dlp".into(),
                    code: Some(1),
                    stderr: "ERROR: network unreachable".into(),
                })
            });

        let err = search_with_retry(&extractor, "song", &job()).await.unwrap_err();
        assert!(matches!(err, DownloadError::ToolFailed { .. }));
    }

    #[tokio::test]
    async fn test_unknown_platform_never_downloads() {
        let tmp = tempfile::tempdir().unwrap();
        let mut extractor = MockMediaExtractor::new();
        extractor.expect_fetch().times(0);
        let mut metadata = MockMetadataResolver::new();
        metadata.expect_resolve_title().times(0);

        let p = pipeline(tmp.path(), extractor, metadata);
        let err = p
            .run(&DownloadRequest::new("https://example.com", AudioFormat::Mp3))
            .await
            .unwrap_err();
        assert!(matches!(err, DownloadError::UnsupportedPlatform(u) if u == "https://example.com"));
    }

    #[tokio::test]
    async fn test_empty_url() {
        let tmp = tempfile::tempdir().unwrap();
        let p = pipeline(tmp.path(), MockMediaExtractor::new(), MockMetadataResolver::new());
        let err = p
            .run(&DownloadRequest::new("   ", AudioFormat::Mp3))
            .await
            .unwrap_err();
        assert!(matches!(err, DownloadError::EmptyUrl));
    }

    #[tokio::test]
    async fn test_youtube_wav_download() {
        let tmp = tempfile::tempdir().unwrap();
        let produced = tmp.path().join("Some Song.wav");
        let produced_clone = produced.clone();

        let mut extractor = MockMediaExtractor::new();
        extractor
            .expect_fetch()
            .withf(|target, job| {
                *target == MediaTarget::Url("https://youtu.be/xyz".into())
                    && job.format == AudioFormat::Wav
            })
            .times(1)
            .returning(move |_, _| {
                std::fs::write(&produced_clone, vec![1u8; 2048]).unwrap();
                Ok(ExtractedMedia {
                    title: Some("Some Song".into()),
                    path: Some(produced_clone.clone()),
                })
            });

        let p = pipeline(tmp.path(), extractor, MockMetadataResolver::new());
        let outcome = p
            .run(&DownloadRequest::new(" https://youtu.be/xyz ", AudioFormat::Wav))
            .await
            .unwrap();

        assert_eq!(outcome.platform, Platform::YouTube);
        assert_eq!(outcome.title, "Some Song");
        assert_eq!(outcome.file_name(), "Some Song.wav");
        assert_eq!(outcome.media_type(), "audio/wav");
        assert_eq!(
            outcome.size() as u64,
            std::fs::metadata(&produced).unwrap().len()
        );
    }

    #[tokio::test]
    async fn test_custom_name_wins_over_title() {
        let tmp = tempfile::tempdir().unwrap();
        let store = DownloadStore::new(tmp.path());
        let expected = store.path_for("my mix", AudioFormat::Mp3);
        let expected_clone = expected.clone();
        let expected_template = store.output_template(Some("my mix"));

        let mut extractor = MockMediaExtractor::new();
        extractor
            .expect_fetch()
            .withf(move |_, job| job.output_template == expected_template)
            .times(1)
            .returning(move |_, _| {
                std::fs::write(&expected_clone, b"id3").unwrap();
                Ok(ExtractedMedia {
                    title: Some("Original Title".into()),
                    path: Some(expected_clone.clone()),
                })
            });

        let p = pipeline(tmp.path(), extractor, MockMetadataResolver::new());
        let request = DownloadRequest::new("https://www.youtube.com/watch?v=1", AudioFormat::Mp3)
            .with_custom_name(Some("  my mix ".into()));
        let outcome = p.run(&request).await.unwrap();

        assert_eq!(outcome.path, expected);
        assert_eq!(stem_of(&outcome.path), "my mix");
        assert_eq!(outcome.title, "Original Title");
    }

    #[tokio::test]
    async fn test_spotify_resolves_title_then_searches() {
        let tmp = tempfile::tempdir().unwrap();
        let out = tmp.path().join("Track - Artist.mp3");
        let out_clone = out.clone();

        let mut metadata = MockMetadataResolver::new();
        metadata
            .expect_resolve_title()
            .withf(|url| url == "https://open.spotify.com/track/abc")
            .times(1)
            .returning(|_| Ok("Track - Artist".to_string()));

        let mut extractor = MockMediaExtractor::new();
        extractor
            .expect_fetch()
            .withf(is_rank(1))
            .times(1)
            .returning(|_, _| Err(blocked()));
        extractor
            .expect_fetch()
            .withf(|target, _| {
                *target
                    == MediaTarget::Search {
                        query: "Track - Artist".into(),
                        rank: 2,
                    }
            })
            .times(1)
            .returning(move |_, _| {
                std::fs::write(&out_clone, b"mp3").unwrap();
                Ok(ExtractedMedia {
                    title: None,
                    path: Some(out_clone.clone()),
                })
            });

        let p = pipeline(tmp.path(), extractor, metadata);
        let outcome = p
            .run(&DownloadRequest::new(
                "https://open.spotify.com/track/abc",
                AudioFormat::Mp3,
            ))
            .await
            .unwrap();

        assert_eq!(outcome.platform, Platform::Spotify);
        assert_eq!(outcome.title, "Track - Artist");
        assert_eq!(outcome.path, out);
    }

    #[tokio::test]
    async fn test_missing_output_after_transcode() {
        let tmp = tempfile::tempdir().unwrap();
        let ghost = tmp.path().join("ghost.mp3");
        let ghost_clone = ghost.clone();

        let mut extractor = MockMediaExtractor::new();
        extractor.expect_fetch().times(1).returning(move |_, _| {
            Ok(ExtractedMedia {
                title: Some("ghost".into()),
                path: Some(ghost_clone.clone()),
            })
        });

        let p = pipeline(tmp.path(), extractor, MockMetadataResolver::new());
        let err = p
            .run(&DownloadRequest::new("https://youtu.be/ghost", AudioFormat::Mp3))
            .await
            .unwrap_err();
        assert!(matches!(err, DownloadError::MissingOutput(p) if p == ghost));
    }

    #[tokio::test]
    async fn test_drm_without_fallback_is_reported() {
        let tmp = tempfile::tempdir().unwrap();
        let mut extractor = MockMediaExtractor::new();
        extractor
            .expect_fetch()
            .times(1)
            .returning(|_, _| Err(DownloadError::Drm("This video is DRM protected".into())));

        let p = pipeline(tmp.path(), extractor, MockMetadataResolver::new());
        assert!(!p.has_drm_fallback());
        let err = p
            .run(&DownloadRequest::new("https://youtu.be/drm", AudioFormat::Mp3))
            .await
            .unwrap_err();
        assert!(err.is_drm());
    }

    #[tokio::test]
    async fn test_drm_fallback_adopts_output() {
        let tmp = tempfile::tempdir().unwrap();

        let mut metadata = MockMetadataResolver::new();
        metadata
            .expect_resolve_title()
            .times(1)
            .returning(|_| Ok("Locked Song".to_string()));

        let mut extractor = MockMediaExtractor::new();
        extractor
            .expect_fetch()
            .times(1)
            .returning(|_, _| Err(DownloadError::Drm("DRM protected".into())));

        let mut drm = MockDrmDownloader::new();
        drm.expect_fetch()
            .withf(|url, _| url == "https://open.spotify.com/track/locked")
            .times(1)
            .returning(|_, dir| {
                let path = dir.join("0001 - locked.mp3");
                std::fs::write(&path, b"decrypted").unwrap();
                Ok(path)
            });

        let p = pipeline(tmp.path(), extractor, metadata).with_drm_downloader(Arc::new(drm));
        let outcome = p
            .run(&DownloadRequest::new(
                "https://open.spotify.com/track/locked",
                AudioFormat::Mp3,
            ))
            .await
            .unwrap();

        assert_eq!(outcome.title, "Locked Song");
        assert_eq!(outcome.path, tmp.path().join("Locked Song.mp3"));
        assert_eq!(&outcome.bytes[..], b"decrypted");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_drm_fallback_transcodes_other_container() {
        let tmp = tempfile::tempdir().unwrap();
        let tools = tempfile::tempdir().unwrap();
        let transcoder = fake_ffmpeg(tools.path(), r#"cp "$5" "$7""#);

        let p = pipeline_with_transcoder(
            tmp.path(),
            drm_blocked_extractor(),
            MockMetadataResolver::new(),
            transcoder,
        )
        .with_drm_downloader(Arc::new(webm_drm_downloader()));

        let request = DownloadRequest::new("https://youtu.be/locked", AudioFormat::Wav)
            .with_custom_name(Some("Mi versión".into()));
        let outcome = p.run(&request).await.unwrap();

        assert_eq!(outcome.path, tmp.path().join("Mi versión.wav"));
        assert_eq!(outcome.file_name(), "Mi versión.wav");
        assert_eq!(outcome.media_type(), "audio/wav");
        assert_eq!(outcome.title, "x");
        assert_eq!(
            outcome.size() as u64,
            std::fs::metadata(&outcome.path).unwrap().len()
        );
        assert_eq!(outcome.size(), 4096);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_drm_fallback_reports_failed_transcode() {
        let tmp = tempfile::tempdir().unwrap();
        let tools = tempfile::tempdir().unwrap();
        let transcoder = fake_ffmpeg(tools.path(), "echo 'Invalid data found' >&2\nexit 1");

        let p = pipeline_with_transcoder(
            tmp.path(),
            drm_blocked_extractor(),
            MockMetadataResolver::new(),
            transcoder,
        )
        .with_drm_downloader(Arc::new(webm_drm_downloader()));

        let err = p
            .run(&DownloadRequest::new("https://youtu.be/locked", AudioFormat::Wav))
            .await
            .unwrap_err();
        match err {
            DownloadError::ToolFailed { tool, code, stderr } => {
                assert_eq!(tool, "ffmpeg");
                assert_eq!(code, Some(1));
                assert_eq!(stderr, "Invalid data found");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_stale_file_is_not_reported_as_download() {
        let tmp = tempfile::tempdir().unwrap();
        let store = DownloadStore::new(tmp.path());
        let stale = store.path_for("my mix", AudioFormat::Mp3);
        std::fs::write(&stale, b"old download").unwrap();

        let mut extractor = MockMediaExtractor::new();
        extractor
            .expect_fetch()
            .times(1)
            .returning(|_, _| Ok(ExtractedMedia::default()));

        let p = pipeline(tmp.path(), extractor, MockMetadataResolver::new());
        let request = DownloadRequest::new("https://youtu.be/empty", AudioFormat::Mp3)
            .with_custom_name(Some("my mix".into()));
        let err = p.run(&request).await.unwrap_err();

        assert!(matches!(err, DownloadError::MissingOutput(path) if path == stale));
    }

    #[test]
    fn test_blank_custom_name_is_ignored() {
        let request = DownloadRequest::new("u", AudioFormat::Mp3).with_custom_name(Some("   ".into()));
        assert_eq!(request.custom_name, None);
    }
}
