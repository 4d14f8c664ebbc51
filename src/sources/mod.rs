pub mod drm;
pub mod format;
pub mod metadata;
pub mod platform;
pub mod ytdlp;

pub use drm::{DrmDownloader, ExternalDrmDownloader};
pub use format::AudioFormat;
pub use metadata::{MetadataResolver, PageTitleResolver};
pub use platform::Platform;
pub use ytdlp::{ExtractedMedia, FetchJob, MediaExtractor, MediaTarget, YtDlpClient};
