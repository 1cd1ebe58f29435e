mod error;
mod font;
mod placeholder;

use std::path::{Path, PathBuf};
use std::time::Duration;

use futures::StreamExt;
use image::{DynamicImage, ImageFormat};
use reqwest::Client;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};
use url::Url;

use crate::feed::CandidatePost;

pub use error::{MediaError, MediaResult, PlaceholderError};
pub use placeholder::{
    placeholder_caption, PlaceholderGenerator, PLACEHOLDER_FILE_NAME, PLACEHOLDER_HEIGHT,
    PLACEHOLDER_WIDTH,
};

/// Every retained image ends up as a JPEG with this extension.
pub const CANONICAL_EXTENSION: &str = "jpg";

pub const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(10);

pub fn sequence_file_name(sequence: usize, extension: &str) -> String {
    format!("img{sequence}.{extension}")
}

/// Downloads post images into a scratch directory and normalizes them.
#[derive(Debug, Clone)]
pub struct MediaFetcher {
    http: Client,
    allow_local_files: bool,
}

impl MediaFetcher {
    pub fn new(user_agent: &str) -> MediaResult<Self> {
        let http = Client::builder()
            .user_agent(user_agent)
            .timeout(DOWNLOAD_TIMEOUT)
            .build()
            .map_err(|err| MediaError::Client(err.to_string()))?;
        Ok(Self {
            http,
            allow_local_files: false,
        })
    }

    /// Lets `file://` post URLs be read from the local filesystem. Off by
    /// default: only `http` and `https` URLs are fetched.
    pub fn allow_local_files(mut self, allow: bool) -> Self {
        self.allow_local_files = allow;
        self
    }

    /// Returns how many canonical images were written. Files are numbered
    /// `img1.jpg`, `img2.jpg`, ... in feed order with no gaps.
    pub async fn fetch(&self, posts: &[CandidatePost], scratch_dir: &Path) -> MediaResult<usize> {
        let mut retained = 0usize;
        for post in posts {
            let Some(extension) = post.declared_type.extension() else {
                debug!(post = %post.id, url = %post.url, "unsupported media skipped");
                continue;
            };
            let sequence = retained + 1;
            match self.retain(post, extension, sequence, scratch_dir).await {
                Ok(path) => {
                    retained = sequence;
                    debug!(post = %post.id, path = %path.display(), "image retained");
                }
                Err(err) if err.is_fatal() => return Err(err),
                Err(err) => {
                    warn!(post = %post.id, url = %post.url, error = %err, "image skipped");
                }
            }
        }
        info!(
            retained,
            candidates = posts.len(),
            dir = %scratch_dir.display(),
            "media fetch finished"
        );
        Ok(retained)
    }

    async fn retain(
        &self,
        post: &CandidatePost,
        extension: &str,
        sequence: usize,
        scratch_dir: &Path,
    ) -> MediaResult<PathBuf> {
        let raw_path = scratch_dir.join(sequence_file_name(sequence, extension));
        if let Err(err) = self.fetch_to_file(&post.url, &raw_path).await {
            discard(&raw_path).await;
            return Err(err);
        }
        if extension == CANONICAL_EXTENSION {
            return Ok(raw_path);
        }

        let canonical = scratch_dir.join(sequence_file_name(sequence, CANONICAL_EXTENSION));
        let source = raw_path.clone();
        let target = canonical.clone();
        let converted = tokio::task::spawn_blocking(move || normalize_image(&source, &target))
            .await
            .map_err(|err| MediaError::encoding(&raw_path, err))
            .and_then(|result| result);
        discard(&raw_path).await;
        match converted {
            Ok(()) => {
                debug!(from = extension, path = %canonical.display(), "image converted");
                Ok(canonical)
            }
            Err(err) => {
                discard(&canonical).await;
                Err(err)
            }
        }
    }

    async fn fetch_to_file(&self, url: &str, path: &Path) -> MediaResult<()> {
        let parsed = Url::parse(url).map_err(|err| MediaError::download(url, err))?;
        match parsed.scheme() {
            "http" | "https" => {}
            "file" if self.allow_local_files => {
                let source = parsed
                    .to_file_path()
                    .map_err(|_| MediaError::download(url, "invalid file url"))?;
                let bytes = fs::read(&source)
                    .await
                    .map_err(|err| MediaError::download(url, err))?;
                return fs::write(path, bytes)
                    .await
                    .map_err(|source| MediaError::Io {
                        source,
                        path: path.to_path_buf(),
                    });
            }
            scheme => {
                return Err(MediaError::download(
                    url,
                    format!("unsupported url scheme {scheme:?}"),
                ))
            }
        }

        let response = self
            .http
            .get(parsed)
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(|err| MediaError::download(url, err))?;
        let mut file = fs::File::create(path)
            .await
            .map_err(|source| MediaError::Io {
                source,
                path: path.to_path_buf(),
            })?;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let data = chunk.map_err(|err| MediaError::download(url, err))?;
            file.write_all(&data)
                .await
                .map_err(|source| MediaError::Io {
                    source,
                    path: path.to_path_buf(),
                })?;
        }
        file.flush().await.map_err(|source| MediaError::Io {
            source,
            path: path.to_path_buf(),
        })?;
        Ok(())
    }
}

/// Decodes whatever was downloaded (sniffing the real format) and re-encodes
/// it as an RGB JPEG.
pub fn normalize_image(source: &Path, target: &Path) -> MediaResult<()> {
    let decoded = image::io::Reader::open(source)
        .map_err(|err| MediaError::encoding(source, err))?
        .with_guessed_format()
        .map_err(|err| MediaError::encoding(source, err))?
        .decode()
        .map_err(|err| MediaError::encoding(source, err))?;
    DynamicImage::ImageRgb8(decoded.to_rgb8())
        .save_with_format(target, ImageFormat::Jpeg)
        .map_err(|err| MediaError::encoding(target, err))
}

async fn discard(path: &Path) {
    if let Err(err) = fs::remove_file(path).await {
        if err.kind() != std::io::ErrorKind::NotFound {
            warn!(path = %path.display(), error = %err, "failed to remove partial file");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};
    use tempfile::TempDir;

    #[test]
    fn sequence_names() {
        assert_eq!(sequence_file_name(1, "png"), "img1.png");
        assert_eq!(sequence_file_name(12, CANONICAL_EXTENSION), "img12.jpg");
    }

    #[test]
    fn normalize_converts_png_to_jpeg() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("img1.png");
        RgbImage::from_pixel(16, 8, Rgb([200, 10, 10]))
            .save_with_format(&source, ImageFormat::Png)
            .unwrap();
        let target = dir.path().join("img1.jpg");

        normalize_image(&source, &target).unwrap();

        let format = image::io::Reader::open(&target)
            .unwrap()
            .with_guessed_format()
            .unwrap()
            .format();
        assert_eq!(format, Some(ImageFormat::Jpeg));
        let decoded = image::open(&target).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (16, 8));
    }

    #[test]
    fn normalize_rejects_garbage() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("img1.png");
        std::fs::write(&source, b"<html>not an image</html>").unwrap();
        let err = normalize_image(&source, &dir.path().join("img1.jpg")).unwrap_err();
        assert!(matches!(err, MediaError::Encoding { .. }));
        assert!(!err.is_fatal());
    }
}
