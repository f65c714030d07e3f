//! Outbound media pipeline.
//!
//! Download → size gate → optional transcode → dispatch, with the scratch
//! directory removed on every exit path. The pipeline never mutates session
//! records; it only borrows a send-capable client handle from the store.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use reqwest::Client;
use tokio::process::Command;
use warelay_common::config::Config;

use crate::client::WebClient;
use crate::error::GatewayError;
use crate::session::SessionStore;

/// Margin below the configured cap. Transport overhead and container
/// metadata can push a borderline file over the platform limit even after
/// it passes the raw-size check.
const SAFETY_MARGIN_MB: f64 = 0.5;

const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(30);

/// Artifact names inside a work area: the raw download and, when the size
/// gate trips, its transcoded replacement.
const RAW_FILE: &str = "source.mp4";
const COMPRESSED_FILE: &str = "compressed.mp4";

/// Fixed audio bitrate for transcoded media.
const AUDIO_BITRATE: &str = "64k";

/// One outbound send.
#[derive(Debug, Clone)]
pub struct SendMediaRequest {
    pub user_id: String,
    /// Target phone number.
    pub destination: String,
    pub media_url: String,
    pub caption: Option<String>,
}

/// Scratch directory for one send, named `<user>_<millis>` under the
/// configured temp root. Removed by [`TempWorkArea::cleanup`] on every
/// pipeline exit; `Drop` is the backstop for paths that never get there.
#[derive(Debug)]
pub struct TempWorkArea {
    root: PathBuf,
}

impl TempWorkArea {
    pub async fn create(temp_root: &Path, user_id: &str) -> Result<Self, GatewayError> {
        let root = temp_root.join(format!("{}_{}", user_id, Utc::now().timestamp_millis()));
        tokio::fs::create_dir_all(&root).await.map_err(|err| {
            GatewayError::Internal(format!(
                "cannot create work area {}: {err}",
                root.display()
            ))
        })?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn artifact(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    /// Remove the work area. Failures are logged, never raised: cleanup
    /// must not mask the pipeline's own outcome.
    pub async fn cleanup(&self) {
        if let Err(err) = tokio::fs::remove_dir_all(&self.root).await {
            if err.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(
                    path = %self.root.display(),
                    error = %err,
                    "failed to clean up work area"
                );
            }
        }
    }
}

impl Drop for TempWorkArea {
    fn drop(&mut self) {
        if let Err(err) = std::fs::remove_dir_all(&self.root) {
            if err.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(
                    path = %self.root.display(),
                    error = %err,
                    "failed to clean up work area on drop"
                );
            }
        }
    }
}

/// Outbound media pipeline, shared by all users.
#[derive(Debug, Clone)]
pub struct MediaPipeline {
    store: SessionStore,
    config: Arc<Config>,
    http: Client,
}

impl MediaPipeline {
    pub fn new(store: SessionStore, config: Arc<Config>) -> Self {
        Self {
            store,
            config,
            http: Client::builder()
                .timeout(DOWNLOAD_TIMEOUT)
                .build()
                .expect("Failed to create HTTP client"),
        }
    }

    /// Run the full pipeline for one request.
    ///
    /// Readiness is the caller's concern; this fails fast with `NoClient`
    /// when no handle is retrievable, before touching the filesystem.
    pub async fn send_media(&self, request: &SendMediaRequest) -> Result<(), GatewayError> {
        let client = self
            .store
            .client_handle(&request.user_id)
            .await
            .ok_or_else(|| GatewayError::NoClient(request.user_id.clone()))?;

        let area = TempWorkArea::create(&self.config.temp_dir, &request.user_id).await?;
        let outcome = self.run(&area, &client, request).await;
        area.cleanup().await;
        outcome
    }

    async fn run(
        &self,
        area: &TempWorkArea,
        client: &WebClient,
        request: &SendMediaRequest,
    ) -> Result<(), GatewayError> {
        let artifact = self.stage_artifact(area, &request.media_url).await?;

        client
            .send_media(&request.destination, &artifact, request.caption.as_deref())
            .await
            .map_err(|err| GatewayError::Send(err.to_string()))?;

        tracing::info!(
            user_id = %request.user_id,
            destination = %request.destination,
            "media dispatched"
        );
        Ok(())
    }

    /// Stages 2–3: download into the work area and transcode when the raw
    /// artifact does not fit the size budget. Returns the path to send.
    pub(crate) async fn stage_artifact(
        &self,
        area: &TempWorkArea,
        media_url: &str,
    ) -> Result<PathBuf, GatewayError> {
        let raw = area.artifact(RAW_FILE);
        self.download(media_url, &raw).await?;

        let size = tokio::fs::metadata(&raw)
            .await
            .map_err(|err| GatewayError::Internal(format!("cannot stat download: {err}")))?
            .len();
        if !exceeds_size_budget(size, self.config.max_media_mb) {
            return Ok(raw);
        }

        tracing::info!(
            bytes = size,
            max_mb = self.config.max_media_mb,
            "media over size budget, transcoding"
        );
        let compressed = area.artifact(COMPRESSED_FILE);
        self.transcode(&raw, &compressed).await?;
        Ok(compressed)
    }

    async fn download(&self, url: &str, dest: &Path) -> Result<(), GatewayError> {
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|err| GatewayError::Download(err.to_string()))?
            .error_for_status()
            .map_err(|err| GatewayError::Download(err.to_string()))?;

        let body = response
            .bytes()
            .await
            .map_err(|err| GatewayError::Download(err.to_string()))?;
        tokio::fs::write(dest, &body)
            .await
            .map_err(|err| GatewayError::Download(format!("cannot store download: {err}")))?;

        tracing::debug!(bytes = body.len(), url, "media downloaded");
        Ok(())
    }

    /// Re-encode to fit the size budget: cap the horizontal resolution at
    /// 640 (the even-height `-2` preserves aspect ratio), configured
    /// CRF/preset for video, fixed-bitrate AAC audio.
    async fn transcode(&self, input: &Path, output: &Path) -> Result<(), GatewayError> {
        let result = Command::new("ffmpeg")
            .arg("-y")
            .arg("-i")
            .arg(input)
            .args(["-vf", "scale=640:-2", "-c:v", "libx264"])
            .args(["-crf", &self.config.ffmpeg_crf.to_string()])
            .args(["-preset", &self.config.ffmpeg_preset])
            .args(["-c:a", "aac", "-b:a", AUDIO_BITRATE])
            .arg(output)
            .output()
            .await
            .map_err(|err| GatewayError::Transcode(format!("cannot spawn ffmpeg: {err}")))?;

        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            let detail = stderr.lines().last().unwrap_or("").trim().to_string();
            return Err(GatewayError::Transcode(format!(
                "ffmpeg exited with {}: {detail}",
                result.status
            )));
        }
        Ok(())
    }
}

/// Size gate for stage 3. Strictly greater than `max - margin`, so a file
/// exactly at the cap is transcoded while one just under the margin line
/// passes through untouched.
pub(crate) fn exceeds_size_budget(size_bytes: u64, max_mb: u32) -> bool {
    let size_mb = size_bytes as f64 / (1024.0 * 1024.0);
    size_mb > f64::from(max_mb) - SAFETY_MARGIN_MB
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const MIB: u64 = 1024 * 1024;

    fn pipeline_with_temp(temp_dir: &Path) -> MediaPipeline {
        let config = Config {
            temp_dir: temp_dir.to_path_buf(),
            ..Config::default()
        };
        MediaPipeline::new(SessionStore::new(), Arc::new(config))
    }

    #[test]
    fn test_size_gate_boundaries() {
        // Exactly the cap: transcode.
        assert!(exceeds_size_budget(16 * MIB, 16));
        // Just over the margin line: transcode.
        assert!(exceeds_size_budget(15 * MIB + MIB / 2 + 1, 16));
        // Exactly the margin line: pass through (strictly greater).
        assert!(!exceeds_size_budget(15 * MIB + MIB / 2, 16));
        // One byte under the margin line: pass through.
        assert!(!exceeds_size_budget(15 * MIB + MIB / 2 - 1, 16));
    }

    #[tokio::test]
    async fn test_work_area_create_and_cleanup() {
        let dir = tempfile::tempdir().unwrap();
        let area = TempWorkArea::create(dir.path(), "u1").await.unwrap();
        let root = area.root().to_path_buf();
        assert!(root.exists());
        assert!(root
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("u1_"));

        tokio::fs::write(area.artifact(RAW_FILE), b"data").await.unwrap();
        area.cleanup().await;
        assert!(!root.exists());

        // Cleanup of an already-removed area is silent.
        area.cleanup().await;
    }

    #[tokio::test]
    async fn test_work_area_drop_is_the_backstop() {
        let dir = tempfile::tempdir().unwrap();
        let root = {
            let area = TempWorkArea::create(dir.path(), "u1").await.unwrap();
            tokio::fs::write(area.artifact(RAW_FILE), b"data").await.unwrap();
            area.root().to_path_buf()
        };
        assert!(!root.exists());
    }

    #[tokio::test]
    async fn test_stage_artifact_small_file_passes_through() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/clip.mp4"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"tiny".to_vec()))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let pipeline = pipeline_with_temp(dir.path());
        let area = TempWorkArea::create(dir.path(), "u1").await.unwrap();

        let artifact = pipeline
            .stage_artifact(&area, &format!("{}/clip.mp4", server.uri()))
            .await
            .unwrap();
        assert_eq!(artifact, area.artifact(RAW_FILE));
        assert_eq!(tokio::fs::read(&artifact).await.unwrap(), b"tiny");
    }

    #[tokio::test]
    async fn test_download_failure_maps_to_download_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/clip.mp4"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let pipeline = pipeline_with_temp(dir.path());

        let root = {
            let area = TempWorkArea::create(dir.path(), "u1").await.unwrap();
            let err = pipeline
                .stage_artifact(&area, &format!("{}/clip.mp4", server.uri()))
                .await
                .unwrap_err();
            assert!(matches!(err, GatewayError::Download(_)));
            area.root().to_path_buf()
        };
        // The failure path leaves no scratch storage behind.
        assert!(!root.exists());
    }

    #[tokio::test]
    async fn test_unreachable_host_is_a_download_error() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = pipeline_with_temp(dir.path());
        let area = TempWorkArea::create(dir.path(), "u1").await.unwrap();

        let err = pipeline
            .stage_artifact(&area, "http://127.0.0.1:1/clip.mp4")
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Download(_)));
    }

    #[tokio::test]
    async fn test_send_media_without_session_fails_fast() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = pipeline_with_temp(dir.path());

        let request = SendMediaRequest {
            user_id: "nobody".into(),
            destination: "15551234567".into(),
            media_url: "http://example.invalid/clip.mp4".into(),
            caption: None,
        };
        let err = pipeline.send_media(&request).await.unwrap_err();
        assert!(matches!(err, GatewayError::NoClient(_)));

        // Fail-fast means no work area was ever created.
        let mut entries = tokio::fs::read_dir(dir.path()).await.unwrap();
        assert!(entries.next_entry().await.unwrap().is_none());
    }
}
