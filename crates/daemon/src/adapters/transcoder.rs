//! FFmpeg-based probe/transcode subprocess wrapper, generalizing the
//! teacher's `gates.rs` ffprobe JSON parsing and `encode/av1an.rs`
//! command-building pattern away from AV1-specific flags.

use crate::error::{EncodeError, ProbeError};
use crate::job::{HlsCrypto, Scale};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;

/// Probed stream presence/resolution, matching the spec's `StreamFormat`.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StreamFormat {
    pub has_video: bool,
    pub has_audio: bool,
    pub resolution_height: u32,
}

#[async_trait]
pub trait Transcoder: Send + Sync {
    async fn probe(&self, path: &Path) -> Result<StreamFormat, ProbeError>;
    async fn transcode_to_hls(
        &self,
        token: &CancellationToken,
        input: &Path,
        scale: Scale,
        output: &Path,
        crypto: Option<&HlsCrypto>,
    ) -> Result<PathBuf, EncodeError>;
}

mod ffprobe_json {
    use serde::Deserialize;

    #[derive(Debug, Deserialize)]
    pub struct FfprobeOutput {
        pub streams: Option<Vec<Stream>>,
    }

    #[derive(Debug, Deserialize)]
    pub struct Stream {
        pub codec_type: Option<String>,
        pub height: Option<u32>,
    }
}

fn parse_ffprobe(json_str: &str) -> Result<StreamFormat, ProbeError> {
    let parsed: ffprobe_json::FfprobeOutput =
        serde_json::from_str(json_str).map_err(|e| ProbeError::Parse(e.to_string()))?;
    let streams = parsed.streams.unwrap_or_default();

    let mut fmt = StreamFormat::default();
    for stream in streams {
        match stream.codec_type.as_deref() {
            Some("video") => {
                fmt.has_video = true;
                fmt.resolution_height = fmt.resolution_height.max(stream.height.unwrap_or(0));
            }
            Some("audio") => fmt.has_audio = true,
            _ => {}
        }
    }
    if !fmt.has_video && !fmt.has_audio {
        return Err(ProbeError::NotMedia);
    }
    Ok(fmt)
}

/// Maps a [`Scale`] to the ffmpeg `-vf scale` height argument.
fn scale_height(scale: Scale) -> u32 {
    match scale {
        Scale::P480 => 480,
        Scale::P720 => 720,
        Scale::P1080 => 1080,
    }
}

/// Subprocess-backed transcoder using `ffprobe` and `ffmpeg` on `$PATH`
/// (or at configured paths).
pub struct FfmpegTranscoder {
    pub ffmpeg_path: String,
    pub ffprobe_path: String,
}

impl FfmpegTranscoder {
    pub fn new(ffmpeg_path: impl Into<String>, ffprobe_path: impl Into<String>) -> Self {
        Self {
            ffmpeg_path: ffmpeg_path.into(),
            ffprobe_path: ffprobe_path.into(),
        }
    }
}

impl Default for FfmpegTranscoder {
    fn default() -> Self {
        Self::new("ffmpeg", "ffprobe")
    }
}

#[async_trait]
impl Transcoder for FfmpegTranscoder {
    async fn probe(&self, path: &Path) -> Result<StreamFormat, ProbeError> {
        let output = tokio::process::Command::new(&self.ffprobe_path)
            .args(["-v", "quiet", "-print_format", "json", "-show_streams"])
            .arg(path)
            .output()
            .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ProbeError::FfprobeFailed(stderr.trim().to_string()));
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        parse_ffprobe(&stdout)
    }

    async fn transcode_to_hls(
        &self,
        token: &CancellationToken,
        input: &Path,
        scale: Scale,
        output: &Path,
        crypto: Option<&HlsCrypto>,
    ) -> Result<PathBuf, EncodeError> {
        tokio::fs::create_dir_all(output).await?;
        let playlist = output.join("index.m3u8");

        let mut cmd = tokio::process::Command::new(&self.ffmpeg_path);
        cmd.arg("-y")
            .arg("-i")
            .arg(input)
            .arg("-vf")
            .arg(format!("scale=-2:{}", scale_height(scale)))
            .arg("-c:a")
            .arg("copy")
            .arg("-f")
            .arg("hls")
            .arg("-hls_segment_filename")
            .arg(output.join("segment_%03d.ts"));

        if let Some(crypto) = crypto {
            let keyinfo = output.join("keyinfo");
            tokio::fs::write(
                &keyinfo,
                format!("{}\n{}\n{}\n", crypto.key_uri, crypto.key_path, crypto.iv),
            )
            .await?;
            cmd.arg("-hls_key_info_file").arg(&keyinfo);
        }
        cmd.arg(&playlist);

        let mut child = cmd.spawn()?;
        tokio::select! {
            status = child.wait() => {
                let status = status?;
                if status.success() {
                    Ok(output.to_path_buf())
                } else {
                    match status.code() {
                        Some(code) => Err(EncodeError::FfmpegFailed(code)),
                        None => Err(EncodeError::Terminated),
                    }
                }
            }
            _ = token.cancelled() => {
                let _ = child.kill().await;
                Err(EncodeError::Terminated)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_ffprobe_detects_video_and_audio() {
        let json = r#"{"streams":[
            {"codec_type":"video","height":1080},
            {"codec_type":"audio"}
        ]}"#;
        let fmt = parse_ffprobe(json).unwrap();
        assert!(fmt.has_video);
        assert!(fmt.has_audio);
        assert_eq!(fmt.resolution_height, 1080);
    }

    #[test]
    fn parse_ffprobe_no_streams_is_not_media() {
        let json = r#"{"streams":[]}"#;
        assert!(matches!(parse_ffprobe(json), Err(ProbeError::NotMedia)));
    }

    #[test]
    fn parse_ffprobe_takes_max_video_height() {
        let json = r#"{"streams":[
            {"codec_type":"video","height":480},
            {"codec_type":"video","height":720}
        ]}"#;
        let fmt = parse_ffprobe(json).unwrap();
        assert_eq!(fmt.resolution_height, 720);
    }

    #[test]
    fn scale_height_maps_all_buckets() {
        assert_eq!(scale_height(Scale::P480), 480);
        assert_eq!(scale_height(Scale::P720), 720);
        assert_eq!(scale_height(Scale::P1080), 1080);
    }
}
