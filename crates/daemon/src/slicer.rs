//! Adapts the requested scale to what the source supports, invokes the
//! transcoder, and returns a descriptor of the resulting directory.
//! Grounded on the original's `fragment.go` (`Fragment`, `parseScale`).

use crate::adapters::Transcoder;
use crate::error::JobError;
use crate::job::{HlsCrypto, Scale};
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;

/// Descriptor of a completed slice, matching the original's `Fragment`.
#[derive(Debug, Clone, PartialEq)]
pub struct Fragment {
    pub scale: Scale,
    pub out_dir: PathBuf,
    pub sharpness: String,
    pub input: PathBuf,
}

/// Probes `input`, clamps `requested_scale` to the source's own resolution,
/// and invokes the transcoder to produce an HLS output directory.
pub async fn slice(
    token: &CancellationToken,
    input: &Path,
    requested_scale: Scale,
    output: &Path,
    crypto: Option<&HlsCrypto>,
    transcoder: &dyn Transcoder,
) -> Result<Fragment, JobError> {
    let fmt = transcoder.probe(input).await?;
    if !fmt.has_video && !fmt.has_audio {
        return Err(JobError::Probe(crate::error::ProbeError::NotMedia));
    }

    let src_scale = Scale::bucketize(fmt.resolution_height);
    let eff_scale = requested_scale.min(src_scale);
    let sharpness = eff_scale.sharpness().to_string();

    let out_dir = transcoder
        .transcode_to_hls(token, input, eff_scale, output, crypto)
        .await?;

    Ok(Fragment {
        scale: eff_scale,
        out_dir,
        sharpness,
        input: input.to_path_buf(),
    })
}
