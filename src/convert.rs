//! Pluggable format conversion. `ConversionService` is a trait so a host can
//! plug in a platform tool (`sips`, `heif-convert`, …) or an in-memory test
//! double; `ShellConversionService` is the default, shelling out to a
//! configurable external binary.

use std::path::{Path, PathBuf};
use std::time::Instant;

use async_trait::async_trait;
use tokio::process::Command;

use crate::error::{ConvertError, Result};

const SUPPORTED_EXTENSIONS: &[&str] = &["heic", "heif", "png", "jpg", "jpeg", "tiff", "bmp", "gif"];
const DEFAULT_JPEG_QUALITY: u8 = 90;

#[derive(Debug, Clone, Default)]
pub struct ConvertOptions {
    pub output_format: String,
    pub output_dir: Option<PathBuf>,
    pub quality: Option<u8>,
}

#[derive(Debug, Clone)]
pub struct ConvertOutcome {
    pub src_path: PathBuf,
    pub dest_path: PathBuf,
    pub format: String,
    pub duration_ms: u64,
}

#[async_trait]
pub trait ConversionService: Send + Sync {
    /// True if `ext` (no leading dot, any case) is one this service accepts.
    fn can_convert(&self, ext: &str) -> bool {
        SUPPORTED_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str())
    }

    async fn convert(&self, src_path: &Path, opts: ConvertOptions) -> Result<ConvertOutcome>;
}

/// Resolve the collision-suffixed output path: `outputDir || dirname(src) /
/// stem.format`, then `_2`, `_3`, … until a free path is found.
pub async fn resolve_dest_path(src_path: &Path, opts: &ConvertOptions) -> PathBuf {
    let dir = opts
        .output_dir
        .clone()
        .or_else(|| src_path.parent().map(Path::to_path_buf))
        .unwrap_or_else(|| PathBuf::from("."));
    let stem = src_path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();

    let first = dir.join(format!("{stem}.{}", opts.output_format));
    if !tokio::fs::try_exists(&first).await.unwrap_or(false) {
        return first;
    }
    for n in 2.. {
        let candidate = dir.join(format!("{stem}_{n}.{}", opts.output_format));
        if !tokio::fs::try_exists(&candidate).await.unwrap_or(false) {
            return candidate;
        }
    }
    unreachable!("unbounded counter always finds a free slot")
}

/// Shells out to an external conversion binary, e.g. `heif-convert` or
/// `sips`. The binary is invoked as `{binary} {src} {dest} [-q quality]` for
/// jpeg output — hosts targeting a different tool's CLI shape should
/// implement `ConversionService` directly instead.
pub struct ShellConversionService {
    binary: PathBuf,
}

impl ShellConversionService {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self { binary: binary.into() }
    }
}

#[async_trait]
impl ConversionService for ShellConversionService {
    async fn convert(&self, src_path: &Path, opts: ConvertOptions) -> Result<ConvertOutcome> {
        let ext = src_path
            .extension()
            .map(|e| e.to_string_lossy().to_string())
            .unwrap_or_default();
        if !self.can_convert(&ext) {
            return Err(ConvertError::Unsupported { ext }.into());
        }

        let dest_path = resolve_dest_path(src_path, &opts).await;
        let quality = if opts.output_format.eq_ignore_ascii_case("jpeg") {
            Some(opts.quality.unwrap_or(DEFAULT_JPEG_QUALITY))
        } else {
            opts.quality
        };

        let mut cmd = Command::new(&self.binary);
        cmd.arg(src_path).arg(&dest_path);
        if let Some(quality) = quality {
            cmd.arg("-q").arg(quality.to_string());
        }

        let started = Instant::now();
        let output = cmd.output().await.map_err(|e| ConvertError::Io {
            path: src_path.to_path_buf(),
            source: e,
        })?;

        if !output.status.success() {
            return Err(ConvertError::ToolFailed {
                src: src_path.to_path_buf(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            }
            .into());
        }

        Ok(ConvertOutcome {
            src_path: src_path.to_path_buf(),
            dest_path,
            format: opts.output_format,
            duration_ms: started.elapsed().as_millis() as u64,
        })
    }
}
