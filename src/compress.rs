use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{info, warn};

use crate::error::ArchiverError;
use crate::tools::{find_any, path_arg, run_cmd};

/// Savings below this fraction trigger the aggressive pass.
const MIN_SAVINGS: f64 = 0.10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pass {
    pub name: &'static str,
    pub preset: &'static str,
    pub dpi: u32,
}

pub const MODERATE: Pass = Pass {
    name: "moderate",
    preset: "/ebook",
    dpi: 144,
};

pub const AGGRESSIVE: Pass = Pass {
    name: "aggressive",
    preset: "/screen",
    dpi: 96,
};

#[derive(Debug, Clone, Serialize)]
pub struct CompressionOutcome {
    pub file: String,
    pub original_bytes: u64,
    pub final_bytes: u64,
    pub pass: Option<&'static str>,
    pub replaced: bool,
}

impl CompressionOutcome {
    pub fn savings_percent(&self) -> f64 {
        if self.original_bytes == 0 {
            return 0.0;
        }
        (1.0 - self.final_bytes as f64 / self.original_bytes as f64) * 100.0
    }
}

pub trait Compressor: Send + Sync {
    fn compress(&self, path: &Path) -> Result<CompressionOutcome, ArchiverError>;
}

/// Recompresses PDFs with Ghostscript's `pdfwrite` device.
#[derive(Debug, Clone)]
pub struct Ghostscript {
    executable: PathBuf,
}

impl Ghostscript {
    pub fn locate() -> Result<Self, ArchiverError> {
        find_any(&["gs", "ghostscript", "gswin64c"])
            .map(|executable| Self { executable })
            .ok_or_else(|| ArchiverError::MissingTool("ghostscript".to_string()))
    }

    pub fn executable(&self) -> &Path {
        &self.executable
    }

    pub fn pass_args(pass: &Pass, input: &Path, output: &Path) -> Vec<String> {
        let dpi = pass.dpi.to_string();
        vec![
            "-sDEVICE=pdfwrite".to_string(),
            "-dCompatibilityLevel=1.4".to_string(),
            format!("-dPDFSETTINGS={}", pass.preset),
            "-dNOPAUSE".to_string(),
            "-dQUIET".to_string(),
            "-dBATCH".to_string(),
            "-dDetectDuplicateImages=true".to_string(),
            "-sColorConversionStrategy=RGB".to_string(),
            "-dProcessColorModel=/DeviceRGB".to_string(),
            "-dAutoFilterColorImages=false".to_string(),
            "-dColorImageFilter=/DCTEncode".to_string(),
            "-dAutoFilterGrayImages=false".to_string(),
            "-dGrayImageFilter=/DCTEncode".to_string(),
            "-dColorImageDownsampleType=/Bicubic".to_string(),
            format!("-dColorImageResolution={dpi}"),
            "-dGrayImageDownsampleType=/Bicubic".to_string(),
            format!("-dGrayImageResolution={dpi}"),
            format!("-sOutputFile={}", path_arg(output)),
            path_arg(input),
        ]
    }

    /// Renders the first page of `pdf` as a small JPEG.
    pub fn thumbnail(&self, pdf: &Path, output: &Path) -> Result<(), ArchiverError> {
        if let Some(parent) = output.parent() {
            fs::create_dir_all(parent).map_err(|err| ArchiverError::Filesystem(err.to_string()))?;
        }
        let args = vec![
            "-sDEVICE=jpeg".to_string(),
            "-dFirstPage=1".to_string(),
            "-dLastPage=1".to_string(),
            "-r40".to_string(),
            "-dJPEGQ=75".to_string(),
            "-dNOPAUSE".to_string(),
            "-dQUIET".to_string(),
            "-dBATCH".to_string(),
            format!("-sOutputFile={}", path_arg(output)),
            path_arg(pdf),
        ];
        run_cmd(&self.executable, &args, None)
    }
}

impl Compressor for Ghostscript {
    fn compress(&self, path: &Path) -> Result<CompressionOutcome, ArchiverError> {
        compress_with(path, |pass, input, output| {
            run_cmd(&self.executable, &Self::pass_args(pass, input, output), None)
        })
    }
}

/// Two-pass selection shared by every backend: run the moderate pass, fall
/// back to the aggressive one when it saved too little, and replace the
/// original only with a strictly smaller result.
pub fn compress_with<F>(path: &Path, run_pass: F) -> Result<CompressionOutcome, ArchiverError>
where
    F: Fn(&Pass, &Path, &Path) -> Result<(), ArchiverError>,
{
    let original_bytes = fs::metadata(path)
        .map_err(|_| ArchiverError::ArtifactNotFound(path.display().to_string()))?
        .len();
    let file = path
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_default();
    info!(%file, bytes = original_bytes, "compressing");

    let mut best: Option<(Pass, PathBuf, u64)> = None;
    for pass in [MODERATE, AGGRESSIVE] {
        let output = temp_output(path, pass.name);
        if let Err(err) = run_pass(&pass, path, &output) {
            warn!(%file, pass = pass.name, error = %err, "compression pass failed");
            discard(&output);
            continue;
        }
        let size = match fs::metadata(&output) {
            Ok(meta) => meta.len(),
            Err(_) => continue,
        };
        match &best {
            Some((_, _, best_size)) if *best_size <= size => discard(&output),
            _ => {
                if let Some((_, previous, _)) = best.take() {
                    discard(&previous);
                }
                best = Some((pass, output, size));
            }
        }
        let good_enough = best
            .as_ref()
            .map(|(_, _, size)| (*size as f64) <= original_bytes as f64 * (1.0 - MIN_SAVINGS))
            .unwrap_or(false);
        if good_enough {
            break;
        }
    }

    let mut outcome = CompressionOutcome {
        file,
        original_bytes,
        final_bytes: original_bytes,
        pass: None,
        replaced: false,
    };
    let Some((pass, output, size)) = best else {
        return Ok(outcome);
    };
    if size >= original_bytes {
        info!(file = %outcome.file, size, "compression did not shrink file, keeping original");
        discard(&output);
        return Ok(outcome);
    }

    fs::rename(&output, path).map_err(|err| {
        discard(&output);
        ArchiverError::Filesystem(format!("replace {}: {err}", path.display()))
    })?;
    outcome.final_bytes = size;
    outcome.pass = Some(pass.name);
    outcome.replaced = true;
    info!(
        file = %outcome.file,
        pass = pass.name,
        before = original_bytes,
        after = size,
        "compressed ({:.1}% smaller)",
        outcome.savings_percent()
    );
    Ok(outcome)
}

fn temp_output(path: &Path, suffix: &str) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|stem| stem.to_string_lossy().to_string())
        .unwrap_or_default();
    path.with_file_name(format!("{stem}_{suffix}.tmp"))
}

fn discard(path: &Path) {
    if path.exists() {
        let _ = fs::remove_file(path);
    }
}
