//! External normalization tools invoked as subprocesses.
//!
//! The geometry kernel converts vector drawings to a neutral solid-exchange file;
//! the page rasterizer splits a document into one image per page. Both sit behind
//! traits so the router can be exercised without the real binaries installed.

use std::path::{Path, PathBuf};
use std::process::Output;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, instrument};

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// Converts a vector drawing into a solid-exchange file at `output`.
///
/// On failure returns the kernel's diagnostic text verbatim.
#[async_trait]
pub trait GeometryKernel: Send + Sync {
    async fn convert(&self, input: &Path, output: &Path) -> Result<(), String>;

    /// Human-readable tool name for tracing.
    fn name(&self) -> &str;
}

/// Rasterizes every page of a document into `out_dir`, returning page images in order.
#[async_trait]
pub trait PageRasterizer: Send + Sync {
    async fn rasterize(&self, document: &Path, out_dir: &Path) -> Result<Vec<PathBuf>, String>;

    /// Human-readable tool name for tracing.
    fn name(&self) -> &str;
}

// ---------------------------------------------------------------------------
// OpenCascade DRAWEXE
// ---------------------------------------------------------------------------

/// Geometry kernel driven through a DRAW-style `-c "<script>"` command line.
#[derive(Debug, Clone)]
pub struct DrawExeKernel {
    program: String,
}

impl DrawExeKernel {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

#[async_trait]
impl GeometryKernel for DrawExeKernel {
    #[instrument(skip_all, fields(program = %self.program, input = %input.display()))]
    async fn convert(&self, input: &Path, output: &Path) -> Result<(), String> {
        let script = kernel_script(input, output)?;

        let result = Command::new(&self.program)
            .arg("-c")
            .arg(&script)
            .output()
            .await
            .map_err(|e| format!("failed to run {}: {e}", self.program))?;

        if !result.status.success() {
            return Err(diagnostic(&self.program, &result));
        }
        if !output.exists() {
            return Err(format!(
                "{} exited successfully but wrote no output",
                self.program
            ));
        }

        debug!(output = %output.display(), "kernel conversion complete");
        Ok(())
    }

    fn name(&self) -> &str {
        &self.program
    }
}

/// DRAW script converting `input` to `output`.
///
/// Paths are double-quoted and use `/` separators. DRAW substitutes `$`, `[`
/// and `]` even inside quotes, so paths containing them (or a quote or control
/// character) are refused rather than passed through.
fn kernel_script(input: &Path, output: &Path) -> Result<String, String> {
    Ok(format!(
        "read {}; write {}; exit",
        script_path(input)?,
        script_path(output)?
    ))
}

fn script_path(path: &Path) -> Result<String, String> {
    let text = path.to_string_lossy().replace('\\', "/");
    if let Some(bad) = text
        .chars()
        .find(|c| matches!(c, '"' | '$' | '[' | ']') || c.is_control())
    {
        return Err(format!(
            "path {} contains {bad:?}, which the kernel script cannot quote",
            path.display()
        ));
    }
    Ok(format!("\"{text}\""))
}

// ---------------------------------------------------------------------------
// Poppler pdftoppm
// ---------------------------------------------------------------------------

/// Page rasterizer backed by poppler's `pdftoppm`.
#[derive(Debug, Clone)]
pub struct PdftoppmRasterizer {
    program: String,
}

/// 72 DPI: one pixel per PDF point, the document's native resolution.
const NATIVE_DPI: &str = "72";

/// Prefix pdftoppm writes pages under.
const RAW_PREFIX: &str = "raw";

impl PdftoppmRasterizer {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

#[async_trait]
impl PageRasterizer for PdftoppmRasterizer {
    #[instrument(skip_all, fields(program = %self.program, document = %document.display()))]
    async fn rasterize(&self, document: &Path, out_dir: &Path) -> Result<Vec<PathBuf>, String> {
        let result = Command::new(&self.program)
            .arg("-r")
            .arg(NATIVE_DPI)
            .arg("-png")
            .arg(document)
            .arg(out_dir.join(RAW_PREFIX))
            .output()
            .await
            .map_err(|e| format!("failed to run {}: {e}", self.program))?;

        if !result.status.success() {
            return Err(diagnostic(&self.program, &result));
        }

        let pages = collect_pages(out_dir).await?;
        debug!(pages = pages.len(), "document rasterized");
        Ok(pages)
    }

    fn name(&self) -> &str {
        &self.program
    }
}

/// Gather `raw-<n>.png` files (pdftoppm pads `<n>` by page count), order them by
/// page number, and rename them to `page_<index>.png` with a 0-based index.
async fn collect_pages(out_dir: &Path) -> Result<Vec<PathBuf>, String> {
    let mut entries = tokio::fs::read_dir(out_dir)
        .await
        .map_err(|e| format!("cannot list {}: {e}", out_dir.display()))?;

    let mut numbered = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| format!("cannot list {}: {e}", out_dir.display()))?
    {
        let name = entry.file_name();
        if let Some(number) = raw_page_number(&name.to_string_lossy()) {
            numbered.push((number, entry.path()));
        }
    }
    numbered.sort_by_key(|(n, _)| *n);

    let mut pages = Vec::with_capacity(numbered.len());
    for (index, (_, raw)) in numbered.into_iter().enumerate() {
        let page = out_dir.join(format!("page_{index}.png"));
        tokio::fs::rename(&raw, &page)
            .await
            .map_err(|e| format!("cannot rename {}: {e}", raw.display()))?;
        pages.push(page);
    }
    Ok(pages)
}

fn raw_page_number(file_name: &str) -> Option<u32> {
    file_name
        .strip_prefix(RAW_PREFIX)?
        .strip_prefix('-')?
        .strip_suffix(".png")?
        .parse()
        .ok()
}

/// Tool diagnostic: stderr, else stdout, else the exit status.
fn diagnostic(program: &str, output: &Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr);
    if !stderr.trim().is_empty() {
        return stderr.into_owned();
    }
    let stdout = String::from_utf8_lossy(&output.stdout);
    if !stdout.trim().is_empty() {
        return stdout.into_owned();
    }
    format!("{program} exited with {}", output.status)
}
