//! Step records, the append-only run log, and step artifacts on disk.

use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::action::ActionKind;
use crate::coords::ResolvedPoint;
use crate::errors::DeskDriverResult;
use crate::verify::VerificationRecord;

/// One loop iteration, as persisted and as fed back to the model.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct StepRecord {
    pub step_index: u32,
    pub ts: chrono::DateTime<chrono::Utc>,
    pub plan: String,
    pub next_action: ActionKind,
    pub args: serde_json::Map<String, serde_json::Value>,
    pub say: Option<String>,
    pub observation: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved: Option<ResolvedPoint>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verification: Option<VerificationRecord>,
    pub screenshot_path: Option<String>,
}

/// Receives each completed step.
#[async_trait]
pub trait StepSink: Send + Sync {
    async fn append(&self, record: &StepRecord) -> DeskDriverResult<()>;
}

/// `steps.jsonl` under the run directory, one line per step, flushed as
/// soon as the step completes so a crash loses nothing.
pub struct RunLog {
    path: PathBuf,
}

impl RunLog {
    pub fn create(run_dir: &Path) -> DeskDriverResult<Self> {
        std::fs::create_dir_all(run_dir)?;
        Ok(Self { path: run_dir.join("steps.jsonl") })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl StepSink for RunLog {
    async fn append(&self, record: &StepRecord) -> DeskDriverResult<()> {
        let line = serde_json::to_string(record)?;
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{}", line)?;
        tracing::debug!(
            path = %self.path.display(),
            step = record.step_index,
            "step record flushed"
        );
        Ok(())
    }
}

/// Fresh `runs/<UTC timestamp>` directory under `base`.
pub fn create_run_dir(base: &Path) -> DeskDriverResult<PathBuf> {
    let ts = chrono::Utc::now().format("%Y%m%dT%H%M%S");
    let dir = base.join("runs").join(ts.to_string());
    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}

/// Persist the step's frame as `step_{index:04}_{ts}.png`, returning the
/// path as recorded in the step.
pub fn save_step_image(
    run_dir: &Path,
    image: &image::RgbaImage,
    step_index: u32,
) -> DeskDriverResult<String> {
    let ts = chrono::Utc::now().format("%Y%m%dT%H%M%S");
    let path = run_dir.join(format!("step_{step_index:04}_{ts}.png"));
    image.save(&path)?;
    Ok(path.to_string_lossy().into_owned())
}
