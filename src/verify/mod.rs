//! Post-action visual verification. Compares before/after captures over a
//! region of interest around the action target, with bounded recapture
//! retries, ROI growth, and a small capture jitter to break redraw ties.

pub mod delta;

use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::action::ActionKind;
use crate::errors::DeskDriverResult;
use crate::screen::{crop_region, Region, ScreenSource};

// Cursor telemetry within this distance of the target counts as arrival.
const CURSOR_TOLERANCE_PX: i32 = 3;

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct VerifyThresholds {
    pub pointer: f64,
    pub keys: f64,
    pub scroll: f64,
    pub control: f64,
}

impl Default for VerifyThresholds {
    fn default() -> Self {
        Self { pointer: 5.0, keys: 3.0, scroll: 10.0, control: 3.0 }
    }
}

impl VerifyThresholds {
    pub fn for_kind(&self, kind: ActionKind) -> f64 {
        match kind {
            ActionKind::Move
            | ActionKind::Click
            | ActionKind::DoubleClick
            | ActionKind::RightClick
            | ActionKind::Drag
            | ActionKind::ClickText => self.pointer,
            ActionKind::Type | ActionKind::Hotkey => self.keys,
            ActionKind::Scroll => self.scroll,
            ActionKind::UiaInvoke | ActionKind::UiaSetValue => self.control,
            ActionKind::Wait | ActionKind::NoOp => 0.0,
        }
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct VerifyConfig {
    pub enabled: bool,
    /// Side of the square ROI around a pointer target, device pixels.
    pub roi_edge: u32,
    /// ROI enlargement per retry.
    pub grow_factor: f64,
    /// Recaptures after the first, not counting the first attempt.
    pub max_retries: u32,
    /// Settle time between dispatch and the first after-capture.
    pub settle_ms: u64,
    pub retry_delay_ms: u64,
    /// Bound of the random capture offset applied before retries.
    pub jitter_px: i32,
    pub thresholds: VerifyThresholds,
}

impl Default for VerifyConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            roi_edge: 160,
            grow_factor: 1.6,
            max_retries: 2,
            settle_ms: 250,
            retry_delay_ms: 200,
            jitter_px: 12,
            thresholds: VerifyThresholds::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerifyOutcome {
    Confirmed,
    Inconclusive,
}

/// Advisory result attached to a step. Never escalates to an error.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct VerificationRecord {
    pub outcome: VerifyOutcome,
    /// Last computed ROI delta.
    pub delta: f64,
    pub threshold: f64,
    pub attempts: u32,
    /// ROI of the last capture, clamped to the frame.
    pub roi: Region,
    pub cursor_confirmed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Pre-action state carried across dispatch: the frame the model saw plus
/// cursor telemetry sampled just before the action.
pub struct PendingVerification {
    kind: ActionKind,
    target: Option<(i32, i32)>,
    before: image::RgbaImage,
    cursor_before: Option<(i32, i32)>,
    threshold: f64,
}

pub struct VerificationEngine {
    cfg: VerifyConfig,
    rng: StdRng,
}

impl VerificationEngine {
    pub fn new(cfg: VerifyConfig) -> Self {
        Self { cfg, rng: StdRng::from_entropy() }
    }

    /// Deterministic jitter, for reproducible runs and tests.
    pub fn seeded(cfg: VerifyConfig, seed: u64) -> Self {
        Self { cfg, rng: StdRng::seed_from_u64(seed) }
    }

    pub fn enabled(&self) -> bool {
        self.cfg.enabled
    }

    /// Freeze pre-action state. Returns None when verification is off or
    /// the kind cannot produce a visual change worth checking.
    pub fn begin(
        &self,
        kind: ActionKind,
        target: Option<(i32, i32)>,
        before: image::RgbaImage,
        cursor_before: Option<(i32, i32)>,
    ) -> Option<PendingVerification> {
        if !self.cfg.enabled || !kind.expects_visual_change() {
            return None;
        }
        let threshold = self.cfg.thresholds.for_kind(kind);
        Some(PendingVerification { kind, target, before, cursor_before, threshold })
    }

    /// Run the after side: wait, capture the ROI, compare, and retry with a
    /// grown (and, for pointer kinds, jittered) ROI while attempts remain.
    /// Capture failures propagate; a stubbornly unchanged screen does not.
    pub async fn finish(
        &mut self,
        pending: PendingVerification,
        screen: &dyn ScreenSource,
        cursor_after: Option<(i32, i32)>,
    ) -> DeskDriverResult<VerificationRecord> {
        tokio::time::sleep(Duration::from_millis(self.cfg.settle_ms)).await;

        let (fw, fh) = pending.before.dimensions();
        let mut roi = self.initial_roi(&pending, fw, fh);
        let max_attempts = self.cfg.max_retries + 1;
        let cursor_ok = cursor_corroborates(&pending, cursor_after);
        let mut attempts = 0u32;

        loop {
            let window = roi.clamped_to(fw, fh);
            let after = screen.capture(Some(window)).await?;
            let before_crop = crop_region(&pending.before, window);
            let delta = delta::mean_abs_diff(&before_crop, &after);
            attempts += 1;

            if delta >= pending.threshold {
                return Ok(VerificationRecord {
                    outcome: VerifyOutcome::Confirmed,
                    delta,
                    threshold: pending.threshold,
                    attempts,
                    roi: window,
                    cursor_confirmed: false,
                    reason: None,
                });
            }
            if cursor_ok {
                return Ok(VerificationRecord {
                    outcome: VerifyOutcome::Confirmed,
                    delta,
                    threshold: pending.threshold,
                    attempts,
                    roi: window,
                    cursor_confirmed: true,
                    reason: None,
                });
            }
            if attempts >= max_attempts {
                tracing::debug!(
                    delta,
                    threshold = pending.threshold,
                    attempts,
                    "verification exhausted retries"
                );
                return Ok(VerificationRecord {
                    outcome: VerifyOutcome::Inconclusive,
                    delta,
                    threshold: pending.threshold,
                    attempts,
                    roi: window,
                    cursor_confirmed: false,
                    reason: Some("delta_below_threshold".into()),
                });
            }

            roi = roi.grown(self.cfg.grow_factor);
            if pending.kind.moves_cursor() && self.cfg.jitter_px > 0 {
                let j = self.cfg.jitter_px;
                roi = roi.shifted(self.rng.gen_range(-j..=j), self.rng.gen_range(-j..=j));
            }
            tokio::time::sleep(Duration::from_millis(self.cfg.retry_delay_ms)).await;
        }
    }

    fn initial_roi(&self, pending: &PendingVerification, fw: u32, fh: u32) -> Region {
        match pending.target {
            Some((x, y)) => Region::centered(x, y, self.cfg.roi_edge),
            // No single target point: watch a generous central window.
            None => {
                Region::centered(fw as i32 / 2, fh as i32 / 2, self.cfg.roi_edge * 2)
            }
        }
    }
}

fn cursor_corroborates(
    pending: &PendingVerification,
    cursor_after: Option<(i32, i32)>,
) -> bool {
    if !pending.kind.moves_cursor() {
        return false;
    }
    let (Some(target), Some(before), Some(after)) =
        (pending.target, pending.cursor_before, cursor_after)
    else {
        return false;
    };
    let arrived = (after.0 - target.0).abs() <= CURSOR_TOLERANCE_PX
        && (after.1 - target.1).abs() <= CURSOR_TOLERANCE_PX;
    arrived && after != before
}
