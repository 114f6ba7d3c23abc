use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::action::{ActionKind, ActionRecord};
use crate::coords;
use crate::decode::{DecoderOptions, ResponseDecoder};
use crate::errors::DeskDriverResult;
use crate::input::{InputCommand, InputDriver};
use crate::provider::{ModelProvider, StepContext};
use crate::screen::{self, ScreenSource};
use crate::stepper::overlay::ClickMarker;
use crate::stepper::record::{save_step_image, StepRecord, StepSink};
use crate::targeting::{self, ControlTree, TextLocator};
use crate::verify::{VerificationEngine, VerificationRecord};

#[derive(Debug, Clone)]
pub struct StepperConfig {
    pub max_steps: u32,
    /// Minimum spacing between the starts of successive iterations.
    pub min_interval_ms: u64,
    /// Same-step re-asks after a decode failure before the run aborts.
    pub decode_retries: u32,
    pub shot_width: u32,
    pub shot_quality: u8,
    pub ocr_min_score: f64,
}

impl Default for StepperConfig {
    fn default() -> Self {
        Self {
            max_steps: 50,
            min_interval_ms: 300,
            decode_retries: 2,
            shot_width: 1280,
            shot_quality: 70,
            ocr_min_score: 0.70,
        }
    }
}

/// How an instruction run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// The model declared the task finished.
    Done,
    MaxSteps,
    Cancelled,
    /// Decode failures persisted through every re-ask.
    DecodeAborted { message: String },
}

/// Drives one instruction at a time: capture, ask, decode, resolve,
/// dispatch, verify, record. Collaborators stay behind traits; the only
/// mutable loop state lives here.
pub struct Stepper {
    cfg: StepperConfig,
    provider: Arc<dyn ModelProvider>,
    screen: Arc<dyn ScreenSource>,
    input: Arc<dyn InputDriver>,
    sink: Arc<dyn StepSink>,
    verify: VerificationEngine,
    text_locator: Option<Arc<dyn TextLocator>>,
    control_tree: Option<Arc<dyn ControlTree>>,
    marker: Option<ClickMarker>,
    run_dir: PathBuf,
    stop: Arc<AtomicBool>,

    // Per-run context, reset by run_instruction.
    steps: Vec<serde_json::Value>,
    last_observation: String,
}

impl Stepper {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        cfg: StepperConfig,
        provider: Arc<dyn ModelProvider>,
        screen: Arc<dyn ScreenSource>,
        input: Arc<dyn InputDriver>,
        sink: Arc<dyn StepSink>,
        verify: VerificationEngine,
        run_dir: PathBuf,
        stop: Arc<AtomicBool>,
    ) -> Self {
        Self {
            cfg,
            provider,
            screen,
            input,
            sink,
            verify,
            text_locator: None,
            control_tree: None,
            marker: None,
            run_dir,
            stop,
            steps: Vec::new(),
            last_observation: String::new(),
        }
    }

    pub fn with_text_locator(mut self, locator: Arc<dyn TextLocator>) -> Self {
        self.text_locator = Some(locator);
        self
    }

    pub fn with_control_tree(mut self, tree: Arc<dyn ControlTree>) -> Self {
        self.control_tree = Some(tree);
        self
    }

    pub fn with_marker(mut self, marker: ClickMarker) -> Self {
        self.marker = Some(marker);
        self
    }

    pub async fn run_instruction(&mut self, instruction: &str) -> DeskDriverResult<RunOutcome> {
        let run_id = uuid::Uuid::new_v4().to_string();
        tracing::info!(run_id = %run_id, instruction = %instruction, "starting instruction run");
        self.steps.clear();
        self.last_observation.clear();

        let mut outcome = RunOutcome::MaxSteps;
        for idx in 1..=self.cfg.max_steps {
            // Cancellation is honored only here, never mid-step.
            if self.stop.load(Ordering::SeqCst) {
                tracing::info!(step = idx, "stop requested, ending run");
                outcome = RunOutcome::Cancelled;
                break;
            }
            let started = Instant::now();

            let frame = self.screen.capture(None).await?;
            let device = frame.dimensions();
            let shot = screen::encode_for_model(&frame, self.cfg.shot_width, self.cfg.shot_quality)?;

            let record = match self.decoded_step(instruction, &shot.data_url).await? {
                Ok(record) => record,
                Err(message) => {
                    tracing::error!(message = %message, "decode failures persisted, aborting run");
                    outcome = RunOutcome::DecodeAborted { message };
                    break;
                }
            };
            tracing::info!(
                step = idx,
                action = %record.kind,
                plan = %record.plan,
                done = record.done,
                "step decoded"
            );

            let (observation, resolved, verification) =
                self.act(&record, frame, (shot.width, shot.height), device).await?;

            // Artifact writes never take the run down.
            let screenshot_path = {
                let mut artifact = shot.image;
                if let (Some(marker), Some(point)) = (&self.marker, &resolved) {
                    let (ix, iy) =
                        device_to_image(point.x, point.y, device, (shot.width, shot.height));
                    marker.stamp(&mut artifact, ix, iy);
                }
                match save_step_image(&self.run_dir, &artifact, idx) {
                    Ok(path) => Some(path),
                    Err(e) => {
                        tracing::warn!(step = idx, error = %e, "failed to save step image");
                        None
                    }
                }
            };

            let step = StepRecord {
                step_index: idx,
                ts: chrono::Utc::now(),
                plan: record.plan.clone(),
                next_action: record.kind,
                args: record.args.clone(),
                say: record.say.clone(),
                observation: observation.clone(),
                resolved,
                verification,
                screenshot_path,
            };
            tracing::info!(step = idx, observation = %observation, "step complete");
            if let Some(say) = &step.say {
                tracing::info!(say = %say, "model says");
            }

            if let Err(e) = self.sink.append(&step).await {
                tracing::warn!(step = idx, error = %e, "step sink append failed");
            }
            self.steps.push(serde_json::to_value(&step)?);
            self.last_observation = observation;

            if record.done {
                outcome = RunOutcome::Done;
                break;
            }

            let min_interval = Duration::from_millis(self.cfg.min_interval_ms);
            let elapsed = started.elapsed();
            if elapsed < min_interval {
                tokio::time::sleep(min_interval - elapsed).await;
            }
        }

        tracing::info!(
            run_id = %run_id,
            outcome = ?outcome,
            steps = self.steps.len(),
            "instruction run finished"
        );
        Ok(outcome)
    }

    /// Ask and decode, re-asking the model with the decode diagnostic as
    /// context while retries remain. `Err(message)` means the run must abort.
    async fn decoded_step(
        &self,
        instruction: &str,
        image_data_url: &str,
    ) -> DeskDriverResult<Result<ActionRecord, String>> {
        let decoder = ResponseDecoder::new(DecoderOptions {
            allow_click_text: self.text_locator.is_some(),
            allow_control_tree: self.control_tree.is_some(),
        });

        let mut feedback: Option<String> = None;
        let mut last_error = String::new();
        for ask in 0..=self.cfg.decode_retries {
            let ctx = StepContext {
                instruction,
                last_observation: feedback.as_deref().unwrap_or(&self.last_observation),
                recent_steps: &self.steps,
                image_data_url: Some(image_data_url),
            };
            let raw = self.provider.produce_raw_answer(&ctx).await?;
            match decoder.decode(&raw) {
                Ok(record) => return Ok(Ok(record)),
                Err(e) => {
                    tracing::warn!(ask, error = %e, "decode failed");
                    last_error = e.to_string();
                    feedback = Some(format!(
                        "Your last answer could not be decoded: {e}. \
                         Answer again with ONLY the required JSON object."
                    ));
                }
            }
        }
        Ok(Err(last_error))
    }

    /// Resolve, dispatch, and verify one decoded action. Coordinate and
    /// execution failures turn into observations; only infrastructure
    /// failures (capture, telemetry plumbing) escalate.
    async fn act(
        &mut self,
        record: &ActionRecord,
        frame: image::RgbaImage,
        image_dims: (u32, u32),
        device_dims: (u32, u32),
    ) -> DeskDriverResult<(String, Option<coords::ResolvedPoint>, Option<VerificationRecord>)>
    {
        match record.kind {
            ActionKind::Move
            | ActionKind::Click
            | ActionKind::DoubleClick
            | ActionKind::RightClick
            | ActionKind::Drag => {
                let point = match coords::resolve(&record.args, image_dims, device_dims) {
                    Ok(p) => p,
                    Err(e) => {
                        tracing::warn!(error = %e, "coordinate resolution failed, recording no-op");
                        return Ok((format!("no-op: {e}"), None, None));
                    }
                };
                tracing::debug!(
                    x = point.x,
                    y = point.y,
                    source = %point.coord_source,
                    clamped = point.clamped,
                    "coordinates resolved"
                );
                let target = (point.x, point.y);
                match InputCommand::from_action(record.kind, &record.args, Some(target)) {
                    Ok(cmd) => {
                        let (obs, verification) =
                            self.dispatch(record.kind, &cmd, Some(target), frame).await?;
                        Ok((obs, Some(point), verification))
                    }
                    Err(e) => Ok((e.to_string(), Some(point), None)),
                }
            }

            ActionKind::ClickText => self.click_text(record, frame, image_dims, device_dims).await,

            ActionKind::UiaInvoke | ActionKind::UiaSetValue => {
                let (obs, verification) = self.drive_control(record, frame).await?;
                Ok((obs, None, verification))
            }

            ActionKind::Type
            | ActionKind::Hotkey
            | ActionKind::Scroll
            | ActionKind::Wait
            | ActionKind::NoOp => match InputCommand::from_action(record.kind, &record.args, None)
            {
                Ok(cmd) => {
                    let (obs, verification) =
                        self.dispatch(record.kind, &cmd, None, frame).await?;
                    Ok((obs, None, verification))
                }
                Err(e) => Ok((e.to_string(), None, None)),
            },
        }
    }

    /// Perform one command and run the after-side of verification. An input
    /// error becomes the observation and skips verification.
    async fn dispatch(
        &mut self,
        kind: ActionKind,
        cmd: &InputCommand,
        target: Option<(i32, i32)>,
        frame: image::RgbaImage,
    ) -> DeskDriverResult<(String, Option<VerificationRecord>)> {
        let cursor_before = if kind.moves_cursor() {
            self.input.cursor_position().await.ok()
        } else {
            None
        };
        let pending = self.verify.begin(kind, target, frame, cursor_before);

        match self.input.perform(cmd).await {
            Ok(observation) => {
                let verification = match pending {
                    Some(p) => {
                        let cursor_after = if kind.moves_cursor() {
                            self.input.cursor_position().await.ok()
                        } else {
                            None
                        };
                        Some(self.verify.finish(p, self.screen.as_ref(), cursor_after).await?)
                    }
                    None => None,
                };
                Ok((observation, verification))
            }
            Err(e) => {
                tracing::warn!(kind = %kind, error = %e, "input dispatch failed");
                Ok((e.to_string(), None))
            }
        }
    }

    async fn click_text(
        &mut self,
        record: &ActionRecord,
        frame: image::RgbaImage,
        image_dims: (u32, u32),
        device_dims: (u32, u32),
    ) -> DeskDriverResult<(String, Option<coords::ResolvedPoint>, Option<VerificationRecord>)>
    {
        let Some(locator) = self.text_locator.clone() else {
            return Ok(("OCR error: no text locator configured".into(), None, None));
        };
        let query = record
            .args
            .get("text")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .trim()
            .to_string();
        let min_score = record
            .args
            .get("min_score")
            .and_then(|v| v.as_f64())
            .unwrap_or(self.cfg.ocr_min_score);

        // The search runs on the model-facing frame, so hits re-enter the
        // resolver in that frame's space and come out in device pixels.
        let shot_image = if image_dims != device_dims {
            image::imageops::resize(
                &frame,
                image_dims.0,
                image_dims.1,
                image::imageops::FilterType::CatmullRom,
            )
        } else {
            frame.clone()
        };

        match locator.find_text(&shot_image, &query, min_score).await {
            Ok(Some(hit)) => {
                tracing::info!(
                    text = %query,
                    score = hit.score,
                    "text located"
                );
                let args = targeting::hit_to_args(hit.region, image_dims);
                match coords::resolve(&args, image_dims, device_dims) {
                    Ok(point) => {
                        let target = (point.x, point.y);
                        let cmd = InputCommand::click_at(target.0, target.1);
                        let (obs, verification) = self
                            .dispatch(ActionKind::ClickText, &cmd, Some(target), frame)
                            .await?;
                        Ok((obs, Some(point), verification))
                    }
                    Err(e) => Ok((format!("no-op: {e}"), None, None)),
                }
            }
            Ok(None) => Ok((
                format!("no match for text '{query}' (min_score={min_score})"),
                None,
                None,
            )),
            Err(e) => Ok((format!("OCR error: {e}"), None, None)),
        }
    }

    async fn drive_control(
        &mut self,
        record: &ActionRecord,
        frame: image::RgbaImage,
    ) -> DeskDriverResult<(String, Option<VerificationRecord>)> {
        let label = record.kind.wire_name();
        let Some(tree) = self.control_tree.clone() else {
            return Ok(("UIA error: no control tree configured".into(), None));
        };
        let selector = record
            .args
            .get("selector")
            .and_then(|v| v.as_object())
            .cloned()
            .unwrap_or_default();
        let scope = record
            .args
            .get("scope")
            .and_then(|v| v.as_str())
            .unwrap_or("active_window")
            .to_string();

        let hits = match tree.find(&selector, &scope).await {
            Ok(hits) => hits,
            Err(e) => return Ok((format!("UIA error: {e}"), None)),
        };
        let Some(hit) = hits.first() else {
            return Ok((format!("{label}: no matches"), None));
        };

        let pending = self.verify.begin(record.kind, hit.target(), frame, None);
        let op = match record.kind {
            ActionKind::UiaSetValue => {
                let value = match record.args.get("value") {
                    None | Some(serde_json::Value::Null) => String::new(),
                    Some(serde_json::Value::String(s)) => s.clone(),
                    Some(other) => other.to_string(),
                };
                tree.set_value(hit, &value).await
            }
            _ => tree.invoke(hit).await,
        };

        match op {
            Ok(true) => {
                let verification = match pending {
                    Some(p) => Some(self.verify.finish(p, self.screen.as_ref(), None).await?),
                    None => None,
                };
                Ok((format!("{label}: ok"), verification))
            }
            Ok(false) => Ok((format!("{label}: failed"), None)),
            Err(e) => Ok((format!("UIA error: {e}"), None)),
        }
    }
}

/// Map a device-space point back onto the (possibly downscaled) step image.
fn device_to_image(x: i32, y: i32, device: (u32, u32), image: (u32, u32)) -> (i32, i32) {
    let sx = f64::from(image.0) / f64::from(device.0.max(1));
    let sy = f64::from(image.1) / f64::from(device.1.max(1));
    ((f64::from(x) * sx).round() as i32, (f64::from(y) * sy).round() as i32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::SimulatedInput;
    use crate::screen::{crop_region, Region};
    use crate::stepper::record::StepRecord;
    use crate::targeting::{ControlHit, TextHit};
    use crate::verify::{VerifyConfig, VerifyOutcome};
    use std::collections::VecDeque;
    use std::sync::Mutex;

    struct ScriptedProvider {
        answers: Mutex<VecDeque<String>>,
        seen_observations: Mutex<Vec<String>>,
    }

    impl ScriptedProvider {
        fn new(answers: Vec<&str>) -> Self {
            Self {
                answers: Mutex::new(answers.into_iter().map(String::from).collect()),
                seen_observations: Mutex::new(Vec::new()),
            }
        }
    }

    const DONE_ANSWER: &str =
        r#"{"plan":"finish","say":null,"next_action":"NONE","args":{},"done":true}"#;

    #[async_trait::async_trait]
    impl crate::provider::ModelProvider for ScriptedProvider {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn produce_raw_answer(
            &self,
            ctx: &StepContext<'_>,
        ) -> DeskDriverResult<String> {
            self.seen_observations
                .lock()
                .unwrap()
                .push(ctx.last_observation.to_string());
            Ok(self
                .answers
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| DONE_ANSWER.to_string()))
        }
    }

    struct StaticScreen {
        width: u32,
        height: u32,
    }

    #[async_trait::async_trait]
    impl ScreenSource for StaticScreen {
        async fn capture(&self, region: Option<Region>) -> DeskDriverResult<image::RgbaImage> {
            let frame =
                image::RgbaImage::from_pixel(self.width, self.height, image::Rgba([30, 30, 30, 255]));
            Ok(match region {
                Some(r) => crop_region(&frame, r),
                None => frame,
            })
        }
    }

    #[derive(Default)]
    struct CollectingSink {
        records: Mutex<Vec<StepRecord>>,
    }

    #[async_trait::async_trait]
    impl StepSink for CollectingSink {
        async fn append(&self, record: &StepRecord) -> DeskDriverResult<()> {
            self.records.lock().unwrap().push(record.clone());
            Ok(())
        }
    }

    struct FixedLocator {
        hit: Option<TextHit>,
    }

    #[async_trait::async_trait]
    impl TextLocator for FixedLocator {
        async fn find_text(
            &self,
            _frame: &image::RgbaImage,
            _query: &str,
            _min_score: f64,
        ) -> DeskDriverResult<Option<TextHit>> {
            Ok(self.hit.clone())
        }
    }

    struct FixedTree {
        hits: Vec<ControlHit>,
        invoke_ok: bool,
    }

    #[async_trait::async_trait]
    impl ControlTree for FixedTree {
        async fn find(
            &self,
            _selector: &serde_json::Map<String, serde_json::Value>,
            _scope: &str,
        ) -> DeskDriverResult<Vec<ControlHit>> {
            Ok(self.hits.clone())
        }

        async fn invoke(&self, _hit: &ControlHit) -> DeskDriverResult<bool> {
            Ok(self.invoke_ok)
        }

        async fn set_value(&self, _hit: &ControlHit, _value: &str) -> DeskDriverResult<bool> {
            Ok(self.invoke_ok)
        }
    }

    fn quick_cfg(max_steps: u32) -> StepperConfig {
        StepperConfig {
            max_steps,
            min_interval_ms: 0,
            decode_retries: 1,
            ..StepperConfig::default()
        }
    }

    fn verify_off() -> VerificationEngine {
        VerificationEngine::new(VerifyConfig { enabled: false, ..VerifyConfig::default() })
    }

    fn verify_quick() -> VerificationEngine {
        VerificationEngine::seeded(
            VerifyConfig {
                max_retries: 1,
                settle_ms: 0,
                retry_delay_ms: 0,
                ..VerifyConfig::default()
            },
            11,
        )
    }

    struct Rig {
        stepper: Stepper,
        sink: Arc<CollectingSink>,
        provider: Arc<ScriptedProvider>,
        _dir: tempfile::TempDir,
    }

    fn rig(answers: Vec<&str>, cfg: StepperConfig, verify: VerificationEngine) -> Rig {
        let dir = tempfile::tempdir().unwrap();
        let sink = Arc::new(CollectingSink::default());
        let provider = Arc::new(ScriptedProvider::new(answers));
        let stepper = Stepper::new(
            cfg,
            provider.clone(),
            Arc::new(StaticScreen { width: 2400, height: 1600 }),
            Arc::new(SimulatedInput::new()),
            sink.clone(),
            verify,
            dir.path().to_path_buf(),
            Arc::new(AtomicBool::new(false)),
        );
        Rig { stepper, sink, provider, _dir: dir }
    }

    #[tokio::test]
    async fn test_done_answer_stops_after_one_step() {
        let mut r = rig(vec![DONE_ANSWER], quick_cfg(10), verify_off());
        let outcome = r.stepper.run_instruction("do nothing").await.unwrap();

        assert_eq!(outcome, RunOutcome::Done);
        let records = r.sink.records.lock().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].observation, "no-op");
        assert_eq!(records[0].next_action, ActionKind::NoOp);
        assert!(records[0].screenshot_path.is_some());
    }

    #[tokio::test]
    async fn test_wrapped_click_resolves_and_dispatches() {
        let raw = "<think>aim for the middle</think><answer>{\"plan\":\"x\",\"next_action\":\"CLICK\",\"args\":{\"x\":0.5,\"y\":0.5},\"done\":false}</answer>";
        let mut r = rig(vec![raw, DONE_ANSWER], quick_cfg(10), verify_off());
        let outcome = r.stepper.run_instruction("click the center").await.unwrap();

        assert_eq!(outcome, RunOutcome::Done);
        let records = r.sink.records.lock().unwrap();
        assert_eq!(records[0].observation, "(dry-run) click left 1x at 1200,800");
        let point = records[0].resolved.as_ref().unwrap();
        assert_eq!((point.x, point.y), (1200, 800));
        assert!(!point.clamped);
    }

    #[tokio::test]
    async fn test_decode_retry_feeds_error_back_then_recovers() {
        let mut r = rig(vec!["not json at all", DONE_ANSWER], quick_cfg(10), verify_off());
        let outcome = r.stepper.run_instruction("x").await.unwrap();

        assert_eq!(outcome, RunOutcome::Done);
        let seen = r.provider.seen_observations.lock().unwrap();
        assert!(seen[1].contains("could not be decoded"));
    }

    #[tokio::test]
    async fn test_persistent_decode_failure_aborts_run() {
        let mut r = rig(
            vec!["garbage", "still garbage", "worse"],
            quick_cfg(10),
            verify_off(),
        );
        let outcome = r.stepper.run_instruction("x").await.unwrap();

        assert!(matches!(outcome, RunOutcome::DecodeAborted { .. }));
        assert!(r.sink.records.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unresolvable_click_is_a_noop_step_and_run_continues() {
        let raw = r#"{"plan":"click","next_action":"CLICK","args":{"region":"top"},"done":false}"#;
        let mut r = rig(vec![raw, DONE_ANSWER], quick_cfg(10), verify_off());
        let outcome = r.stepper.run_instruction("x").await.unwrap();

        assert_eq!(outcome, RunOutcome::Done);
        let records = r.sink.records.lock().unwrap();
        assert_eq!(records.len(), 2);
        assert!(records[0].observation.starts_with("no-op: "));
        assert!(records[0].resolved.is_none());
    }

    #[tokio::test]
    async fn test_max_steps_bound() {
        let keep_going =
            r#"{"plan":"idle","next_action":"NONE","args":{},"done":false}"#;
        let mut r = rig(
            vec![keep_going, keep_going, keep_going, keep_going],
            quick_cfg(3),
            verify_off(),
        );
        let outcome = r.stepper.run_instruction("x").await.unwrap();

        assert_eq!(outcome, RunOutcome::MaxSteps);
        assert_eq!(r.sink.records.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_preset_stop_flag_cancels_before_first_capture() {
        let dir = tempfile::tempdir().unwrap();
        let sink = Arc::new(CollectingSink::default());
        let stop = Arc::new(AtomicBool::new(true));
        let mut stepper = Stepper::new(
            quick_cfg(5),
            Arc::new(ScriptedProvider::new(vec![DONE_ANSWER])),
            Arc::new(StaticScreen { width: 800, height: 600 }),
            Arc::new(SimulatedInput::new()),
            sink.clone(),
            verify_off(),
            dir.path().to_path_buf(),
            stop,
        );
        let outcome = stepper.run_instruction("x").await.unwrap();

        assert_eq!(outcome, RunOutcome::Cancelled);
        assert!(sink.records.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cursor_telemetry_confirms_click_on_static_screen() {
        let raw = r#"{"plan":"click","next_action":"CLICK","args":{"x":0.5,"y":0.5},"done":false}"#;
        let mut r = rig(vec![raw, DONE_ANSWER], quick_cfg(10), verify_quick());
        let outcome = r.stepper.run_instruction("x").await.unwrap();

        assert_eq!(outcome, RunOutcome::Done);
        let records = r.sink.records.lock().unwrap();
        let verification = records[0].verification.as_ref().unwrap();
        assert_eq!(verification.outcome, VerifyOutcome::Confirmed);
        assert!(verification.cursor_confirmed);
    }

    #[tokio::test]
    async fn test_click_text_reports_no_match() {
        let raw = r#"{"plan":"click ok","next_action":"CLICK_TEXT","args":{"text":"OK"},"done":false}"#;
        let mut r = rig(vec![raw, DONE_ANSWER], quick_cfg(10), verify_off());
        r.stepper = r.stepper.with_text_locator(Arc::new(FixedLocator { hit: None }));
        let outcome = r.stepper.run_instruction("x").await.unwrap();

        assert_eq!(outcome, RunOutcome::Done);
        let records = r.sink.records.lock().unwrap();
        assert_eq!(records[0].observation, "no match for text 'OK' (min_score=0.7)");
    }

    #[tokio::test]
    async fn test_click_text_hit_clicks_scaled_point() {
        let raw = r#"{"plan":"click ok","next_action":"CLICK_TEXT","args":{"text":"OK"},"done":false}"#;
        let hit = TextHit {
            region: Region::new(600, 400, 80, 26),
            score: 0.93,
            text: "OK".into(),
        };
        let mut r = rig(vec![raw, DONE_ANSWER], quick_cfg(10), verify_off());
        r.stepper = r.stepper.with_text_locator(Arc::new(FixedLocator { hit: Some(hit) }));
        let outcome = r.stepper.run_instruction("x").await.unwrap();

        assert_eq!(outcome, RunOutcome::Done);
        let records = r.sink.records.lock().unwrap();
        // Image 1280x853 → device 2400x1600: center (640, 413) lands at (1200, 775).
        assert_eq!(records[0].observation, "(dry-run) click left 1x at 1200,775");
        assert!(records[0].resolved.is_some());
    }

    #[tokio::test]
    async fn test_control_invoke_observations() {
        let raw = r#"{"plan":"invoke","next_action":"UIA_INVOKE","args":{"selector":{"name":"OK"}},"done":false}"#;
        let hit = ControlHit {
            id: "7".into(),
            name: "OK".into(),
            region: Some(Region::new(100, 100, 40, 20)),
        };
        let mut r = rig(vec![raw, DONE_ANSWER], quick_cfg(10), verify_off());
        r.stepper = r
            .stepper
            .with_control_tree(Arc::new(FixedTree { hits: vec![hit], invoke_ok: true }));
        r.stepper.run_instruction("x").await.unwrap();
        assert_eq!(r.sink.records.lock().unwrap()[0].observation, "UIA_INVOKE: ok");

        let raw = r#"{"plan":"invoke","next_action":"UIA_INVOKE","args":{},"done":false}"#;
        let mut r = rig(vec![raw, DONE_ANSWER], quick_cfg(10), verify_off());
        r.stepper =
            r.stepper.with_control_tree(Arc::new(FixedTree { hits: vec![], invoke_ok: true }));
        r.stepper.run_instruction("x").await.unwrap();
        assert_eq!(
            r.sink.records.lock().unwrap()[0].observation,
            "UIA_INVOKE: no matches"
        );
    }

    #[test]
    fn test_device_to_image_scaling() {
        assert_eq!(device_to_image(1200, 800, (2400, 1600), (1280, 853)), (640, 427));
        assert_eq!(device_to_image(0, 0, (2400, 1600), (1280, 853)), (0, 0));
    }
}
