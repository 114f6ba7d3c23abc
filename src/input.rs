//! Input execution boundary. Decoded args become concrete commands here;
//! one driver carries them out through enigo, the other only narrates.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::action::ActionKind;
use crate::errors::{DeskDriverError, DeskDriverResult};

// ── Commands ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointerButton {
    Left,
    Right,
    Middle,
}

impl PointerButton {
    fn from_arg(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "left" => Some(Self::Left),
            "right" => Some(Self::Right),
            "middle" => Some(Self::Middle),
            _ => None,
        }
    }
}

impl std::fmt::Display for PointerButton {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Left => "left",
            Self::Right => "right",
            Self::Middle => "middle",
        };
        f.write_str(s)
    }
}

/// A fully resolved, ready-to-dispatch input operation. Pointer kinds carry
/// the device-space point the resolver produced.
#[derive(Debug, Clone, PartialEq)]
pub enum InputCommand {
    Move { x: i32, y: i32, duration: f64 },
    Click { x: i32, y: i32, button: PointerButton, clicks: u32, interval: f64 },
    Type { text: String, interval: f64 },
    Hotkey { keys: Vec<String> },
    Scroll { amount: i32 },
    Drag { x: i32, y: i32, duration: f64 },
    Wait { seconds: f64 },
    NoOp,
}

impl InputCommand {
    /// Build a command from a decoded action. `point` is the resolved
    /// device-space target and is required for pointer kinds.
    pub fn from_action(
        kind: ActionKind,
        args: &serde_json::Map<String, Value>,
        point: Option<(i32, i32)>,
    ) -> DeskDriverResult<Self> {
        let need_point = || {
            point.ok_or_else(|| {
                DeskDriverError::Input(format!("{kind} requires a resolved point"))
            })
        };
        match kind {
            ActionKind::Move => {
                let (x, y) = need_point()?;
                Ok(Self::Move { x, y, duration: arg_f64(args, "duration", 0.0)? })
            }
            ActionKind::Click => {
                let (x, y) = need_point()?;
                Ok(Self::Click {
                    x,
                    y,
                    button: arg_button(args)?,
                    clicks: arg_clicks(args, 1)?,
                    interval: arg_f64(args, "interval", 0.1)?,
                })
            }
            ActionKind::DoubleClick => {
                let (x, y) = need_point()?;
                Ok(Self::Click { x, y, button: arg_button(args)?, clicks: 2, interval: 0.1 })
            }
            ActionKind::RightClick => {
                let (x, y) = need_point()?;
                Ok(Self::Click { x, y, button: PointerButton::Right, clicks: 1, interval: 0.1 })
            }
            ActionKind::Type => Ok(Self::Type {
                text: arg_text(args)?,
                interval: arg_f64(args, "interval", 0.02)?,
            }),
            ActionKind::Hotkey => Ok(Self::Hotkey { keys: arg_keys(args)? }),
            ActionKind::Scroll => {
                let amount = arg_i64(args, "amount", -600)?
                    .clamp(i64::from(i32::MIN), i64::from(i32::MAX));
                Ok(Self::Scroll { amount: amount as i32 })
            }
            ActionKind::Drag => {
                let (x, y) = need_point()?;
                Ok(Self::Drag { x, y, duration: arg_f64(args, "duration", 0.2)? })
            }
            ActionKind::Wait => Ok(Self::Wait { seconds: arg_f64(args, "seconds", 0.5)? }),
            ActionKind::NoOp => Ok(Self::NoOp),
            ActionKind::ClickText | ActionKind::UiaInvoke | ActionKind::UiaSetValue => Err(
                DeskDriverError::Input(format!("{kind} is not a direct input command")),
            ),
        }
    }

    /// Plain left click at a point, used when a capability backend has
    /// already located the target.
    pub fn click_at(x: i32, y: i32) -> Self {
        Self::Click { x, y, button: PointerButton::Left, clicks: 1, interval: 0.1 }
    }

    /// Human-readable account of what the command does.
    pub fn describe(&self) -> String {
        match self {
            Self::Move { x, y, duration } => format!("move to {x},{y} ({duration}s)"),
            Self::Click { x, y, button, clicks, .. } => {
                format!("click {button} {clicks}x at {x},{y}")
            }
            Self::Type { text, .. } => format!("type '{text}'"),
            Self::Hotkey { keys } => format!("hotkey {}", keys.join("+")),
            Self::Scroll { amount } => format!("scroll {amount}"),
            Self::Drag { x, y, duration } => format!("drag to {x},{y} ({duration}s)"),
            Self::Wait { seconds } => format!("wait {seconds}s"),
            Self::NoOp => "no-op".into(),
        }
    }
}

fn arg_f64(
    args: &serde_json::Map<String, Value>,
    key: &str,
    default: f64,
) -> DeskDriverResult<f64> {
    let Some(v) = args.get(key) else { return Ok(default) };
    let parsed = match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    match parsed {
        Some(f) if f.is_finite() && f >= 0.0 => Ok(f),
        _ => Err(DeskDriverError::Input(format!("invalid {key}: {v}"))),
    }
}

fn arg_i64(
    args: &serde_json::Map<String, Value>,
    key: &str,
    default: i64,
) -> DeskDriverResult<i64> {
    let Some(v) = args.get(key) else { return Ok(default) };
    let parsed = match v {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => {
            let t = s.trim();
            t.parse::<i64>().ok().or_else(|| t.parse::<f64>().ok().map(|f| f as i64))
        }
        _ => None,
    };
    parsed.ok_or_else(|| DeskDriverError::Input(format!("invalid {key}: {v}")))
}

fn arg_button(args: &serde_json::Map<String, Value>) -> DeskDriverResult<PointerButton> {
    match args.get("button") {
        None | Some(Value::Null) => Ok(PointerButton::Left),
        Some(Value::String(s)) => PointerButton::from_arg(s)
            .ok_or_else(|| DeskDriverError::Input(format!("invalid button: {s}"))),
        Some(v) => Err(DeskDriverError::Input(format!("invalid button: {v}"))),
    }
}

fn arg_clicks(args: &serde_json::Map<String, Value>, default: i64) -> DeskDriverResult<u32> {
    let n = arg_i64(args, "clicks", default)?;
    u32::try_from(n).map_err(|_| DeskDriverError::Input(format!("invalid clicks: {n}")))
}

fn arg_text(args: &serde_json::Map<String, Value>) -> DeskDriverResult<String> {
    match args.get("text") {
        None | Some(Value::Null) => Ok(String::new()),
        Some(Value::String(s)) => Ok(s.clone()),
        Some(v @ (Value::Number(_) | Value::Bool(_))) => Ok(v.to_string()),
        Some(v) => Err(DeskDriverError::Input(format!("invalid text: {v}"))),
    }
}

fn arg_keys(args: &serde_json::Map<String, Value>) -> DeskDriverResult<Vec<String>> {
    match args.get("keys") {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(items)) => items
            .iter()
            .map(|v| match v {
                Value::String(s) => Ok(s.clone()),
                Value::Number(n) => Ok(n.to_string()),
                other => Err(DeskDriverError::Input(format!("invalid key: {other}"))),
            })
            .collect(),
        Some(v) => Err(DeskDriverError::Input(format!("invalid keys: {v}"))),
    }
}

// ── Drivers ───────────────────────────────────────────────────────────────

/// Carries out commands against the machine and reports what happened.
#[async_trait]
pub trait InputDriver: Send + Sync {
    /// Perform the command; the returned string is the step observation.
    async fn perform(&self, cmd: &InputCommand) -> DeskDriverResult<String>;

    /// Current pointer location in device pixels.
    async fn cursor_position(&self) -> DeskDriverResult<(i32, i32)>;
}

pub struct EnigoDriver {
    enigo: Arc<Mutex<enigo::Enigo>>,
}

impl EnigoDriver {
    pub fn new() -> DeskDriverResult<Self> {
        let enigo = enigo::Enigo::new(&enigo::Settings::default())
            .map_err(|e| DeskDriverError::Input(format!("input backend init: {e}")))?;
        Ok(Self { enigo: Arc::new(Mutex::new(enigo)) })
    }

    // enigo calls block, so they run on the blocking pool.
    async fn blocking<T, F>(&self, f: F) -> DeskDriverResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut enigo::Enigo) -> DeskDriverResult<T> + Send + 'static,
    {
        let enigo = Arc::clone(&self.enigo);
        tokio::task::spawn_blocking(move || {
            let mut guard = enigo
                .lock()
                .map_err(|_| DeskDriverError::Input("input backend lock poisoned".into()))?;
            f(&mut guard)
        })
        .await
        .map_err(|e| DeskDriverError::Input(format!("input task failed: {e}")))?
    }
}

fn input_err(e: enigo::InputError) -> DeskDriverError {
    DeskDriverError::Input(e.to_string())
}

fn sleep_secs(v: f64) -> Duration {
    Duration::try_from_secs_f64(v).unwrap_or(Duration::ZERO)
}

#[async_trait]
impl InputDriver for EnigoDriver {
    async fn perform(&self, cmd: &InputCommand) -> DeskDriverResult<String> {
        use enigo::{Axis, Coordinate, Direction, Keyboard, Mouse};

        match cmd.clone() {
            InputCommand::Move { x, y, duration } => {
                self.blocking(move |en| {
                    en.move_mouse(x, y, Coordinate::Abs).map_err(input_err)?;
                    std::thread::sleep(sleep_secs(duration));
                    Ok(())
                })
                .await?;
            }
            InputCommand::Click { x, y, button, clicks, interval } => {
                self.blocking(move |en| {
                    en.move_mouse(x, y, Coordinate::Abs).map_err(input_err)?;
                    for i in 0..clicks {
                        en.button(map_button(button), Direction::Click).map_err(input_err)?;
                        if i + 1 < clicks {
                            std::thread::sleep(sleep_secs(interval));
                        }
                    }
                    Ok(())
                })
                .await?;
            }
            InputCommand::Type { text, interval } => {
                self.blocking(move |en| {
                    if interval > 0.0 {
                        for ch in text.chars() {
                            en.text(&ch.to_string()).map_err(input_err)?;
                            std::thread::sleep(sleep_secs(interval));
                        }
                    } else {
                        en.text(&text).map_err(input_err)?;
                    }
                    Ok(())
                })
                .await?;
            }
            InputCommand::Hotkey { keys } => {
                self.blocking(move |en| {
                    let mapped = keys
                        .iter()
                        .map(|k| key_from_name(k))
                        .collect::<DeskDriverResult<Vec<_>>>()?;
                    // Modifiers go down in order, then up in reverse.
                    for k in &mapped {
                        en.key(*k, Direction::Press).map_err(input_err)?;
                    }
                    for k in mapped.iter().rev() {
                        en.key(*k, Direction::Release).map_err(input_err)?;
                    }
                    Ok(())
                })
                .await?;
            }
            InputCommand::Scroll { amount } => {
                self.blocking(move |en| {
                    // Wire amounts are wheel units (120 per notch), positive up.
                    // enigo takes notches, positive down.
                    let mut notches = -amount / 120;
                    if notches == 0 && amount != 0 {
                        notches = if amount > 0 { -1 } else { 1 };
                    }
                    en.scroll(notches, Axis::Vertical).map_err(input_err)
                })
                .await?;
            }
            InputCommand::Drag { x, y, duration } => {
                self.blocking(move |en| {
                    en.button(enigo::Button::Left, Direction::Press).map_err(input_err)?;
                    std::thread::sleep(Duration::from_millis(50));
                    en.move_mouse(x, y, Coordinate::Abs).map_err(input_err)?;
                    std::thread::sleep(sleep_secs(duration));
                    en.button(enigo::Button::Left, Direction::Release).map_err(input_err)
                })
                .await?;
            }
            InputCommand::Wait { seconds } => {
                tokio::time::sleep(sleep_secs(seconds)).await;
            }
            InputCommand::NoOp => {}
        }
        Ok(cmd.describe())
    }

    async fn cursor_position(&self) -> DeskDriverResult<(i32, i32)> {
        use enigo::Mouse;
        self.blocking(|en| en.location().map_err(input_err)).await
    }
}

fn map_button(button: PointerButton) -> enigo::Button {
    match button {
        PointerButton::Left => enigo::Button::Left,
        PointerButton::Right => enigo::Button::Right,
        PointerButton::Middle => enigo::Button::Middle,
    }
}

fn key_from_name(name: &str) -> DeskDriverResult<enigo::Key> {
    use enigo::Key;

    let lower = name.trim().to_ascii_lowercase();
    let key = match lower.as_str() {
        "enter" | "return" => Key::Return,
        "tab" => Key::Tab,
        "escape" | "esc" => Key::Escape,
        "backspace" => Key::Backspace,
        "control" | "ctrl" => Key::Control,
        "shift" => Key::Shift,
        "alt" | "option" => Key::Alt,
        "meta" | "command" | "super" | "win" | "windows" => Key::Meta,
        "delete" | "del" => Key::Delete,
        "space" => Key::Space,
        "home" => Key::Home,
        "end" => Key::End,
        "pageup" => Key::PageUp,
        "pagedown" => Key::PageDown,
        "up" => Key::UpArrow,
        "down" => Key::DownArrow,
        "left" => Key::LeftArrow,
        "right" => Key::RightArrow,
        other => {
            if let Some(k) = function_key(other) {
                k
            } else {
                let mut chars = other.chars();
                match (chars.next(), chars.next()) {
                    (Some(c), None) => Key::Unicode(c),
                    _ => {
                        return Err(DeskDriverError::Input(format!("unsupported key: {name}")))
                    }
                }
            }
        }
    };
    Ok(key)
}

fn function_key(name: &str) -> Option<enigo::Key> {
    use enigo::Key;
    let n = name.strip_prefix('f')?.parse::<u8>().ok()?;
    let key = match n {
        1 => Key::F1,
        2 => Key::F2,
        3 => Key::F3,
        4 => Key::F4,
        5 => Key::F5,
        6 => Key::F6,
        7 => Key::F7,
        8 => Key::F8,
        9 => Key::F9,
        10 => Key::F10,
        11 => Key::F11,
        12 => Key::F12,
        _ => return None,
    };
    Some(key)
}

/// Dry-run driver. Performs nothing, tracks a virtual cursor, and reports
/// `(dry-run)` observations in place of real ones.
pub struct SimulatedInput {
    cursor: Mutex<(i32, i32)>,
}

impl SimulatedInput {
    pub fn new() -> Self {
        Self { cursor: Mutex::new((0, 0)) }
    }

    fn set_cursor(&self, x: i32, y: i32) -> DeskDriverResult<()> {
        let mut guard = self
            .cursor
            .lock()
            .map_err(|_| DeskDriverError::Input("cursor lock poisoned".into()))?;
        *guard = (x, y);
        Ok(())
    }
}

impl Default for SimulatedInput {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl InputDriver for SimulatedInput {
    async fn perform(&self, cmd: &InputCommand) -> DeskDriverResult<String> {
        match *cmd {
            InputCommand::Move { x, y, .. }
            | InputCommand::Click { x, y, .. }
            | InputCommand::Drag { x, y, .. } => self.set_cursor(x, y)?,
            _ => {}
        }
        match cmd {
            InputCommand::NoOp => Ok("no-op".into()),
            other => Ok(format!("(dry-run) {}", other.describe())),
        }
    }

    async fn cursor_position(&self) -> DeskDriverResult<(i32, i32)> {
        let guard = self
            .cursor
            .lock()
            .map_err(|_| DeskDriverError::Input("cursor lock poisoned".into()))?;
        Ok(*guard)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn args(v: serde_json::Value) -> serde_json::Map<String, Value> {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn test_click_defaults() {
        let cmd =
            InputCommand::from_action(ActionKind::Click, &args(json!({})), Some((10, 20))).unwrap();
        assert_eq!(
            cmd,
            InputCommand::Click {
                x: 10,
                y: 20,
                button: PointerButton::Left,
                clicks: 1,
                interval: 0.1
            }
        );
    }

    #[test]
    fn test_double_and_right_click_presets() {
        let cmd =
            InputCommand::from_action(ActionKind::DoubleClick, &args(json!({})), Some((1, 2)))
                .unwrap();
        assert!(matches!(cmd, InputCommand::Click { clicks: 2, .. }));

        let cmd = InputCommand::from_action(
            ActionKind::RightClick,
            &args(json!({"button": "left"})),
            Some((1, 2)),
        )
        .unwrap();
        assert!(matches!(
            cmd,
            InputCommand::Click { button: PointerButton::Right, clicks: 1, .. }
        ));
    }

    #[test]
    fn test_pointer_kind_without_point_is_rejected() {
        let err = InputCommand::from_action(ActionKind::Move, &args(json!({})), None).unwrap_err();
        assert!(err.to_string().contains("MOVE requires a resolved point"));
    }

    #[test]
    fn test_scroll_and_wait_defaults() {
        let cmd = InputCommand::from_action(ActionKind::Scroll, &args(json!({})), None).unwrap();
        assert_eq!(cmd, InputCommand::Scroll { amount: -600 });

        let cmd = InputCommand::from_action(ActionKind::Wait, &args(json!({})), None).unwrap();
        assert_eq!(cmd, InputCommand::Wait { seconds: 0.5 });
    }

    #[test]
    fn test_type_coerces_numbers() {
        let cmd =
            InputCommand::from_action(ActionKind::Type, &args(json!({"text": 42})), None).unwrap();
        assert_eq!(cmd, InputCommand::Type { text: "42".into(), interval: 0.02 });
    }

    #[test]
    fn test_hotkey_keys_collected() {
        let cmd = InputCommand::from_action(
            ActionKind::Hotkey,
            &args(json!({"keys": ["ctrl", "shift", "t"]})),
            None,
        )
        .unwrap();
        assert_eq!(cmd, InputCommand::Hotkey { keys: vec!["ctrl".into(), "shift".into(), "t".into()] });
    }

    #[test]
    fn test_bad_args_are_rejected() {
        let err = InputCommand::from_action(
            ActionKind::Click,
            &args(json!({"button": "fourth"})),
            Some((0, 0)),
        )
        .unwrap_err();
        assert!(err.to_string().contains("invalid button"));

        let err = InputCommand::from_action(
            ActionKind::Wait,
            &args(json!({"seconds": -1.0})),
            None,
        )
        .unwrap_err();
        assert!(err.to_string().contains("invalid seconds"));

        let err = InputCommand::from_action(
            ActionKind::Move,
            &args(json!({"duration": "soon"})),
            Some((0, 0)),
        )
        .unwrap_err();
        assert!(err.to_string().contains("invalid duration"));
    }

    #[test]
    fn test_capability_kinds_are_not_commands() {
        let err =
            InputCommand::from_action(ActionKind::ClickText, &args(json!({})), None).unwrap_err();
        assert!(err.to_string().contains("CLICK_TEXT"));
    }

    #[test]
    fn test_describe_strings() {
        assert_eq!(
            InputCommand::Move { x: 5, y: 6, duration: 0.5 }.describe(),
            "move to 5,6 (0.5s)"
        );
        assert_eq!(InputCommand::click_at(10, 20).describe(), "click left 1x at 10,20");
        assert_eq!(
            InputCommand::Type { text: "hi".into(), interval: 0.02 }.describe(),
            "type 'hi'"
        );
        assert_eq!(
            InputCommand::Hotkey { keys: vec!["ctrl".into(), "c".into()] }.describe(),
            "hotkey ctrl+c"
        );
        assert_eq!(InputCommand::Scroll { amount: -600 }.describe(), "scroll -600");
        assert_eq!(
            InputCommand::Drag { x: 7, y: 8, duration: 0.2 }.describe(),
            "drag to 7,8 (0.2s)"
        );
        assert_eq!(InputCommand::Wait { seconds: 0.5 }.describe(), "wait 0.5s");
        assert_eq!(InputCommand::NoOp.describe(), "no-op");
    }

    #[tokio::test]
    async fn test_simulated_driver_narrates_and_tracks_cursor() {
        let driver = SimulatedInput::new();
        let obs = driver.perform(&InputCommand::click_at(10, 20)).await.unwrap();
        assert_eq!(obs, "(dry-run) click left 1x at 10,20");
        assert_eq!(driver.cursor_position().await.unwrap(), (10, 20));

        let obs = driver
            .perform(&InputCommand::Drag { x: 30, y: 40, duration: 0.2 })
            .await
            .unwrap();
        assert_eq!(obs, "(dry-run) drag to 30,40 (0.2s)");
        assert_eq!(driver.cursor_position().await.unwrap(), (30, 40));

        let obs = driver.perform(&InputCommand::NoOp).await.unwrap();
        assert_eq!(obs, "no-op");
    }

    #[tokio::test]
    async fn test_simulated_wait_does_not_sleep() {
        let driver = SimulatedInput::new();
        let started = std::time::Instant::now();
        let obs = driver.perform(&InputCommand::Wait { seconds: 30.0 }).await.unwrap();
        assert_eq!(obs, "(dry-run) wait 30s");
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_key_names_map() {
        assert!(matches!(key_from_name("CTRL"), Ok(enigo::Key::Control)));
        assert!(matches!(key_from_name("f5"), Ok(enigo::Key::F5)));
        assert!(matches!(key_from_name("a"), Ok(enigo::Key::Unicode('a'))));
        assert!(key_from_name("granular").is_err());
    }
}
