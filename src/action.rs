/// Closed vocabulary of actions the model is allowed to request.
///
/// Wire names are the SCREAMING_SNAKE_CASE strings the model emits in
/// `next_action`; `NoOp` maps to `"NONE"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionKind {
    Move,
    Click,
    DoubleClick,
    RightClick,
    Type,
    Hotkey,
    Scroll,
    Drag,
    Wait,
    NoOp,
    ClickText,
    UiaInvoke,
    UiaSetValue,
}

impl ActionKind {
    pub const WIRE_NAMES: [&'static str; 13] = [
        "MOVE",
        "CLICK",
        "DOUBLE_CLICK",
        "RIGHT_CLICK",
        "TYPE",
        "HOTKEY",
        "SCROLL",
        "DRAG",
        "WAIT",
        "NONE",
        "CLICK_TEXT",
        "UIA_INVOKE",
        "UIA_SET_VALUE",
    ];

    pub fn wire_name(&self) -> &'static str {
        match self {
            ActionKind::Move => "MOVE",
            ActionKind::Click => "CLICK",
            ActionKind::DoubleClick => "DOUBLE_CLICK",
            ActionKind::RightClick => "RIGHT_CLICK",
            ActionKind::Type => "TYPE",
            ActionKind::Hotkey => "HOTKEY",
            ActionKind::Scroll => "SCROLL",
            ActionKind::Drag => "DRAG",
            ActionKind::Wait => "WAIT",
            ActionKind::NoOp => "NONE",
            ActionKind::ClickText => "CLICK_TEXT",
            ActionKind::UiaInvoke => "UIA_INVOKE",
            ActionKind::UiaSetValue => "UIA_SET_VALUE",
        }
    }

    pub fn from_wire(name: &str) -> Option<Self> {
        match name {
            "MOVE" => Some(ActionKind::Move),
            "CLICK" => Some(ActionKind::Click),
            "DOUBLE_CLICK" => Some(ActionKind::DoubleClick),
            "RIGHT_CLICK" => Some(ActionKind::RightClick),
            "TYPE" => Some(ActionKind::Type),
            "HOTKEY" => Some(ActionKind::Hotkey),
            "SCROLL" => Some(ActionKind::Scroll),
            "DRAG" => Some(ActionKind::Drag),
            "WAIT" => Some(ActionKind::Wait),
            "NONE" => Some(ActionKind::NoOp),
            "CLICK_TEXT" => Some(ActionKind::ClickText),
            "UIA_INVOKE" => Some(ActionKind::UiaInvoke),
            "UIA_SET_VALUE" => Some(ActionKind::UiaSetValue),
            _ => None,
        }
    }

    /// Kinds whose args must resolve to an absolute device coordinate.
    pub fn needs_pointer(&self) -> bool {
        matches!(
            self,
            ActionKind::Move
                | ActionKind::Click
                | ActionKind::DoubleClick
                | ActionKind::RightClick
                | ActionKind::Drag
        )
    }

    /// Kinds that end with the OS cursor at a known position, making
    /// cursor telemetry usable as a verification signal.
    pub fn moves_cursor(&self) -> bool {
        self.needs_pointer() || matches!(self, ActionKind::ClickText)
    }

    /// Kinds served by an optional targeting backend rather than raw input.
    pub fn is_capability(&self) -> bool {
        matches!(
            self,
            ActionKind::ClickText | ActionKind::UiaInvoke | ActionKind::UiaSetValue
        )
    }

    /// Kinds whose effect should be visible on screen and is worth checking.
    pub fn expects_visual_change(&self) -> bool {
        !matches!(self, ActionKind::NoOp | ActionKind::Wait)
    }
}

impl serde::Serialize for ActionKind {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::ser::Serializer,
    {
        serializer.serialize_str(self.wire_name())
    }
}

impl<'de> serde::Deserialize<'de> for ActionKind {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::de::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        ActionKind::from_wire(&s)
            .ok_or_else(|| serde::de::Error::custom(format!("Invalid next_action: {s}")))
    }
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.wire_name())
    }
}

/// Canonical, validated form of one model answer.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ActionRecord {
    pub plan: String,
    pub say: Option<String>,
    #[serde(rename = "next_action")]
    pub kind: ActionKind,
    pub args: serde_json::Map<String, serde_json::Value>,
    pub done: bool,
}
