use std::fmt;

use serde::{Deserialize, Serialize};

/// One step as the action role writes it, with element references into the current
/// ScreenState (1-based indices).
///
/// `scroll` follows the pyautogui sign convention: positive scrolls up.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ActionStep {
    Click { element: usize },
    DoubleClick { element: usize },
    RightClick { element: usize },
    Drag { from: usize, to: usize },
    TypeText {
        text: String,
        #[serde(default)]
        element: Option<usize>,
    },
    Press { key: String },
    Hotkey { keys: Vec<String> },
    Scroll {
        amount: i32,
        #[serde(default)]
        element: Option<usize>,
    },
    Wait { seconds: f64 },
}

/// Primitive operation in physical pixel coordinates, ready for a target machine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum UiOperation {
    Click { x: i32, y: i32 },
    DoubleClick { x: i32, y: i32 },
    RightClick { x: i32, y: i32 },
    Drag { from: (i32, i32), to: (i32, i32) },
    TypeText { text: String },
    Press { key: String },
    Hotkey { keys: Vec<String> },
    Scroll {
        amount: i32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        at: Option<(i32, i32)>,
    },
    Wait { millis: u64 },
}

impl fmt::Display for UiOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UiOperation::Click { x, y } => write!(f, "click({x}, {y})"),
            UiOperation::DoubleClick { x, y } => write!(f, "double_click({x}, {y})"),
            UiOperation::RightClick { x, y } => write!(f, "right_click({x}, {y})"),
            UiOperation::Drag { from, to } => write!(f, "drag({}, {} -> {}, {})", from.0, from.1, to.0, to.1),
            UiOperation::TypeText { text } => write!(f, "type({} chars)", text.chars().count()),
            UiOperation::Press { key } => write!(f, "press({key})"),
            UiOperation::Hotkey { keys } => write!(f, "hotkey({})", keys.join("+")),
            UiOperation::Scroll { amount, at: Some((x, y)) } => write!(f, "scroll({amount} at {x}, {y})"),
            UiOperation::Scroll { amount, at: None } => write!(f, "scroll({amount})"),
            UiOperation::Wait { millis } => write!(f, "wait({millis}ms)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn steps_parse_from_action_role_json() {
        let json = r#"[
            {"op": "click", "element": 3},
            {"op": "type_text", "text": "dogs"},
            {"op": "hotkey", "keys": ["ctrl", "s"]},
            {"op": "scroll", "amount": -5}
        ]"#;
        let steps: Vec<ActionStep> = serde_json::from_str(json).unwrap();
        assert_eq!(steps[0], ActionStep::Click { element: 3 });
        assert_eq!(steps[1], ActionStep::TypeText { text: "dogs".into(), element: None });
        assert_eq!(steps[3], ActionStep::Scroll { amount: -5, element: None });
    }

    #[test]
    fn unknown_op_is_rejected() {
        assert!(serde_json::from_str::<ActionStep>(r#"{"op": "teleport"}"#).is_err());
    }

    #[test]
    fn display_hides_typed_text() {
        let op = UiOperation::TypeText { text: "secret".into() };
        assert_eq!(op.to_string(), "type(6 chars)");
        assert_eq!(UiOperation::Hotkey { keys: vec!["ctrl".into(), "c".into()] }.to_string(), "hotkey(ctrl+c)");
    }
}
