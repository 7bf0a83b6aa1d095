//! Resolution of element references against a ScreenState.

use crate::executor::operations::{ActionStep, UiOperation};
use crate::perception::types::{ScreenState, UIElement};

/// Longest pause a single `wait` step may ask for.
pub const MAX_WAIT_SECS: f64 = 60.0;

fn element_center(screen: &ScreenState, index: usize) -> Result<(i32, i32), String> {
    screen
        .element(index)
        .map(|e: &UIElement| e.center_physical(&screen.meta))
        .ok_or_else(|| format!("element {index} is not on the current screen ({} elements)", screen.elements.len()))
}

/// Translate one step into pixel operations using the given screen's elements.
/// An unknown element reference is an execution failure, described by the error string.
pub fn resolve(step: &ActionStep, screen: &ScreenState) -> Result<Vec<UiOperation>, String> {
    let ops = match step {
        ActionStep::Click { element } => {
            let (x, y) = element_center(screen, *element)?;
            vec![UiOperation::Click { x, y }]
        }
        ActionStep::DoubleClick { element } => {
            let (x, y) = element_center(screen, *element)?;
            vec![UiOperation::DoubleClick { x, y }]
        }
        ActionStep::RightClick { element } => {
            let (x, y) = element_center(screen, *element)?;
            vec![UiOperation::RightClick { x, y }]
        }
        ActionStep::Drag { from, to } => vec![UiOperation::Drag {
            from: element_center(screen, *from)?,
            to: element_center(screen, *to)?,
        }],
        ActionStep::TypeText { text, element } => {
            let mut ops = Vec::with_capacity(2);
            if let Some(element) = element {
                let (x, y) = element_center(screen, *element)?;
                ops.push(UiOperation::Click { x, y });
            }
            ops.push(UiOperation::TypeText { text: text.clone() });
            ops
        }
        ActionStep::Press { key } => {
            if key.trim().is_empty() {
                return Err("press without a key".into());
            }
            vec![UiOperation::Press { key: key.trim().to_lowercase() }]
        }
        ActionStep::Hotkey { keys } => {
            let keys: Vec<String> = keys
                .iter()
                .map(|k| k.trim().to_lowercase())
                .filter(|k| !k.is_empty())
                .collect();
            if keys.is_empty() {
                return Err("hotkey without keys".into());
            }
            vec![UiOperation::Hotkey { keys }]
        }
        ActionStep::Scroll { amount, element } => {
            let at = element.map(|e| element_center(screen, e)).transpose()?;
            vec![UiOperation::Scroll { amount: *amount, at }]
        }
        ActionStep::Wait { seconds } => {
            let clamped = seconds.max(0.0).min(MAX_WAIT_SECS);
            if clamped < *seconds {
                tracing::warn!(requested = seconds, max = MAX_WAIT_SECS, "wait capped");
            }
            vec![UiOperation::Wait {
                millis: (clamped * 1000.0).round() as u64,
            }]
        }
    };
    Ok(ops)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::perception::pipeline::{normalize, RawElement};
    use crate::perception::types::{ElementType, ScreenshotMeta};

    fn screen() -> ScreenState {
        normalize(
            vec![
                RawElement {
                    kind: ElementType::Icon,
                    bbox: [0.0, 0.0, 0.1, 0.1],
                    interactive: true,
                    content: Some("Writer".into()),
                },
                RawElement {
                    kind: ElementType::Input,
                    bbox: [0.5, 0.5, 0.7, 0.6],
                    interactive: true,
                    content: Some("Search".into()),
                },
            ],
            ScreenshotMeta::new(1000, 500),
            None,
        )
    }

    #[test]
    fn click_uses_element_center() {
        let ops = resolve(&ActionStep::Click { element: 1 }, &screen()).unwrap();
        assert_eq!(ops, vec![UiOperation::Click { x: 50, y: 25 }]);
    }

    #[test]
    fn typing_into_an_element_focuses_it_first() {
        let ops = resolve(
            &ActionStep::TypeText {
                text: "dogs".into(),
                element: Some(2),
            },
            &screen(),
        )
        .unwrap();
        assert_eq!(ops[0], UiOperation::Click { x: 600, y: 275 });
        assert_eq!(ops[1], UiOperation::TypeText { text: "dogs".into() });
    }

    #[test]
    fn missing_element_is_a_failure() {
        let err = resolve(&ActionStep::Click { element: 9 }, &screen()).unwrap_err();
        assert!(err.contains("element 9"));
        assert!(resolve(&ActionStep::Hotkey { keys: vec![" ".into()] }, &screen()).is_err());
    }

    #[test]
    fn wait_and_keys_are_normalized() {
        assert_eq!(
            resolve(&ActionStep::Wait { seconds: 1.5 }, &screen()).unwrap(),
            vec![UiOperation::Wait { millis: 1500 }]
        );
        assert_eq!(
            resolve(&ActionStep::Press { key: " Enter ".into() }, &screen()).unwrap(),
            vec![UiOperation::Press { key: "enter".into() }]
        );
    }

    #[test]
    fn long_and_negative_waits_are_clamped() {
        assert_eq!(
            resolve(&ActionStep::Wait { seconds: 1e9 }, &screen()).unwrap(),
            vec![UiOperation::Wait { millis: 60_000 }]
        );
        assert_eq!(
            resolve(&ActionStep::Wait { seconds: -3.0 }, &screen()).unwrap(),
            vec![UiOperation::Wait { millis: 0 }]
        );
    }
}
