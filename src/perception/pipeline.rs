//! Normalization of grounding-service detections into a [`ScreenState`].

use chrono::Utc;

use crate::perception::types::{ElementType, ScreenState, ScreenshotMeta, UIElement};

/// One detection as returned by the grounding service, before normalization.
#[derive(Debug, Clone)]
pub struct RawElement {
    pub kind: ElementType,
    pub bbox: [f32; 4],
    pub interactive: bool,
    pub content: Option<String>,
}

/// Build a ScreenState: indices follow service order starting at 1, boxes are clamped to the
/// unit square, each element gets its smallest enclosing parent.
pub fn normalize(raw: Vec<RawElement>, meta: ScreenshotMeta, annotated_image_base64: Option<String>) -> ScreenState {
    let mut elements: Vec<UIElement> = raw
        .into_iter()
        .enumerate()
        .map(|(i, r)| {
            let text = r.content.map(|c| c.trim().to_string()).filter(|c| !c.is_empty());
            UIElement {
                index: i + 1,
                kind: r.kind,
                bbox: clamp_bbox(r.bbox),
                label: text.clone().unwrap_or_else(|| r.kind.as_str().to_string()),
                text,
                interactive: r.interactive,
                parent: None,
            }
        })
        .collect();

    compute_hierarchy(&mut elements);
    let description = describe(&elements);

    ScreenState {
        elements,
        description,
        annotated_image_base64,
        meta,
        captured_at: Utc::now(),
    }
}

fn clamp_bbox(bbox: [f32; 4]) -> [f32; 4] {
    let [x1, y1, x2, y2] = bbox.map(|v| if v.is_finite() { v.clamp(0.0, 1.0) } else { 0.0 });
    [x1.min(x2), y1.min(y2), x1.max(x2), y1.max(y2)]
}

/// For each element, find its *smallest* enclosing element and record it as parent.
fn compute_hierarchy(elements: &mut [UIElement]) {
    let n = elements.len();
    if n == 0 {
        return;
    }

    let areas: Vec<f32> = elements
        .iter()
        .map(|e| {
            let [x1, y1, x2, y2] = e.bbox;
            (x2 - x1).max(0.0) * (y2 - y1).max(0.0)
        })
        .collect();

    let mut parents: Vec<Option<usize>> = vec![None; n];
    for i in 0..n {
        let [ix1, iy1, ix2, iy2] = elements[i].bbox;
        let mut best: Option<usize> = None;
        let mut best_area = f32::MAX;

        for j in 0..n {
            if i == j {
                continue;
            }
            let [jx1, jy1, jx2, jy2] = elements[j].bbox;
            // ~0.5% tolerance for imprecise boxes
            let tol = 0.005;
            let contains = jx1 <= ix1 + tol && jy1 <= iy1 + tol && jx2 >= ix2 - tol && jy2 >= iy2 - tol;
            if contains && areas[j] > areas[i] && areas[j] < best_area {
                best_area = areas[j];
                best = Some(j);
            }
        }
        parents[i] = best;
    }

    for (i, parent) in parents.into_iter().enumerate() {
        elements[i].parent = parent.map(|p| elements[p].index);
    }

    tracing::debug!(count = n, "element hierarchy computed");
}

/// `[3] button "Save" (interactive) in 1`, one line per element.
pub fn describe(elements: &[UIElement]) -> String {
    if elements.is_empty() {
        return "No UI elements detected.".to_string();
    }
    elements
        .iter()
        .map(|e| {
            let mut line = format!("[{}] {} \"{}\"", e.index, e.kind.as_str(), e.label);
            if e.interactive {
                line.push_str(" (interactive)");
            }
            if let Some(parent) = e.parent {
                line.push_str(&format!(" in {parent}"));
            }
            line
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(kind: ElementType, bbox: [f32; 4], content: Option<&str>) -> RawElement {
        RawElement {
            kind,
            bbox,
            interactive: kind != ElementType::Text,
            content: content.map(String::from),
        }
    }

    #[test]
    fn indices_follow_service_order() {
        let state = normalize(
            vec![
                raw(ElementType::Container, [0.0, 0.0, 1.0, 0.1], Some("toolbar")),
                raw(ElementType::Button, [0.1, 0.02, 0.2, 0.08], Some("Save")),
                raw(ElementType::Icon, [0.3, 0.02, 0.35, 0.08], None),
            ],
            ScreenshotMeta::new(1920, 1080),
            None,
        );
        let indices: Vec<_> = state.elements.iter().map(|e| e.index).collect();
        assert_eq!(indices, vec![1, 2, 3]);
        assert_eq!(state.elements[2].label, "icon");
        assert!(state.elements[2].text.is_none());
    }

    #[test]
    fn smallest_enclosing_parent_wins() {
        let state = normalize(
            vec![
                raw(ElementType::Container, [0.0, 0.0, 1.0, 1.0], Some("window")),
                raw(ElementType::Container, [0.1, 0.1, 0.5, 0.5], Some("dialog")),
                raw(ElementType::Button, [0.2, 0.2, 0.3, 0.25], Some("OK")),
            ],
            ScreenshotMeta::new(100, 100),
            None,
        );
        assert_eq!(state.elements[0].parent, None);
        assert_eq!(state.elements[1].parent, Some(1));
        assert_eq!(state.elements[2].parent, Some(2));
        assert!(state.description.contains("[3] button \"OK\" (interactive) in 2"));
    }

    #[test]
    fn boxes_are_clamped_and_ordered() {
        assert_eq!(clamp_bbox([1.2, 0.5, -0.1, 0.2]), [0.0, 0.2, 1.0, 0.5]);
        assert_eq!(clamp_bbox([f32::NAN, 0.0, 0.5, 0.5]), [0.0, 0.0, 0.5, 0.5]);
    }

    #[test]
    fn empty_screen_still_describes() {
        let state = normalize(vec![], ScreenshotMeta::new(1, 1), None);
        assert!(state.elements.is_empty());
        assert_eq!(state.description, "No UI elements detected.");
    }
}
