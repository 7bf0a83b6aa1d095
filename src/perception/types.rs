use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElementType {
    Button,
    Input,
    Link,
    Text,
    Image,
    Icon,
    Checkbox,
    Menu,
    Container,
    Unknown,
}

impl ElementType {
    /// Map the grounding service's free-form `type` field.
    pub fn from_service(kind: &str) -> Self {
        match kind.trim().to_ascii_lowercase().as_str() {
            "button" | "btn" => ElementType::Button,
            "input" | "textbox" | "edit" | "text_field" => ElementType::Input,
            "link" | "hyperlink" => ElementType::Link,
            "text" | "label" | "ocr" => ElementType::Text,
            "image" | "picture" => ElementType::Image,
            "icon" => ElementType::Icon,
            "checkbox" | "radio" => ElementType::Checkbox,
            "menu" | "menuitem" | "menu_item" => ElementType::Menu,
            "container" | "pane" | "window" | "group" => ElementType::Container,
            _ => ElementType::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ElementType::Button => "button",
            ElementType::Input => "input",
            ElementType::Link => "link",
            ElementType::Text => "text",
            ElementType::Image => "image",
            ElementType::Icon => "icon",
            ElementType::Checkbox => "checkbox",
            ElementType::Menu => "menu",
            ElementType::Container => "container",
            ElementType::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UIElement {
    /// 1-based, stable within one ScreenState.
    pub index: usize,
    pub kind: ElementType,
    /// Normalized bounding box [xmin, ymin, xmax, ymax] in range 0.0–1.0
    pub bbox: [f32; 4],
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    pub interactive: bool,
    /// Index of the smallest element whose box contains this one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<usize>,
}

impl UIElement {
    /// Centre of the bounding box in physical pixel coordinates.
    pub fn center_physical(&self, meta: &ScreenshotMeta) -> (i32, i32) {
        let cx = ((self.bbox[0] + self.bbox[2]) / 2.0 * meta.physical_width as f32).round() as i32;
        let cy = ((self.bbox[1] + self.bbox[3]) / 2.0 * meta.physical_height as f32).round() as i32;
        (cx, cy)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScreenshotMeta {
    pub physical_width: u32,
    pub physical_height: u32,
    pub scale_factor: f64,
}

impl ScreenshotMeta {
    pub fn new(physical_width: u32, physical_height: u32) -> Self {
        Self {
            physical_width,
            physical_height,
            scale_factor: 1.0,
        }
    }
}

/// Normalized snapshot of the target machine's screen. Never mutated after construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScreenState {
    pub elements: Vec<UIElement>,
    /// One line per element, used verbatim in prompts.
    pub description: String,
    /// Screenshot with element boxes and indices drawn in, PNG as base64.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotated_image_base64: Option<String>,
    pub meta: ScreenshotMeta,
    pub captured_at: DateTime<Utc>,
}

impl ScreenState {
    pub fn element(&self, index: usize) -> Option<&UIElement> {
        self.elements.iter().find(|e| e.index == index)
    }

    /// First element whose label or text contains `needle`, case-insensitive.
    pub fn find_by_label(&self, needle: &str) -> Option<&UIElement> {
        let needle = needle.to_lowercase();
        self.elements.iter().find(|e| {
            e.label.to_lowercase().contains(&needle)
                || e.text.as_deref().is_some_and(|t| t.to_lowercase().contains(&needle))
        })
    }

    pub fn image_data_url(&self) -> Option<String> {
        self.annotated_image_base64
            .as_ref()
            .map(|b64| format!("data:image/png;base64,{b64}"))
    }
}
