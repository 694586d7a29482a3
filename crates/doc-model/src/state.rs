use serde::{Deserialize, Serialize};

use crate::annotation::Annotation;
use crate::page::Page;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DocumentId(pub uuid::Uuid);

impl DocumentId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for DocumentId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for DocumentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

pub const MIN_ZOOM_PERCENT: u16 = 10;
pub const MAX_ZOOM_PERCENT: u16 = 1600;

/// Where the user was looking when the document was saved
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewPosition {
    pub page_index: usize,
    pub zoom_percent: u16,
    pub scroll_x: f32,
    pub scroll_y: f32,
}

impl Default for ViewPosition {
    fn default() -> Self {
        Self { page_index: 0, zoom_percent: 100, scroll_x: 0.0, scroll_y: 0.0 }
    }
}

impl ViewPosition {
    /// Rendering scale factor for the current zoom
    pub fn scale(&self) -> f32 {
        f32::from(self.zoom_percent) / 100.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ViewAction {
    SetZoomPercent(u16),
    ZoomIn,
    ZoomOut,
    GoToPage(usize),
    ScrollTo { x: f32, y: f32 },
}

const ZOOM_STEP_PERCENT: u16 = 25;

/// Apply a view change, keeping zoom and page within valid bounds.
pub fn apply_view_action(view: &mut ViewPosition, action: ViewAction, page_count: usize) {
    match action {
        ViewAction::SetZoomPercent(percent) => {
            view.zoom_percent = percent.clamp(MIN_ZOOM_PERCENT, MAX_ZOOM_PERCENT);
        }
        ViewAction::ZoomIn => {
            view.zoom_percent =
                view.zoom_percent.saturating_add(ZOOM_STEP_PERCENT).min(MAX_ZOOM_PERCENT);
        }
        ViewAction::ZoomOut => {
            view.zoom_percent =
                view.zoom_percent.saturating_sub(ZOOM_STEP_PERCENT).max(MIN_ZOOM_PERCENT);
        }
        ViewAction::GoToPage(index) => {
            view.page_index = index.min(page_count.saturating_sub(1));
            view.scroll_y = 0.0;
        }
        ViewAction::ScrollTo { x, y } => {
            view.scroll_x = x.max(0.0);
            view.scroll_y = y.max(0.0);
        }
    }
}

/// Serializable snapshot of a whole working document
///
/// This is both the persistence payload and the input of the baking pipeline.
/// Pending (in-gesture) annotations are never part of a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentState {
    pub id: DocumentId,
    pub title: String,
    pub pages: Vec<Page>,
    pub annotations: Vec<Annotation>,
    #[serde(with = "base64_bytes", default)]
    pub source: Vec<u8>,
    #[serde(default)]
    pub view: ViewPosition,
}

mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded.as_bytes()).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::PageId;

    #[test]
    fn zoom_percent_is_clamped() {
        let mut view = ViewPosition::default();
        apply_view_action(&mut view, ViewAction::SetZoomPercent(1), 3);
        assert_eq!(view.zoom_percent, MIN_ZOOM_PERCENT);

        apply_view_action(&mut view, ViewAction::SetZoomPercent(9999), 3);
        assert_eq!(view.zoom_percent, MAX_ZOOM_PERCENT);

        apply_view_action(&mut view, ViewAction::ZoomIn, 3);
        assert_eq!(view.zoom_percent, MAX_ZOOM_PERCENT);
    }

    #[test]
    fn go_to_page_is_clamped_to_document_bounds() {
        let mut view = ViewPosition::default();
        apply_view_action(&mut view, ViewAction::GoToPage(12), 3);
        assert_eq!(view.page_index, 2);
    }

    #[test]
    fn source_bytes_are_base64_in_json() {
        let state = DocumentState {
            id: DocumentId::new(),
            title: "doc".to_owned(),
            pages: vec![Page::new(PageId(1), 1)],
            annotations: Vec::new(),
            source: b"%PDF".to_vec(),
            view: ViewPosition::default(),
        };
        let json = serde_json::to_value(&state).expect("serialize");
        assert_eq!(json["source"], "JVBERg==");

        let back: DocumentState = serde_json::from_value(json).expect("deserialize");
        assert_eq!(back, state);
    }
}
