//! Detection result types.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// One detected object in a frame.
///
/// The box is `[x1, y1, x2, y2]` in pixel coordinates of the source frame,
/// with `x1 < x2` and `y1 < y2`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Detection {
    /// Human-readable class name (falls back to the stringified class index
    /// when the model's label table has no entry).
    pub label: String,
    /// Detection confidence in `[0, 1]`.
    pub confidence: f32,
    /// Bounding box `[x1, y1, x2, y2]` in pixels.
    #[serde(rename = "box")]
    pub bbox: [f32; 4],
}

impl Detection {
    /// Create a detection from corner coordinates.
    pub fn new(label: impl Into<String>, confidence: f32, bbox: [f32; 4]) -> Self {
        Self {
            label: label.into(),
            confidence,
            bbox,
        }
    }

    /// Box width in pixels.
    pub fn width(&self) -> f32 {
        self.bbox[2] - self.bbox[0]
    }

    /// Box height in pixels.
    pub fn height(&self) -> f32 {
        self.bbox[3] - self.bbox[1]
    }

    /// Box area in square pixels.
    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }

    /// Whether the corner ordering invariant holds.
    pub fn is_well_formed(&self) -> bool {
        self.bbox[0] < self.bbox[2] && self.bbox[1] < self.bbox[3]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_box_field_serializes_as_box() {
        let det = Detection::new("person", 0.9, [10.0, 20.0, 110.0, 220.0]);
        let json = serde_json::to_value(&det).unwrap();

        assert_eq!(json["label"], "person");
        assert_eq!(json["box"][0], 10.0);
        assert_eq!(json["box"][3], 220.0);
        assert!(json.get("bbox").is_none());
    }

    #[test]
    fn test_geometry_helpers() {
        let det = Detection::new("car", 0.5, [0.0, 0.0, 50.0, 20.0]);
        assert_eq!(det.width(), 50.0);
        assert_eq!(det.height(), 20.0);
        assert_eq!(det.area(), 1000.0);
        assert!(det.is_well_formed());
    }

    #[test]
    fn test_degenerate_box_detected() {
        let det = Detection::new("car", 0.5, [50.0, 0.0, 50.0, 20.0]);
        assert!(!det.is_well_formed());
    }
}
