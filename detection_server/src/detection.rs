use serde::{Deserialize, Serialize};

/// Raw model candidate in original-image pixel space, before label lookup.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    pub class_id: usize,
    pub confidence: f32,
}

impl BoundingBox {
    pub fn area(&self) -> f32 {
        (self.x2 - self.x1).max(0.) * (self.y2 - self.y1).max(0.)
    }

    pub fn intersection(&self, other: &BoundingBox) -> f32 {
        let width = self.x2.min(other.x2) - self.x1.max(other.x1);
        let height = self.y2.min(other.y2) - self.y1.max(other.y1);
        width.max(0.) * height.max(0.)
    }

    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let intersection = self.intersection(other);
        let union = self.area() + other.area() - intersection;
        if union <= 0. {
            return 0.;
        }
        intersection / union
    }

    pub fn clip(self, width: f32, height: f32) -> Self {
        Self {
            x1: self.x1.clamp(0., width),
            y1: self.y1.clamp(0., height),
            x2: self.x2.clamp(0., width),
            y2: self.y2.clamp(0., height),
            ..self
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub bbox: [f32; 4],
    pub confidence: f32,
    #[serde(rename = "class")]
    pub class_id: usize,
    pub name: String,
}

impl Detection {
    pub fn new(bbox: BoundingBox, name: impl Into<String>) -> Self {
        Self {
            bbox: [bbox.x1, bbox.y1, bbox.x2, bbox.y2],
            confidence: bbox.confidence,
            class_id: bbox.class_id,
            name: name.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bbox(x1: f32, y1: f32, x2: f32, y2: f32) -> BoundingBox {
        BoundingBox {
            x1,
            y1,
            x2,
            y2,
            class_id: 0,
            confidence: 0.9,
        }
    }

    #[test]
    fn test_iou() {
        let a = bbox(0., 0., 10., 10.);
        let b = bbox(5., 0., 15., 10.);
        assert!((a.iou(&b) - 50. / 150.).abs() < 1e-6);
        assert_eq!(a.iou(&bbox(20., 20., 30., 30.)), 0.);
        assert_eq!(a.iou(&a), 1.);
    }

    #[test]
    fn test_clip() {
        let clipped = bbox(-5., -1., 120., 40.).clip(100., 50.);
        assert_eq!(clipped, bbox(0., 0., 100., 40.));
    }

    #[test]
    fn test_detection_serializes_with_class_key() {
        let detection = Detection::new(bbox(1., 2., 3., 4.), "person");
        let json = serde_json::to_value(&detection).unwrap();

        assert_eq!(json["bbox"], serde_json::json!([1.0, 2.0, 3.0, 4.0]));
        assert_eq!(json["class"], 0);
        assert_eq!(json["name"], "person");
        assert!(json.get("class_id").is_none());
    }
}
