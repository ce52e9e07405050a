use serde_derive::{Deserialize, Serialize};

use crate::bbox::{BBox, Ltrb};

pub const PERSON: &str = "person";

/// Contains (x1,y1) top-left and (x2,y2) bottom-right corners of the bbox in frame pixels
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Detection {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    #[serde(rename = "c", default = "default_label")]
    pub label: String,
    #[serde(rename = "p")]
    pub confidence: f32,
}

fn default_label() -> String {
    PERSON.to_string()
}

impl Detection {
    pub fn new(bbox: BBox<Ltrb>, label: impl Into<String>, confidence: f32) -> Self {
        Self {
            x1: bbox.left(),
            y1: bbox.top(),
            x2: bbox.right(),
            y2: bbox.bottom(),
            label: label.into(),
            confidence,
        }
    }

    #[inline(always)]
    pub fn bbox(&self) -> BBox<Ltrb> {
        BBox::ltrb(self.x1, self.y1, self.x2, self.y2)
    }

    #[inline]
    pub fn iou(&self, other: &Detection) -> f32 {
        self.bbox().iou(&other.bbox())
    }
}
