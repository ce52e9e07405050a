use crate::bbox::{BBox, Ltrb};

#[derive(Debug, Clone, PartialEq)]
pub struct Track {
    pub track_id: u32,
    pub bbox: BBox<Ltrb>,
    pub label: String,
}

impl Track {
    pub fn new(track_id: u32, bbox: BBox<Ltrb>, label: impl Into<String>) -> Self {
        Self {
            track_id,
            bbox,
            label: label.into(),
        }
    }
}
