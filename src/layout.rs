//! Grid layout hint derived from orientation: landscape gets a 3x2 grid,
//! portrait (and square) a 2x2. Pure function of the snapshot; the
//! renderer applies it however it likes.

use crate::bridge::OrientationSnapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GridLayout {
    pub columns: u32,
    pub rows: u32,
}

impl GridLayout {
    pub fn sections(&self) -> u32 {
        self.columns * self.rows
    }
}

pub fn layout_for(orientation: &OrientationSnapshot) -> GridLayout {
    if orientation.is_landscape {
        GridLayout {
            columns: 3,
            rows: 2,
        }
    } else {
        GridLayout {
            columns: 2,
            rows: 2,
        }
    }
}
