use serde::{Deserialize, Serialize};

use crate::ChartDirective;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Size {
    pub w: f64,
    pub h: f64,
}

impl Size {
    pub fn new(w: f64, h: f64) -> Self {
        Self { w, h }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanvasNode {
    pub id: String,
    pub position: Point,
    pub size: Size,
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chart_directive: Option<ChartDirective>,
}

impl CanvasNode {
    /// Right edge of the node's bounding box.
    pub fn right(&self) -> f64 {
        self.position.x + self.size.w
    }

    pub fn center(&self) -> Point {
        Point::new(
            self.position.x + self.size.w / 2.0,
            self.position.y + self.size.h / 2.0,
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanvasEdge {
    pub id: String,
    pub source_id: String,
    pub target_id: String,
    #[serde(default)]
    pub animated: bool,
}
