//! Canvas node placement.
//!
//! Positions are computed once, from the graph as it is when a batch is
//! placed. Nodes are only ever appended.

use std::f64::consts::PI;

use serde::{Deserialize, Serialize};
use vizcanvas_schema::{CanvasEdge, CanvasNode, ChartDirective, Point, Size};

use crate::extractor::ExtractedChart;
use crate::ids::{unique_short_id, MAX_ID_ATTEMPTS, SHORT_ID_LEN};

#[derive(Debug, thiserror::Error)]
pub enum LayoutError {
    #[error("unknown canvas node: {0}")]
    UnknownNode(String),
    #[error("could not allocate a free node id after {0} attempts")]
    IdsExhausted(usize),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LayoutConfig {
    /// Where the first node of an empty canvas goes.
    pub origin: Point,
    pub chart_size: Size,
    /// Distance between consecutive single nodes.
    pub horizontal_offset: f64,
    pub grid_columns: usize,
    pub grid_gap: f64,
    pub cluster_radius: f64,
    pub cluster_parent_size: Size,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            origin: Point::new(100.0, 100.0),
            chart_size: Size::new(400.0, 300.0),
            horizontal_offset: 450.0,
            grid_columns: 2,
            grid_gap: 50.0,
            cluster_radius: 500.0,
            cluster_parent_size: Size::new(250.0, 120.0),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CanvasGraph {
    pub nodes: Vec<CanvasNode>,
    pub edges: Vec<CanvasEdge>,
}

impl CanvasGraph {
    pub fn new(nodes: Vec<CanvasNode>, edges: Vec<CanvasEdge>) -> Self {
        Self { nodes, edges }
    }

    pub fn node(&self, id: &str) -> Option<&CanvasNode> {
        self.nodes.iter().find(|node| node.id == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.node(id).is_some()
    }

    pub fn edges_from(&self, id: &str) -> impl Iterator<Item = &CanvasEdge> {
        let id = id.to_string();
        self.edges.iter().filter(move |edge| edge.source_id == id)
    }

    /// Rightmost edge of all nodes, or `None` on an empty canvas.
    pub fn extent_right(&self) -> Option<f64> {
        self.nodes.iter().map(CanvasNode::right).reduce(f64::max)
    }
}

/// Ids of a placed analysis cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterIds {
    pub parent_id: String,
    pub child_ids: Vec<String>,
}

/// Places chart nodes on a [`CanvasGraph`] it owns.
#[derive(Debug, Clone, Default)]
pub struct LayoutEngine {
    config: LayoutConfig,
    graph: CanvasGraph,
}

impl LayoutEngine {
    pub fn new(config: LayoutConfig) -> Self {
        Self::with_graph(config, CanvasGraph::default())
    }

    pub fn with_graph(config: LayoutConfig, graph: CanvasGraph) -> Self {
        Self { config, graph }
    }

    pub fn config(&self) -> &LayoutConfig {
        &self.config
    }

    pub fn graph(&self) -> &CanvasGraph {
        &self.graph
    }

    pub fn into_graph(self) -> CanvasGraph {
        self.graph
    }

    /// Place one node right of the most recently added node, or at the
    /// origin on an empty canvas.
    pub fn add_chart_node(
        &mut self,
        label: &str,
        directive: Option<ChartDirective>,
    ) -> Result<String, LayoutError> {
        let position = match self.graph.nodes.last() {
            Some(last) => Point::new(
                last.position.x + self.config.horizontal_offset,
                last.position.y,
            ),
            None => self.config.origin,
        };
        let id = self.push_node(position, self.config.chart_size, label, directive)?;
        tracing::debug!(node_id = %id, x = position.x, y = position.y, "placed chart node");
        Ok(id)
    }

    /// Place a batch on a grid right of the existing content, chaining
    /// consecutive nodes with animated edges.
    pub fn add_multiple_chart_nodes(
        &mut self,
        charts: &[ExtractedChart],
    ) -> Result<Vec<String>, LayoutError> {
        let columns = self.config.grid_columns.max(1);
        let size = self.config.chart_size;
        let gap = self.config.grid_gap;
        let anchor = Point::new(self.next_free_x(), self.config.origin.y);

        let mut ids = Vec::with_capacity(charts.len());
        for (index, chart) in charts.iter().enumerate() {
            let row = (index / columns) as f64;
            let col = (index % columns) as f64;
            let position = Point::new(
                anchor.x + col * (size.w + gap),
                anchor.y + row * (size.h + gap),
            );
            ids.push(self.push_node(position, size, &chart.label, Some(chart.directive.clone()))?);
        }

        for pair in ids.windows(2) {
            self.push_edge(&pair[0], &pair[1], true);
        }
        tracing::debug!(nodes = ids.len(), "placed chart grid");
        Ok(ids)
    }

    /// Place a parent node with its charts on a circle around it, starting at
    /// the top and going clockwise.
    pub fn add_analysis_cluster(
        &mut self,
        parent_label: &str,
        charts: &[ExtractedChart],
    ) -> Result<ClusterIds, LayoutError> {
        let radius = self.config.cluster_radius;
        let size = self.config.chart_size;
        let parent_size = self.config.cluster_parent_size;
        let center = Point::new(
            self.next_free_x() + radius + size.w / 2.0,
            self.config.origin.y + radius + size.h / 2.0,
        );

        let parent_id = self.push_node(
            Point::new(center.x - parent_size.w / 2.0, center.y - parent_size.h / 2.0),
            parent_size,
            parent_label,
            None,
        )?;

        let mut child_ids = Vec::with_capacity(charts.len());
        for (chart, offset) in charts.iter().zip(radial_offsets(radius, charts.len())) {
            let position = Point::new(
                center.x + offset.x - size.w / 2.0,
                center.y + offset.y - size.h / 2.0,
            );
            let id = self.push_node(position, size, &chart.label, Some(chart.directive.clone()))?;
            self.push_edge(&parent_id, &id, true);
            child_ids.push(id);
        }

        tracing::debug!(%parent_id, children = child_ids.len(), "placed analysis cluster");
        Ok(ClusterIds {
            parent_id,
            child_ids,
        })
    }

    /// Place the charts of one reply: a titled cluster when a cluster title
    /// is given, otherwise a single node or a grid. Returns every new node id,
    /// cluster parent first.
    pub fn place_charts(
        &mut self,
        cluster_title: Option<&str>,
        charts: &[ExtractedChart],
    ) -> Result<Vec<String>, LayoutError> {
        if charts.is_empty() {
            return Ok(Vec::new());
        }
        if let Some(title) = cluster_title {
            let cluster = self.add_analysis_cluster(title, charts)?;
            return Ok(std::iter::once(cluster.parent_id)
                .chain(cluster.child_ids)
                .collect());
        }
        match charts {
            [single] => Ok(vec![
                self.add_chart_node(&single.label, Some(single.directive.clone()))?
            ]),
            _ => self.add_multiple_chart_nodes(charts),
        }
    }

    /// Connect two existing nodes. Connecting the same pair twice returns the
    /// existing edge.
    pub fn add_edge_between_nodes(
        &mut self,
        source_id: &str,
        target_id: &str,
        animated: bool,
    ) -> Result<String, LayoutError> {
        for id in [source_id, target_id] {
            if !self.graph.contains(id) {
                return Err(LayoutError::UnknownNode(id.to_string()));
            }
        }
        Ok(self.push_edge(source_id, target_id, animated))
    }

    fn next_free_x(&self) -> f64 {
        self.graph
            .extent_right()
            .map(|right| right + self.config.grid_gap)
            .unwrap_or(self.config.origin.x)
    }

    fn push_node(
        &mut self,
        position: Point,
        size: Size,
        label: &str,
        chart_directive: Option<ChartDirective>,
    ) -> Result<String, LayoutError> {
        let graph = &self.graph;
        let id = unique_short_id(SHORT_ID_LEN, MAX_ID_ATTEMPTS, |candidate| {
            graph.contains(candidate)
        })
        .ok_or(LayoutError::IdsExhausted(MAX_ID_ATTEMPTS))?;

        self.graph.nodes.push(CanvasNode {
            id: id.clone(),
            position,
            size,
            label: label.to_string(),
            chart_directive,
        });
        Ok(id)
    }

    fn push_edge(&mut self, source_id: &str, target_id: &str, animated: bool) -> String {
        let id = format!("edge-{source_id}-{target_id}");
        if !self.graph.edges.iter().any(|edge| edge.id == id) {
            self.graph.edges.push(CanvasEdge {
                id: id.clone(),
                source_id: source_id.to_string(),
                target_id: target_id.to_string(),
                animated,
            });
        }
        id
    }
}

/// Offsets of `n` points on a circle, starting at the top and stepping
/// clockwise by `2π/n`. Screen coordinates: y grows downward.
pub fn radial_offsets(radius: f64, n: usize) -> Vec<Point> {
    (0..n)
        .map(|i| {
            let angle = 2.0 * PI * i as f64 / n as f64;
            Point::new(radius * angle.sin(), -radius * angle.cos())
        })
        .collect()
}
