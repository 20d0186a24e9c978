use serde::{Deserialize, Serialize};

pub const DEFAULT_HISTOGRAM_BINS: u32 = 10;
pub const MAX_HISTOGRAM_BINS: u32 = 100;

#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ChartKind {
    Histogram,
    Bar,
    Scatter,
    CorrelationHeatmap,
}

impl ChartKind {
    pub const ALL: [ChartKind; 4] = [
        ChartKind::Histogram,
        ChartKind::Bar,
        ChartKind::Scatter,
        ChartKind::CorrelationHeatmap,
    ];

    /// Map a rendered component name onto a chart kind.
    ///
    /// Matching ignores case as well as `_`, `-` and spaces, so `BarChart`,
    /// `bar_chart` and `bar` all resolve to [`ChartKind::Bar`].
    pub fn from_component(name: &str) -> Option<Self> {
        let normalized: String = name
            .chars()
            .filter(|c| !matches!(c, '_' | '-' | ' '))
            .flat_map(char::to_lowercase)
            .collect();
        match normalized.as_str() {
            "histogram" => Some(Self::Histogram),
            "bar" | "barchart" => Some(Self::Bar),
            "scatter" | "scatterplot" => Some(Self::Scatter),
            "correlationheatmap" | "heatmap" | "correlation" => Some(Self::CorrelationHeatmap),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Histogram => "histogram",
            Self::Bar => "bar",
            Self::Scatter => "scatter",
            Self::CorrelationHeatmap => "correlationHeatmap",
        }
    }

    /// Human readable label used for canvas nodes.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Histogram => "Histogram",
            Self::Bar => "Bar Chart",
            Self::Scatter => "Scatter Plot",
            Self::CorrelationHeatmap => "Correlation Heatmap",
        }
    }

    pub fn required_slots(&self) -> &'static [Slot] {
        match self {
            Self::Histogram | Self::Bar => &[Slot::Column],
            Self::Scatter => &[Slot::X, Slot::Y],
            Self::CorrelationHeatmap => &[],
        }
    }
}

impl std::str::FromStr for ChartKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_component(s).ok_or_else(|| format!("unknown chart type: {s}"))
    }
}

/// A column-valued parameter of a chart directive.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Slot {
    Column,
    X,
    Y,
}

impl Slot {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Column => "column",
            Self::X => "x",
            Self::Y => "y",
        }
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
pub enum FilterOperator {
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = ">=")]
    Ge,
    #[serde(rename = "<=")]
    Le,
    #[serde(rename = "==")]
    Eq,
    #[serde(rename = "!=")]
    Ne,
    #[serde(rename = "contains")]
    Contains,
}

impl FilterOperator {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            ">" => Some(Self::Gt),
            "<" => Some(Self::Lt),
            ">=" => Some(Self::Ge),
            "<=" => Some(Self::Le),
            "==" | "=" => Some(Self::Eq),
            "!=" => Some(Self::Ne),
            "contains" => Some(Self::Contains),
            _ => None,
        }
    }
}

/// Row filter applied before a chart is computed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RowFilter {
    pub column: String,
    pub operator: FilterOperator,
    pub value: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistogramParams {
    #[serde(default)]
    pub dataset_id: Option<String>,
    #[serde(default)]
    pub column: Option<String>,
    #[serde(default = "default_bins")]
    pub bins: u32,
    #[serde(default)]
    pub filter: Option<RowFilter>,
}

fn default_bins() -> u32 {
    DEFAULT_HISTOGRAM_BINS
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BarParams {
    #[serde(default)]
    pub dataset_id: Option<String>,
    #[serde(default)]
    pub column: Option<String>,
    #[serde(default)]
    pub filter: Option<RowFilter>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScatterParams {
    #[serde(default)]
    pub dataset_id: Option<String>,
    #[serde(default)]
    pub x: Option<String>,
    #[serde(default)]
    pub y: Option<String>,
    #[serde(default)]
    pub filter: Option<RowFilter>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CorrelationParams {
    #[serde(default)]
    pub dataset_id: Option<String>,
    #[serde(default)]
    pub filter: Option<RowFilter>,
}

/// A chart request extracted from an agent reply.
///
/// Each variant carries only the parameters that chart understands, so a
/// scatter plot can never end up with a `column` and a bar chart can never
/// carry axes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "chartType", rename_all = "camelCase")]
pub enum ChartDirective {
    Histogram(HistogramParams),
    Bar(BarParams),
    Scatter(ScatterParams),
    CorrelationHeatmap(CorrelationParams),
}

impl ChartDirective {
    /// An empty directive of the given kind.
    pub fn empty(kind: ChartKind) -> Self {
        match kind {
            ChartKind::Histogram => Self::Histogram(HistogramParams {
                dataset_id: None,
                column: None,
                bins: DEFAULT_HISTOGRAM_BINS,
                filter: None,
            }),
            ChartKind::Bar => Self::Bar(BarParams {
                dataset_id: None,
                column: None,
                filter: None,
            }),
            ChartKind::Scatter => Self::Scatter(ScatterParams {
                dataset_id: None,
                x: None,
                y: None,
                filter: None,
            }),
            ChartKind::CorrelationHeatmap => Self::CorrelationHeatmap(CorrelationParams {
                dataset_id: None,
                filter: None,
            }),
        }
    }

    pub fn kind(&self) -> ChartKind {
        match self {
            Self::Histogram(_) => ChartKind::Histogram,
            Self::Bar(_) => ChartKind::Bar,
            Self::Scatter(_) => ChartKind::Scatter,
            Self::CorrelationHeatmap(_) => ChartKind::CorrelationHeatmap,
        }
    }

    pub fn dataset_id(&self) -> Option<&str> {
        match self {
            Self::Histogram(p) => p.dataset_id.as_deref(),
            Self::Bar(p) => p.dataset_id.as_deref(),
            Self::Scatter(p) => p.dataset_id.as_deref(),
            Self::CorrelationHeatmap(p) => p.dataset_id.as_deref(),
        }
    }

    pub fn set_dataset_id(&mut self, dataset_id: Option<String>) {
        match self {
            Self::Histogram(p) => p.dataset_id = dataset_id,
            Self::Bar(p) => p.dataset_id = dataset_id,
            Self::Scatter(p) => p.dataset_id = dataset_id,
            Self::CorrelationHeatmap(p) => p.dataset_id = dataset_id,
        }
    }

    pub fn filter(&self) -> Option<&RowFilter> {
        match self {
            Self::Histogram(p) => p.filter.as_ref(),
            Self::Bar(p) => p.filter.as_ref(),
            Self::Scatter(p) => p.filter.as_ref(),
            Self::CorrelationHeatmap(p) => p.filter.as_ref(),
        }
    }

    pub fn set_filter(&mut self, filter: Option<RowFilter>) {
        match self {
            Self::Histogram(p) => p.filter = filter,
            Self::Bar(p) => p.filter = filter,
            Self::Scatter(p) => p.filter = filter,
            Self::CorrelationHeatmap(p) => p.filter = filter,
        }
    }

    /// Current value of a column slot. Slots the chart does not have read as `None`.
    pub fn slot(&self, slot: Slot) -> Option<&str> {
        match (self, slot) {
            (Self::Histogram(p), Slot::Column) => p.column.as_deref(),
            (Self::Bar(p), Slot::Column) => p.column.as_deref(),
            (Self::Scatter(p), Slot::X) => p.x.as_deref(),
            (Self::Scatter(p), Slot::Y) => p.y.as_deref(),
            _ => None,
        }
    }

    /// Set a column slot. Returns false when the chart has no such slot.
    pub fn set_slot(&mut self, slot: Slot, value: Option<String>) -> bool {
        match (self, slot) {
            (Self::Histogram(p), Slot::Column) => p.column = value,
            (Self::Bar(p), Slot::Column) => p.column = value,
            (Self::Scatter(p), Slot::X) => p.x = value,
            (Self::Scatter(p), Slot::Y) => p.y = value,
            _ => return false,
        }
        true
    }

    /// Required slots that are still empty.
    pub fn unresolved_slots(&self) -> Vec<Slot> {
        self.kind()
            .required_slots()
            .iter()
            .copied()
            .filter(|slot| self.slot(*slot).is_none())
            .collect()
    }

    pub fn is_resolved(&self) -> bool {
        self.unresolved_slots().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn component_names_map_to_kinds() {
        assert_eq!(ChartKind::from_component("Histogram"), Some(ChartKind::Histogram));
        assert_eq!(ChartKind::from_component("BarChart"), Some(ChartKind::Bar));
        assert_eq!(ChartKind::from_component("bar_chart"), Some(ChartKind::Bar));
        assert_eq!(ChartKind::from_component("Scatter Plot"), Some(ChartKind::Scatter));
        assert_eq!(
            ChartKind::from_component("correlation-heatmap"),
            Some(ChartKind::CorrelationHeatmap)
        );
        assert_eq!(ChartKind::from_component("Card"), None);
    }

    #[test]
    fn directive_wire_format_is_tagged_by_chart_type() {
        let directive = ChartDirective::Scatter(ScatterParams {
            dataset_id: Some("ds1".into()),
            x: Some("Age".into()),
            y: None,
            filter: None,
        });
        let json = serde_json::to_value(&directive).unwrap();
        assert_eq!(json["chartType"], "scatter");
        assert_eq!(json["datasetId"], "ds1");
        assert_eq!(json["x"], "Age");

        let parsed: ChartDirective =
            serde_json::from_str(r#"{"chartType":"histogram","column":"Salary"}"#).unwrap();
        match parsed {
            ChartDirective::Histogram(p) => {
                assert_eq!(p.column.as_deref(), Some("Salary"));
                assert_eq!(p.bins, DEFAULT_HISTOGRAM_BINS);
            }
            other => panic!("expected histogram, got {other:?}"),
        }
    }

    #[test]
    fn unresolved_slots_follow_chart_kind() {
        let mut scatter = ChartDirective::empty(ChartKind::Scatter);
        assert_eq!(scatter.unresolved_slots(), vec![Slot::X, Slot::Y]);
        assert!(scatter.set_slot(Slot::X, Some("Age".into())));
        assert_eq!(scatter.unresolved_slots(), vec![Slot::Y]);
        assert!(!scatter.set_slot(Slot::Column, Some("City".into())));

        let heatmap = ChartDirective::empty(ChartKind::CorrelationHeatmap);
        assert!(heatmap.is_resolved());
    }

    #[test]
    fn filter_operator_parse() {
        assert_eq!(FilterOperator::parse(">="), Some(FilterOperator::Ge));
        assert_eq!(FilterOperator::parse(" contains "), Some(FilterOperator::Contains));
        assert_eq!(FilterOperator::parse("like"), None);
    }
}
