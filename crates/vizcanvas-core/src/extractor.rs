//! Chart directive extraction from agent-rendered component trees.

use serde::Serialize;
use serde_json::{Map, Value};
use tracing::debug;
use vizcanvas_schema::{
    ChartDirective, ChartKind, FilterOperator, RowFilter, Slot, UiNode, MAX_HISTOGRAM_BINS,
};

use crate::resolver;

const UNDEFINED: &str = "undefined";
const CLUSTER_COMPONENT: &str = "analysiscluster";

/// A chart found in a reply, with its display label.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExtractedChart {
    pub label: String,
    pub directive: ChartDirective,
}

impl ExtractedChart {
    pub fn new(directive: ChartDirective) -> Self {
        Self {
            label: directive.kind().label().to_string(),
            directive,
        }
    }
}

/// Extract every chart directive from `reply`, in depth-first order.
///
/// Charts without a `datasetId` get `default_dataset_id`. When both
/// `user_text` and `available_columns` are given, column slots are checked
/// against the list and repaired from the text (see [`normalize_chart`]).
pub fn extract_all(
    reply: &[UiNode],
    default_dataset_id: Option<&str>,
    user_text: Option<&str>,
    available_columns: Option<&[String]>,
) -> Vec<ExtractedChart> {
    let mut found = Vec::new();
    collect_charts(reply, &mut found);

    found
        .into_iter()
        .map(|(kind, props)| {
            let mut directive = directive_from_props(kind, props);
            if directive.dataset_id().is_none() {
                directive.set_dataset_id(default_dataset_id.map(str::to_string));
            }
            if let (Some(text), Some(columns)) = (user_text, available_columns) {
                normalize_chart(&mut directive, text, columns);
            }
            ExtractedChart::new(directive)
        })
        .collect()
}

/// Whether any node in the tree is a recognized chart.
pub fn contains_chart(reply: &[UiNode]) -> bool {
    reply.iter().any(|node| {
        ChartKind::from_component(&node.component).is_some() || contains_chart(&node.children)
    })
}

/// Title of the first analysis cluster wrapper in the tree, if any.
pub fn find_cluster_title(reply: &[UiNode]) -> Option<String> {
    reply.iter().find_map(|node| {
        if normalize_component(&node.component) == CLUSTER_COMPONENT {
            if let Some(title) = string_prop(&node.props, "title") {
                return Some(title);
            }
        }
        find_cluster_title(&node.children)
    })
}

/// Check column slots against `columns` and fill the gaps from `user_text`.
///
/// Valid values are rewritten to the list's casing. Missing or unknown values
/// are replaced by the resolver's suggestion for that slot, never reusing a
/// column another slot of the same chart already holds. A filter on an unknown
/// column is dropped.
pub fn normalize_chart(directive: &mut ChartDirective, user_text: &str, columns: &[String]) {
    let kind = directive.kind();
    let slots = kind.required_slots();

    for &slot in slots {
        let canonical = directive
            .slot(slot)
            .and_then(|value| canonical_column(value, columns));
        if canonical.is_none() {
            if let Some(invalid) = directive.slot(slot) {
                debug!(chart = kind.as_str(), slot = slot.as_str(), %invalid, "column not in dataset");
            }
        }
        directive.set_slot(slot, canonical);
    }

    let unresolved = directive.unresolved_slots();
    if !unresolved.is_empty() {
        let resolution = resolver::resolve(user_text, columns, kind);
        for slot in unresolved {
            let preferred = resolution.suggestion(slot);
            let alternates = slots.iter().filter_map(|s| resolution.suggestion(*s));
            let pick = preferred
                .into_iter()
                .chain(alternates)
                .find(|candidate| !slot_holds(directive, slots, candidate));
            directive.set_slot(slot, pick.map(str::to_string));
        }
    }

    if let Some(filter) = directive.filter().cloned() {
        match canonical_column(&filter.column, columns) {
            Some(column) => directive.set_filter(Some(RowFilter { column, ..filter })),
            None => {
                debug!(column = %filter.column, "dropping filter on unknown column");
                directive.set_filter(None);
            }
        }
    }
}

/// Case-insensitive lookup returning the list's spelling.
pub fn canonical_column(value: &str, columns: &[String]) -> Option<String> {
    let wanted = value.trim().to_lowercase();
    if wanted.is_empty() || wanted == UNDEFINED {
        return None;
    }
    columns
        .iter()
        .find(|column| column.to_lowercase() == wanted)
        .cloned()
}

fn slot_holds(directive: &ChartDirective, slots: &[Slot], column: &str) -> bool {
    slots
        .iter()
        .filter_map(|s| directive.slot(*s))
        .any(|held| held.eq_ignore_ascii_case(column))
}

fn normalize_component(name: &str) -> String {
    name.chars()
        .filter(|c| !matches!(c, '_' | '-' | ' '))
        .flat_map(char::to_lowercase)
        .collect()
}

// Chart nodes are leaves; everything else is a wrapper worth descending into.
fn collect_charts<'a>(nodes: &'a [UiNode], out: &mut Vec<(ChartKind, &'a Map<String, Value>)>) {
    for node in nodes {
        match ChartKind::from_component(&node.component) {
            Some(kind) => out.push((kind, &node.props)),
            None => collect_charts(&node.children, out),
        }
    }
}

fn directive_from_props(kind: ChartKind, props: &Map<String, Value>) -> ChartDirective {
    let mut directive = ChartDirective::empty(kind);
    directive.set_dataset_id(string_prop(props, "datasetId"));
    for &slot in kind.required_slots() {
        directive.set_slot(slot, string_prop(props, slot.as_str()));
    }
    if let ChartDirective::Histogram(params) = &mut directive {
        if let Some(bins) = props.get("bins").and_then(parse_bins) {
            params.bins = bins;
        }
    }
    directive.set_filter(filter_from_props(props));
    directive
}

fn string_prop(props: &Map<String, Value>, key: &str) -> Option<String> {
    props
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty() && *value != UNDEFINED)
        .map(str::to_string)
}

fn parse_bins(value: &Value) -> Option<u32> {
    let raw = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    if !raw.is_finite() {
        return None;
    }
    Some(raw.round().clamp(1.0, MAX_HISTOGRAM_BINS as f64) as u32)
}

fn filter_from_props(props: &Map<String, Value>) -> Option<RowFilter> {
    let column = string_prop(props, "filterColumn")?;
    let Some(operator) = props
        .get("filterOperator")
        .and_then(Value::as_str)
        .and_then(FilterOperator::parse)
    else {
        debug!(%column, "ignoring filter without a known operator");
        return None;
    };
    let value = props.get("filterValue").filter(|v| !v.is_null())?.clone();
    Some(RowFilter {
        column,
        operator,
        value,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn cols(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn bar(column: &str) -> UiNode {
        UiNode::new("BarChart").with_prop("column", column)
    }

    #[test]
    fn finds_nested_charts_in_order() {
        let reply = vec![
            UiNode::new("Text").with_prop("text", "Here you go"),
            UiNode::new("Group")
                .with_child(UiNode::new("Histogram").with_prop("column", "Age"))
                .with_child(
                    UiNode::new("Row")
                        .with_child(UiNode::new("ScatterPlot").with_prop("x", "Age"))
                        .with_child(bar("City")),
                ),
            UiNode::new("CorrelationHeatmap"),
        ];

        let charts = extract_all(&reply, None, None, None);
        let labels: Vec<&str> = charts.iter().map(|c| c.label.as_str()).collect();
        assert_eq!(
            labels,
            vec!["Histogram", "Scatter Plot", "Bar Chart", "Correlation Heatmap"]
        );
        assert!(contains_chart(&reply));
        assert!(!contains_chart(&[UiNode::new("Text")]));
    }

    #[test]
    fn chart_children_are_not_searched() {
        let reply = vec![bar("City").with_child(bar("Department"))];
        assert_eq!(extract_all(&reply, None, None, None).len(), 1);
    }

    #[test]
    fn default_dataset_fills_missing_ids_only() {
        let reply = vec![bar("City"), bar("City").with_prop("datasetId", "sales")];
        let charts = extract_all(&reply, Some("people"), None, None);
        assert_eq!(charts[0].directive.dataset_id(), Some("people"));
        assert_eq!(charts[1].directive.dataset_id(), Some("sales"));
    }

    #[test]
    fn without_context_values_are_copied() {
        let charts = extract_all(&[bar("Cty")], None, None, None);
        assert_eq!(charts[0].directive.slot(Slot::Column), Some("Cty"));
    }

    #[test]
    fn valid_columns_take_the_list_casing() {
        let columns = cols(&["City", "Department"]);
        let charts = extract_all(&[bar("city")], None, Some("anything"), Some(&columns));
        assert_eq!(charts[0].directive.slot(Slot::Column), Some("City"));
    }

    #[test]
    fn invalid_and_undefined_columns_are_resolved_from_text() {
        let columns = cols(&["City", "Department"]);
        let reply = vec![bar("undefined"), bar("Town"), UiNode::new("BarChart")];
        let charts = extract_all(&reply, None, Some("bar chart of city"), Some(&columns));
        for chart in &charts {
            assert_eq!(chart.directive.slot(Slot::Column), Some("City"));
        }
    }

    #[test]
    fn unresolvable_columns_stay_empty() {
        let columns = cols(&["City", "Department"]);
        let charts = extract_all(&[bar("Town")], None, Some("show me a chart"), Some(&columns));
        assert!(!charts[0].directive.is_resolved());
        assert_eq!(charts[0].directive.unresolved_slots(), vec![Slot::Column]);
    }

    #[test]
    fn scatter_repair_does_not_reuse_the_other_axis() {
        let columns = cols(&["Age", "Salary"]);
        let reply = vec![UiNode::new("ScatterPlot")
            .with_prop("x", "age")
            .with_prop("y", "bogus")];
        let charts = extract_all(&reply, None, Some("salary against age"), Some(&columns));
        let directive = &charts[0].directive;
        assert_eq!(directive.slot(Slot::X), Some("Age"));
        assert_eq!(directive.slot(Slot::Y), Some("Salary"));
    }

    #[test]
    fn histogram_bins_are_clamped() {
        let reply = vec![
            UiNode::new("Histogram").with_prop("bins", 0),
            UiNode::new("Histogram").with_prop("bins", 500),
            UiNode::new("Histogram").with_prop("bins", "25"),
            UiNode::new("Histogram").with_prop("bins", "lots"),
        ];
        let bins: Vec<u32> = extract_all(&reply, None, None, None)
            .into_iter()
            .map(|c| match c.directive {
                ChartDirective::Histogram(p) => p.bins,
                other => panic!("unexpected {other:?}"),
            })
            .collect();
        assert_eq!(bins, vec![1, 100, 25, 10]);
    }

    #[test]
    fn filters_are_parsed_and_validated() {
        let columns = cols(&["City", "Salary"]);
        let reply = vec![
            bar("City")
                .with_prop("filterColumn", "salary")
                .with_prop("filterOperator", ">")
                .with_prop("filterValue", 50000),
            bar("City")
                .with_prop("filterColumn", "Salary")
                .with_prop("filterOperator", "between")
                .with_prop("filterValue", 1),
            bar("City")
                .with_prop("filterColumn", "Bonus")
                .with_prop("filterOperator", "==")
                .with_prop("filterValue", 1),
        ];
        let charts = extract_all(&reply, None, Some("city"), Some(&columns));

        let filter = charts[0].directive.filter().expect("filter");
        assert_eq!(filter.column, "Salary");
        assert_eq!(filter.operator, FilterOperator::Gt);
        assert_eq!(filter.value, json!(50000));
        assert!(charts[1].directive.filter().is_none());
        assert!(charts[2].directive.filter().is_none());
    }

    #[test]
    fn reply_tree_is_left_untouched() {
        let reply = vec![UiNode::new("Group").with_child(bar("undefined"))];
        let before = reply.clone();
        let columns = cols(&["City"]);
        let _ = extract_all(&reply, Some("d1"), Some("city"), Some(&columns));
        assert_eq!(reply, before);
    }

    #[test]
    fn cluster_title_is_found_anywhere() {
        let reply = vec![UiNode::new("Text"), UiNode::new("Stack").with_child(
            UiNode::new("AnalysisCluster")
                .with_prop("title", "Salary deep dive")
                .with_child(bar("City")),
        )];
        assert_eq!(find_cluster_title(&reply).as_deref(), Some("Salary deep dive"));
        assert!(find_cluster_title(&[bar("City")]).is_none());
        // Charts inside the cluster are still found.
        assert_eq!(extract_all(&reply, None, None, None).len(), 1);
    }

    #[test]
    fn canonical_column_lookup() {
        let columns = cols(&["hire_date", "City"]);
        assert_eq!(canonical_column(" CITY ", &columns).as_deref(), Some("City"));
        assert!(canonical_column("undefined", &columns).is_none());
        assert!(canonical_column("", &columns).is_none());
    }
}
