//! Insights for two charts the user connected on the canvas.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::{info, warn};
use vizcanvas_provider::{LlmProvider, LlmRequest};
use vizcanvas_schema::{ChartDirective, ChartKind, ColumnDescriptor, Slot};

use crate::enrichment::{strip_json_fence, DEFAULT_INFERENCE_TIMEOUT};

/// Dataset columns described to the model.
const PROMPT_COLUMN_LIMIT: usize = 10;

const RELATIONSHIP_TYPES: [&str; 5] = ["correlation", "distribution", "trend", "categorical", "mixed"];

const COMPARISON_SYSTEM_PROMPT: &str = "You are a data analyst comparing two charts drawn from the same dataset. \
Answer with a single JSON object and nothing else.";

const COMPARISON_SHAPE: &str = r#"{"comparison_title": "<short title>", "relationship_type": "correlation|distribution|trend|categorical|mixed", "key_insights": ["<insight>"], "statistical_notes": "<notes>", "recommendation": "<next step>", "visualization_suggestion": {"type": "scatter|bar|histogram|none", "reason": "<why>"}}"#;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisualizationSuggestion {
    #[serde(rename = "type")]
    pub chart_type: String,
    #[serde(default)]
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartComparison {
    pub comparison_title: String,
    #[serde(default = "default_relationship")]
    pub relationship_type: String,
    #[serde(default)]
    pub key_insights: Vec<String>,
    #[serde(default)]
    pub statistical_notes: String,
    #[serde(default)]
    pub recommendation: String,
    #[serde(default)]
    pub visualization_suggestion: Option<VisualizationSuggestion>,
}

fn default_relationship() -> String {
    "mixed".to_string()
}

fn primary_column(directive: &ChartDirective) -> &str {
    directive
        .slot(Slot::Column)
        .or_else(|| directive.slot(Slot::X))
        .unwrap_or("data")
}

/// Comparison built from the chart parameters alone.
pub fn basic_comparison(first: &ChartDirective, second: &ChartDirective) -> ChartComparison {
    let first_column = primary_column(first);
    let second_column = primary_column(second);
    let distinct = !first_column.eq_ignore_ascii_case(second_column);

    ChartComparison {
        comparison_title: format!("{first_column} vs {second_column}"),
        relationship_type: default_relationship(),
        key_insights: vec![
            format!(
                "Comparing {} of {first_column}",
                first.kind().label().to_lowercase()
            ),
            format!(
                "With {} of {second_column}",
                second.kind().label().to_lowercase()
            ),
        ],
        statistical_notes: "Connect charts to explore relationships".to_string(),
        recommendation: "Consider creating a scatter plot to visualize the relationship"
            .to_string(),
        visualization_suggestion: Some(VisualizationSuggestion {
            chart_type: if distinct {
                ChartKind::Scatter.as_str()
            } else {
                "none"
            }
            .to_string(),
            reason: "Scatter plots reveal correlations between variables".to_string(),
        }),
    }
}

/// Parse a model comparison, tolerating a fenced code block around it.
pub fn parse_comparison(text: &str) -> Result<ChartComparison> {
    let mut comparison: ChartComparison = serde_json::from_str(strip_json_fence(text))
        .map_err(|e| anyhow!("malformed comparison response: {e}"))?;
    if comparison.comparison_title.trim().is_empty() {
        return Err(anyhow!("comparison response has no title"));
    }
    if !RELATIONSHIP_TYPES.contains(&comparison.relationship_type.as_str()) {
        comparison.relationship_type = default_relationship();
    }
    Ok(comparison)
}

fn chart_context(directive: &ChartDirective) -> Value {
    let mut context = Map::new();
    context.insert("type".into(), json!(directive.kind().as_str()));
    if let Some(dataset) = directive.dataset_id() {
        context.insert("datasetId".into(), json!(dataset));
    }
    for slot in [Slot::Column, Slot::X, Slot::Y] {
        if let Some(value) = directive.slot(slot) {
            context.insert(slot.as_str().into(), json!(value));
        }
    }
    Value::Object(context)
}

fn comparison_prompt(
    first: &ChartDirective,
    second: &ChartDirective,
    columns: &[ColumnDescriptor],
) -> String {
    let mut prompt = format!(
        "Chart 1: {}\nChart 2: {}\n",
        chart_context(first),
        chart_context(second)
    );
    if !columns.is_empty() {
        let profile: Vec<Value> = columns
            .iter()
            .take(PROMPT_COLUMN_LIMIT)
            .map(|c| json!({"name": c.name, "type": c.detected_type}))
            .collect();
        prompt.push_str(&format!("Dataset columns: {}\n", Value::Array(profile)));
    }
    prompt.push_str(&format!("Answer shape: {COMPARISON_SHAPE}"));
    prompt
}

/// Asks a provider to compare two charts and falls back to
/// [`basic_comparison`] when it cannot.
pub struct ChartComparator {
    provider: Option<Arc<dyn LlmProvider>>,
    model: String,
    timeout: Duration,
}

impl ChartComparator {
    pub fn new(provider: Arc<dyn LlmProvider>, model: impl Into<String>) -> Self {
        Self {
            provider: Some(provider),
            model: model.into(),
            timeout: DEFAULT_INFERENCE_TIMEOUT,
        }
    }

    pub fn offline() -> Self {
        Self {
            provider: None,
            model: String::new(),
            timeout: DEFAULT_INFERENCE_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub async fn compare(
        &self,
        first: &ChartDirective,
        second: &ChartDirective,
        columns: &[ColumnDescriptor],
    ) -> ChartComparison {
        let Some(provider) = &self.provider else {
            return basic_comparison(first, second);
        };

        match self.ask(provider.as_ref(), first, second, columns).await {
            Ok(comparison) => {
                info!(title = %comparison.comparison_title, "chart comparison completed");
                comparison
            }
            Err(error) => {
                warn!(%error, "chart comparison failed, using basic comparison");
                basic_comparison(first, second)
            }
        }
    }

    async fn ask(
        &self,
        provider: &dyn LlmProvider,
        first: &ChartDirective,
        second: &ChartDirective,
        columns: &[ColumnDescriptor],
    ) -> Result<ChartComparison> {
        let mut request = LlmRequest::simple(
            self.model.clone(),
            Some(COMPARISON_SYSTEM_PROMPT.to_string()),
            comparison_prompt(first, second, columns),
        );
        request.max_tokens = 1024;
        request.temperature = Some(0.3);
        request.json_response = true;

        let response = tokio::time::timeout(self.timeout, provider.chat(request))
            .await
            .map_err(|_| anyhow!("comparison timed out after {:?}", self.timeout))??;
        parse_comparison(&response.text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use vizcanvas_provider::LlmResponse;

    fn chart(kind: ChartKind, slots: &[(Slot, &str)]) -> ChartDirective {
        let mut directive = ChartDirective::empty(kind);
        directive.set_dataset_id(Some("sales".into()));
        for (slot, value) in slots {
            directive.set_slot(*slot, Some(value.to_string()));
        }
        directive
    }

    struct ScriptedProvider {
        text: String,
        seen: Mutex<Vec<LlmRequest>>,
    }

    impl ScriptedProvider {
        fn new(text: &str) -> Arc<Self> {
            Arc::new(Self {
                text: text.into(),
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl LlmProvider for ScriptedProvider {
        async fn chat(&self, request: LlmRequest) -> Result<LlmResponse> {
            self.seen.lock().unwrap().push(request);
            Ok(LlmResponse {
                text: self.text.clone(),
                input_tokens: None,
                output_tokens: None,
                stop_reason: Some("end_turn".into()),
            })
        }
    }

    #[test]
    fn basic_comparison_names_both_columns() {
        let bar = chart(ChartKind::Bar, &[(Slot::Column, "City")]);
        let scatter = chart(ChartKind::Scatter, &[(Slot::X, "Age"), (Slot::Y, "Salary")]);

        let comparison = basic_comparison(&bar, &scatter);
        assert_eq!(comparison.comparison_title, "City vs Age");
        assert_eq!(comparison.relationship_type, "mixed");
        assert_eq!(
            comparison.key_insights,
            vec!["Comparing bar chart of City", "With scatter plot of Age"]
        );
        let suggestion = comparison.visualization_suggestion.unwrap();
        assert_eq!(suggestion.chart_type, "scatter");
    }

    #[test]
    fn basic_comparison_of_one_column_suggests_nothing() {
        let bar = chart(ChartKind::Bar, &[(Slot::Column, "City")]);
        let histogram = chart(ChartKind::Histogram, &[(Slot::Column, "city")]);
        let suggestion = basic_comparison(&bar, &histogram)
            .visualization_suggestion
            .unwrap();
        assert_eq!(suggestion.chart_type, "none");

        let heatmap = chart(ChartKind::CorrelationHeatmap, &[]);
        assert_eq!(
            basic_comparison(&heatmap, &bar).comparison_title,
            "data vs City"
        );
    }

    #[test]
    fn parse_comparison_variants() {
        let fenced = "```json\n{\"comparison_title\": \"Pay by city\", \"relationship_type\": \"trend\", \"key_insights\": [\"Austin leads\"]}\n```";
        let comparison = parse_comparison(fenced).unwrap();
        assert_eq!(comparison.comparison_title, "Pay by city");
        assert_eq!(comparison.relationship_type, "trend");
        assert!(comparison.visualization_suggestion.is_none());

        let odd = parse_comparison(r#"{"comparison_title": "x", "relationship_type": "causal"}"#)
            .unwrap();
        assert_eq!(odd.relationship_type, "mixed");

        assert!(parse_comparison(r#"{"comparison_title": "  "}"#).is_err());
        assert!(parse_comparison("They look related").is_err());
    }

    #[tokio::test]
    async fn offline_comparator_uses_basic_comparison() {
        let bar = chart(ChartKind::Bar, &[(Slot::Column, "City")]);
        let histogram = chart(ChartKind::Histogram, &[(Slot::Column, "Salary")]);
        let comparison = ChartComparator::offline()
            .compare(&bar, &histogram, &[])
            .await;
        assert_eq!(comparison, basic_comparison(&bar, &histogram));
    }

    #[tokio::test]
    async fn comparator_sends_both_charts_and_the_profile() {
        let provider = ScriptedProvider::new(
            r#"{"comparison_title": "Salary across cities", "relationship_type": "categorical",
                "key_insights": ["Austin pays most"], "statistical_notes": "n=40",
                "recommendation": "Split by department",
                "visualization_suggestion": {"type": "bar", "reason": "categories"}}"#,
        );
        let comparator = ChartComparator::new(provider.clone(), "gemini-2.0-flash");
        let bar = chart(ChartKind::Bar, &[(Slot::Column, "City")]);
        let histogram = chart(ChartKind::Histogram, &[(Slot::Column, "Salary")]);
        let columns: Vec<ColumnDescriptor> = (0..12)
            .map(|i| ColumnDescriptor {
                name: format!("col{i}"),
                detected_type: "numeric".into(),
            })
            .collect();

        let comparison = comparator.compare(&bar, &histogram, &columns).await;
        assert_eq!(comparison.comparison_title, "Salary across cities");
        assert_eq!(
            comparison.visualization_suggestion.unwrap().chart_type,
            "bar"
        );

        let seen = provider.seen.lock().unwrap();
        let sent = &seen[0];
        assert!(sent.json_response);
        assert_eq!(sent.temperature, Some(0.3));
        let prompt = &sent.messages[0].content;
        assert!(prompt.contains(r#""column":"City""#));
        assert!(prompt.contains(r#""column":"Salary""#));
        assert!(prompt.contains("col9"));
        assert!(!prompt.contains("col10"));
    }

    #[tokio::test]
    async fn unreadable_answers_fall_back() {
        let provider = ScriptedProvider::new("Both charts are interesting.");
        let comparator = ChartComparator::new(provider, "gemini-2.0-flash");
        let bar = chart(ChartKind::Bar, &[(Slot::Column, "City")]);
        let scatter = chart(ChartKind::Scatter, &[(Slot::X, "Age"), (Slot::Y, "Salary")]);

        let comparison = comparator.compare(&bar, &scatter, &[]).await;
        assert_eq!(comparison, basic_comparison(&bar, &scatter));
    }
}
