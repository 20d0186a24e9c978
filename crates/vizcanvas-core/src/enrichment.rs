//! Cached inference fallback for chart slots the resolver could not fill.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;
use tracing::{debug, warn};
use vizcanvas_provider::{LlmProvider, LlmRequest};
use vizcanvas_schema::{ChartDirective, ChartKind, Slot};

use crate::extractor::{canonical_column, ExtractedChart};

pub const DEFAULT_INFERENCE_TIMEOUT: Duration = Duration::from_secs(10);

/// Column mapping suggested by an inference service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotSuggestion {
    #[serde(default)]
    pub column: Option<String>,
    #[serde(default)]
    pub x: Option<String>,
    #[serde(default)]
    pub y: Option<String>,
}

impl SlotSuggestion {
    pub fn get(&self, slot: Slot) -> Option<&str> {
        match slot {
            Slot::Column => self.column.as_deref(),
            Slot::X => self.x.as_deref(),
            Slot::Y => self.y.as_deref(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.column.is_none() && self.x.is_none() && self.y.is_none()
    }

    /// Keep only names found in `columns`, in the list's casing. `None` when
    /// nothing survives.
    pub fn validated(self, columns: &[String]) -> Option<Self> {
        let check = |value: Option<String>| value.and_then(|v| canonical_column(&v, columns));
        let x = check(self.x);
        let y = check(self.y).filter(|y| x.as_ref().map_or(true, |x| !x.eq_ignore_ascii_case(y)));
        let validated = Self {
            column: check(self.column),
            x,
            y,
        };
        (!validated.is_empty()).then_some(validated)
    }
}

/// Everything an inference service may look at.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InferenceRequest {
    pub chart_kind: ChartKind,
    pub user_text: String,
    /// Sorted, so the same column set always forms the same request.
    pub available_columns: Vec<String>,
}

impl InferenceRequest {
    pub fn new(chart_kind: ChartKind, user_text: &str, columns: &[String]) -> Self {
        let mut available_columns = columns.to_vec();
        available_columns.sort();
        Self {
            chart_kind,
            user_text: user_text.to_string(),
            available_columns,
        }
    }
}

/// External column inference. Must answer identical requests identically.
#[async_trait]
pub trait InferenceService: Send + Sync {
    /// `Ok(None)` is an explicit "no suggestion".
    async fn suggest(&self, request: &InferenceRequest) -> Result<Option<SlotSuggestion>>;
}

type CacheCell = Arc<OnceCell<Option<SlotSuggestion>>>;

/// Inference results keyed by request. Entries never expire.
///
/// Concurrent lookups of one key share a single in-flight call. Failed calls
/// leave the entry empty so a later lookup retries.
#[derive(Default)]
pub struct ResolutionCache {
    entries: Mutex<HashMap<InferenceRequest, CacheCell>>,
}

impl ResolutionCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Settled result for a key, if any.
    pub fn get(&self, key: &InferenceRequest) -> Option<Option<SlotSuggestion>> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.get(key).and_then(|cell| cell.get().cloned())
    }

    /// Number of settled entries.
    pub fn len(&self) -> usize {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.values().filter(|cell| cell.initialized()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn cell(&self, key: &InferenceRequest) -> CacheCell {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.entry(key.clone()).or_default().clone()
    }
}

/// Fills unresolved chart slots from an [`InferenceService`], through a
/// [`ResolutionCache`].
#[derive(Clone)]
pub struct EnrichmentPipeline {
    service: Arc<dyn InferenceService>,
    cache: Arc<ResolutionCache>,
    timeout: Duration,
}

impl EnrichmentPipeline {
    pub fn new(service: Arc<dyn InferenceService>) -> Self {
        Self {
            service,
            cache: Arc::new(ResolutionCache::new()),
            timeout: DEFAULT_INFERENCE_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_cache(mut self, cache: Arc<ResolutionCache>) -> Self {
        self.cache = cache;
        self
    }

    pub fn cache(&self) -> &ResolutionCache {
        &self.cache
    }

    /// Fill the directive's empty slots. Slots that already hold a column are
    /// never touched, and any failure returns the directive unchanged.
    pub async fn enrich(
        &self,
        mut directive: ChartDirective,
        user_text: &str,
        columns: &[String],
    ) -> ChartDirective {
        let unresolved = directive.unresolved_slots();
        if unresolved.is_empty() || columns.is_empty() {
            return directive;
        }

        let request = InferenceRequest::new(directive.kind(), user_text, columns);
        let suggestion = match self.lookup(&request).await {
            Ok(Some(suggestion)) => suggestion,
            Ok(None) => return directive,
            Err(error) => {
                warn!(chart = directive.kind().as_str(), %error, "column inference failed");
                return directive;
            }
        };

        for slot in unresolved {
            let Some(column) = suggestion.get(slot) else {
                continue;
            };
            let taken = directive
                .kind()
                .required_slots()
                .iter()
                .filter_map(|s| directive.slot(*s))
                .any(|held| held.eq_ignore_ascii_case(column));
            if !taken {
                directive.set_slot(slot, Some(column.to_string()));
            }
        }
        directive
    }

    /// Enrich a batch of charts concurrently, keeping their order.
    pub async fn resolve_charts(
        &self,
        charts: Vec<ExtractedChart>,
        user_text: &str,
        columns: &[String],
    ) -> Vec<ExtractedChart> {
        join_all(charts.into_iter().map(|chart| async move {
            let directive = self.enrich(chart.directive, user_text, columns).await;
            ExtractedChart {
                label: chart.label,
                directive,
            }
        }))
        .await
    }

    async fn lookup(&self, request: &InferenceRequest) -> Result<Option<SlotSuggestion>> {
        let cell = self.cache.cell(request);
        let result = cell
            .get_or_try_init(|| async {
                debug!(chart = request.chart_kind.as_str(), "cache miss, asking inference service");
                let answer = tokio::time::timeout(self.timeout, self.service.suggest(request))
                    .await
                    .map_err(|_| anyhow!("inference timed out after {:?}", self.timeout))??;
                Ok::<_, anyhow::Error>(
                    answer.and_then(|suggestion| suggestion.validated(&request.available_columns)),
                )
            })
            .await?;
        Ok(result.clone())
    }
}

/// [`InferenceService`] backed by an LLM provider answering in JSON.
pub struct LlmInference {
    provider: Arc<dyn LlmProvider>,
    model: String,
    temperature: f32,
}

const INFERENCE_SYSTEM_PROMPT: &str = "You map a data visualization request onto the columns of a dataset. \
Answer with a single JSON object and nothing else. Only use column names exactly as listed. \
Answer {} when no listed column fits the request.";

impl LlmInference {
    pub fn new(provider: Arc<dyn LlmProvider>, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
            temperature: 0.3,
        }
    }

    fn prompt(request: &InferenceRequest) -> String {
        let shape = match request.chart_kind {
            ChartKind::Scatter => r#"{"x": "<column>", "y": "<column>"}"#,
            _ => r#"{"column": "<column>"}"#,
        };
        let columns =
            serde_json::to_string(&request.available_columns).unwrap_or_else(|_| "[]".into());
        format!(
            "Chart type: {}\nRequest: {}\nAvailable columns: {}\nAnswer shape: {}",
            request.chart_kind.label(),
            request.user_text,
            columns,
            shape
        )
    }
}

#[async_trait]
impl InferenceService for LlmInference {
    async fn suggest(&self, request: &InferenceRequest) -> Result<Option<SlotSuggestion>> {
        let mut llm_request = LlmRequest::simple(
            self.model.clone(),
            Some(INFERENCE_SYSTEM_PROMPT.to_string()),
            Self::prompt(request),
        );
        llm_request.max_tokens = 256;
        llm_request.temperature = Some(self.temperature);
        llm_request.json_response = true;

        let response = self.provider.chat(llm_request).await?;
        parse_suggestion(&response.text)
    }
}

/// Parse a JSON suggestion, tolerating a fenced code block around it.
pub fn parse_suggestion(text: &str) -> Result<Option<SlotSuggestion>> {
    let suggestion: SlotSuggestion = serde_json::from_str(strip_json_fence(text))
        .map_err(|e| anyhow!("malformed inference response: {e}"))?;
    Ok((!suggestion.is_empty()).then_some(suggestion))
}

/// Body of a model reply with any surrounding code fence removed.
pub(crate) fn strip_json_fence(text: &str) -> &str {
    let trimmed = text.trim();
    trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.strip_suffix("```"))
        .unwrap_or(trimmed)
        .trim()
}
