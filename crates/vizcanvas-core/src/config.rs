use std::{collections::HashSet, fs, path::Path, sync::Arc, time::Duration};

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use vizcanvas_provider::{register_from_configs, LlmProvider, ProviderConfig, ProviderRegistry};

use crate::comparison::ChartComparator;
use crate::enrichment::{EnrichmentPipeline, LlmInference};
use crate::layout::LayoutConfig;

fn default_provider_id() -> String {
    "gemini".to_string()
}

fn default_model() -> String {
    "gemini-2.0-flash".to_string()
}

fn default_timeout_ms() -> u64 {
    10_000
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichmentConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_provider_id")]
    pub provider_id: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            provider_id: default_provider_id(),
            model: default_model(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VizConfig {
    #[serde(default)]
    pub layout: LayoutConfig,
    #[serde(default)]
    pub enrichment: EnrichmentConfig,
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,
}

/// Replace every `${VAR}` with the variable's value (empty when unset).
pub fn resolve_env_var(raw: &str) -> String {
    let mut output = String::new();
    let mut rest = raw;

    while let Some(start) = rest.find("${") {
        output.push_str(&rest[..start]);

        let candidate = &rest[start + 2..];
        let Some(end) = candidate.find('}') else {
            output.push_str(&rest[start..]);
            return output;
        };

        output.push_str(&std::env::var(&candidate[..end]).unwrap_or_default());
        rest = &candidate[end + 1..];
    }

    output.push_str(rest);
    output
}

pub fn load_config(path: &Path) -> Result<VizConfig> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("failed to read config file: {}", path.display()))?;
    let mut config: VizConfig = serde_yaml::from_str(&content)
        .with_context(|| format!("failed to parse yaml file: {}", path.display()))?;

    resolve_config_env(&mut config);
    validate_config(&config)?;
    Ok(config)
}

pub fn validate_config(config: &VizConfig) -> Result<()> {
    let layout = &config.layout;
    if layout.grid_columns == 0 {
        return Err(anyhow!("layout.grid_columns must be at least 1"));
    }
    for (name, size) in [
        ("chart_size", layout.chart_size),
        ("cluster_parent_size", layout.cluster_parent_size),
    ] {
        if size.w <= 0.0 || size.h <= 0.0 {
            return Err(anyhow!("layout.{name} must be positive"));
        }
    }
    if layout.cluster_radius <= 0.0 {
        return Err(anyhow!("layout.cluster_radius must be positive"));
    }

    let mut seen = HashSet::new();
    for provider in &config.providers {
        if !seen.insert(provider.id.as_str()) {
            return Err(anyhow!("duplicate provider id: {}", provider.id));
        }
    }

    let enrichment = &config.enrichment;
    if enrichment.enabled {
        if !seen.contains(enrichment.provider_id.as_str()) {
            return Err(anyhow!(
                "enrichment.provider_id does not exist in providers: {}",
                enrichment.provider_id
            ));
        }
        if enrichment.timeout_ms == 0 {
            return Err(anyhow!("enrichment.timeout_ms must be positive"));
        }
    }

    Ok(())
}

/// Enrichment pipeline for the configured provider, or `None` when disabled.
pub fn build_enrichment(config: &VizConfig) -> Result<Option<EnrichmentPipeline>> {
    let settings = &config.enrichment;
    if !settings.enabled {
        return Ok(None);
    }

    let provider = enrichment_provider(config)?;
    let inference = LlmInference::new(provider, settings.model.clone());

    Ok(Some(
        EnrichmentPipeline::new(Arc::new(inference))
            .with_timeout(Duration::from_millis(settings.timeout_ms)),
    ))
}

/// Chart comparator on the enrichment provider, offline when enrichment is disabled.
pub fn build_comparator(config: &VizConfig) -> Result<ChartComparator> {
    let settings = &config.enrichment;
    if !settings.enabled {
        return Ok(ChartComparator::offline());
    }

    let provider = enrichment_provider(config)?;
    Ok(ChartComparator::new(provider, settings.model.clone())
        .with_timeout(Duration::from_millis(settings.timeout_ms)))
}

fn enrichment_provider(config: &VizConfig) -> Result<Arc<dyn LlmProvider>> {
    let mut registry = ProviderRegistry::new();
    register_from_configs(&mut registry, &config.providers)?;
    registry.get(&config.enrichment.provider_id)
}

fn resolve_config_env(config: &mut VizConfig) {
    let enrichment = &mut config.enrichment;
    enrichment.provider_id = resolve_env_var(&enrichment.provider_id);
    enrichment.model = resolve_env_var(&enrichment.model);

    for provider in &mut config.providers {
        provider.id = resolve_env_var(&provider.id);
        if let Some(key) = &mut provider.api_key {
            *key = resolve_env_var(key);
        }
        if let Some(url) = &mut provider.base_url {
            *url = resolve_env_var(url);
        }
    }
}
