//! Column reference resolution.
//!
//! Scores free text against a dataset's column list. Every column is scored
//! once, at the best tier it reaches:
//!
//! 1. exact: the whole name appears, underscores optional (`100 + len`)
//! 2. ordered tokens: every token appears in order (`50 + len`)
//! 3. partial token: a token of at least four chars appears (`token len`)

use std::collections::HashSet;

use regex::Regex;
use serde::Serialize;
use vizcanvas_schema::{ChartKind, Slot};

/// Tokens shorter than this never match on their own ("age" inside "usage").
pub const PARTIAL_TOKEN_MIN_LEN: usize = 4;

const EXACT_TIER_BASE: usize = 100;
const ORDERED_TIER_BASE: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum MatchTier {
    Exact,
    OrderedTokens,
    PartialToken,
}

/// A column that matched the text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScoredCandidate {
    pub column: String,
    pub score: usize,
    /// Byte offset of the match in the source text.
    pub position: usize,
    pub tier: MatchTier,
}

/// Outcome of resolving a request against a column list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Resolution {
    /// Bar and histogram charts.
    Column(Option<String>),
    /// Scatter plots. `y` is only set when `x` is.
    Axes { x: Option<String>, y: Option<String> },
    /// Chart kinds without column slots.
    NotApplicable,
}

impl Resolution {
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Column(column) => column.is_none(),
            Self::Axes { x, y } => x.is_none() && y.is_none(),
            Self::NotApplicable => true,
        }
    }

    /// Suggested column for one slot of the chart.
    pub fn suggestion(&self, slot: Slot) -> Option<&str> {
        match (self, slot) {
            (Self::Column(column), Slot::Column) => column.as_deref(),
            (Self::Axes { x, .. }, Slot::X) => x.as_deref(),
            (Self::Axes { y, .. }, Slot::Y) => y.as_deref(),
            _ => None,
        }
    }
}

/// Resolve the column slots of `kind` from free text.
///
/// Never fails; an empty resolution means nothing in the text matched.
pub fn resolve(text: &str, columns: &[String], kind: ChartKind) -> Resolution {
    match kind {
        ChartKind::Histogram | ChartKind::Bar => {
            let scored = score_candidates(text, columns);
            Resolution::Column(scored.into_iter().next().map(|c| c.column))
        }
        ChartKind::Scatter => {
            let mut top: Vec<ScoredCandidate> =
                score_candidates(text, columns).into_iter().take(2).collect();
            // Stable: equal offsets keep score order.
            top.sort_by_key(|c| c.position);
            let mut picked = top.into_iter().map(|c| c.column);
            Resolution::Axes {
                x: picked.next(),
                y: picked.next(),
            }
        }
        ChartKind::CorrelationHeatmap => Resolution::NotApplicable,
    }
}

/// Score every column against `text`, best first.
///
/// Sorted by score descending, then by earliest mention. Columns that differ
/// only in case are scored once, under the first spelling in `columns`.
pub fn score_candidates(text: &str, columns: &[String]) -> Vec<ScoredCandidate> {
    let mut seen = HashSet::new();
    let mut scored: Vec<ScoredCandidate> = columns
        .iter()
        .filter(|column| seen.insert(column.to_lowercase()))
        .filter_map(|column| score_column(text, column))
        .collect();

    scored.sort_by(|a, b| b.score.cmp(&a.score).then(a.position.cmp(&b.position)));
    scored
}

fn score_column(text: &str, column: &str) -> Option<ScoredCandidate> {
    let tokens = tokenize(column);
    if tokens.is_empty() {
        return None;
    }
    let name_len = column.chars().count();

    if let Some(position) = exact_match(text, &tokens) {
        return Some(ScoredCandidate {
            column: column.to_string(),
            score: EXACT_TIER_BASE + name_len,
            position,
            tier: MatchTier::Exact,
        });
    }

    if tokens.len() > 1 {
        if let Some(position) = ordered_match(text, &tokens) {
            return Some(ScoredCandidate {
                column: column.to_string(),
                score: ORDERED_TIER_BASE + name_len,
                position,
                tier: MatchTier::OrderedTokens,
            });
        }
    }

    partial_match(text, &tokens).map(|(score, position)| ScoredCandidate {
        column: column.to_string(),
        score,
        position,
        tier: MatchTier::PartialToken,
    })
}

fn tokenize(column: &str) -> Vec<&str> {
    column
        .split('_')
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .collect()
}

/// Word boundaries on the sides of `raw` that start or end in a word
/// character. `\b` next to punctuation would never match.
fn with_boundaries(body: &str, raw: &str) -> String {
    let is_word = |c: char| c.is_alphanumeric() || c == '_';
    let leading = raw.chars().next().is_some_and(is_word);
    let trailing = raw.chars().last().is_some_and(is_word);
    format!(
        "{}{body}{}",
        if leading { r"\b" } else { "" },
        if trailing { r"\b" } else { "" }
    )
}

fn bounded(token: &str) -> String {
    with_boundaries(&regex::escape(token), token)
}

fn find(pattern: &str, text: &str) -> Option<usize> {
    match Regex::new(pattern) {
        Ok(re) => re.find(text).map(|m| m.start()),
        Err(error) => {
            tracing::debug!(%pattern, %error, "skipping unbuildable column pattern");
            None
        }
    }
}

fn exact_match(text: &str, tokens: &[&str]) -> Option<usize> {
    let body = tokens
        .iter()
        .map(|t| regex::escape(t))
        .collect::<Vec<_>>()
        .join(r"[_\s]?");
    let pattern = with_boundaries(&body, &tokens.join("_"));
    find(&format!("(?i){pattern}"), text)
}

fn ordered_match(text: &str, tokens: &[&str]) -> Option<usize> {
    let body = tokens
        .iter()
        .map(|t| bounded(t))
        .collect::<Vec<_>>()
        .join(".*?");
    find(&format!("(?is){body}"), text)
}

/// Longest qualifying token that appears as a whole word, with its offset.
fn partial_match(text: &str, tokens: &[&str]) -> Option<(usize, usize)> {
    let mut best: Option<(usize, usize)> = None;
    for token in tokens {
        let len = token.chars().count();
        if len < PARTIAL_TOKEN_MIN_LEN {
            continue;
        }
        let Some(position) = find(&format!("(?i){}", bounded(token)), text) else {
            continue;
        };
        let better = match best {
            None => true,
            Some((best_len, best_pos)) => len > best_len || (len == best_len && position < best_pos),
        };
        if better {
            best = Some((len, position));
        }
    }
    best
}
