use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Deserialize;
use serde_json::json;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use vizcanvas_core::*;
use vizcanvas_memory::CanvasStore;
use vizcanvas_schema::{ChartDirective, ChartKind, ColumnDescriptor, UiNode};

#[derive(Parser)]
#[command(name = "vizcanvas", version, about = "Chart directives to canvas nodes")]
struct Cli {
    #[arg(long, global = true, help = "Path to vizcanvas.yaml")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Resolve chart columns from free text")]
    Resolve {
        #[arg(long, help = "Chart kind (bar, histogram, scatter, heatmap)")]
        chart: ChartKind,
        #[arg(long, value_delimiter = ',', help = "Comma separated column names")]
        columns: Vec<String>,
        #[arg(help = "Request text")]
        text: String,
    },
    #[command(about = "Extract chart directives from a rendered reply")]
    Extract {
        #[command(flatten)]
        input: ReplyArgs,
    },
    #[command(about = "Extract charts and place them on a stored canvas")]
    Place {
        #[command(flatten)]
        input: ReplyArgs,
        #[arg(long, default_value = "canvas.json", help = "Canvas snapshot file")]
        canvas: PathBuf,
    },
    #[command(about = "Connect two chart nodes and compare their charts")]
    Compare {
        #[arg(long, default_value = "canvas.json", help = "Canvas snapshot file")]
        canvas: PathBuf,
        #[arg(long, value_delimiter = ',', help = "Comma separated column names")]
        columns: Vec<String>,
        #[arg(help = "Source node id")]
        source: String,
        #[arg(help = "Target node id")]
        target: String,
    },
}

#[derive(clap::Args)]
struct ReplyArgs {
    #[arg(long, help = "JSON file holding the reply's component tree")]
    reply: PathBuf,
    #[arg(long, value_delimiter = ',', help = "Comma separated column names")]
    columns: Vec<String>,
    #[arg(long, help = "The user request that produced the reply")]
    text: Option<String>,
    #[arg(long, help = "Dataset for charts that name none")]
    dataset: Option<String>,
}

/// A reply file holds either a list of root nodes or a single root.
#[derive(Deserialize)]
#[serde(untagged)]
enum ReplyFile {
    Many(Vec<UiNode>),
    One(UiNode),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => VizConfig::default(),
    };

    let output = match cli.command {
        Commands::Resolve {
            chart,
            columns,
            text,
        } => json!({
            "chart": chart.as_str(),
            "resolution": resolve(&text, &columns, chart),
            "candidates": score_candidates(&text, &columns),
        }),
        Commands::Extract { input } => {
            let (_, charts) = extract_reply(&config, &input).await?;
            json!({ "charts": charts })
        }
        Commands::Place { input, canvas } => {
            let (reply, charts) = extract_reply(&config, &input).await?;
            let placed = place_reply(&config, &canvas, &reply, &charts).await?;
            json!({ "charts": charts, "placed": placed })
        }
        Commands::Compare {
            canvas,
            columns,
            source,
            target,
        } => {
            let (edge, comparison) =
                compare_nodes(&config, &canvas, &columns, &source, &target).await?;
            json!({ "edge": edge, "comparison": comparison })
        }
    };

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

fn read_reply(path: &Path) -> Result<Vec<UiNode>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read reply file: {}", path.display()))?;
    parse_reply(&raw).with_context(|| format!("failed to parse reply file: {}", path.display()))
}

fn parse_reply(raw: &str) -> Result<Vec<UiNode>> {
    Ok(match serde_json::from_str(raw)? {
        ReplyFile::Many(nodes) => nodes,
        ReplyFile::One(node) => vec![node],
    })
}

async fn extract_reply(
    config: &VizConfig,
    input: &ReplyArgs,
) -> Result<(Vec<UiNode>, Vec<ExtractedChart>)> {
    let reply = read_reply(&input.reply)?;
    let text = input.text.as_deref().unwrap_or_default();
    let columns = (!input.columns.is_empty()).then_some(input.columns.as_slice());

    let mut charts = extract_all(&reply, input.dataset.as_deref(), Some(text), columns);
    if charts.is_empty() {
        tracing::info!(path = %input.reply.display(), "reply holds no charts");
        return Ok((reply, charts));
    }

    if let (Some(columns), Some(pipeline)) = (columns, build_enrichment(config)?) {
        charts = pipeline.resolve_charts(charts, text, columns).await;
    }
    Ok((reply, charts))
}

async fn place_reply(
    config: &VizConfig,
    canvas: &Path,
    reply: &[UiNode],
    charts: &[ExtractedChart],
) -> Result<Vec<String>> {
    let store = CanvasStore::at_path(canvas);
    let snapshot = store.load().await?;
    let mut engine = LayoutEngine::with_graph(
        config.layout.clone(),
        CanvasGraph::new(snapshot.nodes, snapshot.edges),
    );

    let title = find_cluster_title(reply);
    let placed = engine
        .place_charts(title.as_deref(), charts)
        .context("failed to place charts")?;

    let graph = engine.into_graph();
    store.save(&graph.nodes, &graph.edges).await?;
    tracing::info!(
        placed = placed.len(),
        total = graph.nodes.len(),
        canvas = %store.path().display(),
        "canvas updated"
    );
    Ok(placed)
}

async fn compare_nodes(
    config: &VizConfig,
    canvas: &Path,
    columns: &[String],
    source: &str,
    target: &str,
) -> Result<(String, ChartComparison)> {
    let store = CanvasStore::at_path(canvas);
    let snapshot = store.load().await?;
    let mut engine = LayoutEngine::with_graph(
        config.layout.clone(),
        CanvasGraph::new(snapshot.nodes, snapshot.edges),
    );

    let edge = engine
        .add_edge_between_nodes(source, target, false)
        .context("failed to connect nodes")?;
    let first = chart_of(engine.graph(), source)?;
    let second = chart_of(engine.graph(), target)?;

    let descriptors: Vec<ColumnDescriptor> = columns
        .iter()
        .map(|name| ColumnDescriptor {
            name: name.clone(),
            detected_type: String::new(),
        })
        .collect();
    let comparison = build_comparator(config)?
        .compare(&first, &second, &descriptors)
        .await;

    let graph = engine.into_graph();
    store.save(&graph.nodes, &graph.edges).await?;
    tracing::info!(%edge, source, target, "charts connected");
    Ok((edge, comparison))
}

fn chart_of(graph: &CanvasGraph, id: &str) -> Result<ChartDirective> {
    graph
        .node(id)
        .and_then(|node| node.chart_directive.clone())
        .with_context(|| format!("node {id} holds no chart"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use vizcanvas_schema::Slot;

    #[test]
    fn cli_parses_resolve_columns() {
        let cli = Cli::try_parse_from([
            "vizcanvas",
            "resolve",
            "--chart",
            "bar",
            "--columns",
            "City,State",
            "sales by city",
        ])
        .unwrap();
        match cli.command {
            Commands::Resolve { chart, columns, text } => {
                assert_eq!(chart, ChartKind::Bar);
                assert_eq!(columns, vec!["City", "State"]);
                assert_eq!(text, "sales by city");
            }
            _ => panic!("expected resolve"),
        }
    }

    #[test]
    fn cli_rejects_unknown_chart_kind() {
        assert!(Cli::try_parse_from(["vizcanvas", "resolve", "--chart", "pie", "x"]).is_err());
    }

    #[test]
    fn reply_file_accepts_a_single_root() {
        let one = parse_reply(r#"{"component": "BarChart", "props": {"column": "City"}}"#).unwrap();
        assert_eq!(one.len(), 1);
        let many = parse_reply(r#"[{"component": "Histogram"}, {"component": "Text"}]"#).unwrap();
        assert_eq!(many.len(), 2);
        assert!(parse_reply("not json").is_err());
    }

    #[tokio::test]
    async fn place_appends_to_the_stored_canvas() {
        let dir = tempfile::tempdir().unwrap();
        let reply_path = dir.path().join("reply.json");
        std::fs::write(
            &reply_path,
            r#"[{"component": "BarChart", "props": {"datasetId": "sales", "column": "undefined"}}]"#,
        )
        .unwrap();
        let canvas = dir.path().join("canvas.json");
        let input = ReplyArgs {
            reply: reply_path,
            columns: vec!["City".into(), "Region".into()],
            text: Some("revenue per city".into()),
            dataset: None,
        };
        let config = VizConfig::default();

        for expected in 1..=2 {
            let (reply, charts) = extract_reply(&config, &input).await.unwrap();
            assert_eq!(charts[0].directive.slot(Slot::Column), Some("City"));
            let placed = place_reply(&config, &canvas, &reply, &charts).await.unwrap();
            assert_eq!(placed.len(), 1);

            let snapshot = CanvasStore::at_path(&canvas).load().await.unwrap();
            assert_eq!(snapshot.nodes.len(), expected);
        }
    }

    #[tokio::test]
    async fn compare_connects_two_chart_nodes() {
        let dir = tempfile::tempdir().unwrap();
        let reply_path = dir.path().join("reply.json");
        std::fs::write(
            &reply_path,
            r#"[{"component": "BarChart", "props": {"datasetId": "sales", "column": "City"}},
                {"component": "Histogram", "props": {"datasetId": "sales", "column": "Revenue"}}]"#,
        )
        .unwrap();
        let canvas = dir.path().join("canvas.json");
        let input = ReplyArgs {
            reply: reply_path,
            columns: vec![],
            text: None,
            dataset: None,
        };
        let config = VizConfig::default();
        let (reply, charts) = extract_reply(&config, &input).await.unwrap();
        let placed = place_reply(&config, &canvas, &reply, &charts).await.unwrap();

        let (edge, comparison) =
            compare_nodes(&config, &canvas, &[], &placed[1], &placed[0]).await.unwrap();
        assert_eq!(comparison.comparison_title, "Revenue vs City");

        let snapshot = CanvasStore::at_path(&canvas).load().await.unwrap();
        assert_eq!(snapshot.edges.len(), 2);
        let stored = snapshot.edges.iter().find(|e| e.id == edge).unwrap();
        assert_eq!(stored.source_id, placed[1]);
        assert!(!stored.animated);

        assert!(compare_nodes(&config, &canvas, &[], &placed[0], "nope").await.is_err());
    }
}
