//! Top-level CLI parsing and command execution.

use clap::{Parser, Subcommand};
use serde_json::Value;

use crate::app::App;
use crate::config::BloomeoConfig;
use crate::entities::listing::{
    DEFAULT_MAX_PAGES, DEFAULT_PAGE_SIZE, SearchCriteria, TagCriteria,
};
use crate::transform::shape::ResponseMode;

pub mod health;
pub mod list;

#[derive(Parser, Debug)]
#[command(
    name = "bloomeo-mcp",
    about = "Query Bloomeo breeding experiments, trials, variables and genotypes, or serve them as MCP tools",
    version,
    after_help = "Credentials: pass --token or set BLOOMEO_BEARER_TOKEN."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Output as JSON instead of Markdown
    #[arg(short, long, global = true)]
    pub json: bool,

    /// Bloomeo API base URL (overrides BLOOMEO_API_BASE)
    #[arg(long, global = true)]
    pub base_url: Option<String>,

    /// Response size ceiling in bytes (overrides BLOOMEO_MAX_RESPONSE_BYTES)
    #[arg(long, global = true)]
    pub max_response_bytes: Option<usize>,

    /// Bearer token for this invocation
    #[arg(long, global = true)]
    pub token: Option<String>,
}

impl Cli {
    /// Environment configuration with command-line overrides applied.
    pub fn config(&self) -> BloomeoConfig {
        let mut config = BloomeoConfig::from_env();
        if let Some(base) = &self.base_url {
            config = config.with_base_url(base.trim_end_matches('/'));
        }
        if let Some(bytes) = self.max_response_bytes {
            config = config.with_max_response_bytes(bytes);
        }
        config
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Count experiments, optionally filtered
    Count {
        /// Filter document as JSON
        #[arg(long)]
        filter: Option<String>,
    },
    /// One page of experiments
    Experiments {
        /// Zero-based page number
        #[arg(long, default_value_t = 0)]
        page: u32,
        /// Items per page (1-100)
        #[arg(long, default_value_t = DEFAULT_PAGE_SIZE)]
        page_size: u32,
        #[arg(long)]
        filter: Option<String>,
        /// Sort document as JSON (default {"name":"asc"})
        #[arg(long)]
        sort: Option<String>,
    },
    /// Walk several pages of experiments
    Paginate {
        /// Pages to fetch (1-50)
        #[arg(long, default_value_t = DEFAULT_MAX_PAGES)]
        max_pages: u32,
        /// Keep complete items instead of summaries
        #[arg(long)]
        full: bool,
        #[arg(long)]
        filter: Option<String>,
        #[arg(long)]
        sort: Option<String>,
    },
    /// Search experiments by name
    Search {
        term: String,
        /// Match the whole name
        #[arg(long)]
        exact: bool,
    },
    /// Search experiments by several criteria
    SearchAdvanced {
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        status: Option<String>,
        /// Inclusive lower bound on creation date (ISO-8601)
        #[arg(long)]
        created_after: Option<String>,
        /// Inclusive upper bound on creation date (ISO-8601)
        #[arg(long)]
        created_before: Option<String>,
        /// Tag to match (repeatable)
        #[arg(long = "tag")]
        tags: Vec<String>,
    },
    /// Aggregated experiment data
    Experiment {
        experiment_id: String,
        /// summary or full
        #[arg(long, default_value = "full", value_parser = parse_mode)]
        mode: ResponseMode,
    },
    /// Raw task documents of an experiment
    Task {
        experiment_id: String,
        #[arg(long)]
        task_type: Option<String>,
    },
    /// Experiment layout
    Structure { experiment_id: String },
    /// Notebook entries of a trial
    Notebook { trial_id: String },
    /// Treatment of a trial
    Treatment { trial_id: String },
    /// Notation of a trial
    Notation { trial_id: String },
    /// Variable groups of a trial
    VariableGroups { trial_id: String },
    /// Batch genotype lookup (comma-separated ids)
    Genotypes {
        #[arg(value_delimiter = ',', required = true)]
        ids: Vec<String>,
    },
    /// One genotype
    Genotype { genotype_id: String },
    /// One variable definition
    Variable { variable_id: String },
    /// One variable group
    VariableGroup { variable_group_id: String },
    /// Variables used by an experiment
    Variables { experiment_id: String },
    /// Check Bloomeo API connectivity
    Health,
    /// Run MCP server over stdio
    Mcp,
    /// Alias for `mcp`
    Serve,
    /// Command reference, or the arguments of one tool
    List {
        /// Optional tool name (e.g. get_experiment_data)
        tool: Option<String>,
    },
    /// Show version
    Version,
}

fn parse_mode(raw: &str) -> Result<ResponseMode, String> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "summary" => Ok(ResponseMode::Summary),
        "full" => Ok(ResponseMode::Full),
        other => Err(format!("expected summary or full, got {other}")),
    }
}

fn parse_json_arg(flag: &str, raw: Option<String>) -> anyhow::Result<Option<Value>> {
    raw.map(|text| {
        serde_json::from_str(&text)
            .map_err(|err| anyhow::anyhow!("--{flag} is not valid JSON: {err}"))
    })
    .transpose()
}

fn version_output() -> String {
    let cargo_version = env!("CARGO_PKG_VERSION");
    let git_tag = option_env!("BLOOMEO_BUILD_GIT_TAG");
    let git = option_env!("BLOOMEO_BUILD_GIT_SHA").unwrap_or("unknown");
    let build = option_env!("BLOOMEO_BUILD_DATE").unwrap_or("unknown");
    let version = git_tag
        .filter(|t| t.starts_with('v') && !t.contains('-'))
        .map(|t| &t[1..])
        .unwrap_or(cargo_version);
    format!("bloomeo-mcp {version} (git {git}, build {build})")
}

fn to_pretty(value: &Value) -> anyhow::Result<String> {
    Ok(serde_json::to_string_pretty(value)?)
}

fn cell(item: &Value, key: &str) -> String {
    match item.get(key) {
        Some(Value::String(s)) => s.replace('|', "\\|"),
        Some(Value::Null) | None => "-".into(),
        Some(other) => other.to_string(),
    }
}

fn experiments_markdown(heading: &str, value: &Value) -> String {
    let items = value
        .get("items")
        .or_else(|| value.get("experiments"))
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();

    let mut out = format!("# {heading}\n\n");
    if items.is_empty() {
        out.push_str("No experiments found.\n");
    } else {
        out.push_str("| ID | Name | Status | Created |\n");
        out.push_str("|----|------|--------|---------|\n");
        for item in items {
            out.push_str(&format!(
                "| {} | {} | {} | {} |\n",
                cell(item, "_id"),
                cell(item, "name"),
                cell(item, "status"),
                cell(item, "createdAt")
            ));
        }
    }

    let mut footer = Vec::new();
    if let Some(total) = value.get("total_count").and_then(Value::as_u64) {
        footer.push(format!("total {total}"));
    }
    if let Some(pages) = value.get("pages_fetched").and_then(Value::as_u64) {
        footer.push(format!("{pages} page(s) fetched"));
    }
    if let Some(next) = value.get("next_page").and_then(Value::as_u64) {
        footer.push(format!("next page {next}"));
    }
    if value.get("truncated").and_then(Value::as_bool) == Some(true) {
        footer.push("truncated".into());
    }
    if !footer.is_empty() {
        out.push_str(&format!("\n{}\n", footer.join(", ")));
    }
    if let Some(note) = value.get("note").and_then(Value::as_str) {
        out.push_str(&format!("\n{note}\n"));
    }
    out
}

fn count_markdown(value: &Value) -> String {
    let total = value.get("total").and_then(Value::as_u64).unwrap_or(0);
    let pages = value.get("total_pages").and_then(Value::as_u64).unwrap_or(0);
    let lower_bound = value.get("lower_bound").and_then(Value::as_bool) == Some(true);
    let qualifier = if lower_bound { "at least " } else { "" };
    format!(
        "# Experiments\n\n{qualifier}{total} experiments ({pages} pages of {DEFAULT_PAGE_SIZE})\n"
    )
}

/// Executes a parsed command and returns its printable output.
///
/// # Errors
///
/// Returns an error when arguments are invalid, the credential is missing, or
/// the Bloomeo API call fails.
pub async fn run(cli: Cli) -> anyhow::Result<String> {
    let json_output = cli.json;
    let token = cli.token.as_deref();
    let app = || App::from_config(cli.config());
    let value = match &cli.command {
        Commands::List { tool } => return Ok(list::render(tool.as_deref())?),
        Commands::Version => return Ok(version_output()),
        Commands::Mcp | Commands::Serve => {
            anyhow::bail!("MCP/serve commands should not go through CLI run()")
        }
        Commands::Health => {
            let report = health::check(&app()?).await;
            if json_output {
                return Ok(serde_json::to_string_pretty(&report)?);
            }
            return Ok(report.to_markdown());
        }
        Commands::Count { filter } => {
            let value = app()?
                .experiments_count(parse_json_arg("filter", filter.clone())?, token)
                .await?;
            if !json_output {
                return Ok(count_markdown(&value));
            }
            value
        }
        Commands::Experiments {
            page,
            page_size,
            filter,
            sort,
        } => {
            let value = app()?
                .all_experiments(
                    i64::from(*page),
                    i64::from(*page_size),
                    parse_json_arg("filter", filter.clone())?,
                    parse_json_arg("sort", sort.clone())?,
                    token,
                )
                .await?;
            if !json_output {
                return Ok(experiments_markdown(
                    &format!("Experiments (page {page})"),
                    &value,
                ));
            }
            value
        }
        Commands::Paginate {
            max_pages,
            full,
            filter,
            sort,
        } => {
            let value = app()?
                .all_experiments_paginated(
                    i64::from(*max_pages),
                    *full,
                    parse_json_arg("filter", filter.clone())?,
                    parse_json_arg("sort", sort.clone())?,
                    token,
                )
                .await?;
            if !json_output && !*full {
                return Ok(experiments_markdown("Experiments", &value));
            }
            value
        }
        Commands::Search { term, exact } => {
            let value = app()?
                .search_experiments_by_name(term, *exact, token)
                .await?;
            if !json_output {
                return Ok(experiments_markdown(
                    &format!("Experiments matching \"{term}\""),
                    &value,
                ));
            }
            value
        }
        Commands::SearchAdvanced {
            name,
            description,
            status,
            created_after,
            created_before,
            tags,
        } => {
            let criteria = SearchCriteria {
                name: name.clone(),
                description: description.clone(),
                status: status.clone(),
                created_after: created_after.clone(),
                created_before: created_before.clone(),
                tags: (!tags.is_empty()).then(|| TagCriteria::Many(tags.clone())),
            };
            let value = app()?
                .search_experiments_advanced(&criteria, token)
                .await?;
            if !json_output {
                return Ok(experiments_markdown("Experiments", &value));
            }
            value
        }
        Commands::Experiment {
            experiment_id,
            mode,
        } => app()?.experiment_data(experiment_id, *mode, token).await?,
        Commands::Task {
            experiment_id,
            task_type,
        } => {
            app()?
                .experiment_task(experiment_id, task_type.as_deref(), token)
                .await?
        }
        Commands::Structure { experiment_id } => {
            app()?.experiment_structure(experiment_id, token).await?
        }
        Commands::Notebook { trial_id } => app()?.experiment_notebook(trial_id, token).await?,
        Commands::Treatment { trial_id } => app()?.experiment_treatment(trial_id, token).await?,
        Commands::Notation { trial_id } => app()?.trial_notation(trial_id, token).await?,
        Commands::VariableGroups { trial_id } => app()?.variable_groups(trial_id, token).await?,
        Commands::Genotypes { ids } => app()?.genotypes(ids, token).await?,
        Commands::Genotype { genotype_id } => app()?.genotype_details(genotype_id, token).await?,
        Commands::Variable { variable_id } => app()?.variable_details(variable_id, token).await?,
        Commands::VariableGroup { variable_group_id } => {
            app()?
                .variable_group_details(variable_group_id, token)
                .await?
        }
        Commands::Variables { experiment_id } => {
            app()?.variables_by_experiment(experiment_id, token).await?
        }
    };
    to_pretty(&value)
}

/// Parses `args` as a command line and runs it.
///
/// # Errors
///
/// Returns an error when CLI args cannot be parsed or when command execution fails.
pub async fn execute(mut args: Vec<String>) -> anyhow::Result<String> {
    if args.is_empty() {
        args.push("bloomeo-mcp".to_string());
    }
    let cli = Cli::try_parse_from(args)?;
    run(cli).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn args(line: &[&str]) -> Vec<String> {
        line.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn global_flags_parse_after_subcommand() {
        let cli = Cli::try_parse_from([
            "bloomeo-mcp",
            "experiments",
            "--page",
            "2",
            "--json",
            "--base-url",
            "http://localhost:9/",
        ])
        .expect("parse");
        assert!(cli.json);
        assert_eq!(cli.config().base_url, "http://localhost:9");
        match cli.command {
            Commands::Experiments {
                page, page_size, ..
            } => {
                assert_eq!(page, 2);
                assert_eq!(page_size, DEFAULT_PAGE_SIZE);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn experiment_mode_rejects_unknown_values() {
        let cli = Cli::try_parse_from(["bloomeo-mcp", "experiment", "e-1", "--mode", "summary"])
            .expect("parse");
        assert!(matches!(
            cli.command,
            Commands::Experiment {
                mode: ResponseMode::Summary,
                ..
            }
        ));
        assert!(Cli::try_parse_from(["bloomeo-mcp", "experiment", "e-1", "--mode", "all"]).is_err());
    }

    #[test]
    fn genotypes_split_on_commas() {
        let cli = Cli::try_parse_from(["bloomeo-mcp", "genotypes", "g-1,g-2"]).expect("parse");
        match cli.command {
            Commands::Genotypes { ids } => assert_eq!(ids, vec!["g-1", "g-2"]),
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn version_output_names_the_binary() {
        assert!(version_output().starts_with("bloomeo-mcp "));
    }

    #[test]
    fn count_markdown_marks_lower_bounds() {
        let md = count_markdown(&serde_json::json!({"total": 5000, "total_pages": 100, "lower_bound": true}));
        assert!(md.contains("at least 5000 experiments"));
    }

    #[tokio::test]
    async fn mcp_is_not_run_through_cli() {
        let err = execute(args(&["bloomeo-mcp", "mcp"])).await.unwrap_err();
        assert!(err.to_string().contains("should not go through CLI run()"));
    }

    #[tokio::test]
    async fn invalid_filter_json_is_reported() {
        let err = execute(args(&[
            "bloomeo-mcp",
            "count",
            "--filter",
            "{not json",
            "--token",
            "tok",
        ]))
        .await
        .unwrap_err();
        assert!(err.to_string().contains("--filter is not valid JSON"));
    }

    #[tokio::test]
    async fn search_renders_markdown_table() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/experiment/v2/trial"))
            .and(query_param("page", "0"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [
                    {"_id": "e-1", "name": "Wheat 2024", "status": "active"},
                    {"_id": "e-2", "name": "Barley", "status": "draft"}
                ]
            })))
            .mount(&server)
            .await;

        let out = execute(args(&[
            "bloomeo-mcp",
            "search",
            "wheat",
            "--token",
            "tok",
            "--base-url",
            &server.uri(),
        ]))
        .await
        .expect("search should succeed");
        assert!(out.contains("| e-1 | Wheat 2024 | active | - |"));
        assert!(!out.contains("Barley"));
    }
}
