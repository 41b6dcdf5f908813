//! Trainexus CLI
//!
//! The `trainexus` command authors, versions and regression-tests
//! conversational training scenarios.
//!
//! ## Commands
//!
//! - `new`: print a starter scenario document
//! - `validate`, `lint`: check a scenario document before saving it
//! - `version`: create and inspect stored scenario versions
//! - `diff`: structural diff between two versions of a scenario
//! - `simulate`: run one simulated dialogue and score it
//! - `regress`: batch regression run with CSV/JSON reports

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use scenario_store::{BaselineStore, SurrealScenarioStore};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn, Level};

use trainexus_core::{
    lint_scenario, render_diff_text, render_summary_md, starter_document, validate,
    write_report_csv, write_report_json, DialogueAgent, DialogueOrchestrator, DocumentRetriever,
    EngineConfig, Evaluator, Excerpt, HttpChatAgent, Judge, LlmConfig, LlmJudge, NoDocuments,
    OfflineAgent, OfflineJudge, Phase, RegressionRunner, RunAgents, ScenarioRepository,
    ScenarioSelector, SimulationConfig, StaticAgentProvider, StaticRetriever, TesterVariant,
};

#[derive(Parser)]
#[command(name = "trainexus")]
#[command(author = "Trainexus Maintainers")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Scenario regression & simulation engine", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print a valid starter scenario document
    New {
        /// Scenario tag
        tag: String,

        /// Write to this file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Validate a scenario document (JSON) and list every violation
    Validate {
        /// Scenario document file
        file: PathBuf,
    },

    /// Heuristic checks on a scenario's prompt templates
    Lint {
        /// Scenario document file
        file: PathBuf,
    },

    /// Create and inspect stored scenario versions
    Version {
        #[command(subcommand)]
        action: VersionAction,
    },

    /// Structural diff between two versions of a scenario
    Diff {
        /// Scenario tag
        tag: String,
        /// Old version
        a: u32,
        /// New version
        b: u32,
        /// Emit JSON output instead of terminal text
        #[arg(long)]
        json: bool,
    },

    /// Run one simulated dialogue and evaluate the transcript
    Simulate {
        /// Scenario tag
        tag: String,

        /// Pinned version (default: latest)
        #[arg(long)]
        version: Option<u32>,

        /// Use deterministic offline agents even if an API key is set
        #[arg(long, env = "TRAINEXUS_OFFLINE")]
        offline: bool,

        /// Skip evaluation, only print the transcript
        #[arg(long)]
        no_evaluate: bool,

        /// JSON file mapping tag -> [{text, score}] document excerpts
        #[arg(long)]
        excerpts: Option<PathBuf>,

        /// Write the run (and evaluation) as JSON to this file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Run scenarios × repetitions and compare against baselines
    Regress(RegressArgs),
}

#[derive(Subcommand)]
enum VersionAction {
    /// Save a scenario document as the next version of its tag
    Create {
        /// Scenario document file
        file: PathBuf,

        /// Author recorded with the version
        #[arg(short, long, default_value = "trainexus-cli")]
        author: String,

        /// Optional change note
        #[arg(short, long)]
        changelog: Option<String>,
    },

    /// Print a stored version as JSON
    Show {
        /// Scenario tag
        tag: String,

        /// Version (default: latest)
        #[arg(long)]
        version: Option<u32>,
    },

    /// Show all versions of a scenario
    History {
        /// Scenario tag
        tag: String,
    },

    /// List stored scenario tags
    List,
}

#[derive(Args)]
struct RegressArgs {
    /// Scenario selectors: `tag` (latest) or `tag@version`
    #[arg(value_parser = ScenarioSelector::parse)]
    selectors: Vec<ScenarioSelector>,

    /// Run every stored scenario at its latest version
    #[arg(long, conflicts_with = "selectors")]
    all: bool,

    /// Simulations per scenario
    #[arg(short, long)]
    repetitions: Option<u32>,

    /// Maximum simulations in flight
    #[arg(short, long)]
    concurrency: Option<usize>,

    /// Use deterministic offline agents even if an API key is set
    #[arg(long, env = "TRAINEXUS_OFFLINE")]
    offline: bool,

    /// Print the batch plan without running anything
    #[arg(long)]
    dry_run: bool,

    /// Write the report as CSV
    #[arg(long)]
    csv: Option<PathBuf>,

    /// Write the report as JSON
    #[arg(long)]
    json_out: Option<PathBuf>,

    /// Write a markdown summary
    #[arg(long)]
    summary: Option<PathBuf>,

    /// Record conclusive verdicts as the new baselines
    #[arg(long)]
    record_baseline: bool,

    /// Run every scenario against the best_case, weak and zero_knowledge testers
    #[arg(long)]
    persona_matrix: bool,

    /// Extra tester variant as NAME=INSTRUCTIONS (repeatable)
    #[arg(long = "persona", value_parser = TesterVariant::parse)]
    personas: Vec<TesterVariant>,

    /// JSON file mapping tag -> [{text, score}] document excerpts
    #[arg(long)]
    excerpts: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    trainexus_core::init_tracing(cli.json, level);

    match cli.command {
        Commands::New { tag, output } => cmd_new(&tag, output.as_deref()),
        Commands::Validate { file } => cmd_validate(&file),
        Commands::Lint { file } => cmd_lint(&file),
        Commands::Version { action } => {
            let repo = ScenarioRepository::new(open_store().await?);
            match action {
                VersionAction::Create {
                    file,
                    author,
                    changelog,
                } => cmd_version_create(&repo, &file, &author, changelog.as_deref()).await,
                VersionAction::Show { tag, version } => {
                    cmd_version_show(&repo, &tag, version).await
                }
                VersionAction::History { tag } => cmd_version_history(&repo, &tag).await,
                VersionAction::List => cmd_version_list(&repo).await,
            }
        }
        Commands::Diff { tag, a, b, json } => {
            let repo = ScenarioRepository::new(open_store().await?);
            cmd_diff(&repo, &tag, a, b, json).await
        }
        Commands::Simulate {
            tag,
            version,
            offline,
            no_evaluate,
            excerpts,
            output,
        } => {
            let repo = ScenarioRepository::new(open_store().await?);
            let config = EngineConfig::from_env();
            let (agents, judge) = collaborators(offline, &config.simulation)?;
            let retriever = load_retriever(excerpts.as_deref())?;
            let selector = ScenarioSelector {
                tag,
                version,
            };
            cmd_simulate(
                &repo,
                &selector,
                agents,
                judge,
                retriever,
                config.simulation,
                !no_evaluate,
                output.as_deref(),
            )
            .await
        }
        Commands::Regress(args) => {
            let store = open_store().await?;
            let repo = ScenarioRepository::new(store.clone());
            cmd_regress(&repo, store, args, LlmConfig::from_env()).await
        }
    }
}

async fn open_store() -> Result<Arc<SurrealScenarioStore>> {
    let store = SurrealScenarioStore::from_env()
        .await
        .context("Failed to connect to scenario store")?;
    Ok(Arc::new(store))
}

/// Online agents when an API key is configured, deterministic offline ones
/// otherwise.
fn collaborators(
    offline: bool,
    simulation: &SimulationConfig,
) -> Result<(RunAgents, Arc<dyn Judge>)> {
    select_collaborators(offline, LlmConfig::from_env(), simulation)
}

fn select_collaborators(
    offline: bool,
    llm: LlmConfig,
    simulation: &SimulationConfig,
) -> Result<(RunAgents, Arc<dyn Judge>)> {
    if offline || !llm.is_online() {
        info!("using offline agents");
        return Ok((RunAgents::shared(Arc::new(OfflineAgent)), Arc::new(OfflineJudge)));
    }

    info!(model = %llm.model, endpoint = %llm.endpoint, "using LLM agents");
    let timeout = Duration::from_millis(simulation.call_timeout_ms);
    let agent: Arc<dyn DialogueAgent> =
        Arc::new(HttpChatAgent::new(llm, timeout).context("Failed to build LLM client")?);
    let judge = Arc::new(LlmJudge::new(agent.clone()));
    Ok((RunAgents::shared(agent), judge))
}

fn load_retriever(path: Option<&Path>) -> Result<Arc<dyn DocumentRetriever>> {
    let Some(path) = path else {
        return Ok(Arc::new(NoDocuments));
    };
    let by_tag: BTreeMap<String, Vec<Excerpt>> = read_json_file(path)?;
    let mut retriever = StaticRetriever::new();
    for (tag, excerpts) in &by_tag {
        for excerpt in excerpts {
            retriever = retriever.with_excerpt(tag, &excerpt.text, excerpt.score);
        }
    }
    Ok(Arc::new(retriever))
}

fn read_json_file<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read JSON file: {:?}", path))?;
    serde_json::from_str(&content).with_context(|| format!("Invalid JSON in {:?}", path))
}

fn write_json_file<T: serde::Serialize>(path: &Path, value: &T) -> Result<()> {
    let text = serde_json::to_string_pretty(value)?;
    std::fs::write(path, text).with_context(|| format!("Failed to write {:?}", path))
}

// ---------------------------------------------------------------------------
// Authoring
// ---------------------------------------------------------------------------

fn cmd_new(tag: &str, output: Option<&Path>) -> Result<()> {
    let doc = starter_document(tag);
    match output {
        Some(path) => {
            write_json_file(path, &doc)?;
            println!("Wrote starter scenario '{}' to {:?}", tag, path);
        }
        None => println!("{}", serde_json::to_string_pretty(&doc)?),
    }
    Ok(())
}

fn cmd_validate(file: &Path) -> Result<()> {
    let doc: Value = read_json_file(file)?;
    match validate(&doc) {
        Ok(spec) => {
            println!(
                "✓ '{}' is valid ({} formative / {} summative criteria, max {} turns)",
                spec.tag,
                spec.criteria(Phase::Formative).count(),
                spec.criteria(Phase::Summative).count(),
                spec.effective_max_turns()
            );
            Ok(())
        }
        Err(err) => {
            println!("✗ {} violation(s):", err.violations.len());
            for violation in &err.violations {
                println!("  - {}", violation);
            }
            anyhow::bail!("Scenario document is invalid")
        }
    }
}

fn cmd_lint(file: &Path) -> Result<()> {
    let doc: Value = read_json_file(file)?;
    let spec = validate(&doc).context("Lint needs a valid scenario document")?;

    let mut errors = 0;
    for (kind, report) in lint_scenario(&spec) {
        if report.is_clean() {
            println!("✓ {}", kind.field());
            continue;
        }
        println!("{}", kind.field());
        for issue in &report.errors {
            println!("  ✗ {}", issue.message);
        }
        for issue in &report.warnings {
            println!("  ! {}", issue.message);
        }
        errors += report.errors.len();
    }

    if errors > 0 {
        anyhow::bail!("{} lint error(s)", errors)
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Versions
// ---------------------------------------------------------------------------

async fn cmd_version_create(
    repo: &ScenarioRepository,
    file: &Path,
    author: &str,
    changelog: Option<&str>,
) -> Result<()> {
    let doc: Value = read_json_file(file)?;
    let created = repo
        .create_version(&doc, author, changelog)
        .await
        .context("Failed to create scenario version")?;

    println!("Created {}@{}", created.tag, created.version);
    println!("Digest: {}", created.digest.short());
    Ok(())
}

async fn cmd_version_show(
    repo: &ScenarioRepository,
    tag: &str,
    version: Option<u32>,
) -> Result<()> {
    let found = match version {
        Some(v) => repo.get_version(tag, v).await,
        None => repo.get_latest(tag).await,
    }
    .with_context(|| format!("Failed to load scenario '{}'", tag))?;

    let mut doc = found.spec.to_document()?;
    doc["version"] = Value::from(found.version);
    println!("{}", serde_json::to_string_pretty(&doc)?);
    Ok(())
}

async fn cmd_version_history(repo: &ScenarioRepository, tag: &str) -> Result<()> {
    let history = repo.history(tag).await?;

    println!("History of '{}':", tag);
    for version in history.iter().rev() {
        println!(
            "  v{} {} {} by {}",
            version.version,
            version.digest.short(),
            version.created_at.format("%Y-%m-%d %H:%M:%S"),
            version.author
        );
        if let Some(note) = &version.changelog {
            println!("      {}", note);
        }
    }
    Ok(())
}

async fn cmd_version_list(repo: &ScenarioRepository) -> Result<()> {
    let tags = repo.list_tags().await?;
    if tags.is_empty() {
        println!("No scenarios stored.");
        return Ok(());
    }
    for tag in tags {
        let latest = repo.get_latest(&tag).await?;
        println!("  {} (v{}) {}", tag, latest.version, latest.spec.name);
    }
    Ok(())
}

async fn cmd_diff(repo: &ScenarioRepository, tag: &str, a: u32, b: u32, json: bool) -> Result<()> {
    let changes = repo
        .diff(tag, a, b)
        .await
        .with_context(|| format!("Failed to diff {}@{} and {}@{}", tag, a, tag, b))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&changes)?);
    } else {
        println!("{}", render_diff_text(&changes));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Simulation
// ---------------------------------------------------------------------------

#[allow(clippy::too_many_arguments)]
async fn cmd_simulate(
    repo: &ScenarioRepository,
    selector: &ScenarioSelector,
    agents: RunAgents,
    judge: Arc<dyn Judge>,
    retriever: Arc<dyn DocumentRetriever>,
    simulation: SimulationConfig,
    evaluate: bool,
    output: Option<&Path>,
) -> Result<()> {
    let scenario = match selector.version {
        Some(v) => repo.get_version(&selector.tag, v).await,
        None => repo.get_latest(&selector.tag).await,
    }
    .with_context(|| format!("Failed to load scenario '{}'", selector.tag))?;

    let timeout = Duration::from_millis(simulation.call_timeout_ms);
    let run = DialogueOrchestrator::new(agents, retriever, simulation)
        .run(&scenario)
        .await;

    println!("Run ID: {}", run.metadata.run_id);
    println!("Scenario: {}@{}", run.tag, run.version);
    println!();
    for turn in &run.transcript.turns {
        println!("[{}] {}: {}", turn.index, turn.speaker, turn.output);
    }
    println!();
    println!(
        "Termination: {} ({} turn(s), {} call(s), {} retr{})",
        run.transcript.termination,
        run.transcript.len(),
        run.metadata.calls,
        run.metadata.retries,
        if run.metadata.retries == 1 { "y" } else { "ies" }
    );
    if let Some(failure) = &run.transcript.failure {
        println!("Failure: {}", failure);
    }

    let evaluation = if evaluate && run.transcript.is_completed() {
        let result = Evaluator::new(judge)
            .with_timeout(timeout)
            .evaluate(&scenario, &run.transcript)
            .await
            .context("Evaluation failed")?;
        println!();
        for criterion in &result.criteria {
            match criterion.outcome.score() {
                Some(score) => println!("  {} {:.2}", criterion.criterion_id, score),
                None => println!("  {} inconclusive", criterion.criterion_id),
            }
        }
        println!("Verdict: {}", result.verdict);
        Some(result)
    } else {
        None
    };

    if let Some(path) = output {
        let payload = serde_json::json!({ "run": run, "evaluation": evaluation });
        write_json_file(path, &payload)?;
        info!("wrote run to {:?}", path);
    }

    if !run.transcript.is_completed() {
        anyhow::bail!("Simulation failed: {}", run.transcript.termination)
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Regression
// ---------------------------------------------------------------------------

async fn resolve_selectors(
    repo: &ScenarioRepository,
    args: &RegressArgs,
) -> Result<Vec<ScenarioSelector>> {
    if args.all {
        let tags = repo.list_tags().await?;
        return Ok(tags.into_iter().map(ScenarioSelector::latest).collect());
    }
    if args.selectors.is_empty() {
        anyhow::bail!("Name at least one scenario or pass --all")
    }
    Ok(args.selectors.clone())
}

fn engine_config(args: &RegressArgs) -> EngineConfig {
    let mut config = EngineConfig::from_env();
    if let Some(repetitions) = args.repetitions {
        config.regression.repetitions = repetitions.max(1);
    }
    if let Some(concurrency) = args.concurrency {
        config.regression.concurrency = concurrency.max(1);
    }
    config.regression.record_baseline = args.record_baseline;
    if args.persona_matrix {
        config.regression.tester_variants = TesterVariant::default_matrix();
    }
    config
        .regression
        .tester_variants
        .extend(args.personas.iter().cloned());
    config
}

async fn print_plan(
    repo: &ScenarioRepository,
    selectors: &[ScenarioSelector],
    config: &EngineConfig,
) -> Result<()> {
    println!(
        "Plan: {} scenario(s) × {} repetition(s), concurrency {}",
        selectors.len(),
        config.regression.repetitions,
        config.regression.concurrency
    );
    if !config.regression.tester_variants.is_empty() {
        let names: Vec<&str> = config
            .regression
            .tester_variants
            .iter()
            .map(|v| v.name.as_str())
            .collect();
        println!("Tester variants: {}", names.join(", "));
    }
    for selector in selectors {
        let found = match selector.version {
            Some(v) => repo.get_version(&selector.tag, v).await,
            None => repo.get_latest(&selector.tag).await,
        };
        match found {
            Ok(scenario) => println!(
                "  {}@{} max {} turns, {} formative / {} summative criteria",
                scenario.tag,
                scenario.version,
                scenario.spec.effective_max_turns(),
                scenario.spec.criteria(Phase::Formative).count(),
                scenario.spec.criteria(Phase::Summative).count()
            ),
            Err(e) => println!("  {} ✗ {}", selector.tag, e),
        }
    }
    Ok(())
}

async fn cmd_regress(
    repo: &ScenarioRepository,
    baselines: Arc<dyn BaselineStore>,
    args: RegressArgs,
    llm: LlmConfig,
) -> Result<()> {
    let selectors = resolve_selectors(repo, &args).await?;
    let config = engine_config(&args);

    if args.dry_run {
        return print_plan(repo, &selectors, &config).await;
    }

    let (agents, judge) = select_collaborators(args.offline, llm, &config.simulation)?;
    let runner = RegressionRunner::new(
        repo.clone(),
        baselines,
        Arc::new(StaticAgentProvider::new(agents)),
        judge,
    )
    .with_retriever(load_retriever(args.excerpts.as_deref())?)
    .with_simulation_config(config.simulation.clone())
    .with_config(config.regression.clone());

    let cancel = runner.cancel_handle();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted, cancelling runs that have not started");
            cancel.cancel();
        }
    });
    let report = runner.run(&selectors).await;
    interrupt.abort();

    println!("{}", render_summary_md(&report));

    if let Some(path) = &args.csv {
        write_report_csv(path, &report)?;
        info!("wrote CSV report to {:?}", path);
    }
    if let Some(path) = &args.json_out {
        write_report_json(path, &report)?;
        info!("wrote JSON report to {:?}", path);
    }
    if let Some(path) = &args.summary {
        std::fs::write(path, render_summary_md(&report))
            .with_context(|| format!("Failed to write {:?}", path))?;
    }

    if report.is_green() {
        println!("✓ All scenarios passed");
        Ok(())
    } else {
        anyhow::bail!(
            "Regression failed: {} fail, {} inconclusive, {} execution error(s)",
            report.counts.fail,
            report.counts.inconclusive,
            report.counts.execution_error
        )
    }
}
