//! `evalflow` command line
//!
//! Inspects and edits JSON workspace snapshots.

use anyhow::{bail, Context, Result};
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use evalflow_core::{EvaluationId, PageId};
use evalflow_engine::{
    init_tracing, MemoryDirectory, MemoryStore, ProposalPosition, ProposalWorkflow,
    StepPermissionService, WorkflowConfig, WorkflowStore, WorkspaceState,
};
use evalflow_pages::verify_inheritance;
use std::path::PathBuf;
use std::sync::Arc;

type CliWorkflow = ProposalWorkflow<MemoryStore, StepPermissionService<MemoryStore, MemoryDirectory>>;

fn snapshot_arg() -> Arg {
    Arg::new("snapshot")
        .required(true)
        .value_parser(value_parser!(PathBuf))
        .help("Workspace snapshot (JSON)")
}

fn cli() -> Command {
    Command::new("evalflow")
        .version(evalflow_engine::VERSION)
        .about("Proposal evaluation workflow tools")
        .subcommand_required(true)
        .arg(
            Arg::new("config")
                .long("config")
                .short('c')
                .global(true)
                .value_parser(value_parser!(PathBuf))
                .help("Engine configuration (TOML)"),
        )
        .arg(
            Arg::new("json")
                .long("json")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Output as JSON"),
        )
        .subcommand(
            Command::new("status")
                .about("Show where each proposal's pointer rests")
                .arg(snapshot_arg()),
        )
        .subcommand(
            Command::new("aggregate")
                .about("Aggregate a rubric step and apply the configured policy")
                .arg(snapshot_arg())
                .arg(
                    Arg::new("evaluation")
                        .long("evaluation")
                        .required(true)
                        .help("Rubric evaluation id"),
                ),
        )
        .subcommand(
            Command::new("verify")
                .about("Check the page permission inheritance invariant")
                .arg(snapshot_arg()),
        )
        .subcommand(
            Command::new("reposition")
                .about("Move a page and rewire inherited permissions")
                .arg(snapshot_arg())
                .arg(Arg::new("page").long("page").required(true).help("Page to move"))
                .arg(
                    Arg::new("parent")
                        .long("parent")
                        .help("New parent page; omit to move to the root"),
                )
                .arg(
                    Arg::new("output")
                        .long("output")
                        .short('o')
                        .value_parser(value_parser!(PathBuf))
                        .help("Write the updated snapshot here"),
                ),
        )
}

fn load_config(matches: &ArgMatches) -> Result<WorkflowConfig> {
    match matches.get_one::<PathBuf>("config") {
        Some(path) => WorkflowConfig::from_toml_file(path)
            .with_context(|| format!("loading config {}", path.display())),
        None => Ok(WorkflowConfig::default().with_env_overrides()),
    }
}

fn load_state(args: &ArgMatches) -> Result<WorkspaceState> {
    let path = args
        .get_one::<PathBuf>("snapshot")
        .context("snapshot path is required")?;
    WorkspaceState::from_json_file(path).with_context(|| format!("loading snapshot {}", path.display()))
}

fn workflow(state: WorkspaceState, config: WorkflowConfig) -> CliWorkflow {
    let store = Arc::new(MemoryStore::with_state(state));
    let permissions = Arc::new(StepPermissionService::new(
        Arc::clone(&store),
        Arc::new(MemoryDirectory::new()),
    ));
    ProposalWorkflow::new(store, permissions, config)
}

fn parse_id<T>(args: &ArgMatches, name: &str) -> Result<Option<T>>
where
    T: std::str::FromStr<Err = uuid::Error>,
{
    args.get_one::<String>(name)
        .map(|raw| raw.parse::<T>().with_context(|| format!("invalid --{name} '{raw}'")))
        .transpose()
}

async fn status(args: &ArgMatches, config: WorkflowConfig, json: bool) -> Result<()> {
    let state = load_state(args)?;
    let mut ids: Vec<_> = state.proposals.keys().copied().collect();
    ids.sort();
    let wf = workflow(state, config);

    let mut rows = Vec::with_capacity(ids.len());
    for id in ids {
        rows.push((id, wf.position(id).await?));
    }

    if json {
        let out: Vec<_> = rows
            .iter()
            .map(|(id, position)| serde_json::json!({ "proposal": id, "position": position }))
            .collect();
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    for (id, position) in rows {
        match position {
            ProposalPosition::Empty => println!("{id}  (no evaluations)"),
            ProposalPosition::Active(e) => {
                println!("{id}  step {} '{}' [{}] active", e.index, e.title, e.evaluation_type);
            }
            ProposalPosition::Resolved(e) => {
                println!("{id}  step {} '{}' [{}] resolved", e.index, e.title, e.evaluation_type);
            }
        }
    }
    Ok(())
}

async fn aggregate(args: &ArgMatches, config: WorkflowConfig, json: bool) -> Result<()> {
    let evaluation: EvaluationId = parse_id(args, "evaluation")?.context("--evaluation is required")?;
    let wf = workflow(load_state(args)?, config);
    let results = wf.aggregate_results(evaluation).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&results)?);
        return Ok(());
    }

    println!("Rubric {evaluation}");
    println!("  Policy: {}", results.policy);
    println!("  Answers: {}", results.aggregation.answer_count);
    match results.aggregation.overall_average {
        Some(avg) => println!("  Overall average: {avg:.2}"),
        None => println!("  Overall average: -"),
    }
    for (criterion, summary) in &results.aggregation.criteria {
        println!(
            "  {criterion}: avg {:.2} over {} (min {}, max {})",
            summary.average, summary.count, summary.min, summary.max
        );
    }
    println!("  Result: {:?}", results.overall_result);
    Ok(())
}

fn verify(args: &ArgMatches, json: bool) -> Result<bool> {
    let state = load_state(args)?;
    let violations = verify_inheritance(&state.pages).err().unwrap_or_default();

    if json {
        println!("{}", serde_json::to_string_pretty(&violations)?);
    } else if violations.is_empty() {
        println!("{} pages, inheritance invariant holds", state.pages.page_count());
    } else {
        for violation in &violations {
            println!("{violation}");
        }
    }
    Ok(violations.is_empty())
}

async fn reposition(args: &ArgMatches, config: WorkflowConfig, json: bool) -> Result<()> {
    let page: PageId = parse_id(args, "page")?.context("--page is required")?;
    let parent: Option<PageId> = parse_id(args, "parent")?;
    let wf = workflow(load_state(args)?, config);

    let report = wf.reposition_page(page, parent).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Moved {page} under {}", parent.map_or_else(|| "root".to_string(), |p| p.to_string()));
        println!("  Localized: {}", report.localized);
        println!("  Replaced: {}", report.replaced);
        println!("  Rewired: {}", report.rewired);
        println!("  Detached: {}", report.detached);
        println!("  Descendants: {}", report.descendants);
    }

    if let Some(output) = args.get_one::<PathBuf>("output") {
        let state = wf.store().snapshot().await?;
        std::fs::write(output, state.to_json()?)
            .with_context(|| format!("writing snapshot {}", output.display()))?;
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let matches = cli().get_matches();
    let config = load_config(&matches)?;
    init_tracing(&config);
    let json = matches.get_flag("json");

    match matches.subcommand() {
        Some(("status", args)) => status(args, config, json).await,
        Some(("aggregate", args)) => aggregate(args, config, json).await,
        Some(("verify", args)) => {
            if !verify(args, json)? {
                std::process::exit(1);
            }
            Ok(())
        }
        Some(("reposition", args)) => reposition(args, config, json).await,
        Some((other, _)) => bail!("unknown command '{other}'"),
        None => bail!("no command given"),
    }
}
