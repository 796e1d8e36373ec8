use std::path::PathBuf;

use anyhow::{Context, Result};
use babymaker_contracts::events::EventWriter;
use babymaker_contracts::options::{
    AgeRange, BackgroundStyle, Expression, FamilyPose, LabeledOption, StyleName,
};
use babymaker_contracts::policy::ParameterPolicy;
use babymaker_contracts::request::{GenerationRequest, ImageSource};
use babymaker_contracts::settings::SettingsInput;
use babymaker_engine::storage::{cleanup_older_than, StorageBucket};
use babymaker_engine::{
    client_from_config, new_session_id, sink_from_config, EngineConfig, Orchestrator,
    ReplicateClient,
};
use chrono::{Duration, Utc};
use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(
    name = "babymaker",
    version,
    about = "Generate a baby and a family portrait from parent photos with PhotoMaker"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run one baby + family session.
    Generate(GenerateArgs),
    /// List the accepted option labels and numeric ranges.
    Options,
    /// Check the Replicate token and reach the configured storage.
    Check,
    /// Inspect or prune stored images.
    #[command(subcommand)]
    Storage(StorageCommand),
}

#[derive(Debug, Subcommand)]
enum StorageCommand {
    /// List the objects in one bucket.
    List {
        #[arg(long, default_value = "temp-uploads")]
        bucket: String,
        /// Storage root for local output; overrides LOCAL_STORAGE_PATH.
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Delete objects older than the given age.
    Cleanup {
        #[arg(long, default_value = "temp-uploads")]
        bucket: String,
        #[arg(long = "older-than-hours", default_value_t = 24)]
        older_than_hours: i64,
        #[arg(long)]
        out: Option<PathBuf>,
    },
}

#[derive(Debug, Args)]
struct GenerateArgs {
    /// Parent photo: a local file or an http(s) URL. Give 2 to 4.
    #[arg(long = "parent", required = true)]
    parents: Vec<String>,
    #[arg(long)]
    style: Option<String>,
    #[arg(long = "age")]
    age_range: Option<String>,
    #[arg(long)]
    expression: Option<String>,
    #[arg(long)]
    pose: Option<String>,
    #[arg(long)]
    background: Option<String>,
    /// 15-50; lower keeps more of the parents' features.
    #[arg(long)]
    identity_strength: Option<i64>,
    /// 20-100.
    #[arg(long)]
    steps: Option<i64>,
    /// 1.0-10.0.
    #[arg(long = "guidance")]
    guidance_scale: Option<f64>,
    /// Fixed seed; -1 or omitted picks one at random.
    #[arg(long, allow_hyphen_values = true)]
    seed: Option<i64>,
    /// Baby variations, 1-4.
    #[arg(long = "variations")]
    num_outputs: Option<i64>,
    #[arg(long)]
    no_safety_checker: bool,
    /// Extra text appended to the baby prompt.
    #[arg(long)]
    baby_prompt: Option<String>,
    /// Extra text appended to the family prompt.
    #[arg(long)]
    family_prompt: Option<String>,
    /// Storage root for local output; overrides LOCAL_STORAGE_PATH.
    #[arg(long)]
    out: Option<PathBuf>,
    /// Event log path; defaults to `{out}/events.jsonl`.
    #[arg(long)]
    events: Option<PathBuf>,
    /// Skip Replicate and render placeholder images.
    #[arg(long)]
    dry_run: bool,
    /// Print the session outcome as JSON.
    #[arg(long)]
    json: bool,
}

impl GenerateArgs {
    fn settings_input(&self) -> SettingsInput {
        SettingsInput {
            style: self.style.clone(),
            age_range: self.age_range.clone(),
            expression: self.expression.clone(),
            pose: self.pose.clone(),
            background: self.background.clone(),
            identity_strength: self.identity_strength,
            steps: self.steps,
            guidance_scale: self.guidance_scale,
            seed: self.seed,
            num_outputs: self.num_outputs,
            safety_checker: Some(!self.no_safety_checker),
            baby_prompt_extra: self.baby_prompt.clone(),
            family_prompt_extra: self.family_prompt.clone(),
        }
    }
}

fn main() {
    dotenvy::dotenv().ok();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("babymaker error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Generate(args) => run_generate(args),
        Command::Options => {
            for line in options_listing() {
                println!("{line}");
            }
            Ok(0)
        }
        Command::Check => run_check(),
        Command::Storage(command) => run_storage(command),
    }
}

fn run_generate(args: GenerateArgs) -> Result<i32> {
    let mut config = EngineConfig::from_env();
    if let Some(out) = &args.out {
        config = config.with_storage_root(out);
    }

    let mut parents = Vec::new();
    for raw in &args.parents {
        parents.push(
            ImageSource::from_arg(raw).with_context(|| format!("invalid --parent {raw}"))?,
        );
    }
    let request = match GenerationRequest::from_input(parents, &args.settings_input()) {
        Ok(request) => request,
        Err(err) => {
            eprintln!("{}", err.user_message());
            return Ok(1);
        }
    };

    let client = match client_from_config(&config, args.dry_run) {
        Ok(client) => client,
        Err(err) => {
            eprintln!("{}", err.user_message());
            return Ok(1);
        }
    };
    let sink = match sink_from_config(&config) {
        Ok(sink) => sink,
        Err(err) => {
            eprintln!("{}", err.user_message());
            return Ok(1);
        }
    };

    let events_path = args
        .events
        .clone()
        .unwrap_or_else(|| config.storage_root.join("events.jsonl"));
    let events = EventWriter::new(&events_path, new_session_id());
    let orchestrator = Orchestrator::new(client, sink, events);

    if !args.json {
        println!(
            "Generating with {} ({} parent images, storage: {})...",
            orchestrator.client_name(),
            request.parent_images().len(),
            orchestrator.sink_name()
        );
    }
    let outcome = orchestrator.run(&request);

    if args.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&outcome).context("failed to encode outcome")?
        );
    } else {
        for line in outcome.summary_lines() {
            println!("{line}");
        }
        println!("events: {}", events_path.display());
    }
    Ok(outcome.exit_code())
}

fn run_check() -> Result<i32> {
    let config = EngineConfig::from_env();
    println!("api base: {}", config.api_base);
    println!("model: {}", config.model_version);
    let mut healthy = true;

    match sink_from_config(&config).and_then(|sink| sink.check()) {
        Ok(summary) => println!("storage: {summary}"),
        Err(err) => {
            healthy = false;
            println!("storage: {}", err.user_message());
        }
    }

    match ReplicateClient::from_config(&config).and_then(|client| client.check_connection()) {
        Ok(account) => println!("replicate: connected as {account}"),
        Err(err) => {
            healthy = false;
            println!("replicate: {}", err.user_message());
        }
    }
    Ok(if healthy { 0 } else { 1 })
}

fn run_storage(command: StorageCommand) -> Result<i32> {
    let (bucket, out) = match &command {
        StorageCommand::List { bucket, out } | StorageCommand::Cleanup { bucket, out, .. } => {
            (bucket, out)
        }
    };
    let mut config = EngineConfig::from_env();
    if let Some(out) = out {
        config = config.with_storage_root(out);
    }
    let outcome = StorageBucket::parse(bucket).and_then(|bucket| {
        let sink = sink_from_config(&config)?;
        match &command {
            StorageCommand::List { .. } => Ok(sink
                .list(bucket)?
                .into_iter()
                .map(|object| {
                    format!(
                        "{}  {:>10}  {}",
                        object.last_modified.format("%Y-%m-%d %H:%M:%S"),
                        object.size,
                        object.name
                    )
                })
                .collect::<Vec<_>>()),
            StorageCommand::Cleanup {
                older_than_hours, ..
            } => {
                let max_age = Duration::hours((*older_than_hours).max(0));
                let deleted = cleanup_older_than(sink.as_ref(), bucket, max_age, Utc::now())?;
                let mut lines: Vec<String> =
                    deleted.iter().map(|name| format!("deleted {name}")).collect();
                lines.push(format!(
                    "{} object(s) removed from {}",
                    deleted.len(),
                    bucket.name()
                ));
                Ok(lines)
            }
        }
    });
    match outcome {
        Ok(lines) => {
            for line in lines {
                println!("{line}");
            }
            Ok(0)
        }
        Err(err) => {
            eprintln!("{}", err.user_message());
            Ok(1)
        }
    }
}

fn options_listing() -> Vec<String> {
    fn section<T: LabeledOption>(lines: &mut Vec<String>, default: T) {
        lines.push(format!("{}:", T::FIELD));
        for option in T::all() {
            let marker = if *option == default { " (default)" } else { "" };
            lines.push(format!("  {:<14} {}{marker}", option.key(), option.label()));
        }
    }

    let mut lines = Vec::new();
    section(&mut lines, StyleName::default());
    section(&mut lines, AgeRange::default());
    section(&mut lines, Expression::default());
    section(&mut lines, FamilyPose::default());
    section(&mut lines, BackgroundStyle::default());
    lines.push("ranges:".to_string());
    for bounds in ParameterPolicy::default().bounds() {
        let default = bounds
            .default
            .map(|value| value.to_string())
            .unwrap_or_else(|| "random".to_string());
        lines.push(format!(
            "  {:<18} {}..={} (default {default}): {}",
            bounds.name, bounds.min, bounds.max, bounds.help
        ));
    }
    lines
}
