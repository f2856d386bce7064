use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use edugen_contracts::categories::Orientation;
use edugen_contracts::events::{percentage, EventWriter};
use edugen_contracts::history::{HistoryRecord, SlotState};
use edugen_contracts::models::ModelTier;
use edugen_contracts::runs::session::{SavedImage, SessionMetadata};
use edugen_engine::{
    GenerationObserver, GenerationRequest, Generator, GeneratorConfig, HistoryTarget,
    PromptOptions, RefineRequest,
};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "edugen", version, about = "Educational image generator")]
struct Cli {
    /// Directory holding default_config.yaml and image_categories.yaml.
    #[arg(long, global = true, default_value = "config")]
    config_dir: PathBuf,
    /// Project root for reference images and relative output paths.
    #[arg(long, global = true, default_value = ".")]
    base_dir: PathBuf,
    /// Append run events to this JSONL file.
    #[arg(long, global = true)]
    events: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List configured categories.
    Categories,
    Generate(GenerateArgs),
    Refine(RefineArgs),
    #[command(subcommand)]
    History(HistoryCommand),
    /// Print stored session metadata.
    Session { session_id: String },
}

#[derive(Debug, Parser)]
struct GenerateArgs {
    #[arg(long)]
    category: String,
    #[arg(long)]
    input: String,
    #[arg(long)]
    count: Option<usize>,
    /// Model tier per slot; repeat to mix flash and pro.
    #[arg(long = "model")]
    models: Vec<ModelTier>,
    #[arg(long)]
    style: Option<String>,
    #[arg(long)]
    year_level: Option<String>,
    #[arg(long)]
    age: Option<String>,
    #[arg(long)]
    orientation: Option<Orientation>,
    /// User reference image: URL, data URL, path or base64. Repeatable.
    #[arg(long = "reference")]
    references: Vec<String>,
    #[arg(long)]
    no_system_references: bool,
    #[arg(long)]
    api_key: Option<String>,
    #[arg(long)]
    dry_run: bool,
    /// Print the result as JSON.
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Parser)]
struct RefineArgs {
    #[arg(long)]
    category: String,
    #[arg(long)]
    instructions: String,
    /// Image to refine. Defaults to the current image of --record/--slot.
    #[arg(long)]
    base: Option<String>,
    #[arg(long, requires = "slot")]
    record: Option<String>,
    /// 1-based slot within --record.
    #[arg(long, requires = "record")]
    slot: Option<usize>,
    #[arg(long)]
    model: Option<String>,
    #[arg(long)]
    api_key: Option<String>,
    #[arg(long)]
    dry_run: bool,
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Subcommand)]
enum HistoryCommand {
    /// Newest first.
    List,
    Show { record_id: String },
    Remove { record_id: String },
    Clear,
}

/// Progress on stderr, results on stdout.
struct ConsoleObserver;

impl GenerationObserver for ConsoleObserver {
    fn on_progress(&self, _session_id: &str, current: u64, total: u64, status: &str) {
        eprintln!("[{:>3}%] {status}", percentage(current, total));
    }

    fn on_image(&self, _session_id: &str, index: usize, image: &SavedImage) {
        if let Some(path) = &image.filepath {
            eprintln!("image {index} ready: {path}");
        }
    }
}

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("edugen error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    let config = GeneratorConfig::load(&cli.config_dir, &cli.base_dir)?;
    init_tracing(&config.app.logging.level);

    match cli.command {
        Command::Categories => {
            let generator = build_generator(config, cli.events.as_deref(), false)?;
            print_categories(&generator);
            Ok(0)
        }
        Command::Generate(args) => {
            let generator = build_generator(config, cli.events.as_deref(), args.dry_run)?;
            run_generate(&generator, args)
        }
        Command::Refine(args) => {
            let generator = build_generator(config, cli.events.as_deref(), args.dry_run)?;
            run_refine(&generator, args)
        }
        Command::History(command) => {
            let generator = build_generator(config, cli.events.as_deref(), false)?;
            run_history(&generator, command)
        }
        Command::Session { session_id } => {
            let generator = build_generator(config, cli.events.as_deref(), false)?;
            let session = generator.session(&session_id)?;
            println!("{}", serde_json::to_string_pretty(&session)?);
            Ok(0)
        }
    }
}

/// `RUST_LOG` wins over `logging.level`.
fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    if let Err(err) = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
    {
        eprintln!("edugen warning: logging disabled: {err}");
    }
}

fn build_generator(
    config: GeneratorConfig,
    events: Option<&Path>,
    dry_run: bool,
) -> Result<Generator> {
    let mut generator = Generator::new(config)?;
    if dry_run {
        generator = generator.with_dry_run(true);
    }
    if let Some(path) = events {
        generator = generator.with_events(EventWriter::new(path, "edugen"));
    }
    tracing::debug!(output_dir = %generator.output_dir().display(), "generator ready");
    Ok(generator)
}

fn print_categories(generator: &Generator) {
    for (id, spec) in generator.categories().list() {
        let styles: Vec<&str> = spec.styles.iter().map(|style| style.id.as_str()).collect();
        println!(
            "{id:<22} {:<22} {}x{} ({})",
            spec.name, spec.width, spec.height, spec.aspect_ratio
        );
        if !spec.description.is_empty() {
            println!("    {}", spec.description);
        }
        if !styles.is_empty() {
            println!("    styles: {}", styles.join(", "));
        }
    }
}

fn run_generate(generator: &Generator, args: GenerateArgs) -> Result<i32> {
    let request = GenerationRequest {
        category: args.category,
        user_input: args.input,
        count: args.count,
        models: args.models,
        prompt: PromptOptions {
            year_level: args.year_level,
            age: args.age,
            style: args.style,
            orientation: args.orientation,
        },
        user_references: args.references,
        use_system_references: !args.no_system_references,
        api_key: args.api_key,
    };
    let result = generator.generate(&request, &ConsoleObserver)?;
    print_result(&result, args.json)
}

fn run_refine(generator: &Generator, args: RefineArgs) -> Result<i32> {
    let target = match (args.record, args.slot) {
        (Some(record_id), Some(slot)) => Some(history_target(record_id, slot)?),
        _ => None,
    };
    let request = RefineRequest {
        category: args.category,
        base_image: args.base,
        instructions: args.instructions,
        target,
        model: args.model,
        api_key: args.api_key,
    };
    let result = generator.refine(&request, &ConsoleObserver)?;
    print_result(&result, args.json)
}

fn history_target(record_id: String, slot: usize) -> Result<HistoryTarget> {
    if slot == 0 {
        bail!("--slot is 1-based");
    }
    Ok(HistoryTarget {
        record_id,
        index: slot - 1,
    })
}

fn print_result(result: &SessionMetadata, json: bool) -> Result<i32> {
    if json {
        println!("{}", serde_json::to_string_pretty(result)?);
    } else {
        if let Some(error) = &result.error {
            println!("failed: {error}");
        }
        println!(
            "session {}: {}/{} images",
            result.session_id, result.total_generated, result.total_requested
        );
        if let Some(history_id) = &result.history_id {
            println!("history record {history_id}");
        }
        for image in &result.images {
            match (&image.filepath, &image.error) {
                (Some(path), _) => println!("  {}. {path}", image.index),
                (None, Some(error)) => println!("  {}. failed: {error}", image.index),
                (None, None) => println!("  {}. failed", image.index),
            }
        }
        if let Some(validation) = &result.validation {
            println!(
                "validation: {}/{} passed ({})",
                validation.passed, validation.total, validation.success_rate
            );
        }
        for warning in &result.warnings {
            println!("warning: {warning}");
        }
    }
    Ok(if result.success { 0 } else { 2 })
}

fn run_history(generator: &Generator, command: HistoryCommand) -> Result<i32> {
    let mut history = generator.history();
    match command {
        HistoryCommand::List => {
            let records = history.list();
            if records.is_empty() {
                println!("history is empty");
            }
            for record in records {
                println!("{}", history_line(record));
            }
        }
        HistoryCommand::Show { record_id } => {
            let record = history
                .get(&record_id)
                .with_context(|| format!("history record not found: {record_id}"))?;
            println!("{}", serde_json::to_string_pretty(record)?);
        }
        HistoryCommand::Remove { record_id } => {
            if !history.remove(&record_id)? {
                bail!("history record not found: {record_id}");
            }
            println!("removed {record_id}");
        }
        HistoryCommand::Clear => {
            history.clear()?;
            println!("history cleared");
        }
    }
    Ok(0)
}

fn history_line(record: &HistoryRecord) -> String {
    let slots: String = record
        .slots
        .iter()
        .map(|slot| match slot.state {
            SlotState::Pending => '.',
            SlotState::Ready { .. } if !slot.revisions.is_empty() => 'R',
            SlotState::Ready { .. } => '#',
            SlotState::Failed { .. } => 'x',
        })
        .collect();
    format!(
        "{}  {}  {:<20} [{slots}] {:?}  {}",
        record.id,
        record.created_at,
        record.category,
        record.status(),
        record.user_input
    )
}

#[cfg(test)]
mod tests {
    use edugen_contracts::history::Revision;

    use super::*;

    #[test]
    fn generate_args_parse_repeated_models_and_references() {
        let cli = Cli::try_parse_from([
            "edugen",
            "--base-dir",
            "/tmp/project",
            "generate",
            "--category",
            "tutero_ai",
            "--input",
            "Basketball",
            "--model",
            "flash",
            "--model",
            "pro",
            "--reference",
            "https://example.com/a.png",
            "--orientation",
            "landscape",
            "--no-system-references",
        ])
        .expect("generate args parse");
        assert_eq!(cli.base_dir, PathBuf::from("/tmp/project"));
        let Command::Generate(args) = cli.command else {
            panic!("expected generate");
        };
        assert_eq!(args.models, vec![ModelTier::Flash, ModelTier::Pro]);
        assert_eq!(args.references, vec!["https://example.com/a.png"]);
        assert_eq!(args.orientation, Some(Orientation::Landscape));
        assert!(args.no_system_references);
        assert_eq!(args.count, None);
    }

    #[test]
    fn unknown_model_tier_is_rejected() {
        let parsed = Cli::try_parse_from([
            "edugen",
            "generate",
            "--category",
            "tutero_ai",
            "--input",
            "x",
            "--model",
            "ultra",
        ]);
        assert!(parsed.is_err());
    }

    #[test]
    fn refine_record_requires_slot() {
        let parsed = Cli::try_parse_from([
            "edugen",
            "refine",
            "--category",
            "tutero_ai",
            "--instructions",
            "brighter",
            "--record",
            "abc",
        ]);
        assert!(parsed.is_err());
    }

    #[test]
    fn slots_are_one_based_on_the_command_line() {
        let target = history_target("abc".to_string(), 2).expect("valid slot");
        assert_eq!(target.index, 1);
        assert!(history_target("abc".to_string(), 0).is_err());
    }

    #[test]
    fn history_line_marks_slot_states() {
        let models = vec!["a".to_string(), "b".to_string(), "c".to_string(), "d".to_string()];
        let mut record = HistoryRecord::pending("s", "tutero_ai", "Chess", None, "p", &models);
        record.slots[1].state = SlotState::Ready {
            filename: "b.png".to_string(),
            path: "/out/b.png".to_string(),
            size_bytes: 1,
        };
        record.slots[2].state = SlotState::Ready {
            filename: "c.png".to_string(),
            path: "/out/c.png".to_string(),
            size_bytes: 1,
        };
        record.slots[2].revisions.push(Revision {
            instructions: "blue".to_string(),
            filename: "r.png".to_string(),
            path: "/out/r.png".to_string(),
            size_bytes: 1,
            created_at: "2026-01-01T00:00:00Z".to_string(),
        });
        record.slots[3].state = SlotState::Failed {
            error: "boom".to_string(),
        };
        let line = history_line(&record);
        assert!(line.contains("[.#Rx]"));
        assert!(line.contains("Partial"));
        assert!(line.ends_with("Chess"));
    }
}
