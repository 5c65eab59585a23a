//! CLI entry point for `spamprep`.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use clap::{CommandFactory, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};

use spamprep::anonymize::{AnonymizationStore, SensitiveClass};
use spamprep::config::{self, Config};
use spamprep::export::mapping::{self, MappingFormat};
use spamprep::model::message::StructuredMessage;
use spamprep::parser::patterns::PatternCatalog;
use spamprep::pipeline::{self, Mode, PipelineOptions, RunSummary};

#[derive(Parser)]
#[command(
    name = "spamprep",
    version,
    about = "Normalize and anonymize raw email before spam clustering"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (default: $SPAMPREP_CONFIG or the user config dir)
    #[arg(short, long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Verbose logging (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(clap::Args)]
struct RunArgs {
    /// An .eml file or a directory of .eml files
    input: PathBuf,

    /// Directory for the processed messages
    #[arg(short, long)]
    output: PathBuf,

    /// Worker threads (0 = one per CPU)
    #[arg(short = 'j', long)]
    threads: Option<usize>,

    /// Charset assumed for parts that declare none
    #[arg(long, value_name = "CHARSET")]
    default_charset: Option<String>,

    /// Print the run summary as JSON
    #[arg(long)]
    json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Replace personal data with consistent placeholder tokens
    Anonymize {
        #[command(flatten)]
        run: RunArgs,

        /// Classes to anonymize (email, name, url, phone); repeatable
        #[arg(long = "class", value_name = "CLASS")]
        classes: Vec<SensitiveClass>,

        /// Anonymize every address at this domain; repeatable
        #[arg(long = "domain", value_name = "DOMAIN")]
        domains: Vec<String>,

        /// Anonymize this exact string wherever it occurs; repeatable
        #[arg(long = "literal", value_name = "TEXT")]
        literals: Vec<String>,

        /// Blocklist file: one domain or literal per line
        #[arg(long, value_name = "FILE")]
        blocklist: Option<PathBuf>,

        /// Anonymize every email address, not only recipients
        #[arg(long)]
        all_addresses: bool,

        /// Write the original → token log to this file
        #[arg(long, value_name = "FILE")]
        mapping: Option<PathBuf>,

        /// Mapping format (json, csv); guessed from the extension by default
        #[arg(long, value_name = "FORMAT")]
        mapping_format: Option<MappingFormat>,
    },
    /// Decode every text part and re-encode it as UTF-8
    Normalize {
        #[command(flatten)]
        run: RunArgs,
    },
    /// Show how a message is split into payload units
    Inspect {
        file: PathBuf,

        /// Print the decoded text of every unit
        #[arg(long)]
        text: bool,

        #[arg(long)]
        json: bool,
    },
    /// Generate shell completions
    Completions {
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
    /// Generate a man page
    Manpage,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => config::load_config_from(path)?,
        None => config::load_config(),
    };

    // Configure logging: stderr + optional log file
    let log_level = match cli.verbose {
        0 => config.general.log_level.as_str(),
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    setup_logging(log_level, &config);

    match cli.command {
        Commands::Anonymize {
            run,
            classes,
            domains,
            literals,
            blocklist,
            all_addresses,
            mapping,
            mapping_format,
        } => {
            let mut config = config;
            let anonymize = &mut config.anonymize;
            if !classes.is_empty() {
                anonymize.classes = classes;
            }
            anonymize.domains.extend(domains);
            anonymize.literals.extend(literals);
            if blocklist.is_some() {
                anonymize.blocklist_file = blocklist;
            }
            anonymize.match_all_addresses |= all_addresses;
            cmd_run(Mode::Anonymize, &run, config, mapping.as_deref(), mapping_format)
        }
        Commands::Normalize { run } => cmd_run(Mode::Normalize, &run, config, None, None),
        Commands::Inspect { file, text, json } => cmd_inspect(&file, text, json, &config),
        Commands::Completions { shell } => cmd_completions(shell),
        Commands::Manpage => cmd_manpage(),
    }
}

/// Set up tracing with stderr output and optional file logging.
fn setup_logging(level: &str, config: &Config) {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let stderr_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    let log_path = config::log_file_path(config);
    let log_dir = config::cache_dir(config);
    let file_name = log_path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "spamprep.log".into());

    if std::fs::create_dir_all(&log_dir).is_ok() {
        let file_appender = tracing_appender::rolling::never(&log_dir, file_name);
        let file_layer = tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_writer(file_appender);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(stderr_layer)
            .with(file_layer)
            .init();
    } else {
        // Fall back to stderr only
        tracing_subscriber::registry()
            .with(env_filter)
            .with(stderr_layer)
            .init();
    }
}

/// Generate shell completions and print to stdout.
fn cmd_completions(shell: clap_complete::Shell) -> anyhow::Result<()> {
    let mut cmd = Cli::command();
    clap_complete::generate(shell, &mut cmd, "spamprep", &mut std::io::stdout());
    Ok(())
}

/// Generate a man page and print to stdout.
fn cmd_manpage() -> anyhow::Result<()> {
    let cmd = Cli::command();
    let man = clap_mangen::Man::new(cmd);
    let mut buf = Vec::new();
    man.render(&mut buf)?;
    std::io::Write::write_all(&mut std::io::stdout(), &buf)?;
    Ok(())
}

/// Anonymize or normalize a file or directory.
fn cmd_run(
    mode: Mode,
    args: &RunArgs,
    mut config: Config,
    mapping_path: Option<&Path>,
    mapping_format: Option<MappingFormat>,
) -> anyhow::Result<()> {
    if let Some(threads) = args.threads {
        config.performance.threads = threads;
    }
    if let Some(charset) = &args.default_charset {
        config.normalize.default_charset = Some(charset.clone());
    }

    let inputs = pipeline::collect_inputs(&args.input)?;
    if inputs.is_empty() {
        anyhow::bail!("No .eml files found in {}", args.input.display());
    }

    let options = PipelineOptions::from_config(&config, mode, args.output.clone())?;
    let store = Arc::new(AnonymizationStore::new());
    let runner = pipeline::Pipeline::new(options, Arc::clone(&store));

    let pb = ProgressBar::new(inputs.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} Processing [{bar:40.cyan/blue}] {pos}/{len} ({eta})")?
            .progress_chars("#>-"),
    );

    let start = Instant::now();
    let summary = runner.run(
        &inputs,
        Some(&|done, total| {
            pb.set_length(total as u64);
            pb.set_position(done as u64);
        }),
    )?;
    pb.finish_and_clear();
    let elapsed = start.elapsed();

    if let Some(path) = mapping_path {
        let format = mapping_format.unwrap_or_else(|| MappingFormat::from_path(path));
        mapping::export_mapping(&store, path, format)?;
    }

    if args.json {
        let output = serde_json::json!({
            "mode": mode,
            "output_dir": args.output.to_string_lossy(),
            "elapsed_ms": elapsed.as_millis(),
            "summary": summary,
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        print_summary_table(mode, &args.output, &summary, elapsed);
    }

    Ok(())
}

/// Print a run summary in a human-readable table.
fn print_summary_table(mode: Mode, output: &Path, summary: &RunSummary, elapsed: std::time::Duration) {
    use humansize::{format_size, BINARY};

    println!();
    println!("  {:<25} {:?}", "Mode", mode);
    println!("  {:<25} {}", "Messages processed", summary.messages_processed);
    if summary.messages_failed > 0 {
        println!("  {:<25} {}", "Messages failed", summary.messages_failed);
    }
    if summary.messages_skipped > 0 {
        println!("  {:<25} {}", "Messages skipped", summary.messages_skipped);
    }
    println!(
        "  {:<25} {} decoded, {} failed, {} binary",
        "Payload units", summary.units_decoded, summary.units_failed, summary.units_skipped
    );
    if mode == Mode::Anonymize {
        println!("  {:<25} {}", "Substitutions", summary.substitutions);
        for (class, count) in &summary.anonymize.by_class {
            println!("    {count:>8}  {class}");
        }
        println!("  {:<25} {}", "Tokens issued", summary.tokens_issued);
    }
    println!(
        "  {:<25} {}",
        "Output size",
        format_size(summary.bytes_written, BINARY)
    );
    println!("  {:<25} {}", "Output directory", output.display());
    println!("  {:<25} {:.2?}", "Elapsed", elapsed);
    println!();
}

/// Parse one message and describe its payload units.
fn cmd_inspect(path: &Path, show_text: bool, json: bool, config: &Config) -> anyhow::Result<()> {
    if !path.exists() {
        anyhow::bail!("File not found: {}", path.display());
    }

    let raw = std::fs::read(path)?;
    let mut catalog = PatternCatalog::default();
    if let Some(label) = &config.normalize.default_charset {
        catalog = catalog.with_default_charset(label.clone());
    }
    let mut message = StructuredMessage::parse_with(&raw, &catalog)?;
    let decode = message.decode_all();
    let reports = message.unit_reports();

    if json {
        let texts: Vec<Option<&str>> = message.units().iter().map(|u| u.text()).collect();
        let mut output = serde_json::json!({
            "file": path.to_string_lossy(),
            "size": raw.len(),
            "line_ending": message.line_ending(),
            "mbox_envelope": message.envelope().from_line_text(),
            "multipart": message.is_multipart(),
            "subject": message.subject(),
            "sender": message.sender().map(|s| s.address),
            "recipients": message.recipients().iter().map(|r| r.address.clone()).collect::<Vec<_>>(),
            "headers": message.headers().mapping(),
            "decode": decode,
            "units": reports,
        });
        if show_text {
            output["texts"] = serde_json::json!(texts);
        }
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    use humansize::{format_size, BINARY};

    println!();
    println!("  {:<14} {}", "File", path.display());
    println!("  {:<14} {}", "Size", format_size(raw.len(), BINARY));
    if let Some(subject) = message.subject() {
        println!("  {:<14} {}", "Subject", subject);
    }
    if let Some(sender) = message.sender() {
        println!("  {:<14} {}", "From", sender);
    }
    println!("  {:<14} {}", "Multipart", message.is_multipart());
    println!();
    println!(
        "  {:<3} {:<26} {:<18} {:<14} {:<10} {:>9}",
        "#", "Media type", "Encoding", "Charset", "State", "Size"
    );
    println!("  {}", "-".repeat(85));

    for report in &reports {
        let media: String = report
            .media_type
            .as_deref()
            .unwrap_or("(none)")
            .chars()
            .take(25)
            .collect();
        println!(
            "  {:<3} {:<26} {:<18} {:<14} {:<10} {:>9}",
            report.index,
            media,
            report.transfer_encoding.to_string(),
            report.charset,
            report.state.to_string(),
            format_size(report.size, BINARY)
        );
        for diagnostic in &report.diagnostics {
            println!("      ! {diagnostic}");
        }
    }
    println!();

    if show_text {
        for (index, unit) in message.units().iter().enumerate() {
            if let Some(text) = unit.text() {
                println!("  ── unit {index} ──");
                println!("{text}");
            }
        }
    }

    Ok(())
}
