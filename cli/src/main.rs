mod config;
mod test_runner;

use std::fs;
use std::path::{Path, PathBuf};
use std::process;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use snippets::{Corpus, Selection, SynthMode, module_name, write_units};
use validator::{Credentials, Validator, validate_answer};

use crate::config::Config;
use crate::test_runner::Renderer;

/// Exit code for failures that stop the run before any validation.
const EXIT_CORPUS: i32 = 2;

#[derive(Parser)]
#[command(
    name = "docsnip",
    version,
    about = "Extract and validate Python snippets in Markdown documentation"
)]
struct Cli {
    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,

    /// Configuration file (default: docsnip.toml at the corpus root)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// More logging: -v for info, -vv for debug. RUST_LOG takes precedence.
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List documents and their fragments
    List(CorpusArgs),

    /// Write one generated module per document
    Extract(ExtractArgs),

    /// Parse and lint every entry point without running it
    Check(RunArgs),

    /// Parse, lint and run every entry point
    Test(RunArgs),

    /// Validate a candidate answer (.md) or Python file
    Validate(ValidateArgs),
}

#[derive(clap::Args)]
struct CorpusArgs {
    /// Documentation root
    #[arg(default_value = ".")]
    root: PathBuf,

    /// Only documents whose path or module name contains this
    #[arg(short, long)]
    document: Option<String>,

    /// Synthesis mode: page or isolated
    #[arg(long)]
    mode: Option<SynthMode>,
}

#[derive(clap::Args)]
struct ExtractArgs {
    #[command(flatten)]
    corpus: CorpusArgs,

    /// Output directory (default: [corpus] output_dir under the root)
    #[arg(short, long)]
    out: Option<PathBuf>,

    /// Keep generated modules whose document no longer yields one
    #[arg(long)]
    no_prune: bool,
}

#[derive(clap::Args)]
struct RunArgs {
    #[command(flatten)]
    corpus: CorpusArgs,

    /// Only the n-th runnable fragment (1-based) of each selected document
    #[arg(short, long)]
    block: Option<usize>,

    /// Validate entry points on this many threads
    #[arg(short, long, default_value_t = 1)]
    jobs: usize,

    /// Stop after linting
    #[arg(long)]
    no_exec: bool,

    /// Write a JSON report to this file
    #[arg(long)]
    report: Option<PathBuf>,
}

#[derive(clap::Args)]
struct ValidateArgs {
    /// Markdown answer or Python source
    file: PathBuf,

    /// Stop after linting
    #[arg(long)]
    no_exec: bool,
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let code = match run(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {:#}", e);
            EXIT_CORPUS
        }
    };
    process::exit(code);
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)))
        .with_writer(std::io::stderr)
        .init();
}

fn run(cli: Cli) -> Result<i32> {
    let explicit = cli.config.as_deref();
    match cli.command {
        Command::List(args) => do_list(explicit, &args, cli.no_color),
        Command::Extract(args) => do_extract(explicit, &args, cli.no_color),
        Command::Check(args) => do_run(explicit, &args, true, cli.no_color),
        Command::Test(args) => do_run(explicit, &args, args.no_exec, cli.no_color),
        Command::Validate(args) => do_validate(explicit, &args, cli.no_color),
    }
}

fn load_config(explicit: Option<&Path>, root: &Path, mode: Option<SynthMode>) -> Result<Config> {
    let mut config = Config::load(explicit, root)?;
    if let Some(mode) = mode {
        config.synth.mode = mode;
    }
    Ok(config)
}

fn scan(explicit: Option<&Path>, args: &CorpusArgs) -> Result<(Config, Corpus)> {
    let config = load_config(explicit, &args.root, args.mode)?;
    let options = config.scan_options()?;
    let corpus = Corpus::scan(&args.root, &config.corpus, &options)
        .with_context(|| format!("cannot scan {}", args.root.display()))?;
    Ok((config, corpus))
}

fn do_list(explicit: Option<&Path>, args: &CorpusArgs, no_color: bool) -> Result<i32> {
    let (_, corpus) = scan(explicit, args)?;
    let selection = Selection {
        document: args.document.clone(),
        block: None,
    };

    for doc in corpus.select(&selection) {
        println!("{} ({})", doc.path, module_name(&doc.path));
        for f in &doc.fragments {
            let label = match &f.group_tag {
                Some(tag) => format!("  [group {}{}]", tag.group + 1, tag.label.as_deref().map(|l| format!(": {}", l)).unwrap_or_default()),
                None => String::new(),
            };
            println!(
                "  {:>3}  line {:<5}  {}{}",
                f.ordinal + 1,
                f.first_code_line(),
                f.classification,
                label
            );
        }
    }

    let mut renderer = Renderer::for_corpus(&corpus, no_color);
    let mut rejected = 0;
    for r in corpus.rejected_in(&selection) {
        renderer.structural(r);
        rejected += 1;
    }
    Ok(if rejected == 0 { 0 } else { 1 })
}

fn do_extract(explicit: Option<&Path>, args: &ExtractArgs, no_color: bool) -> Result<i32> {
    let (config, corpus) = scan(explicit, &args.corpus)?;
    let selection = Selection {
        document: args.corpus.document.clone(),
        block: None,
    };
    let synthesizer = config.synthesizer()?;
    let units: Vec<_> = corpus
        .select(&selection)
        .filter_map(|doc| synthesizer.synthesize(doc))
        .collect();

    let out_dir = args
        .out
        .clone()
        .unwrap_or_else(|| args.corpus.root.join(&config.corpus.output_dir));
    // Pruning a partial selection would delete the other documents' modules.
    let prune = !args.no_prune && selection.is_everything();
    let summary = write_units(&out_dir, &units, prune)?;
    eprintln!(
        "{} modules in {} ({} written, {} unchanged, {} removed)",
        units.len(),
        out_dir.display(),
        summary.written,
        summary.unchanged,
        summary.removed
    );

    let mut renderer = Renderer::for_corpus(&corpus, no_color);
    let mut rejected = 0;
    for r in corpus.rejected_in(&selection) {
        renderer.structural(r);
        rejected += 1;
    }
    Ok(if rejected == 0 { 0 } else { 1 })
}

fn do_run(explicit: Option<&Path>, args: &RunArgs, lint_only: bool, no_color: bool) -> Result<i32> {
    let (config, corpus) = scan(explicit, &args.corpus)?;
    let mut execute = config.execute.clone();
    if lint_only {
        execute.enabled = false;
    }
    let credentials = Credentials::from_env(&config.environment);
    let validator = Validator::new(config.synthesizer()?, execute, credentials)?;

    let selection = Selection {
        document: args.corpus.document.clone(),
        block: args.block,
    };
    let report = validator.validate_corpus(&corpus, &selection, args.jobs.max(1));
    if let Some(path) = &args.report {
        report.write_json(path)?;
    }
    Ok(test_runner::print_report(&report, &corpus, no_color))
}

fn do_validate(explicit: Option<&Path>, args: &ValidateArgs, no_color: bool) -> Result<i32> {
    let text = fs::read_to_string(&args.file)
        .with_context(|| format!("cannot read '{}'", args.file.display()))?;
    let root = args.file.parent().unwrap_or(Path::new("."));
    let config = load_config(explicit, root, None)?;
    let mut execute = config.execute.clone();
    if args.no_exec {
        execute.enabled = false;
    }
    let credentials = Credentials::from_env(&config.environment);
    let validator = Validator::new(config.synthesizer()?, execute, credentials)?;

    let name = args.file.display().to_string();
    let is_markdown = args
        .file
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| matches!(ext, "md" | "mdx" | "markdown"));
    let results = if is_markdown {
        validate_answer(&validator, &name, &text, &config.corpus.languages)
    } else {
        validator.validate_text(&name, &text).into_iter().collect()
    };
    Ok(test_runner::print_candidate(&results, &text, no_color))
}
