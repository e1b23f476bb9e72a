use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::io::{self, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

use freshen::update::{worker, CacheManager, Outcome, UpdateEvent, UpdatePipeline};
use freshen::{Config, InstallCheck};

mod progress;

use progress::Reporter;

#[derive(Parser, Debug)]
#[command(name = "freshen")]
#[command(version, about = "Keeps a locally installed application up to date", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Config file to use instead of the per-user default
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Log what the updater is doing to stderr
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Check whether a newer release is published
    Check,

    /// Download and install the newest release, keeping user data
    Update {
        /// Install without asking for confirmation
        #[arg(short, long)]
        yes: bool,
    },

    /// Show the configured installation and cached downloads
    Status,

    /// Manage the download cache
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

#[derive(Subcommand, Debug)]
enum CacheAction {
    /// Delete every cached download
    Clear,
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config_path = cli.config.clone().unwrap_or_else(Config::config_path);

    match cli.command {
        Command::Check => run_check_command(config_path, cli.verbose),
        Command::Update { yes } => run_update_command(config_path, yes, cli.verbose),
        Command::Status => run_status_command(config_path),
        Command::Cache {
            action: CacheAction::Clear,
        } => run_cache_clear_command(config_path),
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "freshen=debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

fn run_check_command(config_path: PathBuf, verbose: bool) -> Result<ExitCode> {
    let mut pipeline = UpdatePipeline::open(&config_path)?;
    let current = pipeline.config().current_version.clone();

    println!("{}", "Checking for updates...".cyan());
    let reporter = Reporter::new();
    let observer = {
        let reporter = reporter.clone();
        move |event: &UpdateEvent| reporter.handle(event)
    };

    match pipeline.check(&observer) {
        Outcome::UpdateAvailable(version) => {
            println!(
                "{} New version available: {} → {}",
                "↑".yellow(),
                current.dimmed(),
                version.to_string().green()
            );
            println!("  Run `freshen update` to install");
            Ok(ExitCode::SUCCESS)
        }
        outcome => Ok(report(&outcome, &current, verbose)),
    }
}

fn run_update_command(config_path: PathBuf, yes: bool, verbose: bool) -> Result<ExitCode> {
    let pipeline = UpdatePipeline::open(&config_path)?;
    let current = pipeline.config().current_version.clone();

    match pipeline.config().validate_installation() {
        InstallCheck::Ok => {}
        InstallCheck::MissingDirectory(_) => println!(
            "{} {}",
            "•".cyan(),
            pipeline.config().installation_mode().describe()
        ),
        problem => println!("{} {}", "!".yellow().bold(), describe_install(&problem)),
    }

    println!("{}", "Checking for updates...".cyan());
    let reporter = Reporter::new();
    let observer = {
        let reporter = reporter.clone();
        move |event: &UpdateEvent| reporter.handle(event)
    };
    let confirm = {
        let reporter = reporter.clone();
        let current = current.clone();
        move |release: &freshen::update::ReleaseInfo| {
            if yes {
                return true;
            }
            reporter.suspend(|| prompt_install(&current, release).unwrap_or(false))
        }
    };

    let handle = worker::spawn(pipeline, observer, confirm).context("Failed to start update worker")?;
    let outcome = handle
        .join()
        .map_err(|_| anyhow::anyhow!("Update worker panicked"))?;

    Ok(report(&outcome, &current, verbose))
}

fn run_status_command(config_path: PathBuf) -> Result<ExitCode> {
    let config = Config::load_from(&config_path)?;

    println!("{}", "CONFIG".bold());
    println!("   {} {}", "file:".dimmed(), config_path.display());
    println!("   {} {}", "version:".dimmed(), config.current_version);
    println!("   {} {}", "feed:".dimmed(), config.update_feed_url);
    if let Some(ts) = &config.last_check_timestamp {
        println!("   {} {}", "last update:".dimmed(), ts);
    }

    println!("\n{}", "INSTALLATION".bold());
    let check = config.validate_installation();
    match check {
        InstallCheck::Ok => println!(
            "   {} {}",
            "✓".green(),
            config.installation_path.display()
        ),
        ref problem => println!("   {} {}", "✗".red(), describe_install(problem)),
    }
    if !config.installation_path.as_os_str().is_empty() {
        println!("   {} {}", "mode:".dimmed(), config.installation_mode().describe());
    }

    let cache = CacheManager::new(config.cache_dir());
    let entries = cache.entries()?;
    println!("\n{} ({})", "CACHE".bold(), entries.len());
    if entries.is_empty() {
        println!("   {}", "No cached downloads".dimmed());
    }
    for entry in &entries {
        println!(
            "   {} v{} {} {}",
            "•".dimmed(),
            entry.version,
            indicatif::HumanBytes(entry.size_bytes),
            entry.path.display().to_string().dimmed()
        );
    }

    Ok(ExitCode::SUCCESS)
}

fn run_cache_clear_command(config_path: PathBuf) -> Result<ExitCode> {
    let config = Config::load_from(&config_path)?;
    let cache = CacheManager::new(config.cache_dir());
    let removed = cache.clear()?;
    println!("{} Removed {} cached file(s)", "✓".green(), removed);
    Ok(ExitCode::SUCCESS)
}

fn prompt_install(current: &str, release: &freshen::update::ReleaseInfo) -> Result<bool> {
    let size = release
        .size
        .map(|s| format!(" ({})", indicatif::HumanBytes(s)))
        .unwrap_or_default();
    print!(
        "{} Install {} → {}{}? [y/N] ",
        "?".yellow().bold(),
        current.dimmed(),
        release.version.to_string().green(),
        size
    );
    io::stdout().flush()?;

    let mut input = String::new();
    io::stdin().read_line(&mut input)?;

    Ok(input.trim().to_lowercase() == "y")
}

fn report(outcome: &Outcome, current: &str, verbose: bool) -> ExitCode {
    match outcome {
        Outcome::UpToDate => {
            println!(
                "{} You're running the latest version ({})",
                "✓".green(),
                current
            );
            ExitCode::SUCCESS
        }
        Outcome::UpdateAvailable(version) => {
            println!(
                "{} Skipped update to {}",
                "↑".yellow(),
                version.to_string().green()
            );
            ExitCode::SUCCESS
        }
        Outcome::Complete(version) => {
            println!(
                "\n{} Updated to version {}",
                "✓".green(),
                version.to_string().green()
            );
            ExitCode::SUCCESS
        }
        Outcome::Failed {
            kind,
            message,
            detail,
            ..
        } => {
            eprintln!("{} {}", "✗".red().bold(), message);
            if verbose {
                eprintln!("  {} {}", format!("[{}]", kind.name()).dimmed(), detail.dimmed());
            }
            ExitCode::FAILURE
        }
    }
}

fn describe_install(check: &InstallCheck) -> String {
    match check {
        InstallCheck::Ok => "Installation looks good".to_string(),
        InstallCheck::NotConfigured => "No installation path configured".to_string(),
        InstallCheck::MissingDirectory(path) => {
            format!("Installation directory not found: {}", path.display())
        }
        InstallCheck::MissingExecutable(path) => {
            format!("Application executable not found: {}", path.display())
        }
    }
}
