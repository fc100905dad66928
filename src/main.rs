use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;
use tracing::{error, info, warn};

use statement_pilot::catalog::AssetCatalog;
use statement_pilot::config::{AssetSettings, Config, DEFAULT_ACCOUNTS_FILE, load_accounts};
use statement_pilot::{live_desktop, logging};
use statement_pilot::resolver::{ConfidenceLadder, Lookup, Resolver, RetryPolicy};
use statement_pilot::runner::{CancelToken, Orchestrator, RunSummary};
use statement_pilot::session::Session;
use statement_pilot::workflow::{AccountDescriptor, WorkflowPlan, end_day_names};

/// Statement Pilot - export bank statements by driving the portal on screen
#[derive(Parser, Debug)]
#[command(
    name = "statement-pilot",
    version,
    about = "Exports account statements from a banking portal through screen recognition and synthetic clicks",
    after_help = "ENVIRONMENT VARIABLES:\n\
        STATEMENT_PILOT_ASSET_DIR       Root of the template image tree\n\
        STATEMENT_PILOT_ACCOUNTS        Account list (JSON)\n\
        STATEMENT_PILOT_CONFIDENCE      Confidence floor for controls\n\
        STATEMENT_PILOT_OUTPUT_DIR      Base directory for run sessions\n\
        STATEMENT_PILOT_DOWNLOAD_DIR    Confirm exports by watching this directory\n\
        RUST_LOG                        Log filter (default: info)"
)]
struct Args {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Export the statement of every configured account
    Run {
        /// Account list (JSON array of {label, id, file_stem, company?})
        #[arg(short, long, env = "STATEMENT_PILOT_ACCOUNTS", default_value = DEFAULT_ACCOUNTS_FILE)]
        accounts: PathBuf,

        /// Root of the template image tree
        #[arg(long, env = "STATEMENT_PILOT_ASSET_DIR")]
        assets: Option<PathBuf>,

        /// Session directory (default: auto-generated under STATEMENT_PILOT_OUTPUT_DIR)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Seconds to wait before the first click
        #[arg(short, long)]
        countdown: Option<u64>,

        /// Only process these accounts (labels or ids, comma-separated)
        #[arg(long, value_delimiter = ',')]
        only: Vec<String>,

        /// Print the run summary as JSON
        #[arg(long)]
        json: bool,
    },

    /// Audit the template asset tree against the workflow and account list
    Check {
        /// Account list (JSON array of {label, id, file_stem, company?})
        #[arg(short, long, env = "STATEMENT_PILOT_ACCOUNTS", default_value = DEFAULT_ACCOUNTS_FILE)]
        accounts: PathBuf,

        /// Root of the template image tree
        #[arg(long, env = "STATEMENT_PILOT_ASSET_DIR")]
        assets: Option<PathBuf>,

        /// Print the audit as JSON
        #[arg(long)]
        json: bool,
    },

    /// Look for a single target on the current screen
    Locate {
        /// Logical target name (e.g. "extrato", "14", "conta_41930-3")
        target: String,

        /// Confidence floor (default: STATEMENT_PILOT_CONFIDENCE)
        #[arg(long)]
        confidence: Option<f32>,

        /// Attempts per candidate and ladder rung
        #[arg(long)]
        tries: Option<u32>,

        /// Click the match when found
        #[arg(long)]
        click: bool,

        /// Root of the template image tree
        #[arg(long, env = "STATEMENT_PILOT_ASSET_DIR")]
        assets: Option<PathBuf>,

        /// Where to save a diagnostic screenshot on failure
        #[arg(short, long, default_value = ".")]
        output: PathBuf,

        /// Print the lookup as JSON
        #[arg(long)]
        json: bool,
    },
}

fn main() -> anyhow::Result<ExitCode> {
    let args = Args::parse();

    match args.command {
        Some(Commands::Run {
            accounts,
            assets,
            output,
            countdown,
            only,
            json,
        }) => {
            let config = config_with_assets(assets);
            let accounts = load_accounts(&accounts, &config.assets.label_prefix)?;
            let accounts = select_accounts(accounts, &only)?;

            let session = match output {
                Some(dir) => Session::in_dir(dir),
                None => Session::new(&config.run.output_dir),
            };
            session
                .init(accounts.len())
                .with_context(|| format!("creating session directory {}", session.dir.display()))?;
            logging::init(Some(&session.log_path()))?;
            info!(session = %session.dir.display(), accounts = accounts.len(), "starting run");

            let cancel = CancelToken::new();
            let resolver = resolver(&config, session.diagnostics_dir());
            let orchestrator =
                Orchestrator::new(&config, resolver).with_cancel_token(cancel.clone());
            orchestrator.preflight()?;

            spawn_interrupt_watcher(cancel.clone());
            let countdown = countdown.map(Duration::from_secs).unwrap_or(config.run.countdown);
            run_countdown(countdown, &cancel);

            let mut desktop = live_desktop().context("opening screen and input device")?;
            let summary = orchestrator.run(&mut desktop, &accounts)?;
            let summary_path = session.write_summary(&summary)?;

            if json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                print_summary(&summary);
                let diagnostics = session.list_diagnostics()?;
                if !diagnostics.is_empty() {
                    println!("  Diagnostic screenshots: {}", diagnostics.len());
                }
                println!("\nSession: {}", session.dir.display());
                println!("Summary: {}", summary_path.display());
            }

            Ok(if summary.is_clean() {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }

        Some(Commands::Check {
            accounts,
            assets,
            json,
        }) => {
            logging::init(None)?;
            let config = config_with_assets(assets);
            let accounts = load_accounts(&accounts, &config.assets.label_prefix)?;
            let plan = WorkflowPlan::from_config(&config);
            let catalog = AssetCatalog::new(config.assets.clone());
            let audit = catalog.audit(&plan.required_targets(), &accounts);

            if json {
                println!("{}", serde_json::to_string_pretty(&audit)?);
            } else {
                println!("Control targets:");
                for status in &audit.targets {
                    print_status(&status.name, &status.resolved, status.rejected.len());
                }
                println!("Account labels:");
                for status in &audit.accounts {
                    let label = status.label.as_deref().unwrap_or(&status.name);
                    print_status(label, &status.resolved, status.rejected.len());
                }
                for status in audit.targets.iter().chain(&audit.accounts) {
                    for rejected in &status.rejected {
                        println!("  rejected {}: {}", rejected.path.display(), rejected.defect);
                    }
                }
                if !audit.orphans.is_empty() {
                    println!("Unreferenced account images:");
                    for orphan in &audit.orphans {
                        match &orphan.suggested_label {
                            Some(label) => {
                                println!("  {} (label \"{}\"?)", orphan.path.display(), label)
                            }
                            None => println!("  {}", orphan.path.display()),
                        }
                    }
                }
            }

            for name in plan.optional_targets() {
                if catalog.resolve_candidates(&name).is_empty() {
                    warn!(target_name = %name, "best-effort target has no template file");
                }
            }
            let today = chrono::Datelike::day(&chrono::Local::now().date_naive());
            if end_day_names(today)
                .iter()
                .all(|name| catalog.resolve_candidates(name).is_empty())
            {
                warn!(day = today, "no template for today's calendar day");
            }
            if !audit.missing_accounts().is_empty() {
                warn!(accounts = ?audit.missing_accounts(), "accounts without a label template will fail");
            }

            if audit.is_ready() {
                Ok(ExitCode::SUCCESS)
            } else {
                error!(missing = ?audit.missing_targets(), "asset tree is not ready");
                Ok(ExitCode::FAILURE)
            }
        }

        Some(Commands::Locate {
            target,
            confidence,
            tries,
            click,
            assets,
            output,
            json,
        }) => {
            logging::init(None)?;
            let config = config_with_assets(assets);
            let policy = RetryPolicy::new(
                confidence.unwrap_or(config.matching.confidence),
                tries.unwrap_or(config.matching.tries),
                config.matching.retry_delay,
            );
            let resolver = resolver(&config, output);

            let mut desktop = live_desktop().context("opening screen and input device")?;
            let lookup = resolver.locate(&mut desktop, &target, &policy)?;
            if let (true, Lookup::Found(hit)) = (click, &lookup) {
                desktop.click(hit.location)?;
            }

            if json {
                println!("{}", serde_json::to_string_pretty(&lookup)?);
            } else {
                match &lookup {
                    Lookup::Found(hit) => println!(
                        "Found '{}' at {} (confidence {:.2}, score {:.3}, {} attempts) via {}",
                        hit.target,
                        hit.location,
                        hit.confidence,
                        hit.score,
                        hit.attempts,
                        hit.candidate.display()
                    ),
                    Lookup::NotFound(miss) => {
                        println!(
                            "'{}' not found after {} attempts (down to confidence {:.2})",
                            miss.target, miss.attempts, miss.lowest_confidence
                        );
                        if let Some(path) = &miss.diagnostic {
                            println!("  Screenshot: {}", path.display());
                        }
                    }
                    Lookup::NoCandidate { target } => {
                        println!("No usable template file for '{}'", target)
                    }
                }
            }

            Ok(if lookup.found().is_some() {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }

        None => {
            println!("Statement Pilot - export bank statements by driving the portal on screen");
            println!();
            println!("Usage: statement-pilot <COMMAND>");
            println!();
            println!("Commands:");
            println!("  run     Export the statement of every configured account");
            println!("  check   Audit the template asset tree");
            println!("  locate  Look for a single target on the current screen");
            println!();
            println!("Run with --help for more information.");
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// Environment configuration, with the asset root optionally overridden
fn config_with_assets(assets: Option<PathBuf>) -> Config {
    let mut config = Config::from_env();
    if let Some(root) = assets {
        config.assets = AssetSettings {
            label_prefix: config.assets.label_prefix.clone(),
            max_candidates: config.assets.max_candidates,
            ..AssetSettings::under(root)
        };
    }
    config
}

fn resolver(config: &Config, diagnostics: impl Into<PathBuf>) -> Resolver {
    let ladder = ConfidenceLadder::new(config.matching.min_confidence, config.matching.ladder_step);
    Resolver::new(AssetCatalog::new(config.assets.clone()), ladder).with_diagnostics(diagnostics)
}

/// Keep accounts whose label or id is listed; all of them when the list is empty
fn select_accounts(
    accounts: Vec<AccountDescriptor>,
    only: &[String],
) -> anyhow::Result<Vec<AccountDescriptor>> {
    if only.is_empty() {
        return Ok(accounts);
    }
    let selected: Vec<_> = accounts
        .into_iter()
        .filter(|a| only.iter().any(|o| o.trim() == a.label || o.trim() == a.id))
        .collect();
    if selected.is_empty() {
        bail!("--only {} matches no configured account", only.join(","));
    }
    Ok(selected)
}

/// First Ctrl+C cancels after the current account, the second exits
fn spawn_interrupt_watcher(cancel: CancelToken) {
    std::thread::spawn(move || {
        let runtime = match tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
        {
            Ok(rt) => rt,
            Err(e) => {
                warn!(error = %e, "Ctrl+C handling unavailable");
                return;
            }
        };
        runtime.block_on(async {
            if tokio::signal::ctrl_c().await.is_err() {
                return;
            }
            warn!("interrupt received; stopping after the current account (Ctrl+C again to exit now)");
            cancel.cancel();
            if tokio::signal::ctrl_c().await.is_ok() {
                error!("second interrupt; exiting");
                std::process::exit(130);
            }
        });
    });
}

fn run_countdown(duration: Duration, cancel: &CancelToken) {
    let secs = duration.as_secs();
    if secs == 0 {
        return;
    }
    info!(seconds = secs, "bring the portal to the foreground");
    for remaining in (1..=secs).rev() {
        if cancel.is_cancelled() {
            return;
        }
        info!(remaining, "starting in");
        std::thread::sleep(Duration::from_secs(1));
    }
}

fn print_summary(summary: &RunSummary) {
    println!(
        "Run finished: {} attempted, {} succeeded, {} failed",
        summary.attempted, summary.succeeded, summary.failed
    );
    for failure in &summary.failures {
        println!("  FAILED {} at {}: {}", failure.account.label, failure.state, failure.message);
    }
    for warning in &summary.warnings {
        println!("  warning: {}", warning);
    }
    for report in &summary.reports {
        if let Some(artifact) = &report.artifact {
            println!("  {} -> {}", report.account.label, artifact.display());
        }
    }
    if summary.cancelled {
        println!("  Cancelled by operator");
    }
    if let Some(reason) = &summary.halted {
        println!("  Halted: {}", reason);
    }
}

fn print_status(name: &str, resolved: &[PathBuf], rejected: usize) {
    match resolved.first() {
        Some(path) => println!("  ok       {} -> {}", name, display_relative(path)),
        None if rejected > 0 => println!("  INVALID  {} ({} unusable files)", name, rejected),
        None => println!("  MISSING  {}", name),
    }
}

fn display_relative(path: &Path) -> String {
    std::env::current_dir()
        .ok()
        .and_then(|cwd| path.strip_prefix(cwd).ok().map(Path::to_path_buf))
        .unwrap_or_else(|| path.to_path_buf())
        .display()
        .to_string()
}
