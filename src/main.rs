use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::{Path, PathBuf};

use lumi_recorder::driver::web::{BrowserType, WebPage, WebPageConfig};
use lumi_recorder::recorder::{self, ConsoleEventListener, EventEmitter};
use lumi_recorder::report::{self, json::RecordingReport};
use lumi_recorder::utils::config::RecorderConfig;

#[derive(Parser)]
#[command(name = "lumi-recorder")]
#[command(author = "NL Team")]
#[command(version = "0.1.0")]
#[command(about = "Record browser interactions and generate Playwright tests", long_about = None)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Record interactions on a page until Ctrl+C
    Record {
        /// Page to record
        url: String,

        /// Output path for the generated test
        #[arg(short, long, default_value = "recorded.spec.ts")]
        output: PathBuf,

        /// Quiet period before an action counts as settled (ms)
        #[arg(long)]
        settle_timeout: Option<u64>,

        /// Upper bound on waiting for an action to settle (ms)
        #[arg(long)]
        hard_cap: Option<u64>,

        /// Run the browser without a window
        #[arg(long, default_value = "false")]
        headless: bool,

        /// Browser engine
        #[arg(long, value_enum)]
        browser: Option<BrowserType>,

        /// Configuration file (YAML)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Also write the raw recording as JSON
        #[arg(long)]
        json: Option<PathBuf>,
    },

    /// Generate a test from a saved JSON recording
    Render {
        /// Path to the recording JSON
        recording: PathBuf,

        /// Output path (prints to stdout if omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();

    match cli.command {
        Commands::Record {
            url,
            output,
            settle_timeout,
            hard_cap,
            headless,
            browser,
            config,
            json,
        } => {
            let mut config = RecorderConfig::load(config.as_deref())?;
            if let Some(ms) = settle_timeout {
                config.settle_timeout_ms = ms;
            }
            if let Some(ms) = hard_cap {
                config.hard_cap_ms = ms;
            }
            if headless {
                config.headless = true;
            }
            if let Some(browser) = browser {
                config.browser = browser;
            }
            config.validate()?;

            record(&url, &output, json.as_deref(), &config).await?;
        }

        Commands::Render { recording, output } => {
            let report = RecordingReport::load(&recording)?;
            let script = report::render_script(&report.target_url, &report.actions);
            match output {
                Some(path) => {
                    std::fs::write(&path, script)?;
                    println!("{} Test written to: {}", "✓".green(), path.display());
                }
                None => print!("{}", script),
            }
        }
    }

    Ok(())
}

async fn record(
    url: &str,
    output: &Path,
    json: Option<&Path>,
    config: &RecorderConfig,
) -> anyhow::Result<()> {
    println!("{} Starting record mode...", "🔴".to_string().red().bold());
    println!("   {}", url.cyan());

    let page = WebPage::launch(WebPageConfig::from(config)).await?;

    let (emitter, receiver) = EventEmitter::new();
    let listener = tokio::spawn(ConsoleEventListener::listen(receiver));

    let handle = recorder::start_recording_with(page, url, config, emitter).await?;

    let stop = handle.stop_signal();
    ctrlc::set_handler(move || {
        println!("\n\n{} Stopping recording...", "⏹️ ".yellow());
        stop.stop();
    })?;

    println!("\n🖱  Interact with the page. Press Ctrl+C when done.\n");

    let recording = handle.wait().await?;
    let _ = listener.await;

    if let Some(reason) = &recording.interrupted {
        println!(
            "{} Browser stopped unexpectedly ({}); keeping {} recorded action(s)",
            "⚠️".yellow(),
            reason,
            recording.actions.len()
        );
    }

    let script = report::render_script(&recording.target_url, &recording.actions);
    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(output, script)?;
    println!("{} Test written to: {}", "✓".green(), output.display());

    if let Some(path) = json {
        RecordingReport::from_recording(&recording).save(path)?;
        println!("{} Recording saved to: {}", "✓".green(), path.display());
    }

    Ok(())
}
