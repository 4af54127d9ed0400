//! dirwatch - report directory changes as they happen

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use cli_lib::config::{Config, Overrides};
use cli_lib::output::{OutputFormat, Printer};
use cli_lib::{forward, logging};
use owo_colors::OwoColorize;
use std::path::PathBuf;

/// dirwatch - asynchronous directory change notifications
#[derive(Parser)]
#[command(name = "dirwatch")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Log level when DIRWATCH_LOG is not set (error, warn, info, debug, trace)
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Watch a directory and print changes until Ctrl-C
    Watch(WatchArgs),
    /// Show the configuration a watch would run with
    Config(ConfigArgs),
}

#[derive(Args)]
struct ConfigArgs {
    /// Config file (default: ./dirwatch.toml if present)
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[derive(Args)]
struct WatchArgs {
    /// Directory to watch (overrides watch.root)
    root: Option<PathBuf>,

    /// Config file (default: ./dirwatch.toml if present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Watch the whole subtree
    #[arg(short, long)]
    recursive: bool,

    /// Notification buffer size in bytes
    #[arg(long)]
    buffer_size: Option<usize>,

    /// Comma-separated change filter, e.g. file_name,dir_name,last_write
    #[arg(long, value_delimiter = ',')]
    filter: Option<Vec<String>>,

    /// Identifier stamped on every event
    #[arg(long, default_value = "1")]
    id: u64,

    /// Print JSON lines instead of text
    #[arg(long)]
    json: bool,

    /// Disable colored output
    #[arg(long)]
    no_color: bool,
}

impl WatchArgs {
    fn overrides(&self) -> Overrides {
        Overrides {
            root: self.root.clone(),
            recursive: self.recursive,
            buffer_size: self.buffer_size,
            filter: self.filter.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.log_level.as_deref())?;

    match cli.command {
        Commands::Watch(args) => run_watch(args).await,
        Commands::Config(args) => show_config(args),
    }
}

fn show_config(args: ConfigArgs) -> Result<()> {
    let config = Config::discover(args.config.as_deref()).context("Failed to load configuration")?;
    let filter = config.filter().context("Invalid watch.filter")?;
    let options = config.watch_options().context("Invalid runtime settings")?;

    println!("{}", "dirwatch configuration".bold());

    println!("\n{}", "[watch]".yellow());
    match &config.watch.root {
        Some(root) => println!("  {} = {}", "root".cyan(), root.display()),
        None => println!("  {} = {}", "root".cyan(), "(not set)".dimmed()),
    }
    println!("  {} = {}", "recursive".cyan(), config.watch.recursive);
    println!(
        "  {} = {} {}",
        "buffer_size".cyan(),
        config.watch.buffer_size,
        format!("({} KiB)", config.watch.buffer_size / 1024).dimmed()
    );
    println!(
        "  {} = [{}] {}",
        "filter".cyan(),
        filter.names().join(", "),
        format!("({:#06x})", filter.bits()).dimmed()
    );

    println!("\n{}", "[runtime]".yellow());
    println!("  {} = {:?}", "sleep_interval".cyan(), options.sleep_interval);
    println!("  {} = {:?}", "revalidate_interval".cyan(), options.revalidate_interval);
    println!("  {} = {:?}", "abort_timeout".cyan(), options.abort_timeout);

    Ok(())
}

#[cfg(any(target_os = "linux", windows))]
async fn run_watch(args: WatchArgs) -> Result<()> {
    use dirwatch_core::{ChannelSink, MonitorId};
    use std::sync::Arc;
    use tracing::info;
    use watcher::NativeWatchLoop;

    let mut config = Config::discover(args.config.as_deref()).context("Failed to load configuration")?;
    config.apply(&args.overrides());
    let request = config.watch_request().context("Invalid watch configuration")?;
    let options = config.watch_options().context("Invalid runtime settings")?;
    let root = request.root().to_path_buf();

    let (sink, events, errors) = ChannelSink::new();
    let watch = NativeWatchLoop::with_options(MonitorId(args.id), request, Arc::new(sink), options);
    watch
        .start()
        .with_context(|| format!("Failed to start watching {}", root.display()))?;

    let format = if args.json { OutputFormat::Json } else { OutputFormat::Human };
    let printer = Printer::new(format, !args.no_color && !args.json);
    let forwarder = tokio::task::spawn_blocking(move || {
        let stdout = std::io::stdout();
        let mut out = stdout.lock();
        forward::forward(events, errors, printer, &mut out)
    });

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    info!("Interrupted, stopping watch on {}", root.display());

    // Stopping joins the worker; dropping the loop drops the sink, which ends
    // the forwarder
    tokio::task::spawn_blocking(move || {
        watch.stop();
        drop(watch);
    })
    .await
    .context("Stop task failed")?;

    let forwarded = forwarder
        .await
        .context("Output task failed")?
        .context("Failed to write output")?;
    info!(
        "Forwarded {} event(s) and {} error report(s)",
        forwarded.events, forwarded.errors
    );

    Ok(())
}

#[cfg(not(any(target_os = "linux", windows)))]
async fn run_watch(_args: WatchArgs) -> Result<()> {
    anyhow::bail!("dirwatch has no notification backend for this platform")
}
