use anyhow::{anyhow, bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use maildeck::api::client::ApiClient;
use maildeck::api::resource::Resource;
use maildeck::api::types::{Escalation, HistoryEntry, LogEntry, Record, RecordId, Settings, Timestamp};
use maildeck::config::{default_config_path, Config};
use maildeck::sync::controller::{ControllerConfig, ListController, Phase};
use maildeck::sync::export;
use maildeck::sync::query::{parse_date, DateRange};
use maildeck::sync::status::StatusMonitor;
use maildeck::transport::{HttpTransport, Transport};
use maildeck::{cli, log};
use std::path::PathBuf;
use std::process::Command;
use std::sync::Arc;
use std::time::Duration;
use time::Date;
use tracing::info;

#[derive(Parser, Debug)]
#[command(
    name = "maildeck",
    version,
    about = "Operator console for the mail-processing backend"
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Use config file at PATH instead of the default
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Backend base URL (overrides the config file and MAILDECK_API_BASE)
    #[arg(long, global = true)]
    base_url: Option<String>,

    /// Minimum log level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// View the log file in $PAGER
    #[arg(long)]
    log: bool,

    /// Truncate the log file before running
    #[arg(long)]
    clear_log: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Show processed email logs
    Logs(ListArgs),
    /// Show escalations waiting for an operator
    Escalations(ListArgs),
    /// Show the processing history
    History(ListArgs),
    /// Show the dashboard run status
    Status,
    /// Show processing analytics
    Analytics,
    /// Show or change backend settings
    Settings(SettingsArgs),
    /// Mark an escalation resolved
    Resolve {
        /// Escalation run id
        id: String,
    },
    /// Keep a view refreshed on its polling interval
    Watch(WatchArgs),
    /// Run in JSON-over-stdin/stdout session mode
    Cli,
    /// Print the session mode protocol
    HelpCli,
    /// Print the default config path and all options
    HelpConfig,
}

#[derive(Args, Debug, Clone)]
struct ListArgs {
    /// Free-text filter over subject and content
    #[arg(long, short)]
    query: Option<String>,
    /// Sender address substring
    #[arg(long)]
    sender: Option<String>,
    /// First day to include (YYYY-MM-DD)
    #[arg(long, value_parser = parse_date_arg)]
    from: Option<Date>,
    /// Last day to include (YYYY-MM-DD)
    #[arg(long, value_parser = parse_date_arg)]
    to: Option<Date>,
    /// Items per page (defaults to ui.page_size)
    #[arg(long)]
    limit: Option<u32>,
    #[arg(long, default_value_t = 0)]
    offset: u32,
    /// Print the page as CSV instead of a table
    #[arg(long)]
    csv: bool,
    /// Write the page as CSV into ui.export_dir
    #[arg(long)]
    export: bool,
    /// CSV columns, comma separated
    #[arg(long, value_delimiter = ',')]
    columns: Vec<String>,
}

#[derive(Args, Debug)]
struct SettingsArgs {
    #[arg(long)]
    notifications: Option<bool>,
    #[arg(long)]
    auto_reply: Option<bool>,
}

#[derive(Args, Debug)]
struct WatchArgs {
    /// logs, escalations, history or status
    view: String,
    /// Polling interval in seconds (defaults to the [poll] setting)
    #[arg(long)]
    interval: Option<u64>,
    #[command(flatten)]
    filters: ListArgs,
}

fn parse_date_arg(s: &str) -> Result<Date, String> {
    parse_date(s).ok_or_else(|| format!("expected YYYY-MM-DD, got '{}'", s))
}

fn show_log() -> Result<()> {
    let path = log::log_path();
    if !path.exists() {
        bail!("no log file found at {}", path.display());
    }
    let pager = std::env::var("PAGER").unwrap_or_else(|_| "less".to_string());
    let status = Command::new(&pager)
        .arg(&path)
        .status()
        .with_context(|| format!("failed to launch pager '{}'", pager))?;
    if !status.success() {
        bail!("pager exited with {}", status);
    }
    Ok(())
}

fn print_help_config() {
    let config_path = default_config_path();
    println!("Default config file: {}", config_path.display());
    println!();
    println!("Available options:");
    println!();
    println!("[backend]");
    println!("  base_url = \"http://127.0.0.1:8000\"  # Backend API (env: MAILDECK_API_BASE)");
    println!("  timeout_ms = 10000                  # Per-request deadline (default: 10000)");
    println!();
    println!("[poll]                              # Seconds between refreshes, 0 = off");
    println!("  logs_secs = 10");
    println!("  escalations_secs = 30");
    println!("  history_secs = 30");
    println!("  status_secs = 10");
    println!();
    println!("[ui]");
    println!("  page_size = 10                      # Items per page (default: 10)");
    println!("  export_dir = \".\"                    # Where --export writes CSV files");
    println!();
    println!("Log file: {}", log::log_path().display());
}

fn load_config(cli: &Cli) -> Result<Config> {
    let path = cli.config.clone().unwrap_or_else(default_config_path);
    let mut config = Config::load(&path)
        .with_context(|| format!("loading config from {}", path.display()))?;
    config.apply_env()?;
    if let Some(url) = &cli.base_url {
        config.set_base_url(url)?;
    }
    Ok(config)
}

fn main() {
    if let Err(e) = run() {
        eprintln!("error: {:#}", e);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();

    if cli.clear_log {
        log::clear()?;
    }
    if cli.log {
        return show_log();
    }

    let command = match &cli.command {
        Some(Commands::HelpConfig) => {
            print_help_config();
            return Ok(());
        }
        Some(Commands::HelpCli) => {
            cli::print_help_cli();
            return Ok(());
        }
        Some(command) => command,
        None => bail!("no command given (try --help)"),
    };

    log::init(&cli.log_level)
        .with_context(|| format!("initialising logging at level {}", cli.log_level))?;
    let config = load_config(&cli)?;
    info!(base_url = %config.backend.base_url, "starting");

    let transport: Arc<dyn Transport> = Arc::new(HttpTransport::new(
        config.backend.timeout.max(Duration::from_secs(30)),
    ));
    let api = ApiClient::new(
        config.backend.base_url.clone(),
        transport.clone(),
        config.backend.timeout,
    );

    match command {
        Commands::Logs(args) => list::<LogEntry>(&config, transport, Resource::Logs, args),
        Commands::Escalations(args) => {
            list::<Escalation>(&config, transport, Resource::Escalations, args)
        }
        Commands::History(args) => list::<HistoryEntry>(&config, transport, Resource::History, args),
        Commands::Status => {
            print_status(&api)?;
            Ok(())
        }
        Commands::Analytics => {
            let analytics = api.analytics()?;
            println!("total:     {}", analytics.total);
            println!("answered:  {}", analytics.answered);
            println!("escalated: {}", analytics.escalated);
            for (day, count) in &analytics.processed_per_day {
                println!("  {}  {}", day, count);
            }
            Ok(())
        }
        Commands::Settings(args) => settings(&api, args),
        Commands::Resolve { id } => {
            api.resolve(&RecordId::new(id.as_str()))?;
            println!("resolved {}", id);
            Ok(())
        }
        Commands::Watch(args) => watch(&config, transport, &api, args),
        Commands::Cli => {
            cli::run_cli(config, transport);
            Ok(())
        }
        Commands::HelpCli | Commands::HelpConfig => Ok(()),
    }
}

fn controller_for<T: Record>(
    config: &Config,
    transport: Arc<dyn Transport>,
    resource: Resource,
    args: &ListArgs,
) -> ListController<T> {
    let mut cc = ControllerConfig::for_resource(resource, config.backend.base_url.clone())
        .with_timeout(config.backend.timeout)
        .with_page_size(config.ui.page_size);
    if let Some(interval) = config.poll.for_resource(resource) {
        cc = cc.with_poll_interval(interval);
    }
    let mut controller = ListController::new(cc, transport);

    let query = controller.query_mut();
    if let Some(limit) = args.limit {
        query.set_limit(limit);
    }
    if let Some(text) = &args.query {
        query.set_free_text(text.as_str());
    }
    if let Some(sender) = &args.sender {
        query.set_sender(sender.as_str());
    }
    query.set_date_range(DateRange {
        start: args.from,
        end: args.to,
    });
    query.set_offset(args.offset);
    controller
}

fn columns_for(resource: Resource, args: &ListArgs) -> Vec<String> {
    if args.columns.is_empty() {
        resource
            .default_columns()
            .iter()
            .map(|c| c.to_string())
            .collect()
    } else {
        args.columns.clone()
    }
}

fn list<T: Record>(
    config: &Config,
    transport: Arc<dyn Transport>,
    resource: Resource,
    args: &ListArgs,
) -> Result<()> {
    let mut controller = controller_for::<T>(config, transport, resource, args);
    controller.refresh();
    if !controller.wait_settled(config.backend.timeout + Duration::from_secs(1)) {
        bail!("{} did not finish loading", resource);
    }
    if controller.phase() == Phase::Error {
        bail!(
            "fetching {}: {}",
            resource,
            controller.error_message().unwrap_or("request failed")
        );
    }

    let columns = columns_for(resource, args);
    let column_refs: Vec<&str> = columns.iter().map(String::as_str).collect();

    if args.export {
        let path = config
            .ui
            .export_dir
            .join(export::filename(resource.name(), Timestamp::now()));
        std::fs::write(&path, controller.export_csv(&column_refs))
            .with_context(|| format!("writing {}", path.display()))?;
        println!("{}", path.display());
    } else if args.csv {
        println!("{}", controller.export_csv(&column_refs));
    } else {
        print_table(controller.items());
        if controller.has_next() {
            println!(
                "-- more available: --offset {}",
                controller.query().offset() + controller.query().limit()
            );
        }
    }
    Ok(())
}

fn print_table<T: Record>(items: &[T]) {
    if items.is_empty() {
        println!("(no items)");
        return;
    }
    for item in items {
        let when = item
            .timestamp()
            .and_then(|ts| ts.to_rfc3339())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<10} {:<25} {:<30} {}",
            item.id().as_str(),
            when,
            item.sender().unwrap_or("-"),
            item.column("subject").unwrap_or_default()
        );
    }
}

fn print_status(api: &ApiClient) -> Result<()> {
    let status = api.status()?;
    println!(
        "{}  processed={} pending={} escalated={}",
        status.state, status.processed, status.pending, status.escalated
    );
    Ok(())
}

fn settings(api: &ApiClient, args: &SettingsArgs) -> Result<()> {
    let mut settings: Settings = api.settings()?;
    if args.notifications.is_some() || args.auto_reply.is_some() {
        if let Some(v) = args.notifications {
            settings.notifications = v;
        }
        if let Some(v) = args.auto_reply {
            settings.auto_reply = v;
        }
        settings = api.update_settings(&settings)?;
    }
    println!("notifications = {}", settings.notifications);
    println!("auto_reply = {}", settings.auto_reply);
    for (key, value) in &settings.extra {
        println!("{} = {}", key, value);
    }
    Ok(())
}

fn watch(
    config: &Config,
    transport: Arc<dyn Transport>,
    api: &ApiClient,
    args: &WatchArgs,
) -> Result<()> {
    if args.view == "status" {
        let interval = args
            .interval
            .map(Duration::from_secs)
            .or(config.poll.status)
            .unwrap_or(Duration::from_secs(10));
        if interval.is_zero() {
            bail!("--interval must be greater than 0");
        }
        let mut monitor = StatusMonitor::new();
        loop {
            if monitor.record(api.status()) {
                println!(
                    "{}  {}",
                    Timestamp::now().to_rfc3339().unwrap_or_default(),
                    monitor.summary_line()
                );
            }
            std::thread::sleep(interval);
        }
    }

    let resource: Resource = args.view.parse().map_err(|e: String| anyhow!(e))?;
    match resource {
        Resource::Logs => watch_list::<LogEntry>(config, transport, resource, args),
        Resource::Escalations => watch_list::<Escalation>(config, transport, resource, args),
        Resource::History => watch_list::<HistoryEntry>(config, transport, resource, args),
    }
}

fn watch_list<T: Record>(
    config: &Config,
    transport: Arc<dyn Transport>,
    resource: Resource,
    args: &WatchArgs,
) -> Result<()> {
    let mut controller = controller_for::<T>(config, transport, resource, &args.filters);
    let interval = match args.interval {
        Some(0) => bail!("--interval must be greater than 0"),
        Some(secs) => Duration::from_secs(secs),
        None => controller.config().poll_interval,
    };

    controller.refresh();
    controller.start_polling(interval);
    info!(view = %resource, ?interval, "watching");

    let mut last_line = String::new();
    loop {
        if !controller.wait_event(Duration::from_secs(1)) || controller.is_loading() {
            continue;
        }
        let line = controller.summary_line();
        if line != last_line {
            println!(
                "{}  {}",
                Timestamp::now().to_rfc3339().unwrap_or_default(),
                line
            );
            last_line = line;
        }
    }
}
