use std::io::{self, IsTerminal};
use std::path::PathBuf;
use std::process;
use std::time::Duration;

use anyhow::Context;
use clap::error::ErrorKind;
use clap::{Args, CommandFactory, Parser, Subcommand};

use nginx_log_stat::logging::{init_logging, Verbosity};
use nginx_log_stat::metrics;
use nginx_log_stat::parsers::nginx_conf::detect_config_path;
use nginx_log_stat::shutdown::Shutdown;
use nginx_log_stat::{process_log, Config, Settings, TransportPolicy};

/// Realtime nginx access log parsing; sends per-request counters to StatsD.
#[derive(Parser, Debug)]
#[command(name = "nginx_log_stat", version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    #[command(flatten)]
    options: Options,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq)]
enum Command {
    /// Tail the access log and send metrics (default)
    Run,
    /// Print the resolved configuration and the format's variables, then exit
    Info,
}

#[derive(Args, Debug)]
struct Options {
    /// Access log to read, or `stdin`. Detected from the nginx config when omitted
    #[arg(long, global = true, env = "NGINX_LOG_STAT_ACCESS_LOG")]
    access_log: Option<String>,

    /// Log format as given to the `log_format` directive, or a format name
    #[arg(short = 'f', long, global = true, default_value = "combined", env = "NGINX_LOG_STAT_LOG_FORMAT")]
    log_format: String,

    /// nginx config file used to detect the access log and named formats
    #[arg(short = 'c', long = "config", global = true, env = "NGINX_LOG_STAT_CONFIG")]
    config: Option<PathBuf>,

    /// Process the current content of the access log instead of only new lines
    #[arg(long, global = true)]
    no_follow: bool,

    /// Only records satisfying this expression are counted
    #[arg(short = 'i', long, global = true, env = "NGINX_LOG_STAT_FILTER")]
    filter: Option<String>,

    /// Expression checked against the raw `line` before parsing
    #[arg(short = 'p', long, global = true, env = "NGINX_LOG_STAT_PRE_FILTER")]
    pre_filter: Option<String>,

    /// Label of the virtual host, part of every metric name
    #[arg(long, global = true, env = "NGINX_LOG_STAT_VHOST_PREFIX")]
    vhost_prefix: Option<String>,

    /// Host identity used in metric names [default: system host name]
    #[arg(long, global = true, env = "NGINX_LOG_STAT_HOSTNAME")]
    hostname: Option<String>,

    #[arg(long, global = true, default_value = "127.0.0.1", env = "NGINX_LOG_STAT_STATSD_HOST")]
    statsd_host: String,

    #[arg(long, global = true, default_value_t = 8125, env = "NGINX_LOG_STAT_STATSD_PORT")]
    statsd_port: u16,

    /// How long to wait before checking a followed log for new lines
    #[arg(long, global = true, default_value_t = 100, env = "NGINX_LOG_STAT_POLL_INTERVAL_MS")]
    poll_interval_ms: u64,

    /// `fatal` stops on the first failed send, `log` warns and carries on
    #[arg(long, global = true, default_value = "fatal", env = "NGINX_LOG_STAT_TRANSPORT_ERRORS")]
    transport_errors: TransportPolicy,

    /// vhost label that switches to the reserved metric names
    #[arg(long, global = true, default_value = metrics::DEFAULT_RESERVED_LABEL, env = "NGINX_LOG_STAT_RESERVED_VHOST")]
    reserved_vhost: String,

    #[arg(long, global = true, default_value = metrics::DEFAULT_QPS, env = "NGINX_LOG_STAT_QPS_METRIC")]
    qps_metric: String,

    #[arg(long, global = true, default_value = metrics::DEFAULT_STATUS, env = "NGINX_LOG_STAT_STATUS_METRIC")]
    status_metric: String,

    #[arg(long, global = true, default_value = metrics::DEFAULT_RESERVED_QPS, env = "NGINX_LOG_STAT_RESERVED_QPS_METRIC")]
    reserved_qps_metric: String,

    #[arg(long, global = true, default_value = metrics::DEFAULT_RESERVED_STATUS, env = "NGINX_LOG_STAT_RESERVED_STATUS_METRIC")]
    reserved_status_metric: String,

    /// More verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Print every line and parsed record
    #[arg(short, long, global = true)]
    debug: bool,
}

impl Options {
    fn settings(&self) -> Settings {
        Settings {
            access_log: self.access_log.clone(),
            log_format: self.log_format.clone(),
            server_config: self.config.clone(),
            no_follow: self.no_follow,
            filter: self.filter.clone(),
            pre_filter: self.pre_filter.clone(),
            vhost_prefix: self.vhost_prefix.clone().unwrap_or_default(),
            host: self.hostname.clone(),
            statsd_host: self.statsd_host.clone(),
            statsd_port: self.statsd_port,
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            transport_policy: self.transport_errors,
            reserved_vhost: self.reserved_vhost.clone(),
            qps_metric: self.qps_metric.clone(),
            status_metric: self.status_metric.clone(),
            reserved_qps_metric: self.reserved_qps_metric.clone(),
            reserved_status_metric: self.reserved_status_metric.clone(),
        }
    }
}

fn main() {
    let cli = Cli::parse();
    let command = cli.command.unwrap_or(Command::Run);

    if command == Command::Run && cli.options.vhost_prefix.is_none() {
        Cli::command()
            .error(ErrorKind::MissingRequiredArgument, "--vhost-prefix is required to send metrics")
            .exit();
    }

    init_logging(Verbosity::from_flags(cli.options.verbose, cli.options.debug));
    tracing::debug!(options = ?cli.options, "arguments");

    if let Err(err) = run(command, &cli.options) {
        eprintln!("error: {:#}", err);
        process::exit(1);
    }
}

fn run(command: Command, options: &Options) -> anyhow::Result<()> {
    let config = Config::resolve(&options.settings(), io::stdin().is_terminal())?;

    match command {
        Command::Info => {
            let server_config = config.server_config.clone().unwrap_or_else(detect_config_path);
            print!("{}", config.info(&server_config));
        }
        Command::Run => {
            let shutdown = Shutdown::new();
            shutdown
                .install_ctrlc_handler()
                .context("failed to install signal handler")?;

            let summary = process_log(&config, &shutdown)?;
            tracing::info!(records = summary.records, sent = summary.sent, "stopped");
        }
    }

    Ok(())
}
