pub mod commands;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand, ValueEnum};
use siteguard_core::config::{AppConfig, ConfigOverrides, LoadOptions, LogFormat, LoggingConfig};
use siteguard_core::domain::MemoryScope;

use commands::check::CheckArgs;
use commands::CommandResult;

#[derive(Debug, Parser)]
#[command(
    name = "siteguard",
    about = "SiteGuard operator CLI",
    long_about = "Check whether a site operation may proceed given retrieved safety rules, remembered site facts, and current weather.",
    after_help = "Examples:\n  siteguard check --site \"Site Alpha\" --operation \"crane lift\" --rules ./rules\n  siteguard eval \"wind > limit\" --bind wind=25 --bind limit=20\n  siteguard memory --scope organization"
)]
pub struct Cli {
    #[arg(long, global = true, help = "Path to a siteguard.toml config file")]
    config: Option<PathBuf>,
    #[arg(long, global = true, value_enum, help = "Override the log format")]
    log_format: Option<LogFormatArg>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Decide whether an operation may proceed at a site")]
    Check {
        #[arg(long)]
        site: String,
        #[arg(long)]
        operation: String,
        #[arg(long, help = "Directory of Markdown or text rule documents")]
        rules: PathBuf,
        #[arg(long, help = "Operator message offered to the memory judge")]
        message: Option<String>,
        #[arg(long, help = "Skip the weather lookup")]
        no_weather: bool,
        #[arg(long, help = "Emit the decision as JSON")]
        json: bool,
    },
    #[command(about = "Evaluate a restricted comparison expression")]
    Eval {
        expression: String,
        #[arg(long = "bind", value_name = "NAME=VALUE")]
        bindings: Vec<String>,
    },
    #[command(about = "List remembered facts")]
    Memory {
        #[arg(long, value_enum)]
        scope: Option<ScopeArg>,
    },
    #[command(about = "Inspect effective configuration values with source attribution and redaction")]
    Config,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ScopeArg {
    User,
    Organization,
}

impl From<ScopeArg> for MemoryScope {
    fn from(scope: ScopeArg) -> Self {
        match scope {
            ScopeArg::User => Self::User,
            ScopeArg::Organization => Self::Organization,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormatArg {
    Compact,
    Pretty,
    Json,
}

impl From<LogFormatArg> for LogFormat {
    fn from(format: LogFormatArg) -> Self {
        match format {
            LogFormatArg::Compact => Self::Compact,
            LogFormatArg::Pretty => Self::Pretty,
            LogFormatArg::Json => Self::Json,
        }
    }
}

pub async fn run() -> ExitCode {
    let cli = Cli::parse();
    let options = LoadOptions {
        config_path: cli.config,
        require_file: false,
        overrides: ConfigOverrides { log_format: cli.log_format.map(Into::into), ..ConfigOverrides::default() },
    };

    let result = match cli.command {
        Command::Config => CommandResult::text(0, commands::config::run(options)),
        Command::Eval { expression, bindings } => commands::eval::run(&expression, &bindings),
        command => match AppConfig::load(options) {
            Ok(config) => {
                init_logging(&config.logging);
                dispatch(command, &config).await
            }
            Err(error) => CommandResult::failure(command.name(), "config_validation", error.to_string(), 2),
        },
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}

async fn dispatch(command: Command, config: &AppConfig) -> CommandResult {
    match command {
        Command::Check { site, operation, rules, message, no_weather, json } => {
            let args = CheckArgs { site, operation, rules, message, no_weather, json };
            commands::check::run(args, config).await
        }
        Command::Memory { scope } => commands::memory::run(config, scope.map(Into::into)).await,
        Command::Eval { expression, bindings } => commands::eval::run(&expression, &bindings),
        Command::Config => CommandResult::failure("config", "dispatch", "config is handled before loading", 2),
    }
}

impl Command {
    fn name(&self) -> &'static str {
        match self {
            Self::Check { .. } => "check",
            Self::Eval { .. } => "eval",
            Self::Memory { .. } => "memory",
            Self::Config => "config",
        }
    }
}

/// Logs go to stderr; stdout carries command output only.
pub fn init_logging(config: &LoggingConfig) {
    use tracing::Level;
    use LogFormat::*;

    let log_level = config.level.parse::<Level>().unwrap_or(Level::INFO);
    let builder = tracing_subscriber::fmt().with_target(false).with_max_level(log_level).with_writer(std::io::stderr);

    // try_init: tests and embedders may have installed one already.
    let _ = match config.format {
        Compact => builder.compact().try_init(),
        Pretty => builder.pretty().try_init(),
        Json => builder.json().try_init(),
    };
}
