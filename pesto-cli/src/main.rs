use clap::{Parser, Subcommand};
use color_eyre::eyre::Report;
use color_eyre::Result;
use pesto_engine::{GraphErrorKind, PestoError};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

mod commands;
mod output;

/// Log file written in the working directory
pub const LOG_FILE: &str = "pesto.log";

static LOG_GUARD: std::sync::OnceLock<tracing_appender::non_blocking::WorkerGuard> =
    std::sync::OnceLock::new();

/// Run file-driven batch pipelines, resuming where the last run stopped
#[derive(Parser, Debug)]
#[command(name = "pesto", version, about)]
struct Cli {
    /// Verbosity of the log file (overridden by RUST_LOG)
    #[arg(long = "log", short = 'l', global = true, default_value = "info", value_name = "LEVEL")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    Run(commands::run::RunArgs),
    Validate(commands::validate::ValidateArgs),
    Clean(commands::clean::CleanArgs),
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let exit = match real_main(cli).await {
        Ok(code) => code,
        Err(e) => {
            report(&e);
            exit_code_for_error(&e)
        }
    };

    std::process::exit(exit);
}

async fn real_main(cli: Cli) -> Result<i32> {
    color_eyre::install()?;

    // The log file is about to be deleted by `clean`
    let log_to_file = !matches!(cli.command, Command::Clean(_));
    init_tracing(&cli.log_level, log_to_file)?;

    match cli.command {
        Command::Run(args) => commands::run::execute(args).await,
        Command::Validate(args) => commands::validate::execute(args),
        Command::Clean(args) => commands::clean::execute(args),
    }
}

fn report(e: &Report) {
    match e.downcast_ref::<PestoError>() {
        Some(PestoError::Config(config)) => eprintln!("{}", config),
        Some(err) => output::error(&err.to_string()),
        None => eprintln!("{:?}", e),
    }
}

fn exit_code_for_error(e: &Report) -> i32 {
    // 1: step failures / uncategorized
    // 2: configuration or scope error
    // 3: dependency graph error
    // 130: interrupted
    match e.downcast_ref::<PestoError>() {
        Some(PestoError::Config(_)) | Some(PestoError::Scope(_)) => 2,
        Some(PestoError::Graph(graph)) => match graph.kind {
            GraphErrorKind::UnknownScope
            | GraphErrorKind::UnknownNode
            | GraphErrorKind::IncludeError => 2,
            GraphErrorKind::CyclicDependency
            | GraphErrorKind::UnknownDependency
            | GraphErrorKind::DuplicateNode => 3,
        },
        Some(PestoError::Interrupted) => 130,
        Some(PestoError::Record(_)) | None => 1,
    }
}

fn init_tracing(level: &str, log_to_file: bool) -> Result<()> {
    let filter = match std::env::var("RUST_LOG") {
        Ok(v) if !v.trim().is_empty() => EnvFilter::from_default_env(),
        _ => EnvFilter::try_new(level)?,
    };

    let file_layer = if log_to_file {
        let appender = tracing_appender::rolling::never(".", LOG_FILE);
        let (non_blocking, guard) = tracing_appender::non_blocking(appender);
        let _ = LOG_GUARD.set(guard);
        Some(
            tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_filter(filter),
        )
    } else {
        None
    };

    let console_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(atty::is(atty::Stream::Stderr))
        .with_filter(LevelFilter::ERROR);

    tracing_subscriber::registry()
        .with(file_layer)
        .with(console_layer)
        .init();

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pesto_engine::{ConfigError, GraphError};

    #[test]
    fn test_exit_codes() {
        let config: Report = PestoError::from(ConfigError::new("bad")).into();
        assert_eq!(exit_code_for_error(&config), 2);

        let cycle: Report = PestoError::from(GraphError::cyclic("cycle", "a", "b")).into();
        assert_eq!(exit_code_for_error(&cycle), 3);

        let unknown: Report = PestoError::from(GraphError::unknown_node("no step x")).into();
        assert_eq!(exit_code_for_error(&unknown), 2);

        let interrupted: Report = PestoError::Interrupted.into();
        assert_eq!(exit_code_for_error(&interrupted), 130);

        assert_eq!(exit_code_for_error(&color_eyre::eyre::eyre!("other")), 1);
    }

    #[test]
    fn test_cli_parses_run() {
        let cli = Cli::parse_from([
            "pesto", "run", "a.yaml", "b.yaml", "--from", "merge", "-w", "3", "--force", "-l",
            "debug",
        ]);
        assert_eq!(cli.log_level, "debug");
        match cli.command {
            Command::Run(args) => {
                assert_eq!(args.configs.len(), 2);
                assert_eq!(args.from.as_deref(), Some("merge"));
                assert_eq!(args.workers, 3);
                assert!(args.force);
                assert!(!args.dry_run);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }
}
