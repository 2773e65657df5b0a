use anyhow::{Context, Result};
use clap::{CommandFactory, Parser};
use owo_colors::OwoColorize;
use std::io::Write;
use voxrelay::app::{run_server, run_transcribe};
use voxrelay::cli::{Cli, Commands, ConfigAction};
use voxrelay::config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.quiet, cli.verbose);

    match cli.command {
        None | Some(Commands::Serve) => {
            let config = Config::resolve(cli.config.as_deref())?;
            log::info!("voxrelay {}", voxrelay::version_string());
            run_server(config).await?;
        }
        Some(Commands::Transcribe {
            file,
            server,
            timeout,
        }) => {
            handle_transcribe(&file, &server, timeout, cli.quiet).await?;
        }
        Some(Commands::Config { action }) => {
            handle_config_command(action, cli.config.as_deref())?;
        }
        Some(Commands::Completions { shell }) => {
            clap_complete::generate(
                shell,
                &mut Cli::command(),
                "voxrelay",
                &mut std::io::stdout(),
            );
        }
    }

    Ok(())
}

/// Default filter from `-q`/`-v`; `RUST_LOG` wins when set.
fn init_logging(quiet: bool, verbose: u8) {
    let level = match (quiet, verbose) {
        (true, _) => "warn",
        (false, 0) => "info",
        (false, 1) => "debug",
        (false, _) => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp_millis()
        .init();
}

/// Stream a transcript to stdout, failing when the done marker never came.
async fn handle_transcribe(
    file: &std::path::Path,
    server: &str,
    timeout: Option<std::time::Duration>,
    quiet: bool,
) -> Result<()> {
    let mut stdout = std::io::stdout();
    let outcome = run_transcribe(file, server, timeout, |text| {
        if writeln!(stdout, "{text}").and_then(|_| stdout.flush()).is_err() {
            log::warn!("Failed to write fragment to stdout");
        }
    })
    .await
    .with_context(|| format!("Failed to transcribe {}", file.display()))?;

    if outcome.complete {
        if !quiet {
            eprintln!("{}", "Transcription complete".green());
        }
        Ok(())
    } else {
        eprintln!(
            "{}",
            "Transcription ended early (no completion marker)".red()
        );
        anyhow::bail!(
            "incomplete transcript: {} fragment(s) received",
            outcome.fragments.len()
        )
    }
}

fn handle_config_command(
    action: ConfigAction,
    custom_path: Option<&std::path::Path>,
) -> Result<()> {
    match action {
        ConfigAction::Show => {
            let config = Config::resolve(custom_path)?;
            print!("{}", config.to_redacted_toml()?);
            if let Err(e) = config.validate() {
                eprintln!("{} {}", "Warning:".yellow(), e);
            }
        }
        ConfigAction::Path => {
            let path = custom_path
                .map(|p| p.to_path_buf())
                .or_else(Config::default_path);
            match path {
                Some(path) => println!("{}", path.display()),
                None => anyhow::bail!("Could not determine config directory"),
            }
        }
    }
    Ok(())
}
