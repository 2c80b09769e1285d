use anyhow::{Context, Result};
use castbridge::app::{SendOptions, run_send_command};
use castbridge::cli::{Cli, Commands, ConfigAction, SendArgs, ServeArgs};
use castbridge::config::Config;
use castbridge::daemon::run_daemon;
use castbridge::diagnostics::check_dependencies;
use castbridge::relay::RunOutcome;
use clap::{CommandFactory, Parser};
use owo_colors::OwoColorize;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    castbridge::telemetry::init(cli.quiet, cli.verbose);

    match cli.command {
        None => {
            let config = load_config(cli.config.as_deref())?;
            serve(config, ServeArgs::default()).await?;
        }
        Some(Commands::Serve(args)) => {
            let config = load_config(cli.config.as_deref())?;
            serve(config, args).await?;
        }
        Some(Commands::Send(args)) => {
            let config = load_config(cli.config.as_deref())?;
            handle_send_command(&config, args).await?;
        }
        Some(Commands::Check) => {
            let config = load_config(cli.config.as_deref())?;
            if !check_dependencies(&config) {
                std::process::exit(1);
            }
        }
        Some(Commands::Config { action }) => {
            handle_config_command(action, cli.config.as_deref())?;
        }
        Some(Commands::Completions { shell }) => {
            clap_complete::generate(
                shell,
                &mut Cli::command(),
                "castbridge",
                &mut std::io::stdout(),
            );
        }
    }

    Ok(())
}

/// Load configuration from file or use defaults.
///
/// Priority order:
/// 1. Custom config path from CLI (--config)
/// 2. Default config path (~/.config/castbridge/config.toml)
/// 3. Built-in defaults
///
/// Environment variables are applied on top of whichever was loaded.
fn load_config(custom_path: Option<&std::path::Path>) -> Result<Config> {
    let config = if let Some(path) = custom_path {
        Config::load(path).with_context(|| format!("Failed to load {}", path.display()))?
    } else {
        Config::load_or_default(&Config::default_path())?
    };

    Ok(config.with_env_overrides())
}

async fn serve(mut config: Config, args: ServeArgs) -> Result<()> {
    if let Some(listen) = args.listen {
        config.server.listen = listen;
    }
    if let Some(static_dir) = args.static_dir {
        config.server.static_dir = static_dir;
    }
    if let Some(encoder) = args.encoder {
        config.encoder.program = encoder;
    }
    run_daemon(config).await?;
    Ok(())
}

async fn handle_send_command(config: &Config, args: SendArgs) -> Result<()> {
    // Sample rate and channels are filled in from the file.
    let overrides = args.overrides(config.target.sample_rate, config.target.channels);
    let options = SendOptions {
        file: args.file,
        url: args.url,
        repeat: args.repeat,
        block_frames: args.block_frames,
        overrides,
        max_attempts: args.max_attempts,
        retry_delay: args.retry_delay,
        connect_timeout: args.connect_timeout,
    };

    match run_send_command(config, options).await? {
        RunOutcome::Finished => eprintln!("{}", "Stream finished.".green()),
        RunOutcome::Stopped => eprintln!("Stream stopped."),
    }
    Ok(())
}

/// Handle configuration commands.
fn handle_config_command(
    action: ConfigAction,
    custom_path: Option<&std::path::Path>,
) -> Result<()> {
    let config_path = custom_path
        .map(std::path::PathBuf::from)
        .unwrap_or_else(Config::default_path);

    match action {
        ConfigAction::Path => {
            println!("{}", config_path.display());
        }
        ConfigAction::Show => {
            let mut config = load_config(custom_path)?;
            config.target.password = "***".to_string();
            let rendered =
                toml::to_string_pretty(&config).context("Failed to render configuration")?;
            if !config_path.exists() {
                eprintln!(
                    "{}",
                    format!("# {} not found, showing defaults", config_path.display())
                        .dimmed()
                );
            }
            print!("{}", rendered);
        }
    }
    Ok(())
}
