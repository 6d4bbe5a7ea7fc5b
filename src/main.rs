use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use mnemo::{config, server};

#[derive(Parser)]
#[command(name = "mnemo", version, about = "Remote memory service for AI coding assistants")]
struct Cli {
    /// Path to a config file (default: ~/.mnemo/config.toml)
    #[arg(long, global = true)]
    config: Option<std::path::PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the HTTP server and the daily maintenance loop
    Serve,
    /// Run one reflection pass and print the outcome
    Reflect,
    /// Fire due reminders and print them
    CheckReminders,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => config::MnemoConfig::load_from(path)?,
        None => config::MnemoConfig::load()?,
    };

    // Log to stderr so stdout stays clean for command output.
    let filter = EnvFilter::try_new(&config.server.log_level)
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Command::Serve => {
            server::serve(config).await?;
        }
        Command::Reflect => {
            let app = server::App::build(&config)?;
            let Some(engine) = &app.state.reflection else {
                anyhow::bail!("reflection is not configured: set llm.api_key and enable it");
            };
            let outcome = engine.run().await?;
            println!("{}", serde_json::to_string_pretty(&outcome)?);
        }
        Command::CheckReminders => {
            let app = server::App::build(&config)?;
            let fired = app.state.tools.reminders.check().await?;
            println!("{}", serde_json::to_string_pretty(&fired)?);
        }
    }

    Ok(())
}
