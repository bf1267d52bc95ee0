use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use pp_front::config::{config, PpFrontConfig};
use pp_front::engine::EngineGateway;
use pp_front::mirror::open_mirror;
use pp_front::orchestrator::TaskOrchestrator;
use pp_front::shutdown::ShutdownCoordinator;
use pp_front::telemetry::{init_telemetry, shutdown_telemetry};

#[derive(Parser)]
#[command(name = "pp-front")]
#[command(about = "HTTP front that drives the ProjectPlanning and Consejo Directivo processes")]
#[command(long_about = "pp-front translates browser requests into calls against the process engine's \
                       REST API: it creates and resumes cases, executes human tasks with form contracts \
                       and reads back the case variables written by the engine's connectors.")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the JSON API (default)
    Serve {
        /// Address to bind, overriding server.bind_addr
        #[arg(long, help = "Bind address, e.g. 0.0.0.0:8000")]
        bind: Option<String>,
    },
    /// Log into the engine and resolve the configured process definitions
    Check,
    /// Write the effective configuration as TOML
    WriteConfig {
        /// Destination file
        #[arg(long, default_value = "pp-front.toml")]
        path: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tokio::runtime::Runtime::new()?.block_on(async {
        let settings = config()?;
        init_telemetry(&settings.observability)?;

        let result = match cli.command.unwrap_or(Commands::Serve { bind: None }) {
            Commands::Serve { bind } => serve(settings, bind).await,
            Commands::Check => check(settings).await,
            Commands::WriteConfig { path } => {
                settings.save_to_file(&path)?;
                println!("Configuration written to {}", path.display());
                Ok(())
            }
        };

        shutdown_telemetry();
        result
    })
}

async fn serve(settings: &PpFrontConfig, bind: Option<String>) -> Result<()> {
    let mirror = open_mirror(settings.database.as_ref()).await?;
    let orchestrator = TaskOrchestrator::new(settings.clone(), mirror.clone());
    let bind_addr = bind.unwrap_or_else(|| settings.server.bind_addr.clone());

    pp_front::api::serve(orchestrator, &bind_addr, ShutdownCoordinator::wait_for_signal()).await?;
    ShutdownCoordinator::new(mirror).shutdown_all_services().await
}

async fn check(settings: &PpFrontConfig) -> Result<()> {
    let gateway = EngineGateway::connect(&settings.engine).await?;
    println!("Logged into {}", gateway.session().base_url());

    for process in [&settings.engine.planning_process, &settings.engine.council_process] {
        match gateway
            .find_process_definition_id(&process.name, &process.version)
            .await?
        {
            Some(id) => println!("  {} -> definition {}", process.key(), id),
            None => println!("  {} -> NOT DEPLOYED", process.key()),
        }
    }
    Ok(())
}
