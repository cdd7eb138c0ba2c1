mod crashcash;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use crate::crashcash::CrashcashCommands;

#[derive(Debug, Parser)]
#[command(name = "crashkart-cli")]
#[command(about = "CrashKart operator command line interface")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Database maintenance
    Db {
        #[command(subcommand)]
        command: DbCommands,
    },
    /// CrashCash ledger maintenance
    Crashcash {
        #[command(subcommand)]
        command: CrashcashCommands,
    },
}

#[derive(Debug, Subcommand)]
enum DbCommands {
    /// Check that the database is reachable
    Ping,
    /// Apply pending migrations
    Migrate,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let Some(command) = cli.command else {
        println!("crashkart-cli: run with --help to list commands");
        return Ok(());
    };

    let config = crashkart_core::load_app_config()?;
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(config.log_level.clone()))?;
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let pool_config = crashkart_db::PoolConfig::from_app_config(&config);
    let pool = crashkart_db::connect_pool(&config.database_url, pool_config).await?;

    match command {
        Commands::Db {
            command: DbCommands::Ping,
        } => {
            crashkart_db::ping(&pool).await?;
            println!("database reachable");
        }
        Commands::Db {
            command: DbCommands::Migrate,
        } => {
            let applied = crashkart_db::run_migrations(&pool).await?;
            println!("applied {applied} migration(s)");
        }
        Commands::Crashcash { command } => crashcash::run(&pool, &config, command).await?,
    }

    Ok(())
}
