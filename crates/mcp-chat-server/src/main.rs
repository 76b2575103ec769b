mod commands;
mod configuration;
mod error;
mod logging;
mod routes;
mod state;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the chat server (the default)
    Serve,
    /// List the models clients can select
    Models,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => commands::serve::run().await,
        Commands::Models => {
            let catalog = configuration::Settings::new()?.model_catalog()?;
            for id in catalog.ids() {
                if let Some(model) = catalog.get(id) {
                    println!("{}\t{}\t{}", model.id, model.provider, model.upstream_model);
                }
            }
            Ok(())
        }
    }
}
