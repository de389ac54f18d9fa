//! Model trainer - Main Entry Point

use clap::Parser;
use model_trainer::cli::{cmd_info, cmd_predict, cmd_train, Cli, Commands};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "model_trainer=info".into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Train {
            train,
            test,
            preprocessor,
            artifact_dir,
            output,
            final_model,
            config,
            report,
            tracking_uri,
            experiment,
        } => {
            cmd_train(
                &train,
                &test,
                &preprocessor,
                &artifact_dir,
                output.as_deref(),
                final_model.as_deref(),
                config.as_deref(),
                report.as_deref(),
                tracking_uri,
                experiment,
            )
            .await?;
        }
        Commands::Predict { model, data, output } => {
            cmd_predict(&model, &data, output.as_deref())?;
        }
        Commands::Info { model } => {
            cmd_info(&model)?;
        }
    }

    Ok(())
}
