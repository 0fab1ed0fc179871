use std::process::ExitCode;

use anyhow::Context as _;
use clap::Parser as _;

#[tokio::main]
async fn main() -> ExitCode {
    if let Err(err) = try_main().await {
        eprintln!("{err:#}");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

async fn try_main() -> anyhow::Result<()> {
    forumclip::logging::init().context("init logging")?;

    let cli = forumclip::cli::Cli::parse();
    tracing::debug!(?cli, "parsed cli");

    match cli.command {
        forumclip::cli::Command::Download(args) => {
            forumclip::download::run(args).await.context("download")?;
        }
        forumclip::cli::Command::Gather(args) => {
            forumclip::download::gather(args).await.context("gather")?;
        }
        forumclip::cli::Command::Ping(args) => {
            forumclip::download::ping(&args.backend).await.context("ping")?;
        }
    }

    Ok(())
}
