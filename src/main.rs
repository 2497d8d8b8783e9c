mod cli;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use cli::{Cli, Commands};
use sourcery::aggregator::{EventSink, RunOutput};
use sourcery::errors::NoStreamFound;
use sourcery::media::MediaRequest;
use sourcery::settings::Settings;
use sourcery::Sourcery;

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("sourcery=info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value).context("serializing output")?);
    Ok(())
}

fn event_printer() -> EventSink {
    Arc::new(|event| match serde_json::to_string(&event) {
        Ok(line) => eprintln!("{line}"),
        Err(e) => eprintln!("unprintable event: {e}"),
    })
}

fn report(result: std::result::Result<RunOutput, NoStreamFound>) -> Result<()> {
    match result {
        Ok(found) => print_json(&found),
        Err(err) => {
            for failure in &err.failures {
                eprintln!("  {failure}");
            }
            Err(err.into())
        }
    }
}

async fn scrape(sourcery: &Sourcery, media: MediaRequest, events: bool) -> std::result::Result<RunOutput, NoStreamFound> {
    if events {
        sourcery.scrape_with_events(&media, event_printer()).await
    } else {
        sourcery.scrape(&media).await
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let mut settings = Settings::load(cli.config.as_deref())?;
    if let Some(dir) = cli.providers {
        settings.providers_dir = Some(dir);
    }
    let sourcery = Sourcery::new(settings)?;

    match cli.command {
        Commands::List { embeds } => {
            if embeds {
                print_json(&sourcery.list_embeds())
            } else {
                print_json(&sourcery.list_sources())
            }
        }
        Commands::Movie { media } => report(scrape(&sourcery, media.movie(), cli.events).await),
        Commands::Show { media, season, episode } => report(scrape(&sourcery, media.show(season, episode), cli.events).await),
        Commands::Source { id, media, season, episode } => {
            let request = match (season, episode) {
                (Some(s), Some(e)) => media.show(s, e),
                _ => media.movie(),
            };
            let out = sourcery.run_source(&id, &request).await.with_context(|| format!("source `{id}`"))?;
            print_json(&out)
        }
        Commands::Embed { id, url } => {
            let out = sourcery.run_embed(&id, &url).await.with_context(|| format!("embed `{id}`"))?;
            print_json(&out)
        }
    }
}
