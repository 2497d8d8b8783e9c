use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use sourcery::media::MediaRequest;

/// Command-line front end; results are printed to stdout as JSON
#[derive(Parser)]
#[command(name = "sourcery")]
#[command(about = "Find a playable stream for a movie or episode across ranked providers", long_about = None)]
pub struct Cli {
    /// Settings file (defaults to config.toml in the platform config dir)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Directory of *.toml provider declarations
    #[arg(short, long, global = true)]
    pub providers: Option<PathBuf>,

    /// Print dispatch events to stderr as JSON lines
    #[arg(long, global = true)]
    pub events: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Args, Clone)]
pub struct MediaArgs {
    /// TMDB id
    #[arg(long)]
    pub tmdb_id: String,
    #[arg(long)]
    pub imdb_id: Option<String>,
    #[arg(long)]
    pub title: String,
    /// Release year
    #[arg(long)]
    pub year: u16,
}

impl MediaArgs {
    pub fn movie(&self) -> MediaRequest {
        self.with_imdb(MediaRequest::movie(&self.tmdb_id, &self.title, self.year))
    }

    pub fn show(&self, season: u32, episode: u32) -> MediaRequest {
        self.with_imdb(MediaRequest::show(&self.tmdb_id, &self.title, self.year, season, episode))
    }

    fn with_imdb(&self, media: MediaRequest) -> MediaRequest {
        match &self.imdb_id {
            Some(id) => media.with_imdb_id(id),
            None => media,
        }
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// List registered providers
    List {
        /// List embeds instead of sources
        #[arg(long)]
        embeds: bool,
    },
    /// Find a stream for a movie
    Movie {
        #[command(flatten)]
        media: MediaArgs,
    },
    /// Find a stream for a show episode
    Show {
        #[command(flatten)]
        media: MediaArgs,
        #[arg(long)]
        season: u32,
        #[arg(long)]
        episode: u32,
    },
    /// Run a single source
    Source {
        id: String,
        #[command(flatten)]
        media: MediaArgs,
        /// Treat the request as an episode (requires --episode)
        #[arg(long, requires = "episode")]
        season: Option<u32>,
        #[arg(long, requires = "season")]
        episode: Option<u32>,
    },
    /// Run a single embed against a url
    Embed {
        id: String,
        url: String,
    },
}
