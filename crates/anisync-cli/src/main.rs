use clap::{ArgAction, Parser, Subcommand};
use commands::{config, history, status, sync, watchlist, Session};
use std::path::PathBuf;

mod commands;
mod logging;
mod output;

#[derive(Parser)]
#[command(name = "anisync")]
#[command(about = "anisync - offline-first sync for your watch history and watchlist")]
#[command(version)]
struct Cli {
    /// Enable verbose output (use multiple times for more verbosity: -v, -vv)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Output format
    #[arg(long, global = true, default_value = "human", value_enum)]
    output: output::OutputFormat,

    /// Path to the config file (defaults to the platform config directory)
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Inspect or edit watch history
    History {
        #[command(subcommand)]
        cmd: HistoryCommands,
    },
    /// Inspect or edit the watchlist
    Watchlist {
        #[command(subcommand)]
        cmd: WatchlistCommands,
    },
    /// Reconcile both collections with the remote store now
    #[command(long_about = "Merge the local collections with the signed-in account's remote document and write the result back. Local changes are always kept; the remote write is skipped when signed out or unverified.")]
    Sync,
    /// Show account, collection sizes and sync queue state
    Status,
    /// Show or create the configuration file
    Config {
        #[command(subcommand)]
        cmd: ConfigCommands,
    },
}

#[derive(Subcommand)]
pub enum HistoryCommands {
    /// List watched episodes, most recent first
    List {
        /// Only show this many entries
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Record a watched episode (replaces an existing entry for the episode)
    Add {
        anime_id: String,

        /// Episode id; defaults to "<anime_id>-episode-<number>"
        #[arg(long)]
        episode_id: Option<String>,

        /// Episode number
        #[arg(long, default_value_t = 1)]
        episode: u32,

        /// Display name; defaults to the anime id
        #[arg(long)]
        name: Option<String>,

        #[arg(long, default_value = "")]
        image_url: String,

        /// Seconds watched
        #[arg(long, default_value_t = 0.0)]
        progress: f64,

        /// Episode length in seconds
        #[arg(long, default_value_t = 1440.0)]
        duration: f64,

        /// Watched with the dubbed audio track
        #[arg(long, action = ArgAction::SetTrue)]
        dub: bool,
    },
    /// Report playback progress for an episode already in history
    Progress { episode_id: String, seconds: f64 },
    /// Remove one episode
    Remove { episode_id: String },
    /// Remove every episode of an anime
    RemoveAnime { anime_id: String },
    /// Remove all history, locally and remotely
    Clear,
}

#[derive(Subcommand)]
pub enum WatchlistCommands {
    /// List bookmarked anime, most recently added first
    List,
    /// Bookmark an anime
    Add {
        anime_id: String,

        /// Display name; defaults to the anime id
        #[arg(long)]
        name: Option<String>,

        #[arg(long, default_value = "")]
        image_url: String,

        /// MyAnimeList id
        #[arg(long)]
        external_id: Option<String>,
    },
    /// Remove a bookmark
    Remove { anime_id: String },
    /// Remove every bookmark, locally and remotely
    Clear,
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Show the effective configuration (masks the API token)
    Show {
        /// Show the API token unmasked
        #[arg(long, action = ArgAction::SetTrue)]
        full: bool,
    },
    /// Write a config file
    Init {
        /// Overwrite an existing file
        #[arg(long, action = ArgAction::SetTrue)]
        force: bool,

        /// Use an HTTP document service at this URL instead of a local directory
        #[arg(long, value_name = "URL")]
        remote_url: Option<String>,

        /// Directory for the directory-backed remote
        #[arg(long, value_name = "DIR", conflicts_with = "remote_url")]
        remote_dir: Option<PathBuf>,

        /// Signed-in account id
        #[arg(long)]
        account: Option<String>,

        /// Mark the account as verified (allowed to write to the remote)
        #[arg(long, action = ArgAction::SetTrue, requires = "account")]
        verified: bool,
    },
}

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();
    let session = Session::load(cli.config.clone())?;

    logging::init_logging(cli.verbose, cli.quiet, &session.config.logging)
        .map_err(|e| color_eyre::eyre::eyre!("{}", e))?;

    let output = output::Output::new(cli.output, cli.quiet);

    match cli.command {
        Commands::History { cmd } => history::run_history(cmd, &session, &output).await,
        Commands::Watchlist { cmd } => watchlist::run_watchlist(cmd, &session, &output).await,
        Commands::Sync => sync::run_sync(&session, &output).await,
        Commands::Status => status::run_status(&session, &output).await,
        Commands::Config { cmd } => config::run_config(cmd, &session, &output),
    }
}
