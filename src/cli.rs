use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(author, version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Crawl a thread, convert it on the backend, save the EPUB.
    Download(DownloadArgs),
    /// Crawl a thread and write the conversion payload JSON only.
    Gather(GatherArgs),
    /// Probe the conversion backend.
    Ping(PingArgs),
}

#[derive(Debug, Args)]
pub struct DownloadArgs {
    /// Thread URL (must be http/https).
    #[arg(long)]
    pub url: String,

    /// Pages to fetch, e.g. "1,3-5". Default: auto-discover from page 1.
    #[arg(long)]
    pub pages: Option<String>,

    /// Highest page number to fetch.
    #[arg(long, default_value_t = 30)]
    pub max_pages: u32,

    /// Path to a JSON object of cookie name/value pairs.
    #[arg(long)]
    pub cookies: Option<String>,

    /// Path to a JSON array of pre-resolved assets; these win the merge
    /// against crawled duplicates.
    #[arg(long)]
    pub seed_assets: Option<String>,

    /// Conversion backend base URL.
    #[arg(long, default_value = "http://127.0.0.1:8765")]
    pub backend: String,

    /// Delegate HTML parsing to the backend helper endpoint.
    #[arg(long, default_value_t = false)]
    pub remote_extract: bool,

    /// Output path for the EPUB. A directory uses the server-suggested
    /// filename.
    #[arg(long)]
    pub out: String,

    /// Overwrite an existing output file.
    #[arg(long, default_value_t = false)]
    pub force: bool,
}

#[derive(Debug, Args)]
pub struct GatherArgs {
    /// Thread URL (must be http/https).
    #[arg(long)]
    pub url: String,

    /// Pages to fetch, e.g. "1,3-5". Default: auto-discover from page 1.
    #[arg(long)]
    pub pages: Option<String>,

    /// Highest page number to fetch.
    #[arg(long, default_value_t = 30)]
    pub max_pages: u32,

    /// Path to a JSON object of cookie name/value pairs.
    #[arg(long)]
    pub cookies: Option<String>,

    /// Path to a JSON array of pre-resolved assets; these win the merge
    /// against crawled duplicates.
    #[arg(long)]
    pub seed_assets: Option<String>,

    /// Conversion backend base URL (used with --remote-extract).
    #[arg(long, default_value = "http://127.0.0.1:8765")]
    pub backend: String,

    /// Delegate HTML parsing to the backend helper endpoint.
    #[arg(long, default_value_t = false)]
    pub remote_extract: bool,

    /// Output path for the payload JSON (default: stdout).
    #[arg(long)]
    pub out: Option<String>,
}

#[derive(Debug, Args)]
pub struct PingArgs {
    /// Conversion backend base URL.
    #[arg(long, default_value = "http://127.0.0.1:8765")]
    pub backend: String,
}
