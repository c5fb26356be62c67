//! repostore CLI
//!
//! Edits a JSON object stored as a file in a GitHub repository. Every
//! invocation pulls the file, applies its edit on top of the latest version
//! and pushes, retrying when another writer got there first.
//!
//! # Commands
//!
//! - `get` - Print the document, or one key of it
//! - `set` - Set a key to a JSON value
//! - `unset` - Remove a key

mod commands;

use clap::{Parser, Subcommand};
use commands::Target;
use repostore_github::GithubConfig;
use tracing_subscriber::EnvFilter;

/// Edit a JSON document stored in a GitHub repository.
#[derive(Parser)]
#[command(name = "repostore")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Repository owner
    #[arg(global = true, long)]
    owner: Option<String>,

    /// Repository name
    #[arg(global = true, long)]
    repo: Option<String>,

    /// File holding the document
    #[arg(global = true, long, default_value = "state.json")]
    file: String,

    /// Branch holding the file [default: master, or the repository's
    /// default branch with --create-repo]
    #[arg(global = true, long)]
    branch: Option<String>,

    /// GitHub access token
    #[arg(global = true, long, env = "GITHUB_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// GitHub API base URL
    #[arg(global = true, long)]
    api_url: Option<String>,

    /// Create the repository if it does not exist
    #[arg(global = true, long)]
    create_repo: bool,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the document, or the value of one key
    Get {
        /// Key to print
        key: Option<String>,
    },

    /// Set a key (the value is parsed as JSON, falling back to a string)
    Set {
        /// Key to set
        key: String,

        /// New value
        value: String,
    },

    /// Remove a key
    Unset {
        /// Key to remove
        key: String,
    },

    /// Show version information
    Version,
}

impl Cli {
    fn target(&self) -> Result<Target, Box<dyn std::error::Error>> {
        let owner = self.owner.clone().ok_or("--owner is required")?;
        let repo = self.repo.clone().ok_or("--repo is required")?;
        let token = self
            .token
            .clone()
            .ok_or("a token is required (--token or GITHUB_TOKEN)")?;

        let mut config = GithubConfig::new(token, owner, repo, self.file.as_str());
        if let Some(branch) = &self.branch {
            config = config.with_reference(branch.as_str());
        }
        if let Some(url) = &self.api_url {
            config = config.with_api_url(url.as_str());
        }

        Ok(Target {
            config,
            branch: self.branch.clone(),
            create_repo: self.create_repo,
        })
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match &cli.command {
        Commands::Get { key } => {
            commands::get::run(&cli.target()?, key.as_deref()).await?;
        }
        Commands::Set { key, value } => {
            commands::set::run(&cli.target()?, key, value).await?;
        }
        Commands::Unset { key } => {
            commands::unset::run(&cli.target()?, key).await?;
        }
        Commands::Version => {
            println!("repostore CLI v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
