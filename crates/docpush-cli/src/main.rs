//! docpush: pull and push single documents to a GitHub repository without
//! clobbering concurrent edits.
//!
//! `pull` stores the version token of the fetched revision in a `.sha`
//! sidecar next to the file; `push` conditions the write on it.

mod config;
mod host;

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result, anyhow, bail};
use clap::{Args, Parser, Subcommand};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use docpush_core::{
    ContentGateway, Coordinator, DocumentLocation, GitHubContents, Outcome, PlainConverter,
    RemoteGateway, VERSION_CONFLICT_NOTICE, VersionToken,
};

use crate::config::Config;
use crate::host::FileHost;

/// Exit code for a rejected write whose token went stale.
const CONFLICT_EXIT_CODE: u8 = 2;

#[derive(Parser, Debug)]
#[command(name = "docpush", version)]
#[command(about = "Pull and push documents to a GitHub repository with conflict detection")]
struct Cli {
    /// Contents API base URL
    #[arg(long, global = true, env = "DOCPUSH_API_URL")]
    api_url: Option<String>,

    /// Token used to authenticate
    #[arg(long, global = true, env = "GITHUB_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Ref to read from when the branch does not exist
    #[arg(long, global = true, env = "DOCPUSH_FALLBACK_REF")]
    fallback_ref: Option<String>,

    /// Enable verbose logging
    #[arg(long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fetch a document and record its version token
    Pull {
        #[command(flatten)]
        target: Target,

        /// Where to write the document (default: its file name)
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// Save a local file, failing if the remote copy changed since it was pulled
    Push {
        #[command(flatten)]
        target: Target,

        /// Commit message
        #[arg(short, long)]
        message: String,

        /// Local file to upload (default: the document's file name)
        #[arg(long)]
        file: Option<PathBuf>,

        /// Version token to write against (default: read from the sidecar)
        #[arg(long)]
        sha: Option<String>,
    },

    /// Overwrite the remote copy with a local file after a conflict
    Retry {
        #[command(flatten)]
        target: Target,

        /// Commit message
        #[arg(short, long)]
        message: String,

        /// Local file to upload (default: the document's file name)
        #[arg(long)]
        file: Option<PathBuf>,
    },

    /// Print the current remote version token of a document
    Token {
        #[command(flatten)]
        target: Target,
    },
}

#[derive(Args, Debug)]
struct Target {
    /// Repository as owner/repo
    repo: String,

    /// Path of the document in the repository
    path: String,

    /// Branch to read from and write to
    #[arg(long, default_value = "main")]
    branch: String,
}

impl Target {
    fn location(&self) -> Result<DocumentLocation> {
        DocumentLocation::parse(&self.repo, &self.path, &self.branch)
            .with_context(|| format!("Invalid document {}:{}", self.repo, self.path))
    }
}

type FileSession = Coordinator<RemoteGateway<GitHubContents>, PlainConverter, FileHost>;

fn gateway(config: &Config) -> Result<RemoteGateway<GitHubContents>> {
    let backend = GitHubContents::new(config.api_url.clone())
        .context("Failed to create HTTP client")?;
    Ok(RemoteGateway::new(backend).with_fallback_ref(config.fallback_ref.clone()))
}

fn session(
    config: &Config,
    location: DocumentLocation,
    host: FileHost,
    initial_token: Option<VersionToken>,
) -> Result<FileSession> {
    Ok(
        Coordinator::new(gateway(config)?, PlainConverter, host, Some(location), initial_token)
            .with_credential(config.credential.clone()),
    )
}

fn local_file(location: &DocumentLocation, file: Option<PathBuf>) -> PathBuf {
    file.unwrap_or_else(|| PathBuf::from(location.file_name()))
}

/// Print the outcome of a write and map it to an exit code.
fn report_write(session: &FileSession, outcome: Outcome, file: &Path) -> Result<ExitCode> {
    let state = session.state();
    match outcome {
        Outcome::Completed => {
            let token = state
                .current_version_token
                .ok_or_else(|| anyhow!("Save completed without a version token"))?;
            host::write_token(file, &token)?;
            println!("Saved {} at {}", file.display(), token);
            Ok(ExitCode::SUCCESS)
        }
        Outcome::Failed if state.is_version_conflict => {
            eprintln!("{}", VERSION_CONFLICT_NOTICE);
            eprintln!("Run `docpush retry` to overwrite the remote copy with {}.", file.display());
            Ok(ExitCode::from(CONFLICT_EXIT_CODE))
        }
        Outcome::Failed => match state.save_failure {
            Some(failure) => bail!("{}", failure),
            None => bail!("Save failed"),
        },
        Outcome::Skipped => {
            bail!("Nothing to retry: a token and a non-empty commit message are required")
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let config = Config::from_env()?.with_overrides(cli.api_url, cli.token, cli.fallback_ref)?;
    debug!("Using API at {}", config.api_url);

    match cli.command {
        Command::Pull { target, out } => {
            let location = target.location()?;
            let file = local_file(&location, out);
            let session = session(&config, location, FileHost::default(), None)?;

            if session.fetch_latest(false).await != Outcome::Completed {
                match session.state().fetch_failure {
                    Some(failure) => bail!("{}", failure),
                    None => bail!("Fetch failed"),
                }
            }

            let content = session
                .host()
                .take_fetched()
                .ok_or_else(|| anyhow!("Fetch completed without content"))?;
            let token = session.state().current_version_token;
            host::write_document(&file, &content, token.as_ref())?;
            match token {
                Some(token) => println!("Pulled {} at {}", file.display(), token),
                None => {
                    warn!(
                        "No version token recorded for {}, pass --sha when pushing",
                        file.display()
                    );
                    println!("Pulled {}", file.display());
                }
            }
            Ok(ExitCode::SUCCESS)
        }

        Command::Push {
            target,
            message,
            file,
            sha,
        } => {
            let location = target.location()?;
            let file = local_file(&location, file);
            let token = match sha {
                Some(sha) => Some(VersionToken::new(sha)),
                None => host::read_token(&file)?,
            };
            let session = session(&config, location, FileHost::load(&file)?, token)?;

            let outcome = session.save(&message).await;
            report_write(&session, outcome, &file)
        }

        Command::Retry {
            target,
            message,
            file,
        } => {
            let location = target.location()?;
            let file = local_file(&location, file);
            let session = session(&config, location, FileHost::load(&file)?, None)?;

            let outcome = session.fetch_latest_and_retry(&message).await;
            report_write(&session, outcome, &file)
        }

        Command::Token { target } => {
            let location = target.location()?;
            let token = gateway(&config)?
                .read_version_token(&location, config.credential.as_ref())
                .await?;
            println!("{}", token);
            Ok(ExitCode::SUCCESS)
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Respects RUST_LOG, defaults to info (or debug with --verbose)
    let default_filter = if cli.verbose {
        "docpush=debug,docpush_core=debug"
    } else {
        "docpush=info,docpush_core=info"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    info!("docpush {}", env!("CARGO_PKG_VERSION"));

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
