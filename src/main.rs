use std::process::ExitCode;

use clap::Parser;
use thiserror::Error;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use bunnybot::bzr::BzrConfig;
use bunnybot::config::{Args, Config, ConfigError};
use bunnybot::engine::Engine;
use bunnybot::git::cleanup::{self, LocalMirrorCleaner};
use bunnybot::git::GitMirrorConfig;
use bunnybot::launchpad::{Credentials, CredentialsError, HostError, LaunchpadClient};
use bunnybot::lock::{self, LockAttempt, LockError};
use bunnybot::persistence::{self, SnapshotError};
use bunnybot::retry::RetryPolicy;
use bunnybot::types::Branch;
use bunnybot::workspace::{LocalWorkspace, Workspace, WorkspaceError};
use bunnybot::ci::HttpCiPoller;

/// Top-level failures that abort the run with a non-zero exit.
#[derive(Debug, Error)]
enum MainError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Credentials(#[from] CredentialsError),

    #[error(transparent)]
    Lock(#[from] LockError),

    #[error(transparent)]
    Snapshot(#[from] SnapshotError),

    #[error(transparent)]
    Workspace(#[from] WorkspaceError),

    #[error(transparent)]
    Host(#[from] HostError),

    #[error("could not scan mirror root: {0}")]
    MirrorScan(#[from] std::io::Error),
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "bunnybot=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    match run(Args::parse()).await {
        Ok(code) => code,
        Err(err) => {
            tracing::error!(error = %err, "run aborted");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<ExitCode, MainError> {
    let config = Config::load(&args.config)?;

    let _lock = match lock::acquire(&config.pidfile_path())? {
        LockAttempt::Acquired(lock) => lock,
        LockAttempt::Held { pid } => {
            tracing::info!(pid, "another run holds the pidfile, nothing to do");
            return Ok(ExitCode::SUCCESS);
        }
    };

    let credentials = Credentials::load(&config.launchpad_credentials)?;
    let old = persistence::load_snapshot(&config.state_file)?;

    let mut workspace = LocalWorkspace::new(
        BzrConfig::new(&config.bzr_repo, RetryPolicy::DEFAULT),
        GitMirrorConfig::new(&config.git_repo, RetryPolicy::DEFAULT),
    );
    workspace.ensure_initialized()?;

    let client = reqwest::Client::new();
    let host = LaunchpadClient::new(
        client.clone(),
        credentials,
        RetryPolicy::DEFAULT,
        config.master_mirrors.clone(),
    );
    let poller = HttpCiPoller::new(client, RetryPolicy::DEFAULT);

    let mut engine = Engine::new(host, poller, &mut workspace, args.always_update);
    let report = engine.run(&old).await?;
    drop(engine);

    let mut snapshot = report.snapshot;
    persistence::save_snapshot_atomic(&config.state_file, &snapshot)?;

    let trunk = Branch::new(config.master_mirrors.clone());
    workspace.update_master(&trunk)?;

    // The trunk mirror is always kept, proposals or not.
    let mut referenced = report.referenced_slugs;
    referenced.insert(trunk.slug.clone());

    let on_disk = cleanup::on_disk_slugs(&config.bzr_repo)?;
    let mut cleaner = LocalMirrorCleaner {
        git: GitMirrorConfig::new(&config.git_repo, RetryPolicy::DEFAULT),
        mirror_root: config.bzr_repo.clone(),
    };
    let deleted = cleanup::cleanup_orphans(&mut cleaner, &referenced, &on_disk);
    if !deleted.is_empty() {
        for slug in &deleted {
            snapshot.remove_slug_mentions(slug);
        }
        persistence::save_snapshot_atomic(&config.state_file, &snapshot)?;
    }

    tracing::info!(
        proposals = snapshot.proposals.len(),
        failed = report.failed_proposals,
        "run complete"
    );
    Ok(ExitCode::SUCCESS)
}
