//! skillpush CLI - deploy a skill directory as a single commit

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use skillpush::transport::{Credential, GithubStore};
use skillpush::{
    load_skill_dir, Config, Deployer, Deployment, DeploymentResult, DeploymentTarget, Error,
    RelativePath, RepoFullName, Visibility,
};

#[derive(Parser)]
#[command(name = "skillpush")]
#[command(about = "publish skill files to a git host as one atomic commit")]
#[command(version)]
struct Cli {
    /// config file path
    #[arg(short, long, default_value = "skillpush.toml")]
    config: PathBuf,

    /// api base url, overrides the config file
    #[arg(long, env = "SKILLPUSH_API_URL")]
    api_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// deploy a skill directory
    Deploy {
        /// skill directory
        dir: PathBuf,

        /// skill name (defaults to the directory name)
        #[arg(short, long)]
        name: Option<String>,

        /// short description, used in the commit message
        #[arg(short, long)]
        description: Option<String>,

        /// create a new repository with this name
        #[arg(long, conflicts_with = "repo", required_unless_present = "repo")]
        new: Option<String>,

        /// make the new repository private
        #[arg(long, requires = "new")]
        private: bool,

        /// deploy into an existing repository (owner/name)
        #[arg(long)]
        repo: Option<String>,

        /// directory inside the existing repository that holds skills
        #[arg(long, requires = "repo")]
        base_path: Option<String>,

        /// print the result as json
        #[arg(long)]
        json: bool,

        /// api token
        #[arg(long, env = "GITHUB_TOKEN", hide_env_values = true)]
        token: String,
    },

    /// write a default config file
    InitConfig {
        /// overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "skillpush=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    match run(cli).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

/// returns whether the command succeeded
async fn run(cli: Cli) -> skillpush::Result<bool> {
    match cli.command {
        Commands::Deploy {
            dir,
            name,
            description,
            new,
            private,
            repo,
            base_path,
            json,
            token,
        } => {
            let mut config = Config::load_or_default(&cli.config)?;
            if let Some(url) = cli.api_url {
                config.api.base_url = url;
            }

            let name = match name {
                Some(name) => name,
                None => dir_name(&dir)?,
            };
            let target = match (new, repo) {
                (Some(new), _) => DeploymentTarget::new_repository(
                    new,
                    if private {
                        Visibility::Private
                    } else {
                        Visibility::Public
                    },
                ),
                (None, Some(repo)) => {
                    let full_name: RepoFullName = repo.parse()?;
                    let base_path = base_path.map(RelativePath::parse).transpose()?;
                    DeploymentTarget::existing_repository(full_name, base_path)
                }
                (None, None) => {
                    return Err(Error::InvalidName(
                        "either --new or --repo is required".to_string(),
                    ))
                }
            };

            let files = load_skill_dir(&dir, &config.deploy.exclude)?;
            let store = GithubStore::new(&config.api, Credential::new(token))?;
            let deployer = Deployer::new(Arc::new(store), config);

            let mut deployment = Deployment::new(&name, files, target);
            deployment.description = description;
            let result = deployer.deploy(&deployment).await;

            report(&name, &result, json)?;
            Ok(result.success)
        }

        Commands::InitConfig { force } => {
            if cli.config.exists() && !force {
                return Err(Error::Io {
                    path: cli.config.clone(),
                    source: std::io::Error::new(
                        std::io::ErrorKind::AlreadyExists,
                        "config file exists, use --force to overwrite",
                    ),
                });
            }
            Config::default().save(&cli.config)?;
            println!("wrote default config to {}", cli.config.display());
            Ok(true)
        }
    }
}

fn dir_name(dir: &Path) -> skillpush::Result<String> {
    let canonical = dir.canonicalize().map_err(|source| Error::Io {
        path: dir.to_path_buf(),
        source,
    })?;
    canonical
        .file_name()
        .and_then(|n| n.to_str())
        .map(str::to_string)
        .ok_or_else(|| Error::InvalidName(format!("cannot derive a name from {}", dir.display())))
}

fn report(name: &str, result: &DeploymentResult, json: bool) -> skillpush::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(result)?);
        return Ok(());
    }

    if result.success {
        println!("deployed {}", name);
        if let Some(location) = &result.location {
            println!("  location: {}", location);
        }
        if let Some(commit) = &result.commit {
            println!("  commit:   {}", commit);
        }
    } else {
        let kind = result
            .error_kind
            .map(|k| format!("{:?}", k))
            .unwrap_or_else(|| "Unknown".to_string());
        eprintln!(
            "error: deploy of {} failed ({}): {}",
            name,
            kind,
            result.error_message.as_deref().unwrap_or("no details")
        );
    }
    Ok(())
}
