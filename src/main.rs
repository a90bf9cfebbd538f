//! vault CLI - Command line interface for vaultdb
//!
//! Each invocation is its own process with its own working tree, so every
//! mutating command commits before it exits.

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::Level;
use vaultdb::list::positional_key;
use vaultdb::model::now_millis;
use vaultdb::{FileStore, Snapshot, SubVault, Vault, VaultConfig};

#[derive(Parser)]
#[command(name = "vault")]
#[command(about = "A versioned store of named record lists with diff and merge")]
#[command(version)]
struct Cli {
    /// Path to the database file
    #[arg(short, long, default_value = "vault.db")]
    database: PathBuf,

    /// Branch to work on (defaults to the configured default branch)
    #[arg(short, long)]
    branch: Option<String>,

    /// Output format (json or text)
    #[arg(short, long, default_value = "json")]
    format: OutputFormat,

    /// Log library events to stderr
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
enum OutputFormat {
    Json,
    Text,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize a new database
    Init,

    /// List the keys of the root vault or of a nested vault
    Keys {
        /// Slash-separated path of a nested vault
        path: Option<String>,
    },

    /// Show an entry
    Get {
        /// Slash-separated key path
        path: String,
    },

    /// Create or replace an entry
    Set {
        /// Slash-separated key path; missing parent vaults are created
        path: String,
        /// JSON array of records, or a JSON object with --keyed
        values: Option<String>,
        /// Use the object's keys as record keys
        #[arg(long)]
        keyed: bool,
        /// Create an empty nested vault instead of a list
        #[arg(long, conflicts_with_all = ["values", "keyed"])]
        vault: bool,
    },

    /// Remove an entry
    Rm {
        /// Slash-separated key path
        path: String,
    },

    /// Record the current state as a new commit
    Commit {
        #[arg(short, long)]
        message: String,
    },

    /// Show first-parent history of the branch
    Log {
        #[arg(short = 'n', long)]
        limit: Option<usize>,
    },

    /// List branches
    Branches,

    /// Create (or delete) a branch at the current commit
    Branch {
        name: String,
        #[arg(long)]
        delete: bool,
    },

    /// Show the changes that turn one branch into another
    Diff {
        /// Branch to diff from
        from: String,
        /// Branch to diff to (defaults to the current branch)
        to: Option<String>,
    },

    /// Merge other branches into the current one and commit
    Merge {
        #[arg(required = true)]
        branches: Vec<String>,
        /// Fail on paths changed by more than one branch instead of
        /// letting the later branch win
        #[arg(long)]
        strict: bool,
    },
}

struct Session {
    store: Arc<FileStore>,
    vault: Vault,
    config: VaultConfig,
}

impl Session {
    fn open(cli: &Cli) -> anyhow::Result<Self> {
        let config = VaultConfig::load(&cli.database)?;
        let store = Arc::new(
            FileStore::open(&cli.database)
                .with_context(|| format!("opening {}", cli.database.display()))?
                .with_compression_level(config.compression_level),
        );
        let mut vault = Vault::open(store.clone(), store.clone())?;
        let branch = cli.branch.as_deref().unwrap_or(&config.default_branch);
        vault.checkout(branch, true)?;
        Ok(Session {
            store,
            vault,
            config,
        })
    }

    /// Open another branch on the same store
    fn open_branch(&self, name: &str) -> anyhow::Result<Vault> {
        let mut vault = Vault::open(self.store.clone(), self.store.clone())?;
        vault.checkout(name, false)?;
        Ok(vault)
    }

    fn commit(&mut self, message: &str) -> anyhow::Result<vaultdb::Hash> {
        let author = self.config.author_or("vault-cli").to_string();
        let committer = self.config.committer_or("vault-cli").to_string();
        let hash = self
            .vault
            .commit(message, &author, &committer, now_millis())?;
        self.store.sync()?;
        Ok(hash)
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_max_level(if cli.verbose { Level::DEBUG } else { Level::WARN })
        .init();

    match &cli.command {
        Commands::Init => {
            if cli.database.exists() {
                anyhow::bail!("Database already exists at {}", cli.database.display());
            }
            let store = FileStore::create(&cli.database)?;
            store.sync()?;
            if !VaultConfig::config_path(&cli.database).exists() {
                VaultConfig::default().save(&cli.database)?;
            }
            output(
                cli.format,
                &json!({
                    "status": "ok",
                    "message": format!("Created database at {}", cli.database.display())
                }),
            )?;
        }

        Commands::Keys { path } => {
            let mut session = Session::open(&cli)?;
            let vault = match path {
                Some(path) => navigate(session.vault.root_mut(), path)?,
                None => session.vault.root_mut(),
            };
            let keys: Vec<&str> = vault.keys().collect();
            output(
                cli.format,
                &json!({
                    "count": keys.len(),
                    "keys": keys
                }),
            )?;
        }

        Commands::Get { path } => {
            let mut session = Session::open(&cli)?;
            let (parent, key) = parent_of(session.vault.root_mut(), path, false)?;
            let snapshot = parent.snapshot(key)?;
            output(
                cli.format,
                &json!({
                    "path": path,
                    "kind": snapshot.kind_name(),
                    "value": render(&snapshot)
                }),
            )?;
        }

        Commands::Set {
            path,
            values,
            keyed,
            vault,
        } => {
            let mut session = Session::open(&cli)?;
            let (parent, key) = parent_of(session.vault.root_mut(), path, true)?;
            let kind = if *vault {
                parent.set_vault(key)?;
                "vault"
            } else {
                let raw = values.as_deref().unwrap_or("[]");
                let parsed: Value = serde_json::from_str(raw).context("values must be JSON")?;
                match (parsed, *keyed) {
                    (Value::Object(map), true) => parent.set_records(key, map)?,
                    (Value::Array(items), false) => parent.set(key, items)?,
                    (_, true) => anyhow::bail!("--keyed expects a JSON object"),
                    (_, false) => anyhow::bail!("values must be a JSON array"),
                }
                "list"
            };
            let commit = session.commit(&format!("Set {}", path))?;
            output(
                cli.format,
                &json!({
                    "status": "ok",
                    "path": path,
                    "kind": kind,
                    "commit": commit.to_hex()
                }),
            )?;
        }

        Commands::Rm { path } => {
            let mut session = Session::open(&cli)?;
            let (parent, key) = parent_of(session.vault.root_mut(), path, false)?;
            parent.delete(key)?;
            let commit = session.commit(&format!("Remove {}", path))?;
            output(
                cli.format,
                &json!({
                    "status": "ok",
                    "path": path,
                    "commit": commit.to_hex()
                }),
            )?;
        }

        Commands::Commit { message } => {
            let mut session = Session::open(&cli)?;
            let commit = session.commit(message)?;
            output(
                cli.format,
                &json!({
                    "status": "ok",
                    "commit": commit.to_hex(),
                    "tree": session.vault.hash().to_hex()
                }),
            )?;
        }

        Commands::Log { limit } => {
            let session = Session::open(&cli)?;
            let commits: Vec<_> = session
                .vault
                .log(*limit)?
                .into_iter()
                .map(|(hash, commit)| {
                    json!({
                        "hash": hash.to_hex(),
                        "tree": commit.tree.to_hex(),
                        "parents": commit.parents.iter().map(|p| p.to_hex()).collect::<Vec<_>>(),
                        "message": commit.message,
                        "author": commit.author,
                        "committer": commit.committer,
                        "timestamp": commit.timestamp
                    })
                })
                .collect();
            output(
                cli.format,
                &json!({
                    "count": commits.len(),
                    "commits": commits
                }),
            )?;
        }

        Commands::Branches => {
            let session = Session::open(&cli)?;
            let current = session.vault.branch().map(str::to_string);
            let branches: Vec<_> = session
                .vault
                .branches()?
                .into_iter()
                .map(|(name, hash)| {
                    json!({
                        "current": Some(&name) == current.as_ref(),
                        "name": name,
                        "commit": hash.to_hex()
                    })
                })
                .collect();
            output(cli.format, &json!({ "branches": branches }))?;
        }

        Commands::Branch { name, delete } => {
            let session = Session::open(&cli)?;
            if *delete {
                session.vault.delete_branch(name)?;
            } else {
                session.vault.create_branch(name)?;
            }
            session.store.sync()?;
            output(
                cli.format,
                &json!({
                    "status": "ok",
                    "branch": name,
                    "deleted": delete
                }),
            )?;
        }

        Commands::Diff { from, to } => {
            let session = Session::open(&cli)?;
            let source = session.open_branch(from)?;
            let target = match to {
                Some(to) => session.open_branch(to)?,
                None => session.vault,
            };
            let diff = target.diff(&source)?;
            output(
                cli.format,
                &json!({
                    "empty": diff.is_empty(),
                    "removed": diff.removed_count(),
                    "added": diff.added_count(),
                    "modified": diff.modified_count(),
                    "changes": serde_json::to_value(&diff)?
                }),
            )?;
        }

        Commands::Merge { branches, strict } => {
            let mut session = Session::open(&cli)?;
            let others = branches
                .iter()
                .map(|name| session.open_branch(name))
                .collect::<anyhow::Result<Vec<_>>>()?;
            let refs: Vec<&Vault> = others.iter().collect();
            let report = session.vault.merge(&refs, !*strict)?;
            let commit = session.commit(&format!("Merge {}", branches.join(", ")))?;
            output(
                cli.format,
                &json!({
                    "status": "ok",
                    "commit": commit.to_hex(),
                    "base": report.base.to_hex(),
                    "overridden": report.overridden
                }),
            )?;
        }
    }

    Ok(())
}

/// Walk to the vault at a slash-separated path
fn navigate<'a>(root: &'a mut SubVault, path: &str) -> anyhow::Result<&'a mut SubVault> {
    let mut current = root;
    for segment in path.split('/').filter(|s| !s.is_empty()) {
        current = current.vault(segment)?;
    }
    Ok(current)
}

/// The vault holding the last segment of `path`, and that segment
fn parent_of<'a, 'p>(
    root: &'a mut SubVault,
    path: &'p str,
    create: bool,
) -> anyhow::Result<(&'a mut SubVault, &'p str)> {
    let (parents, key) = match path.rsplit_once('/') {
        Some((parents, key)) => (Some(parents), key),
        None => (None, path),
    };

    let mut current = root;
    for segment in parents.into_iter().flat_map(|p| p.split('/')) {
        current = if create && !current.contains_key(segment) {
            current.set_vault(segment)?
        } else {
            current.vault(segment)?
        };
    }
    Ok((current, key))
}

/// Human-shaped JSON for a snapshot: positional lists as plain arrays
fn render(snapshot: &Snapshot) -> Value {
    match snapshot {
        Snapshot::Record(value) => value.clone(),
        Snapshot::List(records) => {
            let positional = records
                .iter()
                .enumerate()
                .all(|(i, (key, _))| *key == positional_key(i));
            if positional {
                Value::Array(records.iter().map(|(_, v)| v.clone()).collect())
            } else {
                Value::Array(
                    records
                        .iter()
                        .map(|(k, v)| json!({ "key": k, "value": v }))
                        .collect(),
                )
            }
        }
        Snapshot::Vault(entries) => Value::Object(
            entries
                .iter()
                .map(|(k, s)| (k.clone(), render(s)))
                .collect(),
        ),
    }
}

fn output(format: OutputFormat, value: &Value) -> anyhow::Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string(value)?),
        OutputFormat::Text => println!("{}", serde_json::to_string_pretty(value)?),
    }
    Ok(())
}
