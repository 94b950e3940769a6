use anyhow::Result;
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use uuid::Uuid;

mod commands;
mod context;
mod password;
mod recover;

use crate::context::{resolve_root, KeyBackend};

#[derive(Parser, Debug)]
#[command(author, version, about = "Encrypted vault with threshold-shared inheritance", long_about = None)]
struct Cli {
    /// Vault directory (defaults to the platform data dir or BEQUEST_DATA_DIR)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Keep the device keys in the OS keyring under this profile instead of
    /// the password-sealed key file
    #[arg(long, global = true)]
    keyring: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create a new vault
    Init,

    /// Encrypt a file into the vault
    Import {
        path: PathBuf,
        /// Display name (defaults to the file name)
        #[arg(long)]
        name: Option<String>,
        #[arg(long = "tag")]
        tags: Vec<String>,
    },

    /// Decrypt an item to a file
    Export { id: Uuid, out: PathBuf },

    /// List items
    List {
        #[arg(long)]
        json: bool,
    },

    /// Find items by name, tag or source
    Search { query: String },

    Rename { id: Uuid, name: String },

    /// Add or remove tags
    Tag {
        id: Uuid,
        #[arg(long)]
        add: Vec<String>,
        #[arg(long)]
        remove: Vec<String>,
    },

    /// Delete an item and its ciphertext
    Delete { id: Uuid },

    /// Split an item's key among a beneficiary and witnesses and lock it
    Inherit {
        id: Uuid,
        #[arg(long)]
        beneficiary: String,
        #[arg(long = "witness", required = true)]
        witnesses: Vec<String>,
        /// RFC 3339 timestamp after which the item unlocks
        #[arg(long)]
        unlock_date: Option<DateTime<Utc>>,
        /// Idle days after which the item unlocks
        #[arg(long)]
        inactivity_days: Option<u32>,
    },

    /// Remove inheritance from an item
    Disinherit { id: Uuid },

    /// Record owner activity, resetting the inactivity clock
    Activity {
        /// Forget the activity history as well
        #[arg(long)]
        reset: bool,
    },

    /// Evaluate release conditions once
    Tick,

    /// Evaluate release conditions periodically until interrupted
    Watch {
        /// Override the configured interval
        #[arg(long)]
        interval_secs: Option<u64>,
    },

    /// Build the transport package for one shard of an unlocked item
    Package {
        id: Uuid,
        index: u8,
        /// Recipient display name carried in the package
        #[arg(long)]
        name: Option<String>,
        /// Also write `<package id>.bqshard` into this directory
        #[arg(long)]
        out_dir: Option<PathBuf>,
    },

    /// Record that a recipient received their shard
    Acknowledge { id: Uuid, index: u8 },

    /// Move an unlocked item through review, release or failure
    Mark { id: Uuid, status: MarkTarget },

    /// Rebuild an item key from shards and optionally decrypt a blob
    Recover {
        /// Shards needed
        #[arg(long)]
        required: u8,
        #[arg(long, default_value = "recovered item")]
        item_name: String,
        /// Encrypted blob to decrypt with the recovered key
        #[arg(long, requires = "out")]
        blob: Option<PathBuf>,
        /// Expected SHA-256 of the plaintext
        #[arg(long, requires = "blob")]
        checksum: Option<String>,
        #[arg(long)]
        out: Option<PathBuf>,
        /// Print the recovered key as hex instead of decrypting
        #[arg(long, conflicts_with = "blob")]
        print_key: bool,
        /// Shard URIs, .bqshard files or encoded shares
        #[arg(required = true)]
        shards: Vec<String>,
    },

    /// Release status of every inherited item
    Status {
        #[arg(long)]
        json: bool,
    },

    /// Show recent audit entries
    Events {
        #[arg(short, long, default_value = "50")]
        limit: usize,
        /// Verify hashes and signatures of the audit chain
        #[arg(long)]
        verify: bool,
    },

    /// Show or change vault settings
    Settings {
        #[command(subcommand)]
        action: SettingsAction,
    },
}

#[derive(Subcommand, Debug)]
enum SettingsAction {
    Show,
    Set {
        #[arg(long)]
        chunk_size: Option<usize>,
        #[arg(long, value_delimiter = ',')]
        warning_days: Option<Vec<u32>>,
        #[arg(long)]
        tick_interval_secs: Option<u64>,
        #[arg(long)]
        shard_validity_days: Option<u32>,
        #[arg(long)]
        activity_history_days: Option<u32>,
        #[arg(long)]
        uri_scheme: Option<String>,
        #[arg(long)]
        compress_packages: Option<bool>,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum MarkTarget {
    PendingReview,
    Released,
    Failed,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "bequest=info,bequest_core=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let backend = KeyBackend::from_flag(cli.keyring);
    let root = resolve_root(cli.data_dir)?;

    match cli.command {
        Commands::Init => commands::init(&root, &backend),
        Commands::Import { path, name, tags } => {
            commands::import(&root, &backend, &path, name, tags).await
        }
        Commands::Export { id, out } => commands::export(&root, &backend, id, &out).await,
        Commands::List { json } => commands::list(&root, &backend, json),
        Commands::Search { query } => commands::search(&root, &backend, &query),
        Commands::Rename { id, name } => commands::rename(&root, &backend, id, &name),
        Commands::Tag { id, add, remove } => commands::tag(&root, &backend, id, add, remove),
        Commands::Delete { id } => commands::delete(&root, &backend, id),
        Commands::Inherit {
            id,
            beneficiary,
            witnesses,
            unlock_date,
            inactivity_days,
        } => commands::inherit(
            &root,
            &backend,
            id,
            bequest_core::InheritancePlan {
                beneficiary_id: beneficiary,
                witness_ids: witnesses,
                unlock_date,
                inactivity_days,
            },
        ),
        Commands::Disinherit { id } => commands::disinherit(&root, &backend, id),
        Commands::Activity { reset } => commands::activity(&root, &backend, reset),
        Commands::Tick => commands::tick(&root, &backend).await,
        Commands::Watch { interval_secs } => commands::watch(&root, &backend, interval_secs).await,
        Commands::Package {
            id,
            index,
            name,
            out_dir,
        } => commands::package(&root, &backend, id, index, name, out_dir),
        Commands::Acknowledge { id, index } => commands::acknowledge(&root, &backend, id, index),
        Commands::Mark { id, status } => {
            let status = match status {
                MarkTarget::PendingReview => bequest_core::ReleaseStatus::PendingReview,
                MarkTarget::Released => bequest_core::ReleaseStatus::Released,
                MarkTarget::Failed => bequest_core::ReleaseStatus::Failed,
            };
            commands::mark(&root, &backend, id, status)
        }
        Commands::Recover {
            required,
            item_name,
            blob,
            checksum,
            out,
            print_key,
            shards,
        } => {
            recover::run(recover::RecoverArgs {
                required,
                item_name,
                blob,
                checksum,
                out,
                print_key,
                shards,
            })
            .await
        }
        Commands::Status { json } => commands::status(&root, &backend, json),
        Commands::Events { limit, verify } => commands::events(&root, &backend, limit, verify),
        Commands::Settings { action } => match action {
            SettingsAction::Show => commands::settings_show(&root, &backend),
            SettingsAction::Set {
                chunk_size,
                warning_days,
                tick_interval_secs,
                shard_validity_days,
                activity_history_days,
                uri_scheme,
                compress_packages,
            } => commands::settings_set(&root, &backend, |s| {
                if let Some(v) = chunk_size {
                    s.chunk_size = v;
                }
                if let Some(v) = warning_days {
                    s.warning_days = v;
                }
                if let Some(v) = tick_interval_secs {
                    s.tick_interval_secs = v;
                }
                if let Some(v) = shard_validity_days {
                    s.shard_validity_days = v;
                }
                if let Some(v) = activity_history_days {
                    s.activity_history_days = v;
                }
                if let Some(v) = uri_scheme {
                    s.uri_scheme = v;
                }
                if let Some(v) = compress_packages {
                    s.compress_packages = v;
                }
            }),
        },
    }
}
