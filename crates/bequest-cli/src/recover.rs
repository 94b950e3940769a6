//! Beneficiary side: collect shards, rebuild the item key, decrypt.
//!
//! Needs no vault of its own. Inputs are tried as a `.bqshard` file path,
//! then as a shard URI, then as a bare encoded share.

use anyhow::{anyhow, Context, Result};
use bequest_core::cipher::{Cipher, ExpectedChecksums};
use bequest_core::crypto::key_from_slice;
use bequest_core::{RecoveryManager, SessionStatus, ShardPackage};
use chrono::Utc;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use uuid::Uuid;

use crate::context::ctrl_c_token;

#[derive(Debug)]
pub struct RecoverArgs {
    pub required: u8,
    pub item_name: String,
    pub blob: Option<PathBuf>,
    pub checksum: Option<String>,
    pub out: Option<PathBuf>,
    pub print_key: bool,
    pub shards: Vec<String>,
}

fn add_input(manager: &RecoveryManager, session: Uuid, input: &str) -> Result<SessionStatus> {
    let path = Path::new(input);
    if path.is_file() {
        let package = ShardPackage::read_file(path)
            .with_context(|| format!("read shard package {}", path.display()))?;
        return Ok(manager.add_package(session, &package, Utc::now())?);
    }
    if input.contains("://") {
        let package = ShardPackage::from_uri(input)?;
        return Ok(manager.add_package(session, &package, Utc::now())?);
    }
    Ok(manager.add_encoded(session, input)?)
}

pub async fn run(args: RecoverArgs) -> Result<()> {
    if args.blob.is_none() && !args.print_key {
        return Err(anyhow!("nothing to do: pass --blob and --out, or --print-key"));
    }

    let manager = RecoveryManager::new();
    let session = manager.start(&args.item_name, args.required)?;
    for (n, input) in args.shards.iter().enumerate() {
        match add_input(&manager, session, input) {
            Ok(status) => info!(input = n + 1, status = ?status, "shard accepted"),
            Err(e) => warn!(input = n + 1, "shard rejected: {e:#}"),
        }
    }

    let summary = manager.summary(session)?;
    if summary.status != SessionStatus::Ready {
        manager.cancel(session);
        return Err(anyhow!(
            "insufficient shards: have {}, need {}",
            summary.collected.len(),
            summary.required
        ));
    }
    let secret = manager.complete(session)?;
    let key = key_from_slice(&secret).ok_or_else(|| anyhow!("recovered key has wrong length"))?;

    if args.print_key {
        println!("{}", hex::encode(key.as_slice()));
        return Ok(());
    }

    let (Some(blob), Some(out)) = (args.blob, args.out) else {
        return Err(anyhow!("--blob requires --out"));
    };
    let expected = ExpectedChecksums {
        plaintext: args.checksum.as_deref(),
        ciphertext: None,
    };
    let cancel = ctrl_c_token();
    let written = Cipher::decrypt_file(&key, &blob, &out, &expected, &cancel).await?;
    println!("recovered {} bytes to {}", written, out.display());
    Ok(())
}
