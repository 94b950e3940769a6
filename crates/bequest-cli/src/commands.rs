use anyhow::{anyhow, Result};
use bequest_core::release::{dispatch_notices, LogNotifier};
use bequest_core::scheduler::spawn_release_loop;
use bequest_core::settings::{save_settings, VaultSettings};
use bequest_core::{InheritancePlan, ReleaseStatus, VaultItem};
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;
use uuid::Uuid;

use crate::context::{
    ctrl_c_token, init_vault, open_as_owner, open_vault, KeyBackend, VaultContext,
};

fn status_label(item: &VaultItem) -> String {
    match item.time_lock.as_ref().filter(|l| l.enabled) {
        Some(lock) => serde_json::to_value(lock.status)
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_else(|| format!("{:?}", lock.status)),
        None => "-".to_string(),
    }
}

fn print_items(items: &[VaultItem]) {
    for item in items {
        let tags: Vec<&str> = item.tags.iter().map(String::as_str).collect();
        println!(
            "{}  {:>10}  {:<13}  {}  [{}]",
            item.id,
            item.size,
            status_label(item),
            item.name,
            tags.join(",")
        );
    }
}

pub fn init(root: &Path, backend: &KeyBackend) -> Result<()> {
    let ctx = init_vault(root, backend)?;
    println!("Vault created at {}", ctx.root.display());
    println!(
        "Audit key: {}",
        hex::encode(ctx.audit.verifying_key().to_bytes())
    );
    Ok(())
}

pub async fn import(
    root: &Path,
    backend: &KeyBackend,
    path: &Path,
    name: Option<String>,
    tags: Vec<String>,
) -> Result<()> {
    let mut ctx = open_as_owner(root, backend, "import")?;
    let cancel = ctrl_c_token();
    let mut item = ctx.store.import_file(path, &cancel).await?;
    if let Some(name) = name {
        item = ctx.store.rename(item.id, &name)?;
    }
    if !tags.is_empty() {
        item = ctx.store.set_tags(item.id, tags)?;
    }
    ctx.flush_audit()?;
    println!("imported {} {} ({} bytes)", item.id, item.name, item.size);
    Ok(())
}

pub async fn export(root: &Path, backend: &KeyBackend, id: Uuid, out: &Path) -> Result<()> {
    let mut ctx = open_as_owner(root, backend, "export")?;
    let cancel = ctrl_c_token();
    let written = ctx.store.export_to_file(id, out, &cancel).await?;
    ctx.audit.append(
        "ITEM_EXPORTED",
        bequest_core::audit::AuditSeverity::Info,
        serde_json::json!({ "item_id": id, "bytes": written }),
    )?;
    ctx.flush_audit()?;
    println!("exported {} bytes to {}", written, out.display());
    Ok(())
}

pub fn list(root: &Path, backend: &KeyBackend, json: bool) -> Result<()> {
    let ctx = open_vault(root, backend)?;
    let items = ctx.store.list();
    if json {
        println!("{}", serde_json::to_string_pretty(&items)?);
    } else {
        print_items(&items);
    }
    Ok(())
}

pub fn search(root: &Path, backend: &KeyBackend, query: &str) -> Result<()> {
    let ctx = open_vault(root, backend)?;
    print_items(&ctx.store.search(query));
    Ok(())
}

pub fn rename(root: &Path, backend: &KeyBackend, id: Uuid, name: &str) -> Result<()> {
    let mut ctx = open_as_owner(root, backend, "rename")?;
    let item = ctx.store.rename(id, name)?;
    ctx.flush_audit()?;
    println!("renamed {} to {}", item.id, item.name);
    Ok(())
}

pub fn tag(
    root: &Path,
    backend: &KeyBackend,
    id: Uuid,
    add: Vec<String>,
    remove: Vec<String>,
) -> Result<()> {
    let mut ctx = open_as_owner(root, backend, "tag")?;
    let mut item = ctx.store.get(id)?;
    for tag in &add {
        item = ctx.store.add_tag(id, tag)?;
    }
    for tag in &remove {
        item = ctx.store.remove_tag(id, tag)?;
    }
    ctx.flush_audit()?;
    print_items(std::slice::from_ref(&item));
    Ok(())
}

pub fn delete(root: &Path, backend: &KeyBackend, id: Uuid) -> Result<()> {
    let mut ctx = open_as_owner(root, backend, "delete")?;
    ctx.store.delete(id)?;
    ctx.flush_audit()?;
    println!("deleted {id}");
    Ok(())
}

pub fn inherit(root: &Path, backend: &KeyBackend, id: Uuid, plan: InheritancePlan) -> Result<()> {
    let mut ctx = open_vault(root, backend)?;
    let item = ctx.engine.configure_inheritance(&ctx.store, id, plan, Utc::now())?;
    ctx.flush_audit()?;
    let lock = item
        .time_lock
        .as_ref()
        .ok_or_else(|| anyhow!("inheritance was not recorded"))?;
    println!(
        "locked {}: {} of {} shards required",
        item.id,
        lock.required_shard_count,
        lock.shards.len()
    );
    for shard in &lock.shards {
        println!("  shard {} -> {}", shard.index, shard.recipient_id);
    }
    Ok(())
}

pub fn disinherit(root: &Path, backend: &KeyBackend, id: Uuid) -> Result<()> {
    let mut ctx = open_as_owner(root, backend, "disinherit")?;
    ctx.engine.disable_inheritance(&ctx.store, id)?;
    ctx.flush_audit()?;
    println!("inheritance removed from {id}");
    Ok(())
}

pub fn activity(root: &Path, backend: &KeyBackend, reset: bool) -> Result<()> {
    let mut ctx = open_vault(root, backend)?;
    let now = Utc::now();
    if reset {
        ctx.engine.reset_activity(now)?;
        println!("activity history reset");
    } else {
        let cleared = ctx.engine.record_activity(now)?;
        println!("activity recorded; {cleared} warnings cleared");
    }
    ctx.flush_audit()?;
    Ok(())
}

pub async fn tick(root: &Path, backend: &KeyBackend) -> Result<()> {
    let mut ctx = open_vault(root, backend)?;
    let report = ctx.engine.tick(&ctx.store, Utc::now())?;
    ctx.flush_audit()?;
    for warning in &report.warnings {
        println!(
            "warning {}: {} days remaining ({:?})",
            warning.item_id, warning.days_remaining, warning.trigger
        );
    }
    for id in &report.unlocked {
        println!("unlocked {id}");
    }
    if !report.notices.is_empty() {
        dispatch_notices(&LogNotifier, &report.notices).await;
    }
    Ok(())
}

pub async fn watch(root: &Path, backend: &KeyBackend, interval_secs: Option<u64>) -> Result<()> {
    let ctx = open_vault(root, backend)?;
    let interval = Duration::from_secs(interval_secs.unwrap_or(ctx.settings.tick_interval_secs));
    let shutdown = CancellationToken::new();
    let forwarder = ctx.spawn_audit_forwarder(shutdown.clone());
    let (task, handle) = spawn_release_loop(
        ctx.engine.clone(),
        ctx.store.clone(),
        Arc::new(LogNotifier),
        interval,
        |report| {
            for id in &report.unlocked {
                println!("unlocked {id}");
            }
        },
    );

    info!("watching; press Ctrl-C to stop");
    tokio::signal::ctrl_c().await?;
    handle.shutdown.cancel();
    task.await?;
    shutdown.cancel();
    forwarder.await?;
    Ok(())
}

pub fn package(
    root: &Path,
    backend: &KeyBackend,
    id: Uuid,
    index: u8,
    name: Option<String>,
    out_dir: Option<PathBuf>,
) -> Result<()> {
    let mut ctx = open_as_owner(root, backend, "package")?;
    let package = ctx
        .engine
        .package_shard(&ctx.store, id, index, name.as_deref(), Utc::now())?;
    let uri = package.to_uri(&ctx.settings.uri_scheme, ctx.settings.compress_packages)?;
    if let Some(dir) = out_dir {
        std::fs::create_dir_all(&dir)?;
        let path = dir.join(package.file_name());
        package.write_file(&path)?;
        info!(path = %path.display(), "shard package written");
    }
    ctx.flush_audit()?;
    println!("{uri}");
    Ok(())
}

pub fn acknowledge(root: &Path, backend: &KeyBackend, id: Uuid, index: u8) -> Result<()> {
    let mut ctx = open_as_owner(root, backend, "acknowledge")?;
    ctx.engine.acknowledge_shard(&ctx.store, id, index, Utc::now())?;
    ctx.flush_audit()?;
    println!("shard {index} of {id} acknowledged");
    Ok(())
}

pub fn mark(root: &Path, backend: &KeyBackend, id: Uuid, status: ReleaseStatus) -> Result<()> {
    let mut ctx = open_as_owner(root, backend, "mark")?;
    let item = match status {
        ReleaseStatus::PendingReview => ctx.engine.mark_pending_review(&ctx.store, id)?,
        ReleaseStatus::Released => ctx.engine.mark_released(&ctx.store, id)?,
        ReleaseStatus::Failed => ctx.engine.mark_failed(&ctx.store, id)?,
        other => return Err(anyhow!("cannot mark an item {other:?}")),
    };
    ctx.flush_audit()?;
    println!("{} is now {}", item.id, status_label(&item));
    Ok(())
}

pub fn status(root: &Path, backend: &KeyBackend, json: bool) -> Result<()> {
    let ctx = open_vault(root, backend)?;
    let now = Utc::now();
    let reports = ctx.engine.status_report(&ctx.store, now);
    if json {
        println!("{}", serde_json::to_string_pretty(&reports)?);
        return Ok(());
    }
    println!("days inactive: {}", ctx.engine.days_inactive(now));
    for r in &reports {
        let remaining = r
            .days_remaining
            .map(|d| format!("{d} days left"))
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{}  {:?}  {}  shards {}/{} distributed, {} acknowledged, {} required  {}",
            r.item_id,
            r.status,
            remaining,
            r.distributed_shards,
            r.total_shards,
            r.acknowledged_shards,
            r.required_shards,
            r.name
        );
    }
    Ok(())
}

pub fn events(root: &Path, backend: &KeyBackend, limit: usize, verify: bool) -> Result<()> {
    let ctx = open_vault(root, backend)?;
    if verify {
        let verified = ctx.audit.verify_chain()?;
        println!("audit chain intact: {verified} entries");
    }
    for entry in ctx.audit.read_recent(None, Some(limit))? {
        println!(
            "{:>5}  {}  {:?}  {}  {}",
            entry.seq,
            entry.timestamp.to_rfc3339(),
            entry.severity,
            entry.event_type,
            entry.data
        );
    }
    Ok(())
}

pub fn settings_show(root: &Path, backend: &KeyBackend) -> Result<()> {
    let ctx = open_vault(root, backend)?;
    println!("{}", serde_json::to_string_pretty(&ctx.settings)?);
    Ok(())
}

pub fn settings_set<F>(root: &Path, backend: &KeyBackend, apply: F) -> Result<()>
where
    F: FnOnce(&mut VaultSettings),
{
    let mut ctx: VaultContext = open_as_owner(root, backend, "settings_set")?;
    let mut settings = ctx.settings.clone();
    apply(&mut settings);
    save_settings(ctx.keys.as_ref(), &settings)?;
    ctx.audit.append(
        "SETTINGS_UPDATED",
        bequest_core::audit::AuditSeverity::Info,
        serde_json::to_value(&settings)?,
    )?;
    ctx.flush_audit()?;
    println!("{}", serde_json::to_string_pretty(&settings)?);
    Ok(())
}
