//! `recon-cli`: thin operator surface over the reconciliation engine.
//! Inspects lock state, forces a push, or reads the sync anchor. No
//! business logic lives here -- everything delegates to
//! `recon_engine::{TenantController, GlobalLockManager, Replicator}`.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use recon_engine::{EngineConfig, GlobalLockManager, ReferentialConfig, TenantController};

#[derive(Debug, Parser)]
#[command(author, version, about = "Operator CLI for the reconciliation sync engine")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Inspect or release the global lock for a tenant.
    Lock {
        #[command(subcommand)]
        action: LockAction,
    },
    /// Force a replication push for a tenant.
    Push {
        #[arg(long)]
        tenant: String,
    },
    /// Print the tenant's current sync anchor.
    Anchor {
        #[arg(long)]
        tenant: String,
    },
}

#[derive(Debug, Subcommand)]
enum LockAction {
    /// Print whether the global lock is active and its sync status.
    Status {
        #[arg(long)]
        tenant: String,
    },
    /// Delete the active lock row outright.
    Release {
        #[arg(long)]
        tenant: String,
        /// Required: releasing a lock you do not hold can corrupt an
        /// in-progress push on another workstation.
        #[arg(long)]
        force: bool,
    },
}

fn referential_config_from_env() -> Result<ReferentialConfig> {
    let mut params = BTreeMap::new();
    for (env_key, config_key) in [
        ("RECON_DATA_DIR", "DataDirectory"),
        ("RECON_NETWORK_DIR", "NetworkDirectory"),
        ("RECON_COUNTRY_DB_DIR", "CountryDatabaseDirectory"),
        ("RECON_COUNTRY_DB_PREFIX", "CountryDatabasePrefix"),
        ("RECON_AMBRE_DB_PREFIX", "AmbreDatabasePrefix"),
        ("RECON_DW_DB_PREFIX", "DWDatabasePrefix"),
        ("RECON_CONTROL_DB_PREFIX", "ControlDatabasePrefix"),
        ("RECON_SYNC_TABLES", "SyncTables"),
    ] {
        if let Ok(value) = std::env::var(env_key) {
            params.insert(config_key.to_string(), value);
        }
    }
    ReferentialConfig::from_map(params).context("building referential configuration from environment")
}

#[tokio::main]
async fn main() -> Result<()> {
    recon_engine::logging::init();
    let cli = Cli::parse();
    let referential = referential_config_from_env()?;

    match cli.command {
        Command::Lock { action } => run_lock(action, referential).await,
        Command::Push { tenant } => run_push(&tenant, referential).await,
        Command::Anchor { tenant } => run_anchor(&tenant, referential).await,
    }
}

async fn run_lock(action: LockAction, referential: ReferentialConfig) -> Result<()> {
    match action {
        LockAction::Status { tenant } => {
            let paths = recon_engine::TenantPaths::derive(&referential, &tenant);
            let manager = GlobalLockManager::new(EngineConfig::default());
            let active = manager.is_active(&paths.control)?;
            match manager.active_record(&paths.control)? {
                Some(record) => println!(
                    "tenant={tenant} active={active} lockId={} reason={:?} status={} machine={} pid={} expiresAt={:?}",
                    record.lock_id,
                    record.reason,
                    record.sync_status,
                    record.machine_name,
                    record.process_id,
                    record.expires_at.map(|ts| ts.to_rfc3339()),
                ),
                None => println!("tenant={tenant} active={active} status=<none>"),
            }
            Ok(())
        }
        LockAction::Release { tenant, force } => {
            if !force {
                anyhow::bail!("refusing to release tenant {tenant}'s lock without --force");
            }
            let paths = recon_engine::TenantPaths::derive(&referential, &tenant);
            let conn = rusqlite::Connection::open(&paths.control)?;
            recon_engine::lock::ensure_schema(&conn)?;
            conn.execute("DELETE FROM SyncLocks", [])?;
            println!("tenant={tenant} lock released");
            Ok(())
        }
    }
}

async fn run_push(tenant: &str, referential: ReferentialConfig) -> Result<()> {
    let controller = TenantController::new(referential, EngineConfig::default());
    controller.set_current_tenant(tenant).await?;
    let applied = controller.push_pending(tenant).await?;
    println!("tenant={tenant} applied={applied}");
    Ok(())
}

async fn run_anchor(tenant: &str, referential: ReferentialConfig) -> Result<()> {
    let paths = recon_engine::TenantPaths::derive(&referential, tenant);
    let conn = rusqlite::Connection::open(&paths.control)?;
    let anchor = recon_engine::tenant::get_sync_anchor(&conn)?;
    match anchor {
        Some(anchor) => println!("tenant={tenant} lastSyncTimestamp={}", anchor.to_iso8601()),
        None => println!("tenant={tenant} lastSyncTimestamp=<none>"),
    }
    Ok(())
}
