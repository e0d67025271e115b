//! Strongbox CLI - Command line interface for the encrypted vault.
//!
//! Every invocation opens the vault store, unlocks the vault with a
//! passphrase read from the terminal, runs one command and locks again.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;
use zeroize::Zeroizing;

use strongbox_common::Confirmation;
use strongbox_crypto::KdfParams;
use strongbox_storage::{create_default_registry, KeyValueStore};
use strongbox_vault::record::{decode_envelope, encode_envelope};
use strongbox_vault::{VaultSession, VaultSettings};

#[derive(Parser)]
#[command(name = "strongbox")]
#[command(about = "Strongbox - Client-held encrypted vault")]
#[command(version)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long)]
    verbose: bool,

    /// Directory holding the vault records.
    #[arg(short, long, default_value = ".strongbox")]
    store: PathBuf,

    /// JSON settings file (KDF parameters, salt length, record keys).
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// KDF strength for new vaults: "interactive", "moderate", or "sensitive".
    #[arg(long)]
    strength: Option<String>,

    /// Fall back to an in-memory vault if the store directory is unusable.
    #[arg(long)]
    ephemeral: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the vault, or check that the passphrase unlocks it.
    Init,

    /// Show whether a vault exists and its key-derivation parameters.
    Status,

    /// Replace the vault contents with a file (or stdin).
    Put {
        /// Source file; reads stdin when omitted.
        #[arg(short, long)]
        file: Option<PathBuf>,
    },

    /// Print the vault contents.
    Show,

    /// Encrypt text under the vault key and print the envelope JSON.
    Encrypt {
        /// Text to encrypt.
        #[arg(short, long)]
        text: String,
    },

    /// Decrypt an envelope JSON produced by `encrypt`.
    Decrypt {
        /// Envelope JSON: {"iv": "...", "ct": "..."}.
        #[arg(short, long)]
        envelope: String,
    },

    /// Manage snapshots.
    #[command(subcommand)]
    Snapshot(SnapshotCommands),

    /// Change the vault passphrase.
    ChangePassphrase,

    /// Permanently delete the vault records.
    Clear {
        /// Confirm the deletion.
        #[arg(long)]
        yes: bool,
    },
}

#[derive(Subcommand)]
enum SnapshotCommands {
    /// Capture the current contents.
    Create {
        /// Snapshot name.
        #[arg(short, long)]
        name: String,
    },

    /// List snapshots, newest first.
    List,

    /// Make a snapshot the current contents.
    Restore {
        /// Snapshot id.
        #[arg(short, long)]
        id: String,

        /// Prompt for the passphrase in force when the snapshot was taken.
        #[arg(long)]
        old_passphrase: bool,
    },

    /// Delete a snapshot.
    Delete {
        /// Snapshot id.
        #[arg(short, long)]
        id: String,

        /// Confirm the deletion.
        #[arg(long)]
        yes: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let settings = load_settings(cli.config.as_deref(), cli.strength.as_deref())?;
    let store = open_store(&cli.store, cli.ephemeral)?;
    let session = VaultSession::new(store, &settings).context("Invalid vault settings")?;

    let result = match cli.command {
        Commands::Init => cmd_init(&session).await,
        Commands::Status => cmd_status(&session).await,
        Commands::Put { file } => cmd_put(&session, file.as_deref()).await,
        Commands::Show => cmd_show(&session).await,
        Commands::Encrypt { text } => cmd_encrypt(&session, &text).await,
        Commands::Decrypt { envelope } => cmd_decrypt(&session, &envelope).await,
        Commands::Snapshot(command) => cmd_snapshot(&session, command).await,
        Commands::ChangePassphrase => cmd_change_passphrase(&session).await,
        Commands::Clear { yes } => cmd_clear(&session, yes).await,
    };

    session.lock();
    result
}

/// Resolve settings from an optional file and strength override.
fn load_settings(config: Option<&Path>, strength: Option<&str>) -> Result<VaultSettings> {
    let mut settings = match config {
        Some(path) => VaultSettings::load(path).context("Failed to load settings")?,
        None => VaultSettings::default(),
    };

    if let Some(strength) = strength {
        settings.kdf = KdfParams::preset(strength).ok_or_else(|| {
            anyhow::anyhow!("Invalid strength. Use: interactive, moderate, or sensitive")
        })?;
    }

    Ok(settings)
}

/// Open the directory store, optionally degrading to memory.
fn open_store(path: &Path, ephemeral: bool) -> Result<Arc<dyn KeyValueStore>> {
    let registry = create_default_registry();
    let config = serde_json::json!({ "root": path.to_string_lossy() });

    let store = if ephemeral {
        registry.resolve_or_memory("local", config)
    } else {
        registry.resolve("local", config)
    };

    store.with_context(|| format!("Cannot open vault store at {}", path.display()))
}

/// Prompt for passphrase securely.
fn prompt_passphrase(prompt: &str) -> Result<Zeroizing<String>> {
    let passphrase = rpassword::prompt_password(prompt).context("Failed to read passphrase")?;
    Ok(Zeroizing::new(passphrase))
}

/// Unlock the vault, asking for confirmation when it is about to be created.
async fn unlock(session: &VaultSession) -> Result<()> {
    if session.has_vault().await {
        let passphrase = prompt_passphrase("Enter passphrase: ")?;
        session
            .init(passphrase.as_bytes())
            .await
            .context("Failed to unlock vault")?;
        return Ok(());
    }

    info!("No vault found, creating a new one");
    let passphrase = prompt_passphrase("New passphrase: ")?;
    let confirm = prompt_passphrase("Confirm passphrase: ")?;
    if passphrase.as_str() != confirm.as_str() {
        anyhow::bail!("Passphrases do not match");
    }
    if passphrase.is_empty() {
        anyhow::bail!("Passphrase cannot be empty");
    }

    session
        .init(passphrase.as_bytes())
        .await
        .context("Failed to create vault")?;
    Ok(())
}

async fn cmd_init(session: &VaultSession) -> Result<()> {
    let existed = session.has_vault().await;
    unlock(session).await?;

    if existed {
        println!("Vault unlocked successfully.");
    } else {
        println!("Vault created successfully!");
    }
    Ok(())
}

async fn cmd_status(session: &VaultSession) -> Result<()> {
    let store = session.cipher_store();

    match store.inspect_meta().await {
        Ok(meta) => {
            println!("Vault metadata:");
            println!("  Version: {}", meta.version);
            println!("  Salt: {} bytes", meta.salt.len());
            println!("  Iterations: {}", meta.params.iterations);
            println!("  Memory: {} KiB", meta.params.memory_cost);
            println!("  Parallelism: {}", meta.params.parallelism);
        }
        Err(reason) => println!("Vault metadata: {}", reason),
    }

    match store.inspect_cipher().await {
        Ok(envelope) => println!("Payload: {} bytes encrypted", envelope.ciphertext.len()),
        Err(reason) => println!("Payload: {}", reason),
    }

    println!("Initialized: {}", session.has_vault().await);
    println!("Snapshots: {}", session.snapshots().list().await.len());
    Ok(())
}

async fn cmd_put(session: &VaultSession, file: Option<&Path>) -> Result<()> {
    let content = Zeroizing::new(match file {
        Some(path) => tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?,
        None => {
            let mut buf = Vec::new();
            std::io::stdin()
                .read_to_end(&mut buf)
                .context("Failed to read stdin")?;
            buf
        }
    });

    unlock(session).await?;
    session
        .write_payload(&content)
        .await
        .context("Failed to store vault contents")?;

    println!("Vault contents updated ({} bytes)", content.len());
    Ok(())
}

async fn cmd_show(session: &VaultSession) -> Result<()> {
    unlock(session).await?;
    let payload = session
        .read_payload()
        .await
        .context("Failed to read vault contents")?;

    println!("{}", String::from_utf8_lossy(payload.as_bytes()));
    Ok(())
}

async fn cmd_encrypt(session: &VaultSession, text: &str) -> Result<()> {
    unlock(session).await?;
    let envelope = session
        .encrypt(text.as_bytes())
        .await
        .context("Encryption failed")?;

    println!("{}", encode_envelope(&envelope)?);
    Ok(())
}

async fn cmd_decrypt(session: &VaultSession, json: &str) -> Result<()> {
    let envelope = decode_envelope(json)
        .map_err(|reason| anyhow::anyhow!("Invalid envelope: {}", reason))?;

    unlock(session).await?;
    let plaintext = session
        .decrypt(&envelope)
        .await
        .context("Decryption failed")?;

    println!("{}", String::from_utf8_lossy(plaintext.as_bytes()));
    Ok(())
}

async fn cmd_snapshot(session: &VaultSession, command: SnapshotCommands) -> Result<()> {
    match command {
        SnapshotCommands::Create { name } => {
            unlock(session).await?;
            let snapshot = session
                .capture_snapshot(name)
                .await
                .context("Failed to capture snapshot")?;
            println!("Snapshot created: {} ({})", snapshot.id, snapshot.name);
        }

        SnapshotCommands::List => {
            let snapshots = session.snapshots().list().await;
            if snapshots.is_empty() {
                println!("No snapshots.");
            }
            for snapshot in snapshots {
                println!(
                    "  {}  {}  {}",
                    snapshot.id,
                    snapshot.created_at.format("%Y-%m-%d %H:%M:%S"),
                    snapshot.name
                );
            }
        }

        SnapshotCommands::Restore { id, old_passphrase } => {
            unlock(session).await?;
            if old_passphrase {
                let passphrase = prompt_passphrase("Passphrase at snapshot time: ")?;
                session
                    .restore_snapshot_with_passphrase(&id, passphrase.as_bytes())
                    .await
                    .context("Failed to restore snapshot")?;
            } else {
                session
                    .restore_snapshot(&id)
                    .await
                    .context("Failed to restore snapshot")?;
            }
            println!("Snapshot restored: {}", id);
        }

        SnapshotCommands::Delete { id, yes } => {
            let deleted = session
                .snapshots()
                .delete(&id, Confirmation::from_flag(yes))
                .await
                .context("Failed to delete snapshot (pass --yes to confirm)")?;
            if deleted {
                println!("Snapshot deleted: {}", id);
            } else {
                println!("No snapshot with id {}", id);
            }
        }
    }

    Ok(())
}

async fn cmd_change_passphrase(session: &VaultSession) -> Result<()> {
    info!("Changing vault passphrase");

    if !session.has_vault().await {
        anyhow::bail!("No vault to change; run `strongbox init` first");
    }

    let current = prompt_passphrase("Enter current passphrase: ")?;
    let new = prompt_passphrase("Enter new passphrase: ")?;
    let confirm = prompt_passphrase("Confirm new passphrase: ")?;

    if new.as_str() != confirm.as_str() {
        anyhow::bail!("New passphrases do not match");
    }
    if new.is_empty() {
        anyhow::bail!("Passphrase cannot be empty");
    }

    session
        .init(current.as_bytes())
        .await
        .context("Failed to unlock vault")?;
    session
        .change_passphrase(current.as_bytes(), new.as_bytes())
        .await
        .context("Failed to change passphrase")?;

    println!("Passphrase changed successfully!");
    Ok(())
}

async fn cmd_clear(session: &VaultSession, yes: bool) -> Result<()> {
    if !yes {
        anyhow::bail!("Clearing the vault is irreversible; pass --yes to confirm");
    }

    session
        .clear(Confirmation::Confirmed)
        .await
        .context("Failed to clear vault")?;

    println!("Vault cleared.");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_settings_strength_override() {
        let settings = load_settings(None, Some("moderate")).unwrap();
        assert_eq!(settings.kdf, KdfParams::moderate());
        assert!(load_settings(None, Some("extreme")).is_err());
    }

    #[test]
    fn test_open_store_creates_directory() {
        let temp = tempfile::TempDir::new().unwrap();
        let dir = temp.path().join("vault");
        let store = open_store(&dir, false).unwrap();
        assert_eq!(store.name(), "local");
        assert!(dir.is_dir());
    }

    #[test]
    fn test_open_store_ephemeral_fallback() {
        let temp = tempfile::TempDir::new().unwrap();
        let file = temp.path().join("not-a-dir");
        std::fs::write(&file, b"x").unwrap();

        assert!(open_store(&file, false).is_err());
        assert_eq!(open_store(&file, true).unwrap().name(), "memory");
    }

    #[test]
    fn test_cli_parses_snapshot_delete() {
        let cli = Cli::try_parse_from([
            "strongbox", "--store", "/tmp/v", "snapshot", "delete", "--id", "abc", "--yes",
        ])
        .unwrap();
        assert!(matches!(
            cli.command,
            Commands::Snapshot(SnapshotCommands::Delete { yes: true, .. })
        ));
    }
}
