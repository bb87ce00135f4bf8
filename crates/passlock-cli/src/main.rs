use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use passlock_core::paths::{settings_path, SETTINGS_FILE};
use passlock_core::policy::strength;
use passlock_core::session::format_remaining;
use passlock_core::{
    CommitOutcome, Draft, HttpVaultApi, ItemFilter, ItemMetadata, Passlock, PasslockSettings,
    SecretPayload, VaultError, VaultStatus,
};
use std::path::PathBuf;
use tracing::debug;

#[derive(Parser)]
#[command(name = "passlock")]
#[command(about = "Zero-knowledge password vault client", long_about = None)]
struct Cli {
    /// Directory holding settings.json (defaults to the platform data dir)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the vault and choose a master password
    Init,

    /// Show whether the vault exists
    Status,

    /// List items (metadata only, no unlock needed)
    List {
        #[arg(long)]
        folder: Option<String>,
        #[arg(long)]
        favorite: Option<bool>,
        /// Case-insensitive match on name, username, URL or folder
        #[arg(short, long)]
        search: Option<String>,
    },

    /// Add an item; its password is prompted for
    Add {
        name: String,
        #[arg(short, long)]
        username: Option<String>,
        #[arg(long)]
        url: Option<String>,
        #[arg(long)]
        folder: Option<String>,
        #[arg(long)]
        favorite: bool,
        #[arg(short, long, default_value = "")]
        notes: String,
    },

    /// Decrypt and print an item
    Show {
        id: String,
        /// Print the password instead of masking it
        #[arg(long)]
        reveal: bool,
    },

    /// Replace an item's password (and optionally notes)
    SetSecret {
        id: String,
        #[arg(short, long)]
        notes: Option<String>,
    },

    /// Delete an item
    Rm { id: String },

    /// Change the master password
    Passwd,
}

fn user_error(err: VaultError) -> anyhow::Error {
    debug!(error = ?err, "vault operation failed");
    anyhow!(err.user_message())
}

fn prompt(label: &str) -> Result<String> {
    Ok(rpassword::prompt_password(label)?)
}

fn load_settings(data_dir: Option<PathBuf>) -> Result<PasslockSettings> {
    let path = match data_dir {
        Some(dir) => dir.join(SETTINGS_FILE),
        None => settings_path()?,
    };
    PasslockSettings::load(&path).map_err(user_error)
}

async fn unlock(vault: &Passlock<HttpVaultApi>) -> Result<()> {
    let master = prompt("Master password: ")?;
    vault.unlock(&master).await.map_err(user_error)?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let settings = load_settings(cli.data_dir)?;
    let vault = Passlock::from_settings(&settings).map_err(user_error)?;

    match cli.command {
        Commands::Init => {
            let master = prompt("New master password: ")?;
            let rating = strength(&master);
            println!("Strength: {} ({}/4)", rating.label, rating.score);
            let confirm = prompt("Confirm master password: ")?;
            vault.setup(&master, &confirm).await.map_err(user_error)?;
            println!("Vault created.");
        }

        Commands::Status => {
            let status = vault.status().await.map_err(user_error)?;
            let label = match status {
                VaultStatus::Uninitialised => "not initialised",
                VaultStatus::Locked => "locked",
                VaultStatus::Unlocked => "unlocked",
            };
            println!("Vault: {label}");
            println!("Server: {}", settings.api.base_url);
            println!(
                "Auto-lock: idle {}, absolute {}",
                format_remaining(settings.session_config().idle_timeout),
                format_remaining(settings.session_config().absolute_timeout)
            );
        }

        Commands::List {
            folder,
            favorite,
            search,
        } => {
            let filter = ItemFilter {
                folder,
                favorite,
                query: search,
            };
            let items = vault
                .list_items(&filter)
                .await
                .map_err(user_error)?;
            for item in items {
                println!(
                    "{}  {}{}  {}  {}",
                    item.id,
                    if item.meta.favorite { "* " } else { "" },
                    item.meta.name,
                    item.meta.username.as_deref().unwrap_or("-"),
                    item.meta.folder.as_deref().unwrap_or("-"),
                );
            }
        }

        Commands::Add {
            name,
            username,
            url,
            folder,
            favorite,
            notes,
        } => {
            unlock(&vault).await?;
            let password = prompt("Item password: ")?;
            let draft = Draft {
                meta: ItemMetadata {
                    name,
                    username,
                    url,
                    folder,
                    favorite,
                },
                secret: SecretPayload::new(password, notes),
            };
            let item = vault.create_item(&draft).await.map_err(user_error)?;
            println!("Created {}", item.id);
        }

        Commands::Show { id, reveal } => {
            unlock(&vault).await?;
            let (item, secret) = vault.fetch_and_open(&id).await.map_err(user_error)?;
            println!("Name:     {}", item.meta.name);
            println!("Username: {}", item.meta.username.as_deref().unwrap_or(""));
            println!("URL:      {}", item.meta.url.as_deref().unwrap_or(""));
            println!("Folder:   {}", item.meta.folder.as_deref().unwrap_or(""));
            if reveal {
                println!("Password: {}", secret.password);
            } else {
                println!("Password: {}", "*".repeat(secret.password.chars().count().min(12)));
            }
            if !secret.notes.is_empty() {
                println!("Notes:\n{}", secret.notes);
            }
            vault.lock();
        }

        Commands::SetSecret { id, notes } => {
            unlock(&vault).await?;
            vault.open_for_edit(&id).await.map_err(user_error)?;
            let password = prompt("New item password: ")?;
            vault
                .reconciler()
                .edit(&id, |draft| {
                    draft.secret.password = password;
                    if let Some(notes) = notes {
                        draft.secret.notes = notes;
                    }
                })
                .map_err(user_error)?;
            match vault.reconciler().flush(&id).await.map_err(user_error)? {
                CommitOutcome::Committed => println!("Saved."),
                CommitOutcome::Skipped => println!("No changes."),
                other => return Err(anyhow!("not saved ({other:?})")),
            }
            vault.lock();
        }

        Commands::Rm { id } => {
            unlock(&vault).await?;
            vault.delete_item(&id).await.map_err(user_error)?;
            println!("Deleted {id}");
        }

        Commands::Passwd => {
            let current = prompt("Current master password: ")?;
            vault.unlock(&current).await.map_err(user_error)?;
            let new = prompt("New master password: ")?;
            let confirm = prompt("Confirm new master password: ")?;
            let meta = vault
                .change_master_password(&current, &new, &confirm)
                .await
                .map_err(user_error)?;
            println!("Master password changed (vault version {}).", meta.version);
        }
    }

    Ok(())
}
