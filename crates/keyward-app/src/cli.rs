use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "keyward", about = "Keyward — a passphrase-protected secrets vault")]
pub struct Cli {
    /// Path to config file
    #[arg(long)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create a new vault
    Init {
        /// Protect the vault with a passphrase right away
        #[arg(long)]
        protect: bool,
    },

    /// Print the protection state as JSON
    Status,

    /// Store an entry
    Put {
        #[arg(long)]
        key: String,
        #[arg(long)]
        value: String,
    },

    /// Print an entry
    Get {
        #[arg(long)]
        key: String,
    },

    /// List entry keys
    List,

    /// Remove an entry
    Remove {
        #[arg(long)]
        key: String,
    },

    /// Set, change or remove the vault passphrase
    Passphrase,

    /// Manage unlocking through the OS secret store
    Bypass {
        #[command(subcommand)]
        action: BypassAction,
    },

    /// Unlock the vault and acknowledge pending passphrase changes
    Unlock {
        /// Use the secret store instead of prompting
        #[arg(long)]
        bypass: bool,
    },
}

#[derive(Subcommand)]
pub enum BypassAction {
    /// Mirror the passphrase into the secret store and enroll this device
    Enable,
    /// Clear this device's enrollment
    Disable,
}
