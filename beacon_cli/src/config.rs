use beacon_transport::P2pRole;
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Beacon dApp/wallet messaging.
///
/// Inspect and manage a local Beacon client (identity, paired peers, permission grants, app metadata and accounts),
/// pair with a wallet, or run a relay node.
#[derive(Parser, Debug)]
#[command(version, about)]
pub struct Config {
    /// Path to the settings file. The default is `$HOME/.beacon/config.yml`.
    #[arg(long = "config-file", short = 'c')]
    pub config_file: Option<PathBuf>,
    /// Directory holding the client state. Overrides `storage_dir` from the settings file.
    #[arg(long = "storage-dir", short = 's', env = "BEACON_STORAGE_DIR")]
    pub storage_dir: Option<PathBuf>,
    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Debug, Subcommand)]
pub enum CliCommand {
    /// Show or reset the local client identity.
    #[command(subcommand, name = "id")]
    Id(IdCommand),
    /// List or forget paired peers.
    #[command(subcommand, name = "peers", alias = "peer")]
    Peers(PeersCommand),
    /// List or revoke the permissions this wallet has granted.
    #[command(subcommand, name = "permissions", alias = "perms")]
    Permissions(PermissionsCommand),
    /// List or forget the dApps this wallet has seen.
    #[command(subcommand, name = "apps", alias = "app")]
    Apps(AppsCommand),
    /// List the accounts wallets have granted to this dApp.
    #[command(subcommand, name = "accounts", alias = "account")]
    Accounts(AccountsCommand),
    /// Pair with a wallet through the relay, acting as a dApp.
    #[command(name = "pair")]
    Pair(PairCommand),
    /// Run a relay node.
    #[command(subcommand, name = "relay")]
    Relay(RelayCommand),
}

#[derive(Debug, Subcommand)]
pub enum IdCommand {
    /// Print the client identity, creating one if none exists.
    #[command(name = "show")]
    Show,
    /// Discard the identity. Every paired peer will have to pair again.
    #[command(name = "reset")]
    Reset {
        /// Confirms the reset. Without it nothing is changed.
        #[arg(long = "yes", short = 'y', default_value_t = false)]
        yes: bool,
    },
}

/// Which peer list to operate on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Role {
    /// Wallets this client paired with as a dApp.
    Dapp,
    /// dApps this client paired with as a wallet.
    Wallet,
}

impl From<Role> for P2pRole {
    fn from(value: Role) -> Self {
        match value {
            Role::Dapp => P2pRole::DApp,
            Role::Wallet => P2pRole::Wallet,
        }
    }
}

#[derive(Debug, Subcommand)]
pub enum PeersCommand {
    /// List paired peers.
    #[command(name = "list", alias = "ls")]
    List {
        #[arg(long, value_enum, default_value_t = Role::Dapp)]
        role: Role,
    },
    /// Forget a peer.
    #[command(name = "remove", alias = "rm")]
    Remove {
        /// The peer's public key.
        public_key: String,
        #[arg(long, value_enum, default_value_t = Role::Dapp)]
        role: Role,
    },
    /// Forget every peer.
    #[command(name = "clear")]
    Clear {
        #[arg(long, value_enum, default_value_t = Role::Dapp)]
        role: Role,
    },
}

#[derive(Debug, Subcommand)]
pub enum PermissionsCommand {
    /// List permission grants.
    #[command(name = "list", alias = "ls")]
    List,
    /// Revoke a grant.
    #[command(name = "remove", alias = "rm")]
    Remove {
        /// The account identifier of the grant.
        account_identifier: String,
    },
    /// Revoke every grant.
    #[command(name = "clear")]
    Clear,
}

#[derive(Debug, Subcommand)]
pub enum AppsCommand {
    /// List known dApps.
    #[command(name = "list", alias = "ls")]
    List,
    /// Forget a dApp.
    #[command(name = "remove", alias = "rm")]
    Remove {
        /// The dApp's sender id.
        sender_id: String,
    },
}

#[derive(Debug, Subcommand)]
pub enum AccountsCommand {
    /// List granted accounts. The active account is marked with `*`.
    #[command(name = "list", alias = "ls")]
    List,
}

#[derive(Debug, Args)]
pub struct PairCommand {
    /// The name shown to the wallet.
    #[arg(long = "name", short = 'n', default_value = "Beacon CLI")]
    pub name: String,
    /// The relay to pair through. Overrides `relay_url` from the settings file.
    #[arg(long = "relay", short = 'r')]
    pub relay_url: Option<String>,
    /// Encode the pairing payload as plain JSON instead of checksummed base58.
    #[arg(long = "json", default_value_t = false)]
    pub json: bool,
}

#[derive(Debug, Subcommand)]
pub enum RelayCommand {
    /// Accept relay connections until interrupted.
    #[command(name = "serve", alias = "start")]
    Serve {
        /// The address to listen on. Overrides `relay_listen_address` from the settings file.
        #[arg(long = "listen-address", short = 'a')]
        listen_address: Option<String>,
    },
}

pub struct GlobalOptions {
    pub config_file: Option<PathBuf>,
    pub storage_dir: Option<PathBuf>,
}

impl Config {
    pub fn to_parts(self) -> (GlobalOptions, CliCommand) {
        let global = GlobalOptions { config_file: self.config_file, storage_dir: self.storage_dir };
        (global, self.command)
    }
}
