use anyhow::anyhow;
use beacon_cli::config::{
    AccountsCommand, AppsCommand, CliCommand, Config, GlobalOptions, IdCommand, PairCommand, PeersCommand,
    PermissionsCommand, RelayCommand, Role,
};
use beacon_cli::formatting::{accounts_table, apps_table, pairing_qr_code, peers_table, permissions_table};
use beacon_cli::settings::{default_settings_path, Settings};
use beacon_client::beacon_client::load_or_create_seed;
use beacon_client::{ClientConfig, DAppClient};
use beacon_transport::{P2pRole, Relay, RelayServer, WebSocketRelay};
use clap::Parser;
use libbeacon::crypto::{CryptoProvider, DefaultCrypto};
use libbeacon::managers::{AccountManager, AppMetadataManager, PeerManager, PermissionManager};
use libbeacon::storage::{load, FileStorage};
use libbeacon::{BeaconEvent, Storage, StorageKey, WireFormat};
use log::*;
use std::sync::Arc;

#[tokio::main]
async fn main() {
    env_logger::init();
    let config: Config = Config::parse();
    let (global_options, command) = config.to_parts();

    let result = match load_settings(&global_options) {
        Ok(settings) => match command {
            CliCommand::Id(cmd) => exec_id_command(cmd, &settings).await,
            CliCommand::Peers(cmd) => exec_peers_command(cmd, &settings).await,
            CliCommand::Permissions(cmd) => exec_permissions_command(cmd, &settings).await,
            CliCommand::Apps(cmd) => exec_apps_command(cmd, &settings).await,
            CliCommand::Accounts(cmd) => exec_accounts_command(cmd, &settings).await,
            CliCommand::Pair(cmd) => pair(cmd, &settings).await,
            CliCommand::Relay(cmd) => start_relay(cmd, &settings).await,
        },
        Err(err) => Err(err),
    };

    match result {
        Ok(()) => {
            println!("Bye :)")
        }
        Err(err) => {
            eprintln!("** Error ** \n {err}");
            std::process::exit(1);
        }
    }
}

fn load_settings(options: &GlobalOptions) -> Result<Settings, anyhow::Error> {
    let path = options.config_file.as_ref().cloned().unwrap_or_else(default_settings_path);
    info!("Loading settings from {}", path.to_str().unwrap_or("[invalid utf-8 path]"));
    let mut settings =
        Settings::load_or_default(&path).map_err(|err| anyhow!("Error reading configuration file: {err}"))?;
    if let Some(dir) = &options.storage_dir {
        settings.storage_dir = dir.clone();
    }
    Ok(settings)
}

fn open_storage(settings: &Settings) -> Result<Arc<dyn Storage>, anyhow::Error> {
    debug!("Using client state in {}", settings.storage_dir.to_str().unwrap_or("[invalid utf-8 path]"));
    Ok(Arc::new(FileStorage::new(&settings.storage_dir)?))
}

async fn exec_id_command(cmd: IdCommand, settings: &Settings) -> Result<(), anyhow::Error> {
    let storage = open_storage(settings)?;
    match cmd {
        IdCommand::Show => {
            let seed = load_or_create_seed(storage.as_ref()).await?;
            let crypto = DefaultCrypto;
            let public_key = crypto.keypair_from_seed(&seed).public_key_hex();
            println!("Beacon id:     {public_key}");
            println!("Address:       {}", crypto.address_from_public_key(&public_key)?);
            println!("Relay address: {}", crypto.public_key_hash(&public_key)?);
        }
        IdCommand::Reset { yes } => {
            if !yes {
                return Err(anyhow!("Refusing to discard the identity without --yes."));
            }
            if load::<String>(storage.as_ref(), StorageKey::BeaconSdkSecretSeed).await?.is_none() {
                println!("No identity to reset.");
                return Ok(());
            }
            storage.delete(StorageKey::BeaconSdkSecretSeed).await?;
            println!("Identity discarded. A new one is created on next use.");
        }
    }
    Ok(())
}

async fn exec_peers_command(cmd: PeersCommand, settings: &Settings) -> Result<(), anyhow::Error> {
    let storage = open_storage(settings)?;
    let manager = |role: P2pRole| PeerManager::new(Arc::clone(&storage), role.peers_key());
    match cmd {
        PeersCommand::List { role } => {
            let peers = manager(role.into()).get_peers().await?;
            println!("{} peers found.", peers.len());
            if !peers.is_empty() {
                println!("{}", peers_table(&peers));
            }
        }
        PeersCommand::Remove { public_key, role } => {
            let peers = manager(role.into());
            if !peers.has_peer(&public_key).await? {
                return Err(anyhow!("Peer {public_key} not found."));
            }
            peers.remove_peer(&public_key).await?;
            if role == Role::Dapp {
                AccountManager::new(Arc::clone(&storage)).remove_accounts_for_peers(&[public_key.clone()]).await?;
            }
            println!("Peer removed: {public_key}");
        }
        PeersCommand::Clear { role } => {
            manager(role.into()).remove_all_peers().await?;
            println!("All peers removed.");
        }
    }
    Ok(())
}

async fn exec_permissions_command(cmd: PermissionsCommand, settings: &Settings) -> Result<(), anyhow::Error> {
    let permissions = PermissionManager::new(open_storage(settings)?, Arc::new(DefaultCrypto));
    match cmd {
        PermissionsCommand::List => {
            let list = permissions.get_permissions().await?;
            println!("{} permissions found.", list.len());
            if !list.is_empty() {
                println!("{}", permissions_table(&list));
            }
        }
        PermissionsCommand::Remove { account_identifier } => {
            if permissions.get_permission(&account_identifier).await?.is_none() {
                return Err(anyhow!("No permission granted to {account_identifier}."));
            }
            permissions.remove_permission(&account_identifier).await?;
            println!("Permission revoked: {account_identifier}");
        }
        PermissionsCommand::Clear => {
            permissions.remove_all_permissions().await?;
            println!("All permissions revoked.");
        }
    }
    Ok(())
}

async fn exec_apps_command(cmd: AppsCommand, settings: &Settings) -> Result<(), anyhow::Error> {
    let apps = AppMetadataManager::new(open_storage(settings)?);
    match cmd {
        AppsCommand::List => {
            let list = apps.get_app_metadata_list().await?;
            println!("{} dApps found.", list.len());
            if !list.is_empty() {
                println!("{}", apps_table(&list));
            }
        }
        AppsCommand::Remove { sender_id } => {
            if apps.get_app_metadata(&sender_id).await?.is_none() {
                return Err(anyhow!("dApp {sender_id} not found."));
            }
            apps.remove_app_metadata(&sender_id).await?;
            println!("dApp removed: {sender_id}");
        }
    }
    Ok(())
}

async fn exec_accounts_command(cmd: AccountsCommand, settings: &Settings) -> Result<(), anyhow::Error> {
    let storage = open_storage(settings)?;
    match cmd {
        AccountsCommand::List => {
            let accounts = AccountManager::new(Arc::clone(&storage)).get_accounts().await?;
            let active = load::<String>(storage.as_ref(), StorageKey::ActiveAccount).await?;
            println!("{} accounts found.", accounts.len());
            if !accounts.is_empty() {
                println!("{}", accounts_table(&accounts, active.as_deref()));
            }
        }
    }
    Ok(())
}

async fn pair(cmd: PairCommand, settings: &Settings) -> Result<(), anyhow::Error> {
    let url = cmd.relay_url.unwrap_or_else(|| settings.relay_url.clone());
    info!("Connecting to relay at {url}");
    let relay: Arc<dyn Relay> = Arc::new(WebSocketRelay::connect(&url).await?);
    let format = if cmd.json { WireFormat::PlainJson } else { WireFormat::Checksum };
    let config = ClientConfig::new(cmd.name, open_storage(settings)?).with_relay(relay).with_wire_format(format);
    let dapp = DAppClient::new(config).await?;

    let mut events = dapp.events().subscribe();
    let printer = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            if let BeaconEvent::P2pListenForChannelOpen { pairing_request } = event {
                println!("Scan the code or paste the pairing request into your wallet:\n");
                println!("{}", pairing_qr_code(&pairing_request));
                println!("{pairing_request}\n");
                println!("Waiting for a wallet to connect...");
            }
        }
    });
    let connected = dapp.connect().await;
    printer.abort();
    connected?;

    let peers = dapp.get_peers().await?;
    println!("Connected to {} wallet(s).", peers.len());
    println!("{}", peers_table(&peers));
    Ok(())
}

async fn start_relay(cmd: RelayCommand, settings: &Settings) -> Result<(), anyhow::Error> {
    match cmd {
        RelayCommand::Serve { listen_address } => {
            let address = listen_address.unwrap_or_else(|| settings.relay_listen_address.clone());
            let server = RelayServer::bind(&address).await?;
            println!("Relay listening on ws://{}", server.local_addr()?);
            server.run().await?;
            info!("Relay has shut down.");
        }
    }
    Ok(())
}
