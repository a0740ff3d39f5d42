use chrono::DateTime;
use libbeacon::types::{AccountInfo, AppMetadata, Network, PeerInfo, PermissionInfo, PermissionScope};
use prettytable::format::{LinePosition, LineSeparator, TableFormat};
use prettytable::{row, Table};
use qrcode::render::unicode;
use qrcode::QrCode;

fn markdown_format() -> TableFormat {
    prettytable::format::FormatBuilder::new()
        .column_separator('|')
        .borders('|')
        .separator(LinePosition::Title, LineSeparator::new('-', '|', '|', '|'))
        .padding(1, 1)
        .build()
}

fn markdown_table() -> Table {
    let mut table = Table::new();
    table.set_format(markdown_format());
    table
}

fn format_time(millis: i64) -> String {
    DateTime::from_timestamp_millis(millis)
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| millis.to_string())
}

fn format_network(network: &Network) -> String {
    match &network.name {
        Some(name) => format!("{} ({name})", network.network_type),
        None => network.network_type.to_string(),
    }
}

fn format_scopes(scopes: &[PermissionScope]) -> String {
    scopes
        .iter()
        .map(|s| match s {
            PermissionScope::Sign => "sign",
            PermissionScope::OperationRequest => "operation_request",
            PermissionScope::Encrypt => "encrypt",
            PermissionScope::Threshold => "threshold",
        })
        .collect::<Vec<_>>()
        .join(", ")
}

pub fn peers_table(peers: &[PeerInfo]) -> String {
    let mut table = markdown_table();
    table.set_titles(row!["Name", "Public key", "Relay"]);
    for peer in peers {
        table.add_row(row![peer.name, peer.public_key, peer.relay_server]);
    }
    table.to_string()
}

pub fn permissions_table(permissions: &[PermissionInfo]) -> String {
    let mut table = markdown_table();
    table.set_titles(row!["Account", "dApp", "Address", "Network", "Scopes", "Granted"]);
    for p in permissions {
        table.add_row(row![
            p.account_identifier,
            p.app_metadata.name,
            p.address,
            format_network(&p.network),
            format_scopes(&p.scopes),
            format_time(p.connected_at)
        ]);
    }
    table.to_string()
}

pub fn apps_table(apps: &[AppMetadata]) -> String {
    let mut table = markdown_table();
    table.set_titles(row!["Name", "Sender id", "Icon"]);
    for app in apps {
        table.add_row(row![app.name, app.sender_id, app.icon.as_deref().unwrap_or("-")]);
    }
    table.to_string()
}

pub fn accounts_table(accounts: &[AccountInfo], active: Option<&str>) -> String {
    let mut table = markdown_table();
    table.set_titles(row!["", "Account", "Address", "Network", "Scopes", "Wallet", "Connected"]);
    for a in accounts {
        let marker = if active == Some(a.account_identifier.as_str()) { "*" } else { "" };
        table.add_row(row![
            marker,
            a.account_identifier,
            a.address,
            format_network(&a.network),
            format_scopes(&a.scopes),
            a.origin.id,
            format_time(a.connected_at)
        ]);
    }
    table.to_string()
}

/// Renders the pairing payload as a terminal QR code. Returns an empty string if the payload is too long to encode.
pub fn pairing_qr_code(payload: &str) -> String {
    QrCode::new(payload)
        .map(|code| {
            code.render::<unicode::Dense1x2>()
                .dark_color(unicode::Dense1x2::Dark)
                .light_color(unicode::Dense1x2::Light)
                .quiet_zone(true)
                .build()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod test {
    use super::*;
    use libbeacon::types::{ConnectionContext, NetworkType, Origin};

    #[test]
    fn tables_list_every_row() {
        let peers = vec![
            PeerInfo { name: "Wallet A".into(), public_key: "aa".into(), relay_server: "ws://r".into(), icon: None },
            PeerInfo { name: "Wallet B".into(), public_key: "bb".into(), relay_server: "ws://r".into(), icon: None },
        ];
        let out = peers_table(&peers);
        assert!(out.contains("Wallet A"));
        assert!(out.contains("Wallet B"));
        assert!(out.contains("Public key"));
    }

    #[test]
    fn active_account_is_marked() {
        let account = AccountInfo {
            account_identifier: "acc1".into(),
            sender_id: "wallet".into(),
            origin: ConnectionContext::new(Origin::P2p, "wallet-key"),
            address: "tz1abc".into(),
            public_key: "pk".into(),
            network: Network::custom("local", "http://localhost:8732"),
            scopes: PermissionScope::defaults(),
            connected_at: 0,
        };
        let out = accounts_table(&[account], Some("acc1"));
        assert!(out.contains("| * "));
        assert!(out.contains("custom (local)"));
        assert!(out.contains("operation_request, sign"));
        assert!(out.contains("1970-01-01 00:00:00"));
    }

    #[test]
    fn networks_and_times() {
        assert_eq!(format_network(&Network::new(NetworkType::Ghostnet)), "ghostnet");
        assert_eq!(format_time(1_700_000_000_000), "2023-11-14 22:13:20");
    }

    #[test]
    fn qr_codes_render_as_text() {
        let qr = pairing_qr_code("2bXMQLHcJLdw3kxQ");
        assert!(qr.lines().count() > 10);
    }
}
