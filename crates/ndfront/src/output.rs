use std::io::IsTerminal;

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use ndfront_frame::InterfaceInfo;
use serde::Serialize;

#[derive(Clone, Debug, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct InterfaceOutput {
    pub index: u32,
    pub name: String,
    pub running: bool,
    pub privacy: bool,
    pub hw_address: String,
    pub link_local: String,
}

impl InterfaceOutput {
    pub fn new(name: &str, info: &InterfaceInfo) -> Self {
        Self {
            index: info.if_index,
            name: name.to_string(),
            running: info.running,
            privacy: info.autoconf_privacy,
            hw_address: format_mac(&info.hw_address),
            link_local: if info.link_local.ip().is_unspecified() {
                "-".to_string()
            } else {
                format!("{}%{}", info.link_local.ip(), info.link_local.scope_id())
            },
        }
    }
}

pub fn print_interfaces(rows: &[InterfaceOutput], format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string(rows).unwrap_or_else(|_| "[]".to_string())
            );
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["INDEX", "NAME", "RUNNING", "PRIVACY", "HWADDR", "LINK-LOCAL"]);
            for row in rows {
                table.add_row(vec![
                    row.index.to_string(),
                    row.name.clone(),
                    yes_no(row.running).to_string(),
                    yes_no(row.privacy).to_string(),
                    row.hw_address.clone(),
                    row.link_local.clone(),
                ]);
            }
            println!("{table}");
        }
        OutputFormat::Pretty => {
            for row in rows {
                println!(
                    "{}: {} running={} privacy={} lladdr={} inet6={}",
                    row.index,
                    row.name,
                    yes_no(row.running),
                    yes_no(row.privacy),
                    row.hw_address,
                    row.link_local
                );
            }
        }
    }
}

fn yes_no(value: bool) -> &'static str {
    if value {
        "yes"
    } else {
        "no"
    }
}

pub fn format_mac(mac: &[u8; 6]) -> String {
    mac.iter()
        .map(|b| format!("{b:02x}"))
        .collect::<Vec<_>>()
        .join(":")
}

#[cfg(test)]
mod tests {
    use std::net::{Ipv6Addr, SocketAddrV6};

    use super::*;

    #[test]
    fn interface_row_formats_addresses() {
        let info = InterfaceInfo {
            if_index: 2,
            running: true,
            autoconf_privacy: false,
            hw_address: [0x52, 0x54, 0x00, 0xab, 0x0c, 0x01],
            link_local: SocketAddrV6::new("fe80::1".parse().unwrap(), 0, 0, 2),
        };
        let row = InterfaceOutput::new("eth0", &info);
        assert_eq!(row.hw_address, "52:54:00:ab:0c:01");
        assert_eq!(row.link_local, "fe80::1%2");

        let json = serde_json::to_value(&row).unwrap();
        assert_eq!(json["name"], "eth0");
        assert_eq!(json["running"], true);
    }

    #[test]
    fn missing_link_local_prints_placeholder() {
        let info = InterfaceInfo {
            if_index: 7,
            running: false,
            autoconf_privacy: true,
            hw_address: [0; 6],
            link_local: SocketAddrV6::new(Ipv6Addr::UNSPECIFIED, 0, 0, 0),
        };
        assert_eq!(InterfaceOutput::new("wg0", &info).link_local, "-");
    }
}
