use anyhow::Result;
use serde::Serialize;
use tcam_network::gige::Camera;
use tracing::info;

use crate::common::{self, NetOpts};

#[derive(Serialize)]
pub struct DeviceEntry {
    pub model: String,
    pub serial: String,
    pub mac: String,
    pub ip: String,
    pub subnet: String,
    pub gateway: String,
    pub name: String,
    pub firmware: String,
    pub interface: String,
    pub reachable: bool,
}

impl From<&Camera> for DeviceEntry {
    fn from(cam: &Camera) -> Self {
        Self {
            model: cam.model_name().to_string(),
            serial: cam.serial_number().to_string(),
            mac: cam.mac().to_string(),
            ip: cam.current_ip().to_string(),
            subnet: cam.current_subnet().to_string(),
            gateway: cam.current_gateway().to_string(),
            name: cam.user_defined_name().to_string(),
            firmware: cam.firmware_version().to_string(),
            interface: cam.interface_name().to_string(),
            reachable: cam.is_reachable(),
        }
    }
}

pub async fn run(net: &NetOpts, json: bool) -> Result<()> {
    let cameras = common::discover_devices(net).await;
    info!(count = cameras.len(), "discovered cameras");
    let entries: Vec<DeviceEntry> = cameras.iter().map(DeviceEntry::from).collect();

    if json {
        return common::print_json(&entries);
    }
    if entries.is_empty() {
        println!("No cameras discovered.");
        return Ok(());
    }

    println!(
        "{:<20} {:<10} {:<18} {:<16} {:<16} {}",
        "Model", "Serial", "MAC", "IP", "Name", "Interface"
    );
    for entry in &entries {
        let marker = if entry.reachable { "" } else { " (unreachable)" };
        println!(
            "{:<20} {:<10} {:<18} {:<16} {:<16} {}{marker}",
            entry.model, entry.serial, entry.mac, entry.ip, entry.name, entry.interface,
        );
    }
    Ok(())
}
