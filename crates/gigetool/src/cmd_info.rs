use anyhow::{Context, Result};
use serde::Serialize;
use tracing::info;

use crate::cmd_list::DeviceEntry;
use crate::common::{self, NetOpts, Target};

#[derive(Serialize)]
struct InfoResponse {
    #[serde(flatten)]
    device: DeviceEntry,
    vendor: String,
    dhcp: bool,
    static_ip: bool,
    persistent_ip: String,
    persistent_subnet: String,
    persistent_gateway: String,
}

pub async fn run(net: &NetOpts, target: &Target, json: bool) -> Result<()> {
    let mut camera = common::select_camera(net, target).await?;
    info!(mac = %camera.mac(), "reading camera settings");

    let device = DeviceEntry::from(&camera);
    let vendor = camera.vendor_name().to_string();
    let dhcp = camera.is_dhcp_active().await.context("read DHCP state")?;
    let static_ip = camera
        .is_static_ip_active()
        .await
        .context("read static IP state")?;
    let persistent_ip = camera.persistent_ip().await.context("read persistent IP")?;
    let persistent_subnet = camera
        .persistent_subnet()
        .await
        .context("read persistent subnet")?;
    let persistent_gateway = camera
        .persistent_gateway()
        .await
        .context("read persistent gateway")?;

    let response = InfoResponse {
        device,
        vendor,
        dhcp,
        static_ip,
        persistent_ip: persistent_ip.to_string(),
        persistent_subnet: persistent_subnet.to_string(),
        persistent_gateway: persistent_gateway.to_string(),
    };
    if json {
        return common::print_json(&response);
    }

    let d = &response.device;
    println!("Model:              {}", d.model);
    println!("Vendor:             {}", response.vendor);
    println!("Serial:             {}", d.serial);
    println!("MAC:                {}", d.mac);
    println!("Firmware:           {}", d.firmware);
    println!("User defined name:  {}", d.name);
    println!("Interface:          {}", d.interface);
    println!("Current IP:         {} / {} via {}", d.ip, d.subnet, d.gateway);
    println!(
        "Persistent IP:      {} / {} via {}",
        response.persistent_ip, response.persistent_subnet, response.persistent_gateway
    );
    println!("DHCP:               {}", on_off(response.dhcp));
    println!("Static IP:          {}", on_off(response.static_ip));
    Ok(())
}

fn on_off(value: bool) -> &'static str {
    if value {
        "on"
    } else {
        "off"
    }
}
