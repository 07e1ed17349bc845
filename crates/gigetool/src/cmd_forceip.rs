use std::net::Ipv4Addr;

use anyhow::{bail, Context, Result};
use serde::Serialize;
use tracing::info;

use crate::common::{self, NetOpts, Target};

#[derive(Serialize)]
struct ForceIpResponse {
    mac: String,
    ip: Ipv4Addr,
    subnet: Ipv4Addr,
    gateway: Ipv4Addr,
}

/// Assign a temporary address, or restart the device's IP configuration
/// when `reset` is set.
pub async fn run(
    net: &NetOpts,
    target: &Target,
    ip: Option<Ipv4Addr>,
    subnet: Option<Ipv4Addr>,
    gateway: Ipv4Addr,
    reset: bool,
    json: bool,
) -> Result<()> {
    let mut camera = common::select_camera(net, target).await?;
    if reset {
        info!(mac = %camera.mac(), "resetting IP configuration");
        camera.reset_ip().await.context("send IP reset")?;
        println!("{}: IP configuration restarted", camera.mac());
        return Ok(());
    }
    let (Some(ip), Some(subnet)) = (ip, subnet) else {
        bail!("--ip and --subnet are required unless --reset is given");
    };
    camera
        .force_ip(ip, subnet, gateway)
        .await
        .with_context(|| format!("force {ip} onto {}", camera.mac()))?;

    let response = ForceIpResponse {
        mac: camera.mac().to_string(),
        ip,
        subnet,
        gateway,
    };
    if json {
        common::print_json(&response)?;
    } else {
        println!("{}: now at {ip}/{subnet} via {gateway}", response.mac);
    }
    Ok(())
}
