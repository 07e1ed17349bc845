use std::net::Ipv4Addr;

use anyhow::{bail, Result};
use serde::Serialize;
use tcam_network::codec::MacAddr;
use tcam_network::gige::send_ip_recovery;
use tracing::info;

use crate::common::{self, NetOpts};

#[derive(Serialize)]
struct RescueResponse {
    sent: Vec<String>,
    failed: Vec<(String, String)>,
}

/// Broadcast a Force-IP for `mac` on every interface, without discovery.
pub async fn run(
    net: &NetOpts,
    mac: MacAddr,
    ip: Ipv4Addr,
    subnet: Ipv4Addr,
    gateway: Ipv4Addr,
    json: bool,
) -> Result<()> {
    let config = net.control_config();
    info!(%mac, %ip, %subnet, %gateway, "sending rescue");
    let summary = send_ip_recovery(mac, ip, subnet, gateway, &config).await;
    let response = RescueResponse {
        sent: summary.sent,
        failed: summary.failed,
    };

    if json {
        common::print_json(&response)?;
    } else {
        for name in &response.sent {
            println!("sent on {name}");
        }
        for (name, reason) in &response.failed {
            println!("failed on {name}: {reason}");
        }
    }
    if response.sent.is_empty() {
        bail!("rescue packet was not sent on any interface");
    }
    Ok(())
}
