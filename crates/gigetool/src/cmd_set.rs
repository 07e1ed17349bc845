use std::net::Ipv4Addr;

use anyhow::{bail, Context, Result};
use clap::Args;
use serde::Serialize;
use tcam_network::gige::verify_settings;
use tracing::{info, warn};

use crate::common::{self, NetOpts, Target};

/// Persistent settings to change; unset options are left alone.
#[derive(Args, Debug, Clone, Default)]
pub struct SetArgs {
    /// Persistent IP address
    #[arg(long)]
    pub ip: Option<Ipv4Addr>,
    /// Persistent subnet mask
    #[arg(long)]
    pub subnet: Option<Ipv4Addr>,
    /// Persistent default gateway
    #[arg(long)]
    pub gateway: Option<Ipv4Addr>,
    /// Enable or disable DHCP
    #[arg(long)]
    pub dhcp: Option<bool>,
    /// Enable or disable the persistent (static) IP
    #[arg(long = "static")]
    pub static_ip: Option<bool>,
    /// User defined name (at most 15 bytes are stored)
    #[arg(long)]
    pub user_name: Option<String>,
    /// Skip the local subnet plausibility check
    #[arg(long)]
    pub force: bool,
}

impl SetArgs {
    fn is_empty(&self) -> bool {
        self.ip.is_none()
            && self.subnet.is_none()
            && self.gateway.is_none()
            && self.dhcp.is_none()
            && self.static_ip.is_none()
            && self.user_name.is_none()
    }

    fn touches_address(&self) -> bool {
        self.ip.is_some() || self.subnet.is_some() || self.gateway.is_some()
    }
}

#[derive(Serialize, Default)]
struct SetResponse {
    mac: String,
    changed: Vec<&'static str>,
}

pub async fn run(net: &NetOpts, target: &Target, args: &SetArgs, json: bool) -> Result<()> {
    if args.is_empty() {
        bail!("nothing to set; pass at least one of --ip, --subnet, --gateway, --dhcp, --static, --user-name");
    }
    let mut camera = common::select_camera(net, target).await?;
    if !camera.is_reachable() {
        warn!(mac = %camera.mac(), ip = %camera.current_ip(), "camera is outside the interface subnet; writes may fail");
    }
    let mut response = SetResponse {
        mac: camera.mac().to_string(),
        ..SetResponse::default()
    };

    if args.touches_address() {
        let ip = match args.ip {
            Some(ip) => ip,
            None => camera.persistent_ip().await.context("read persistent IP")?,
        };
        let subnet = match args.subnet {
            Some(subnet) => subnet,
            None => camera
                .persistent_subnet()
                .await
                .context("read persistent subnet")?,
        };
        let gateway = match args.gateway {
            Some(gateway) => gateway,
            None => camera
                .persistent_gateway()
                .await
                .context("read persistent gateway")?,
        };
        if let Err(err) = verify_settings(ip, subnet, gateway) {
            if !args.force {
                return Err(err).context("refusing implausible IP settings (use --force to override)");
            }
            warn!(%err, "writing settings that fail the plausibility check");
        }
        info!(%ip, %subnet, %gateway, "writing persistent IP settings");
        if args.ip.is_some() {
            camera.set_persistent_ip(ip).await.context("write persistent IP")?;
            response.changed.push("ip");
        }
        if args.subnet.is_some() {
            camera
                .set_persistent_subnet(subnet)
                .await
                .context("write persistent subnet")?;
            response.changed.push("subnet");
        }
        if args.gateway.is_some() {
            camera
                .set_persistent_gateway(gateway)
                .await
                .context("write persistent gateway")?;
            response.changed.push("gateway");
        }
    }

    match (args.dhcp, args.static_ip) {
        (None, None) => {}
        (Some(dhcp), Some(static_ip)) => {
            camera
                .set_ip_config_state(dhcp, static_ip)
                .await
                .context("write IP configuration")?;
            response.changed.extend(["dhcp", "static"]);
        }
        (Some(dhcp), None) => {
            camera.set_dhcp_state(dhcp).await.context("write DHCP state")?;
            response.changed.push("dhcp");
        }
        (None, Some(static_ip)) => {
            camera
                .set_static_ip_state(static_ip)
                .await
                .context("write static IP state")?;
            response.changed.push("static");
        }
    }

    if let Some(name) = &args.user_name {
        camera
            .set_user_defined_name(name)
            .await
            .context("write user defined name")?;
        response.changed.push("name");
    }

    if json {
        common::print_json(&response)?;
    } else {
        println!("{}: updated {}", response.mac, response.changed.join(", "));
    }
    Ok(())
}
