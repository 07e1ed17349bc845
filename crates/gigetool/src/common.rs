use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use clap::Args;
use serde::Serialize;
use tcam_network::codec::MacAddr;
use tcam_network::gige::{
    discover_cameras, discover_cameras_on, find_camera, is_rp_filter_active, Camera, CameraIdent,
    ControlConfig,
};
use tracing::{debug, warn};

pub const DEFAULT_RECV_TIMEOUT_MS: u64 = 1500;

/// Options shared by every command that talks to the network.
#[derive(Args, Debug, Clone)]
pub struct NetOpts {
    /// Restrict discovery to these interfaces (repeatable)
    #[arg(long = "iface", global = true)]
    pub interfaces: Vec<String>,
    /// Per-receive timeout in milliseconds
    #[arg(long, global = true, default_value_t = DEFAULT_RECV_TIMEOUT_MS)]
    pub timeout_ms: u64,
    /// Sends per request before giving up
    #[arg(long, global = true)]
    pub retries: Option<usize>,
}

impl NetOpts {
    pub fn control_config(&self) -> ControlConfig {
        let mut config = ControlConfig {
            recv_timeout: Duration::from_millis(self.timeout_ms),
            ..ControlConfig::default()
        };
        if let Some(retries) = self.retries {
            config.retries = retries.max(1);
        }
        config
    }
}

/// Which camera a command addresses.
#[derive(Args, Debug, Clone, Default)]
#[group(multiple = false)]
pub struct Target {
    /// Serial number
    #[arg(long)]
    pub serial: Option<String>,
    /// User defined name
    #[arg(long)]
    pub name: Option<String>,
    /// MAC address (aa:bb:cc:dd:ee:ff)
    #[arg(long)]
    pub mac: Option<MacAddr>,
}

impl Target {
    fn ident(&self) -> Result<(String, CameraIdent)> {
        match (&self.serial, &self.name, &self.mac) {
            (Some(serial), None, None) => Ok((serial.clone(), CameraIdent::Serial)),
            (None, Some(name), None) => Ok((name.clone(), CameraIdent::Name)),
            (None, None, Some(mac)) => Ok((mac.to_string(), CameraIdent::Mac)),
            _ => bail!("select a camera with exactly one of --serial, --name or --mac"),
        }
    }
}

pub async fn discover_devices(net: &NetOpts) -> Vec<Camera> {
    warn_if_rp_filter();
    let config = net.control_config();
    let mut cameras = Vec::new();
    if net.interfaces.is_empty() {
        discover_cameras(&config, |cam| cameras.push(cam)).await;
    } else {
        discover_cameras_on(&net.interfaces, &config, |cam| cameras.push(cam)).await;
    }
    debug!(count = cameras.len(), "discovery finished");
    cameras
}

/// Discover and pick the camera named by `target`.
pub async fn select_camera(net: &NetOpts, target: &Target) -> Result<Camera> {
    let (identifier, ident) = target.ident()?;
    let cameras = discover_devices(net).await;
    let mac = find_camera(&cameras, &identifier, ident)
        .map(Camera::mac)
        .ok_or_else(|| anyhow!("no camera matches {identifier}"))?;
    cameras
        .into_iter()
        .find(|cam| cam.mac() == mac)
        .context("camera vanished from discovery list")
}

fn warn_if_rp_filter() {
    if is_rp_filter_active() {
        warn!("reverse path filtering is active; cameras in foreign subnets may not be discovered");
    }
}

pub fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let text = serde_json::to_string_pretty(value).context("serialise JSON output")?;
    println!("{text}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_requires_single_identifier() {
        let target = Target {
            serial: Some("123".into()),
            ..Target::default()
        };
        let (id, ident) = target.ident().expect("ident");
        assert_eq!((id.as_str(), ident), ("123", CameraIdent::Serial));

        let both = Target {
            serial: Some("123".into()),
            name: Some("cam".into()),
            mac: None,
        };
        assert!(both.ident().is_err());
        assert!(Target::default().ident().is_err());
    }

    #[test]
    fn retries_are_at_least_one() {
        let net = NetOpts {
            interfaces: vec![],
            timeout_ms: 200,
            retries: Some(0),
        };
        let config = net.control_config();
        assert_eq!(config.retries, 1);
        assert_eq!(config.recv_timeout, Duration::from_millis(200));
    }
}
