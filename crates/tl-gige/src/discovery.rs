//! Broadcast discovery, rescue Force-IP fan-out and device bookkeeping.

use std::collections::{BTreeMap, HashSet};
use std::net::Ipv4Addr;

use gvcp_codec::{decode_ack, Command, CommandFlags, DiscoveryAck, MacAddr, OpCode};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, info, trace, warn};

use crate::camera::Camera;
use crate::gvcp::{consts, ControlConfig, Flow, GigeError, Transport};
use crate::nic::{detect_interfaces, detect_interfaces_named, NetworkInterface};
use crate::socket::UdpTransport;

/// Discover devices on every usable interface.
///
/// One task per interface broadcasts a discovery request; `on_camera` runs on
/// the calling task for every answer, as answers arrive. Returns once every
/// interface has gone quiet. Duplicates seen on several interfaces are
/// reported once per interface.
pub async fn discover_cameras<F>(config: &ControlConfig, on_camera: F)
where
    F: FnMut(Camera),
{
    discover_on(detect_interfaces(), consts::BROADCAST, config, on_camera).await
}

/// Like [`discover_cameras`], restricted to the named interfaces.
pub async fn discover_cameras_on<F>(names: &[String], config: &ControlConfig, on_camera: F)
where
    F: FnMut(Camera),
{
    discover_on(
        detect_interfaces_named(names),
        consts::BROADCAST,
        config,
        on_camera,
    )
    .await
}

/// Collect every answering device.
pub async fn discover(config: &ControlConfig) -> Vec<Camera> {
    let mut cameras = Vec::new();
    discover_cameras(config, |cam| cameras.push(cam)).await;
    cameras
}

async fn discover_on<F>(
    interfaces: Vec<NetworkInterface>,
    destination: Ipv4Addr,
    config: &ControlConfig,
    mut on_camera: F,
) where
    F: FnMut(Camera),
{
    if interfaces.is_empty() {
        debug!("no usable interfaces; skipping discovery");
        return;
    }
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut join_set = JoinSet::new();
    for iface in interfaces {
        let tx = tx.clone();
        let config = config.clone();
        join_set.spawn(async move {
            let name = iface.name.clone();
            if let Err(err) = discover_interface(iface, destination, &config, &tx).await {
                warn!(interface = %name, %err, "discovery failed on interface");
            }
        });
    }
    drop(tx);

    while let Some(camera) = rx.recv().await {
        on_camera(camera);
    }
    while let Some(res) = join_set.join_next().await {
        if let Err(err) = res {
            warn!(?err, "discovery task aborted");
        }
    }
}

async fn discover_interface(
    iface: NetworkInterface,
    destination: Ipv4Addr,
    config: &ControlConfig,
    tx: &mpsc::UnboundedSender<Camera>,
) -> Result<(), GigeError> {
    let transport = UdpTransport::bind(iface.ip, config)?;
    let packet = Command::Discovery.encode(CommandFlags::ACK_REQUIRED, consts::DISCOVERY_REQUEST_ID);
    info!(interface = %iface.name, local = %iface.ip, dest = %destination, "sending GVCP discovery");

    let mut on_packet = |datagram: &[u8]| {
        let Some(ack) = parse_discovery_ack(datagram) else {
            return Flow::Continue;
        };
        trace!(interface = %iface.name, mac = %ack.mac, ip = %ack.current_ip, "parsed discovery ack");
        match UdpTransport::bind(iface.ip, config) {
            Ok(unicast) => {
                let camera = Camera::new(ack, iface.clone(), unicast, config.clone());
                let _ = tx.send(camera);
            }
            Err(err) => warn!(interface = %iface.name, %err, "unable to open device socket"),
        }
        Flow::Continue
    };
    transport
        .send_and_receive(destination, &packet, Some(&mut on_packet), true, None)
        .await
}

fn parse_discovery_ack(datagram: &[u8]) -> Option<DiscoveryAck> {
    let ack = match decode_ack(datagram) {
        Ok(ack) => ack,
        Err(err) => {
            trace!(%err, "ignoring undecodable datagram");
            return None;
        }
    };
    if ack.header.ack_id != consts::DISCOVERY_REQUEST_ID
        || ack.header.answer != OpCode::Discovery.ack_code()
        || !ack.header.status.is_success()
    {
        trace!(header = ?ack.header, "ignoring non-discovery acknowledgement");
        return None;
    }
    match ack.discovery() {
        Ok(info) => Some(info),
        Err(err) => {
            debug!(%err, "malformed discovery acknowledgement");
            None
        }
    }
}

/// Per-interface result of a rescue broadcast.
#[derive(Debug, Default, Clone)]
pub struct RecoverySummary {
    /// Interfaces the Force-IP packet went out on.
    pub sent: Vec<String>,
    /// Interfaces that failed, with the reason.
    pub failed: Vec<(String, String)>,
}

/// Broadcast a Force-IP for `mac` on every interface without prior discovery.
///
/// Used to rescue a device whose address is unreachable. Nothing waits for
/// an acknowledgement.
pub async fn send_ip_recovery(
    mac: MacAddr,
    ip: Ipv4Addr,
    subnet: Ipv4Addr,
    gateway: Ipv4Addr,
    config: &ControlConfig,
) -> RecoverySummary {
    recover_on(detect_interfaces(), consts::BROADCAST, mac, ip, subnet, gateway, config).await
}

async fn recover_on(
    interfaces: Vec<NetworkInterface>,
    destination: Ipv4Addr,
    mac: MacAddr,
    ip: Ipv4Addr,
    subnet: Ipv4Addr,
    gateway: Ipv4Addr,
    config: &ControlConfig,
) -> RecoverySummary {
    let command = Command::ForceIp {
        mac,
        ip,
        subnet,
        gateway,
    };
    let mut join_set = JoinSet::new();
    for iface in interfaces {
        let packet = command.encode(CommandFlags::ACK_REQUIRED, fastrand::u16(1..));
        let config = config.clone();
        join_set.spawn(async move {
            let result: Result<(), GigeError> = async {
                let transport = UdpTransport::bind(iface.ip, &config)?;
                info!(interface = %iface.name, %mac, %ip, "sending rescue Force-IP");
                transport
                    .send_and_receive(destination, &packet, None, true, None)
                    .await
            }
            .await;
            (iface.name, result)
        });
    }

    let mut summary = RecoverySummary::default();
    while let Some(res) = join_set.join_next().await {
        match res {
            Ok((name, Ok(()))) => summary.sent.push(name),
            Ok((name, Err(err))) => {
                warn!(interface = %name, %err, "rescue broadcast failed");
                summary.failed.push((name, err.to_string()));
            }
            Err(err) => warn!(?err, "rescue task aborted"),
        }
    }
    summary
}

/// Change reported by [`DeviceTracker::update`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackerEvent {
    Added(MacAddr),
    Removed(MacAddr),
}

/// Device list maintained across periodic discovery cycles, keyed by MAC.
///
/// A device that stops answering is dropped only after it has missed
/// `staleness_cycles` consecutive cycles.
pub struct DeviceTracker<T = UdpTransport> {
    devices: BTreeMap<MacAddr, Camera<T>>,
}

impl<T: Transport> Default for DeviceTracker<T> {
    fn default() -> Self {
        Self {
            devices: BTreeMap::new(),
        }
    }
}

impl<T: Transport> DeviceTracker<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold the answers of one discovery cycle into the list.
    pub fn update(&mut self, seen: Vec<Camera<T>>) -> Vec<TrackerEvent> {
        let mut events = Vec::new();
        let mut present = HashSet::new();
        for camera in seen {
            let mac = camera.mac();
            if !present.insert(mac) {
                continue;
            }
            match self.devices.get_mut(&mac) {
                Some(known) => {
                    known.update_from(camera.info().clone());
                    known.reset_counter();
                }
                None => {
                    debug!(%mac, "device appeared");
                    self.devices.insert(mac, camera);
                    events.push(TrackerEvent::Added(mac));
                }
            }
        }

        let mut gone = Vec::new();
        for (mac, camera) in self.devices.iter_mut() {
            if !present.contains(mac) && camera.reduce_counter() == 0 {
                gone.push(*mac);
            }
        }
        for mac in gone {
            debug!(%mac, "device lost");
            self.devices.remove(&mac);
            events.push(TrackerEvent::Removed(mac));
        }
        events
    }

    pub fn devices(&self) -> impl Iterator<Item = &Camera<T>> {
        self.devices.values()
    }

    pub fn get_mut(&mut self, mac: &MacAddr) -> Option<&mut Camera<T>> {
        self.devices.get_mut(mac)
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}
