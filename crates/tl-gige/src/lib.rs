//! GigE Vision control transport: discovery (GVCP), register/memory access
//! and IP (re)configuration.

pub mod camera;
pub mod discovery;
pub mod gvcp;
pub mod ipconfig;
pub mod nic;
pub mod socket;

pub use camera::{find_camera, Camera, CameraIdent};
pub use discovery::{
    discover, discover_cameras, discover_cameras_on, send_ip_recovery, DeviceTracker,
    RecoverySummary, TrackerEvent,
};
pub use gvcp::{consts, ControlConfig, Flow, GigeError, PacketHandler, Transport, GVCP_PORT};
pub use ipconfig::{verify_settings, SettingsError};
pub use nic::{detect_interfaces, find_interface_for_address, is_rp_filter_active, NetworkInterface};
pub use socket::UdpTransport;
