//! `manifest.xml` driven firmware packages.
//!
//! A manifest names the device ports a camera exposes and, per camera model,
//! the ordered upload groups to send through them:
//!
//! ```xml
//! <FirmwarePackage FirmwareVersion="3" ManifestVersion="1">
//!   <DevicePorts>
//!     <DevicePort Name="Flash" Type="Flash">
//!       <PortConfiguration EraseAddress="0xEF000008" UnlockCode="0xA35FB241"
//!         UnlockAddress="0xEF000000" BlockSize="0x10000" Length="0x800000"
//!         BaseAddress="0xEC000000"/>
//!     </DevicePort>
//!   </DevicePorts>
//!   <DeviceTypes>
//!     <DeviceType Name="DFK 33GX264">
//!       <UploadGroup Name="Firmware" Destination="Flash"
//!         VersionCheckRegister="0x18" Version="3">
//!         <Upload File="app.bin" Offset="0x100000"/>
//!       </UploadGroup>
//!     </DeviceType>
//!   </DeviceTypes>
//! </FirmwarePackage>
//! ```
//!
//! The whole manifest is validated before any device access.

use std::collections::BTreeMap;

use tracing::debug;

use super::flash::FlashPort;
use super::machxo2;
use crate::config::UpdateConfig;
use crate::file::{Archive, FirmwareFile};
use crate::progress::Progress;
use crate::status::{FirmwareError, Outcome};
use crate::writer::FirmwareWriter;
use crate::xml::{parse_number, Element};

const MANIFEST: &str = "manifest.xml";
const MAX_MANIFEST_VERSION: u32 = 1;

/// One payload and its port-specific parameters (such as `Offset`).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadItem {
    pub data: Vec<u8>,
    pub params: BTreeMap<String, u32>,
}

impl UploadItem {
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            data,
            params: BTreeMap::new(),
        }
    }

    pub fn param(&self, key: &str) -> Option<u32> {
        self.params.get(key).copied()
    }
}

#[derive(Debug, Clone)]
pub struct UploadGroup {
    pub name: String,
    /// Index into [`Package::ports`].
    pub port: usize,
    pub version_check_register: u32,
    pub version: u32,
    pub items: Vec<UploadItem>,
}

#[derive(Debug, Clone)]
pub enum PortKind {
    Flash(FlashPort),
    MachXO2,
}

#[derive(Debug, Clone)]
pub struct DevicePort {
    pub name: String,
    pub kind: PortKind,
}

impl DevicePort {
    /// Largest payload the port can take, where it has a fixed size.
    fn capacity(&self) -> Option<u32> {
        match &self.kind {
            PortKind::Flash(flash) => Some(flash.length),
            PortKind::MachXO2 => None,
        }
    }

    fn check_items(&self, items: &[UploadItem]) -> Result<(), FirmwareError> {
        match &self.kind {
            PortKind::Flash(flash) => flash.check_items(items),
            PortKind::MachXO2 => machxo2::check_items(items),
        }
    }

    pub(crate) async fn upload<W>(
        &self,
        dev: &mut W,
        items: &[UploadItem],
        progress: &mut Progress<'_>,
        config: &UpdateConfig,
    ) -> Result<Outcome, FirmwareError>
    where
        W: FirmwareWriter + ?Sized,
    {
        match &self.kind {
            PortKind::Flash(flash) => flash.upload(dev, items, progress).await,
            PortKind::MachXO2 => machxo2::upload(dev, items, progress, config).await,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Package {
    pub firmware_version: u32,
    pub manifest_version: u32,
    pub ports: Vec<DevicePort>,
    device_types: BTreeMap<String, Vec<UploadGroup>>,
}

impl Package {
    pub fn load(file: &FirmwareFile) -> Result<Self, FirmwareError> {
        let mut archive = file.archive()?;
        let manifest = archive
            .read_text(MANIFEST)?
            .ok_or_else(|| FirmwareError::invalid("package has no manifest.xml"))?;
        Self::parse(&manifest, &mut archive)
    }

    pub(crate) fn parse(manifest: &str, archive: &mut Archive<'_>) -> Result<Self, FirmwareError> {
        let root = Element::parse(manifest)?;
        if root.name != "FirmwarePackage" {
            return Err(FirmwareError::invalid("manifest root is not <FirmwarePackage>"));
        }
        let firmware_version = root
            .number_attr("FirmwareVersion")
            .filter(|v| *v > 0)
            .ok_or_else(|| FirmwareError::invalid("missing or zero FirmwareVersion"))?;
        let manifest_version = match root.attr("ManifestVersion") {
            Some(text) => parse_number(text)
                .ok_or_else(|| FirmwareError::invalid("malformed ManifestVersion"))?,
            None => 0,
        };
        if manifest_version > MAX_MANIFEST_VERSION {
            return Err(FirmwareError::invalid(format!(
                "unsupported manifest version {manifest_version}"
            )));
        }

        let ports = read_ports(&root)?;
        let mut device_types = BTreeMap::new();
        for device_type in root
            .child("DeviceTypes")
            .into_iter()
            .flat_map(|types| types.children_named("DeviceType"))
        {
            let model = device_type
                .attr("Name")
                .ok_or_else(|| FirmwareError::invalid("DeviceType without Name"))?;
            let groups = device_type
                .children_named("UploadGroup")
                .map(|group| read_group(group, &ports, archive))
                .collect::<Result<Vec<_>, _>>()?;
            debug!(model, groups = groups.len(), "manifest device type");
            device_types.insert(model.to_string(), groups);
        }

        Ok(Self {
            firmware_version,
            manifest_version,
            ports,
            device_types,
        })
    }

    /// Models the package carries firmware for.
    pub fn model_names(&self) -> impl Iterator<Item = &str> {
        self.device_types.keys().map(String::as_str)
    }

    pub fn upload_groups(&self, model: &str) -> Option<&[UploadGroup]> {
        self.device_types.get(model).map(Vec::as_slice)
    }
}

fn read_ports(root: &Element) -> Result<Vec<DevicePort>, FirmwareError> {
    let mut ports = Vec::new();
    for port in root
        .child("DevicePorts")
        .into_iter()
        .flat_map(|ports| ports.children_named("DevicePort"))
    {
        let (Some(name), Some(kind), Some(config)) =
            (port.attr("Name"), port.attr("Type"), port.child("PortConfiguration"))
        else {
            return Err(FirmwareError::invalid(
                "DevicePort needs Name, Type and PortConfiguration",
            ));
        };
        let kind = match kind {
            "Flash" => PortKind::Flash(FlashPort::configure(config)?),
            "MachXO2" => PortKind::MachXO2,
            other => {
                return Err(FirmwareError::invalid(format!("unknown port type '{other}'")));
            }
        };
        ports.push(DevicePort {
            name: name.to_string(),
            kind,
        });
    }
    Ok(ports)
}

fn read_group(
    element: &Element,
    ports: &[DevicePort],
    archive: &mut Archive<'_>,
) -> Result<UploadGroup, FirmwareError> {
    let (Some(name), Some(destination)) = (element.attr("Name"), element.attr("Destination"))
    else {
        return Err(FirmwareError::invalid("UploadGroup needs Name and Destination"));
    };
    let port = ports
        .iter()
        .position(|p| p.name == destination)
        .ok_or_else(|| FirmwareError::invalid(format!("unknown destination port '{destination}'")))?;
    let version_check_register = element
        .number_attr("VersionCheckRegister")
        .ok_or_else(|| FirmwareError::invalid(format!("group '{name}' lacks VersionCheckRegister")))?;
    let version = element
        .number_attr("Version")
        .ok_or_else(|| FirmwareError::invalid(format!("group '{name}' lacks Version")))?;

    let items = element
        .children_named("Upload")
        .map(|item| read_item(item, ports[port].capacity(), archive))
        .collect::<Result<Vec<_>, _>>()?;
    ports[port].check_items(&items)?;

    Ok(UploadGroup {
        name: name.to_string(),
        port,
        version_check_register,
        version,
        items,
    })
}

fn read_item(
    element: &Element,
    capacity: Option<u32>,
    archive: &mut Archive<'_>,
) -> Result<UploadItem, FirmwareError> {
    let mut data: Option<Vec<u8>> = None;
    let mut params = BTreeMap::new();

    for (key, value) in element.attrs() {
        let source = match key {
            "File" => Some(archive.require(value)?),
            "String" => Some(value.as_bytes().to_vec()),
            "U32" => {
                let word = parse_number(value)
                    .ok_or_else(|| FirmwareError::invalid(format!("malformed U32 '{value}'")))?;
                Some(word.to_le_bytes().to_vec())
            }
            _ => {
                let number = parse_number(value).ok_or_else(|| {
                    FirmwareError::invalid(format!("parameter {key}='{value}' is not a number"))
                })?;
                params.insert(key.to_string(), number);
                None
            }
        };
        if let Some(source) = source {
            if data.replace(source).is_some() {
                return Err(FirmwareError::invalid("Upload has more than one data source"));
            }
        }
    }

    let mut data = data.ok_or_else(|| FirmwareError::invalid("Upload without a data source"))?;
    if let Some(&len) = params.get("Length") {
        let limit = capacity.unwrap_or(data.len() as u32);
        if len > limit {
            return Err(FirmwareError::invalid(format!(
                "Length {len:#x} exceeds the {limit:#x} bytes the destination can take"
            )));
        }
        data.resize(len as usize, 0);
    }
    Ok(UploadItem { data, params })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::file::tests::package;

    pub(crate) const FLASH_PORT: &str = r#"<DevicePort Name="Flash" Type="Flash">
        <PortConfiguration EraseAddress="0xEF000008" UnlockCode="0xA35FB241"
          UnlockAddress="0xEF000000" BlockSize="0x1000" Length="0x100000"
          BaseAddress="0xEC000000"/>
      </DevicePort>"#;

    pub(crate) fn manifest(groups: &str) -> String {
        format!(
            r#"<FirmwarePackage FirmwareVersion="7" ManifestVersion="1">
              <DevicePorts>{FLASH_PORT}</DevicePorts>
              <DeviceTypes><DeviceType Name="DFK 33GX264">{groups}</DeviceType></DeviceTypes>
            </FirmwarePackage>"#
        )
    }

    fn load(manifest: &str) -> Result<Package, FirmwareError> {
        let file = package(&[("manifest.xml", manifest.as_bytes()), ("app.bin", &[9u8; 10])]);
        Package::load(&file)
    }

    #[test]
    fn parses_ports_groups_and_items() {
        let text = manifest(
            r#"<UploadGroup Name="Firmware" Destination="Flash" VersionCheckRegister="0x18" Version="12">
                 <Upload File="app.bin" Offset="0x100"/>
                 <Upload String="hello" Offset="0x2000" Length="8"/>
                 <Upload U32="0x11223344" Offset="4096"/>
               </UploadGroup>"#,
        );
        let pkg = load(&text).expect("manifest");
        assert_eq!(pkg.firmware_version, 7);
        assert_eq!(pkg.model_names().collect::<Vec<_>>(), vec!["DFK 33GX264"]);
        let groups = pkg.upload_groups("DFK 33GX264").expect("groups");
        assert_eq!(groups.len(), 1);
        let group = &groups[0];
        assert_eq!((group.version_check_register, group.version), (0x18, 12));
        assert_eq!(pkg.ports[group.port].name, "Flash");
        assert_eq!(group.items[0].data, vec![9u8; 10]);
        assert_eq!(group.items[0].param("Offset"), Some(0x100));
        assert_eq!(group.items[1].data, b"hello\0\0\0".to_vec());
        assert_eq!(group.items[2].data, vec![0x44, 0x33, 0x22, 0x11]);
        assert!(pkg.upload_groups("DFK 99").is_none());
    }

    #[test]
    fn rejects_malformed_manifests() {
        let group = |attrs: &str, item: &str| {
            manifest(&format!(
                r#"<UploadGroup Name="G" {attrs}><Upload {item}/></UploadGroup>"#
            ))
        };
        let good = r#"Destination="Flash" VersionCheckRegister="0x18" Version="1""#;
        let cases = [
            group(good, r#"File="app.bin""#),
            group(good, r#"File="app.bin" String="x" Offset="0""#),
            group(good, r#"File="missing.bin" Offset="0""#),
            group(good, r#"Offset="0""#),
            group(good, r#"U32="zz" Offset="0""#),
            group(good, r#"String="x" Offset="later""#),
            group(r#"Destination="Eeprom" VersionCheckRegister="0x18" Version="1""#, r#"String="x" Offset="0""#),
            group(r#"Destination="Flash" Version="1""#, r#"String="x" Offset="0""#),
            manifest("").replace(r#"FirmwareVersion="7""#, r#"FirmwareVersion="0""#),
            manifest("").replace(r#"ManifestVersion="1""#, r#"ManifestVersion="2""#),
            manifest("").replace(r#"Type="Flash""#, r#"Type="Eeprom""#),
            manifest("").replace(r#"BlockSize="0x1000""#, ""),
            "<Firmware/>".to_string(),
        ];
        for case in &cases {
            assert!(
                matches!(load(case), Err(FirmwareError::InvalidFile(_))),
                "accepted: {case}"
            );
        }
        assert!(load(&group(good, r#"String="x" Offset="0""#)).is_ok());
    }

    #[test]
    fn items_must_fit_the_flash_port() {
        let group = |item: &str| {
            manifest(&format!(
                r#"<UploadGroup Name="G" Destination="Flash" VersionCheckRegister="0x18" Version="1">
                     <Upload {item}/>
                   </UploadGroup>"#
            ))
        };
        for item in [
            r#"String="x" Offset="0xFFFFFFF0""#,
            r#"File="app.bin" Offset="0xFFFF8""#,
            r#"String="x" Offset="0x100000""#,
            r#"String="x" Offset="0" Length="0xFFFFFFFF""#,
            r#"String="x" Offset="0" Length="0x100001""#,
        ] {
            assert!(
                matches!(load(&group(item)), Err(FirmwareError::InvalidFile(_))),
                "accepted: {item}"
            );
        }
        let pkg = load(&group(r#"String="x" Offset="0xFF000" Length="0x1000""#)).expect("fits");
        let groups = pkg.upload_groups("DFK 33GX264").expect("groups");
        assert_eq!(groups[0].items[0].data.len(), 0x1000);
    }

    #[test]
    fn manifest_is_required() {
        let file = package(&[("index.xml", b"<firmwares/>")]);
        assert!(matches!(Package::load(&file), Err(FirmwareError::InvalidFile(_))));
    }
}
