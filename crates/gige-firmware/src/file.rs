//! Firmware images and `.fwpack` archives.

use std::collections::HashMap;
use std::io::{Cursor, Read};
use std::path::Path;

use tracing::{debug, trace};
use zip::result::ZipError;
use zip::ZipArchive;

use crate::status::FirmwareError;

const PACKAGE_SUFFIX: &str = ".fwpack";

/// A firmware file loaded into memory: either a raw `.fw` image or a zipped
/// `.fwpack` package, told apart by the file name.
#[derive(Debug, Clone)]
pub struct FirmwareFile {
    name: String,
    data: Vec<u8>,
}

impl FirmwareFile {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, FirmwareError> {
        let path = path.as_ref();
        let data = std::fs::read(path).map_err(|source| FirmwareError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        debug!(path = %path.display(), bytes = data.len(), "loaded firmware file");
        Ok(Self {
            name: path.to_string_lossy().into_owned(),
            data,
        })
    }

    pub fn from_bytes(name: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            data,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn is_package(&self) -> bool {
        self.name.ends_with(PACKAGE_SUFFIX)
    }

    /// Raw contents zero-padded to a multiple of 4 bytes.
    pub fn padded(&self) -> Vec<u8> {
        pad4(self.data.clone())
    }

    pub(crate) fn archive(&self) -> Result<Archive<'_>, FirmwareError> {
        let zip = ZipArchive::new(Cursor::new(self.data.as_slice()))
            .map_err(|err| FirmwareError::invalid(format!("{}: {err}", self.name)))?;
        Ok(Archive {
            zip,
            cache: HashMap::new(),
        })
    }
}

pub(crate) fn pad4(mut data: Vec<u8>) -> Vec<u8> {
    let padded = data.len().div_ceil(4) * 4;
    data.resize(padded, 0);
    data
}

/// Read access to the members of a `.fwpack`, caching extracted files.
pub(crate) struct Archive<'a> {
    zip: ZipArchive<Cursor<&'a [u8]>>,
    cache: HashMap<String, Vec<u8>>,
}

impl Archive<'_> {
    /// Member contents, `None` when the archive has no such member.
    pub fn read(&mut self, name: &str) -> Result<Option<Vec<u8>>, FirmwareError> {
        if let Some(cached) = self.cache.get(name) {
            return Ok(Some(cached.clone()));
        }
        let mut member = match self.zip.by_name(name) {
            Ok(member) => member,
            Err(ZipError::FileNotFound) => return Ok(None),
            Err(err) => return Err(FirmwareError::invalid(format!("{name}: {err}"))),
        };
        let mut data = Vec::with_capacity(member.size() as usize);
        member
            .read_to_end(&mut data)
            .map_err(|err| FirmwareError::invalid(format!("{name}: {err}")))?;
        drop(member);
        trace!(name, bytes = data.len(), "extracted package member");
        self.cache.insert(name.to_string(), data.clone());
        Ok(Some(data))
    }

    /// Member contents; a missing member makes the package invalid.
    pub fn require(&mut self, name: &str) -> Result<Vec<u8>, FirmwareError> {
        self.read(name)?
            .ok_or_else(|| FirmwareError::invalid(format!("package has no member '{name}'")))
    }

    pub fn read_text(&mut self, name: &str) -> Result<Option<String>, FirmwareError> {
        match self.read(name)? {
            Some(data) => String::from_utf8(data)
                .map(Some)
                .map_err(|_| FirmwareError::invalid(format!("{name} is not UTF-8"))),
            None => Ok(None),
        }
    }
}
