//! Result vocabulary of a firmware update.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::writer::AccessError;

/// Successful end state of an update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Written and the device accepted the reboot command.
    Success,
    /// Written, but the device must be power-cycled or reconnected.
    DisconnectRequired,
    /// The device already runs the packaged configuration.
    NoActionRequired,
}

#[derive(Debug, Error)]
pub enum FirmwareError {
    #[error("unable to upgrade firmware for this device")]
    DeviceNotRecognized,
    #[error("the device only accepts plain .fw files")]
    DeviceSupportsFwOnly,
    #[error("invalid firmware file: {0}")]
    InvalidFile(String),
    #[error("the package contains no firmware for model '{0}'")]
    NoMatchFoundInPackage(String),
    #[error("write rejected: {0}")]
    WriteError(#[source] AccessError),
    #[error("verification failed at {address:#010x}")]
    VerificationFailed { address: u32 },
    #[error("unable to lock the device: {0}")]
    DeviceAccessFailed(String),
    #[error("MachXO2 update failed: {0}")]
    MachXO2UpdateFailed(String),
    #[error("unable to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl FirmwareError {
    pub(crate) fn invalid(reason: impl Into<String>) -> Self {
        FirmwareError::InvalidFile(reason.into())
    }
}

/// Closed status view with stable numeric codes.
///
/// Non-negative codes are successes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum Status {
    Success = 0,
    SuccessDisconnectRequired = 1,
    SuccessNoActionRequired = 2,
    DeviceNotRecognized = -1,
    DeviceSupportsFwOnly = -2,
    InvalidFile = -3,
    NoMatchFoundInPackage = -4,
    WriteError = -5,
    WriteVerificationError = -6,
    DeviceAccessFailed = -7,
    MachXO2UpdateFailed = -10,
}

impl Status {
    pub fn code(self) -> i32 {
        self as i32
    }

    pub fn succeeded(self) -> bool {
        self.code() >= 0
    }

    /// Operator-facing description.
    pub fn description(self) -> &'static str {
        match self {
            Status::Success => "firmware updated",
            Status::SuccessDisconnectRequired => {
                "firmware updated, disconnect and reconnect the device"
            }
            Status::SuccessNoActionRequired => "device already up to date",
            Status::DeviceNotRecognized => "device not recognized",
            Status::DeviceSupportsFwOnly => "device only accepts plain .fw files",
            Status::InvalidFile => "invalid firmware file",
            Status::NoMatchFoundInPackage => "no matching firmware in package",
            Status::WriteError => "the firmware could not be written",
            Status::WriteVerificationError => {
                "verification failed, the device is probably in a broken state"
            }
            Status::DeviceAccessFailed => "failed to lock the device",
            Status::MachXO2UpdateFailed => "failed to update the MachXO2 configuration",
        }
    }
}

impl From<Outcome> for Status {
    fn from(outcome: Outcome) -> Self {
        match outcome {
            Outcome::Success => Status::Success,
            Outcome::DisconnectRequired => Status::SuccessDisconnectRequired,
            Outcome::NoActionRequired => Status::SuccessNoActionRequired,
        }
    }
}

impl From<&FirmwareError> for Status {
    fn from(err: &FirmwareError) -> Self {
        match err {
            FirmwareError::DeviceNotRecognized => Status::DeviceNotRecognized,
            FirmwareError::DeviceSupportsFwOnly => Status::DeviceSupportsFwOnly,
            // An unreadable file is as unusable as a malformed one.
            FirmwareError::InvalidFile(_) | FirmwareError::Io { .. } => Status::InvalidFile,
            FirmwareError::NoMatchFoundInPackage(_) => Status::NoMatchFoundInPackage,
            FirmwareError::WriteError(_) => Status::WriteError,
            FirmwareError::VerificationFailed { .. } => Status::WriteVerificationError,
            FirmwareError::DeviceAccessFailed(_) => Status::DeviceAccessFailed,
            FirmwareError::MachXO2UpdateFailed(_) => Status::MachXO2UpdateFailed,
        }
    }
}

impl From<&Result<Outcome, FirmwareError>> for Status {
    fn from(result: &Result<Outcome, FirmwareError>) -> Self {
        match result {
            Ok(outcome) => (*outcome).into(),
            Err(err) => err.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(Status::Success.code(), 0);
        assert_eq!(Status::SuccessNoActionRequired.code(), 2);
        assert_eq!(Status::WriteVerificationError.code(), -6);
        assert_eq!(Status::MachXO2UpdateFailed.code(), -10);
        assert!(Status::SuccessDisconnectRequired.succeeded());
        assert!(!Status::DeviceAccessFailed.succeeded());
    }

    #[test]
    fn errors_map_onto_status() {
        let err = FirmwareError::VerificationFailed { address: 0xEE00_0000 };
        assert_eq!(Status::from(&err), Status::WriteVerificationError);
        let io = FirmwareError::Io {
            path: "missing.fw".into(),
            source: io::Error::from(io::ErrorKind::NotFound),
        };
        assert_eq!(Status::from(&io), Status::InvalidFile);
        let ok: Result<Outcome, FirmwareError> = Ok(Outcome::DisconnectRequired);
        assert_eq!(Status::from(&ok), Status::SuccessDisconnectRequired);
    }
}
