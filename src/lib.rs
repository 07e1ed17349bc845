//! GigE Vision camera configuration.
//!
//! Re-exports the building blocks of the workspace:
//!
//! - [`codec`]: GVCP packet encode/decode,
//! - [`gige`]: interface enumeration, discovery, register/memory access and
//!   IP configuration,
//! - [`firmware`]: firmware upload state machines,
//!
//! and ties the last two together with [`upload_firmware`].
//!
//! ```no_run
//! use tcam_network::gige::{discover, ControlConfig};
//! use tcam_network::firmware::{FirmwareFile, Progress, UpdateConfig};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let mut cameras = discover(&ControlConfig::default()).await;
//! let file = FirmwareFile::load("DFK33GX264.fwpack")?;
//! let mut report = |percent: u32, stage: &str| println!("{percent:3}% {stage}");
//! if let Some(camera) = cameras.first_mut() {
//!     let outcome = tcam_network::upload_firmware(
//!         camera,
//!         &file,
//!         "",
//!         &mut Progress::new(&mut report),
//!         &UpdateConfig::default(),
//!     )
//!     .await?;
//!     println!("{outcome:?}");
//! }
//! # Ok(())
//! # }
//! ```

mod session;

pub use gige_firmware as firmware;
pub use gvcp_codec as codec;
pub use tl_gige as gige;

pub use session::{upload_firmware, CameraWriter};
