use std::io::Write;
use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::Serialize;
use tcam_network::firmware::{FirmwareFile, Package, Progress, Status, UpdateConfig};
use tcam_network::upload_firmware;
use tracing::{info, warn};

use crate::common::{self, NetOpts, Target};

#[derive(Serialize)]
struct UploadResponse {
    mac: String,
    file: String,
    status: i32,
    description: &'static str,
}

/// Print the camera models a GigE3 package has entries for.
pub fn list_models(path: &Path, json: bool) -> Result<()> {
    let file = FirmwareFile::load(path)?;
    let package = Package::load(&file).with_context(|| format!("read package {}", path.display()))?;
    let models: Vec<String> = package.model_names().map(|m| m.to_string()).collect();
    if json {
        return common::print_json(&models);
    }
    println!("{} (firmware version {})", path.display(), package.firmware_version);
    for model in models {
        println!("  {model}");
    }
    Ok(())
}

pub async fn run(
    net: &NetOpts,
    target: &Target,
    path: &Path,
    model: Option<&str>,
    json: bool,
) -> Result<()> {
    let file = FirmwareFile::load(path)?;
    let mut camera = common::select_camera(net, target).await?;
    if !camera.is_reachable() {
        warn!(mac = %camera.mac(), "camera is outside the interface subnet; the upload will likely fail");
    }
    info!(mac = %camera.mac(), file = %path.display(), "uploading firmware");

    let mut last = None;
    let mut report = |percent: u32, stage: &str| {
        if json || last == Some(percent) {
            return;
        }
        last = Some(percent);
        if stage.is_empty() {
            eprint!("\r{percent:3}%");
        } else {
            eprint!("\r{percent:3}% {stage:<32}");
        }
        let _ = std::io::stderr().flush();
    };
    let mut progress = Progress::new(&mut report);
    let result = upload_firmware(
        &mut camera,
        &file,
        model.unwrap_or_default(),
        &mut progress,
        &UpdateConfig::default(),
    )
    .await;
    if !json {
        eprintln!();
    }

    let status = Status::from(&result);
    if json {
        common::print_json(&UploadResponse {
            mac: camera.mac().to_string(),
            file: file.name().to_string(),
            status: status.code(),
            description: status.description(),
        })?;
    } else {
        println!("{}: {}", camera.mac(), status.description());
    }
    if let Err(err) = result {
        bail!("firmware upload failed: {err}");
    }
    Ok(())
}
