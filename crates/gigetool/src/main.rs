use std::net::Ipv4Addr;
use std::path::PathBuf;

use anyhow::Result;
use clap::{ArgAction, Parser, Subcommand};
use tcam_network::codec::MacAddr;
use tracing_subscriber::EnvFilter;

use gigetool::cmd_set::SetArgs;
use gigetool::common::{NetOpts, Target};
use gigetool::{cmd_forceip, cmd_info, cmd_list, cmd_rescue, cmd_set, cmd_upload};

#[derive(Parser, Debug)]
#[command(name = "gigetool", version, about = "GigE Vision camera configuration")]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,
    /// Output JSON where applicable
    #[arg(long, global = true)]
    json: bool,
    #[command(flatten)]
    net: NetOpts,
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Discover cameras on all interfaces
    List,
    /// Show identity and IP settings of one camera
    Info {
        #[command(flatten)]
        target: Target,
    },
    /// Change persistent settings of one camera
    Set {
        #[command(flatten)]
        target: Target,
        #[command(flatten)]
        args: SetArgs,
    },
    /// Assign a temporary IP address (Force-IP)
    Forceip {
        #[command(flatten)]
        target: Target,
        #[arg(long)]
        ip: Option<Ipv4Addr>,
        #[arg(long)]
        subnet: Option<Ipv4Addr>,
        #[arg(long, default_value_t = Ipv4Addr::UNSPECIFIED)]
        gateway: Ipv4Addr,
        /// Let the camera restart its own IP configuration instead
        #[arg(long, conflicts_with_all = ["ip", "subnet"])]
        reset: bool,
    },
    /// Force an IP onto a camera by MAC without discovering it first
    Rescue {
        #[arg(long)]
        mac: MacAddr,
        #[arg(long)]
        ip: Ipv4Addr,
        #[arg(long)]
        subnet: Ipv4Addr,
        #[arg(long, default_value_t = Ipv4Addr::UNSPECIFIED)]
        gateway: Ipv4Addr,
    },
    /// Upload a .fw image or .fwpack package
    Upload {
        /// Firmware file
        file: PathBuf,
        /// Only list the models a .fwpack package contains
        #[arg(long)]
        list_models: bool,
        /// Model name used for the package lookup instead of the reported one
        #[arg(long)]
        model: Option<String>,
        #[command(flatten)]
        target: Target,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let Cli {
        verbose,
        json,
        net,
        cmd,
    } = Cli::parse();

    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| level.into()),
        ))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cmd {
        Cmd::List => cmd_list::run(&net, json).await?,
        Cmd::Info { target } => cmd_info::run(&net, &target, json).await?,
        Cmd::Set { target, args } => cmd_set::run(&net, &target, &args, json).await?,
        Cmd::Forceip {
            target,
            ip,
            subnet,
            gateway,
            reset,
        } => cmd_forceip::run(&net, &target, ip, subnet, gateway, reset, json).await?,
        Cmd::Rescue {
            mac,
            ip,
            subnet,
            gateway,
        } => cmd_rescue::run(&net, mac, ip, subnet, gateway, json).await?,
        Cmd::Upload {
            file,
            list_models,
            model,
            target,
        } => {
            if list_models {
                cmd_upload::list_models(&file, json)?
            } else {
                cmd_upload::run(&net, &target, &file, model.as_deref(), json).await?
            }
        }
    };

    Ok(())
}
