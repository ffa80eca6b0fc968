use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "devvm",
    version,
    about = "Provision a local development VM with cloud-init"
)]
pub struct Cli {
    /// Path to settings file [default: <config dir>/devvm/settings.toml]
    #[arg(long, global = true)]
    pub settings: Option<PathBuf>,

    /// Show debug logs on stderr
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// No step output; only the final result
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create the guest, or finish a previous run, and print its SSH stanza
    Provision {
        /// Guest name [default: the most recently provisioned guest]
        name: Option<String>,

        /// Git personal access token [default: the one on record]
        token: Option<String>,

        /// QEMU CPU model
        #[arg(long, env = "VM_CPU")]
        cpu: Option<String>,

        /// QEMU accelerator (kvm, tcg, ...)
        #[arg(long, env = "VM_ACCEL")]
        accel: Option<String>,

        /// Number of vCPUs; memory scales with it
        #[arg(long, env = "VM_CORES")]
        cores: Option<u32>,

        /// Disk size, e.g. 40G. Only applies before the disk is built
        #[arg(long)]
        disk_size: Option<String>,
    },

    /// Print a guest's record
    Show {
        /// Guest name [default: the most recently provisioned guest]
        name: Option<String>,
    },

    /// Manage the shared base image cache
    Image {
        #[command(subcommand)]
        action: ImageCommand,
    },
}

#[derive(Subcommand, Debug)]
pub enum ImageCommand {
    /// List cached base images
    List,

    /// Delete one cached image (as shown by `list`)
    Delete {
        /// `<distro>-<version>/<file>`
        name: String,
    },

    /// Delete every cached image
    Clear,
}
