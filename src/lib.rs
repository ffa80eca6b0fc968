#![allow(unused_assignments)] // thiserror/miette proc macros trigger false positives

pub mod backend;
pub mod cli;
pub mod cloudinit;
pub mod config;
pub mod error;
pub mod image;
pub mod logging;
pub mod paths;
pub mod ports;
pub mod preflight;
pub mod progress;
pub mod provision;
pub mod qemu_cmd;
pub mod record;
pub mod scripts;
pub mod sshkey;
pub mod util;
