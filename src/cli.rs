use clap::{Parser, ValueEnum};
use std::path::PathBuf;

use crate::models::{Branch, TargetKind};

#[derive(Parser, Debug, Clone)]
#[command(
    name = "sentra",
    about = "Sentra - risk-scoring decision pipeline for URLs, messages and files",
    version
)]
pub struct Args {
    /// Target to scan: a URL, a message body, or a file SHA-256 hex digest
    #[arg(required_unless_present = "file", conflicts_with = "file")]
    pub target: Option<String>,

    /// What kind of target this is
    #[arg(short, long, default_value = "url")]
    pub kind: KindArg,

    /// Scan a local file by content: hashes it and scans the digest
    #[arg(short, long)]
    pub file: Option<PathBuf>,

    /// Reachability branch hint from the probing service (defaults to online)
    #[arg(short, long)]
    pub branch: Option<BranchArg>,

    /// Config snapshot JSON file (built-in defaults when omitted)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Write the full verdict as JSON to this file
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Enable verbose logging of all operations
    #[arg(short, long)]
    pub verbose: bool,

    /// Only log errors
    #[arg(short, long)]
    pub quiet: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum, PartialEq)]
pub enum KindArg {
    Url,
    Message,
    File,
}

impl From<KindArg> for TargetKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Url => TargetKind::Url,
            KindArg::Message => TargetKind::Message,
            KindArg::File => TargetKind::File,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum, PartialEq)]
pub enum BranchArg {
    Online,
    Offline,
    Parked,
    WafChallenge,
    Sinkhole,
}

impl From<BranchArg> for Branch {
    fn from(branch: BranchArg) -> Self {
        match branch {
            BranchArg::Online => Branch::Online,
            BranchArg::Offline => Branch::Offline,
            BranchArg::Parked => Branch::Parked,
            BranchArg::WafChallenge => Branch::WafChallenge,
            BranchArg::Sinkhole => Branch::Sinkhole,
        }
    }
}
