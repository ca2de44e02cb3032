//! Mesh directory CLI tools: snapshot inspection, address planning, beacon decoding.

#![forbid(unsafe_code)]

use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use mesh_common::DirectoryConfig;
use mesh_core::address::format_address;
use mesh_core::{RangeSet, SecureNetworkBeacon};
use mesh_directory::{allocation, MeshSnapshot, Provisioner};
use serde::Serialize;
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(name = "meshctl")]
#[command(about = "Mesh directory tools")]
struct Args {
    /// Directory configuration file (JSON)
    #[arg(short, long, global = true, env = "MESH_CONFIG")]
    config: Option<PathBuf>,

    /// Log level used when RUST_LOG is not set
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Summarize a directory snapshot
    Inspect {
        /// Snapshot file path
        #[arg(short, long)]
        snapshot: PathBuf,
    },

    /// Find the first free unicast address block for a new node
    NextAddress {
        /// Snapshot file path
        #[arg(short, long)]
        snapshot: PathBuf,

        /// Number of elements the node has
        #[arg(short, long, default_value_t = 1)]
        elements: u8,

        /// Provisioner whose ranges to search (defaults to the selected one)
        #[arg(short, long)]
        provisioner: Option<Uuid>,
    },

    /// Decode a hex-encoded Secure Network Beacon
    DecodeBeacon {
        /// Beacon bytes as hex, starting with the beacon type
        hex: String,
    },

    /// Show version information
    Version,
}

#[derive(Serialize)]
struct KeySummary {
    index: u16,
    name: String,
    phase: Option<String>,
    bound_net_key_index: Option<u16>,
}

#[derive(Serialize)]
struct ProvisionerSummary {
    uuid: Uuid,
    name: String,
    address: Option<String>,
    selected: bool,
    unicast_ranges: Vec<String>,
    group_ranges: Vec<String>,
    scene_ranges: Vec<String>,
}

#[derive(Serialize)]
struct SnapshotSummary {
    mesh_uuid: Uuid,
    mesh_name: String,
    schema: String,
    iv_index: u32,
    iv_update_active: bool,
    iv_recovery: bool,
    net_keys: Vec<KeySummary>,
    app_keys: Vec<KeySummary>,
    provisioners: Vec<ProvisionerSummary>,
    nodes: usize,
    excluded_addresses: usize,
    overlapping_provisioners: Vec<(Uuid, Uuid)>,
}

fn load_config(path: Option<&Path>) -> Result<DirectoryConfig> {
    let config = match path {
        Some(path) => DirectoryConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => DirectoryConfig::from_env()?,
    };
    debug!(?config, "configuration loaded");
    Ok(config)
}

fn load_snapshot(path: &Path) -> Result<MeshSnapshot> {
    MeshSnapshot::load(path).with_context(|| format!("reading snapshot {}", path.display()))
}

fn range_strings<K: mesh_core::RangeKind>(set: &RangeSet<K>) -> Vec<String> {
    set.iter().map(ToString::to_string).collect()
}

fn summarize(snapshot: &MeshSnapshot) -> SnapshotSummary {
    let selected = snapshot.selected_provisioner().map(Provisioner::uuid);

    let mut overlapping = Vec::new();
    for (i, a) in snapshot.provisioners.iter().enumerate() {
        for b in &snapshot.provisioners[i + 1..] {
            if a.has_overlap(b) {
                overlapping.push((a.uuid(), b.uuid()));
            }
        }
    }

    SnapshotSummary {
        mesh_uuid: snapshot.mesh_uuid,
        mesh_name: snapshot.mesh_name.clone(),
        schema: snapshot.schema.clone(),
        iv_index: snapshot.iv_index.index,
        iv_update_active: snapshot.iv_index.update_active,
        iv_recovery: snapshot.iv_index.recovery,
        net_keys: snapshot
            .net_keys
            .iter()
            .map(|k| KeySummary {
                index: k.index,
                name: k.name.clone(),
                phase: Some(k.phase.to_string()),
                bound_net_key_index: None,
            })
            .collect(),
        app_keys: snapshot
            .app_keys
            .iter()
            .map(|k| KeySummary {
                index: k.index,
                name: k.name.clone(),
                phase: None,
                bound_net_key_index: Some(k.bound_net_key_index),
            })
            .collect(),
        provisioners: snapshot
            .provisioners
            .iter()
            .map(|p| ProvisionerSummary {
                uuid: p.uuid(),
                name: p.name().to_string(),
                address: p.address().map(|a| format_address(a, true)),
                selected: Some(p.uuid()) == selected,
                unicast_ranges: range_strings(p.unicast_ranges()),
                group_ranges: range_strings(p.group_ranges()),
                scene_ranges: range_strings(p.scene_ranges()),
            })
            .collect(),
        nodes: snapshot.nodes.len(),
        excluded_addresses: snapshot
            .network_exclusions
            .blocked_addresses(snapshot.iv_index.index)
            .len(),
        overlapping_provisioners: overlapping,
    }
}

fn next_address(
    snapshot: &MeshSnapshot,
    config: &DirectoryConfig,
    elements: u8,
    provisioner: Option<Uuid>,
) -> Result<Option<u16>> {
    if elements == 0 {
        bail!("a node has at least one element");
    }

    let ranges = match provisioner {
        Some(uuid) => snapshot
            .provisioner(uuid)
            .map(|p| p.unicast_ranges().clone())
            .ok_or_else(|| anyhow!("provisioner {uuid} not found in snapshot"))?,
        None => match snapshot.selected_provisioner() {
            Some(p) => p.unicast_ranges().clone(),
            None => {
                warn!("snapshot has no provisioners, using the configured default range");
                RangeSet::single(config.default_unicast_range)
            }
        },
    };

    Ok(allocation::next_available_unicast_address(
        &ranges,
        &snapshot.occupied_addresses(),
        elements,
    ))
}

fn main() -> Result<()> {
    let args = Args::parse();
    mesh_common::init_tracing_with_default(&args.log_level);

    match args.command {
        Command::Inspect { snapshot } => {
            let snapshot = load_snapshot(&snapshot)?;
            let summary = summarize(&snapshot);
            if !summary.overlapping_provisioners.is_empty() {
                warn!(
                    pairs = summary.overlapping_provisioners.len(),
                    "snapshot contains overlapping provisioners"
                );
            }
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Command::NextAddress {
            snapshot,
            elements,
            provisioner,
        } => {
            let config = load_config(args.config.as_deref())?;
            let snapshot = load_snapshot(&snapshot)?;
            match next_address(&snapshot, &config, elements, provisioner)? {
                Some(address) => println!("{}", format_address(address, true)),
                None => bail!("no free block of {elements} unicast addresses"),
            }
        }
        Command::DecodeBeacon { hex } => {
            let beacon = SecureNetworkBeacon::from_hex(&hex)?;
            let decoded = serde_json::json!({
                "key_refresh": beacon.key_refresh(),
                "iv_update_active": beacon.iv_update_active(),
                "beacon": beacon,
            });
            println!("{}", serde_json::to_string_pretty(&decoded)?);
        }
        Command::Version => {
            println!("meshctl {}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
