//! wavepoint diagnostic CLI
//!
//! Offline helpers around the debugger extension:
//! - check how a GPU breakpoint location is understood
//! - decode a captured agent → debugger notification stream
//! - print the loaded-segment table the agent published

use clap::{Parser, Subcommand};
use serde_json::json;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use wavepoint_common::protocol::{Notification, NOTIFICATION_PACKET_SIZE};
use wavepoint_common::{init_host_logging, init_logging};
use wavepoint_core::breakpoint::report::print_condition;
use wavepoint_core::segments::SegmentTranslator;
use wavepoint_core::{
    GpuBreakpoint, RequestLocation, RequestParser, SessionConfig, SysvSharedMemory,
};

#[derive(Parser, Debug)]
#[command(name = "wavepoint")]
#[command(about = "wavepoint - diagnostics for the GPU kernel debugger extension")]
#[command(version)]
struct Args {
    /// Session configuration (TOML); defaults apply when omitted
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Parse a GPU breakpoint location and print the resulting request
    ParseBreakpoint {
        /// Location as typed to the debugger, e.g. "rocm:vadd" or "rocm:k.cl:12"
        text: String,

        /// Condition, e.g. "if wg:0,0,0 wi:1,0,0"
        #[arg(long)]
        condition: Option<String>,

        /// File used when only a line number is given
        #[arg(long, default_value = "temp_source")]
        active_file: String,

        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// Decode a file of captured notification packets
    DecodeNotifications {
        /// Raw bytes read from the notification FIFO
        file: PathBuf,
    },

    /// Print the loaded-segment table from shared memory
    Loadmap,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => {
            let config = SessionConfig::from_file(path)?;
            init_logging(&config.logging);
            config
        }
        None => {
            init_host_logging();
            SessionConfig::default()
        }
    };
    debug!(target: "wavepoint_cli", command = ?args.command, "Starting");

    match args.command {
        Command::ParseBreakpoint {
            text,
            condition,
            active_file,
            json,
        } => parse_breakpoint(&config, &text, condition.as_deref(), &active_file, json)?,
        Command::DecodeNotifications { file } => decode_notifications(&file)?,
        Command::Loadmap => print_loadmap(&config)?,
    }
    Ok(())
}

fn parse_breakpoint(
    config: &SessionConfig,
    text: &str,
    condition: Option<&str>,
    active_file: &str,
    as_json: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let parser = RequestParser::new(&config.breakpoint_prefix, active_file);
    if !parser.claims(text) {
        println!("Not a GPU breakpoint (expected prefix \"{}\")", config.breakpoint_prefix);
        return Ok(());
    }
    let request = parser.parse(1, text, condition)?;
    let bp = GpuBreakpoint::new(request);
    let request = &bp.request;

    if as_json {
        let location = match &request.location {
            RequestLocation::KernelFunction { name } => json!({ "kernel": name }),
            RequestLocation::AnyLocation { pattern } => json!({ "any": pattern }),
            RequestLocation::SourceLocation { file, line, .. } => {
                json!({ "file": file, "line": line })
            }
            RequestLocation::Unknown => json!(null),
        };
        let out = json!({
            "kind": format!("{:?}", request.kind()),
            "location": location,
            "condition": print_condition(&bp),
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!("kind:      {:?}", request.kind());
    match &request.location {
        RequestLocation::KernelFunction { name } => println!("kernel:    {}", name),
        RequestLocation::AnyLocation { pattern } => println!("pattern:   {}", pattern),
        RequestLocation::SourceLocation { file, line, .. } => {
            println!("file:      {}", file.as_deref().unwrap_or("<unknown>"));
            println!("line:      {}", line);
        }
        RequestLocation::Unknown => {}
    }
    println!(
        "condition: {}",
        print_condition(&bp).unwrap_or_else(|| "none".to_string())
    );
    Ok(())
}

fn decode_notifications(file: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let bytes = fs::read(file)?;
    let mut packets = bytes.chunks_exact(NOTIFICATION_PACKET_SIZE);
    for (index, chunk) in packets.by_ref().enumerate() {
        match Notification::decode(chunk)? {
            Notification::BreakpointHit {
                ids,
                hit_counts,
                active_waves,
            } => {
                let hits: Vec<String> = ids
                    .iter()
                    .zip(&hit_counts)
                    .filter(|(id, _)| **id >= 0)
                    .map(|(id, count)| format!("{}x{}", id, count))
                    .collect();
                println!(
                    "#{:<4} BreakpointHit [{}] active_waves={}",
                    index,
                    hits.join(", "),
                    active_waves
                );
            }
            other => println!("#{:<4} {:?}", index, other),
        }
    }
    let trailing = packets.remainder().len();
    if trailing > 0 {
        println!(
            "{} trailing bytes do not form a packet ({} bytes each)",
            trailing, NOTIFICATION_PACKET_SIZE
        );
    }
    info!(target: "wavepoint_cli", packets = bytes.len() / NOTIFICATION_PACKET_SIZE, trailing, "Decoded");
    Ok(())
}

fn print_loadmap(config: &SessionConfig) -> Result<(), Box<dyn std::error::Error>> {
    let shm = SysvSharedMemory::new(config.shared_memory.clone());
    let mut segments = SegmentTranslator::new();
    segments.refresh(&shm)?;

    if segments.segments().is_empty() {
        println!("No segments loaded");
        return Ok(());
    }
    println!(
        "{:<4} {:<18} {:<10} {:<18} {:<5}",
        "#", "process base", "size", "elf base", "exec"
    );
    for (index, seg) in segments.segments().iter().enumerate() {
        println!(
            "{:<4} {:#018x} {:<#10x} {:#018x} {:<5}",
            index, seg.segment_base, seg.segment_size, seg.segment_base_elf_va, seg.is_executed
        );
    }
    Ok(())
}
