use anyhow::{anyhow, Context, Result};
use clap::{Arg, ArgAction, Command};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{error, info, Level};

use security_audit::audit::store::read_entries;
use security_audit::audit::{
    find_tampered_entries, merkle_root, verify_ledger_file, verify_merkle_root, AuditEntry,
};

fn main() {
    let matches = Command::new("verify-audit-log")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Verify security audit ledger integrity")
        .arg(
            Arg::new("log-path")
                .short('l')
                .long("log-path")
                .value_name("PATH")
                .help("Path to a JSONL ledger or archive artifact")
                .required(true),
        )
        .arg(
            Arg::new("merkle-root")
                .short('m')
                .long("merkle-root")
                .value_name("HASH")
                .help("Expected Merkle root of the partition"),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .action(ArgAction::SetTrue)
                .help("Enable verbose output"),
        )
        .arg(
            Arg::new("quiet")
                .short('q')
                .long("quiet")
                .action(ArgAction::SetTrue)
                .conflicts_with("verbose")
                .help("Suppress output except errors"),
        )
        .get_matches();

    let verbose = matches.get_flag("verbose");
    let quiet = matches.get_flag("quiet");

    let level = if quiet {
        Level::ERROR
    } else if verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    tracing_subscriber::fmt().with_max_level(level).init();

    let Some(log_path) = matches.get_one::<String>("log-path") else {
        error!("--log-path is required");
        std::process::exit(2);
    };
    let expected_root = matches.get_one::<String>("merkle-root");

    match verify(Path::new(log_path), expected_root.map(String::as_str), verbose) {
        Ok(()) => {
            if !quiet {
                println!("✓ Audit ledger verification completed successfully");
            }
        }
        Err(e) => {
            error!("Audit ledger verification failed: {:#}", e);
            std::process::exit(1);
        }
    }
}

fn verify(log_path: &Path, expected_root: Option<&str>, verbose: bool) -> Result<()> {
    info!("Verifying audit ledger: {}", log_path.display());

    let report = verify_ledger_file(log_path)
        .with_context(|| format!("failed to read {}", log_path.display()))?;
    let entries = read_entries(log_path)?;

    if entries.is_empty() {
        return Err(anyhow!("Audit ledger is empty"));
    }

    if verbose {
        println!("Loaded {} audit ledger entries", entries.len());
    }

    if !report.valid {
        let tampered = find_tampered_entries(&entries);
        if !tampered.is_empty() {
            println!("Entries whose stored hash no longer matches: {:?}", tampered);
        }
        return Err(anyhow!(report.summary()));
    }

    if verbose {
        println!("✓ Hash chain integrity verified");
    }

    let root = merkle_root(&entries).ok_or_else(|| anyhow!("no entries to hash"))?;
    println!("Merkle root: {}", root);

    if let Some(expected) = expected_root {
        info!("Verifying Merkle root against expected value");
        if !verify_merkle_root(&entries, expected) {
            return Err(anyhow!(
                "Merkle root mismatch. Expected: {}, Got: {}",
                expected,
                root
            ));
        }
        if verbose {
            println!("✓ Merkle root matches expected value");
        }
    }

    if verbose {
        print_summary(&entries);
    }

    Ok(())
}

fn print_summary(entries: &[AuditEntry]) {
    let (Some(first), Some(last)) = (entries.first(), entries.last()) else {
        return;
    };

    println!("\nAudit Ledger Summary:");
    println!("  Entries: {} (sequence {}..={})", entries.len(), first.sequence, last.sequence);
    println!("  First entry: {}", first.timestamp);
    println!("  Last entry: {}", last.timestamp);
    println!("  Head hash: {}", last.hash);

    let out_of_order = entries
        .windows(2)
        .filter(|pair| pair[1].timestamp < pair[0].timestamp)
        .count();
    if out_of_order > 0 {
        println!("⚠ {} entries have timestamps earlier than their predecessor", out_of_order);
    }

    let mut actions: BTreeMap<&str, usize> = BTreeMap::new();
    for entry in entries {
        *actions.entry(entry.action.as_str()).or_insert(0) += 1;
    }

    println!("\nAction distribution:");
    for (action, count) in actions {
        println!("  {}: {}", action, count);
    }
}
