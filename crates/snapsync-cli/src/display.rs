//! Display utilities for the snapsync CLI

use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use snapsync_network::ReceiveAck;
use snapsync_sync::SyncPlan;
use snapsync_types::{Inventory, SnapshotOutcome};
use std::time::Duration;

/// Spinner shown while waiting on btrfs or the peer
pub fn spinner(quiet: bool, message: impl Into<String>) -> Option<ProgressBar> {
    if quiet {
        return None;
    }

    let pb = ProgressBar::new_spinner();
    if let Ok(spinner_style) = ProgressStyle::default_spinner().template("{spinner:.green} {msg}") {
        pb.set_style(spinner_style);
    }
    pb.set_message(message.into());
    pb.enable_steady_tick(Duration::from_millis(100));
    Some(pb)
}

/// Stop a spinner, if any
pub fn finish(pb: Option<ProgressBar>) {
    if let Some(pb) = pb {
        pb.finish_and_clear();
    }
}

/// Print the inventory, managed snapshots marked
pub fn print_inventory(inventory: &Inventory) {
    if inventory.is_empty() {
        println!("{} No snapshots", style("ℹ").yellow());
        return;
    }

    for entry in inventory.iter() {
        if entry.managed {
            println!("  {} {}", style("●").green(), entry.name);
        } else {
            println!("  {} {}", style("○").dim(), style(&entry.name).dim());
        }
    }
    println!(
        "{} {} snapshots, {} managed",
        style("✓").green(),
        inventory.len(),
        inventory.managed_names().len()
    );
}

/// Print a created snapshot
pub fn print_outcome(outcome: &SnapshotOutcome) {
    println!(
        "{} Snapshot {} created at {}",
        style("✓").green().bold(),
        style(&outcome.name).cyan(),
        style(outcome.path.display()).cyan()
    );
}

/// Print the result of a reconciliation
pub fn print_plan(plan: &SyncPlan) {
    println!();
    println!(
        "{}",
        style(format!("Reconciliation with {}", plan.peer))
            .bold()
            .underlined()
    );
    println!("  Local snapshots: {}", style(plan.local.len()).cyan());

    if plan.is_empty() {
        println!("  {} In sync", style("✓").green());
    }

    for name in &plan.to_send {
        println!("  {} {} (missing on peer)", style("→").green(), name);
    }
    for name in &plan.to_fetch {
        println!("  {} {} (missing locally)", style("←").yellow(), name);
    }
    for name in plan.skipped_foreign() {
        println!("  {} {} (not managed, skipped)", style("·").dim(), style(name).dim());
    }

    println!(
        "  Duration: {}",
        style(format!("{:.2}s", plan.duration.as_secs_f64())).blue()
    );
}

/// Print the peer's answer to an announcement
pub fn print_ack(name: &str, ack: &ReceiveAck) {
    match (&ack.destination, ack.ready) {
        (Some(destination), true) => println!(
            "  {} {} accepted into {}",
            style("✓").green(),
            name,
            style(destination).cyan()
        ),
        _ => println!("  {} {} declined by peer", style("✗").red(), name),
    }
}
