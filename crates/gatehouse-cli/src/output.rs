//! Terminal rendering.

use crate::plan::{Plan, Verdict};
use console::style;
use gatehouse_core::pipeline::NodeKey;
use gatehouse_core::ports::RunObserver;
use gatehouse_core::run::{NodeState, RunResult};
use gatehouse_runner::{OutputLine, OutputStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Prints node progress as the run advances.
pub struct ConsoleObserver;

impl RunObserver for ConsoleObserver {
    fn node_started(&self, node: &NodeKey) {
        println!("  {} {}", style("▶").cyan(), style(node).bold());
    }

    fn node_finished(&self, node: &NodeKey, state: NodeState, message: Option<&str>) {
        let detail = message
            .map(|m| format!(" ({})", m))
            .unwrap_or_default();
        match state {
            NodeState::Succeeded => println!("  {} {}", style("✓").green(), style(node).dim()),
            NodeState::Failed => println!("  {} {}{}", style("✗").red(), style(node).bold(), detail),
            NodeState::Skipped => println!("  {} {} skipped", style("⏭").dim(), style(node).dim()),
            _ => {}
        }
    }
}

/// Print job output lines until every sender is gone.
pub fn spawn_printer(mut rx: mpsc::Receiver<OutputLine>) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(line) = rx.recv().await {
            match line.stream {
                OutputStream::Stdout => {
                    println!("      {} {}", style(format!("{} |", line.node)).dim(), line.content)
                }
                OutputStream::Stderr => {
                    eprintln!("      {} {}", style(format!("{} |", line.node)).dim(), line.content)
                }
            }
        }
    })
}

pub fn print_summary(result: &RunResult) {
    println!();
    println!(
        "  {} succeeded, {} failed, {} skipped in {}ms",
        style(result.count(NodeState::Succeeded)).green(),
        style(result.count(NodeState::Failed)).red(),
        style(result.count(NodeState::Skipped)).dim(),
        result.duration_ms
    );

    for report in &result.nodes {
        if let Some(reason) = &report.skip_reason {
            println!("    {} {}: {}", style("⏭").dim(), report.node, reason);
        }
    }

    for artifact in &result.artifacts {
        println!(
            "    {} {} from {} ({} bytes, sha256 {})",
            style("📦").cyan(),
            style(&artifact.key).bold(),
            artifact.producer,
            artifact.size_bytes,
            &artifact.sha256[..12.min(artifact.sha256.len())]
        );
    }

    println!();
    if let Some(gate) = &result.gate {
        let status = if gate.open {
            style("open").green()
        } else {
            style("closed").red()
        };
        println!("  Gate '{}' {}", gate.job, status);
    }

    if result.all_required_passed {
        println!("{} Pipeline \"{}\" passed", style("✓").green().bold(), result.pipeline);
    } else {
        println!("{} Pipeline \"{}\" did not pass", style("✗").red().bold(), result.pipeline);
    }
}

pub fn print_plan(plan: &Plan) {
    println!(
        "{} Plan for \"{}\" on {} {}",
        style("▶").cyan().bold(),
        style(&plan.pipeline).bold(),
        style(plan.event.kind).bold(),
        style(&plan.event.git_ref).dim()
    );

    for planned in &plan.nodes {
        match &planned.verdict {
            Verdict::Run => println!("  {} {}", style("●").green(), planned.node),
            Verdict::SkipCondition => println!(
                "  {} {} {}",
                style("○").dim(),
                style(&planned.node).dim(),
                style("(condition false)").dim()
            ),
            Verdict::SkipUpstream { dependency } => println!(
                "  {} {} {}",
                style("○").dim(),
                style(&planned.node).dim(),
                style(format!("(needs skipped '{}')", dependency)).dim()
            ),
        }
    }

    if let Some((job, runs)) = &plan.gate {
        let status = if *runs {
            style("would open").green()
        } else {
            style("stays closed").red()
        };
        println!();
        println!("  Gate '{}' {}", job, status);
    }
}
