//! Format campaign status, run summaries and bug reports for humans.

use crate::campaign::StatusReport;
use crate::controller::RunSummary;
use crate::corpus::BugReport;
use crate::targets::DbmsTarget;

/// Format a status query answer.
pub fn format_status(status: &StatusReport) -> String {
    let mut output = String::new();

    output.push_str("═══════════════════════════════════════════════════════════════════════\n");
    output.push_str(&format!("  Campaign {}\n", status.name));
    output.push_str("═══════════════════════════════════════════════════════════════════════\n\n");

    let state = if status.running { "running" } else { "stopped" };
    output.push_str(&format!("Task status:            {}\n", state));
    output.push_str(&format!("Steps:                  {}\n", status.steps));
    output.push_str(&format!("Executions:             {}\n", status.executions));
    output.push_str(&format!("Ignorable errors:       {}\n", status.ignorable));
    output.push_str(&format!("Throughput:             {:.1} exec/s\n", status.throughput));
    output.push_str(&format!("Coverage (edges):       {}\n", status.edges));
    output.push_str(&format!("Discoveries:            {}\n", status.discoveries));
    output.push_str(&format!("Bugs:                   {}\n", status.bugs));
    output.push_str(&format!(
        "Current combo:          {}\n",
        status.current_combo.as_deref().unwrap_or("-")
    ));
    output.push('\n');

    if !status.top_combos.is_empty() {
        output.push_str("─── Production Pool ───────────────────────────────────────────────────\n");
        for (i, entry) in status.top_combos.iter().enumerate() {
            output.push_str(&format!(
                "  {:>2}. {:<50} {:.6}\n",
                i + 1,
                entry.combo.join(","),
                entry.weight
            ));
        }
        output.push('\n');
    }

    output
}

/// Format the result of a finished run.
pub fn format_summary(summary: &RunSummary) -> String {
    let mut output = String::new();

    output.push_str("═══════════════════════════════════════════════════════════════════════\n");
    output.push_str("  Configuration Fuzzing Report\n");
    output.push_str("═══════════════════════════════════════════════════════════════════════\n\n");

    output.push_str(&format!("Steps:                  {}\n", summary.steps));
    output.push_str(&format!("Executions:             {}\n", summary.executions));
    output.push_str(&format!("Discoveries:            {}\n", summary.discoveries));
    output.push_str(&format!("Unique edges found:     {}\n", summary.total_edges));
    output.push_str(&format!("Bugs discovered:        {}\n", summary.bugs.len()));
    if summary.interrupted {
        output.push_str("Ended by:               cancellation\n");
    }
    output.push('\n');

    if !summary.bugs.is_empty() {
        output.push_str("─── Bugs Found ─────────────────────────────────────────────────────────\n");
        for (i, bug) in summary.bugs.iter().enumerate() {
            output.push_str(&format!("\n{}. Bug #{}\n", i + 1, bug.bug_id));
            output.push_str(&format_bug(bug));
        }
        output.push('\n');
    } else {
        output.push_str("─── No Bugs Found ──────────────────────────────────────────────────────\n");
        output.push_str("No oracle violations detected.\n\n");
    }

    output.push_str("═══════════════════════════════════════════════════════════════════════\n");

    output
}

/// Format a bug report with its configuration and statements.
pub fn format_bug(bug: &BugReport) -> String {
    let mut output = String::new();

    output.push_str(&format!("   Message:      {}\n", bug.message));
    output.push_str(&format!("   Step:         {}\n", bug.step));
    output.push_str(&format!("   Combo:        {}\n", bug.combo));
    output.push_str(&format!("   Feature:      {}\n", bug.feature));

    if !bug.values.is_empty() {
        output.push_str("\n   Configuration:\n");
        for (name, literal) in &bug.values {
            output.push_str(&format!("     {} = {}\n", name, literal));
        }
    }

    if !bug.statements.is_empty() {
        output.push_str("\n   Statements:\n");
        for (i, statement) in bug.statements.iter().take(10).enumerate() {
            output.push_str(&format!("     [{}] {}\n", i + 1, statement));
        }
        if bug.statements.len() > 10 {
            output.push_str(&format!(
                "     ... and {} more statements\n",
                bug.statements.len() - 10
            ));
        }
    }

    output
}

/// A standalone SQL script replaying `bug` against a fresh `database`.
///
/// Configuration values are applied in each action's preferred scope.
/// Names the target no longer knows are emitted as comments.
pub fn reproduction_script(bug: &BugReport, target: &dyn DbmsTarget, database: &str) -> String {
    let mut script = String::new();

    script.push_str(&format!("-- Bug #{} at step {}: {}\n", bug.bug_id, bug.step, bug.message));
    script.push_str(&format!("DROP DATABASE IF EXISTS {};\n", database));
    script.push_str(&format!("CREATE DATABASE {};\n", database));
    script.push_str(&format!("USE {};\n", database));

    for (name, literal) in &bug.values {
        match target.list_actions().get(name) {
            Some(action) => {
                let statement = target.literal_statement(action, literal, action.preferred_scope());
                script.push_str(&format!("{};\n", statement));
            }
            None => script.push_str(&format!("-- unknown setting {} = {}\n", name, literal)),
        }
    }

    for statement in &bug.statements {
        let statement = statement.trim_end();
        if statement.ends_with(';') {
            script.push_str(&format!("{}\n", statement));
        } else {
            script.push_str(&format!("{};\n", statement));
        }
    }

    script
}
