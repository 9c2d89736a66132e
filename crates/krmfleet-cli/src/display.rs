//! Display formatting for CLI output

use console::style;
use std::collections::{BTreeMap, BTreeSet};
use std::io::{self, Write};

use krmfleet_core::{Results, Severity, SourceRef, SpecViolation, UpstreamId};

/// Print validation problems, one per line
pub fn print_violations<W: Write>(out: &mut W, file: &str, violations: &[SpecViolation]) -> io::Result<()> {
    writeln!(
        out,
        "{} {} ({} problem{})",
        style("✗").red().bold(),
        style(file).bold(),
        violations.len(),
        if violations.len() == 1 { "" } else { "s" }
    )?;
    for violation in violations {
        writeln!(
            out,
            "  {} {}",
            style(format!("{}:", violation.location)).cyan(),
            violation.message
        )?;
    }
    Ok(())
}

/// Print the refs each upstream must provide
pub fn print_references<W: Write>(
    out: &mut W,
    refs: &BTreeMap<UpstreamId, BTreeSet<SourceRef>>,
) -> io::Result<()> {
    writeln!(out, "{}", style("References:").bold())?;
    if refs.is_empty() {
        writeln!(out, "  {}", style("(none)").dim())?;
    }
    for (upstream, refs) in refs {
        let refs: Vec<&str> = refs.iter().map(SourceRef::as_str).collect();
        writeln!(out, "  {}: {}", style(upstream).cyan(), refs.join(", "))?;
    }
    Ok(())
}

/// Print function results with a severity marker
pub fn print_results<W: Write>(out: &mut W, results: &Results) -> io::Result<()> {
    for result in results {
        let marker = match result.severity {
            Severity::Error => style("✗").red(),
            Severity::Warning => style("⚠").yellow(),
            Severity::Info => style("→").blue(),
        };
        writeln!(out, "{} {}", marker, result.message)?;
    }
    Ok(())
}
