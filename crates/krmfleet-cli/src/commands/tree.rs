//! Tree command - show the resolved package tree without fetching anything

use std::io::Write;
use std::path::Path;

use krmfleet_core::{compute_references, parse_fleet_spec, write_tree};

use crate::commands::read_input;
use crate::display;
use crate::error::Result;

pub fn run(file: &Path) -> Result<()> {
    let data = read_input(Some(file))?;
    let fleet = parse_fleet_spec(&data)?;

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    writeln!(out, "{}:", fleet.name())?;
    write_tree(&fleet.packages, &mut out)?;
    writeln!(out)?;
    display::print_references(&mut out, &compute_references(&fleet.packages))?;
    Ok(())
}
