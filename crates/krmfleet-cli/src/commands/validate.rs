//! Validate command - parse, default and validate a Fleet

use console::style;
use std::path::Path;

use krmfleet_core::{CoreError, Fleet, ResolvedFleet, collect_output_packages};

use crate::commands::read_input;
use crate::display;
use crate::error::{CliError, Result};

pub fn run(file: &Path) -> Result<()> {
    let data = read_input(Some(file))?;
    let declared = Fleet::from_yaml(&data)?;

    let fleet = match ResolvedFleet::from_fleet(&declared) {
        Ok(fleet) => fleet,
        Err(CoreError::Validation { violations }) => {
            display::print_violations(&mut std::io::stderr(), &file.display().to_string(), &violations)?;
            return Err(CliError::validation_with_help(
                format!("{} problem(s) in {}", violations.len(), file.display()),
                "fix the listed fields and run 'krmfleet validate' again",
            ));
        }
        Err(e) => return Err(e.into()),
    };

    let outputs = collect_output_packages(&fleet.packages, Path::new("")).len();
    println!(
        "{} {} is valid (fleet '{}', {} upstream(s), {} output package(s))",
        style("✓").green(),
        file.display(),
        fleet.name(),
        fleet.upstreams.len(),
        outputs
    );
    Ok(())
}
