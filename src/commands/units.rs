//! Units command handler: list configured units by stem.

use anyhow::Result;
use preserver_core::Runtime;

pub fn run_units_command(runtime: &Runtime) -> Result<()> {
    let mut units = runtime.router.units();
    if units.is_empty() {
        println!("No units configured.");
        return Ok(());
    }
    units.sort_by(|a, b| a.id().as_str().cmp(b.id().as_str()));
    for unit in units {
        println!(
            "{}\t{}\t{}\t{}",
            unit.id(),
            unit.unit_type().key(),
            unit.base_url(),
            unit.name()
        );
    }
    Ok(())
}
