//! CLI command handlers.

mod cat;
mod fetch;
mod hash;
mod list;
mod units;

use std::sync::Arc;

use anyhow::{Result, bail};
use preserver_core::{ArchivalUnit, AuRouter};

pub use cat::run_cat_command;
pub use fetch::run_fetch_command;
pub use hash::run_hash_command;
pub use list::run_list_command;
pub use units::run_units_command;

/// Finds a unit by id, falling back to a unique name match.
fn find_unit(router: &AuRouter, key: &str) -> Result<Arc<ArchivalUnit>> {
    let units = router.units();
    if let Some(unit) = units.iter().find(|unit| unit.id().as_str() == key) {
        return Ok(Arc::clone(unit));
    }
    let named: Vec<_> = units.iter().filter(|unit| unit.name() == key).collect();
    match named.as_slice() {
        [unit] => Ok(Arc::clone(unit)),
        [] => bail!("no unit with id or name {key:?}; run `preserver units` to list them"),
        _ => bail!("{} units are named {key:?}; use the unit id", named.len()),
    }
}
