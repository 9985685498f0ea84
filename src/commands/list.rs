//! List command handler: print the leaves of a unit in tree order.

use anyhow::Result;
use preserver_core::{CachedUrl, CuIterable, IterOptions, Runtime};
use tracing::info;

use super::find_unit;
use crate::cli::ListArgs;

pub fn run_list_command(runtime: &Runtime, args: &ListArgs) -> Result<()> {
    let unit = find_unit(&runtime.router, &args.unit)?;
    let options = if args.all {
        IterOptions::all()
    } else {
        runtime.iter_options
    };

    let mut listed = 0usize;
    let excluded = if args.members {
        let mut iter = unit.archive_member_iterator(options)?;
        for cu in iter.by_ref() {
            print_leaf(&cu);
            listed += 1;
        }
        iter.excluded_count()
    } else {
        let mut iter = unit.cu_iterator(options)?;
        for cu in iter.by_ref() {
            print_leaf(&cu);
            listed += 1;
        }
        iter.excluded_count()
    };

    info!(unit = %unit.id(), listed, excluded, "List complete");
    Ok(())
}

fn print_leaf(cu: &CachedUrl) {
    let size = cu
        .content_size()
        .map_or_else(|| "-".to_string(), |size| size.to_string());
    let version = cu
        .version()
        .map_or_else(|| "-".to_string(), |version| version.to_string());
    println!("{}\t{version}\t{size}", cu.url());
}
