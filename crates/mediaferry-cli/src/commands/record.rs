//! Record command implementation.

use std::sync::Arc;

use anyhow::Result;

use mediaferry_core::asset::{EnumerateOptions, FsCatalog};
use mediaferry_core::transfer::TransferSession;

use super::{with_hint, RecordArgs};

/// Run the record command.
pub fn run(args: &RecordArgs) -> Result<()> {
    let config = super::load_config();
    let catalog = FsCatalog::new();
    let options = EnumerateOptions {
        include_all: args.all_files,
        ..EnumerateOptions::default()
    };
    let assets = catalog.enumerate(&args.paths, &options).map_err(with_hint)?;

    let session = TransferSession::open(config, Arc::new(catalog));
    session.record_only(&assets).map_err(with_hint)?;

    println!("Recorded {} files as transferred.", assets.len());
    Ok(())
}
