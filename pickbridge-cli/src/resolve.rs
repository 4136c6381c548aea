//! consumer phase
use crate::{Files, NO_PICK_TAG};
use anyhow::{Result, bail};
use log::{info, warn};
use pickbridge::reader::{load_side_table, load_tags};
use pickbridge::{Manifest, PickUnpacker, ResolvedPick, TypeRegistry};

#[derive(clap::Args)]
pub struct ResolveArgs {
    #[command(flatten)]
    pub files: Files,

    /// print one line per distinct tag instead of one per request
    #[arg(long)]
    pub partitions: bool,
}

/// `<index> <collection> <entry> <asset> <variant>`, `-` for missing parts
pub fn format_pick(index: usize, pick: Option<&ResolvedPick>) -> String {
    let Some(pick) = pick else {
        return format!("{} - - - -", index);
    };

    let asset = pick.entry().map_or("-", |entry| entry.asset_path.as_str());
    let variant = pick
        .entry()
        .and_then(|entry| usize::try_from(pick.secondary_index).ok().and_then(|i| entry.variants().get(i)))
        .map_or("-", |variant| variant.path.as_str());

    format!(
        "{} {} {} {} {}",
        index,
        pick.collection.path(),
        pick.raw_index,
        asset,
        variant
    )
}

pub fn run(args: &ResolveArgs) -> Result<()> {
    let library = Manifest::load(&args.files.manifest)?.build(TypeRegistry::global())?;
    let tags = load_tags(&args.files.tags)?;
    let table = load_side_table(&args.files.table)?;

    let mut unpacker = PickUnpacker::new();
    // every request missed, nothing was packed
    if table.is_empty() {
        if tags.iter().any(|&tag| tag != NO_PICK_TAG) {
            bail!("side-table is empty but the tag stream has picks");
        }
    } else {
        unpacker.unpack_table(&table, &library)?;
    }
    info!(
        "{} tags, {} collections, {} unique entries",
        tags.len(),
        unpacker.collection_count(),
        unpacker.unique_entry_count()
    );

    if args.partitions {
        for partition in unpacker.build_partitions(&tags) {
            if partition.tag == NO_PICK_TAG {
                continue;
            }
            let pick = unpacker.resolve(partition.tag);
            let asset = pick
                .as_ref()
                .and_then(|p| p.entry())
                .map_or("-", |entry| entry.asset_path.as_str());
            println!(
                "{:#018x} {} {}",
                partition.tag,
                partition.indices.len(),
                asset
            );
        }
        return Ok(());
    }

    let mut unresolved = 0usize;
    for (i, &tag) in tags.iter().enumerate() {
        let pick = if tag == NO_PICK_TAG {
            None
        } else {
            unpacker.resolve(tag)
        };
        if pick.is_none() {
            unresolved += 1;
        }
        println!("{}", format_pick(i, pick.as_ref()));
    }

    if unresolved > 0 {
        warn!("{} of {} tags did not resolve", unresolved, tags.len());
    }
    Ok(())
}
