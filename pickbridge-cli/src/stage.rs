//! producer phase
use crate::{Files, NO_PICK_TAG};
use anyhow::{Context, Result, bail};
use log::{debug, info, warn};
use pickbridge::reader::{encode_tags, load_file};
use pickbridge::{
    CollectionSource, DistributionDetails, INVALID_PICK, Manifest, MicroDistributionDetails,
    PickPacker, PickRequest, TypeRegistry,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(clap::Args)]
pub struct StageArgs {
    #[command(flatten)]
    pub files: Files,

    /// number of requests to stage
    #[arg(long)]
    pub requests: usize,

    /// base seed, request `i` uses `seed + i`
    #[arg(long, default_value_t = 0)]
    pub seed: i32,

    /// distribution config (JSON), defaults to weighted random
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// collection to pick from, defaults to the first one in the manifest.
    /// repeat to cycle requests over several collections
    #[arg(long = "collection")]
    pub collections: Vec<String>,

    /// session identifier the tag base hash is derived from
    #[arg(long, default_value = "pickbridge")]
    pub session: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StageConfig {
    pub entries: DistributionDetails,
    pub variants: MicroDistributionDetails,
    /// category per request, cycled
    pub categories: Vec<String>,
}

impl StageConfig {
    fn load(path: Option<&PathBuf>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let data = load_file(path)?;
        serde_json::from_slice(&data).with_context(|| format!("bad config: {}", path.display()))
    }

    fn request(&self, i: usize, seed: i32) -> PickRequest {
        let mut request = PickRequest::seeded(seed.wrapping_add(i as i32)).with_index(i as f64);
        if !self.categories.is_empty() {
            request = request.with_category(self.categories[i % self.categories.len()].as_str());
        }
        request
    }
}

pub fn run(args: &StageArgs) -> Result<()> {
    let registry = TypeRegistry::global();
    let manifest = Manifest::load(&args.files.manifest)?;
    let library = manifest.build(registry)?;
    let config = StageConfig::load(args.config.as_ref())?;

    let max_input_index = args.requests.saturating_sub(1) as f64;
    let mut source = CollectionSource::new(config.entries.clone(), config.variants.clone());

    match args.collections.as_slice() {
        [] | [_] => {
            let path = match args.collections.first() {
                Some(path) => path.as_str(),
                None => match manifest.collections.first() {
                    Some(first) => first.path.as_str(),
                    None => bail!("manifest has no collections"),
                },
            };
            let root = library
                .get(path)
                .with_context(|| format!("no collection named {}", path))?;
            debug!("picking from {}", path);
            source.init_single(Arc::clone(root), max_input_index, registry)?;
        }
        paths => {
            let collections = paths
                .iter()
                .map(|path| {
                    library
                        .get(path)
                        .map(Arc::clone)
                        .with_context(|| format!("no collection named {}", path))
                })
                .collect::<Result<Vec<_>>>()?;
            let keys = (0..args.requests)
                .map(|i| paths[i % paths.len()].clone())
                .collect();
            debug!("picking from {} collections", paths.len());
            source.init_keyed(collections, keys, max_input_index, registry)?;
        }
    }

    let packer = PickPacker::new(&args.session);

    let mut tags = Vec::with_capacity(args.requests);
    let mut missed = 0usize;

    for i in 0..args.requests {
        let request = config.request(i, args.seed);
        let picked = source.try_get_helpers(i).and_then(|(entries, variants)| {
            let access = entries.get_entry(&request)?;
            let host = library.get(access.host.path())?;
            let secondary = variants.map_or(INVALID_PICK, |variants| {
                variants.get_pick(access.entry.micro_cache(), &request)
            });
            let tag = packer.try_get_pick_index(host, access.index, secondary);
            if tag.is_none() {
                warn!(
                    "request {}: pick ({}, {}) in {} does not fit a tag",
                    i,
                    access.index,
                    secondary,
                    host.path()
                );
            }
            tag
        });

        tags.push(picked.unwrap_or_else(|| {
            missed += 1;
            NO_PICK_TAG
        }));
    }

    if missed > 0 {
        warn!("{} of {} requests picked nothing", missed, args.requests);
    }

    let table = packer.pack_to_table();
    std::fs::write(&args.files.tags, encode_tags(&tags))
        .with_context(|| format!("failed to write tags: {}", args.files.tags.display()))?;
    std::fs::write(&args.files.table, table.to_bytes()?)
        .with_context(|| format!("failed to write side-table: {}", args.files.table.display()))?;

    info!(
        "staged {} requests over {} collections",
        tags.len(),
        table.len()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config: StageConfig =
            serde_json::from_str(r#"{ "categories": ["a", "b"] }"#).unwrap();
        assert_eq!(config.entries, DistributionDetails::default());
        assert_eq!(config.request(3, 10).category.as_deref(), Some("b"));
        assert_eq!(config.request(3, 10).seed, 13);
        assert_eq!(config.request(3, 10).index, 3.0);
    }
}
