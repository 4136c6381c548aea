//! Load files and read tag streams
use crate::pick_packer::SideTable;
use anyhow::{Context, Result, bail};
use std::path::Path;

const TAG_SIZE: usize = std::mem::size_of::<u64>();

pub fn load_file(path: &Path) -> Result<Vec<u8>> {
    log::debug!("load file: {}", path.display());

    let file = std::fs::File::open(path)
        .with_context(|| format!("failed to open file: {}", path.display()))?;

    // empty files cannot be mapped on every platform
    if file.metadata()?.len() == 0 {
        return Ok(Vec::new());
    }

    let mmap = unsafe { memmap2::Mmap::map(&file)? };
    let data = mmap.to_vec();

    log::debug!("file load success, size: {} bytes", data.len());
    Ok(data)
}

/// little-endian `u64` tags, back to back
pub fn parse_tags(data: &[u8]) -> Result<Vec<u64>> {
    if data.len() % TAG_SIZE != 0 {
        bail!(
            "tag stream length {} is not a multiple of {}",
            data.len(),
            TAG_SIZE
        );
    }

    Ok(data
        .chunks_exact(TAG_SIZE)
        .map(|chunk| {
            let mut bytes = [0u8; TAG_SIZE];
            bytes.copy_from_slice(chunk);
            u64::from_le_bytes(bytes)
        })
        .collect())
}

pub fn encode_tags(tags: &[u64]) -> Vec<u8> {
    tags.iter().flat_map(|tag| tag.to_le_bytes()).collect()
}

pub fn load_tags(path: &Path) -> Result<Vec<u64>> {
    let data = load_file(path)?;
    parse_tags(&data).with_context(|| format!("bad tag file: {}", path.display()))
}

pub fn load_side_table(path: &Path) -> Result<SideTable> {
    let data = load_file(path)?;
    SideTable::from_bytes(&data).with_context(|| format!("bad side-table: {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_tags() {
        let tags = vec![0, 1, u64::MAX, 0x0102_0304_0506_0708];
        let bytes = encode_tags(&tags);
        assert_eq!(bytes.len(), 32);
        assert_eq!(&bytes[24..32], &[8, 7, 6, 5, 4, 3, 2, 1]);
        assert_eq!(parse_tags(&bytes).unwrap(), tags);
    }

    #[test]
    fn test_parse_tags_rejects_partial() {
        assert!(parse_tags(&[1, 2, 3]).is_err());
        assert!(parse_tags(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_load_missing_file() {
        let err = load_file(Path::new("/definitely/not/here.bin")).unwrap_err();
        assert!(err.to_string().contains("failed to open file"));
    }
}
