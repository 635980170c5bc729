use std::collections::BTreeMap;
use std::io::Cursor;
use std::sync::Mutex;

use binrw::{binrw, BinReaderExt, BinWrite};

use crate::compression;
use crate::endpoint::{ensure_put, Endpoint, EndpointError};
use crate::error::IndexError;
use crate::format::HierarchyCompression;
use crate::id::Id;
use crate::metadata::Metadata;
use crate::structure::Structure;

/// One stored hierarchy record: a node's offset within its block and its
/// point count.
#[binrw]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[brw(little)]
pub struct HierarchyEntry {
    pub offset: u64,
    pub count: u64,
}

/// Per-node point counts over the hierarchy structure, fed by the insert
/// path and stored as `h/<blockId>` blobs.
///
/// Counts bucket by the node where a point comes to rest. The hierarchy's
/// bounded depth keeps the whole count set in one block rooted at the base,
/// with every offset within 64 bits.
pub struct Hierarchy {
    structure: Structure,
    counts: Mutex<BTreeMap<Id, u64>>,
}

const HIERARCHY_DIR: &str = "h";

impl Hierarchy {
    pub fn new(metadata: &Metadata) -> Self {
        Hierarchy {
            structure: metadata.hierarchy_structure().clone(),
            counts: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn structure(&self) -> &Structure {
        &self.structure
    }

    /// Count one point at its resting node. Depths past the hierarchy's
    /// tracked range are ignored.
    pub fn count(&self, index: &Id, depth: u64) {
        if depth < self.structure.base_depth_begin() || !self.structure.in_range(depth) {
            return;
        }
        let mut counts = self.counts.lock().expect("hierarchy poisoned");
        *counts.entry(index.clone()).or_insert(0) += 1;
    }

    pub fn total(&self) -> u64 {
        self.counts.lock().expect("hierarchy poisoned").values().sum()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.lock().expect("hierarchy poisoned").is_empty()
    }

    /// Sum another hierarchy's counts into this one.
    pub fn merge(&self, other: &Hierarchy) {
        let theirs = other.counts.lock().expect("hierarchy poisoned");
        let mut counts = self.counts.lock().expect("hierarchy poisoned");
        for (id, n) in theirs.iter() {
            *counts.entry(id.clone()).or_insert(0) += n;
        }
    }

    /// Hierarchy counts block together under the base root; the bounded
    /// hierarchy depth keeps every offset within 64 bits.
    fn block(&self) -> Id {
        self.structure.base_index_begin().clone()
    }

    pub fn save(
        &self,
        endpoint: &Endpoint,
        compress: HierarchyCompression,
        postfix: &str,
    ) -> Result<(), IndexError> {
        let counts = self.counts.lock().expect("hierarchy poisoned");
        if counts.is_empty() {
            return Ok(());
        }

        let sub = endpoint.sub_endpoint(HIERARCHY_DIR);
        let block = self.block();

        let mut body = Cursor::new(Vec::with_capacity(counts.len() * 16));
        for (id, count) in counts.iter() {
            let entry = HierarchyEntry {
                offset: (id - &block).simple(),
                count: *count,
            };
            entry
                .write(&mut body)
                .map_err(|e| IndexError::corrupt(format!("hierarchy encode: {e}")))?;
        }
        let mut body = body.into_inner();

        if compress == HierarchyCompression::Gzip {
            body = compression::compress(&body)?;
        }

        ensure_put(&sub, &format!("{block}{postfix}"), &body)?;
        Ok(())
    }

    /// Reload counts from storage for a continued build. Missing blocks are
    /// an empty hierarchy, not an error.
    pub fn load(
        &self,
        endpoint: &Endpoint,
        compress: HierarchyCompression,
        postfix: &str,
    ) -> Result<(), IndexError> {
        let sub = endpoint.sub_endpoint(HIERARCHY_DIR);
        let base_block = self.block();

        let blob = match sub.get(&format!("{base_block}{postfix}")) {
            Ok(b) => b,
            Err(EndpointError::NotFound(_)) => return Ok(()),
            Err(e) => return Err(e.into()),
        };

        let body = if compress == HierarchyCompression::Gzip {
            compression::decompress(&blob, None)?
        } else {
            blob.to_vec()
        };

        if body.len() % 16 != 0 {
            return Err(IndexError::corrupt("ragged hierarchy block"));
        }

        let mut counts = self.counts.lock().expect("hierarchy poisoned");
        let mut cursor = Cursor::new(&body);
        for _ in 0..body.len() / 16 {
            let entry: HierarchyEntry = cursor
                .read_le()
                .map_err(|e| IndexError::corrupt(format!("hierarchy decode: {e}")))?;
            let id = &base_block + entry.offset;
            *counts.entry(id).or_insert(0) += entry.count;
        }

        Ok(())
    }
}
