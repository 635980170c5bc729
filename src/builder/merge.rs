use tracing::info;

use crate::chunk::BaseChunk;
use crate::endpoint::{ensure_get, Endpoint};
use crate::error::IndexError;
use crate::hierarchy::Hierarchy;
use crate::manifest::PointStats;
use crate::metadata::Metadata;
use crate::pool::PointPool;

/// Merge all subset outputs at `out` into a whole build.
///
/// Base chunks fold together depth by depth, strictly serially: subset
/// `i + 1`'s span at each depth must begin exactly where the accumulated
/// span ends, or the merge is fatal. Manifests union by path; hierarchies
/// sum. Cold chunks were written unpostfixed by each subset and need no
/// work here.
pub fn merge(out: &Endpoint) -> Result<PointStats, IndexError> {
    let (first, mut manifest, mut errors) = Metadata::load(out, Some(0))
        .map_err(|e| IndexError::input(format!("no subset-0 build found: {e}")))?;

    let subset = first
        .subset()
        .ok_or_else(|| IndexError::input("cannot merge a non-subset build"))?;
    let of = subset.of();

    let pool = PointPool::new(first.schema().clone(), first.delta().copied());
    let compress_hierarchy = first.format().compress_hierarchy();

    let mut whole = first.clone();
    whole.make_whole();

    let base_name = first.structure().base_index_begin().to_string();

    let blob = ensure_get(out, &format!("{base_name}-0"))?;
    let mut base = BaseChunk::from_data(&first, &pool, blob.to_vec())?;

    let hierarchy = Hierarchy::new(&whole);
    hierarchy.load(out, compress_hierarchy, "-0")?;

    for id in 1..of {
        info!(subset = id, "merging subset");

        let (metadata, sub_manifest, sub_errors) = Metadata::load(out, Some(id))
            .map_err(|e| IndexError::input(format!("subset {id} is missing: {e}")))?;

        match metadata.subset() {
            Some(s) if s.id() == id && s.of() == of => {}
            _ => {
                return Err(IndexError::input(format!(
                    "subset {id} metadata does not match the merge set"
                )))
            }
        }

        let blob = ensure_get(out, &format!("{base_name}-{id}"))?;
        let other = BaseChunk::from_data(&metadata, &pool, blob.to_vec())?;

        let promoted = base.merge(other, &whole, &pool, out)?;
        if !promoted.is_empty() {
            info!(chunks = promoted.len(), "promoted bumped base spans to cold chunks");
        }

        manifest.merge(&sub_manifest);
        errors.extend(sub_errors);

        let sub_hierarchy = Hierarchy::new(&whole);
        sub_hierarchy.load(out, compress_hierarchy, &format!("-{id}"))?;
        hierarchy.merge(&sub_hierarchy);
    }

    base.save(&whole, &pool, out)?;
    hierarchy.save(out, compress_hierarchy, "")?;
    whole.save(out, &manifest, &errors)?;

    let stats = *manifest.point_stats();
    info!(
        inserts = stats.inserts,
        out_of_bounds = stats.out_of_bounds,
        overflows = stats.overflows,
        "merge complete"
    );

    Ok(stats)
}
