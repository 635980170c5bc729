use crate::executor::Executor;
use crate::manifest::{FileStatus, Manifest, Origin};
use crate::metadata::Metadata;

/// Hands out the next unprocessed manifest entry, skipping files that are
/// already done, unreadable, or provably outside the active bounds.
pub struct Sequence {
    origin: Origin,
    end: Origin,
    added: u64,
}

impl Sequence {
    pub fn new(manifest: &Manifest) -> Sequence {
        Sequence {
            origin: 0,
            end: manifest.len() as Origin,
            added: 0,
        }
    }

    /// The next origin needing insertion, or `None` when the manifest is
    /// exhausted or `max` files have been handed out this run (zero = no
    /// limit).
    pub fn next(&mut self, metadata: &Metadata, manifest: &mut Manifest, max: u64) -> Option<Origin> {
        while self.origin < self.end && (max == 0 || self.added < max) {
            let active = self.origin;
            self.origin += 1;

            if self.check_info(metadata, manifest, active) {
                self.added += 1;
                return Some(active);
            }
        }
        None
    }

    fn check_info(&self, metadata: &Metadata, manifest: &mut Manifest, origin: Origin) -> bool {
        let info = manifest.get(origin);

        if info.status != FileStatus::Outstanding {
            return false;
        }

        if !Executor::good(&info.path) {
            manifest.set_status(origin, FileStatus::Omitted);
            return false;
        }

        if let Some(header_bounds) = info.bounds {
            let bounds = match metadata.delta() {
                Some(delta) => header_bounds.deltify(delta),
                None => header_bounds,
            };

            if !metadata.bounds().overlaps(&bounds) {
                // The whole file misses the index; count it without
                // opening it.
                let n = info.num_points.unwrap_or(0);
                let primary = metadata.subset().map_or(true, |s| s.primary());
                manifest.add_out_of_bounds(origin, n, primary);
                manifest.set_status(origin, FileStatus::Inserted);
                return false;
            }

            if let Some(subset_bounds) = metadata.bounds_subset() {
                if !subset_bounds.overlaps(&bounds) {
                    manifest.set_status(origin, FileStatus::Inserted);
                    return false;
                }
            }
        }

        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bounds::Bounds;
    use crate::format::FormatConfig;
    use crate::metadata::MetadataConfig;
    use crate::schema;
    use crate::structure::StructureConfig;
    use glam::DVec3;

    fn metadata(manifest: Manifest) -> (Metadata, Manifest) {
        Metadata::new(MetadataConfig {
            bounds_native: Bounds::new(DVec3::ZERO, DVec3::ONE),
            schema: schema::xyz(),
            structure: StructureConfig {
                null_depth: 0,
                base_depth: 4,
                cold_depth: 4,
                points_per_chunk: 0,
                ..StructureConfig::default()
            },
            hierarchy_structure: None,
            manifest,
            format: FormatConfig::default(),
            delta: None,
            reprojection: None,
            subset: None,
            transformation: None,
            cesium: None,
        })
        .unwrap()
    }

    #[test]
    fn skips_done_and_omits_unreadable() {
        let (m, mut manifest) = metadata(Manifest::new(vec![
            "a.bin".into(),
            "notes.txt".into(),
            "b.bin".into(),
        ]));
        manifest.set_status(0, FileStatus::Inserted);

        let mut seq = Sequence::new(&manifest);
        assert_eq!(seq.next(&m, &mut manifest, 0), Some(2));
        assert_eq!(seq.next(&m, &mut manifest, 0), None);
        assert_eq!(manifest.get(1).status, FileStatus::Omitted);
    }

    #[test]
    fn run_count_limits_handouts() {
        let (m, mut manifest) = metadata(Manifest::new(vec![
            "a.bin".into(),
            "b.bin".into(),
            "c.bin".into(),
        ]));

        let mut seq = Sequence::new(&manifest);
        assert_eq!(seq.next(&m, &mut manifest, 2), Some(0));
        assert_eq!(seq.next(&m, &mut manifest, 2), Some(1));
        assert_eq!(seq.next(&m, &mut manifest, 2), None);
    }

    #[test]
    fn header_bounds_prune_whole_files() {
        let (m, mut manifest) = metadata(Manifest::new(vec!["far.bin".into()]));
        {
            let info = manifest.get_mut(0);
            info.bounds = Some(Bounds::new(DVec3::splat(100.0), DVec3::splat(101.0)));
            info.num_points = Some(7);
        }

        let mut seq = Sequence::new(&manifest);
        assert_eq!(seq.next(&m, &mut manifest, 0), None);
        assert_eq!(manifest.get(0).status, FileStatus::Inserted);
        assert_eq!(manifest.get(0).point_stats.out_of_bounds, 7);
        assert_eq!(manifest.point_stats().out_of_bounds, 7);
    }
}
