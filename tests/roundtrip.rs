//! Cross-module properties: chunk round trips, tail extensibility, climb
//! determinism, and merge adjacency.

mod support;

use glam::DVec3;

use cairn::cell::Insertion;
use cairn::chunk::{BaseChunk, ColdChunk};
use cairn::climber::Climber;
use cairn::endpoint::Endpoint;
use cairn::format::{write_point, ChunkType, Format, FormatConfig, TailField};
use cairn::metadata::Metadata;
use cairn::pool::PointPool;
use cairn::schema;
use cairn::structure::{ChunkInfo, StructureConfig};
use cairn::subset::Subset;

use support::*;

fn metadata(compress: bool, subset: Option<Subset>) -> Metadata {
    let mut c = config(
        unit_bounds(),
        StructureConfig {
            null_depth: 1,
            base_depth: 4,
            cold_depth: 8,
            points_per_chunk: 64,
            mapped_depth: 6,
            ..StructureConfig::default()
        },
        vec![],
    );
    c.format.compress = compress;
    c.subset = subset;
    Metadata::new(c).unwrap().0
}

fn insert_points(metadata: &Metadata, chunk: &ColdChunk, pool: &PointPool, points: &[DVec3]) -> u64 {
    let mut inserted = 0;
    let mut climber = Climber::new(metadata.structure(), *metadata.bounds());
    for p in points {
        climber.reset();
        climber.magnify_to(*p, chunk.depth());

        let info = ChunkInfo::new(metadata.structure(), climber.index()).unwrap();
        if &info.chunk_id != chunk.id() {
            continue;
        }

        let mut data = pool.data_pool().acquire(1);
        let mut cells = pool.cell_pool().acquire(1);
        let mut node = data.pop().unwrap();
        write_point(&mut node, *p);
        let mut cell = cells.pop().unwrap();
        cell.set(*p, node);

        if let Insertion::Done = chunk.insert(&climber, cell) {
            inserted += 1;
        }
    }
    inserted
}

#[test]
fn cold_chunk_round_trip_preserves_the_cell_multiset() {
    for compress in [false, true] {
        for depth in [5u64, 7] {
            let m = metadata(compress, None);
            let pool = PointPool::new(m.schema().clone(), None);
            let out = Endpoint::memory();
            let points = scattered(200, 11, 0.01, 0.99);

            let mut climber = Climber::new(m.structure(), *m.bounds());
            climber.magnify_to(points[0], depth);
            let info = ChunkInfo::new(m.structure(), climber.index()).unwrap();

            let chunk = ColdChunk::create(&m, &info);
            let inserted = insert_points(&m, &chunk, &pool, &points);
            assert!(inserted > 0);
            let expected = chunk.cell_count();

            chunk.collect(&m, &pool, &out).unwrap();
            chunk.save(&m, &out).unwrap();

            let path = m.structure().maybe_prefix(&info.chunk_id);
            let blob = out.get(&path).unwrap().to_vec();
            let back = ColdChunk::from_data(&m, &info, &pool, blob).unwrap();

            assert_eq!(back.cell_count(), expected, "compress={compress} depth={depth}");
            assert_eq!(back.chunk_type(), chunk.chunk_type());
        }
    }
}

#[test]
fn base_chunk_round_trip() {
    for compress in [false, true] {
        let m = metadata(compress, None);
        let pool = PointPool::new(m.schema().clone(), None);
        let base = BaseChunk::new(&m).unwrap();

        let mut climber = Climber::new(m.structure(), *m.bounds());
        let points = scattered(100, 13, 0.01, 0.99);
        let mut inserted = 0;
        for p in &points {
            climber.reset();
            climber.magnify_to(*p, m.structure().base_depth_begin());

            let mut data = pool.data_pool().acquire(1);
            let mut cells = pool.cell_pool().acquire(1);
            let mut node = data.pop().unwrap();
            write_point(&mut node, *p);
            let mut cell = cells.pop().unwrap();
            cell.set(*p, node);

            // Cascade within the base band by hand; drop escapes.
            loop {
                match base.insert(&climber, cell) {
                    Insertion::Done => {
                        inserted += 1;
                        break;
                    }
                    Insertion::Descend(displaced) => {
                        let next = climber.depth() + 1;
                        if next >= m.structure().base_depth_end() {
                            break;
                        }
                        let deeper = displaced.point();
                        climber.reset();
                        climber.magnify_to(deeper, next);
                        cell = displaced;
                    }
                }
            }
        }
        assert!(inserted > 50);
        assert_eq!(base.cell_count(), inserted);
        let original = base_points_sorted(&base);

        let out = Endpoint::memory();
        base.save(&m, &pool, &out).unwrap();

        let blob = out
            .get(&m.structure().base_index_begin().to_string())
            .unwrap()
            .to_vec();
        let reloaded = BaseChunk::from_data(&m, &pool, blob).unwrap();
        assert_eq!(reloaded.cell_count(), inserted, "compress={compress}");
        assert_eq!(base_points_sorted(&reloaded), original);
    }
}

fn base_points_sorted(base: &BaseChunk) -> Vec<(u64, u64, u64)> {
    let mut out: Vec<(u64, u64, u64)> = base
        .collect_points()
        .iter()
        .map(|p| ((p.x * 1e9) as u64, (p.y * 1e9) as u64, (p.z * 1e9) as u64))
        .collect();
    out.sort_unstable();
    out
}

#[test]
fn tail_fields_extend_without_breaking_old_readers() {
    // A future writer declares an extra field ahead of the ones today's
    // readers know; parsing from the end still finds the known fields.
    let writer = Format::new(
        schema::xyz(),
        None,
        FormatConfig {
            compress: false,
            tail: vec![TailField::NumBytes, TailField::NumPoints, TailField::ChunkType],
            ..FormatConfig::default()
        },
    )
    .unwrap();

    let reader = Format::new(
        schema::xyz(),
        None,
        FormatConfig {
            compress: false,
            tail: vec![TailField::NumPoints, TailField::ChunkType],
            ..FormatConfig::default()
        },
    )
    .unwrap();

    let pool = PointPool::new(schema::xyz(), None);
    let mut stack = pool.data_pool().acquire(3);
    let mut data = pool.data_pool().stack();
    for i in 0..3 {
        let mut node = stack.pop().unwrap();
        write_point(&mut node, DVec3::splat(f64::from(i)));
        data.push(node);
    }

    let blob = writer.pack(data, ChunkType::Sparse).unwrap();

    let unpacker = reader.unpack(blob).unwrap();
    assert_eq!(unpacker.num_points(), 3);
    assert_eq!(unpacker.chunk_type(), ChunkType::Sparse);
}

#[test]
fn climb_is_deterministic_and_matches_zorder() {
    let m = metadata(false, None);
    let s = m.structure();
    let cube = *m.bounds();

    for p in scattered(100, 17, 0.0, 1.0) {
        for depth in [1u64, 3, 6, 9] {
            let mut a = Climber::new(s, cube);
            let mut b = Climber::new(s, cube);
            a.magnify_to(p, depth);
            b.magnify_to(p, depth);
            assert_eq!(a.index(), b.index());
            assert_eq!(a.tick(), b.tick());

            // index == calc_level_index(dimensions, depth) + zorder(p, depth)
            let mut bounds = cube;
            let mut zorder = cairn::Id::zero();
            for _ in 0..depth {
                let octant = bounds.octant_of(p);
                zorder = &(&zorder * s.factor()) + ((octant >> 1) as u64);
                bounds = bounds.eight_fold(octant);
            }
            let expect = &ChunkInfo::calc_level_index(s.dimensions(), depth) + &zorder;
            assert_eq!(a.index(), &expect);
        }
    }
}

fn one_cell(pool: &PointPool, p: DVec3) -> cairn::cell::Cell {
    let mut data = pool.data_pool().acquire(1);
    let mut cells = pool.cell_pool().acquire(1);
    let mut node = data.pop().unwrap();
    write_point(&mut node, p);
    let mut cell = cells.pop().unwrap();
    cell.set(p, node);
    cell
}

#[test]
fn bumped_merge_promotes_whole_chunks() {
    let out = Endpoint::memory();
    let structure = StructureConfig {
        null_depth: 1,
        base_depth: 4,
        cold_depth: 6,
        points_per_chunk: 16,
        bump_depth: 2,
        ..StructureConfig::default()
    };

    let subset_metadata = |i: u64| {
        let mut c = config(unit_bounds(), structure.clone(), vec![]);
        c.subset = Some(Subset::new(i, 4).unwrap());
        Metadata::new(c).unwrap().0
    };

    let pool = PointPool::new(cairn::schema::xyz(), None);
    let mut whole = subset_metadata(0);
    whole.make_whole();

    // One cell at each base depth per subset, all inside the subset's tile.
    let mut bases = Vec::new();
    for i in 0..4 {
        let m = subset_metadata(i);
        let base = BaseChunk::new(&m).unwrap();
        let p = m.bounds_subset().unwrap().mid();
        for depth in [1u64, 2, 3] {
            let mut climber = Climber::new(m.structure(), *m.bounds());
            climber.magnify_to(p, depth);
            match base.insert(&climber, one_cell(&pool, p)) {
                Insertion::Done => {}
                Insertion::Descend(_) => panic!("fresh slots cannot collide"),
            }
        }
        bases.push(base);
    }

    let mut it = bases.into_iter();
    let mut acc = it.next().unwrap();
    let mut promoted = Vec::new();
    for other in it {
        promoted.extend(acc.merge(other, &whole, &pool, &out).unwrap());
    }

    // Depth 3 spans one chunk per subset; depth 2 completes a chunk only
    // once all four subsets are in.
    let names: Vec<String> = promoted.iter().map(|id| id.to_string()).collect();
    for expect in ["21", "37", "53", "69", "5"] {
        assert!(names.contains(&expect.to_string()), "missing chunk {expect}");
    }

    // Only the unbumped depths remain in the base.
    assert_eq!(acc.cell_count(), 4);
    acc.save(&whole, &pool, &out).unwrap();

    // The whole metadata serializes with the shrunken base band, and both
    // the base and the promoted chunks reload under it.
    let doc = whole.to_json(&[]);
    let (reloaded, _) = Metadata::from_json(&doc).unwrap();
    assert_eq!(reloaded.structure().base_depth_end(), 2);

    let base_blob = out.get("1").unwrap().to_vec();
    let back = BaseChunk::from_data(&reloaded, &pool, base_blob).unwrap();
    assert_eq!(back.cell_count(), 4);

    let info = ChunkInfo::new(reloaded.structure(), &cairn::Id::new(21)).unwrap();
    let cold_blob = out.get("21").unwrap().to_vec();
    let cold = ColdChunk::from_data(&reloaded, &info, &pool, cold_blob).unwrap();
    assert_eq!(cold.cell_count(), 1);
    assert_eq!(cold.chunk_type(), ChunkType::Contiguous);
}

#[test]
fn merge_requires_adjacent_subsets() {
    let m0 = metadata(true, Some(Subset::new(0, 4).unwrap()));
    let m2 = metadata(true, Some(Subset::new(2, 4).unwrap()));
    let pool = PointPool::new(m0.schema().clone(), None);
    let out = Endpoint::memory();

    let mut whole = m0.clone();
    whole.make_whole();

    let mut base0 = BaseChunk::new(&m0).unwrap();
    let base2 = BaseChunk::new(&m2).unwrap();

    // Subset 2 does not begin where subset 0 ends.
    let err = base0.merge(base2, &whole, &pool, &out).unwrap_err();
    assert!(matches!(err, cairn::IndexError::Merge(_)));

    // Adjacent subsets fold cleanly.
    let m1 = metadata(true, Some(Subset::new(1, 4).unwrap()));
    let base1 = BaseChunk::new(&m1).unwrap();
    let mut base0 = BaseChunk::new(&m0).unwrap();
    base0.merge(base1, &whole, &pool, &out).unwrap();
}
