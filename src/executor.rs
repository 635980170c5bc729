use glam::DVec3;

use crate::bounds::Bounds;
use crate::error::IndexError;
use crate::format::read_point;
use crate::schema::Schema;
use crate::table::PooledPointTable;

/// Header-level summary of a source file.
#[derive(Debug, Clone, PartialEq)]
pub struct Preview {
    pub bounds: Bounds,
    pub num_points: u64,
}

/// The record-reader boundary. Full-featured point formats belong to an
/// external reader library; this executor handles the native ingest format,
/// a bare concatenation of schema-sized little-endian records (`.bin`).
pub struct Executor;

impl Executor {
    /// Whether a path looks like something we can read. Anything else gets
    /// omitted from the build rather than failing it.
    pub fn good(path: &str) -> bool {
        path.ends_with(".bin")
    }

    /// Scan a blob for its bounds and point count.
    pub fn preview(bytes: &[u8], schema: &Schema) -> Result<Preview, IndexError> {
        let point_size = schema.point_size();
        if bytes.len() % point_size != 0 {
            return Err(IndexError::input(format!(
                "file of {} bytes is not a whole number of {point_size}-byte records",
                bytes.len()
            )));
        }

        let mut min = DVec3::splat(f64::INFINITY);
        let mut max = DVec3::splat(f64::NEG_INFINITY);
        for record in bytes.chunks_exact(point_size) {
            let p = read_point(record);
            min = min.min(p);
            max = max.max(p);
        }

        Ok(Preview {
            bounds: Bounds::new(min, max),
            num_points: (bytes.len() / point_size) as u64,
        })
    }

    /// Stream every record through the table in file order.
    pub fn run(
        table: &mut PooledPointTable,
        bytes: &[u8],
        schema: &Schema,
    ) -> Result<u64, IndexError> {
        let point_size = schema.point_size();
        if bytes.len() % point_size != 0 {
            return Err(IndexError::input(format!(
                "file of {} bytes is not a whole number of {point_size}-byte records",
                bytes.len()
            )));
        }

        let mut count = 0;
        for record in bytes.chunks_exact(point_size) {
            table.push(record)?;
            count += 1;
        }
        table.finish();
        Ok(count)
    }
}
