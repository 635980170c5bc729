//! Out-of-core octree indexing for massive point clouds.
//!
//! Given a manifest of input point files, the builder produces a
//! persistent, queryable octree-like index whose chunks serialize
//! independently to a local filesystem or object-store endpoint. Builds
//! continue incrementally, run on parallel workers, shard horizontally
//! into subsets that merge later, and optionally quantize coordinates to a
//! scale/offset grid.

pub mod bounds;
pub mod builder;
pub mod cell;
pub mod cesium;
pub mod chunk;
pub mod climber;
pub mod compression;
pub mod endpoint;
pub mod error;
pub mod executor;
pub mod format;
pub mod hierarchy;
pub mod id;
pub mod manifest;
pub mod metadata;
pub mod pool;
pub mod schema;
pub mod structure;
pub mod subset;
pub mod table;
pub mod threads;

pub use bounds::{Bounds, Delta, Point};
pub use builder::{merge, Builder};
pub use endpoint::Endpoint;
pub use error::IndexError;
pub use id::Id;
pub use manifest::{Manifest, PointStats};
pub use metadata::{Metadata, MetadataConfig};
pub use schema::{DimInfo, DimType, Schema};
pub use structure::{Structure, StructureConfig};
pub use subset::Subset;
