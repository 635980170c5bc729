use serde::{Deserialize, Serialize};

use crate::error::IndexError;

/// Storage type of one dimension.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DimType {
    #[serde(rename = "int8")]
    Int8,
    #[serde(rename = "int16")]
    Int16,
    #[serde(rename = "int32")]
    Int32,
    #[serde(rename = "int64")]
    Int64,
    #[serde(rename = "uint8")]
    UInt8,
    #[serde(rename = "uint16")]
    UInt16,
    #[serde(rename = "uint32")]
    UInt32,
    #[serde(rename = "uint64")]
    UInt64,
    #[serde(rename = "float")]
    Float,
    #[serde(rename = "double")]
    Double,
}

impl DimType {
    pub fn size(&self) -> usize {
        match self {
            DimType::Int8 | DimType::UInt8 => 1,
            DimType::Int16 | DimType::UInt16 => 2,
            DimType::Int32 | DimType::UInt32 | DimType::Float => 4,
            DimType::Int64 | DimType::UInt64 | DimType::Double => 8,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DimInfo {
    pub name: String,
    #[serde(rename = "type")]
    pub dim_type: DimType,
}

impl DimInfo {
    pub fn new(name: impl Into<String>, dim_type: DimType) -> Self {
        DimInfo {
            name: name.into(),
            dim_type,
        }
    }

    pub fn size(&self) -> usize {
        self.dim_type.size()
    }
}

/// Ordered list of named typed dimensions. Two schemas are equal iff their
/// dimension lists are equal.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<DimInfo>", into = "Vec<DimInfo>")]
pub struct Schema {
    dims: Vec<DimInfo>,
    point_size: usize,
}

impl Schema {
    pub fn new(dims: Vec<DimInfo>) -> Self {
        let point_size = dims.iter().map(DimInfo::size).sum();
        Schema { dims, point_size }
    }

    pub fn dims(&self) -> &[DimInfo] {
        &self.dims
    }

    pub fn point_size(&self) -> usize {
        self.point_size
    }

    pub fn contains(&self, name: &str) -> bool {
        self.dims.iter().any(|d| d.name == name)
    }

    pub fn find(&self, name: &str) -> Result<&DimInfo, IndexError> {
        self.dims
            .iter()
            .find(|d| d.name == name)
            .ok_or_else(|| IndexError::input(format!("dimension not found: {name}")))
    }

    /// Byte offset of a dimension within a packed record.
    pub fn offset(&self, name: &str) -> Result<usize, IndexError> {
        let mut offset = 0;
        for d in &self.dims {
            if d.name == name {
                return Ok(offset);
            }
            offset += d.size();
        }
        Err(IndexError::input(format!("dimension not found: {name}")))
    }

    /// True when the record starts with X, Y, Z doubles, the layout every
    /// indexing path assumes.
    pub fn is_normal(&self) -> bool {
        matches!(
            self.dims.as_slice(),
            [x, y, z, ..]
                if x.name == "X" && y.name == "Y" && z.name == "Z"
                    && [x, y, z].iter().all(|d| d.dim_type == DimType::Double)
        )
    }

    /// The augmented schema used for base serialization: a 64-bit `TubeId`
    /// prefixed to the native dimensions.
    pub fn celled(&self) -> Schema {
        let mut dims = vec![DimInfo::new(TUBE_ID_DIM, DimType::UInt64)];
        dims.extend(self.dims.iter().cloned());
        Schema::new(dims)
    }
}

pub const TUBE_ID_DIM: &str = "TubeId";

impl From<Vec<DimInfo>> for Schema {
    fn from(dims: Vec<DimInfo>) -> Self {
        Schema::new(dims)
    }
}

impl From<Schema> for Vec<DimInfo> {
    fn from(s: Schema) -> Self {
        s.dims
    }
}

/// The minimal schema: X, Y, Z doubles.
pub fn xyz() -> Schema {
    Schema::new(vec![
        DimInfo::new("X", DimType::Double),
        DimInfo::new("Y", DimType::Double),
        DimInfo::new("Z", DimType::Double),
    ])
}
