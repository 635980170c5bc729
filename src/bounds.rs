use glam::DVec3;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Double-precision 3D point.
pub type Point = DVec3;

/// Lossy integer quantization parameters.
///
/// A quantized coordinate is `round((native - offset) / scale)`; the reverse
/// mapping is `native = quantized * scale + offset`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Delta {
    pub scale: Point,
    pub offset: Point,
}

impl Default for Delta {
    fn default() -> Self {
        Delta {
            scale: DVec3::ONE,
            offset: DVec3::ZERO,
        }
    }
}

impl Delta {
    pub fn new(scale: Point, offset: Point) -> Self {
        Delta { scale, offset }
    }

    /// Native coordinates to quantized (integer-valued) coordinates.
    pub fn quantize(&self, p: Point) -> Point {
        ((p - self.offset) / self.scale).round()
    }

    /// Quantized coordinates back to native.
    pub fn unquantize(&self, p: Point) -> Point {
        p * self.scale + self.offset
    }

    pub fn exists_in(json: &serde_json::Value) -> bool {
        json.get("scale").is_some() || json.get("offset").is_some()
    }
}

/// Axis-aligned box over doubles, `min` inclusive and `max` exclusive.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Bounds {
    min: Point,
    max: Point,
}

impl Bounds {
    pub fn new(min: Point, max: Point) -> Self {
        Bounds { min, max }
    }

    pub fn min(&self) -> Point {
        self.min
    }

    pub fn max(&self) -> Point {
        self.max
    }

    pub fn mid(&self) -> Point {
        (self.min + self.max) * 0.5
    }

    pub fn is_empty(&self) -> bool {
        self.min.x >= self.max.x || self.min.y >= self.max.y || self.min.z >= self.max.z
    }

    pub fn contains(&self, p: Point) -> bool {
        p.x >= self.min.x
            && p.x < self.max.x
            && p.y >= self.min.y
            && p.y < self.max.y
            && p.z >= self.min.z
            && p.z < self.max.z
    }

    pub fn overlaps(&self, other: &Bounds) -> bool {
        self.min.x < other.max.x
            && self.max.x > other.min.x
            && self.min.y < other.max.y
            && self.max.y > other.min.y
            && self.min.z < other.max.z
            && self.max.z > other.min.z
    }

    /// Grow all faces outward by `ratio` of the largest extent.
    pub fn grow_by(&self, ratio: f64) -> Bounds {
        let extent = self.max - self.min;
        let pad = extent.max_element() * ratio;
        Bounds::new(self.min - DVec3::splat(pad), self.max + DVec3::splat(pad))
    }

    /// Map both corners into quantized space.
    pub fn deltify(&self, delta: &Delta) -> Bounds {
        Bounds::new(delta.quantize(self.min), delta.quantize(self.max))
    }

    pub fn undeltify(&self, delta: &Delta) -> Bounds {
        Bounds::new(delta.unquantize(self.min), delta.unquantize(self.max))
    }

    /// The cube used for tree traversal: centered on this box, with a side
    /// equal to the largest extent rounded up to a power of two. Applied
    /// after `deltify` when quantization is configured, so the cube's side
    /// is a power of two in the space the tree actually subdivides.
    pub fn cubeify(&self, delta: Option<&Delta>) -> Bounds {
        let inner = match delta {
            Some(d) => self.deltify(d),
            None => *self,
        };

        let extent = inner.max - inner.min;
        let side = pow2_at_least(extent.max_element());
        let half = DVec3::splat(side * 0.5);
        let mid = inner.mid();

        Bounds::new(mid - half, mid + half)
    }

    /// The i-th octant, i in 0..8, bit 0 = z, bit 1 = y, bit 2 = x.
    pub fn eight_fold(&self, index: usize) -> Bounds {
        let mut min = self.min;
        let mut max = self.max;
        let size = (max - min) * 0.5;

        if (index & 0b0001) > 0 {
            min.z += size.z;
        } else {
            max.z -= size.z;
        }
        if (index & 0b0010) > 0 {
            min.y += size.y;
        } else {
            max.y -= size.y;
        }
        if (index & 0b0100) > 0 {
            min.x += size.x;
        } else {
            max.x -= size.x;
        }

        Bounds::new(min, max)
    }

    /// The octant index of `p` under the `eight_fold` bit convention.
    pub fn octant_of(&self, p: Point) -> usize {
        let mid = self.mid();
        (usize::from(p.x >= mid.x) << 2)
            | (usize::from(p.y >= mid.y) << 1)
            | usize::from(p.z >= mid.z)
    }
}

fn pow2_at_least(v: f64) -> f64 {
    let mut side = 1.0;
    while side < v {
        side *= 2.0;
    }
    side
}

// On the wire a bounds value is [minx, miny, minz, maxx, maxy, maxz].
impl Serialize for Bounds {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        [
            self.min.x, self.min.y, self.min.z, self.max.x, self.max.y, self.max.z,
        ]
        .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Bounds {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let v = <[f64; 6]>::deserialize(deserializer)?;
        Ok(Bounds::new(
            DVec3::new(v[0], v[1], v[2]),
            DVec3::new(v[3], v[4], v[5]),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit() -> Bounds {
        Bounds::new(DVec3::ZERO, DVec3::ONE)
    }

    #[test]
    fn cubeify_unit_is_identity() {
        assert_eq!(unit().cubeify(None), unit());
    }

    #[test]
    fn cubeify_rounds_up_and_centers() {
        let b = Bounds::new(DVec3::ZERO, DVec3::new(5.0, 3.0, 1.0));
        let cube = b.cubeify(None);
        assert_eq!(cube.max - cube.min, DVec3::splat(8.0));
        assert_eq!(cube.mid(), b.mid());
        assert!(cube.contains(DVec3::new(4.9, 2.9, 0.9)));
    }

    #[test]
    fn eight_fold_partitions() {
        let b = unit();
        for i in 0..8 {
            let o = b.eight_fold(i);
            assert_eq!(o.max - o.min, DVec3::splat(0.5));
            assert_eq!(b.octant_of(o.mid()), i);
        }
    }

    #[test]
    fn delta_round_trip_is_within_half_scale() {
        let d = Delta::new(DVec3::splat(0.01), DVec3::ZERO);
        let p = DVec3::new(1.234, 5.678, 9.012);
        let q = d.quantize(p);
        assert_eq!(q, DVec3::new(123.0, 568.0, 901.0));
        let back = d.unquantize(q);
        assert!((back - p).abs().max_element() <= 0.005 + f64::EPSILON);
    }

    #[test]
    fn contains_is_half_open() {
        let b = unit();
        assert!(b.contains(DVec3::ZERO));
        assert!(!b.contains(DVec3::ONE));
        assert!(b.grow_by(0.005).contains(DVec3::ONE));
    }

    #[test]
    fn bounds_json_is_flat_sextuple() {
        let b = Bounds::new(DVec3::new(1.0, 2.0, 3.0), DVec3::new(4.0, 5.0, 6.0));
        let json = serde_json::to_string(&b).unwrap();
        assert_eq!(json, "[1.0,2.0,3.0,4.0,5.0,6.0]");
        let back: Bounds = serde_json::from_str(&json).unwrap();
        assert_eq!(back, b);
    }
}
