use std::fmt;
use std::ops::{Add, AddAssign, Mul, Shl, Sub, SubAssign};

use num_bigint::BigUint;
use num_traits::{ToPrimitive, Zero};

/// Chunk index with no fixed width bound.
///
/// Node indices grow as `factor^depth`, so a deep tree overflows 64 bits
/// while its stored chunks remain perfectly manageable. All chunk
/// arithmetic goes through this type; call sites that have proven a value
/// small (chunk offsets, base tube ids) drop down to `u64` via
/// [`Id::simple`].
#[derive(Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Id(BigUint);

impl Id {
    pub fn new(v: u64) -> Self {
        Id(BigUint::from(v))
    }

    pub fn zero() -> Self {
        Id::default()
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    /// Extract the native value. The caller asserts that the id fits; ids
    /// reaching these call sites fit by construction.
    pub fn simple(&self) -> u64 {
        self.0.to_u64().expect("id exceeds 64 bits")
    }

    pub fn to_u64(&self) -> Option<u64> {
        self.0.to_u64()
    }

    /// Quotient and remainder against a native divisor.
    pub fn div_mod(&self, rhs: u64) -> (Id, u64) {
        let rhs = BigUint::from(rhs);
        (Id(&self.0 / &rhs), (&self.0 % &rhs).to_u64().unwrap_or(0))
    }

    /// Quotient and remainder against an arbitrary-precision divisor.
    pub fn div_mod_id(&self, rhs: &Id) -> (Id, Id) {
        (Id(&self.0 / &rhs.0), Id(&self.0 % &rhs.0))
    }
}

impl From<u64> for Id {
    fn from(v: u64) -> Self {
        Id::new(v)
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Id({})", self.0)
    }
}

impl Add<&Id> for &Id {
    type Output = Id;
    fn add(self, rhs: &Id) -> Id {
        Id(&self.0 + &rhs.0)
    }
}

impl Add<u64> for &Id {
    type Output = Id;
    fn add(self, rhs: u64) -> Id {
        Id(&self.0 + rhs)
    }
}

impl AddAssign<u64> for Id {
    fn add_assign(&mut self, rhs: u64) {
        self.0 += rhs;
    }
}

impl AddAssign<&Id> for Id {
    fn add_assign(&mut self, rhs: &Id) {
        self.0 += &rhs.0;
    }
}

impl Sub<&Id> for &Id {
    type Output = Id;
    fn sub(self, rhs: &Id) -> Id {
        Id(&self.0 - &rhs.0)
    }
}

impl Sub<u64> for &Id {
    type Output = Id;
    fn sub(self, rhs: u64) -> Id {
        Id(&self.0 - rhs)
    }
}

impl SubAssign<&Id> for Id {
    fn sub_assign(&mut self, rhs: &Id) {
        self.0 -= &rhs.0;
    }
}

impl Mul<u64> for &Id {
    type Output = Id;
    fn mul(self, rhs: u64) -> Id {
        Id(&self.0 * rhs)
    }
}

impl Mul<&Id> for &Id {
    type Output = Id;
    fn mul(self, rhs: &Id) -> Id {
        Id(&self.0 * &rhs.0)
    }
}

impl Shl<usize> for &Id {
    type Output = Id;
    fn shl(self, rhs: usize) -> Id {
        Id(&self.0 << rhs)
    }
}

impl PartialEq<u64> for Id {
    fn eq(&self, other: &u64) -> bool {
        self.0 == BigUint::from(*other)
    }
}

impl PartialOrd<u64> for Id {
    fn partial_cmp(&self, other: &u64) -> Option<std::cmp::Ordering> {
        self.0.partial_cmp(&BigUint::from(*other))
    }
}
