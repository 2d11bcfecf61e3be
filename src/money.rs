use std::{
    fmt,
    iter::Sum,
    ops::{Add, AddAssign, Neg, Sub, SubAssign},
};

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

/// Signed currency amount stored as integer cents.
///
/// Stored documents and JSON bodies carry amounts as plain numbers with two
/// decimals; the conversion happens once, when a value is (de)serialized, and
/// every computation after that is exact.
///
/// Converting from a float rounds half away from zero and refuses values
/// that are not finite or exceed [`Cents::MAX_ABS`]:
///
/// ```text
/// Cents::try_from_f64(10.005) == Some(Cents::new(1001))
/// Cents::try_from_f64(f64::NAN) == None
/// ```
///
/// Arithmetic saturates at the bounds of `i64` instead of overflowing.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Cents(i64);

impl Cents {
    pub const ZERO: Cents = Cents(0);

    /// Largest magnitude accepted from a float, in cents. Every value up to
    /// it is exactly representable as an `f64`.
    pub const MAX_ABS: i64 = 1_000_000_000_000_000;

    pub const fn new(cents: i64) -> Self {
        Self(cents)
    }

    /// Rounds a currency value to the nearest cent, ties away from zero.
    pub fn try_from_f64(amount: f64) -> Option<Self> {
        let cents = (amount * 100.0).round();
        if !cents.is_finite() || cents.abs() > Self::MAX_ABS as f64 {
            return None;
        }
        Some(Self(cents as i64))
    }

    pub fn to_f64(self) -> f64 {
        self.0 as f64 / 100.0
    }

    pub const fn cents(self) -> i64 {
        self.0
    }

    pub const fn abs(self) -> Self {
        Self(self.0.saturating_abs())
    }

    pub const fn is_positive(self) -> bool {
        self.0 > 0
    }

    pub const fn is_negative(self) -> bool {
        self.0 < 0
    }

    /// True when the amount is within `epsilon` of zero.
    pub fn is_negligible(self, epsilon: Cents) -> bool {
        self.abs() <= epsilon
    }
}

impl fmt::Display for Cents {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        write!(f, "{sign}{}.{:02}", abs / 100, abs % 100)
    }
}

impl Add for Cents {
    type Output = Cents;

    fn add(self, rhs: Cents) -> Self::Output {
        Cents(self.0.saturating_add(rhs.0))
    }
}

impl AddAssign for Cents {
    fn add_assign(&mut self, rhs: Cents) {
        self.0 = self.0.saturating_add(rhs.0);
    }
}

impl Sub for Cents {
    type Output = Cents;

    fn sub(self, rhs: Cents) -> Self::Output {
        Cents(self.0.saturating_sub(rhs.0))
    }
}

impl SubAssign for Cents {
    fn sub_assign(&mut self, rhs: Cents) {
        self.0 = self.0.saturating_sub(rhs.0);
    }
}

impl Neg for Cents {
    type Output = Cents;

    fn neg(self) -> Self::Output {
        Cents(self.0.saturating_neg())
    }
}

impl Sum for Cents {
    fn sum<I: Iterator<Item = Cents>>(iter: I) -> Self {
        iter.fold(Cents::ZERO, Add::add)
    }
}

impl<'a> Sum<&'a Cents> for Cents {
    fn sum<I: Iterator<Item = &'a Cents>>(iter: I) -> Self {
        iter.copied().sum()
    }
}

impl Serialize for Cents {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(self.to_f64())
    }
}

impl<'de> Deserialize<'de> for Cents {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let amount = f64::deserialize(deserializer)?;
        Cents::try_from_f64(amount).ok_or_else(|| {
            de::Error::custom(format!("amount {amount} is not a finite currency value"))
        })
    }
}
