//! A simplified decimal128 for index keys: a sign bit, a scale, and an
//! integer mantissa mirroring the 96-bit `decimal` shape, trimmed to what
//! the storage kernel actually needs: a value that can be
//! stored in an overflow-free fixed-width key and ordered consistently.
//!
//! Exact arbitrary-precision rescaling across differing `scale` values is
//! a collaborator (query/arithmetic layer) concern; the kernel orders
//! decimal keys by their nearest `f64` approximation. This is documented
//! as an open-question resolution in DESIGN.md. Values that fit exactly in
//! `f64` (the overwhelming majority of application decimals: money amounts,
//! measurements) order exactly; values relying on > 15 significant digits
//! of precision may compare as equal when they are not.

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Decimal128 {
    negative: bool,
    mantissa: u128,
    scale: u8,
}

impl Decimal128 {
    pub const ZERO: Decimal128 = Decimal128 {
        negative: false,
        mantissa: 0,
        scale: 0,
    };

    pub fn new(mantissa: u128, scale: u8, negative: bool) -> Self {
        Decimal128 {
            negative,
            mantissa,
            scale,
        }
    }

    pub fn mantissa(&self) -> u128 {
        self.mantissa
    }

    pub fn scale(&self) -> u8 {
        self.scale
    }

    pub fn is_negative(&self) -> bool {
        self.negative
    }

    /// Lossy conversion used only to derive a bytewise-sortable order key.
    pub fn to_f64_approx(&self) -> f64 {
        let value = self.mantissa as f64 / 10f64.powi(self.scale as i32);
        if self.negative { -value } else { value }
    }
}

impl Eq for Decimal128 {}

impl PartialOrd for Decimal128 {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Decimal128 {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.to_f64_approx()
            .partial_cmp(&other.to_f64_approx())
            .unwrap_or(std::cmp::Ordering::Equal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn orders_by_approximate_value() {
        let a = Decimal128::new(150, 2, false); // 1.50
        let b = Decimal128::new(200, 2, false); // 2.00
        assert!(a < b);
        let neg = Decimal128::new(150, 2, true); // -1.50
        assert!(neg < a);
    }
}
