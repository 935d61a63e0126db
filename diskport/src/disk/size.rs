//! Size quantities.
//!
//! Volume sizes arrive as Kubernetes-style quantity strings (`10Gi`, `500M`,
//! `1.5Gi`, `1e9`). qemu-img and dd only understand plain byte counts, so a
//! quantity is kept as an exact fraction and rendered as an integer string.

use std::fmt;
use std::str::FromStr;

use diskport_shared::errors::{DiskportError, DiskportResult};
use serde::{Deserialize, Serialize};

/// A size with an optional binary (`Ki`..`Ei`) or decimal (`n`..`E`) suffix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SizeQuantity {
    text: String,
    numerator: u128,
    denominator: u128,
}

impl SizeQuantity {
    /// Exact byte count.
    pub fn from_bytes(bytes: u64) -> Self {
        Self {
            text: bytes.to_string(),
            numerator: u128::from(bytes),
            denominator: 1,
        }
    }

    /// Whether the quantity is a whole number of bytes.
    pub fn is_integral(&self) -> bool {
        self.numerator % self.denominator == 0
    }

    /// Byte count string for qemu-img/dd.
    ///
    /// Whole byte counts render exactly; fractional ones round up so a
    /// volume is never sized below what was asked for.
    pub fn to_qemu_size(&self) -> String {
        self.whole_bytes().to_string()
    }

    /// Byte count as a signed 64-bit integer.
    pub fn to_bytes(&self) -> DiskportResult<i64> {
        i64::try_from(self.whole_bytes()).map_err(|_| DiskportError::InvalidSize(self.text.clone()))
    }

    fn whole_bytes(&self) -> u128 {
        self.numerator.div_ceil(self.denominator)
    }
}

impl FromStr for SizeQuantity {
    type Err = DiskportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || DiskportError::InvalidSize(s.to_string());
        let text = s.trim();
        let unsigned = text.strip_prefix('+').unwrap_or(text);

        let number_len = unsigned
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(unsigned.len());
        let (number, suffix) = unsigned.split_at(number_len);

        let (whole, fraction) = number.split_once('.').unwrap_or((number, ""));
        if (whole.is_empty() && fraction.is_empty()) || fraction.contains('.') {
            return Err(invalid());
        }

        let digits = format!("{whole}{fraction}");
        let mut numerator: u128 = digits.parse().map_err(|_| invalid())?;
        let mut denominator = pow(10, fraction.len() as u32).ok_or_else(invalid)?;

        match parse_suffix(suffix).ok_or_else(invalid)? {
            Scale::Binary(power) => {
                numerator = numerator
                    .checked_mul(pow(1024, power).ok_or_else(invalid)?)
                    .ok_or_else(invalid)?;
            }
            Scale::Decimal(exponent) if exponent >= 0 => {
                numerator = numerator
                    .checked_mul(pow(10, exponent.unsigned_abs()).ok_or_else(invalid)?)
                    .ok_or_else(invalid)?;
            }
            Scale::Decimal(exponent) => {
                denominator = denominator
                    .checked_mul(pow(10, exponent.unsigned_abs()).ok_or_else(invalid)?)
                    .ok_or_else(invalid)?;
            }
        }

        Ok(Self {
            text: text.to_string(),
            numerator,
            denominator,
        })
    }
}

enum Scale {
    Binary(u32),
    Decimal(i32),
}

fn parse_suffix(suffix: &str) -> Option<Scale> {
    let scale = match suffix {
        "" => Scale::Decimal(0),
        "Ki" => Scale::Binary(1),
        "Mi" => Scale::Binary(2),
        "Gi" => Scale::Binary(3),
        "Ti" => Scale::Binary(4),
        "Pi" => Scale::Binary(5),
        "Ei" => Scale::Binary(6),
        "n" => Scale::Decimal(-9),
        "u" => Scale::Decimal(-6),
        "m" => Scale::Decimal(-3),
        "k" => Scale::Decimal(3),
        "M" => Scale::Decimal(6),
        "G" => Scale::Decimal(9),
        "T" => Scale::Decimal(12),
        "P" => Scale::Decimal(15),
        "E" => Scale::Decimal(18),
        exp => {
            let digits = exp.strip_prefix(['e', 'E'])?;
            Scale::Decimal(digits.parse().ok()?)
        }
    };
    Some(scale)
}

fn pow(base: u128, exponent: u32) -> Option<u128> {
    base.checked_pow(exponent)
}

impl TryFrom<String> for SizeQuantity {
    type Error = DiskportError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<SizeQuantity> for String {
    fn from(size: SizeQuantity) -> Self {
        size.text
    }
}

impl fmt::Display for SizeQuantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn qemu(s: &str) -> String {
        s.parse::<SizeQuantity>().unwrap().to_qemu_size()
    }

    #[test]
    fn test_plain_and_suffixed() {
        assert_eq!(qemu("1024"), "1024");
        assert_eq!(qemu("1Ki"), "1024");
        assert_eq!(qemu("10Gi"), "10737418240");
        assert_eq!(qemu("1.5Gi"), "1610612736");
        assert_eq!(qemu("500M"), "500000000");
        assert_eq!(qemu("2k"), "2000");
        assert_eq!(qemu("1e9"), "1000000000");
        assert_eq!(qemu("1E"), "1000000000000000000");
        assert_eq!(qemu(" +64Mi "), "67108864");
    }

    #[test]
    fn test_fractional_rounds_up() {
        let size: SizeQuantity = "1500m".parse().unwrap();
        assert!(!size.is_integral());
        assert_eq!(size.to_qemu_size(), "2");

        assert_eq!(qemu("0.1"), "1");
        assert_eq!(qemu("2000m"), "2");
    }

    #[test]
    fn test_too_large_for_i64_still_renders() {
        let size: SizeQuantity = "16Ei".parse().unwrap();
        assert_eq!(size.to_qemu_size(), "18446744073709551616");
        assert!(size.to_bytes().is_err());
    }

    #[test]
    fn test_invalid_quantities() {
        for bad in ["", "Gi", "-1Gi", "1.2.3", "10XB", "1e", ".", "1 Gi"] {
            assert!(bad.parse::<SizeQuantity>().is_err(), "{bad:?} should be rejected");
        }
    }

    #[test]
    fn test_serde_as_string() {
        let size: SizeQuantity = serde_json::from_str(r#""2Gi""#).unwrap();
        assert_eq!(size.to_bytes().unwrap(), 2 * 1024 * 1024 * 1024);
        assert_eq!(serde_json::to_string(&size).unwrap(), r#""2Gi""#);
    }

    proptest! {
        #[test]
        fn prop_integer_bytes_render_exactly(bytes in any::<u64>()) {
            let size = SizeQuantity::from_bytes(bytes);
            prop_assert_eq!(size.to_qemu_size(), bytes.to_string());

            let parsed: SizeQuantity = bytes.to_string().parse().unwrap();
            prop_assert_eq!(parsed.to_qemu_size(), bytes.to_string());
        }

        #[test]
        fn prop_binary_suffix_scales(value in 0u64..1_000_000, power in 1u32..4) {
            let suffix = ["Ki", "Mi", "Gi"][(power - 1) as usize];
            let size: SizeQuantity = format!("{value}{suffix}").parse().unwrap();
            let expected = u128::from(value) * 1024u128.pow(power);
            prop_assert_eq!(size.to_qemu_size(), expected.to_string());
        }
    }
}
