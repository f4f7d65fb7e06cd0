use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;
use std::str::FromStr;

const KILO: u64 = 1 << 10;
const MEGA: u64 = 1 << 20;
const GIGA: u64 = 1 << 30;
const TERA: u64 = 1 << 40;

static QUANTITY_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^\s*(\d+)?(\.\d+)?\s*([kmgt]?)(b?)\s*$").expect("quantity regex")
});

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum QuantityError {
    #[error("invalid quantity: {0}")]
    Invalid(String),
    #[error("magnitude missing: {0}")]
    MissingMagnitude(String),
    #[error("invalid quantity: {0}; the byte (B) suffix is required")]
    MissingByteSuffix(String),
    #[error("cannot cast to an integer value: {input} (absolute value {value})")]
    NotIntegral { input: String, value: f64 },
    #[error("quantity out of range: {0}")]
    Overflow(String),
    #[error("negative quantity: {lhs} {op} {rhs}")]
    Negative { lhs: u64, op: char, rhs: i64 },
    #[error("division by zero")]
    DivisionByZero,
}

/// Whether the text to parse can, must, or must not carry the `B` suffix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteSuffix {
    Missing,
    Optional,
    Mandatory,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unit {
    Auto,
    Basic,
    Kilo,
    Mega,
    Giga,
    Tera,
}

impl Unit {
    fn multiplier(self) -> u64 {
        match self {
            Unit::Auto | Unit::Basic => 1,
            Unit::Kilo => KILO,
            Unit::Mega => MEGA,
            Unit::Giga => GIGA,
            Unit::Tera => TERA,
        }
    }

    fn suffix(self) -> &'static str {
        match self {
            Unit::Auto | Unit::Basic => "",
            Unit::Kilo => "K",
            Unit::Mega => "M",
            Unit::Giga => "G",
            Unit::Tera => "T",
        }
    }

    fn fit(magnitude: u64) -> Unit {
        if magnitude >= TERA {
            Unit::Tera
        } else if magnitude >= GIGA {
            Unit::Giga
        } else if magnitude >= MEGA {
            Unit::Mega
        } else if magnitude >= KILO {
            Unit::Kilo
        } else {
            Unit::Basic
        }
    }
}

/// A computer quantity such as `4K` or `8 GB`, where 1K = 1024.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Quantity {
    magnitude: u64,
    byte_quantity: bool,
}

impl Quantity {
    pub fn new(magnitude: u64) -> Self {
        Self {
            magnitude,
            byte_quantity: false,
        }
    }

    pub fn bytes(magnitude: u64) -> Self {
        Self {
            magnitude,
            byte_quantity: true,
        }
    }

    /// Parse `text` as a plain quantity, or as a byte quantity with an
    /// optional `B` suffix when `byte_quantity` is set.
    pub fn from_text(text: &str, byte_quantity: bool) -> Result<Self, QuantityError> {
        let mode = if byte_quantity {
            ByteSuffix::Optional
        } else {
            ByteSuffix::Missing
        };
        Ok(Self {
            magnitude: Self::parse(text, mode)?,
            byte_quantity,
        })
    }

    /// Absolute magnitude, in bytes or units, of the given text.
    pub fn parse(text: &str, byte_suffix: ByteSuffix) -> Result<u64, QuantityError> {
        parse_parts(text, byte_suffix).map(|(magnitude, _)| magnitude)
    }

    pub fn magnitude(&self) -> u64 {
        self.magnitude
    }

    pub fn is_byte_quantity(&self) -> bool {
        self.byte_quantity
    }

    pub fn set_byte_quantity(&mut self, value: bool) {
        self.byte_quantity = value;
    }

    pub fn to_string_in(&self, unit: Unit) -> String {
        let unit = match unit {
            Unit::Auto => Unit::fit(self.magnitude),
            other => other,
        };
        let mult = unit.multiplier();
        let mut suffix = unit.suffix().to_string();
        if self.byte_quantity {
            suffix.push_str(if mult == 1 { "bytes" } else { "B" });
        }

        let mut out = if self.magnitude % mult == 0 {
            (self.magnitude / mult).to_string()
        } else {
            format!("{:.2}", self.magnitude as f64 / mult as f64)
        };
        if !suffix.is_empty() {
            if self.byte_quantity {
                out.push(' ');
            }
            out.push_str(&suffix);
        }
        out
    }

    pub fn checked_add(self, rhs: i64) -> Result<Self, QuantityError> {
        let res = self.magnitude as i128 + rhs as i128;
        self.with_result(res, '+', rhs)
    }

    pub fn checked_sub(self, rhs: i64) -> Result<Self, QuantityError> {
        let res = self.magnitude as i128 - rhs as i128;
        self.with_result(res, '-', rhs)
    }

    pub fn checked_mul(self, rhs: i64) -> Result<Self, QuantityError> {
        let res = self.magnitude as i128 * rhs as i128;
        self.with_result(res, '*', rhs)
    }

    pub fn checked_div(self, rhs: i64) -> Result<Self, QuantityError> {
        if rhs == 0 {
            return Err(QuantityError::DivisionByZero);
        }
        let res = self.magnitude as i128 / rhs as i128;
        self.with_result(res, '/', rhs)
    }

    fn with_result(self, res: i128, op: char, rhs: i64) -> Result<Self, QuantityError> {
        if res < 0 {
            return Err(QuantityError::Negative {
                lhs: self.magnitude,
                op,
                rhs,
            });
        }
        let magnitude = u64::try_from(res)
            .map_err(|_| QuantityError::Overflow(format!("{} {} {}", self.magnitude, op, rhs)))?;
        Ok(Self {
            magnitude,
            byte_quantity: self.byte_quantity,
        })
    }
}

fn parse_parts(text: &str, byte_suffix: ByteSuffix) -> Result<(u64, bool), QuantityError> {
    let caps = QUANTITY_RE
        .captures(text)
        .ok_or_else(|| QuantityError::Invalid(text.to_string()))?;
    let has_bytes = caps.get(4).is_some_and(|m| !m.as_str().is_empty());
    match byte_suffix {
        ByteSuffix::Missing if has_bytes => return Err(QuantityError::Invalid(text.to_string())),
        ByteSuffix::Mandatory if !has_bytes => {
            return Err(QuantityError::MissingByteSuffix(text.to_string()))
        }
        _ => {}
    }

    let mult = match caps
        .get(3)
        .and_then(|m| m.as_str().chars().next())
        .map(|c| c.to_ascii_lowercase())
    {
        Some('k') => KILO,
        Some('m') => MEGA,
        Some('g') => GIGA,
        Some('t') => TERA,
        _ => 1,
    };

    let int_part = caps.get(1).map(|m| m.as_str()).unwrap_or("");
    let frac_part = caps.get(2).map(|m| m.as_str()).unwrap_or("");
    if int_part.is_empty() && frac_part.is_empty() {
        return Err(QuantityError::MissingMagnitude(text.to_string()));
    }

    let magnitude = if frac_part.is_empty() {
        int_part
            .parse::<u64>()
            .ok()
            .and_then(|v| v.checked_mul(mult))
            .ok_or_else(|| QuantityError::Overflow(text.to_string()))?
    } else {
        let literal = format!("{int_part}{frac_part}");
        let value = literal
            .parse::<f64>()
            .map_err(|_| QuantityError::Invalid(text.to_string()))?
            * mult as f64;
        if value.fract() != 0.0 {
            return Err(QuantityError::NotIntegral {
                input: text.to_string(),
                value,
            });
        }
        if value > u64::MAX as f64 {
            return Err(QuantityError::Overflow(text.to_string()));
        }
        value as u64
    };
    Ok((magnitude, has_bytes))
}

impl FromStr for Quantity {
    type Err = QuantityError;

    /// Accepts both plain and byte quantities; the `B` suffix marks the
    /// result as a byte quantity.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (magnitude, byte_quantity) = parse_parts(s, ByteSuffix::Optional)?;
        Ok(Self {
            magnitude,
            byte_quantity,
        })
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_string_in(Unit::Auto))
    }
}

impl From<Quantity> for u64 {
    fn from(q: Quantity) -> Self {
        q.magnitude
    }
}

impl From<u64> for Quantity {
    fn from(magnitude: u64) -> Self {
        Quantity::new(magnitude)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_plain_numbers_and_units() {
        use ByteSuffix::Missing;
        assert_eq!(Quantity::parse("0", Missing).unwrap(), 0);
        assert_eq!(Quantity::parse("7", Missing).unwrap(), 7);
        assert!(Quantity::parse("-1", Missing).is_err());

        assert_eq!(Quantity::parse("0k", Missing).unwrap(), 0);
        assert_eq!(Quantity::parse("7k", Missing).unwrap(), 7 * 1024);
        assert_eq!(Quantity::parse("1K", Missing).unwrap(), 1024);
        assert_eq!(Quantity::parse("1 k", Missing).unwrap(), 1024);
        assert!(Quantity::parse("-1k", Missing).is_err());
        assert_eq!(Quantity::parse("1m", Missing).unwrap(), 1 << 20);
        assert_eq!(Quantity::parse("1G", Missing).unwrap(), 1 << 30);
        assert_eq!(Quantity::parse("1t", Missing).unwrap(), 1 << 40);
        assert_eq!(Quantity::parse("1.5G", Missing).unwrap(), 3 << 29);

        for rejected in ["0b", "0B", "0Kb", "0 kB", "0 Mb", "0 MB"] {
            assert!(
                Quantity::parse(rejected, Missing).is_err(),
                "{rejected} should need a byte-aware parse"
            );
        }
    }

    #[test]
    fn parse_byte_suffix_modes() {
        use ByteSuffix::{Mandatory, Optional};
        assert_eq!(
            Quantity::parse("0", Mandatory),
            Err(QuantityError::MissingByteSuffix("0".into()))
        );
        assert!(Quantity::parse("0k", Mandatory).is_err());
        assert_eq!(Quantity::parse("0b", Mandatory).unwrap(), 0);
        assert_eq!(Quantity::parse("0KB", Mandatory).unwrap(), 0);
        assert_eq!(Quantity::parse("2 KB", Mandatory).unwrap(), 2048);

        assert_eq!(Quantity::parse("0", Optional).unwrap(), 0);
        assert_eq!(Quantity::parse("0k", Optional).unwrap(), 0);
        assert_eq!(Quantity::parse("0b", Optional).unwrap(), 0);
        assert_eq!(Quantity::parse("2 k", Optional).unwrap(), 2048);
        assert_eq!(Quantity::parse("2 KB", Optional).unwrap(), 2048);
    }

    #[test]
    fn parse_rejects_fractions_and_empty_magnitudes() {
        assert!(matches!(
            Quantity::parse("1.3", ByteSuffix::Missing),
            Err(QuantityError::NotIntegral { .. })
        ));
        assert!(matches!(
            Quantity::parse(" K ", ByteSuffix::Missing),
            Err(QuantityError::MissingMagnitude(_))
        ));
        assert_eq!(Quantity::parse(".5k", ByteSuffix::Missing).unwrap(), 512);
    }

    #[test]
    fn renders_with_automatic_unit() {
        let plain = |s: &str| Quantity::from_text(s, false).unwrap().to_string();
        let bytes = |s: &str| Quantity::from_text(s, true).unwrap().to_string();
        assert_eq!(plain("1"), "1");
        assert_eq!(plain("1 k"), "1K");
        assert_eq!(plain("1 m "), "1M");
        assert_eq!(plain("1 G "), "1G");
        assert_eq!(bytes("1"), "1 bytes");
        assert_eq!(bytes("1 k"), "1 KB");
        assert_eq!(bytes("1 m "), "1 MB");
        assert_eq!(bytes("1 G "), "1 GB");
        assert_eq!(bytes("1242Kb"), "1.21 MB");
        assert_eq!(Quantity::new(3 << 20).to_string_in(Unit::Kilo), "3072K");
    }

    #[test]
    fn from_str_detects_byte_suffix() {
        let q: Quantity = "4 MB".parse().unwrap();
        assert!(q.is_byte_quantity());
        assert_eq!(q.magnitude(), 4 << 20);
        let q: Quantity = "4M".parse().unwrap();
        assert!(!q.is_byte_quantity());
    }

    #[test]
    fn checked_math() {
        let q = Quantity::new(0).checked_add(10).unwrap();
        assert_eq!(q.magnitude(), 10);
        let q = q.checked_mul(1024).unwrap();
        assert_eq!(q.magnitude(), 10 * 1024);
        let q = q.checked_sub(7).unwrap();
        assert_eq!(q.magnitude(), 10 * 1024 - 7);
        assert_eq!(Quantity::new(6).checked_div(4).unwrap().magnitude(), 1);

        assert!(matches!(
            Quantity::new(6).checked_sub(2048),
            Err(QuantityError::Negative { op: '-', .. })
        ));
        assert_eq!(
            Quantity::new(6).checked_div(0),
            Err(QuantityError::DivisionByZero)
        );
        assert!(Quantity::bytes(1).checked_add(1).unwrap().is_byte_quantity());
    }
}
