//! Fixed-point decimal values
//!
//! MonetDB decimals have up to 38 digits, so the unscaled value fits an
//! `i128`. Text results carry them as `-123.45`; binary results carry the
//! unscaled integer and the scale comes from the column metadata.

use crate::error::{Error, Result};

/// A decimal number: `value * 10^-scale`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Decimal {
    /// Unscaled value
    pub value: i128,
    /// Digits after the decimal point
    pub scale: u32,
}

impl Decimal {
    /// Create a decimal from its unscaled value and scale
    pub fn new(value: i128, scale: u32) -> Self {
        Self { value, scale }
    }

    /// Parse the text form used in tuple lines
    pub fn parse(text: &str) -> Result<Self> {
        let invalid = || Error::DataConversion(format!("invalid decimal: {:?}", text));
        let (negative, digits) = match text.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, text.strip_prefix('+').unwrap_or(text)),
        };
        let (int_part, frac_part) = digits.split_once('.').unwrap_or((digits, ""));
        if int_part.is_empty() && frac_part.is_empty() {
            return Err(invalid());
        }
        if !int_part.bytes().chain(frac_part.bytes()).all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }

        let mut value: i128 = 0;
        for b in int_part.bytes().chain(frac_part.bytes()) {
            value = value
                .checked_mul(10)
                .and_then(|v| v.checked_add((b - b'0') as i128))
                .ok_or_else(invalid)?;
        }
        if negative {
            value = -value;
        }
        Ok(Self {
            value,
            scale: frac_part.len() as u32,
        })
    }

    /// Approximate value as a float
    pub fn to_f64(&self) -> f64 {
        self.value as f64 / 10f64.powi(self.scale as i32)
    }
}

impl std::fmt::Display for Decimal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.scale == 0 {
            return write!(f, "{}", self.value);
        }
        let sign = if self.value < 0 { "-" } else { "" };
        let digits = self.value.unsigned_abs().to_string();
        let scale = self.scale as usize;
        let padded = if digits.len() <= scale {
            format!("{}{}", "0".repeat(scale + 1 - digits.len()), digits)
        } else {
            digits
        };
        let (int_part, frac_part) = padded.split_at(padded.len() - scale);
        write!(f, "{}{}.{}", sign, int_part, frac_part)
    }
}
