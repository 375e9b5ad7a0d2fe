use tracing::debug;

/// `mantissa * 10^-scale`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Decimal {
    mantissa: i128,
    scale: u32,
}

impl Decimal {
    const ZERO: Decimal = Decimal {
        mantissa: 0,
        scale: 0,
    };

    fn from_f64(value: f64) -> Option<Self> {
        if !value.is_finite() {
            return None;
        }
        // `{:e}` prints the shortest digits that round-trip, e.g. `-1.234e-1`.
        let text = format!("{value:e}");
        let (digits, exponent) = text.split_once('e')?;
        let exponent: i64 = exponent.parse().ok()?;
        let (negative, digits) = match digits.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, digits),
        };
        let (int_part, frac_part) = digits.split_once('.').unwrap_or((digits, ""));

        let mut mantissa: i128 = 0;
        for ch in int_part.chars().chain(frac_part.chars()) {
            let digit = ch.to_digit(10)? as i128;
            mantissa = mantissa.checked_mul(10)?.checked_add(digit)?;
        }

        let scale = frac_part.len() as i64 - exponent;
        let (mantissa, scale) = if scale < 0 {
            let factor = 10i128.checked_pow(u32::try_from(-scale).ok()?)?;
            (mantissa.checked_mul(factor)?, 0)
        } else {
            (mantissa, u32::try_from(scale).ok()?)
        };

        Some(Self {
            mantissa: if negative { -mantissa } else { mantissa },
            scale,
        })
    }

    fn checked_mul(self, other: Decimal) -> Option<Decimal> {
        Some(Decimal {
            mantissa: self.mantissa.checked_mul(other.mantissa)?,
            scale: self.scale.checked_add(other.scale)?,
        })
    }

    fn checked_add(self, other: Decimal) -> Option<Decimal> {
        let scale = self.scale.max(other.scale);
        let lhs = self
            .mantissa
            .checked_mul(10i128.checked_pow(scale - self.scale)?)?;
        let rhs = other
            .mantissa
            .checked_mul(10i128.checked_pow(scale - other.scale)?)?;
        Some(Decimal {
            mantissa: lhs.checked_add(rhs)?,
            scale,
        })
    }

    fn to_f64(self) -> Option<f64> {
        let sign = if self.mantissa < 0 { "-" } else { "" };
        let text = format!("{sign}{}e-{}", self.mantissa.unsigned_abs(), self.scale);
        text.parse().ok()
    }
}

/// `scale(0.1234, 100.0)` is `12.34`, not `12.339999999999999`.
pub fn scale(value: f64, factor: f64) -> f64 {
    Decimal::from_f64(value)
        .zip(Decimal::from_f64(factor))
        .and_then(|(value, factor)| value.checked_mul(factor))
        .and_then(Decimal::to_f64)
        .unwrap_or_else(|| {
            debug!(value, factor, "decimal scale out of range; using native multiplication");
            value * factor
        })
}

pub fn sum(values: &[f64]) -> f64 {
    values
        .iter()
        .try_fold(Decimal::ZERO, |acc, value| {
            acc.checked_add(Decimal::from_f64(*value)?)
        })
        .and_then(Decimal::to_f64)
        .unwrap_or_else(|| {
            debug!(count = values.len(), "decimal sum out of range; using native addition");
            values.iter().sum()
        })
}
