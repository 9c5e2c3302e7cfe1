use anyhow::{ensure, Result};

use std::io::{Read, Write};

use serde::Serialize;

use crate::bitstream::{BitReader, BitWriter};
use crate::ExiError;

/// Exponent value flagging INF, -INF and NaN.
pub const FLOAT_SPECIAL_EXPONENT: i16 = -(1 << 14);
pub const FLOAT_EXPONENT_MAX: i64 = (1 << 14) - 1;

/// EXI float: decimal mantissa and base-10 exponent, both wire integers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct ExiFloat {
    pub mantissa: i64,
    pub exponent: i16,
}

impl ExiFloat {
    pub const INFINITY: ExiFloat = ExiFloat {
        mantissa: 1,
        exponent: FLOAT_SPECIAL_EXPONENT,
    };
    pub const NEG_INFINITY: ExiFloat = ExiFloat {
        mantissa: -1,
        exponent: FLOAT_SPECIAL_EXPONENT,
    };
    pub const NAN: ExiFloat = ExiFloat {
        mantissa: 0,
        exponent: FLOAT_SPECIAL_EXPONENT,
    };

    pub fn new(mantissa: i64, exponent: i16) -> Self {
        ExiFloat { mantissa, exponent }
    }

    pub fn is_special(&self) -> bool {
        self.exponent == FLOAT_SPECIAL_EXPONENT
    }

    pub fn is_nan(&self) -> bool {
        self.is_special() && self.mantissa != 1 && self.mantissa != -1
    }

    pub fn to_f64(self) -> f64 {
        if self.is_special() {
            return match self.mantissa {
                1 => f64::INFINITY,
                -1 => f64::NEG_INFINITY,
                _ => f64::NAN,
            };
        }
        self.mantissa as f64 * 10f64.powi(i32::from(self.exponent))
    }
}

/// EXI decimal: sign, integral part and the fractional digits in reverse
/// order, exactly as they travel on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct ExiDecimal {
    pub negative: bool,
    pub integral: u64,
    /// Fractional digits reversed: `1.230` carries `032` here as `32`.
    pub fraction_rev: u64,
}

impl ExiDecimal {
    pub fn new(negative: bool, integral: u64, fraction_rev: u64) -> Self {
        ExiDecimal {
            negative,
            integral,
            fraction_rev,
        }
    }

    /// Reconstruct by reversing the fractional digits and scaling.
    pub fn to_f64(self) -> f64 {
        let mut rev = self.fraction_rev;
        let mut fraction = 0u64;
        let mut scale = 1f64;
        while rev > 0 {
            fraction = fraction * 10 + rev % 10;
            rev /= 10;
            scale *= 10.0;
        }
        let value = self.integral as f64 + fraction as f64 / scale;
        if self.negative {
            -value
        } else {
            value
        }
    }
}

/// Presence bits reported alongside a decoded date-time.
pub const SEC_PRESENCE: u16 = 0x0001;
pub const MIN_PRESENCE: u16 = 0x0002;
pub const HOUR_PRESENCE: u16 = 0x0004;
pub const MDAY_PRESENCE: u16 = 0x0008;
pub const MON_PRESENCE: u16 = 0x0010;
pub const YEAR_PRESENCE: u16 = 0x0020;
pub const TZONE_PRESENCE: u16 = 0x0200;

/// Which date-time components a value carries; derived from the schema
/// simple type behind the production.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DateTimeKind {
    DateTime,
    Time,
    Date,
    GYearMonth,
    GYear,
    GMonthDay,
    GDay,
    GMonth,
}

impl DateTimeKind {
    fn has_year(self) -> bool {
        matches!(
            self,
            DateTimeKind::DateTime
                | DateTimeKind::Date
                | DateTimeKind::GYearMonth
                | DateTimeKind::GYear
        )
    }

    fn has_month_day(self) -> bool {
        matches!(
            self,
            DateTimeKind::DateTime
                | DateTimeKind::Date
                | DateTimeKind::GYearMonth
                | DateTimeKind::GMonthDay
                | DateTimeKind::GDay
                | DateTimeKind::GMonth
        )
    }

    fn has_time(self) -> bool {
        matches!(self, DateTimeKind::DateTime | DateTimeKind::Time)
    }
}

/// Decoded date-time value. Component presence follows the kind; the mask
/// mirrors it for handler convenience.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ExiDateTime {
    pub year: i64,
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
    /// Fractional-second digits in reverse order, as on the wire.
    pub fraction_rev: Option<u64>,
    /// Offset from UTC in minutes.
    pub tz_minutes: Option<i16>,
    pub presence: u16,
}

impl Default for ExiDateTime {
    fn default() -> Self {
        ExiDateTime {
            year: 2000,
            month: 0,
            day: 0,
            hour: 0,
            minute: 0,
            second: 0,
            fraction_rev: None,
            tz_minutes: None,
            presence: 0,
        }
    }
}

/// Typed EXI value decoding on top of the aligned n-bit primitive.
pub trait ValueRead {
    fn read_n_bit_uint(&mut self, n: u8) -> Result<u32>;

    fn read_boolean(&mut self) -> Result<bool> {
        Ok(self.read_n_bit_uint(1)? != 0)
    }

    /// Unbounded unsigned integer: 7-bit groups, least significant first,
    /// MSB of each byte flags continuation.
    fn read_unsigned(&mut self) -> Result<u64> {
        let mut value: u64 = 0;
        let mut shift: u32 = 0;
        loop {
            let byte = self.read_n_bit_uint(8)?;
            let chunk = u64::from(byte & 0x7F);
            ensure!(
                shift < 64 && (shift != 63 || chunk <= 1),
                ExiError::InvalidInput
            );
            value |= chunk << shift;
            if byte & 0x80 == 0 {
                break;
            }
            shift += 7;
        }
        Ok(value)
    }

    /// Sign bit then magnitude; sign 1 negates, so the range is symmetric.
    fn read_integer(&mut self) -> Result<i64> {
        let negative = self.read_boolean()?;
        let magnitude = self.read_unsigned()?;
        ensure!(magnitude <= i64::MAX as u64, ExiError::InvalidInput);
        let value = magnitude as i64;
        Ok(if negative { -value } else { value })
    }

    /// Length-prefixed code-point sequence.
    fn read_string(&mut self) -> Result<String> {
        let length = self.read_unsigned()?;
        self.read_string_chars(length as usize)
    }

    /// Code-point sequence whose length is already known, e.g. from a
    /// string-table miss.
    fn read_string_chars(&mut self, length: usize) -> Result<String> {
        let mut out = String::with_capacity(length);
        for _ in 0..length {
            let cp = self.read_unsigned()?;
            let cp = u32::try_from(cp)
                .ok()
                .and_then(char::from_u32)
                .ok_or(ExiError::InvalidInput)?;
            out.push(cp);
        }
        Ok(out)
    }

    fn read_binary(&mut self) -> Result<Vec<u8>> {
        let length = self.read_unsigned()? as usize;
        let mut out = Vec::with_capacity(length.min(1 << 20));
        for _ in 0..length {
            out.push(self.read_n_bit_uint(8)? as u8);
        }
        Ok(out)
    }

    fn read_decimal(&mut self) -> Result<ExiDecimal> {
        let negative = self.read_boolean()?;
        let integral = self.read_unsigned()?;
        let fraction_rev = self.read_unsigned()?;
        Ok(ExiDecimal::new(negative, integral, fraction_rev))
    }

    /// Mantissa and base-10 exponent. Exponent -(2^14) flags the special
    /// values; anything outside the EXI ranges is rejected, never wrapped.
    fn read_float(&mut self) -> Result<ExiFloat> {
        let mantissa = self.read_integer()?;
        let exponent = self.read_integer()?;
        ensure!(
            exponent >= i64::from(FLOAT_SPECIAL_EXPONENT)
                && exponent <= FLOAT_EXPONENT_MAX,
            ExiError::InvalidInput
        );
        Ok(ExiFloat::new(mantissa, exponent as i16))
    }

    fn read_date_time(&mut self, kind: DateTimeKind) -> Result<ExiDateTime> {
        let mut dt = ExiDateTime::default();
        if kind.has_year() {
            dt.year = 2000 + self.read_integer()?;
            dt.presence |= YEAR_PRESENCE;
        }
        if kind.has_month_day() {
            let month_day = self.read_n_bit_uint(9)?;
            dt.month = (month_day / 32) as u8;
            dt.day = (month_day % 32) as u8;
            dt.presence |= MON_PRESENCE | MDAY_PRESENCE;
        }
        if kind.has_time() {
            let time = self.read_n_bit_uint(17)?;
            dt.second = (time % 64) as u8;
            dt.minute = ((time / 64) % 64) as u8;
            dt.hour = (time / 4096) as u8;
            dt.presence |= HOUR_PRESENCE | MIN_PRESENCE | SEC_PRESENCE;
            if self.read_boolean()? {
                dt.fraction_rev = Some(self.read_unsigned()?);
            }
        }
        if self.read_boolean()? {
            let tz = self.read_n_bit_uint(11)?;
            dt.tz_minutes = Some(tz as i16 - 896);
            dt.presence |= TZONE_PRESENCE;
        }
        Ok(dt)
    }
}

impl<R: Read> ValueRead for BitReader<R> {
    fn read_n_bit_uint(&mut self, n: u8) -> Result<u32> {
        BitReader::read_n_bit_uint(self, n)
    }
}

/// Typed EXI value encoding, bit-exact mirror of [`ValueRead`].
pub trait ValueWrite {
    fn write_n_bit_uint(&mut self, n: u8, value: u32) -> Result<()>;

    fn write_boolean(&mut self, value: bool) -> Result<()> {
        self.write_n_bit_uint(1, u32::from(value))
    }

    fn write_unsigned(&mut self, mut value: u64) -> Result<()> {
        loop {
            let chunk = (value & 0x7F) as u32;
            value >>= 7;
            if value == 0 {
                return self.write_n_bit_uint(8, chunk);
            }
            self.write_n_bit_uint(8, chunk | 0x80)?;
        }
    }

    fn write_integer(&mut self, value: i64) -> Result<()> {
        self.write_boolean(value < 0)?;
        self.write_unsigned(value.unsigned_abs())
    }

    fn write_string(&mut self, value: &str) -> Result<()> {
        self.write_unsigned(value.chars().count() as u64)?;
        self.write_string_chars(value)
    }

    fn write_string_chars(&mut self, value: &str) -> Result<()> {
        for ch in value.chars() {
            self.write_unsigned(u64::from(u32::from(ch)))?;
        }
        Ok(())
    }

    fn write_binary(&mut self, value: &[u8]) -> Result<()> {
        self.write_unsigned(value.len() as u64)?;
        for byte in value {
            self.write_n_bit_uint(8, u32::from(*byte))?;
        }
        Ok(())
    }

    fn write_decimal(&mut self, value: &ExiDecimal) -> Result<()> {
        self.write_boolean(value.negative)?;
        self.write_unsigned(value.integral)?;
        self.write_unsigned(value.fraction_rev)
    }

    fn write_float(&mut self, value: &ExiFloat) -> Result<()> {
        ensure!(
            value.exponent >= FLOAT_SPECIAL_EXPONENT
                && i64::from(value.exponent) <= FLOAT_EXPONENT_MAX,
            ExiError::InvalidInput
        );
        self.write_integer(value.mantissa)?;
        self.write_integer(i64::from(value.exponent))
    }

    fn write_date_time(
        &mut self,
        kind: DateTimeKind,
        value: &ExiDateTime,
    ) -> Result<()> {
        if kind.has_year() {
            self.write_integer(value.year - 2000)?;
        }
        if kind.has_month_day() {
            ensure!(
                value.month <= 12 && value.day <= 31,
                ExiError::InvalidInput
            );
            let month_day = u32::from(value.month) * 32 + u32::from(value.day);
            self.write_n_bit_uint(9, month_day)?;
        }
        if kind.has_time() {
            ensure!(
                value.hour < 24 && value.minute < 60 && value.second < 64,
                ExiError::InvalidInput
            );
            let time = (u32::from(value.hour) * 64 + u32::from(value.minute))
                * 64
                + u32::from(value.second);
            self.write_n_bit_uint(17, time)?;
            self.write_boolean(value.fraction_rev.is_some())?;
            if let Some(fraction) = value.fraction_rev {
                self.write_unsigned(fraction)?;
            }
        }
        self.write_boolean(value.tz_minutes.is_some())?;
        if let Some(tz) = value.tz_minutes {
            ensure!((-896..=1151).contains(&tz), ExiError::InvalidInput);
            self.write_n_bit_uint(11, (i32::from(tz) + 896) as u32)?;
        }
        Ok(())
    }
}

impl<W: Write> ValueWrite for BitWriter<W> {
    fn write_n_bit_uint(&mut self, n: u8, value: u32) -> Result<()> {
        BitWriter::write_n_bit_uint(self, n, value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error_kind;
    use crate::ExiError;

    use std::io::Cursor;

    use rstest::rstest;

    fn reader(bytes: &[u8]) -> BitReader<Cursor<Vec<u8>>> {
        BitReader::new(Cursor::new(bytes.to_vec()))
    }

    fn encode(f: impl FnOnce(&mut BitWriter<Vec<u8>>)) -> Vec<u8> {
        let mut w = BitWriter::new(Vec::new());
        f(&mut w);
        w.finish().unwrap()
    }

    #[test]
    fn unsigned_continuation_groups() {
        // 0xD4 = continuation + 0x54, 0x60 = final: 84 + 96 * 128
        let mut r = reader(&[0xD4, 0x60, 0x48]);
        assert_eq!(r.read_unsigned().unwrap(), 12372);
    }

    #[rstest]
    #[case(0, 1)]
    #[case(1, 1)]
    #[case(127, 1)]
    #[case(128, 2)]
    #[case(16383, 2)]
    #[case(16384, 3)]
    #[case(u64::MAX, 10)]
    fn unsigned_round_trip_and_length(#[case] x: u64, #[case] bytes: usize) {
        let out = encode(|w| w.write_unsigned(x).unwrap());
        assert_eq!(out.len(), bytes);
        assert_eq!(reader(&out).read_unsigned().unwrap(), x);
    }

    #[rstest]
    #[case(0)]
    #[case(1)]
    #[case(-1)]
    #[case(i64::MAX)]
    #[case(-i64::MAX)]
    fn integer_round_trip(#[case] x: i64) {
        let out = encode(|w| w.write_integer(x).unwrap());
        assert_eq!(reader(&out).read_integer().unwrap(), x);
    }

    #[test]
    fn n_bit_round_trip_all_widths() {
        for n in 1..=32u8 {
            let max = if n == 32 { u32::MAX } else { (1u32 << n) - 1 };
            for x in [0u32, 1, max / 2, max] {
                let out = encode(|w| w.write_n_bit_uint(n, x).unwrap());
                assert_eq!(
                    reader(&out).read_n_bit_uint(n).unwrap(),
                    x,
                    "width {n}"
                );
            }
        }
    }

    #[test]
    fn string_code_points_survive_multibyte() {
        let text = "наява?";
        let out = encode(|w| w.write_string(text).unwrap());
        assert_eq!(reader(&out).read_string().unwrap(), text);
    }

    #[test]
    fn binary_round_trip() {
        let data = [0u8, 1, 2, 0xFF, 0x80];
        let out = encode(|w| w.write_binary(&data).unwrap());
        assert_eq!(reader(&out).read_binary().unwrap(), data);
    }

    #[test]
    fn decimal_keeps_reversed_fraction() {
        let dec = ExiDecimal::new(true, 5, 100);
        let out = encode(|w| w.write_decimal(&dec).unwrap());
        let back = reader(&out).read_decimal().unwrap();
        assert_eq!(back, dec);
        // 100 reversed is 001
        assert!((back.to_f64() + 5.001).abs() < 1e-9);
    }

    #[rstest]
    #[case(ExiFloat::new(15, -1))]
    #[case(ExiFloat::new(-987, 3))]
    #[case(ExiFloat::new(0, 0))]
    #[case(ExiFloat::INFINITY)]
    #[case(ExiFloat::NEG_INFINITY)]
    #[case(ExiFloat::NAN)]
    fn float_round_trip(#[case] x: ExiFloat) {
        let out = encode(|w| w.write_float(&x).unwrap());
        assert_eq!(reader(&out).read_float().unwrap(), x);
    }

    #[test]
    fn float_specials_decode_as_expected() {
        assert!(ExiFloat::INFINITY.to_f64().is_infinite());
        assert!(ExiFloat::NEG_INFINITY.to_f64() < 0.0);
        assert!(ExiFloat::NAN.is_nan());
    }

    #[test]
    fn float_exponent_out_of_range_is_rejected() {
        // Exponent 16384 is one past the legal maximum.
        let out = encode(|w| {
            w.write_integer(1).unwrap();
            w.write_integer(16384).unwrap();
        });
        let err = reader(&out).read_float().unwrap_err();
        assert_eq!(error_kind(&err), ExiError::InvalidInput);
    }

    #[test]
    fn oversized_mantissa_is_rejected_not_truncated() {
        // Magnitude 2^63 does not fit the mantissa range.
        let out = encode(|w| {
            w.write_boolean(true).unwrap();
            w.write_unsigned(1u64 << 63).unwrap();
            w.write_integer(0).unwrap();
        });
        let err = reader(&out).read_float().unwrap_err();
        assert_eq!(error_kind(&err), ExiError::InvalidInput);
    }

    #[test]
    fn date_time_full_round_trip() {
        let dt = ExiDateTime {
            year: 2012,
            month: 9,
            day: 28,
            hour: 13,
            minute: 45,
            second: 2,
            fraction_rev: Some(521),
            tz_minutes: Some(120),
            ..Default::default()
        };
        let out = encode(|w| {
            w.write_date_time(DateTimeKind::DateTime, &dt).unwrap()
        });
        let back = reader(&out)
            .read_date_time(DateTimeKind::DateTime)
            .unwrap();
        assert_eq!(back.year, 2012);
        assert_eq!((back.month, back.day), (9, 28));
        assert_eq!((back.hour, back.minute, back.second), (13, 45, 2));
        assert_eq!(back.fraction_rev, Some(521));
        assert_eq!(back.tz_minutes, Some(120));
        assert_ne!(back.presence & YEAR_PRESENCE, 0);
        assert_ne!(back.presence & TZONE_PRESENCE, 0);
    }

    #[test]
    fn g_day_carries_only_month_day() {
        let dt = ExiDateTime {
            day: 6,
            ..Default::default()
        };
        let out =
            encode(|w| w.write_date_time(DateTimeKind::GDay, &dt).unwrap());
        // 9 bits month-day + 1 bit timezone presence, padded to 2 bytes.
        assert_eq!(out.len(), 2);
        let back = reader(&out).read_date_time(DateTimeKind::GDay).unwrap();
        assert_eq!(back.day, 6);
        assert_eq!(back.presence & YEAR_PRESENCE, 0);
    }
}
