//! Fractional ordering keys.
//!
//! An [`OrderKey`] is a base-64 number written as a string so that plain
//! lexical comparison matches numeric comparison. A key consists of
//! `order` copies of the `~` marker followed by `order + 1` integer digits
//! and any number of fractional digits:
//!
//! ```text
//! "1"      -> 1
//! "1U"     -> 1.5
//! "~10"    -> 64
//! ```
//!
//! `~` sorts after every digit, so a longer integer part always sorts
//! higher. Fractional digits never end in zero and the integer part never
//! carries leading zeros, which keeps the representation unique.
//!
//! Averaging two keys is exact (one extra fractional digit absorbs the
//! halving), so a key strictly between any two distinct keys always exists
//! and can be produced without touching any other key.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Digit alphabet in ascending ASCII order.
const ALPHABET: &[u8; 64] = b"0123456789?@ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";

/// Marker prefix counting the extra integer digits.
const ORDER_MARKER: u8 = b'~';

const RADIX: u16 = 64;

/// Fractional sort key supporting insertion between any two keys.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct OrderKey(String);

impl OrderKey {
    /// Parse and validate a key read from storage or a client.
    pub fn parse(value: impl Into<String>) -> Result<Self> {
        let value = value.into();
        let canonical = Number::parse(&value)?.format();
        if canonical.0 != value {
            return Err(Error::InvalidArgument(format!(
                "order key is not in canonical form: {value:?}"
            )));
        }
        Ok(canonical)
    }

    /// The default mid-range key used for the first item of an empty list.
    pub fn initial() -> Self {
        Self("1".to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns a key strictly between `low` and `high`.
    ///
    /// - both absent: the initial key
    /// - only `low`: the next whole number above `low`
    /// - only `high`: the average of zero and `high`
    ///
    /// Calling with `low >= high` is a contract violation and yields
    /// [`Error::InvalidArgument`].
    pub fn between(low: Option<&Self>, high: Option<&Self>) -> Result<Self> {
        match (low, high) {
            (None, None) => Ok(Self::initial()),
            (Some(low), None) => Ok(Number::parse(&low.0)?.increment().format()),
            (None, Some(high)) => {
                let high_num = Number::parse(&high.0)?;
                if high_num.is_zero() {
                    return Err(Error::InvalidArgument(
                        "no order key exists below zero".to_string(),
                    ));
                }
                Ok(Number::zero().average(&high_num).format())
            }
            (Some(low), Some(high)) => {
                if low >= high {
                    return Err(Error::InvalidArgument(format!(
                        "order key bounds out of order: {low} >= {high}"
                    )));
                }
                let low_num = Number::parse(&low.0)?;
                let high_num = Number::parse(&high.0)?;
                Ok(low_num.average(&high_num).format())
            }
        }
    }

    /// Returns `count` ascending keys strictly between `low` and `high`.
    ///
    /// With an upper bound the range is filled by recursive bisection so
    /// that the keys are spread evenly instead of crowding toward `low`.
    /// Without an upper bound keys are successive increments.
    pub fn between_many(low: Option<&Self>, high: Option<&Self>, count: usize) -> Result<Vec<Self>> {
        if count == 0 {
            return Ok(Vec::new());
        }

        if high.is_none() {
            let mut keys = Vec::with_capacity(count);
            let mut previous = low.cloned();
            for _ in 0..count {
                let next = Self::between(previous.as_ref(), None)?;
                keys.push(next.clone());
                previous = Some(next);
            }
            return Ok(keys);
        }

        let mut slots: Vec<Option<Self>> = vec![None; count];
        bisect(low, high, 0, count, &mut slots)?;
        slots
            .into_iter()
            .map(|slot| slot.ok_or_else(|| Error::Internal("bisection left a gap".to_string())))
            .collect()
    }
}

fn bisect(
    low: Option<&OrderKey>,
    high: Option<&OrderKey>,
    low_index: usize,
    high_index: usize,
    slots: &mut [Option<OrderKey>],
) -> Result<()> {
    let mid_index = (low_index + high_index) / 2;
    let mid = OrderKey::between(low, high)?;
    if low_index < mid_index {
        bisect(low, Some(&mid), low_index, mid_index, slots)?;
    }
    if mid_index + 1 < high_index {
        bisect(Some(&mid), high, mid_index + 1, high_index, slots)?;
    }
    slots[mid_index] = Some(mid);
    Ok(())
}

impl fmt::Display for OrderKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for OrderKey {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(value)
    }
}

impl From<OrderKey> for String {
    fn from(key: OrderKey) -> Self {
        key.0
    }
}

/// Digit-vector form of a key.
#[derive(Debug, Clone)]
struct Number {
    integer: Vec<u8>,
    fraction: Vec<u8>,
}

impl Number {
    fn zero() -> Self {
        Self {
            integer: vec![0],
            fraction: Vec::new(),
        }
    }

    fn parse(value: &str) -> Result<Self> {
        let bytes = value.as_bytes();
        let order = bytes.iter().take_while(|&&b| b == ORDER_MARKER).count();
        let digits = bytes[order..]
            .iter()
            .map(|&b| digit_value(b))
            .collect::<Option<Vec<u8>>>()
            .ok_or_else(|| Error::InvalidArgument(format!("malformed order key: {value:?}")))?;

        if digits.len() < order + 1 {
            return Err(Error::InvalidArgument(format!(
                "order key too short for its magnitude: {value:?}"
            )));
        }

        let (integer, fraction) = digits.split_at(order + 1);
        Ok(Self {
            integer: integer.to_vec(),
            fraction: fraction.to_vec(),
        })
    }

    fn is_zero(&self) -> bool {
        self.integer.iter().chain(&self.fraction).all(|&d| d == 0)
    }

    /// Drops the fraction and adds one to the integer part.
    fn increment(&self) -> Self {
        let mut integer = self.integer.clone();
        let mut carry = true;
        for digit in integer.iter_mut().rev() {
            if !carry {
                break;
            }
            let sum = u16::from(*digit) + 1;
            *digit = (sum % RADIX) as u8;
            carry = sum >= RADIX;
        }
        if carry {
            integer.insert(0, 1);
        }
        Self {
            integer,
            fraction: Vec::new(),
        }
    }

    /// Exact midpoint of `self` and `other`.
    fn average(&self, other: &Self) -> Self {
        let int_len = self.integer.len().max(other.integer.len());
        let frac_len = self.fraction.len().max(other.fraction.len());
        let a = self.aligned(int_len, frac_len);
        let b = other.aligned(int_len, frac_len);

        // Digit-wise sum, least significant first, with one extra carry digit.
        let mut sum = vec![0u8; a.len() + 1];
        let mut carry = 0u16;
        for i in (0..a.len()).rev() {
            let total = u16::from(a[i]) + u16::from(b[i]) + carry;
            sum[i + 1] = (total % RADIX) as u8;
            carry = total / RADIX;
        }
        sum[0] = carry as u8;

        // Halve, most significant first; the remainder becomes one more
        // fractional digit.
        let mut halved = Vec::with_capacity(sum.len() + 1);
        let mut remainder = 0u16;
        for &digit in &sum {
            let current = remainder * RADIX + u16::from(digit);
            halved.push((current / 2) as u8);
            remainder = current % 2;
        }
        halved.push((remainder * RADIX / 2) as u8);

        let (integer, fraction) = halved.split_at(int_len + 1);
        Self {
            integer: integer.to_vec(),
            fraction: fraction.to_vec(),
        }
    }

    fn aligned(&self, int_len: usize, frac_len: usize) -> Vec<u8> {
        let mut digits = vec![0u8; int_len - self.integer.len()];
        digits.extend_from_slice(&self.integer);
        digits.extend_from_slice(&self.fraction);
        digits.resize(int_len + frac_len, 0);
        digits
    }

    fn format(mut self) -> OrderKey {
        let leading = self
            .integer
            .iter()
            .take_while(|&&d| d == 0)
            .count()
            .min(self.integer.len() - 1);
        self.integer.drain(..leading);
        while self.fraction.last() == Some(&0) {
            self.fraction.pop();
        }

        let order = self.integer.len() - 1;
        let mut out = String::with_capacity(order + self.integer.len() + self.fraction.len());
        out.extend(std::iter::repeat(ORDER_MARKER as char).take(order));
        out.extend(
            self.integer
                .iter()
                .chain(&self.fraction)
                .map(|&d| ALPHABET[d as usize] as char),
        );
        OrderKey(out)
    }
}

fn digit_value(byte: u8) -> Option<u8> {
    ALPHABET
        .binary_search(&byte)
        .ok()
        .map(|index| index as u8)
}

/// Compares two `(key, id)` pairs the way ordered collections sort items.
pub fn compare_keyed<T: Ord>(a: (&OrderKey, &T), b: (&OrderKey, &T)) -> Ordering {
    a.0.cmp(b.0).then_with(|| a.1.cmp(b.1))
}
