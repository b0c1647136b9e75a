// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Storage quantities (`500Mi`, `2Gi`, `1.5G`).

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

const SUFFIXES: &[(&str, u128)] = &[
    ("Ki", 1 << 10),
    ("Mi", 1 << 20),
    ("Gi", 1 << 30),
    ("Ti", 1 << 40),
    ("Pi", 1 << 50),
    ("Ei", 1 << 60),
    ("k", 1_000),
    ("M", 1_000_000),
    ("G", 1_000_000_000),
    ("T", 1_000_000_000_000),
    ("P", 1_000_000_000_000_000),
    ("E", 1_000_000_000_000_000_000),
];

/// A storage quantity, compared by its byte value.
#[derive(Debug, Clone)]
pub struct Quantity {
    raw: String,
    bytes: u128,
}

impl Quantity {
    /// Value in bytes.
    pub fn bytes(&self) -> u128 {
        self.bytes
    }

    /// The string the quantity was parsed from.
    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl FromStr for Quantity {
    type Err = Error;

    fn from_str(raw: &str) -> Result<Self> {
        let invalid =
            || Error::validation("quantity", format!("cannot parse '{raw}' as a storage size"));
        let trimmed = raw.trim();

        let (number, multiplier) = SUFFIXES
            .iter()
            .find_map(|(suffix, mult)| trimmed.strip_suffix(suffix).map(|n| (n, *mult)))
            .unwrap_or((trimmed, 1));

        let (whole, fraction) = match number.split_once('.') {
            Some((_, "")) => return Err(invalid()),
            Some((w, f)) => (w, f),
            None => (number, ""),
        };
        if whole.is_empty() || !whole.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }
        if !fraction.bytes().all(|b| b.is_ascii_digit()) || fraction.len() > 9 {
            return Err(invalid());
        }

        let whole: u128 = whole.parse().map_err(|_| invalid())?;
        let mut bytes = whole.checked_mul(multiplier).ok_or_else(invalid)?;
        if !fraction.is_empty() {
            let scale = 10u128.pow(fraction.len() as u32);
            let frac: u128 = fraction.parse().map_err(|_| invalid())?;
            bytes += frac * multiplier / scale;
        }

        Ok(Self {
            raw: trimmed.to_string(),
            bytes,
        })
    }
}

impl PartialEq for Quantity {
    fn eq(&self, other: &Self) -> bool {
        self.bytes == other.bytes
    }
}

impl Eq for Quantity {}

impl PartialOrd for Quantity {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Quantity {
    fn cmp(&self, other: &Self) -> Ordering {
        self.bytes.cmp(&other.bytes)
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}
