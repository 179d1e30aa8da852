//! Hash-bucketed gray release predicate.
//!
//! A request field is hashed with MurmurHash3 (x86, 32-bit, seed 0) into a
//! bucket in `[0, 1000)`; the route matches when the bucket falls inside
//! `[start, end)`. The same field value always lands in the same bucket.

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;

use super::Predicate;
use crate::error::{GatewayError, GatewayResult};
use crate::exchange::Exchange;

pub const BUCKETS: u32 = 1000;

/// MurmurHash3 x86 32-bit.
pub fn murmur3_x86_32(data: &[u8], seed: u32) -> u32 {
    const C1: u32 = 0xcc9e_2d51;
    const C2: u32 = 0x1b87_3593;

    let mut h = seed;
    let mut chunks = data.chunks_exact(4);
    for chunk in &mut chunks {
        let mut k = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        k = k.wrapping_mul(C1).rotate_left(15).wrapping_mul(C2);
        h ^= k;
        h = h.rotate_left(13).wrapping_mul(5).wrapping_add(0xe654_6b64);
    }

    let tail = chunks.remainder();
    if !tail.is_empty() {
        let mut k = 0u32;
        for (i, b) in tail.iter().enumerate() {
            k |= (*b as u32) << (8 * i);
        }
        k = k.wrapping_mul(C1).rotate_left(15).wrapping_mul(C2);
        h ^= k;
    }

    h ^= data.len() as u32;
    h ^= h >> 16;
    h = h.wrapping_mul(0x85eb_ca6b);
    h ^= h >> 13;
    h = h.wrapping_mul(0xc2b2_ae35);
    h ^= h >> 16;
    h
}

/// Bucket of a field value in `[0, BUCKETS)`.
pub fn bucket(value: &str) -> u32 {
    let hash = murmur3_x86_32(value.as_bytes(), 0) as i32;
    hash.unsigned_abs() % BUCKETS
}

/// Request field the gray hash is computed over.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GrayField {
    Header(String),
    Query(String),
    Cookie(String),
    Path,
}

impl GrayField {
    fn resolve(&self, exchange: &Exchange) -> String {
        match self {
            GrayField::Header(name) => exchange
                .headers()
                .get(name.as_str())
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default()
                .to_string(),
            GrayField::Query(name) => exchange
                .query_values(name)
                .into_iter()
                .next()
                .unwrap_or_default(),
            GrayField::Cookie(name) => exchange
                .cookie_values(name)
                .into_iter()
                .next()
                .unwrap_or_default(),
            GrayField::Path => exchange.path().to_string(),
        }
    }
}

impl FromStr for GrayField {
    type Err = GatewayError;

    /// Accepts `request.header.<name>`, `request.query.<name>`,
    /// `request.cookie.<name>` and `request.path`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let named = |prefix: &str| {
            s.strip_prefix(prefix)
                .filter(|name| !name.is_empty())
                .map(str::to_string)
        };
        if let Some(name) = named("request.header.") {
            Ok(GrayField::Header(name))
        } else if let Some(name) = named("request.query.") {
            Ok(GrayField::Query(name))
        } else if let Some(name) = named("request.cookie.") {
            Ok(GrayField::Cookie(name))
        } else if s == "request.path" {
            Ok(GrayField::Path)
        } else {
            Err(GatewayError::config(format!("unsupported gray field pattern '{}'", s)))
        }
    }
}

impl fmt::Display for GrayField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GrayField::Header(name) => write!(f, "request.header.{}", name),
            GrayField::Query(name) => write!(f, "request.query.{}", name),
            GrayField::Cookie(name) => write!(f, "request.cookie.{}", name),
            GrayField::Path => f.write_str("request.path"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct WeightGray {
    field: GrayField,
    start: u32,
    end: u32,
    match_empty_field: bool,
}

impl WeightGray {
    /// `start` and `end` are clamped to `[0, BUCKETS]`; an empty range never
    /// matches a non-empty field.
    pub fn new(field: GrayField, start: i64, end: i64, match_empty_field: bool) -> Self {
        let clamp = |v: i64| v.clamp(0, BUCKETS as i64) as u32;
        Self {
            field,
            start: clamp(start),
            end: clamp(end),
            match_empty_field,
        }
    }

    pub fn parse(field: &str, start: i64, end: i64, match_empty_field: bool) -> GatewayResult<Self> {
        Ok(Self::new(field.parse()?, start, end, match_empty_field))
    }
}

#[async_trait]
impl Predicate for WeightGray {
    async fn test(&self, exchange: &mut Exchange) -> bool {
        let value = self.field.resolve(exchange);
        if value.is_empty() {
            return self.match_empty_field;
        }
        if self.end < self.start {
            return false;
        }
        let b = bucket(&value);
        b >= self.start && b < self.end
    }
}

impl fmt::Display for WeightGray {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "WeightGray {} [{}, {})", self.field, self.start, self.end)
    }
}
