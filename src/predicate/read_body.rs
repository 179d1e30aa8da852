//! Body-inspecting predicate.
//!
//! # Design Decisions
//! - The raw body is buffered once on the exchange so the forward can
//!   still send it
//! - The decoded value is cached as a request attribute; later predicates
//!   reuse it instead of decoding again
//! - A cached value of another type (decoded by a different ReadBody
//!   predicate) evaluates to false

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Bytes;
use serde::de::DeserializeOwned;

use super::Predicate;
use crate::exchange::{keys, Exchange};

pub const DEFAULT_MAX_BODY: usize = 256 * 1024;

type Decoder<T> = Box<dyn Fn(&Bytes) -> Option<T> + Send + Sync>;
type Check<T> = Box<dyn Fn(&T) -> bool + Send + Sync>;

/// Cached decoded body stored under [`keys::CACHED_BODY_OBJECT`].
pub type CachedBodyObject = Arc<dyn Any + Send + Sync>;

pub struct ReadBodyPredicate<T> {
    name: String,
    decode: Decoder<T>,
    check: Check<T>,
    max_body: usize,
}

impl<T: Any + Send + Sync> ReadBodyPredicate<T> {
    pub fn new<D, C>(name: impl Into<String>, decode: D, check: C) -> Self
    where
        D: Fn(&Bytes) -> Option<T> + Send + Sync + 'static,
        C: Fn(&T) -> bool + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            decode: Box::new(decode),
            check: Box::new(check),
            max_body: DEFAULT_MAX_BODY,
        }
    }

    pub fn with_max_body(mut self, max_body: usize) -> Self {
        self.max_body = max_body;
        self
    }

    fn evaluate(&self, cached: &CachedBodyObject) -> bool {
        match cached.downcast_ref::<T>() {
            Some(value) => (self.check)(value),
            None => {
                tracing::debug!(predicate = %self.name, "cached body has a different type");
                false
            }
        }
    }
}

impl<T: DeserializeOwned + Any + Send + Sync> ReadBodyPredicate<T> {
    /// Decode the body as JSON.
    pub fn json<C>(name: impl Into<String>, check: C) -> Self
    where
        C: Fn(&T) -> bool + Send + Sync + 'static,
    {
        Self::new(name, |bytes: &Bytes| serde_json::from_slice(bytes).ok(), check)
    }
}

impl ReadBodyPredicate<String> {
    /// Decode the body as UTF-8 text.
    pub fn text<C>(name: impl Into<String>, check: C) -> Self
    where
        C: Fn(&String) -> bool + Send + Sync + 'static,
    {
        Self::new(
            name,
            |bytes: &Bytes| String::from_utf8(bytes.to_vec()).ok(),
            check,
        )
    }
}

#[async_trait]
impl<T: Any + Send + Sync> Predicate for ReadBodyPredicate<T> {
    async fn test(&self, exchange: &mut Exchange) -> bool {
        if let Some(cached) = exchange
            .attributes()
            .get::<CachedBodyObject>(keys::CACHED_BODY_OBJECT)
        {
            return self.evaluate(cached);
        }

        let bytes = match exchange.cache_body(self.max_body).await {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::debug!(predicate = %self.name, error = %e, "could not read body");
                return false;
            }
        };
        let Some(value) = (self.decode)(&bytes) else {
            tracing::debug!(predicate = %self.name, "body could not be decoded");
            return false;
        };

        let cached: CachedBodyObject = Arc::new(value);
        let result = self.evaluate(&cached);
        exchange
            .attributes_mut()
            .insert(keys::CACHED_BODY_OBJECT, cached);
        result
    }
}

impl<T> fmt::Display for ReadBodyPredicate<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ReadBody {}", self.name)
    }
}
