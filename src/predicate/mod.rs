//! Predicate engine.
//!
//! # Data Flow
//! ```text
//! Route definition predicates (config or builder)
//!     → factory builds leaf predicates
//!     → leaves ANDed into one route predicate
//!
//! Per request:
//!     RouteTable::lookup
//!     → route.predicate.test(&mut exchange)
//!     → leaf reads request head (Path/Host may write template variables,
//!       ReadBody may cache the decoded body)
//!     → true/false
//! ```
//!
//! # Design Decisions
//! - Predicates are async so ReadBody can await the body; all other leaves
//!   complete without suspending
//! - `And`/`Or` short-circuit: the right side is never evaluated when the
//!   left side decides the result
//! - `Display` reproduces logical structure for logs, e.g.
//!   `(Path [/foo/{id}] && !Header X-Debug)`

pub mod datetime;
pub mod gray;
pub mod header;
pub mod host;
pub mod path;
pub mod query;
pub mod read_body;
pub mod remote_addr;
pub mod weight;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::exchange::Exchange;

pub use datetime::{After, Before, Between};
pub use gray::{murmur3_x86_32, WeightGray};
pub use header::{CookiePredicate, HeaderPredicate, MethodPredicate};
pub use host::HostPredicate;
pub use path::{PathPattern, PathPredicate};
pub use query::QueryPredicate;
pub use read_body::ReadBodyPredicate;
pub use remote_addr::{Cidr, RemoteAddrPredicate, XForwardedRemoteAddrPredicate};
pub use weight::WeightPredicate;

/// Decides whether an exchange matches a route.
#[async_trait]
pub trait Predicate: Send + Sync + fmt::Display {
    async fn test(&self, exchange: &mut Exchange) -> bool;
}

#[async_trait]
impl<T: Predicate + ?Sized> Predicate for Arc<T> {
    async fn test(&self, exchange: &mut Exchange) -> bool {
        (**self).test(exchange).await
    }
}

/// Combinator methods available on every predicate.
pub trait PredicateExt: Predicate + Sized + 'static {
    fn and<P: Predicate + 'static>(self, other: P) -> And {
        And::new(Arc::new(self), Arc::new(other))
    }

    fn or<P: Predicate + 'static>(self, other: P) -> Or {
        Or::new(Arc::new(self), Arc::new(other))
    }

    fn negate(self) -> Not {
        Not::new(Arc::new(self))
    }
}

impl<T: Predicate + Sized + 'static> PredicateExt for T {}

/// Logical AND. `right` is skipped when `left` is false.
pub struct And {
    left: Arc<dyn Predicate>,
    right: Arc<dyn Predicate>,
}

impl And {
    pub fn new(left: Arc<dyn Predicate>, right: Arc<dyn Predicate>) -> Self {
        Self { left, right }
    }

    /// Fold a list of predicates into a left-leaning AND tree.
    /// An empty list matches everything.
    pub fn all(predicates: Vec<Arc<dyn Predicate>>) -> Arc<dyn Predicate> {
        let mut iter = predicates.into_iter();
        let Some(first) = iter.next() else {
            return Arc::new(Always);
        };
        iter.fold(first, |acc, next| Arc::new(And::new(acc, next)) as Arc<dyn Predicate>)
    }
}

#[async_trait]
impl Predicate for And {
    async fn test(&self, exchange: &mut Exchange) -> bool {
        self.left.test(exchange).await && self.right.test(exchange).await
    }
}

impl fmt::Display for And {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({} && {})", self.left, self.right)
    }
}

/// Logical OR. `right` is skipped when `left` is true.
pub struct Or {
    left: Arc<dyn Predicate>,
    right: Arc<dyn Predicate>,
}

impl Or {
    pub fn new(left: Arc<dyn Predicate>, right: Arc<dyn Predicate>) -> Self {
        Self { left, right }
    }
}

#[async_trait]
impl Predicate for Or {
    async fn test(&self, exchange: &mut Exchange) -> bool {
        self.left.test(exchange).await || self.right.test(exchange).await
    }
}

impl fmt::Display for Or {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({} || {})", self.left, self.right)
    }
}

pub struct Not {
    inner: Arc<dyn Predicate>,
}

impl Not {
    pub fn new(inner: Arc<dyn Predicate>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl Predicate for Not {
    async fn test(&self, exchange: &mut Exchange) -> bool {
        !self.inner.test(exchange).await
    }
}

impl fmt::Display for Not {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "!{}", self.inner)
    }
}

/// Matches every request.
#[derive(Debug, Clone, Copy)]
pub struct Always;

#[async_trait]
impl Predicate for Always {
    async fn test(&self, _exchange: &mut Exchange) -> bool {
        true
    }
}

impl fmt::Display for Always {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("true")
    }
}

/// Predicate backed by a synchronous closure over the exchange.
pub struct FnPredicate<F> {
    name: String,
    f: F,
}

impl<F> FnPredicate<F>
where
    F: Fn(&Exchange) -> bool + Send + Sync,
{
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
        }
    }
}

#[async_trait]
impl<F> Predicate for FnPredicate<F>
where
    F: Fn(&Exchange) -> bool + Send + Sync,
{
    async fn test(&self, exchange: &mut Exchange) -> bool {
        (self.f)(exchange)
    }
}

impl<F> fmt::Display for FnPredicate<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn exchange() -> Exchange {
        Exchange::new(Request::builder().uri("/").body(Body::empty()).unwrap())
    }

    fn counting(name: &str, result: bool, calls: Arc<AtomicUsize>) -> FnPredicate<impl Fn(&Exchange) -> bool> {
        FnPredicate::new(name, move |_: &Exchange| {
            calls.fetch_add(1, Ordering::SeqCst);
            result
        })
    }

    #[tokio::test]
    async fn test_and_short_circuits() {
        let calls = Arc::new(AtomicUsize::new(0));
        let p = counting("left", false, Arc::new(AtomicUsize::new(0)))
            .and(counting("right", true, calls.clone()));

        assert!(!p.test(&mut exchange()).await);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_or_short_circuits() {
        let calls = Arc::new(AtomicUsize::new(0));
        let p = counting("left", true, Arc::new(AtomicUsize::new(0)))
            .or(counting("right", false, calls.clone()));

        assert!(p.test(&mut exchange()).await);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_negate_and_display() {
        let p = FnPredicate::new("Path", |_: &Exchange| true)
            .and(FnPredicate::new("Header", |_: &Exchange| true).negate());

        assert!(!p.test(&mut exchange()).await);
        assert_eq!(p.to_string(), "(Path && !Header)");
    }

    #[tokio::test]
    async fn test_all_of_empty_matches() {
        let p = And::all(Vec::new());
        assert!(p.test(&mut exchange()).await);
        assert_eq!(p.to_string(), "true");
    }
}
