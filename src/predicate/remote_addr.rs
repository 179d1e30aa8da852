//! Client address predicates and resolution.
//!
//! # Design Decisions
//! - `XForwardedRemoteAddr` trusts the Nth entry from the right of
//!   `X-Forwarded-For` (default N=1, the last proxy)
//! - More than one `X-Forwarded-For` header is treated as spoofing and the
//!   socket address is used instead

use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use async_trait::async_trait;

use super::Predicate;
use crate::error::{GatewayError, GatewayResult};
use crate::exchange::Exchange;

pub const X_FORWARDED_FOR: &str = "x-forwarded-for";

/// An IPv4 or IPv6 network in CIDR notation. A bare address is a /32 or /128.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cidr {
    network: IpAddr,
    prefix: u8,
}

impl Cidr {
    pub fn contains(&self, addr: IpAddr) -> bool {
        match (self.network, addr) {
            (IpAddr::V4(net), IpAddr::V4(ip)) => {
                let mask = mask_u32(self.prefix);
                u32::from(net) & mask == u32::from(ip) & mask
            }
            (IpAddr::V6(net), IpAddr::V6(ip)) => {
                let mask = mask_u128(self.prefix);
                u128::from(net) & mask == u128::from(ip) & mask
            }
            (IpAddr::V4(_), IpAddr::V6(ip)) => ip
                .to_ipv4_mapped()
                .map(|v4| self.contains(IpAddr::V4(v4)))
                .unwrap_or(false),
            (IpAddr::V6(_), IpAddr::V4(_)) => false,
        }
    }
}

fn mask_u32(prefix: u8) -> u32 {
    if prefix == 0 {
        0
    } else {
        u32::MAX << (32 - prefix as u32)
    }
}

fn mask_u128(prefix: u8) -> u128 {
    if prefix == 0 {
        0
    } else {
        u128::MAX << (128 - prefix as u32)
    }
}

impl FromStr for Cidr {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let invalid = || GatewayError::config(format!("invalid address or CIDR '{}'", s));
        let (addr, prefix) = match s.split_once('/') {
            Some((addr, prefix)) => (addr, Some(prefix.parse::<u8>().map_err(|_| invalid())?)),
            None => (s, None),
        };
        let network: IpAddr = addr.parse().map_err(|_| invalid())?;
        let max = match network {
            IpAddr::V4(_) => 32,
            IpAddr::V6(_) => 128,
        };
        let prefix = prefix.unwrap_or(max);
        if prefix > max {
            return Err(invalid());
        }
        Ok(Self { network, prefix })
    }
}

impl fmt::Display for Cidr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.network, self.prefix)
    }
}

fn parse_sources<I, S>(sources: I) -> GatewayResult<Vec<Cidr>>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let sources = sources
        .into_iter()
        .map(|s| s.as_ref().parse())
        .collect::<GatewayResult<Vec<Cidr>>>()?;
    if sources.is_empty() {
        return Err(GatewayError::config("address predicate needs at least one source"));
    }
    Ok(sources)
}

/// Client IP from the `X-Forwarded-For` entry at `max_trusted_index`
/// counting from the right, falling back to the socket address.
pub fn forwarded_client_ip(exchange: &Exchange, max_trusted_index: usize) -> Option<IpAddr> {
    let direct = exchange.remote_addr().map(|a| a.ip());
    let headers: Vec<_> = exchange.headers().get_all(X_FORWARDED_FOR).iter().collect();
    if headers.len() > 1 {
        tracing::warn!(
            count = headers.len(),
            "multiple X-Forwarded-For headers, using socket address"
        );
        return direct;
    }
    let entries: Vec<&str> = match headers.first().and_then(|h| h.to_str().ok()) {
        Some(value) => value
            .split(',')
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .collect(),
        None => return direct,
    };
    if entries.is_empty() {
        return direct;
    }
    let index = entries.len().saturating_sub(max_trusted_index.max(1));
    entries[index].parse().ok().or(direct)
}

/// Matches the socket address of the client against CIDR sources.
#[derive(Debug, Clone)]
pub struct RemoteAddrPredicate {
    sources: Vec<Cidr>,
}

impl RemoteAddrPredicate {
    pub fn new<I, S>(sources: I) -> GatewayResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Ok(Self {
            sources: parse_sources(sources)?,
        })
    }
}

#[async_trait]
impl Predicate for RemoteAddrPredicate {
    async fn test(&self, exchange: &mut Exchange) -> bool {
        exchange
            .remote_addr()
            .map(|addr| self.sources.iter().any(|c| c.contains(addr.ip())))
            .unwrap_or(false)
    }
}

impl fmt::Display for RemoteAddrPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sources: Vec<String> = self.sources.iter().map(Cidr::to_string).collect();
        write!(f, "RemoteAddr {:?}", sources)
    }
}

/// Matches a trusted `X-Forwarded-For` entry against CIDR sources.
#[derive(Debug, Clone)]
pub struct XForwardedRemoteAddrPredicate {
    sources: Vec<Cidr>,
    max_trusted_index: usize,
}

impl XForwardedRemoteAddrPredicate {
    pub fn new<I, S>(sources: I, max_trusted_index: usize) -> GatewayResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        if max_trusted_index == 0 {
            return Err(GatewayError::config("maxTrustedIndex must be greater than 0"));
        }
        Ok(Self {
            sources: parse_sources(sources)?,
            max_trusted_index,
        })
    }
}

#[async_trait]
impl Predicate for XForwardedRemoteAddrPredicate {
    async fn test(&self, exchange: &mut Exchange) -> bool {
        let allowed = forwarded_client_ip(exchange, self.max_trusted_index)
            .map(|ip| self.sources.iter().any(|c| c.contains(ip)))
            .unwrap_or(false);
        tracing::debug!(allowed, path = %exchange.path(), "X-Forwarded-For check");
        allowed
    }
}

impl fmt::Display for XForwardedRemoteAddrPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sources: Vec<String> = self.sources.iter().map(Cidr::to_string).collect();
        write!(
            f,
            "XForwardedRemoteAddr {:?} (trusted index {})",
            sources, self.max_trusted_index
        )
    }
}
