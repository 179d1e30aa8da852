//! Predicate and filter factories.
//!
//! # Data Flow
//! ```text
//! ComponentDefinition
//!     Shortcut "Path=/a/**,/b/**"  → split on ',' → mapped onto declared fields
//!     Structured { name, args }    → flattened (nested tables become "a.b")
//!     → Args (keys compared ignoring case, '-' and '_')
//!     → registry lookup by name → typed constructor
//!     → Arc<dyn Predicate> / Arc<dyn GatewayFilter>
//! ```
//!
//! # Design Decisions
//! - An explicit name → constructor registry; custom components are added
//!   with `register_predicate` / `register_filter`
//! - Weight predicates do not touch the weight registry here; the
//!   registrations are returned with the route and applied only once the
//!   whole table has built
//! - Rate limiters and key resolvers are looked up by name from
//!   [`Components`], so their storage stays outside configuration

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use axum::http::{Method, StatusCode};

use crate::config::schema::{ComponentDefinition, RouteDefinition};
use crate::error::{ErrorKind, GatewayError, GatewayResult};
use crate::filter::status::parse_status;
use crate::filter::{
    AddRequestHeader, AddResponseHeader, GatewayFilter, PrefixPath, RemoveRequestHeader,
    RemoveResponseHeader, RewritePath, SetPath, SetRequestHeader, SetResponseHeader, SetStatus,
    StripPrefix,
};
use crate::predicate::datetime::parse_instant;
use crate::predicate::{
    After, Before, Between, CookiePredicate, HeaderPredicate, HostPredicate, MethodPredicate,
    PathPredicate, Predicate, QueryPredicate, RemoteAddrPredicate, WeightGray, WeightPredicate,
    XForwardedRemoteAddrPredicate,
};
use crate::ratelimit::{KeyResolver, RateLimiter, RemoteAddrKeyResolver, RequestRateLimiterFilter};
use crate::resilience::{
    BackoffConfig, CircuitBreakerConfig, CircuitBreakerFilter, FallbackHeaders, RetryConfig,
    RetryFilter, StatusSeries,
};
use crate::routing::Route;

/// Name of the key resolver registered by default.
pub const REMOTE_ADDR_KEY_RESOLVER: &str = "remoteAddr";

/// How shortcut arguments map onto declared fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShortcutType {
    /// One argument per field, in order.
    Default,
    /// All arguments form a list in the first field.
    GatherList,
    /// Like `GatherList`, but a trailing `true`/`false` goes to the second field.
    GatherListTailFlag,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArgValue {
    Single(String),
    List(Vec<String>),
}

fn normalize(key: &str) -> String {
    key.chars()
        .filter(|c| *c != '-' && *c != '_')
        .flat_map(char::to_lowercase)
        .collect()
}

/// Parse `250`, `250ms`, `2s` or `1m`. Bare numbers are milliseconds.
pub fn parse_duration(value: &str) -> GatewayResult<Duration> {
    let value = value.trim();
    let split = value
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(value.len());
    let (number, unit) = value.split_at(split);
    let number: u64 = number
        .parse()
        .map_err(|_| GatewayError::config(format!("invalid duration '{}'", value)))?;
    match unit.trim() {
        "" | "ms" => Ok(Duration::from_millis(number)),
        "s" => Ok(Duration::from_secs(number)),
        "m" => Ok(Duration::from_secs(number * 60)),
        _ => Err(GatewayError::config(format!("invalid duration unit in '{}'", value))),
    }
}

/// Normalised arguments of one predicate or filter.
#[derive(Debug, Clone, Default)]
pub struct Args {
    component: String,
    values: BTreeMap<String, ArgValue>,
}

impl Args {
    pub fn new(component: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            values: BTreeMap::new(),
        }
    }

    pub fn with(mut self, key: &str, value: ArgValue) -> Self {
        self.values.insert(normalize(key), value);
        self
    }

    /// Map `a,b,c` onto `fields`.
    pub fn from_shortcut(
        component: &str,
        raw: &str,
        fields: &[&str],
        shortcut: ShortcutType,
    ) -> GatewayResult<Self> {
        let mut tokens: Vec<String> = raw
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .collect();
        let mut args = Self::new(component);

        match shortcut {
            ShortcutType::Default => {
                if tokens.len() > fields.len() {
                    return Err(GatewayError::config(format!(
                        "{} takes at most {} arguments ({}), got {}",
                        component,
                        fields.len(),
                        fields.join(", "),
                        tokens.len()
                    )));
                }
                for (field, token) in fields.iter().zip(tokens) {
                    args = args.with(field, ArgValue::Single(token));
                }
            }
            ShortcutType::GatherList | ShortcutType::GatherListTailFlag => {
                let Some(list_field) = fields.first() else {
                    return Err(GatewayError::config(format!("{} takes no arguments", component)));
                };
                if let (ShortcutType::GatherListTailFlag, Some(flag_field)) = (shortcut, fields.get(1)) {
                    let is_flag = tokens.last().is_some_and(|last| {
                        last.eq_ignore_ascii_case("true") || last.eq_ignore_ascii_case("false")
                    });
                    if is_flag {
                        if let Some(flag) = tokens.pop() {
                            args = args.with(flag_field, ArgValue::Single(flag));
                        }
                    }
                }
                args = args.with(list_field, ArgValue::List(tokens));
            }
        }
        Ok(args)
    }

    /// Flatten `{ name, args }` values; nested tables become dotted keys.
    pub fn from_structured(
        component: &str,
        values: &BTreeMap<String, toml::Value>,
    ) -> GatewayResult<Self> {
        let mut args = Self::new(component);
        for (key, value) in values {
            args.flatten(key, value)?;
        }
        Ok(args)
    }

    fn flatten(&mut self, key: &str, value: &toml::Value) -> GatewayResult<()> {
        match value {
            toml::Value::Table(table) => {
                for (k, v) in table {
                    self.flatten(&format!("{}.{}", key, k), v)?;
                }
            }
            toml::Value::Array(items) => {
                let items = items
                    .iter()
                    .map(|item| self.scalar(key, item))
                    .collect::<GatewayResult<Vec<_>>>()?;
                self.values.insert(normalize(key), ArgValue::List(items));
            }
            scalar => {
                let value = self.scalar(key, scalar)?;
                self.values.insert(normalize(key), ArgValue::Single(value));
            }
        }
        Ok(())
    }

    fn scalar(&self, key: &str, value: &toml::Value) -> GatewayResult<String> {
        match value {
            toml::Value::String(s) => Ok(s.clone()),
            toml::Value::Integer(i) => Ok(i.to_string()),
            toml::Value::Float(f) => Ok(f.to_string()),
            toml::Value::Boolean(b) => Ok(b.to_string()),
            toml::Value::Datetime(d) => Ok(d.to_string()),
            toml::Value::Array(_) | toml::Value::Table(_) => Err(GatewayError::config(format!(
                "{}: argument '{}' is nested too deeply",
                self.component, key
            ))),
        }
    }

    pub fn component(&self) -> &str {
        &self.component
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(&normalize(key))
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        match self.values.get(&normalize(key))? {
            ArgValue::Single(s) => Some(s),
            ArgValue::List(items) if items.len() == 1 => Some(&items[0]),
            ArgValue::List(_) => None,
        }
    }

    pub fn required(&self, key: &str) -> GatewayResult<&str> {
        self.get(key).ok_or_else(|| {
            GatewayError::config(format!("{}: missing argument '{}'", self.component, key))
        })
    }

    /// A list argument. A single value is split on commas.
    pub fn list(&self, key: &str) -> Option<Vec<String>> {
        match self.values.get(&normalize(key))? {
            ArgValue::List(items) => Some(items.clone()),
            ArgValue::Single(s) => Some(
                s.split(',')
                    .map(str::trim)
                    .filter(|t| !t.is_empty())
                    .map(str::to_string)
                    .collect(),
            ),
        }
    }

    pub fn parse<T>(&self, key: &str) -> GatewayResult<Option<T>>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        self.get(key)
            .map(|v| {
                v.trim().parse::<T>().map_err(|e| {
                    GatewayError::config(format!(
                        "{}: invalid value '{}' for '{}': {}",
                        self.component, v, key, e
                    ))
                })
            })
            .transpose()
    }

    pub fn parse_list<T>(&self, key: &str) -> GatewayResult<Option<Vec<T>>>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        self.list(key)
            .map(|items| {
                items
                    .iter()
                    .map(|v| {
                        v.parse::<T>().map_err(|e| {
                            GatewayError::config(format!(
                                "{}: invalid value '{}' in '{}': {}",
                                self.component, v, key, e
                            ))
                        })
                    })
                    .collect()
            })
            .transpose()
    }

    pub fn bool_or(&self, key: &str, default: bool) -> GatewayResult<bool> {
        Ok(self.parse::<bool>(key)?.unwrap_or(default))
    }

    pub fn duration(&self, key: &str) -> GatewayResult<Option<Duration>> {
        self.get(key).map(parse_duration).transpose()
    }

    pub fn status(&self, key: &str) -> GatewayResult<Option<StatusCode>> {
        self.get(key).map(parse_status).transpose()
    }
}

/// Rate limiters and key resolvers addressable from configuration.
#[derive(Clone)]
pub struct Components {
    rate_limiters: HashMap<String, Arc<dyn RateLimiter>>,
    key_resolvers: HashMap<String, Arc<dyn KeyResolver>>,
}

impl Components {
    /// Starts with the `remoteAddr` key resolver.
    pub fn new() -> Self {
        let mut key_resolvers: HashMap<String, Arc<dyn KeyResolver>> = HashMap::new();
        key_resolvers.insert(
            REMOTE_ADDR_KEY_RESOLVER.to_string(),
            Arc::new(RemoteAddrKeyResolver::new()),
        );
        Self {
            rate_limiters: HashMap::new(),
            key_resolvers,
        }
    }

    pub fn register_rate_limiter(&mut self, name: impl Into<String>, limiter: Arc<dyn RateLimiter>) {
        self.rate_limiters.insert(name.into(), limiter);
    }

    pub fn register_key_resolver(&mut self, name: impl Into<String>, resolver: Arc<dyn KeyResolver>) {
        self.key_resolvers.insert(name.into(), resolver);
    }

    /// Named limiter, or the only registered one when `name` is `None`.
    pub fn rate_limiter(&self, name: Option<&str>) -> GatewayResult<Arc<dyn RateLimiter>> {
        match name {
            Some(name) => self
                .rate_limiters
                .get(name)
                .cloned()
                .ok_or_else(|| GatewayError::config(format!("unknown rate limiter '{}'", name))),
            None => {
                let mut limiters = self.rate_limiters.values();
                match (limiters.next(), limiters.next()) {
                    (Some(only), None) => Ok(only.clone()),
                    _ => Err(GatewayError::config(format!(
                        "rate limiter must be named, {} registered",
                        self.rate_limiters.len()
                    ))),
                }
            }
        }
    }

    pub fn key_resolver(&self, name: Option<&str>) -> GatewayResult<Arc<dyn KeyResolver>> {
        let name = name.unwrap_or(REMOTE_ADDR_KEY_RESOLVER);
        self.key_resolvers
            .get(name)
            .cloned()
            .ok_or_else(|| GatewayError::config(format!("unknown key resolver '{}'", name)))
    }
}

impl Default for Components {
    fn default() -> Self {
        Self::new()
    }
}

/// A pending `Weight` predicate registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WeightRegistration {
    pub group: String,
    pub route_id: String,
    pub weight: u32,
}

/// State shared by the factories of one route.
pub struct FactoryContext<'a> {
    route_id: &'a str,
    components: &'a Components,
    weights: Vec<WeightRegistration>,
}

impl<'a> FactoryContext<'a> {
    pub fn new(route_id: &'a str, components: &'a Components) -> Self {
        Self {
            route_id,
            components,
            weights: Vec::new(),
        }
    }

    pub fn route_id(&self) -> &str {
        self.route_id
    }

    pub fn components(&self) -> &Components {
        self.components
    }

    pub fn register_weight(&mut self, group: &str, weight: u32) {
        self.weights.push(WeightRegistration {
            group: group.to_string(),
            route_id: self.route_id.to_string(),
            weight,
        });
    }

    pub fn into_weights(self) -> Vec<WeightRegistration> {
        self.weights
    }
}

type PredicateBuild =
    dyn Fn(&Args, &mut FactoryContext<'_>) -> GatewayResult<Arc<dyn Predicate>> + Send + Sync;
type FilterBuild =
    dyn Fn(&Args, &mut FactoryContext<'_>) -> GatewayResult<Arc<dyn GatewayFilter>> + Send + Sync;

/// Named constructor of a predicate.
pub struct PredicateFactory {
    name: String,
    fields: Vec<&'static str>,
    shortcut: ShortcutType,
    build: Box<PredicateBuild>,
}

impl PredicateFactory {
    pub fn new<F>(name: &str, fields: &[&'static str], shortcut: ShortcutType, build: F) -> Self
    where
        F: Fn(&Args, &mut FactoryContext<'_>) -> GatewayResult<Arc<dyn Predicate>>
            + Send
            + Sync
            + 'static,
    {
        Self {
            name: name.to_string(),
            fields: fields.to_vec(),
            shortcut,
            build: Box::new(build),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Named constructor of a route filter.
pub struct FilterFactory {
    name: String,
    fields: Vec<&'static str>,
    shortcut: ShortcutType,
    build: Box<FilterBuild>,
}

impl FilterFactory {
    pub fn new<F>(name: &str, fields: &[&'static str], shortcut: ShortcutType, build: F) -> Self
    where
        F: Fn(&Args, &mut FactoryContext<'_>) -> GatewayResult<Arc<dyn GatewayFilter>>
            + Send
            + Sync
            + 'static,
    {
        Self {
            name: name.to_string(),
            fields: fields.to_vec(),
            shortcut,
            build: Box::new(build),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

fn predicate<P: Predicate + 'static>(p: P) -> GatewayResult<Arc<dyn Predicate>> {
    Ok(Arc::new(p))
}

fn filter<F: GatewayFilter + 'static>(f: F) -> GatewayResult<Arc<dyn GatewayFilter>> {
    Ok(Arc::new(f))
}

/// A route built from configuration plus its pending weight registrations.
#[derive(Debug)]
pub struct BuiltRoute {
    pub route: Route,
    pub weights: Vec<WeightRegistration>,
}

/// Registry of predicate and filter factories, keyed by lowercased name.
pub struct FactoryRegistry {
    predicates: HashMap<String, PredicateFactory>,
    filters: HashMap<String, FilterFactory>,
}

impl FactoryRegistry {
    pub fn empty() -> Self {
        Self {
            predicates: HashMap::new(),
            filters: HashMap::new(),
        }
    }

    /// Every built-in predicate and filter.
    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();
        registry.register_default_predicates();
        registry.register_default_filters();
        registry
    }

    pub fn register_predicate(&mut self, factory: PredicateFactory) {
        self.predicates.insert(factory.name.to_ascii_lowercase(), factory);
    }

    pub fn register_filter(&mut self, factory: FilterFactory) {
        self.filters.insert(factory.name.to_ascii_lowercase(), factory);
    }

    pub fn predicate_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.predicates.values().map(|f| f.name()).collect();
        names.sort_unstable();
        names
    }

    pub fn filter_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.filters.values().map(|f| f.name()).collect();
        names.sort_unstable();
        names
    }

    pub fn create_predicate(
        &self,
        definition: &ComponentDefinition,
        ctx: &mut FactoryContext<'_>,
    ) -> GatewayResult<Arc<dyn Predicate>> {
        let name = definition.name();
        let factory = self
            .predicates
            .get(&name.to_ascii_lowercase())
            .ok_or_else(|| GatewayError::config(format!("unknown predicate '{}'", name)))?;
        let args = resolve_args(definition, &factory.name, &factory.fields, factory.shortcut)?;
        (factory.build)(&args, ctx)
    }

    pub fn create_filter(
        &self,
        definition: &ComponentDefinition,
        ctx: &mut FactoryContext<'_>,
    ) -> GatewayResult<Arc<dyn GatewayFilter>> {
        let name = definition.name();
        let factory = self
            .filters
            .get(&name.to_ascii_lowercase())
            .ok_or_else(|| GatewayError::config(format!("unknown filter '{}'", name)))?;
        let args = resolve_args(definition, &factory.name, &factory.fields, factory.shortcut)?;
        (factory.build)(&args, ctx)
    }

    /// Build one route. Default filters and route filters are each given
    /// their 1-based position as order unless they declare one; on equal
    /// order default filters run first.
    pub fn build_route(
        &self,
        definition: &RouteDefinition,
        default_filters: &[ComponentDefinition],
        components: &Components,
    ) -> GatewayResult<BuiltRoute> {
        let mut ctx = FactoryContext::new(&definition.id, components);
        let mut builder = Route::builder(definition.id.as_str())
            .uri(definition.uri.as_str())
            .order(definition.order);

        for p in &definition.predicates {
            let predicate = self
                .create_predicate(p, &mut ctx)
                .map_err(|e| in_route(&definition.id, e))?;
            builder = builder.predicate_arc(predicate);
        }
        for defs in [default_filters, definition.filters.as_slice()] {
            for (i, f) in defs.iter().enumerate() {
                let filter = self
                    .create_filter(f, &mut ctx)
                    .map_err(|e| in_route(&definition.id, e))?;
                let order = filter.order().unwrap_or(i as i32 + 1);
                builder = builder.filter_with_order(filter, order);
            }
        }
        if let Some(ms) = definition.response_timeout_ms {
            builder = builder.response_timeout(Duration::from_millis(ms));
        }
        for (k, v) in &definition.metadata {
            builder = builder.metadata(k.as_str(), v.as_str());
        }

        let route = builder.build()?;
        Ok(BuiltRoute {
            route,
            weights: ctx.into_weights(),
        })
    }

    fn register_default_predicates(&mut self) {
        use ShortcutType::*;

        self.register_predicate(PredicateFactory::new(
            "Path",
            &["patterns", "matchTrailingSlash"],
            GatherListTailFlag,
            |args, _| {
                predicate(PathPredicate::new(
                    args.list("patterns").unwrap_or_default(),
                    args.bool_or("matchTrailingSlash", true)?,
                )?)
            },
        ));
        self.register_predicate(PredicateFactory::new(
            "Host",
            &["patterns", "includePort"],
            GatherListTailFlag,
            |args, _| {
                predicate(
                    HostPredicate::new(args.list("patterns").unwrap_or_default())?
                        .include_port(args.bool_or("includePort", false)?),
                )
            },
        ));
        self.register_predicate(PredicateFactory::new(
            "Method",
            &["methods"],
            GatherList,
            |args, _| predicate(MethodPredicate::new(args.list("methods").unwrap_or_default())?),
        ));
        self.register_predicate(PredicateFactory::new(
            "Header",
            &["header", "regexp"],
            Default,
            |args, _| predicate(HeaderPredicate::new(args.required("header")?, args.get("regexp"))?),
        ));
        self.register_predicate(PredicateFactory::new(
            "Cookie",
            &["name", "regexp"],
            Default,
            |args, _| {
                predicate(CookiePredicate::new(
                    args.required("name")?,
                    args.required("regexp")?,
                )?)
            },
        ));
        self.register_predicate(PredicateFactory::new(
            "Query",
            &["param", "regexp"],
            Default,
            |args, _| predicate(QueryPredicate::new(args.required("param")?, args.get("regexp"))?),
        ));
        self.register_predicate(PredicateFactory::new("Before", &["datetime"], Default, |args, _| {
            predicate(Before::new(parse_instant(args.required("datetime")?)?))
        }));
        self.register_predicate(PredicateFactory::new("After", &["datetime"], Default, |args, _| {
            predicate(After::new(parse_instant(args.required("datetime")?)?))
        }));
        self.register_predicate(PredicateFactory::new(
            "Between",
            &["datetime1", "datetime2"],
            Default,
            |args, _| {
                predicate(Between::new(
                    parse_instant(args.required("datetime1")?)?,
                    parse_instant(args.required("datetime2")?)?,
                )?)
            },
        ));
        self.register_predicate(PredicateFactory::new(
            "RemoteAddr",
            &["sources"],
            GatherList,
            |args, _| predicate(RemoteAddrPredicate::new(args.list("sources").unwrap_or_default())?),
        ));
        self.register_predicate(PredicateFactory::new(
            "XForwardedRemoteAddr",
            &["sources"],
            GatherList,
            |args, _| {
                predicate(XForwardedRemoteAddrPredicate::new(
                    args.list("sources").unwrap_or_default(),
                    args.parse::<usize>("maxTrustedIndex")?.unwrap_or(1),
                )?)
            },
        ));
        self.register_predicate(PredicateFactory::new(
            "Weight",
            &["group", "weight"],
            Default,
            |args, ctx| {
                let group = args.required("group")?;
                let weight = args
                    .parse::<u32>("weight")?
                    .ok_or_else(|| GatewayError::config("Weight: missing argument 'weight'"))?;
                if weight == 0 {
                    return Err(GatewayError::config("Weight: weight must be greater than 0"));
                }
                ctx.register_weight(group, weight);
                predicate(WeightPredicate::new(group, ctx.route_id()))
            },
        ));
        self.register_predicate(PredicateFactory::new(
            "WeightGray",
            &["fieldPattern", "start", "end", "matchEmptyField"],
            Default,
            |args, _| {
                predicate(WeightGray::parse(
                    args.required("fieldPattern")?,
                    args.parse::<i64>("start")?.unwrap_or(0),
                    args.parse::<i64>("end")?.unwrap_or(0),
                    args.bool_or("matchEmptyField", false)?,
                )?)
            },
        ));
    }

    fn register_default_filters(&mut self) {
        use ShortcutType::*;

        self.register_filter(FilterFactory::new(
            "AddRequestHeader",
            &["name", "value"],
            Default,
            |args, _| filter(AddRequestHeader::new(args.required("name")?, args.required("value")?)?),
        ));
        self.register_filter(FilterFactory::new(
            "SetRequestHeader",
            &["name", "value"],
            Default,
            |args, _| filter(SetRequestHeader::new(args.required("name")?, args.required("value")?)?),
        ));
        self.register_filter(FilterFactory::new(
            "RemoveRequestHeader",
            &["name"],
            Default,
            |args, _| filter(RemoveRequestHeader::new(args.required("name")?)?),
        ));
        self.register_filter(FilterFactory::new(
            "AddResponseHeader",
            &["name", "value"],
            Default,
            |args, _| filter(AddResponseHeader::new(args.required("name")?, args.required("value")?)?),
        ));
        self.register_filter(FilterFactory::new(
            "SetResponseHeader",
            &["name", "value"],
            Default,
            |args, _| filter(SetResponseHeader::new(args.required("name")?, args.required("value")?)?),
        ));
        self.register_filter(FilterFactory::new(
            "RemoveResponseHeader",
            &["name"],
            Default,
            |args, _| filter(RemoveResponseHeader::new(args.required("name")?)?),
        ));
        self.register_filter(FilterFactory::new("PrefixPath", &["prefix"], Default, |args, _| {
            filter(PrefixPath::new(args.required("prefix")?)?)
        }));
        self.register_filter(FilterFactory::new("StripPrefix", &["parts"], Default, |args, _| {
            filter(StripPrefix::new(args.parse::<usize>("parts")?.unwrap_or(1)))
        }));
        self.register_filter(FilterFactory::new("SetPath", &["template"], Default, |args, _| {
            filter(SetPath::new(args.required("template")?))
        }));
        self.register_filter(FilterFactory::new(
            "RewritePath",
            &["regexp", "replacement"],
            Default,
            |args, _| {
                filter(RewritePath::new(
                    args.required("regexp")?,
                    args.get("replacement").unwrap_or_default(),
                )?)
            },
        ));
        self.register_filter(FilterFactory::new("SetStatus", &["status"], Default, |args, _| {
            filter(SetStatus::parse(args.required("status")?)?)
        }));
        self.register_filter(FilterFactory::new(
            "RequestRateLimiter",
            &["rateLimiter", "keyResolver"],
            Default,
            |args, ctx| {
                let limiter = ctx.components().rate_limiter(args.get("rateLimiter"))?;
                let resolver = ctx.components().key_resolver(args.get("keyResolver"))?;
                let mut f = RequestRateLimiterFilter::new(limiter, resolver)
                    .deny_empty_key(args.bool_or("denyEmptyKey", true)?);
                if let Some(status) = args.status("emptyKeyStatus")? {
                    f = f.empty_key_status(status);
                }
                if let Some(status) = args.status("statusCode")? {
                    f = f.status(status);
                }
                filter(f)
            },
        ));
        self.register_filter(FilterFactory::new(
            "Retry",
            &[
                "retries",
                "statuses",
                "methods",
                "backoff.firstBackoff",
                "backoff.maxBackoff",
                "backoff.factor",
                "backoff.jitter",
            ],
            Default,
            |args, _| filter(RetryFilter::new(retry_config(args)?)?),
        ));
        self.register_filter(FilterFactory::new(
            "CircuitBreaker",
            &["name", "fallbackUri"],
            Default,
            |args, ctx| {
                let name = args.get("name").unwrap_or(ctx.route_id());
                let mut f = CircuitBreakerFilter::new(name, circuit_breaker_config(args)?)?;
                if let Some(uri) = args.get("fallbackUri") {
                    f = f.fallback_uri(uri)?;
                }
                filter(f)
            },
        ));
        self.register_filter(FilterFactory::new(
            "FallbackHeaders",
            &[
                "executionExceptionTypeHeaderName",
                "executionExceptionMessageHeaderName",
            ],
            Default,
            |args, _| {
                filter(FallbackHeaders::new(
                    args.get("executionExceptionTypeHeaderName")
                        .unwrap_or(FallbackHeaders::EXECUTION_EXCEPTION_TYPE),
                    args.get("executionExceptionMessageHeaderName")
                        .unwrap_or(FallbackHeaders::EXECUTION_EXCEPTION_MESSAGE),
                )?)
            },
        ));
    }
}

impl Default for FactoryRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

fn resolve_args(
    definition: &ComponentDefinition,
    name: &str,
    fields: &[&str],
    shortcut: ShortcutType,
) -> GatewayResult<Args> {
    match definition {
        ComponentDefinition::Shortcut(raw) => {
            let raw_args = raw.split_once('=').map(|(_, a)| a).unwrap_or_default();
            Args::from_shortcut(name, raw_args, fields, shortcut)
        }
        ComponentDefinition::Structured { args, .. } => Args::from_structured(name, args),
    }
}

fn in_route(route_id: &str, error: GatewayError) -> GatewayError {
    match error {
        GatewayError::ConfigValidation(message) => {
            GatewayError::config(format!("route '{}': {}", route_id, message))
        }
        other => other,
    }
}

fn circuit_breaker_config(args: &Args) -> GatewayResult<CircuitBreakerConfig> {
    let defaults = CircuitBreakerConfig::default();
    let status_codes = match args.list("statusCodes") {
        Some(codes) => codes
            .iter()
            .map(|s| parse_status(s))
            .collect::<GatewayResult<Vec<_>>>()?,
        None => defaults.status_codes,
    };
    Ok(CircuitBreakerConfig {
        failure_threshold: args
            .parse::<u32>("failureThreshold")?
            .unwrap_or(defaults.failure_threshold),
        wait_in_open: args.duration("waitInOpen")?.unwrap_or(defaults.wait_in_open),
        status_codes,
    })
}

fn retry_config(args: &Args) -> GatewayResult<RetryConfig> {
    let mut config = RetryConfig::default();
    if let Some(retries) = args.parse::<u32>("retries")? {
        config = config.retries(retries);
    }
    if let Some(series) = args.parse_list::<StatusSeries>("series")? {
        config = config.series(series);
    }
    if let Some(statuses) = args.list("statuses") {
        let statuses = statuses
            .iter()
            .map(|s| parse_status(s))
            .collect::<GatewayResult<Vec<_>>>()?;
        config = config.statuses(statuses);
    }
    if let Some(methods) = args.list("methods") {
        let methods = methods
            .iter()
            .map(|m| {
                Method::from_bytes(m.trim().to_ascii_uppercase().as_bytes())
                    .map_err(|_| GatewayError::config(format!("Retry: invalid method '{}'", m)))
            })
            .collect::<GatewayResult<Vec<_>>>()?;
        config = config.methods(methods);
    }
    if let Some(exceptions) = args.parse_list::<ErrorKind>("exceptions")? {
        config = config.exceptions(exceptions);
    }

    let has_backoff = [
        "backoff.firstBackoff",
        "backoff.maxBackoff",
        "backoff.factor",
        "backoff.jitter",
    ]
    .iter()
    .any(|k| args.contains(k));
    if has_backoff {
        let defaults = BackoffConfig::default();
        config = config.backoff(BackoffConfig {
            first_backoff: args
                .duration("backoff.firstBackoff")?
                .unwrap_or(defaults.first_backoff),
            max_backoff: args.duration("backoff.maxBackoff")?,
            factor: args.parse::<u32>("backoff.factor")?.unwrap_or(defaults.factor),
            jitter: args.bool_or("backoff.jitter", defaults.jitter)?,
        });
    }
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::Exchange;
    use crate::ratelimit::RateLimitDecision;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;

    fn shortcut(s: &str) -> ComponentDefinition {
        ComponentDefinition::Shortcut(s.to_string())
    }

    fn route(toml_src: &str) -> RouteDefinition {
        toml::from_str(toml_src).unwrap()
    }

    struct AllowAll;

    #[async_trait]
    impl RateLimiter for AllowAll {
        async fn is_allowed(&self, _route_id: &str, _key: &str) -> GatewayResult<RateLimitDecision> {
            Ok(RateLimitDecision::allowed(None))
        }
    }

    #[test]
    fn test_shortcut_mapping() {
        let args =
            Args::from_shortcut("Header", "x-id, \\d+", &["header", "regexp"], ShortcutType::Default)
                .unwrap();
        assert_eq!(args.get("header"), Some("x-id"));
        assert_eq!(args.get("regexp"), Some("\\d+"));

        let args = Args::from_shortcut(
            "Path",
            "/a/**,/b/**,false",
            &["patterns", "matchTrailingSlash"],
            ShortcutType::GatherListTailFlag,
        )
        .unwrap();
        assert_eq!(args.list("patterns").unwrap(), vec!["/a/**", "/b/**"]);
        assert_eq!(args.get("match_trailing_slash"), Some("false"));

        assert!(Args::from_shortcut("X", "a,b", &["one"], ShortcutType::Default).is_err());
    }

    #[test]
    fn test_structured_flattening() {
        #[derive(serde::Deserialize)]
        struct Holder {
            c: ComponentDefinition,
        }
        let holder: Holder = toml::from_str(
            r#"c = { name = "Retry", args = { retries = 2, methods = ["GET", "POST"], backoff = { first-backoff = "10ms", factor = 3 } } }"#,
        )
        .unwrap();
        let ComponentDefinition::Structured { args, .. } = &holder.c else {
            panic!("expected structured form");
        };
        let args = Args::from_structured("Retry", args).unwrap();
        assert_eq!(args.parse::<u32>("retries").unwrap(), Some(2));
        assert_eq!(args.list("methods").unwrap(), vec!["GET", "POST"]);
        assert_eq!(
            args.duration("backoff.firstBackoff").unwrap(),
            Some(Duration::from_millis(10))
        );

        let config = retry_config(&args).unwrap();
        assert_eq!(config.retries, 2);
        assert_eq!(config.methods, vec![Method::GET, Method::POST]);
        assert_eq!(config.backoff.unwrap().factor, 3);
    }

    #[test]
    fn test_circuit_breaker_args() {
        let args = Args::from_shortcut(
            "CircuitBreaker",
            "users-cb, forward:/fallback",
            &["name", "fallbackUri"],
            ShortcutType::Default,
        )
        .unwrap();
        assert_eq!(args.get("fallbackUri"), Some("forward:/fallback"));
        let config = circuit_breaker_config(&args).unwrap();
        assert_eq!(config.failure_threshold, 5);
        assert!(config.status_codes.is_empty());

        #[derive(serde::Deserialize)]
        struct Holder {
            c: ComponentDefinition,
        }
        let holder: Holder = toml::from_str(
            r#"c = { name = "CircuitBreaker", args = { failure-threshold = 2, wait-in-open = "5s", status-codes = ["500", "BAD_GATEWAY"] } }"#,
        )
        .unwrap();
        let ComponentDefinition::Structured { args, .. } = &holder.c else {
            panic!("expected structured form");
        };
        let args = Args::from_structured("CircuitBreaker", args).unwrap();
        let config = circuit_breaker_config(&args).unwrap();
        assert_eq!(config.failure_threshold, 2);
        assert_eq!(config.wait_in_open, Duration::from_secs(5));
        assert_eq!(
            config.status_codes,
            vec![StatusCode::INTERNAL_SERVER_ERROR, StatusCode::BAD_GATEWAY]
        );
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("250").unwrap(), Duration::from_millis(250));
        assert_eq!(parse_duration("2s").unwrap(), Duration::from_secs(2));
        assert_eq!(parse_duration("1m").unwrap(), Duration::from_secs(60));
        assert!(parse_duration("soon").is_err());
        assert!(parse_duration("5h").is_err());
    }

    #[tokio::test]
    async fn test_build_route_from_definition() {
        let registry = FactoryRegistry::with_defaults();
        let definition = route(
            r#"
            id = "users"
            uri = "http://users:8080"
            predicates = ["Path=/users/{id}", "Method=GET,POST"]
            filters = ["StripPrefix=1", "AddRequestHeader=x-user,{id}"]
            response_timeout_ms = 1500
            "#,
        );
        let built = registry
            .build_route(&definition, &[shortcut("AddResponseHeader=x-gw,1")], &Components::new())
            .unwrap();
        let route = built.route;

        assert_eq!(route.response_timeout(), Some(Duration::from_millis(1500)));
        assert_eq!(
            route.predicate().to_string(),
            "(Path [\"/users/{id}\"] && Method [\"GET\", \"POST\"])"
        );
        let names: Vec<(&str, i32)> = route
            .filters()
            .iter()
            .map(|f| (f.filter.name(), f.order))
            .collect();
        assert_eq!(
            names,
            vec![("AddResponseHeader", 1), ("StripPrefix", 1), ("AddRequestHeader", 2)]
        );

        let mut ex = Exchange::new(Request::builder().uri("/users/9").body(Body::empty()).unwrap());
        assert!(route.predicate().test(&mut ex).await);
    }

    #[test]
    fn test_weight_registration_is_deferred() {
        let registry = FactoryRegistry::with_defaults();
        let definition = route(
            r#"
            id = "v2"
            uri = "http://v2"
            predicates = ["Weight=service,20"]
            "#,
        );
        let built = registry
            .build_route(&definition, &[], &Components::new())
            .unwrap();
        assert_eq!(
            built.weights,
            vec![WeightRegistration {
                group: "service".into(),
                route_id: "v2".into(),
                weight: 20
            }]
        );
    }

    #[test]
    fn test_rate_limiter_lookup() {
        let registry = FactoryRegistry::with_defaults();
        let definition = route(
            r#"
            id = "limited"
            uri = "http://x"
            filters = [{ name = "RequestRateLimiter", args = { deny-empty-key = false, status-code = "TOO_MANY_REQUESTS" } }]
            "#,
        );

        // No limiter registered
        assert!(registry
            .build_route(&definition, &[], &Components::new())
            .is_err());

        let mut components = Components::new();
        components.register_rate_limiter("memory", Arc::new(AllowAll));
        assert!(registry.build_route(&definition, &[], &components).is_ok());
    }

    #[test]
    fn test_errors_name_the_route() {
        let registry = FactoryRegistry::with_defaults();
        let unknown = route(
            r#"
            id = "r1"
            uri = "http://x"
            predicates = ["Nope=1"]
            "#,
        );
        let err = registry
            .build_route(&unknown, &[], &Components::new())
            .unwrap_err();
        assert_eq!(err.to_string(), "invalid configuration: route 'r1': unknown predicate 'Nope'");

        let between = route(
            r#"
            id = "r2"
            uri = "http://x"
            predicates = ["Between=2030-01-01T00:00:00Z,2020-01-01T00:00:00Z"]
            "#,
        );
        assert!(registry.build_route(&between, &[], &Components::new()).is_err());
    }
}
