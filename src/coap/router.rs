//! Path-pattern routing table.
//!
//! Patterns are `/`-separated and matched against the request's Uri-Path
//! segments:
//!
//! - a literal segment must match exactly;
//! - `{name}` captures exactly one segment;
//! - a trailing `{name*}` captures all remaining segments joined with `/`.
//!   When no segment remains the parameter is left out.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use super::Handler;
use crate::error::BridgeError;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Param(String),
    Rest(String),
}

/// One compiled route pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pattern {
    source: String,
    segments: Vec<Segment>,
}

impl Pattern {
    /// Compiles a pattern such as `/sub/{topic*}`.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Config`] for an empty parameter name or a
    /// catch-all segment that is not last.
    pub fn parse(source: &str) -> Result<Self, BridgeError> {
        let raw: Vec<&str> = source.split('/').filter(|s| !s.is_empty()).collect();
        let last = raw.len().saturating_sub(1);
        let mut segments = Vec::with_capacity(raw.len());

        for (i, part) in raw.into_iter().enumerate() {
            let segment = match part.strip_prefix('{').and_then(|p| p.strip_suffix('}')) {
                Some(name) => match name.strip_suffix('*') {
                    Some(_) if i != last => {
                        return Err(BridgeError::Config(format!(
                            "catch-all must be the last segment in {source}"
                        )));
                    }
                    Some(rest) => Segment::Rest(param_name(source, rest)?),
                    None => Segment::Param(param_name(source, name)?),
                },
                None => Segment::Literal(part.to_string()),
            };
            segments.push(segment);
        }

        Ok(Self {
            source: source.to_string(),
            segments,
        })
    }

    /// Matches `path` against the pattern, returning captured parameters.
    #[must_use]
    pub fn matches(&self, path: &[String]) -> Option<HashMap<String, String>> {
        let mut params = HashMap::new();
        let mut remaining = path.iter();

        for segment in &self.segments {
            match segment {
                Segment::Literal(lit) => {
                    if remaining.next() != Some(lit) {
                        return None;
                    }
                }
                Segment::Param(name) => {
                    params.insert(name.clone(), remaining.next()?.clone());
                }
                Segment::Rest(name) => {
                    let rest: Vec<&str> = remaining.by_ref().map(String::as_str).collect();
                    if !rest.is_empty() {
                        params.insert(name.clone(), rest.join("/"));
                    }
                }
            }
        }

        remaining.next().is_none().then_some(params)
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

fn param_name(source: &str, name: &str) -> Result<String, BridgeError> {
    if name.is_empty() {
        return Err(BridgeError::Config(format!(
            "empty parameter name in {source}"
        )));
    }
    Ok(name.to_string())
}

/// Ordered routing table. The first matching pattern wins.
#[derive(Default, Clone)]
pub struct Router {
    routes: Vec<(Pattern, Arc<dyn Handler>)>,
}

impl Router {
    /// Creates an empty router.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a route.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Config`] if the pattern is invalid.
    pub fn route(mut self, pattern: &str, handler: impl Handler) -> Result<Self, BridgeError> {
        self.routes.push((Pattern::parse(pattern)?, Arc::new(handler)));
        Ok(self)
    }

    /// Finds the handler for `path` and the parameters it captured.
    #[must_use]
    pub fn resolve(&self, path: &[String]) -> Option<(Arc<dyn Handler>, HashMap<String, String>)> {
        self.routes.iter().find_map(|(pattern, handler)| {
            pattern
                .matches(path)
                .map(|params| (Arc::clone(handler), params))
        })
    }

    /// Number of registered routes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// Returns `true` if no route is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

impl fmt::Debug for Router {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.routes.iter().map(|(pattern, _)| pattern.to_string()))
            .finish()
    }
}
