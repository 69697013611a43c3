//! URL route tables.
//!
//! A route table maps request path patterns to handlers. Every pattern is a
//! regular expression with exactly one capturing group, the thing id, e.g.
//! `/object/([A-Za-z0-9-]+)/status`.
//!
//! Patterns are anchored to the whole path and checked in declaration order;
//! the first match wins.

use regex::Regex;

/// A single pattern → handler entry.
#[derive(Debug, Clone)]
struct Route<H> {
    raw: String,
    regex: Regex,
    handler: H,
}

/// An ordered table of routes.
#[derive(Debug, Clone)]
pub struct RouteTable<H> {
    routes: Vec<Route<H>>,
}

/// The result of resolving a path against a [`RouteTable`].
#[derive(Debug, PartialEq)]
pub struct RouteMatch<'a, H> {
    /// The pattern that matched, as declared.
    pub pattern: &'a str,
    /// The handler bound to that pattern.
    pub handler: &'a H,
    /// The captured thing id.
    pub id: String,
}

impl<H> RouteTable<H> {
    /// Create an empty table.
    pub fn new() -> Self {
        Self { routes: Vec::new() }
    }

    /// Append a route. Builder-style.
    pub fn route(mut self, pattern: &str, handler: H) -> Result<Self, RouteError> {
        self.add(pattern, handler)?;
        Ok(self)
    }

    /// Append a route.
    pub fn add(&mut self, pattern: &str, handler: H) -> Result<(), RouteError> {
        let regex = Regex::new(&format!("^(?:{})$", pattern)).map_err(|e| RouteError::InvalidPattern {
            pattern: pattern.to_string(),
            reason: e.to_string(),
        })?;

        // captures_len counts the implicit whole-match group
        let groups = regex.captures_len() - 1;
        if groups != 1 {
            return Err(RouteError::CaptureGroups {
                pattern: pattern.to_string(),
                found: groups,
            });
        }

        self.routes.push(Route {
            raw: pattern.to_string(),
            regex,
            handler,
        });
        Ok(())
    }

    /// Resolve a request path. First match in declaration order wins.
    pub fn resolve(&self, path: &str) -> Option<RouteMatch<'_, H>> {
        self.routes.iter().find_map(|route| {
            let captures = route.regex.captures(path)?;
            let id = captures.get(1)?.as_str().to_string();
            Some(RouteMatch {
                pattern: &route.raw,
                handler: &route.handler,
                id,
            })
        })
    }

    /// Declared patterns, in order.
    pub fn patterns(&self) -> impl Iterator<Item = &str> {
        self.routes.iter().map(|r| r.raw.as_str())
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

impl<H> Default for RouteTable<H> {
    fn default() -> Self {
        Self::new()
    }
}

/// Errors that can occur when declaring a route.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RouteError {
    #[error("Invalid route pattern {pattern}: {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("Route pattern {pattern} must have exactly one capture group, found {found}")]
    CaptureGroups { pattern: String, found: usize },
}
