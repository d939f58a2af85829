//! Path patterns.
//!
//! A pattern is a `/`-delimited template. Literal segments must match the
//! path exactly; a `:name` segment matches any single segment and binds it
//! under `name`. The root pattern `/` matches only the root path.

use std::collections::HashMap;
use std::fmt;

use crate::error::RouteError;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Param(String),
}

/// A parsed route template such as `/users/:id/orders`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutePattern {
    raw: String,
    /// Empty for the root pattern.
    segments: Vec<Segment>,
}

impl RoutePattern {
    /// Parse a pattern. It must start with `/`, and every `:` segment must
    /// carry a name.
    pub fn parse(pattern: &str) -> Result<Self, RouteError> {
        let Some(rest) = pattern.strip_prefix('/') else {
            return Err(RouteError::InvalidPattern {
                pattern: pattern.to_string(),
                reason: "must start with '/'".into(),
            });
        };

        if rest.is_empty() {
            return Ok(Self {
                raw: pattern.to_string(),
                segments: Vec::new(),
            });
        }

        let segments = rest
            .split('/')
            .map(|segment| match segment.strip_prefix(':') {
                Some("") => Err(RouteError::InvalidPattern {
                    pattern: pattern.to_string(),
                    reason: "parameter segment without a name".into(),
                }),
                Some(name) => Ok(Segment::Param(name.to_string())),
                None => Ok(Segment::Literal(segment.to_string())),
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            raw: pattern.to_string(),
            segments,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    /// Match a decoded path (no query string) and return the bound
    /// parameters, or `None` when the path does not fit.
    ///
    /// Segment counts must be equal, so a trailing slash adds an empty
    /// segment: `/users/` matches `/users/:id` with `id` bound to `""`.
    pub fn matches(&self, path: &str) -> Option<HashMap<String, String>> {
        if path == "/" || self.is_root() {
            return (path == "/" && self.is_root()).then(HashMap::new);
        }

        let rest = path.strip_prefix('/')?;
        let mut parts = rest.split('/');
        let mut params = HashMap::new();

        for segment in &self.segments {
            let part = parts.next()?;
            match segment {
                Segment::Literal(literal) if literal != part => return None,
                Segment::Literal(_) => {}
                Segment::Param(name) => {
                    params.insert(name.clone(), part.to_string());
                }
            }
        }

        if parts.next().is_some() {
            return None;
        }
        Some(params)
    }
}

impl fmt::Display for RoutePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}
