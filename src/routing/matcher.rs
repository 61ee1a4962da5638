//! Route matching logic.
//!
//! # Responsibilities
//! - Match path prefix (case-sensitive, plain string prefix)
//! - Match exact path with an optional method restriction
//!
//! # Design Decisions
//! - Path matching is case-sensitive
//! - A prefix matches on string boundaries, not segment boundaries
//! - No regex to guarantee O(n) matching

use axum::body::Body;
use axum::http::{Method, Request};

/// Trait for matching requests against conditions.
pub trait Matcher: Send + Sync + std::fmt::Debug {
    /// Returns true if the request matches this condition.
    fn matches(&self, req: &Request<Body>) -> bool;
}

/// Matches the request path prefix.
#[derive(Debug, Clone)]
pub struct PathPrefixMatcher {
    prefix: String,
}

impl PathPrefixMatcher {
    /// Create a new path prefix matcher.
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }
}

impl Matcher for PathPrefixMatcher {
    fn matches(&self, req: &Request<Body>) -> bool {
        req.uri().path().starts_with(&self.prefix)
    }
}

/// Matches one exact path, optionally restricted to one method.
#[derive(Debug, Clone)]
pub struct ExactPathMatcher {
    path: String,
    method: Option<Method>,
}

impl ExactPathMatcher {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            method: None,
        }
    }

    /// Only match requests using `method`.
    pub fn with_method(mut self, method: Method) -> Self {
        self.method = Some(method);
        self
    }
}

impl Matcher for ExactPathMatcher {
    fn matches(&self, req: &Request<Body>) -> bool {
        req.uri().path() == self.path
            && self.method.as_ref().map_or(true, |m| req.method() == m)
    }
}
