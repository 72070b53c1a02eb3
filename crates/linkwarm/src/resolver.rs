//! Navigation target → route key resolution
//!
//! Resolution runs in three stages:
//!
//! ```text
//!   "/es/dashboard/acme-corp/projects"
//!        │  strip locale prefix (en|es)
//!        ↓
//!   "/dashboard/acme-corp/projects"
//!        │  normalizations, in order
//!        ↓
//!   "/dashboard/projects"
//!        │  exact match, then suffix match
//!        ↓
//!   RouteKey("/dashboard/projects") + LoaderFn
//! ```

use crate::{LoaderFn, NavTarget, PrefetchError, Result, RouteKey, RouteModules};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::trace;

/// A path rewrite rule as it appears in configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizationRule {
    /// Regular expression; only the first match is replaced
    pub pattern: String,
    /// Replacement text. `$1`, `$&`, `$<name>` and `$$` behave as in a
    /// JavaScript `String.replace` pattern.
    pub replacement: String,
}

impl NormalizationRule {
    /// Create a rule
    pub fn new(pattern: impl Into<String>, replacement: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            replacement: replacement.into(),
        }
    }

    fn compile(&self) -> Result<PathNormalization> {
        let pattern = Regex::new(&self.pattern).map_err(|source| PrefetchError::InvalidPattern {
            pattern: self.pattern.clone(),
            source,
        })?;

        let replacement = expand_template(&self.replacement, pattern.captures_len() - 1);
        Ok(PathNormalization {
            pattern,
            replacement,
        })
    }
}

/// Rewrite a JavaScript replacement pattern as a `regex` template.
///
/// Group numbers are braced so `$1_team` reads group 1 followed by `_team`.
/// `$nn` takes two digits only when that group exists. Anything that is not
/// a group reference stays literal.
fn expand_template(replacement: &str, groups: usize) -> String {
    let chars: Vec<char> = replacement.chars().collect();
    let mut out = String::with_capacity(replacement.len() + 8);
    let mut i = 0;

    while i < chars.len() {
        if chars[i] != '$' {
            out.push(chars[i]);
            i += 1;
            continue;
        }

        let digit = |at: usize| chars.get(at).and_then(|c| c.to_digit(10)).map(|d| d as usize);
        match chars.get(i + 1) {
            Some('$') => {
                out.push_str("$$");
                i += 2;
            }
            Some('&') => {
                out.push_str("${0}");
                i += 2;
            }
            Some('<') => match chars[i + 2..].iter().position(|&c| c == '>') {
                Some(len) => {
                    let name: String = chars[i + 2..i + 2 + len].iter().collect();
                    out.push_str(&format!("${{{}}}", name));
                    i += len + 3;
                }
                None => {
                    out.push_str("$$");
                    i += 1;
                }
            },
            _ => match (digit(i + 1), digit(i + 2)) {
                (Some(tens), Some(ones)) if (1..=groups).contains(&(tens * 10 + ones)) => {
                    out.push_str(&format!("${{{}}}", tens * 10 + ones));
                    i += 3;
                }
                (Some(n), _) if (1..=groups).contains(&n) => {
                    out.push_str(&format!("${{{}}}", n));
                    i += 2;
                }
                _ => {
                    out.push_str("$$");
                    i += 1;
                }
            },
        }
    }

    out
}

#[derive(Debug, Clone)]
struct PathNormalization {
    pattern: Regex,
    replacement: String,
}

/// How to choose among several route keys that are all suffixes of a path
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuffixMatch {
    /// The longest matching key wins
    #[default]
    Longest,
    /// The first matching key in insertion order wins
    InsertionOrder,
}

/// Maps raw navigation targets to canonical route keys
#[derive(Debug, Clone, Default)]
pub struct PathResolver {
    locale_prefix: Option<Regex>,
    normalizations: Vec<PathNormalization>,
    suffix_match: SuffixMatch,
}

impl PathResolver {
    /// Build a resolver from locale prefixes and normalization rules.
    ///
    /// Fails if any rule is not a valid regular expression.
    pub fn new<S: AsRef<str>>(
        language_prefixes: &[S],
        normalizations: &[NormalizationRule],
    ) -> Result<Self> {
        let locale_prefix = if language_prefixes.is_empty() {
            None
        } else {
            let alternation = language_prefixes
                .iter()
                .map(|p| regex::escape(p.as_ref()))
                .collect::<Vec<_>>()
                .join("|");
            let pattern = format!("^/({})/", alternation);
            let compiled = Regex::new(&pattern)
                .map_err(|source| PrefetchError::InvalidPattern { pattern, source })?;
            Some(compiled)
        };

        let normalizations = normalizations
            .iter()
            .map(NormalizationRule::compile)
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            locale_prefix,
            normalizations,
            suffix_match: SuffixMatch::default(),
        })
    }

    /// Set the suffix match policy
    pub fn with_suffix_match(mut self, suffix_match: SuffixMatch) -> Self {
        self.suffix_match = suffix_match;
        self
    }

    /// Current suffix match policy
    pub fn suffix_match(&self) -> SuffixMatch {
        self.suffix_match
    }

    /// Apply locale stripping and normalization rules to a path
    pub fn normalize(&self, path: &str) -> String {
        let mut current = path.to_string();

        if let Some(locale) = &self.locale_prefix {
            current = locale.replace(&current, "/").into_owned();
        }

        for rule in &self.normalizations {
            current = rule
                .pattern
                .replace(&current, rule.replacement.as_str())
                .into_owned();
        }

        current
    }

    /// Resolve a target to its route key and loader
    pub fn resolve(
        &self,
        target: &NavTarget,
        routes: &RouteModules,
    ) -> Option<(RouteKey, LoaderFn)> {
        self.resolve_path(target.pathname(), routes)
    }

    /// Resolve a raw path to its route key and loader
    pub fn resolve_path(
        &self,
        path: &str,
        routes: &RouteModules,
    ) -> Option<(RouteKey, LoaderFn)> {
        let normalized = self.normalize(path);

        if let Some((key, loader)) = routes.get_entry(&normalized) {
            return Some((key.clone(), loader.clone()));
        }

        let mut candidates = routes
            .iter()
            .filter(|(key, _)| normalized.ends_with(key.as_str()));

        let matched = match self.suffix_match {
            SuffixMatch::InsertionOrder => candidates.next(),
            SuffixMatch::Longest => {
                let mut best: Option<(&RouteKey, &LoaderFn)> = None;
                for candidate in candidates {
                    let longer = best.map_or(true, |(key, _)| {
                        candidate.0.as_str().len() > key.as_str().len()
                    });
                    if longer {
                        best = Some(candidate);
                    }
                }
                best
            }
        };

        match matched {
            Some((key, loader)) => {
                trace!("Suffix-matched '{}' to route '{}'", normalized, key);
                Some((key.clone(), loader.clone()))
            }
            None => None,
        }
    }

    /// Resolve only the route key
    pub fn resolve_key(&self, path: &str, routes: &RouteModules) -> Option<RouteKey> {
        self.resolve_path(path, routes).map(|(key, _)| key)
    }
}
