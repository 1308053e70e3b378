//! Backend identifiers and the backend selector.
//!
//! The set of scripting backends is closed and known at compile time. Each
//! [`BackendId`] carries a pure availability predicate (is this backend compiled
//! in, and can its runtime be reached on this host?) and a fixed fallback rank.
//!
//! # Fallback Order
//!
//! ```text
//! QuickJs  ->  Python  ->  PythonWrapped  ->  Rhai
//! ```
//!
//! Rhai is embedded unconditionally, so resolution never comes up empty on a
//! real build. [`best_match_in`] takes the availability set explicitly so the
//! selection rule can be exercised against any combination.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// Identifier of an interchangeable scripting backend.
///
/// Variants are declared in fallback order; `Ord` follows it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendId {
    /// QuickJS reached through the pluggable engine registry.
    #[serde(rename = "quickjs")]
    QuickJs,
    /// Python driven directly through guarded runtime lookups.
    Python,
    /// Python reached through the pluggable engine registry.
    PythonWrapped,
    /// Embedded Rhai interpreter, always present.
    Rhai,
}

impl BackendId {
    /// Every backend, in fallback order.
    pub const PRIORITY: [BackendId; 4] = [
        BackendId::QuickJs,
        BackendId::Python,
        BackendId::PythonWrapped,
        BackendId::Rhai,
    ];

    /// Human-readable name, also injected as the diagnostic binding.
    pub fn name(self) -> &'static str {
        match self {
            BackendId::QuickJs => "QuickJS",
            BackendId::Python => "Python",
            BackendId::PythonWrapped => "Python (wrapped)",
            BackendId::Rhai => "Rhai",
        }
    }

    /// Configuration key.
    pub fn key(self) -> &'static str {
        match self {
            BackendId::QuickJs => "quickjs",
            BackendId::Python => "python",
            BackendId::PythonWrapped => "python_wrapped",
            BackendId::Rhai => "rhai",
        }
    }

    /// Position in the fallback order (0 is tried first).
    pub fn fallback_rank(self) -> usize {
        match self {
            BackendId::QuickJs => 0,
            BackendId::Python => 1,
            BackendId::PythonWrapped => 2,
            BackendId::Rhai => 3,
        }
    }

    /// Whether this backend can be constructed in this build and on this host.
    pub fn is_available(self) -> bool {
        match self {
            BackendId::Rhai => true,
            BackendId::QuickJs => cfg!(feature = "scripting_js"),
            BackendId::Python | BackendId::PythonWrapped => python_available(),
        }
    }
}

#[cfg(feature = "scripting_python")]
fn python_available() -> bool {
    crate::scripting::pyo3_engine::probe_runtime()
}

#[cfg(not(feature = "scripting_python"))]
fn python_available() -> bool {
    false
}

impl fmt::Display for BackendId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for BackendId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        BackendId::PRIORITY
            .into_iter()
            .find(|id| id.key().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown scripting backend '{s}'"))
    }
}

/// User preference: a specific backend, or `auto` for the fallback order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum BackendPreference {
    /// Best available backend.
    #[default]
    Auto,
    /// This backend if available.
    Backend(BackendId),
}

impl fmt::Display for BackendPreference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendPreference::Auto => f.write_str("auto"),
            BackendPreference::Backend(id) => f.write_str(id.key()),
        }
    }
}

impl FromStr for BackendPreference {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().eq_ignore_ascii_case("auto") {
            Ok(BackendPreference::Auto)
        } else {
            s.parse().map(BackendPreference::Backend)
        }
    }
}

impl TryFrom<String> for BackendPreference {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<BackendPreference> for String {
    fn from(value: BackendPreference) -> Self {
        value.to_string()
    }
}

impl From<BackendId> for BackendPreference {
    fn from(id: BackendId) -> Self {
        BackendPreference::Backend(id)
    }
}

// =============================================================================
// Backend Selector
// =============================================================================

/// Backends that can be constructed here. Always contains [`BackendId::Rhai`].
pub fn available_backends() -> BTreeSet<BackendId> {
    BackendId::PRIORITY
        .into_iter()
        .filter(|id| id.is_available())
        .collect()
}

/// Resolve `preferred` against the live availability probes.
pub fn best_match(preferred: BackendPreference) -> Option<BackendId> {
    best_match_in(preferred, &available_backends())
}

/// Resolve `preferred` against an explicit availability set.
///
/// Returns the preferred backend when it is available, otherwise the first
/// available backend in fallback order, or `None` when `available` is empty.
pub fn best_match_in(
    preferred: BackendPreference,
    available: &BTreeSet<BackendId>,
) -> Option<BackendId> {
    fallback_chain_in(preferred, available).into_iter().next()
}

/// Every available backend worth trying for `preferred`, best first.
pub fn fallback_chain(preferred: BackendPreference) -> Vec<BackendId> {
    fallback_chain_in(preferred, &available_backends())
}

/// [`fallback_chain`] against an explicit availability set.
pub fn fallback_chain_in(
    preferred: BackendPreference,
    available: &BTreeSet<BackendId>,
) -> Vec<BackendId> {
    let head = match preferred {
        BackendPreference::Backend(id) if available.contains(&id) => Some(id),
        _ => None,
    };
    head.into_iter()
        .chain(
            BackendId::PRIORITY
                .into_iter()
                .filter(|id| available.contains(id) && Some(*id) != head),
        )
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(ids: &[BackendId]) -> BTreeSet<BackendId> {
        ids.iter().copied().collect()
    }

    #[test]
    fn test_rhai_always_available() {
        assert!(available_backends().contains(&BackendId::Rhai));
        assert!(best_match(BackendPreference::Auto).is_some());
    }

    #[test]
    fn test_quickjs_availability_follows_feature() {
        assert_eq!(
            BackendId::QuickJs.is_available(),
            cfg!(feature = "scripting_js")
        );
    }

    #[test]
    fn test_preferred_returned_when_available() {
        let available = set(&[BackendId::QuickJs, BackendId::Rhai]);
        assert_eq!(
            best_match_in(BackendId::Rhai.into(), &available),
            Some(BackendId::Rhai)
        );
    }

    #[test]
    fn test_unavailable_preference_walks_priority() {
        let available = set(&[BackendId::PythonWrapped, BackendId::Rhai]);
        assert_eq!(
            best_match_in(BackendId::QuickJs.into(), &available),
            Some(BackendId::PythonWrapped)
        );
        assert_eq!(
            best_match_in(BackendPreference::Auto, &available),
            Some(BackendId::PythonWrapped)
        );
    }

    #[test]
    fn test_empty_set_yields_none() {
        assert_eq!(best_match_in(BackendPreference::Auto, &BTreeSet::new()), None);
        assert_eq!(
            best_match_in(BackendId::Rhai.into(), &BTreeSet::new()),
            None
        );
    }

    #[test]
    fn test_fallback_chain_has_no_duplicates() {
        let available = set(&BackendId::PRIORITY);
        let chain = fallback_chain_in(BackendId::Rhai.into(), &available);
        assert_eq!(
            chain,
            vec![
                BackendId::Rhai,
                BackendId::QuickJs,
                BackendId::Python,
                BackendId::PythonWrapped
            ]
        );
    }

    #[test]
    fn test_priority_matches_rank() {
        for (rank, id) in BackendId::PRIORITY.iter().enumerate() {
            assert_eq!(id.fallback_rank(), rank);
        }
    }

    #[test]
    fn test_preference_parsing() {
        assert_eq!("auto".parse(), Ok(BackendPreference::Auto));
        assert_eq!(
            "QuickJS".parse(),
            Ok(BackendPreference::Backend(BackendId::QuickJs))
        );
        assert_eq!(
            "python_wrapped".parse(),
            Ok(BackendPreference::Backend(BackendId::PythonWrapped))
        );
        assert!("lua".parse::<BackendPreference>().is_err());
        assert_eq!(String::from(BackendPreference::from(BackendId::Rhai)), "rhai");
    }
}
