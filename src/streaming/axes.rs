//! Axis filtering against an external catalog.

use std::collections::{BTreeMap, BTreeSet};

use crate::error::Result;

/// Source of known axis names and their tokens.
pub trait AxisCatalog: Send + Sync {
    fn axis_tokens(&self) -> Result<BTreeMap<String, BTreeSet<String>>>;
}

/// Catalog backed by an in-memory map.
#[derive(Debug, Clone, Default)]
pub struct StaticAxisCatalog {
    axes: BTreeMap<String, BTreeSet<String>>,
}

impl StaticAxisCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_axis<I, S>(mut self, axis: impl Into<String>, tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.axes
            .insert(axis.into(), tokens.into_iter().map(Into::into).collect());
        self
    }
}

impl AxisCatalog for StaticAxisCatalog {
    fn axis_tokens(&self) -> Result<BTreeMap<String, BTreeSet<String>>> {
        Ok(self.axes.clone())
    }
}

/// Keep only known axes and known tokens, preserving token order.
///
/// A catalog failure yields an empty map.
pub fn filter_axes(
    requested: &BTreeMap<String, Vec<String>>,
    catalog: &dyn AxisCatalog,
) -> BTreeMap<String, Vec<String>> {
    let known = match catalog.axis_tokens() {
        Ok(known) => known,
        Err(err) => {
            tracing::warn!(error = %err, "axis catalog unavailable; dropping axes");
            return BTreeMap::new();
        }
    };

    let mut filtered = BTreeMap::new();
    for (axis, tokens) in requested {
        let Some(allowed) = known.get(axis) else {
            continue;
        };
        let mut kept: Vec<String> = Vec::new();
        for token in tokens {
            let token = token.trim();
            if allowed.contains(token) && !kept.iter().any(|k| k == token) {
                kept.push(token.to_string());
            }
        }
        if !kept.is_empty() {
            filtered.insert(axis.clone(), kept);
        }
    }
    filtered
}
