use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use crate::types::Method;

/// Allow/block predicate over field names.
///
/// A name passes when it is not blocked and, if an allow list is present,
/// it appears in it. With neither list every name passes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldFilter {
    block: Option<HashSet<String>>,
    allow: Option<HashSet<String>>,
}

impl FieldFilter {
    pub fn new<B, A>(block: Option<B>, allow: Option<A>) -> Self
    where
        B: IntoIterator,
        B::Item: Into<String>,
        A: IntoIterator,
        A::Item: Into<String>,
    {
        Self {
            block: block.map(|b| b.into_iter().map(Into::into).collect()),
            allow: allow.map(|a| a.into_iter().map(Into::into).collect()),
        }
    }

    pub fn allow_all() -> Self {
        Self::default()
    }

    pub fn blocking<I>(names: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        Self { block: Some(names.into_iter().map(Into::into).collect()), allow: None }
    }

    pub fn allowing<I>(names: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        Self { block: None, allow: Some(names.into_iter().map(Into::into).collect()) }
    }

    pub fn allows(&self, name: &str) -> bool {
        let not_blocked = self.block.as_ref().map_or(true, |b| !b.contains(name));
        let allowed = self.allow.as_ref().map_or(true, |a| a.contains(name));
        not_blocked && allowed
    }
}

/// Block and/or allow list as declared on a view
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct KeyLists {
    #[serde(default)]
    pub block: Option<Vec<String>>,
    #[serde(default)]
    pub allow: Option<Vec<String>>,
}

impl KeyLists {
    pub fn to_filter(&self) -> FieldFilter {
        FieldFilter::new(self.block.clone(), self.allow.clone())
    }
}

/// Field-filter declaration: one pair for every method, or one per method
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilterKeyConfig {
    Global(KeyLists),
    PerMethod(HashMap<Method, KeyLists>),
}

impl FilterKeyConfig {
    /// Methods without an entry pass every field
    pub fn resolve(&self, method: Method) -> FieldFilter {
        match self {
            FilterKeyConfig::Global(lists) => lists.to_filter(),
            FilterKeyConfig::PerMethod(map) => map
                .get(&method)
                .map(KeyLists::to_filter)
                .unwrap_or_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NAMES: &[&str] = &["id", "key", "test", "test2", "password"];

    #[test]
    fn no_lists_passes_everything() {
        let filter = FieldFilter::allow_all();
        assert!(filter.allows("tttt"));
    }

    #[test]
    fn block_list_only() {
        let filter = FieldFilter::blocking(["key", "id"]);
        assert!(!filter.allows("key"));
        assert!(!filter.allows("id"));
        assert!(filter.allows("test"));
    }

    #[test]
    fn block_and_allow_lists() {
        let filter = FieldFilter::new(Some(["key", "id"]), Some(["test"]));
        assert!(!filter.allows("key"));
        assert!(!filter.allows("id"));
        assert!(filter.allows("test"));
        assert!(!filter.allows("test2"));
    }

    #[test]
    fn matches_set_formula_for_all_combinations() {
        let sets: Vec<Option<Vec<&str>>> = vec![
            None,
            Some(vec![]),
            Some(vec!["id"]),
            Some(vec!["id", "test"]),
            Some(vec!["password", "key", "test2"]),
        ];
        for block in &sets {
            for allow in &sets {
                let filter = FieldFilter::new(block.clone(), allow.clone());
                for name in NAMES {
                    let expected = allow.as_ref().map_or(true, |a| a.contains(name))
                        && block.as_ref().map_or(true, |b| !b.contains(name));
                    assert_eq!(filter.allows(name), expected, "block={:?} allow={:?} name={}", block, allow, name);
                }
            }
        }
    }

    #[test]
    fn per_method_config_from_yaml() {
        let cfg: FilterKeyConfig = serde_yaml::from_str(
            "post: { block: [id] }\nget: { block: [password] }\n",
        )
        .unwrap();
        assert!(!cfg.resolve(Method::Get).allows("password"));
        assert!(cfg.resolve(Method::Get).allows("id"));
        assert!(!cfg.resolve(Method::Post).allows("id"));
        assert!(cfg.resolve(Method::Delete).allows("password"));
    }

    #[test]
    fn global_config_from_yaml() {
        let cfg: FilterKeyConfig = serde_yaml::from_str("block: [password]\n").unwrap();
        assert!(matches!(cfg, FilterKeyConfig::Global(_)));
        assert!(!cfg.resolve(Method::Put).allows("password"));
    }
}
