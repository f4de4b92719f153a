//! Nostr filters: parsing, serialization and predicate matching.

use std::collections::BTreeMap;
use std::fmt;

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::Error;
use crate::event::Event;

/// A conjunctive predicate over events.
///
/// Absent fields are unconstrained. Within a field, values are OR-ed;
/// across fields the filter is an AND. `ids` and `authors` hold hex
/// prefixes; tag filters are keyed by a single letter (`#e`, `#p`, ...).
/// Unknown JSON keys are ignored on parse.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Filter {
    /// Hex id prefixes.
    pub ids: Option<Vec<String>>,
    /// Hex author prefixes.
    pub authors: Option<Vec<String>>,
    /// Event kinds.
    pub kinds: Option<Vec<u16>>,
    /// Inclusive lower bound on `created_at`.
    pub since: Option<u64>,
    /// Inclusive upper bound on `created_at`.
    pub until: Option<u64>,
    /// Tag letter to accepted values.
    pub tags: BTreeMap<char, Vec<String>>,
    /// Maximum matches, descending by `created_at`. Zero yields nothing.
    pub limit: Option<u64>,
    /// Free-text search over content.
    pub search: Option<String>,
}

impl Filter {
    /// Parses a filter from a JSON object.
    pub fn from_json(json: &str) -> Result<Self, Error> {
        Ok(serde_json::from_str(json)?)
    }

    /// Serializes the filter to JSON.
    pub fn as_json(&self) -> Result<String, Error> {
        Ok(serde_json::to_string(self)?)
    }

    /// Whether `event` satisfies every constraint.
    pub fn matches(&self, event: &Event) -> bool {
        if let Some(ids) = &self.ids {
            let id_hex = hex::encode(event.id);
            if !ids.iter().any(|p| id_hex.starts_with(p.as_str())) {
                return false;
            }
        }
        if let Some(authors) = &self.authors {
            let pk_hex = hex::encode(event.pubkey);
            if !authors.iter().any(|p| pk_hex.starts_with(p.as_str())) {
                return false;
            }
        }
        if let Some(kinds) = &self.kinds {
            if !kinds.contains(&event.kind) {
                return false;
            }
        }
        if let Some(since) = self.since {
            if event.created_at < since {
                return false;
            }
        }
        if let Some(until) = self.until {
            if event.created_at > until {
                return false;
            }
        }
        for (letter, values) in &self.tags {
            let name = letter.to_string();
            let hit = event
                .tags
                .iter()
                .any(|t| {
                    t.first().is_some_and(|n| *n == name)
                        && t.get(1).is_some_and(|v| values.contains(v))
                });
            if !hit {
                return false;
            }
        }
        if let Some(search) = &self.search {
            if !event
                .content
                .to_lowercase()
                .contains(&search.to_lowercase())
            {
                return false;
            }
        }
        true
    }

    /// Whether `other` can only match a subset of this filter's matches.
    ///
    /// Conservative: returns `true` only when every present field of `self`
    /// is at least as strict in `other`.
    pub fn refines(&self, other: &Filter) -> bool {
        fn subset(narrow: &Option<Vec<String>>, wide: &Option<Vec<String>>) -> bool {
            match (narrow, wide) {
                (_, None) => true,
                (None, Some(_)) => false,
                (Some(n), Some(w)) => n.iter().all(|v| w.contains(v)),
            }
        }
        subset(&self.ids, &other.ids)
            && subset(&self.authors, &other.authors)
            && match (&self.kinds, &other.kinds) {
                (_, None) => true,
                (None, Some(_)) => false,
                (Some(n), Some(w)) => n.iter().all(|k| w.contains(k)),
            }
            && other.since.is_none_or(|w| self.since.is_some_and(|n| n >= w))
            && other.until.is_none_or(|w| self.until.is_some_and(|n| n <= w))
    }
}

impl Serialize for Filter {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        if let Some(v) = &self.ids {
            map.serialize_entry("ids", v)?;
        }
        if let Some(v) = &self.authors {
            map.serialize_entry("authors", v)?;
        }
        if let Some(v) = &self.kinds {
            map.serialize_entry("kinds", v)?;
        }
        if let Some(v) = self.since {
            map.serialize_entry("since", &v)?;
        }
        if let Some(v) = self.until {
            map.serialize_entry("until", &v)?;
        }
        for (letter, values) in &self.tags {
            map.serialize_entry(&format!("#{letter}"), values)?;
        }
        if let Some(v) = self.limit {
            map.serialize_entry("limit", &v)?;
        }
        if let Some(v) = &self.search {
            map.serialize_entry("search", v)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for Filter {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct FilterVisitor;

        impl<'de> Visitor<'de> for FilterVisitor {
            type Value = Filter;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a filter object")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Filter, A::Error> {
                use serde::de::Error as _;
                let mut filter = Filter::default();
                while let Some(key) = access.next_key::<String>()? {
                    match key.as_str() {
                        "ids" => filter.ids = Some(access.next_value()?),
                        "authors" => filter.authors = Some(access.next_value()?),
                        "kinds" => filter.kinds = Some(access.next_value()?),
                        "since" => filter.since = Some(access.next_value()?),
                        "until" => filter.until = Some(access.next_value()?),
                        "limit" => filter.limit = Some(access.next_value()?),
                        "search" => filter.search = Some(access.next_value()?),
                        other if other.starts_with('#') => {
                            let mut chars = other.chars();
                            chars.next();
                            match (chars.next(), chars.next()) {
                                (Some(letter), None) => {
                                    filter.tags.insert(letter, access.next_value()?);
                                }
                                _ => {
                                    return Err(A::Error::custom(format!(
                                        "bad tag filter key: {other}"
                                    )));
                                }
                            }
                        }
                        // Unknown keys are ignored by contract.
                        _ => {
                            let _: serde::de::IgnoredAny = access.next_value()?;
                        }
                    }
                }
                Ok(filter)
            }
        }

        deserializer.deserialize_map(FilterVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::test_support::make_event;

    #[test]
    fn json_roundtrip() {
        let mut filter = Filter {
            ids: Some(vec!["01".into()]),
            authors: Some(vec!["11".repeat(32)]),
            kinds: Some(vec![0, 1]),
            since: Some(10),
            until: Some(20),
            limit: Some(5),
            search: Some("hello".into()),
            ..Default::default()
        };
        filter.tags.insert('e', vec!["22".repeat(32)]);
        let json = filter.as_json().unwrap();
        assert_eq!(Filter::from_json(&json).unwrap(), filter);
    }

    #[test]
    fn unknown_keys_ignored() {
        let filter = Filter::from_json(r#"{"kinds":[1],"relay_hint":"wss://x"}"#).unwrap();
        assert_eq!(filter.kinds, Some(vec![1]));
    }

    #[test]
    fn kind_and_time_window() {
        let filter = Filter {
            kinds: Some(vec![1]),
            since: Some(100),
            until: Some(200),
            ..Default::default()
        };
        assert!(filter.matches(&make_event(1, 150, "", vec![])));
        assert!(!filter.matches(&make_event(0, 150, "", vec![])));
        assert!(!filter.matches(&make_event(1, 99, "", vec![])));
        assert!(!filter.matches(&make_event(1, 201, "", vec![])));
    }

    #[test]
    fn id_prefix_matching() {
        let event = make_event(1, 1, "x", vec![]);
        let prefix = hex::encode(&event.id[..2]);
        let filter = Filter {
            ids: Some(vec![prefix]),
            ..Default::default()
        };
        assert!(filter.matches(&event));
        let other = hex::encode([event.id[0] ^ 0xff, event.id[1]]);
        let miss = Filter {
            ids: Some(vec![other]),
            ..Default::default()
        };
        assert!(!miss.matches(&event));
    }

    #[test]
    fn tag_filter_exact_match() {
        let event = make_event(7, 1, "", vec![vec!["e".into(), "abc".into()]]);
        let mut filter = Filter::default();
        filter.tags.insert('e', vec!["abc".into()]);
        assert!(filter.matches(&event));
        filter.tags.insert('e', vec!["def".into()]);
        assert!(!filter.matches(&event));
    }

    #[test]
    fn search_is_case_insensitive() {
        let event = make_event(1, 1, "Hello World", vec![]);
        let filter = Filter {
            search: Some("hello".into()),
            ..Default::default()
        };
        assert!(filter.matches(&event));
    }

    #[test]
    fn refinement_is_subset() {
        let wide = Filter {
            kinds: Some(vec![0, 1]),
            ..Default::default()
        };
        let narrow = Filter {
            kinds: Some(vec![1]),
            since: Some(5),
            ..Default::default()
        };
        assert!(narrow.refines(&wide));
        assert!(!wide.refines(&narrow));
    }
}
