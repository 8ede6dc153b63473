use serde::Serialize;
use std::collections::BTreeMap;

/// A name together with the shards that reported it.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct MergedName {
    pub name: String,
    pub shards: Vec<String>,
}

/// Set union of per-shard name lists.
///
/// Names come out sorted. Each name's shard list follows the order in which
/// shards were added, so feeding shards in directory order keeps that order.
#[derive(Debug, Default)]
pub struct NameUnion {
    names: BTreeMap<String, Vec<String>>,
}

impl NameUnion {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add<I, S>(&mut self, shard_id: &str, names: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for name in names {
            let shards = self.names.entry(name.into()).or_default();
            if shards.last().map(String::as_str) != Some(shard_id) {
                shards.push(shard_id.to_string());
            }
        }
    }

    pub fn into_merged(self) -> Vec<MergedName> {
        self.names
            .into_iter()
            .map(|(name, shards)| MergedName { name, shards })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_union_sorted_by_name() {
        let mut union = NameUnion::new();
        union.add("shardA", ["sales", "inventory"]);
        union.add("shardB", ["inventory", "hr"]);

        assert_eq!(
            union.into_merged(),
            vec![
                MergedName {
                    name: "hr".into(),
                    shards: vec!["shardB".into()]
                },
                MergedName {
                    name: "inventory".into(),
                    shards: vec!["shardA".into(), "shardB".into()]
                },
                MergedName {
                    name: "sales".into(),
                    shards: vec!["shardA".into()]
                },
            ]
        );
    }

    #[test]
    fn test_duplicate_names_from_one_shard() {
        let mut union = NameUnion::new();
        union.add("shardA", vec!["x".to_string(), "x".to_string()]);
        assert_eq!(
            union.into_merged(),
            vec![MergedName {
                name: "x".into(),
                shards: vec!["shardA".into()]
            }]
        );
    }

    #[test]
    fn test_empty() {
        assert!(NameUnion::new().into_merged().is_empty());
    }
}
