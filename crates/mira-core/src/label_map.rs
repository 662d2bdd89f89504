//! Bidirectional label id ↔ person name mapping.

use crate::types::Person;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LabelMapError {
    #[error("label id {0} is already assigned")]
    DuplicateId(u32),
    #[error("person {0:?} is already enrolled")]
    DuplicateName(String),
}

/// Enrolled persons keyed both ways. Ids and names are each unique.
///
/// Persisted as a JSON array of `{label_id, name}` ordered by id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<Person>", into = "Vec<Person>")]
pub struct LabelMap {
    by_id: BTreeMap<u32, String>,
    by_name: HashMap<String, u32>,
}

impl LabelMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, label_id: u32, name: impl Into<String>) -> Result<(), LabelMapError> {
        let name = name.into();
        if self.by_id.contains_key(&label_id) {
            return Err(LabelMapError::DuplicateId(label_id));
        }
        if self.by_name.contains_key(&name) {
            return Err(LabelMapError::DuplicateName(name));
        }
        self.by_name.insert(name.clone(), label_id);
        self.by_id.insert(label_id, name);
        Ok(())
    }

    pub fn name(&self, label_id: u32) -> Option<&str> {
        self.by_id.get(&label_id).map(String::as_str)
    }

    pub fn id(&self, name: &str) -> Option<u32> {
        self.by_name.get(name).copied()
    }

    pub fn contains(&self, label_id: u32) -> bool {
        self.by_id.contains_key(&label_id)
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    /// Persons in ascending id order.
    pub fn persons(&self) -> impl Iterator<Item = Person> + '_ {
        self.by_id.iter().map(|(&label_id, name)| Person {
            label_id,
            name: name.clone(),
        })
    }
}

impl TryFrom<Vec<Person>> for LabelMap {
    type Error = LabelMapError;

    fn try_from(persons: Vec<Person>) -> Result<Self, Self::Error> {
        let mut map = LabelMap::new();
        for p in persons {
            map.insert(p.label_id, p.name)?;
        }
        Ok(map)
    }
}

impl From<LabelMap> for Vec<Person> {
    fn from(map: LabelMap) -> Self {
        map.persons().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_both_ways() {
        let mut map = LabelMap::new();
        map.insert(0, "Ana").unwrap();
        map.insert(2, "Luis").unwrap();
        assert_eq!(map.name(2), Some("Luis"));
        assert_eq!(map.id("Ana"), Some(0));
        assert_eq!(map.name(1), None);
        assert!(!map.contains(1));
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let mut map = LabelMap::new();
        map.insert(0, "Ana").unwrap();
        assert_eq!(map.insert(0, "Luis"), Err(LabelMapError::DuplicateId(0)));
        assert_eq!(map.name(0), Some("Ana"));
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let mut map = LabelMap::new();
        map.insert(0, "Ana").unwrap();
        assert_eq!(
            map.insert(1, "Ana"),
            Err(LabelMapError::DuplicateName("Ana".into()))
        );
        assert!(!map.contains(1));
    }

    #[test]
    fn test_persons_in_id_order() {
        let mut map = LabelMap::new();
        map.insert(5, "Zoe").unwrap();
        map.insert(1, "Bea").unwrap();
        let ids: Vec<u32> = map.persons().map(|p| p.label_id).collect();
        assert_eq!(ids, vec![1, 5]);
    }

    #[test]
    fn test_json_shape() {
        let mut map = LabelMap::new();
        map.insert(1, "Bea").unwrap();
        map.insert(0, "Ana").unwrap();
        let json = serde_json::to_string(&map).unwrap();
        assert_eq!(json, r#"[{"label_id":0,"name":"Ana"},{"label_id":1,"name":"Bea"}]"#);
        let back: LabelMap = serde_json::from_str(&json).unwrap();
        assert_eq!(back, map);
    }

    #[test]
    fn test_json_with_duplicates_rejected() {
        let json = r#"[{"label_id":0,"name":"Ana"},{"label_id":0,"name":"Bea"}]"#;
        assert!(serde_json::from_str::<LabelMap>(json).is_err());
    }
}
