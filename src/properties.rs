use crate::tracking::ALTERNATE_SUFFIX;

/// Insertion-ordered string map with unique keys.
///
/// Telemetry property sets are small, so a vector of pairs with linear lookup is
/// used instead of a hash map. This keeps the emission order stable, which also
/// lets a split property take the place of the original key.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Properties(Vec<(String, String)>);

impl<'a> IntoIterator for &'a Properties {
    type Item = &'a (String, String);
    type IntoIter = std::slice::Iter<'a, (String, String)>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl IntoIterator for Properties {
    type Item = (String, String);
    type IntoIter = std::vec::IntoIter<(String, String)>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<K, V> FromIterator<(K, V)> for Properties
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let mut properties = Self::new();
        properties.extend(iter, true);
        properties
    }
}

impl Properties {
    #[must_use]
    pub const fn new() -> Self {
        Self(Vec::new())
    }

    fn position(&self, key: &str) -> Option<usize> {
        self.0.iter().position(|(k, _)| k == key)
    }

    /// Adds a property, returning `true` if the map changed.
    ///
    /// An existing key is only updated when `override_previous` is set.
    pub fn add(
        &mut self,
        key: impl Into<String>,
        value: impl Into<String>,
        override_previous: bool,
    ) -> bool {
        let key = key.into();
        match self.position(&key) {
            Some(index) if override_previous => {
                self.0[index].1 = value.into();
                true
            }
            Some(_) => false,
            None => {
                self.0.push((key, value.into()));
                true
            }
        }
    }

    /// Adds or updates a property.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.add(key, value, true);
    }

    pub fn extend<I, K, V>(&mut self, iter: I, override_previous: bool)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        for (key, value) in iter {
            self.add(key, value, override_previous);
        }
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.position(key).map(|index| self.0[index].1.as_str())
    }

    /// Returns the value for `key` unless it is absent or blank.
    #[must_use]
    pub fn get_non_blank(&self, key: &str) -> Option<&str> {
        self.get(key).filter(|value| !value.trim().is_empty())
    }

    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.position(key).is_some()
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.position(key).map(|index| self.0.remove(index).1)
    }

    /// Replaces `key` with `replacements` at the same position.
    ///
    /// A distinct property already named like a replacement is kept under
    /// `{name}:Alternate`. Returns the keys written that way.
    pub(crate) fn splice(&mut self, key: &str, replacements: Vec<(String, String)>) -> Vec<String> {
        let mut displaced = Vec::new();
        if !self.contains_key(key) {
            return displaced;
        }
        for (new_key, _) in &replacements {
            if new_key == key {
                continue;
            }
            let Some(existing) = self.position(new_key) else {
                continue;
            };
            let alternate = format!("{new_key}{ALTERNATE_SUFFIX}");
            if self.contains_key(&alternate) {
                let (_, value) = self.0.remove(existing);
                self.insert(alternate.clone(), value);
            } else {
                self.0[existing].0.clone_from(&alternate);
            }
            displaced.push(alternate);
        }
        // Removing a collision may have shifted the original key.
        if let Some(index) = self.position(key) {
            self.0.splice(index..=index, replacements);
        }
        displaced
    }

    pub fn iter(&self) -> std::slice::Iter<'_, (String, String)> {
        self.0.iter()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|(key, _)| key.as_str())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl log::kv::Source for Properties {
    fn visit<'kvs>(
        &'kvs self,
        visitor: &mut dyn log::kv::VisitSource<'kvs>,
    ) -> Result<(), log::kv::Error> {
        for (key, value) in &self.0 {
            visitor.visit_pair(log::kv::Key::from_str(key), log::kv::Value::from(value.as_str()))?;
        }
        Ok(())
    }
}

impl serde::Serialize for Properties {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_map(self.0.iter().map(|(key, value)| (key, value)))
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_add_respects_override_flag() {
        let mut properties = Properties::new();
        assert!(properties.add("key", "first", false));
        assert!(!properties.add("key", "second", false));
        assert_eq!(properties.get("key"), Some("first"));

        assert!(properties.add("key", "third", true));
        assert_eq!(properties.get("key"), Some("third"));
        assert_eq!(properties.len(), 1);
    }

    #[test]
    fn test_insertion_order_is_preserved() {
        let properties: Properties = [("b", "1"), ("a", "2"), ("c", "3")].into_iter().collect();
        assert_eq!(properties.keys().collect::<Vec<_>>(), vec!["b", "a", "c"]);
        assert_eq!(
            serde_json::to_string(&properties).unwrap(),
            r#"{"b":"1","a":"2","c":"3"}"#
        );
    }

    #[test]
    fn test_splice_replaces_in_place() {
        let mut properties: Properties = [("a", "1"), ("big", "xyz"), ("c", "3")].into_iter().collect();
        properties.splice(
            "big",
            vec![
                ("big_1".to_owned(), "xy".to_owned()),
                ("big_2".to_owned(), "z".to_owned()),
            ],
        );
        assert_eq!(
            properties.keys().collect::<Vec<_>>(),
            vec!["a", "big_1", "big_2", "c"]
        );
        assert!(!properties.contains_key("big"));
    }

    #[test]
    fn test_splice_keeps_colliding_property() {
        let mut properties: Properties =
            [("Body", "abcdef"), ("Body_2", "kept"), ("other", "x")].into_iter().collect();
        let displaced = properties.splice(
            "Body",
            vec![
                ("Body_1".to_owned(), "abc".to_owned()),
                ("Body_2".to_owned(), "def".to_owned()),
            ],
        );
        assert_eq!(displaced, vec!["Body_2:Alternate".to_owned()]);
        assert_eq!(properties.get("Body_2"), Some("def"));
        assert_eq!(properties.get("Body_2:Alternate"), Some("kept"));
        assert_eq!(
            properties.keys().collect::<Vec<_>>(),
            vec!["Body_1", "Body_2", "Body_2:Alternate", "other"]
        );
    }

    #[test]
    fn test_blank_values_are_not_returned() {
        let properties: Properties = [("blank", "  "), ("full", "x")].into_iter().collect();
        assert_eq!(properties.get_non_blank("blank"), None);
        assert_eq!(properties.get_non_blank("full"), Some("x"));
        assert_eq!(properties.get_non_blank("missing"), None);
    }
}
