//! Serialization helpers for maps whose key is carried inside the value.
//!
//! State and input identities are arbitrary values, which JSON cannot use as
//! object keys. Maps of this kind are written as a sequence of entries and
//! rebuilt from each entry's own key on the way back in.

use std::fmt::Debug;
use std::hash::Hash;

/// A value that knows the key it is stored under
pub trait Keyed {
    type Key: Eq + Hash + Clone + Debug;

    fn key(&self) -> &Self::Key;
}

pub(crate) mod keyed_seq {
    use super::Keyed;
    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::collections::HashMap;

    pub fn serialize<K, V, Ser>(map: &HashMap<K, V>, serializer: Ser) -> Result<Ser::Ok, Ser::Error>
    where
        V: Serialize,
        Ser: Serializer,
    {
        serializer.collect_seq(map.values())
    }

    pub fn deserialize<'de, D, V>(deserializer: D) -> Result<HashMap<V::Key, V>, D::Error>
    where
        D: Deserializer<'de>,
        V: Deserialize<'de> + Keyed,
    {
        let entries = Vec::<V>::deserialize(deserializer)?;
        let mut map = HashMap::with_capacity(entries.len());

        for entry in entries {
            let key = entry.key().clone();
            if map.contains_key(&key) {
                return Err(D::Error::custom(format!("duplicate entry for key {key:?}")));
            }
            map.insert(key, entry);
        }

        Ok(map)
    }
}
