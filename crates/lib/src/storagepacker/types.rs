use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// One logical record stored inside a bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
  pub id: String,
  #[serde(with = "hex_bytes")]
  pub message: Vec<u8>,
}

impl Item {
  pub fn new(id: impl Into<String>, message: Vec<u8>) -> Self {
    Self {
      id: id.into(),
      message,
    }
  }
}

/// One physical storage entry holding many items, sorted by item id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bucket {
  pub key: String,
  #[serde(default)]
  pub items: Vec<Item>,
}

impl Bucket {
  pub fn new(key: impl Into<String>) -> Self {
    Self {
      key: key.into(),
      items: Vec::new(),
    }
  }

  pub fn find(&self, id: &str) -> Option<&Item> {
    self
      .items
      .binary_search_by(|item| item.id.as_str().cmp(id))
      .ok()
      .map(|idx| &self.items[idx])
  }

  /// Insert or replace an item, keeping the list ordered.
  pub fn upsert(&mut self, item: Item) {
    match self.items.binary_search_by(|existing| existing.id.cmp(&item.id)) {
      Ok(idx) => self.items[idx] = item,
      Err(idx) => self.items.insert(idx, item),
    }
  }

  /// Remove an item; returns whether it was present.
  pub fn remove(&mut self, id: &str) -> bool {
    match self.items.binary_search_by(|item| item.id.as_str().cmp(id)) {
      Ok(idx) => {
        self.items.remove(idx);
        true
      }
      Err(_) => false,
    }
  }
}

mod hex_bytes {
  use super::*;

  pub fn serialize<T: AsRef<[u8]>, S: Serializer>(bytes: T, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&hex::encode(bytes))
  }

  pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
    let encoded = String::deserialize(deserializer)?;
    hex::decode(encoded).map_err(serde::de::Error::custom)
  }
}
