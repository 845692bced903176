use std::collections::{BTreeSet, HashMap};

/// `key.culture`, the addressing scheme of a [`Catalog`].
pub fn composite_key(key: &str, culture_tag: &str) -> String {
    let mut out = String::with_capacity(key.len() + culture_tag.len() + 1);
    out.push_str(key);
    out.push('.');
    out.push_str(culture_tag);
    out
}

/// One immutable snapshot of composite key -> text template.
///
/// Snapshots are built whole and never edited; a reload publishes a new one.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    entries: HashMap<String, String>,
    duplicates: usize,
    generation: u64,
    loaded_at_ms: u64,
    load_error: Option<String>,
}

impl Catalog {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build from loader output. A composite key seen more than once keeps the
    /// last value; the number of overwritten entries is kept in `duplicates`.
    pub fn from_entries<I>(entries: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let iter = entries.into_iter();
        let mut map = HashMap::with_capacity(iter.size_hint().0);
        let mut duplicates = 0;
        for (k, v) in iter {
            if map.insert(k, v).is_some() {
                duplicates += 1;
            }
        }
        Self {
            entries: map,
            duplicates,
            ..Self::default()
        }
    }

    pub(crate) fn stamped(mut self, generation: u64, loaded_at_ms: u64) -> Self {
        self.generation = generation;
        self.loaded_at_ms = loaded_at_ms;
        self
    }

    /// An empty snapshot standing in for a failed load.
    pub(crate) fn failed(error: String) -> Self {
        Self {
            load_error: Some(error),
            ..Self::default()
        }
    }

    pub fn get(&self, composite: &str) -> Option<&str> {
        self.entries.get(composite).map(String::as_str)
    }

    pub fn get_for(&self, key: &str, culture_tag: &str) -> Option<&str> {
        self.get(&composite_key(key, culture_tag))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn duplicates(&self) -> usize {
        self.duplicates
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn loaded_at_ms(&self) -> u64 {
        self.loaded_at_ms
    }

    /// Why this snapshot is empty, when it replaced a failed load.
    pub fn load_error(&self) -> Option<&str> {
        self.load_error.as_deref()
    }

    /// Culture suffixes present in the snapshot (text after the last `.`).
    pub fn cultures(&self) -> BTreeSet<&str> {
        self.entries
            .keys()
            .filter_map(|k| k.rsplit_once('.').map(|(_, tag)| tag))
            .filter(|tag| !tag.is_empty())
            .collect()
    }
}
