use std::collections::HashSet;
use std::fmt::{Display, Formatter};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Serialize, Serializer};

static ITEM_KEY_ALLOCATOR: AtomicU64 = AtomicU64::new(1);

/// Render-stable identity of one field-array item, independent of its index.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct ItemKey(Arc<str>);

impl ItemKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Serialize for ItemKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl Display for ItemKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Mints item keys for one form and tracks which are still live.
///
/// The counter behind the keys is process-wide, so keys never collide across
/// forms even when two registries share a prefix.
#[derive(Debug)]
pub struct KeyRegistry {
    prefix: String,
    live: HashSet<ItemKey>,
}

impl KeyRegistry {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            live: HashSet::new(),
        }
    }

    pub fn mint(&mut self) -> ItemKey {
        let counter = ITEM_KEY_ALLOCATOR.fetch_add(1, Ordering::SeqCst);
        let key = ItemKey(format!("{}-{counter:016x}", self.prefix).into());
        self.live.insert(key.clone());
        key
    }

    pub fn mint_many(&mut self, count: usize) -> Vec<ItemKey> {
        (0..count).map(|_| self.mint()).collect()
    }

    pub fn retire(&mut self, key: &ItemKey) -> bool {
        self.live.remove(key)
    }

    pub fn is_live(&self, key: &ItemKey) -> bool {
        self.live.contains(key)
    }

    pub fn live_count(&self) -> usize {
        self.live.len()
    }
}
