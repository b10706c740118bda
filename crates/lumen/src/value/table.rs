// Insertion-ordered hash table
//
// Backing store for globals, map fields and map literals. Open addressing
// with linear probing, FNV-1a 64-bit hashing, power-of-two capacity that
// doubles at 75% load. Keys are never removed, so probe chains stay free of
// tombstones. A parallel key list records first-insertion order and drives
// iteration; updates never re-append.

use smol_str::SmolStr;

use super::Value;

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

const INITIAL_CAPACITY: usize = 8;

#[inline(always)]
fn fnv_1a(key: &str) -> u64 {
    let mut hash = FNV_OFFSET;
    for byte in key.as_bytes() {
        hash ^= *byte as u64;
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

#[derive(Clone)]
struct Entry {
    key: SmolStr,
    hash: u64,
    value: Value,
}

/// Map from string keys to values that remembers insertion order.
pub struct OrderedTable {
    entries: Vec<Option<Entry>>,
    keys: Vec<SmolStr>,
    len: usize,
}

impl OrderedTable {
    pub fn new() -> Self {
        OrderedTable {
            entries: (0..INITIAL_CAPACITY).map(|_| None).collect(),
            keys: Vec::new(),
            len: 0,
        }
    }

    #[inline(always)]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Probe for the slot holding `key`, or the empty slot where it would
    /// be inserted. Capacity is a power of two, the mask wraps the probe.
    #[inline]
    fn probe(&self, key: &str, hash: u64) -> usize {
        let mask = self.entries.len() - 1;
        let mut index = (hash as usize) & mask;
        loop {
            match &self.entries[index] {
                Some(entry) => {
                    if entry.hash == hash && entry.key == key {
                        return index;
                    }
                }
                None => return index,
            }
            index = (index + 1) & mask;
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        let index = self.probe(key, fnv_1a(key));
        self.entries[index].as_ref().map(|entry| &entry.value)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut Value> {
        let index = self.probe(key, fnv_1a(key));
        self.entries[index].as_mut().map(|entry| &mut entry.value)
    }

    /// Insert or update. Returns true when the key was newly inserted, in
    /// which case it is appended to the order list.
    pub fn put(&mut self, key: &str, value: Value) -> bool {
        if (self.len + 1) * 4 > self.entries.len() * 3 {
            self.expand();
        }

        let hash = fnv_1a(key);
        let index = self.probe(key, hash);
        match &mut self.entries[index] {
            Some(entry) => {
                entry.value = value;
                false
            }
            slot => {
                let key = SmolStr::new(key);
                *slot = Some(Entry {
                    key: key.clone(),
                    hash,
                    value,
                });
                self.keys.push(key);
                self.len += 1;
                true
            }
        }
    }

    /// Update-only variant of `put`. Returns false when the key is absent.
    pub fn set(&mut self, key: &str, value: Value) -> bool {
        match self.get_mut(key) {
            Some(slot) => {
                *slot = value;
                true
            }
            None => false,
        }
    }

    /// Keys in first-insertion order.
    pub fn keys(&self) -> &[SmolStr] {
        &self.keys
    }

    pub fn key_at(&self, index: usize) -> Option<&SmolStr> {
        self.keys.get(index)
    }

    /// Order-driven iteration: walks the key list and fetches each value.
    pub fn iter(&self) -> impl Iterator<Item = (&SmolStr, &Value)> {
        self.keys.iter().map(move |key| {
            let index = self.probe(key, fnv_1a(key));
            let entry = self.entries[index]
                .as_ref()
                .expect("ordered key missing from table");
            (key, &entry.value)
        })
    }

    /// Double the capacity and rehash from the stored hashes. The order
    /// list is untouched.
    fn expand(&mut self) {
        let new_capacity = self.entries.len() * 2;
        let new_mask = new_capacity - 1;
        let mut new_entries: Vec<Option<Entry>> = (0..new_capacity).map(|_| None).collect();

        for entry in self.entries.drain(..).flatten() {
            let mut index = (entry.hash as usize) & new_mask;
            while new_entries[index].is_some() {
                index = (index + 1) & new_mask;
            }
            new_entries[index] = Some(entry);
        }

        self.entries = new_entries;
    }
}

impl Default for OrderedTable {
    fn default() -> Self {
        Self::new()
    }
}
