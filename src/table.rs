//! Tables: a dense array part indexed from 1 plus an insertion-ordered hash
//! part, with an optional metatable pointer.
//!
//! Keys are normalized before storage: floats with exact integer values
//! become integers, nil and NaN keys are rejected. Storing nil removes the
//! entry. The hash part keeps insertion order so `next` can resume iteration
//! from any live key.

use std::collections::HashMap;

use crate::error_types::{LuaError, LuaResult};
use crate::number;
use crate::value::{LuaValue, TableRef};

/// Insertion-ordered map with tombstone removal.
#[derive(Debug)]
struct OrderedMap {
    entries: Vec<Option<(LuaValue, LuaValue)>>,
    index: HashMap<LuaValue, usize>,
    tombstones: usize,
}

impl OrderedMap {
    fn new() -> Self {
        OrderedMap { entries: Vec::new(), index: HashMap::new(), tombstones: 0 }
    }

    fn get(&self, key: &LuaValue) -> Option<LuaValue> {
        let pos = *self.index.get(key)?;
        self.entries[pos].as_ref().map(|(_, v)| v.clone())
    }

    fn insert(&mut self, key: LuaValue, value: LuaValue) {
        if let Some(&pos) = self.index.get(&key) {
            if let Some(entry) = self.entries[pos].as_mut() {
                entry.1 = value;
                return;
            }
        }
        self.index.insert(key.clone(), self.entries.len());
        self.entries.push(Some((key, value)));
    }

    fn remove(&mut self, key: &LuaValue) {
        if let Some(pos) = self.index.remove(key) {
            self.entries[pos] = None;
            self.tombstones += 1;
            if self.tombstones > 32 && self.tombstones > self.entries.len() / 2 {
                self.compact();
            }
        }
    }

    fn compact(&mut self) {
        self.entries.retain(Option::is_some);
        self.index.clear();
        for (pos, entry) in self.entries.iter().enumerate() {
            if let Some((k, _)) = entry {
                self.index.insert(k.clone(), pos);
            }
        }
        self.tombstones = 0;
    }

    fn first(&self) -> Option<(LuaValue, LuaValue)> {
        self.entries.iter().flatten().next().cloned()
    }

    /// Entry following `key` in insertion order; outer `None` means the key
    /// is not present at all.
    fn next_after(&self, key: &LuaValue) -> Option<Option<(LuaValue, LuaValue)>> {
        let pos = *self.index.get(key)?;
        Some(self.entries[pos + 1..].iter().flatten().next().cloned())
    }
}

/// A Lua table.
#[derive(Debug)]
pub struct LuaTable {
    array: Vec<LuaValue>,
    hash: OrderedMap,
    metatable: Option<TableRef>,
}

impl Default for LuaTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Key normalization for writes: nil and NaN are rejected, integer-valued
/// floats and in-range BigInts collapse to `Integer`.
fn normalize_key(key: LuaValue) -> LuaResult<LuaValue> {
    match key {
        LuaValue::Nil => Err(LuaError::table("table index is nil")),
        LuaValue::Float(f) if f.is_nan() => Err(LuaError::table("table index is NaN")),
        LuaValue::Float(f) => match number::float_to_integer_exact(f) {
            Some(i) => Ok(LuaValue::Integer(i)),
            None => Ok(LuaValue::Float(f)),
        },
        LuaValue::BigInt(ref b) => match number::exact_integer(&key) {
            Some(i) => Ok(LuaValue::Integer(i)),
            None => Ok(LuaValue::BigInt(b.clone())),
        },
        other => Ok(other),
    }
}

/// Lenient normalization for reads: invalid keys simply miss.
fn normalize_read_key(key: &LuaValue) -> Option<LuaValue> {
    match key {
        LuaValue::Nil => None,
        LuaValue::Float(f) if f.is_nan() => None,
        other => normalize_key(other.clone()).ok(),
    }
}

impl LuaTable {
    pub fn new() -> Self {
        LuaTable { array: Vec::new(), hash: OrderedMap::new(), metatable: None }
    }

    pub fn metatable(&self) -> Option<TableRef> {
        self.metatable.clone()
    }

    pub fn set_metatable(&mut self, metatable: Option<TableRef>) {
        self.metatable = metatable;
    }

    /// Raw read, never consulting metamethods. Missing keys read as nil.
    pub fn raw_get(&self, key: &LuaValue) -> LuaValue {
        let key = match normalize_read_key(key) {
            Some(k) => k,
            None => return LuaValue::Nil,
        };
        if let LuaValue::Integer(i) = key {
            if i >= 1 && (i as usize) <= self.array.len() {
                return self.array[i as usize - 1].clone();
            }
        }
        self.hash.get(&key).unwrap_or(LuaValue::Nil)
    }

    /// Raw write, never consulting metamethods. Storing nil removes the key.
    pub fn raw_set(&mut self, key: LuaValue, value: LuaValue) -> LuaResult<()> {
        let key = normalize_key(key)?;
        if let LuaValue::Integer(i) = key {
            let len = self.array.len() as i64;
            if i >= 1 && i <= len {
                let idx = i as usize - 1;
                if value.is_nil() && i == len {
                    self.array.pop();
                    while matches!(self.array.last(), Some(LuaValue::Nil)) {
                        self.array.pop();
                    }
                } else {
                    self.array[idx] = value;
                }
                return Ok(());
            }
            if i == len + 1 && !value.is_nil() {
                self.array.push(value);
                // Pull any integer successors that accumulated in the hash
                // part into the array part.
                loop {
                    let next_key = LuaValue::Integer(self.array.len() as i64 + 1);
                    match self.hash.get(&next_key) {
                        Some(v) => {
                            self.hash.remove(&next_key);
                            self.array.push(v);
                        }
                        None => break,
                    }
                }
                return Ok(());
            }
        }
        if value.is_nil() {
            self.hash.remove(&key);
        } else {
            self.hash.insert(key, value);
        }
        Ok(())
    }

    /// A border: an index `n` with `t[n] ~= nil` and `t[n+1] == nil`, or 0
    /// when `t[1]` is nil.
    pub fn length(&self) -> i64 {
        if !self.array.is_empty() {
            // Invariant: the array part has no trailing nils.
            let mut n = self.array.len() as i64;
            while !self.hash.get(&LuaValue::Integer(n + 1)).map_or(true, |v| v.is_nil()) {
                n += 1;
            }
            return n;
        }
        if self.hash.get(&LuaValue::Integer(1)).is_none() {
            return 0;
        }
        // Doubling then binary search over the hash part.
        let mut i: i64 = 1;
        let mut j: i64 = 2;
        while self.hash.get(&LuaValue::Integer(j)).is_some() {
            i = j;
            if j > i64::MAX / 2 {
                while self.hash.get(&LuaValue::Integer(i + 1)).is_some() {
                    i += 1;
                }
                return i;
            }
            j *= 2;
        }
        while j - i > 1 {
            let m = (i + j) / 2;
            if self.hash.get(&LuaValue::Integer(m)).is_some() {
                i = m;
            } else {
                j = m;
            }
        }
        i
    }

    fn first_array_entry(&self, from: usize) -> Option<(LuaValue, LuaValue)> {
        for (offset, v) in self.array[from..].iter().enumerate() {
            if !v.is_nil() {
                return Some((LuaValue::Integer((from + offset + 1) as i64), v.clone()));
            }
        }
        None
    }

    /// Stateless iteration: the entry following `key`, with array entries in
    /// ascending index order first, then the hash part in insertion order.
    pub fn next_entry(&self, key: &LuaValue) -> LuaResult<Option<(LuaValue, LuaValue)>> {
        if key.is_nil() {
            if let Some(entry) = self.first_array_entry(0) {
                return Ok(Some(entry));
            }
            return Ok(self.hash.first());
        }
        let key = normalize_read_key(key)
            .ok_or_else(|| LuaError::runtime("invalid key to 'next'"))?;
        if let LuaValue::Integer(i) = key {
            if i >= 1 && (i as usize) <= self.array.len() {
                if let Some(entry) = self.first_array_entry(i as usize) {
                    return Ok(Some(entry));
                }
                return Ok(self.hash.first());
            }
        }
        match self.hash.next_after(&key) {
            Some(next) => Ok(next),
            None => Err(LuaError::runtime("invalid key to 'next'")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn int(i: i64) -> LuaValue {
        LuaValue::Integer(i)
    }

    #[test]
    fn test_array_part_set_get() {
        let mut t = LuaTable::new();
        t.raw_set(int(1), LuaValue::from("a")).unwrap();
        t.raw_set(int(2), LuaValue::from("b")).unwrap();
        assert_eq!(t.raw_get(&int(1)), LuaValue::from("a"));
        assert_eq!(t.raw_get(&int(2)), LuaValue::from("b"));
        assert_eq!(t.raw_get(&int(3)), LuaValue::Nil);
        assert_eq!(t.length(), 2);
    }

    #[test]
    fn test_float_keys_normalize_to_integers() {
        let mut t = LuaTable::new();
        t.raw_set(LuaValue::Float(1.0), LuaValue::from("x")).unwrap();
        assert_eq!(t.raw_get(&int(1)), LuaValue::from("x"));
        assert_eq!(t.raw_get(&LuaValue::Float(1.0)), LuaValue::from("x"));
    }

    #[test]
    fn test_nil_and_nan_keys_rejected() {
        let mut t = LuaTable::new();
        assert!(t.raw_set(LuaValue::Nil, int(1)).is_err());
        assert!(t.raw_set(LuaValue::Float(f64::NAN), int(1)).is_err());
        // Reads with those keys quietly miss.
        assert_eq!(t.raw_get(&LuaValue::Nil), LuaValue::Nil);
        assert_eq!(t.raw_get(&LuaValue::Float(f64::NAN)), LuaValue::Nil);
    }

    #[test]
    fn test_nil_assignment_removes() {
        let mut t = LuaTable::new();
        t.raw_set(LuaValue::from("k"), int(5)).unwrap();
        t.raw_set(LuaValue::from("k"), LuaValue::Nil).unwrap();
        assert_eq!(t.raw_get(&LuaValue::from("k")), LuaValue::Nil);
        // The table is empty again: iteration yields nothing.
        assert_eq!(t.next_entry(&LuaValue::Nil).unwrap(), None);
    }

    #[test]
    fn test_border_after_tail_removal() {
        let mut t = LuaTable::new();
        for i in 1..=5 {
            t.raw_set(int(i), int(i * 10)).unwrap();
        }
        t.raw_set(int(5), LuaValue::Nil).unwrap();
        assert_eq!(t.length(), 4);
        t.raw_set(int(1), LuaValue::Nil).unwrap();
        // Any border is legal; with a hole at 1 the array border stays 4.
        let n = t.length();
        assert!(t.raw_get(&int(n)) != LuaValue::Nil || n == 0);
        assert_eq!(t.raw_get(&int(n + 1)), LuaValue::Nil);
    }

    #[test]
    fn test_hash_migrates_into_array() {
        let mut t = LuaTable::new();
        t.raw_set(int(2), int(20)).unwrap();
        t.raw_set(int(3), int(30)).unwrap();
        assert_eq!(t.length(), 0);
        t.raw_set(int(1), int(10)).unwrap();
        assert_eq!(t.length(), 3);
    }

    #[test]
    fn test_length_zero_only_when_first_missing() {
        let mut t = LuaTable::new();
        assert_eq!(t.length(), 0);
        t.raw_set(LuaValue::from("x"), int(1)).unwrap();
        assert_eq!(t.length(), 0);
    }

    #[test]
    fn test_next_iterates_everything_once() {
        let mut t = LuaTable::new();
        t.raw_set(int(1), int(100)).unwrap();
        t.raw_set(int(2), int(200)).unwrap();
        t.raw_set(LuaValue::from("a"), int(300)).unwrap();
        t.raw_set(LuaValue::from("b"), int(400)).unwrap();

        let mut seen = Vec::new();
        let mut key = LuaValue::Nil;
        while let Some((k, v)) = t.next_entry(&key).unwrap() {
            seen.push((k.clone(), v));
            key = k;
        }
        assert_eq!(seen.len(), 4);
        // Array keys come first, ascending.
        assert_eq!(seen[0].0, int(1));
        assert_eq!(seen[1].0, int(2));
    }

    #[test]
    fn test_next_with_invalid_key() {
        let t = LuaTable::new();
        assert!(t.next_entry(&LuaValue::from("missing")).is_err());
    }

    #[test]
    fn test_removal_during_iteration_is_safe() {
        let mut t = LuaTable::new();
        for i in 0..8 {
            t.raw_set(LuaValue::from(format!("k{}", i)), int(i)).unwrap();
        }
        let mut key = t.next_entry(&LuaValue::Nil).unwrap().unwrap().0;
        // Remove the current key, then keep iterating from it.
        let mut count = 1;
        loop {
            let next = t.next_entry(&key);
            // Removing the traversal key itself is the one thing Lua allows.
            t.raw_set(key.clone(), LuaValue::Nil).unwrap();
            match next.unwrap() {
                Some((k, _)) => {
                    key = k;
                    count += 1;
                }
                None => break,
            }
        }
        assert_eq!(count, 8);
    }
}
