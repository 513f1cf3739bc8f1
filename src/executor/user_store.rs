//! User-space key-value storage
//!
//! The `getStorage`/`putStorage` bridge primitives read and write here:
//! a byte-keyed map per DApp, entirely distinct from the object graph
//! store. Writes participate in transaction semantics through an explicit
//! rollback journal: each frame begins a transaction, and a failed call
//! restores every key it touched.

use std::collections::HashMap;

#[derive(Debug, Default)]
pub struct UserStore {
    data: HashMap<Vec<u8>, Vec<u8>>,
    /// One journal per open transaction: (key, prior value)
    journal: Vec<Vec<(Vec<u8>, Option<Vec<u8>>)>>,
}

impl UserStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin_transaction(&mut self) {
        self.journal.push(Vec::new());
    }

    pub fn commit_transaction(&mut self) {
        let committed = self
            .journal
            .pop()
            .expect("commit without an open transaction");
        // Changes survive; fold the journal into the enclosing transaction
        // so an outer rollback still restores the oldest values.
        if let Some(outer) = self.journal.last_mut() {
            outer.extend(committed);
        }
    }

    pub fn rollback_transaction(&mut self) {
        let journal = self
            .journal
            .pop()
            .expect("rollback without an open transaction");
        for (key, prior) in journal.into_iter().rev() {
            match prior {
                Some(value) => self.data.insert(key, value),
                None => self.data.remove(&key),
            };
        }
    }

    pub fn get(&self, key: &[u8]) -> Option<&Vec<u8>> {
        self.data.get(key)
    }

    pub fn put(&mut self, key: Vec<u8>, value: Vec<u8>) {
        let prior = self.data.get(&key).cloned();
        if let Some(journal) = self.journal.last_mut() {
            journal.push((key.clone(), prior));
        }
        self.data.insert(key, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rollback_restores_prior_values() {
        let mut store = UserStore::new();
        store.begin_transaction();
        store.put(b"k".to_vec(), b"v1".to_vec());
        store.commit_transaction();

        store.begin_transaction();
        store.put(b"k".to_vec(), b"v2".to_vec());
        store.put(b"fresh".to_vec(), b"x".to_vec());
        store.rollback_transaction();

        assert_eq!(store.get(b"k"), Some(&b"v1".to_vec()));
        assert_eq!(store.get(b"fresh"), None);
    }

    #[test]
    fn test_nested_commit_folds_into_outer_rollback() {
        let mut store = UserStore::new();
        store.begin_transaction();
        store.put(b"k".to_vec(), b"outer".to_vec());

        store.begin_transaction();
        store.put(b"k".to_vec(), b"inner".to_vec());
        store.commit_transaction();
        assert_eq!(store.get(b"k"), Some(&b"inner".to_vec()));

        store.rollback_transaction();
        assert_eq!(store.get(b"k"), None);
    }
}
