use std::collections::HashSet;
use std::sync::{Arc, Mutex};

/// Per-stage set of hashes currently under work. Ephemeral and
/// process-local: it is never persisted and never bounded. Entries leak
/// when a completion notice is lost, until the process restarts.
#[derive(Clone, Default)]
pub struct InFlightSet(Arc<Mutex<HashSet<String>>>);

impl InFlightSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Admit `hash` if it is not already in flight. Returns false when
    /// the hash is already present, in which case the caller must skip
    /// the scrap entirely.
    pub fn try_admit(&self, hash: &str) -> bool {
        self.0.lock().unwrap().insert(hash.to_string())
    }

    /// Release `hash`. Returns false for hashes that were never
    /// admitted; callers drop such releases silently.
    pub fn release(&self, hash: &str) -> bool {
        self.0.lock().unwrap().remove(hash)
    }

    pub fn contains(&self, hash: &str) -> bool {
        self.0.lock().unwrap().contains(hash)
    }

    pub fn len(&self) -> usize {
        self.0.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn second_admit_of_same_hash_is_refused() {
        let set = InFlightSet::new();
        assert!(set.try_admit("aaa"));
        assert!(!set.try_admit("aaa"));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn release_frees_the_hash_for_readmission() {
        let set = InFlightSet::new();
        assert!(set.try_admit("bbb"));
        assert!(set.release("bbb"));
        assert!(set.try_admit("bbb"));
    }

    #[test]
    fn releasing_an_unknown_hash_is_a_silent_no_op() {
        let set = InFlightSet::new();
        set.try_admit("known");
        assert!(!set.release("unknown"));
        assert!(set.contains("known"));
    }

    #[test]
    fn clones_share_one_set() {
        let set = InFlightSet::new();
        let clone = set.clone();
        assert!(set.try_admit("ccc"));
        assert!(!clone.try_admit("ccc"));
        assert!(clone.release("ccc"));
        assert!(set.is_empty());
    }
}
