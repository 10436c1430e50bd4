//! Persisted company knowledge base with fuzzy lookup.
//!
//! A flat JSON map from normalized company key to address/country,
//! loaded at startup and rewritten on every learn event. Lookups use a
//! token-order-insensitive similarity ratio so "ACME CORP." still
//! matches "Acme Corp". Learning is monotonic: an entry is only
//! replaced by a strictly longer (more complete) address.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::text;

/// Minimum token-sort similarity (0..=100) for a fuzzy match.
pub const MATCH_THRESHOLD: u32 = 80;

/// Stored facts about one company.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KbEntry {
    pub full_name: String,
    pub address: String,
    pub country: String,
}

/// Shared mutable store; the learn path is a read-modify-write critical
/// section, so all access goes through one mutex.
pub struct KnowledgeBase {
    path: PathBuf,
    entries: Mutex<HashMap<String, KbEntry>>,
}

impl KnowledgeBase {
    /// Load the knowledge base from `path`, starting empty when the
    /// file is missing or unreadable.
    pub fn load(path: &Path) -> Self {
        let entries = match std::fs::read_to_string(path) {
            Ok(raw) => match serde_json::from_str::<HashMap<String, KbEntry>>(&raw) {
                Ok(map) => {
                    info!("Knowledge base loaded: {} companies", map.len());
                    map
                }
                Err(e) => {
                    warn!("Knowledge base unreadable, starting empty: {}", e);
                    HashMap::new()
                }
            },
            Err(_) => HashMap::new(),
        };
        Self {
            path: path.to_path_buf(),
            entries: Mutex::new(entries),
        }
    }

    /// In-memory store for tests.
    pub fn in_memory() -> Self {
        Self {
            path: PathBuf::new(),
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Fuzzy lookup by company name. Returns the best stored entry when
    /// its token-sort similarity reaches [`MATCH_THRESHOLD`].
    pub fn lookup(&self, name: &str) -> Option<KbEntry> {
        let query = normalize_key(name);
        if query.is_empty() {
            return None;
        }
        let entries = self.entries.lock().unwrap();
        let (best_key, best_score) = entries
            .keys()
            .map(|key| (key, token_sort_ratio(&query, key)))
            .max_by_key(|(_, score)| *score)?;
        if best_score >= MATCH_THRESHOLD {
            debug!("KB match '{}' -> '{}' ({}%)", name, best_key, best_score);
            entries.get(best_key).cloned()
        } else {
            None
        }
    }

    /// Record an observed address/country for a company. Overwrites an
    /// existing entry only when the new address is strictly longer.
    pub fn learn(&self, name: &str, address: &str, country: &str) {
        let key = normalize_key(name);
        if key.is_empty() || address.trim().is_empty() {
            return;
        }
        let mut entries = self.entries.lock().unwrap();
        let replace = match entries.get(&key) {
            Some(existing) => address.len() > existing.address.len(),
            None => true,
        };
        if !replace {
            return;
        }
        entries.insert(
            key,
            KbEntry {
                full_name: name.trim().to_string(),
                address: address.trim().to_string(),
                country: country.trim().to_string(),
            },
        );
        // Rewrite while still holding the lock so concurrent learns
        // cannot interleave partial files.
        if !self.path.as_os_str().is_empty() {
            if let Err(e) = persist(&self.path, &entries) {
                warn!("Knowledge base write failed: {}", e);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn persist(path: &Path, entries: &HashMap<String, KbEntry>) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let raw = serde_json::to_string_pretty(entries)?;
    std::fs::write(path, raw)?;
    Ok(())
}

/// Normalize a company name into a lookup key: accent-folded,
/// lowercased, punctuation stripped, single-spaced.
pub fn normalize_key(name: &str) -> String {
    let folded = text::ascii_fold(&name.to_lowercase());
    let cleaned: String = folded
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();
    cleaned.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Token-sort similarity ratio in 0..=100: both sides are tokenized,
/// sorted and rejoined before a normalized Levenshtein comparison, so
/// word order does not matter.
pub fn token_sort_ratio(a: &str, b: &str) -> u32 {
    let sorted = |s: &str| {
        let mut tokens: Vec<&str> = s.split_whitespace().collect();
        tokens.sort_unstable();
        tokens.join(" ")
    };
    let (a, b) = (sorted(&normalize_key(a)), sorted(&normalize_key(b)));
    if a.is_empty() && b.is_empty() {
        return 100;
    }
    (strsim::normalized_levenshtein(&a, &b) * 100.0).round() as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_sort_ignores_order_and_case() {
        assert_eq!(token_sort_ratio("Acme Corp", "ACME CORP."), 100);
        assert_eq!(token_sort_ratio("Corp Acme", "Acme Corp"), 100);
        assert!(token_sort_ratio("Acme", "Very Different Co") < MATCH_THRESHOLD);
    }

    #[test]
    fn lookup_respects_threshold() {
        let kb = KnowledgeBase::in_memory();
        kb.learn("ACME CORP.", "1 Main Street, Tallinn, Estonia", "Estonia");
        let hit = kb.lookup("Acme Corp").expect("close name should match");
        assert_eq!(hit.country, "Estonia");
        assert!(kb.lookup("Acme").is_none());
    }

    #[test]
    fn learn_is_monotonic() {
        let kb = KnowledgeBase::in_memory();
        kb.learn("Nokia", "Espoo", "Finland");
        kb.learn("Nokia", "Karakaari 7, 02610 Espoo, Finland", "Finland");
        assert_eq!(
            kb.lookup("Nokia").unwrap().address,
            "Karakaari 7, 02610 Espoo, Finland"
        );

        // Reverse order: the longer address must survive.
        let kb = KnowledgeBase::in_memory();
        kb.learn("Nokia", "Karakaari 7, 02610 Espoo, Finland", "Finland");
        kb.learn("Nokia", "Espoo", "Finland");
        assert_eq!(
            kb.lookup("Nokia").unwrap().address,
            "Karakaari 7, 02610 Espoo, Finland"
        );
    }

    #[test]
    fn empty_learn_is_ignored() {
        let kb = KnowledgeBase::in_memory();
        kb.learn("", "Somewhere 1", "Norway");
        kb.learn("Acme", "   ", "Norway");
        assert!(kb.is_empty());
    }

    #[test]
    fn survives_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kb.json");
        {
            let kb = KnowledgeBase::load(&path);
            kb.learn("Acme Corp", "1 Main Street, Oslo, Norway", "Norway");
        }
        let kb = KnowledgeBase::load(&path);
        assert_eq!(kb.lookup("Acme Corp").unwrap().country, "Norway");
    }
}
