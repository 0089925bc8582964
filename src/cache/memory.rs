//! In-process cache backend.

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::time::Instant;

use super::backend::{CacheBackend, CacheError};
use crate::sweep::Sweep;

#[derive(Debug, Clone)]
enum Value {
    Bytes(Vec<u8>),
    Set(HashSet<String>),
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }
}

/// Single-process backend with per-key expiry.
///
/// Expired entries are hidden on read and dropped by [`Sweep::sweep`].
#[derive(Debug, Default)]
pub struct MemoryBackend {
    entries: DashMap<String, Entry>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries, including expired ones not yet purged.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn live(&self, key: &str, now: Instant) -> Option<Entry> {
        let entry = self.entries.get(key)?.clone();
        if entry.is_expired(now) {
            self.entries.remove_if(key, |_, e| e.is_expired(now));
            return None;
        }
        Some(entry)
    }
}

#[async_trait]
impl CacheBackend for MemoryBackend {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        match self.live(key, Instant::now()) {
            Some(Entry {
                value: Value::Bytes(bytes),
                ..
            }) => Ok(Some(bytes)),
            Some(_) => Err(CacheError::WrongType {
                key: key.to_string(),
            }),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), CacheError> {
        self.entries.insert(
            key.to_string(),
            Entry {
                value: Value::Bytes(value),
                expires_at: Some(Instant::now() + ttl),
            },
        );
        Ok(())
    }

    async fn delete(&self, keys: &[String]) -> Result<u64, CacheError> {
        let now = Instant::now();
        let mut removed = 0;
        for key in keys {
            if let Some((_, entry)) = self.entries.remove(key) {
                if !entry.is_expired(now) {
                    removed += 1;
                }
            }
        }
        Ok(removed)
    }

    async fn keys_matching(&self, pattern: &str) -> Result<Vec<String>, CacheError> {
        let now = Instant::now();
        Ok(self
            .entries
            .iter()
            .filter(|e| !e.value().is_expired(now) && glob_match(pattern, e.key()))
            .map(|e| e.key().clone())
            .collect())
    }

    async fn add_to_set(&self, set_key: &str, member: &str) -> Result<(), CacheError> {
        let now = Instant::now();
        let mut entry = self
            .entries
            .entry(set_key.to_string())
            .or_insert_with(|| Entry {
                value: Value::Set(HashSet::new()),
                expires_at: None,
            });

        if entry.is_expired(now) {
            *entry = Entry {
                value: Value::Set(HashSet::new()),
                expires_at: None,
            };
        }

        match &mut entry.value {
            Value::Set(members) => {
                members.insert(member.to_string());
                Ok(())
            }
            Value::Bytes(_) => Err(CacheError::WrongType {
                key: set_key.to_string(),
            }),
        }
    }

    async fn extend_expiry(&self, key: &str, ttl: Duration) -> Result<(), CacheError> {
        let now = Instant::now();
        if let Some(mut entry) = self.entries.get_mut(key) {
            if !entry.is_expired(now) {
                let target = now + ttl;
                entry.expires_at = Some(entry.expires_at.map_or(target, |at| at.max(target)));
            }
        }
        Ok(())
    }

    async fn members_of(&self, set_key: &str) -> Result<Vec<String>, CacheError> {
        match self.live(set_key, Instant::now()) {
            Some(Entry {
                value: Value::Set(members),
                ..
            }) => Ok(members.into_iter().collect()),
            Some(_) => Err(CacheError::WrongType {
                key: set_key.to_string(),
            }),
            None => Ok(Vec::new()),
        }
    }
}

impl Sweep for MemoryBackend {
    fn sweep(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        before.saturating_sub(self.entries.len())
    }
}

/// Redis-style glob matching supporting `*` and `?`.
fn glob_match(pattern: &str, text: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let t: Vec<char> = text.chars().collect();

    let (mut pi, mut ti) = (0, 0);
    let mut backtrack: Option<(usize, usize)> = None;

    while ti < t.len() {
        if pi < p.len() && (p[pi] == '?' || p[pi] == t[ti]) {
            pi += 1;
            ti += 1;
        } else if pi < p.len() && p[pi] == '*' {
            backtrack = Some((pi, ti));
            pi += 1;
        } else if let Some((star_p, star_t)) = backtrack {
            pi = star_p + 1;
            ti = star_t + 1;
            backtrack = Some((star_p, star_t + 1));
        } else {
            return false;
        }
    }

    p[pi..].iter().all(|&c| c == '*')
}
