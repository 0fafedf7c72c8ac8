//! In-memory fakes for the tier seams.
//!
//! Used by unit tests across the workspace to exercise coordinator, queue,
//! and admission logic without a running Redis or Postgres.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};

use subtext_models::{Artifact, ErrorKind, Fingerprint};

use crate::coordinator::ArtifactStore;
use crate::error::{CacheError, CacheResult};
use crate::shared::SharedCache;

#[derive(Default)]
struct SharedState {
    kv: HashMap<String, (String, Option<Instant>)>,
    lists: HashMap<String, VecDeque<String>>,
}

impl SharedState {
    fn live_value(&mut self, key: &str) -> Option<String> {
        match self.kv.get(key) {
            Some((_, Some(expiry))) if *expiry <= Instant::now() => {
                self.kv.remove(key);
                None
            }
            Some((value, _)) => Some(value.clone()),
            None => None,
        }
    }
}

/// A `SharedCache` over process memory. Single-process only, but it honours
/// TTLs, atomicity of compare-and-set, and blocking list pops.
#[derive(Default)]
pub struct MemoryShared {
    state: Mutex<SharedState>,
    pushed: Notify,
    /// When set, every operation fails, simulating the tier being down.
    fail: std::sync::atomic::AtomicBool,
}

impl MemoryShared {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent operation fail with a connection-style error.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.fail
            .store(unavailable, std::sync::atomic::Ordering::SeqCst);
    }

    fn check_available(&self) -> CacheResult<()> {
        if self.fail.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(CacheError::store("shared tier unavailable"));
        }
        Ok(())
    }
}

#[async_trait]
impl SharedCache for MemoryShared {
    async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        self.check_available()?;
        let mut state = self.state.lock().await;
        Ok(state.live_value(key))
    }

    async fn get_many(&self, keys: &[String]) -> CacheResult<Vec<Option<String>>> {
        self.check_available()?;
        let mut state = self.state.lock().await;
        Ok(keys.iter().map(|key| state.live_value(key)).collect())
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<()> {
        self.check_available()?;
        let mut state = self.state.lock().await;
        state
            .kv
            .insert(key.to_string(), (value.to_string(), Some(Instant::now() + ttl)));
        Ok(())
    }

    async fn del(&self, key: &str) -> CacheResult<bool> {
        self.check_available()?;
        let mut state = self.state.lock().await;
        Ok(state.kv.remove(key).is_some())
    }

    async fn incr(&self, key: &str, ttl: Duration) -> CacheResult<i64> {
        self.check_available()?;
        let mut state = self.state.lock().await;
        let current = state
            .live_value(key)
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(0);
        let next = current + 1;
        state
            .kv
            .insert(key.to_string(), (next.to_string(), Some(Instant::now() + ttl)));
        Ok(next)
    }

    async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<bool> {
        self.check_available()?;
        let mut state = self.state.lock().await;
        if state.live_value(key).is_some() {
            return Ok(false);
        }
        state
            .kv
            .insert(key.to_string(), (value.to_string(), Some(Instant::now() + ttl)));
        Ok(true)
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&str>,
        new: &str,
        ttl: Duration,
    ) -> CacheResult<bool> {
        self.check_available()?;
        let mut state = self.state.lock().await;
        if state.live_value(key).as_deref() == expected {
            state
                .kv
                .insert(key.to_string(), (new.to_string(), Some(Instant::now() + ttl)));
            Ok(true)
        } else {
            Ok(false)
        }
    }

    async fn del_if_equals(&self, key: &str, value: &str) -> CacheResult<bool> {
        self.check_available()?;
        let mut state = self.state.lock().await;
        if state.live_value(key).as_deref() == Some(value) {
            state.kv.remove(key);
            Ok(true)
        } else {
            Ok(false)
        }
    }

    async fn push_back(&self, key: &str, value: &str) -> CacheResult<()> {
        self.check_available()?;
        let mut state = self.state.lock().await;
        state
            .lists
            .entry(key.to_string())
            .or_default()
            .push_back(value.to_string());
        drop(state);
        self.pushed.notify_waiters();
        Ok(())
    }

    async fn pop_front(&self, key: &str, timeout: Duration) -> CacheResult<Option<String>> {
        self.check_available()?;
        let deadline = Instant::now() + timeout;
        loop {
            {
                let mut state = self.state.lock().await;
                if let Some(list) = state.lists.get_mut(key) {
                    if let Some(value) = list.pop_front() {
                        return Ok(Some(value));
                    }
                }
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }
            let _ = tokio::time::timeout(remaining, self.pushed.notified()).await;
        }
    }

    async fn list_len(&self, key: &str) -> CacheResult<u64> {
        self.check_available()?;
        let state = self.state.lock().await;
        Ok(state.lists.get(key).map(|l| l.len() as u64).unwrap_or(0))
    }

    async fn scan_delete(&self, pattern: &str) -> CacheResult<u64> {
        self.check_available()?;
        let mut state = self.state.lock().await;
        let matching: Vec<String> = state
            .kv
            .keys()
            .filter(|k| glob_match(pattern, k))
            .cloned()
            .collect();
        for key in &matching {
            state.kv.remove(key);
        }
        Ok(matching.len() as u64)
    }

    async fn scan_keys(&self, pattern: &str, limit: usize) -> CacheResult<Vec<String>> {
        self.check_available()?;
        let state = self.state.lock().await;
        Ok(state
            .kv
            .keys()
            .filter(|k| glob_match(pattern, k))
            .take(limit)
            .cloned()
            .collect())
    }
}

/// Minimal glob matcher supporting `*` wildcards, enough for key patterns.
fn glob_match(pattern: &str, input: &str) -> bool {
    let parts: Vec<&str> = pattern.split('*').collect();
    if parts.len() == 1 {
        return pattern == input;
    }

    let mut rest = input;
    for (i, part) in parts.iter().enumerate() {
        if part.is_empty() {
            continue;
        }
        if i == 0 {
            match rest.strip_prefix(part) {
                Some(r) => rest = r,
                None => return false,
            }
        } else if i == parts.len() - 1 {
            return rest.ends_with(part);
        } else {
            match rest.find(part) {
                Some(pos) => rest = &rest[pos + part.len()..],
                None => return false,
            }
        }
    }
    // Pattern ended with '*'
    true
}

/// An `ArtifactStore` over process memory.
#[derive(Default)]
pub struct FakeStore {
    artifacts: Mutex<HashMap<String, Artifact>>,
    failures: Mutex<HashMap<String, (ErrorKind, String)>>,
    fail: std::sync::atomic::AtomicBool,
}

impl FakeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an artifact directly (test precondition).
    pub async fn insert(&self, artifact: Artifact) {
        let mut artifacts = self.artifacts.lock().await;
        artifacts.insert(artifact.fingerprint.encode(), artifact);
    }

    /// The failure recorded for a fingerprint, if any.
    pub async fn failed_kind(&self, fp: &Fingerprint) -> Option<ErrorKind> {
        let failures = self.failures.lock().await;
        failures.get(&fp.encode()).map(|(kind, _)| *kind)
    }

    /// Make every subsequent operation fail, simulating the store down.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.fail
            .store(unavailable, std::sync::atomic::Ordering::SeqCst);
    }

    fn check_available(&self) -> CacheResult<()> {
        if self.fail.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(CacheError::store("durable store unavailable"));
        }
        Ok(())
    }
}

#[async_trait]
impl ArtifactStore for FakeStore {
    async fn fetch(&self, fp: &Fingerprint) -> CacheResult<Option<Artifact>> {
        self.check_available()?;
        let artifacts = self.artifacts.lock().await;
        Ok(artifacts.get(&fp.encode()).cloned())
    }

    async fn upsert(&self, artifact: &Artifact) -> CacheResult<()> {
        self.check_available()?;
        let mut artifacts = self.artifacts.lock().await;
        artifacts.insert(artifact.fingerprint.encode(), artifact.clone());
        Ok(())
    }

    async fn mark_failed(
        &self,
        fp: &Fingerprint,
        kind: ErrorKind,
        message: &str,
    ) -> CacheResult<()> {
        self.check_available()?;
        let mut failures = self.failures.lock().await;
        failures.insert(fp.encode(), (kind, message.to_string()));
        Ok(())
    }

    async fn delete(&self, fp: &Fingerprint) -> CacheResult<u64> {
        self.check_available()?;
        let mut artifacts = self.artifacts.lock().await;
        Ok(if artifacts.remove(&fp.encode()).is_some() {
            1
        } else {
            0
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn glob_matching() {
        assert!(glob_match("artifact:*", "artifact:abc:en:1"));
        assert!(glob_match("rl:p1:*", "rl:p1:abcd"));
        assert!(!glob_match("rl:p1:*", "rl:p2:abcd"));
        assert!(glob_match("exact", "exact"));
        assert!(!glob_match("exact", "exact2"));
        assert!(glob_match("*:en:1", "artifact:abc:en:1"));
    }

    #[tokio::test]
    async fn set_nx_is_atomic_under_contention() {
        let shared = std::sync::Arc::new(MemoryShared::new());
        let mut handles = Vec::new();
        for i in 0..20 {
            let shared = std::sync::Arc::clone(&shared);
            handles.push(tokio::spawn(async move {
                shared
                    .set_nx("lock", &format!("owner-{i}"), Duration::from_secs(5))
                    .await
                    .unwrap()
            }));
        }
        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn blocking_pop_wakes_on_push() {
        let shared = std::sync::Arc::new(MemoryShared::new());
        let popper = {
            let shared = std::sync::Arc::clone(&shared);
            tokio::spawn(async move { shared.pop_front("q", Duration::from_secs(2)).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        shared.push_back("q", "item").await.unwrap();
        let popped = popper.await.unwrap().unwrap();
        assert_eq!(popped.as_deref(), Some("item"));
    }

    #[tokio::test]
    async fn ttl_expiry_is_lazy_but_observed() {
        let shared = MemoryShared::new();
        shared
            .set("k", "v", Duration::from_millis(10))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(shared.get("k").await.unwrap().is_none());
        // Expired key no longer blocks set_nx.
        assert!(shared
            .set_nx("k", "v2", Duration::from_secs(1))
            .await
            .unwrap());
    }
}
