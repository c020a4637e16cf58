//! In-memory fakes for the adapter seams, shared by the engine's unit tests.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use matchcast_common::error::AppError;
use matchcast_common::types::{DeviceToken, Platform};
use matchcast_push::{GatewayError, PushGateway};

use crate::cache::TokenCache;
use crate::store::TokenStore;

/// In-memory [`TokenCache`] with switchable read/write outages.
#[derive(Default)]
pub(crate) struct MemoryCache {
    pub entries: Mutex<HashMap<String, String>>,
    pub fail_reads: AtomicBool,
    pub fail_writes: AtomicBool,
    pub gets: AtomicUsize,
    pub deletes: Mutex<Vec<String>>,
}

impl MemoryCache {
    pub fn with_entries(entries: &[(&str, &str)]) -> Self {
        let cache = Self::default();
        {
            let mut map = cache.entries.lock().unwrap();
            for (user_id, token) in entries {
                map.insert(user_id.to_string(), token.to_string());
            }
        }
        cache
    }

    pub fn contains(&self, user_id: &str) -> bool {
        self.entries.lock().unwrap().contains_key(user_id)
    }
}

#[async_trait]
impl TokenCache for MemoryCache {
    async fn get_many(&self, user_ids: &[String]) -> Result<HashMap<String, String>, AppError> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(AppError::Internal("cache unavailable".into()));
        }
        let entries = self.entries.lock().unwrap();
        Ok(user_ids
            .iter()
            .filter_map(|id| entries.get(id).map(|token| (id.clone(), token.clone())))
            .collect())
    }

    async fn set_many(&self, tokens: &HashMap<String, String>) -> Result<(), AppError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(AppError::Internal("cache unavailable".into()));
        }
        let mut entries = self.entries.lock().unwrap();
        for (user_id, token) in tokens {
            entries.insert(user_id.clone(), token.clone());
        }
        Ok(())
    }

    async fn delete(&self, user_id: &str) -> Result<(), AppError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(AppError::Internal("cache unavailable".into()));
        }
        self.entries.lock().unwrap().remove(user_id);
        self.deletes.lock().unwrap().push(user_id.to_string());
        Ok(())
    }
}

/// In-memory [`TokenStore`], one token per user, with per-user failure
/// injection for batch-isolation tests.
#[derive(Default)]
pub(crate) struct MemoryStore {
    pub tokens: Mutex<HashMap<String, String>>,
    pub fail_for: Mutex<Vec<String>>,
    pub deletes: Mutex<Vec<String>>,
}

impl MemoryStore {
    pub fn with_tokens(tokens: &[(&str, &str)]) -> Self {
        let store = Self::default();
        {
            let mut map = store.tokens.lock().unwrap();
            for (user_id, token) in tokens {
                map.insert(user_id.to_string(), token.to_string());
            }
        }
        store
    }

    pub fn fail_user(&self, user_id: &str) {
        self.fail_for.lock().unwrap().push(user_id.to_string());
    }

    pub fn contains(&self, user_id: &str) -> bool {
        self.tokens.lock().unwrap().contains_key(user_id)
    }
}

#[async_trait]
impl TokenStore for MemoryStore {
    async fn find_tokens_by_user_ids(
        &self,
        user_ids: &[String],
    ) -> Result<Vec<DeviceToken>, AppError> {
        {
            let failing = self.fail_for.lock().unwrap();
            if user_ids.iter().any(|id| failing.contains(id)) {
                return Err(AppError::Internal("store unavailable".into()));
            }
        }
        let tokens = self.tokens.lock().unwrap();
        Ok(user_ids
            .iter()
            .filter_map(|id| {
                tokens.get(id).map(|token| DeviceToken {
                    id: Uuid::new_v4(),
                    user_id: id.clone(),
                    token: token.clone(),
                    platform: Platform::Android,
                    created_at: Utc::now(),
                })
            })
            .collect())
    }

    async fn delete_by_user_id(&self, user_id: &str) -> Result<(), AppError> {
        {
            let failing = self.fail_for.lock().unwrap();
            if failing.iter().any(|id| id == user_id) {
                return Err(AppError::Internal("store unavailable".into()));
            }
        }
        self.tokens.lock().unwrap().remove(user_id);
        self.deletes.lock().unwrap().push(user_id.to_string());
        Ok(())
    }
}

/// One scripted gateway response. Produced fresh per call because
/// [`GatewayError`] is not `Clone`.
#[derive(Debug, Clone, Copy)]
pub(crate) enum SendScript {
    Succeed,
    Unregistered,
    Unavailable,
    Quota(Option<u64>),
    Unauthenticated,
    Unexpected,
}

impl SendScript {
    fn into_result(self, token: &str) -> Result<String, GatewayError> {
        match self {
            SendScript::Succeed => Ok(format!("msg-{token}")),
            SendScript::Unregistered => Err(GatewayError::Unregistered),
            SendScript::Unavailable => Err(GatewayError::Unavailable { status: 503 }),
            SendScript::Quota(retry_after) => Err(GatewayError::QuotaExceeded {
                retry_after: retry_after.map(Duration::from_secs),
            }),
            SendScript::Unauthenticated => Err(GatewayError::Unauthenticated { status: 401 }),
            SendScript::Unexpected => Err(GatewayError::Unexpected {
                status: 302,
                body: "moved".into(),
            }),
        }
    }
}

/// [`PushGateway`] fake driven by per-token scripts.
///
/// Each send pops the next scripted response for its token; the last entry
/// repeats once the queue is down to one, so a single `Unavailable` means
/// "always unavailable". Unscripted tokens succeed.
#[derive(Default)]
pub(crate) struct ScriptedGateway {
    scripts: Mutex<HashMap<String, VecDeque<SendScript>>>,
    pub calls: Mutex<Vec<(String, String)>>,
}

impl ScriptedGateway {
    pub fn script(&self, token: &str, responses: &[SendScript]) {
        self.scripts
            .lock()
            .unwrap()
            .insert(token.to_string(), responses.iter().copied().collect());
    }

    pub fn calls_for(&self, token: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(t, _)| t == token)
            .count()
    }

    pub fn body_sent_to(&self, token: &str) -> Option<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .find(|(t, _)| t == token)
            .map(|(_, body)| body.clone())
    }
}

#[async_trait]
impl PushGateway for ScriptedGateway {
    async fn send(
        &self,
        token: &str,
        _title: &str,
        body: &str,
        _data: &HashMap<String, String>,
    ) -> Result<String, GatewayError> {
        self.calls
            .lock()
            .unwrap()
            .push((token.to_string(), body.to_string()));

        let script = {
            let mut scripts = self.scripts.lock().unwrap();
            match scripts.get_mut(token) {
                Some(queue) if queue.len() > 1 => queue.pop_front(),
                Some(queue) => queue.front().copied(),
                None => None,
            }
        };

        script.unwrap_or(SendScript::Succeed).into_result(token)
    }
}

/// Gateway whose sends never complete; used to exercise cancellation.
#[derive(Default)]
pub(crate) struct StalledGateway {
    pub calls: AtomicUsize,
}

#[async_trait]
impl PushGateway for StalledGateway {
    async fn send(
        &self,
        _token: &str,
        _title: &str,
        _body: &str,
        _data: &HashMap<String, String>,
    ) -> Result<String, GatewayError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        std::future::pending().await
    }
}
