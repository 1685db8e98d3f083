//! API Handlers
//!
//! HTTP request handlers for each cache server endpoint.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Path, Query, State},
    Json,
};
use tracing::info;

use crate::bus::ChangeJournal;
use crate::cache::{ExpirationSpec, ObservableCache};
use crate::config::Config;
use crate::error::{CacheError, Result};
use crate::models::{
    AddRequest, ChangesQuery, ChangesResponse, ExpireRequest, ExpireResponse, GetResponse,
    HealthResponse, MutationResponse, SetRequest, StatsResponse,
};

/// Cache type served over HTTP.
pub type StringCache = ObservableCache<String, String>;

/// Application state shared across all handlers.
///
/// The journal is subscribed to the cache and backs `GET /changes`.
#[derive(Clone)]
pub struct AppState {
    pub cache: StringCache,
    pub journal: Arc<ChangeJournal<String, String>>,
    /// TTL for entries added without one
    pub default_ttl: Option<Duration>,
}

impl AppState {
    /// Wraps `cache` and subscribes a journal of `journal_capacity` records.
    pub fn new(cache: StringCache, journal_capacity: usize) -> Self {
        let journal = Arc::new(ChangeJournal::new(journal_capacity));
        cache.subscribe_shared(journal.clone());
        Self {
            cache,
            journal,
            default_ttl: None,
        }
    }

    /// Creates a new AppState from configuration.
    pub fn from_config(config: &Config) -> Self {
        let mut state = Self::new(ObservableCache::new(), config.journal_capacity);
        state.default_ttl = config.default_ttl();
        state
    }
}

/// Builds the expiration requested over HTTP. `replace_with` becomes a
/// factory that always yields that value.
fn expiration_spec(
    ttl: Duration,
    sliding: bool,
    replace_with: Option<String>,
) -> ExpirationSpec<String, String> {
    let spec = if sliding {
        ExpirationSpec::sliding(ttl)
    } else {
        ExpirationSpec::absolute(ttl)
    };
    match replace_with {
        Some(replacement) => spec.replace_with(move |_, _| Ok(replacement.clone())),
        None => spec,
    }
}

/// Handler for POST /add
///
/// Inserts a new key, optionally with an expiration. 409 if the key exists.
pub async fn add_handler(
    State(state): State<AppState>,
    Json(req): Json<AddRequest>,
) -> Result<Json<MutationResponse>> {
    if let Some(error_msg) = req.validate() {
        return Err(CacheError::InvalidRequest(error_msg));
    }

    let ttl = req.ttl_ms.map(Duration::from_millis).or(state.default_ttl);
    let record = match ttl {
        Some(ttl) => {
            let spec = expiration_spec(ttl, req.sliding, req.replace_with);
            state.cache.add_with_expiration(req.key.clone(), req.value, spec)?
        }
        None => state.cache.add(req.key.clone(), req.value)?,
    };

    Ok(Json(MutationResponse::from_record(req.key, &record)))
}

/// Handler for PUT /set
///
/// Adds the key or replaces its value.
pub async fn set_handler(
    State(state): State<AppState>,
    Json(req): Json<SetRequest>,
) -> Result<Json<MutationResponse>> {
    if let Some(error_msg) = req.validate() {
        return Err(CacheError::InvalidRequest(error_msg));
    }

    let record = state.cache.put(req.key.clone(), req.value)?;

    Ok(Json(MutationResponse::from_record(req.key, &record)))
}

/// Handler for GET /get/:key
///
/// Retrieves a value, resolving a due expiration first. The read runs on the
/// blocking pool since resolution may call a factory and observers.
pub async fn get_handler(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<GetResponse>> {
    let cache = state.cache.clone();
    let lookup = key.clone();
    let (entry, now) =
        tokio::task::spawn_blocking(move || (cache.get_entry(&lookup), cache.now_ms()))
            .await
            .map_err(|e| CacheError::Internal(format!("read task failed: {}", e)))?;
    let entry = entry.ok_or_else(|| CacheError::key_not_found(&key))?;

    Ok(Json(GetResponse {
        expires_in_ms: entry.ttl_remaining_ms(now),
        version: entry.version,
        value: entry.value,
        key,
    }))
}

/// Handler for DELETE /del/:key
pub async fn delete_handler(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<MutationResponse>> {
    let record = state.cache.remove(&key)?;

    Ok(Json(MutationResponse::from_record(key, &record)))
}

/// Handler for PUT /expire/:key
///
/// Attaches or replaces the expiration of a present key.
pub async fn expire_handler(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Json(req): Json<ExpireRequest>,
) -> Result<Json<ExpireResponse>> {
    if let Some(error_msg) = req.validate() {
        return Err(CacheError::InvalidRequest(error_msg));
    }

    let replaces = req.replace_with.is_some();
    let spec = expiration_spec(Duration::from_millis(req.ttl_ms), req.sliding, req.replace_with);
    state.cache.set_expiration(&key, spec)?;

    Ok(Json(ExpireResponse {
        message: format!("Expiration set on key '{}'", key),
        key,
        ttl_ms: req.ttl_ms,
        sliding: req.sliding,
        replaces,
    }))
}

/// Handler for POST /clear
///
/// Drops every entry; subscribers receive one `Reset`.
pub async fn clear_handler(State(state): State<AppState>) -> Json<MutationResponse> {
    let removed = state.cache.len();
    let record = state.cache.clear();
    info!(removed, "Cache cleared");

    Json(MutationResponse::from_record("*", &record))
}

/// Handler for GET /changes?after=N
///
/// Returns retained change records and factory failures newer than `after`.
pub async fn changes_handler(
    State(state): State<AppState>,
    Query(query): Query<ChangesQuery>,
) -> Json<ChangesResponse> {
    Json(ChangesResponse::from_events(
        state.journal.since(query.after),
        state.journal.latest_sequence(),
    ))
}

/// Handler for GET /stats
pub async fn stats_handler(State(state): State<AppState>) -> Json<StatsResponse> {
    Json(StatsResponse::new(
        state.cache.stats(),
        state.cache.subscriber_count(),
    ))
}

/// Handler for GET /health
pub async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse::healthy())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{ChangeRecord, ChangeType};
    use crate::cache::Resolution;
    use crate::clock::ManualClock;
    use parking_lot::Mutex;

    fn test_state() -> (AppState, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(0));
        let cache = ObservableCache::with_clock(clock.clone());
        (AppState::new(cache, 16), clock)
    }

    fn add_request(key: &str, value: &str) -> AddRequest {
        AddRequest {
            key: key.to_string(),
            value: value.to_string(),
            ttl_ms: None,
            sliding: false,
            replace_with: None,
        }
    }

    #[tokio::test]
    async fn test_add_and_get_handler() {
        let (state, _) = test_state();

        let added = add_handler(State(state.clone()), Json(add_request("k", "v")))
            .await
            .unwrap();
        assert_eq!(added.change_type, ChangeType::Added);

        let got = get_handler(State(state), Path("k".to_string())).await.unwrap();
        assert_eq!(got.value, "v");
        assert_eq!(got.version, added.version);
        assert_eq!(got.expires_in_ms, None);
    }

    #[tokio::test]
    async fn test_add_duplicate_is_conflict() {
        let (state, _) = test_state();
        add_handler(State(state.clone()), Json(add_request("k", "v")))
            .await
            .unwrap();

        let result = add_handler(State(state), Json(add_request("k", "w"))).await;
        assert!(matches!(result, Err(CacheError::DuplicateKey(_))));
    }

    #[tokio::test]
    async fn test_add_with_ttl_and_replacement() {
        let (state, clock) = test_state();
        let mut req = add_request("k", "stale");
        req.ttl_ms = Some(100);
        req.replace_with = Some("fresh".to_string());
        add_handler(State(state.clone()), Json(req)).await.unwrap();

        let got = get_handler(State(state.clone()), Path("k".to_string())).await.unwrap();
        assert_eq!(got.expires_in_ms, Some(100));

        clock.advance(Duration::from_millis(100));
        let got = get_handler(State(state), Path("k".to_string())).await.unwrap();
        assert_eq!(got.value, "fresh");
        assert_eq!(got.expires_in_ms, Some(100));
    }

    #[tokio::test]
    async fn test_add_with_ttl_is_armed_before_publication() {
        let (state, _) = test_state();
        let seen: Arc<Mutex<Vec<Option<u64>>>> = Arc::new(Mutex::new(Vec::new()));
        let reader = state.cache.clone();
        let sink = seen.clone();
        state.cache.subscribe(move |record: &ChangeRecord<String, String>| {
            if record.change_type == ChangeType::Added {
                let key = record.key.clone().unwrap_or_default();
                sink.lock().push(reader.get_entry(&key).and_then(|e| e.expires_at));
                reader.remove(&key).unwrap();
            }
        });

        let mut req = add_request("k", "v");
        req.ttl_ms = Some(100);
        let added = add_handler(State(state.clone()), Json(req)).await.unwrap();

        assert_eq!(added.change_type, ChangeType::Added);
        assert_eq!(*seen.lock(), vec![Some(100)]);
    }

    #[tokio::test]
    async fn test_get_handler_resolves_off_the_async_thread() {
        let (state, clock) = test_state();
        let caller = std::thread::current().id();
        let factory_threads = Arc::new(Mutex::new(Vec::new()));
        let threads = factory_threads.clone();
        state.cache.add("k".to_string(), "stale".to_string()).unwrap();
        state
            .cache
            .set_expiration(
                &"k".to_string(),
                ExpirationSpec::absolute(Duration::from_millis(10)).replace_with(move |_, _| {
                    threads.lock().push(std::thread::current().id());
                    Ok("fresh".to_string())
                }),
            )
            .unwrap();

        clock.advance(Duration::from_millis(10));
        let got = get_handler(State(state), Path("k".to_string())).await.unwrap();

        assert_eq!(got.value, "fresh");
        let threads = factory_threads.lock();
        assert_eq!(threads.len(), 1);
        assert_ne!(threads[0], caller);
    }

    #[tokio::test]
    async fn test_changes_report_factory_failures() {
        let (state, clock) = test_state();
        add_handler(State(state.clone()), Json(add_request("k", "v")))
            .await
            .unwrap();
        state
            .cache
            .set_expiration(
                &"k".to_string(),
                ExpirationSpec::absolute(Duration::from_millis(10))
                    .replace_with(|_, _| Err(anyhow::anyhow!("upstream unavailable"))),
            )
            .unwrap();

        clock.advance(Duration::from_millis(10));
        assert_eq!(state.cache.expire(&"k".to_string()), Resolution::FactoryFailed);

        let feed = changes_handler(State(state), Query(ChangesQuery::default())).await;
        let kinds: Vec<ChangeType> = feed.changes.iter().map(|r| r.change_type).collect();
        assert_eq!(kinds, vec![ChangeType::Added, ChangeType::Expired]);
        assert_eq!(feed.failures.len(), 1);
        assert_eq!(feed.failures[0].sequence, feed.changes[1].sequence + 1);
        assert!(feed.failures[0].error.contains("upstream unavailable"));
        assert_eq!(feed.latest_sequence, Some(feed.failures[0].sequence));
    }

    #[tokio::test]
    async fn test_default_ttl_applies_to_add() {
        let (mut state, clock) = test_state();
        state.default_ttl = Some(Duration::from_millis(50));
        add_handler(State(state.clone()), Json(add_request("k", "v")))
            .await
            .unwrap();

        clock.advance(Duration::from_millis(50));
        let result = get_handler(State(state), Path("k".to_string())).await;
        assert!(matches!(result, Err(CacheError::KeyNotFound(_))));
    }

    #[tokio::test]
    async fn test_set_handler_upserts() {
        let (state, _) = test_state();
        let req = SetRequest {
            key: "k".to_string(),
            value: "a".to_string(),
        };
        let first = set_handler(State(state.clone()), Json(req.clone())).await.unwrap();
        let second = set_handler(State(state), Json(req)).await.unwrap();

        assert_eq!(first.change_type, ChangeType::Added);
        assert_eq!(second.change_type, ChangeType::ValueReplaced);
    }

    #[tokio::test]
    async fn test_get_nonexistent_key() {
        let (state, _) = test_state();

        let result = get_handler(State(state), Path("nonexistent".to_string())).await;
        assert!(matches!(result, Err(CacheError::KeyNotFound(_))));
    }

    #[tokio::test]
    async fn test_delete_handler() {
        let (state, _) = test_state();
        add_handler(State(state.clone()), Json(add_request("gone", "v")))
            .await
            .unwrap();

        let result = delete_handler(State(state.clone()), Path("gone".to_string())).await;
        assert_eq!(result.unwrap().change_type, ChangeType::Removed);

        let result = delete_handler(State(state), Path("gone".to_string())).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_expire_handler_on_missing_key() {
        let (state, _) = test_state();
        let req = ExpireRequest {
            ttl_ms: 10,
            sliding: false,
            replace_with: None,
        };

        let result = expire_handler(State(state), Path("nope".to_string()), Json(req)).await;
        assert!(matches!(result, Err(CacheError::KeyNotFound(_))));
    }

    #[tokio::test]
    async fn test_changes_and_clear() {
        let (state, _) = test_state();
        add_handler(State(state.clone()), Json(add_request("a", "1")))
            .await
            .unwrap();
        add_handler(State(state.clone()), Json(add_request("b", "2")))
            .await
            .unwrap();
        let reset = clear_handler(State(state.clone())).await;
        assert_eq!(reset.change_type, ChangeType::Reset);

        let all = changes_handler(State(state.clone()), Query(ChangesQuery::default())).await;
        let kinds: Vec<ChangeType> = all.changes.iter().map(|r| r.change_type).collect();
        assert_eq!(kinds, vec![ChangeType::Added, ChangeType::Added, ChangeType::Reset]);
        assert_eq!(all.latest_sequence, Some(reset.sequence));

        let tail = changes_handler(State(state), Query(ChangesQuery { after: 2 })).await;
        assert_eq!(tail.changes.len(), 1);
    }

    #[tokio::test]
    async fn test_stats_handler() {
        let (state, _) = test_state();
        let _ = get_handler(State(state.clone()), Path("miss".to_string())).await;

        let response = stats_handler(State(state)).await;
        assert_eq!(response.stats.hits, 0);
        assert_eq!(response.stats.misses, 1);
        assert_eq!(response.subscribers, 1);
    }

    #[tokio::test]
    async fn test_health_handler() {
        let response = health_handler().await;
        assert_eq!(response.status, "healthy");
    }

    #[tokio::test]
    async fn test_add_invalid_request() {
        let (state, _) = test_state();

        let result = add_handler(State(state), Json(add_request("", "value"))).await;
        assert!(matches!(result, Err(CacheError::InvalidRequest(_))));
    }
}
