//! Cover Image Cache.
//!
//! Cache-aside over `post_cover_images`: a stored title is answered from the
//! database, a miss goes to the external book catalog and the first
//! candidate's thumbnail is written back. Lookup failures of any kind resolve
//! to "no cover" and are only logged.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    Json,
    extract::{Path, State},
    response::IntoResponse,
};
use serde::Deserialize;
use tracing::{debug, error, warn};

use shelf_db::Database;
use shelf_types::api::{BookGalleryResponse, CoverResponse};

use crate::AppState;
use crate::error::ApiError;

pub const GOOGLE_BOOKS_URL: &str = "https://www.googleapis.com/books/v1/volumes";

/// Query behind the `/books` gallery.
pub const GALLERY_QUERY: &str = "Harry Potter";

/// One search hit from the catalog.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BookCandidate {
    pub thumbnail: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum LookupError {
    #[error("lookup timed out after {0:?}")]
    Timeout(Duration),

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("unexpected status: {0}")]
    Status(reqwest::StatusCode),

    #[error("malformed response: {0}")]
    Malformed(String),
}

#[async_trait]
pub trait BookLookup: Send + Sync {
    /// Candidates for `title`, best match first.
    async fn search_by_title(&self, title: &str) -> Result<Vec<BookCandidate>, LookupError>;
}

/// Google Books `volumes` search (`q=intitle:<title>`).
pub struct GoogleBooksLookup {
    client: reqwest::Client,
    endpoint: String,
}

impl GoogleBooksLookup {
    pub fn new(client: reqwest::Client, endpoint: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct VolumesResponse {
    #[serde(default)]
    items: Vec<Volume>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Volume {
    #[serde(default)]
    volume_info: VolumeInfo,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VolumeInfo {
    image_links: Option<ImageLinks>,
}

#[derive(Debug, Deserialize)]
struct ImageLinks {
    thumbnail: Option<String>,
}

impl From<VolumesResponse> for Vec<BookCandidate> {
    fn from(resp: VolumesResponse) -> Self {
        resp.items
            .into_iter()
            .map(|volume| BookCandidate {
                thumbnail: volume.volume_info.image_links.and_then(|links| links.thumbnail),
            })
            .collect()
    }
}

#[async_trait]
impl BookLookup for GoogleBooksLookup {
    async fn search_by_title(&self, title: &str) -> Result<Vec<BookCandidate>, LookupError> {
        let query = format!("intitle:{}", title);
        let resp = self
            .client
            .get(&self.endpoint)
            .query(&[("q", query.as_str())])
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(LookupError::Status(resp.status()));
        }

        let body: VolumesResponse = resp
            .json()
            .await
            .map_err(|e| LookupError::Malformed(e.to_string()))?;

        Ok(body.into())
    }
}

/// Per-title cover cache. Concurrent misses for the same title wait on one
/// another so the catalog is asked once; the store lock is never held across
/// the external call.
pub struct CoverCache {
    db: Arc<Database>,
    lookup: Arc<dyn BookLookup>,
    timeout: Duration,
    in_flight: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl CoverCache {
    pub fn new(db: Arc<Database>, lookup: Arc<dyn BookLookup>, timeout: Duration) -> Self {
        Self {
            db,
            lookup,
            timeout,
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    /// Cover URL for `title`, or `None` when the catalog has nothing or
    /// could not be reached. Titles are matched exactly.
    pub async fn get_cover_image(&self, title: &str) -> Option<String> {
        if let Some(url) = self.cached(title).await {
            debug!(title, "cover cache hit");
            return Some(url);
        }

        let flight = self.flight(title);
        let _guard = flight.lock.lock().await;
        // Filled by another request while we waited.
        match self.cached(title).await {
            Some(url) => Some(url),
            None => self.fetch_and_store(title).await,
        }
    }

    async fn cached(&self, title: &str) -> Option<String> {
        let db = self.db.clone();
        let key = title.to_string();
        match tokio::task::spawn_blocking(move || db.get_cached_cover(&key)).await {
            Ok(Ok(url)) => url,
            Ok(Err(e)) => {
                warn!(title, "cover cache read failed: {}", e);
                None
            }
            Err(e) => {
                error!("spawn_blocking join error: {}", e);
                None
            }
        }
    }

    /// Every thumbnail the catalog returns for `query`, in catalog order.
    /// Bypasses the cache; a failed lookup is an empty gallery.
    pub async fn gallery(&self, query: &str) -> Vec<String> {
        match self.search(query).await {
            Ok(candidates) => candidates.into_iter().filter_map(|c| c.thumbnail).collect(),
            Err(e) => {
                warn!(query, "gallery lookup failed: {}", e);
                Vec::new()
            }
        }
    }

    async fn search(&self, title: &str) -> Result<Vec<BookCandidate>, LookupError> {
        match tokio::time::timeout(self.timeout, self.lookup.search_by_title(title)).await {
            Ok(result) => result,
            Err(_) => Err(LookupError::Timeout(self.timeout)),
        }
    }

    async fn fetch_and_store(&self, title: &str) -> Option<String> {
        debug!(title, "cover cache miss, querying catalog");

        let candidates = match self.search(title).await {
            Ok(candidates) => candidates,
            Err(e) => {
                warn!(title, "cover lookup failed: {}", e);
                return None;
            }
        };

        let Some(url) = candidates.into_iter().next().and_then(|c| c.thumbnail) else {
            debug!(title, "no cover found");
            return None;
        };

        let db = self.db.clone();
        let (key, value) = (title.to_string(), url.clone());
        match tokio::task::spawn_blocking(move || db.upsert_cover(&key, &value)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(title, "cover cache write failed: {}", e),
            Err(e) => error!("spawn_blocking join error: {}", e),
        }

        Some(url)
    }

    fn flight<'a>(&'a self, title: &'a str) -> Flight<'a> {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        let lock = in_flight.entry(title.to_string()).or_default().clone();
        Flight {
            cache: self,
            title,
            lock,
        }
    }
}

/// A request's claim on a title's single-flight entry. Dropping it, whether
/// the request finished or was cancelled mid-lookup, removes the entry once
/// nobody else holds it.
struct Flight<'a> {
    cache: &'a CoverCache,
    title: &'a str,
    lock: Arc<tokio::sync::Mutex<()>>,
}

impl Drop for Flight<'_> {
    fn drop(&mut self) {
        let mut in_flight = self
            .cache
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        // Map entry plus ours: nobody else is waiting on this title.
        let ours = in_flight
            .get(self.title)
            .is_some_and(|entry| Arc::ptr_eq(entry, &self.lock));
        if ours && Arc::strong_count(&self.lock) == 2 {
            in_flight.remove(self.title);
        }
    }
}

/// GET /posts/books/{title} — cover URL for a single title.
pub async fn cover_for_title(
    State(state): State<AppState>,
    Path(title): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let cover_image_url = state
        .covers
        .get_cover_image(&title)
        .await
        .ok_or_else(|| ApiError::NotFound(format!("no cover for {}", title)))?;

    Ok(Json(CoverResponse {
        title,
        cover_image_url,
    }))
}

/// GET /books — cover gallery for [`GALLERY_QUERY`]; 404 when the catalog
/// returns nothing usable.
pub async fn book_gallery(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let cover_images = state.covers.gallery(GALLERY_QUERY).await;
    if cover_images.is_empty() {
        return Err(ApiError::NotFound("no cover images found".into()));
    }

    Ok(Json(BookGalleryResponse {
        query: GALLERY_QUERY.to_string(),
        cover_images,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    enum Behavior {
        Found(&'static str),
        NoThumbnail,
        Empty,
        Fail,
        Hang,
    }

    struct StubLookup {
        calls: AtomicUsize,
        behavior: Behavior,
        delay: Duration,
    }

    impl StubLookup {
        fn new(behavior: Behavior) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                behavior,
                delay: Duration::ZERO,
            })
        }

        fn slow(behavior: Behavior, delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                behavior,
                delay,
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl BookLookup for StubLookup {
        async fn search_by_title(&self, _title: &str) -> Result<Vec<BookCandidate>, LookupError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            match self.behavior {
                Behavior::Found(url) => Ok(vec![
                    BookCandidate {
                        thumbnail: Some(url.to_string()),
                    },
                    BookCandidate {
                        thumbnail: Some("http://covers/second.jpg".to_string()),
                    },
                ]),
                Behavior::NoThumbnail => Ok(vec![BookCandidate { thumbnail: None }]),
                Behavior::Empty => Ok(vec![]),
                Behavior::Fail => Err(LookupError::Malformed("not json".into())),
                Behavior::Hang => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Ok(vec![])
                }
            }
        }
    }

    fn new_cache(lookup: Arc<StubLookup>) -> (Arc<Database>, CoverCache) {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let cache = CoverCache::new(db.clone(), lookup, Duration::from_millis(200));
        (db, cache)
    }

    #[tokio::test]
    async fn miss_then_hit() {
        let lookup = StubLookup::new(Behavior::Found("http://covers/dune.jpg"));
        let (db, cache) = new_cache(lookup.clone());

        assert_eq!(cache.get_cover_image("Dune").await.as_deref(), Some("http://covers/dune.jpg"));
        assert_eq!(lookup.calls(), 1);
        assert_eq!(db.get_cached_cover("Dune").unwrap().as_deref(), Some("http://covers/dune.jpg"));

        assert_eq!(cache.get_cover_image("Dune").await.as_deref(), Some("http://covers/dune.jpg"));
        assert_eq!(lookup.calls(), 1);
    }

    #[tokio::test]
    async fn titles_are_case_sensitive() {
        let lookup = StubLookup::new(Behavior::Found("http://covers/dune.jpg"));
        let (_db, cache) = new_cache(lookup.clone());

        cache.get_cover_image("Dune").await;
        cache.get_cover_image("dune").await;
        assert_eq!(lookup.calls(), 2);
    }

    #[tokio::test]
    async fn timeout_is_absent_and_not_cached() {
        let lookup = StubLookup::new(Behavior::Hang);
        let (db, cache) = new_cache(lookup.clone());

        assert_eq!(cache.get_cover_image("Dune").await, None);
        assert!(db.get_cached_cover("Dune").unwrap().is_none());
    }

    #[tokio::test]
    async fn failure_is_absent_and_retried_later() {
        let lookup = StubLookup::new(Behavior::Fail);
        let (db, cache) = new_cache(lookup.clone());

        assert_eq!(cache.get_cover_image("Dune").await, None);
        assert_eq!(cache.get_cover_image("Dune").await, None);
        assert_eq!(lookup.calls(), 2);
        assert!(db.get_cached_cover("Dune").unwrap().is_none());
    }

    #[tokio::test]
    async fn no_candidates_or_thumbnail_is_absent() {
        let (db, cache) = new_cache(StubLookup::new(Behavior::Empty));
        assert_eq!(cache.get_cover_image("Obscure").await, None);
        assert!(db.get_cached_cover("Obscure").unwrap().is_none());

        let (db, cache) = new_cache(StubLookup::new(Behavior::NoThumbnail));
        assert_eq!(cache.get_cover_image("Obscure").await, None);
        assert!(db.get_cached_cover("Obscure").unwrap().is_none());
    }

    #[tokio::test]
    async fn concurrent_misses_share_one_lookup() {
        let lookup = StubLookup::slow(Behavior::Found("http://covers/emma.jpg"), Duration::from_millis(50));
        let (_db, cache) = new_cache(lookup.clone());

        let (a, b) = tokio::join!(cache.get_cover_image("Emma"), cache.get_cover_image("Emma"));
        assert_eq!(a.as_deref(), Some("http://covers/emma.jpg"));
        assert_eq!(b.as_deref(), Some("http://covers/emma.jpg"));
        assert_eq!(lookup.calls(), 1);
        assert!(cache.in_flight.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn cancelled_lookups_release_their_flight() {
        let lookup = StubLookup::new(Behavior::Hang);
        let db = Arc::new(Database::open_in_memory().unwrap());
        let cache = Arc::new(CoverCache::new(db, lookup.clone(), Duration::from_secs(60)));

        let tasks: Vec<_> = (0..20)
            .map(|i| {
                let cache = cache.clone();
                tokio::spawn(async move { cache.get_cover_image(&format!("title-{}", i)).await })
            })
            .collect();

        // Every task is parked inside the catalog call.
        while lookup.calls() < 20 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(cache.in_flight.lock().unwrap().len(), 20);

        for task in tasks {
            task.abort();
            assert!(task.await.unwrap_err().is_cancelled());
        }
        assert!(cache.in_flight.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn cancelled_leader_leaves_entry_for_waiter() {
        let lookup = StubLookup::slow(Behavior::Found("http://covers/emma.jpg"), Duration::from_millis(100));
        let db = Arc::new(Database::open_in_memory().unwrap());
        let cache = Arc::new(CoverCache::new(db, lookup.clone(), Duration::from_secs(5)));

        let leader = {
            let cache = cache.clone();
            tokio::spawn(async move { cache.get_cover_image("Emma").await })
        };
        while lookup.calls() < 1 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        let follower = {
            let cache = cache.clone();
            tokio::spawn(async move { cache.get_cover_image("Emma").await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        leader.abort();
        let _ = leader.await;
        assert_eq!(follower.await.unwrap().as_deref(), Some("http://covers/emma.jpg"));
        assert_eq!(lookup.calls(), 2);
        assert!(cache.in_flight.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn gallery_lists_every_thumbnail() {
        let (db, cache) = new_cache(StubLookup::new(Behavior::Found("http://covers/hp1.jpg")));
        assert_eq!(
            cache.gallery(GALLERY_QUERY).await,
            vec!["http://covers/hp1.jpg".to_string(), "http://covers/second.jpg".to_string()]
        );
        assert!(db.get_cached_cover(GALLERY_QUERY).unwrap().is_none());

        let (_db, cache) = new_cache(StubLookup::new(Behavior::NoThumbnail));
        assert!(cache.gallery(GALLERY_QUERY).await.is_empty());

        let (_db, cache) = new_cache(StubLookup::new(Behavior::Hang));
        assert!(cache.gallery(GALLERY_QUERY).await.is_empty());
    }

    #[test]
    fn parses_catalog_response() {
        let body = r#"{
            "kind": "books#volumes",
            "totalItems": 2,
            "items": [
                {"volumeInfo": {"title": "Dune", "imageLinks": {"smallThumbnail": "http://s", "thumbnail": "http://t"}}},
                {"volumeInfo": {"title": "Dune Messiah"}}
            ]
        }"#;
        let resp: VolumesResponse = serde_json::from_str(body).unwrap();
        let candidates: Vec<BookCandidate> = resp.into();
        assert_eq!(
            candidates,
            vec![
                BookCandidate {
                    thumbnail: Some("http://t".into())
                },
                BookCandidate { thumbnail: None },
            ]
        );

        let empty: VolumesResponse = serde_json::from_str(r#"{"kind": "books#volumes", "totalItems": 0}"#).unwrap();
        assert!(Vec::<BookCandidate>::from(empty).is_empty());
    }
}
