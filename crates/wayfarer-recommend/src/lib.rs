//! Recommendation flow: configuration, the image and weather resolvers with their
//! caches, the mood orchestrator, weather hydration and the dashboard store.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use futures::future::{join_all, BoxFuture, FutureExt, Shared};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;
use wayfarer_core::{
    cache_key, fallback_destinations, Destination, DestinationSuggestion, WeatherSnapshot,
    DEFAULT_IMAGE_URL, DESTINATIONS_PER_MOOD,
};
use wayfarer_providers::{
    build_prompt, parse_suggestions, GeminiClient, ImageSource, OpenWeatherClient,
    SuggestionSource, UnsplashClient, WeatherSource, GEMINI_DEFAULT_MODEL,
};
use wayfarer_storage::{FetchError, HttpClientConfig, HttpFetcher, LocalStorage, RetryPolicy};

pub const CRATE_NAME: &str = "wayfarer-recommend";

pub const STORAGE_KEY: &str = "travel-dashboard-storage";
pub const GENERIC_FETCH_ERROR: &str = "Unable to fetch destinations. Please try again.";
pub const SAVE_FAVORITES_ERROR: &str = "Unable to save favorites.";

pub const DEFAULT_SETTINGS_PATH: &str = "wayfarer.yaml";
pub const DEFAULT_FAVORITES_PATH: &str = "./wayfarer-storage.json";
pub const DEFAULT_WEB_PORT: u16 = 8000;

// ── Configuration ─────────────────────────────────────────────────────

/// Tunables read from the optional YAML settings file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub destinations_per_mood: usize,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub http_timeout_secs: u64,
    pub weather_ttl_secs: u64,
    pub image_failure_ttl_secs: u64,
    pub default_image_url: String,
    pub user_agent: String,
    pub gemini_model: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            destinations_per_mood: DESTINATIONS_PER_MOOD,
            max_retries: 1,
            retry_delay_ms: 1000,
            http_timeout_secs: 10,
            weather_ttl_secs: 600,
            image_failure_ttl_secs: 600,
            default_image_url: DEFAULT_IMAGE_URL.to_string(),
            user_agent: format!("wayfarer/{}", env!("CARGO_PKG_VERSION")),
            gemini_model: GEMINI_DEFAULT_MODEL.to_string(),
        }
    }
}

impl Settings {
    /// A missing or empty file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        let mut settings: Settings = serde_yaml::from_str(&raw)
            .with_context(|| format!("parsing {}", path.display()))?;
        settings.destinations_per_mood = settings.destinations_per_mood.max(1);
        Ok(settings)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_retries, Duration::from_millis(self.retry_delay_ms))
    }

    pub fn weather_ttl(&self) -> Duration {
        Duration::from_secs(self.weather_ttl_secs)
    }

    pub fn image_failure_ttl(&self) -> Duration {
        Duration::from_secs(self.image_failure_ttl_secs)
    }

    pub fn http_client_config(&self) -> HttpClientConfig {
        HttpClientConfig {
            timeout: Duration::from_secs(self.http_timeout_secs),
            user_agent: Some(self.user_agent.clone()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnvKey {
    pub name: &'static str,
    pub legacy_name: &'static str,
    pub description: &'static str,
}

pub const GEMINI_KEY: EnvKey = EnvKey {
    name: "WAYFARER_GEMINI_API_KEY",
    legacy_name: "NEXT_PUBLIC_GEMINI_API_KEY",
    description: "Google Gemini API key for AI-powered destination suggestions",
};

pub const UNSPLASH_KEY: EnvKey = EnvKey {
    name: "WAYFARER_UNSPLASH_ACCESS_KEY",
    legacy_name: "NEXT_PUBLIC_UNSPLASH_ACCESS_KEY",
    description: "Unsplash API key for destination images",
};

pub const OPENWEATHER_KEY: EnvKey = EnvKey {
    name: "WAYFARER_OPENWEATHER_API_KEY",
    legacy_name: "NEXT_PUBLIC_OPENWEATHER_API_KEY",
    description: "OpenWeatherMap API key for weather data",
};

pub const ENV_KEYS: [EnvKey; 3] = [GEMINI_KEY, UNSPLASH_KEY, OPENWEATHER_KEY];

impl EnvKey {
    /// Primary name first, then the legacy one. Blank values count as unset.
    pub fn read<F>(&self, lookup: &F) -> Option<String>
    where
        F: Fn(&str) -> Option<String>,
    {
        [self.name, self.legacy_name].into_iter().find_map(|name| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        })
    }

    pub fn missing_message(&self) -> String {
        format!(
            "{} is not configured. Please add {} to your environment or .env file.",
            self.description, self.name
        )
    }
}

fn env_lookup(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub gemini_api_key: Option<String>,
    pub unsplash_access_key: Option<String>,
    pub openweather_api_key: Option<String>,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("gemini", &self.gemini_api_key.is_some())
            .field("unsplash", &self.unsplash_access_key.is_some())
            .field("openweather", &self.openweather_api_key.is_some())
            .finish()
    }
}

impl Credentials {
    pub fn from_env() -> Self {
        Self::from_lookup(env_lookup)
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        Self {
            gemini_api_key: GEMINI_KEY.read(&lookup),
            unsplash_access_key: UNSPLASH_KEY.read(&lookup),
            openweather_api_key: OPENWEATHER_KEY.read(&lookup),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub credentials: Credentials,
    pub settings: Settings,
    pub settings_path: PathBuf,
    pub favorites_path: PathBuf,
    pub web_port: u16,
    /// Key report taken from the same lookup as `credentials`.
    pub env_status: EnvValidation,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(env_lookup)
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let settings_path = lookup("WAYFARER_SETTINGS")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_SETTINGS_PATH));
        let settings = Settings::load(&settings_path)?;
        Ok(Self {
            credentials: Credentials::from_lookup(&lookup),
            env_status: validate_with(&lookup),
            settings,
            settings_path,
            favorites_path: lookup("WAYFARER_FAVORITES_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_FAVORITES_PATH)),
            web_port: lookup("WAYFARER_WEB_PORT")
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_WEB_PORT),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvKeyStatus {
    pub name: String,
    pub description: String,
    pub configured: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvValidation {
    pub is_valid: bool,
    pub missing_keys: Vec<String>,
    pub warnings: Vec<String>,
    pub keys: Vec<EnvKeyStatus>,
}

pub fn validate_environment() -> EnvValidation {
    validate_with(env_lookup)
}

pub fn validate_with<F>(lookup: F) -> EnvValidation
where
    F: Fn(&str) -> Option<String>,
{
    let mut missing_keys = Vec::new();
    let mut warnings = Vec::new();
    let mut keys = Vec::new();

    for key in ENV_KEYS {
        let value = key.read(&lookup);
        match &value {
            None => {
                warn!(key = key.name, description = key.description, "missing environment variable");
                missing_keys.push(key.name.to_string());
            }
            Some(v) if looks_like_placeholder(v) => {
                warn!(key = key.name, "environment variable looks like a placeholder");
                warnings.push(format!(
                    "{} appears to be a placeholder value. Please update with a real API key.",
                    key.name
                ));
            }
            Some(_) => debug!(key = key.name, "environment variable configured"),
        }
        keys.push(EnvKeyStatus {
            name: key.name.to_string(),
            description: key.description.to_string(),
            configured: value.is_some(),
        });
    }

    EnvValidation {
        is_valid: missing_keys.is_empty(),
        missing_keys,
        warnings,
        keys,
    }
}

fn looks_like_placeholder(value: &str) -> bool {
    value.contains("your_") || value.contains("YOUR_") || value == "placeholder"
}

// ── Image resolver ────────────────────────────────────────────────────

#[derive(Debug, Clone)]
enum CachedImage {
    Found(String),
    Placeholder { cached_at: Instant },
}

struct ImageInner {
    source: Option<Arc<dyn ImageSource>>,
    retry: RetryPolicy,
    default_url: String,
    failure_ttl: Duration,
    cache: Mutex<HashMap<String, CachedImage>>,
}

/// Resolves a destination name to an image URL. Never fails: a miss yields the
/// default image. Found URLs are kept for the process lifetime, misses only for
/// the failure TTL.
#[derive(Clone)]
pub struct ImageResolver {
    inner: Arc<ImageInner>,
}

impl ImageResolver {
    pub fn new(source: Option<Arc<dyn ImageSource>>, retry: RetryPolicy) -> Self {
        Self {
            inner: Arc::new(ImageInner {
                source,
                retry,
                default_url: DEFAULT_IMAGE_URL.to_string(),
                failure_ttl: Duration::from_secs(600),
                cache: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn from_settings(source: Option<Arc<dyn ImageSource>>, settings: &Settings) -> Self {
        Self {
            inner: Arc::new(ImageInner {
                source,
                retry: settings.retry_policy(),
                default_url: settings.default_image_url.clone(),
                failure_ttl: settings.image_failure_ttl(),
                cache: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn default_url(&self) -> &str {
        &self.inner.default_url
    }

    pub async fn resolve(&self, name: &str) -> String {
        let key = cache_key(name);
        if let Some(url) = self.cached(&key).await {
            debug!(%key, "image cache hit");
            return url;
        }

        let found = match &self.inner.source {
            None => {
                debug!(%key, "no image credential configured");
                None
            }
            Some(source) => self.search(source.as_ref(), name.trim(), &key).await,
        };

        let mut cache = self.inner.cache.lock().await;
        match found {
            Some(url) => {
                cache.insert(key, CachedImage::Found(url.clone()));
                url
            }
            None => {
                cache.insert(
                    key,
                    CachedImage::Placeholder {
                        cached_at: Instant::now(),
                    },
                );
                self.inner.default_url.clone()
            }
        }
    }

    /// Resolves every name concurrently and returns once all have settled.
    pub async fn resolve_many(&self, names: &[String]) -> HashMap<String, String> {
        let lookups = names.iter().map(|name| async move {
            let url = self.resolve(name).await;
            (name.clone(), url)
        });
        join_all(lookups).await.into_iter().collect()
    }

    pub async fn clear(&self) {
        self.inner.cache.lock().await.clear();
    }

    async fn cached(&self, key: &str) -> Option<String> {
        let mut cache = self.inner.cache.lock().await;
        let expired = match cache.get(key)? {
            CachedImage::Found(url) => return Some(url.clone()),
            CachedImage::Placeholder { cached_at } => cached_at.elapsed() >= self.inner.failure_ttl,
        };
        if expired {
            cache.remove(key);
            None
        } else {
            Some(self.inner.default_url.clone())
        }
    }

    async fn search(&self, source: &dyn ImageSource, name: &str, key: &str) -> Option<String> {
        let span = info_span!("image_lookup", service = source.service_name(), key = %key);
        let outcome = self
            .inner
            .retry
            .with_retry(move || source.search_image(name))
            .instrument(span)
            .await;
        match outcome {
            Ok(Some(url)) => Some(url),
            Ok(None) => {
                warn!(%key, "no image found");
                None
            }
            Err(err) => {
                warn!(%key, kind = ?err.kind(), error = %err, "image lookup failed");
                None
            }
        }
    }
}

// ── Weather resolver ──────────────────────────────────────────────────

type PendingWeather = Shared<BoxFuture<'static, Option<WeatherSnapshot>>>;

#[derive(Debug, Clone)]
struct CachedWeather {
    snapshot: Option<WeatherSnapshot>,
    fetched_at: Instant,
}

#[derive(Default)]
struct WeatherState {
    cache: HashMap<String, CachedWeather>,
    in_flight: HashMap<String, PendingWeather>,
}

struct WeatherInner {
    source: Option<Arc<dyn WeatherSource>>,
    retry: RetryPolicy,
    ttl: Duration,
    state: Mutex<WeatherState>,
}

/// Resolves a city to its current weather. Results, including failures, are
/// cached for the TTL and concurrent lookups for one city share a single request.
#[derive(Clone)]
pub struct WeatherResolver {
    inner: Arc<WeatherInner>,
}

impl WeatherResolver {
    pub fn new(source: Option<Arc<dyn WeatherSource>>, retry: RetryPolicy, ttl: Duration) -> Self {
        Self {
            inner: Arc::new(WeatherInner {
                source,
                retry,
                ttl,
                state: Mutex::new(WeatherState::default()),
            }),
        }
    }

    pub fn from_settings(source: Option<Arc<dyn WeatherSource>>, settings: &Settings) -> Self {
        Self::new(source, settings.retry_policy(), settings.weather_ttl())
    }

    pub async fn resolve(&self, city_name: &str) -> Option<WeatherSnapshot> {
        let key = cache_key(city_name);

        // Check and insert happen under one lock acquisition.
        let pending = {
            let mut state = self.inner.state.lock().await;
            if let Some(entry) = state.cache.get(&key) {
                if entry.fetched_at.elapsed() < self.inner.ttl {
                    debug!(%key, "weather cache hit");
                    return entry.snapshot.clone();
                }
            }

            if let Some(pending) = state.in_flight.get(&key) {
                debug!(%key, "joining in-flight weather request");
                pending.clone()
            } else {
                let Some(source) = self.inner.source.clone() else {
                    debug!(%key, "no weather credential configured");
                    return None;
                };
                // Spawned so the request settles even if every waiter goes away.
                let task = tokio::spawn(fetch_weather(
                    Arc::clone(&self.inner),
                    source,
                    key.clone(),
                    city_name.trim().to_string(),
                ));
                let inner = Arc::clone(&self.inner);
                let task_key = key.clone();
                let pending = async move {
                    match task.await {
                        Ok(snapshot) => snapshot,
                        Err(err) => {
                            warn!(key = %task_key, error = %err, "weather task failed");
                            inner.state.lock().await.in_flight.remove(&task_key);
                            None
                        }
                    }
                }
                .boxed()
                .shared();
                state.in_flight.insert(key, pending.clone());
                pending
            }
        };

        pending.await
    }

    /// Resolves every city concurrently and returns once all have settled.
    pub async fn resolve_many(&self, city_names: &[String]) -> HashMap<String, Option<WeatherSnapshot>> {
        let lookups = city_names.iter().map(|city| async move {
            let weather = self.resolve(city).await;
            (city.clone(), weather)
        });
        join_all(lookups).await.into_iter().collect()
    }

    pub async fn clear(&self) {
        let mut state = self.inner.state.lock().await;
        state.cache.clear();
        state.in_flight.clear();
    }
}

async fn fetch_weather(
    inner: Arc<WeatherInner>,
    source: Arc<dyn WeatherSource>,
    key: String,
    city_name: String,
) -> Option<WeatherSnapshot> {
    let span = info_span!("weather_lookup", service = source.service_name(), key = %key);
    let client = source.as_ref();
    let city = city_name.as_str();
    let outcome = inner
        .retry
        .with_retry(move || client.current_weather(city))
        .instrument(span)
        .await;

    let snapshot = match outcome {
        Ok(snapshot) => Some(snapshot),
        Err(err) => {
            warn!(%key, kind = ?err.kind(), error = %err, "weather lookup failed");
            None
        }
    };

    let mut state = inner.state.lock().await;
    state.in_flight.remove(&key);
    state.cache.insert(
        key,
        CachedWeather {
            snapshot: snapshot.clone(),
            fetched_at: Instant::now(),
        },
    );
    snapshot
}

/// Attaches current weather to every destination concurrently. Destinations whose
/// lookup yields nothing keep `weather: None`.
pub async fn hydrate_weather(
    weather: &WeatherResolver,
    destinations: Vec<Destination>,
) -> Vec<Destination> {
    let lookups = destinations.into_iter().map(|destination| async move {
        let snapshot = weather.resolve(&destination.name).await;
        destination.with_weather(snapshot)
    });
    join_all(lookups).await
}

// ── Orchestrator ──────────────────────────────────────────────────────

#[derive(Clone)]
pub struct Recommender {
    suggestions: Option<Arc<dyn SuggestionSource>>,
    images: ImageResolver,
    retry: RetryPolicy,
    destinations_per_mood: usize,
}

impl Recommender {
    pub fn new(
        suggestions: Option<Arc<dyn SuggestionSource>>,
        images: ImageResolver,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            suggestions,
            images,
            retry,
            destinations_per_mood: DESTINATIONS_PER_MOOD,
        }
    }

    pub fn with_destinations_per_mood(mut self, count: usize) -> Self {
        self.destinations_per_mood = count.max(1);
        self
    }

    pub fn images(&self) -> &ImageResolver {
        &self.images
    }

    /// Always resolves. Without a generative credential, or on any failure of the
    /// generative call, returns the fallback catalog with empty image URLs.
    pub async fn destinations_by_mood(&self, mood: &str) -> Vec<Destination> {
        let Some(source) = &self.suggestions else {
            debug!(mood, "no generative credential configured, using fallback catalog");
            return fallback_destinations(mood);
        };

        let suggestions = match self.fetch_suggestions(source.as_ref(), mood).await {
            Ok(suggestions) => suggestions,
            Err(err) => {
                warn!(mood, kind = ?err.kind(), error = %err, "suggestion request failed, using fallback catalog");
                return fallback_destinations(mood);
            }
        };

        let names = suggestions
            .iter()
            .map(|s| s.name.clone())
            .collect::<Vec<_>>();
        let images = self.images.resolve_many(&names).await;

        info!(mood, count = suggestions.len(), "generated destinations");
        suggestions
            .into_iter()
            .map(|suggestion| {
                let image_url = images
                    .get(&suggestion.name)
                    .cloned()
                    .unwrap_or_else(|| self.images.default_url().to_string());
                Destination::from_suggestion(suggestion, image_url)
            })
            .collect()
    }

    async fn fetch_suggestions(
        &self,
        source: &dyn SuggestionSource,
        mood: &str,
    ) -> Result<Vec<DestinationSuggestion>, FetchError> {
        let prompt = build_prompt(mood, self.destinations_per_mood);
        let prompt = prompt.as_str();
        let span = info_span!("suggestions", service = source.service_name(), mood);
        let response = self
            .retry
            .with_retry(move || source.generate(prompt))
            .instrument(span)
            .await?;
        Ok(parse_suggestions(&response, self.destinations_per_mood)?)
    }
}

/// Resolvers and orchestrator wired from configuration. The orchestrator and the
/// per-card image lookups share one image cache.
#[derive(Clone)]
pub struct Services {
    pub recommender: Recommender,
    pub images: ImageResolver,
    pub weather: WeatherResolver,
}

impl Services {
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let settings = &config.settings;
        let http = HttpFetcher::new(&settings.http_client_config())
            .context("building http client")?;
        let credentials = &config.credentials;

        let suggestions = credentials.gemini_api_key.as_ref().map(|key| {
            Arc::new(GeminiClient::new(http.clone(), key.clone()).with_model(&settings.gemini_model))
                as Arc<dyn SuggestionSource>
        });
        let image_source = credentials.unsplash_access_key.as_ref().map(|key| {
            Arc::new(UnsplashClient::new(http.clone(), key.clone())) as Arc<dyn ImageSource>
        });
        let weather_source = credentials.openweather_api_key.as_ref().map(|key| {
            Arc::new(OpenWeatherClient::new(http.clone(), key.clone())) as Arc<dyn WeatherSource>
        });

        info!(
            generative = suggestions.is_some(),
            images = image_source.is_some(),
            weather = weather_source.is_some(),
            "services configured"
        );

        Ok(Self::new(suggestions, image_source, weather_source, settings))
    }

    pub fn new(
        suggestions: Option<Arc<dyn SuggestionSource>>,
        image_source: Option<Arc<dyn ImageSource>>,
        weather_source: Option<Arc<dyn WeatherSource>>,
        settings: &Settings,
    ) -> Self {
        let images = ImageResolver::from_settings(image_source, settings);
        let weather = WeatherResolver::from_settings(weather_source, settings);
        let recommender = Recommender::new(suggestions, images.clone(), settings.retry_policy())
            .with_destinations_per_mood(settings.destinations_per_mood);
        Self {
            recommender,
            images,
            weather,
        }
    }

    pub async fn recommend(&self, mood: &str, with_weather: bool) -> Vec<Destination> {
        let destinations = self.recommender.destinations_by_mood(mood).await;
        if with_weather {
            hydrate_weather(&self.weather, destinations).await
        } else {
            destinations
        }
    }
}

// ── Dashboard store ───────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorType {
    Gemini,
    Unsplash,
    Weather,
    Network,
    Storage,
    Generic,
}

impl ErrorType {
    pub fn icon(self) -> &'static str {
        match self {
            ErrorType::Gemini => "🤖",
            ErrorType::Unsplash => "🖼️",
            ErrorType::Weather => "🌤️",
            ErrorType::Network => "📡",
            ErrorType::Storage => "💾",
            ErrorType::Generic => "⚠️",
        }
    }

    pub fn title(self) -> &'static str {
        match self {
            ErrorType::Gemini => "AI Service Error",
            ErrorType::Unsplash => "Image Loading Error",
            ErrorType::Weather => "Weather Service Error",
            ErrorType::Network => "Connection Error",
            ErrorType::Storage => "Storage Error",
            ErrorType::Generic => "Error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorBanner {
    #[serde(rename = "type")]
    pub kind: ErrorType,
    pub icon: &'static str,
    pub title: &'static str,
    pub message: String,
}

impl ErrorBanner {
    pub fn new(kind: ErrorType, message: impl Into<String>) -> Self {
        Self {
            kind,
            icon: kind.icon(),
            title: kind.title(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardSnapshot {
    pub selected_mood: Option<String>,
    pub destinations: Vec<Destination>,
    pub is_loading: bool,
    pub error: Option<ErrorBanner>,
    pub favorites: Vec<Destination>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct PersistedFavorites {
    #[serde(default)]
    favorites: Vec<Destination>,
}

#[derive(Debug, Default)]
struct DashboardState {
    selected_mood: Option<String>,
    destinations: Vec<Destination>,
    is_loading: bool,
    error: Option<ErrorBanner>,
    favorites: Vec<Destination>,
}

impl DashboardState {
    fn snapshot(&self) -> DashboardSnapshot {
        DashboardSnapshot {
            selected_mood: self.selected_mood.clone(),
            destinations: self.destinations.clone(),
            is_loading: self.is_loading,
            error: self.error.clone(),
            favorites: self.favorites.clone(),
        }
    }
}

/// Session state behind the UI: the selected mood, its destinations, loading and
/// error flags, and the favorites list. Only favorites are persisted.
pub struct Dashboard {
    services: Services,
    storage: LocalStorage,
    state: Arc<RwLock<DashboardState>>,
    persist_lock: Mutex<()>,
}

impl Dashboard {
    /// Loads persisted favorites. An unreadable storage file starts the session empty.
    pub async fn load(services: Services, storage: LocalStorage) -> Self {
        let favorites = match storage.get_item::<PersistedFavorites>(STORAGE_KEY).await {
            Ok(Some(persisted)) => persisted.favorites,
            Ok(None) => Vec::new(),
            Err(err) => {
                warn!(path = %storage.path().display(), error = %err, "ignoring unreadable favorites");
                Vec::new()
            }
        };
        debug!(count = favorites.len(), "favorites loaded");

        Self {
            services,
            storage,
            state: Arc::new(RwLock::new(DashboardState {
                favorites,
                ..DashboardState::default()
            })),
            persist_lock: Mutex::new(()),
        }
    }

    pub fn services(&self) -> &Services {
        &self.services
    }

    /// Runs the flow for `mood` and stores its result. The flow and the state
    /// update run in a background task, so they complete even if the caller is
    /// dropped.
    pub async fn select_mood(&self, mood: &str) -> DashboardSnapshot {
        let mood = mood.trim().to_string();
        {
            let mut state = self.state.write().await;
            state.selected_mood = Some(mood.clone());
            state.is_loading = true;
            state.error = None;
        }

        let services = self.services.clone();
        let shared_state = Arc::clone(&self.state);
        let task = tokio::spawn(async move {
            let flow_mood = mood.clone();
            let outcome =
                tokio::spawn(async move { services.recommend(&flow_mood, true).await }).await;
            apply_flow_outcome(&shared_state, &mood, outcome).await
        });

        match task.await {
            Ok(snapshot) => snapshot,
            Err(err) => {
                error!(error = %err, "dashboard update task failed");
                self.snapshot().await
            }
        }
    }

    /// Flips membership by id and persists the list. Returns whether the
    /// destination is now a favorite. The state lock is released before the
    /// file write; `persist_lock` keeps writes in toggle order.
    pub async fn toggle_favorite(&self, destination: Destination) -> bool {
        let _persist = self.persist_lock.lock().await;
        let (now_favorite, persisted) = {
            let mut state = self.state.write().await;
            let now_favorite = match state.favorites.iter().position(|f| f.id == destination.id) {
                Some(index) => {
                    state.favorites.remove(index);
                    false
                }
                None => {
                    state.favorites.push(destination);
                    true
                }
            };
            let persisted = PersistedFavorites {
                favorites: state.favorites.clone(),
            };
            (now_favorite, persisted)
        };

        if let Err(err) = self.storage.set_item(STORAGE_KEY, &persisted).await {
            warn!(error = %err, "failed to persist favorites");
            self.state.write().await.error =
                Some(ErrorBanner::new(ErrorType::Storage, SAVE_FAVORITES_ERROR));
        }
        now_favorite
    }

    pub async fn is_favorite(&self, id: Uuid) -> bool {
        self.state.read().await.favorites.iter().any(|f| f.id == id)
    }

    pub async fn favorites(&self) -> Vec<Destination> {
        self.state.read().await.favorites.clone()
    }

    pub async fn selected_mood(&self) -> Option<String> {
        self.state.read().await.selected_mood.clone()
    }

    pub async fn clear_error(&self) {
        self.state.write().await.error = None;
    }

    pub async fn snapshot(&self) -> DashboardSnapshot {
        self.state.read().await.snapshot()
    }
}

async fn apply_flow_outcome(
    state: &RwLock<DashboardState>,
    mood: &str,
    outcome: Result<Vec<Destination>, tokio::task::JoinError>,
) -> DashboardSnapshot {
    let mut state = state.write().await;
    if state.selected_mood.as_deref() != Some(mood) {
        debug!(%mood, "discarding results for superseded mood");
        return state.snapshot();
    }
    match outcome {
        Ok(destinations) => {
            state.destinations = destinations;
        }
        Err(err) => {
            error!(%mood, error = %err, "destination flow failed");
            state.error = Some(ErrorBanner::new(ErrorType::Generic, GENERIC_FETCH_ERROR));
        }
    }
    state.is_loading = false;
    state.snapshot()
}

pub async fn dashboard_from_config(config: &AppConfig) -> Result<Dashboard> {
    let services = Services::from_config(config)?;
    let storage = LocalStorage::new(config.favorites_path.clone());
    Ok(Dashboard::load(services, storage).await)
}
