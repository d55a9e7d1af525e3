//! Outbound service contracts and their HTTP implementations: the generative
//! suggestion API, the image search API and the current-weather API.

use std::fmt;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value as JsonValue};
use thiserror::Error;
use tracing::debug;
use wayfarer_core::{DestinationSuggestion, WeatherSnapshot};
use wayfarer_storage::{FetchError, HttpFetcher};

pub const CRATE_NAME: &str = "wayfarer-providers";

pub const GEMINI_ENDPOINT: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const GEMINI_DEFAULT_MODEL: &str = "gemini-pro";
pub const UNSPLASH_ENDPOINT: &str = "https://api.unsplash.com/search/photos";
pub const OPENWEATHER_ENDPOINT: &str = "https://api.openweathermap.org/data/2.5/weather";

pub const IMAGE_ORIENTATION: &str = "landscape";
pub const WEATHER_UNITS: &str = "metric";

#[async_trait]
pub trait SuggestionSource: Send + Sync {
    fn service_name(&self) -> &'static str {
        "gemini"
    }

    async fn generate(&self, prompt: &str) -> Result<GenerateContentResponse, FetchError>;
}

#[async_trait]
pub trait ImageSource: Send + Sync {
    fn service_name(&self) -> &'static str {
        "unsplash"
    }

    /// `Ok(None)` when the search succeeded but returned no usable photo.
    async fn search_image(&self, destination_name: &str) -> Result<Option<String>, FetchError>;
}

#[async_trait]
pub trait WeatherSource: Send + Sync {
    fn service_name(&self) -> &'static str {
        "openweather"
    }

    async fn current_weather(&self, city_name: &str) -> Result<WeatherSnapshot, FetchError>;
}

// ── Generative suggestions ────────────────────────────────────────────

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GenerateContentResponse {
    #[serde(default)]
    pub candidates: Vec<Candidate>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Candidate {
    #[serde(default)]
    pub content: Option<CandidateContent>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CandidateContent {
    #[serde(default)]
    pub parts: Vec<ContentPart>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ContentPart {
    #[serde(default)]
    pub text: Option<String>,
}

impl GenerateContentResponse {
    /// Text of the first part of the first candidate.
    pub fn text(&self) -> Option<&str> {
        self.candidates
            .first()?
            .content
            .as_ref()?
            .parts
            .first()?
            .text
            .as_deref()
    }

    pub fn from_text(text: impl Into<String>) -> Self {
        Self {
            candidates: vec![Candidate {
                content: Some(CandidateContent {
                    parts: vec![ContentPart {
                        text: Some(text.into()),
                    }],
                }),
            }],
        }
    }
}

pub fn build_prompt(mood: &str, count: usize) -> String {
    let rows = (0..count)
        .map(|_| {
            r#"  {"name": "City Name", "country": "Country Name", "tagline": "Brief description (max 10 words)"}"#
        })
        .collect::<Vec<_>>()
        .join(",\n");
    format!(
        "Suggest exactly {count} travel destinations for someone seeking a {mood} experience.\n\
         Return ONLY a JSON array with this exact format, no additional text:\n[\n{rows}\n]"
    )
}

pub struct GeminiClient {
    http: HttpFetcher,
    api_key: String,
    endpoint: String,
    model: String,
}

impl fmt::Debug for GeminiClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GeminiClient")
            .field("endpoint", &self.endpoint)
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

impl GeminiClient {
    pub fn new(http: HttpFetcher, api_key: impl Into<String>) -> Self {
        Self {
            http,
            api_key: api_key.into(),
            endpoint: GEMINI_ENDPOINT.to_string(),
            model: GEMINI_DEFAULT_MODEL.to_string(),
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }
}

#[async_trait]
impl SuggestionSource for GeminiClient {
    async fn generate(&self, prompt: &str) -> Result<GenerateContentResponse, FetchError> {
        let url = format!("{}/models/{}:generateContent", self.endpoint, self.model);
        debug!(model = %self.model, "requesting destination suggestions");
        let body = json!({
            "contents": [{
                "parts": [{ "text": prompt }]
            }]
        });
        let request = self
            .http
            .client()
            .post(url)
            .query(&[("key", self.api_key.as_str())])
            .json(&body);
        self.http.send_json(request).await
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("no text content in response")]
    NoText,
    #[error("no JSON array found in response")]
    NoJsonArray,
    #[error("invalid JSON: {0}")]
    InvalidJson(String),
    #[error("response is not an array")]
    NotAnArray,
    #[error("no valid destinations in response")]
    NoValidItems,
}

impl From<ParseError> for FetchError {
    fn from(err: ParseError) -> Self {
        match err {
            ParseError::NoValidItems => FetchError::EmptyResult(err.to_string()),
            other => FetchError::MalformedResponse(other.to_string()),
        }
    }
}

pub fn parse_suggestions(
    response: &GenerateContentResponse,
    limit: usize,
) -> Result<Vec<DestinationSuggestion>, ParseError> {
    let text = response.text().ok_or(ParseError::NoText)?;
    parse_suggestion_text(text, limit)
}

/// Extracts the outermost `[...]` span from free-form model output, decodes it
/// loosely and validates each item field by field. Invalid items are dropped; at
/// most `limit` suggestions are kept.
pub fn parse_suggestion_text(
    text: &str,
    limit: usize,
) -> Result<Vec<DestinationSuggestion>, ParseError> {
    if text.trim().is_empty() {
        return Err(ParseError::NoText);
    }

    let start = text.find('[').ok_or(ParseError::NoJsonArray)?;
    let end = text
        .rfind(']')
        .filter(|end| *end > start)
        .ok_or(ParseError::NoJsonArray)?;

    let value: JsonValue = serde_json::from_str(&text[start..=end])
        .map_err(|e| ParseError::InvalidJson(e.to_string()))?;
    let items = value.as_array().ok_or(ParseError::NotAnArray)?;

    let suggestions = items
        .iter()
        .filter_map(validate_suggestion)
        .take(limit)
        .collect::<Vec<_>>();

    if suggestions.is_empty() {
        return Err(ParseError::NoValidItems);
    }
    Ok(suggestions)
}

fn validate_suggestion(value: &JsonValue) -> Option<DestinationSuggestion> {
    let obj = value.as_object()?;
    let name = obj.get("name")?.as_str()?;
    let country = obj.get("country")?.as_str()?;
    let tagline = obj.get("tagline")?.as_str()?;
    DestinationSuggestion::new(name, country, tagline)
}

// ── Image search ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SearchPhotosResponse {
    #[serde(default)]
    pub results: Vec<Photo>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Photo {
    #[serde(default)]
    pub urls: Option<PhotoUrls>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PhotoUrls {
    #[serde(default)]
    pub regular: Option<String>,
}

impl SearchPhotosResponse {
    pub fn first_regular_url(&self) -> Option<String> {
        self.results
            .first()?
            .urls
            .as_ref()?
            .regular
            .as_deref()
            .map(str::trim)
            .filter(|u| !u.is_empty())
            .map(ToString::to_string)
    }
}

pub fn image_query(destination_name: &str) -> String {
    format!("{} travel destination", destination_name.trim())
}

pub struct UnsplashClient {
    http: HttpFetcher,
    access_key: String,
    endpoint: String,
}

impl fmt::Debug for UnsplashClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnsplashClient")
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}

impl UnsplashClient {
    pub fn new(http: HttpFetcher, access_key: impl Into<String>) -> Self {
        Self {
            http,
            access_key: access_key.into(),
            endpoint: UNSPLASH_ENDPOINT.to_string(),
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }
}

#[async_trait]
impl ImageSource for UnsplashClient {
    async fn search_image(&self, destination_name: &str) -> Result<Option<String>, FetchError> {
        let query = image_query(destination_name);
        debug!(%query, "searching destination image");
        let request = self
            .http
            .client()
            .get(&self.endpoint)
            .query(&[
                ("query", query.as_str()),
                ("per_page", "1"),
                ("orientation", IMAGE_ORIENTATION),
            ])
            .header("Authorization", format!("Client-ID {}", self.access_key));
        let payload: SearchPhotosResponse = self.http.send_json(request).await?;
        Ok(payload.first_regular_url())
    }
}

// ── Current weather ───────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CurrentWeatherResponse {
    #[serde(default)]
    pub main: Option<MainReadings>,
    #[serde(default)]
    pub weather: Vec<ConditionEntry>,
    #[serde(default)]
    pub wind: Option<WindReadings>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MainReadings {
    #[serde(default)]
    pub temp: Option<f64>,
    #[serde(default)]
    pub humidity: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConditionEntry {
    #[serde(default)]
    pub main: String,
    #[serde(default)]
    pub icon: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WindReadings {
    #[serde(default)]
    pub speed: Option<f64>,
}

impl CurrentWeatherResponse {
    pub fn into_snapshot(self, city_name: &str) -> Result<WeatherSnapshot, FetchError> {
        let main = self.main.as_ref();
        let temp = main.and_then(|m| m.temp).ok_or_else(|| {
            FetchError::MalformedResponse(format!("missing main.temp for {city_name}"))
        })?;
        let condition = self.weather.into_iter().next().ok_or_else(|| {
            FetchError::MalformedResponse(format!("missing weather[0] for {city_name}"))
        })?;
        let humidity = main
            .and_then(|m| m.humidity)
            .filter(|h| h.is_finite() && *h >= 0.0)
            .map(|h| h.round() as u32);
        let wind_speed = self.wind.and_then(|w| w.speed);

        Ok(WeatherSnapshot::from_metric(
            temp,
            condition.main,
            condition.icon,
            humidity,
            wind_speed,
        ))
    }
}

pub struct OpenWeatherClient {
    http: HttpFetcher,
    api_key: String,
    endpoint: String,
}

impl fmt::Debug for OpenWeatherClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenWeatherClient")
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}

impl OpenWeatherClient {
    pub fn new(http: HttpFetcher, api_key: impl Into<String>) -> Self {
        Self {
            http,
            api_key: api_key.into(),
            endpoint: OPENWEATHER_ENDPOINT.to_string(),
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }
}

#[async_trait]
impl WeatherSource for OpenWeatherClient {
    async fn current_weather(&self, city_name: &str) -> Result<WeatherSnapshot, FetchError> {
        debug!(city = %city_name, "fetching current weather");
        let request = self.http.client().get(&self.endpoint).query(&[
            ("q", city_name),
            ("appid", self.api_key.as_str()),
            ("units", WEATHER_UNITS),
        ]);
        let payload: CurrentWeatherResponse = self.http.send_json(request).await?;
        payload.into_snapshot(city_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wayfarer_core::TAGLINE_MAX_CHARS;
    use wayfarer_storage::FailureKind;

    #[test]
    fn drops_items_with_blank_fields() {
        let text = r#"[{"name":"X","country":"Y","tagline":"Z"},{"name":"","country":"B","tagline":"C"}]"#;
        let parsed = parse_suggestion_text(text, 3).unwrap();
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].name, "X");
        assert_eq!(parsed[0].country, "Y");
        assert_eq!(parsed[0].tagline, "Z");
    }

    #[test]
    fn extracts_array_wrapped_in_prose_and_fences() {
        let text = "Sure! Here you go:\n```json\n[\n  {\"name\": \" Lisbon \", \"country\": \"Portugal\", \"tagline\": \"Hills and trams\"}\n]\n```\nEnjoy.";
        let parsed = parse_suggestion_text(text, 3).unwrap();
        assert_eq!(parsed[0].name, "Lisbon");
    }

    #[test]
    fn text_without_array_is_rejected() {
        assert_eq!(
            parse_suggestion_text("I cannot help with that.", 3),
            Err(ParseError::NoJsonArray)
        );
        assert_eq!(
            parse_suggestion_text("closing ] before opening [", 3),
            Err(ParseError::NoJsonArray)
        );
        assert_eq!(parse_suggestion_text("   ", 3), Err(ParseError::NoText));
    }

    #[test]
    fn malformed_json_is_rejected() {
        let err = parse_suggestion_text(r#"[{"name": "Oslo",]"#, 3).unwrap_err();
        assert!(matches!(err, ParseError::InvalidJson(_)));
        assert_eq!(FetchError::from(err).kind(), FailureKind::MalformedResponse);
    }

    #[test]
    fn all_invalid_items_is_an_empty_result() {
        let text = r#"[{"name": 1, "country": "A", "tagline": "B"}, "Paris", null, {"name": "C"}]"#;
        let err = parse_suggestion_text(text, 3).unwrap_err();
        assert_eq!(err, ParseError::NoValidItems);
        assert_eq!(FetchError::from(err).kind(), FailureKind::EmptyResult);
    }

    #[test]
    fn result_is_capped_and_taglines_truncated() {
        let long = "x".repeat(250);
        let items = (0..5)
            .map(|i| json!({"name": format!("City {i}"), "country": "C", "tagline": long}))
            .collect::<Vec<_>>();
        let text = serde_json::to_string(&items).unwrap();

        let parsed = parse_suggestion_text(&text, 3).unwrap();
        assert_eq!(parsed.len(), 3);
        assert_eq!(parsed[2].name, "City 2");
        assert!(parsed
            .iter()
            .all(|s| s.tagline.chars().count() == TAGLINE_MAX_CHARS));
    }

    #[test]
    fn response_without_candidates_has_no_text() {
        let response: GenerateContentResponse = serde_json::from_str(r#"{"candidates": []}"#).unwrap();
        assert_eq!(parse_suggestions(&response, 3), Err(ParseError::NoText));

        let response: GenerateContentResponse =
            serde_json::from_str(r#"{"candidates": [{"content": {"parts": [{}]}}]}"#).unwrap();
        assert_eq!(parse_suggestions(&response, 3), Err(ParseError::NoText));
    }

    #[test]
    fn gemini_envelope_deserializes_and_parses() {
        let body = json!({
            "candidates": [{
                "content": {
                    "parts": [{
                        "text": "[{\"name\":\"Kyoto\",\"country\":\"Japan\",\"tagline\":\"Temples\"}]"
                    }]
                }
            }]
        });
        let response: GenerateContentResponse = serde_json::from_value(body).unwrap();
        let parsed = parse_suggestions(&response, 3).unwrap();
        assert_eq!(parsed[0].name, "Kyoto");
    }

    #[test]
    fn prompt_requests_exact_count_for_mood() {
        let prompt = build_prompt("adventurous", 4);
        assert!(prompt.contains("exactly 4 travel destinations"));
        assert!(prompt.contains("seeking a adventurous experience"));
        assert_eq!(prompt.matches("\"tagline\"").count(), 4);
    }

    #[test]
    fn photo_search_takes_first_regular_url() {
        let payload: SearchPhotosResponse = serde_json::from_value(json!({
            "results": [
                {"urls": {"regular": "https://images.example.test/a.jpg", "small": "s"}},
                {"urls": {"regular": "https://images.example.test/b.jpg"}}
            ]
        }))
        .unwrap();
        assert_eq!(
            payload.first_regular_url().as_deref(),
            Some("https://images.example.test/a.jpg")
        );

        let empty: SearchPhotosResponse = serde_json::from_value(json!({"results": []})).unwrap();
        assert_eq!(empty.first_regular_url(), None);

        let no_regular: SearchPhotosResponse =
            serde_json::from_value(json!({"results": [{"urls": {"thumb": "t"}}]})).unwrap();
        assert_eq!(no_regular.first_regular_url(), None);
    }

    #[test]
    fn image_query_appends_travel_destination() {
        assert_eq!(image_query(" Paris "), "Paris travel destination");
    }

    #[test]
    fn weather_payload_maps_to_snapshot() {
        let payload: CurrentWeatherResponse = serde_json::from_value(json!({
            "main": {"temp": 21.6, "humidity": 64},
            "weather": [{"main": "Clouds", "icon": "04d", "description": "broken clouds"}],
            "wind": {"speed": 3.1}
        }))
        .unwrap();
        let snapshot = payload.into_snapshot("Rome").unwrap();
        assert_eq!(snapshot.temperature, 22);
        assert_eq!(snapshot.condition, "Clouds");
        assert_eq!(snapshot.icon, "04d");
        assert_eq!(snapshot.humidity, Some(64));
        assert_eq!(snapshot.wind_speed, Some(3.1));
    }

    #[test]
    fn weather_payload_without_conditions_is_malformed() {
        let payload: CurrentWeatherResponse =
            serde_json::from_value(json!({"main": {"temp": 10.0}, "weather": []})).unwrap();
        let err = payload.into_snapshot("Oslo").unwrap_err();
        assert_eq!(err.kind(), FailureKind::MalformedResponse);

        let payload: CurrentWeatherResponse =
            serde_json::from_value(json!({"weather": [{"main": "Rain", "icon": "10d"}]})).unwrap();
        assert!(payload.into_snapshot("Oslo").is_err());
    }

    struct StaticSuggestions;

    #[async_trait]
    impl SuggestionSource for StaticSuggestions {
        async fn generate(&self, _prompt: &str) -> Result<GenerateContentResponse, FetchError> {
            Ok(GenerateContentResponse::from_text(
                r#"[{"name":"Fiji","country":"Fiji","tagline":"Reefs"}]"#,
            ))
        }
    }

    #[tokio::test]
    async fn sources_are_object_safe() {
        let source: Box<dyn SuggestionSource> = Box::new(StaticSuggestions);
        let response = source.generate(&build_prompt("tropical", 3)).await.unwrap();
        assert_eq!(source.service_name(), "gemini");
        assert_eq!(parse_suggestions(&response, 3).unwrap()[0].name, "Fiji");
    }
}
