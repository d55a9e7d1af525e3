use std::path::{Path, PathBuf};

use wayfarer_providers::{
    parse_suggestions, CurrentWeatherResponse, GenerateContentResponse, ParseError,
    SearchPhotosResponse,
};

fn fixture(relative: &str) -> String {
    let path: PathBuf = Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("../../fixtures")
        .join(relative);
    std::fs::read_to_string(&path).unwrap_or_else(|e| panic!("reading {}: {e}", path.display()))
}

#[test]
fn gemini_fenced_output_parses_and_caps() {
    let response: GenerateContentResponse =
        serde_json::from_str(&fixture("gemini/generate_content_fenced.json")).unwrap();
    let suggestions = parse_suggestions(&response, 3).unwrap();
    let names = suggestions.iter().map(|s| s.name.as_str()).collect::<Vec<_>>();
    assert_eq!(names, vec!["Queenstown", "Moab", "Interlaken"]);
}

#[test]
fn gemini_refusal_has_no_array() {
    let response: GenerateContentResponse =
        serde_json::from_str(&fixture("gemini/generate_content_refusal.json")).unwrap();
    assert_eq!(parse_suggestions(&response, 3), Err(ParseError::NoJsonArray));
}

#[test]
fn unsplash_search_yields_regular_url() {
    let payload: SearchPhotosResponse =
        serde_json::from_str(&fixture("unsplash/search_photos.json")).unwrap();
    assert_eq!(
        payload.first_regular_url().as_deref(),
        Some("https://images.unsplash.com/photo-1502602898657-3e91760cbb34?w=1080")
    );
}

#[test]
fn openweather_current_maps_to_snapshot() {
    let payload: CurrentWeatherResponse =
        serde_json::from_str(&fixture("openweather/current_weather.json")).unwrap();
    let snapshot = payload.into_snapshot("Tokyo").unwrap();
    assert_eq!(snapshot.temperature, 18);
    assert_eq!(snapshot.condition, "Clear");
    assert_eq!(snapshot.icon, "01d");
    assert_eq!(snapshot.humidity, Some(55));
    assert_eq!(snapshot.wind_speed, Some(4.12));
}
