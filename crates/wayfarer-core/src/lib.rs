//! Core domain model for Wayfarer: moods, destinations, weather snapshots and the
//! static fallback catalog used when the suggestion service is unavailable.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const CRATE_NAME: &str = "wayfarer-core";

/// Mood used when a requested mood has no catalog entry.
pub const DEFAULT_MOOD: &str = "relaxed";
pub const DESTINATIONS_PER_MOOD: usize = 3;
pub const TAGLINE_MAX_CHARS: usize = 100;
pub const DEFAULT_IMAGE_URL: &str =
    "https://images.unsplash.com/photo-1488646953014-85cb44e25828?w=800";

/// A selectable travel-style theme.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MoodCategory {
    pub id: &'static str,
    pub label: &'static str,
    pub emoji: &'static str,
    pub description: &'static str,
}

pub const MOOD_CATEGORIES: &[MoodCategory] = &[
    MoodCategory {
        id: "relaxed",
        label: "Relaxed",
        emoji: "🏖️",
        description: "Peaceful beaches and tranquil getaways",
    },
    MoodCategory {
        id: "adventurous",
        label: "Adventurous",
        emoji: "🏔️",
        description: "Thrilling experiences and outdoor activities",
    },
    MoodCategory {
        id: "romantic",
        label: "Romantic",
        emoji: "💕",
        description: "Intimate settings and couple-friendly destinations",
    },
    MoodCategory {
        id: "cultural",
        label: "Cultural",
        emoji: "🏛️",
        description: "Historic sites and rich cultural experiences",
    },
    MoodCategory {
        id: "tropical",
        label: "Tropical",
        emoji: "🌴",
        description: "Warm climates and exotic island paradises",
    },
    MoodCategory {
        id: "winter-escape",
        label: "Winter Escape",
        emoji: "❄️",
        description: "Snowy landscapes and cozy mountain retreats",
    },
];

pub fn mood_category(id: &str) -> Option<&'static MoodCategory> {
    MOOD_CATEGORIES.iter().find(|m| m.id == id)
}

/// Current conditions for a city. Replaced wholesale, never patched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WeatherSnapshot {
    pub temperature: i32,
    pub condition: String,
    pub icon: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub humidity: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wind_speed: Option<f64>,
}

impl WeatherSnapshot {
    /// Builds a snapshot from a raw metric temperature, rounding half away from zero.
    pub fn from_metric(
        temperature: f64,
        condition: impl Into<String>,
        icon: impl Into<String>,
        humidity: Option<u32>,
        wind_speed: Option<f64>,
    ) -> Self {
        Self {
            temperature: temperature.round() as i32,
            condition: condition.into(),
            icon: icon.into(),
            humidity,
            wind_speed,
        }
    }
}

/// Minimally validated suggestion, before image and weather are attached.
///
/// All three fields are trimmed and non-empty; the tagline holds at most
/// [`TAGLINE_MAX_CHARS`] characters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DestinationSuggestion {
    pub name: String,
    pub country: String,
    pub tagline: String,
}

impl DestinationSuggestion {
    pub fn new(name: &str, country: &str, tagline: &str) -> Option<Self> {
        let name = non_empty_trimmed(name)?;
        let country = non_empty_trimmed(country)?;
        let tagline = non_empty_trimmed(tagline)?;
        Some(Self {
            name,
            country,
            tagline: truncate_chars(&tagline, TAGLINE_MAX_CHARS),
        })
    }
}

fn non_empty_trimmed(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn truncate_chars(value: &str, max: usize) -> String {
    match value.char_indices().nth(max) {
        Some((idx, _)) => value[..idx].to_string(),
        None => value.to_string(),
    }
}

/// A hydrated recommendation. `image_url` is empty until an image has been resolved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Destination {
    pub id: Uuid,
    pub name: String,
    pub country: String,
    pub tagline: String,
    #[serde(default)]
    pub image_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weather: Option<WeatherSnapshot>,
}

impl Destination {
    pub fn from_suggestion(suggestion: DestinationSuggestion, image_url: impl Into<String>) -> Self {
        Self {
            id: new_destination_id(),
            name: suggestion.name,
            country: suggestion.country,
            tagline: suggestion.tagline,
            image_url: image_url.into(),
            weather: None,
        }
    }

    pub fn with_weather(mut self, weather: Option<WeatherSnapshot>) -> Self {
        self.weather = weather;
        self
    }
}

pub fn new_destination_id() -> Uuid {
    Uuid::new_v4()
}

/// Key used by every per-name cache: trimmed and lowercased.
pub fn cache_key(name: &str) -> String {
    name.trim().to_lowercase()
}

#[derive(Debug, Clone, Copy)]
struct CatalogEntry {
    name: &'static str,
    country: &'static str,
    tagline: &'static str,
}

const fn entry(name: &'static str, country: &'static str, tagline: &'static str) -> CatalogEntry {
    CatalogEntry {
        name,
        country,
        tagline,
    }
}

const FALLBACK_CATALOG: &[(&str, [CatalogEntry; 3])] = &[
    (
        "relaxed",
        [
            entry("Bali", "Indonesia", "Serene beaches and peaceful temples"),
            entry("Maldives", "Maldives", "Crystal clear waters and luxury resorts"),
            entry("Santorini", "Greece", "Stunning sunsets and white-washed villages"),
        ],
    ),
    (
        "adventurous",
        [
            entry("Queenstown", "New Zealand", "Adventure capital of the world"),
            entry("Patagonia", "Argentina", "Dramatic landscapes and hiking trails"),
            entry("Iceland", "Iceland", "Glaciers, volcanoes, and northern lights"),
        ],
    ),
    (
        "romantic",
        [
            entry("Paris", "France", "City of love and romance"),
            entry("Venice", "Italy", "Gondola rides and charming canals"),
            entry("Prague", "Czech Republic", "Fairy-tale architecture and cobblestone streets"),
        ],
    ),
    (
        "cultural",
        [
            entry("Kyoto", "Japan", "Ancient temples and traditional culture"),
            entry("Rome", "Italy", "Historic ruins and Renaissance art"),
            entry("Cairo", "Egypt", "Pyramids and ancient civilization"),
        ],
    ),
    (
        "tropical",
        [
            entry("Phuket", "Thailand", "Tropical paradise with vibrant nightlife"),
            entry("Fiji", "Fiji", "Pristine beaches and coral reefs"),
            entry("Costa Rica", "Costa Rica", "Rainforests and exotic wildlife"),
        ],
    ),
    (
        "winter-escape",
        [
            entry("Aspen", "USA", "World-class skiing and mountain luxury"),
            entry("Zermatt", "Switzerland", "Alpine charm and Matterhorn views"),
            entry("Lapland", "Finland", "Winter wonderland and Santa Claus village"),
        ],
    ),
];

pub fn has_fallback(mood: &str) -> bool {
    FALLBACK_CATALOG.iter().any(|(id, _)| *id == mood)
}

/// Static suggestions for `mood`, or the relaxed set when the mood is unknown.
pub fn fallback_suggestions(mood: &str) -> Vec<DestinationSuggestion> {
    let entries = FALLBACK_CATALOG
        .iter()
        .find(|(id, _)| *id == mood)
        .or_else(|| FALLBACK_CATALOG.iter().find(|(id, _)| *id == DEFAULT_MOOD))
        .map(|(_, entries)| entries.as_slice())
        .unwrap_or_default();

    entries
        .iter()
        .map(|e| DestinationSuggestion {
            name: e.name.to_string(),
            country: e.country.to_string(),
            tagline: e.tagline.to_string(),
        })
        .collect()
}

/// Fallback destinations with empty image URLs; images are filled in later per card.
pub fn fallback_destinations(mood: &str) -> Vec<Destination> {
    fallback_suggestions(mood)
        .into_iter()
        .map(|s| Destination::from_suggestion(s, String::new()))
        .collect()
}
