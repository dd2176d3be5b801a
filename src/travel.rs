//! Travel domain helpers: trip preferences and the built-in sample corpus.

use serde::{Deserialize, Serialize};

use travel_rag_core::models::{keys, Document, Metadata, MetadataFilter};

/// What a traveller asks a plan for. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TravelPreferences {
    pub destination: Option<String>,
    pub budget: Option<String>,
    #[serde(alias = "duration")]
    pub duration_days: Option<u32>,
    pub interests: Vec<String>,
    pub travel_style: Option<String>,
}

impl TravelPreferences {
    /// Retrieval query for these preferences, e.g.
    /// `travel to Bali budget moderate 5 days activities: surfing, temples`.
    pub fn compose_query(&self) -> String {
        let mut parts = Vec::new();
        if let Some(destination) = non_empty(&self.destination) {
            parts.push(format!("travel to {}", destination));
        }
        if let Some(budget) = non_empty(&self.budget) {
            parts.push(format!("budget {}", budget));
        }
        if let Some(days) = self.duration_days.filter(|d| *d > 0) {
            parts.push(format!("{} days", days));
        }
        let interests: Vec<&str> = self
            .interests
            .iter()
            .map(|i| i.trim())
            .filter(|i| !i.is_empty())
            .collect();
        if !interests.is_empty() {
            parts.push(format!("activities: {}", interests.join(", ")));
        }
        if let Some(style) = non_empty(&self.travel_style) {
            parts.push(format!("{} travel", style));
        }

        if parts.is_empty() {
            "travel recommendations".to_string()
        } else {
            parts.join(" ")
        }
    }

    /// Destination filter, when a destination is given.
    pub fn filter(&self) -> MetadataFilter {
        match non_empty(&self.destination) {
            Some(destination) => MetadataFilter::new().with(keys::DESTINATION, destination),
            None => MetadataFilter::new(),
        }
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

struct Sample {
    source: &'static str,
    title: &'static str,
    destination: &'static str,
    category: &'static str,
    text: &'static str,
}

const SAMPLES: &[Sample] = &[
    Sample {
        source: "sample/paris_guide.txt",
        title: "Paris Travel Guide",
        destination: "Paris",
        category: "city_guide",
        text: "Paris, the City of Light, rewards slow wandering. The Eiffel Tower rises 330 metres over the Champ de Mars, and the summit platform looks across the whole city.\n\n\
The Louvre holds the Mona Lisa among tens of thousands of works; arrive at opening or use the Carrousel entrance to skip the longest queues. The Musée d'Orsay keeps the Impressionists in a former railway station.\n\n\
Notre-Dame has reopened after the 2019 fire and remains a landmark of Gothic architecture. Evening boat trips on the Seine pass most of the great monuments.\n\n\
Food is half the reason to come: croissants from a neighbourhood boulangerie, long bistro lunches, and cheese from the covered markets.",
    },
    Sample {
        source: "sample/tokyo_guide.txt",
        title: "Tokyo Travel Guide",
        destination: "Tokyo",
        category: "city_guide",
        text: "Tokyo mixes neon districts with quiet shrines. Shibuya Crossing is the busiest pedestrian junction on earth, and the Skytree gives a panorama of the sprawling metropolis.\n\n\
Senso-ji in Asakusa is the oldest temple in the city. Akihabara is the hub for electronics, anime and retro games.\n\n\
The Tsukiji Outer Market serves fresh seafood and sushi from early morning. Ramen counters, izakaya and department store food halls cover every budget.\n\n\
Trains and subways are punctual and clean; a prepaid IC card such as Suica works across every line and in convenience stores.",
    },
    Sample {
        source: "sample/nyc_guide.txt",
        title: "New York City Travel Guide",
        destination: "New York",
        category: "city_guide",
        text: "New York City runs on culture, finance and entertainment. Times Square glows all night, and Broadway theatres line the streets around it.\n\n\
Central Park gives 843 acres of green space in the middle of Manhattan. The Statue of Liberty and Ellis Island are reached by ferry from Battery Park.\n\n\
The Metropolitan Museum of Art and the Museum of Modern Art hold world-class collections. Neighbourhoods from Chinatown to Harlem each have their own food and music.",
    },
    Sample {
        source: "sample/bali_guide.txt",
        title: "Bali Travel Guide",
        destination: "Bali",
        category: "city_guide",
        text: "Bali is an Indonesian island of volcanoes, rice terraces and beaches. The best time to visit Bali is the dry season from April to October, when days are sunny and humidity is lower.\n\n\
Ubud is the cultural heart of Bali, with craft villages, the Sacred Monkey Forest and the Tegallalang rice terraces just north of town.\n\n\
Uluwatu temple sits on a cliff above the Indian Ocean; the sunset Kecak fire dance there is a highlight of any visit to Bali.\n\n\
The wet season from November to March brings afternoon storms, fewer crowds and lower prices, so it can still be a good time to visit Bali on a budget.",
    },
    Sample {
        source: "sample/budget_tips.txt",
        title: "Budget Travel Tips",
        destination: "general",
        category: "travel_tips",
        text: "Travelling on a shoestring starts with where you sleep: hostels, guesthouses and home-sharing platforms cost a fraction of hotels.\n\n\
Cook some of your own meals, use public transport instead of taxis, and look for free walking tours and museum free-admission days.\n\n\
Shoulder and off-peak seasons mean lower prices on flights and rooms. Pack light to avoid checked baggage fees, and learn a few local phrases to avoid tourist traps.",
    },
    Sample {
        source: "sample/solo_travel.txt",
        title: "Solo Travel Guide",
        destination: "general",
        category: "travel_tips",
        text: "Solo travel is a chance to move at your own pace. Research your destination before you arrive and stay in well-lit, busy areas at night.\n\n\
Hostels and group tours are easy places to meet other travellers. Keep passports and spare cash separate from your daily wallet.\n\n\
Trust your instincts, keep someone at home updated on your plans, and write a travel journal to remember the trip.",
    },
];

/// The built-in sample corpus loaded by `trag seed`.
pub fn sample_documents() -> Vec<Document> {
    SAMPLES
        .iter()
        .map(|s| {
            let metadata = Metadata::new()
                .with(keys::TITLE, s.title)
                .with(keys::DESTINATION, s.destination)
                .with(keys::CATEGORY, s.category)
                .with(keys::SOURCE, s.source);
            Document::from_source(s.source, s.text.to_string(), metadata)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compose_query_full() {
        let prefs = TravelPreferences {
            destination: Some("Bali".into()),
            budget: Some("moderate".into()),
            duration_days: Some(5),
            interests: vec!["surfing".into(), "temples".into()],
            travel_style: None,
        };
        assert_eq!(
            prefs.compose_query(),
            "travel to Bali budget moderate 5 days activities: surfing, temples"
        );
        assert!(prefs.filter().matches(&Metadata::new().with(keys::DESTINATION, "Bali")));
    }

    #[test]
    fn test_compose_query_empty() {
        let prefs = TravelPreferences::default();
        assert_eq!(prefs.compose_query(), "travel recommendations");
        assert!(prefs.filter().is_empty());
    }

    #[test]
    fn test_preferences_accept_duration_alias() {
        let prefs: TravelPreferences =
            serde_json::from_str(r#"{"destination": "Tokyo", "duration": 3}"#).unwrap();
        assert_eq!(prefs.duration_days, Some(3));
    }

    #[test]
    fn test_sample_corpus() {
        let docs = sample_documents();
        assert_eq!(docs.len(), 6);
        let destinations: Vec<&str> = docs.iter().filter_map(|d| d.metadata.destination()).collect();
        assert!(destinations.contains(&"Bali"));
        assert!(destinations.contains(&"New York"));
        let ids: std::collections::HashSet<&str> = docs.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids.len(), docs.len());
    }
}
