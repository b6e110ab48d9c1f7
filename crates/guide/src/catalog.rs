//! Static catalog of places in and around Tunis.

use core::fmt;
use core::str::FromStr;

use tuni_core::{Coordinates, DestinationId, format_distance, walking_time};

/// Kind of place.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Category {
    Destination,
    Hotel,
    Food,
    Shopping,
    Transport,
}

impl Category {
    pub const ALL: [Self; 5] = [
        Self::Destination,
        Self::Hotel,
        Self::Food,
        Self::Shopping,
        Self::Transport,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Destination => "destination",
            Self::Hotel => "hotel",
            Self::Food => "food",
            Self::Shopping => "shopping",
            Self::Transport => "transport",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error parsing a [`Category`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown category: {0}")]
pub struct CategoryError(pub String);

impl FromStr for Category {
    type Err = CategoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "destination" | "destinations" | "discover" => Ok(Self::Destination),
            "hotel" | "hotels" => Ok(Self::Hotel),
            "food" | "restaurant" | "restaurants" => Ok(Self::Food),
            "shopping" | "shop" => Ok(Self::Shopping),
            "transport" | "transportation" => Ok(Self::Transport),
            other => Err(CategoryError(other.to_owned())),
        }
    }
}

/// A place in the catalog.
#[derive(Debug, Clone, PartialEq)]
pub struct Destination {
    pub slug: &'static str,
    pub title: &'static str,
    pub category: Category,
    pub description: &'static str,
    pub location: &'static str,
    pub coordinates: Coordinates,
    /// Editorial rating out of 5.
    pub rating: f32,
}

impl Destination {
    #[must_use]
    pub fn id(&self) -> DestinationId {
        DestinationId::new(self.slug)
    }

    fn matches(&self, needle: &str) -> bool {
        [self.title, self.description, self.location, self.category.as_str()]
            .iter()
            .any(|field| field.to_lowercase().contains(needle))
    }
}

macro_rules! place {
    ($slug:literal, $title:literal, $category:ident, $lat:literal, $lng:literal, $rating:literal, $location:literal, $description:literal) => {
        Destination {
            slug: $slug,
            title: $title,
            category: Category::$category,
            description: $description,
            location: $location,
            coordinates: Coordinates::new($lat, $lng),
            rating: $rating,
        }
    };
}

/// Every place the guide knows.
pub static DESTINATIONS: &[Destination] = &[
    place!("medina-tunis", "Medina of Tunis", Destination, 36.7992, 10.1706, 4.8, "Tunis",
        "UNESCO-listed old town of souks, palaces and mosques."),
    place!("ezzitouna-mosque", "Ezzitouna Mosque", Destination, 36.7982, 10.1696, 4.7, "Medina of Tunis",
        "The great mosque at the heart of the Medina."),
    place!("cathedral-st-vincent", "Cathedral of St. Vincent", Destination, 36.8002, 10.1816, 4.5, "Avenue Habib Bourguiba, Tunis",
        "Neo-Romanesque cathedral facing the main avenue."),
    place!("bardo-museum", "Bardo National Museum", Destination, 36.8094, 10.1344, 4.8, "Le Bardo",
        "One of the world's largest collections of Roman mosaics."),
    place!("carthage", "Carthage", Destination, 36.8528, 10.3233, 4.7, "Carthage",
        "Ruins of the Punic and Roman city by the sea."),
    place!("sidi-bou-said", "Sidi Bou Said", Destination, 36.8687, 10.3417, 4.9, "Sidi Bou Said",
        "Blue-and-white cliffside village overlooking the Gulf of Tunis."),
    place!("the-residence", "The Residence Tunis", Hotel, 36.8972, 10.3069, 4.6, "Les Côtes de Carthage, Gammarth",
        "Beachfront resort with a thalasso spa."),
    place!("dar-el-medina", "Dar El Medina", Hotel, 36.7978, 10.1689, 4.7, "Medina of Tunis",
        "Boutique hotel in a restored Medina house."),
    place!("movenpick-lac", "Mövenpick Hotel du Lac", Hotel, 36.8389, 10.2403, 4.4, "Les Berges du Lac, Tunis",
        "Modern hotel on the lake shore."),
    place!("dar-el-jeld", "Dar El Jeld", Food, 36.7996, 10.1681, 4.8, "Medina of Tunis",
        "Traditional Tunisian cuisine in a historic palace."),
    place!("el-ali", "El Ali", Food, 36.7990, 10.1712, 4.5, "Medina of Tunis",
        "Rooftop café-restaurant with Medina views."),
    place!("cafe-des-delices", "Café des Délices", Food, 36.8700, 10.3428, 4.6, "Sidi Bou Said",
        "Terraced café above the Sidi Bou Said marina."),
    place!("azur-city", "Azur City", Shopping, 36.8892, 10.3229, 4.7, "Route de la Marsa, La Marsa",
        "Modern shopping mall with international brands and entertainment facilities."),
    place!("tunisia-mall", "Tunisia Mall", Shopping, 36.8432, 10.2731, 4.6, "Les Berges du Lac 2, Tunis",
        "Upscale shopping center featuring luxury brands and fine dining."),
    place!("souk-el-attarine", "Souk El Attarine", Shopping, 36.7992, 10.1706, 4.8, "Medina of Tunis",
        "Traditional perfume and spice market in the heart of the Medina."),
    place!("souk-des-chechias", "Souk des Chéchias", Shopping, 36.7992, 10.1706, 4.5, "Medina of Tunis",
        "Workshops making the traditional red felt hat."),
    place!("tunis-marine", "Tunis Marine Station", Transport, 36.8008, 10.1897, 4.1, "Tunis",
        "Terminus of the TGM light rail to La Goulette, Carthage and La Marsa."),
    place!("tunis-carthage-airport", "Tunis-Carthage Airport", Transport, 36.8510, 10.2272, 4.0, "Tunis",
        "International airport, 8 km from the city centre."),
];

/// Look up a place by id.
#[must_use]
pub fn find(id: &str) -> Option<&'static Destination> {
    DESTINATIONS.iter().find(|d| d.slug == id)
}

/// Places of one category, in catalog order.
pub fn by_category(category: Category) -> impl Iterator<Item = &'static Destination> {
    DESTINATIONS.iter().filter(move |d| d.category == category)
}

/// Case-insensitive search over title, description, location and category.
///
/// An empty query matches everything.
#[must_use]
pub fn search(query: &str) -> Vec<&'static Destination> {
    let needle = query.trim().to_lowercase();
    DESTINATIONS
        .iter()
        .filter(|d| needle.is_empty() || d.matches(&needle))
        .collect()
}

/// A place with its distance from the user.
#[derive(Debug, Clone, PartialEq)]
pub struct Nearby {
    pub destination: &'static Destination,
    pub distance_km: f64,
    /// e.g. `"7 mins"`
    pub walking_time: String,
    /// e.g. `"650m away"`
    pub distance_label: String,
}

/// The `limit` places closest to `from`.
#[must_use]
pub fn nearby(from: Coordinates, limit: usize) -> Vec<Nearby> {
    let mut places: Vec<Nearby> = DESTINATIONS
        .iter()
        .map(|destination| {
            let distance_km = from.distance_km(&destination.coordinates);
            Nearby {
                destination,
                distance_km,
                walking_time: walking_time(distance_km),
                distance_label: format_distance(distance_km),
            }
        })
        .collect();
    places.sort_by(|a, b| a.distance_km.total_cmp(&b.distance_km));
    places.truncate(limit);
    places
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::HashSet;

    use super::*;
    use tuni_core::TUNIS_CITY_CENTER;

    #[test]
    fn test_slugs_are_unique_and_coordinates_valid() {
        let mut seen = HashSet::new();
        for destination in DESTINATIONS {
            assert!(seen.insert(destination.slug), "duplicate {}", destination.slug);
            assert!(destination.coordinates.is_valid());
            assert!((0.0..=5.0).contains(&destination.rating));
        }
    }

    #[test]
    fn test_every_category_has_places() {
        for category in Category::ALL {
            assert!(by_category(category).next().is_some(), "{category} empty");
        }
    }

    #[test]
    fn test_search_is_case_insensitive() {
        let hits = search("SOUK");
        assert!(hits.iter().any(|d| d.slug == "souk-el-attarine"));
        assert!(hits.iter().all(|d| d.category == Category::Shopping));
        assert_eq!(search("").len(), DESTINATIONS.len());
        assert!(search("hotel").iter().any(|d| d.category == Category::Hotel));
        assert!(search("zzz-nothing").is_empty());
    }

    #[test]
    fn test_nearby_orders_by_distance() {
        let places = nearby(TUNIS_CITY_CENTER, 3);
        assert_eq!(places.len(), 3);
        assert!(places.windows(2).all(|w| w[0].distance_km <= w[1].distance_km));
        assert!(places[0].walking_time.ends_with(" mins"));
        assert!(places[0].distance_label.ends_with("away"));
    }

    #[test]
    fn test_category_parse() {
        assert_eq!("Hotels".parse::<Category>().unwrap(), Category::Hotel);
        assert_eq!("discover".parse::<Category>().unwrap(), Category::Destination);
        assert!("museum".parse::<Category>().is_err());
        assert_eq!(find("carthage").unwrap().title, "Carthage");
        assert!(find("atlantis").is_none());
    }
}
