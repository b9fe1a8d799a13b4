use serde::Serialize;
use uuid::Uuid;

use crate::models::{Listing, Reservation};
use crate::range::DateRange;

pub const DEFAULT_LIMIT: u32 = 20;
pub const MAX_LIMIT: u32 = 100;

/// Search over published, listed listings. Every filter is optional.
#[derive(Debug, Clone, Default)]
pub struct ListingSearch {
    /// Case-insensitive substring of city, state, country or title
    pub location: Option<String>,
    pub guests: Option<i32>,
    pub min_price: Option<i64>,
    pub max_price: Option<i64>,
    pub bedrooms: Option<i32>,
    pub beds: Option<i32>,
    pub bathrooms: Option<i32>,
    /// Any of these categories
    pub category_ids: Vec<Uuid>,
    pub privacy_type_ids: Vec<Uuid>,
    /// Every one of these amenities
    pub amenity_ids: Vec<Uuid>,
    pub host_types: Vec<String>,
    /// Excludes listings with an active reservation overlapping the stay
    pub range: Option<DateRange>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

impl ListingSearch {
    pub fn limit(&self) -> u32 {
        self.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT)
    }

    pub fn offset(&self) -> u32 {
        self.offset.unwrap_or(0)
    }

    /// Empty location strings behave as "no location filter".
    pub fn location_pattern(&self) -> Option<String> {
        self.location
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_lowercase)
    }

    /// Non-positive minimums are ignored, as the search form sends 0 for "any".
    pub fn matches(&self, listing: &Listing) -> bool {
        if !listing.is_bookable() {
            return false;
        }
        if let Some(pattern) = self.location_pattern() {
            let hit = [&listing.city, &listing.state, &listing.country]
                .into_iter()
                .flatten()
                .chain(std::iter::once(&listing.title))
                .any(|field| field.to_lowercase().contains(&pattern));
            if !hit {
                return false;
            }
        }
        let at_least = |min: Option<i32>, value: i32| min.filter(|m| *m > 0).map_or(true, |m| value >= m);
        at_least(self.guests, listing.guest_count)
            && at_least(self.bedrooms, listing.bedroom_count)
            && at_least(self.beds, listing.bed_count)
            && at_least(self.bathrooms, listing.bathroom_count)
            && self.min_price.map_or(true, |p| listing.price >= p)
            && self.max_price.map_or(true, |p| listing.price <= p)
            && any_of(&self.category_ids, listing.category_id.as_ref())
            && any_of(&self.privacy_type_ids, listing.privacy_type_id.as_ref())
            && any_of(&self.host_types, listing.host_type.as_ref())
            && self.amenity_ids.iter().all(|a| listing.amenity_ids.contains(a))
    }
}

/// An empty filter list accepts everything; otherwise the value must be set and listed.
fn any_of<T: PartialEq>(wanted: &[T], value: Option<&T>) -> bool {
    wanted.is_empty() || value.is_some_and(|v| wanted.contains(v))
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchPage {
    pub listings: Vec<Listing>,
    pub total: i64,
}

/// A guest's reservations as shown on the trips page.
#[derive(Debug, Clone, Serialize)]
pub struct Trips {
    pub upcoming: Vec<Reservation>,
    pub past: Vec<Reservation>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn listing() -> Listing {
        Listing {
            id: Uuid::new_v4(),
            host_id: Uuid::new_v4(),
            title: "Fjord view loft".to_string(),
            city: Some("Bergen".to_string()),
            state: Some("Vestland".to_string()),
            country: Some("Norway".to_string()),
            price: 1200,
            weekend_price: Some(1500),
            guest_count: 4,
            bedroom_count: 2,
            bed_count: 3,
            bathroom_count: 1,
            category_id: None,
            privacy_type_id: None,
            amenity_ids: Vec::new(),
            host_type: None,
            is_published: true,
            is_listed: true,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn location_matches_any_field_case_insensitively() {
        let l = listing();
        for location in ["bergen", "VESTLAND", "norw", "fjord"] {
            let q = ListingSearch {
                location: Some(location.to_string()),
                ..Default::default()
            };
            assert!(q.matches(&l), "{}", location);
        }
        let q = ListingSearch {
            location: Some("Oslo".to_string()),
            ..Default::default()
        };
        assert!(!q.matches(&l));
    }

    #[test]
    fn capacity_and_price_filters() {
        let l = listing();
        let fits = ListingSearch {
            guests: Some(4),
            bedrooms: Some(0),
            min_price: Some(1000),
            max_price: Some(1200),
            ..Default::default()
        };
        assert!(fits.matches(&l));

        let too_many = ListingSearch {
            guests: Some(5),
            ..Default::default()
        };
        assert!(!too_many.matches(&l));

        let too_cheap = ListingSearch {
            max_price: Some(1199),
            ..Default::default()
        };
        assert!(!too_cheap.matches(&l));
    }

    #[test]
    fn attribute_filters() {
        let wifi = Uuid::new_v4();
        let sauna = Uuid::new_v4();
        let cabin = Uuid::new_v4();
        let mut l = listing();
        l.category_id = Some(cabin);
        l.amenity_ids = vec![wifi, sauna];
        l.host_type = Some("individual".to_string());

        let q = ListingSearch {
            category_ids: vec![Uuid::new_v4(), cabin],
            amenity_ids: vec![sauna, wifi],
            host_types: vec!["individual".to_string()],
            ..Default::default()
        };
        assert!(q.matches(&l));

        let needs_more = ListingSearch {
            amenity_ids: vec![wifi, Uuid::new_v4()],
            ..Default::default()
        };
        assert!(!needs_more.matches(&l));

        // A listing without a privacy type never matches a privacy filter.
        let private_room = ListingSearch {
            privacy_type_ids: vec![Uuid::new_v4()],
            ..Default::default()
        };
        assert!(!private_room.matches(&l));

        let business = ListingSearch {
            host_types: vec!["business".to_string()],
            ..Default::default()
        };
        assert!(!business.matches(&l));
    }

    #[test]
    fn unlisted_never_matches() {
        let mut l = listing();
        l.is_listed = false;
        assert!(!ListingSearch::default().matches(&l));
    }

    #[test]
    fn limit_is_clamped() {
        assert_eq!(ListingSearch::default().limit(), DEFAULT_LIMIT);
        let q = ListingSearch {
            limit: Some(10_000),
            ..Default::default()
        };
        assert_eq!(q.limit(), MAX_LIMIT);
        let q = ListingSearch {
            limit: Some(0),
            ..Default::default()
        };
        assert_eq!(q.limit(), 1);
    }
}
