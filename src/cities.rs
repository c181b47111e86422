//! Static city registry and deterministic zone-grid derivation (§3, §4.2a).

use serde::{Deserialize, Serialize};

/// A bounding box as (south, west, north, east) in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub south: f64,
    pub west: f64,
    pub north: f64,
    pub east: f64,
}

/// Static catalog entry. Immutable at runtime; created once from
/// [`registry`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct City {
    pub id: String,
    pub name: String,
    pub state: String,
    pub country: String,
    pub center_lat: f64,
    pub center_lon: f64,
    pub bbox: BoundingBox,
    pub num_zones: u32,
    pub population: u64,
    pub area_km2: f64,
    pub timezone: String,
}

/// A regular-grid cell derived from a city's bounding box.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Zone {
    pub zone_id: String,
    pub center_lat: f64,
    pub center_lon: f64,
    pub bbox: BoundingBox,
    pub row: u32,
    pub col: u32,
}

/// The six-city static registry, ported from the reference city-config
/// service (see `DESIGN.md`).
pub fn registry() -> &'static [City] {
    static CITIES: std::sync::OnceLock<Vec<City>> = std::sync::OnceLock::new();
    CITIES.get_or_init(|| {
        vec![
            City {
                id: "nyc".into(),
                name: "New York City".into(),
                state: "NY".into(),
                country: "US".into(),
                center_lat: 40.7128,
                center_lon: -74.0060,
                bbox: BoundingBox {
                    south: 40.4957,
                    west: -74.2557,
                    north: 40.9176,
                    east: -73.7002,
                },
                num_zones: 40,
                population: 8_336_817,
                area_km2: 783.8,
                timezone: "America/New_York".into(),
            },
            City {
                id: "chicago".into(),
                name: "Chicago".into(),
                state: "IL".into(),
                country: "US".into(),
                center_lat: 41.8781,
                center_lon: -87.6298,
                bbox: BoundingBox {
                    south: 41.6445,
                    west: -87.9401,
                    north: 42.0230,
                    east: -87.5240,
                },
                num_zones: 25,
                population: 2_693_976,
                area_km2: 606.1,
                timezone: "America/Chicago".into(),
            },
            City {
                id: "la".into(),
                name: "Los Angeles".into(),
                state: "CA".into(),
                country: "US".into(),
                center_lat: 34.0522,
                center_lon: -118.2437,
                bbox: BoundingBox {
                    south: 33.7037,
                    west: -118.6682,
                    north: 34.3373,
                    east: -118.1553,
                },
                num_zones: 35,
                population: 3_898_747,
                area_km2: 1_302.0,
                timezone: "America/Los_Angeles".into(),
            },
            City {
                id: "sf".into(),
                name: "San Francisco".into(),
                state: "CA".into(),
                country: "US".into(),
                center_lat: 37.7749,
                center_lon: -122.4194,
                bbox: BoundingBox {
                    south: 37.7080,
                    west: -122.5149,
                    north: 37.8324,
                    east: -122.3569,
                },
                num_zones: 12,
                population: 873_965,
                area_km2: 121.4,
                timezone: "America/Los_Angeles".into(),
            },
            City {
                id: "houston".into(),
                name: "Houston".into(),
                state: "TX".into(),
                country: "US".into(),
                center_lat: 29.7604,
                center_lon: -95.3698,
                bbox: BoundingBox {
                    south: 29.5230,
                    west: -95.7900,
                    north: 30.1100,
                    east: -95.0140,
                },
                num_zones: 25,
                population: 2_304_580,
                area_km2: 1_651.1,
                timezone: "America/Chicago".into(),
            },
            City {
                id: "phoenix".into(),
                name: "Phoenix".into(),
                state: "AZ".into(),
                country: "US".into(),
                center_lat: 33.4484,
                center_lon: -112.0740,
                bbox: BoundingBox {
                    south: 33.2903,
                    west: -112.3250,
                    north: 33.7810,
                    east: -111.8260,
                },
                num_zones: 20,
                population: 1_608_139,
                area_km2: 1_340.6,
                timezone: "America/Phoenix".into(),
            },
        ]
    })
}

/// Look up a city by its (case-insensitive) slug.
pub fn find(city_id: &str) -> Option<&'static City> {
    let needle = city_id.to_lowercase();
    registry().iter().find(|c| c.id == needle)
}

/// Deterministically derive a city's zone grid from its bounding box and
/// target zone count (§4.2a). Pure and side-effect free; callers may
/// recompute on every call rather than caching.
pub fn derive_zones(city: &City) -> Vec<Zone> {
    let n = city.num_zones.max(1) as f64;
    let lat_range = city.bbox.north - city.bbox.south;
    let lon_range = city.bbox.east - city.bbox.west;

    let cols = ((n * lon_range / lat_range).sqrt().ceil() as u32).max(1);
    let rows = ((city.num_zones as f64 / cols as f64).ceil() as u32).max(1);

    let mut zones = Vec::with_capacity(city.num_zones as usize);
    let mut idx: u32 = 0;

    'outer: for row in 0..rows {
        for col in 0..cols {
            if idx >= city.num_zones {
                break 'outer;
            }
            let south = city.bbox.south + lat_range * (row as f64 / rows as f64);
            let north = city.bbox.south + lat_range * ((row + 1) as f64 / rows as f64);
            let west = city.bbox.west + lon_range * (col as f64 / cols as f64);
            let east = city.bbox.west + lon_range * ((col + 1) as f64 / cols as f64);

            idx += 1;
            zones.push(Zone {
                zone_id: format!("Z_{idx:03}"),
                center_lat: (south + north) / 2.0,
                center_lon: (west + east) / 2.0,
                bbox: BoundingBox {
                    south,
                    west,
                    north,
                    east,
                },
                row,
                col,
            });
        }
    }

    zones
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_has_six_cities() {
        assert_eq!(registry().len(), 6);
    }

    #[test]
    fn find_is_case_insensitive() {
        assert!(find("NYC").is_some());
        assert!(find("nyc").is_some());
        assert!(find("atlantis").is_none());
    }

    #[test]
    fn derive_zones_produces_exactly_num_zones() {
        for city in registry() {
            let zones = derive_zones(city);
            assert_eq!(zones.len(), city.num_zones as usize);
        }
    }

    #[test]
    fn derive_zones_ids_are_unique_and_sequential() {
        let city = find("sf").unwrap();
        let zones = derive_zones(city);
        for (i, zone) in zones.iter().enumerate() {
            assert_eq!(zone.zone_id, format!("Z_{:03}", i + 1));
        }
    }

    #[test]
    fn derive_zones_centres_within_bbox() {
        let city = find("nyc").unwrap();
        for zone in derive_zones(city) {
            assert!(zone.center_lat >= city.bbox.south && zone.center_lat <= city.bbox.north);
            assert!(zone.center_lon >= city.bbox.west && zone.center_lon <= city.bbox.east);
        }
    }

    #[test]
    fn derive_zones_is_deterministic() {
        let city = find("chicago").unwrap();
        assert_eq!(derive_zones(city), derive_zones(city));
    }
}
