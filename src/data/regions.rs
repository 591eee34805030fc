//! Static data for Scotland's whisky storage regions
//!
//! Coordinates, warehouse characteristics and historical November conditions
//! used when no live or cached weather is available.

use super::{HistoricalConditions, Region};

/// The five tracked regions
pub static REGIONS: [Region; 5] = [
    Region {
        id: "edinburgh",
        name: "Edinburgh",
        kind: "capital_hub",
        latitude: 55.9533,
        longitude: -3.1883,
        coastal: true,
        storage_type: "Coastal warehouses, modern racked facilities",
        historical: HistoricalConditions {
            ambient_temp: 7.5,
            humidity: 78.0,
            wind_speed: 4.2,
        },
    },
    Region {
        id: "glasgow",
        name: "Glasgow",
        kind: "trade_center",
        latitude: 55.8642,
        longitude: -4.2518,
        coastal: false,
        storage_type: "Urban warehouses, traditional dunnage",
        historical: HistoricalConditions {
            ambient_temp: 7.2,
            humidity: 76.0,
            wind_speed: 4.5,
        },
    },
    Region {
        id: "islay",
        name: "Islay",
        kind: "island_production",
        latitude: 55.7558,
        longitude: -6.2094,
        coastal: true,
        storage_type: "Coastal dunnage warehouses",
        historical: HistoricalConditions {
            ambient_temp: 9.0,
            humidity: 82.0,
            wind_speed: 6.5,
        },
    },
    Region {
        id: "aberlour",
        name: "Aberlour (Speyside)",
        kind: "production_heartland",
        latitude: 57.4833,
        longitude: -3.2167,
        coastal: false,
        storage_type: "Traditional dunnage, modern palletized",
        historical: HistoricalConditions {
            ambient_temp: 5.5,
            humidity: 72.0,
            wind_speed: 3.0,
        },
    },
    Region {
        id: "dufftown",
        name: "Dufftown (Speyside)",
        kind: "whisky_capital",
        latitude: 57.4500,
        longitude: -3.1333,
        coastal: false,
        storage_type: "Traditional Speyside warehouses",
        historical: HistoricalConditions {
            ambient_temp: 5.8,
            humidity: 73.0,
            wind_speed: 2.8,
        },
    },
];

/// Returns all tracked regions
pub fn all_regions() -> &'static [Region] {
    &REGIONS
}

/// Looks up a region by its id (case sensitive)
pub fn get_region_by_id(id: &str) -> Option<&'static Region> {
    REGIONS.iter().find(|r| r.id == id)
}
