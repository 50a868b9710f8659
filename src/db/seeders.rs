//! Database seeders for built-in data
//!
//! Destinations and activities are static reference data. They are
//! upserted on every startup so new entries appear without a migration.

use anyhow::Result;
use sqlx::SqlitePool;
use tracing::info;

/// (id, name, region, description, latitude, longitude)
type DestinationSeed = (&'static str, &'static str, &'static str, &'static str, f64, f64);

/// (id, name, category, description)
type ActivitySeed = (&'static str, &'static str, &'static str, &'static str);

const DESTINATIONS: &[DestinationSeed] = &[
    (
        "hanoi",
        "Hanoi",
        "north",
        "The capital: Old Quarter alleys, lakes and the best pho in the country.",
        21.0285,
        105.8542,
    ),
    (
        "ha-long-bay",
        "Ha Long Bay",
        "north",
        "Limestone karsts and emerald water, best explored by boat or kayak.",
        20.9101,
        107.1839,
    ),
    (
        "sa-pa",
        "Sa Pa",
        "north",
        "Rice terraces and hill-tribe villages in the Hoang Lien Son mountains.",
        22.3364,
        103.8438,
    ),
    (
        "hue",
        "Hue",
        "central",
        "Imperial citadel, royal tombs and the Perfume River.",
        16.4637,
        107.5909,
    ),
    (
        "da-nang",
        "Da Nang",
        "central",
        "Beaches, the Marble Mountains and the road over the Hai Van Pass.",
        16.0544,
        108.2022,
    ),
    (
        "hoi-an",
        "Hoi An",
        "central",
        "Lantern-lit ancient town, tailors and countryside cycling.",
        15.8801,
        108.3380,
    ),
    (
        "ho-chi-minh-city",
        "Ho Chi Minh City",
        "south",
        "Saigon's street food, markets and a gateway to the Mekong Delta.",
        10.8231,
        106.6297,
    ),
];

const ACTIVITIES: &[ActivitySeed] = &[
    ("street-food-tour", "Street food tour", "food", "Taste local dishes at stalls only locals know."),
    ("motorbike-ride", "Motorbike ride", "adventure", "See the city or the passes from the back of a bike."),
    ("cooking-class", "Cooking class", "food", "Market visit followed by a hands-on cooking lesson."),
    ("kayaking", "Kayaking", "adventure", "Paddle through caves and floating villages."),
    ("trekking", "Trekking", "adventure", "Guided hikes through terraces and villages."),
    ("heritage-walk", "Heritage walk", "culture", "Temples, pagodas and the stories behind them."),
    ("night-market", "Night market", "culture", "Shopping and snacks after dark."),
    ("photography", "Photography tour", "culture", "Golden-hour spots and local portraits."),
    ("cycling", "Countryside cycling", "adventure", "Rice paddies and craft villages by bicycle."),
    ("mekong-boat-trip", "Mekong boat trip", "nature", "Floating markets and fruit orchards."),
];

const DESTINATION_ACTIVITIES: &[(&str, &[&str])] = &[
    ("hanoi", &["street-food-tour", "motorbike-ride", "heritage-walk", "night-market", "cooking-class"]),
    ("ha-long-bay", &["kayaking", "photography"]),
    ("sa-pa", &["trekking", "photography"]),
    ("hue", &["heritage-walk", "cycling", "street-food-tour"]),
    ("da-nang", &["motorbike-ride", "street-food-tour", "photography"]),
    ("hoi-an", &["cooking-class", "cycling", "night-market", "heritage-walk"]),
    ("ho-chi-minh-city", &["street-food-tour", "motorbike-ride", "mekong-boat-trip", "night-market"]),
];

/// Seed destinations, activities and their links (runs on every startup)
pub async fn seed_reference_data(pool: &SqlitePool) -> Result<()> {
    info!("Seeding destinations and activities...");

    for &(id, name, region, description, latitude, longitude) in DESTINATIONS {
        sqlx::query(
            r#"
            INSERT INTO destinations (id, name, region, description, latitude, longitude)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                region = excluded.region,
                description = excluded.description,
                latitude = excluded.latitude,
                longitude = excluded.longitude
            "#,
        )
        .bind(id)
        .bind(name)
        .bind(region)
        .bind(description)
        .bind(latitude)
        .bind(longitude)
        .execute(pool)
        .await?;
    }

    for &(id, name, category, description) in ACTIVITIES {
        sqlx::query(
            r#"
            INSERT INTO activities (id, name, category, description)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                category = excluded.category,
                description = excluded.description
            "#,
        )
        .bind(id)
        .bind(name)
        .bind(category)
        .bind(description)
        .execute(pool)
        .await?;
    }

    for &(destination_id, activity_ids) in DESTINATION_ACTIVITIES {
        for &activity_id in activity_ids {
            sqlx::query(
                "INSERT OR IGNORE INTO destination_activities (destination_id, activity_id) VALUES (?, ?)",
            )
            .bind(destination_id)
            .bind(activity_id)
            .execute(pool)
            .await?;
        }
    }

    info!(
        destinations = DESTINATIONS.len(),
        activities = ACTIVITIES.len(),
        "Reference data seeded"
    );
    Ok(())
}
