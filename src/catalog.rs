use crate::calc::{self, Category, HeatingType, MaterialType};
use crate::db;
use anyhow::Context;
use rusqlite::Connection;
use serde_json::json;
use uuid::Uuid;

const SEEDED_KEY: &str = "catalog.seeded";
const DEFAULT_SOURCE: &str = "carbond built-in defaults";
const DEFAULT_FACTOR_DATE: &str = "2024-01-01";

struct MaterialSeed {
    name: &'static str,
    material_type: MaterialType,
    value_per_unit: f64,
    co2_reduction_factor: f64,
}

const MATERIALS: &[MaterialSeed] = &[
    MaterialSeed {
        name: "Cardboard",
        material_type: MaterialType::Paper,
        value_per_unit: 1.5,
        co2_reduction_factor: 0.9,
    },
    MaterialSeed {
        name: "Office paper",
        material_type: MaterialType::Paper,
        value_per_unit: 2.0,
        co2_reduction_factor: 1.1,
    },
    MaterialSeed {
        name: "Glass bottles",
        material_type: MaterialType::Glass,
        value_per_unit: 0.5,
        co2_reduction_factor: 0.3,
    },
    MaterialSeed {
        name: "PET bottles",
        material_type: MaterialType::Plastic,
        value_per_unit: 4.0,
        co2_reduction_factor: 1.5,
    },
    MaterialSeed {
        name: "HDPE containers",
        material_type: MaterialType::Plastic,
        value_per_unit: 3.5,
        co2_reduction_factor: 1.2,
    },
    MaterialSeed {
        name: "Aluminum cans",
        material_type: MaterialType::Metal,
        value_per_unit: 18.0,
        co2_reduction_factor: 9.0,
    },
    MaterialSeed {
        name: "Scrap steel",
        material_type: MaterialType::Metal,
        value_per_unit: 3.0,
        co2_reduction_factor: 1.5,
    },
    MaterialSeed {
        name: "Kitchen scraps",
        material_type: MaterialType::Organic,
        value_per_unit: 0.0,
        co2_reduction_factor: calc::COMPOSTING_FACTOR,
    },
    MaterialSeed {
        name: "Small electronics",
        material_type: MaterialType::Electronic,
        value_per_unit: 10.0,
        co2_reduction_factor: 2.0,
    },
    MaterialSeed {
        name: "Used clothing",
        material_type: MaterialType::Textile,
        value_per_unit: 2.0,
        co2_reduction_factor: 3.6,
    },
    MaterialSeed {
        name: "Tetra Pak cartons",
        material_type: MaterialType::Other,
        value_per_unit: 0.8,
        co2_reduction_factor: 0.5,
    },
];

struct FactorSeed {
    category: &'static str,
    subcategory: &'static str,
    description: &'static str,
    value: f64,
    unit: &'static str,
}

const FACTORS: &[FactorSeed] = &[
    FactorSeed {
        category: "food",
        subcategory: "red_meat",
        description: "Beef, lamb and pork",
        value: calc::RED_MEAT_FACTOR,
        unit: "kg CO2/kg",
    },
    FactorSeed {
        category: "food",
        subcategory: "poultry",
        description: "Chicken and other poultry",
        value: calc::POULTRY_FACTOR,
        unit: "kg CO2/kg",
    },
    FactorSeed {
        category: "food",
        subcategory: "fish",
        description: "Fish and seafood",
        value: calc::FISH_FACTOR,
        unit: "kg CO2/kg",
    },
    FactorSeed {
        category: "food",
        subcategory: "dairy",
        description: "Milk, cheese and yogurt",
        value: calc::DAIRY_FACTOR,
        unit: "kg CO2/kg",
    },
    FactorSeed {
        category: "food",
        subcategory: "fruit_vegetables",
        description: "Fruit and vegetables",
        value: calc::FRUIT_VEGETABLES_FACTOR,
        unit: "kg CO2/kg",
    },
    FactorSeed {
        category: "purchases",
        subcategory: "clothing",
        description: "New clothing item",
        value: calc::CLOTHING_FACTOR,
        unit: "kg CO2/item",
    },
    FactorSeed {
        category: "purchases",
        subcategory: "electronics",
        description: "New electronic device",
        value: calc::ELECTRONICS_FACTOR,
        unit: "kg CO2/device",
    },
    FactorSeed {
        category: "purchases",
        subcategory: "online_order",
        description: "Online order including delivery",
        value: calc::ONLINE_ORDER_FACTOR,
        unit: "kg CO2/order",
    },
    FactorSeed {
        category: "transport",
        subcategory: "gasoline_car",
        description: "Gasoline car",
        value: calc::GASOLINE_CAR_FACTOR,
        unit: "kg CO2/km",
    },
    FactorSeed {
        category: "transport",
        subcategory: "diesel_car",
        description: "Diesel car",
        value: calc::DIESEL_CAR_FACTOR,
        unit: "kg CO2/km",
    },
    FactorSeed {
        category: "transport",
        subcategory: "hybrid_car",
        description: "Hybrid car",
        value: calc::HYBRID_CAR_FACTOR,
        unit: "kg CO2/km",
    },
    FactorSeed {
        category: "transport",
        subcategory: "electric_car",
        description: "Electric car, average grid mix",
        value: calc::ELECTRIC_CAR_FACTOR,
        unit: "kg CO2/km",
    },
    FactorSeed {
        category: "transport",
        subcategory: "bus",
        description: "Bus, per passenger",
        value: calc::BUS_FACTOR,
        unit: "kg CO2/passenger km",
    },
    FactorSeed {
        category: "transport",
        subcategory: "rail",
        description: "Train and metro, per passenger",
        value: calc::RAIL_FACTOR,
        unit: "kg CO2/passenger km",
    },
    FactorSeed {
        category: "flights",
        subcategory: "short",
        description: "Flight under 1000 km",
        value: calc::SHORT_FLIGHT_FACTOR,
        unit: "kg CO2/flight",
    },
    FactorSeed {
        category: "flights",
        subcategory: "medium",
        description: "Flight between 1000 and 3000 km",
        value: calc::MEDIUM_FLIGHT_FACTOR,
        unit: "kg CO2/flight",
    },
    FactorSeed {
        category: "flights",
        subcategory: "long",
        description: "Flight over 3000 km",
        value: calc::LONG_FLIGHT_FACTOR,
        unit: "kg CO2/flight",
    },
    FactorSeed {
        category: "energy",
        subcategory: "electricity",
        description: "Grid electricity",
        value: calc::ELECTRICITY_FACTOR,
        unit: "kg CO2/kWh",
    },
    FactorSeed {
        category: "energy",
        subcategory: "water",
        description: "Water treatment and distribution",
        value: calc::WATER_FACTOR,
        unit: "kg CO2/m3",
    },
    FactorSeed {
        category: "waste",
        subcategory: "landfill",
        description: "Mixed household waste",
        value: calc::WASTE_FACTOR,
        unit: "kg CO2/kg",
    },
    FactorSeed {
        category: "waste",
        subcategory: "composting",
        description: "Avoided emissions per kg composted",
        value: calc::COMPOSTING_FACTOR,
        unit: "kg CO2/kg",
    },
];

struct RecommendationSeed {
    category: Category,
    description: &'static str,
    potential_impact: f64,
    difficulty: i64,
    estimated_savings: f64,
}

const RECOMMENDATIONS: &[RecommendationSeed] = &[
    RecommendationSeed {
        category: Category::Consumption,
        description: "Replace red meat with legumes or poultry three days a week",
        potential_impact: 60.0,
        difficulty: 2,
        estimated_savings: 400.0,
    },
    RecommendationSeed {
        category: Category::Consumption,
        description: "Buy second-hand clothing instead of new garments",
        potential_impact: 25.0,
        difficulty: 1,
        estimated_savings: 300.0,
    },
    RecommendationSeed {
        category: Category::Transport,
        description: "Use public transport for your daily commute",
        potential_impact: 80.0,
        difficulty: 3,
        estimated_savings: 900.0,
    },
    RecommendationSeed {
        category: Category::Transport,
        description: "Replace one short flight per year with a train trip",
        potential_impact: 15.0,
        difficulty: 2,
        estimated_savings: 0.0,
    },
    RecommendationSeed {
        category: Category::Energy,
        description: "Switch to an electricity plan with renewable supply",
        potential_impact: 50.0,
        difficulty: 2,
        estimated_savings: 0.0,
    },
    RecommendationSeed {
        category: Category::Energy,
        description: "Replace incandescent bulbs with LED lighting",
        potential_impact: 10.0,
        difficulty: 1,
        estimated_savings: 150.0,
    },
    RecommendationSeed {
        category: Category::Waste,
        description: "Start composting kitchen scraps",
        potential_impact: 12.0,
        difficulty: 2,
        estimated_savings: 0.0,
    },
    RecommendationSeed {
        category: Category::Waste,
        description: "Avoid single-use packaging when shopping",
        potential_impact: 6.0,
        difficulty: 1,
        estimated_savings: 100.0,
    },
    RecommendationSeed {
        category: Category::Recycling,
        description: "Separate aluminum cans and sell them to a collection center",
        potential_impact: 9.0,
        difficulty: 1,
        estimated_savings: 120.0,
    },
    RecommendationSeed {
        category: Category::Recycling,
        description: "Take old electronics to a certified recycler",
        potential_impact: 20.0,
        difficulty: 3,
        estimated_savings: 50.0,
    },
    RecommendationSeed {
        category: Category::General,
        description: "Track your footprint every month to spot trends",
        potential_impact: 5.0,
        difficulty: 1,
        estimated_savings: 0.0,
    },
    RecommendationSeed {
        category: Category::General,
        description: "Share a car pool with neighbours or coworkers",
        potential_impact: 40.0,
        difficulty: 3,
        estimated_savings: 600.0,
    },
    RecommendationSeed {
        category: Category::General,
        description: "Lower the thermostat by one degree in winter",
        potential_impact: 18.0,
        difficulty: 1,
        estimated_savings: 200.0,
    },
];

struct HeatingFactor {
    subcategory: String,
    description: String,
    value: f64,
}

/// One `energy/heating_<code>` factor per heating type that emits.
fn heating_factors() -> Vec<HeatingFactor> {
    HeatingType::ALL
        .iter()
        .filter(|h| **h != HeatingType::None)
        .map(|h| HeatingFactor {
            subcategory: heating_subcategory(*h),
            description: format!("Space heating ({})", h.code().replace('_', " ")),
            value: h.factor(),
        })
        .collect()
}

fn heating_subcategory(h: HeatingType) -> String {
    format!("heating_{}", h.code().trim_start_matches("heating_"))
}

fn insert_factor(
    conn: &Connection,
    category: &str,
    subcategory: &str,
    description: &str,
    value: f64,
    unit: &str,
) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO emission_factors(id, category, subcategory, description, value, unit, region, updated_on, source)
         VALUES(?, ?, ?, ?, ?, ?, '', ?, ?)",
        (
            Uuid::new_v4().to_string(),
            category,
            subcategory,
            description,
            value,
            unit,
            DEFAULT_FACTOR_DATE,
            DEFAULT_SOURCE,
        ),
    )?;
    Ok(())
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SeedSummary {
    pub materials: usize,
    pub factors: usize,
    pub recommendations: usize,
}

/// Seeds each reference table that is still empty, once per workspace.
/// Returns `None` when the workspace was already seeded.
pub fn seed_if_needed(conn: &Connection) -> anyhow::Result<Option<SeedSummary>> {
    if db::settings_get_json(conn, SEEDED_KEY)?
        .and_then(|v| v.as_bool())
        .unwrap_or(false)
    {
        return Ok(None);
    }

    let tx = conn
        .unchecked_transaction()
        .context("failed to start catalog seed transaction")?;
    let mut summary = SeedSummary::default();

    if db::table_count(&tx, "materials")? == 0 {
        for m in MATERIALS {
            tx.execute(
                "INSERT INTO materials(id, name, material_type, unit, value_per_unit, co2_reduction_factor)
                 VALUES(?, ?, ?, 'kg', ?, ?)",
                (
                    Uuid::new_v4().to_string(),
                    m.name,
                    m.material_type.code(),
                    m.value_per_unit,
                    m.co2_reduction_factor,
                ),
            )?;
            summary.materials += 1;
        }
    }

    if db::table_count(&tx, "emission_factors")? == 0 {
        for f in FACTORS {
            insert_factor(&tx, f.category, f.subcategory, f.description, f.value, f.unit)?;
            summary.factors += 1;
        }
        for h in heating_factors() {
            insert_factor(&tx, "energy", &h.subcategory, &h.description, h.value, "kg CO2/kWh")?;
            summary.factors += 1;
        }
    }

    if db::table_count(&tx, "recommendations")? == 0 {
        for r in RECOMMENDATIONS {
            tx.execute(
                "INSERT INTO recommendations(id, category, description, potential_impact, difficulty, estimated_savings)
                 VALUES(?, ?, ?, ?, ?, ?)",
                (
                    Uuid::new_v4().to_string(),
                    r.category.code(),
                    r.description,
                    r.potential_impact,
                    r.difficulty,
                    r.estimated_savings,
                ),
            )?;
            summary.recommendations += 1;
        }
    }

    db::settings_set_json(&tx, SEEDED_KEY, &json!(true))?;
    tx.commit().context("failed to commit catalog seed")?;
    Ok(Some(summary))
}
