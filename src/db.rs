use anyhow::Context;
use rusqlite::{Connection, OptionalExtension};
use std::path::Path;

pub const DB_FILE_NAME: &str = "carbond.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace).with_context(|| {
        format!(
            "failed to create workspace {}",
            workspace.to_string_lossy()
        )
    })?;
    let db_path = workspace.join(DB_FILE_NAME);
    let conn = Connection::open(&db_path)
        .with_context(|| format!("failed to open {}", db_path.to_string_lossy()))?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;
    create_schema(&conn)?;
    Ok(conn)
}

pub fn create_schema(conn: &Connection) -> anyhow::Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings(
            key TEXT PRIMARY KEY,
            value_json TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS users(
            id TEXT PRIMARY KEY,
            username TEXT NOT NULL UNIQUE,
            email TEXT NOT NULL DEFAULT '',
            password_hash TEXT NOT NULL,
            full_name TEXT NOT NULL DEFAULT '',
            region TEXT NOT NULL DEFAULT '',
            country TEXT NOT NULL DEFAULT '',
            is_staff INTEGER NOT NULL DEFAULT 0,
            registered_on TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS footprint_records(
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            recorded_at TEXT NOT NULL,
            total REAL NOT NULL DEFAULT 0,
            consumption REAL NOT NULL DEFAULT 0,
            transport REAL NOT NULL DEFAULT 0,
            energy REAL NOT NULL DEFAULT 0,
            waste REAL NOT NULL DEFAULT 0,
            recycling_reduction REAL NOT NULL DEFAULT 0,
            FOREIGN KEY(user_id) REFERENCES users(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_footprint_records_user ON footprint_records(user_id, recorded_at)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS consumption_details(
            record_id TEXT PRIMARY KEY,
            red_meat_kg REAL NOT NULL DEFAULT 0,
            poultry_kg REAL NOT NULL DEFAULT 0,
            fish_kg REAL NOT NULL DEFAULT 0,
            dairy_kg REAL NOT NULL DEFAULT 0,
            fruit_vegetables_kg REAL NOT NULL DEFAULT 0,
            imported_food_percent REAL NOT NULL DEFAULT 0,
            new_clothing_items INTEGER NOT NULL DEFAULT 0,
            electronics_devices INTEGER NOT NULL DEFAULT 0,
            online_orders INTEGER NOT NULL DEFAULT 0,
            FOREIGN KEY(record_id) REFERENCES footprint_records(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS transport_details(
            record_id TEXT PRIMARY KEY,
            gasoline_car_km REAL NOT NULL DEFAULT 0,
            diesel_car_km REAL NOT NULL DEFAULT 0,
            hybrid_car_km REAL NOT NULL DEFAULT 0,
            electric_car_km REAL NOT NULL DEFAULT 0,
            bus_km REAL NOT NULL DEFAULT 0,
            rail_km REAL NOT NULL DEFAULT 0,
            short_flights INTEGER NOT NULL DEFAULT 0,
            medium_flights INTEGER NOT NULL DEFAULT 0,
            long_flights INTEGER NOT NULL DEFAULT 0,
            FOREIGN KEY(record_id) REFERENCES footprint_records(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS energy_details(
            record_id TEXT PRIMARY KEY,
            electricity_kwh REAL NOT NULL DEFAULT 0,
            renewable_percent REAL NOT NULL DEFAULT 0,
            natural_gas_m3 REAL NOT NULL DEFAULT 0,
            water_m3 REAL NOT NULL DEFAULT 0,
            heating_type TEXT NOT NULL DEFAULT 'none',
            heating_consumption REAL NOT NULL DEFAULT 0,
            FOREIGN KEY(record_id) REFERENCES footprint_records(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS waste_details(
            record_id TEXT PRIMARY KEY,
            total_waste_kg REAL NOT NULL DEFAULT 0,
            composted_kg REAL NOT NULL DEFAULT 0,
            FOREIGN KEY(record_id) REFERENCES footprint_records(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS materials(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            material_type TEXT NOT NULL DEFAULT 'other',
            unit TEXT NOT NULL DEFAULT 'kg',
            value_per_unit REAL NOT NULL DEFAULT 0,
            co2_reduction_factor REAL NOT NULL DEFAULT 0
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_materials_type ON materials(material_type)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS recycling_records(
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            footprint_record_id TEXT,
            recorded_at TEXT NOT NULL,
            total_kg REAL NOT NULL DEFAULT 0,
            economic_value REAL NOT NULL DEFAULT 0,
            co2_reduction REAL NOT NULL DEFAULT 0,
            FOREIGN KEY(user_id) REFERENCES users(id),
            FOREIGN KEY(footprint_record_id) REFERENCES footprint_records(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_recycling_records_user ON recycling_records(user_id, recorded_at)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_recycling_records_footprint ON recycling_records(footprint_record_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS recycled_materials(
            id TEXT PRIMARY KEY,
            recycling_record_id TEXT NOT NULL,
            material_id TEXT NOT NULL,
            quantity REAL NOT NULL DEFAULT 0,
            unit TEXT NOT NULL DEFAULT 'kg',
            economic_value REAL NOT NULL DEFAULT 0,
            co2_reduction REAL NOT NULL DEFAULT 0,
            sort_order INTEGER NOT NULL,
            FOREIGN KEY(recycling_record_id) REFERENCES recycling_records(id),
            FOREIGN KEY(material_id) REFERENCES materials(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_recycled_materials_record ON recycled_materials(recycling_record_id, sort_order)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS emission_factors(
            id TEXT PRIMARY KEY,
            category TEXT NOT NULL,
            subcategory TEXT NOT NULL DEFAULT '',
            description TEXT NOT NULL DEFAULT '',
            value REAL NOT NULL,
            unit TEXT NOT NULL,
            region TEXT NOT NULL DEFAULT '',
            updated_on TEXT NOT NULL,
            source TEXT NOT NULL DEFAULT ''
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_emission_factors_lookup ON emission_factors(category, subcategory, region)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS recommendations(
            id TEXT PRIMARY KEY,
            category TEXT NOT NULL DEFAULT 'general',
            description TEXT NOT NULL,
            potential_impact REAL NOT NULL DEFAULT 0,
            difficulty INTEGER NOT NULL DEFAULT 1,
            estimated_savings REAL NOT NULL DEFAULT 0
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_recommendations_category ON recommendations(category)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS user_recommendations(
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            recommendation_id TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending',
            assigned_at TEXT NOT NULL,
            implemented_at TEXT,
            actual_impact REAL,
            FOREIGN KEY(user_id) REFERENCES users(id),
            FOREIGN KEY(recommendation_id) REFERENCES recommendations(id),
            UNIQUE(user_id, recommendation_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_user_recommendations_user ON user_recommendations(user_id)",
        [],
    )?;

    Ok(())
}

pub fn settings_get_json(conn: &Connection, key: &str) -> anyhow::Result<Option<serde_json::Value>> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT value_json FROM settings WHERE key = ?",
            [key],
            |r| r.get(0),
        )
        .optional()?;
    let Some(raw) = raw else {
        return Ok(None);
    };
    let value = serde_json::from_str(&raw)
        .with_context(|| format!("malformed settings value for {}", key))?;
    Ok(Some(value))
}

pub fn settings_set_json(
    conn: &Connection,
    key: &str,
    value: &serde_json::Value,
) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO settings(key, value_json) VALUES(?, ?)
         ON CONFLICT(key) DO UPDATE SET value_json = excluded.value_json",
        (key, serde_json::to_string(value)?),
    )?;
    Ok(())
}

pub fn table_count(conn: &Connection, table: &str) -> anyhow::Result<i64> {
    let sql = format!("SELECT COUNT(*) FROM {}", table);
    Ok(conn.query_row(&sql, [], |r| r.get(0))?)
}
