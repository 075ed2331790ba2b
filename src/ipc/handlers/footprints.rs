use crate::calc::{
    self, ConsumptionDetail, EnergyDetail, FootprintBreakdown, FootprintDetails, HeatingType,
    TransportDetail, WasteDetail,
};
use crate::ipc::helpers::{
    now_ts, opt_str, parse_timestamp, required_str, run_authenticated, Handler, HandlerErr,
    Session,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct RecordRow {
    pub id: String,
    pub user_id: String,
    pub recorded_at: String,
    pub breakdown: FootprintBreakdown,
}

const RECORD_COLUMNS: &str =
    "id, user_id, recorded_at, consumption, transport, energy, waste, recycling_reduction, total";

fn record_from_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<RecordRow> {
    Ok(RecordRow {
        id: r.get(0)?,
        user_id: r.get(1)?,
        recorded_at: r.get(2)?,
        breakdown: FootprintBreakdown {
            consumption: r.get(3)?,
            transport: r.get(4)?,
            energy: r.get(5)?,
            waste: r.get(6)?,
            recycling_reduction: r.get(7)?,
            total: r.get(8)?,
        },
    })
}

/// Loads a record owned by `user_id`; other users' records read as missing.
pub fn owned_record(conn: &Connection, user_id: &str, record_id: &str) -> Result<RecordRow, HandlerErr> {
    conn.query_row(
        &format!(
            "SELECT {} FROM footprint_records WHERE id = ? AND user_id = ?",
            RECORD_COLUMNS
        ),
        [record_id, user_id],
        record_from_row,
    )
    .optional()
    .map_err(|e| HandlerErr::db("db_query_failed", e))?
    .ok_or_else(|| HandlerErr::not_found("footprint record not found"))
}

fn user_records(conn: &Connection, user_id: &str) -> Result<Vec<RecordRow>, HandlerErr> {
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {} FROM footprint_records WHERE user_id = ? ORDER BY recorded_at DESC, rowid DESC",
            RECORD_COLUMNS
        ))
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    stmt.query_map([user_id], record_from_row)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| HandlerErr::db("db_query_failed", e))
}

pub fn latest_record(conn: &Connection, user_id: &str) -> Result<Option<RecordRow>, HandlerErr> {
    conn.query_row(
        &format!(
            "SELECT {} FROM footprint_records WHERE user_id = ? ORDER BY recorded_at DESC, rowid DESC LIMIT 1",
            RECORD_COLUMNS
        ),
        [user_id],
        record_from_row,
    )
    .optional()
    .map_err(|e| HandlerErr::db("db_query_failed", e))
}

pub fn latest_record_json(conn: &Connection, user_id: &str) -> Result<Option<Value>, HandlerErr> {
    match latest_record(conn, user_id)? {
        Some(row) => Ok(Some(record_json(conn, &row)?)),
        None => Ok(None),
    }
}

fn load_details(conn: &Connection, record_id: &str) -> Result<FootprintDetails, HandlerErr> {
    let q = |e: rusqlite::Error| HandlerErr::db("db_query_failed", e);
    let consumption = conn
        .query_row(
            "SELECT red_meat_kg, poultry_kg, fish_kg, dairy_kg, fruit_vegetables_kg,
                    imported_food_percent, new_clothing_items, electronics_devices, online_orders
             FROM consumption_details WHERE record_id = ?",
            [record_id],
            |r| {
                Ok(ConsumptionDetail {
                    red_meat_kg: r.get(0)?,
                    poultry_kg: r.get(1)?,
                    fish_kg: r.get(2)?,
                    dairy_kg: r.get(3)?,
                    fruit_vegetables_kg: r.get(4)?,
                    imported_food_percent: r.get(5)?,
                    new_clothing_items: r.get(6)?,
                    electronics_devices: r.get(7)?,
                    online_orders: r.get(8)?,
                })
            },
        )
        .optional()
        .map_err(q)?;
    let transport = conn
        .query_row(
            "SELECT gasoline_car_km, diesel_car_km, hybrid_car_km, electric_car_km, bus_km,
                    rail_km, short_flights, medium_flights, long_flights
             FROM transport_details WHERE record_id = ?",
            [record_id],
            |r| {
                Ok(TransportDetail {
                    gasoline_car_km: r.get(0)?,
                    diesel_car_km: r.get(1)?,
                    hybrid_car_km: r.get(2)?,
                    electric_car_km: r.get(3)?,
                    bus_km: r.get(4)?,
                    rail_km: r.get(5)?,
                    short_flights: r.get(6)?,
                    medium_flights: r.get(7)?,
                    long_flights: r.get(8)?,
                })
            },
        )
        .optional()
        .map_err(q)?;
    let energy = conn
        .query_row(
            "SELECT electricity_kwh, renewable_percent, natural_gas_m3, water_m3, heating_type,
                    heating_consumption
             FROM energy_details WHERE record_id = ?",
            [record_id],
            |r| {
                let heating: String = r.get(4)?;
                Ok(EnergyDetail {
                    electricity_kwh: r.get(0)?,
                    renewable_percent: r.get(1)?,
                    natural_gas_m3: r.get(2)?,
                    water_m3: r.get(3)?,
                    heating_type: HeatingType::parse(&heating).unwrap_or_default(),
                    heating_consumption: r.get(5)?,
                })
            },
        )
        .optional()
        .map_err(q)?;
    let waste = conn
        .query_row(
            "SELECT total_waste_kg, composted_kg FROM waste_details WHERE record_id = ?",
            [record_id],
            |r| {
                Ok(WasteDetail {
                    total_waste_kg: r.get(0)?,
                    composted_kg: r.get(1)?,
                })
            },
        )
        .optional()
        .map_err(q)?;
    Ok(FootprintDetails {
        consumption,
        transport,
        energy,
        waste,
    })
}

/// Replaces the stored detail rows of a record with `details`.
fn save_details(conn: &Connection, record_id: &str, details: &FootprintDetails) -> rusqlite::Result<()> {
    for table in [
        "consumption_details",
        "transport_details",
        "energy_details",
        "waste_details",
    ] {
        conn.execute(
            &format!("DELETE FROM {} WHERE record_id = ?", table),
            [record_id],
        )?;
    }
    if let Some(d) = &details.consumption {
        conn.execute(
            "INSERT INTO consumption_details(record_id, red_meat_kg, poultry_kg, fish_kg, dairy_kg,
                fruit_vegetables_kg, imported_food_percent, new_clothing_items, electronics_devices, online_orders)
             VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            rusqlite::params![
                record_id,
                d.red_meat_kg,
                d.poultry_kg,
                d.fish_kg,
                d.dairy_kg,
                d.fruit_vegetables_kg,
                d.imported_food_percent,
                d.new_clothing_items,
                d.electronics_devices,
                d.online_orders,
            ],
        )?;
    }
    if let Some(d) = &details.transport {
        conn.execute(
            "INSERT INTO transport_details(record_id, gasoline_car_km, diesel_car_km, hybrid_car_km,
                electric_car_km, bus_km, rail_km, short_flights, medium_flights, long_flights)
             VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            rusqlite::params![
                record_id,
                d.gasoline_car_km,
                d.diesel_car_km,
                d.hybrid_car_km,
                d.electric_car_km,
                d.bus_km,
                d.rail_km,
                d.short_flights,
                d.medium_flights,
                d.long_flights,
            ],
        )?;
    }
    if let Some(d) = &details.energy {
        conn.execute(
            "INSERT INTO energy_details(record_id, electricity_kwh, renewable_percent, natural_gas_m3,
                water_m3, heating_type, heating_consumption)
             VALUES(?, ?, ?, ?, ?, ?, ?)",
            rusqlite::params![
                record_id,
                d.electricity_kwh,
                d.renewable_percent,
                d.natural_gas_m3,
                d.water_m3,
                d.heating_type.code(),
                d.heating_consumption,
            ],
        )?;
    }
    if let Some(d) = &details.waste {
        conn.execute(
            "INSERT INTO waste_details(record_id, total_waste_kg, composted_kg) VALUES(?, ?, ?)",
            rusqlite::params![record_id, d.total_waste_kg, d.composted_kg],
        )?;
    }
    Ok(())
}

fn write_breakdown(conn: &Connection, record_id: &str, b: &FootprintBreakdown) -> rusqlite::Result<usize> {
    conn.execute(
        "UPDATE footprint_records
         SET consumption = ?, transport = ?, energy = ?, waste = ?, recycling_reduction = ?, total = ?
         WHERE id = ?",
        rusqlite::params![
            b.consumption,
            b.transport,
            b.energy,
            b.waste,
            b.recycling_reduction,
            b.total,
            record_id
        ],
    )
}

fn linked_recycling_reduction(conn: &Connection, record_id: &str) -> rusqlite::Result<f64> {
    conn.query_row(
        "SELECT COALESCE(SUM(co2_reduction), 0) FROM recycling_records WHERE footprint_record_id = ?",
        [record_id],
        |r| r.get(0),
    )
}

/// Re-sums the recycling offsets linked to a footprint record and rewrites its total.
pub fn refresh_recycling_reduction(conn: &Connection, record_id: &str) -> Result<(), HandlerErr> {
    let current: Option<FootprintBreakdown> = conn
        .query_row(
            "SELECT consumption, transport, energy, waste FROM footprint_records WHERE id = ?",
            [record_id],
            |r| Ok(FootprintBreakdown::new(r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?, 0.0)),
        )
        .optional()
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    let Some(current) = current else {
        return Ok(());
    };
    let reduction = linked_recycling_reduction(conn, record_id)
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    write_breakdown(conn, record_id, &current.with_recycling_reduction(reduction))
        .map_err(|e| HandlerErr::db("db_update_failed", e))?;
    Ok(())
}

fn with_results<T: Serialize>(detail: &T, results: Value) -> Value {
    let mut v = serde_json::to_value(detail).unwrap_or_else(|_| json!({}));
    if let (Some(obj), Value::Object(extra)) = (v.as_object_mut(), results) {
        obj.extend(extra);
    }
    v
}

fn consumption_json(d: &ConsumptionDetail) -> Value {
    with_results(
        d,
        json!({
            "foodEmissions": d.food_emissions(),
            "purchaseEmissions": d.purchase_emissions(),
            "emissions": d.emissions(),
        }),
    )
}

fn transport_json(d: &TransportDetail) -> Value {
    with_results(
        d,
        json!({
            "privateVehicleEmissions": d.private_vehicle_emissions(),
            "publicTransportEmissions": d.public_transport_emissions(),
            "flightEmissions": d.flight_emissions(),
            "emissions": d.emissions(),
        }),
    )
}

fn energy_json(d: &EnergyDetail) -> Value {
    with_results(
        d,
        json!({
            "electricityEmissions": d.electricity_emissions(),
            "heatingEmissions": d.heating_emissions(),
            "waterEmissions": d.water_emissions(),
            "emissions": d.emissions(),
        }),
    )
}

fn waste_json(d: &WasteDetail) -> Value {
    with_results(
        d,
        json!({
            "emissions": d.emissions(),
            "compostingReduction": d.composting_reduction(),
        }),
    )
}

fn details_json(d: &FootprintDetails) -> Value {
    json!({
        "consumption": d.consumption.as_ref().map(consumption_json),
        "transport": d.transport.as_ref().map(transport_json),
        "energy": d.energy.as_ref().map(energy_json),
        "waste": d.waste.as_ref().map(waste_json),
    })
}

fn summary_json(row: &RecordRow) -> Value {
    json!({
        "id": row.id,
        "userId": row.user_id,
        "recordedAt": row.recorded_at,
        "total": row.breakdown.total,
        "consumption": row.breakdown.consumption,
        "transport": row.breakdown.transport,
        "energy": row.breakdown.energy,
        "waste": row.breakdown.waste,
        "recyclingReduction": row.breakdown.recycling_reduction,
    })
}

pub fn record_json(conn: &Connection, row: &RecordRow) -> Result<Value, HandlerErr> {
    let details = load_details(conn, &row.id)?;
    let mut v = summary_json(row);
    v["details"] = details_json(&details);
    Ok(v)
}

/// Merges `patch` field-by-field over `base` (or defaults) and validates the result.
fn merge_detail<T>(base: Option<&T>, key: &str, patch: &Value) -> Result<T, HandlerErr>
where
    T: Serialize + DeserializeOwned + Default,
{
    let Some(patch) = patch.as_object() else {
        return Err(HandlerErr::bad_params(format!("{} must be an object", key)));
    };
    let default = T::default();
    let mut merged = serde_json::to_value(base.unwrap_or(&default))
        .map_err(|e| HandlerErr::bad_params(e.to_string()))?;
    if let Some(obj) = merged.as_object_mut() {
        for (k, v) in patch {
            obj.insert(k.clone(), v.clone());
        }
    }
    serde_json::from_value(merged)
        .map_err(|e| HandlerErr::bad_params(format!("invalid {}: {}", key, e)))
}

/// Applies the detail objects present in `params` onto `details`.
/// An explicit `null` removes that detail.
fn apply_detail_params(details: &mut FootprintDetails, params: &Value) -> Result<(), HandlerErr> {
    if let Some(p) = params.get("consumption") {
        details.consumption = if p.is_null() {
            None
        } else {
            Some(merge_detail(details.consumption.as_ref(), "consumption", p)?)
        };
    }
    if let Some(p) = params.get("transport") {
        details.transport = if p.is_null() {
            None
        } else {
            Some(merge_detail(details.transport.as_ref(), "transport", p)?)
        };
    }
    if let Some(p) = params.get("energy") {
        details.energy = if p.is_null() {
            None
        } else {
            Some(merge_detail(details.energy.as_ref(), "energy", p)?)
        };
    }
    if let Some(p) = params.get("waste") {
        details.waste = if p.is_null() {
            None
        } else {
            Some(merge_detail(details.waste.as_ref(), "waste", p)?)
        };
    }
    details.validate()?;
    Ok(())
}

fn footprints_create(s: &Session<'_>, params: &Value) -> Result<Value, HandlerErr> {
    let recorded_at = match opt_str(params, "recordedAt")? {
        Some(raw) => parse_timestamp(&raw)?,
        None => now_ts(),
    };
    let mut details = FootprintDetails::default();
    apply_detail_params(&mut details, params)?;
    let breakdown = details.breakdown(0.0);

    let record_id = Uuid::new_v4().to_string();
    let tx = s
        .conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::db("db_tx_failed", e))?;
    let insert = tx
        .execute(
            "INSERT INTO footprint_records(id, user_id, recorded_at) VALUES(?, ?, ?)",
            (&record_id, &s.user.id, &recorded_at),
        )
        .and_then(|_| write_breakdown(&tx, &record_id, &breakdown))
        .and_then(|_| save_details(&tx, &record_id, &details));
    if let Err(e) = insert {
        let _ = tx.rollback();
        return Err(HandlerErr::db("db_insert_failed", e)
            .with_details(json!({ "table": "footprint_records" })));
    }
    tx.commit().map_err(|e| HandlerErr::db("db_tx_failed", e))?;

    log::debug!(
        "footprint {} created for {}, total {:.3}",
        record_id,
        s.user.username,
        breakdown.total
    );
    let row = owned_record(s.conn, &s.user.id, &record_id)?;
    record_json(s.conn, &row)
}

fn footprints_list(s: &Session<'_>, _params: &Value) -> Result<Value, HandlerErr> {
    let rows = user_records(s.conn, &s.user.id)?;
    let mut records = Vec::with_capacity(rows.len());
    for row in &rows {
        records.push(record_json(s.conn, row)?);
    }
    Ok(json!({ "records": records }))
}

fn footprints_get(s: &Session<'_>, params: &Value) -> Result<Value, HandlerErr> {
    let record_id = required_str(params, "recordId")?;
    let row = owned_record(s.conn, &s.user.id, &record_id)?;
    record_json(s.conn, &row)
}

fn footprints_update(s: &Session<'_>, params: &Value) -> Result<Value, HandlerErr> {
    let record_id = required_str(params, "recordId")?;
    let row = owned_record(s.conn, &s.user.id, &record_id)?;

    let recorded_at = match opt_str(params, "recordedAt")? {
        Some(raw) => parse_timestamp(&raw)?,
        None => row.recorded_at.clone(),
    };
    let mut details = load_details(s.conn, &record_id)?;
    apply_detail_params(&mut details, params)?;

    let tx = s
        .conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::db("db_tx_failed", e))?;
    let reduction = match linked_recycling_reduction(&tx, &record_id) {
        Ok(v) => v,
        Err(e) => {
            let _ = tx.rollback();
            return Err(HandlerErr::db("db_query_failed", e));
        }
    };
    let breakdown = details.breakdown(reduction);
    let update = tx
        .execute(
            "UPDATE footprint_records SET recorded_at = ? WHERE id = ?",
            (&recorded_at, &record_id),
        )
        .and_then(|_| write_breakdown(&tx, &record_id, &breakdown))
        .and_then(|_| save_details(&tx, &record_id, &details));
    if let Err(e) = update {
        let _ = tx.rollback();
        return Err(HandlerErr::db("db_update_failed", e));
    }
    tx.commit().map_err(|e| HandlerErr::db("db_tx_failed", e))?;

    let row = owned_record(s.conn, &s.user.id, &record_id)?;
    record_json(s.conn, &row)
}

fn footprints_delete(s: &Session<'_>, params: &Value) -> Result<Value, HandlerErr> {
    let record_id = required_str(params, "recordId")?;
    owned_record(s.conn, &s.user.id, &record_id)?;

    let tx = s
        .conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::db("db_tx_failed", e))?;
    // Recycling records outlive the footprint they offset.
    let steps = [
        "UPDATE recycling_records SET footprint_record_id = NULL WHERE footprint_record_id = ?",
        "DELETE FROM consumption_details WHERE record_id = ?",
        "DELETE FROM transport_details WHERE record_id = ?",
        "DELETE FROM energy_details WHERE record_id = ?",
        "DELETE FROM waste_details WHERE record_id = ?",
        "DELETE FROM footprint_records WHERE id = ?",
    ];
    for sql in steps {
        if let Err(e) = tx.execute(sql, [&record_id]) {
            let _ = tx.rollback();
            return Err(HandlerErr::db("db_delete_failed", e));
        }
    }
    tx.commit().map_err(|e| HandlerErr::db("db_tx_failed", e))?;
    Ok(json!({ "ok": true }))
}

fn footprints_details(s: &Session<'_>, params: &Value) -> Result<Value, HandlerErr> {
    let record_id = required_str(params, "recordId")?;
    owned_record(s.conn, &s.user.id, &record_id)?;
    let details = load_details(s.conn, &record_id)?;
    Ok(details_json(&details))
}

fn footprints_history(s: &Session<'_>, _params: &Value) -> Result<Value, HandlerErr> {
    let rows = user_records(s.conn, &s.user.id)?;
    let history: Vec<Value> = rows
        .iter()
        .map(|row| {
            json!({
                "recordedAt": row.recorded_at,
                "total": row.breakdown.total,
                "consumption": row.breakdown.consumption,
                "transport": row.breakdown.transport,
                "energy": row.breakdown.energy,
                "waste": row.breakdown.waste,
                "recyclingReduction": row.breakdown.recycling_reduction,
            })
        })
        .collect();
    Ok(json!({ "history": history }))
}

fn footprints_compare_average(s: &Session<'_>, params: &Value) -> Result<Value, HandlerErr> {
    let record_id = required_str(params, "recordId")?;
    let row = owned_record(s.conn, &s.user.id, &record_id)?;
    let totals: Vec<f64> = user_records(s.conn, &s.user.id)?
        .iter()
        .map(|r| r.breakdown.total)
        .collect();
    let average = calc::average_footprint(totals);
    let cmp = calc::compare_with_average(row.breakdown.total, average);
    serde_json::to_value(cmp).map_err(|e| HandlerErr::db("db_query_failed", e))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let handler: Handler = match req.method.as_str() {
        "footprints.create" => footprints_create,
        "footprints.list" => footprints_list,
        "footprints.get" => footprints_get,
        "footprints.update" => footprints_update,
        "footprints.delete" => footprints_delete,
        "footprints.details" => footprints_details,
        "footprints.history" => footprints_history,
        "footprints.compareAverage" => footprints_compare_average,
        _ => return None,
    };
    Some(run_authenticated(state, req, handler))
}
