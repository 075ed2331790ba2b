use crate::calc::{self, MaterialType, RecyclingTotals};
use crate::ipc::handlers::footprints::{owned_record, refresh_recycling_reduction};
use crate::ipc::handlers::materials::load_material;
use crate::ipc::helpers::{
    in_tx, month_key, non_negative, now_ts, opt_nullable_str, opt_str, parse_timestamp, required_f64,
    required_str, run_authenticated, Handler, HandlerErr, Session,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use uuid::Uuid;

#[derive(Debug, Clone)]
struct RecyclingRow {
    id: String,
    user_id: String,
    footprint_record_id: Option<String>,
    recorded_at: String,
    totals: RecyclingTotals,
}

#[derive(Debug, Clone)]
struct LineRow {
    id: String,
    material_id: String,
    material_name: String,
    material_type: MaterialType,
    quantity: f64,
    unit: String,
    economic_value: f64,
    co2_reduction: f64,
}

struct NewLine {
    material_id: String,
    quantity: f64,
    unit: Option<String>,
}

const RECORD_COLUMNS: &str =
    "id, user_id, footprint_record_id, recorded_at, total_kg, economic_value, co2_reduction";

fn recycling_from_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<RecyclingRow> {
    Ok(RecyclingRow {
        id: r.get(0)?,
        user_id: r.get(1)?,
        footprint_record_id: r.get(2)?,
        recorded_at: r.get(3)?,
        totals: RecyclingTotals {
            total_kg: r.get(4)?,
            economic_value: r.get(5)?,
            co2_reduction: r.get(6)?,
        },
    })
}

fn owned_recycling(conn: &Connection, user_id: &str, record_id: &str) -> Result<RecyclingRow, HandlerErr> {
    conn.query_row(
        &format!(
            "SELECT {} FROM recycling_records WHERE id = ? AND user_id = ?",
            RECORD_COLUMNS
        ),
        [record_id, user_id],
        recycling_from_row,
    )
    .optional()
    .map_err(|e| HandlerErr::db("db_query_failed", e))?
    .ok_or_else(|| HandlerErr::not_found("recycling record not found"))
}

fn user_recycling(conn: &Connection, user_id: &str, limit: Option<usize>) -> Result<Vec<RecyclingRow>, HandlerErr> {
    let mut sql = format!(
        "SELECT {} FROM recycling_records WHERE user_id = ? ORDER BY recorded_at DESC, rowid DESC",
        RECORD_COLUMNS
    );
    if let Some(n) = limit {
        sql.push_str(&format!(" LIMIT {}", n));
    }
    let mut stmt = conn
        .prepare(&sql)
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    stmt.query_map([user_id], recycling_from_row)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| HandlerErr::db("db_query_failed", e))
}

fn record_lines(conn: &Connection, record_id: &str) -> Result<Vec<LineRow>, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT rm.id, rm.material_id, m.name, m.material_type, rm.quantity, rm.unit,
                    rm.economic_value, rm.co2_reduction
             FROM recycled_materials rm
             JOIN materials m ON m.id = rm.material_id
             WHERE rm.recycling_record_id = ?
             ORDER BY rm.sort_order",
        )
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    stmt.query_map([record_id], |r| {
        let kind: String = r.get(3)?;
        Ok(LineRow {
            id: r.get(0)?,
            material_id: r.get(1)?,
            material_name: r.get(2)?,
            material_type: MaterialType::parse(&kind).unwrap_or(MaterialType::Other),
            quantity: r.get(4)?,
            unit: r.get(5)?,
            economic_value: r.get(6)?,
            co2_reduction: r.get(7)?,
        })
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(|e| HandlerErr::db("db_query_failed", e))
}

fn line_json(l: &LineRow) -> Value {
    json!({
        "id": l.id,
        "materialId": l.material_id,
        "materialName": l.material_name,
        "materialType": l.material_type.code(),
        "materialTypeDisplay": l.material_type.display(),
        "quantity": l.quantity,
        "unit": l.unit,
        "economicValue": l.economic_value,
        "co2Reduction": l.co2_reduction,
    })
}

fn record_json(conn: &Connection, row: &RecyclingRow) -> Result<Value, HandlerErr> {
    let lines = record_lines(conn, &row.id)?;
    Ok(json!({
        "id": row.id,
        "userId": row.user_id,
        "footprintRecordId": row.footprint_record_id,
        "recordedAt": row.recorded_at,
        "totalKg": row.totals.total_kg,
        "economicValue": row.totals.economic_value,
        "co2Reduction": row.totals.co2_reduction,
        "materials": lines.iter().map(line_json).collect::<Vec<_>>(),
    }))
}

pub fn recent_records_json(conn: &Connection, user_id: &str, limit: usize) -> Result<Vec<Value>, HandlerErr> {
    let rows = user_recycling(conn, user_id, Some(limit))?;
    rows.iter().map(|row| record_json(conn, row)).collect()
}

fn parse_lines(params: &Value) -> Result<Vec<NewLine>, HandlerErr> {
    let Some(raw) = params.get("materials") else {
        return Ok(Vec::new());
    };
    if raw.is_null() {
        return Ok(Vec::new());
    }
    let Some(items) = raw.as_array() else {
        return Err(HandlerErr::bad_params("materials must be an array"));
    };
    let mut out = Vec::with_capacity(items.len());
    for (i, item) in items.iter().enumerate() {
        let line = parse_line(item)
            .map_err(|e| e.with_details(json!({ "index": i })))?;
        out.push(line);
    }
    Ok(out)
}

fn parse_line(item: &Value) -> Result<NewLine, HandlerErr> {
    Ok(NewLine {
        material_id: required_str(item, "materialId")?,
        quantity: non_negative("quantity", required_f64(item, "quantity")?)?,
        unit: opt_str(item, "unit")?,
    })
}

/// Values a line against its material and appends it to the record.
fn insert_line(conn: &Connection, record_id: &str, line: &NewLine) -> Result<String, HandlerErr> {
    let material = load_material(conn, &line.material_id)?;
    let valuation = calc::value_recycled_line(
        line.quantity,
        material.value_per_unit,
        material.co2_reduction_factor,
    );
    let sort_order: i64 = conn
        .query_row(
            "SELECT COALESCE(MAX(sort_order), -1) + 1 FROM recycled_materials WHERE recycling_record_id = ?",
            [record_id],
            |r| r.get(0),
        )
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    let line_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO recycled_materials(id, recycling_record_id, material_id, quantity, unit, economic_value, co2_reduction, sort_order)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
        rusqlite::params![
            line_id,
            record_id,
            material.id,
            line.quantity,
            line.unit.clone().unwrap_or(material.unit),
            valuation.economic_value,
            valuation.co2_reduction,
            sort_order,
        ],
    )
    .map_err(|e| {
        HandlerErr::db("db_insert_failed", e).with_details(json!({ "table": "recycled_materials" }))
    })?;
    Ok(line_id)
}

/// Recomputes the record's totals from its lines.
fn refresh_totals(conn: &Connection, record_id: &str) -> Result<RecyclingTotals, HandlerErr> {
    let lines = record_lines(conn, record_id)?;
    let totals = calc::recycling_totals(lines.iter().map(|l| {
        (
            l.quantity,
            calc::LineValuation {
                economic_value: l.economic_value,
                co2_reduction: l.co2_reduction,
            },
        )
    }));
    conn.execute(
        "UPDATE recycling_records SET total_kg = ?, economic_value = ?, co2_reduction = ? WHERE id = ?",
        rusqlite::params![
            totals.total_kg,
            totals.economic_value,
            totals.co2_reduction,
            record_id
        ],
    )
    .map_err(|e| HandlerErr::db("db_update_failed", e))?;
    Ok(totals)
}

fn recycling_create(s: &Session<'_>, params: &Value) -> Result<Value, HandlerErr> {
    let recorded_at = match opt_str(params, "recordedAt")? {
        Some(raw) => parse_timestamp(&raw)?,
        None => now_ts(),
    };
    let footprint_id = opt_str(params, "footprintRecordId")?;
    if let Some(fid) = &footprint_id {
        owned_record(s.conn, &s.user.id, fid)?;
    }
    let lines = parse_lines(params)?;

    let record_id = Uuid::new_v4().to_string();
    in_tx(s.conn, |conn| {
        conn.execute(
            "INSERT INTO recycling_records(id, user_id, footprint_record_id, recorded_at) VALUES(?, ?, ?, ?)",
            (&record_id, &s.user.id, &footprint_id, &recorded_at),
        )
        .map_err(|e| {
            HandlerErr::db("db_insert_failed", e).with_details(json!({ "table": "recycling_records" }))
        })?;
        for line in &lines {
            insert_line(conn, &record_id, line)?;
        }
        refresh_totals(conn, &record_id)?;
        if let Some(fid) = &footprint_id {
            refresh_recycling_reduction(conn, fid)?;
        }
        Ok(())
    })?;

    let row = owned_recycling(s.conn, &s.user.id, &record_id)?;
    record_json(s.conn, &row)
}

fn recycling_list(s: &Session<'_>, _params: &Value) -> Result<Value, HandlerErr> {
    let rows = user_recycling(s.conn, &s.user.id, None)?;
    let records = rows
        .iter()
        .map(|row| record_json(s.conn, row))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "records": records }))
}

fn recycling_get(s: &Session<'_>, params: &Value) -> Result<Value, HandlerErr> {
    let record_id = required_str(params, "recordId")?;
    let row = owned_recycling(s.conn, &s.user.id, &record_id)?;
    let mut v = record_json(s.conn, &row)?;

    let mut by_type: BTreeMap<MaterialType, RecyclingTotals> = BTreeMap::new();
    for l in record_lines(s.conn, &record_id)? {
        by_type.entry(l.material_type).or_default().add(
            l.quantity,
            calc::LineValuation {
                economic_value: l.economic_value,
                co2_reduction: l.co2_reduction,
            },
        );
    }
    let mut stats = Map::new();
    for (kind, t) in by_type {
        stats.insert(
            kind.code().to_string(),
            json!({
                "quantity": t.total_kg,
                "economicValue": t.economic_value,
                "co2Reduction": t.co2_reduction,
            }),
        );
    }
    v["statsByType"] = Value::Object(stats);
    Ok(v)
}

fn recycling_update(s: &Session<'_>, params: &Value) -> Result<Value, HandlerErr> {
    let record_id = required_str(params, "recordId")?;
    let row = owned_recycling(s.conn, &s.user.id, &record_id)?;

    let recorded_at = match opt_str(params, "recordedAt")? {
        Some(raw) => parse_timestamp(&raw)?,
        None => row.recorded_at.clone(),
    };
    let footprint_id = match opt_nullable_str(params, "footprintRecordId")? {
        None => row.footprint_record_id.clone(),
        Some(None) => None,
        Some(Some(fid)) => {
            owned_record(s.conn, &s.user.id, &fid)?;
            Some(fid)
        }
    };

    in_tx(s.conn, |conn| {
        conn.execute(
            "UPDATE recycling_records SET recorded_at = ?, footprint_record_id = ? WHERE id = ?",
            (&recorded_at, &footprint_id, &record_id),
        )
        .map_err(|e| HandlerErr::db("db_update_failed", e))?;
        if let Some(old) = &row.footprint_record_id {
            refresh_recycling_reduction(conn, old)?;
        }
        if let Some(new) = &footprint_id {
            if row.footprint_record_id.as_ref() != Some(new) {
                refresh_recycling_reduction(conn, new)?;
            }
        }
        Ok(())
    })?;

    let row = owned_recycling(s.conn, &s.user.id, &record_id)?;
    record_json(s.conn, &row)
}

fn recycling_delete(s: &Session<'_>, params: &Value) -> Result<Value, HandlerErr> {
    let record_id = required_str(params, "recordId")?;
    let row = owned_recycling(s.conn, &s.user.id, &record_id)?;

    in_tx(s.conn, |conn| {
        for sql in [
            "DELETE FROM recycled_materials WHERE recycling_record_id = ?",
            "DELETE FROM recycling_records WHERE id = ?",
        ] {
            conn.execute(sql, [&record_id])
                .map_err(|e| HandlerErr::db("db_delete_failed", e))?;
        }
        if let Some(fid) = &row.footprint_record_id {
            refresh_recycling_reduction(conn, fid)?;
        }
        Ok(())
    })?;
    Ok(json!({ "ok": true }))
}

fn recycling_add_material(s: &Session<'_>, params: &Value) -> Result<Value, HandlerErr> {
    let record_id = required_str(params, "recordId")?;
    let row = owned_recycling(s.conn, &s.user.id, &record_id)?;
    let line = parse_line(params)?;

    let line_id = in_tx(s.conn, |conn| {
        let line_id = insert_line(conn, &record_id, &line)?;
        refresh_totals(conn, &record_id)?;
        if let Some(fid) = &row.footprint_record_id {
            refresh_recycling_reduction(conn, fid)?;
        }
        Ok(line_id)
    })?;

    record_lines(s.conn, &record_id)?
        .iter()
        .find(|l| l.id == line_id)
        .map(line_json)
        .ok_or_else(|| HandlerErr::not_found("recycled material not found"))
}

fn recycling_stats(s: &Session<'_>, _params: &Value) -> Result<Value, HandlerErr> {
    let rows = user_recycling(s.conn, &s.user.id, None)?;

    let mut summary = RecyclingTotals::default();
    let mut by_type: BTreeMap<MaterialType, RecyclingTotals> = BTreeMap::new();
    let mut monthly: BTreeMap<String, RecyclingTotals> = BTreeMap::new();
    for row in &rows {
        for l in record_lines(s.conn, &row.id)? {
            let valuation = calc::LineValuation {
                economic_value: l.economic_value,
                co2_reduction: l.co2_reduction,
            };
            summary.add(l.quantity, valuation);
            by_type.entry(l.material_type).or_default().add(l.quantity, valuation);
            monthly
                .entry(month_key(&row.recorded_at))
                .or_default()
                .add(l.quantity, valuation);
        }
    }

    let mut types = Map::new();
    for (kind, t) in by_type {
        types.insert(
            kind.code().to_string(),
            json!({
                "name": kind.display(),
                "quantity": t.total_kg,
                "economicValue": t.economic_value,
                "co2Reduction": t.co2_reduction,
            }),
        );
    }
    let mut months = Map::new();
    for (month, t) in monthly {
        months.insert(
            month,
            json!({
                "kg": t.total_kg,
                "economicValue": t.economic_value,
                "co2Reduction": t.co2_reduction,
            }),
        );
    }

    Ok(json!({
        "summary": {
            "totalKg": summary.total_kg,
            "totalEconomicValue": summary.economic_value,
            "totalCo2Reduction": summary.co2_reduction,
            "recordCount": rows.len(),
        },
        "byMaterialType": types,
        "monthly": months,
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let handler: Handler = match req.method.as_str() {
        "recycling.create" => recycling_create,
        "recycling.list" => recycling_list,
        "recycling.get" => recycling_get,
        "recycling.update" => recycling_update,
        "recycling.delete" => recycling_delete,
        "recycling.addMaterial" => recycling_add_material,
        "recycling.stats" => recycling_stats,
        _ => return None,
    };
    Some(run_authenticated(state, req, handler))
}
