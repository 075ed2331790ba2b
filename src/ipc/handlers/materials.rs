use crate::calc::MaterialType;
use crate::ipc::helpers::{
    non_negative, opt_f64, opt_str, required_f64, required_str, run_authenticated,
    search_clause, Handler, HandlerErr, Session,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::{json, Map, Value};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct MaterialRow {
    pub id: String,
    pub name: String,
    pub material_type: MaterialType,
    pub unit: String,
    pub value_per_unit: f64,
    pub co2_reduction_factor: f64,
}

const MATERIAL_COLUMNS: &str =
    "id, name, material_type, unit, value_per_unit, co2_reduction_factor";

fn material_from_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<MaterialRow> {
    let kind: String = r.get(2)?;
    Ok(MaterialRow {
        id: r.get(0)?,
        name: r.get(1)?,
        material_type: MaterialType::parse(&kind).unwrap_or(MaterialType::Other),
        unit: r.get(3)?,
        value_per_unit: r.get(4)?,
        co2_reduction_factor: r.get(5)?,
    })
}

pub fn material_json(m: &MaterialRow) -> Value {
    json!({
        "id": m.id,
        "name": m.name,
        "materialType": m.material_type.code(),
        "materialTypeDisplay": m.material_type.display(),
        "unit": m.unit,
        "valuePerUnit": m.value_per_unit,
        "co2ReductionFactor": m.co2_reduction_factor,
    })
}

pub fn load_material(conn: &Connection, material_id: &str) -> Result<MaterialRow, HandlerErr> {
    conn.query_row(
        &format!("SELECT {} FROM materials WHERE id = ?", MATERIAL_COLUMNS),
        [material_id],
        material_from_row,
    )
    .optional()
    .map_err(|e| HandlerErr::db("db_query_failed", e))?
    .ok_or_else(|| {
        HandlerErr::not_found("material not found")
            .with_details(json!({ "materialId": material_id }))
    })
}

fn query_materials(
    conn: &Connection,
    search: Option<&str>,
) -> Result<Vec<MaterialRow>, HandlerErr> {
    let (filter, args) = search_clause(search, &["name", "material_type"]);
    let sql = format!(
        "SELECT {} FROM materials WHERE 1 = 1{} ORDER BY name",
        MATERIAL_COLUMNS, filter
    );
    let mut stmt = conn
        .prepare(&sql)
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    stmt.query_map(rusqlite::params_from_iter(args.iter()), material_from_row)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| HandlerErr::db("db_query_failed", e))
}

fn materials_list(s: &Session<'_>, params: &Value) -> Result<Value, HandlerErr> {
    let search = opt_str(params, "search")?;
    let rows = query_materials(s.conn, search.as_deref())?;
    let materials: Vec<Value> = rows.iter().map(material_json).collect();
    Ok(json!({ "materials": materials }))
}

fn materials_get(s: &Session<'_>, params: &Value) -> Result<Value, HandlerErr> {
    let material_id = required_str(params, "materialId")?;
    Ok(material_json(&load_material(s.conn, &material_id)?))
}

fn materials_by_type(s: &Session<'_>, _params: &Value) -> Result<Value, HandlerErr> {
    let rows = query_materials(s.conn, None)?;
    let mut grouped = Map::new();
    for kind in MaterialType::ALL {
        let items: Vec<Value> = rows
            .iter()
            .filter(|m| m.material_type == kind)
            .map(material_json)
            .collect();
        grouped.insert(kind.code().to_string(), Value::Array(items));
    }
    Ok(Value::Object(grouped))
}

fn materials_create(s: &Session<'_>, params: &Value) -> Result<Value, HandlerErr> {
    s.require_staff()?;
    let name = required_str(params, "name")?;
    let kind_raw = required_str(params, "materialType")?;
    let Some(kind) = MaterialType::parse(&kind_raw) else {
        return Err(HandlerErr::bad_params("unknown materialType")
            .with_details(json!({ "materialType": kind_raw })));
    };
    let unit = opt_str(params, "unit")?.unwrap_or_else(|| "kg".to_string());
    let value_per_unit = non_negative("valuePerUnit", required_f64(params, "valuePerUnit")?)?;
    let co2_factor = non_negative(
        "co2ReductionFactor",
        opt_f64(params, "co2ReductionFactor")?.unwrap_or(0.0),
    )?;

    let material_id = Uuid::new_v4().to_string();
    s.conn
        .execute(
            &format!(
                "INSERT INTO materials({}) VALUES(?, ?, ?, ?, ?, ?)",
                MATERIAL_COLUMNS
            ),
            rusqlite::params![
                material_id,
                name,
                kind.code(),
                unit,
                value_per_unit,
                co2_factor
            ],
        )
        .map_err(|e| {
            HandlerErr::db("db_insert_failed", e).with_details(json!({ "table": "materials" }))
        })?;
    Ok(material_json(&load_material(s.conn, &material_id)?))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let handler: Handler = match req.method.as_str() {
        "materials.list" => materials_list,
        "materials.get" => materials_get,
        "materials.byType" => materials_by_type,
        "materials.create" => materials_create,
        _ => return None,
    };
    Some(run_authenticated(state, req, handler))
}
