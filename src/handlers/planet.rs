use serde_json::json;

use crate::dispatcher::ClientContext;
use crate::envelope::OutboundFrame;
use crate::error::{EngineError, HandlerResult};
use crate::store::Store;

use super::require_i64;

pub fn info(store: &Store, data: &serde_json::Value) -> HandlerResult<OutboundFrame> {
    let planet_id = require_i64(data, "planet_id")?;
    let row = store
        .query_row(
            "SELECT p.name, p.type, p.owner_type, p.population, c.level, c.construction_status
             FROM planets p LEFT JOIN citadels c ON c.planet_id = p.id WHERE p.id = ?1",
            rusqlite::params![planet_id],
            |r| {
                Ok(json!({
                    "name": r.get::<_, String>(0)?,
                    "type": r.get::<_, String>(1)?,
                    "owner_type": r.get::<_, String>(2)?,
                    "population": r.get::<_, i64>(3)?,
                    "citadel_level": r.get::<_, Option<i64>>(4)?,
                    "construction_status": r.get::<_, Option<String>>(5)?,
                }))
            },
        )
        .map_err(|_| EngineError::planet_not_found("planet not found"))?;
    Ok(OutboundFrame::ok("planet.info.v1", None, row))
}

pub fn land(store: &Store, ctx: &ClientContext, data: &serde_json::Value) -> HandlerResult<OutboundFrame> {
    let planet_id = require_i64(data, "planet_id")?;
    let planet_sector: i64 = store
        .query_row("SELECT sector_id FROM planets WHERE id = ?1", rusqlite::params![planet_id], |r| r.get(0))
        .map_err(|_| EngineError::planet_not_found("planet not found"))?;
    if planet_sector != ctx.sector_id {
        return Err(EngineError::Malformed("planet is not in this sector".into()).into());
    }
    store
        .execute(
            "UPDATE ships SET onplanet = ?1 WHERE id = (SELECT active_ship_id FROM players WHERE id = ?2)",
            rusqlite::params![planet_id, ctx.player_id],
        )
        .map_err(super::db_err)?;
    Ok(OutboundFrame::ok("planet.land.v1", None, json!({"planet_id": planet_id})))
}

/// Transfer cargo from the player's ship onto the planet's stockpile --
/// the usual way a citadel upgrade's resource requirements get funded.
pub fn deposit(
    store: &Store,
    ctx: &ClientContext,
    data: &serde_json::Value,
    _now: i64,
) -> HandlerResult<OutboundFrame> {
    let planet_id = require_i64(data, "planet_id")?;
    let ore = data.get("ore").and_then(|v| v.as_i64()).unwrap_or(0);
    let organics = data.get("organics").and_then(|v| v.as_i64()).unwrap_or(0);
    let equipment = data.get("equipment").and_then(|v| v.as_i64()).unwrap_or(0);

    let ship_id: i64 = store
        .query_row(
            "SELECT active_ship_id FROM players WHERE id = ?1",
            rusqlite::params![ctx.player_id],
            |r| r.get(0),
        )
        .map_err(super::db_err)?;
    let onplanet: Option<i64> = store
        .query_row("SELECT onplanet FROM ships WHERE id = ?1", rusqlite::params![ship_id], |r| r.get(0))
        .map_err(super::db_err)?;
    if onplanet != Some(planet_id) {
        return Err(EngineError::Malformed("ship is not landed on that planet".into()).into());
    }

    store
        .execute(
            "UPDATE ships SET ore = ore - ?1, organics = organics - ?2, equipment = equipment - ?3 WHERE id = ?4",
            rusqlite::params![ore, organics, equipment, ship_id],
        )
        .map_err(super::db_err)?;
    store
        .execute(
            "UPDATE planets SET ore_on_hand = ore_on_hand + ?1, organics_on_hand = organics_on_hand + ?2,
             equipment_on_hand = equipment_on_hand + ?3 WHERE id = ?4",
            rusqlite::params![ore, organics, equipment, planet_id],
        )
        .map_err(super::db_err)?;

    Ok(OutboundFrame::ok("planet.deposit.v1", None, json!({"planet_id": planet_id})))
}
