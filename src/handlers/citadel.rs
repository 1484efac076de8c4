//! Citadel construction/upgrade: ownership check, idle/max-level
//! preconditions, per-level resource costs pulled from `planettypes`,
//! deduct-and-schedule.

use serde_json::json;

use crate::dispatcher::ClientContext;
use crate::envelope::OutboundFrame;
use crate::error::{codes, EngineError, HandlerResult, Refusal};
use crate::owner::OwnerRef;
use crate::store::Store;

use super::require_i64;

const MAX_LEVEL: i64 = 6;

struct Requirement {
    colonist: i64,
    ore: i64,
    organics: i64,
    equipment: i64,
    days: i64,
}

fn load_requirement(store: &Store, planet_type: &str, target_level: i64) -> Result<Requirement, EngineError> {
    let sql = format!(
        "SELECT citadel_upgrade_colonist_lvl{0}, citadel_upgrade_ore_lvl{0}, citadel_upgrade_organics_lvl{0}, \
         citadel_upgrade_equipment_lvl{0}, citadel_upgrade_time_lvl{0} FROM planettypes WHERE code = ?1",
        target_level
    );
    store
        .query_row(&sql, rusqlite::params![planet_type], |r| {
            Ok(Requirement {
                colonist: r.get(0)?,
                ore: r.get(1)?,
                organics: r.get(2)?,
                equipment: r.get(3)?,
                days: r.get(4)?,
            })
        })
        .map_err(super::db_err)
}

/// `citadel.build` is an alias for upgrading a level-0 citadel.
pub fn upgrade(
    store: &Store,
    ctx: &ClientContext,
    data: &serde_json::Value,
    now: i64,
) -> HandlerResult<OutboundFrame> {
    let planet_id = require_i64(data, "planet_id")?;

    let (planet_type, owner_type, owner_id, colonist, ore, organics, equipment): (
        String,
        String,
        i64,
        i64,
        i64,
        i64,
        i64,
    ) = store
        .query_row(
            "SELECT type, owner_type, owner_id, colonist, ore_on_hand, organics_on_hand, equipment_on_hand FROM planets WHERE id = ?1",
            rusqlite::params![planet_id],
            |r| Ok((r.get(0)?, r.get(1)?, r.get::<_, Option<i64>>(2)?.unwrap_or(0), r.get(3)?, r.get(4)?, r.get(5)?, r.get(6)?)),
        )
        .map_err(|_| EngineError::planet_not_found("planet not found"))?;

    let owner = OwnerRef::from_parts(&owner_type, owner_id).map_err(EngineError::InvalidSchema)?;
    let can_build = match owner {
        OwnerRef::Player(pid) => pid == ctx.player_id,
        OwnerRef::Corp(corp_id) => {
            let member_corp: Option<i64> = store
                .query_row(
                    "SELECT corp_id FROM corp_members WHERE player_id = ?1",
                    rusqlite::params![ctx.player_id],
                    |r| r.get(0),
                )
                .ok();
            member_corp == Some(corp_id)
        }
        _ => false,
    };
    if !can_build {
        return Err(Refusal::new(codes::REF_NOT_PERMITTED, "not authorized to build on this planet").into());
    }

    let (current_level, construction_status): (i64, String) = store
        .query_row(
            "SELECT level, construction_status FROM citadels WHERE planet_id = ?1",
            rusqlite::params![planet_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .map_err(super::db_err)?;

    if construction_status != "idle" {
        return Err(Refusal::new(codes::REF_ALREADY_IN_PROGRESS, "an upgrade is already in progress").into());
    }
    if current_level >= MAX_LEVEL {
        return Err(Refusal::new(codes::REF_MAX_LEVEL, "citadel is already at maximum level").into());
    }

    let target_level = current_level + 1;
    let req = load_requirement(store, &planet_type, target_level)?;
    if req.days <= 0 {
        return Err(EngineError::Internal("missing upgrade requirements for planet type".into()).into());
    }

    if colonist < req.colonist || ore < req.ore || organics < req.organics || equipment < req.equipment {
        let mut missing = serde_json::Map::new();
        if colonist < req.colonist {
            missing.insert("colonist".into(), json!(req.colonist - colonist));
        }
        if ore < req.ore {
            missing.insert("ore".into(), json!(req.ore - ore));
        }
        if organics < req.organics {
            missing.insert("organics".into(), json!(req.organics - organics));
        }
        if equipment < req.equipment {
            missing.insert("equipment".into(), json!(req.equipment - equipment));
        }
        return Err(Refusal::with_meta(
            codes::REF_INSUFFICIENT_RESOURCES,
            "insufficient resources on planet to begin upgrade",
            json!({"missing": missing}),
        )
        .into());
    }

    store
        .execute(
            "UPDATE planets SET colonist = colonist - ?1, ore_on_hand = ore_on_hand - ?2,
             organics_on_hand = organics_on_hand - ?3, equipment_on_hand = equipment_on_hand - ?4
             WHERE id = ?5",
            rusqlite::params![req.colonist, req.ore, req.organics, req.equipment, planet_id],
        )
        .map_err(super::db_err)?;

    let end_ts = now + req.days * 86_400;
    store
        .execute(
            "UPDATE citadels SET construction_status = 'upgrading', target_level = ?1, start_ts = ?2, end_ts = ?3 WHERE planet_id = ?4",
            rusqlite::params![target_level, now, end_ts, planet_id],
        )
        .map_err(super::db_err)?;

    store
        .execute(
            "INSERT INTO engine_events (ts, type, actor_player_id, payload) VALUES (?1, 'citadel.upgrade_started', ?2, ?3)",
            rusqlite::params![now, ctx.player_id, json!({"planet_id": planet_id, "target_level": target_level}).to_string()],
        )
        .map_err(super::db_err)?;

    Ok(OutboundFrame::ok(
        "citadel.upgrade_started",
        None,
        json!({"planet_id": planet_id, "target_level": target_level, "end_ts": end_ts}),
    ))
}
