use serde_json::json;
use std::collections::HashSet;

use crate::dispatcher::ClientContext;
use crate::envelope::OutboundFrame;
use crate::error::{codes, EngineError, HandlerResult, Refusal};
use crate::pathfinder;
use crate::store::Store;

use super::combat::apply_entry_hazards;
use super::sector::scan_snapshot;
use super::{optional_i64, require_i64};

const WARP_TURN_COST: i64 = 1;

fn ship_and_turns(store: &Store, ctx: &ClientContext) -> Result<(i64, i64), EngineError> {
    store
        .query_row(
            "SELECT active_ship_id, turns FROM players WHERE id = ?1",
            rusqlite::params![ctx.player_id],
            |r| Ok((r.get::<_, Option<i64>>(0)?.unwrap_or(0), r.get(1)?)),
        )
        .map_err(|e| EngineError::Db(e.to_string()))
}

pub fn warp(
    store: &Store,
    ctx: &mut ClientContext,
    data: &serde_json::Value,
    now: i64,
) -> HandlerResult<OutboundFrame> {
    let to = require_i64(data, "to")?;

    let exists: i64 = store
        .query_row(
            "SELECT COUNT(*) FROM sector_warps WHERE from_sector = ?1 AND to_sector = ?2",
            rusqlite::params![ctx.sector_id, to],
            |r| r.get(0),
        )
        .map_err(super::db_err)?;
    if exists == 0 {
        return Err(Refusal::new(codes::REF_NO_WARP_LINK, "no warp link to that sector").into());
    }

    let (ship_id, turns) = ship_and_turns(store, ctx).map_err(super::db_err)?;
    if turns < WARP_TURN_COST {
        return Err(Refusal::new(codes::REF_TURN_COST_EXCEEDS, "not enough turns").into());
    }

    store
        .execute(
            "UPDATE players SET sector_id = ?1, turns = turns - ?2 WHERE id = ?3",
            rusqlite::params![to, WARP_TURN_COST, ctx.player_id],
        )
        .map_err(super::db_err)?;
    if ship_id != 0 {
        store
            .execute("UPDATE ships SET sector_id = ?1 WHERE id = ?2", rusqlite::params![to, ship_id])
            .map_err(super::db_err)?;
    }
    store
        .execute(
            "INSERT INTO engine_events (ts, type, actor_player_id, sector_id, payload) VALUES (?1, 'move.warp', ?2, ?3, ?4)",
            rusqlite::params![now, ctx.player_id, to, json!({"from": ctx.sector_id, "to": to}).to_string()],
        )
        .map_err(super::db_err)?;

    ctx.sector_id = to;
    let hazards = apply_entry_hazards(store, ctx, to, now)?;
    let scan = scan_snapshot(store, to)?;
    Ok(OutboundFrame::ok(
        "move.warp.v1",
        None,
        json!({"sector_id": to, "hazards": hazards, "scan": scan}),
    ))
}

pub fn transwarp(
    store: &Store,
    ctx: &mut ClientContext,
    data: &serde_json::Value,
    now: i64,
) -> HandlerResult<OutboundFrame> {
    let to = require_i64(data, "to")?;
    let (ship_id, _turns) = ship_and_turns(store, ctx).map_err(super::db_err)?;

    let can_transwarp: i64 = store
        .query_row(
            "SELECT st.can_transwarp FROM ships s JOIN shiptypes st ON st.code = s.shiptype_code WHERE s.id = ?1",
            rusqlite::params![ship_id],
            |r| r.get(0),
        )
        .map_err(super::db_err)?;
    if can_transwarp == 0 {
        return Err(Refusal::new(codes::REF_NOT_PERMITTED, "ship cannot transwarp").into());
    }

    let max_id: i64 = store
        .query_row("SELECT MAX(id) FROM sectors", [], |r| r.get(0))
        .map_err(super::db_err)?;
    if to <= 0 || to > max_id {
        return Err(EngineError::Malformed("sector out of range".into()).into());
    }

    store
        .execute("UPDATE players SET sector_id = ?1 WHERE id = ?2", rusqlite::params![to, ctx.player_id])
        .map_err(super::db_err)?;
    store
        .execute("UPDATE ships SET sector_id = ?1 WHERE id = ?2", rusqlite::params![to, ship_id])
        .map_err(super::db_err)?;
    store
        .execute(
            "INSERT INTO engine_events (ts, type, actor_player_id, sector_id, payload) VALUES (?1, 'move.transwarp', ?2, ?3, '{}')",
            rusqlite::params![now, ctx.player_id, to],
        )
        .map_err(super::db_err)?;

    ctx.sector_id = to;
    let hazards = apply_entry_hazards(store, ctx, to, now)?;
    let scan = scan_snapshot(store, to)?;
    Ok(OutboundFrame::ok(
        "move.transwarp.v1",
        None,
        json!({"sector_id": to, "hazards": hazards, "scan": scan}),
    ))
}

fn parse_avoid(data: &serde_json::Value) -> HashSet<i64> {
    data.get("avoid")
        .and_then(|v| v.as_array())
        .map(|arr| arr.iter().filter_map(|v| v.as_i64()).collect())
        .unwrap_or_default()
}

pub fn pathfind(store: &Store, ctx: &ClientContext, data: &serde_json::Value) -> HandlerResult<OutboundFrame> {
    let from = optional_i64(data, "from").unwrap_or(ctx.sector_id);
    let to = require_i64(data, "to")?;
    let avoid = parse_avoid(data);

    let route = pathfinder::find_route(store, from, to, &avoid).map_err(crate::error::HandlerError::Refused)?;
    Ok(OutboundFrame::ok(
        "move.pathfind.v1",
        None,
        json!({"from_sector_id": route.from, "to_sector_id": route.to, "path": route.path, "hops": route.hops}),
    ))
}

pub fn autopilot_start(store: &Store, ctx: &ClientContext, data: &serde_json::Value) -> HandlerResult<OutboundFrame> {
    let from = optional_i64(data, "from").or_else(|| optional_i64(data, "from_sector_id")).unwrap_or(ctx.sector_id);
    let to = optional_i64(data, "to")
        .or_else(|| optional_i64(data, "to_sector_id"))
        .ok_or_else(|| EngineError::Malformed("target sector not specified".into()))?;
    let avoid = parse_avoid(data);

    let route = pathfinder::find_route(store, from, to, &avoid).map_err(crate::error::HandlerError::Refused)?;
    Ok(OutboundFrame::ok(
        "move.autopilot.route_v1",
        None,
        json!({"from_sector_id": route.from, "to_sector_id": route.to, "path": route.path, "hops": route.hops}),
    ))
}

/// Autopilot never persists an in-progress run -- `move.autopilot.start` is
/// pure route computation. There is therefore nothing to report as
/// "running"; status always reflects that.
pub fn autopilot_status(_store: &Store, _ctx: &ClientContext) -> HandlerResult<OutboundFrame> {
    Ok(OutboundFrame::ok("move.autopilot.status_v1", None, json!({"running": false})))
}

pub fn autopilot_stop(_store: &Store, _ctx: &ClientContext) -> HandlerResult<OutboundFrame> {
    Ok(OutboundFrame::ok("move.autopilot.stop_v1", None, json!({"stopped": true})))
}
