//! Ship-to-ship combat. A trimmed model: fighters absorb hull damage
//! 1-for-1, remaining damage comes off hull; no fighter beats a dead ship.

use serde_json::json;

use crate::dispatcher::ClientContext;
use crate::envelope::OutboundFrame;
use crate::error::{codes, EngineError, HandlerResult, Refusal};
use crate::store::Store;

use super::{require_i64, require_u32_positive};

pub fn attack(
    store: &Store,
    ctx: &ClientContext,
    data: &serde_json::Value,
    now: i64,
) -> HandlerResult<OutboundFrame> {
    let target_ship_id = require_i64(data, "target_ship_id")?;

    let (attacker_ship_id, attacker_sector, attacker_fighters): (i64, i64, i64) = store
        .query_row(
            "SELECT s.id, s.sector_id, s.fighters FROM players p JOIN ships s ON s.id = p.active_ship_id WHERE p.id = ?1",
            rusqlite::params![ctx.player_id],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )
        .map_err(|_| EngineError::planet_not_found("no active ship"))?;

    let (target_sector, target_hull, target_shields): (i64, i64, i64) = store
        .query_row(
            "SELECT sector_id, hull, shields FROM ships WHERE id = ?1 AND destroyed = 0",
            rusqlite::params![target_ship_id],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )
        .map_err(|_| EngineError::planet_not_found("target ship not found"))?;

    if target_sector != attacker_sector {
        return Err(Refusal::new(codes::REF_NOT_PERMITTED, "target is not in this sector").into());
    }
    if attacker_fighters <= 0 {
        return Err(Refusal::new(codes::REF_NOT_PERMITTED, "no fighters to attack with").into());
    }

    let damage = attacker_fighters.min(50);
    let absorbed = damage.min(target_shields);
    let through = damage - absorbed;
    let new_shields = target_shields - absorbed;
    let new_hull = (target_hull - through).max(0);
    let destroyed = new_hull == 0;

    store
        .execute(
            "UPDATE ships SET shields = ?1, hull = ?2, destroyed = ?3 WHERE id = ?4",
            rusqlite::params![new_shields, new_hull, destroyed as i64, target_ship_id],
        )
        .map_err(super::db_err)?;
    store
        .execute(
            "INSERT INTO engine_events (ts, type, actor_player_id, sector_id, payload) VALUES (?1, 'combat.attack', ?2, ?3, ?4)",
            rusqlite::params![
                now,
                ctx.player_id,
                attacker_sector,
                json!({"target_ship_id": target_ship_id, "damage": damage, "destroyed": destroyed}).to_string()
            ],
        )
        .map_err(super::db_err)?;

    let _ = attacker_ship_id;
    Ok(OutboundFrame::ok(
        "combat.attack.v1",
        None,
        json!({"target_ship_id": target_ship_id, "damage_dealt": damage, "destroyed": destroyed, "remaining_hull": new_hull}),
    ))
}

pub fn status(store: &Store, ctx: &ClientContext) -> HandlerResult<OutboundFrame> {
    let (hull, shields, fighters, mines): (i64, i64, i64, i64) = store
        .query_row(
            "SELECT s.hull, s.shields, s.fighters, s.mines FROM players p JOIN ships s ON s.id = p.active_ship_id WHERE p.id = ?1",
            rusqlite::params![ctx.player_id],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)),
        )
        .map_err(|_| EngineError::planet_not_found("no active ship"))?;
    Ok(OutboundFrame::ok(
        "combat.status.v1",
        None,
        json!({"hull": hull, "shields": shields, "fighters": fighters, "mines": mines}),
    ))
}

/// Deploy fighters off the active ship into the current sector. Deployed
/// fighters belong to the sector, not the ship, until recalled or swept.
pub fn deploy_fighters(
    store: &Store,
    ctx: &ClientContext,
    data: &serde_json::Value,
    now: i64,
) -> HandlerResult<OutboundFrame> {
    let count = require_u32_positive(data, "count")? as i64;
    let (ship_id, on_hand) = active_ship_stock(store, ctx.player_id, "fighters")?;
    if count > on_hand {
        return Err(Refusal::new(codes::REF_NOT_PERMITTED, "not enough fighters aboard").into());
    }
    store
        .execute("UPDATE ships SET fighters = fighters - ?1 WHERE id = ?2", rusqlite::params![count, ship_id])
        .map_err(super::db_err)?;
    deposit_deployable(store, ctx.sector_id, ctx.player_id, "fighters", count, now)?;
    Ok(OutboundFrame::ok("combat.deploy_fighters.v1", None, json!({"deployed": count})))
}

/// Lay mines in the current sector, same mechanics as deployed fighters but
/// under the `mines` kind -- decays via the `traps_process` cron task.
pub fn lay_mines(
    store: &Store,
    ctx: &ClientContext,
    data: &serde_json::Value,
    now: i64,
) -> HandlerResult<OutboundFrame> {
    let count = require_u32_positive(data, "count")? as i64;
    let (ship_id, on_hand) = active_ship_stock(store, ctx.player_id, "mines")?;
    if count > on_hand {
        return Err(Refusal::new(codes::REF_NOT_PERMITTED, "not enough mines aboard").into());
    }
    store
        .execute("UPDATE ships SET mines = mines - ?1 WHERE id = ?2", rusqlite::params![count, ship_id])
        .map_err(super::db_err)?;
    deposit_deployable(store, ctx.sector_id, ctx.player_id, "mines", count, now)?;
    Ok(OutboundFrame::ok("combat.lay_mines.v1", None, json!({"laid": count})))
}

/// Alias kept for the `combat.deploy_mines` spelling used by older clients.
pub fn deploy_mines(store: &Store, ctx: &ClientContext, data: &serde_json::Value, now: i64) -> HandlerResult<OutboundFrame> {
    lay_mines(store, ctx, data, now)
}

/// Clear every mine belonging to someone else out of the current sector.
/// A limpet-equivalent sweep: no cost beyond being present and armed.
pub fn sweep_mines(store: &Store, ctx: &ClientContext) -> HandlerResult<OutboundFrame> {
    let cleared: i64 = store
        .query_row(
            "SELECT COALESCE(SUM(count), 0) FROM sector_deployables
             WHERE sector_id = ?1 AND kind = 'mines' AND owner_player_id != ?2",
            rusqlite::params![ctx.sector_id, ctx.player_id],
            |r| r.get(0),
        )
        .map_err(super::db_err)?;
    store
        .execute(
            "DELETE FROM sector_deployables WHERE sector_id = ?1 AND kind = 'mines' AND owner_player_id != ?2",
            rusqlite::params![ctx.sector_id, ctx.player_id],
        )
        .map_err(super::db_err)?;
    Ok(OutboundFrame::ok("combat.sweep_mines.v1", None, json!({"cleared": cleared})))
}

/// `scrub_mines` clears only the caller's own mines, e.g. before abandoning
/// a sector they no longer want to contest.
pub fn scrub_mines(store: &Store, ctx: &ClientContext) -> HandlerResult<OutboundFrame> {
    let cleared: i64 = store
        .query_row(
            "SELECT COALESCE(count, 0) FROM sector_deployables WHERE sector_id = ?1 AND kind = 'mines' AND owner_player_id = ?2",
            rusqlite::params![ctx.sector_id, ctx.player_id],
            |r| r.get(0),
        )
        .unwrap_or(0);
    store
        .execute(
            "DELETE FROM sector_deployables WHERE sector_id = ?1 AND kind = 'mines' AND owner_player_id = ?2",
            rusqlite::params![ctx.sector_id, ctx.player_id],
        )
        .map_err(super::db_err)?;
    Ok(OutboundFrame::ok("combat.scrub_mines.v1", None, json!({"cleared": cleared})))
}

fn recall(store: &Store, ctx: &ClientContext, kind: &str) -> HandlerResult<OutboundFrame> {
    let (ship_id, _) = active_ship_stock(store, ctx.player_id, kind)?;
    let count: i64 = store
        .query_row(
            "SELECT count FROM sector_deployables WHERE sector_id = ?1 AND owner_player_id = ?2 AND kind = ?3",
            rusqlite::params![ctx.sector_id, ctx.player_id, kind],
            |r| r.get(0),
        )
        .unwrap_or(0);
    if count > 0 {
        store
            .execute(
                &format!("UPDATE ships SET {kind} = {kind} + ?1 WHERE id = ?2"),
                rusqlite::params![count, ship_id],
            )
            .map_err(super::db_err)?;
        store
            .execute(
                "DELETE FROM sector_deployables WHERE sector_id = ?1 AND owner_player_id = ?2 AND kind = ?3",
                rusqlite::params![ctx.sector_id, ctx.player_id, kind],
            )
            .map_err(super::db_err)?;
    }
    Ok(OutboundFrame::ok(format!("combat.{kind}_recall.v1"), None, json!({"recalled": count})))
}

pub fn recall_fighters(store: &Store, ctx: &ClientContext) -> HandlerResult<OutboundFrame> {
    recall(store, ctx, "fighters")
}

pub fn recall_mines(store: &Store, ctx: &ClientContext) -> HandlerResult<OutboundFrame> {
    recall(store, ctx, "mines")
}

/// Attack a planet's defense fighters rather than a ship. Same absorption
/// rule as ship combat, against `planets.fighters` instead of hull/shields.
pub fn attack_planet(
    store: &Store,
    ctx: &ClientContext,
    data: &serde_json::Value,
    now: i64,
) -> HandlerResult<OutboundFrame> {
    let planet_id = require_i64(data, "planet_id")?;
    let (attacker_sector, attacker_fighters) = active_ship_stock(store, ctx.player_id, "fighters")
        .map(|(_, f)| (ctx.sector_id, f))?;

    let (planet_sector, defense_fighters): (i64, i64) = store
        .query_row(
            "SELECT sector_id, fighters FROM planets WHERE id = ?1",
            rusqlite::params![planet_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .map_err(|_| EngineError::planet_not_found("planet not found"))?;
    if planet_sector != attacker_sector {
        return Err(Refusal::new(codes::REF_NOT_PERMITTED, "planet is not in this sector").into());
    }
    if attacker_fighters <= 0 {
        return Err(Refusal::new(codes::REF_NOT_PERMITTED, "no fighters to attack with").into());
    }

    let damage = attacker_fighters.min(defense_fighters.max(0));
    let remaining = (defense_fighters - damage).max(0);
    store
        .execute("UPDATE planets SET fighters = ?1 WHERE id = ?2", rusqlite::params![remaining, planet_id])
        .map_err(super::db_err)?;
    store
        .execute(
            "INSERT INTO engine_events (ts, type, actor_player_id, sector_id, payload) VALUES (?1, 'combat.attack_planet', ?2, ?3, ?4)",
            rusqlite::params![
                now,
                ctx.player_id,
                attacker_sector,
                json!({"planet_id": planet_id, "damage": damage, "remaining_fighters": remaining}).to_string()
            ],
        )
        .map_err(super::db_err)?;

    Ok(OutboundFrame::ok(
        "combat.attack_planet.v1",
        None,
        json!({"planet_id": planet_id, "damage_dealt": damage, "remaining_fighters": remaining}),
    ))
}

/// Run when a ship enters `sector_id`: hostile mines detonate against the
/// hull, hostile deployed fighters engage before the ship can do anything
/// else. Called from the movement handlers right after the sector change is
/// committed.
pub fn apply_entry_hazards(
    store: &Store,
    ctx: &ClientContext,
    sector_id: i64,
    now: i64,
) -> Result<serde_json::Value, EngineError> {
    let ship_id: Option<i64> = store
        .query_row(
            "SELECT active_ship_id FROM players WHERE id = ?1",
            rusqlite::params![ctx.player_id],
            |r| r.get(0),
        )
        .map_err(super::db_err)?;
    let Some(ship_id) = ship_id else {
        return Ok(json!({"mines_hit": 0, "fighters_engaged": 0, "hull_damage": 0}));
    };

    let hostile_mines: i64 = store
        .query_row(
            "SELECT COALESCE(SUM(count), 0) FROM sector_deployables WHERE sector_id = ?1 AND kind = 'mines' AND owner_player_id != ?2",
            rusqlite::params![sector_id, ctx.player_id],
            |r| r.get(0),
        )
        .map_err(super::db_err)?;
    let mines_hit = hostile_mines.min(1);
    if mines_hit > 0 {
        store
            .execute(
                "UPDATE sector_deployables SET count = count - ?1 WHERE sector_id = ?2 AND kind = 'mines' AND owner_player_id != ?3",
                rusqlite::params![mines_hit, sector_id, ctx.player_id],
            )
            .map_err(super::db_err)?;
        store
            .execute(
                "DELETE FROM sector_deployables WHERE sector_id = ?1 AND kind = 'mines' AND count <= 0",
                rusqlite::params![sector_id],
            )
            .map_err(super::db_err)?;
    }

    let fighters_engaged: i64 = store
        .query_row(
            "SELECT COALESCE(SUM(count), 0) FROM sector_deployables WHERE sector_id = ?1 AND kind = 'fighters' AND owner_player_id != ?2",
            rusqlite::params![sector_id, ctx.player_id],
            |r| r.get(0),
        )
        .map_err(super::db_err)?
        .min(50);

    let hull_damage = mines_hit * 10 + fighters_engaged;
    if hull_damage > 0 {
        store
            .execute(
                "UPDATE ships SET hull = MAX(hull - ?1, 0) WHERE id = ?2",
                rusqlite::params![hull_damage, ship_id],
            )
            .map_err(super::db_err)?;
        store
            .execute(
                "INSERT INTO engine_events (ts, type, actor_player_id, sector_id, payload) VALUES (?1, 'combat.entry_hazard', ?2, ?3, ?4)",
                rusqlite::params![
                    now,
                    ctx.player_id,
                    sector_id,
                    json!({"mines_hit": mines_hit, "fighters_engaged": fighters_engaged, "hull_damage": hull_damage}).to_string()
                ],
            )
            .map_err(super::db_err)?;
    }

    Ok(json!({"mines_hit": mines_hit, "fighters_engaged": fighters_engaged, "hull_damage": hull_damage}))
}

fn active_ship_stock(store: &Store, player_id: i64, column: &str) -> Result<(i64, i64), EngineError> {
    store
        .query_row(
            &format!("SELECT s.id, s.{column} FROM players p JOIN ships s ON s.id = p.active_ship_id WHERE p.id = ?1"),
            rusqlite::params![player_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .map_err(|_| EngineError::planet_not_found("no active ship"))
}

fn deposit_deployable(store: &Store, sector_id: i64, player_id: i64, kind: &str, count: i64, now: i64) -> Result<(), EngineError> {
    store
        .execute(
            "INSERT INTO sector_deployables (sector_id, owner_player_id, kind, count, placed_at) VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(sector_id, owner_player_id, kind) DO UPDATE SET count = count + excluded.count, placed_at = excluded.placed_at",
            rusqlite::params![sector_id, player_id, kind, count, now],
        )
        .map_err(super::db_err)?;
    Ok(())
}
