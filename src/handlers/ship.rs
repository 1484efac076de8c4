use serde_json::json;

use crate::dispatcher::ClientContext;
use crate::envelope::OutboundFrame;
use crate::error::{codes, EngineError, HandlerResult, Refusal};
use crate::store::Store;

use super::{require_i64, require_str};

const REPAIR_CREDITS_PER_HULL_POINT: i64 = 5;
const CLOAK_DURATION_SEC: i64 = 300;

pub fn status(store: &Store, ctx: &ClientContext) -> HandlerResult<OutboundFrame> {
    let row = store
        .query_row(
            "SELECT s.id, s.name, s.shiptype_code, s.sector_id, s.ore, s.organics, s.equipment,
                    s.colonists, s.fighters, s.shields, s.hull, s.is_docked, st.holds
             FROM ships s JOIN shiptypes st ON st.code = s.shiptype_code
             JOIN players p ON p.active_ship_id = s.id WHERE p.id = ?1",
            rusqlite::params![ctx.player_id],
            |r| {
                Ok(json!({
                    "ship_id": r.get::<_, i64>(0)?,
                    "name": r.get::<_, String>(1)?,
                    "shiptype": r.get::<_, String>(2)?,
                    "sector_id": r.get::<_, i64>(3)?,
                    "ore": r.get::<_, i64>(4)?,
                    "organics": r.get::<_, i64>(5)?,
                    "equipment": r.get::<_, i64>(6)?,
                    "colonists": r.get::<_, i64>(7)?,
                    "fighters": r.get::<_, i64>(8)?,
                    "shields": r.get::<_, i64>(9)?,
                    "hull": r.get::<_, i64>(10)?,
                    "is_docked": r.get::<_, i64>(11)? != 0,
                    "holds": r.get::<_, i64>(12)?,
                }))
            },
        )
        .map_err(|_| EngineError::planet_not_found("no active ship"))?;
    Ok(OutboundFrame::ok("ship.status.v1", None, row))
}

pub fn list(store: &Store, ctx: &ClientContext) -> HandlerResult<OutboundFrame> {
    let mut stmt = store
        .prepare(
            "SELECT s.id, s.name, s.shiptype_code, o.is_primary
             FROM ship_ownership o JOIN ships s ON s.id = o.ship_id
             WHERE o.player_id = ?1 ORDER BY o.is_primary DESC, s.id",
        )
        .map_err(super::db_err)?;
    let rows: Vec<_> = stmt
        .query_map(rusqlite::params![ctx.player_id], |r| {
            Ok(json!({
                "ship_id": r.get::<_, i64>(0)?,
                "name": r.get::<_, String>(1)?,
                "shiptype": r.get::<_, String>(2)?,
                "is_primary": r.get::<_, i64>(3)? != 0,
            }))
        })
        .map_err(super::db_err)?
        .collect::<Result<_, _>>()
        .map_err(super::db_err)?;
    Ok(OutboundFrame::ok("ship.list.v1", None, json!({"ships": rows})))
}

pub fn rename(store: &Store, ctx: &ClientContext, data: &serde_json::Value) -> HandlerResult<OutboundFrame> {
    let name = require_str(data, "name")?;
    if name.is_empty() || name.len() > 40 {
        return Err(EngineError::Malformed("ship name must be 1-40 characters".into()).into());
    }
    let updated = store
        .execute(
            "UPDATE ships SET name = ?1 WHERE id = (SELECT active_ship_id FROM players WHERE id = ?2)",
            rusqlite::params![name, ctx.player_id],
        )
        .map_err(super::db_err)?;
    if updated == 0 {
        return Err(EngineError::planet_not_found("no active ship").into());
    }
    Ok(OutboundFrame::ok("ship.rename.v1", None, json!({"name": name})))
}

fn bank_account_id(store: &Store, player_id: i64) -> Result<i64, EngineError> {
    store
        .query_row(
            "SELECT id FROM bank_accounts WHERE owner_type = 'player' AND owner_id = ?1 AND currency = 'CRD'",
            rusqlite::params![player_id],
            |r| r.get(0),
        )
        .map_err(super::db_err)
}

fn credit(store: &Store, player_id: i64, amount: i64, tx_type: &str, now: i64) -> Result<(), EngineError> {
    let account_id = bank_account_id(store, player_id)?;
    store
        .execute(
            "INSERT INTO bank_transactions (account_id, tx_type, direction, amount, currency, ts) VALUES (?1, ?2, 'CREDIT', ?3, 'CRD', ?4)",
            rusqlite::params![account_id, tx_type, amount, now],
        )
        .map_err(super::db_err)?;
    Ok(())
}

fn debit(store: &Store, player_id: i64, amount: i64, tx_type: &str, now: i64) -> Result<(), crate::error::HandlerError> {
    let account_id = bank_account_id(store, player_id)?;
    store
        .execute(
            "INSERT INTO bank_transactions (account_id, tx_type, direction, amount, currency, ts) VALUES (?1, ?2, 'DEBIT', ?3, 'CRD', ?4)",
            rusqlite::params![account_id, tx_type, amount, now],
        )
        .map_err(|e| {
            if e.to_string().contains("BANK_INSUFFICIENT_FUNDS") {
                Refusal::new(codes::REF_INSUFFICIENT_FUNDS, "insufficient funds").into()
            } else {
                crate::error::HandlerError::from(EngineError::Db(e.to_string()))
            }
        })?;
    Ok(())
}

/// Claim an unowned ship sitting idle in the player's current sector --
/// a wreck left by `self_destruct`, or a hull nobody ever claimed.
pub fn claim(store: &Store, ctx: &ClientContext, data: &serde_json::Value, now: i64) -> HandlerResult<OutboundFrame> {
    let ship_id = require_i64(data, "ship_id")?;
    let (sector_id, destroyed): (i64, i64) = store
        .query_row(
            "SELECT sector_id, destroyed FROM ships WHERE id = ?1",
            rusqlite::params![ship_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .map_err(|_| EngineError::planet_not_found("ship not found"))?;
    if destroyed != 0 {
        return Err(Refusal::new(codes::REF_SHIP_DESTROYED, "ship is a wreck").into());
    }
    if sector_id != ctx.sector_id {
        return Err(Refusal::new(codes::REF_NOT_PERMITTED, "ship is not in this sector").into());
    }
    let owned: i64 = store
        .query_row(
            "SELECT COUNT(*) FROM ship_ownership WHERE ship_id = ?1",
            rusqlite::params![ship_id],
            |r| r.get(0),
        )
        .map_err(super::db_err)?;
    if owned != 0 {
        return Err(Refusal::new(codes::REF_NOT_PERMITTED, "ship already has an owner").into());
    }
    let has_primary: i64 = store
        .query_row(
            "SELECT COUNT(*) FROM ship_ownership WHERE player_id = ?1 AND is_primary = 1",
            rusqlite::params![ctx.player_id],
            |r| r.get(0),
        )
        .map_err(super::db_err)?;
    let is_primary = has_primary == 0;
    store
        .execute(
            "INSERT INTO ship_ownership (player_id, ship_id, role, is_primary) VALUES (?1, ?2, 1, ?3)",
            rusqlite::params![ctx.player_id, ship_id, is_primary as i64],
        )
        .map_err(super::db_err)?;
    if is_primary {
        store
            .execute("UPDATE players SET active_ship_id = ?1 WHERE id = ?2", rusqlite::params![ship_id, ctx.player_id])
            .map_err(super::db_err)?;
    }
    store
        .execute(
            "INSERT INTO engine_events (ts, type, actor_player_id, sector_id, payload) VALUES (?1, 'ship.claim', ?2, ?3, ?4)",
            rusqlite::params![now, ctx.player_id, ctx.sector_id, json!({"ship_id": ship_id}).to_string()],
        )
        .map_err(super::db_err)?;
    Ok(OutboundFrame::ok("ship.claim.v1", None, json!({"ship_id": ship_id, "is_primary": is_primary})))
}

/// Sell an owned, docked, non-active ship back to the shipyard for half its
/// base price.
pub fn sell(store: &Store, ctx: &ClientContext, data: &serde_json::Value, now: i64) -> HandlerResult<OutboundFrame> {
    let ship_id = require_i64(data, "ship_id")?;
    let owns: i64 = store
        .query_row(
            "SELECT COUNT(*) FROM ship_ownership WHERE player_id = ?1 AND ship_id = ?2",
            rusqlite::params![ctx.player_id, ship_id],
            |r| r.get(0),
        )
        .map_err(super::db_err)?;
    if owns == 0 {
        return Err(Refusal::new(codes::REF_NOT_PERMITTED, "you do not own that ship").into());
    }
    let (is_docked, active_ship_id, base_price): (i64, Option<i64>, i64) = store
        .query_row(
            "SELECT s.is_docked, p.active_ship_id, st.base_price
             FROM ships s JOIN shiptypes st ON st.code = s.shiptype_code, players p
             WHERE s.id = ?1 AND p.id = ?2",
            rusqlite::params![ship_id, ctx.player_id],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )
        .map_err(super::db_err)?;
    if is_docked == 0 {
        return Err(Refusal::new(codes::REF_NOT_DOCKED, "ship must be docked to sell").into());
    }
    if active_ship_id == Some(ship_id) {
        return Err(Refusal::new(codes::REF_NOT_PERMITTED, "cannot sell your active ship").into());
    }
    let payout = base_price / 2;
    store
        .execute("DELETE FROM ship_ownership WHERE ship_id = ?1", rusqlite::params![ship_id])
        .map_err(super::db_err)?;
    store
        .execute("DELETE FROM ships WHERE id = ?1", rusqlite::params![ship_id])
        .map_err(super::db_err)?;
    credit(store, ctx.player_id, payout, "SHIP_SALE", now)?;
    Ok(OutboundFrame::ok("ship.sell.v1", None, json!({"ship_id": ship_id, "payout": payout})))
}

/// Gift ownership of a non-active ship to another player docked in the
/// same sector.
pub fn transfer(store: &Store, ctx: &ClientContext, data: &serde_json::Value) -> HandlerResult<OutboundFrame> {
    let ship_id = require_i64(data, "ship_id")?;
    let to_player_id = require_i64(data, "to_player_id")?;
    let updated = store
        .execute(
            "UPDATE ship_ownership SET player_id = ?1, is_primary = 0
             WHERE ship_id = ?2 AND player_id = ?3",
            rusqlite::params![to_player_id, ship_id, ctx.player_id],
        )
        .map_err(super::db_err)?;
    if updated == 0 {
        return Err(Refusal::new(codes::REF_NOT_PERMITTED, "you do not own that ship").into());
    }
    Ok(OutboundFrame::ok("ship.transfer.v1", None, json!({"ship_id": ship_id, "to_player_id": to_player_id})))
}

/// Repair the active ship's hull while docked, at a flat credits-per-point
/// rate.
pub fn repair(store: &Store, ctx: &ClientContext, now: i64) -> HandlerResult<OutboundFrame> {
    let (ship_id, is_docked, hull): (i64, i64, i64) = store
        .query_row(
            "SELECT s.id, s.is_docked, s.hull FROM players p JOIN ships s ON s.id = p.active_ship_id WHERE p.id = ?1",
            rusqlite::params![ctx.player_id],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )
        .map_err(|_| EngineError::planet_not_found("no active ship"))?;
    if is_docked == 0 {
        return Err(Refusal::new(codes::REF_NOT_DOCKED, "ship must be docked to repair").into());
    }
    let missing = (100 - hull).max(0);
    if missing == 0 {
        return Ok(OutboundFrame::ok("ship.repair.v1", None, json!({"repaired": 0, "cost": 0})));
    }
    let cost = missing * REPAIR_CREDITS_PER_HULL_POINT;
    debit(store, ctx.player_id, cost, "SHIP_REPAIR", now)?;
    store
        .execute("UPDATE ships SET hull = 100 WHERE id = ?1", rusqlite::params![ship_id])
        .map_err(super::db_err)?;
    Ok(OutboundFrame::ok("ship.repair.v1", None, json!({"repaired": missing, "cost": cost})))
}

/// Trade the active ship in for the next hull listed in this sector's
/// shipyard, paying the list-price difference.
pub fn upgrade(store: &Store, ctx: &ClientContext, data: &serde_json::Value, now: i64) -> HandlerResult<OutboundFrame> {
    let to_shiptype = require_str(data, "shiptype_code")?;
    let (ship_id, is_docked, current_type): (i64, i64, String) = store
        .query_row(
            "SELECT s.id, s.is_docked, s.shiptype_code FROM players p JOIN ships s ON s.id = p.active_ship_id WHERE p.id = ?1",
            rusqlite::params![ctx.player_id],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )
        .map_err(|_| EngineError::planet_not_found("no active ship"))?;
    if is_docked == 0 {
        return Err(Refusal::new(codes::REF_NOT_DOCKED, "ship must be docked to upgrade").into());
    }
    let in_stock: i64 = store
        .query_row(
            "SELECT stock FROM shipyard_inventory WHERE sector_id = ?1 AND shiptype_code = ?2",
            rusqlite::params![ctx.sector_id, to_shiptype],
            |r| r.get(0),
        )
        .unwrap_or(0);
    if in_stock <= 0 {
        return Err(Refusal::new(codes::REF_NOT_PERMITTED, "that hull is not in stock here").into());
    }
    let (current_price, new_price): (i64, i64) = store
        .query_row(
            "SELECT (SELECT base_price FROM shiptypes WHERE code = ?1), (SELECT base_price FROM shiptypes WHERE code = ?2)",
            rusqlite::params![current_type, to_shiptype],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .map_err(super::db_err)?;
    let cost = (new_price - current_price / 2).max(0);
    debit(store, ctx.player_id, cost, "SHIP_UPGRADE", now)?;
    store
        .execute(
            "UPDATE ships SET shiptype_code = ?1 WHERE id = ?2",
            rusqlite::params![to_shiptype, ship_id],
        )
        .map_err(super::db_err)?;
    store
        .execute(
            "UPDATE shipyard_inventory SET stock = stock - 1 WHERE sector_id = ?1 AND shiptype_code = ?2",
            rusqlite::params![ctx.sector_id, to_shiptype],
        )
        .map_err(super::db_err)?;
    Ok(OutboundFrame::ok("ship.upgrade.v1", None, json!({"shiptype_code": to_shiptype, "cost": cost})))
}

/// Destroy the active ship. Ownership is dropped; if the player still owns
/// another ship it becomes the new active ship, otherwise they are left
/// without one until they claim or buy a replacement.
pub fn self_destruct(store: &Store, ctx: &mut ClientContext, now: i64) -> HandlerResult<OutboundFrame> {
    let (ship_id, destroyed): (i64, i64) = store
        .query_row(
            "SELECT s.id, s.destroyed FROM players p JOIN ships s ON s.id = p.active_ship_id WHERE p.id = ?1",
            rusqlite::params![ctx.player_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .map_err(|_| EngineError::planet_not_found("no active ship"))?;
    if destroyed != 0 {
        return Err(Refusal::new(codes::REF_SHIP_DESTROYED, "ship is already destroyed").into());
    }
    store
        .execute("UPDATE ships SET destroyed = 1, hull = 0 WHERE id = ?1", rusqlite::params![ship_id])
        .map_err(super::db_err)?;
    store
        .execute("DELETE FROM ship_ownership WHERE ship_id = ?1", rusqlite::params![ship_id])
        .map_err(super::db_err)?;

    let replacement: Option<i64> = store
        .query_row(
            "SELECT ship_id FROM ship_ownership WHERE player_id = ?1 ORDER BY is_primary DESC LIMIT 1",
            rusqlite::params![ctx.player_id],
            |r| r.get(0),
        )
        .ok();
    store
        .execute(
            "UPDATE players SET active_ship_id = ?1 WHERE id = ?2",
            rusqlite::params![replacement, ctx.player_id],
        )
        .map_err(super::db_err)?;
    store
        .execute(
            "INSERT INTO engine_events (ts, type, actor_player_id, sector_id, payload) VALUES (?1, 'ship.self_destruct', ?2, ?3, ?4)",
            rusqlite::params![now, ctx.player_id, ctx.sector_id, json!({"ship_id": ship_id}).to_string()],
        )
        .map_err(super::db_err)?;

    Ok(OutboundFrame::ok(
        "ship.self_destruct.v1",
        None,
        json!({"ship_id": ship_id, "replacement_ship_id": replacement}),
    ))
}

/// Tow another ship in this sector to wherever the active ship goes next --
/// modeled here as an immediate pull into the active ship's sector.
pub fn tow(store: &Store, ctx: &ClientContext, data: &serde_json::Value) -> HandlerResult<OutboundFrame> {
    let target_ship_id = require_i64(data, "target_ship_id")?;
    let (tower_ship_id, tower_sector): (i64, i64) = store
        .query_row(
            "SELECT s.id, s.sector_id FROM players p JOIN ships s ON s.id = p.active_ship_id WHERE p.id = ?1",
            rusqlite::params![ctx.player_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .map_err(|_| EngineError::planet_not_found("no active ship"))?;
    let (target_sector, destroyed): (i64, i64) = store
        .query_row(
            "SELECT sector_id, destroyed FROM ships WHERE id = ?1",
            rusqlite::params![target_ship_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .map_err(|_| EngineError::planet_not_found("target ship not found"))?;
    if destroyed != 0 {
        return Err(Refusal::new(codes::REF_SHIP_DESTROYED, "target ship is a wreck").into());
    }
    if target_sector != tower_sector {
        return Err(Refusal::new(codes::REF_NOT_PERMITTED, "target ship is not in this sector").into());
    }
    store
        .execute(
            "UPDATE ships SET sector_id = ?1, towed_by_ship_id = ?2 WHERE id = ?3",
            rusqlite::params![tower_sector, tower_ship_id, target_ship_id],
        )
        .map_err(super::db_err)?;
    Ok(OutboundFrame::ok("ship.tow.v1", None, json!({"target_ship_id": target_ship_id, "sector_id": tower_sector})))
}

pub fn cloak(store: &Store, ctx: &ClientContext, now: i64) -> HandlerResult<OutboundFrame> {
    let (ship_id, has_cloak): (i64, i64) = store
        .query_row(
            "SELECT s.id, s.has_cloak FROM players p JOIN ships s ON s.id = p.active_ship_id WHERE p.id = ?1",
            rusqlite::params![ctx.player_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .map_err(|_| EngineError::planet_not_found("no active ship"))?;
    if has_cloak == 0 {
        return Err(Refusal::new(codes::REF_NOT_PERMITTED, "ship has no cloaking device").into());
    }
    let until = now + CLOAK_DURATION_SEC;
    store
        .execute("UPDATE ships SET cloak_until = ?1 WHERE id = ?2", rusqlite::params![until, ship_id])
        .map_err(super::db_err)?;
    Ok(OutboundFrame::ok("ship.cloak.v1", None, json!({"cloak_until": until})))
}

pub fn decloak(store: &Store, ctx: &ClientContext) -> HandlerResult<OutboundFrame> {
    store
        .execute(
            "UPDATE ships SET cloak_until = NULL WHERE id = (SELECT active_ship_id FROM players WHERE id = ?1)",
            rusqlite::params![ctx.player_id],
        )
        .map_err(super::db_err)?;
    Ok(OutboundFrame::ok("ship.decloak.v1", None, json!({})))
}
