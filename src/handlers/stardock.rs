use serde_json::json;

use crate::dispatcher::ClientContext;
use crate::envelope::OutboundFrame;
use crate::error::{codes, EngineError, HandlerError, HandlerResult, Refusal};
use crate::store::Store;

use super::require_str;

pub fn list(store: &Store, ctx: &ClientContext) -> HandlerResult<OutboundFrame> {
    shipyard_list(store, ctx)
}

pub fn hardware_list(store: &Store) -> HandlerResult<OutboundFrame> {
    let mut stmt = store
        .prepare("SELECT code, name, price, required_tech_level FROM hardware_items ORDER BY price")
        .map_err(super::db_err)?;
    let rows: Vec<_> = stmt
        .query_map([], |r| {
            Ok(json!({
                "code": r.get::<_, String>(0)?,
                "name": r.get::<_, String>(1)?,
                "price": r.get::<_, i64>(2)?,
                "required_tech_level": r.get::<_, i64>(3)?,
            }))
        })
        .map_err(super::db_err)?
        .collect::<Result<_, _>>()
        .map_err(super::db_err)?;
    Ok(OutboundFrame::ok("hardware.list.v1", None, json!({"items": rows})))
}

pub fn hardware_buy(
    store: &Store,
    ctx: &ClientContext,
    data: &serde_json::Value,
    now: i64,
) -> HandlerResult<OutboundFrame> {
    let code = require_str(data, "code")?;
    let (price,): (i64,) = store
        .query_row(
            "SELECT price FROM hardware_items WHERE code = ?1",
            rusqlite::params![code],
            |r| Ok((r.get(0)?,)),
        )
        .map_err(|_| EngineError::Malformed(format!("unknown hardware item '{code}'")))?;

    let account_id: i64 = store
        .query_row(
            "SELECT id FROM bank_accounts WHERE owner_type = 'player' AND owner_id = ?1 AND currency = 'CRD'",
            rusqlite::params![ctx.player_id],
            |r| r.get(0),
        )
        .map_err(super::db_err)?;
    store
        .execute(
            "INSERT INTO bank_transactions (account_id, tx_type, direction, amount, currency, ts) VALUES (?1, 'HARDWARE_PURCHASE', 'DEBIT', ?2, 'CRD', ?3)",
            rusqlite::params![account_id, price, now],
        )
        .map_err(|e| {
            if e.to_string().contains("BANK_INSUFFICIENT_FUNDS") {
                HandlerError::from(Refusal::new(codes::REF_INSUFFICIENT_FUNDS, "insufficient funds"))
            } else {
                EngineError::Db(e.to_string()).into()
            }
        })?;

    let ship_id: i64 = store
        .query_row("SELECT active_ship_id FROM players WHERE id = ?1", rusqlite::params![ctx.player_id], |r| r.get(0))
        .map_err(super::db_err)?;
    match code {
        "SCANNER_MK1" => store.execute("UPDATE ships SET has_scanners = 1 WHERE id = ?1", rusqlite::params![ship_id]),
        "CLOAK_MK1" => store.execute("UPDATE ships SET has_cloak = 1 WHERE id = ?1", rusqlite::params![ship_id]),
        _ => Ok(0),
    }
    .map_err(super::db_err)?;

    Ok(OutboundFrame::ok("hardware.buy.v1", None, json!({"code": code, "price": price})))
}

/// Dock the active ship at a port in the current sector. Docking is the
/// precondition every stardock service (`ship.repair`, `ship.upgrade`,
/// `ship.sell`) checks before touching the ship.
pub fn dock(store: &Store, ctx: &ClientContext) -> HandlerResult<OutboundFrame> {
    let port_id: i64 = store
        .query_row(
            "SELECT id FROM ports WHERE sector_id = ?1",
            rusqlite::params![ctx.sector_id],
            |r| r.get(0),
        )
        .map_err(|_| EngineError::Malformed("no port in this sector".into()))?;
    let updated = store
        .execute(
            "UPDATE ships SET is_docked = 1 WHERE id = (SELECT active_ship_id FROM players WHERE id = ?1)",
            rusqlite::params![ctx.player_id],
        )
        .map_err(super::db_err)?;
    if updated == 0 {
        return Err(EngineError::planet_not_found("no active ship").into());
    }
    Ok(OutboundFrame::ok("dock.status.v1", None, json!({"docked": true, "port_id": port_id})))
}

pub fn undock(store: &Store, ctx: &ClientContext) -> HandlerResult<OutboundFrame> {
    let updated = store
        .execute(
            "UPDATE ships SET is_docked = 0 WHERE id = (SELECT active_ship_id FROM players WHERE id = ?1)",
            rusqlite::params![ctx.player_id],
        )
        .map_err(super::db_err)?;
    if updated == 0 {
        return Err(EngineError::planet_not_found("no active ship").into());
    }
    Ok(OutboundFrame::ok("dock.status.v1", None, json!({"docked": false})))
}

pub fn dock_status(store: &Store, ctx: &ClientContext) -> HandlerResult<OutboundFrame> {
    let is_docked: i64 = store
        .query_row(
            "SELECT s.is_docked FROM players p JOIN ships s ON s.id = p.active_ship_id WHERE p.id = ?1",
            rusqlite::params![ctx.player_id],
            |r| r.get(0),
        )
        .map_err(|_| EngineError::planet_not_found("no active ship"))?;
    Ok(OutboundFrame::ok("dock.status.v1", None, json!({"docked": is_docked != 0})))
}

pub fn shipyard_list(store: &Store, ctx: &ClientContext) -> HandlerResult<OutboundFrame> {
    let mut stmt = store
        .prepare(
            "SELECT si.shiptype_code, st.name, st.base_price, si.stock
             FROM shipyard_inventory si JOIN shiptypes st ON st.code = si.shiptype_code
             WHERE si.sector_id = ?1 ORDER BY st.base_price",
        )
        .map_err(super::db_err)?;
    let rows: Vec<_> = stmt
        .query_map(rusqlite::params![ctx.sector_id], |r| {
            Ok(json!({
                "shiptype": r.get::<_, String>(0)?,
                "name": r.get::<_, String>(1)?,
                "base_price": r.get::<_, i64>(2)?,
                "stock": r.get::<_, i64>(3)?,
            }))
        })
        .map_err(super::db_err)?
        .collect::<Result<_, _>>()
        .map_err(super::db_err)?;
    Ok(OutboundFrame::ok("shipyard.list.v1", None, json!({"sector_id": ctx.sector_id, "inventory": rows})))
}
