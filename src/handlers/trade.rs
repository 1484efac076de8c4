//! Port trading, priced by fill ratio against the port's elasticity curve.

use serde_json::json;

use crate::dispatcher::ClientContext;
use crate::envelope::OutboundFrame;
use crate::error::{codes, EngineError, HandlerResult, Refusal};
use crate::store::Store;

use super::{require_i64, require_str, require_u32_positive};

struct PriceInputs {
    base_price: i64,
    quantity: i64,
    size: i64,
    sell_coeff: f64,
    buy_coeff: f64,
}

/// `r` is the fraction of the port's nominal capacity (`size * 1000` units)
/// currently on hand. Both prices are clamped to a floor of 1 credit/unit.
fn sell_price(p: &PriceInputs) -> i64 {
    let r = p.quantity as f64 / (p.size as f64 * 1000.0);
    let price = p.base_price as f64 * (p.sell_coeff - r);
    price.max(1.0) as i64
}

fn buy_price(p: &PriceInputs) -> i64 {
    let r = p.quantity as f64 / (p.size as f64 * 1000.0);
    let price = p.base_price as f64 * (1.0 - p.buy_coeff * r);
    price.max(1.0) as i64
}

fn load_price_inputs(store: &Store, port_id: i64, commodity: &str) -> Result<PriceInputs, EngineError> {
    let (size, economy_curve): (i64, String) = store
        .query_row(
            "SELECT size, economy_curve FROM ports WHERE id = ?1",
            rusqlite::params![port_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .map_err(|_| EngineError::planet_not_found("port not found"))?;

    let (base_price,): (i64,) = store
        .query_row(
            "SELECT base_price FROM commodities WHERE code = ?1",
            rusqlite::params![commodity],
            |r| Ok((r.get(0)?,)),
        )
        .map_err(|_| EngineError::Malformed(format!("unknown commodity '{commodity}'")))?;

    let quantity: i64 = store
        .query_row(
            "SELECT quantity FROM entity_stock WHERE entity_type = 'port' AND entity_id = ?1 AND commodity_code = ?2",
            rusqlite::params![port_id, commodity],
            |r| r.get(0),
        )
        .unwrap_or(0);

    let (sell_coeff, buy_coeff): (f64, f64) = store
        .query_row(
            "SELECT sell_coeff, buy_coeff FROM economy_curve WHERE name = ?1",
            rusqlite::params![economy_curve],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .unwrap_or((1.5, 0.5));

    Ok(PriceInputs {
        base_price,
        quantity,
        size,
        sell_coeff,
        buy_coeff,
    })
}

pub fn quote(store: &Store, data: &serde_json::Value) -> HandlerResult<OutboundFrame> {
    let port_id = require_i64(data, "port_id")?;
    let commodity = require_str(data, "commodity")?;
    let inputs = load_price_inputs(store, port_id, commodity)?;
    Ok(OutboundFrame::ok(
        "trade.quote.v1",
        None,
        json!({
            "port_id": port_id,
            "commodity": commodity,
            "sell_to_player": sell_price(&inputs),
            "buy_from_player": buy_price(&inputs),
        }),
    ))
}

/// Player buys from the port (the port sells its stock to the player).
pub fn buy(
    store: &Store,
    ctx: &ClientContext,
    data: &serde_json::Value,
    now: i64,
) -> HandlerResult<OutboundFrame> {
    let port_id = require_i64(data, "port_id")?;
    let commodity = require_str(data, "commodity")?;
    let units = require_u32_positive(data, "units")? as i64;

    let can_sell: i64 = store
        .query_row(
            "SELECT sells FROM port_trade WHERE port_id = ?1 AND commodity_code = ?2",
            rusqlite::params![port_id, commodity],
            |r| r.get(0),
        )
        .unwrap_or(0);
    if can_sell == 0 {
        return Err(Refusal::new(codes::REF_NOT_PERMITTED, "port does not sell that commodity").into());
    }

    let inputs = load_price_inputs(store, port_id, commodity)?;
    if units > inputs.quantity {
        return Err(Refusal::new(codes::REF_NOT_PERMITTED, "port does not have that much stock").into());
    }
    let price_per_unit = sell_price(&inputs);
    let total_price = price_per_unit * units;

    let (ship_id, holds, used, credits): (i64, i64, i64, i64) = store
        .query_row(
            "SELECT s.id, st.holds, s.ore + s.organics + s.equipment + s.colonists,
                    (SELECT balance FROM bank_accounts WHERE owner_type='player' AND owner_id=p.id AND currency='CRD')
             FROM players p JOIN ships s ON s.id = p.active_ship_id JOIN shiptypes st ON st.code = s.shiptype_code
             WHERE p.id = ?1",
            rusqlite::params![ctx.player_id],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)),
        )
        .map_err(|_| EngineError::planet_not_found("no active ship"))?;

    if used + units > holds {
        return Err(Refusal::new(codes::REF_CARGO_CAP_EXCEEDS, "cargo hold full").into());
    }
    if credits < total_price {
        return Err(Refusal::new(codes::REF_INSUFFICIENT_FUNDS, "insufficient credits").into());
    }

    let col = commodity_column(commodity)?;
    store
        .execute(
            &format!("UPDATE ships SET {col} = {col} + ?1 WHERE id = ?2"),
            rusqlite::params![units, ship_id],
        )
        .map_err(super::db_err)?;
    store
        .execute(
            "UPDATE entity_stock SET quantity = quantity - ?1, last_updated_ts = ?2
             WHERE entity_type = 'port' AND entity_id = ?3 AND commodity_code = ?4",
            rusqlite::params![units, now, port_id, commodity],
        )
        .map_err(super::db_err)?;

    charge_player(store, ctx.player_id, total_price, "TRADE_BUY", now)?;
    log_trade(store, ctx.player_id, port_id, commodity, "BUY", units, price_per_unit, total_price, now)?;

    Ok(OutboundFrame::ok(
        "trade.buy.v1",
        None,
        json!({"units": units, "price_per_unit": price_per_unit, "total_price": total_price}),
    ))
}

/// Player sells to the port (the port buys the player's cargo).
pub fn sell(
    store: &Store,
    ctx: &ClientContext,
    data: &serde_json::Value,
    now: i64,
) -> HandlerResult<OutboundFrame> {
    let port_id = require_i64(data, "port_id")?;
    let commodity = require_str(data, "commodity")?;
    let units = require_u32_positive(data, "units")? as i64;

    let can_buy: i64 = store
        .query_row(
            "SELECT buys FROM port_trade WHERE port_id = ?1 AND commodity_code = ?2",
            rusqlite::params![port_id, commodity],
            |r| r.get(0),
        )
        .unwrap_or(0);
    if can_buy == 0 {
        return Err(Refusal::new(codes::REF_NOT_PERMITTED, "port does not buy that commodity").into());
    }

    let inputs = load_price_inputs(store, port_id, commodity)?;
    let price_per_unit = buy_price(&inputs);
    let total_price = price_per_unit * units;

    let col = commodity_column(commodity)?;
    let (ship_id, on_hand): (i64, i64) = store
        .query_row(
            &format!(
                "SELECT s.id, s.{col} FROM players p JOIN ships s ON s.id = p.active_ship_id WHERE p.id = ?1"
            ),
            rusqlite::params![ctx.player_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .map_err(|_| EngineError::planet_not_found("no active ship"))?;

    if units > on_hand {
        return Err(Refusal::new(codes::REF_CARGO_CAP_EXCEEDS, "not enough cargo on hand").into());
    }

    store
        .execute(
            &format!("UPDATE ships SET {col} = {col} - ?1 WHERE id = ?2"),
            rusqlite::params![units, ship_id],
        )
        .map_err(super::db_err)?;
    store
        .execute(
            "INSERT INTO entity_stock (entity_type, entity_id, commodity_code, quantity, last_updated_ts)
             VALUES ('port', ?1, ?2, ?3, ?4)
             ON CONFLICT(entity_type, entity_id, commodity_code) DO UPDATE SET
                quantity = quantity + excluded.quantity, last_updated_ts = excluded.last_updated_ts",
            rusqlite::params![port_id, commodity, units, now],
        )
        .map_err(super::db_err)?;

    credit_player(store, ctx.player_id, total_price, "TRADE_SELL", now)?;
    log_trade(store, ctx.player_id, port_id, commodity, "SELL", units, price_per_unit, total_price, now)?;

    Ok(OutboundFrame::ok(
        "trade.sell.v1",
        None,
        json!({"units": units, "price_per_unit": price_per_unit, "total_price": total_price}),
    ))
}

/// Rob a port's petty cash. Risk scales with `law_enforcement.patrol_strength`
/// in that sector; a failed attempt draws a fine and a bust record, and a
/// successful one is rate-limited per `player_last_rob`.
const ROB_COOLDOWN_SEC: i64 = 3600;

pub fn rob(store: &Store, ctx: &ClientContext, data: &serde_json::Value, now: i64) -> HandlerResult<OutboundFrame> {
    let port_id = require_i64(data, "port_id")?;
    let port_sector: i64 = store
        .query_row("SELECT sector_id FROM ports WHERE id = ?1", rusqlite::params![port_id], |r| r.get(0))
        .map_err(|_| EngineError::planet_not_found("port not found"))?;
    if port_sector != ctx.sector_id {
        return Err(Refusal::new(codes::REF_NOT_PERMITTED, "port is not in this sector").into());
    }

    let last_attempt: Option<i64> = store
        .query_row(
            "SELECT ts FROM player_last_rob WHERE player_id = ?1 AND port_id = ?2",
            rusqlite::params![ctx.player_id, port_id],
            |r| r.get(0),
        )
        .ok();
    if let Some(ts) = last_attempt {
        if now - ts < ROB_COOLDOWN_SEC {
            return Err(Refusal::new(codes::REF_COOLDOWN, "this port was robbed too recently").into());
        }
    }

    let patrol_strength: i64 = store
        .query_row(
            "SELECT patrol_strength FROM law_enforcement WHERE sector_id = ?1",
            rusqlite::params![ctx.sector_id],
            |r| r.get(0),
        )
        .unwrap_or(0);

    store
        .execute(
            "INSERT INTO player_last_rob (player_id, port_id, ts) VALUES (?1, ?2, ?3)
             ON CONFLICT(player_id, port_id) DO UPDATE SET ts = excluded.ts",
            rusqlite::params![ctx.player_id, port_id, now],
        )
        .map_err(super::db_err)?;

    let roll = (now.rem_euclid(100)) as i64;
    let caught = roll < patrol_strength.min(90);
    if caught {
        store
            .execute(
                "INSERT INTO port_busts (player_id, port_id, ts) VALUES (?1, ?2, ?3)",
                rusqlite::params![ctx.player_id, port_id, now],
            )
            .map_err(super::db_err)?;
        let fine_amount = 500;
        store
            .execute(
                "INSERT INTO fines (player_id, amount, reason, created_at) VALUES (?1, ?2, 'PORT_ROBBERY', ?3)",
                rusqlite::params![ctx.player_id, fine_amount, now],
            )
            .map_err(super::db_err)?;
        return Ok(OutboundFrame::ok(
            "trade.rob.v1",
            None,
            json!({"caught": true, "fine": fine_amount}),
        ));
    }

    let (petty_cash,): (i64,) = store
        .query_row("SELECT petty_cash FROM ports WHERE id = ?1", rusqlite::params![port_id], |r| Ok((r.get(0)?,)))
        .map_err(super::db_err)?;
    let take = petty_cash / 4;
    store
        .execute("UPDATE ports SET petty_cash = petty_cash - ?1 WHERE id = ?2", rusqlite::params![take, port_id])
        .map_err(super::db_err)?;
    if take > 0 {
        credit_player(store, ctx.player_id, take, "PORT_ROBBERY", now)?;
    }
    Ok(OutboundFrame::ok("trade.rob.v1", None, json!({"caught": false, "stolen": take})))
}

pub fn history(store: &Store, ctx: &ClientContext) -> HandlerResult<OutboundFrame> {
    let mut stmt = store
        .prepare(
            "SELECT ts, port_id, commodity_code, direction, units, price_per_unit, total_price
             FROM trade_log WHERE player_id = ?1 ORDER BY ts DESC LIMIT 50",
        )
        .map_err(super::db_err)?;
    let rows: Vec<_> = stmt
        .query_map(rusqlite::params![ctx.player_id], |r| {
            Ok(json!({
                "ts": r.get::<_, i64>(0)?,
                "port_id": r.get::<_, i64>(1)?,
                "commodity": r.get::<_, String>(2)?,
                "direction": r.get::<_, String>(3)?,
                "units": r.get::<_, i64>(4)?,
                "price_per_unit": r.get::<_, i64>(5)?,
                "total_price": r.get::<_, i64>(6)?,
            }))
        })
        .map_err(super::db_err)?
        .collect::<Result<_, _>>()
        .map_err(super::db_err)?;
    Ok(OutboundFrame::ok("trade.history.v1", None, json!({"trades": rows})))
}

fn commodity_column(commodity: &str) -> Result<&'static str, EngineError> {
    match commodity {
        "ORE" => Ok("ore"),
        "ORG" => Ok("organics"),
        "EQU" => Ok("equipment"),
        other => Err(EngineError::Malformed(format!("unknown commodity '{other}'"))),
    }
}

fn charge_player(store: &Store, player_id: i64, amount: i64, tx_type: &str, now: i64) -> Result<(), EngineError> {
    let account_id: i64 = store
        .query_row(
            "SELECT id FROM bank_accounts WHERE owner_type = 'player' AND owner_id = ?1 AND currency = 'CRD'",
            rusqlite::params![player_id],
            |r| r.get(0),
        )
        .map_err(super::db_err)?;
    store
        .execute(
            "INSERT INTO bank_transactions (account_id, tx_type, direction, amount, currency, ts) VALUES (?1, ?2, 'DEBIT', ?3, 'CRD', ?4)",
            rusqlite::params![account_id, tx_type, amount, now],
        )
        .map_err(|e| {
            if e.to_string().contains("BANK_INSUFFICIENT_FUNDS") {
                EngineError::Malformed("insufficient funds".into())
            } else {
                EngineError::Db(e.to_string())
            }
        })?;
    Ok(())
}

fn credit_player(store: &Store, player_id: i64, amount: i64, tx_type: &str, now: i64) -> Result<(), EngineError> {
    let account_id: i64 = store
        .query_row(
            "SELECT id FROM bank_accounts WHERE owner_type = 'player' AND owner_id = ?1 AND currency = 'CRD'",
            rusqlite::params![player_id],
            |r| r.get(0),
        )
        .map_err(super::db_err)?;
    store
        .execute(
            "INSERT INTO bank_transactions (account_id, tx_type, direction, amount, currency, ts) VALUES (?1, ?2, 'CREDIT', ?3, 'CRD', ?4)",
            rusqlite::params![account_id, tx_type, amount, now],
        )
        .map_err(super::db_err)?;
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn log_trade(
    store: &Store,
    player_id: i64,
    port_id: i64,
    commodity: &str,
    direction: &str,
    units: i64,
    price_per_unit: i64,
    total_price: i64,
    now: i64,
) -> Result<(), EngineError> {
    store
        .execute(
            "INSERT INTO trade_log (ts, player_id, port_id, commodity_code, direction, units, price_per_unit, total_price)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            rusqlite::params![now, player_id, port_id, commodity, direction, units, price_per_unit, total_price],
        )
        .map_err(super::db_err)?;
    store
        .execute(
            "INSERT INTO engine_events (ts, type, actor_player_id, payload) VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![
                now,
                format!("trade.{}", direction.to_lowercase()),
                player_id,
                json!({"port_id": port_id, "commodity": commodity, "units": units}).to_string()
            ],
        )
        .map_err(super::db_err)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sell_price_decreases_with_fill_ratio() {
        let low = PriceInputs { base_price: 100, quantity: 0, size: 4, sell_coeff: 1.5, buy_coeff: 0.5 };
        let high = PriceInputs { base_price: 100, quantity: 3000, size: 4, sell_coeff: 1.5, buy_coeff: 0.5 };
        assert!(sell_price(&low) > sell_price(&high));
    }

    #[test]
    fn buy_price_is_always_below_sell_price_at_same_fill() {
        let inputs = PriceInputs { base_price: 100, quantity: 1500, size: 4, sell_coeff: 1.5, buy_coeff: 0.5 };
        assert!(buy_price(&inputs) < sell_price(&inputs));
    }

    #[test]
    fn prices_never_drop_below_one() {
        let inputs = PriceInputs { base_price: 1, quantity: 4000, size: 4, sell_coeff: 1.5, buy_coeff: 0.5 };
        assert!(sell_price(&inputs) >= 1);
        assert!(buy_price(&inputs) >= 1);
    }
}
