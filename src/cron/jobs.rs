//! Bodies for the named tasks seeded into `cron_tasks`. Each job gets one
//! `Store` handle for its run and reports a small summary back to the
//! scheduler for logging -- nothing here holds state across ticks beyond
//! what it reads back out of the database.

use serde_json::{json, Value};

use crate::broadcaster::Broadcaster;
use crate::owner::OwnerRef;
use crate::store::{Store, StoreError};

pub fn run(name: &str, store: &Store, now: i64, broadcaster: &Broadcaster) -> Result<Value, StoreError> {
    match name {
        "daily_turn_reset" => daily_turn_reset(store, now),
        "terra_replenish" => terra_replenish(store, now),
        "planet_growth" => planet_growth(store),
        "fedspace_cleanup" => fedspace_cleanup(store),
        "autouncloak_sweeper" => autouncloak_sweeper(store, now),
        "npc_step" => npc_step(store),
        "broadcast_ttl_cleanup" => broadcast_ttl_cleanup(store, now),
        "daily_news_compiler" => daily_news_compiler(store, now),
        "traps_process" => traps_process(store),
        "cleanup_old_news" => cleanup_old_news(store, now),
        "limpet_ttl_cleanup" => limpet_ttl_cleanup(store, now),
        "daily_lottery_draw" => daily_lottery_draw(store, now, broadcaster),
        "deadpool_resolution_cron" => deadpool_resolution_cron(store, now),
        "tavern_notice_expiry_cron" => tavern_notice_expiry_cron(store, now),
        "loan_shark_interest_cron" => loan_shark_interest_cron(store, now),
        "dividend_payout" => dividend_payout(store, now),
        "daily_stock_price_recalculation" => daily_stock_price_recalculation(store),
        "daily_market_settlement" => daily_market_settlement(store),
        "system_notice_ttl" => system_notice_ttl(store, now),
        "deadletter_retry" => deadletter_retry(store),
        "daily_corp_tax" => daily_corp_tax(store, now),
        "daily_bank_interest_tick" => daily_bank_interest_tick(store, now),
        "port_economy_tick" => port_economy_tick(store, now),
        "planet_market_tick" => planet_market_tick(store),
        "shield_regen_tick" => shield_regen_tick(store),
        "citadel_construction_cron" => citadel_construction_cron(store, now),
        other => {
            log::warn!("cron: no job body registered for '{other}', skipping");
            Ok(json!({"skipped": true}))
        }
    }
}

fn daily_turn_reset(store: &Store, now: i64) -> Result<Value, StoreError> {
    let updated = store.execute(
        "UPDATE players SET turns = 500, last_turn_reset_at = ?1 WHERE last_turn_reset_at < ?1 - 82800",
        rusqlite::params![now],
    )?;
    Ok(json!({"players_reset": updated}))
}

/// NPC-run ports in safe space slowly restock, representing federation
/// resupply rather than player trading.
fn terra_replenish(store: &Store, now: i64) -> Result<Value, StoreError> {
    let updated = store.execute(
        "UPDATE entity_stock SET quantity = quantity + 50, last_updated_ts = ?1
         WHERE entity_type = 'port' AND quantity < 5000
           AND entity_id IN (SELECT po.id FROM ports po JOIN sectors s ON s.id = po.sector_id WHERE s.safe_zone = 1)",
        rusqlite::params![now],
    )?;
    Ok(json!({"stock_rows_replenished": updated}))
}

fn planet_growth(store: &Store) -> Result<Value, StoreError> {
    let updated = store.execute(
        "UPDATE planets SET colonist = colonist + CAST(colonist * (SELECT breeding FROM planettypes WHERE code = planets.type) AS INTEGER) + 1
         WHERE owner_type != 'none'",
        [],
    )?;
    Ok(json!({"planets_grown": updated}))
}

/// Federation space stays free of mines and deployed fighters per the
/// safe-zone invariant; anything left behind there is swept.
fn fedspace_cleanup(store: &Store) -> Result<Value, StoreError> {
    let cleared = store.execute(
        "DELETE FROM sector_deployables WHERE sector_id IN (SELECT id FROM sectors WHERE safe_zone = 1)",
        [],
    )?;
    Ok(json!({"deployables_cleared": cleared}))
}

fn autouncloak_sweeper(store: &Store, now: i64) -> Result<Value, StoreError> {
    let uncloaked = store.execute(
        "UPDATE ships SET cloak_until = NULL WHERE cloak_until IS NOT NULL AND cloak_until <= ?1",
        rusqlite::params![now],
    )?;
    Ok(json!({"ships_uncloaked": uncloaked}))
}

/// NPC-held planets slowly build up defenses; there is no independent NPC
/// ship roster in this model, so "stepping" the NPCs means growing their
/// planetary garrisons toward the planet type's cap.
fn npc_step(store: &Store) -> Result<Value, StoreError> {
    let updated = store.execute(
        "UPDATE planets SET fighters = MIN(fighters + 1, (SELECT max_fighters FROM planettypes WHERE code = planets.type))
         WHERE owner_type = 'npc_faction'",
        [],
    )?;
    Ok(json!({"npc_planets_stepped": updated}))
}

fn broadcast_ttl_cleanup(store: &Store, now: i64) -> Result<Value, StoreError> {
    let deleted = store.execute("DELETE FROM subspace WHERE ts < ?1 - 86400", rusqlite::params![now])?;
    Ok(json!({"subspace_messages_expired": deleted}))
}

fn daily_news_compiler(store: &Store, now: i64) -> Result<Value, StoreError> {
    let trade_count: i64 = store.query_row(
        "SELECT COUNT(*) FROM trade_log WHERE ts >= ?1 - 86400",
        rusqlite::params![now],
        |r| r.get(0),
    )?;
    store.execute(
        "INSERT INTO news_feed (headline, body, sector_id, ts) VALUES (?1, ?2, NULL, ?3)",
        rusqlite::params![
            "Daily Trade Report",
            format!("{trade_count} trades were logged across the galaxy in the last day."),
            now
        ],
    )?;
    Ok(json!({"trade_count": trade_count}))
}

/// Mines age and eventually fizzle out if nobody sweeps them first.
fn traps_process(store: &Store) -> Result<Value, StoreError> {
    store.execute("UPDATE sector_deployables SET count = count - 1 WHERE kind = 'mines' AND count > 0", [])?;
    let expired = store.execute("DELETE FROM sector_deployables WHERE kind = 'mines' AND count <= 0", [])?;
    Ok(json!({"minefields_expired": expired}))
}

fn cleanup_old_news(store: &Store, now: i64) -> Result<Value, StoreError> {
    let deleted = store.execute(
        "DELETE FROM news_feed WHERE ts < ?1 - 604800",
        rusqlite::params![now],
    )?;
    Ok(json!({"news_items_deleted": deleted}))
}

/// Sweeps up idempotency rows orphaned by a crash between the `in_progress`
/// insert and the handler completing -- without this they'd wedge retries
/// of that key forever with `REF_ALREADY_IN_PROGRESS`.
fn limpet_ttl_cleanup(store: &Store, now: i64) -> Result<Value, StoreError> {
    let deleted = store.execute(
        "DELETE FROM idempotency WHERE status = 'in_progress' AND created_at < ?1 - 300",
        rusqlite::params![now],
    )?;
    Ok(json!({"stale_idempotency_rows_deleted": deleted}))
}

fn daily_lottery_draw(store: &Store, now: i64, broadcaster: &Broadcaster) -> Result<Value, StoreError> {
    let pot: i64 = store.query_row("SELECT pot FROM tavern_lottery_state WHERE id = 1", [], |r| r.get(0))?;
    let winner: Option<i64> = store
        .query_row(
            "SELECT player_id FROM tavern_lottery_tickets ORDER BY RANDOM() LIMIT 1",
            [],
            |r| r.get(0),
        )
        .ok();

    if let (Some(winner_id), true) = (winner, pot > 0) {
        let account_id: Option<i64> = store
            .query_row(
                "SELECT id FROM bank_accounts WHERE owner_type = 'player' AND owner_id = ?1 AND currency = 'CRD'",
                rusqlite::params![winner_id],
                |r| r.get(0),
            )
            .ok();
        if let Some(account_id) = account_id {
            store.execute(
                "INSERT INTO bank_transactions (account_id, tx_type, direction, amount, currency, ts) VALUES (?1, 'LOTTERY_PAYOUT', 'CREDIT', ?2, 'CRD', ?3)",
                rusqlite::params![account_id, pot, now],
            )?;
            broadcaster.deliver_to_player(winner_id, "tavern.lottery_won", json!({"amount": pot}));
        }
    }

    store.execute("DELETE FROM tavern_lottery_tickets", [])?;
    store.execute(
        "UPDATE tavern_lottery_state SET pot = 0, draw_at = ?1 + 86400 WHERE id = 1",
        rusqlite::params![now],
    )?;
    Ok(json!({"winner_player_id": winner, "payout": pot}))
}

/// A deadpool bet resolves once its target's active ship has actually been
/// destroyed -- the closest thing this model has to a player's ship "dying".
fn deadpool_resolution_cron(store: &Store, now: i64) -> Result<Value, StoreError> {
    let mut stmt = store.prepare(
        "SELECT b.id, b.player_id, b.amount FROM tavern_deadpool_bets b
         JOIN players p ON p.id = b.target_player_id
         JOIN ships s ON s.id = p.active_ship_id
         WHERE b.resolved = 0 AND s.destroyed = 1",
    )?;
    let rows: Vec<(i64, i64, i64)> = stmt
        .query_map([], |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)))?
        .collect::<Result<_, _>>()?;
    drop(stmt);

    let mut resolved = 0;
    for (bet_id, bettor_id, amount) in &rows {
        let account_id: Option<i64> = store
            .query_row(
                "SELECT id FROM bank_accounts WHERE owner_type = 'player' AND owner_id = ?1 AND currency = 'CRD'",
                rusqlite::params![bettor_id],
                |r| r.get(0),
            )
            .ok();
        if let Some(account_id) = account_id {
            store.execute(
                "INSERT INTO bank_transactions (account_id, tx_type, direction, amount, currency, ts) VALUES (?1, 'DEADPOOL_PAYOUT', 'CREDIT', ?2, 'CRD', ?3)",
                rusqlite::params![account_id, amount * 2, now],
            )?;
        }
        store.execute("UPDATE tavern_deadpool_bets SET resolved = 1 WHERE id = ?1", rusqlite::params![bet_id])?;
        resolved += 1;
    }
    Ok(json!({"bets_resolved": resolved}))
}

fn tavern_notice_expiry_cron(store: &Store, now: i64) -> Result<Value, StoreError> {
    let deleted = store.execute("DELETE FROM tavern_notices WHERE expires_at <= ?1", rusqlite::params![now])?;
    Ok(json!({"notices_expired": deleted}))
}

fn loan_shark_interest_cron(store: &Store, now: i64) -> Result<Value, StoreError> {
    let updated = store.execute(
        "UPDATE tavern_loans SET balance = balance + (balance * apr_bps) / 10000 / 365, last_interest_at = ?1 WHERE balance > 0",
        rusqlite::params![now],
    )?;
    Ok(json!({"loans_accrued": updated}))
}

/// Corps with a positive treasury split 1% of it evenly across members as a
/// daily dividend.
fn dividend_payout(store: &Store, now: i64) -> Result<Value, StoreError> {
    let mut stmt = store.prepare(
        "SELECT c.id, a.id, a.balance FROM corporations c
         JOIN bank_accounts a ON a.owner_type = 'corp' AND a.owner_id = c.id AND a.currency = 'CRD'
         WHERE a.balance > 0",
    )?;
    let corps: Vec<(i64, i64, i64)> = stmt
        .query_map([], |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)))?
        .collect::<Result<_, _>>()?;
    drop(stmt);

    let mut paid_out = 0;
    for (corp_id, corp_account_id, balance) in &corps {
        let pool = balance / 100;
        if pool <= 0 {
            continue;
        }
        let members: Vec<i64> = {
            let mut stmt = store.prepare("SELECT player_id FROM corp_members WHERE corp_id = ?1")?;
            stmt.query_map(rusqlite::params![corp_id], |r| r.get(0))?.collect::<Result<_, _>>()?
        };
        if members.is_empty() {
            continue;
        }
        let share = pool / members.len() as i64;
        if share <= 0 {
            continue;
        }
        let tx_group_id = format!("dividend-{corp_id}-{now}");
        store.execute(
            "INSERT INTO bank_transactions (account_id, tx_type, direction, amount, currency, tx_group_id, ts) VALUES (?1, 'DIVIDEND', 'DEBIT', ?2, 'CRD', ?3, ?4)",
            rusqlite::params![corp_account_id, share * members.len() as i64, tx_group_id, now],
        )?;
        for player_id in &members {
            let account_id: Option<i64> = store
                .query_row(
                    "SELECT id FROM bank_accounts WHERE owner_type = 'player' AND owner_id = ?1 AND currency = 'CRD'",
                    rusqlite::params![player_id],
                    |r| r.get(0),
                )
                .ok();
            if let Some(account_id) = account_id {
                store.execute(
                    "INSERT INTO bank_transactions (account_id, tx_type, direction, amount, currency, tx_group_id, ts) VALUES (?1, 'DIVIDEND', 'CREDIT', ?2, 'CRD', ?3, ?4)",
                    rusqlite::params![account_id, share, tx_group_id, now],
                )?;
                paid_out += share;
            }
        }
    }
    Ok(json!({"total_paid": paid_out, "corps_paying": corps.len()}))
}

fn daily_stock_price_recalculation(store: &Store) -> Result<Value, StoreError> {
    let updated = store.execute(
        "UPDATE commodities SET base_price = MAX(1, base_price + CAST(base_price * volatility * ((ABS(RANDOM() % 21) - 10) / 10.0) AS INTEGER))",
        [],
    )?;
    Ok(json!({"commodities_repriced": updated}))
}

fn daily_market_settlement(store: &Store) -> Result<Value, StoreError> {
    let updated = store.execute("UPDATE ports SET petty_cash = petty_cash + size * 1000", [])?;
    Ok(json!({"ports_settled": updated}))
}

fn system_notice_ttl(store: &Store, now: i64) -> Result<Value, StoreError> {
    let deleted = store.execute("DELETE FROM system_events WHERE ts < ?1 - 3600", rusqlite::params![now])?;
    Ok(json!({"system_events_expired": deleted}))
}

/// Deadletter entries get a bounded number of retries before being given up
/// on for good; there is no separate processor here, so "retrying" just
/// ages the entry until it crosses the giveup threshold.
fn deadletter_retry(store: &Store) -> Result<Value, StoreError> {
    store.execute("UPDATE engine_events_deadletter SET attempts = attempts + 1 WHERE attempts < 10", [])?;
    let abandoned = store.execute("DELETE FROM engine_events_deadletter WHERE attempts >= 10", [])?;
    Ok(json!({"abandoned": abandoned}))
}

fn daily_corp_tax(store: &Store, now: i64) -> Result<Value, StoreError> {
    let treasury = OwnerRef::System;
    store.execute(
        "INSERT OR IGNORE INTO bank_accounts (owner_type, owner_id, currency, balance) VALUES (?1, ?2, 'CRD', 0)",
        rusqlite::params![treasury.type_str(), treasury.id()],
    )?;
    let treasury_account_id: i64 = store.query_row(
        "SELECT id FROM bank_accounts WHERE owner_type = ?1 AND owner_id = ?2 AND currency = 'CRD'",
        rusqlite::params![treasury.type_str(), treasury.id()],
        |r| r.get(0),
    )?;

    let mut stmt = store.prepare(
        "SELECT a.id, a.balance FROM bank_accounts a WHERE a.owner_type = 'corp' AND a.balance > 0",
    )?;
    let corp_accounts: Vec<(i64, i64)> = stmt
        .query_map([], |r| Ok((r.get(0)?, r.get(1)?)))?
        .collect::<Result<_, _>>()?;
    drop(stmt);

    let mut collected = 0;
    for (account_id, balance) in &corp_accounts {
        let tax = balance / 50; // 2%
        if tax <= 0 {
            continue;
        }
        let tx_group_id = format!("corptax-{account_id}-{now}");
        store.execute(
            "INSERT INTO bank_transactions (account_id, tx_type, direction, amount, currency, tx_group_id, ts) VALUES (?1, 'CORP_TAX', 'DEBIT', ?2, 'CRD', ?3, ?4)",
            rusqlite::params![account_id, tax, tx_group_id, now],
        )?;
        store.execute(
            "INSERT INTO bank_transactions (account_id, tx_type, direction, amount, currency, tx_group_id, ts) VALUES (?1, 'CORP_TAX', 'CREDIT', ?2, 'CRD', ?3, ?4)",
            rusqlite::params![treasury_account_id, tax, tx_group_id, now],
        )?;
        collected += tax;
    }
    Ok(json!({"collected": collected, "corps_taxed": corp_accounts.len()}))
}

fn daily_bank_interest_tick(store: &Store, now: i64) -> Result<Value, StoreError> {
    let (apr_bps, min_balance): (i64, i64) = store.query_row(
        "SELECT apr_bps, min_balance FROM bank_interest_policy WHERE id = 1",
        [],
        |r| Ok((r.get(0)?, r.get(1)?)),
    )?;
    if apr_bps <= 0 {
        return Ok(json!({"accounts_paid": 0}));
    }

    let mut stmt = store.prepare(
        "SELECT id, balance FROM bank_accounts WHERE owner_type = 'player' AND currency = 'CRD' AND balance >= ?1",
    )?;
    let accounts: Vec<(i64, i64)> = stmt
        .query_map(rusqlite::params![min_balance], |r| Ok((r.get(0)?, r.get(1)?)))?
        .collect::<Result<_, _>>()?;
    drop(stmt);

    let mut paid = 0;
    for (account_id, balance) in &accounts {
        let interest = (balance * apr_bps) / 10000 / 365;
        if interest <= 0 {
            continue;
        }
        store.execute(
            "INSERT INTO bank_transactions (account_id, tx_type, direction, amount, currency, ts) VALUES (?1, 'INTEREST', 'CREDIT', ?2, 'CRD', ?3)",
            rusqlite::params![account_id, interest, now],
        )?;
        paid += 1;
    }
    Ok(json!({"accounts_paid": paid}))
}

fn port_economy_tick(store: &Store, now: i64) -> Result<Value, StoreError> {
    let updated = store.execute(
        "UPDATE entity_stock SET quantity = MAX(0, quantity + (ABS(RANDOM() % 21) - 10)), last_updated_ts = ?1 WHERE entity_type = 'port'",
        rusqlite::params![now],
    )?;
    Ok(json!({"port_stock_rows_nudged": updated}))
}

fn planet_market_tick(store: &Store) -> Result<Value, StoreError> {
    let updated = store.execute(
        "UPDATE planet_goods SET quantity = MAX(0, quantity + (ABS(RANDOM() % 11) - 5))",
        [],
    )?;
    Ok(json!({"planet_goods_rows_nudged": updated}))
}

/// Citadels started via `citadel.upgrade` sit in `'upgrading'` until their
/// `end_ts` passes; this promotes them to the level they were building
/// toward and flips construction back to idle so another upgrade can start.
fn citadel_construction_cron(store: &Store, now: i64) -> Result<Value, StoreError> {
    let completed = store.execute(
        "UPDATE citadels SET level = target_level, construction_status = 'idle', target_level = NULL, start_ts = NULL, end_ts = NULL
         WHERE construction_status = 'upgrading' AND end_ts <= ?1",
        rusqlite::params![now],
    )?;
    Ok(json!({"citadels_completed": completed}))
}

fn shield_regen_tick(store: &Store) -> Result<Value, StoreError> {
    let updated = store.execute(
        "UPDATE ships SET shields = MIN(shields + CASE WHEN is_docked = 1 THEN 10 ELSE 2 END,
                                        (SELECT max_shields FROM shiptypes WHERE code = ships.shiptype_code))
         WHERE destroyed = 0",
        [],
    )?;
    Ok(json!({"ships_regenerated": updated}))
}
