use serde_json::json;

use crate::dispatcher::ClientContext;
use crate::envelope::OutboundFrame;
use crate::error::{codes, EngineError, HandlerResult, Refusal};
use crate::store::Store;

use super::{require_i64, require_str, require_u32_positive};

const NOTICE_TTL_SEC: i64 = 6 * 3600;
const LOTTERY_TICKET_PRICE: i64 = 50;
const LOAN_MAX_PRINCIPAL: i64 = 10_000;

pub fn notices(store: &Store, ctx: &ClientContext) -> HandlerResult<OutboundFrame> {
    let mut stmt = store
        .prepare(
            "SELECT body, posted_at, expires_at FROM tavern_notices
             WHERE sector_id = ?1 AND expires_at > ?2 ORDER BY posted_at DESC LIMIT 20",
        )
        .map_err(super::db_err)?;
    let now = crate::dispatcher::now_unix();
    let rows: Vec<_> = stmt
        .query_map(rusqlite::params![ctx.sector_id, now], |r| {
            Ok(json!({
                "body": r.get::<_, String>(0)?,
                "posted_at": r.get::<_, i64>(1)?,
                "expires_at": r.get::<_, i64>(2)?,
            }))
        })
        .map_err(super::db_err)?
        .collect::<Result<_, _>>()
        .map_err(super::db_err)?;
    Ok(OutboundFrame::ok("tavern.notices.v1", None, json!({"notices": rows})))
}

pub fn post_notice(
    store: &Store,
    ctx: &ClientContext,
    data: &serde_json::Value,
    now: i64,
) -> HandlerResult<OutboundFrame> {
    let body = require_str(data, "body")?;
    if body.is_empty() || body.len() > 280 {
        return Err(EngineError::Malformed("notice body must be 1-280 characters".into()).into());
    }
    let expires_at = now + NOTICE_TTL_SEC;
    store
        .execute(
            "INSERT INTO tavern_notices (sector_id, body, posted_at, expires_at) VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![ctx.sector_id, body, now, expires_at],
        )
        .map_err(super::db_err)?;
    Ok(OutboundFrame::ok("tavern.post_notice.v1", None, json!({"expires_at": expires_at})))
}

fn account_id_for_player(store: &Store, player_id: i64) -> Result<i64, EngineError> {
    store
        .query_row(
            "SELECT id FROM bank_accounts WHERE owner_type = 'player' AND owner_id = ?1 AND currency = 'CRD'",
            rusqlite::params![player_id],
            |r| r.get(0),
        )
        .map_err(super::db_err)
}

fn debit_player(store: &Store, player_id: i64, amount: i64, tx_type: &str, now: i64) -> HandlerResult<()> {
    let account_id = account_id_for_player(store, player_id)?;
    store
        .execute(
            "INSERT INTO bank_transactions (account_id, tx_type, direction, amount, currency, ts) VALUES (?1, ?2, 'DEBIT', ?3, 'CRD', ?4)",
            rusqlite::params![account_id, tx_type, amount, now],
        )
        .map_err(|e| {
            if e.to_string().contains("BANK_INSUFFICIENT_FUNDS") {
                Refusal::new(codes::REF_INSUFFICIENT_FUNDS, "insufficient funds").into()
            } else {
                super::db_err(e)
            }
        })?;
    Ok(())
}

fn credit_player(store: &Store, player_id: i64, amount: i64, tx_type: &str, now: i64) -> HandlerResult<()> {
    let account_id = account_id_for_player(store, player_id)?;
    store
        .execute(
            "INSERT INTO bank_transactions (account_id, tx_type, direction, amount, currency, ts) VALUES (?1, ?2, 'CREDIT', ?3, 'CRD', ?4)",
            rusqlite::params![account_id, tx_type, amount, now],
        )
        .map_err(super::db_err)?;
    Ok(())
}

/// Buys one lottery ticket. `numbers` is whatever the client wants recorded
/// (a pick-6 string, a lucky number, etc) -- the draw itself picks a random
/// ticket row, it never parses `numbers`.
pub fn lottery_buy_ticket(
    store: &Store,
    ctx: &ClientContext,
    data: &serde_json::Value,
    now: i64,
) -> HandlerResult<OutboundFrame> {
    let numbers = require_str(data, "numbers")?;
    debit_player(store, ctx.player_id, LOTTERY_TICKET_PRICE, "LOTTERY_TICKET", now)?;
    store
        .execute(
            "INSERT INTO tavern_lottery_tickets (player_id, numbers, bought_at) VALUES (?1, ?2, ?3)",
            rusqlite::params![ctx.player_id, numbers, now],
        )
        .map_err(super::db_err)?;
    store
        .execute(
            "UPDATE tavern_lottery_state SET pot = pot + ?1 WHERE id = 1",
            rusqlite::params![LOTTERY_TICKET_PRICE],
        )
        .map_err(super::db_err)?;
    Ok(OutboundFrame::ok("tavern.lottery_buy_ticket.v1", None, json!({"price": LOTTERY_TICKET_PRICE})))
}

pub fn lottery_status(store: &Store) -> HandlerResult<OutboundFrame> {
    let (pot, draw_at): (i64, i64) = store
        .query_row(
            "SELECT pot, draw_at FROM tavern_lottery_state WHERE id = 1",
            [],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .map_err(super::db_err)?;
    Ok(OutboundFrame::ok("tavern.lottery_status.v1", None, json!({"pot": pot, "draw_at": draw_at})))
}

/// Wagers that `target_player_id`'s active ship gets destroyed before the
/// next resolution sweep. Paid out at 2x by `deadpool_resolution_cron`.
pub fn deadpool_bet(
    store: &Store,
    ctx: &ClientContext,
    data: &serde_json::Value,
    now: i64,
) -> HandlerResult<OutboundFrame> {
    let target_player_id = require_i64(data, "target_player_id")?;
    let amount = require_u32_positive(data, "amount")? as i64;
    if target_player_id == ctx.player_id {
        return Err(EngineError::Malformed("cannot bet on your own demise".into()).into());
    }
    debit_player(store, ctx.player_id, amount, "DEADPOOL_BET", now)?;
    store
        .execute(
            "INSERT INTO tavern_deadpool_bets (player_id, target_player_id, amount, placed_at, resolved) VALUES (?1, ?2, ?3, ?4, 0)",
            rusqlite::params![ctx.player_id, target_player_id, amount, now],
        )
        .map_err(super::db_err)?;
    Ok(OutboundFrame::ok("tavern.deadpool_bet.v1", None, json!({"target_player_id": target_player_id, "amount": amount})))
}

pub fn loan_take(
    store: &Store,
    ctx: &ClientContext,
    data: &serde_json::Value,
    now: i64,
) -> HandlerResult<OutboundFrame> {
    let amount = require_u32_positive(data, "amount")? as i64;
    let outstanding: i64 = store
        .query_row(
            "SELECT COALESCE(SUM(balance), 0) FROM tavern_loans WHERE player_id = ?1",
            rusqlite::params![ctx.player_id],
            |r| r.get(0),
        )
        .map_err(super::db_err)?;
    if outstanding + amount > LOAN_MAX_PRINCIPAL {
        return Err(Refusal::new(codes::REF_CARGO_CAP_EXCEEDS, "loan would exceed the shark's credit limit").into());
    }
    store
        .execute(
            "INSERT INTO tavern_loans (player_id, principal, balance, taken_at, last_interest_at) VALUES (?1, ?2, ?2, ?3, ?3)",
            rusqlite::params![ctx.player_id, amount, now],
        )
        .map_err(super::db_err)?;
    credit_player(store, ctx.player_id, amount, "LOAN_DISBURSEMENT", now)?;
    Ok(OutboundFrame::ok("tavern.loan_take.v1", None, json!({"amount": amount})))
}

pub fn loan_repay(
    store: &Store,
    ctx: &ClientContext,
    data: &serde_json::Value,
    now: i64,
) -> HandlerResult<OutboundFrame> {
    let amount = require_u32_positive(data, "amount")? as i64;
    let loan_id: i64 = store
        .query_row(
            "SELECT id FROM tavern_loans WHERE player_id = ?1 AND balance > 0 ORDER BY taken_at LIMIT 1",
            rusqlite::params![ctx.player_id],
            |r| r.get(0),
        )
        .map_err(|_| EngineError::planet_not_found("no outstanding loan"))?;
    debit_player(store, ctx.player_id, amount, "LOAN_REPAYMENT", now)?;
    store
        .execute(
            "UPDATE tavern_loans SET balance = MAX(balance - ?1, 0) WHERE id = ?2",
            rusqlite::params![amount, loan_id],
        )
        .map_err(super::db_err)?;
    let remaining: i64 = store
        .query_row("SELECT balance FROM tavern_loans WHERE id = ?1", rusqlite::params![loan_id], |r| r.get(0))
        .map_err(super::db_err)?;
    Ok(OutboundFrame::ok("tavern.loan_repay.v1", None, json!({"remaining_balance": remaining})))
}
