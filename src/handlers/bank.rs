use serde_json::json;

use crate::dispatcher::ClientContext;
use crate::envelope::OutboundFrame;
use crate::error::{codes, EngineError, HandlerResult, Refusal};
use crate::store::Store;

use super::require_u32_positive;

fn account_id_for_player(store: &Store, player_id: i64) -> Result<i64, EngineError> {
    store
        .query_row(
            "SELECT id FROM bank_accounts WHERE owner_type = 'player' AND owner_id = ?1 AND currency = 'CRD'",
            rusqlite::params![player_id],
            |r| r.get(0),
        )
        .map_err(super::db_err)
}

pub fn balance(store: &Store, ctx: &ClientContext) -> HandlerResult<OutboundFrame> {
    let balance: i64 = store
        .query_row(
            "SELECT balance FROM bank_accounts WHERE owner_type = 'player' AND owner_id = ?1 AND currency = 'CRD'",
            rusqlite::params![ctx.player_id],
            |r| r.get(0),
        )
        .map_err(super::db_err)?;
    Ok(OutboundFrame::ok("bank.balance.v1", None, json!({"balance": balance, "currency": "CRD"})))
}

/// Deposits are idempotent by design: the dispatcher's idempotency-key
/// replay wraps this, so a retried `bank.deposit` with the same key never
/// reaches this body a second time.
pub fn deposit(
    store: &Store,
    ctx: &ClientContext,
    data: &serde_json::Value,
    now: i64,
) -> HandlerResult<OutboundFrame> {
    let amount = require_u32_positive(data, "amount")? as i64;
    let account_id = account_id_for_player(store, ctx.player_id)?;
    store
        .execute(
            "INSERT INTO bank_transactions (account_id, tx_type, direction, amount, currency, ts) VALUES (?1, 'DEPOSIT', 'CREDIT', ?2, 'CRD', ?3)",
            rusqlite::params![account_id, amount, now],
        )
        .map_err(super::db_err)?;
    let new_balance: i64 = store
        .query_row("SELECT balance FROM bank_accounts WHERE id = ?1", rusqlite::params![account_id], |r| r.get(0))
        .map_err(super::db_err)?;
    Ok(OutboundFrame::ok("bank.deposit.v1", None, json!({"balance": new_balance})))
}

pub fn withdraw(
    store: &Store,
    ctx: &ClientContext,
    data: &serde_json::Value,
    now: i64,
) -> HandlerResult<OutboundFrame> {
    let amount = require_u32_positive(data, "amount")? as i64;
    let account_id = account_id_for_player(store, ctx.player_id)?;
    store
        .execute(
            "INSERT INTO bank_transactions (account_id, tx_type, direction, amount, currency, ts) VALUES (?1, 'WITHDRAWAL', 'DEBIT', ?2, 'CRD', ?3)",
            rusqlite::params![account_id, amount, now],
        )
        .map_err(|e| {
            if e.to_string().contains("BANK_INSUFFICIENT_FUNDS") {
                insufficient_funds_refusal()
            } else {
                EngineError::Db(e.to_string()).into()
            }
        })?;
    let new_balance: i64 = store
        .query_row("SELECT balance FROM bank_accounts WHERE id = ?1", rusqlite::params![account_id], |r| r.get(0))
        .map_err(super::db_err)?;
    Ok(OutboundFrame::ok("bank.withdraw.v1", None, json!({"balance": new_balance})))
}

fn insufficient_funds_refusal() -> crate::error::HandlerError {
    Refusal::new(codes::REF_INSUFFICIENT_FUNDS, "insufficient funds").into()
}

pub fn transfer(
    store: &Store,
    ctx: &ClientContext,
    data: &serde_json::Value,
    now: i64,
) -> HandlerResult<OutboundFrame> {
    let amount = require_u32_positive(data, "amount")? as i64;
    let to_player_id = super::require_i64(data, "to_player_id")?;
    if to_player_id == ctx.player_id {
        return Err(EngineError::Malformed("cannot transfer to yourself".into()).into());
    }

    let from_account = account_id_for_player(store, ctx.player_id)?;
    let to_account = account_id_for_player(store, to_player_id)
        .map_err(|_| EngineError::planet_not_found("destination player has no account"))?;

    let tx_group_id = format!("xfer-{}-{}-{}", ctx.player_id, to_player_id, now);

    store
        .execute(
            "INSERT INTO bank_transactions (account_id, tx_type, direction, amount, currency, tx_group_id, related_account_id, ts)
             VALUES (?1, 'TRANSFER_OUT', 'DEBIT', ?2, 'CRD', ?3, ?4, ?5)",
            rusqlite::params![from_account, amount, tx_group_id, to_account, now],
        )
        .map_err(|e| {
            if e.to_string().contains("BANK_INSUFFICIENT_FUNDS") {
                insufficient_funds_refusal()
            } else {
                EngineError::Db(e.to_string()).into()
            }
        })?;
    store
        .execute(
            "INSERT INTO bank_transactions (account_id, tx_type, direction, amount, currency, tx_group_id, related_account_id, ts)
             VALUES (?1, 'TRANSFER_IN', 'CREDIT', ?2, 'CRD', ?3, ?4, ?5)",
            rusqlite::params![to_account, amount, tx_group_id, from_account, now],
        )
        .map_err(super::db_err)?;

    Ok(OutboundFrame::ok("bank.transfer.v1", None, json!({"amount": amount, "to_player_id": to_player_id})))
}

pub fn leaderboard(store: &Store) -> HandlerResult<OutboundFrame> {
    let mut stmt = store
        .prepare(
            "SELECT p.name, a.balance FROM bank_accounts a JOIN players p ON p.id = a.owner_id
             WHERE a.owner_type = 'player' AND a.currency = 'CRD' ORDER BY a.balance DESC LIMIT 10",
        )
        .map_err(super::db_err)?;
    let rows: Vec<_> = stmt
        .query_map([], |r| {
            Ok(json!({
                "name": r.get::<_, String>(0)?,
                "balance": r.get::<_, i64>(1)?,
            }))
        })
        .map_err(super::db_err)?
        .collect::<Result<_, _>>()
        .map_err(super::db_err)?;
    Ok(OutboundFrame::ok("bank.leaderboard.v1", None, json!({"leaders": rows})))
}

pub fn history(store: &Store, ctx: &ClientContext) -> HandlerResult<OutboundFrame> {
    let account_id = account_id_for_player(store, ctx.player_id)?;
    let mut stmt = store
        .prepare(
            "SELECT ts, tx_type, direction, amount, balance_after FROM bank_transactions
             WHERE account_id = ?1 ORDER BY ts DESC LIMIT 50",
        )
        .map_err(super::db_err)?;
    let rows: Vec<_> = stmt
        .query_map(rusqlite::params![account_id], |r| {
            Ok(json!({
                "ts": r.get::<_, i64>(0)?,
                "tx_type": r.get::<_, String>(1)?,
                "direction": r.get::<_, String>(2)?,
                "amount": r.get::<_, i64>(3)?,
                "balance_after": r.get::<_, Option<i64>>(4)?,
            }))
        })
        .map_err(super::db_err)?
        .collect::<Result<_, _>>()
        .map_err(super::db_err)?;
    Ok(OutboundFrame::ok("bank.history.v1", None, json!({"transactions": rows})))
}
