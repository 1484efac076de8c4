use serde_json::json;

use crate::dispatcher::ClientContext;
use crate::envelope::OutboundFrame;
use crate::error::{codes, EngineError, HandlerResult, Refusal};
use crate::store::Store;

use super::require_i64;

pub fn list(store: &Store, ctx: &ClientContext) -> HandlerResult<OutboundFrame> {
    let mut stmt = store
        .prepare(
            "SELECT id, amount, reason, paid, created_at FROM fines WHERE player_id = ?1 ORDER BY created_at DESC LIMIT 50",
        )
        .map_err(super::db_err)?;
    let rows: Vec<_> = stmt
        .query_map(rusqlite::params![ctx.player_id], |r| {
            Ok(json!({
                "id": r.get::<_, i64>(0)?,
                "amount": r.get::<_, i64>(1)?,
                "reason": r.get::<_, String>(2)?,
                "paid": r.get::<_, i64>(3)? != 0,
                "created_at": r.get::<_, i64>(4)?,
            }))
        })
        .map_err(super::db_err)?
        .collect::<Result<_, _>>()
        .map_err(super::db_err)?;
    Ok(OutboundFrame::ok("fine.list.v1", None, json!({"fines": rows})))
}

pub fn pay(store: &Store, ctx: &ClientContext, data: &serde_json::Value, now: i64) -> HandlerResult<OutboundFrame> {
    let fine_id = require_i64(data, "fine_id")?;
    let (player_id, amount, paid): (i64, i64, i64) = store
        .query_row(
            "SELECT player_id, amount, paid FROM fines WHERE id = ?1",
            rusqlite::params![fine_id],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )
        .map_err(|_| EngineError::planet_not_found("fine not found"))?;
    if player_id != ctx.player_id {
        return Err(Refusal::new(codes::REF_NOT_PERMITTED, "not your fine to pay").into());
    }
    if paid != 0 {
        return Err(EngineError::Malformed("fine already paid".into()).into());
    }
    let account_id: i64 = store
        .query_row(
            "SELECT id FROM bank_accounts WHERE owner_type = 'player' AND owner_id = ?1 AND currency = 'CRD'",
            rusqlite::params![ctx.player_id],
            |r| r.get(0),
        )
        .map_err(super::db_err)?;
    store
        .execute(
            "INSERT INTO bank_transactions (account_id, tx_type, direction, amount, currency, ts) VALUES (?1, 'FINE_PAYMENT', 'DEBIT', ?2, 'CRD', ?3)",
            rusqlite::params![account_id, amount, now],
        )
        .map_err(|e| {
            if e.to_string().contains("BANK_INSUFFICIENT_FUNDS") {
                Refusal::new(codes::REF_INSUFFICIENT_FUNDS, "insufficient funds").into()
            } else {
                super::db_err(e).into()
            }
        })?;
    store
        .execute("UPDATE fines SET paid = 1 WHERE id = ?1", rusqlite::params![fine_id])
        .map_err(super::db_err)?;
    Ok(OutboundFrame::ok("fine.pay.v1", None, json!({"fine_id": fine_id, "amount": amount})))
}
