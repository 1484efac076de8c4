use serde_json::json;

use crate::broadcaster::Broadcaster;
use crate::dispatcher::ClientContext;
use crate::envelope::OutboundFrame;
use crate::error::{EngineError, HandlerResult};
use crate::store::Store;

use super::{require_i64, require_str};

/// Subspace chatter, broadcast to every other player subscribed to the
/// channel. Requires a [`Broadcaster`] handle, unlike the store-only
/// handlers, so it is not wired into the generic dispatch table -- the
/// server loop calls it directly once it holds both.
pub fn say(
    store: &Store,
    ctx: &ClientContext,
    data: &serde_json::Value,
    now: i64,
) -> HandlerResult<OutboundFrame> {
    let channel = require_str(data, "channel")?;
    let body = require_str(data, "body")?;
    store
        .execute(
            "INSERT INTO subspace (from_player_id, channel, body, ts) VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![ctx.player_id, channel, body, now],
        )
        .map_err(super::db_err)?;
    Ok(OutboundFrame::ok("comm.say.v1", None, json!({"channel": channel})))
}

pub fn broadcast_say(
    store: &Store,
    broadcaster: &Broadcaster,
    channel: &str,
    from_player_id: i64,
    body: &str,
) -> HandlerResult<usize> {
    let mut stmt = store
        .prepare("SELECT player_id FROM subscriptions WHERE topic = ?1")
        .map_err(super::db_err)?;
    let subscriber_ids: Vec<i64> = stmt
        .query_map(rusqlite::params![channel], |r| r.get(0))
        .map_err(super::db_err)?
        .collect::<Result<_, _>>()
        .map_err(super::db_err)?;

    let mut delivered = 0;
    for player_id in subscriber_ids {
        delivered += broadcaster.deliver_to_player(
            player_id,
            "comm.message.v1",
            json!({"channel": channel, "from_player_id": from_player_id, "body": body}),
        );
    }
    Ok(delivered)
}

pub fn mail_send(
    store: &Store,
    ctx: &ClientContext,
    data: &serde_json::Value,
    now: i64,
) -> HandlerResult<OutboundFrame> {
    let to_player_id = require_i64(data, "to_player_id")?;
    let subject = require_str(data, "subject")?;
    let body = require_str(data, "body")?;
    store
        .execute(
            "INSERT INTO mail (to_player_id, from_player_id, subject, body, ts) VALUES (?1, ?2, ?3, ?4, ?5)",
            rusqlite::params![to_player_id, ctx.player_id, subject, body, now],
        )
        .map_err(|_| EngineError::planet_not_found("recipient not found"))?;
    Ok(OutboundFrame::ok("comm.mail_send.v1", None, json!({"to_player_id": to_player_id})))
}

pub fn mail_inbox(store: &Store, ctx: &ClientContext) -> HandlerResult<OutboundFrame> {
    let mut stmt = store
        .prepare(
            "SELECT id, from_player_id, subject, ts, read FROM mail WHERE to_player_id = ?1 ORDER BY ts DESC LIMIT 50",
        )
        .map_err(super::db_err)?;
    let rows: Vec<_> = stmt
        .query_map(rusqlite::params![ctx.player_id], |r| {
            Ok(json!({
                "id": r.get::<_, i64>(0)?,
                "from_player_id": r.get::<_, i64>(1)?,
                "subject": r.get::<_, String>(2)?,
                "ts": r.get::<_, i64>(3)?,
                "read": r.get::<_, i64>(4)? != 0,
            }))
        })
        .map_err(super::db_err)?
        .collect::<Result<_, _>>()
        .map_err(super::db_err)?;
    Ok(OutboundFrame::ok("comm.mail_inbox.v1", None, json!({"messages": rows})))
}

pub fn mail_read(store: &Store, ctx: &ClientContext, data: &serde_json::Value) -> HandlerResult<OutboundFrame> {
    let mail_id = require_i64(data, "mail_id")?;
    let updated = store
        .execute(
            "UPDATE mail SET read = 1 WHERE id = ?1 AND to_player_id = ?2",
            rusqlite::params![mail_id, ctx.player_id],
        )
        .map_err(super::db_err)?;
    if updated == 0 {
        return Err(EngineError::planet_not_found("no such mail").into());
    }
    Ok(OutboundFrame::ok("comm.mail_read.v1", None, json!({"mail_id": mail_id})))
}

pub fn subscribe(store: &Store, ctx: &ClientContext, data: &serde_json::Value) -> HandlerResult<OutboundFrame> {
    let topic = require_str(data, "topic")?;
    store
        .execute(
            "INSERT OR IGNORE INTO subscriptions (player_id, topic) VALUES (?1, ?2)",
            rusqlite::params![ctx.player_id, topic],
        )
        .map_err(super::db_err)?;
    Ok(OutboundFrame::ok("comm.subscribe.v1", None, json!({"topic": topic})))
}

pub fn unsubscribe(store: &Store, ctx: &ClientContext, data: &serde_json::Value) -> HandlerResult<OutboundFrame> {
    let topic = require_str(data, "topic")?;
    store
        .execute(
            "DELETE FROM subscriptions WHERE player_id = ?1 AND topic = ?2",
            rusqlite::params![ctx.player_id, topic],
        )
        .map_err(super::db_err)?;
    Ok(OutboundFrame::ok("comm.unsubscribe.v1", None, json!({"topic": topic})))
}
