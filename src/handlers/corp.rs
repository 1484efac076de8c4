use serde_json::json;

use crate::dispatcher::ClientContext;
use crate::envelope::OutboundFrame;
use crate::error::{codes, EngineError, HandlerResult, Refusal};
use crate::store::Store;

use super::{require_i64, require_str};

pub fn create(
    store: &Store,
    ctx: &ClientContext,
    data: &serde_json::Value,
    now: i64,
) -> HandlerResult<OutboundFrame> {
    let name = require_str(data, "name")?;
    let tag = require_str(data, "tag")?;
    store
        .execute(
            "INSERT INTO corporations (name, tag, owner_player_id, created_at) VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![name, tag, ctx.player_id, now],
        )
        .map_err(|e| EngineError::Malformed(format!("corp name or tag already taken: {e}")))?;
    let corp_id = store.last_insert_rowid();
    store
        .execute(
            "INSERT INTO corp_members (corp_id, player_id, role, joined_at) VALUES (?1, ?2, 'Leader', ?3)",
            rusqlite::params![corp_id, ctx.player_id, now],
        )
        .map_err(super::db_err)?;
    Ok(OutboundFrame::ok("corp.create.v1", None, json!({"corp_id": corp_id})))
}

pub fn info(store: &Store, data: &serde_json::Value) -> HandlerResult<OutboundFrame> {
    let corp_id = require_i64(data, "corp_id")?;
    let (name, tag): (String, String) = store
        .query_row(
            "SELECT name, tag FROM corporations WHERE id = ?1",
            rusqlite::params![corp_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .map_err(|_| EngineError::planet_not_found("corp not found"))?;
    let member_count: i64 = store
        .query_row(
            "SELECT COUNT(*) FROM corp_members WHERE corp_id = ?1",
            rusqlite::params![corp_id],
            |r| r.get(0),
        )
        .map_err(super::db_err)?;
    Ok(OutboundFrame::ok("corp.info.v1", None, json!({"corp_id": corp_id, "name": name, "tag": tag, "member_count": member_count})))
}

pub fn join(
    store: &Store,
    ctx: &ClientContext,
    data: &serde_json::Value,
    now: i64,
) -> HandlerResult<OutboundFrame> {
    let corp_id = require_i64(data, "corp_id")?;
    store
        .execute(
            "INSERT OR IGNORE INTO corp_members (corp_id, player_id, role, joined_at) VALUES (?1, ?2, 'Member', ?3)",
            rusqlite::params![corp_id, ctx.player_id, now],
        )
        .map_err(super::db_err)?;
    store
        .execute(
            "INSERT INTO corp_log (corp_id, event, ts) VALUES (?1, ?2, ?3)",
            rusqlite::params![corp_id, format!("player {} joined", ctx.player_id), now],
        )
        .map_err(super::db_err)?;
    Ok(OutboundFrame::ok("corp.join.v1", None, json!({"corp_id": corp_id})))
}

/// A leader leaving with members still aboard is refused -- they must
/// transfer leadership or dissolve the corp first, out of scope here.
pub fn leave(store: &Store, ctx: &ClientContext, data: &serde_json::Value, now: i64) -> HandlerResult<OutboundFrame> {
    let corp_id = require_i64(data, "corp_id")?;
    let role: String = store
        .query_row(
            "SELECT role FROM corp_members WHERE corp_id = ?1 AND player_id = ?2",
            rusqlite::params![corp_id, ctx.player_id],
            |r| r.get(0),
        )
        .map_err(|_| EngineError::planet_not_found("not a member of that corp"))?;
    if role == "Leader" {
        let other_members: i64 = store
            .query_row(
                "SELECT COUNT(*) FROM corp_members WHERE corp_id = ?1 AND player_id != ?2",
                rusqlite::params![corp_id, ctx.player_id],
                |r| r.get(0),
            )
            .map_err(super::db_err)?;
        if other_members > 0 {
            return Err(Refusal::new(codes::REF_NOT_PERMITTED, "transfer leadership before leaving").into());
        }
    }
    store
        .execute(
            "DELETE FROM corp_members WHERE corp_id = ?1 AND player_id = ?2",
            rusqlite::params![corp_id, ctx.player_id],
        )
        .map_err(super::db_err)?;
    store
        .execute(
            "INSERT INTO corp_log (corp_id, event, ts) VALUES (?1, ?2, ?3)",
            rusqlite::params![corp_id, format!("player {} left", ctx.player_id), now],
        )
        .map_err(super::db_err)?;
    Ok(OutboundFrame::ok("corp.leave.v1", None, json!({"corp_id": corp_id})))
}

pub fn kick(store: &Store, ctx: &ClientContext, data: &serde_json::Value, now: i64) -> HandlerResult<OutboundFrame> {
    let corp_id = require_i64(data, "corp_id")?;
    let target_player_id = require_i64(data, "player_id")?;
    let role: String = store
        .query_row(
            "SELECT role FROM corp_members WHERE corp_id = ?1 AND player_id = ?2",
            rusqlite::params![corp_id, ctx.player_id],
            |r| r.get(0),
        )
        .map_err(|_| EngineError::planet_not_found("not a member of that corp"))?;
    if role != "Leader" && role != "Officer" {
        return Err(Refusal::new(codes::REF_NOT_PERMITTED, "only officers and leaders can kick members").into());
    }
    let removed = store
        .execute(
            "DELETE FROM corp_members WHERE corp_id = ?1 AND player_id = ?2 AND role = 'Member'",
            rusqlite::params![corp_id, target_player_id],
        )
        .map_err(super::db_err)?;
    if removed == 0 {
        return Err(Refusal::new(codes::REF_NOT_PERMITTED, "target is not a kickable member").into());
    }
    store
        .execute(
            "INSERT INTO corp_log (corp_id, event, ts) VALUES (?1, ?2, ?3)",
            rusqlite::params![corp_id, format!("player {target_player_id} was kicked by {}", ctx.player_id), now],
        )
        .map_err(super::db_err)?;
    Ok(OutboundFrame::ok("corp.kick.v1", None, json!({"corp_id": corp_id, "player_id": target_player_id})))
}

pub fn mail_send(store: &Store, ctx: &ClientContext, data: &serde_json::Value, now: i64) -> HandlerResult<OutboundFrame> {
    let corp_id = require_i64(data, "corp_id")?;
    let body = require_str(data, "body")?;
    let is_member: i64 = store
        .query_row(
            "SELECT COUNT(*) FROM corp_members WHERE corp_id = ?1 AND player_id = ?2",
            rusqlite::params![corp_id, ctx.player_id],
            |r| r.get(0),
        )
        .map_err(super::db_err)?;
    if is_member == 0 {
        return Err(Refusal::new(codes::REF_NOT_PERMITTED, "not a member of that corp").into());
    }
    store
        .execute(
            "INSERT INTO corp_mail (corp_id, from_player_id, body, ts) VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![corp_id, ctx.player_id, body, now],
        )
        .map_err(super::db_err)?;
    Ok(OutboundFrame::ok("corp.mail_send.v1", None, json!({"corp_id": corp_id})))
}

pub fn mail_inbox(store: &Store, data: &serde_json::Value) -> HandlerResult<OutboundFrame> {
    let corp_id = require_i64(data, "corp_id")?;
    let mut stmt = store
        .prepare("SELECT from_player_id, body, ts FROM corp_mail WHERE corp_id = ?1 ORDER BY ts DESC LIMIT 50")
        .map_err(super::db_err)?;
    let rows: Vec<_> = stmt
        .query_map(rusqlite::params![corp_id], |r| {
            Ok(json!({
                "from_player_id": r.get::<_, i64>(0)?,
                "body": r.get::<_, String>(1)?,
                "ts": r.get::<_, i64>(2)?,
            }))
        })
        .map_err(super::db_err)?
        .collect::<Result<_, _>>()
        .map_err(super::db_err)?;
    Ok(OutboundFrame::ok("corp.mail_inbox.v1", None, json!({"mail": rows})))
}

pub fn log(store: &Store, data: &serde_json::Value) -> HandlerResult<OutboundFrame> {
    let corp_id = require_i64(data, "corp_id")?;
    let mut stmt = store
        .prepare("SELECT event, ts FROM corp_log WHERE corp_id = ?1 ORDER BY ts DESC LIMIT 50")
        .map_err(super::db_err)?;
    let rows: Vec<_> = stmt
        .query_map(rusqlite::params![corp_id], |r| {
            Ok(json!({
                "event": r.get::<_, String>(0)?,
                "ts": r.get::<_, i64>(1)?,
            }))
        })
        .map_err(super::db_err)?
        .collect::<Result<_, _>>()
        .map_err(super::db_err)?;
    Ok(OutboundFrame::ok("corp.log.v1", None, json!({"log": rows})))
}
