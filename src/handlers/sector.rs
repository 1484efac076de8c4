use serde_json::json;

use crate::dispatcher::ClientContext;
use crate::envelope::OutboundFrame;
use crate::error::{EngineError, HandlerResult};
use crate::store::Store;

use super::{optional_i64, require_i64, require_str};

pub fn scan(store: &Store, ctx: &ClientContext, data: &serde_json::Value) -> HandlerResult<OutboundFrame> {
    let sector_id = optional_i64(data, "sector_id").unwrap_or(ctx.sector_id);
    let snapshot = scan_snapshot(store, sector_id)?;
    Ok(OutboundFrame::ok("sector.scan.v1", None, snapshot))
}

/// Build the same payload `sector.scan` returns, for reuse by handlers that
/// need to attach a scan of the destination sector to their own response
/// (movement on entry, for one).
pub fn scan_snapshot(store: &Store, sector_id: i64) -> Result<serde_json::Value, EngineError> {
    let row = store
        .query_row(
            "SELECT name, safe_zone, beacon, nebula FROM sectors WHERE id = ?1",
            rusqlite::params![sector_id],
            |r| {
                Ok((
                    r.get::<_, String>(0)?,
                    r.get::<_, i64>(1)?,
                    r.get::<_, Option<String>>(2)?,
                    r.get::<_, Option<String>>(3)?,
                ))
            },
        )
        .map_err(|_| EngineError::sector_not_found())?;

    let port_present: i64 = store
        .query_row(
            "SELECT COUNT(*) FROM ports WHERE sector_id = ?1",
            rusqlite::params![sector_id],
            |r| r.get(0),
        )
        .map_err(super::db_err)?;

    let warps: Vec<i64> = {
        let mut stmt = store
            .prepare("SELECT to_sector FROM sector_warps WHERE from_sector = ?1 ORDER BY to_sector")
            .map_err(super::db_err)?;
        stmt.query_map(rusqlite::params![sector_id], |r| r.get(0))
            .map_err(super::db_err)?
            .collect::<Result<_, _>>()
            .map_err(super::db_err)?
    };

    Ok(json!({
        "sector_id": sector_id,
        "name": row.0,
        "safe_zone": row.1 != 0,
        "beacon": row.2,
        "nebula": row.3,
        "port_present": port_present > 0,
        "warps": warps,
    }))
}

pub fn info(store: &Store, data: &serde_json::Value) -> HandlerResult<OutboundFrame> {
    let sector_id = require_i64(data, "sector_id")?;
    let players_present: i64 = store
        .query_row(
            "SELECT COUNT(*) FROM players WHERE sector_id = ?1",
            rusqlite::params![sector_id],
            |r| r.get(0),
        )
        .map_err(super::db_err)?;
    Ok(OutboundFrame::ok(
        "sector.info.v1",
        None,
        json!({"sector_id": sector_id, "players_present": players_present}),
    ))
}

pub fn search(store: &Store, data: &serde_json::Value) -> HandlerResult<OutboundFrame> {
    let needle = require_str(data, "name")?;
    let pattern = format!("%{needle}%");
    let mut stmt = store
        .prepare("SELECT id, name FROM sectors WHERE name LIKE ?1 ORDER BY id LIMIT 25")
        .map_err(super::db_err)?;
    let rows: Vec<(i64, String)> = stmt
        .query_map(rusqlite::params![pattern], |r| Ok((r.get(0)?, r.get(1)?)))
        .map_err(super::db_err)?
        .collect::<Result<_, _>>()
        .map_err(super::db_err)?;
    Ok(OutboundFrame::ok(
        "sector.search.v1",
        None,
        json!({"results": rows.into_iter().map(|(id, name)| json!({"sector_id": id, "name": name})).collect::<Vec<_>>()}),
    ))
}

pub fn set_beacon(store: &Store, ctx: &ClientContext, data: &serde_json::Value) -> HandlerResult<OutboundFrame> {
    let text = require_str(data, "text")?;
    if text.len() > 240 {
        return Err(EngineError::Malformed("beacon text too long".into()).into());
    }
    store
        .execute(
            "UPDATE sectors SET beacon = ?1 WHERE id = ?2",
            rusqlite::params![text, ctx.sector_id],
        )
        .map_err(super::db_err)?;
    Ok(OutboundFrame::ok("sector.set_beacon.v1", None, json!({"sector_id": ctx.sector_id})))
}
