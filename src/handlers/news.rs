use serde_json::json;

use crate::envelope::OutboundFrame;
use crate::error::HandlerResult;
use crate::store::Store;

pub fn recent(store: &Store) -> HandlerResult<OutboundFrame> {
    let mut stmt = store
        .prepare("SELECT headline, body, sector_id, ts FROM news_feed ORDER BY ts DESC LIMIT 20")
        .map_err(super::db_err)?;
    let rows: Vec<_> = stmt
        .query_map([], |r| {
            Ok(json!({
                "headline": r.get::<_, String>(0)?,
                "body": r.get::<_, String>(1)?,
                "sector_id": r.get::<_, Option<i64>>(2)?,
                "ts": r.get::<_, i64>(3)?,
            }))
        })
        .map_err(super::db_err)?
        .collect::<Result<_, _>>()
        .map_err(super::db_err)?;
    Ok(OutboundFrame::ok("news.recent.v1", None, json!({"items": rows})))
}
