use serde_json::json;

use crate::dispatcher::ClientContext;
use crate::envelope::OutboundFrame;
use crate::error::{codes, HandlerError, HandlerResult, Refusal};
use crate::session;
use crate::store::Store;

use super::require_str;

const MIN_PASSWORD_LEN: usize = 4;
const OPENING_BALANCE: i64 = 1_000;
const STARTING_SHIPTYPE: &str = "ESCAPE_POD";

pub fn register(store: &Store, data: &serde_json::Value, now: i64) -> HandlerResult<OutboundFrame> {
    let name = require_str(data, "name")?;
    let password = require_str(data, "password")?;
    if password.len() < MIN_PASSWORD_LEN {
        return Err(Refusal::new(codes::ERR_MALFORMED, "password too short").into());
    }

    let player_id = session::register(store, name, password, now)?;

    store
        .execute(
            "INSERT INTO bank_accounts (owner_type, owner_id, currency, balance) VALUES ('player', ?1, 'CRD', ?2)",
            rusqlite::params![player_id, OPENING_BALANCE],
        )
        .map_err(super::db_err)?;

    store
        .execute(
            "INSERT INTO ships (shiptype_code, sector_id, name) VALUES (?1, 1, ?2)",
            rusqlite::params![STARTING_SHIPTYPE, format!("{name}'s Pod")],
        )
        .map_err(super::db_err)?;
    let ship_id = store.last_insert_rowid();

    store
        .execute(
            "INSERT INTO ship_ownership (player_id, ship_id, role, is_primary) VALUES (?1, ?2, 1, 1)",
            rusqlite::params![player_id, ship_id],
        )
        .map_err(super::db_err)?;
    store
        .execute(
            "UPDATE players SET active_ship_id = ?1 WHERE id = ?2",
            rusqlite::params![ship_id, player_id],
        )
        .map_err(super::db_err)?;

    let session = session::login(store, name, password, now).map_err(HandlerError::Refused)?;

    Ok(OutboundFrame::ok(
        "auth.register.v1",
        None,
        json!({"player_id": player_id, "token": session.token, "expires_at": session.expires_at}),
    ))
}

pub fn login(
    store: &Store,
    ctx: &mut ClientContext,
    data: &serde_json::Value,
    now: i64,
) -> HandlerResult<OutboundFrame> {
    let name = require_str(data, "name")?;
    let password = require_str(data, "password")?;
    let session = session::login(store, name, password, now).map_err(HandlerError::Refused)?;
    ctx.player_id = session.player_id;
    ctx.session_token = Some(session.token.clone());

    let sector_id: i64 = store
        .query_row(
            "SELECT sector_id FROM players WHERE id = ?1",
            rusqlite::params![session.player_id],
            |r| r.get(0),
        )
        .map_err(super::db_err)?;
    ctx.sector_id = sector_id;

    Ok(OutboundFrame::ok(
        "auth.login.v1",
        None,
        json!({"token": session.token, "expires_at": session.expires_at, "sector_id": sector_id}),
    ))
}

pub fn logout(store: &Store, ctx: &mut ClientContext) -> HandlerResult<OutboundFrame> {
    if let Some(token) = ctx.session_token.take() {
        session::revoke(store, &token)?;
    }
    ctx.player_id = 0;
    Ok(OutboundFrame::ok("auth.logout.v1", None, json!({})))
}

pub fn refresh(
    store: &Store,
    ctx: &mut ClientContext,
    data: &serde_json::Value,
    now: i64,
) -> HandlerResult<OutboundFrame> {
    let token = require_str(data, "token")?;
    let player_id = session::refresh(store, token, now).map_err(HandlerError::Refused)?;
    ctx.player_id = player_id;
    ctx.session_token = Some(token.to_string());
    Ok(OutboundFrame::ok("auth.refresh.v1", None, json!({"player_id": player_id})))
}
