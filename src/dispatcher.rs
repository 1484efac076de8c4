//! Per-connection worker loop: read a frame, classify it, dispatch to a
//! handler, write exactly one reply.

use log::warn;
use rusqlite::OptionalExtension;
use serde_json::Value;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::config::CONFIG;
use crate::error::{codes, HandlerError, Refusal};
use crate::envelope::{InboundFrame, OutboundFrame};
use crate::handlers;
use crate::store::Store;

pub fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs() as i64
}

/// Per-connection state threaded through every handler call. One instance
/// lives for the lifetime of a TCP connection; it owns no store handle of
/// its own (handlers open a fresh [`Store`] per command).
pub struct ClientContext {
    pub conn_id: u64,
    pub player_id: i64,
    pub sector_id: i64,
    pub session_token: Option<String>,
    pub rate_window_start: i64,
    pub rate_count: u32,
}

impl ClientContext {
    pub fn new(conn_id: u64) -> Self {
        ClientContext {
            conn_id,
            player_id: 0,
            sector_id: 0,
            session_token: None,
            rate_window_start: 0,
            rate_count: 0,
        }
    }

    fn check_rate_limit(&mut self, now: i64) -> bool {
        if now - self.rate_window_start >= CONFIG.rate_limit_window_sec as i64 {
            self.rate_window_start = now;
            self.rate_count = 0;
        }
        self.rate_count += 1;
        self.rate_count <= CONFIG.rate_limit_count
    }
}

const AUTH_EXEMPT: &[&str] = &["auth.register", "auth.login", "auth.refresh"];

/// Handle one inbound line. Never panics: any internal failure is folded
/// into an `error` envelope rather than propagated.
pub fn handle_line(ctx: &mut ClientContext, store_path: &str, line: &str) -> OutboundFrame {
    let frame: InboundFrame = match serde_json::from_str(line) {
        Ok(f) => f,
        Err(e) => return OutboundFrame::error(codes::ERR_MALFORMED, e.to_string(), None),
    };
    let request_id = frame.request_id.clone();

    let now = now_unix();
    if !ctx.check_rate_limit(now) {
        return OutboundFrame::from_refusal(
            &Refusal::new(codes::REF_RATE_LIMITED, "rate limit exceeded"),
            request_id,
        );
    }

    if ctx.player_id == 0 && !AUTH_EXEMPT.contains(&frame.command.as_str()) {
        return OutboundFrame::from_refusal(&Refusal::not_authenticated(), request_id);
    }

    let store = match Store::open(store_path) {
        Ok(s) => s,
        Err(e) => return OutboundFrame::error(codes::ERR_DB, e.to_string(), request_id),
    };

    if let Some(key) = frame.idempotency_key.clone() {
        match dispatch_idempotent(&store, ctx, &frame, &key, now) {
            Ok(frame_out) => return stamp(frame_out, request_id),
            Err(e) => return to_outbound(e, request_id),
        }
    }

    match dispatch(&store, ctx, &frame.command, &frame.data, now) {
        Ok(frame_out) => stamp(frame_out, request_id),
        Err(e) => to_outbound(e, request_id),
    }
}

fn stamp(frame: OutboundFrame, request_id: Option<String>) -> OutboundFrame {
    match frame {
        OutboundFrame::Ok { type_, data, .. } => OutboundFrame::Ok {
            type_,
            request_id,
            data,
        },
        other => other,
    }
}

fn to_outbound(e: HandlerError, request_id: Option<String>) -> OutboundFrame {
    match e {
        HandlerError::Engine(err) => OutboundFrame::from_engine_error(&err, request_id),
        HandlerError::Refused(r) => OutboundFrame::from_refusal(&r, request_id),
    }
}

/// Idempotency-key replay wraps the whole attempt -- bookkeeping insert,
/// handler body, and response storage -- in a single immediate transaction,
/// so a crash between "handler committed" and "response stored" can never
/// happen. On unique-conflict with a `done` row, the stored response is
/// served without ever starting a transaction.
fn dispatch_idempotent(
    store: &Store,
    ctx: &mut ClientContext,
    frame: &InboundFrame,
    key: &str,
    now: i64,
) -> Result<OutboundFrame, HandlerError> {
    let existing: Option<(String, Option<String>)> = store
        .query_row(
            "SELECT status, response FROM idempotency WHERE key = ?1",
            rusqlite::params![key],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()?;
    if let Some((status, response)) = existing {
        return match (status.as_str(), response) {
            ("done", Some(response)) => {
                let value: Value = serde_json::from_str(&response)
                    .map_err(|e| crate::error::EngineError::Internal(e.to_string()))?;
                Ok(OutboundFrame::Ok {
                    type_: value["type"].as_str().unwrap_or("unknown").to_string(),
                    request_id: None,
                    data: value["data"].clone(),
                })
            }
            _ => Err(Refusal::new(codes::REF_ALREADY_IN_PROGRESS, "request already in progress").into()),
        };
    }

    run_in_transaction(store, |store| {
        let req_fp = frame.data.to_string();
        let inserted = store.execute(
            "INSERT OR IGNORE INTO idempotency (key, cmd, req_fp, status, created_at) VALUES (?1, ?2, ?3, 'in_progress', ?4)",
            rusqlite::params![key, frame.command, req_fp, now],
        )?;
        if inserted == 0 {
            // Lost a race with a concurrent duplicate that inserted first.
            return Err(Refusal::new(codes::REF_ALREADY_IN_PROGRESS, "request already in progress").into());
        }

        let result = dispatch_inner(store, ctx, &frame.command, &frame.data, now)?;
        if let OutboundFrame::Ok { ref type_, ref data, .. } = result {
            let stored = serde_json::json!({"type": type_, "data": data}).to_string();
            store.execute(
                "UPDATE idempotency SET status = 'done', response = ?1 WHERE key = ?2",
                rusqlite::params![stored, key],
            )?;
        }
        Ok(result)
    })
}

/// Run `body` inside one `BEGIN IMMEDIATE` transaction on the connection the
/// caller already owns, committing on `Ok` and rolling back on `Err` --
/// every successful mutation sits inside exactly one transaction, enforced
/// here at the dispatch boundary rather than inside every individual
/// handler.
fn run_in_transaction<F>(store: &Store, body: F) -> Result<OutboundFrame, HandlerError>
where
    F: FnOnce(&Store) -> Result<OutboundFrame, HandlerError>,
{
    store.execute_batch("BEGIN IMMEDIATE")?;
    match body(store) {
        Ok(frame) => {
            store.execute_batch("COMMIT")?;
            Ok(frame)
        }
        Err(e) => {
            if let Err(rollback_err) = store.execute_batch("ROLLBACK") {
                log::error!("rollback failed after handler error: {rollback_err}");
            }
            Err(e)
        }
    }
}

fn dispatch(
    store: &Store,
    ctx: &mut ClientContext,
    command: &str,
    data: &Value,
    now: i64,
) -> Result<OutboundFrame, HandlerError> {
    run_in_transaction(store, |store| dispatch_inner(store, ctx, command, data, now))
}

/// Command-name routing table. The pathfinder commands are read-only but
/// still run inside the surrounding transaction for simplicity -- a
/// deferred read never contends with it.
fn dispatch_inner(
    store: &Store,
    ctx: &mut ClientContext,
    command: &str,
    data: &Value,
    now: i64,
) -> Result<OutboundFrame, HandlerError> {
    match command {
        "auth.register" => handlers::auth::register(store, data, now),
        "auth.login" => handlers::auth::login(store, ctx, data, now),
        "auth.logout" => handlers::auth::logout(store, ctx),
        "auth.refresh" => handlers::auth::refresh(store, ctx, data, now),

        "sector.scan" => handlers::sector::scan(store, ctx, data),
        "sector.info" => handlers::sector::info(store, data),
        "sector.search" => handlers::sector::search(store, data),
        "sector.set_beacon" => handlers::sector::set_beacon(store, ctx, data),

        "move.warp" => handlers::movement::warp(store, ctx, data, now),
        "move.pathfind" => handlers::movement::pathfind(store, ctx, data),
        "move.transwarp" => handlers::movement::transwarp(store, ctx, data, now),
        "move.autopilot.start" => handlers::movement::autopilot_start(store, ctx, data),
        "move.autopilot.status" => handlers::movement::autopilot_status(store, ctx),
        "move.autopilot.stop" => handlers::movement::autopilot_stop(store, ctx),

        "ship.status" => handlers::ship::status(store, ctx),
        "ship.list" => handlers::ship::list(store, ctx),
        "ship.rename" => handlers::ship::rename(store, ctx, data),
        "ship.claim" => handlers::ship::claim(store, ctx, data, now),
        "ship.sell" => handlers::ship::sell(store, ctx, data, now),
        "ship.transfer" => handlers::ship::transfer(store, ctx, data),
        "ship.repair" => handlers::ship::repair(store, ctx, now),
        "ship.upgrade" => handlers::ship::upgrade(store, ctx, data, now),
        "ship.self_destruct" => handlers::ship::self_destruct(store, ctx, now),
        "ship.tow" => handlers::ship::tow(store, ctx, data),
        "ship.cloak" => handlers::ship::cloak(store, ctx, now),
        "ship.decloak" => handlers::ship::decloak(store, ctx),

        "trade.quote" => handlers::trade::quote(store, data),
        "trade.buy" => handlers::trade::buy(store, ctx, data, now),
        "trade.sell" => handlers::trade::sell(store, ctx, data, now),
        "trade.history" => handlers::trade::history(store, ctx),
        "trade.rob" => handlers::trade::rob(store, ctx, data, now),

        "bank.balance" => handlers::bank::balance(store, ctx),
        "bank.deposit" => handlers::bank::deposit(store, ctx, data, now),
        "bank.withdraw" => handlers::bank::withdraw(store, ctx, data, now),
        "bank.transfer" => handlers::bank::transfer(store, ctx, data, now),
        "bank.history" => handlers::bank::history(store, ctx),
        "bank.leaderboard" => handlers::bank::leaderboard(store),

        "citadel.build" | "citadel.upgrade" => handlers::citadel::upgrade(store, ctx, data, now),

        "combat.attack" => handlers::combat::attack(store, ctx, data, now),
        "combat.status" => handlers::combat::status(store, ctx),
        "combat.deploy_fighters" => handlers::combat::deploy_fighters(store, ctx, data, now),
        "combat.lay_mines" => handlers::combat::lay_mines(store, ctx, data, now),
        "combat.deploy_mines" => handlers::combat::deploy_mines(store, ctx, data, now),
        "combat.sweep_mines" => handlers::combat::sweep_mines(store, ctx),
        "combat.scrub_mines" => handlers::combat::scrub_mines(store, ctx),
        "combat.attack_planet" => handlers::combat::attack_planet(store, ctx, data, now),
        "fighters.recall" => handlers::combat::recall_fighters(store, ctx),
        "mines.recall" => handlers::combat::recall_mines(store, ctx),

        "planet.info" => handlers::planet::info(store, data),
        "planet.land" => handlers::planet::land(store, ctx, data),
        "planet.deposit" => handlers::planet::deposit(store, ctx, data, now),

        "stardock.list" => handlers::stardock::list(store, ctx),
        "stardock.dock" => handlers::stardock::dock(store, ctx),
        "stardock.undock" => handlers::stardock::undock(store, ctx),
        "dock.status" => handlers::stardock::dock_status(store, ctx),
        "hardware.list" => handlers::stardock::hardware_list(store),
        "hardware.buy" => handlers::stardock::hardware_buy(store, ctx, data, now),
        "shipyard.list" => handlers::stardock::shipyard_list(store, ctx),

        "corp.create" => handlers::corp::create(store, ctx, data, now),
        "corp.info" => handlers::corp::info(store, data),
        "corp.invite" | "corp.join" => handlers::corp::join(store, ctx, data, now),
        "corp.leave" => handlers::corp::leave(store, ctx, data, now),
        "corp.kick" => handlers::corp::kick(store, ctx, data, now),
        "corp.mail_send" => handlers::corp::mail_send(store, ctx, data, now),
        "corp.mail_inbox" => handlers::corp::mail_inbox(store, data),
        "corp.log" => handlers::corp::log(store, data),

        "tavern.notices" => handlers::tavern::notices(store, ctx),
        "tavern.post_notice" => handlers::tavern::post_notice(store, ctx, data, now),
        "tavern.lottery_buy_ticket" => handlers::tavern::lottery_buy_ticket(store, ctx, data, now),
        "tavern.lottery_status" => handlers::tavern::lottery_status(store),
        "tavern.deadpool_bet" => handlers::tavern::deadpool_bet(store, ctx, data, now),
        "tavern.loan_take" => handlers::tavern::loan_take(store, ctx, data, now),
        "tavern.loan_repay" => handlers::tavern::loan_repay(store, ctx, data, now),

        "comm.say" => handlers::comm::say(store, ctx, data, now),
        "comm.mail_send" => handlers::comm::mail_send(store, ctx, data, now),
        "comm.mail_inbox" => handlers::comm::mail_inbox(store, ctx),
        "comm.mail_read" => handlers::comm::mail_read(store, ctx, data),
        "comm.subscribe" => handlers::comm::subscribe(store, ctx, data),
        "comm.unsubscribe" => handlers::comm::unsubscribe(store, ctx, data),

        "news.recent" => handlers::news::recent(store),

        "fine.list" => handlers::fine::list(store, ctx),
        "fine.pay" => handlers::fine::pay(store, ctx, data, now),

        unknown => {
            warn!("unknown command: {unknown}");
            Err(crate::error::EngineError::UnknownCommand(unknown.to_string()).into())
        }
    }
}
