//! The cron scheduler: one background task, ticking on a fixed interval,
//! that claims due `cron_tasks` rows via the advisory lock in [`crate::store`]
//! and runs their bodies. Safe to run from more than one process against the
//! same database file -- the lock is what keeps two schedulers from racing
//! on the same task.

pub mod jobs;
pub mod schedule;

use std::sync::Arc;
use std::time::Duration;

use log::{error, info, warn};

use crate::broadcaster::Broadcaster;
use crate::config::CONFIG;
use crate::dispatcher::now_unix;
use crate::store::{LockOutcome, Store};

/// Runs until the process exits (the caller `.abort()`s this task on
/// shutdown). Each tick opens its own [`Store`] handle, same discipline as a
/// connection worker.
pub async fn run_scheduler(broadcaster: Arc<Broadcaster>) {
    let owner = format!("sectord-cron-{}", std::process::id());
    let tick = Duration::from_secs(CONFIG.cron_tick_sec.max(1));
    info!("cron scheduler started, tick={}s, owner={owner}", tick.as_secs());

    loop {
        tokio::time::sleep(tick).await;
        if let Err(e) = run_due_tasks(&owner, &broadcaster) {
            error!("cron tick failed: {e}");
        }
    }
}

fn run_due_tasks(owner: &str, broadcaster: &Broadcaster) -> Result<(), crate::store::StoreError> {
    let store = Store::open(&CONFIG.db_path)?;
    let now = now_unix();

    let mut stmt = store.prepare(
        "SELECT name, schedule FROM cron_tasks WHERE enabled = 1 AND next_due_at <= ?1",
    )?;
    let due: Vec<(String, String)> = stmt
        .query_map(rusqlite::params![now], |r| Ok((r.get(0)?, r.get(1)?)))?
        .collect::<Result<_, _>>()?;
    drop(stmt);

    for (name, schedule_raw) in due {
        let schedule = match schedule::parse(&schedule_raw) {
            Ok(s) => s,
            Err(e) => {
                warn!("cron task '{name}' has unparseable schedule '{schedule_raw}': {e}, disabling");
                store.execute("UPDATE cron_tasks SET enabled = 0 WHERE name = ?1", rusqlite::params![name])?;
                continue;
            }
        };

        let lock_name = format!("cron:{name}");
        let ttl_ms = schedule::lock_ttl_ms(schedule);
        match store.try_lock(&lock_name, owner, now * 1000, ttl_ms)? {
            LockOutcome::HeldByOther => continue,
            LockOutcome::Acquired => {}
        }

        let result = jobs::run(&name, &store, now, broadcaster);
        match &result {
            Ok(summary) => info!("cron task '{name}' ran: {summary}"),
            Err(e) => error!("cron task '{name}' failed: {e}"),
        }

        let next_due_at = schedule::next_due_after(schedule, now);
        store.execute(
            "UPDATE cron_tasks SET last_run_at = ?1, next_due_at = ?2 WHERE name = ?3",
            rusqlite::params![now, next_due_at, name],
        )?;
        store.release_lock(&lock_name, owner)?;
    }

    Ok(())
}
