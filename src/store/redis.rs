//! Redis-backed [`StateStore`].
//!
//! Uses one multiplexed connection; cloning it is cheap and every call clones
//! so concurrent callers pipeline over the same socket. The two guarded
//! operations run as Lua scripts, which Redis executes without interleaving
//! other commands. Both validate their inputs before the first write.

use super::{PageCompletion, PageReport, StateStore, TerminalClaim};
use crate::error::StoreError;
use crate::output::JobStatus;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use redis::aio::MultiplexedConnection;
use redis::Script;
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

// KEYS: job, page, output hash.
// ARGV: page status, page num, output value, counter field, completed_at,
//       ttl secs, total pages, clean status, status with errors.
// Returns {code, finished, failed}: 0 missing job, 1 duplicate, 2 recorded,
// 3 recorded and job finished.
static COMPLETE_PAGE: Lazy<Script> = Lazy::new(|| {
    Script::new(
        r#"
if redis.call('EXISTS', KEYS[1]) == 0 then return {0, 0, 0} end
if redis.call('HEXISTS', KEYS[2], 'terminal') == 1 then return {1, 0, 0} end
local counter = tonumber(redis.call('HGET', KEYS[1], ARGV[4]) or '0')
local finished = tonumber(redis.call('HGET', KEYS[1], 'finished_pages') or '0')
local failed = tonumber(redis.call('HGET', KEYS[1], 'failed_pages') or '0')
if not counter or not finished or not failed then
  return redis.error_reply('ERR job counters are not integers')
end
counter = counter + 1
finished = finished + 1
if ARGV[4] == 'failed_pages' then failed = counter end
redis.call('HSET', KEYS[2], 'terminal', ARGV[1], 'page_num', ARGV[2],
  'status', ARGV[1], 'completed_at', ARGV[5])
redis.call('EXPIRE', KEYS[2], ARGV[6])
redis.call('HSET', KEYS[3], ARGV[2], ARGV[3])
redis.call('EXPIRE', KEYS[3], ARGV[6])
redis.call('HSET', KEYS[1], ARGV[4], counter, 'finished_pages', finished)
redis.call('EXPIRE', KEYS[1], ARGV[6])
if finished ~= tonumber(ARGV[7]) or redis.call('HEXISTS', KEYS[1], 'terminal') == 1 then
  return {2, finished, failed}
end
local status = ARGV[8]
if failed > 0 then status = ARGV[9] end
redis.call('HSET', KEYS[1], 'terminal', 'pages', 'status', status, 'completed_at', ARGV[5])
return {3, finished, failed}
"#,
    )
});

// KEYS: job. ARGV: owner, ttl secs, then field/value pairs.
// Returns 0 missing, 1 lost, 2 won.
static CLAIM_TERMINAL: Lazy<Script> = Lazy::new(|| {
    Script::new(
        r#"
if redis.call('EXISTS', KEYS[1]) == 0 then return 0 end
if redis.call('HSETNX', KEYS[1], 'terminal', ARGV[1]) == 0 then return 1 end
if #ARGV > 2 then redis.call('HSET', KEYS[1], unpack(ARGV, 3)) end
redis.call('EXPIRE', KEYS[1], ARGV[2])
return 2
"#,
    )
});

fn ttl_secs(ttl: Duration) -> u64 {
    ttl.as_secs().max(1)
}

/// A [`StateStore`] talking to a Redis server.
#[derive(Clone)]
pub struct RedisStore {
    conn: MultiplexedConnection,
    target: String,
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore")
            .field("target", &self.target)
            .finish()
    }
}

impl RedisStore {
    /// Connect to `url` (e.g. `redis://localhost:6379/0`).
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let target = redact(url);
        let client = redis::Client::open(url).map_err(|e| StoreError::Connection {
            target: target.clone(),
            detail: e.to_string(),
        })?;
        let conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| StoreError::Connection {
                target: target.clone(),
                detail: e.to_string(),
            })?;
        debug!("Connected to Redis at {}", target);
        Ok(Self { conn, target })
    }

    fn command_error(command: &str, e: redis::RedisError) -> StoreError {
        StoreError::Command {
            command: command.to_string(),
            detail: e.to_string(),
        }
    }
}

/// Strip credentials from a connection URL before it is logged.
fn redact(url: &str) -> String {
    match (url.find("://"), url.rfind('@')) {
        (Some(scheme_end), Some(at)) if at > scheme_end => {
            format!("{}://***@{}", &url[..scheme_end], &url[at + 1..])
        }
        _ => url.to_string(),
    }
}

#[async_trait]
impl StateStore for RedisStore {
    async fn hset_multiple(&self, key: &str, fields: &[(&str, String)]) -> Result<(), StoreError> {
        if fields.is_empty() {
            return Ok(());
        }
        let mut cmd = redis::cmd("HSET");
        cmd.arg(key);
        for (field, value) in fields {
            cmd.arg(*field).arg(value);
        }
        let mut conn = self.conn.clone();
        let _: i64 = cmd
            .query_async(&mut conn)
            .await
            .map_err(|e| Self::command_error("HSET", e))?;
        Ok(())
    }

    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let _: i64 = redis::cmd("HSET")
            .arg(key)
            .arg(field)
            .arg(value)
            .query_async(&mut conn)
            .await
            .map_err(|e| Self::command_error("HSET", e))?;
        Ok(())
    }

    async fn hset_nx(&self, key: &str, field: &str, value: &str) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        let set: i64 = redis::cmd("HSETNX")
            .arg(key)
            .arg(field)
            .arg(value)
            .query_async(&mut conn)
            .await
            .map_err(|e| Self::command_error("HSETNX", e))?;
        Ok(set == 1)
    }

    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.conn.clone();
        redis::cmd("HGET")
            .arg(key)
            .arg(field)
            .query_async(&mut conn)
            .await
            .map_err(|e| Self::command_error("HGET", e))
    }

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>, StoreError> {
        let mut conn = self.conn.clone();
        redis::cmd("HGETALL")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| Self::command_error("HGETALL", e))
    }

    async fn hincr(&self, key: &str, field: &str, delta: i64) -> Result<i64, StoreError> {
        let mut conn = self.conn.clone();
        redis::cmd("HINCRBY")
            .arg(key)
            .arg(field)
            .arg(delta)
            .query_async(&mut conn)
            .await
            .map_err(|e| Self::command_error("HINCRBY", e))
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let _: i64 = redis::cmd("EXPIRE")
            .arg(key)
            .arg(ttl_secs(ttl))
            .query_async(&mut conn)
            .await
            .map_err(|e| Self::command_error("EXPIRE", e))?;
        Ok(())
    }

    async fn del(&self, keys: &[String]) -> Result<(), StoreError> {
        if keys.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.clone();
        let _: i64 = redis::cmd("DEL")
            .arg(keys)
            .query_async(&mut conn)
            .await
            .map_err(|e| Self::command_error("DEL", e))?;
        Ok(())
    }

    async fn complete_page(&self, report: &PageCompletion) -> Result<PageReport, StoreError> {
        let mut conn = self.conn.clone();
        let (code, finished, failed): (i64, i64, i64) = COMPLETE_PAGE
            .key(&report.job_key)
            .key(&report.page_key)
            .key(&report.output_key)
            .arg(&report.page_status)
            .arg(report.page_num)
            .arg(&report.output_value)
            .arg(report.counter)
            .arg(&report.completed_at)
            .arg(ttl_secs(report.ttl))
            .arg(report.total_pages)
            .arg(JobStatus::Completed.as_str())
            .arg(JobStatus::CompletedWithErrors.as_str())
            .invoke_async(&mut conn)
            .await
            .map_err(|e| Self::command_error("EVALSHA complete_page", e))?;

        let count = |n: i64| usize::try_from(n).unwrap_or(0);
        match code {
            0 => Ok(PageReport::MissingJob),
            1 => Ok(PageReport::Duplicate),
            2 => Ok(PageReport::Recorded {
                finished: count(finished),
            }),
            3 => Ok(PageReport::JobFinished {
                status: if failed == 0 {
                    JobStatus::Completed
                } else {
                    JobStatus::CompletedWithErrors
                },
                failed: count(failed),
            }),
            other => Err(StoreError::Command {
                command: "EVALSHA complete_page".into(),
                detail: format!("unexpected script result {other}"),
            }),
        }
    }

    async fn claim_terminal(
        &self,
        key: &str,
        owner: &str,
        fields: &[(&str, String)],
        ttl: Duration,
    ) -> Result<TerminalClaim, StoreError> {
        let mut invocation = CLAIM_TERMINAL.key(key);
        invocation.arg(owner).arg(ttl_secs(ttl));
        for (field, value) in fields {
            invocation.arg(*field).arg(value);
        }
        let mut conn = self.conn.clone();
        let code: i64 = invocation
            .invoke_async(&mut conn)
            .await
            .map_err(|e| Self::command_error("EVALSHA claim_terminal", e))?;
        match code {
            0 => Ok(TerminalClaim::Missing),
            1 => Ok(TerminalClaim::Lost),
            2 => Ok(TerminalClaim::Won),
            other => Err(StoreError::Command {
                command: "EVALSHA claim_terminal".into(),
                detail: format!("unexpected script result {other}"),
            }),
        }
    }

    fn name(&self) -> &str {
        "redis"
    }
}
