use crate::error::StoreError;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use swarm_model::{
    AssignmentId, AssignmentRow, AssignmentStatus, ClientId, ClientRow, JobId, JobRow, ResultId,
    ResultRow, ResultStatus, RunId, RunRow, RunSpec, StoreCounts, SubmitterId, TargetSet,
};

/// Everything needed to write one submission's Job/Run/Assignment graph.
#[derive(Debug, Clone, Copy)]
pub struct NewJob<'a> {
    pub submitter_id: SubmitterId,
    pub name: &'a str,
    pub max_attempts: i64,
    pub runs: &'a [RunSpec],
    pub targets: &'a TargetSet,
}

/// A job row removed by the retention sweep, kept for artifact cleanup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReapedJob {
    pub id: JobId,
    pub name: String,
}

#[derive(Debug)]
pub struct SwarmStore {
    conn: Connection,
}

impl SwarmStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        let store = Self { conn };
        store.migrate()?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let store = Self {
            conn: Connection::open_in_memory()?,
        };
        store.migrate()?;
        Ok(store)
    }

    /// Raw connection, for operators and tests that need to inspect or
    /// instrument the schema directly.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    fn migrate(&self) -> Result<(), StoreError> {
        self.conn.execute_batch(
            r#"
            PRAGMA foreign_keys=ON;

            CREATE TABLE IF NOT EXISTS accounts (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              name TEXT NOT NULL UNIQUE,
              password_hash TEXT NOT NULL DEFAULT '',
              auth_token TEXT NOT NULL DEFAULT '',
              created_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS jobs (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              submitter_id INTEGER NOT NULL,
              name TEXT NOT NULL,
              created_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS runs (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              job_id INTEGER NOT NULL REFERENCES jobs(id),
              name TEXT NOT NULL,
              url TEXT NOT NULL,
              created_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS assignments (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              run_id INTEGER NOT NULL REFERENCES runs(id),
              target_id TEXT NOT NULL,
              max_attempts INTEGER NOT NULL,
              status INTEGER NOT NULL DEFAULT 0,
              result_id INTEGER,
              created_at INTEGER NOT NULL,
              updated_at INTEGER NOT NULL,
              UNIQUE (run_id, target_id)
            );

            CREATE TABLE IF NOT EXISTS clients (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              submitter_id INTEGER NOT NULL,
              last_seen_at INTEGER NOT NULL,
              created_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS results (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              run_id INTEGER NOT NULL,
              client_id INTEGER NOT NULL,
              status INTEGER NOT NULL,
              fail INTEGER NOT NULL DEFAULT 0,
              error INTEGER NOT NULL DEFAULT 0,
              updated_at INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_jobs_submitter ON jobs(submitter_id, id);
            CREATE INDEX IF NOT EXISTS idx_runs_job ON runs(job_id);
            CREATE INDEX IF NOT EXISTS idx_assignments_result ON assignments(result_id);
            CREATE INDEX IF NOT EXISTS idx_results_status_client ON results(status, client_id);
            CREATE INDEX IF NOT EXISTS idx_results_run ON results(run_id);
            CREATE INDEX IF NOT EXISTS idx_clients_submitter ON clients(submitter_id);
            "#,
        )?;
        Ok(())
    }

    pub fn create_account(
        &mut self,
        name: &str,
        password_hash: &str,
        auth_token: &str,
        now: DateTime<Utc>,
    ) -> Result<SubmitterId, StoreError> {
        self.conn.execute(
            r#"
            INSERT INTO accounts(name, password_hash, auth_token, created_at)
            VALUES (?1, ?2, ?3, ?4)
            "#,
            params![name, password_hash, auth_token, ts(now)],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn account_name(&self, submitter_id: SubmitterId) -> Result<Option<String>, StoreError> {
        Ok(self
            .conn
            .query_row(
                "SELECT name FROM accounts WHERE id = ?1",
                params![submitter_id],
                |row| row.get::<_, String>(0),
            )
            .optional()?)
    }

    /// Inserts the job, its runs and one assignment per run and target in a
    /// single transaction. Nothing is written unless every insert succeeds.
    pub fn insert_job_graph(
        &mut self,
        job: NewJob<'_>,
        now: DateTime<Utc>,
    ) -> Result<JobId, StoreError> {
        let now = ts(now);
        let tx = self.conn.transaction()?;

        tx.execute(
            "INSERT INTO jobs(submitter_id, name, created_at) VALUES (?1, ?2, ?3)",
            params![job.submitter_id, job.name, now],
        )?;
        let job_id = tx.last_insert_rowid();

        {
            let mut insert_run = tx.prepare_cached(
                "INSERT INTO runs(job_id, name, url, created_at) VALUES (?1, ?2, ?3, ?4)",
            )?;
            let mut insert_assignment = tx.prepare_cached(
                r#"
                INSERT INTO assignments(run_id, target_id, max_attempts, status, result_id, created_at, updated_at)
                VALUES (?1, ?2, ?3, ?4, NULL, ?5, ?5)
                "#,
            )?;
            for run in job.runs {
                let run_id = insert_run.insert(params![job_id, run.name, run.url, now])?;
                for target in job.targets.iter() {
                    insert_assignment.execute(params![
                        run_id,
                        target,
                        job.max_attempts,
                        AssignmentStatus::Available.code(),
                        now
                    ])?;
                }
            }
        }

        tx.commit()?;
        Ok(job_id)
    }

    /// Newest job whose completed results all report zero failures and errors.
    pub fn most_recent_success_job(
        &self,
        submitter_id: SubmitterId,
    ) -> Result<Option<JobId>, StoreError> {
        Ok(self
            .conn
            .query_row(
                r#"
                SELECT j.id
                FROM jobs j
                JOIN runs r ON r.job_id = j.id
                JOIN results rr ON rr.run_id = r.id
                WHERE j.submitter_id = ?1 AND rr.status = ?2
                GROUP BY j.id
                HAVING MAX(rr.fail) = 0 AND MAX(rr.error) = 0
                ORDER BY j.id DESC
                LIMIT 1
                "#,
                params![submitter_id, ResultStatus::Completed.code()],
                |row| row.get::<_, JobId>(0),
            )
            .optional()?)
    }

    pub fn newest_job(&self, submitter_id: SubmitterId) -> Result<Option<JobId>, StoreError> {
        self.job_at_depth(submitter_id, 0)
    }

    /// Job id `depth` positions below the newest one (0 = newest).
    pub fn job_at_depth(
        &self,
        submitter_id: SubmitterId,
        depth: usize,
    ) -> Result<Option<JobId>, StoreError> {
        Ok(self
            .conn
            .query_row(
                r#"
                SELECT id FROM jobs
                WHERE submitter_id = ?1
                ORDER BY id DESC
                LIMIT 1 OFFSET ?2
                "#,
                params![submitter_id, depth as i64],
                |row| row.get::<_, JobId>(0),
            )
            .optional()?)
    }

    /// Deletes every job of `submitter_id` older than `cutoff` except `keep`,
    /// leaves first, in one transaction. Returns the removed jobs.
    pub fn delete_jobs_before(
        &mut self,
        submitter_id: SubmitterId,
        cutoff: JobId,
        keep: JobId,
    ) -> Result<Vec<ReapedJob>, StoreError> {
        let tx = self.conn.transaction()?;
        let candidates = {
            let mut stmt = tx.prepare(
                r#"
                SELECT id, name FROM jobs
                WHERE submitter_id = ?1 AND id < ?2 AND id <> ?3
                ORDER BY id ASC
                "#,
            )?;
            let rows = stmt.query_map(params![submitter_id, cutoff, keep], |row| {
                Ok(ReapedJob {
                    id: row.get(0)?,
                    name: row.get(1)?,
                })
            })?;
            rows.collect::<Result<Vec<_>, _>>()?
        };

        for job in &candidates {
            tx.execute(
                "DELETE FROM assignments WHERE run_id IN (SELECT id FROM runs WHERE job_id = ?1)",
                params![job.id],
            )?;
        }
        for job in &candidates {
            tx.execute("DELETE FROM runs WHERE job_id = ?1", params![job.id])?;
        }
        for job in &candidates {
            tx.execute("DELETE FROM jobs WHERE id = ?1", params![job.id])?;
        }

        tx.commit()?;
        Ok(candidates)
    }

    /// In-progress results whose client has not been seen since `cutoff`.
    pub fn stale_results(&self, cutoff: DateTime<Utc>) -> Result<Vec<ResultId>, StoreError> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT rr.id
            FROM results rr
            INNER JOIN clients c ON rr.client_id = c.id
            WHERE rr.status = ?1 AND c.last_seen_at < ?2
            ORDER BY rr.id ASC
            "#,
        )?;
        let rows = stmt.query_map(
            params![ResultStatus::InProgress.code(), ts(cutoff)],
            |row| row.get::<_, ResultId>(0),
        )?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Marks one in-progress result lost and frees the assignment holding it.
    /// Returns false when the result was no longer in progress.
    pub fn recover_result(
        &mut self,
        result_id: ResultId,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let tx = self.conn.transaction()?;
        let updated = tx.execute(
            "UPDATE results SET status = ?2, updated_at = ?3 WHERE id = ?1 AND status = ?4",
            params![
                result_id,
                ResultStatus::Lost.code(),
                ts(now),
                ResultStatus::InProgress.code()
            ],
        )?;
        if updated == 0 {
            return Ok(false);
        }
        tx.execute(
            r#"
            UPDATE assignments
            SET status = ?2, result_id = NULL, updated_at = ?3
            WHERE result_id = ?1
            "#,
            params![result_id, AssignmentStatus::Available.code(), ts(now)],
        )?;
        tx.commit()?;
        Ok(true)
    }

    pub fn delete_orphan_results(&self) -> Result<usize, StoreError> {
        Ok(self.conn.execute(
            "DELETE FROM results WHERE run_id NOT IN (SELECT id FROM runs)",
            [],
        )?)
    }

    pub fn delete_idle_clients(&self, seen_before: DateTime<Utc>) -> Result<usize, StoreError> {
        Ok(self.conn.execute(
            r#"
            DELETE FROM clients
            WHERE id NOT IN (SELECT DISTINCT client_id FROM results)
            AND last_seen_at < ?1
            "#,
            params![ts(seen_before)],
        )?)
    }

    /// Removes accounts with empty credentials that no client or job refers to.
    /// An account that still owns jobs stays so those jobs keep a resolvable owner.
    pub fn delete_unregistered_accounts(&self) -> Result<usize, StoreError> {
        Ok(self.conn.execute(
            r#"
            DELETE FROM accounts
            WHERE password_hash = '' AND auth_token = ''
            AND id NOT IN (SELECT DISTINCT submitter_id FROM clients)
            AND id NOT IN (SELECT DISTINCT submitter_id FROM jobs)
            "#,
            [],
        )?)
    }

    pub fn register_client(
        &mut self,
        submitter_id: SubmitterId,
        now: DateTime<Utc>,
    ) -> Result<ClientId, StoreError> {
        self.conn.execute(
            "INSERT INTO clients(submitter_id, last_seen_at, created_at) VALUES (?1, ?2, ?2)",
            params![submitter_id, ts(now)],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn record_heartbeat(
        &mut self,
        client_id: ClientId,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let updated = self.conn.execute(
            "UPDATE clients SET last_seen_at = ?2 WHERE id = ?1",
            params![client_id, ts(now)],
        )?;
        if updated == 0 {
            return Err(StoreError::UnknownId {
                entity: "client",
                id: client_id,
            });
        }
        Ok(())
    }

    /// Leases an available assignment to `client_id` with a new in-progress result.
    pub fn begin_attempt(
        &mut self,
        assignment_id: AssignmentId,
        client_id: ClientId,
        now: DateTime<Utc>,
    ) -> Result<ResultId, StoreError> {
        let now = ts(now);
        let tx = self.conn.transaction()?;
        let row = tx
            .query_row(
                "SELECT run_id, status FROM assignments WHERE id = ?1",
                params![assignment_id],
                |row| Ok((row.get::<_, RunId>(0)?, row.get::<_, i64>(1)?)),
            )
            .optional()?;
        let Some((run_id, status)) = row else {
            return Err(StoreError::UnknownId {
                entity: "assignment",
                id: assignment_id,
            });
        };
        if status != AssignmentStatus::Available.code() {
            return Err(StoreError::Conflict("assignment is not available"));
        }

        tx.execute(
            r#"
            INSERT INTO results(run_id, client_id, status, fail, error, updated_at)
            VALUES (?1, ?2, ?3, 0, 0, ?4)
            "#,
            params![run_id, client_id, ResultStatus::InProgress.code(), now],
        )?;
        let result_id = tx.last_insert_rowid();
        tx.execute(
            "UPDATE assignments SET status = ?2, result_id = ?3, updated_at = ?4 WHERE id = ?1",
            params![
                assignment_id,
                AssignmentStatus::InProgress.code(),
                result_id,
                now
            ],
        )?;
        tx.commit()?;
        Ok(result_id)
    }

    /// Records the outcome of an in-progress attempt and completes its assignment.
    pub fn finish_attempt(
        &mut self,
        result_id: ResultId,
        fail: i64,
        error: i64,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let now = ts(now);
        let tx = self.conn.transaction()?;
        let updated = tx.execute(
            r#"
            UPDATE results SET status = ?2, fail = ?3, error = ?4, updated_at = ?5
            WHERE id = ?1 AND status = ?6
            "#,
            params![
                result_id,
                ResultStatus::Completed.code(),
                fail,
                error,
                now,
                ResultStatus::InProgress.code()
            ],
        )?;
        if updated == 0 {
            return Err(StoreError::Conflict("result is not in progress"));
        }
        tx.execute(
            "UPDATE assignments SET status = ?2, updated_at = ?3 WHERE result_id = ?1",
            params![result_id, AssignmentStatus::Completed.code(), now],
        )?;
        tx.commit()?;
        Ok(())
    }

    pub fn counts(&self) -> Result<StoreCounts, StoreError> {
        Ok(StoreCounts {
            accounts: self.count("accounts")?,
            jobs: self.count("jobs")?,
            runs: self.count("runs")?,
            assignments: self.count("assignments")?,
            results: self.count("results")?,
            clients: self.count("clients")?,
        })
    }

    fn count(&self, table: &'static str) -> Result<usize, StoreError> {
        let sql = format!("SELECT COUNT(*) FROM {table}");
        let count: i64 = self.conn.query_row(&sql, [], |row| row.get(0))?;
        Ok(count.max(0) as usize)
    }

    pub fn job(&self, job_id: JobId) -> Result<Option<JobRow>, StoreError> {
        Ok(self
            .conn
            .query_row(
                "SELECT id, submitter_id, name, created_at FROM jobs WHERE id = ?1",
                params![job_id],
                read_job_row,
            )
            .optional()?)
    }

    pub fn jobs_for_submitter(&self, submitter_id: SubmitterId) -> Result<Vec<JobRow>, StoreError> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT id, submitter_id, name, created_at
            FROM jobs
            WHERE submitter_id = ?1
            ORDER BY id ASC
            "#,
        )?;
        let rows = stmt.query_map(params![submitter_id], read_job_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn runs_for_job(&self, job_id: JobId) -> Result<Vec<RunRow>, StoreError> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT id, job_id, name, url, created_at
            FROM runs
            WHERE job_id = ?1
            ORDER BY id ASC
            "#,
        )?;
        let rows = stmt.query_map(params![job_id], |row| {
            Ok(RunRow {
                id: row.get(0)?,
                job_id: row.get(1)?,
                name: row.get(2)?,
                url: row.get(3)?,
                created_at: from_ts(row.get(4)?),
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn assignments_for_job(&self, job_id: JobId) -> Result<Vec<AssignmentRow>, StoreError> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT a.id, a.run_id, a.target_id, a.max_attempts, a.status, a.result_id, a.created_at, a.updated_at
            FROM assignments a
            JOIN runs r ON r.id = a.run_id
            WHERE r.job_id = ?1
            ORDER BY a.id ASC
            "#,
        )?;
        let rows = stmt.query_map(params![job_id], read_assignment_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn assignment(&self, assignment_id: AssignmentId) -> Result<Option<AssignmentRow>, StoreError> {
        Ok(self
            .conn
            .query_row(
                r#"
                SELECT id, run_id, target_id, max_attempts, status, result_id, created_at, updated_at
                FROM assignments
                WHERE id = ?1
                "#,
                params![assignment_id],
                read_assignment_row,
            )
            .optional()?)
    }

    pub fn result(&self, result_id: ResultId) -> Result<Option<ResultRow>, StoreError> {
        Ok(self
            .conn
            .query_row(
                "SELECT id, run_id, client_id, status, fail, error FROM results WHERE id = ?1",
                params![result_id],
                |row| {
                    let code: i64 = row.get(3)?;
                    Ok(ResultRow {
                        id: row.get(0)?,
                        run_id: row.get(1)?,
                        client_id: row.get(2)?,
                        status: ResultStatus::from_code(code)
                            .ok_or(rusqlite::Error::IntegralValueOutOfRange(3, code))?,
                        fail: row.get(4)?,
                        error: row.get(5)?,
                    })
                },
            )
            .optional()?)
    }

    pub fn client(&self, client_id: ClientId) -> Result<Option<ClientRow>, StoreError> {
        Ok(self
            .conn
            .query_row(
                "SELECT id, submitter_id, last_seen_at FROM clients WHERE id = ?1",
                params![client_id],
                |row| {
                    Ok(ClientRow {
                        id: row.get(0)?,
                        submitter_id: row.get(1)?,
                        last_seen_at: from_ts(row.get(2)?),
                    })
                },
            )
            .optional()?)
    }
}

fn read_job_row(row: &Row<'_>) -> Result<JobRow, rusqlite::Error> {
    Ok(JobRow {
        id: row.get(0)?,
        submitter_id: row.get(1)?,
        name: row.get(2)?,
        created_at: from_ts(row.get(3)?),
    })
}

fn read_assignment_row(row: &Row<'_>) -> Result<AssignmentRow, rusqlite::Error> {
    let code: i64 = row.get(4)?;
    Ok(AssignmentRow {
        id: row.get(0)?,
        run_id: row.get(1)?,
        target_id: row.get(2)?,
        max_attempts: row.get(3)?,
        status: AssignmentStatus::from_code(code)
            .ok_or(rusqlite::Error::IntegralValueOutOfRange(4, code))?,
        result_id: row.get(5)?,
        created_at: from_ts(row.get(6)?),
        updated_at: from_ts(row.get(7)?),
    })
}

fn ts(at: DateTime<Utc>) -> i64 {
    at.timestamp()
}

fn from_ts(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn fresh_store_is_empty() {
        let store = SwarmStore::open_in_memory().expect("open store");
        assert_eq!(store.counts().expect("counts"), StoreCounts::default());
    }

    #[test]
    fn attempt_lifecycle_keeps_assignment_and_result_in_step() {
        let mut store = SwarmStore::open_in_memory().expect("open store");
        let submitter = store
            .create_account("alice", "hash", "token", now())
            .expect("account");
        let runs = vec![RunSpec::new("Unit", "http://x/unit")];
        let targets: TargetSet = ["chrome"].into_iter().collect();
        let job_id = store
            .insert_job_graph(
                NewJob {
                    submitter_id: submitter,
                    name: "Job",
                    max_attempts: 2,
                    runs: &runs,
                    targets: &targets,
                },
                now(),
            )
            .expect("insert graph");
        let assignment = store.assignments_for_job(job_id).expect("assignments")[0].clone();
        let client = store.register_client(submitter, now()).expect("client");

        let result_id = store
            .begin_attempt(assignment.id, client, now())
            .expect("begin attempt");
        let leased = store.assignment(assignment.id).expect("load").expect("exists");
        assert_eq!(leased.status, AssignmentStatus::InProgress);
        assert_eq!(leased.result_id, Some(result_id));

        let second = store.begin_attempt(assignment.id, client, now());
        assert!(matches!(second, Err(StoreError::Conflict(_))));

        store
            .finish_attempt(result_id, 0, 0, now())
            .expect("finish attempt");
        let done = store.assignment(assignment.id).expect("load").expect("exists");
        assert_eq!(done.status, AssignmentStatus::Completed);
        let result = store.result(result_id).expect("load").expect("exists");
        assert_eq!(result.status, ResultStatus::Completed);
    }

    #[test]
    fn heartbeat_for_unknown_client_fails() {
        let mut store = SwarmStore::open_in_memory().expect("open store");
        let err = store.record_heartbeat(42, now()).expect_err("unknown client");
        assert!(matches!(err, StoreError::UnknownId { entity: "client", id: 42 }));
    }
}
