use ::duckdb::{params, Connection};

struct Migration {
    version: &'static str,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: "0001_observations",
        sql: r#"
CREATE TABLE IF NOT EXISTS observations (
    instrument TEXT NOT NULL,
    provider TEXT NOT NULL,
    ts DATE NOT NULL,
    value DOUBLE NOT NULL,
    open DOUBLE,
    high DOUBLE,
    low DOUBLE,
    close DOUBLE,
    volume DOUBLE,
    updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
    PRIMARY KEY(instrument, provider, ts)
);
"#,
    },
    Migration {
        version: "0002_run_audit",
        sql: r#"
CREATE TABLE IF NOT EXISTS pipeline_runs (
    run_id TEXT PRIMARY KEY,
    mode TEXT NOT NULL,
    status TEXT NOT NULL,
    started_at TEXT NOT NULL,
    finished_at TEXT NOT NULL,
    range_start DATE NOT NULL,
    range_end DATE NOT NULL,
    recorded_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
);

CREATE TABLE IF NOT EXISTS run_outcomes (
    run_id TEXT NOT NULL,
    instrument TEXT NOT NULL,
    provider TEXT NOT NULL,
    fetched BIGINT NOT NULL,
    stored BIGINT NOT NULL,
    new_rows BIGINT NOT NULL,
    score DOUBLE,
    band TEXT,
    decision TEXT NOT NULL,
    error TEXT,
    report_json TEXT,
    PRIMARY KEY(run_id, instrument, provider)
);
"#,
    },
    Migration {
        version: "0003_indexes",
        sql: r#"
CREATE INDEX IF NOT EXISTS idx_pipeline_runs_started ON pipeline_runs(started_at);
"#,
    },
];

pub fn apply_migrations(connection: &Connection) -> Result<(), ::duckdb::Error> {
    connection.execute_batch(
        r#"
CREATE TABLE IF NOT EXISTS schema_migrations (
    version TEXT PRIMARY KEY,
    applied_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
);
"#,
    )?;

    for migration in MIGRATIONS {
        if is_applied(connection, migration.version)? {
            continue;
        }
        connection.execute_batch(migration.sql)?;
        connection.execute(
            "INSERT INTO schema_migrations (version) VALUES (?)",
            params![migration.version],
        )?;
    }

    Ok(())
}

/// True when every known migration has been recorded.
pub fn all_applied(connection: &Connection) -> Result<bool, ::duckdb::Error> {
    for migration in MIGRATIONS {
        if !is_applied(connection, migration.version)? {
            return Ok(false);
        }
    }
    Ok(true)
}

fn is_applied(connection: &Connection, version: &str) -> Result<bool, ::duckdb::Error> {
    let count: i64 = connection.query_row(
        "SELECT COUNT(*) FROM schema_migrations WHERE version = ?",
        params![version],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}
