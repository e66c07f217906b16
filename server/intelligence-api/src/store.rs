//! PostgreSQL memory store.
//!
//! Observations are an append-only table; pattern counters are maintained in
//! the same transaction with `INSERT .. ON CONFLICT DO UPDATE .. RETURNING`,
//! so an observation and its counter bumps land together. Structured records
//! (observations, commit features, windows) are stored as JSON text; the
//! columns the read paths filter on (tags, author, window status) are kept
//! alongside and indexed.

use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use intelligence_engine::{
  memory::rank_similar, CommitRecord, CommitRef, DeploymentWindow, EngineError, IncidentSeverity,
  MemoryStore, Observation, PatternCounts, Result, SimilarIncident, WindowStatus,
};
use serde::de::DeserializeOwned;
use sqlx_core::query::query;
use sqlx_core::row::Row;
use sqlx_postgres::{PgPool, PgPoolOptions, PgRow, Postgres};
use tracing::{debug, info};

const SCHEMA: &[&str] = &[
  r#"CREATE TABLE IF NOT EXISTS intel_observations (
    id BIGSERIAL PRIMARY KEY,
    incident_id TEXT UNIQUE,
    kind TEXT NOT NULL,
    author TEXT,
    tags TEXT[] NOT NULL DEFAULT '{}',
    incident BOOLEAN NOT NULL DEFAULT FALSE,
    body TEXT NOT NULL,
    observed_at TIMESTAMPTZ NOT NULL
  )"#,
  "CREATE INDEX IF NOT EXISTS intel_observations_tags ON intel_observations USING GIN (tags)",
  "CREATE INDEX IF NOT EXISTS intel_observations_author ON intel_observations (author, observed_at)",
  r#"CREATE TABLE IF NOT EXISTS intel_patterns (
    tag TEXT PRIMARY KEY,
    occurrence_count BIGINT NOT NULL DEFAULT 0,
    incident_count BIGINT NOT NULL DEFAULT 0,
    typical_impact TEXT,
    last_seen TIMESTAMPTZ
  )"#,
  r#"CREATE TABLE IF NOT EXISTS intel_commits (
    repository TEXT NOT NULL,
    commit_hash TEXT NOT NULL,
    body TEXT NOT NULL,
    analyzed_at TIMESTAMPTZ NOT NULL,
    PRIMARY KEY (repository, commit_hash)
  )"#,
  r#"CREATE TABLE IF NOT EXISTS intel_windows (
    window_id TEXT PRIMARY KEY,
    status TEXT NOT NULL DEFAULT 'OPEN',
    body TEXT NOT NULL,
    updated_at TIMESTAMPTZ NOT NULL
  )"#,
  "CREATE INDEX IF NOT EXISTS intel_windows_status ON intel_windows (status)",
];

const BUMP_PATTERN: &str = r#"
  INSERT INTO intel_patterns (tag, occurrence_count, incident_count, typical_impact, last_seen)
  VALUES ($1, 1, $2, $3, $4)
  ON CONFLICT (tag) DO UPDATE SET
    occurrence_count = intel_patterns.occurrence_count + 1,
    incident_count = intel_patterns.incident_count + EXCLUDED.incident_count,
    typical_impact = LEAST(intel_patterns.typical_impact, EXCLUDED.typical_impact),
    last_seen = GREATEST(intel_patterns.last_seen, EXCLUDED.last_seen)
  RETURNING tag, occurrence_count, incident_count, typical_impact, last_seen
"#;

const PATTERN_COLUMNS: &str =
  "SELECT tag, occurrence_count, incident_count, typical_impact, last_seen FROM intel_patterns";

pub struct PgStore {
  pool: PgPool,
}

fn db_err(e: sqlx_core::Error) -> EngineError {
  EngineError::unavailable("postgres", e)
}

/// Severity as stored; text order matches severity order (P1 < P4).
fn severity_text(s: IncidentSeverity) -> &'static str {
  match s {
    IncidentSeverity::P1 => "P1",
    IncidentSeverity::P2 => "P2",
    IncidentSeverity::P3 => "P3",
    IncidentSeverity::P4 => "P4",
  }
}

fn observation_kind(obs: &Observation) -> &'static str {
  match obs {
    Observation::Incident(_) => "incident",
    Observation::Outcome(_) => "outcome",
  }
}

fn status_text(s: WindowStatus) -> &'static str {
  match s {
    WindowStatus::Open => "OPEN",
    WindowStatus::ClosedHealthy => "CLOSED_HEALTHY",
    WindowStatus::ClosedRolledBack => "CLOSED_ROLLED_BACK",
    WindowStatus::Cancelled => "CANCELLED",
  }
}

fn counts_from_row(row: &PgRow) -> Result<PatternCounts> {
  let typical: Option<String> = row.try_get("typical_impact").map_err(db_err)?;
  Ok(PatternCounts {
    tag: row.try_get("tag").map_err(db_err)?,
    occurrence_count: row.try_get::<i64, _>("occurrence_count").map_err(db_err)?.max(0) as u64,
    incident_count: row.try_get::<i64, _>("incident_count").map_err(db_err)?.max(0) as u64,
    typical_impact: typical.as_deref().and_then(IncidentSeverity::from_str_loose),
    last_seen: row.try_get("last_seen").map_err(db_err)?,
  })
}

fn body_from_row<T: DeserializeOwned>(row: &PgRow) -> Result<T> {
  let body: String = row.try_get("body").map_err(db_err)?;
  Ok(serde_json::from_str(&body)?)
}

impl PgStore {
  /// Connect and create the tables when missing.
  pub async fn connect(database_url: &str) -> Result<Self> {
    let pool = PgPoolOptions::new()
      .max_connections(5)
      .connect(database_url)
      .await
      .map_err(db_err)?;
    for stmt in SCHEMA {
      query::<Postgres>(stmt).execute(&pool).await.map_err(db_err)?;
    }
    info!("postgres memory store ready");
    Ok(Self { pool })
  }
}

#[async_trait]
impl MemoryStore for PgStore {
  async fn append(&self, obs: &Observation) -> Result<Vec<PatternCounts>> {
    let body = serde_json::to_string(obs)?;
    let incident_id = match obs {
      Observation::Incident(i) => Some(i.id.clone()),
      Observation::Outcome(_) => None,
    };

    let mut tx = self.pool.begin().await.map_err(db_err)?;
    let inserted = query::<Postgres>(
      r#"INSERT INTO intel_observations (incident_id, kind, author, tags, incident, body, observed_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7)
         ON CONFLICT (incident_id) DO NOTHING"#,
    )
    .bind(incident_id)
    .bind(observation_kind(obs))
    .bind(obs.author())
    .bind(obs.tags().iter().cloned().collect::<Vec<String>>())
    .bind(obs.is_incident())
    .bind(body)
    .bind(obs.at())
    .execute(&mut *tx)
    .await
    .map_err(db_err)?
    .rows_affected();

    if inserted == 0 {
      tx.rollback().await.map_err(db_err)?;
      debug!("postgres: duplicate incident ignored");
      return Ok(Vec::new());
    }

    let mut updated = Vec::with_capacity(obs.tags().len());
    for tag in obs.tags() {
      let row = query::<Postgres>(BUMP_PATTERN)
        .bind(tag.as_str())
        .bind(i64::from(obs.is_incident()))
        .bind(obs.severity().map(severity_text))
        .bind(obs.at())
        .fetch_one(&mut *tx)
        .await
        .map_err(db_err)?;
      updated.push(counts_from_row(&row)?);
    }
    tx.commit().await.map_err(db_err)?;
    Ok(updated)
  }

  async fn pattern(&self, tag: &str) -> Result<Option<PatternCounts>> {
    let sql = format!("{PATTERN_COLUMNS} WHERE tag = $1");
    let row = query::<Postgres>(&sql)
      .bind(tag)
      .fetch_optional(&self.pool)
      .await
      .map_err(db_err)?;
    row.as_ref().map(counts_from_row).transpose()
  }

  async fn patterns(&self) -> Result<Vec<PatternCounts>> {
    let sql = format!("{PATTERN_COLUMNS} ORDER BY tag");
    let rows = query::<Postgres>(&sql)
      .fetch_all(&self.pool)
      .await
      .map_err(db_err)?;
    rows.iter().map(counts_from_row).collect()
  }

  async fn observations(&self) -> Result<Vec<Observation>> {
    let rows = query::<Postgres>("SELECT body FROM intel_observations ORDER BY id")
      .fetch_all(&self.pool)
      .await
      .map_err(db_err)?;
    rows.iter().map(body_from_row).collect()
  }

  async fn observation_count(&self) -> Result<u64> {
    let row = query::<Postgres>("SELECT COUNT(*) AS n FROM intel_observations")
      .fetch_one(&self.pool)
      .await
      .map_err(db_err)?;
    Ok(row.try_get::<i64, _>("n").map_err(db_err)?.max(0) as u64)
  }

  async fn incidents_sharing(
    &self,
    tags: &BTreeSet<String>,
    limit: usize,
  ) -> Result<Vec<SimilarIncident>> {
    if tags.is_empty() || limit == 0 {
      return Ok(Vec::new());
    }
    let wanted: Vec<String> = tags.iter().cloned().collect();
    let rows = query::<Postgres>(
      r#"SELECT body FROM intel_observations
         WHERE kind = 'incident' AND tags && $1::text[]
         ORDER BY cardinality(ARRAY(SELECT unnest(tags) INTERSECT SELECT unnest($1::text[]))) DESC,
                  observed_at DESC, incident_id
         LIMIT $2"#,
    )
    .bind(&wanted)
    .bind(limit as i64)
    .fetch_all(&self.pool)
    .await
    .map_err(db_err)?;

    let mut found = Vec::with_capacity(rows.len());
    for row in &rows {
      if let Observation::Incident(i) = body_from_row::<Observation>(row)? {
        let shared_tags = i.tags.intersection(tags).cloned().collect();
        found.push(SimilarIncident {
          incident_id: i.id,
          severity: i.severity,
          description: i.description,
          shared_tags,
          occurred_at: i.occurred_at,
        });
      }
    }
    Ok(rank_similar(found, limit))
  }

  async fn author_counts(
    &self,
    author: &str,
    since: DateTime<Utc>,
    until: DateTime<Utc>,
  ) -> Result<(u64, u64)> {
    let row = query::<Postgres>(
      r#"SELECT COUNT(*) AS total, COUNT(*) FILTER (WHERE incident) AS incidents
         FROM intel_observations
         WHERE author = $1 AND observed_at BETWEEN $2 AND $3"#,
    )
    .bind(author)
    .bind(since)
    .bind(until)
    .fetch_one(&self.pool)
    .await
    .map_err(db_err)?;
    let total: i64 = row.try_get("total").map_err(db_err)?;
    let incidents: i64 = row.try_get("incidents").map_err(db_err)?;
    Ok((total.max(0) as u64, incidents.max(0) as u64))
  }

  async fn replace_patterns(&self, patterns: &[PatternCounts]) -> Result<()> {
    let mut tx = self.pool.begin().await.map_err(db_err)?;
    query::<Postgres>("DELETE FROM intel_patterns")
      .execute(&mut *tx)
      .await
      .map_err(db_err)?;
    for p in patterns {
      query::<Postgres>(
        r#"INSERT INTO intel_patterns (tag, occurrence_count, incident_count, typical_impact, last_seen)
           VALUES ($1, $2, $3, $4, $5)"#,
      )
      .bind(p.tag.as_str())
      .bind(p.occurrence_count as i64)
      .bind(p.incident_count as i64)
      .bind(p.typical_impact.map(severity_text))
      .bind(p.last_seen)
      .execute(&mut *tx)
      .await
      .map_err(db_err)?;
    }
    tx.commit().await.map_err(db_err)
  }

  async fn get_commit(&self, commit: &CommitRef) -> Result<Option<CommitRecord>> {
    let row = query::<Postgres>(
      "SELECT body FROM intel_commits WHERE repository = $1 AND commit_hash = $2",
    )
    .bind(commit.repository.as_str())
    .bind(commit.commit_hash.as_str())
    .fetch_optional(&self.pool)
    .await
    .map_err(db_err)?;
    row.as_ref().map(body_from_row).transpose()
  }

  /// Stored features are kept; every other top-level key of the record is
  /// taken from the new body.
  async fn put_commit(&self, record: &CommitRecord) -> Result<()> {
    query::<Postgres>(
      r#"INSERT INTO intel_commits (repository, commit_hash, body, analyzed_at)
         VALUES ($1, $2, $3, $4)
         ON CONFLICT (repository, commit_hash) DO UPDATE SET
           body = (intel_commits.body::jsonb || (EXCLUDED.body::jsonb - 'features'))::text,
           analyzed_at = EXCLUDED.analyzed_at"#,
    )
    .bind(record.features.repository.as_str())
    .bind(record.features.commit_hash.as_str())
    .bind(serde_json::to_string(record)?)
    .bind(record.analyzed_at)
    .execute(&self.pool)
    .await
    .map_err(db_err)?;
    Ok(())
  }

  async fn commits_since(&self, since: DateTime<Utc>) -> Result<Vec<CommitRecord>> {
    let rows = query::<Postgres>(
      "SELECT body FROM intel_commits WHERE analyzed_at >= $1 ORDER BY analyzed_at",
    )
    .bind(since)
    .fetch_all(&self.pool)
    .await
    .map_err(db_err)?;
    rows.iter().map(body_from_row).collect()
  }

  async fn save_window(&self, window: &DeploymentWindow) -> Result<()> {
    query::<Postgres>(
      r#"INSERT INTO intel_windows (window_id, status, body, updated_at)
         VALUES ($1, $2, $3, NOW())
         ON CONFLICT (window_id) DO UPDATE SET
           status = EXCLUDED.status, body = EXCLUDED.body, updated_at = NOW()"#,
    )
    .bind(window.window_id.as_str())
    .bind(status_text(window.status))
    .bind(serde_json::to_string(window)?)
    .execute(&self.pool)
    .await
    .map_err(db_err)?;
    Ok(())
  }

  async fn get_window(&self, window_id: &str) -> Result<Option<DeploymentWindow>> {
    let row = query::<Postgres>("SELECT body FROM intel_windows WHERE window_id = $1")
      .bind(window_id)
      .fetch_optional(&self.pool)
      .await
      .map_err(db_err)?;
    row.as_ref().map(body_from_row).transpose()
  }

  async fn load_open_windows(&self) -> Result<Vec<DeploymentWindow>> {
    let rows = query::<Postgres>("SELECT body FROM intel_windows WHERE status = 'OPEN' ORDER BY updated_at")
      .fetch_all(&self.pool)
      .await
      .map_err(db_err)?;
    rows.iter().map(body_from_row).collect()
  }

  /// Every write is committed as it happens.
  async fn checkpoint(&self) -> Result<()> {
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn severity_text_sorts_like_severity() {
    let mut all = [
      IncidentSeverity::P3,
      IncidentSeverity::P1,
      IncidentSeverity::P4,
      IncidentSeverity::P2,
    ];
    all.sort();
    let mut texts: Vec<&str> = all.iter().map(|s| severity_text(*s)).collect();
    let sorted_by_enum = texts.clone();
    texts.sort();
    assert_eq!(texts, sorted_by_enum);
    for s in all {
      assert_eq!(IncidentSeverity::from_str_loose(severity_text(s)), Some(s));
    }
  }

  #[test]
  fn status_text_matches_the_serialized_status() {
    for s in [
      WindowStatus::Open,
      WindowStatus::ClosedHealthy,
      WindowStatus::ClosedRolledBack,
      WindowStatus::Cancelled,
    ] {
      let json = serde_json::to_string(&s).unwrap();
      assert_eq!(json.trim_matches('"'), status_text(s));
    }
  }
}
