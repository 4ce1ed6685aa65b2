// Copyright 2026 Pardosa Contributors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use sqlx::PgPool;

/// The relational schema, applied idempotently at session open. Migration
/// tooling proper lives outside the core; this is just enough DDL to stand
/// on a blank database.
const STATEMENTS: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS crawl_sessions (
        session_id   UUID PRIMARY KEY,
        name         TEXT NOT NULL,
        seed_urls    TEXT[] NOT NULL,
        max_depth    INT NOT NULL,
        max_pages    BIGINT NOT NULL,
        worker_count INT NOT NULL,
        rate_limit_delay_ms BIGINT NOT NULL,
        user_agent   TEXT NOT NULL,
        state        TEXT NOT NULL CHECK(state IN ('RUNNING','COMPLETED','FAILED','CANCELLED')),
        started_at   TIMESTAMPTZ NOT NULL,
        finished_at  TIMESTAMPTZ NULL,
        summary      JSONB NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS url_queue (
        session_id    UUID NOT NULL,
        url           TEXT NOT NULL,
        parent_url    TEXT NULL,
        depth         INT NOT NULL CHECK(depth >= 0),
        priority      INT NOT NULL DEFAULT 0,
        status        TEXT NOT NULL
            CHECK(status IN ('PENDING','IN_FLIGHT','DONE','FAILED','SKIPPED')),
        attempts      INT NOT NULL DEFAULT 0,
        last_error    TEXT NULL,
        discovered_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        leased_until  TIMESTAMPTZ NULL,
        not_before    TIMESTAMPTZ NULL,
        PRIMARY KEY(session_id, url)
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS url_queue_lease_order
        ON url_queue (session_id, status, priority DESC, depth, discovered_at)
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS url_queue_leased_until
        ON url_queue (session_id, status, leased_until)
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS pages (
        session_id    UUID NOT NULL,
        url           TEXT NOT NULL,
        final_url     TEXT NULL,
        http_status   INT NOT NULL,
        content_type  TEXT NULL,
        title         TEXT NULL,
        text_length   BIGINT NOT NULL,
        word_count    BIGINT NOT NULL,
        unique_words  BIGINT NOT NULL,
        body_size     BIGINT NOT NULL,
        fetch_ms      BIGINT NULL,
        first_byte_ms BIGINT NULL,
        parse_ms      BIGINT NULL,
        extract_ms    BIGINT NULL,
        analyze_ms    BIGINT NULL,
        crawled_at    TIMESTAMPTZ NOT NULL,
        PRIMARY KEY(session_id, url)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS word_frequencies (
        session_id UUID NOT NULL,
        url        TEXT NOT NULL,
        word       TEXT NOT NULL,
        count      BIGINT NOT NULL CHECK(count >= 1),
        PRIMARY KEY(session_id, url, word)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS links (
        session_id UUID NOT NULL,
        source_url TEXT NOT NULL,
        dest_url   TEXT NOT NULL,
        kind       TEXT NOT NULL CHECK(kind IN ('INTERNAL','EXTERNAL')),
        PRIMARY KEY(session_id, source_url, dest_url)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS session_metrics (
        session_id      UUID NOT NULL,
        recorded_at     TIMESTAMPTZ NOT NULL,
        pages_crawled   BIGINT NOT NULL,
        bytes_processed BIGINT NOT NULL,
        errors          BIGINT NOT NULL,
        pages_per_sec   DOUBLE PRECISION NOT NULL,
        bytes_per_sec   DOUBLE PRECISION NOT NULL,
        in_flight       BIGINT NOT NULL,
        queue_length    BIGINT NOT NULL
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS session_metrics_time
        ON session_metrics (session_id, recorded_at)
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS error_events (
        session_id  UUID NOT NULL,
        url         TEXT NOT NULL,
        kind        TEXT NOT NULL,
        message     TEXT NOT NULL,
        occurred_at TIMESTAMPTZ NOT NULL
    )
    "#,
];

pub async fn apply(pool: &PgPool) -> Result<(), sqlx::Error> {
    for statement in STATEMENTS {
        sqlx::query(statement).execute(pool).await?;
    }
    Ok(())
}
