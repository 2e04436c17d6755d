use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;
use crate::universe::Universe;

/// Create the corpus schema and seed the reference tables from the
/// configured universe. Safe to run repeatedly.
pub async fn run_migrations(config: &Config) -> Result<usize> {
    let pool = db::connect(config).await?;
    create_schema(&pool).await?;
    let seeded = seed_universe(&pool, &config.universe()).await?;
    pool.close().await;
    Ok(seeded)
}

pub async fn create_schema(pool: &SqlitePool) -> Result<()> {
    // Reference companies
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS ref_company (
            company_id INTEGER PRIMARY KEY,
            legal_name TEXT NOT NULL,
            ticker TEXT NOT NULL UNIQUE
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS ref_company_alias (
            company_id INTEGER NOT NULL,
            alias TEXT NOT NULL,
            UNIQUE(company_id, alias),
            FOREIGN KEY (company_id) REFERENCES ref_company(company_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Documents (written by ingestion)
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS document (
            document_id INTEGER PRIMARY KEY,
            title TEXT,
            published_at TEXT,
            file_uri TEXT,
            mime_type TEXT,
            meta TEXT NOT NULL DEFAULT '{}'
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS document_company (
            document_id INTEGER NOT NULL,
            company_id INTEGER NOT NULL,
            PRIMARY KEY (document_id, company_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chunk (
            chunk_id INTEGER PRIMARY KEY,
            document_id INTEGER NOT NULL,
            text TEXT NOT NULL,
            section TEXT,
            chunk_index INTEGER NOT NULL,
            page_start INTEGER,
            page_end INTEGER,
            meta TEXT,
            UNIQUE(document_id, chunk_index),
            FOREIGN KEY (document_id) REFERENCES document(document_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Precomputed mention counts for the fast ranking path
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS company_term_count (
            document_id INTEGER NOT NULL,
            company_id INTEGER NOT NULL,
            name_hits INTEGER NOT NULL DEFAULT 0,
            ticker_hits INTEGER NOT NULL DEFAULT 0,
            alias_hits INTEGER NOT NULL DEFAULT 0,
            total_hits INTEGER NOT NULL DEFAULT 0,
            PRIMARY KEY (document_id, company_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create indexes
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunk_document_id ON chunk(document_id)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_term_count_company ON company_term_count(company_id, total_hits DESC)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_document_published_at ON document(published_at DESC)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Insert any universe companies and aliases not already present.
/// Returns the number of companies inserted.
pub async fn seed_universe(pool: &SqlitePool, universe: &Universe) -> Result<usize> {
    let mut inserted = 0;
    for entry in universe.entries() {
        let result =
            sqlx::query("INSERT OR IGNORE INTO ref_company (legal_name, ticker) VALUES (?, ?)")
                .bind(&entry.legal_name)
                .bind(&entry.ticker)
                .execute(pool)
                .await?;
        inserted += result.rows_affected() as usize;

        let company_id: i64 =
            sqlx::query_scalar("SELECT company_id FROM ref_company WHERE ticker = ?")
                .bind(&entry.ticker)
                .fetch_one(pool)
                .await?;

        for alias in &entry.aliases {
            sqlx::query("INSERT OR IGNORE INTO ref_company_alias (company_id, alias) VALUES (?, ?)")
                .bind(company_id)
                .bind(alias)
                .execute(pool)
                .await?;
        }
    }
    Ok(inserted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn migrations_are_idempotent() {
        let dir = TempDir::new().unwrap();
        let pool = db::connect_path(&dir.path().join("corpus.sqlite"))
            .await
            .unwrap();
        let universe = Universe::builtin();

        create_schema(&pool).await.unwrap();
        assert_eq!(seed_universe(&pool, &universe).await.unwrap(), 22);

        create_schema(&pool).await.unwrap();
        assert_eq!(seed_universe(&pool, &universe).await.unwrap(), 0);

        let aliases: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM ref_company_alias a JOIN ref_company c ON c.company_id = a.company_id WHERE c.ticker = 'JBH'",
        )
        .fetch_one(&pool)
        .await
        .unwrap();
        assert_eq!(aliases, 6);
    }
}
