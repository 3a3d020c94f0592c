//! One-shot schema bootstrap. Runs before either stage starts; a
//! failure here must prevent the stages from ever running.

use super::Error;
use sqlx::Executor;
use std::collections::HashSet;
use std::path::Path;

/// Apply every unapplied `*.sql` file under `dir`, ascending by
/// filename. Each file's SQL and its `migrations` record commit in a
/// single transaction, so a replayed run applies each file exactly once.
pub async fn run(pool: &sqlx::PgPool, dir: impl AsRef<Path>) -> Result<(), Error> {
    ensure_migrations_table(pool).await?;

    let applied = applied_filenames(pool).await?;
    let available = list_migration_files(dir.as_ref())?;

    for (filename, sql) in pending(available, &applied) {
        tracing::info!(%filename, "applying migration");
        apply_one(pool, &filename, &sql).await?;
    }
    Ok(())
}

async fn ensure_migrations_table(pool: &sqlx::PgPool) -> Result<(), Error> {
    pool.execute(
        r#"
        CREATE TABLE IF NOT EXISTS migrations (
            id SERIAL PRIMARY KEY,
            migration_filename VARCHAR UNIQUE,
            applied_at TIMESTAMPTZ DEFAULT NOW()
        )
        "#,
    )
    .await?;
    Ok(())
}

async fn applied_filenames(pool: &sqlx::PgPool) -> Result<HashSet<String>, Error> {
    use sqlx::Row;

    let rows = sqlx::query("SELECT migration_filename FROM migrations")
        .fetch_all(pool)
        .await?;

    Ok(rows.into_iter().map(|row| row.get(0)).collect())
}

async fn apply_one(pool: &sqlx::PgPool, filename: &str, sql: &str) -> Result<(), Error> {
    let migration = |source| Error::Migration {
        filename: filename.to_string(),
        source,
    };

    let mut txn = pool.begin().await.map_err(migration)?;
    txn.execute(sql).await.map_err(migration)?;
    sqlx::query("INSERT INTO migrations (migration_filename) VALUES ($1)")
        .bind(filename)
        .execute(&mut txn)
        .await
        .map_err(migration)?;
    txn.commit().await.map_err(migration)?;

    tracing::info!(%filename, "migration applied");
    Ok(())
}

/// List `(filename, sql)` for every `*.sql` file under `dir`, sorted
/// ascending by filename.
fn list_migration_files(dir: &Path) -> Result<Vec<(String, String)>, Error> {
    let dir_error = |source| Error::MigrationsDir {
        path: dir.display().to_string(),
        source,
    };

    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(dir_error)? {
        let entry = entry.map_err(dir_error)?;
        let path = entry.path();

        let Some(filename) = path.file_name().and_then(|name| name.to_str()) else {
            continue;
        };
        if !path.is_file() || !filename.ends_with(".sql") {
            continue;
        }
        let sql = std::fs::read_to_string(&path).map_err(dir_error)?;
        files.push((filename.to_string(), sql));
    }
    files.sort();
    Ok(files)
}

fn pending(
    available: Vec<(String, String)>,
    applied: &HashSet<String>,
) -> Vec<(String, String)> {
    available
        .into_iter()
        .filter(|(filename, _)| !applied.contains(filename))
        .collect()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn migration_files_sort_ascending_and_skip_non_sql() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("0002_second.sql"), "SELECT 2;").unwrap();
        std::fs::write(dir.path().join("0001_first.sql"), "SELECT 1;").unwrap();
        std::fs::write(dir.path().join("README.md"), "not sql").unwrap();

        let files = list_migration_files(dir.path()).unwrap();
        let names: Vec<&str> = files.iter().map(|(name, _)| name.as_str()).collect();
        assert_eq!(names, vec!["0001_first.sql", "0002_second.sql"]);
        assert_eq!(files[0].1, "SELECT 1;");
    }

    #[test]
    fn applied_migrations_are_not_replayed() {
        let available = vec![
            ("0001_first.sql".to_string(), "SELECT 1;".to_string()),
            ("0002_second.sql".to_string(), "SELECT 2;".to_string()),
        ];
        let applied: HashSet<String> = ["0001_first.sql".to_string()].into_iter().collect();

        let todo = pending(available, &applied);
        assert_eq!(todo.len(), 1);
        assert_eq!(todo[0].0, "0002_second.sql");
    }

    #[test]
    fn fully_applied_run_is_a_noop() {
        let available = vec![("0001_first.sql".to_string(), "SELECT 1;".to_string())];
        let applied: HashSet<String> = ["0001_first.sql".to_string()].into_iter().collect();
        assert!(pending(available, &applied).is_empty());
    }

    #[test]
    fn missing_directory_is_an_error() {
        assert!(list_migration_files(Path::new("/nonexistent/migrations")).is_err());
    }
}
