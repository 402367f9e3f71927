use anyhow::Context;
use clap::{Parser, Subcommand};
use dotenvy::dotenv;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use uuid::Uuid;

use taskboard::utils::{hash_password, utc_now};

#[derive(Parser, Debug)]
#[command(author, version, about = "taskboard admin tool", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create an admin account (bootstrap the first one)
    CreateAdmin {
        name: String,
        email: String,
        password: String,
    },
    /// Promote an existing account to admin
    Promote { email: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Try to load env from CWD; when running in Docker the binary CWD may differ,
    // so fall back to the crate-local `.env` using CARGO_MANIFEST_DIR.
    if dotenv().is_err() {
        let crate_env = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join(".env");
        let _ = dotenvy::from_path(crate_env);
    }

    let cli = Cli::parse();

    match cli.command {
        Commands::CreateAdmin {
            name,
            email,
            password,
        } => {
            let pool = get_pool().await?;
            let id = create_admin(&pool, &name, &email, &password).await?;
            println!("Created admin {} ({})", email, id);
        }
        Commands::Promote { email } => {
            let pool = get_pool().await?;
            promote(&pool, &email).await?;
            println!("Promoted {} to admin", email);
        }
    }

    Ok(())
}

async fn get_pool() -> anyhow::Result<SqlitePool> {
    let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL not set")?;
    SqlitePoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .context("failed to connect to database")
}

async fn create_admin(
    pool: &SqlitePool,
    name: &str,
    email: &str,
    password: &str,
) -> anyhow::Result<Uuid> {
    let taken = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM users WHERE email = ? AND deleted_at IS NULL",
    )
    .bind(email)
    .fetch_one(pool)
    .await?;

    if taken > 0 {
        anyhow::bail!("a live account already uses {}", email);
    }

    let password_hash = hash_password(password)?;
    let id = Uuid::new_v4();
    let now = utc_now();

    sqlx::query(
        "INSERT INTO users (id, name, email, password_hash, role, is_active, created_at, updated_at) \
         VALUES (?, ?, ?, ?, 'admin', 1, ?, ?)",
    )
    .bind(id)
    .bind(name)
    .bind(email)
    .bind(&password_hash)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await?;

    Ok(id)
}

async fn promote(pool: &SqlitePool, email: &str) -> anyhow::Result<()> {
    let result = sqlx::query(
        "UPDATE users SET role = 'admin', updated_at = ? WHERE email = ? AND deleted_at IS NULL",
    )
    .bind(utc_now())
    .bind(email)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        anyhow::bail!("no live account uses {}", email);
    }

    Ok(())
}
