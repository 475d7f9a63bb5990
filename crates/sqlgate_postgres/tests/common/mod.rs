//! Isolated test database helpers.
//!
//! Each test creates a throwaway database via CREATE DATABASE, applies the
//! sqlgate migrations, creates a uniquely named NOLOGIN role for statement
//! execution, and drops both on cleanup.

use std::str::FromStr;
use std::time::Duration;

use sqlx::{
    postgres::{PgConnectOptions, PgPoolOptions},
    PgPool,
};

pub struct IsolatedDb {
    /// Pool on the isolated database, with the role-reset release hook.
    pub pool: PgPool,
    pub dbname: String,
    /// NOLOGIN role the test principals execute as.
    pub reader_role: String,
    admin: PgPool,
}

pub fn admin_url() -> String {
    std::env::var("DATABASE_URL").expect("DATABASE_URL must be set for integration tests")
}

/// Create the database and role, migrate, and seed an `orders` table the
/// reader role may select `id` and `total` from.
pub async fn isolated_db(max_connections: u32) -> IsolatedDb {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    let dbname = format!("sqlgate_test_{suffix}");
    let reader_role = format!("sqlgate_reader_{suffix}");
    let admin_url = admin_url();

    let admin = PgPoolOptions::new()
        .max_connections(1)
        .connect_with(PgConnectOptions::from_str(&admin_url).expect("admin_url parse failed"))
        .await
        .expect("admin connect failed");

    sqlx::query(&format!(r#"CREATE DATABASE "{dbname}""#))
        .execute(&admin)
        .await
        .expect("CREATE DATABASE failed");
    sqlx::query(&format!(r#"CREATE ROLE "{reader_role}" NOLOGIN"#))
        .execute(&admin)
        .await
        .expect("CREATE ROLE failed");
    sqlx::query(&format!(r#"GRANT "{reader_role}" TO CURRENT_USER"#))
        .execute(&admin)
        .await
        .expect("GRANT role failed");

    let test_opts = PgConnectOptions::from_str(&admin_url)
        .expect("admin_url parse failed")
        .database(&dbname);
    let pool = sqlgate_postgres::pool::pool_options(max_connections)
        .connect_with(test_opts)
        .await
        .expect("test db connect failed");

    sqlgate_postgres::run_migrations(&pool)
        .await
        .expect("migrations failed");

    sqlx::raw_sql(&format!(
        r#"
        CREATE TABLE public.orders (id int PRIMARY KEY, total numeric NOT NULL, note text);
        INSERT INTO public.orders VALUES (1, 10.50, 'first'), (2, 99.00, NULL);
        CREATE TABLE public.payroll (id int PRIMARY KEY, salary numeric NOT NULL);
        GRANT USAGE ON SCHEMA public TO "{reader_role}";
        GRANT SELECT (id, total) ON public.orders TO "{reader_role}";
        "#
    ))
    .execute(&pool)
    .await
    .expect("seed failed");

    IsolatedDb {
        pool,
        dbname,
        reader_role,
        admin,
    }
}

/// Drop the isolated database and role. Call this in cleanup, even on failure.
pub async fn drop_db(iso: IsolatedDb) {
    iso.pool.close().await;

    let drop_sql = format!(r#"DROP DATABASE IF EXISTS "{}" WITH (FORCE)"#, iso.dbname);
    let _ = sqlx::query(&drop_sql).execute(&iso.admin).await;
    let drop_role = format!(r#"DROP ROLE IF EXISTS "{}""#, iso.reader_role);
    let _ = sqlx::query(&drop_role).execute(&iso.admin).await;

    iso.admin.close().await;
}

pub const STATEMENT_TIMEOUT: Duration = Duration::from_secs(5);
