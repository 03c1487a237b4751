use std::env;

use anyhow::{bail, Context, Result};
use diesel::prelude::*;
use uuid::Uuid;

use audit_tracker::{
    auth::{password::hash_password, Role},
    config::AppConfig,
    db,
    models::NewUser,
    schema::{document_elements, users},
};

const USAGE: &str = "Usage:
  maintenance hash-password <password>
  maintenance create-user <username> <password> <admin|auditor|department> [department]
  maintenance purge-orphans";

fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let args: Vec<String> = env::args().skip(1).collect();
    let args: Vec<&str> = args.iter().map(String::as_str).collect();

    match args.as_slice() {
        ["hash-password", password] => println!("{}", hash_password(password)?),
        ["create-user", username, password, role, rest @ ..] => {
            create_user(username, password, role, rest.first().copied())?
        }
        ["purge-orphans"] => purge_orphans()?,
        [cmd, ..] => {
            eprintln!("Unknown command: {cmd}\n{USAGE}");
            std::process::exit(1);
        }
        [] => {
            eprintln!("{USAGE}");
            std::process::exit(1);
        }
    }

    Ok(())
}

fn connect() -> Result<db::PgPool> {
    let config = AppConfig::from_env()?;
    eprintln!("Using database {}", config.redacted_database_url());
    let pool = db::init_pool_with_size(&config.database_url, 1, None)?;
    db::run_migrations(&pool)?;
    Ok(pool)
}

fn create_user(username: &str, password: &str, role: &str, department: Option<&str>) -> Result<()> {
    let role: Role = role.parse()?;
    let department = department.map(str::trim).filter(|name| !name.is_empty());
    if role == Role::Department && department.is_none() {
        bail!("department users need a department name");
    }

    let pool = connect()?;
    let mut conn = pool.get().context("failed to get database connection")?;
    let user = NewUser {
        id: Uuid::new_v4(),
        username: username.trim().to_string(),
        password_hash: hash_password(password)?,
        role: role.as_str().to_string(),
        department: department.map(str::to_string),
    };
    diesel::insert_into(users::table)
        .values(&user)
        .execute(&mut conn)
        .context("failed to insert user")?;

    println!("Created {} user {} ({})", role, user.username, user.id);
    Ok(())
}

/// Removes placeholder elements that never got attached to a file. Their
/// remarks and replies go with them.
fn purge_orphans() -> Result<()> {
    let pool = connect()?;
    let mut conn = pool.get().context("failed to get database connection")?;
    let removed = diesel::delete(document_elements::table.filter(document_elements::file_id.is_null()))
        .execute(&mut conn)
        .context("failed to delete orphaned elements")?;
    println!("Removed {removed} orphaned elements.");
    Ok(())
}
