//! Auth Service Administration CLI
//!
//! Operator commands against the PostgreSQL store: provision accounts, label
//! them with a role, inspect a user's sessions, and revoke a session without
//! going through the HTTP API.

use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use dotenv::dotenv;

use auth_service::{
    config::AppConfig,
    database::run_migrations,
    models::{ClientMeta, SessionResponse},
    service::{AuthService, LogEmailSender},
    store::{PgStore, UserStore},
    utils::validation::normalize_email,
};

/// Auth service administration CLI
#[derive(Parser)]
#[command(name = "auth-admin", about = "Auth service administration CLI", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a user with a password
    CreateUser(CreateUserArgs),
    /// Set or clear a user's role, creating the role if needed
    SetRole(SetRoleArgs),
    /// List a user's sessions, newest first
    Sessions(SessionsArgs),
    /// Revoke one of a user's sessions
    Revoke(RevokeArgs),
}

#[derive(Args)]
struct CreateUserArgs {
    /// Account email
    #[arg(short, long)]
    email: String,

    /// Initial password (8-128 characters)
    #[arg(short, long)]
    password: String,
}

#[derive(Args)]
struct SetRoleArgs {
    /// Account email
    #[arg(short, long)]
    email: String,

    /// Role name; omit to clear the user's role
    #[arg(short, long)]
    role: Option<String>,
}

#[derive(Args)]
struct SessionsArgs {
    /// Account email
    #[arg(short, long)]
    email: String,

    /// Hide revoked sessions
    #[arg(long)]
    active_only: bool,
}

#[derive(Args)]
struct RevokeArgs {
    /// Account email
    #[arg(short, long)]
    email: String,

    /// Session to revoke
    #[arg(short, long)]
    session_id: i64,
}

struct Admin {
    store: Arc<PgStore>,
    auth: AuthService,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    env_logger::init();

    let cli = Cli::parse();

    let config = AppConfig::from_env().context("loading configuration")?;
    let pool = config
        .database
        .create_pool()
        .await
        .context("connecting to PostgreSQL")?;

    // Run migrations to ensure database is up to date
    run_migrations(&pool).await.context("running migrations")?;

    let store = Arc::new(PgStore::new(pool));
    let admin = Admin {
        auth: AuthService::new(store.clone(), config.auth, Arc::new(LogEmailSender)),
        store,
    };

    match cli.command {
        Commands::CreateUser(args) => create_user(&admin, args).await,
        Commands::SetRole(args) => set_role(&admin, args).await,
        Commands::Sessions(args) => list_sessions(&admin, args).await,
        Commands::Revoke(args) => revoke_session(&admin, args).await,
    }
}

async fn create_user(admin: &Admin, args: CreateUserArgs) -> anyhow::Result<()> {
    let user = admin.auth.register(&args.email, &args.password).await?;

    println!("Created user {} ({})", user.id, user.email);
    println!("Email verified: {}", user.is_email_verified);
    Ok(())
}

async fn set_role(admin: &Admin, args: SetRoleArgs) -> anyhow::Result<()> {
    let user_id = lookup_user_id(admin, &args.email).await?;

    let Some(name) = args.role else {
        admin.store.assign_role(user_id, None).await?;
        println!("Cleared role of user {}", user_id);
        return Ok(());
    };

    let role = match admin.store.find_role_by_name(&name).await? {
        Some(role) => role,
        None => {
            let role = admin.store.create_role(&name).await?;
            println!("Created role {} ({})", role.id, role.name);
            role
        }
    };
    admin.store.assign_role(user_id, Some(role.id)).await?;

    println!("User {} now has role {}", user_id, role.name);
    Ok(())
}

async fn list_sessions(admin: &Admin, args: SessionsArgs) -> anyhow::Result<()> {
    let user_id = lookup_user_id(admin, &args.email).await?;

    let sessions: Vec<SessionResponse> = admin
        .auth
        .list_sessions(user_id)
        .await?
        .into_iter()
        .filter(|s| !args.active_only || s.is_active())
        .map(SessionResponse::from)
        .collect();

    if sessions.is_empty() {
        println!("No sessions found.");
        return Ok(());
    }

    println!(
        "{:<10} {:<8} {:<18} {:<40} {:<20}",
        "ID", "State", "IP", "User Agent", "Created"
    );
    println!("{}", "-".repeat(98));

    for session in sessions {
        println!(
            "{:<10} {:<8} {:<18} {:<40} {:<20}",
            session.id,
            format!("{:?}", session.state).to_lowercase(),
            session.ip,
            truncate_string(&session.user_agent, 39),
            session.created_at.format("%Y-%m-%d %H:%M")
        );
    }

    Ok(())
}

async fn revoke_session(admin: &Admin, args: RevokeArgs) -> anyhow::Result<()> {
    let user_id = lookup_user_id(admin, &args.email).await?;
    let meta = ClientMeta::new("0.0.0.0", "auth-admin");

    admin
        .auth
        .revoke_session(user_id, args.session_id, &meta)
        .await?;

    println!("Revoked session {} of user {}", args.session_id, user_id);
    Ok(())
}

async fn lookup_user_id(admin: &Admin, email: &str) -> anyhow::Result<i64> {
    match admin.store.find_user_by_email(&normalize_email(email)).await? {
        Some(user) => Ok(user.id),
        None => bail!("no user with email {}", email),
    }
}

fn truncate_string(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", truncated)
    }
}
