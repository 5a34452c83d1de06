use std::collections::HashSet;

use anyhow::Context;
use clap::{Parser, Subcommand};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use docvault::authz::{Action, AuthorizationEngine, Target};
use docvault::config::Config;
use docvault::db;
use docvault::events::verify_chain;
use docvault::models::permission::{Capability, ObjectKind};
use docvault::models::user::{NewUser, Role};
use docvault::users::{seed_roles, UserDirectory};

#[derive(Parser, Debug)]
#[command(author, version, about = "docvault administration tool", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Apply pending migrations
    Migrate,
    /// Show migration status against the current database
    MigrateStatus,
    /// Make sure the admin / editor / reader roles exist
    InitRoles,
    /// Create a user with the default reader profile
    CreateUser {
        email: String,
        name: String,
        #[arg(long)]
        superuser: bool,
    },
    /// Set (or clear, with "none") a user's role
    SetRole { email: String, role: String },
    /// Activate or deactivate a user's profile
    SetActive {
        email: String,
        #[arg(action = clap::ArgAction::Set)]
        active: bool,
    },
    /// Give a user the add_folder capability
    GrantCapability { email: String, capability: String },
    /// Print the authorization decision for user / action / object
    Check {
        email: String,
        action: String,
        /// "document" or "folder"
        object_type: String,
        /// Object id; omit when checking "create"
        object_id: Option<Uuid>,
    },
    /// Recompute the activity log hash chain
    VerifyLog,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    load_env();
    init_tracing();

    let cli = Cli::parse();
    let config = Config::from_env()?;
    let pool = db::init(&config).await?;

    match cli.command {
        Commands::Migrate => {
            // db::init already ran them
            println!("Migrations applied");
        }
        Commands::MigrateStatus => print_status(&pool).await?,
        Commands::InitRoles => {
            let inserted = seed_roles(&pool).await?;
            println!("Roles ready ({inserted} created)");
        }
        Commands::CreateUser { email, name, superuser } => {
            let users = UserDirectory::new(pool.clone());
            let user = users
                .create_user(NewUser {
                    email,
                    name,
                    is_superuser: superuser,
                })
                .await?;
            println!("Created user {} ({})", user.email, user.id);
        }
        Commands::SetRole { email, role } => {
            let users = UserDirectory::new(pool.clone());
            let user_id = user_id_for(&users, &email).await?;
            let role = match role.as_str() {
                "none" => None,
                other => Some(other.parse::<Role>()?),
            };
            let profile = users.set_role(user_id, role).await?;
            println!("{} role: {}", email, profile.role.map(|r| r.as_str()).unwrap_or("none"));
        }
        Commands::SetActive { email, active } => {
            let users = UserDirectory::new(pool.clone());
            let user_id = user_id_for(&users, &email).await?;
            users.set_active(user_id, active).await?;
            println!("{email} active: {active}");
        }
        Commands::GrantCapability { email, capability } => {
            let users = UserDirectory::new(pool.clone());
            let user_id = user_id_for(&users, &email).await?;
            let capability: Capability = capability.parse()?;
            users.grant_capability(user_id, capability).await?;
            println!("{email} granted {}", capability.as_str());
        }
        Commands::Check {
            email,
            action,
            object_type,
            object_id,
        } => {
            let users = UserDirectory::new(pool.clone());
            let user_id = user_id_for(&users, &email).await?;
            let action: Action = action.parse()?;
            let kind: ObjectKind = object_type.parse()?;
            let target = match (kind, object_id) {
                (ObjectKind::Document, Some(id)) => Target::Document(id),
                (ObjectKind::Folder, Some(id)) => Target::Folder(id),
                (ObjectKind::Document, None) => Target::NewDocument,
                (ObjectKind::Folder, None) => Target::NewFolder,
            };
            let engine = AuthorizationEngine::new(pool.clone());
            let decision = engine.decide(Some(user_id), action, target).await?;
            println!(
                "{} {} {}: {} (rule: {})",
                email,
                action,
                target,
                if decision.allowed { "allow" } else { "deny" },
                decision.rule
            );
        }
        Commands::VerifyLog => match verify_chain(&pool).await? {
            None => println!("Activity log intact"),
            Some(id) => anyhow::bail!("activity log chain broken at entry {id}"),
        },
    }

    Ok(())
}

async fn user_id_for(users: &UserDirectory, email: &str) -> anyhow::Result<Uuid> {
    let user = users
        .find_by_email(email)
        .await?
        .with_context(|| format!("no user with email {email}"))?;
    Ok(user.id)
}

async fn print_status(pool: &SqlitePool) -> anyhow::Result<()> {
    let migrator = sqlx::migrate!();

    let rows = sqlx::query("SELECT version FROM _sqlx_migrations WHERE success = 1")
        .fetch_all(pool)
        .await
        .context("failed to read migration table")?;
    let applied: HashSet<i64> = rows.iter().filter_map(|row| row.try_get::<i64, _>("version").ok()).collect();

    println!("{:<8} {:<20} Name", "Status", "Version");
    for migration in migrator.iter() {
        let status = if applied.contains(&migration.version) { "applied" } else { "pending" };
        let desc = migration.description.trim();
        let name = if desc.is_empty() { "unknown" } else { desc };
        println!("{:<8} {:<20} {}", status, migration.version, name);
    }

    Ok(())
}

fn load_env() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    let crate_env = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join(".env");
    let _ = dotenvy::from_path(crate_env);
}

fn init_tracing() {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_thread_ids(false)
        .with_thread_names(false);

    let filter_layer = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt_layer)
        .init();
}
