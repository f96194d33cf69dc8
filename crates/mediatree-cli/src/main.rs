mod cmd_query;
mod cmd_tree;
mod ids;

use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand, ValueEnum};
use mediatree::v1::{MediaTypeTreeProjection, Permission, User};
use mediatree_jsonl::JsonlEventStore;
use serde::Serialize;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "mtree")]
#[command(about = "Create, branch, and merge versioned media-type trees")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Directory holding the event log
    #[arg(long, global = true, env = "MEDIATREE_STORE", default_value = ".mediatree")]
    store: PathBuf,

    /// Id of the acting user
    #[arg(long, global = true, env = "MEDIATREE_USER", default_value_t = 1)]
    user: u64,

    /// Permissions of the acting user (repeatable or comma separated)
    #[arg(
        long = "permission",
        global = true,
        env = "MEDIATREE_PERMISSIONS",
        value_enum,
        value_delimiter = ','
    )]
    permissions: Vec<PermissionArg>,

    /// Pretty-print JSON output
    #[arg(long, global = true)]
    pretty: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(flatten)]
    Tree(cmd_tree::TreeOp),
    #[command(flatten)]
    Query(cmd_query::QueryOp),
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum PermissionArg {
    /// May create new trees
    Create,
    /// May modify any tree, merge into the main tree and pick the main tree
    Admin,
}

impl From<PermissionArg> for Permission {
    fn from(arg: PermissionArg) -> Self {
        match arg {
            PermissionArg::Create => Permission::MediaTypeTreesCreate,
            PermissionArg::Admin => Permission::MediaTypeTreesAdmin,
        }
    }
}

/// Settings shared by every subcommand.
pub struct Context {
    pub store: PathBuf,
    pub user: User,
    pub pretty: bool,
}

impl Context {
    pub fn open_store(&self) -> Result<JsonlEventStore> {
        JsonlEventStore::open(&self.store)
            .with_context(|| format!("failed to open store at {}", self.store.display()))
    }

    pub fn projection(&self) -> Result<MediaTypeTreeProjection> {
        let store = self.open_store()?;
        MediaTypeTreeProjection::from_store(&store).context("failed to read event log")
    }
}

pub fn print_json<T: Serialize + ?Sized>(value: &T, pretty: bool) -> Result<()> {
    let json = if pretty {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    };
    println!("{}", json);
    Ok(())
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mediatree=info,mtree=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let ctx = Context {
        store: cli.store,
        user: User {
            id: cli.user,
            permissions: cli.permissions.into_iter().map(Permission::from).collect(),
        },
        pretty: cli.pretty,
    };

    match cli.command {
        Commands::Tree(op) => cmd_tree::run(op, &ctx),
        Commands::Query(op) => cmd_query::run(op, &ctx),
    }
}
