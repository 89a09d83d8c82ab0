use std::path::PathBuf;

use anyhow::{anyhow, Result};
use clap::{Args, Parser, Subcommand};
use serde_json::{json, Value};
use time::macros::format_description;
use time::Date;
use tracing_subscriber::EnvFilter;

use reclaim_api::ReclaimApi;
use reclaim_core::{
    Category, Claimant, FoundItemDraft, ItemKey, ItemKind, ItemStatus, LostItemDraft,
    LostItemPatch, MatchKey,
};
use reclaim_store_sqlite::{ListFilter, SortOrder, SqliteStore};

const CLI_CONTRACT_VERSION: &str = "cli.v1";

#[derive(Debug, Parser)]
#[command(name = "rcl")]
#[command(about = "Reclaim lost-and-found CLI")]
struct Cli {
    #[arg(long, default_value = "./reclaim.sqlite3")]
    db: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    Db {
        #[command(subcommand)]
        command: DbCommand,
    },
    Lost {
        #[command(subcommand)]
        command: LostCommand,
    },
    Found {
        #[command(subcommand)]
        command: FoundCommand,
    },
    Match {
        #[command(subcommand)]
        command: MatchCommand,
    },
    /// Claim one live item directly, without a match.
    Claim(ClaimItemArgs),
    Archive {
        #[command(subcommand)]
        command: ArchiveCommand,
    },
    /// Print the category list shared by every surface.
    Categories,
}

#[derive(Debug, Subcommand)]
enum DbCommand {
    Status,
    Migrate,
}

#[derive(Debug, Subcommand)]
enum LostCommand {
    Add(LostAddArgs),
    List(ListArgs),
    Edit(LostEditArgs),
    Remove(KeyArgs),
}

#[derive(Debug, Subcommand)]
enum FoundCommand {
    Add(FoundAddArgs),
    List(ListArgs),
    Remove(KeyArgs),
    CategoryCount(CategoryArgs),
}

#[derive(Debug, Subcommand)]
enum MatchCommand {
    /// Run one reconciliation pass over pending items.
    Run,
    List(ListArgs),
    Claim(MatchClaimArgs),
    Cancel(KeyArgs),
}

#[derive(Debug, Subcommand)]
enum ArchiveCommand {
    List(ListArgs),
}

#[derive(Debug, Args)]
struct LostAddArgs {
    #[arg(long)]
    name: String,
    #[arg(long)]
    description: String,
    #[arg(long)]
    category: String,
    #[arg(long)]
    location: String,
    /// Date the item was lost (YYYY-MM-DD); defaults to today.
    #[arg(long)]
    date: Option<String>,
    #[arg(long)]
    notify_email: Option<String>,
}

#[derive(Debug, Args)]
struct FoundAddArgs {
    #[arg(long)]
    name: String,
    #[arg(long)]
    description: String,
    #[arg(long)]
    category: String,
    #[arg(long)]
    location: String,
    /// Date the item was found (YYYY-MM-DD); defaults to today.
    #[arg(long)]
    date: Option<String>,
    #[arg(long)]
    department: Option<String>,
}

#[derive(Debug, Args)]
struct LostEditArgs {
    key: String,
    #[arg(long)]
    name: Option<String>,
    #[arg(long)]
    description: Option<String>,
    #[arg(long)]
    category: Option<String>,
    #[arg(long)]
    location: Option<String>,
    #[arg(long)]
    notify_email: Option<String>,
    #[arg(long, default_value_t = false)]
    clear_notify_email: bool,
}

#[derive(Debug, Args)]
struct ListArgs {
    #[arg(long)]
    category: Option<String>,
    #[arg(long)]
    status: Option<String>,
    /// Exact-day filter (YYYY-MM-DD).
    #[arg(long)]
    date: Option<String>,
    /// newest or oldest.
    #[arg(long)]
    order: Option<String>,
}

#[derive(Debug, Args)]
struct KeyArgs {
    key: String,
}

#[derive(Debug, Args)]
struct CategoryArgs {
    category: String,
}

#[derive(Debug, Args)]
struct MatchClaimArgs {
    key: String,
    #[arg(long)]
    claimed_by_id: String,
    #[arg(long)]
    claimed_by_name: String,
}

#[derive(Debug, Args)]
struct ClaimItemArgs {
    /// lost or found.
    kind: String,
    key: String,
    #[arg(long)]
    claimed_by_id: String,
    #[arg(long)]
    claimed_by_name: String,
}

fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();

    let cli = Cli::parse();
    run(cli)
}

fn run(cli: Cli) -> Result<()> {
    let api = ReclaimApi::new(cli.db.clone());
    match cli.command {
        Command::Db { command } => run_db(&cli.db, &command),
        Command::Lost { command } => run_lost(&api, command),
        Command::Found { command } => run_found(&api, command),
        Command::Match { command } => run_match(&api, command),
        Command::Claim(args) => {
            let kind = ItemKind::parse(&args.kind)
                .ok_or_else(|| anyhow!("unknown item kind: {} (expected lost or found)", args.kind))?;
            let key = parse_item_key(&args.key)?;
            let claimant = Claimant { id: args.claimed_by_id, name: args.claimed_by_name };
            let entry = api.claim_item(kind, key, &claimant)?;
            emit_json(serde_json::to_value(entry)?)
        }
        Command::Archive { command } => match command {
            ArchiveCommand::List(args) => {
                let entries = api.archive_entries(&parse_filter(&args)?)?;
                emit_json(serde_json::to_value(entries)?)
            }
        },
        Command::Categories => {
            let categories = Category::ALL
                .iter()
                .map(|category| json!({ "value": category.as_str(), "label": category.label() }))
                .collect::<Vec<_>>();
            emit_json(Value::Array(categories))
        }
    }
}

fn run_db(db_path: &std::path::Path, command: &DbCommand) -> Result<()> {
    let mut store = SqliteStore::open(db_path)?;
    match command {
        DbCommand::Status => {}
        DbCommand::Migrate => store.migrate()?,
    }
    let status = store.schema_status()?;
    emit_json(serde_json::to_value(status)?)
}

fn run_lost(api: &ReclaimApi, command: LostCommand) -> Result<()> {
    match command {
        LostCommand::Add(args) => {
            let draft = LostItemDraft {
                name: args.name,
                description: args.description,
                category: parse_category(&args.category)?,
                location: args.location,
                date_lost: args.date.as_deref().map(parse_date).transpose()?,
                notify_email: args.notify_email,
            };
            let item = api.submit_lost(&draft)?;
            let matches_created = api.reconcile()?;
            emit_json(json!({
                "item": serde_json::to_value(item)?,
                "matches_created": serde_json::to_value(matches_created)?,
            }))
        }
        LostCommand::List(args) => {
            let items = api.lost_items(&parse_filter(&args)?)?;
            emit_json(serde_json::to_value(items)?)
        }
        LostCommand::Edit(args) => {
            let key = parse_item_key(&args.key)?;
            let notify_email = if args.clear_notify_email {
                Some(None)
            } else {
                args.notify_email.map(Some)
            };
            let patch = LostItemPatch {
                name: args.name,
                description: args.description,
                category: args.category.as_deref().map(parse_category).transpose()?,
                location: args.location,
                notify_email,
            };
            let item = api.edit_lost(key, &patch)?;
            emit_json(serde_json::to_value(item)?)
        }
        LostCommand::Remove(args) => {
            let key = parse_item_key(&args.key)?;
            api.remove_item(ItemKind::Lost, key)?;
            emit_json(json!({ "removed": key.to_string() }))
        }
    }
}

fn run_found(api: &ReclaimApi, command: FoundCommand) -> Result<()> {
    match command {
        FoundCommand::Add(args) => {
            let draft = FoundItemDraft {
                name: args.name,
                description: args.description,
                category: parse_category(&args.category)?,
                location_found: args.location,
                date_found: args.date.as_deref().map(parse_date).transpose()?,
                department: args.department,
            };
            let item = api.submit_found(&draft)?;
            let matches_created = api.reconcile()?;
            emit_json(json!({
                "item": serde_json::to_value(item)?,
                "matches_created": serde_json::to_value(matches_created)?,
            }))
        }
        FoundCommand::List(args) => {
            let items = api.found_items(&parse_filter(&args)?)?;
            emit_json(serde_json::to_value(items)?)
        }
        FoundCommand::Remove(args) => {
            let key = parse_item_key(&args.key)?;
            api.remove_item(ItemKind::Found, key)?;
            emit_json(json!({ "removed": key.to_string() }))
        }
        FoundCommand::CategoryCount(args) => {
            let category = parse_category(&args.category)?;
            let count = api.count_found_in_category(category)?;
            emit_json(json!({ "category": category.as_str(), "count": count }))
        }
    }
}

fn run_match(api: &ReclaimApi, command: MatchCommand) -> Result<()> {
    match command {
        MatchCommand::Run => {
            let created = api.reconcile()?;
            emit_json(serde_json::to_value(created)?)
        }
        MatchCommand::List(args) => {
            let filter = parse_filter(&args)?;
            let records = api.matches(filter.date, filter.order)?;
            emit_json(serde_json::to_value(records)?)
        }
        MatchCommand::Claim(args) => {
            let key = parse_match_key(&args.key)?;
            let claimant = Claimant { id: args.claimed_by_id, name: args.claimed_by_name };
            let (lost, found) = api.claim_matched(key, &claimant)?;
            emit_json(json!({
                "lost": serde_json::to_value(lost)?,
                "found": serde_json::to_value(found)?,
            }))
        }
        MatchCommand::Cancel(args) => {
            let key = parse_match_key(&args.key)?;
            let cancelled = api.cancel_match(key)?;
            emit_json(serde_json::to_value(cancelled)?)
        }
    }
}

fn parse_category(value: &str) -> Result<Category> {
    Category::parse(value).ok_or_else(|| {
        let valid = Category::ALL.iter().map(|c| c.as_str()).collect::<Vec<_>>().join(", ");
        anyhow!("unknown category: {value} (expected one of: {valid})")
    })
}

fn parse_date(value: &str) -> Result<Date> {
    Date::parse(value, format_description!("[year]-[month]-[day]"))
        .map_err(|_| anyhow!("invalid date: {value} (expected YYYY-MM-DD)"))
}

fn parse_item_key(value: &str) -> Result<ItemKey> {
    ItemKey::parse(value).ok_or_else(|| anyhow!("invalid item key: {value}"))
}

fn parse_match_key(value: &str) -> Result<MatchKey> {
    MatchKey::parse(value).ok_or_else(|| anyhow!("invalid match key: {value}"))
}

fn parse_filter(args: &ListArgs) -> Result<ListFilter> {
    let mut filter = ListFilter::default();
    if let Some(category) = &args.category {
        filter.category = Some(parse_category(category)?);
    }
    if let Some(status) = &args.status {
        filter.status =
            Some(ItemStatus::parse(status).ok_or_else(|| anyhow!("unknown status: {status}"))?);
    }
    if let Some(date) = &args.date {
        filter.date = Some(parse_date(date)?);
    }
    if let Some(order) = &args.order {
        filter.order = SortOrder::parse(order)
            .ok_or_else(|| anyhow!("unknown order: {order} (expected newest or oldest)"))?;
    }
    Ok(filter)
}

fn emit_json(data: Value) -> Result<()> {
    let wrapped = json!({
        "cli_contract_version": CLI_CONTRACT_VERSION,
        "data": data,
    });
    println!("{}", serde_json::to_string_pretty(&wrapped)?);
    Ok(())
}
