/// flowdeck: maintenance CLI for board state stored on disk.

mod config;
mod logging;

use std::io::{self, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use flowdeck_core::filters::{self, FilterCriteria, FilterPresetStore};
use flowdeck_core::metrics;
use flowdeck_core::users::{Cancellation, IdentityError, LocalUserProvider, UserProvider};
use flowdeck_core::{Board, BoardSession, BoardStore, FileStateStorage, GlobalAdmin, SettingsStore, StateStorage};
use flowdeck_core::{StorageError, StoreError};

#[derive(Parser, Debug)]
#[command(
    name = "flowdeck",
    version,
    about = "Maintenance tool for Kanban board state stored on disk",
    arg_required_else_help = true
)]
struct Cli {
    /// Config file (default: ~/.config/flowdeck/flowdeck.json).
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Board data directory, overriding the config file.
    #[arg(long, global = true, value_name = "PATH")]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug, PartialEq)]
enum Commands {
    /// List stored boards.
    #[command(alias = "ls")]
    List,

    /// Print a board's columns and tasks.
    Show(ShowArgs),

    /// Print the board opened most recently.
    Last,

    /// Write the stored board document.
    Export {
        board_id: String,
        /// Write to a file instead of stdout.
        #[arg(long, value_name = "PATH")]
        out: Option<PathBuf>,
    },

    /// Delete a board.
    Delete { board_id: String },

    /// Retitle a board.
    Rename { board_id: String, title: String },

    /// Copy a board under a new id.
    Duplicate { board_id: String },

    /// Card counts per column, WIP totals and per-lane counts.
    Metrics {
        board_id: String,
        /// Include the per-lane breakdown.
        #[arg(long)]
        lanes: bool,
    },

    /// Sanitize, renumber and rewrite boards; removes temp files left by
    /// interrupted saves.
    Repair { board_id: Option<String> },

    /// Show (and bootstrap) the global admin.
    Admin,

    /// List local users.
    Users,

    /// List saved filter presets.
    Presets {
        #[command(subcommand)]
        cmd: Option<PresetsCmd>,
    },
}

#[derive(Args, Debug, PartialEq)]
struct ShowArgs {
    board_id: String,
    /// Free-text filter over title, description, tags and assignee.
    #[arg(long)]
    query: Option<String>,
    /// Apply a saved filter preset.
    #[arg(long, value_name = "ID")]
    preset: Option<String>,
    /// Include the archive column.
    #[arg(long)]
    all: bool,
}

#[derive(Subcommand, Debug, PartialEq)]
enum PresetsCmd {
    /// Delete a filter preset.
    Remove { preset_id: String },
}

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("Board not found: {0}")]
    NotFound(String),

    #[error("Unknown filter preset: {0}")]
    UnknownPreset(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Identity(#[from] IdentityError),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

struct Context {
    config: config::FlowdeckConfig,
    storage: Arc<dyn StateStorage>,
    store: BoardStore,
    settings: SettingsStore,
}

fn cmd_list(ctx: &Context, out: &mut impl Write) -> Result<(), CliError> {
    let boards = ctx.store.list_boards();
    if boards.is_empty() {
        writeln!(out, "No boards in {}", ctx.config.data_dir().display())?;
    }
    for board in boards {
        let modified = board
            .last_modified
            .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "-".to_string());
        writeln!(out, "{}  {:<16}  {}", board.id, modified, board.title)?;
    }
    Ok(())
}

fn load(ctx: &Context, board_id: &str) -> Result<Board, CliError> {
    ctx.store
        .load_board(board_id)?
        .ok_or_else(|| CliError::NotFound(board_id.to_string()))
}

fn print_board(board: &Board, criteria: &FilterCriteria, out: &mut impl Write) -> Result<(), CliError> {
    writeln!(out, "{} ({})", board.title, board.id)?;
    for (column, tasks) in filters::filter_board(board, criteria, Utc::now()) {
        writeln!(out, "\n[{}] {}", column.title, column.wip_display())?;
        for task in tasks {
            let mut line = format!("  #{:<4} {}", task.work_item_number, task.title);
            if let Some(assignee) = &task.assignee {
                line.push_str(&format!("  @{}", assignee));
            }
            if task.is_blocked {
                line.push_str("  (blocked)");
            }
            writeln!(out, "{}", line)?;
        }
    }
    Ok(())
}

fn current_user_id(ctx: &Context) -> Result<String, CliError> {
    Ok(local_provider(ctx)?.current_user().id.clone())
}

fn cmd_show(ctx: &Context, args: ShowArgs, out: &mut impl Write) -> Result<(), CliError> {
    let board = load(ctx, &args.board_id)?;

    let mut criteria = match args.preset {
        Some(id) => FilterPresetStore::new(ctx.storage.clone())
            .touch(&id)?
            .ok_or(CliError::UnknownPreset(id))?,
        None => FilterCriteria::default(),
    };
    if args.query.is_some() {
        criteria.text_query = args.query;
    }
    if args.all {
        criteria.exclude_archive = false;
    }

    print_board(&board, &criteria, out)?;
    ctx.settings
        .record_last_board(Some(&current_user_id(ctx)?), &board.id)?;
    Ok(())
}

fn cmd_last(ctx: &Context, out: &mut impl Write) -> Result<(), CliError> {
    let user_id = current_user_id(ctx)?;
    match ctx.settings.load_last_board(&ctx.store, Some(&user_id))? {
        Some(board) => print_board(&board, &FilterCriteria::default(), out),
        None => {
            writeln!(out, "No recently opened board")?;
            Ok(())
        }
    }
}

fn cmd_export(ctx: &Context, board_id: &str, path: Option<PathBuf>, out: &mut impl Write) -> Result<(), CliError> {
    let content = ctx
        .store
        .export_board(board_id)?
        .ok_or_else(|| CliError::NotFound(board_id.to_string()))?;
    match path {
        Some(path) => std::fs::write(&path, content)?,
        None => writeln!(out, "{}", content)?,
    }
    Ok(())
}

fn cmd_delete(ctx: &Context, board_id: &str, out: &mut impl Write) -> Result<(), CliError> {
    if !ctx.store.delete_board(board_id)? {
        return Err(CliError::NotFound(board_id.to_string()));
    }
    ctx.settings.forget_board(Some(&current_user_id(ctx)?), board_id)?;
    writeln!(out, "Deleted {}", board_id)?;
    Ok(())
}

fn cmd_rename(ctx: &Context, board_id: &str, title: &str, out: &mut impl Write) -> Result<(), CliError> {
    if !ctx.store.rename_board(board_id, title)? {
        return Err(CliError::NotFound(board_id.to_string()));
    }
    writeln!(out, "Renamed {}", board_id)?;
    Ok(())
}

fn cmd_duplicate(ctx: &Context, board_id: &str, out: &mut impl Write) -> Result<(), CliError> {
    let id = ctx
        .store
        .duplicate_board(board_id)?
        .ok_or_else(|| CliError::NotFound(board_id.to_string()))?;
    writeln!(out, "{}", id)?;
    Ok(())
}

fn cmd_metrics(ctx: &Context, board_id: &str, lanes: bool, out: &mut impl Write) -> Result<(), CliError> {
    let board = load(ctx, board_id)?;
    let now = Utc::now();
    let summary = metrics::board_metrics(&board, now);

    writeln!(
        out,
        "Cards: {} active, {} archived, {} blocked, {} overdue, {} without lane",
        summary.active_cards,
        summary.archived_cards,
        summary.blocked_cards,
        summary.overdue_cards,
        summary.unassigned_cards
    )?;
    if summary.wip_limited_columns > 0 {
        writeln!(
            out,
            "WIP: {}/{} across {} limited columns, {} over limit",
            summary.wip_current, summary.wip_limit, summary.wip_limited_columns, summary.wip_exceeded_columns
        )?;
    }
    for column in &summary.columns {
        writeln!(out, "  {:<24} {}", column.title, column.count_display())?;
    }
    if lanes {
        writeln!(out, "\nLanes:")?;
        for lane in metrics::lane_metrics(&board, now) {
            writeln!(
                out,
                "  {:<24} {} active, {} blocked, {} overdue",
                lane.title, lane.active_count, lane.blocked_count, lane.overdue_count
            )?;
        }
    }
    Ok(())
}

fn cmd_repair(ctx: &Context, board_id: Option<String>, out: &mut impl Write) -> Result<(), CliError> {
    for temp in ctx.store.orphaned_temp_keys()? {
        ctx.storage.delete(&temp)?;
        writeln!(out, "Removed interrupted write {}", temp)?;
    }

    let ids = match board_id {
        Some(id) => vec![id],
        None => ctx.store.list_boards().into_iter().map(|b| b.id).collect(),
    };
    let session = BoardSession::new(Default::default(), &ctx.config.session_config());
    for id in ids {
        if !session.load(&ctx.store, &id)? {
            writeln!(out, "Skipped {} (missing or invalid)", id)?;
            continue;
        }
        session.save(&ctx.store)?;
        writeln!(out, "Repaired {}", id)?;
    }
    Ok(())
}

fn local_provider(ctx: &Context) -> Result<LocalUserProvider, CliError> {
    Ok(LocalUserProvider::new(
        ctx.storage.clone(),
        ctx.config.include_demo_users,
    )?)
}

async fn cmd_admin(ctx: &Context, out: &mut impl Write) -> Result<(), CliError> {
    let provider = local_provider(ctx)?;
    let admin = GlobalAdmin::new(ctx.storage.clone());
    let cancel = Cancellation::new();
    let is_admin = admin
        .is_current_user_global_admin(Some(&provider), &cancel)
        .await;
    match admin.global_admin_id() {
        Some(id) => writeln!(out, "Global admin: {}", id)?,
        None => writeln!(out, "No global admin assigned")?,
    }
    writeln!(
        out,
        "Current user {} is{} the global admin",
        provider.current_user().id,
        if is_admin { "" } else { " not" }
    )?;
    Ok(())
}

async fn cmd_users(ctx: &Context, out: &mut impl Write) -> Result<(), CliError> {
    let provider = local_provider(ctx)?;
    let users = provider.get_all_users().await?;
    for user in users {
        let marker = if user.id == provider.current_user().id { "*" } else { " " };
        writeln!(out, "{} {}  {}", marker, user.id, user.display_name)?;
    }
    Ok(())
}

fn cmd_presets(ctx: &Context, out: &mut impl Write) -> Result<(), CliError> {
    let presets = FilterPresetStore::new(ctx.storage.clone()).load().presets;
    if presets.is_empty() {
        writeln!(out, "No filter presets")?;
    }
    for preset in presets {
        writeln!(
            out,
            "{}  {}  (last used {})",
            preset.id,
            preset.name,
            preset.last_used_at.format("%Y-%m-%d")
        )?;
    }
    Ok(())
}

fn cmd_remove_preset(ctx: &Context, preset_id: &str, out: &mut impl Write) -> Result<(), CliError> {
    if FilterPresetStore::new(ctx.storage.clone()).remove(preset_id)? {
        writeln!(out, "Removed preset {}", preset_id)?;
    } else {
        writeln!(out, "No preset {}", preset_id)?;
    }
    Ok(())
}

fn open(config: config::FlowdeckConfig) -> Context {
    let storage: Arc<dyn StateStorage> = Arc::new(FileStateStorage::new(config.data_dir()));
    Context {
        store: BoardStore::new(storage.clone()),
        settings: SettingsStore::new(storage.clone()),
        storage,
        config,
    }
}

async fn run(ctx: &Context, command: Commands, out: &mut impl Write) -> Result<(), CliError> {
    match command {
        Commands::List => cmd_list(ctx, out),
        Commands::Show(args) => cmd_show(ctx, args, out),
        Commands::Last => cmd_last(ctx, out),
        Commands::Export { board_id, out: path } => cmd_export(ctx, &board_id, path, out),
        Commands::Delete { board_id } => cmd_delete(ctx, &board_id, out),
        Commands::Rename { board_id, title } => cmd_rename(ctx, &board_id, &title, out),
        Commands::Duplicate { board_id } => cmd_duplicate(ctx, &board_id, out),
        Commands::Metrics { board_id, lanes } => cmd_metrics(ctx, &board_id, lanes, out),
        Commands::Repair { board_id } => cmd_repair(ctx, board_id, out),
        Commands::Admin => cmd_admin(ctx, out).await,
        Commands::Users => cmd_users(ctx, out).await,
        Commands::Presets { cmd: None } => cmd_presets(ctx, out),
        Commands::Presets {
            cmd: Some(PresetsCmd::Remove { preset_id }),
        } => cmd_remove_preset(ctx, &preset_id, out),
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config_path = cli.config.unwrap_or_else(config::default_config_path);
    if let Err(e) = logging::init(&config::peek_log_level(&config_path)) {
        eprintln!("Failed to initialize logging: {}", e);
    }
    let mut config = config::load_config(&config_path);
    if let Some(dir) = cli.data_dir {
        config.data_dir = Some(dir);
    }
    log::debug!("[flowdeck.cli] Using data dir {}", config.data_dir().display());
    let ctx = open(config);

    let stdout = io::stdout();
    let mut out = stdout.lock();
    match run(&ctx, cli.command, &mut out).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("[flowdeck.cli] {}", e);
            eprintln!("{}", e);
            ExitCode::FAILURE
        }
    }
}
