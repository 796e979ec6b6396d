mod app;
mod cache;
mod commands;
mod config;
mod documents;
mod event;
mod notify;
mod query;
mod service;
mod sync;

use chrono::Utc;
use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;
use tracing::debug;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use app::{App, AppContext};
use documents::cache::DocumentQueryKey;
use documents::{Document, DocumentPatch, NewDocument};
use notify::NotificationReceiver;
use service::DocumentService;

const PROGRESS_EVERY: Duration = Duration::from_secs(1);

#[derive(Parser, Debug)]
#[command(name = "petdocs")]
#[command(about = "Pet records documents with a synced local cache")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/petdocs/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Watch a document list, refreshing on focus, other sessions' writes and a timer
  Watch {
    #[command(flatten)]
    view: ViewArgs,
  },
  /// Print a document list once
  List {
    #[command(flatten)]
    view: ViewArgs,
  },
  /// Register an uploaded file as a document
  Upload {
    name: String,
    #[arg(long)]
    category: String,
    #[arg(long)]
    file_url: String,
    #[arg(long, default_value = "application/pdf")]
    file_type: String,
    #[arg(long)]
    pet: Option<String>,
  },
  /// Rename, recategorize or move a document to another pet
  Edit {
    id: String,
    #[arg(long)]
    name: Option<String>,
    #[arg(long)]
    category: Option<String>,
    #[arg(long, conflicts_with = "no_pet")]
    pet: Option<String>,
    /// Detach the document from its pet
    #[arg(long)]
    no_pet: bool,
  },
  /// Toggle the favorite flag
  Favorite { id: String },
  Archive { id: String },
  Restore { id: String },
  /// Permanently delete a document
  Delete { id: String },
}

#[derive(clap::Args, Debug, Default)]
struct ViewArgs {
  /// Only documents of this pet
  #[arg(long, conflicts_with_all = ["archived", "dashboard"])]
  pet: Option<String>,
  /// Archived documents
  #[arg(long, conflicts_with = "dashboard")]
  archived: bool,
  /// Most recent documents only
  #[arg(long)]
  dashboard: bool,
}

impl ViewArgs {
  fn key(&self) -> DocumentQueryKey {
    if let Some(pet) = &self.pet {
      DocumentQueryKey::pet(pet.as_str())
    } else if self.archived {
      DocumentQueryKey::Archived
    } else if self.dashboard {
      DocumentQueryKey::Dashboard
    } else {
      DocumentQueryKey::All
    }
  }
}

/// Log to a daily file; the watch view owns the terminal.
fn init_logging() -> Result<tracing_appender::non_blocking::WorkerGuard> {
  let log_dir = config::data_dir()?.join("logs");
  std::fs::create_dir_all(&log_dir)
    .map_err(|e| eyre!("Failed to create log directory {}: {}", log_dir.display(), e))?;

  let file_appender = tracing_appender::rolling::daily(log_dir, "petdocs.log");
  let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
  let fmt_layer = tracing_subscriber::fmt::layer()
    .with_writer(non_blocking)
    .with_ansi(false)
    .with_target(false);
  let _ = tracing_subscriber::registry()
    .with(filter)
    .with(fmt_layer)
    .try_init();

  Ok(guard)
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let _guard = init_logging()?;

  // Load configuration
  let config = config::Config::load(args.config.as_deref())?;
  let mut ctx = AppContext::new(config)?;

  let command = args.command.unwrap_or(Command::Watch {
    view: ViewArgs::default(),
  });

  match command {
    Command::Watch { view } => {
      let mut app = App::new(ctx, view.key())?;
      app.run().await?;
    }
    Command::List { view } => {
      let key = view.key();
      let docs = ctx.loader.load(&key).await?;
      println!("{} ({})", key.description(), docs.len());
      for line in app::render_documents(&docs) {
        println!("{}", line);
      }
    }
    command => {
      let notifications = ctx
        .take_notifications()
        .ok_or_else(|| eyre!("Notification stream already taken"))?;
      let service = ctx.service();
      let result = with_progress(&service, mutate(&ctx, &service, command)).await;
      print_notifications(notifications);
      result?;
    }
  }

  Ok(())
}

/// Drive a write, reporting writes still awaiting the backend every second.
async fn with_progress<F>(service: &DocumentService, write: F) -> Result<()>
where
  F: Future<Output = Result<()>>,
{
  tokio::pin!(write);
  let mut progress = tokio::time::interval_at(
    tokio::time::Instant::now() + PROGRESS_EVERY,
    PROGRESS_EVERY,
  );

  loop {
    tokio::select! {
      result = &mut write => return result,
      _ = progress.tick() => {
        let now = Utc::now();
        for pending in service.pending().snapshot() {
          debug!(id = %pending.id, kind = ?pending.kind, "write still pending");
          eprintln!("{}", pending.describe(now));
        }
      }
    }
  }
}

async fn mutate(ctx: &AppContext, service: &DocumentService, command: Command) -> Result<()> {
  match command {
    Command::Upload {
      name,
      category,
      file_url,
      file_type,
      pet,
    } => {
      let doc = service
        .upload(NewDocument {
          name,
          category,
          pet_id: pet,
          file_url,
          file_type,
        })
        .await?;
      println!("{}", doc.id);
    }
    Command::Edit {
      id,
      name,
      category,
      pet,
      no_pet,
    } => {
      let doc = find_document(ctx, &id).await?;
      let pet_id = if no_pet { Some(None) } else { pet.map(Some) };
      service
        .edit(
          &doc,
          DocumentPatch {
            name,
            category,
            pet_id,
          },
        )
        .await?;
    }
    Command::Favorite { id } => {
      let doc = find_document(ctx, &id).await?;
      service.toggle_favorite(&doc).await?;
    }
    Command::Archive { id } => {
      let doc = find_document(ctx, &id).await?;
      service.archive(&doc).await?;
    }
    Command::Restore { id } => {
      let doc = find_document(ctx, &id).await?;
      service.restore(&doc).await?;
    }
    Command::Delete { id } => {
      let doc = find_document(ctx, &id).await?;
      service.delete(&doc).await?;
    }
    Command::Watch { .. } | Command::List { .. } => {}
  }

  Ok(())
}

/// Look a document up among active and archived ones.
async fn find_document(ctx: &AppContext, id: &str) -> Result<Document> {
  for key in [DocumentQueryKey::All, DocumentQueryKey::Archived] {
    let docs = ctx.loader.load(&key).await?;
    if let Some(doc) = docs.into_iter().find(|d| d.id == id) {
      return Ok(doc);
    }
  }
  Err(eyre!("Document {} not found", id))
}

fn print_notifications(mut notifications: NotificationReceiver) {
  while let Ok(n) = notifications.try_recv() {
    match n.level {
      notify::NotificationLevel::Info => println!("{}", n.message),
      notify::NotificationLevel::Error => eprintln!("{}", n.message),
    }
  }
}
