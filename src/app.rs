use crate::cache::{CacheLayer, CacheStore};
use crate::commands::{self, Action};
use crate::config::{self, Config};
use crate::documents::cache::DocumentQueryKey;
use crate::documents::{Document, DocumentApi, RestDocumentClient};
use crate::event::{Event, EventHandler};
use crate::notify::{self, Notification, NotificationLevel, NotificationReceiver, Notifier};
use crate::query::{QueryClient, QueryObserver};
use crate::service::{DocumentLoader, DocumentService};
use crate::sync::{
  CacheOperations, Initializer, PollingSource, RefreshDriver, RefreshReason, RefreshScope,
  Refresher, SqliteStorageChannel, StorageChannel, SyncListener,
};
use color_eyre::{eyre::eyre, Result};
use crossterm::event::{DisableFocusChange, EnableFocusChange};
use crossterm::terminal::{disable_raw_mode, enable_raw_mode};
use crossterm::ExecutableCommand;
use std::io::{stdout, Write};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Everything a session needs, wired together once.
pub struct AppContext {
  pub config: Config,
  pub client: QueryClient<Vec<Document>>,
  pub driver: Arc<RefreshDriver>,
  pub loader: DocumentLoader,
  pub storage: Arc<SqliteStorageChannel>,
  notifier: Notifier,
  api: Arc<dyn DocumentApi>,
  notifications: Option<NotificationReceiver>,
}

impl AppContext {
  pub fn new(config: Config) -> Result<Self> {
    let api: Arc<dyn DocumentApi> = Arc::new(RestDocumentClient::new(&config)?);
    let storage_path = config::data_dir()?.join("storage.db");
    let storage = Arc::new(SqliteStorageChannel::open(
      &storage_path,
      config.sync.storage_poll(),
    )?);
    Ok(Self::with_parts(config, api, storage))
  }

  pub fn with_parts(
    config: Config,
    api: Arc<dyn DocumentApi>,
    storage: Arc<SqliteStorageChannel>,
  ) -> Self {
    let (notifier, notifications) = notify::channel();
    let limit = config.sync.dashboard_limit;

    let store = Arc::new(CacheStore::new(config.cache.ttl()));
    // Results older than one polling period are refetched when a view mounts
    let client = QueryClient::new()
      .with_stale_time(config.sync.poll_interval())
      .with_notifier(notifier.clone());
    let operations = Arc::new(CacheOperations::new(Arc::new(client.clone()), limit));
    let driver = Arc::new(
      RefreshDriver::new(Arc::clone(&store), operations).with_notifier(notifier.clone()),
    );
    let loader = DocumentLoader::new(
      Arc::clone(&api),
      CacheLayer::new(Arc::clone(&store)),
      config.api.user_id.clone(),
      limit,
    );

    Self {
      config,
      client,
      driver,
      loader,
      storage,
      notifier,
      api,
      notifications: Some(notifications),
    }
  }

  /// Write service announcing its changes to other sessions.
  pub fn service(&self) -> DocumentService {
    let storage: Arc<dyn StorageChannel> = self.storage.clone();
    DocumentService::new(
      Arc::clone(&self.api),
      Arc::clone(self.driver.operations()),
      self.driver.clone(),
      self.notifier.clone(),
      self.config.api.user_id.clone(),
    )
    .with_storage(storage, self.config.sync.storage_key.clone())
  }

  /// Take the notification stream. Only one consumer gets it.
  pub fn take_notifications(&mut self) -> Option<NotificationReceiver> {
    self.notifications.take()
  }
}

/// Refresh scope covering a view's own result set.
pub fn scope_for(view: &DocumentQueryKey) -> RefreshScope {
  match view {
    DocumentQueryKey::Pet { pet_id } => RefreshScope::pet(pet_id.as_str()),
    DocumentQueryKey::Archived => RefreshScope::archived(),
    _ => RefreshScope::default(),
  }
}

/// Render a list of documents, one per line, newest first.
pub fn render_documents(docs: &[Document]) -> Vec<String> {
  if docs.is_empty() {
    return vec!["  (no documents)".to_string()];
  }

  docs
    .iter()
    .map(|doc| {
      let marker = if doc.is_pending() {
        '~'
      } else if doc.is_favorite {
        '*'
      } else {
        ' '
      };
      let pet = doc.pet_id.as_deref().unwrap_or("-");
      format!(
        "{} {:<24} {:<14} pet:{:<10} {}",
        marker,
        doc.name,
        doc.category,
        pet,
        doc.created_at.format("%Y-%m-%d %H:%M")
      )
    })
    .collect()
}

fn render_notification(n: &Notification) -> String {
  match n.level {
    NotificationLevel::Info => format!("[info] {}", n.message),
    NotificationLevel::Error => format!("[error] {}", n.message),
  }
}

/// Run every terminal cleanup step, then report the first failure.
fn restore_terminal<F, R>(disable_focus: F, disable_raw: R) -> Result<()>
where
  F: FnOnce() -> std::io::Result<()>,
  R: FnOnce() -> std::io::Result<()>,
{
  let focus = disable_focus();
  let raw = disable_raw();
  focus?;
  raw?;
  Ok(())
}

/// Live view of one result set, kept in sync in the background.
pub struct App {
  ctx: AppContext,
  view: DocumentQueryKey,
  notifications: NotificationReceiver,
  should_quit: bool,
}

impl App {
  pub fn new(mut ctx: AppContext, view: DocumentQueryKey) -> Result<Self> {
    let notifications = ctx
      .take_notifications()
      .ok_or_else(|| eyre!("Notification stream already taken"))?;

    Ok(Self {
      ctx,
      view,
      notifications,
      should_quit: false,
    })
  }

  pub async fn run(&mut self) -> Result<()> {
    // Setup terminal
    enable_raw_mode()?;
    stdout().execute(EnableFocusChange)?;

    let result = self.run_loop().await;

    // Cleanup terminal
    let cleanup = restore_terminal(
      || stdout().execute(DisableFocusChange).map(|_| ()),
      disable_raw_mode,
    );

    result?;
    cleanup
  }

  async fn run_loop(&mut self) -> Result<()> {
    let mut events = EventHandler::new(Duration::from_millis(250));
    let scope = scope_for(&self.view);
    let refresher: Arc<dyn Refresher> = self.ctx.driver.clone();

    self.print(&format!(
      "Watching {} ({})",
      self.view.description(),
      commands::help_line()
    ))?;

    // Observe first so the mount refresh finds an active query
    let observer = self.ctx.client.observe(
      self.view.query_key(),
      self.ctx.loader.fetcher(self.view.clone()),
    );

    let initializer = Initializer::new(Arc::clone(&refresher))
      .with_scope(scope.clone())
      .mount(PollingSource::every(self.ctx.config.sync.poll_interval()));
    let listener = SyncListener::new(refresher, self.ctx.config.sync.storage_key.clone())
      .with_scope(scope)
      .mount(events.focus_events(), self.ctx.storage.subscribe());
    info!(view = %self.view.description(), "view mounted");

    while !self.should_quit {
      match events.next().await {
        Some(Event::Key(key)) => {
          if let Some(action) = commands::action_for(&key) {
            self.handle_action(action)?;
          }
        }
        Some(Event::Focus(_)) => {}
        Some(Event::Tick) => self.on_tick(&observer)?,
        None => break,
      }
    }

    initializer.unmount().await;
    listener.unmount().await;
    info!(view = %self.view.description(), "view unmounted");
    Ok(())
  }

  fn handle_action(&mut self, action: Action) -> Result<()> {
    match action {
      Action::Refresh => {
        self.ctx.driver.refresh(
          scope_for(&self.view)
            .request(RefreshReason::Manual)
            .announced(),
        );
      }
      Action::Help => self.print(&commands::help_line())?,
      Action::Quit => self.should_quit = true,
    }
    Ok(())
  }

  fn on_tick(&mut self, observer: &QueryObserver<Vec<Document>>) -> Result<()> {
    let updates = self.ctx.client.poll();
    let changed = updates
      .iter()
      .any(|u| &u.key == observer.key() && u.error.is_none());

    if changed {
      if let Some(docs) = observer.data() {
        self.print(&format!("--- {} ({}) ---", self.view.description(), docs.len()))?;
        for line in render_documents(&docs) {
          self.print(&line)?;
        }
      }
    }

    while let Ok(notification) = self.notifications.try_recv() {
      self.print(&render_notification(&notification))?;
    }
    Ok(())
  }

  /// Raw mode needs explicit carriage returns.
  fn print(&self, line: &str) -> Result<()> {
    let mut out = stdout();
    write!(out, "{}\r\n", line)?;
    out.flush()?;
    Ok(())
  }
}
