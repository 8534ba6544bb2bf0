use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;

use crate::api;
use crate::config::{self, Config};
use crate::controller::{self, Controller, Layout};
use crate::data::Services;
use crate::logging;
use crate::render;
use crate::session::Session;
use crate::storage;
use crate::ui;

/// Everything the binary needs, wired once.
pub struct App {
    pub config: Config,
    pub session: Arc<Session>,
    pub client: Arc<api::Client>,
}

impl App {
    pub fn bootstrap() -> Result<Self> {
        let cfg = config::load(config::LoadOptions::default()).context("load config")?;
        if let Err(err) = logging::init(&cfg.log) {
            eprintln!("warning: logging disabled: {err:#}");
        }

        let store =
            Arc::new(storage::Store::open(storage::Options::default()).context("open storage")?);
        let session = Arc::new(Session::new(store).context("load session")?);
        let client = api::Client::new(
            session.clone(),
            api::ClientConfig {
                base_url: cfg.api.base_url.clone(),
                user_agent: cfg.api.user_agent.clone(),
                timeout: Some(cfg.api.timeout),
                http_client: None,
            },
        )
        .context("create api client")?;

        Ok(Self {
            config: cfg,
            session,
            client: Arc::new(client),
        })
    }

    /// Swaps an expired access token for a fresh one when a refresh token is
    /// stored. A failed refresh leaves the user logged out.
    pub fn refresh_if_expired(&self) {
        if !self.session.is_expired(Utc::now()) {
            return;
        }
        if self.session.refresh_token().is_none() {
            tracing::info!("stored token expired");
            if let Err(err) = self.session.clear() {
                tracing::warn!(error = %err, "failed to clear expired session");
            }
            return;
        }
        match self.client.refresh() {
            Ok(_) => tracing::info!("access token refreshed"),
            Err(err) => {
                tracing::warn!(error = %err, "token refresh failed");
                if let Err(err) = self.session.clear() {
                    tracing::warn!(error = %err, "failed to clear expired session");
                }
            }
        }
    }

    pub fn controller(&self) -> Controller {
        Controller::new(controller::Options {
            services: Services::from_client(self.client.clone()),
            session: self.session.clone(),
            page_size: self.config.api.page_size,
            layout: Layout::parse(&self.config.ui.layout),
            share_base: self.client.base_url().to_string(),
        })
    }

    /// Writes one page of posts as a standalone HTML document.
    pub fn export_html(&self, path: &Path, page: u32) -> Result<usize> {
        let posts = self
            .client
            .list_posts(page, self.config.api.page_size)
            .context("fetch posts")?;
        let me = self.session.current_username();
        let html = render::archive_page(&posts.items, me.as_deref(), posts.page);
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("create directory {}", parent.display()))?;
        }
        fs::write(path, html).with_context(|| format!("write {}", path.display()))?;
        tracing::info!(path = %path.display(), count = posts.items.len(), "archive exported");
        Ok(posts.items.len())
    }
}

pub fn run() -> Result<()> {
    let app = App::bootstrap()?;
    app.refresh_if_expired();
    let config_path = friendly_path(config::default_path().as_ref());

    let mut model = ui::Model::new(ui::Options {
        controller: app.controller(),
        config_path,
    });
    model.run()?;
    tracing::info!("exiting");
    Ok(())
}

fn friendly_path(path: Option<&PathBuf>) -> String {
    if let Some(path) = path {
        if let Some(home) = dirs::home_dir() {
            if let Ok(stripped) = path.strip_prefix(&home) {
                let mut display = String::from("~");
                if !stripped.as_os_str().is_empty() {
                    display.push_str(&format!("/{}", stripped.display()));
                }
                return display;
            }
        }
        path.display().to_string()
    } else {
        "~/.config/posts-tui/config.yaml".to_string()
    }
}
