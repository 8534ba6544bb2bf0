use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;

use anyhow::{anyhow, Result};
use crossbeam_channel::{unbounded, Receiver, Sender};

use crate::api::{self, ApiError, Comment, ImageUpload, LoginResult, Page, Post, Registration};
use crate::data::Services;
use crate::session::Session;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum View {
    Login,
    Register,
    Posts,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layout {
    Archive,
    Carousel,
}

impl Layout {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "carousel" => Layout::Carousel,
            _ => Layout::Archive,
        }
    }

    pub fn toggle(self) -> Self {
        match self {
            Layout::Archive => Layout::Carousel,
            Layout::Carousel => Layout::Archive,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Layout::Archive => "Archive",
            Layout::Carousel => "Carousel",
        }
    }
}

/// Whether the editor creates a new post or rewrites an existing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormMode {
    Create,
    Edit(i64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CardState {
    #[default]
    Collapsed,
    Expanded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmAction {
    DeletePost(i64),
    DeleteComment { post_id: i64, comment_id: i64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditorField {
    Title,
    Content,
    Image,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditorForm {
    pub mode: FormMode,
    pub title: String,
    pub content: String,
    pub image_path: String,
    pub field: EditorField,
    pub status: String,
    pub busy: bool,
}

impl EditorForm {
    fn new(mode: FormMode) -> Self {
        Self {
            mode,
            title: String::new(),
            content: String::new(),
            image_path: String::new(),
            field: EditorField::Title,
            status: String::new(),
            busy: false,
        }
    }

    fn active_mut(&mut self) -> &mut String {
        match self.field {
            EditorField::Title => &mut self.title,
            EditorField::Content => &mut self.content,
            EditorField::Image => &mut self.image_path,
        }
    }

    fn cycle(&mut self, forward: bool) {
        // Images can only be attached to new posts.
        let fields: &[EditorField] = match self.mode {
            FormMode::Create => &[EditorField::Title, EditorField::Content, EditorField::Image],
            FormMode::Edit(_) => &[EditorField::Title, EditorField::Content],
        };
        let idx = fields.iter().position(|f| *f == self.field).unwrap_or(0);
        let next = if forward {
            (idx + 1) % fields.len()
        } else {
            (idx + fields.len() - 1) % fields.len()
        };
        self.field = fields[next];
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Modal {
    Confirm {
        prompt: String,
        action: ConfirmAction,
    },
    Alert(String),
    Editor(EditorForm),
    Comment {
        post_id: i64,
        input: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthField {
    Name,
    Username,
    Email,
    Password,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthForm {
    pub name: String,
    pub username: String,
    pub email: String,
    pub password: String,
    pub field: AuthField,
    pub status: String,
    pub busy: bool,
}

impl Default for AuthForm {
    fn default() -> Self {
        Self {
            name: String::new(),
            username: String::new(),
            email: String::new(),
            password: String::new(),
            field: AuthField::Username,
            status: String::new(),
            busy: false,
        }
    }
}

impl AuthForm {
    pub fn fields(view: View) -> &'static [AuthField] {
        match view {
            View::Register => &[
                AuthField::Name,
                AuthField::Username,
                AuthField::Email,
                AuthField::Password,
            ],
            _ => &[AuthField::Username, AuthField::Password],
        }
    }

    fn active_mut(&mut self) -> &mut String {
        match self.field {
            AuthField::Name => &mut self.name,
            AuthField::Username => &mut self.username,
            AuthField::Email => &mut self.email,
            AuthField::Password => &mut self.password,
        }
    }

    fn cycle(&mut self, view: View, forward: bool) {
        let fields = Self::fields(view);
        let idx = fields.iter().position(|f| *f == self.field).unwrap_or(0);
        let next = if forward {
            (idx + 1) % fields.len()
        } else {
            (idx + fields.len() - 1) % fields.len()
        };
        self.field = fields[next];
    }
}

enum AsyncResponse {
    Posts {
        request_id: u64,
        result: Result<Page<Post>>,
    },
    Comments {
        request_id: u64,
        post_id: i64,
        result: Result<Vec<Comment>>,
    },
    Login {
        result: Result<LoginResult>,
    },
    Register {
        username: String,
        result: Result<()>,
    },
    EditTarget {
        post_id: i64,
        result: Result<Post>,
    },
    PostSaved {
        mode: FormMode,
        result: Result<Option<Post>>,
    },
    PostDeleted {
        post_id: i64,
        result: Result<()>,
    },
    Liked {
        post_id: i64,
        result: Result<()>,
    },
    CommentAdded {
        post_id: i64,
        result: Result<Option<Comment>>,
    },
    CommentDeleted {
        post_id: i64,
        comment_id: i64,
        result: Result<()>,
    },
}

#[derive(Clone)]
pub struct Options {
    pub services: Services,
    pub session: Arc<Session>,
    pub page_size: u32,
    pub layout: Layout,
    /// Origin used to build share links.
    pub share_base: String,
}

pub struct Controller {
    services: Services,
    session: Arc<Session>,
    share_base: String,
    page_size: u32,
    view: View,
    layout: Layout,
    posts: Vec<Post>,
    page: u32,
    last_page: bool,
    posts_loaded: bool,
    selected_post: usize,
    cards: HashMap<i64, CardState>,
    comments: HashMap<i64, Vec<Comment>>,
    comment_errors: HashMap<i64, String>,
    selected_comment: usize,
    modal: Option<Modal>,
    auth: AuthForm,
    status_message: String,
    response_tx: Sender<(u64, AsyncResponse)>,
    response_rx: Receiver<(u64, AsyncResponse)>,
    /// Bumped on every return to the login view; older replies are dropped.
    session_epoch: u64,
    next_request_id: u64,
    pending_posts: Option<u64>,
    pending_comments: HashMap<i64, u64>,
    in_flight: usize,
}

impl Controller {
    pub fn new(opts: Options) -> Self {
        let (response_tx, response_rx) = unbounded();
        Self {
            services: opts.services,
            session: opts.session,
            share_base: opts.share_base,
            page_size: opts.page_size.max(1),
            view: View::Login,
            layout: opts.layout,
            posts: Vec::new(),
            page: 0,
            last_page: true,
            posts_loaded: false,
            selected_post: 0,
            cards: HashMap::new(),
            comments: HashMap::new(),
            comment_errors: HashMap::new(),
            selected_comment: 0,
            modal: None,
            auth: AuthForm::default(),
            status_message: String::new(),
            response_tx,
            response_rx,
            session_epoch: 0,
            next_request_id: 0,
            pending_posts: None,
            pending_comments: HashMap::new(),
            in_flight: 0,
        }
    }

    /// Opens the posts view when a session exists, the login view otherwise.
    pub fn start(&mut self) {
        if self.session.is_authenticated() {
            self.enter_posts_view();
        } else {
            self.view = View::Login;
            self.status_message = "Log in to continue.".to_string();
        }
    }

    pub fn view(&self) -> View {
        self.view
    }

    pub fn layout(&self) -> Layout {
        self.layout
    }

    pub fn posts(&self) -> &[Post] {
        &self.posts
    }

    pub fn posts_loaded(&self) -> bool {
        self.posts_loaded
    }

    pub fn page(&self) -> u32 {
        self.page
    }

    pub fn is_last_page(&self) -> bool {
        self.last_page
    }

    pub fn selected_index(&self) -> usize {
        self.selected_post
    }

    pub fn selected_post(&self) -> Option<&Post> {
        self.posts.get(self.selected_post)
    }

    pub fn card_state(&self, post_id: i64) -> CardState {
        self.cards.get(&post_id).copied().unwrap_or_default()
    }

    pub fn comments_for(&self, post_id: i64) -> Option<&[Comment]> {
        self.comments.get(&post_id).map(Vec::as_slice)
    }

    pub fn comments_error(&self, post_id: i64) -> Option<&str> {
        self.comment_errors.get(&post_id).map(String::as_str)
    }

    pub fn comments_loading(&self, post_id: i64) -> bool {
        self.pending_comments.contains_key(&post_id)
    }

    pub fn selected_comment(&self) -> usize {
        self.selected_comment
    }

    pub fn modal(&self) -> Option<&Modal> {
        self.modal.as_ref()
    }

    pub fn auth_form(&self) -> &AuthForm {
        &self.auth
    }

    pub fn status(&self) -> &str {
        &self.status_message
    }

    pub fn is_loading(&self) -> bool {
        self.in_flight > 0
    }

    pub fn me(&self) -> Option<String> {
        self.session.current_username()
    }

    pub fn claims_email(&self) -> Option<String> {
        self.session.claims().and_then(|claims| claims.email)
    }

    pub fn poll_async(&mut self) -> bool {
        let mut changed = false;
        while let Ok(message) = self.response_rx.try_recv() {
            self.handle_async_response(message);
            changed = true;
        }
        changed
    }

    fn spawn<F>(&mut self, job: F)
    where
        F: FnOnce() -> AsyncResponse + Send + 'static,
    {
        self.in_flight += 1;
        let tx = self.response_tx.clone();
        let epoch = self.session_epoch;
        thread::spawn(move || {
            let _ = tx.send((epoch, job()));
        });
    }

    fn next_request(&mut self) -> u64 {
        self.next_request_id += 1;
        self.next_request_id
    }

    fn enter_posts_view(&mut self) {
        self.view = View::Posts;
        self.auth = AuthForm::default();
        let greeting = match self.me() {
            Some(name) => format!("Signed in as {name}."),
            None => "Signed in.".to_string(),
        };
        self.status_message = greeting;
        self.load_page(self.page);
    }

    // Posts and pagination

    pub fn refresh(&mut self) {
        self.load_page(self.page);
    }

    fn load_page(&mut self, page: u32) {
        let request_id = self.next_request();
        self.pending_posts = Some(request_id);
        let feed = self.services.feed.clone();
        let size = self.page_size;
        tracing::debug!(page, size, request_id, "loading posts");
        self.spawn(move || AsyncResponse::Posts {
            request_id,
            result: feed.list_posts(page, size),
        });
    }

    pub fn next_page(&mut self) {
        if self.last_page {
            self.status_message = "Already on the last page.".to_string();
            return;
        }
        self.load_page(self.page + 1);
    }

    pub fn prev_page(&mut self) {
        if self.page == 0 {
            self.status_message = "Already on the first page.".to_string();
            return;
        }
        self.load_page(self.page - 1);
    }

    fn apply_posts(&mut self, page: Page<Post>) {
        let selected_id = self.selected_post().map(|post| post.id);
        let changed_page = page.page != self.page;
        self.page = page.page;
        self.last_page = page.last;
        self.posts = page.items;
        self.posts_loaded = true;

        let ids: Vec<i64> = self.posts.iter().map(|p| p.id).collect();
        self.cards.retain(|id, _| ids.contains(id));
        self.comments.retain(|id, _| ids.contains(id));

        self.selected_post = if changed_page {
            0
        } else {
            selected_id
                .and_then(|id| ids.iter().position(|candidate| *candidate == id))
                .unwrap_or(self.selected_post)
                .min(self.posts.len().saturating_sub(1))
        };
        self.clamp_selected_comment();
    }

    pub fn select_next(&mut self) {
        if self.selected_post + 1 < self.posts.len() {
            self.selected_post += 1;
            self.selected_comment = 0;
        }
    }

    pub fn select_prev(&mut self) {
        if self.selected_post > 0 {
            self.selected_post -= 1;
            self.selected_comment = 0;
        }
    }

    pub fn toggle_layout(&mut self) {
        self.layout = self.layout.toggle();
        self.status_message = format!("{} view", self.layout.label());
    }

    // Comments

    pub fn toggle_comments(&mut self) {
        let Some(post_id) = self.selected_post().map(|post| post.id) else {
            return;
        };
        match self.card_state(post_id) {
            CardState::Collapsed => {
                self.cards.insert(post_id, CardState::Expanded);
                self.selected_comment = 0;
                self.load_comments(post_id);
            }
            CardState::Expanded => {
                self.cards.insert(post_id, CardState::Collapsed);
            }
        }
    }

    fn load_comments(&mut self, post_id: i64) {
        let request_id = self.next_request();
        self.pending_comments.insert(post_id, request_id);
        self.comment_errors.remove(&post_id);
        let service = self.services.comments.clone();
        self.spawn(move || AsyncResponse::Comments {
            request_id,
            post_id,
            result: service.list_comments(post_id),
        });
    }

    fn expanded_comments(&self) -> Option<(i64, &[Comment])> {
        let post = self.selected_post()?;
        if self.card_state(post.id) != CardState::Expanded {
            return None;
        }
        Some((post.id, self.comments_for(post.id).unwrap_or_default()))
    }

    pub fn select_next_comment(&mut self) {
        let len = self
            .expanded_comments()
            .map(|(_, comments)| comments.len())
            .unwrap_or(0);
        if self.selected_comment + 1 < len {
            self.selected_comment += 1;
        }
    }

    pub fn select_prev_comment(&mut self) {
        self.selected_comment = self.selected_comment.saturating_sub(1);
    }

    fn clamp_selected_comment(&mut self) {
        let len = self
            .expanded_comments()
            .map(|(_, comments)| comments.len())
            .unwrap_or(0);
        self.selected_comment = self.selected_comment.min(len.saturating_sub(1));
    }

    pub fn open_comment_input(&mut self) {
        let Some(post_id) = self.selected_post().map(|post| post.id) else {
            return;
        };
        if !self.session.is_authenticated() {
            self.alert("Please login");
            return;
        }
        self.modal = Some(Modal::Comment {
            post_id,
            input: String::new(),
        });
    }

    pub fn submit_comment(&mut self) {
        let Some(Modal::Comment { post_id, input }) = self.modal.as_ref() else {
            return;
        };
        let post_id = *post_id;
        let content = input.trim().to_string();
        if content.is_empty() {
            return;
        }
        if !self.session.is_authenticated() {
            self.alert("Please login");
            return;
        }
        self.modal = None;
        self.status_message = "Posting comment…".to_string();
        let service = self.services.comments.clone();
        self.spawn(move || AsyncResponse::CommentAdded {
            post_id,
            result: service.add_comment(post_id, &content),
        });
    }

    pub fn request_delete_comment(&mut self) {
        let Some((post_id, comments)) = self.expanded_comments() else {
            self.status_message = "Open the comments first.".to_string();
            return;
        };
        let Some(comment) = comments.get(self.selected_comment) else {
            return;
        };
        let comment_id = comment.id;
        if !self.session.is_authenticated() {
            self.alert("Please login");
            return;
        }
        self.modal = Some(Modal::Confirm {
            prompt: "Delete this comment?".to_string(),
            action: ConfirmAction::DeleteComment {
                post_id,
                comment_id,
            },
        });
    }

    // Posts: like, create, edit, delete, share

    pub fn like_selected(&mut self) {
        let Some(post_id) = self.selected_post().map(|post| post.id) else {
            return;
        };
        let service = self.services.interactions.clone();
        self.spawn(move || AsyncResponse::Liked {
            post_id,
            result: service.like(post_id),
        });
    }

    pub fn open_new_post(&mut self) {
        if !self.session.is_authenticated() {
            self.alert("Please login");
            return;
        }
        self.modal = Some(Modal::Editor(EditorForm::new(FormMode::Create)));
    }

    pub fn open_edit_selected(&mut self) {
        let Some(post) = self.selected_post() else {
            return;
        };
        let post_id = post.id;
        if !crate::render::is_owner(self.me().as_deref(), post.author_username.as_deref()) {
            self.status_message = "You can only edit your own posts.".to_string();
            return;
        }
        self.status_message = "Loading post…".to_string();
        let feed = self.services.feed.clone();
        self.spawn(move || AsyncResponse::EditTarget {
            post_id,
            result: feed.get_post(post_id),
        });
    }

    pub fn submit_editor(&mut self) {
        let Some(Modal::Editor(form)) = self.modal.as_mut() else {
            return;
        };
        if form.busy {
            return;
        }
        let title = form.title.trim().to_string();
        let content = form.content.trim().to_string();
        if title.is_empty() || content.is_empty() {
            form.status = "Title & content required".to_string();
            return;
        }
        let mode = form.mode;
        let image = match (mode, form.image_path.trim()) {
            (FormMode::Create, path) if !path.is_empty() => {
                match ImageUpload::from_path(&expand_home(path)) {
                    Ok(image) => Some(image),
                    Err(err) => {
                        form.status = format!("{err:#}");
                        return;
                    }
                }
            }
            _ => None,
        };
        form.busy = true;
        form.status = "Saving…".to_string();
        let service = self.services.interactions.clone();
        self.spawn(move || {
            let result = match mode {
                FormMode::Create => service.create_post(&title, &content, image),
                FormMode::Edit(id) => service.update_post(id, &title, &content),
            };
            AsyncResponse::PostSaved { mode, result }
        });
    }

    pub fn request_delete_post(&mut self) {
        let Some(post) = self.selected_post() else {
            return;
        };
        let post_id = post.id;
        if !crate::render::is_owner(self.me().as_deref(), post.author_username.as_deref()) {
            self.status_message = "You can only delete your own posts.".to_string();
            return;
        }
        self.modal = Some(Modal::Confirm {
            prompt: "Delete post?".to_string(),
            action: ConfirmAction::DeletePost(post_id),
        });
    }

    pub fn share_selected(&mut self) {
        let Some(post_id) = self.selected_post().map(|post| post.id) else {
            return;
        };
        let link = api::share_link(&self.share_base, post_id);
        match copy_to_clipboard(&link) {
            Ok(()) => self.status_message = format!("Link copied: {link}"),
            Err(err) => {
                tracing::debug!(error = %err, "clipboard unavailable");
                self.status_message = format!("Share link: {link}");
            }
        }
    }

    // Modals

    pub fn confirm(&mut self, accepted: bool) {
        let action = match self.modal {
            Some(Modal::Confirm { action, .. }) => action,
            _ => return,
        };
        self.modal = None;
        if !accepted {
            return;
        }
        match action {
            ConfirmAction::DeletePost(post_id) => {
                let service = self.services.interactions.clone();
                self.spawn(move || AsyncResponse::PostDeleted {
                    post_id,
                    result: service.delete_post(post_id),
                });
            }
            ConfirmAction::DeleteComment {
                post_id,
                comment_id,
            } => {
                let service = self.services.comments.clone();
                self.spawn(move || AsyncResponse::CommentDeleted {
                    post_id,
                    comment_id,
                    result: service.delete_comment(comment_id),
                });
            }
        }
    }

    pub fn dismiss_modal(&mut self) {
        self.modal = None;
    }

    fn alert(&mut self, message: impl Into<String>) {
        self.modal = Some(Modal::Alert(message.into()));
    }

    pub fn input_char(&mut self, ch: char) {
        match self.modal.as_mut() {
            Some(Modal::Editor(form)) => form.active_mut().push(ch),
            Some(Modal::Comment { input, .. }) => input.push(ch),
            Some(_) => {}
            None => {
                if matches!(self.view, View::Login | View::Register) {
                    self.auth.active_mut().push(ch);
                }
            }
        }
    }

    pub fn input_backspace(&mut self) {
        match self.modal.as_mut() {
            Some(Modal::Editor(form)) => {
                form.active_mut().pop();
            }
            Some(Modal::Comment { input, .. }) => {
                input.pop();
            }
            Some(_) => {}
            None => {
                if matches!(self.view, View::Login | View::Register) {
                    self.auth.active_mut().pop();
                }
            }
        }
    }

    pub fn input_newline(&mut self) {
        if let Some(Modal::Editor(form)) = self.modal.as_mut() {
            if form.field == EditorField::Content {
                form.content.push('\n');
            }
        }
    }

    pub fn cycle_field(&mut self, forward: bool) {
        match self.modal.as_mut() {
            Some(Modal::Editor(form)) => form.cycle(forward),
            Some(_) => {}
            None => {
                let view = self.view;
                self.auth.cycle(view, forward);
            }
        }
    }

    // Authentication

    pub fn show_register(&mut self) {
        self.view = View::Register;
        self.auth.status.clear();
        self.auth.field = AuthField::Name;
    }

    pub fn show_login(&mut self) {
        self.view = View::Login;
        self.auth.status.clear();
        self.auth.field = AuthField::Username;
    }

    pub fn submit_login(&mut self) {
        if self.auth.busy {
            return;
        }
        let username = self.auth.username.trim().to_string();
        let password = self.auth.password.trim().to_string();
        if username.is_empty() || password.is_empty() {
            self.auth.status = "Enter username & password".to_string();
            return;
        }
        self.auth.busy = true;
        self.auth.status = "Logging in…".to_string();
        let accounts = self.services.accounts.clone();
        self.spawn(move || AsyncResponse::Login {
            result: accounts.login(&username, &password),
        });
    }

    pub fn submit_register(&mut self) {
        if self.auth.busy {
            return;
        }
        let form = Registration {
            name: Some(self.auth.name.clone()),
            username: self.auth.username.clone(),
            email: self.auth.email.clone(),
            password: self.auth.password.clone(),
        };
        if form.username.trim().is_empty()
            || form.email.trim().is_empty()
            || form.password.trim().is_empty()
        {
            self.auth.status = "Username, email and password are required.".to_string();
            return;
        }
        self.auth.busy = true;
        self.auth.status = "Creating account…".to_string();
        let accounts = self.services.accounts.clone();
        let username = form.username.trim().to_string();
        self.spawn(move || AsyncResponse::Register {
            username,
            result: accounts.register(&form),
        });
    }

    pub fn logout(&mut self) {
        if let Err(err) = self.session.clear() {
            tracing::warn!(error = %err, "failed to clear session");
        }
        self.reset_to_login("Logged out.");
    }

    fn force_logout(&mut self, message: &str) {
        tracing::info!(message, "session rejected by server");
        if let Err(err) = self.session.clear() {
            tracing::warn!(error = %err, "failed to clear session");
        }
        self.reset_to_login(message);
    }

    fn reset_to_login(&mut self, message: &str) {
        self.session_epoch += 1;
        self.view = View::Login;
        self.modal = None;
        self.posts.clear();
        self.posts_loaded = false;
        self.cards.clear();
        self.comments.clear();
        self.comment_errors.clear();
        self.pending_posts = None;
        self.pending_comments.clear();
        self.page = 0;
        self.last_page = true;
        self.selected_post = 0;
        self.selected_comment = 0;
        self.auth = AuthForm {
            status: message.to_string(),
            ..AuthForm::default()
        };
        self.status_message = message.to_string();
    }

    /// Routes session expiry to the login view. Returns true when handled.
    fn handle_session_error(&mut self, err: &anyhow::Error) -> bool {
        if matches!(err.downcast_ref::<ApiError>(), Some(ApiError::SessionExpired(_))) {
            self.force_logout("Session expired. Please log in again.");
            return true;
        }
        false
    }

    fn nudge_likes(&mut self, post_id: i64, delta: i64) {
        if let Some(post) = self.posts.iter_mut().find(|p| p.id == post_id) {
            post.likes = (post.likes + delta).max(0);
        }
    }

    fn nudge_comments(&mut self, post_id: i64, delta: i64) {
        if let Some(post) = self.posts.iter_mut().find(|p| p.id == post_id) {
            post.comments = (post.comments + delta).max(0);
        }
    }

    fn handle_async_response(&mut self, (epoch, message): (u64, AsyncResponse)) {
        self.in_flight = self.in_flight.saturating_sub(1);
        if epoch != self.session_epoch {
            tracing::debug!(
                epoch,
                current = self.session_epoch,
                "dropping reply from a closed session"
            );
            return;
        }
        match message {
            AsyncResponse::Posts { request_id, result } => {
                if self.pending_posts != Some(request_id) {
                    return;
                }
                self.pending_posts = None;
                match result {
                    Ok(page) => {
                        tracing::debug!(page = page.page, count = page.items.len(), "posts loaded");
                        self.apply_posts(page);
                    }
                    Err(err) => {
                        if self.handle_session_error(&err) {
                            return;
                        }
                        tracing::warn!(error = %err, "failed to load posts");
                        self.status_message = format!("Failed to load posts: {}", describe(&err));
                    }
                }
            }
            AsyncResponse::Comments {
                request_id,
                post_id,
                result,
            } => {
                if self.pending_comments.get(&post_id) != Some(&request_id) {
                    return;
                }
                self.pending_comments.remove(&post_id);
                match result {
                    Ok(comments) => {
                        self.comments.insert(post_id, comments);
                        self.clamp_selected_comment();
                    }
                    Err(err) => {
                        if self.handle_session_error(&err) {
                            return;
                        }
                        self.comment_errors.insert(
                            post_id,
                            format!("Unable to load comments: {}", describe(&err)),
                        );
                    }
                }
            }
            AsyncResponse::Login { result } => {
                self.auth.busy = false;
                match result {
                    Ok(login) => {
                        if self.session.read().as_deref() != Some(login.token.as_str()) {
                            if let Err(err) = self
                                .session
                                .save(&login.token, login.refresh_token.as_deref())
                            {
                                self.auth.status = format!("Could not store token: {err}");
                                return;
                            }
                        }
                        tracing::info!(username = ?login.username, "logged in");
                        self.page = 0;
                        self.enter_posts_view();
                    }
                    Err(err) => {
                        self.auth.status = format!("Login failed: {}", describe(&err));
                    }
                }
            }
            AsyncResponse::Register { username, result } => {
                self.auth.busy = false;
                match result {
                    Ok(()) => {
                        self.view = View::Login;
                        self.auth = AuthForm {
                            username,
                            status: "Registration successful. Please log in.".to_string(),
                            field: AuthField::Password,
                            ..AuthForm::default()
                        };
                    }
                    Err(err) => {
                        self.auth.status = format!("Registration failed: {}", describe(&err));
                    }
                }
            }
            AsyncResponse::EditTarget { post_id, result } => match result {
                Ok(post) => {
                    let mut form = EditorForm::new(FormMode::Edit(post_id));
                    form.title = post.title;
                    form.content = post.content;
                    self.modal = Some(Modal::Editor(form));
                    self.status_message.clear();
                }
                Err(err) => {
                    if self.handle_session_error(&err) {
                        return;
                    }
                    self.status_message = format!("Failed to load post: {}", describe(&err));
                }
            },
            AsyncResponse::PostSaved { mode, result } => match result {
                Ok(_) => {
                    if matches!(self.modal, Some(Modal::Editor(_))) {
                        self.modal = None;
                    }
                    self.status_message = match mode {
                        FormMode::Create => "Posted".to_string(),
                        FormMode::Edit(_) => "Changes saved".to_string(),
                    };
                    self.refresh();
                }
                Err(err) => {
                    if self.handle_session_error(&err) {
                        return;
                    }
                    let verb = match mode {
                        FormMode::Create => "Failed to post",
                        FormMode::Edit(_) => "Failed to save",
                    };
                    let message = format!("{verb}: {}", describe(&err));
                    match self.modal.as_mut() {
                        Some(Modal::Editor(form)) => {
                            form.busy = false;
                            form.status = message;
                        }
                        _ => self.alert(message),
                    }
                }
            },
            AsyncResponse::PostDeleted { post_id, result } => match result {
                Ok(()) => {
                    self.cards.remove(&post_id);
                    self.comments.remove(&post_id);
                    self.status_message = "Post deleted".to_string();
                    self.refresh();
                }
                Err(err) => match err.downcast_ref::<ApiError>() {
                    Some(ApiError::SessionExpired(_)) => {
                        self.force_logout("Session expired. Please log in again.")
                    }
                    Some(ApiError::NotFound(_)) => {
                        self.cards.remove(&post_id);
                        self.comments.remove(&post_id);
                        self.alert("Post not found");
                        self.refresh();
                    }
                    _ => self.alert(format!("Failed to delete post: {}", describe(&err))),
                },
            },
            AsyncResponse::Liked { post_id, result } => match result {
                Ok(()) => {
                    self.nudge_likes(post_id, 1);
                    self.refresh();
                }
                Err(err) => {
                    if self.handle_session_error(&err) {
                        return;
                    }
                    self.status_message = format!("Like failed: {}", describe(&err));
                }
            },
            AsyncResponse::CommentAdded { post_id, result } => match result {
                Ok(_) => {
                    self.nudge_comments(post_id, 1);
                    self.cards.insert(post_id, CardState::Expanded);
                    self.status_message = "Comment added".to_string();
                    self.load_comments(post_id);
                    self.refresh();
                }
                Err(err) => {
                    if self.handle_session_error(&err) {
                        return;
                    }
                    self.alert(format!("Failed to add comment: {}", describe(&err)));
                }
            },
            AsyncResponse::CommentDeleted {
                post_id,
                comment_id,
                result,
            } => match result {
                Ok(()) => {
                    tracing::info!(post_id, comment_id, "comment deleted");
                    self.nudge_comments(post_id, -1);
                    self.load_comments(post_id);
                    self.refresh();
                }
                Err(err) => match err.downcast_ref::<ApiError>() {
                    Some(ApiError::SessionExpired(_)) => self.force_logout("Not authenticated"),
                    Some(ApiError::Forbidden(_)) => {
                        self.alert("Not authorized to delete this comment")
                    }
                    Some(ApiError::NotFound(_)) => {
                        self.alert("Comment not found");
                        self.load_comments(post_id);
                    }
                    _ => self.alert(format!("Failed to delete comment: {}", describe(&err))),
                },
            },
        }
    }
}

fn describe(err: &anyhow::Error) -> String {
    match err.downcast_ref::<ApiError>() {
        Some(api) => api.to_string(),
        None => format!("{err:#}"),
    }
}

fn expand_home(path: &str) -> PathBuf {
    match path.strip_prefix("~/") {
        Some(rest) => dirs::home_dir()
            .map(|home| home.join(rest))
            .unwrap_or_else(|| PathBuf::from(path)),
        None => PathBuf::from(path),
    }
}

fn copy_to_clipboard(text: &str) -> Result<()> {
    if cfg!(test) {
        return Err(anyhow!("clipboard disabled in tests"));
    }
    let mut clipboard =
        arboard::Clipboard::new().map_err(|err| anyhow!("create clipboard: {err}"))?;
    clipboard
        .set_text(text.to_string())
        .map_err(|err| anyhow!("copy link: {err}"))
}

#[cfg(test)]
impl Controller {
    /// Applies worker responses until nothing is in flight.
    pub(crate) fn settle(&mut self) {
        while self.in_flight > 0 {
            let message = self
                .response_rx
                .recv_timeout(std::time::Duration::from_secs(5))
                .expect("worker response");
            self.handle_async_response(message);
        }
    }
}
