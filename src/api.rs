use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::blocking::multipart::{Form, Part};
use reqwest::blocking::Client as HttpClient;
use reqwest::header::{ACCEPT, AUTHORIZATION, USER_AGENT};
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{json, Value};
use url::Url;

use crate::session::Session;

pub const API_PREFIX: &str = "/api";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ApiError {
    #[error("Network error: {0}")]
    Network(String),
    /// 401 on any authenticated call, or 403 on an authenticated read. The
    /// session has already been cleared when this is returned.
    #[error("Session expired: {0}")]
    SessionExpired(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Validation(String),
    #[error("{message}")]
    Server { status: u16, message: String },
    #[error("{0}")]
    Decode(String),
}

impl ApiError {
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Forbidden(_) => Some(403),
            ApiError::NotFound(_) => Some(404),
            ApiError::Server { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// A response body: JSON when it parses, the raw text otherwise.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Json(Value),
    Text(String),
    Empty,
}

impl Payload {
    pub fn parse(text: &str) -> Self {
        if text.trim().is_empty() {
            return Payload::Empty;
        }
        match serde_json::from_str::<Value>(text) {
            Ok(value) => Payload::Json(value),
            Err(_) => Payload::Text(text.to_string()),
        }
    }

    /// `message`, then `error`, from a JSON object body.
    pub fn error_message(&self) -> Option<String> {
        let Payload::Json(Value::Object(map)) = self else {
            return None;
        };
        ["message", "error"].iter().find_map(|key| {
            map.get(*key)
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        })
    }

    pub fn decode<T: DeserializeOwned>(self) -> Result<T, ApiError> {
        match self {
            Payload::Json(value) => serde_json::from_value(value)
                .map_err(|err| ApiError::Decode(format!("Unexpected response: {err}"))),
            Payload::Text(text) => Err(ApiError::Decode(format!(
                "Unexpected non-JSON response: {}",
                text.chars().take(120).collect::<String>()
            ))),
            Payload::Empty => Err(ApiError::Decode("Empty response".into())),
        }
    }
}

pub enum Body {
    Empty,
    Json(Value),
    Multipart(Form),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageUpload {
    pub file_name: String,
    pub mime: String,
    pub bytes: Vec<u8>,
}

impl ImageUpload {
    pub fn from_path(path: &Path) -> Result<Self> {
        let bytes =
            fs::read(path).with_context(|| format!("read image {}", path.display()))?;
        anyhow::ensure!(!bytes.is_empty(), "image {} is empty", path.display());
        let mime = tree_magic_mini::from_u8(&bytes).to_string();
        anyhow::ensure!(
            mime.starts_with("image/"),
            "{} is not an image ({mime})",
            path.display()
        );
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "image".to_string());
        Ok(Self {
            file_name,
            mime,
            bytes,
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct ClientConfig {
    pub base_url: String,
    pub user_agent: String,
    pub timeout: Option<Duration>,
    pub http_client: Option<HttpClient>,
}

pub struct Client {
    http: HttpClient,
    base_url: Url,
    user_agent: String,
    session: Arc<Session>,
}

impl Client {
    pub fn new(session: Arc<Session>, config: ClientConfig) -> Result<Self> {
        anyhow::ensure!(
            !config.user_agent.trim().is_empty(),
            "api client user agent required"
        );
        let mut base = config.base_url.trim().to_string();
        anyhow::ensure!(!base.is_empty(), "api base url required");
        if !base.ends_with('/') {
            base.push('/');
        }
        let base_url = Url::parse(&base).with_context(|| format!("parse base url {base}"))?;
        let http = match config.http_client {
            Some(client) => client,
            None => HttpClient::builder()
                .timeout(config.timeout.unwrap_or(Duration::from_secs(20)))
                .build()
                .context("build http client")?,
        };

        Ok(Self {
            http,
            base_url,
            user_agent: config.user_agent,
            session,
        })
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub fn request(
        &self,
        path: &str,
        method: Method,
        body: Body,
        authenticated: bool,
    ) -> Result<Payload, ApiError> {
        let url = self.endpoint(path)?;
        let mut req = self
            .http
            .request(method.clone(), url)
            .header(USER_AGENT, self.user_agent.clone())
            .header(ACCEPT, "application/json");
        if authenticated {
            if let Some(token) = self.session.read() {
                req = req.header(AUTHORIZATION, format!("Bearer {token}"));
            }
        }
        req = match body {
            Body::Empty => req,
            Body::Json(value) => req.json(&value),
            Body::Multipart(form) => req.multipart(form),
        };

        let resp = req.send().map_err(|err| {
            tracing::warn!(%method, path, error = %err, "request failed");
            ApiError::Network(err.to_string())
        })?;
        let status = resp.status();
        let text = resp
            .text()
            .map_err(|err| ApiError::Network(err.to_string()))?;
        let payload = Payload::parse(&text);
        tracing::debug!(%method, path, status = status.as_u16(), "api response");

        if status.is_success() {
            return Ok(payload);
        }

        let code = status.as_u16();
        let message = payload
            .error_message()
            .unwrap_or_else(|| format!("Status {code}"));
        tracing::info!(%method, path, status = code, %message, "api error");
        let expired = authenticated && (code == 401 || (code == 403 && method == Method::GET));
        if expired {
            if let Err(err) = self.session.clear() {
                tracing::warn!(error = %err, "failed to clear session");
            }
            return Err(ApiError::SessionExpired(message));
        }
        Err(match code {
            403 => ApiError::Forbidden(message),
            404 => ApiError::NotFound(message),
            _ => ApiError::Server {
                status: code,
                message,
            },
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url, ApiError> {
        let relative = format!("{}{}", API_PREFIX.trim_start_matches('/'), path);
        self.base_url
            .join(&relative)
            .map_err(|err| ApiError::Validation(format!("invalid path {path}: {err}")))
    }

    /// Logs in and persists the returned token.
    pub fn login(&self, username: &str, password: &str) -> Result<LoginResult, ApiError> {
        let username = username.trim();
        let password = password.trim();
        if username.is_empty() || password.is_empty() {
            return Err(ApiError::Validation("Enter username & password".into()));
        }
        let payload = self.request(
            "/auth/login",
            Method::POST,
            Body::Json(json!({ "username": username, "password": password })),
            false,
        )?;
        let result = login_result(payload)?;
        self.session
            .save(&result.token, result.refresh_token.as_deref())
            .map_err(|err| ApiError::Decode(format!("Could not store token: {err}")))?;
        Ok(result)
    }

    pub fn register(&self, form: &Registration) -> Result<(), ApiError> {
        let form = form.trimmed();
        if form.username.is_empty() || form.email.is_empty() || form.password.is_empty() {
            return Err(ApiError::Validation(
                "Username, email and password are required.".into(),
            ));
        }
        let body = serde_json::to_value(&form)
            .map_err(|err| ApiError::Decode(err.to_string()))?;
        self.request("/auth/register", Method::POST, Body::Json(body), false)?;
        Ok(())
    }

    /// Swaps the stored refresh token for a new access token.
    pub fn refresh(&self) -> Result<LoginResult, ApiError> {
        let Some(refresh_token) = self.session.refresh_token() else {
            return Err(ApiError::Validation("No refresh token stored".into()));
        };
        let payload = self.request(
            "/auth/refresh",
            Method::POST,
            Body::Json(json!({ "refreshToken": refresh_token })),
            false,
        )?;
        let mut result = login_result(payload)?;
        if result.refresh_token.is_none() {
            result.refresh_token = Some(refresh_token);
        }
        self.session
            .save(&result.token, result.refresh_token.as_deref())
            .map_err(|err| ApiError::Decode(format!("Could not store token: {err}")))?;
        Ok(result)
    }

    pub fn list_posts(&self, page: u32, size: u32) -> Result<Page<Post>, ApiError> {
        let size = size.max(1);
        let path = format!("/posts?page={page}&size={size}");
        let payload = self.request(&path, Method::GET, Body::Empty, true)?;
        let shape: PageShape<Post> = payload.decode()?;
        Ok(shape.normalize(page, size))
    }

    pub fn get_post(&self, id: i64) -> Result<Post, ApiError> {
        self.request(&format!("/posts/{id}"), Method::GET, Body::Empty, true)?
            .decode()
    }

    pub fn create_post(
        &self,
        title: &str,
        content: &str,
        image: Option<ImageUpload>,
    ) -> Result<Option<Post>, ApiError> {
        let (title, content) = required_post_fields(title, content)?;
        let body = match image {
            Some(image) => {
                let part = Part::bytes(image.bytes)
                    .file_name(image.file_name)
                    .mime_str(&image.mime)
                    .map_err(|err| ApiError::Validation(format!("Invalid image: {err}")))?;
                Body::Multipart(
                    Form::new()
                        .text("title", title.to_string())
                        .text("content", content.to_string())
                        .part("image", part),
                )
            }
            None => Body::Json(json!({ "title": title, "content": content })),
        };
        let payload = self.request("/posts", Method::POST, body, true)?;
        Ok(payload.decode().ok())
    }

    pub fn update_post(&self, id: i64, title: &str, content: &str) -> Result<Option<Post>, ApiError> {
        let (title, content) = required_post_fields(title, content)?;
        let payload = self.request(
            &format!("/posts/{id}"),
            Method::PUT,
            Body::Json(json!({ "title": title, "content": content })),
            true,
        )?;
        Ok(payload.decode().ok())
    }

    pub fn delete_post(&self, id: i64) -> Result<(), ApiError> {
        self.request(&format!("/posts/{id}"), Method::DELETE, Body::Empty, true)?;
        Ok(())
    }

    pub fn like_post(&self, id: i64) -> Result<(), ApiError> {
        self.request(&format!("/posts/{id}/like"), Method::POST, Body::Empty, true)?;
        Ok(())
    }

    /// Anything other than a JSON array is treated as "no comments".
    pub fn list_comments(&self, post_id: i64) -> Result<Vec<Comment>, ApiError> {
        let payload = self.request(
            &format!("/posts/{post_id}/comments"),
            Method::GET,
            Body::Empty,
            true,
        )?;
        match payload {
            Payload::Json(value @ Value::Array(_)) => Payload::Json(value).decode(),
            _ => Ok(Vec::new()),
        }
    }

    pub fn add_comment(&self, post_id: i64, content: &str) -> Result<Option<Comment>, ApiError> {
        let content = content.trim();
        if content.is_empty() {
            return Err(ApiError::Validation("Comment cannot be empty".into()));
        }
        let payload = self.request(
            &format!("/posts/{post_id}/comments"),
            Method::POST,
            Body::Json(json!({ "content": content })),
            true,
        )?;
        Ok(payload.decode().ok())
    }

    pub fn delete_comment(&self, comment_id: i64) -> Result<(), ApiError> {
        self.request(
            &format!("/posts/comments/{comment_id}"),
            Method::DELETE,
            Body::Empty,
            true,
        )?;
        Ok(())
    }

    pub fn base_url(&self) -> &str {
        self.base_url.as_str()
    }
}

/// Public link to a post on the web front end.
pub fn share_link(base_url: &str, post_id: i64) -> String {
    format!("{}/posts.html#{}", base_url.trim().trim_end_matches('/'), post_id)
}

fn required_post_fields<'a>(title: &'a str, content: &'a str) -> Result<(&'a str, &'a str), ApiError> {
    let title = title.trim();
    let content = content.trim();
    if title.is_empty() || content.is_empty() {
        return Err(ApiError::Validation("Title & content required".into()));
    }
    Ok((title, content))
}

fn login_result(payload: Payload) -> Result<LoginResult, ApiError> {
    let response: AuthResponse = match payload {
        Payload::Json(value) => serde_json::from_value(value).unwrap_or_default(),
        _ => AuthResponse::default(),
    };
    let token = response
        .access_token
        .or(response.token)
        .or(response.jwt)
        .filter(|t| !t.trim().is_empty())
        .ok_or_else(|| ApiError::Decode("No token returned.".into()))?;
    Ok(LoginResult {
        token,
        refresh_token: response.refresh_token.filter(|t| !t.is_empty()),
        username: response.username.filter(|u| !u.is_empty()),
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginResult {
    pub token: String,
    pub refresh_token: Option<String>,
    pub username: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AuthResponse {
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    jwt: Option<String>,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    username: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Registration {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub username: String,
    pub email: String,
    pub password: String,
}

impl Registration {
    fn trimmed(&self) -> Registration {
        Registration {
            name: self
                .name
                .as_deref()
                .map(str::trim)
                .filter(|n| !n.is_empty())
                .map(str::to_string),
            username: self.username.trim().to_string(),
            email: self.email.trim().to_string(),
            password: self.password.trim().to_string(),
        }
    }
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Post {
    pub id: i64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub title: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub content: String,
    #[serde(default)]
    pub author_username: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub likes: i64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub comments: i64,
    #[serde(default)]
    pub image_data: Option<String>,
}

impl Post {
    pub fn author(&self) -> &str {
        self.author_username
            .as_deref()
            .filter(|a| !a.is_empty())
            .unwrap_or("Unknown")
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    pub id: i64,
    #[serde(default)]
    pub post_id: Option<i64>,
    #[serde(default)]
    pub author_username: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub content: String,
    #[serde(default)]
    pub created_at: Option<String>,
}

impl Comment {
    pub fn author(&self) -> &str {
        self.author_username
            .as_deref()
            .filter(|a| !a.is_empty())
            .unwrap_or("Unknown")
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: u32,
    pub size: u32,
    pub total_pages: Option<u32>,
    pub total_elements: Option<u64>,
    pub last: bool,
}

impl<T> Page<T> {
    pub fn empty(page: u32, size: u32) -> Self {
        Self {
            items: Vec::new(),
            page,
            size,
            total_pages: None,
            total_elements: None,
            last: true,
        }
    }
}

/// The two shapes `GET /posts` is known to return.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum PageShape<T> {
    List(Vec<T>),
    Paged(PagedBody<T>),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PagedBody<T> {
    #[serde(default = "Vec::new")]
    content: Vec<T>,
    #[serde(default)]
    number: Option<u32>,
    #[serde(default)]
    size: Option<u32>,
    #[serde(default)]
    total_pages: Option<u32>,
    #[serde(default)]
    total_elements: Option<u64>,
    #[serde(default)]
    last: Option<bool>,
}

impl<T> PageShape<T> {
    fn normalize(self, requested_page: u32, requested_size: u32) -> Page<T> {
        match self {
            PageShape::List(items) => {
                let last = items.len() < requested_size as usize;
                Page {
                    items,
                    page: requested_page,
                    size: requested_size,
                    total_pages: None,
                    total_elements: None,
                    last,
                }
            }
            PageShape::Paged(body) => {
                let page = body.number.unwrap_or(requested_page);
                let size = body.size.filter(|s| *s > 0).unwrap_or(requested_size);
                let last = body.last.unwrap_or_else(|| match body.total_pages {
                    Some(total) => page.saturating_add(1) >= total,
                    None => body.content.len() < size as usize,
                });
                Page {
                    items: body.content,
                    page,
                    size,
                    total_pages: body.total_pages,
                    total_elements: body.total_elements,
                    last,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_page(body: &str, page: u32, size: u32) -> Page<Post> {
        let shape: PageShape<Post> = Payload::parse(body).decode().unwrap();
        shape.normalize(page, size)
    }

    #[test]
    fn payload_keeps_non_json_as_text() {
        assert_eq!(
            Payload::parse("<html>Bad Gateway</html>"),
            Payload::Text("<html>Bad Gateway</html>".into())
        );
        assert_eq!(Payload::parse("  \n"), Payload::Empty);
        assert!(matches!(Payload::parse("{\"a\":1}"), Payload::Json(_)));
    }

    #[test]
    fn error_message_prefers_message_then_error() {
        let both = Payload::parse(r#"{"message":"nope","error":"Bad Request"}"#);
        assert_eq!(both.error_message().as_deref(), Some("nope"));
        let error_only = Payload::parse(r#"{"error":"Validation failed"}"#);
        assert_eq!(error_only.error_message().as_deref(), Some("Validation failed"));
        assert_eq!(Payload::parse("oops").error_message(), None);
        assert_eq!(Payload::parse(r#"{"message":""}"#).error_message(), None);
    }

    #[test]
    fn decodes_spring_page() {
        let page = decode_page(
            r#"{"content":[{"id":1,"title":"a","content":"b","authorUsername":"alice","likes":3,"comments":null}],
                "number":2,"size":5,"totalPages":3,"totalElements":11,"last":true}"#,
            0,
            20,
        );
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].likes, 3);
        assert_eq!(page.items[0].comments, 0);
        assert_eq!(page.page, 2);
        assert_eq!(page.size, 5);
        assert_eq!(page.total_elements, Some(11));
        assert!(page.last);
    }

    #[test]
    fn decodes_raw_array() {
        let page = decode_page(r#"[{"id":7,"title":"t","content":"c"}]"#, 1, 20);
        assert_eq!(page.items[0].id, 7);
        assert_eq!(page.items[0].author(), "Unknown");
        assert_eq!(page.page, 1);
        assert!(page.last);

        let full = decode_page(r#"[{"id":1},{"id":2}]"#, 0, 2);
        assert!(!full.last);
    }

    #[test]
    fn page_without_last_uses_total_pages() {
        let page = decode_page(r#"{"content":[],"number":0,"totalPages":4}"#, 0, 10);
        assert!(!page.last);
        let empty = decode_page(r#"{}"#, 3, 10);
        assert!(empty.items.is_empty());
        assert_eq!(empty.page, 3);
        assert!(empty.last);
    }

    #[test]
    fn max_page_number_does_not_overflow() {
        let page = decode_page(
            r#"{"content":[],"number":4294967295,"totalPages":4294967295}"#,
            0,
            10,
        );
        assert_eq!(page.page, u32::MAX);
        assert!(page.last);
    }

    #[test]
    fn login_result_accepts_any_token_field() {
        let from_jwt = login_result(Payload::parse(r#"{"jwt":"x.y.z"}"#)).unwrap();
        assert_eq!(from_jwt.token, "x.y.z");
        let from_access =
            login_result(Payload::parse(r#"{"accessToken":"a","token":"b","refreshToken":"r"}"#))
                .unwrap();
        assert_eq!(from_access.token, "a");
        assert_eq!(from_access.refresh_token.as_deref(), Some("r"));
        assert_eq!(
            login_result(Payload::parse("welcome")).unwrap_err(),
            ApiError::Decode("No token returned.".into())
        );
    }

    #[test]
    fn share_link_uses_origin() {
        assert_eq!(
            share_link("http://localhost:8080/", 42),
            "http://localhost:8080/posts.html#42"
        );
    }

    #[test]
    fn registration_omits_blank_name() {
        let form = Registration {
            name: Some("  ".into()),
            username: " bob ".into(),
            email: "b@x.io".into(),
            password: "pw".into(),
        };
        let value = serde_json::to_value(form.trimmed()).unwrap();
        assert!(value.get("name").is_none());
        assert_eq!(value["username"], "bob");
    }
}
