use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use parking_lot::Mutex;

use crate::api::{self, ApiError, Comment, ImageUpload, LoginResult, Page, Post, Registration};

pub trait FeedService: Send + Sync {
    fn list_posts(&self, page: u32, size: u32) -> Result<Page<Post>>;
    fn get_post(&self, id: i64) -> Result<Post>;
}

pub trait CommentService: Send + Sync {
    fn list_comments(&self, post_id: i64) -> Result<Vec<Comment>>;
    fn add_comment(&self, post_id: i64, content: &str) -> Result<Option<Comment>>;
    fn delete_comment(&self, comment_id: i64) -> Result<()>;
}

pub trait InteractionService: Send + Sync {
    fn like(&self, post_id: i64) -> Result<()>;
    fn create_post(&self, title: &str, content: &str, image: Option<ImageUpload>)
        -> Result<Option<Post>>;
    fn update_post(&self, id: i64, title: &str, content: &str) -> Result<Option<Post>>;
    fn delete_post(&self, id: i64) -> Result<()>;
}

pub trait AccountService: Send + Sync {
    fn login(&self, username: &str, password: &str) -> Result<LoginResult>;
    fn register(&self, form: &Registration) -> Result<()>;
}

/// Every service backed by the REST client.
pub struct ApiServices {
    client: Arc<api::Client>,
}

impl ApiServices {
    pub fn new(client: Arc<api::Client>) -> Self {
        Self { client }
    }
}

impl FeedService for ApiServices {
    fn list_posts(&self, page: u32, size: u32) -> Result<Page<Post>> {
        Ok(self.client.list_posts(page, size)?)
    }

    fn get_post(&self, id: i64) -> Result<Post> {
        Ok(self.client.get_post(id)?)
    }
}

impl CommentService for ApiServices {
    fn list_comments(&self, post_id: i64) -> Result<Vec<Comment>> {
        Ok(self.client.list_comments(post_id)?)
    }

    fn add_comment(&self, post_id: i64, content: &str) -> Result<Option<Comment>> {
        Ok(self.client.add_comment(post_id, content)?)
    }

    fn delete_comment(&self, comment_id: i64) -> Result<()> {
        Ok(self.client.delete_comment(comment_id)?)
    }
}

impl InteractionService for ApiServices {
    fn like(&self, post_id: i64) -> Result<()> {
        Ok(self.client.like_post(post_id)?)
    }

    fn create_post(
        &self,
        title: &str,
        content: &str,
        image: Option<ImageUpload>,
    ) -> Result<Option<Post>> {
        Ok(self.client.create_post(title, content, image)?)
    }

    fn update_post(&self, id: i64, title: &str, content: &str) -> Result<Option<Post>> {
        Ok(self.client.update_post(id, title, content)?)
    }

    fn delete_post(&self, id: i64) -> Result<()> {
        Ok(self.client.delete_post(id)?)
    }
}

impl AccountService for ApiServices {
    fn login(&self, username: &str, password: &str) -> Result<LoginResult> {
        Ok(self.client.login(username, password)?)
    }

    fn register(&self, form: &Registration) -> Result<()> {
        Ok(self.client.register(form)?)
    }
}

/// The concrete handles the controller talks to.
#[derive(Clone)]
pub struct Services {
    pub feed: Arc<dyn FeedService>,
    pub comments: Arc<dyn CommentService>,
    pub interactions: Arc<dyn InteractionService>,
    pub accounts: Arc<dyn AccountService>,
}

impl Services {
    pub fn from_client(client: Arc<api::Client>) -> Self {
        let services = Arc::new(ApiServices::new(client));
        Self {
            feed: services.clone(),
            comments: services.clone(),
            interactions: services.clone(),
            accounts: services,
        }
    }

    pub fn from_mock(mock: Arc<MockBackend>) -> Self {
        Self {
            feed: mock.clone(),
            comments: mock.clone(),
            interactions: mock.clone(),
            accounts: mock,
        }
    }
}

/// In-memory backend for offline runs and tests. Operations can be made to
/// fail with [`MockBackend::fail_next`].
#[derive(Default)]
pub struct MockBackend {
    state: Mutex<MockState>,
}

#[derive(Default)]
struct MockState {
    posts: Vec<Post>,
    comments: HashMap<i64, Vec<Comment>>,
    next_id: i64,
    failures: HashMap<&'static str, ApiError>,
    calls: Vec<String>,
    token: Option<String>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_posts(posts: Vec<Post>) -> Self {
        let next_id = posts.iter().map(|p| p.id).max().unwrap_or(0) + 1;
        Self {
            state: Mutex::new(MockState {
                posts,
                next_id,
                ..Default::default()
            }),
        }
    }

    pub fn add_comment_as(&self, post_id: i64, author: &str, content: &str) -> i64 {
        let mut state = self.state.lock();
        state.next_id += 1;
        let id = state.next_id;
        state.comments.entry(post_id).or_default().push(Comment {
            id,
            post_id: Some(post_id),
            author_username: Some(author.to_string()),
            content: content.to_string(),
            created_at: None,
        });
        if let Some(post) = state.posts.iter_mut().find(|p| p.id == post_id) {
            post.comments += 1;
        }
        id
    }

    /// Makes the next call of `operation` fail with `error`.
    pub fn fail_next(&self, operation: &'static str, error: ApiError) {
        self.state.lock().failures.insert(operation, error);
    }

    pub fn set_login_token(&self, token: &str) {
        self.state.lock().token = Some(token.to_string());
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().calls.clone()
    }

    pub fn post(&self, id: i64) -> Option<Post> {
        self.state.lock().posts.iter().find(|p| p.id == id).cloned()
    }

    fn enter(&self, operation: &'static str, detail: String) -> Result<parking_lot::MutexGuard<'_, MockState>> {
        let mut state = self.state.lock();
        state.calls.push(detail);
        if let Some(err) = state.failures.remove(operation) {
            return Err(err.into());
        }
        Ok(state)
    }
}

impl FeedService for MockBackend {
    fn list_posts(&self, page: u32, size: u32) -> Result<Page<Post>> {
        let state = self.enter("list_posts", format!("GET /posts?page={page}&size={size}"))?;
        let size = size.max(1) as usize;
        let start = page as usize * size;
        let items: Vec<Post> = state.posts.iter().skip(start).take(size).cloned().collect();
        let last = start + items.len() >= state.posts.len();
        Ok(Page {
            items,
            page,
            size: size as u32,
            total_pages: None,
            total_elements: Some(state.posts.len() as u64),
            last,
        })
    }

    fn get_post(&self, id: i64) -> Result<Post> {
        let state = self.enter("get_post", format!("GET /posts/{id}"))?;
        state
            .posts
            .iter()
            .find(|p| p.id == id)
            .cloned()
            .ok_or_else(|| ApiError::NotFound("Post not found".into()).into())
    }
}

impl CommentService for MockBackend {
    fn list_comments(&self, post_id: i64) -> Result<Vec<Comment>> {
        let state = self.enter("list_comments", format!("GET /posts/{post_id}/comments"))?;
        Ok(state.comments.get(&post_id).cloned().unwrap_or_default())
    }

    fn add_comment(&self, post_id: i64, content: &str) -> Result<Option<Comment>> {
        let mut state = self.enter("add_comment", format!("POST /posts/{post_id}/comments"))?;
        state.next_id += 1;
        let comment = Comment {
            id: state.next_id,
            post_id: Some(post_id),
            author_username: Some("mock".into()),
            content: content.trim().to_string(),
            created_at: None,
        };
        state.comments.entry(post_id).or_default().push(comment.clone());
        if let Some(post) = state.posts.iter_mut().find(|p| p.id == post_id) {
            post.comments += 1;
        }
        Ok(Some(comment))
    }

    fn delete_comment(&self, comment_id: i64) -> Result<()> {
        let mut state = self.enter("delete_comment", format!("DELETE /posts/comments/{comment_id}"))?;
        let mut owner = None;
        for (post_id, list) in state.comments.iter_mut() {
            let before = list.len();
            list.retain(|c| c.id != comment_id);
            if list.len() != before {
                owner = Some(*post_id);
            }
        }
        let post_id = owner.ok_or_else(|| ApiError::NotFound("Comment not found".into()))?;
        if let Some(post) = state.posts.iter_mut().find(|p| p.id == post_id) {
            post.comments = (post.comments - 1).max(0);
        }
        Ok(())
    }
}

impl InteractionService for MockBackend {
    fn like(&self, post_id: i64) -> Result<()> {
        let mut state = self.enter("like", format!("POST /posts/{post_id}/like"))?;
        let post = state
            .posts
            .iter_mut()
            .find(|p| p.id == post_id)
            .ok_or_else(|| ApiError::NotFound("Post not found".into()))?;
        post.likes += 1;
        Ok(())
    }

    fn create_post(
        &self,
        title: &str,
        content: &str,
        image: Option<ImageUpload>,
    ) -> Result<Option<Post>> {
        let mut state = self.enter("create_post", "POST /posts".to_string())?;
        state.next_id += 1;
        let post = Post {
            id: state.next_id,
            title: title.trim().to_string(),
            content: content.trim().to_string(),
            author_username: Some("mock".into()),
            image_data: image.map(|img| {
                use base64::Engine;
                base64::engine::general_purpose::STANDARD.encode(img.bytes)
            }),
            ..Default::default()
        };
        state.posts.insert(0, post.clone());
        Ok(Some(post))
    }

    fn update_post(&self, id: i64, title: &str, content: &str) -> Result<Option<Post>> {
        let mut state = self.enter("update_post", format!("PUT /posts/{id}"))?;
        let post = state
            .posts
            .iter_mut()
            .find(|p| p.id == id)
            .ok_or_else(|| ApiError::NotFound("Post not found".into()))?;
        post.title = title.trim().to_string();
        post.content = content.trim().to_string();
        Ok(Some(post.clone()))
    }

    fn delete_post(&self, id: i64) -> Result<()> {
        let mut state = self.enter("delete_post", format!("DELETE /posts/{id}"))?;
        let before = state.posts.len();
        state.posts.retain(|p| p.id != id);
        if state.posts.len() == before {
            return Err(ApiError::NotFound("Post not found".into()).into());
        }
        state.comments.remove(&id);
        Ok(())
    }
}

impl AccountService for MockBackend {
    fn login(&self, username: &str, password: &str) -> Result<LoginResult> {
        if username.trim().is_empty() || password.trim().is_empty() {
            return Err(ApiError::Validation("Enter username & password".into()).into());
        }
        let state = self.enter("login", "POST /auth/login".to_string())?;
        let token = state
            .token
            .clone()
            .ok_or_else(|| ApiError::Decode("No token returned.".into()))?;
        Ok(LoginResult {
            token,
            refresh_token: None,
            username: Some(username.trim().to_string()),
        })
    }

    fn register(&self, form: &Registration) -> Result<()> {
        if form.username.trim().is_empty()
            || form.email.trim().is_empty()
            || form.password.trim().is_empty()
        {
            return Err(
                ApiError::Validation("Username, email and password are required.".into()).into(),
            );
        }
        self.enter("register", "POST /auth/register".to_string())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn post(id: i64, author: &str) -> Post {
        Post {
            id,
            title: format!("post {id}"),
            content: "body".into(),
            author_username: Some(author.into()),
            ..Default::default()
        }
    }

    #[test]
    fn mock_pages_posts() {
        let mock = MockBackend::with_posts((1..=5).map(|id| post(id, "alice")).collect());
        let first = mock.list_posts(0, 2).unwrap();
        assert_eq!(first.items.iter().map(|p| p.id).collect::<Vec<_>>(), vec![1, 2]);
        assert!(!first.last);
        let last = mock.list_posts(2, 2).unwrap();
        assert_eq!(last.items.len(), 1);
        assert!(last.last);
    }

    #[test]
    fn mock_failure_is_one_shot() {
        let mock = MockBackend::with_posts(vec![post(1, "alice")]);
        mock.fail_next("like", ApiError::Forbidden("nope".into()));
        let err = mock.like(1).unwrap_err();
        assert_eq!(
            err.downcast_ref::<ApiError>(),
            Some(&ApiError::Forbidden("nope".into()))
        );
        mock.like(1).unwrap();
        assert_eq!(mock.post(1).unwrap().likes, 1);
        assert_eq!(mock.calls().len(), 2);
    }

    #[test]
    fn deleting_comment_updates_counter() {
        let mock = MockBackend::with_posts(vec![post(1, "alice")]);
        let id = mock.add_comment_as(1, "bob", "hi");
        assert_eq!(mock.post(1).unwrap().comments, 1);
        mock.delete_comment(id).unwrap();
        assert_eq!(mock.post(1).unwrap().comments, 0);
        let err = mock.delete_comment(id).unwrap_err();
        assert!(matches!(err.downcast_ref::<ApiError>(), Some(ApiError::NotFound(_))));
    }
}
