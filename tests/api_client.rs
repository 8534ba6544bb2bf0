use std::io::Read;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver};
use posts_tui::api::{self, ApiError, ImageUpload};
use posts_tui::session::Session;
use posts_tui::storage::{self, Store, ACCESS_TOKEN_KEY};
use tempfile::TempDir;
use tiny_http::{Header, Response, Server};

struct Recorded {
    method: String,
    url: String,
    authorization: Option<String>,
    content_type: Option<String>,
    body: String,
}

struct Backend {
    base_url: String,
    requests: Receiver<Recorded>,
}

impl Backend {
    fn next(&self) -> Recorded {
        self.requests
            .recv_timeout(Duration::from_secs(5))
            .expect("request reached the fake backend")
    }
}

/// Serves the scripted `(status, body)` pairs in order, one per request.
fn serve(script: Vec<(u16, &'static str)>) -> Backend {
    let server = Server::http("127.0.0.1:0").expect("bind fake backend");
    let base_url = format!("http://{}", server.server_addr());
    let (tx, rx) = unbounded();
    thread::spawn(move || {
        for (status, body) in script {
            let Ok(mut req) = server.recv() else {
                return;
            };
            let header = |name: &'static str| {
                req.headers()
                    .iter()
                    .find(|h| h.field.equiv(name))
                    .map(|h| h.value.as_str().to_string())
            };
            let authorization = header("Authorization");
            let content_type = header("Content-Type");
            let mut buf = Vec::new();
            let _ = req.as_reader().read_to_end(&mut buf);
            let _ = tx.send(Recorded {
                method: req.method().to_string(),
                url: req.url().to_string(),
                authorization,
                content_type,
                body: String::from_utf8_lossy(&buf).into_owned(),
            });
            let mut response = Response::from_string(body).with_status_code(status);
            if body.starts_with('{') || body.starts_with('[') {
                response = response.with_header(
                    Header::from_bytes(&b"Content-Type"[..], &b"application/json"[..])
                        .expect("valid header"),
                );
            }
            let _ = req.respond(response);
        }
    });
    Backend {
        base_url,
        requests: rx,
    }
}

struct Fixture {
    _dir: TempDir,
    store: Arc<Store>,
    session: Arc<Session>,
    client: api::Client,
}

fn fixture(backend: &Backend) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(
        Store::open(storage::Options {
            path: Some(dir.path().join("state.db")),
        })
        .unwrap(),
    );
    let session = Arc::new(Session::new(store.clone()).unwrap());
    let client = api::Client::new(
        session.clone(),
        api::ClientConfig {
            base_url: backend.base_url.clone(),
            user_agent: "posts-tui-tests".into(),
            timeout: Some(Duration::from_secs(5)),
            http_client: None,
        },
    )
    .unwrap();
    Fixture {
        _dir: dir,
        store,
        session,
        client,
    }
}

#[test]
fn attaches_bearer_token() {
    let backend = serve(vec![(200, "[]")]);
    let fx = fixture(&backend);
    fx.session.save("a.b.c", None).unwrap();

    let page = fx.client.list_posts(0, 20).unwrap();
    assert!(page.items.is_empty());

    let req = backend.next();
    assert_eq!(req.method, "GET");
    assert_eq!(req.url, "/api/posts?page=0&size=20");
    assert_eq!(req.authorization.as_deref(), Some("Bearer a.b.c"));
}

#[test]
fn unauthorized_clears_session() {
    let backend = serve(vec![(401, r#"{"message":"Token expired"}"#)]);
    let fx = fixture(&backend);
    fx.session.save("a.b.c", Some("r")).unwrap();

    let err = fx.client.list_posts(0, 20).unwrap_err();
    assert_eq!(err, ApiError::SessionExpired("Token expired".into()));
    assert_eq!(fx.session.read(), None);
    assert_eq!(fx.store.get(ACCESS_TOKEN_KEY).unwrap(), None);
}

#[test]
fn forbidden_read_clears_session() {
    let backend = serve(vec![(403, "")]);
    let fx = fixture(&backend);
    fx.session.save("a.b.c", None).unwrap();

    let err = fx.client.get_post(3).unwrap_err();
    assert!(matches!(err, ApiError::SessionExpired(_)));
    assert!(!fx.session.is_authenticated());
}

#[test]
fn forbidden_delete_keeps_session() {
    let backend = serve(vec![(403, r#"{"error":"Forbidden"}"#)]);
    let fx = fixture(&backend);
    fx.session.save("a.b.c", None).unwrap();

    let err = fx.client.delete_comment(7).unwrap_err();
    assert_eq!(err, ApiError::Forbidden("Forbidden".into()));
    assert!(fx.session.is_authenticated());

    let req = backend.next();
    assert_eq!(req.method, "DELETE");
    assert_eq!(req.url, "/api/posts/comments/7");
}

#[test]
fn non_json_error_falls_back_to_status() {
    let backend = serve(vec![(502, "<html>Bad Gateway</html>")]);
    let fx = fixture(&backend);

    let err = fx.client.like_post(1).unwrap_err();
    assert_eq!(
        err,
        ApiError::Server {
            status: 502,
            message: "Status 502".into()
        }
    );
}

#[test]
fn login_persists_token() {
    let backend = serve(vec![(200, r#"{"accessToken":"abc.def.ghi"}"#)]);
    let fx = fixture(&backend);

    let result = fx.client.login(" bob ", "pw").unwrap();
    assert_eq!(result.token, "abc.def.ghi");
    assert_eq!(fx.session.read().as_deref(), Some("abc.def.ghi"));
    assert_eq!(
        fx.store.get(ACCESS_TOKEN_KEY).unwrap().as_deref(),
        Some("abc.def.ghi")
    );

    let req = backend.next();
    assert_eq!(req.url, "/api/auth/login");
    assert_eq!(req.authorization, None);
    let body: serde_json::Value = serde_json::from_str(&req.body).unwrap();
    assert_eq!(body["username"], "bob");
    assert_eq!(body["password"], "pw");
}

#[test]
fn failed_login_keeps_previous_session() {
    let backend = serve(vec![(401, r#"{"message":"Bad credentials"}"#)]);
    let fx = fixture(&backend);
    fx.session.save("old.token.here", None).unwrap();

    let err = fx.client.login("bob", "wrong").unwrap_err();
    assert_eq!(
        err,
        ApiError::Server {
            status: 401,
            message: "Bad credentials".into()
        }
    );
    assert_eq!(fx.session.read().as_deref(), Some("old.token.here"));
}

#[test]
fn login_without_token_is_an_error() {
    let backend = serve(vec![(200, r#"{"username":"bob"}"#)]);
    let fx = fixture(&backend);

    let err = fx.client.login("bob", "pw").unwrap_err();
    assert_eq!(err, ApiError::Decode("No token returned.".into()));
    assert!(!fx.session.is_authenticated());
}

#[test]
fn decodes_both_list_shapes() {
    let backend = serve(vec![
        (
            200,
            r#"{"content":[{"id":1,"title":"a","content":"b"}],"number":0,"size":1,"totalPages":2,"last":false}"#,
        ),
        (200, r#"[{"id":2,"title":"c","content":"d","likes":null}]"#),
    ]);
    let fx = fixture(&backend);

    let paged = fx.client.list_posts(0, 1).unwrap();
    assert_eq!(paged.items[0].id, 1);
    assert!(!paged.last);

    let raw = fx.client.list_posts(1, 20).unwrap();
    assert_eq!(raw.items[0].id, 2);
    assert_eq!(raw.items[0].likes, 0);
    assert!(raw.last);
}

#[test]
fn comments_fall_back_to_empty() {
    let backend = serve(vec![(200, r#"{"unexpected":true}"#)]);
    let fx = fixture(&backend);
    assert!(fx.client.list_comments(4).unwrap().is_empty());
}

#[test]
fn empty_comment_is_rejected_locally() {
    let backend = serve(vec![]);
    let fx = fixture(&backend);
    fx.session.save("a.b.c", None).unwrap();

    let err = fx.client.add_comment(1, "   ").unwrap_err();
    assert!(matches!(err, ApiError::Validation(_)));
    assert!(backend
        .requests
        .recv_timeout(Duration::from_millis(200))
        .is_err());
}

#[test]
fn image_posts_are_multipart() {
    let backend = serve(vec![(200, r#"{"id":11,"title":"t","content":"c"}"#)]);
    let fx = fixture(&backend);
    fx.session.save("a.b.c", None).unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("pixel.png");
    std::fs::write(
        &path,
        [
            0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a, 0, 0, 0, 0x0d, b'I', b'H', b'D', b'R',
        ],
    )
    .unwrap();
    let image = ImageUpload::from_path(&path).unwrap();
    assert_eq!(image.mime, "image/png");

    let created = fx.client.create_post("t", "c", Some(image)).unwrap();
    assert_eq!(created.map(|p| p.id), Some(11));

    let req = backend.next();
    assert_eq!(req.method, "POST");
    assert!(req
        .content_type
        .as_deref()
        .unwrap_or_default()
        .starts_with("multipart/form-data"));
    assert!(req.body.contains("name=\"title\""));
    assert!(req.body.contains("filename=\"pixel.png\""));
}
