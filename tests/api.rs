//! HTTP API tests. Each test drives the router in-process against its own
//! temp data directory.

use std::sync::Arc;

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Method, Request, StatusCode, header};
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;

use trove::config::Config;
use trove::server::{AppState, create_router};

const BOUNDARY: &str = "trove-test-boundary";

const STL: &[u8] = b"solid ring
  facet normal 0 0 1
    outer loop
      vertex 0 0 0
      vertex 2 0 0
      vertex 0 1 0
    endloop
  endfacet
endsolid ring
";

const CONFIG: &str = r#"
[server]
max_upload_bytes = 4096

[[identity.tokens]]
token = "alice-token"
sub = "alice"
institution_id = "X"
roles = ["consortium_member"]
scope = "assets:read assets:write"

[[identity.tokens]]
token = "bob-token"
sub = "bob"
institution_id = "X"
scope = "assets:read"

[[identity.tokens]]
token = "carol-token"
sub = "carol"
institution_id = "Y"
scope = "assets:read assets:write"
"#;

struct TestApp {
    _temp_dir: TempDir,
    router: Router,
}

impl TestApp {
    fn new() -> Self {
        let temp_dir = TempDir::new().expect("create temp dir");
        let mut config = Config::from_toml(CONFIG).expect("parse config");
        config.server.data_dir = temp_dir.path().to_path_buf();

        let state = AppState::open(&config).expect("open state");
        Self {
            router: create_router(Arc::new(state)),
            _temp_dir: temp_dir,
        }
    }

    async fn send(&self, request: Request<Body>) -> (StatusCode, axum::http::HeaderMap, Vec<u8>) {
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("send request");
        let status = response.status();
        let headers = response.headers().clone();
        let body = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("read body");
        (status, headers, body.to_vec())
    }

    async fn json(&self, request: Request<Body>) -> (StatusCode, Value) {
        let (status, _, body) = self.send(request).await;
        let value = if body.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&body).expect("parse JSON body")
        };
        (status, value)
    }

    async fn get(&self, uri: &str, token: Option<&str>) -> (StatusCode, Value) {
        self.json(request(Method::GET, uri, token).body(Body::empty()).unwrap())
            .await
    }

    async fn send_json(
        &self,
        method: Method,
        uri: &str,
        token: &str,
        body: Value,
    ) -> (StatusCode, Value) {
        let request = request(method, uri, Some(token))
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        self.json(request).await
    }

    async fn upload(
        &self,
        method: Method,
        uri: &str,
        token: &str,
        fields: &[(&str, &str)],
        file: (&str, &[u8]),
    ) -> (StatusCode, Value) {
        let request = request(method, uri, Some(token))
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(multipart_body(fields, file)))
            .unwrap();
        self.json(request).await
    }

    async fn create(&self, token: &str, fields: &[(&str, &str)]) -> Value {
        let (status, body) = self
            .upload(Method::POST, "/api/v1/assets", token, fields, ("ring.stl", STL))
            .await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        body["data"].clone()
    }
}

fn request(method: Method, uri: &str, token: Option<&str>) -> axum::http::request::Builder {
    let builder = Request::builder().method(method).uri(uri);
    match token {
        Some(token) => builder.header(header::AUTHORIZATION, format!("Bearer {token}")),
        None => builder,
    }
}

fn multipart_body(fields: &[(&str, &str)], (file_name, data): (&str, &[u8])) -> Vec<u8> {
    let mut body = Vec::new();
    for (name, value) in fields {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
            )
            .as_bytes(),
        );
    }
    body.extend_from_slice(
        format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{file_name}\"\r\nContent-Type: application/octet-stream\r\n\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(data);
    body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());
    body
}

fn id_of(asset: &Value) -> String {
    asset["id"].as_str().expect("asset id").to_string()
}

#[tokio::test]
async fn test_health() {
    let app = TestApp::new();
    let (status, body) = app.get("/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["database"], "sqlite");
}

#[tokio::test]
async fn test_metrics() {
    let app = TestApp::new();
    let asset = app.create("alice-token", &[("name", "Ring")]).await;
    let id = id_of(&asset);
    app.get(&format!("/api/v1/assets/{id}"), Some("alice-token")).await;
    app.get("/api/v1/assets/missing", Some("alice-token")).await;

    let (status, body) = app.get("/metrics", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total_requests"], 3);
    assert_eq!(body["total_errors"], 1);
    assert_eq!(body["requests_by_endpoint"]["POST /api/v1/assets"], 1);
    assert_eq!(body["requests_by_endpoint"]["GET /api/v1/assets/{id}"], 2);
    assert_eq!(body["errors_by_endpoint"]["GET /api/v1/assets/{id}"], 1);
    assert_eq!(body["status_code_counts"]["404"], 1);
    assert_eq!(body["storage"]["total_assets"], 1);
    assert_eq!(body["storage"]["total_storage_bytes"], STL.len());

    let (status, headers, text) = app
        .send(Request::get("/metrics/prometheus").body(Body::empty()).unwrap())
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(
        headers[header::CONTENT_TYPE]
            .to_str()
            .unwrap()
            .starts_with("text/plain")
    );
    let text = String::from_utf8(text).unwrap();
    assert!(text.contains("trove_assets_total 1"));
    assert!(text.contains("route=\"/api/v1/assets/{id}\""));

    // Scrapes are not counted as traffic.
    let (_, body) = app.get("/metrics", None).await;
    assert_eq!(body["total_requests"], 3);
}

#[tokio::test]
async fn test_create_asset() {
    let app = TestApp::new();
    let asset = app
        .create(
            "alice-token",
            &[("name", "Ring"), ("tags", "UC2,molecule"), ("license", "CC-BY-4.0")],
        )
        .await;

    assert_eq!(asset["name"], "Ring");
    assert_eq!(asset["format"], "stl");
    assert_eq!(asset["version"], 1);
    assert_eq!(asset["tri_count"], 1);
    assert_eq!(asset["owner_id"], "alice");
    assert_eq!(asset["owner_institution"], "X");
    assert_eq!(asset["access_level"], "private");
    assert_eq!(asset["license"], "CC-BY-4.0");
    assert_eq!(asset["tags"], serde_json::json!(["UC2", "molecule"]));
}

#[tokio::test]
async fn test_authentication_and_scopes() {
    let app = TestApp::new();

    let (status, headers, _) = app
        .send(
            request(Method::GET, "/api/v1/assets/anything", None)
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(headers.contains_key(header::WWW_AUTHENTICATE));

    let (status, _) = app.get("/api/v1/assets/anything", Some("wrong-token")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = app
        .upload(Method::POST, "/api/v1/assets", "bob-token", &[], ("ring.stl", STL))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert!(body["error"].as_str().unwrap().contains("assets:write"));
}

#[tokio::test]
async fn test_institution_access() {
    let app = TestApp::new();
    let asset = app
        .create("alice-token", &[("name", "Ring"), ("accessLevel", "institution")])
        .await;
    let uri = format!("/api/v1/assets/{}", id_of(&asset));

    let (status, _) = app.get(&uri, Some("bob-token")).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = app.get(&uri, Some("carol-token")).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["details"]["code"], "insufficient_access");
    assert_eq!(body["details"]["required_institution"], "X");
    assert_eq!(body["details"]["user_institution"], "Y");

    let (status, _) = app.get("/api/v1/assets/missing", Some("bob-token")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_embargo() {
    let app = TestApp::new();
    let asset = app
        .create(
            "alice-token",
            &[
                ("name", "Ring"),
                ("accessLevel", "public"),
                ("embargoUntil", "2999-01-01T00:00:00Z"),
            ],
        )
        .await;
    let uri = format!("/api/v1/assets/{}", id_of(&asset));

    let (status, _) = app.get(&uri, Some("alice-token")).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = app.get(&uri, Some("carol-token")).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["details"]["code"], "embargoed");
}

#[tokio::test]
async fn test_versions_and_downloads() {
    let app = TestApp::new();
    let asset = app.create("alice-token", &[("name", "Ring")]).await;
    let id = id_of(&asset);

    let (status, body) = app
        .upload(
            Method::PUT,
            &format!("/api/v1/assets/{id}/file"),
            "alice-token",
            &[("changes", "Smoother edges")],
            ("ring.stl", b"solid v2"),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    assert_eq!(body["data"]["version_number"], 2);
    assert_eq!(body["data"]["changes"], "Smoother edges");

    let (status, body) = app
        .get(&format!("/api/v1/assets/{id}/versions"), Some("alice-token"))
        .await;
    assert_eq!(status, StatusCode::OK);
    let numbers: Vec<i64> = body["data"]
        .as_array()
        .unwrap()
        .iter()
        .map(|v| v["version_number"].as_i64().unwrap())
        .collect();
    assert_eq!(numbers, vec![2, 1]);

    let (status, headers, content) = app
        .send(
            request(Method::GET, &format!("/api/v1/assets/{id}/file"), Some("alice-token"))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(content, b"solid v2");
    assert_eq!(headers[header::CONTENT_TYPE], "model/stl");
    assert_eq!(headers["x-asset-version"], "2");
    assert!(
        headers[header::CONTENT_DISPOSITION]
            .to_str()
            .unwrap()
            .contains("Ring.stl")
    );

    let (status, _, content) = app
        .send(
            request(
                Method::GET,
                &format!("/api/v1/assets/{id}/versions/1/file"),
                Some("alice-token"),
            )
            .body(Body::empty())
            .unwrap(),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(content, STL);

    let (status, _) = app
        .upload(
            Method::PUT,
            &format!("/api/v1/assets/{id}/file"),
            "carol-token",
            &[],
            ("ring.stl", b"not mine"),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_payload_limit() {
    let app = TestApp::new();
    let big = vec![b'x'; 5000];
    let (status, _) = app
        .upload(Method::POST, "/api/v1/assets", "alice-token", &[("name", "Big")], ("big.stl", &big))
        .await;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
}

#[tokio::test]
async fn test_search() {
    let app = TestApp::new();
    app.create("alice-token", &[("name", "Public ring"), ("accessLevel", "public"), ("tags", "UC2")])
        .await;
    app.create("alice-token", &[("name", "Secret ring")]).await;
    app.create("alice-token", &[("name", "Shared cube"), ("accessLevel", "consortium")])
        .await;

    let (status, body) = app.get("/api/v1/assets", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["total"], 0);

    let (_, body) = app.get("/api/v1/assets", Some("alice-token")).await;
    assert_eq!(body["data"]["total"], 3);

    let (_, body) = app.get("/api/v1/assets", Some("carol-token")).await;
    assert_eq!(body["data"]["total"], 1);
    assert_eq!(body["data"]["items"][0]["name"], "Public ring");

    let (_, body) = app
        .get("/api/v1/assets?q=RING&size=1&page=2", Some("alice-token"))
        .await;
    assert_eq!(body["data"]["total"], 2);
    assert_eq!(body["data"]["pages"], 2);
    assert_eq!(body["data"]["items"].as_array().unwrap().len(), 1);

    let (_, body) = app.get("/api/v1/assets?tags=UC2", Some("alice-token")).await;
    assert_eq!(body["data"]["total"], 1);

    let (status, _) = app.get("/api/v1/assets?size=500", Some("alice-token")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_update_and_delete() {
    let app = TestApp::new();
    let asset = app.create("alice-token", &[("name", "Ring")]).await;
    let uri = format!("/api/v1/assets/{}", id_of(&asset));

    let (status, body) = app
        .send_json(
            Method::PATCH,
            &uri,
            "alice-token",
            serde_json::json!({ "description": "A small ring" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["name"], "Ring");
    assert_eq!(body["data"]["description"], "A small ring");

    let (status, _) = app
        .send_json(Method::PATCH, &uri, "carol-token", serde_json::json!({ "name": "Mine" }))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = app
        .json(request(Method::DELETE, &uri, Some("alice-token")).body(Body::empty()).unwrap())
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = app.get(&uri, Some("alice-token")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_tag_usage_follows_assets() {
    let app = TestApp::new();
    let d = app
        .create("alice-token", &[("name", "D"), ("tags", r#"["UC2", "molecule"]"#)])
        .await;
    let e = app.create("alice-token", &[("name", "E"), ("tags", "UC2")]).await;

    let (_, body) = app.get("/api/v1/tags/popular", Some("bob-token")).await;
    assert_eq!(body["data"][0]["name"], "UC2");
    assert_eq!(body["data"][0]["usage_count"], 2);
    assert_eq!(body["data"][0]["category"], "use_case");

    let (status, _) = app
        .json(
            request(
                Method::DELETE,
                &format!("/api/v1/assets/{}", id_of(&d)),
                Some("alice-token"),
            )
            .body(Body::empty())
            .unwrap(),
        )
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (_, body) = app.get("/api/v1/tags", Some("bob-token")).await;
    let counts: Vec<(String, i64)> = body["data"]
        .as_array()
        .unwrap()
        .iter()
        .map(|t| {
            (
                t["name"].as_str().unwrap().to_string(),
                t["usage_count"].as_i64().unwrap(),
            )
        })
        .collect();
    assert_eq!(
        counts,
        vec![("UC2".to_string(), 1), ("molecule".to_string(), 0)]
    );

    let (status, body) = app
        .send_json(
            Method::PUT,
            &format!("/api/v1/assets/{}/tags", id_of(&e)),
            "alice-token",
            serde_json::json!({ "tags": ["helsinki"] }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["tags"], serde_json::json!(["helsinki"]));

    let (_, body) = app.get("/api/v1/tags/search?q=hel", Some("bob-token")).await;
    assert_eq!(body["data"][0]["category"], "geographic");

    let (_, body) = app.get("/api/v1/tags/categories", Some("bob-token")).await;
    assert_eq!(body["data"].as_array().unwrap().len(), 6);

    let (status, _) = app.get("/api/v1/tags?category=bogus", Some("bob-token")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}
