//! End-to-end tests of the HTTP API.
//!
//! Each test starts the router on an ephemeral port with a temp SQLite
//! database, the filesystem object store, and in-process stub providers.

use async_trait::async_trait;
use pdfchat::auth;
use pdfchat::config::Config;
use pdfchat::duplicates;
use pdfchat::embedding::Embedder;
use pdfchat::config::ChatConfig;
use pdfchat::llm::{ChatModel, GeminiChatModel};
use pdfchat::server::{build_router, AppState};
use pdfchat::storage::FsObjectStore;
use pdfchat::{db, migrate};
use reqwest::StatusCode;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

const SECRET: &str = "test-secret";

/// Every text maps to the same direction, so every chunk matches.
struct ConstantEmbedder {
    fail: AtomicBool,
}

#[async_trait]
impl Embedder for ConstantEmbedder {
    fn model_name(&self) -> &str {
        "constant"
    }
    fn dims(&self) -> usize {
        3
    }
    async fn embed(&self, _text: &str) -> anyhow::Result<Vec<f32>> {
        if self.fail.load(Ordering::SeqCst) {
            anyhow::bail!("embedding service unavailable");
        }
        Ok(vec![1.0, 0.5, 0.25])
    }
}

/// Echoes a canned answer and remembers the last prompt.
struct StubModel {
    fail: AtomicBool,
    calls: AtomicUsize,
    last_prompt: std::sync::Mutex<String>,
}

#[async_trait]
impl ChatModel for StubModel {
    fn model_name(&self) -> &str {
        "stub"
    }
    async fn generate(&self, prompt: &str) -> anyhow::Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_prompt.lock().unwrap() = prompt.to_string();
        if self.fail.load(Ordering::SeqCst) {
            anyhow::bail!("model overloaded");
        }
        Ok("The warranty lasts two years.".to_string())
    }
}

struct TestServer {
    _tmp: TempDir,
    base: String,
    objects_root: std::path::PathBuf,
    embedder: Arc<ConstantEmbedder>,
    model: Arc<StubModel>,
    client: reqwest::Client,
}

impl TestServer {
    async fn start() -> Self {
        Self::start_with("").await
    }

    /// `extra` is appended to the config TOML, e.g. a `[limits]` table.
    async fn start_with(extra: &str) -> Self {
        Self::start_with_model(extra, None).await
    }

    /// Serve chat from `chat_model` instead of the stub.
    async fn start_with_model(extra: &str, chat_model: Option<Arc<dyn ChatModel>>) -> Self {
        let tmp = TempDir::new().unwrap();
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let objects_root = tmp.path().join("objects");

        let toml = format!(
            r#"[db]
path = "{root}/pdfchat.sqlite"

[storage]
root = "{root}/objects"
public_base_url = "http://{addr}/objects"

[server]
bind = "{addr}"
session_secret = "{secret}"
{extra}
"#,
            root = tmp.path().display(),
            addr = addr,
            secret = SECRET,
            extra = extra,
        );
        let config: Config = toml::from_str(&toml).unwrap();
        pdfchat::config::validate(&config).unwrap();

        let pool = db::connect(&config).await.unwrap();
        migrate::apply_schema(&pool).await.unwrap();

        let embedder = Arc::new(ConstantEmbedder {
            fail: AtomicBool::new(false),
        });
        let model = Arc::new(StubModel {
            fail: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
            last_prompt: std::sync::Mutex::new(String::new()),
        });
        let store = Arc::new(FsObjectStore::new(
            objects_root.clone(),
            format!("http://{}/objects", addr),
        ));

        let chat_model = chat_model.unwrap_or_else(|| model.clone() as Arc<dyn ChatModel>);
        let state = AppState::new(pool, config, embedder.clone(), chat_model, store).unwrap();
        let app = build_router(state);
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        TestServer {
            _tmp: tmp,
            base: format!("http://{}", addr),
            objects_root,
            embedder,
            model,
            client: reqwest::Client::new(),
        }
    }

    fn token(user: &str) -> String {
        auth::mint_token(SECRET, user).unwrap()
    }

    async fn get(&self, user: &str, path: &str) -> (StatusCode, Value) {
        let resp = self
            .client
            .get(format!("{}{}", self.base, path))
            .bearer_auth(Self::token(user))
            .send()
            .await
            .unwrap();
        let status = resp.status();
        (status, resp.json().await.unwrap_or(Value::Null))
    }

    async fn post(&self, user: &str, path: &str, body: Value) -> (StatusCode, Value) {
        let resp = self
            .client
            .post(format!("{}{}", self.base, path))
            .bearer_auth(Self::token(user))
            .json(&body)
            .send()
            .await
            .unwrap();
        let status = resp.status();
        (status, resp.json().await.unwrap_or(Value::Null))
    }

    /// POST `body` verbatim with the given content type.
    async fn post_raw(&self, user: &str, path: &str, content_type: &str, body: &str) -> (StatusCode, Value) {
        let resp = self
            .client
            .post(format!("{}{}", self.base, path))
            .bearer_auth(Self::token(user))
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(body.to_string())
            .send()
            .await
            .unwrap();
        let status = resp.status();
        (status, resp.json().await.unwrap_or(Value::Null))
    }

    async fn delete(&self, user: &str, path: &str) -> (StatusCode, Value) {
        let resp = self
            .client
            .delete(format!("{}{}", self.base, path))
            .bearer_auth(Self::token(user))
            .send()
            .await
            .unwrap();
        let status = resp.status();
        (status, resp.json().await.unwrap_or(Value::Null))
    }

    async fn create_workspace(&self, user: &str, name: &str) -> String {
        let (status, body) = self
            .post(user, "/api/workspaces", json!({ "name": name }))
            .await;
        assert_eq!(status, StatusCode::CREATED, "{}", body);
        body["id"].as_str().unwrap().to_string()
    }

    async fn upload(&self, user: &str, workspace_id: &str, title: &str, pages: Value) -> (StatusCode, Value) {
        self.post(
            user,
            "/api/documents",
            json!({ "workspaceId": workspace_id, "title": title, "pages": pages }),
        )
        .await
    }

    async fn upload_ok(&self, user: &str, workspace_id: &str, title: &str, pages: Value) -> String {
        let (status, body) = self.upload(user, workspace_id, title, pages).await;
        assert_eq!(status, StatusCode::CREATED, "{}", body);
        body["document"]["id"].as_str().unwrap().to_string()
    }

    fn stored_files(&self) -> usize {
        if !self.objects_root.exists() {
            return 0;
        }
        walkdir::WalkDir::new(&self.objects_root)
            .into_iter()
            .filter_map(Result::ok)
            .filter(|e| e.file_type().is_file())
            .count()
    }
}

fn warranty_pages() -> Value {
    json!([
        { "pageNumber": 1, "text": "Product manual. The warranty lasts two years from purchase." },
        { "pageNumber": 2, "text": "Returns are accepted within thirty days with a receipt." }
    ])
}

// ============ Health & identity ============

#[tokio::test]
async fn test_health() {
    let server = TestServer::start().await;
    let resp = reqwest::get(format!("{}/health", server.base)).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "ok");
    assert!(body["version"].is_string());
}

#[tokio::test]
async fn test_missing_or_forged_token_is_unauthorized() {
    let server = TestServer::start().await;

    let resp = server
        .client
        .get(format!("{}/api/workspaces", server.base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "unauthorized");

    let forged = auth::mint_token("other-secret", "alice").unwrap();
    let resp = server
        .client
        .get(format!("{}/api/workspaces", server.base))
        .bearer_auth(forged)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_malformed_json_bodies_use_error_contract() {
    let server = TestServer::start().await;
    let ws = server.create_workspace("alice", "Manuals").await;

    let (status, body) = server
        .post_raw("alice", "/api/chat", "application/json", "{not json")
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "bad_request");
    assert!(body["error"]["message"].is_string());

    let (status, body) = server
        .post_raw("alice", "/api/workspaces", "text/plain", r#"{"name":"x"}"#)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "bad_request");

    // A page without its number fails deserialization.
    let (status, body) = server
        .upload("alice", &ws, "Manual", json!([{ "text": "no number" }]))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "bad_request");
    assert!(body["error"]["message"]
        .as_str()
        .unwrap()
        .contains("pageNumber"));

    // Identity is still checked before the body is read.
    let resp = server
        .client
        .post(format!("{}/api/chat", server.base))
        .header(reqwest::header::CONTENT_TYPE, "application/json")
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

// ============ Workspaces ============

#[tokio::test]
async fn test_workspace_membership_boundaries() {
    let server = TestServer::start().await;
    let ws = server.create_workspace("alice", "Manuals").await;

    let (status, body) = server.get("alice", "/api/workspaces").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["workspaces"][0]["id"], ws.as_str());
    assert_eq!(body["workspaces"][0]["role"], "owner");
    assert_eq!(body["workspaces"][0]["plan"], "free");

    let path = format!("/api/workspaces/{}/documents", ws);
    let (status, body) = server.get("bob", &path).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"]["code"], "forbidden");
    assert_eq!(body["error"]["message"], "Access denied");

    let (status, _) = server.get("alice", "/api/workspaces/nope/documents").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    // Only the owner may add members.
    let members = format!("/api/workspaces/{}/members", ws);
    let (status, _) = server
        .post("bob", &members, json!({ "userId": "bob" }))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = server
        .post("alice", &members, json!({ "userId": "bob" }))
        .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = server.get("bob", &path).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["documents"], json!([]));
}

#[tokio::test]
async fn test_blank_workspace_name_rejected() {
    let server = TestServer::start().await;
    let (status, body) = server
        .post("alice", "/api/workspaces", json!({ "name": "   " }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "bad_request");
}

// ============ Documents ============

#[tokio::test]
async fn test_upload_stores_pages_and_serves_images() {
    use base64::Engine;
    let server = TestServer::start().await;
    let ws = server.create_workspace("alice", "Manuals").await;

    let jpeg = vec![0xFF, 0xD8, 0xFF, 0xE0, 1, 2, 3, 4];
    let encoded = base64::engine::general_purpose::STANDARD.encode(&jpeg);
    let pages = json!([
        { "pageNumber": 2, "text": "second page" },
        { "pageNumber": 1, "text": "first page", "imageBase64": format!("data:image/jpeg;base64,{}", encoded) }
    ]);
    let (status, body) = server.upload("alice", &ws, "Manual", pages).await;
    assert_eq!(status, StatusCode::CREATED, "{}", body);
    assert_eq!(body["pages"], 2);
    assert_eq!(body["document"]["status"], "ready");
    assert_eq!(body["document"]["pageCount"], 2);

    let doc_id = body["document"]["id"].as_str().unwrap().to_string();
    let (status, doc) = server.get("alice", &format!("/api/documents/{}", doc_id)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(doc["title"], "Manual");
    assert_eq!(doc["pages"][0]["pageNumber"], 1);
    assert_eq!(doc["pages"][1]["imageUrl"], Value::Null);

    let image_url = doc["pages"][0]["imageUrl"].as_str().unwrap().to_string();
    assert!(image_url.ends_with(&format!("{}/page-1.jpg", doc_id)));
    let resp = reqwest::get(&image_url).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers()["content-type"], "image/jpeg");
    assert_eq!(resp.bytes().await.unwrap().to_vec(), jpeg);

    // Non-members cannot read it.
    let (status, _) = server.get("mallory", &format!("/api/documents/{}", doc_id)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_upload_limits() {
    let server = TestServer::start_with(
        "[limits]\nmax_pages_per_document = 3\nmax_documents_per_workspace = 2\nmax_document_bytes = 1000\n",
    )
    .await;
    let ws = server.create_workspace("alice", "Limits").await;

    let too_many: Vec<Value> = (1..=4)
        .map(|n| json!({ "pageNumber": n, "text": format!("page {}", n) }))
        .collect();
    let (status, body) = server.upload("alice", &ws, "Long", json!(too_many)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"]["message"]
        .as_str()
        .unwrap()
        .contains("too many pages"));

    let (status, body) = server
        .post(
            "alice",
            "/api/documents",
            json!({ "workspaceId": ws, "title": "Big", "byteSize": 5000, "pages": warranty_pages() }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"]["message"]
        .as_str()
        .unwrap()
        .contains("File too large"));

    server.upload_ok("alice", &ws, "One", json!([{ "pageNumber": 1, "text": "a" }])).await;
    server.upload_ok("alice", &ws, "Two", json!([{ "pageNumber": 1, "text": "b" }])).await;
    let (status, body) = server
        .upload("alice", &ws, "Three", json!([{ "pageNumber": 1, "text": "c" }]))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"]["message"]
        .as_str()
        .unwrap()
        .contains("document limit"));

    // Rejected uploads leave no rows behind.
    let (_, docs) = server
        .get("alice", &format!("/api/workspaces/{}/documents", ws))
        .await;
    assert_eq!(docs["documents"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_upload_requires_pages_or_pdf() {
    let server = TestServer::start().await;
    let ws = server.create_workspace("alice", "Empty").await;
    let (status, _) = server.upload("alice", &ws, "Nothing", json!([])).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = server
        .post(
            "alice",
            "/api/documents",
            json!({ "workspaceId": ws, "title": "Bad", "pdfBase64": "!!not base64!!" }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"]["message"].as_str().unwrap().contains("base64"));
}

// ============ Embeddings & chat ============

#[tokio::test]
async fn test_lifecycle_ready_to_indexed() {
    let server = TestServer::start().await;
    let ws = server.create_workspace("alice", "Manuals").await;
    let doc = server.upload_ok("alice", &ws, "Manual", warranty_pages()).await;

    let (status, body) = server
        .post("alice", "/api/embeddings", json!({ "documentId": doc }))
        .await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["success"], true);
    assert_eq!(body["chunks"], 2);
    assert_eq!(body["status"], "indexed");

    let (_, fetched) = server.get("alice", &format!("/api/documents/{}", doc)).await;
    assert_eq!(fetched["status"], "indexed");

    let (status, _) = server
        .post("alice", "/api/embeddings", json!({}))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_document_stays_ready_when_every_embedding_fails() {
    let server = TestServer::start().await;
    let ws = server.create_workspace("alice", "Manuals").await;
    let doc = server.upload_ok("alice", &ws, "Manual", warranty_pages()).await;

    server.embedder.fail.store(true, Ordering::SeqCst);
    let (status, body) = server
        .post("alice", "/api/embeddings", json!({ "documentId": doc }))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["chunks"], 0);
    assert_eq!(body["status"], "ready");

    // Chat still answers from raw pages.
    let (status, reply) = server
        .post("alice", "/api/chat", json!({ "workspaceId": ws, "message": "How long is the warranty?" }))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(reply["contextMode"], "fallback");
}

#[tokio::test]
async fn test_chat_uses_fallback_then_vector_context() {
    let server = TestServer::start().await;
    let ws = server.create_workspace("alice", "Manuals").await;
    let doc = server.upload_ok("alice", &ws, "Manual", warranty_pages()).await;

    let question = json!({ "workspaceId": ws, "message": "How long is the warranty?" });

    let (status, reply) = server.post("alice", "/api/chat", question.clone()).await;
    assert_eq!(status, StatusCode::OK, "{}", reply);
    assert_eq!(reply["contextMode"], "fallback");
    assert_eq!(reply["sources"], json!(["[Manual, Page 1]", "[Manual, Page 2]"]));
    assert!(server
        .model
        .last_prompt
        .lock()
        .unwrap()
        .contains("Text content:\nProduct manual."));

    server
        .post("alice", "/api/embeddings", json!({ "documentId": doc }))
        .await;

    let (status, reply) = server.post("alice", "/api/chat", question).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(reply["contextMode"], "vector");
    let response = reply["response"].as_str().unwrap();
    assert!(response.starts_with("The warranty lasts two years."));
    assert!(response.contains("**Sources:**"));
    assert!(server
        .model
        .last_prompt
        .lock()
        .unwrap()
        .contains("Source: Manual, Page 1"));

    let (_, history) = server
        .get("alice", &format!("/api/workspaces/{}/messages", ws))
        .await;
    let messages = history["messages"].as_array().unwrap();
    assert_eq!(messages.len(), 4);
    assert_eq!(messages[0]["role"], "user");
    assert_eq!(messages[0]["content"]["text"], "How long is the warranty?");
    assert_eq!(messages[1]["role"], "assistant");
    assert_eq!(messages[1]["userId"], Value::Null);
}

#[tokio::test]
async fn test_usage_counts_successful_chats_and_blocks_at_limit() {
    let server = TestServer::start_with("[limits]\ndaily_api_calls = 2\n").await;
    let ws = server.create_workspace("alice", "Manuals").await;
    server.upload_ok("alice", &ws, "Manual", warranty_pages()).await;
    let question = json!({ "workspaceId": ws, "message": "Warranty?" });

    let (_, usage) = server.get("alice", "/api/usage").await;
    assert_eq!(usage["apiCalls"], 0);
    assert_eq!(usage["limit"], 2);

    // A failed model call is not counted.
    server.model.fail.store(true, Ordering::SeqCst);
    let (status, body) = server.post("alice", "/api/chat", question.clone()).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"]["code"], "internal");
    assert_eq!(body["error"]["message"], "Internal server error");
    let (_, usage) = server.get("alice", "/api/usage").await;
    assert_eq!(usage["apiCalls"], 0);
    server.model.fail.store(false, Ordering::SeqCst);

    let (status, _) = server.post("alice", "/api/chat", question.clone()).await;
    assert_eq!(status, StatusCode::OK);
    let (_, usage) = server.get("alice", "/api/usage").await;
    assert_eq!(usage["apiCalls"], 1);

    let (status, body) = server.post("alice", "/api/chat-simple", question.clone()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["response"], "The warranty lasts two years.");

    let calls_before = server.model.calls.load(Ordering::SeqCst);
    let (status, body) = server.post("alice", "/api/chat", question).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body["error"]["code"], "rate_limited");
    assert_eq!(server.model.calls.load(Ordering::SeqCst), calls_before);

    let (_, usage) = server.get("alice", "/api/usage").await;
    assert_eq!(usage["apiCalls"], 2);
}

#[tokio::test]
async fn test_provider_failure_hides_upstream_detail() {
    const KEY: &str = "SUPERSECRETKEY123";
    let config = ChatConfig {
        provider: "gemini".to_string(),
        base_url: Some("http://127.0.0.1:1".to_string()),
        timeout_secs: 2,
        ..ChatConfig::default()
    };
    let gemini: Arc<dyn ChatModel> =
        Arc::new(GeminiChatModel::with_api_key(&config, KEY.to_string()).unwrap());
    let server = TestServer::start_with_model("", Some(gemini)).await;
    let ws = server.create_workspace("alice", "Manuals").await;
    server.upload_ok("alice", &ws, "Manual", warranty_pages()).await;

    let resp = server
        .client
        .post(format!("{}/api/chat", server.base))
        .bearer_auth(TestServer::token("alice"))
        .json(&json!({ "workspaceId": ws, "message": "Warranty?" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let raw = resp.text().await.unwrap();
    assert!(!raw.contains(KEY), "{}", raw);
    assert!(!raw.contains("127.0.0.1"), "{}", raw);
    let body: Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(body["error"]["code"], "internal");
    assert_eq!(body["error"]["message"], "Internal server error");
}

#[tokio::test]
async fn test_chat_validation_and_membership() {
    let server = TestServer::start().await;
    let ws = server.create_workspace("alice", "Manuals").await;

    let (status, body) = server
        .post("alice", "/api/chat", json!({ "workspaceId": ws }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["message"], "Missing required fields");

    let (status, _) = server
        .post("bob", "/api/chat", json!({ "workspaceId": ws, "message": "hi" }))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(server.model.calls.load(Ordering::SeqCst), 0);
}

// ============ Duplicates ============

#[tokio::test]
async fn test_duplicate_and_similar_detection() {
    let server = TestServer::start().await;
    let ws = server.create_workspace("alice", "Manuals").await;
    let doc = server.upload_ok("alice", &ws, "Manual", warranty_pages()).await;

    let same = "Product manual. The warranty lasts two years from purchase.";
    let (status, report) = server
        .post(
            "alice",
            "/api/duplicates",
            json!({
                "workspaceId": ws,
                "fingerprints": [duplicates::fingerprint(same, 1), duplicates::fingerprint("unrelated text", 1)],
            }),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{}", report);
    let groups = report["duplicates"].as_array().unwrap();
    assert_eq!(groups.len(), 1);
    assert_eq!(groups[0]["matches"][0]["documentId"], doc.as_str());
    assert_eq!(groups[0]["matches"][0]["pageNumber"], 1);
    assert_eq!(report["similar"], json!([]));

    // Re-uploading the same text reports the original.
    let (_, second) = server.upload("alice", &ws, "Copy", warranty_pages()).await;
    assert_eq!(second["duplicates"]["duplicates"].as_array().unwrap().len(), 2);

    // Near-duplicate search only covers indexed documents.
    server
        .post("alice", "/api/embeddings", json!({ "documentId": doc }))
        .await;
    let (status, body) = server
        .post("alice", "/api/similar", json!({ "workspaceId": ws, "text": same }))
        .await;
    assert_eq!(status, StatusCode::OK);
    let similar = body["similar"].as_array().unwrap();
    assert_eq!(similar.len(), 1);
    assert_eq!(similar[0]["documentId"], doc.as_str());
    assert_eq!(similar[0]["similarity"], 1.0);

    let (status, _) = server
        .post("bob", "/api/duplicates", json!({ "workspaceId": ws, "fingerprints": [] }))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

// ============ Deletion ============

#[tokio::test]
async fn test_workspace_delete_removes_rows_and_objects() {
    use base64::Engine;
    let server = TestServer::start().await;
    let ws = server.create_workspace("alice", "Manuals").await;
    let members = format!("/api/workspaces/{}/members", ws);
    server
        .post("alice", &members, json!({ "userId": "bob" }))
        .await;

    let image = base64::engine::general_purpose::STANDARD.encode([0xFF, 0xD8, 0xFF]);
    let doc = server
        .upload_ok(
            "alice",
            &ws,
            "Manual",
            json!([{ "pageNumber": 1, "text": "warranty terms", "imageBase64": image }]),
        )
        .await;
    server
        .post("alice", "/api/embeddings", json!({ "documentId": doc }))
        .await;
    server
        .post("alice", "/api/chat", json!({ "workspaceId": ws, "message": "Warranty?" }))
        .await;
    assert_eq!(server.stored_files(), 1);

    let path = format!("/api/workspaces/{}", ws);
    let (status, body) = server.delete("bob", &path).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"]["message"], "Only workspace owner can delete workspace");

    let (status, body) = server.delete("alice", &path).await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["documents"], 1);
    assert_eq!(body["objects"], 1);
    assert_eq!(server.stored_files(), 0);

    let (status, _) = server.get("alice", &format!("/api/documents/{}", doc)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (_, list) = server.get("bob", "/api/workspaces").await;
    assert_eq!(list["workspaces"], json!([]));
}

#[tokio::test]
async fn test_document_delete() {
    let server = TestServer::start().await;
    let ws = server.create_workspace("alice", "Manuals").await;
    let doc = server.upload_ok("alice", &ws, "Manual", warranty_pages()).await;

    let (status, _) = server.delete("bob", &format!("/api/documents/{}", doc)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = server.delete("alice", &format!("/api/documents/{}", doc)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);

    let (status, _) = server.delete("alice", &format!("/api/documents/{}", doc)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
