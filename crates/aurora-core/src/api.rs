//! REST surface of the workflow backend.
//!
//! `WorkflowApi` is the seam the session controller is written against;
//! `HttpWorkflowApi` is the real implementation. Auth is a backend-managed
//! session cookie, so the client carries a cookie store and the login/logout
//! redirects are exposed as plain URLs for the browser to follow.

use std::fmt;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::error::{ClientError, ClientResult};
use crate::snapshot::{ThreadId, WorkflowSnapshot};

/// Display fields the identity provider exposes for the signed-in user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub picture: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuthStatus {
    pub authenticated: bool,
    #[serde(default)]
    pub user: Option<UserProfile>,
}

/// Decision offered while the security-review gate is open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecurityAction {
    Fix,
    Ignore,
}

impl SecurityAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            SecurityAction::Fix => "fix",
            SecurityAction::Ignore => "ignore",
        }
    }
}

impl fmt::Display for SecurityAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[async_trait]
pub trait WorkflowApi: Send + Sync {
    async fn me(&self) -> ClientResult<AuthStatus>;
    async fn start_thread(&self, message: &str) -> ClientResult<ThreadId>;
    async fn fetch_snapshot(&self, thread: &ThreadId) -> ClientResult<WorkflowSnapshot>;
    async fn answer_missing_info(&self, thread: &ThreadId, answer: &str) -> ClientResult<()>;
    async fn decide_approval(
        &self,
        thread: &ThreadId,
        approved: bool,
        feedback: Option<&str>,
    ) -> ClientResult<()>;
    async fn decide_security(&self, thread: &ThreadId, action: SecurityAction) -> ClientResult<()>;
    /// Zipped Terraform bundle for a finished thread. Raw bytes only; what
    /// to do with them is the caller's business.
    async fn download_archive(&self, thread: &ThreadId) -> ClientResult<Vec<u8>>;
}

#[derive(Serialize)]
struct StartChatRequest<'a> {
    message: &'a str,
}

#[derive(Deserialize)]
struct StartChatResponse {
    thread_id: String,
}

#[derive(Serialize)]
struct MissingInfoRequest<'a> {
    answer: &'a str,
}

#[derive(Serialize)]
struct ApproveRequest<'a> {
    approved: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    feedback: Option<&'a str>,
}

#[derive(Serialize)]
struct SecurityRequest<'a> {
    action: &'a str,
}

#[derive(Clone)]
pub struct HttpWorkflowApi {
    client: Client,
    base_url: String,
}

impl HttpWorkflowApi {
    pub fn new(base_url: &str) -> ClientResult<Self> {
        let client = Client::builder().cookie_store(true).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Browser entry point of the delegated OAuth flow.
    pub fn login_url(&self) -> String {
        format!("{}/login", self.base_url)
    }

    pub fn logout_url(&self) -> String {
        format!("{}/logout", self.base_url)
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

async fn check(response: reqwest::Response) -> ClientResult<reqwest::Response> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status();
    let detail = response.text().await.unwrap_or_default();
    Err(ClientError::Transport(format!(
        "backend returned {}: {}",
        status, detail
    )))
}

#[async_trait]
impl WorkflowApi for HttpWorkflowApi {
    async fn me(&self) -> ClientResult<AuthStatus> {
        let response = self.client.get(self.url("/user/me")).send().await?;
        let response = check(response).await?;
        Ok(response.json().await?)
    }

    async fn start_thread(&self, message: &str) -> ClientResult<ThreadId> {
        let response = self
            .client
            .post(self.url("/chat"))
            .json(&StartChatRequest { message })
            .send()
            .await?;
        let response = check(response).await?;
        let body: StartChatResponse = response.json().await?;
        Ok(ThreadId::new(body.thread_id))
    }

    async fn fetch_snapshot(&self, thread: &ThreadId) -> ClientResult<WorkflowSnapshot> {
        let response = self
            .client
            .get(self.url(&format!("/chat/{}", thread)))
            .send()
            .await?;
        let response = check(response).await?;
        Ok(response.json().await?)
    }

    async fn answer_missing_info(&self, thread: &ThreadId, answer: &str) -> ClientResult<()> {
        let response = self
            .client
            .post(self.url(&format!("/chat/{}/missing_info", thread)))
            .json(&MissingInfoRequest { answer })
            .send()
            .await?;
        check(response).await?;
        Ok(())
    }

    async fn decide_approval(
        &self,
        thread: &ThreadId,
        approved: bool,
        feedback: Option<&str>,
    ) -> ClientResult<()> {
        let response = self
            .client
            .post(self.url(&format!("/chat/{}/approve", thread)))
            .json(&ApproveRequest { approved, feedback })
            .send()
            .await?;
        check(response).await?;
        Ok(())
    }

    async fn decide_security(&self, thread: &ThreadId, action: SecurityAction) -> ClientResult<()> {
        let response = self
            .client
            .post(self.url(&format!("/chat/{}/security", thread)))
            .json(&SecurityRequest {
                action: action.as_str(),
            })
            .send()
            .await?;
        check(response).await?;
        Ok(())
    }

    async fn download_archive(&self, thread: &ThreadId) -> ClientResult<Vec<u8>> {
        let response = self
            .client
            .get(self.url(&format!("/chat/{}/download", thread)))
            .send()
            .await?;
        let response = check(response).await?;
        Ok(response.bytes().await?.to_vec())
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted in-memory backend for controller and dispatcher tests.

    use std::sync::Mutex;

    use super::*;

    struct Inner {
        start: ClientResult<ThreadId>,
        snapshot: ClientResult<WorkflowSnapshot>,
        action: ClientResult<()>,
        calls: Vec<String>,
        fetch_count: usize,
    }

    pub(crate) struct FakeWorkflowApi {
        inner: Mutex<Inner>,
    }

    impl FakeWorkflowApi {
        pub fn new() -> Self {
            Self {
                inner: Mutex::new(Inner {
                    start: Err(ClientError::Transport("start not scripted".to_string())),
                    snapshot: Ok(WorkflowSnapshot::default()),
                    action: Ok(()),
                    calls: Vec::new(),
                    fetch_count: 0,
                }),
            }
        }

        pub fn set_start(&self, result: ClientResult<ThreadId>) {
            self.inner.lock().unwrap().start = result;
        }

        /// What every subsequent `fetch_snapshot` returns, until re-scripted.
        pub fn set_snapshot(&self, snapshot: WorkflowSnapshot) {
            self.inner.lock().unwrap().snapshot = Ok(snapshot);
        }

        pub fn set_action(&self, result: ClientResult<()>) {
            self.inner.lock().unwrap().action = result;
        }

        pub fn calls(&self) -> Vec<String> {
            self.inner.lock().unwrap().calls.clone()
        }

        pub fn fetch_count(&self) -> usize {
            self.inner.lock().unwrap().fetch_count
        }
    }

    #[async_trait]
    impl WorkflowApi for FakeWorkflowApi {
        async fn me(&self) -> ClientResult<AuthStatus> {
            Ok(AuthStatus {
                authenticated: true,
                user: None,
            })
        }

        async fn start_thread(&self, message: &str) -> ClientResult<ThreadId> {
            let mut inner = self.inner.lock().unwrap();
            inner.calls.push(format!("start:{}", message));
            inner.start.clone()
        }

        async fn fetch_snapshot(&self, _thread: &ThreadId) -> ClientResult<WorkflowSnapshot> {
            let mut inner = self.inner.lock().unwrap();
            inner.fetch_count += 1;
            inner.snapshot.clone()
        }

        async fn answer_missing_info(&self, _thread: &ThreadId, answer: &str) -> ClientResult<()> {
            let mut inner = self.inner.lock().unwrap();
            inner.calls.push(format!("answer:{}", answer));
            inner.action.clone()
        }

        async fn decide_approval(
            &self,
            _thread: &ThreadId,
            approved: bool,
            _feedback: Option<&str>,
        ) -> ClientResult<()> {
            let mut inner = self.inner.lock().unwrap();
            inner.calls.push(format!("approve:{}", approved));
            inner.action.clone()
        }

        async fn decide_security(
            &self,
            _thread: &ThreadId,
            action: SecurityAction,
        ) -> ClientResult<()> {
            let mut inner = self.inner.lock().unwrap();
            inner.calls.push(format!("security:{}", action));
            inner.action.clone()
        }

        async fn download_archive(&self, _thread: &ThreadId) -> ClientResult<Vec<u8>> {
            Ok(Vec::new())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_trailing_slash_is_trimmed() {
        let api = HttpWorkflowApi::new("http://localhost:8000/").unwrap();
        assert_eq!(api.base_url(), "http://localhost:8000");
        assert_eq!(api.login_url(), "http://localhost:8000/login");
        assert_eq!(api.logout_url(), "http://localhost:8000/logout");
    }

    #[test]
    fn test_auth_status_deserializes_both_shapes() {
        let anon: AuthStatus = serde_json::from_str(r#"{"authenticated": false}"#).unwrap();
        assert!(!anon.authenticated);
        assert!(anon.user.is_none());

        let signed: AuthStatus = serde_json::from_str(
            r#"{"authenticated": true, "user": {"name": "Ada", "email": "ada@example.com"}}"#,
        )
        .unwrap();
        assert!(signed.authenticated);
        assert_eq!(signed.user.unwrap().name, "Ada");
    }

    #[test]
    fn test_approve_request_omits_absent_feedback() {
        let body = serde_json::to_string(&ApproveRequest {
            approved: true,
            feedback: None,
        })
        .unwrap();
        assert_eq!(body, r#"{"approved":true}"#);

        let body = serde_json::to_string(&ApproveRequest {
            approved: false,
            feedback: Some("tighten the bucket policy"),
        })
        .unwrap();
        assert_eq!(
            body,
            r#"{"approved":false,"feedback":"tighten the bucket policy"}"#
        );
    }
}
