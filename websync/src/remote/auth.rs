use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, COOKIE};
use reqwest::{RequestBuilder, Response, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::{ErrorKind, SyncResult};
use crate::{bail, sync_error};

/// Header naming the retailer account every KiotViet request acts on.
pub const RETAILER_HEADER: &str = "Retailer";

/// A bearer token, plus the session cookies issued with it for session logins.
///
/// Credentials are immutable: a refresh produces a new value instead of updating this one.
#[derive(Clone)]
pub struct Credential {
    token: SecretString,
    cookies: Option<String>,
}

impl Credential {
    pub fn bearer(token: impl Into<String>) -> Credential {
        Credential {
            token: SecretString::new(token.into()),
            cookies: None,
        }
    }

    /// Creates a credential sent together with a `Cookie` header.
    pub fn session(token: impl Into<String>, cookies: impl Into<String>) -> Credential {
        let cookies = cookies.into();

        Credential {
            token: SecretString::new(token.into()),
            cookies: (!cookies.is_empty()).then_some(cookies),
        }
    }

    pub fn cookies(&self) -> Option<&str> {
        self.cookies.as_deref()
    }

    fn apply(&self, request: RequestBuilder) -> RequestBuilder {
        let request = request.header(
            AUTHORIZATION,
            format!("Bearer {}", self.token.expose_secret()),
        );

        match &self.cookies {
            Some(cookies) => request.header(COOKIE, cookies),
            None => request,
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("token", &"REDACTED")
            .field("cookies", &self.cookies.as_ref().map(|_| "REDACTED"))
            .finish()
    }
}

/// A way of acquiring a [`Credential`] from an identity endpoint.
pub trait AuthScheme {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Acquires a fresh credential.
    ///
    /// A non-success response fails with [`ErrorKind::AuthenticationError`] carrying the response
    /// body as detail.
    fn acquire(
        &self,
        http: &reqwest::Client,
    ) -> impl Future<Output = SyncResult<Credential>> + Send;
}

/// OAuth client credentials grant against the public API identity server.
#[derive(Clone)]
pub struct ClientCredentialsAuth {
    pub token_url: String,
    pub client_id: String,
    pub client_secret: SecretString,
}

#[derive(Deserialize)]
struct AccessTokenResponse {
    access_token: String,
}

impl fmt::Debug for ClientCredentialsAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientCredentialsAuth")
            .field("token_url", &self.token_url)
            .field("client_id", &self.client_id)
            .finish_non_exhaustive()
    }
}

impl AuthScheme for ClientCredentialsAuth {
    fn name(&self) -> &'static str {
        "client_credentials"
    }

    async fn acquire(&self, http: &reqwest::Client) -> SyncResult<Credential> {
        let form = [
            ("scopes", "PublicApi.Access"),
            ("grant_type", "client_credentials"),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.expose_secret().as_str()),
        ];

        let response = http.post(&self.token_url).form(&form).send().await?;
        let body = success_body(response, "Access token request was rejected").await?;
        let token: AccessTokenResponse = serde_json::from_str(&body)?;

        Ok(Credential::bearer(token.access_token))
    }
}

/// Back office login, which answers with a bearer token and session cookies.
#[derive(Clone)]
pub struct SessionLoginAuth {
    pub login_url: String,
    pub retailer: String,
    pub username: String,
    pub password: SecretString,
    pub latest_branch_id: i64,
}

#[derive(Deserialize)]
struct LoginResponse {
    token: String,
}

impl fmt::Debug for SessionLoginAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionLoginAuth")
            .field("login_url", &self.login_url)
            .field("retailer", &self.retailer)
            .field("username", &self.username)
            .field("latest_branch_id", &self.latest_branch_id)
            .finish_non_exhaustive()
    }
}

impl AuthScheme for SessionLoginAuth {
    fn name(&self) -> &'static str {
        "session_login"
    }

    async fn acquire(&self, http: &reqwest::Client) -> SyncResult<Credential> {
        let payload = serde_json::json!({
            "model": {
                "UserName": self.username,
                "Password": self.password.expose_secret(),
                "LatestBranchId": self.latest_branch_id,
                "RememberMe": true,
                "ShowCaptcha": false,
            }
        });

        let response = http
            .post(&self.login_url)
            .header(RETAILER_HEADER, &self.retailer)
            .header(CONTENT_TYPE, "application/json")
            .body(payload.to_string())
            .send()
            .await?;

        let cookies = response
            .cookies()
            .map(|cookie| format!("{}={}", cookie.name(), cookie.value()))
            .collect::<Vec<_>>()
            .join("; ");

        let body = success_body(response, "Back office login was rejected").await?;
        let login: LoginResponse = serde_json::from_str(&body)?;

        Ok(Credential::session(login.token, cookies))
    }
}

async fn success_body(response: Response, description: &'static str) -> SyncResult<String> {
    let status = response.status();
    let body = response.text().await?;

    if !status.is_success() {
        bail!(
            ErrorKind::AuthenticationError,
            description,
            format!("status {status}: {body}")
        );
    }

    Ok(body)
}

/// Holds the current credential of one [`AuthScheme`].
///
/// The first credential is acquired on first use. Concurrent callers that observed the same stale
/// credential trigger a single refresh: callers whose credential was already replaced get the
/// replacement.
#[derive(Debug)]
pub struct CredentialCache<A> {
    scheme: A,
    current: Mutex<Option<Arc<Credential>>>,
    acquisitions: AtomicU64,
}

impl<A> CredentialCache<A>
where
    A: AuthScheme,
{
    pub fn new(scheme: A) -> CredentialCache<A> {
        CredentialCache {
            scheme,
            current: Mutex::new(None),
            acquisitions: AtomicU64::new(0),
        }
    }

    pub fn scheme(&self) -> &A {
        &self.scheme
    }

    /// Number of credentials acquired so far, the first one included.
    pub fn acquisitions(&self) -> u64 {
        self.acquisitions.load(Ordering::Relaxed)
    }

    /// Returns the current credential, acquiring one if there is none yet.
    pub async fn get(&self, http: &reqwest::Client) -> SyncResult<Arc<Credential>> {
        let mut current = self.current.lock().await;
        if let Some(credential) = current.as_ref() {
            return Ok(credential.clone());
        }

        let credential = self.acquire(http).await?;
        *current = Some(credential.clone());

        Ok(credential)
    }

    /// Replaces `stale` with a freshly acquired credential.
    ///
    /// If the cached credential is no longer `stale`, another caller already refreshed it and the
    /// cached one is returned as is.
    pub async fn refresh(
        &self,
        http: &reqwest::Client,
        stale: &Arc<Credential>,
    ) -> SyncResult<Arc<Credential>> {
        let mut current = self.current.lock().await;
        if let Some(credential) = current.as_ref()
            && !Arc::ptr_eq(credential, stale)
        {
            debug!(scheme = self.scheme.name(), "credential already refreshed");
            return Ok(credential.clone());
        }

        let credential = self.acquire(http).await?;
        *current = Some(credential.clone());

        Ok(credential)
    }

    async fn acquire(&self, http: &reqwest::Client) -> SyncResult<Arc<Credential>> {
        let credential = self.scheme.acquire(http).await.map_err(|err| {
            if err.kind() == ErrorKind::AuthenticationError {
                err
            } else {
                sync_error!(
                    ErrorKind::AuthenticationError,
                    "Credential acquisition failed",
                    err.to_string(),
                    source: err
                )
            }
        })?;

        let acquisitions = self.acquisitions.fetch_add(1, Ordering::Relaxed) + 1;
        info!(scheme = self.scheme.name(), acquisitions, "acquired credential");

        Ok(Arc::new(credential))
    }
}

/// HTTP client attaching a cached credential to every request.
///
/// A request answered with `401 Unauthorized` is rebuilt and sent once more with a refreshed
/// credential. Any other status is handed back to the caller unchanged.
#[derive(Debug)]
pub struct AuthenticatedClient<A> {
    http: reqwest::Client,
    retailer: String,
    credentials: CredentialCache<A>,
}

impl<A> AuthenticatedClient<A>
where
    A: AuthScheme,
{
    pub fn new(http: reqwest::Client, retailer: impl Into<String>, scheme: A) -> Self {
        AuthenticatedClient {
            http,
            retailer: retailer.into(),
            credentials: CredentialCache::new(scheme),
        }
    }

    pub fn credentials(&self) -> &CredentialCache<A> {
        &self.credentials
    }

    /// Sends the request produced by `build`, refreshing the credential and retrying once on
    /// `401 Unauthorized`.
    ///
    /// `build` is called once per attempt, so it must produce the same request every time.
    pub async fn call<F>(&self, build: F) -> SyncResult<Response>
    where
        F: Fn(&reqwest::Client) -> RequestBuilder,
    {
        let credential = self.credentials.get(&self.http).await?;
        let response = self.send(&build, &credential).await?;

        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        warn!(
            scheme = self.credentials.scheme().name(),
            url = %response.url(),
            "request unauthorized, refreshing credential and retrying once"
        );
        drop(response);

        let credential = self.credentials.refresh(&self.http, &credential).await?;
        self.send(&build, &credential).await
    }

    async fn send<F>(&self, build: &F, credential: &Credential) -> SyncResult<Response>
    where
        F: Fn(&reqwest::Client) -> RequestBuilder,
    {
        let request = build(&self.http).header(RETAILER_HEADER, &self.retailer);
        let response = credential.apply(request).send().await?;

        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct CountingScheme {
        issued: AtomicU64,
    }

    impl AuthScheme for CountingScheme {
        fn name(&self) -> &'static str {
            "counting"
        }

        async fn acquire(&self, _http: &reqwest::Client) -> SyncResult<Credential> {
            let n = self.issued.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(Credential::bearer(format!("token-{n}")))
        }
    }

    struct FailingScheme;

    impl AuthScheme for FailingScheme {
        fn name(&self) -> &'static str {
            "failing"
        }

        async fn acquire(&self, _http: &reqwest::Client) -> SyncResult<Credential> {
            Err(sync_error!(ErrorKind::TransportError, "Identity server unreachable"))
        }
    }

    fn cache() -> CredentialCache<CountingScheme> {
        CredentialCache::new(CountingScheme {
            issued: AtomicU64::new(0),
        })
    }

    #[tokio::test]
    async fn first_credential_is_acquired_lazily_and_reused() {
        let cache = cache();
        let http = reqwest::Client::new();
        assert_eq!(cache.acquisitions(), 0);

        let first = cache.get(&http).await.unwrap();
        let second = cache.get(&http).await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.acquisitions(), 1);
    }

    #[tokio::test]
    async fn refresh_of_stale_credential_happens_once() {
        let cache = cache();
        let http = reqwest::Client::new();
        let stale = cache.get(&http).await.unwrap();

        let refreshed = cache.refresh(&http, &stale).await.unwrap();
        let again = cache.refresh(&http, &stale).await.unwrap();

        assert!(!Arc::ptr_eq(&stale, &refreshed));
        assert!(Arc::ptr_eq(&refreshed, &again));
        assert_eq!(cache.acquisitions(), 2);
    }

    #[tokio::test]
    async fn acquisition_failures_are_authentication_errors() {
        let cache = CredentialCache::new(FailingScheme);

        let err = cache.get(&reqwest::Client::new()).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::AuthenticationError);
        assert_eq!(cache.acquisitions(), 0);
    }

    #[test]
    fn empty_cookie_jar_sends_no_cookie_header() {
        assert_eq!(Credential::session("t", "").cookies(), None);
        assert_eq!(
            Credential::session("t", "a=1; b=2").cookies(),
            Some("a=1; b=2")
        );
    }

    #[test]
    fn debug_output_redacts_secrets() {
        let rendered = format!("{:?}", Credential::session("secret-token", "sid=abc"));

        assert!(!rendered.contains("secret-token"));
        assert!(!rendered.contains("abc"));
    }
}
