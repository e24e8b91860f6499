use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use config::shared::KiotVietConfig;
use reqwest::Response;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::bail;
use crate::error::{ErrorKind, SyncResult};
use crate::remote::auth::{AuthenticatedClient, ClientCredentialsAuth, SessionLoginAuth};
use crate::remote::models::{TransferDetails, TransferPage};

/// Read access to stock transfers.
///
/// Listings are ordered by descending transfer id, so the newest transfers come first.
pub trait TransferApi {
    /// Returns at most `limit` transfers, skipping the first `offset`.
    fn list_transfers(
        &self,
        limit: u32,
        offset: u64,
    ) -> impl Future<Output = SyncResult<TransferPage>> + Send;

    /// Returns the back office details of the lines of transfer `transfer_id`.
    fn transfer_details(
        &self,
        transfer_id: i64,
    ) -> impl Future<Output = SyncResult<TransferDetails>> + Send;
}

#[derive(Debug)]
struct Inner {
    public: AuthenticatedClient<ClientCredentialsAuth>,
    web: AuthenticatedClient<SessionLoginAuth>,
    public_api_url: String,
    web_api_url: String,
}

/// KiotViet client listing transfers through the public API and reading their details through the
/// back office API.
///
/// Each API has its own credential. Clones share the HTTP connection pool and both credentials.
#[derive(Debug, Clone)]
pub struct KiotVietClient {
    inner: Arc<Inner>,
}

impl KiotVietClient {
    pub fn new(config: &KiotVietConfig) -> SyncResult<KiotVietClient> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;

        let public = AuthenticatedClient::new(
            http.clone(),
            config.retailer.clone(),
            ClientCredentialsAuth {
                token_url: config.token_url.clone(),
                client_id: config.client_id.clone(),
                client_secret: config.client_secret.clone(),
            },
        );

        let web_api_url = config.web_api_url.trim_end_matches('/').to_owned();
        let web = AuthenticatedClient::new(
            http,
            config.retailer.clone(),
            SessionLoginAuth {
                login_url: format!("{web_api_url}/account/login?quan-ly=true"),
                retailer: config.retailer.clone(),
                username: config.username.clone(),
                password: config.password.clone(),
                latest_branch_id: config.latest_branch_id,
            },
        );

        Ok(KiotVietClient {
            inner: Arc::new(Inner {
                public,
                web,
                public_api_url: config.public_api_url.trim_end_matches('/').to_owned(),
                web_api_url,
            }),
        })
    }

    /// Client authenticating list calls.
    pub fn public_client(&self) -> &AuthenticatedClient<ClientCredentialsAuth> {
        &self.inner.public
    }

    /// Client authenticating detail calls.
    pub fn web_client(&self) -> &AuthenticatedClient<SessionLoginAuth> {
        &self.inner.web
    }
}

impl TransferApi for KiotVietClient {
    async fn list_transfers(&self, limit: u32, offset: u64) -> SyncResult<TransferPage> {
        let url = format!("{}/transfers", self.inner.public_api_url);
        let query = [
            ("pageSize", limit.to_string()),
            ("currentItem", offset.to_string()),
            ("orderBy", "id".to_owned()),
            ("orderDirection", "DESC".to_owned()),
        ];

        let response = self
            .inner
            .public
            .call(|http| http.get(&url).query(&query))
            .await?;
        let page: TransferPage = decode(response).await?;

        debug!(limit, offset, transfers = page.data.len(), "listed transfers");

        Ok(page)
    }

    async fn transfer_details(&self, transfer_id: i64) -> SyncResult<TransferDetails> {
        let url = format!("{}/transferDetails/{transfer_id}", self.inner.web_api_url);

        let response = self
            .inner
            .web
            .call(|http| http.get(&url).query(&[("Includes", "Product")]))
            .await?;

        decode(response).await
    }
}

/// Decodes a successful JSON response. Any other status fails with
/// [`ErrorKind::UnexpectedResponseStatus`] carrying the response body.
async fn decode<T>(response: Response) -> SyncResult<T>
where
    T: DeserializeOwned,
{
    let status = response.status();
    let url = response.url().clone();
    let body = response.text().await?;

    if !status.is_success() {
        bail!(
            ErrorKind::UnexpectedResponseStatus,
            "KiotViet answered with an unexpected status",
            format!("{status} from {url}: {body}")
        );
    }

    Ok(serde_json::from_str(&body)?)
}
