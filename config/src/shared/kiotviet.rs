use secrecy::SecretString;
use serde::Deserialize;

use crate::shared::ValidationError;

/// Settings for syncing stock transfers from the KiotViet retail platform.
///
/// Two credentials are used: the public API client credentials for listing transfers and a
/// back office user login for per-transfer details.
///
/// This intentionally does not implement `Serialize` to avoid leaking credentials.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct KiotVietConfig {
    /// Retailer name, sent as the `Retailer` header on every request.
    pub retailer: String,
    pub client_id: String,
    pub client_secret: SecretString,
    pub username: String,
    pub password: SecretString,
    /// Branch selected when logging into the back office.
    #[serde(default = "default_latest_branch_id")]
    pub latest_branch_id: i64,
    #[serde(default = "default_token_url")]
    pub token_url: String,
    #[serde(default = "default_public_api_url")]
    pub public_api_url: String,
    #[serde(default = "default_web_api_url")]
    pub web_api_url: String,
    /// Transfers requested per list call.
    #[serde(default = "default_list_page_size")]
    pub list_page_size: u32,
    /// Transfers accumulated before flattening and staging them together.
    #[serde(default = "default_page_batch_size")]
    pub page_batch_size: usize,
    /// Listing stops once the newest buffered transfer is older than this many days.
    #[serde(default = "default_lookback_days")]
    pub lookback_days: u32,
    /// UTC offset of the retailer's local time, which transfer dates are reported in.
    #[serde(default = "default_utc_offset_hours")]
    pub utc_offset_hours: i8,
    #[serde(default = "default_max_concurrent_detail_fetches")]
    pub max_concurrent_detail_fetches: usize,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl KiotVietConfig {
    pub const DEFAULT_LATEST_BRANCH_ID: i64 = 14628;

    pub const DEFAULT_TOKEN_URL: &'static str = "https://id.kiotviet.vn/connect/token";

    pub const DEFAULT_PUBLIC_API_URL: &'static str = "https://public.kiotapi.com";

    pub const DEFAULT_WEB_API_URL: &'static str = "https://api-man.kiotviet.vn/api";

    pub const DEFAULT_LIST_PAGE_SIZE: u32 = 100;

    pub const DEFAULT_PAGE_BATCH_SIZE: usize = 500;

    pub const DEFAULT_LOOKBACK_DAYS: u32 = 60;

    pub const DEFAULT_UTC_OFFSET_HOURS: i8 = 7;

    pub const DEFAULT_MAX_CONCURRENT_DETAIL_FETCHES: usize = 50;

    pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.retailer.is_empty() {
            return Err(ValidationError::invalid("kiotviet.retailer", "must not be empty"));
        }

        if self.list_page_size == 0 {
            return Err(ValidationError::invalid(
                "kiotviet.list_page_size",
                "must be greater than 0",
            ));
        }

        if self.page_batch_size < self.list_page_size as usize {
            return Err(ValidationError::invalid(
                "kiotviet.page_batch_size",
                "must be at least `list_page_size`",
            ));
        }

        if !(-12..=14).contains(&self.utc_offset_hours) {
            return Err(ValidationError::invalid(
                "kiotviet.utc_offset_hours",
                "must be between -12 and 14",
            ));
        }

        if self.max_concurrent_detail_fetches == 0 {
            return Err(ValidationError::invalid(
                "kiotviet.max_concurrent_detail_fetches",
                "must be greater than 0",
            ));
        }

        Ok(())
    }
}

fn default_latest_branch_id() -> i64 {
    KiotVietConfig::DEFAULT_LATEST_BRANCH_ID
}

fn default_token_url() -> String {
    KiotVietConfig::DEFAULT_TOKEN_URL.to_owned()
}

fn default_public_api_url() -> String {
    KiotVietConfig::DEFAULT_PUBLIC_API_URL.to_owned()
}

fn default_web_api_url() -> String {
    KiotVietConfig::DEFAULT_WEB_API_URL.to_owned()
}

fn default_list_page_size() -> u32 {
    KiotVietConfig::DEFAULT_LIST_PAGE_SIZE
}

fn default_page_batch_size() -> usize {
    KiotVietConfig::DEFAULT_PAGE_BATCH_SIZE
}

fn default_lookback_days() -> u32 {
    KiotVietConfig::DEFAULT_LOOKBACK_DAYS
}

fn default_utc_offset_hours() -> i8 {
    KiotVietConfig::DEFAULT_UTC_OFFSET_HOURS
}

fn default_max_concurrent_detail_fetches() -> usize {
    KiotVietConfig::DEFAULT_MAX_CONCURRENT_DETAIL_FETCHES
}

fn default_request_timeout_secs() -> u64 {
    KiotVietConfig::DEFAULT_REQUEST_TIMEOUT_SECS
}
