use crate::config::HttpConfig;
use reqwest::Client;
use std::time::Duration;

/// What a client is used for; picks the read timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientPurpose {
    Api,
    Upload,
    Report,
}

pub fn build_client(config: &HttpConfig, purpose: ClientPurpose) -> Client {
    let timeout = match purpose {
        ClientPurpose::Api => config.read_timeout_secs,
        ClientPurpose::Upload => config.upload_timeout_secs,
        ClientPurpose::Report => config.report_timeout_secs,
    };
    Client::builder()
        .timeout(Duration::from_secs(timeout))
        .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
        .user_agent(concat!("stock-catalog-sync/", env!("CARGO_PKG_VERSION")))
        .build()
        .unwrap_or_else(|_| Client::new())
}
