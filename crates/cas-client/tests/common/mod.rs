//! Shared fixtures for the integration tests

#![allow(dead_code)]

use std::net::IpAddr;
use std::sync::Arc;

use async_trait::async_trait;
use cas_client::{
    CasClient, DnsResolver, MemoryPgtStorage, ProtocolVersion, ReqwestFetcher, TenantConfig,
};
use wiremock::MockServer;

/// Resolves every address to the same name
pub struct StaticResolver(pub Option<&'static str>);

#[async_trait]
impl DnsResolver for StaticResolver {
    async fn reverse(&self, _ip: IpAddr) -> Option<String> {
        self.0.map(str::to_string)
    }
}

pub fn guard(server: &MockServer, version: ProtocolVersion) -> TenantConfig {
    TenantConfig::new(format!("{}/cas", server.uri()), version)
}

pub fn client(config: TenantConfig) -> CasClient {
    client_with_storage(config, Arc::new(MemoryPgtStorage::new()))
}

pub fn client_with_storage(config: TenantConfig, storage: Arc<MemoryPgtStorage>) -> CasClient {
    CasClient::builder(config)
        .fetcher(Arc::new(ReqwestFetcher::new()))
        .resolver(Arc::new(StaticResolver(Some("app1.example.com"))))
        .pgt_storage(storage)
        .build()
        .expect("valid test guard")
}

pub const SERVICE_URL: &str = "https://app.example.com/orders";

pub fn cas20_success(user: &str, extra: &str) -> String {
    format!(
        r#"<cas:serviceResponse xmlns:cas="http://www.yale.edu/tp/cas">
  <cas:authenticationSuccess>
    <cas:user>{}</cas:user>
    {}
  </cas:authenticationSuccess>
</cas:serviceResponse>"#,
        user, extra
    )
}
