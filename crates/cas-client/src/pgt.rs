//! Proxy granting tickets
//!
//! When acting as a CAS proxy, the server first calls back the PGT callback
//! URL with `pgtIou` and `pgtId`, then answers the validation request with the
//! IOU only. The callback side stores the mapping in a [`PgtStorage`]; the
//! validation side resolves the IOU through [`ProxyGrantValidator`]. A PGT can
//! be loaded once.

use std::sync::{Arc, LazyLock};
use std::time::Duration;

use async_trait::async_trait;
use moka::future::Cache;
use regex::Regex;
use tracing::{debug, info, warn};

use crate::error::{CasError, Result};
use crate::types::ProxyGrantingTicket;
use crate::xml::XmlElement;

/// Reply body expected by the CAS server from the callback endpoint
pub const PROXY_SUCCESS_REPLY: &str =
    r#"<?xml version="1.0" encoding="UTF-8"?><proxySuccess xmlns="http://www.yale.edu/tp/cas" />"#;

static PGT_IOU_REGEX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^PGTIOU-[.\-\w]+$").unwrap());
static PGT_REGEX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^PGT-[.\-\w]+$").unwrap());

pub fn is_valid_pgt_iou(iou: &str) -> bool {
    PGT_IOU_REGEX.is_match(iou)
}

pub fn is_valid_pgt(pgt: &str) -> bool {
    PGT_REGEX.is_match(pgt)
}

/// Key-value store correlating PGT IOUs with PGTs
#[async_trait]
pub trait PgtStorage: Send + Sync {
    async fn store(&self, iou: &str, pgt: ProxyGrantingTicket) -> Result<()>;

    /// Returns and removes the PGT stored for `iou`
    async fn load(&self, iou: &str) -> Result<Option<ProxyGrantingTicket>>;
}

const DEFAULT_MAX_ENTRIES: u64 = 10_000;
const DEFAULT_TTL_SECONDS: u64 = 300;

/// In-process [`PgtStorage`]. Entries expire if never loaded.
///
/// Only usable when the callback and the validation hit the same process;
/// clustered deployments rebroadcast the callback to peers or plug in a
/// shared store.
#[derive(Clone)]
pub struct MemoryPgtStorage {
    cache: Cache<String, ProxyGrantingTicket>,
}

impl MemoryPgtStorage {
    pub fn new() -> Self {
        Self::with_ttl(Duration::from_secs(DEFAULT_TTL_SECONDS))
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        let cache = Cache::builder()
            .max_capacity(DEFAULT_MAX_ENTRIES)
            .time_to_live(ttl)
            .build();
        Self { cache }
    }
}

impl Default for MemoryPgtStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PgtStorage for MemoryPgtStorage {
    async fn store(&self, iou: &str, pgt: ProxyGrantingTicket) -> Result<()> {
        self.cache.insert(iou.to_string(), pgt).await;
        Ok(())
    }

    async fn load(&self, iou: &str) -> Result<Option<ProxyGrantingTicket>> {
        Ok(self.cache.remove(iou).await)
    }
}

/// Resolves the PGT IOU of a CAS 2.0/3.0 success response
#[derive(Clone)]
pub struct ProxyGrantValidator {
    storage: Arc<dyn PgtStorage>,
}

impl ProxyGrantValidator {
    pub fn new(storage: Arc<dyn PgtStorage>) -> Self {
        Self { storage }
    }

    pub async fn validate(&self, success: &XmlElement) -> Result<ProxyGrantingTicket> {
        let Some(element) = success.find("proxyGrantingTicket") else {
            debug!("<proxyGrantingTicket> not found");
            return Err(CasError::NoPgtIssued);
        };

        let iou = element.text().trim().to_string();
        if !is_valid_pgt_iou(&iou) {
            debug!("PGT IOU format error: {}", iou);
            return Err(CasError::MalformedPgtIou(iou));
        }

        match self.storage.load(&iou).await? {
            Some(pgt) => {
                debug!("PGT for IOU {} was validated", iou);
                Ok(pgt)
            }
            None => {
                info!("Could not load PGT for IOU {}", iou);
                Err(CasError::PgtNotFound(iou))
            }
        }
    }
}

/// A PGT delivery received on the callback URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PgtCallback {
    pub iou: String,
    pub pgt: ProxyGrantingTicket,
}

impl PgtCallback {
    /// Reads `pgtIou` and `pgtId` from the callback query.
    ///
    /// `Ok(None)` when both are absent, which is how the server probes the
    /// callback URL before issuing a PGT.
    pub fn from_query(pairs: &[(String, String)]) -> Result<Option<Self>> {
        let lookup = |name: &str| {
            pairs
                .iter()
                .find(|(key, _)| key == name)
                .map(|(_, value)| value.trim())
        };

        match (lookup("pgtIou"), lookup("pgtId")) {
            (None, None) => Ok(None),
            (Some(iou), Some(pgt)) => {
                if !is_valid_pgt_iou(iou) {
                    warn!("PGT callback with ill-formed IOU: {}", iou);
                    return Err(CasError::InvalidCallback(format!("ill-formed pgtIou `{}`", iou)));
                }
                if !is_valid_pgt(pgt) {
                    warn!("PGT callback with ill-formed PGT for IOU {}", iou);
                    return Err(CasError::InvalidCallback("ill-formed pgtId".to_string()));
                }
                Ok(Some(Self {
                    iou: iou.to_string(),
                    pgt: ProxyGrantingTicket::new(pgt),
                }))
            }
            _ => Err(CasError::InvalidCallback(
                "pgtIou and pgtId must be sent together".to_string(),
            )),
        }
    }
}
