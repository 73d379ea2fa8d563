//! Policy for proxies allowed in front of this application
//!
//! A CAS 2.0/3.0 proxy ticket validation returns the list of services the
//! request went through, innermost first. The list is accepted only when at
//! least one configured chain matches it. With no chain configured proxying
//! is disallowed: any non-empty list is rejected.

use regex::Regex;

use crate::config::AllowedChainConfig;
use crate::error::{CasError, Result};

/// Something that can accept or refuse a proxy list
pub trait ProxyChainMatcher: Send + Sync {
    fn matches(&self, proxies: &[String]) -> bool;
}

/// One element of an allowed chain
#[derive(Debug, Clone)]
pub enum ProxyPattern {
    Exact(String),
    Regex(Regex),
}

impl ProxyPattern {
    /// `/.../` is compiled as a regular expression, anything else is literal
    pub fn parse(raw: &str) -> Result<Self> {
        if raw.len() > 1 && raw.starts_with('/') && raw.ends_with('/') {
            let expr = &raw[1..raw.len() - 1];
            let regex = Regex::new(expr)
                .map_err(|e| CasError::ConfigError(format!("Invalid proxy pattern {}: {}", raw, e)))?;
            Ok(ProxyPattern::Regex(regex))
        } else {
            Ok(ProxyPattern::Exact(raw.to_string()))
        }
    }

    pub fn matches(&self, proxy: &str) -> bool {
        match self {
            ProxyPattern::Exact(expected) => expected == proxy,
            ProxyPattern::Regex(regex) => regex.is_match(proxy),
        }
    }
}

/// How a chain compares against the received proxy list
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainMatch {
    /// Same length, element by element
    Exact,
    /// The received list starts with the chain and may be longer
    Prefix,
}

#[derive(Debug, Clone)]
pub struct ProxyChain {
    patterns: Vec<ProxyPattern>,
    mode: ChainMatch,
}

impl ProxyChain {
    pub fn exact<I, S>(proxies: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self::with_mode(proxies, ChainMatch::Exact)
    }

    pub fn prefix<I, S>(proxies: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self::with_mode(proxies, ChainMatch::Prefix)
    }

    fn with_mode<I, S>(proxies: I, mode: ChainMatch) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let patterns = proxies
            .into_iter()
            .map(|raw| ProxyPattern::parse(raw.as_ref()))
            .collect::<Result<Vec<_>>>()?;
        if patterns.is_empty() {
            return Err(CasError::ConfigError("Allowed proxy chain must not be empty".to_string()));
        }
        Ok(Self { patterns, mode })
    }

    pub fn mode(&self) -> ChainMatch {
        self.mode
    }
}

impl ProxyChainMatcher for ProxyChain {
    fn matches(&self, proxies: &[String]) -> bool {
        let length_ok = match self.mode {
            ChainMatch::Exact => proxies.len() == self.patterns.len(),
            ChainMatch::Prefix => proxies.len() >= self.patterns.len(),
        };
        length_ok
            && self
                .patterns
                .iter()
                .zip(proxies)
                .all(|(pattern, proxy)| pattern.matches(proxy))
    }
}

/// The set of allowed chains. Starts empty, which forbids proxying.
#[derive(Default)]
pub struct ProxyChainAllowedList {
    chains: Vec<Box<dyn ProxyChainMatcher>>,
}

impl ProxyChainAllowedList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(chains: &[AllowedChainConfig]) -> Result<Self> {
        let mut list = Self::new();
        for chain in chains {
            let chain = if chain.prefix {
                ProxyChain::prefix(&chain.proxies)?
            } else {
                ProxyChain::exact(&chain.proxies)?
            };
            list.allow(chain);
        }
        Ok(list)
    }

    pub fn allow(&mut self, chain: impl ProxyChainMatcher + 'static) {
        self.chains.push(Box::new(chain));
    }

    /// True iff at least one chain is configured
    pub fn is_proxying_allowed(&self) -> bool {
        !self.chains.is_empty()
    }

    pub fn is_chain_allowed(&self, proxies: &[String]) -> bool {
        if proxies.is_empty() {
            return true;
        }
        self.chains.iter().any(|chain| chain.matches(proxies))
    }

    pub fn len(&self) -> usize {
        self.chains.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chains.is_empty()
    }
}

impl std::fmt::Debug for ProxyChainAllowedList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxyChainAllowedList")
            .field("chains", &self.chains.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn list(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_empty_list_allows_only_direct_access() {
        let allowed = ProxyChainAllowedList::new();
        assert!(!allowed.is_proxying_allowed());
        assert!(allowed.is_chain_allowed(&[]));
        assert!(!allowed.is_chain_allowed(&list(&["https://portal.example.com/proxy"])));
    }

    #[test]
    fn test_exact_chain() {
        let mut allowed = ProxyChainAllowedList::new();
        allowed.allow(ProxyChain::exact(["https://a/proxy", "https://b/proxy"]).unwrap());
        assert!(allowed.is_proxying_allowed());
        assert!(allowed.is_chain_allowed(&list(&["https://a/proxy", "https://b/proxy"])));
        assert!(!allowed.is_chain_allowed(&list(&["https://b/proxy", "https://a/proxy"])));
        assert!(!allowed.is_chain_allowed(&list(&["https://a/proxy"])));
        assert!(!allowed.is_chain_allowed(&list(&[
            "https://a/proxy",
            "https://b/proxy",
            "https://c/proxy"
        ])));
    }

    #[test]
    fn test_prefix_chain_accepts_longer_lists() {
        let mut allowed = ProxyChainAllowedList::new();
        allowed.allow(ProxyChain::prefix(["https://a/proxy"]).unwrap());
        assert!(allowed.is_chain_allowed(&list(&["https://a/proxy"])));
        assert!(allowed.is_chain_allowed(&list(&["https://a/proxy", "https://x/proxy"])));
        assert!(!allowed.is_chain_allowed(&list(&["https://x/proxy", "https://a/proxy"])));
    }

    #[test]
    fn test_regex_patterns() {
        let mut allowed = ProxyChainAllowedList::new();
        allowed.allow(ProxyChain::exact([r"/^https://[a-z]+\.example\.com/proxy$/"]).unwrap());
        assert!(allowed.is_chain_allowed(&list(&["https://portal.example.com/proxy"])));
        assert!(!allowed.is_chain_allowed(&list(&["https://portal.evil.com/proxy"])));
        assert!(ProxyPattern::parse("/[unclosed/").is_err());
    }

    #[test]
    fn test_from_config() {
        let allowed = ProxyChainAllowedList::from_config(&[
            AllowedChainConfig {
                proxies: vec!["https://a/proxy".to_string()],
                prefix: false,
            },
            AllowedChainConfig {
                proxies: vec!["https://b/proxy".to_string()],
                prefix: true,
            },
        ])
        .unwrap();
        assert_eq!(allowed.len(), 2);
        assert!(allowed.is_chain_allowed(&list(&["https://b/proxy", "https://c/proxy"])));
        assert!(ProxyChainAllowedList::from_config(&[AllowedChainConfig {
            proxies: vec![],
            prefix: false,
        }])
        .is_err());
    }

    struct AnyProxy;

    impl ProxyChainMatcher for AnyProxy {
        fn matches(&self, _proxies: &[String]) -> bool {
            true
        }
    }

    #[test]
    fn test_custom_matcher() {
        let mut allowed = ProxyChainAllowedList::new();
        allowed.allow(AnyProxy);
        assert!(allowed.is_chain_allowed(&list(&["anything"])));
    }
}
