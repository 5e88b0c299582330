//! Domain to adapter dispatch.

use std::collections::HashMap;
use std::sync::Arc;

use url::Url;

use super::{AdapterError, SiteAdapter};

/// Normalize a URL (or bare host) to the registry key: lowercase host
/// without scheme, port or leading `www.`.
pub fn normalize_domain(url: &str) -> Result<String, AdapterError> {
    let trimmed = url.trim();
    let candidate = if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("https://{}", trimmed)
    };
    let parsed = Url::parse(&candidate).map_err(|e| AdapterError::InvalidUrl {
        url: url.to_string(),
        reason: e.to_string(),
    })?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(AdapterError::InvalidUrl {
            url: url.to_string(),
            reason: format!("unsupported scheme '{}'", parsed.scheme()),
        });
    }
    let host = parsed
        .host_str()
        .filter(|h| !h.is_empty())
        .ok_or_else(|| AdapterError::InvalidUrl {
            url: url.to_string(),
            reason: "missing host".to_string(),
        })?
        .to_lowercase();
    Ok(host.strip_prefix("www.").unwrap_or(&host).to_string())
}

/// Maps each supported domain to exactly one adapter.
#[derive(Default, Clone)]
pub struct AdapterRegistry {
    adapters: HashMap<String, Arc<dyn SiteAdapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `adapter` for `domain`. Two spellings of the same domain,
    /// such as `www.example.com` and `example.com`, are rejected.
    pub fn register(
        &mut self,
        domain: &str,
        adapter: Arc<dyn SiteAdapter>,
    ) -> Result<(), AdapterError> {
        let key = normalize_domain(domain)?;
        if self.adapters.contains_key(&key) {
            return Err(AdapterError::DuplicateDomain(key));
        }
        self.adapters.insert(key, adapter);
        Ok(())
    }

    /// Adapter responsible for `url`.
    pub fn resolve(&self, url: &str) -> Result<Arc<dyn SiteAdapter>, AdapterError> {
        let domain = normalize_domain(url)?;
        self.adapters
            .get(&domain)
            .cloned()
            .ok_or(AdapterError::Unsupported(domain))
    }

    pub fn is_supported(&self, url: &str) -> bool {
        self.resolve(url).is_ok()
    }

    /// Registered domains, sorted.
    pub fn supported_domains(&self) -> Vec<String> {
        let mut domains: Vec<String> = self.adapters.keys().cloned().collect();
        domains.sort();
        domains
    }

    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }
}

impl std::fmt::Debug for AdapterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdapterRegistry")
            .field("domains", &self.supported_domains())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::ProgressHooks;
    use crate::models::CatalogSummary;
    use async_trait::async_trait;

    struct Named(&'static str);

    #[async_trait]
    impl SiteAdapter for Named {
        fn name(&self) -> &str {
            self.0
        }

        async fn fetch_catalog_detail(
            &self,
            _url: &str,
            _hooks: Option<&dyn ProgressHooks>,
        ) -> Result<CatalogSummary, AdapterError> {
            Ok(CatalogSummary::default())
        }

        async fn fetch_page_images(&self, _url: &str) -> Result<Vec<String>, AdapterError> {
            Ok(Vec::new())
        }
    }

    #[test]
    fn normalizes_scheme_case_and_www() {
        assert_eq!(normalize_domain("https://www.Example.com/x").unwrap(), "example.com");
        assert_eq!(normalize_domain("example.com").unwrap(), "example.com");
        assert_eq!(normalize_domain("http://example.com:8080/a?b").unwrap(), "example.com");
        assert!(normalize_domain("ftp://example.com").is_err());
        assert!(normalize_domain("").is_err());
    }

    #[test]
    fn www_and_bare_resolve_to_same_adapter() {
        let mut registry = AdapterRegistry::new();
        registry.register("example.com", Arc::new(Named("example"))).unwrap();

        let a = registry.resolve("https://www.example.com/x").unwrap();
        let b = registry.resolve("https://example.com/x").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.name(), "example");
    }

    #[test]
    fn unknown_domain_is_rejected() {
        let mut registry = AdapterRegistry::new();
        registry.register("www.example.com", Arc::new(Named("example"))).unwrap();
        registry.register("comics.test", Arc::new(Named("comics"))).unwrap();

        let err = registry.resolve("https://other.org/title").err().unwrap();
        assert!(matches!(err, AdapterError::Unsupported(d) if d == "other.org"));
        assert_eq!(registry.supported_domains(), vec!["comics.test", "example.com"]);
    }

    #[test]
    fn same_domain_twice_is_rejected() {
        let mut registry = AdapterRegistry::new();
        registry.register("example.com", Arc::new(Named("first"))).unwrap();

        let err = registry
            .register("https://WWW.example.com", Arc::new(Named("second")))
            .err()
            .unwrap();
        assert!(matches!(err, AdapterError::DuplicateDomain(d) if d == "example.com"));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.resolve("https://example.com/t").unwrap().name(), "first");
    }
}
