use anyhow::{ensure, Result};
use std::collections::BTreeSet;

/// The domains a certificate is requested for. Order only matters for the primary (first) domain,
/// which names the issuer's output directory and the object store keys. Coverage comparisons
/// treat the domains as a set.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct DomainSet {
    domains: Vec<String>,
}

impl DomainSet {
    pub(crate) fn parse(value: &str) -> Result<Self> {
        let domains = value
            .split(',')
            .map(str::trim)
            .map(|domain| {
                ensure!(!domain.is_empty(), "empty domain in domain list {:?}", value);
                Ok(domain.to_string())
            })
            .collect::<Result<Vec<_>>>()?;

        ensure!(!domains.is_empty(), "domain list must not be empty");

        Ok(Self { domains })
    }

    pub(crate) fn primary(&self) -> &str {
        // Parsing guarantees at least one domain
        &self.domains[0]
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &String> {
        self.domains.iter()
    }

    pub(crate) fn as_set(&self) -> BTreeSet<&str> {
        self.domains.iter().map(String::as_str).collect()
    }

    /// True when every name in `names` is one of our domains
    pub(crate) fn covers<'a>(&self, names: impl IntoIterator<Item = &'a String>) -> bool {
        let domains = self.as_set();
        names.into_iter().all(|name| domains.contains(name.as_str()))
    }
}

impl std::fmt::Display for DomainSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.domains.join(","))
    }
}

impl serde::Serialize for DomainSet {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse() -> Result<()> {
        let domains = DomainSet::parse("example.com, www.example.com,*.example.org")?;

        assert_eq!(domains.primary(), "example.com");
        assert_eq!(
            domains.iter().cloned().collect::<Vec<_>>(),
            vec!["example.com".to_string(), "www.example.com".to_string(), "*.example.org".to_string()]
        );
        assert_eq!(domains.to_string(), "example.com,www.example.com,*.example.org");

        Ok(())
    }

    #[test]
    fn test_parse_rejects_empty_entries() {
        assert!(DomainSet::parse("").is_err());
        assert!(DomainSet::parse("example.com,,www.example.com").is_err());
        assert!(DomainSet::parse("example.com,").is_err());
    }

    #[test]
    fn test_covers_ignores_order() -> Result<()> {
        let domains = DomainSet::parse("a.example.com,b.example.com,c.example.com")?;

        assert!(domains.covers(&["c.example.com".to_string(), "a.example.com".to_string()]));
        assert!(domains.covers(&Vec::<String>::new()));
        assert!(!domains.covers(&["a.example.com".to_string(), "d.example.com".to_string()]));

        Ok(())
    }

    #[test]
    fn test_primary_is_not_normalized() -> Result<()> {
        let domains = DomainSet::parse("Example.COM,example.com")?;

        assert_eq!(domains.primary(), "Example.COM");

        Ok(())
    }
}
