// Canonical resource addresses: origin + base path + module + entry path.

use std::fmt;

use reqwest::Url;

use crate::error::{EngineError, Result};

/// Normalized, origin-qualified key for a cached resource.
///
/// Writers and the interception server both build addresses through
/// [`Url`] joining, so equal resources always compare equal as strings.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CanonicalAddress(String);

impl CanonicalAddress {
    /// Parse an absolute URL string into its normalized form.
    pub fn parse(value: &str) -> Result<Self> {
        let url = Url::parse(value)
            .map_err(|e| EngineError::ResourceNotFound(format!("{value}: {e}")))?;
        Ok(Self::from_url(url))
    }

    /// Address of an incoming request path, resolved against `origin`.
    /// Query and fragment are not part of the address.
    pub fn for_request(origin: &Url, path: &str) -> Result<Self> {
        let mut url = origin
            .join(path)
            .map_err(|e| EngineError::ResourceNotFound(format!("{path}: {e}")))?;
        url.set_query(None);
        url.set_fragment(None);
        Ok(Self::from_url(url))
    }

    pub fn from_url(url: Url) -> Self {
        Self(url.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Last path segment, as it appears in the address.
    pub fn basename(&self) -> &str {
        let without_query = self.0.split(['?', '#']).next().unwrap_or(&self.0);
        without_query.rsplit('/').next().unwrap_or(without_query)
    }
}

impl fmt::Display for CanonicalAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CanonicalAddress {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Address root of one module: `{origin}{base_path}{module}/`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleNamespace {
    module: String,
    root: Url,
}

impl ModuleNamespace {
    pub fn new(origin: &Url, base_path: &str, module: &str) -> Result<Self> {
        validate_module_name(module)?;
        let root = origin
            .join(&format!("{base_path}{}/", encode_segment_chars(module)))
            .map_err(|e| EngineError::Config(format!("namespace for {module}: {e}")))?;
        Ok(Self {
            module: module.to_string(),
            root,
        })
    }

    pub fn module(&self) -> &str {
        &self.module
    }

    /// Namespace root, always ending in `/`.
    pub fn root(&self) -> &str {
        self.root.as_str()
    }

    /// Canonical address of an archive entry within this module.
    pub fn address_for(&self, entry_path: &str) -> Result<CanonicalAddress> {
        let relative = encode_segment_chars(entry_path.trim_start_matches('/'));
        let url = self
            .root
            .join(&relative)
            .map_err(|e| EngineError::cache_write(entry_path, e))?;
        if !url.as_str().starts_with(self.root.as_str()) {
            return Err(EngineError::cache_write(
                url.as_str(),
                "entry path escapes the module namespace",
            ));
        }
        Ok(CanonicalAddress::from_url(url))
    }

    /// Entry path of `address` relative to the namespace root.
    pub fn relative_path<'a>(&self, address: &'a CanonicalAddress) -> Option<&'a str> {
        address
            .as_str()
            .strip_prefix(self.root.as_str())
            .filter(|rest| !rest.is_empty())
    }
}

/// Module identifiers become a single path segment.
pub fn validate_module_name(module: &str) -> Result<()> {
    let invalid = module.is_empty()
        || module == "."
        || module == ".."
        || module.contains(['/', '\\', '?', '#']);
    if invalid {
        return Err(EngineError::Config(format!("invalid module name {module:?}")));
    }
    Ok(())
}

/// Decode `%XX` escapes. Invalid sequences are kept as they are.
pub fn percent_decode(value: &str) -> String {
    let bytes = value.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            if let (Some(hi), Some(lo)) = (hex_value(bytes[i + 1]), hex_value(bytes[i + 2])) {
                out.push(hi << 4 | lo);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8(out).unwrap_or_else(|_| value.to_string())
}

fn hex_value(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

/// Escape characters that URL joining would otherwise treat as delimiters.
fn encode_segment_chars(path: &str) -> String {
    let mut out = String::with_capacity(path.len());
    for c in path.chars() {
        match c {
            '%' => out.push_str("%25"),
            '#' => out.push_str("%23"),
            '?' => out.push_str("%3F"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn origin() -> Url {
        Url::parse("http://localhost").unwrap()
    }

    #[test]
    fn test_entry_address() {
        let ns = ModuleNamespace::new(&origin(), "/course/", "intro").unwrap();
        assert_eq!(ns.root(), "http://localhost/course/intro/");

        let addr = ns.address_for("story.html").unwrap();
        assert_eq!(addr.as_str(), "http://localhost/course/intro/story.html");
        assert_eq!(addr.basename(), "story.html");
        assert_eq!(ns.relative_path(&addr), Some("story.html"));
    }

    #[test]
    fn test_request_matches_written_address() {
        let ns = ModuleNamespace::new(&origin(), "/", "m1").unwrap();
        let written = ns.address_for("story_content/my file#1.png").unwrap();
        let requested =
            CanonicalAddress::for_request(&origin(), "/m1/story_content/my%20file%231.png?v=3")
                .unwrap();
        assert_eq!(written, requested);
    }

    #[test]
    fn test_percent_decode() {
        assert_eq!(percent_decode("my%20file%231.png"), "my file#1.png");
        assert_eq!(percent_decode("100%"), "100%");
        assert_eq!(percent_decode("a%zzb"), "a%zzb");
    }

    #[test]
    fn test_rejects_escaping_entries() {
        let ns = ModuleNamespace::new(&origin(), "/", "m1").unwrap();
        assert!(ns.address_for("../m2/story.html").is_err());
        assert!(ModuleNamespace::new(&origin(), "/", "../m2").is_err());
        assert!(ModuleNamespace::new(&origin(), "/", "").is_err());
    }
}
