// Entry-document rewriting: point quoted relative references at resolvable URLs.

use std::collections::HashMap;

use regex::{Captures, Regex};
use tracing::{debug, warn};

/// Reference → replacement rules, longest reference first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReferenceMap {
    rules: Vec<(String, String)>,
}

impl ReferenceMap {
    /// Build rules from `(relative path, target url)` pairs.
    ///
    /// Each basename that is unique among the entries also gets a rule of
    /// its own, so documents that reference a nested file by bare name
    /// still resolve.
    pub fn from_entries<I>(entries: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let entries: Vec<(String, String)> = entries.into_iter().collect();

        let mut basename_counts: HashMap<&str, usize> = HashMap::new();
        for (path, _) in &entries {
            *basename_counts.entry(basename(path)).or_default() += 1;
        }

        let mut rules = entries.clone();
        for (path, target) in &entries {
            let base = basename(path);
            let unique = basename_counts.get(base) == Some(&1);
            let shadowed = entries.iter().any(|(p, _)| p == base);
            if base != path && unique && !shadowed {
                rules.push((base.to_string(), target.clone()));
            }
        }

        rules.sort_by(|a, b| b.0.len().cmp(&a.0.len()).then_with(|| a.0.cmp(&b.0)));
        rules.dedup_by(|a, b| a.0 == b.0);
        Self { rules }
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn rules(&self) -> &[(String, String)] {
        &self.rules
    }
}

/// Replace every quoted occurrence of a known reference with its target.
///
/// A reference only matches when it is the whole quoted value (an optional
/// leading `./` is allowed), so `"m1.png"` never matches inside `"m10.png"`.
/// Unquoted references are left untouched.
pub fn rewrite_references(document: &str, map: &ReferenceMap) -> String {
    let mut out = document.to_string();
    let mut replaced = 0usize;

    for (reference, target) in &map.rules {
        let pattern = format!(r#"(["'])(?:\./)?{}(["'])"#, regex::escape(reference));
        let re = match Regex::new(&pattern) {
            Ok(re) => re,
            Err(e) => {
                warn!("skipping rewrite rule for {}: {}", reference, e);
                continue;
            }
        };
        out = re
            .replace_all(&out, |caps: &Captures| {
                if caps[1] == caps[2] {
                    replaced += 1;
                    format!("{}{}{}", &caps[1], target, &caps[2])
                } else {
                    caps[0].to_string()
                }
            })
            .into_owned();
    }

    debug!("rewrote {} references using {} rules", replaced, map.len());
    out
}

fn basename(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(pairs: &[(&str, &str)]) -> ReferenceMap {
        ReferenceMap::from_entries(
            pairs
                .iter()
                .map(|(a, b)| (a.to_string(), b.to_string())),
        )
    }

    #[test]
    fn test_exact_basename_only() {
        let refs = map(&[("m1.png", "blob:one"), ("m10.png", "blob:ten")]);
        let doc = r#"<img src="m1.png"><img src="m10.png">"#;
        assert_eq!(
            rewrite_references(doc, &refs),
            r#"<img src="blob:one"><img src="blob:ten">"#
        );

        let only_m1 = map(&[("m1.png", "blob:one")]);
        let doc = r#"<img src="m10.png"><img src='m1.png'>"#;
        assert_eq!(
            rewrite_references(doc, &only_m1),
            r#"<img src="m10.png"><img src='blob:one'>"#
        );
    }

    #[test]
    fn test_special_characters_are_escaped() {
        let refs = map(&[("img/a+b (1).png", "blob:x"), ("data.js", "blob:y")]);
        let doc = r#"<img src="img/a+b (1).png"><img src="img/aab (1).png"><script src="data?js"></script>"#;
        assert_eq!(
            rewrite_references(doc, &refs),
            r#"<img src="blob:x"><img src="img/aab (1).png"><script src="data?js"></script>"#
        );
    }

    #[test]
    fn test_relative_path_and_unique_basename() {
        let refs = map(&[
            ("story_content/user.js", "blob:user"),
            ("mobile/a/slide.png", "blob:a"),
            ("mobile/b/slide.png", "blob:b"),
        ]);
        let doc = r#"["./story_content/user.js", "user.js", "slide.png", "mobile/b/slide.png"]"#;
        assert_eq!(
            rewrite_references(doc, &refs),
            r#"["blob:user", "blob:user", "slide.png", "blob:b"]"#
        );
    }

    #[test]
    fn test_mismatched_quotes_untouched() {
        let refs = map(&[("m1.png", "blob:one")]);
        let doc = r#"<img src="m1.png'>"#;
        assert_eq!(rewrite_references(doc, &refs), doc);
    }
}
