//! Package matching rules.
//!
//! Matching is a case-insensitive substring test against the package name and
//! the app label. An exact (case-insensitive) package-name match wins outright.

use serde::{Deserialize, Serialize};

/// A package as seen during matching.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageListing {
    /// Package name.
    pub name: String,
    /// App label, when it was looked up.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

impl PackageListing {
    /// A listing without a label.
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            label: None,
        }
    }

    /// Sets the label.
    #[must_use]
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }
}

/// Result of matching a query against a package set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchOutcome {
    /// The query is a full package name.
    Exact(PackageListing),
    /// Exactly one substring match.
    Unique(PackageListing),
    /// Several substring matches, in listing order.
    Ambiguous(Vec<PackageListing>),
    /// Nothing matched.
    NoMatch,
}

/// Returns the package whose name equals `query`, ignoring case.
#[must_use]
pub fn exact_match<'a>(query: &str, names: &'a [String]) -> Option<&'a String> {
    let query = query.trim();
    names.iter().find(|name| name.eq_ignore_ascii_case(query))
}

/// Case-insensitive substring test of the package name.
#[must_use]
pub fn name_matches(query: &str, name: &str) -> bool {
    name.to_lowercase().contains(&query.trim().to_lowercase())
}

/// Case-insensitive substring test of the name or label.
#[must_use]
pub fn listing_matches(query: &str, listing: &PackageListing) -> bool {
    name_matches(query, &listing.name)
        || listing
            .label
            .as_deref()
            .is_some_and(|label| name_matches(query, label))
}

/// Applies the matching rules to a package set.
#[must_use]
pub fn classify(query: &str, listings: &[PackageListing]) -> MatchOutcome {
    let query = query.trim();
    if query.is_empty() {
        return MatchOutcome::NoMatch;
    }
    if let Some(exact) = listings
        .iter()
        .find(|listing| listing.name.eq_ignore_ascii_case(query))
    {
        return MatchOutcome::Exact(exact.clone());
    }

    let mut matched: Vec<PackageListing> = listings
        .iter()
        .filter(|listing| listing_matches(query, listing))
        .cloned()
        .collect();

    match matched.len() {
        0 => MatchOutcome::NoMatch,
        1 => MatchOutcome::Unique(matched.remove(0)),
        _ => MatchOutcome::Ambiguous(matched),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn listings(names: &[&str]) -> Vec<PackageListing> {
        names.iter().map(|n| PackageListing::named(*n)).collect()
    }

    #[test]
    fn test_exact_match_wins_over_substrings() {
        let set = listings(&[
            "com.example.app.debug",
            "com.example.app",
            "com.example.appwidget",
            "org.example.app.pro",
        ]);
        assert_eq!(
            classify("com.example.app", &set),
            MatchOutcome::Exact(PackageListing::named("com.example.app"))
        );
    }

    #[test]
    fn test_exact_match_is_case_insensitive() {
        let set = listings(&["com.Example.App", "com.example.app2"]);
        assert!(matches!(
            classify("COM.EXAMPLE.APP", &set),
            MatchOutcome::Exact(l) if l.name == "com.Example.App"
        ));
    }

    #[test]
    fn test_exact_match_for_every_member_of_a_set() {
        let set = listings(&["a.b", "a.b.c", "a.b.c.d", "x.a.b"]);
        for listing in &set {
            assert_eq!(
                classify(&listing.name, &set),
                MatchOutcome::Exact(listing.clone())
            );
        }
    }

    #[test]
    fn test_zero_matches() {
        let set = listings(&["com.android.chrome"]);
        assert_eq!(classify("telegram", &set), MatchOutcome::NoMatch);
        assert_eq!(classify("telegram", &[]), MatchOutcome::NoMatch);
        assert_eq!(classify("   ", &set), MatchOutcome::NoMatch);
    }

    #[test]
    fn test_label_match() {
        let set = vec![
            PackageListing::named("org.thunderdog.challegram").with_label("Telegram X"),
            PackageListing::named("com.android.chrome").with_label("Chrome"),
        ];
        assert!(matches!(
            classify("telegram", &set),
            MatchOutcome::Unique(l) if l.name == "org.thunderdog.challegram"
        ));
    }

    #[test]
    fn test_ambiguous_keeps_order() {
        let set = listings(&["com.spotify.music", "com.example.music", "com.android.chrome"]);
        match classify("MUSIC", &set) {
            MatchOutcome::Ambiguous(found) => {
                let names: Vec<&str> = found.iter().map(|l| l.name.as_str()).collect();
                assert_eq!(names, vec!["com.spotify.music", "com.example.music"]);
            }
            other => panic!("expected ambiguity, got {other:?}"),
        }
    }

    #[test]
    fn test_exact_match_helper() {
        let names = vec!["com.a".to_string(), "com.b".to_string()];
        assert_eq!(exact_match("COM.B", &names), Some(&names[1]));
        assert_eq!(exact_match("com", &names), None);
    }
}
