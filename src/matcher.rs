//! Credential Matching
//!
//! Resolves a window identity to the best stored credential. This runs in
//! the UI process, which holds the decrypted vault; candidates are scored
//! here and only the final username/password pair ever leaves the process.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use url::Url;
use uuid::Uuid;

use crate::ipc::CredentialMatchResponse;

/// Scheme synthesized for window identities that are bare titles or app
/// identifiers rather than URLs.
pub const WINDOW_URI_SCHEME: &str = "windowsapp";

/// A decrypted login item from the vault
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VaultCredential {
    pub id: Uuid,
    pub name: String,
    pub username: Option<String>,
    #[serde(skip_serializing)]
    pub password: Option<SecretString>,
    pub uris: Vec<CredentialUri>,
    pub last_used: Option<DateTime<Utc>>,
}

/// URI associated with a login item
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialUri {
    pub uri: Option<String>,
    pub r#match: Option<UriMatchType>,
}

/// URI matching equivalence classes, ordered here from least to most
/// specific.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum UriMatchType {
    Domain = 0,
    Host = 1,
    StartsWith = 2,
    Exact = 3,
    Never = 4,
}

impl UriMatchType {
    /// Rank used to prefer the most specific rule that matched. `Never`
    /// cannot match, so it has no rank.
    fn specificity(self) -> Option<u8> {
        match self {
            UriMatchType::Domain => Some(0),
            UriMatchType::Host => Some(1),
            UriMatchType::StartsWith => Some(2),
            UriMatchType::Exact => Some(3),
            UriMatchType::Never => None,
        }
    }
}

/// Read-only view of the decrypted vault held by the UI process.
pub trait CredentialSource: Send + Sync {
    fn decrypted_logins(&self) -> Vec<VaultCredential>;
}

/// Resolves window identities against the vault's URI rule set.
pub struct CredentialMatcher {
    source: Arc<dyn CredentialSource>,
}

impl CredentialMatcher {
    pub fn new(source: Arc<dyn CredentialSource>) -> Self {
        Self { source }
    }

    /// Find the best credential for a window identity.
    ///
    /// Each stored URI is evaluated under its own match rule; the credential
    /// with the most specific matching rule wins, ties broken by the most
    /// recently used item. Returns the empty response when nothing matches.
    pub fn match_window(&self, window_identity: &str) -> CredentialMatchResponse {
        let target = to_match_uri(window_identity);
        let logins = self.source.decrypted_logins();

        let mut best: Option<(u8, DateTime<Utc>, &VaultCredential)> = None;
        for credential in &logins {
            // A credential with nothing to type can never be the answer.
            if credential.username.is_none() && credential.password.is_none() {
                continue;
            }

            let Some(specificity) = best_specificity(credential, &target) else {
                continue;
            };
            let last_used = credential.last_used.unwrap_or(DateTime::<Utc>::MIN_UTC);

            let better = match best {
                None => true,
                Some((s, used, _)) => {
                    specificity > s || (specificity == s && last_used > used)
                }
            };
            if better {
                best = Some((specificity, last_used, credential));
            }
        }

        match best {
            Some((_, _, credential)) => CredentialMatchResponse {
                username: credential.username.clone(),
                password: credential
                    .password
                    .as_ref()
                    .map(|p| p.expose_secret().to_string()),
            },
            None => CredentialMatchResponse::default(),
        }
    }
}

/// Normalize a window identity into the URI form the rule set operates on.
/// Bare titles/app identifiers get the synthesized window scheme.
pub fn to_match_uri(window_identity: &str) -> String {
    if window_identity.contains("://") {
        window_identity.to_string()
    } else {
        format!("{WINDOW_URI_SCHEME}://{window_identity}")
    }
}

/// The most specific rule under which any of the credential's URIs matches
/// the target, if one does.
fn best_specificity(credential: &VaultCredential, target: &str) -> Option<u8> {
    credential
        .uris
        .iter()
        .filter_map(|entry| {
            let stored = entry.uri.as_deref()?;
            let rule = entry.r#match.unwrap_or(UriMatchType::Domain);
            let rank = rule.specificity()?;
            uri_matches(stored, rule, target).then_some(rank)
        })
        .max()
}

fn uri_matches(stored: &str, rule: UriMatchType, target: &str) -> bool {
    match rule {
        UriMatchType::Exact => stored == target,
        UriMatchType::StartsWith => target.starts_with(stored),
        UriMatchType::Host => match (host_of(stored), host_of(target)) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        },
        UriMatchType::Domain => match (host_of(stored), host_of(target)) {
            (Some(a), Some(b)) => base_domain(&a) == base_domain(&b),
            _ => false,
        },
        UriMatchType::Never => false,
    }
}

/// Hostname of a URI, lowercased. Schemeless input is treated as an https
/// URL so plain "example.com" entries still resolve.
fn host_of(uri: &str) -> Option<String> {
    let candidate = if uri.contains("://") {
        uri.to_string()
    } else {
        format!("https://{uri}")
    };
    Url::parse(&candidate)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_ascii_lowercase()))
}

/// Registrable-domain heuristic: the last two labels, or three when the
/// suffix is a common two-part TLD.
fn base_domain(host: &str) -> String {
    const TWO_PART_TLDS: &[&str] = &[
        "co.uk", "org.uk", "gov.uk", "ac.uk", "com.au", "net.au", "co.jp", "com.br", "co.nz",
        "co.in",
    ];

    let labels: Vec<&str> = host.split('.').collect();
    if labels.len() <= 2 {
        return host.to_string();
    }

    let last_two = labels[labels.len() - 2..].join(".");
    if TWO_PART_TLDS.contains(&last_two.as_str()) {
        labels[labels.len() - 3..].join(".")
    } else {
        last_two
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    struct FixedVault(Vec<VaultCredential>);

    impl CredentialSource for FixedVault {
        fn decrypted_logins(&self) -> Vec<VaultCredential> {
            self.0.clone()
        }
    }

    fn credential(name: &str, uris: Vec<(&str, Option<UriMatchType>)>) -> VaultCredential {
        VaultCredential {
            id: Uuid::new_v4(),
            name: name.to_string(),
            username: Some(format!("{name}-user")),
            password: Some(SecretString::from(format!("{name}-pass"))),
            uris: uris
                .into_iter()
                .map(|(uri, rule)| CredentialUri {
                    uri: Some(uri.to_string()),
                    r#match: rule,
                })
                .collect(),
            last_used: None,
        }
    }

    fn matcher(logins: Vec<VaultCredential>) -> CredentialMatcher {
        CredentialMatcher::new(Arc::new(FixedVault(logins)))
    }

    #[test]
    fn test_domain_match_is_the_default_rule() {
        let m = matcher(vec![credential("site", vec![("https://example.com", None)])]);

        let hit = m.match_window("https://login.example.com/session");
        assert_eq!(hit.username.as_deref(), Some("site-user"));
        assert_eq!(hit.password.as_deref(), Some("site-pass"));
    }

    #[test]
    fn test_no_match_returns_empty_response() {
        let m = matcher(vec![credential("site", vec![("https://example.com", None)])]);

        let miss = m.match_window("https://other.org");
        assert!(miss.is_empty());
    }

    #[test]
    fn test_window_titles_match_through_synthesized_scheme() {
        let m = matcher(vec![credential(
            "mail",
            vec![("windowsapp://Aurora Mail", Some(UriMatchType::Exact))],
        )]);

        let hit = m.match_window("Aurora Mail");
        assert_eq!(hit.username.as_deref(), Some("mail-user"));
    }

    #[test]
    fn test_more_specific_rule_wins() {
        let loose = credential("loose", vec![("https://example.com", Some(UriMatchType::Domain))]);
        let tight = credential(
            "tight",
            vec![("https://example.com", Some(UriMatchType::Exact))],
        );
        let m = matcher(vec![loose, tight]);

        let hit = m.match_window("https://example.com");
        assert_eq!(hit.username.as_deref(), Some("tight-user"));
    }

    #[test]
    fn test_tie_broken_by_most_recently_used() {
        let mut older = credential("older", vec![("https://example.com", None)]);
        older.last_used = Some(Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap());
        let mut newer = credential("newer", vec![("https://example.com", None)]);
        newer.last_used = Some(Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap());
        let m = matcher(vec![older, newer]);

        let hit = m.match_window("https://example.com");
        assert_eq!(hit.username.as_deref(), Some("newer-user"));
    }

    #[test]
    fn test_never_rule_excludes_entry() {
        let m = matcher(vec![credential(
            "hidden",
            vec![("https://example.com", Some(UriMatchType::Never))],
        )]);

        assert!(m.match_window("https://example.com").is_empty());
    }

    #[test]
    fn test_starts_with_rule() {
        let m = matcher(vec![credential(
            "admin",
            vec![("https://example.com/admin", Some(UriMatchType::StartsWith))],
        )]);

        assert!(!m.match_window("https://example.com/admin/users").is_empty());
        assert!(m.match_window("https://example.com/login").is_empty());
    }

    #[test]
    fn test_host_rule_distinguishes_subdomains() {
        let m = matcher(vec![credential(
            "app",
            vec![("https://app.example.com", Some(UriMatchType::Host))],
        )]);

        assert!(!m.match_window("https://app.example.com/login").is_empty());
        assert!(m.match_window("https://www.example.com").is_empty());
    }

    #[test]
    fn test_matching_is_deterministic() {
        let m = matcher(vec![
            credential("a", vec![("https://example.com", None)]),
            credential("b", vec![("https://example.com", None)]),
        ]);

        let first = m.match_window("https://example.com");
        for _ in 0..10 {
            let again = m.match_window("https://example.com");
            assert_eq!(first.username, again.username);
        }
    }

    #[test]
    fn test_credential_without_fields_is_skipped() {
        let mut empty = credential("empty", vec![("https://example.com", None)]);
        empty.username = None;
        empty.password = None;
        let m = matcher(vec![empty]);

        assert!(m.match_window("https://example.com").is_empty());
    }

    #[test]
    fn test_base_domain_handles_two_part_tlds() {
        assert_eq!(base_domain("login.example.co.uk"), "example.co.uk");
        assert_eq!(base_domain("login.example.com"), "example.com");
        assert_eq!(base_domain("example.com"), "example.com");
    }
}
