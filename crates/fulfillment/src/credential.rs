//! Best-effort extraction of account fields from delivered product text.
//!
//! Suppliers deliver free-form strings such as `username:alice password:secret`
//! or `Login = bob | Pass = hunter2`. There is no fixed format, so parsing is
//! heuristic and never fails: the original text is always kept in `raw`.

use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Structured view of one delivered item.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    /// The delivered text, verbatim.
    pub raw: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    /// Other `key:value` pairs found next to recognized fields.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra: Option<BTreeMap<String, String>>,
}

impl Credential {
    /// True when at least one labeled field was recognized.
    pub fn is_structured(&self) -> bool {
        self.username.is_some() || self.password.is_some() || self.token.is_some()
    }
}

/// Label variants per field, in priority order.
const USERNAME_LABELS: &[&str] = &["username", "user", "account", "login", "email"];
const PASSWORD_LABELS: &[&str] = &["password", "passwd", "pass", "pwd"];
const TOKEN_LABELS: &[&str] = &["token", "access_token", "auth_code", "code"];

fn labeled_field(label: &str) -> Regex {
    // Leading \b keeps `user` from matching inside `superuser`; the value is the
    // longest non-whitespace run after the separator, on the same line.
    let pattern = format!(r"(?i)\b{}[ \t]*[:=\-][ \t]*(\S+)", regex::escape(label));
    Regex::new(&pattern).unwrap_or_else(|e| panic!("invalid label pattern {pattern:?}: {e}"))
}

fn family(labels: &[&str]) -> Vec<Regex> {
    labels.iter().map(|label| labeled_field(label)).collect()
}

static USERNAME_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| family(USERNAME_LABELS));
static PASSWORD_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| family(PASSWORD_LABELS));
static TOKEN_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| family(TOKEN_LABELS));

static KEY_VALUE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b([a-z][a-z0-9_]*)[ \t]*[:=][ \t]*(\S+)").expect("valid regex"));

fn first_match(patterns: &[Regex], raw: &str) -> Option<String> {
    patterns.iter().find_map(|re| {
        re.captures(raw)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().to_string())
    })
}

fn is_known_label(key: &str) -> bool {
    USERNAME_LABELS
        .iter()
        .chain(PASSWORD_LABELS)
        .chain(TOKEN_LABELS)
        .any(|label| label.eq_ignore_ascii_case(key))
}

fn unlabeled_pairs(raw: &str) -> Option<BTreeMap<String, String>> {
    let mut extra = BTreeMap::new();
    for caps in KEY_VALUE.captures_iter(raw) {
        let (Some(key), Some(value)) = (caps.get(1), caps.get(2)) else {
            continue;
        };
        if is_known_label(key.as_str()) {
            continue;
        }
        extra
            .entry(key.as_str().to_ascii_lowercase())
            .or_insert_with(|| value.as_str().to_string());
    }
    (!extra.is_empty()).then_some(extra)
}

/// Parse one delivered string. Never fails.
pub fn parse(raw: &str) -> Credential {
    let mut credential = Credential {
        raw: raw.to_string(),
        username: first_match(&USERNAME_PATTERNS, raw),
        password: first_match(&PASSWORD_PATTERNS, raw),
        token: first_match(&TOKEN_PATTERNS, raw),
        extra: None,
    };

    // Without any labeled field the text is not key/value shaped, so leave it
    // raw instead of guessing at `alice:secret` style pairs.
    if credential.is_structured() {
        credential.extra = unlabeled_pairs(raw);
    }
    credential
}

/// Parse every delivered string of one order, preserving order.
pub fn parse_all<I, S>(delivered: I) -> Vec<Credential>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    delivered.into_iter().map(|raw| parse(raw.as_ref())).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn username_and_password_pair() {
        let c = parse("username:alice password:secret");
        assert_eq!(c.raw, "username:alice password:secret");
        assert_eq!(c.username.as_deref(), Some("alice"));
        assert_eq!(c.password.as_deref(), Some("secret"));
        assert_eq!(c.token, None);
        assert_eq!(c.extra, None);
    }

    #[test]
    fn unrecognized_text_keeps_only_raw() {
        let c = parse("no recognizable format here");
        assert_eq!(
            c,
            Credential {
                raw: "no recognizable format here".to_string(),
                ..Credential::default()
            }
        );
    }

    #[test]
    fn empty_string_is_preserved() {
        let c = parse("");
        assert_eq!(c.raw, "");
        assert!(!c.is_structured());
    }

    #[test]
    fn separators_and_case_variants() {
        let c = parse("Login = bob\nPASS - hunter2\ncode: 123-456");
        assert_eq!(c.username.as_deref(), Some("bob"));
        assert_eq!(c.password.as_deref(), Some("hunter2"));
        assert_eq!(c.token.as_deref(), Some("123-456"));
    }

    #[test]
    fn label_priority_within_a_family() {
        // `username` outranks `account` even though `account` appears first.
        let c = parse("account:acme-01 username:carol");
        assert_eq!(c.username.as_deref(), Some("carol"));
        assert_eq!(c.extra, None);
    }

    #[test]
    fn label_inside_a_longer_word_does_not_match() {
        let c = parse("superuser:root");
        assert_eq!(c.username, None);
        assert_eq!(c.extra, None);
    }

    #[test]
    fn families_are_independent() {
        let c = parse("token=abc.def");
        assert_eq!(c.token.as_deref(), Some("abc.def"));
        assert_eq!(c.username, None);
        assert_eq!(c.password, None);
    }

    #[test]
    fn extra_collects_unlabeled_pairs_next_to_known_fields() {
        let c = parse("user:dave pass:pw recovery=r3c0v3ry Region: EU");
        let extra = c.extra.unwrap();
        assert_eq!(extra.get("recovery").map(String::as_str), Some("r3c0v3ry"));
        assert_eq!(extra.get("region").map(String::as_str), Some("EU"));
        assert_eq!(extra.len(), 2);
    }

    #[test]
    fn blank_value_does_not_take_the_next_line() {
        let c = parse("Username:\nPassword: secret\nRegion:\nnote: x");
        assert_eq!(c.username, None);
        assert_eq!(c.password.as_deref(), Some("secret"));
        let extra = c.extra.unwrap();
        assert_eq!(extra.len(), 1);
        assert_eq!(extra.get("note").map(String::as_str), Some("x"));
    }

    #[test]
    fn colon_pairs_without_labels_stay_raw() {
        let c = parse("alice:secret");
        assert!(!c.is_structured());
        assert_eq!(c.extra, None);
    }

    #[test]
    fn serializes_without_empty_fields() {
        let json = serde_json::to_value(parse("username:alice password:secret")).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "raw": "username:alice password:secret",
                "username": "alice",
                "password": "secret"
            })
        );
    }

    #[test]
    fn parse_all_preserves_order() {
        let parsed = parse_all(["user:a", "user:b"]);
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0].username.as_deref(), Some("a"));
        assert_eq!(parsed[1].username.as_deref(), Some("b"));
    }

    proptest! {
        #[test]
        fn raw_is_always_lossless(raw in any::<String>()) {
            prop_assert_eq!(parse(&raw).raw, raw);
        }
    }
}
