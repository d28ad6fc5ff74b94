use std::collections::{BTreeMap, HashSet};

/// Maximum length in bytes of a single principal or username.
pub const PRINCIPAL_MAX_LEN: usize = 64;

/// Who the identity provider says you are, normalized for policy logic.
/// No tokens, no raw JWTs, just the distilled claims we care about.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Identity {
    /// Stable unique id (`sub`).
    pub subject: String,
    /// Preferred username, lowercased.
    pub username: String,
    pub email: String,
    /// App roles take precedence over groups in policy checks.
    pub roles: Vec<String>,
    pub groups: Vec<String>,
    /// Small set of extra normalized claims kept for audit, not the raw token.
    pub extra_claims: BTreeMap<String, serde_json::Value>,
}

impl Identity {
    /// Returns candidate Unix usernames derived from this identity:
    /// the sanitized username followed by the sanitized email local-part,
    /// with empties and duplicates removed. Does not hit the OS.
    pub fn normalized_usernames(&self) -> Vec<String> {
        unique_non_empty(vec![
            safe_username(&self.username),
            safe_username(local_part(&self.email)),
        ])
    }
}

/// A deduplicated, sanitized set of certificate principals.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PrincipalSet {
    list: Vec<String>,
}

impl PrincipalSet {
    /// Builds a principal set from raw candidates. Email-looking candidates
    /// contribute their local-part; each candidate is sanitized, trailing
    /// `._-` residue is trimmed unless that would empty the value, and
    /// empties and duplicates are dropped preserving first-seen order.
    pub fn new<I, S>(candidates: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut seen = HashSet::new();
        let mut list = Vec::new();
        for candidate in candidates {
            let mut p = candidate.as_ref().to_string();
            if p.contains('@') {
                let lp = local_part(&p);
                if !lp.is_empty() {
                    p = lp.to_string();
                }
            }
            let mut p = safe_username(&p);
            let trimmed = p.trim_end_matches(['.', '_', '-']);
            if !trimmed.is_empty() && trimmed.len() != p.len() {
                p = trimmed.to_string();
            }
            if p.is_empty() || seen.contains(&p) {
                continue;
            }
            seen.insert(p.clone());
            list.push(p);
        }
        PrincipalSet { list }
    }

    pub fn list(&self) -> &[String] {
        &self.list
    }

    pub fn into_list(self) -> Vec<String> {
        self.list
    }
}

/// Returns a deduplicated, normalized copy of the given principals.
pub fn normalize_principals<S: AsRef<str>>(principals: &[S]) -> Vec<String> {
    PrincipalSet::new(principals).into_list()
}

/// Whether a candidate sanitizes to a non-empty principal.
pub fn is_valid_principal(s: &str) -> bool {
    !safe_username(s).is_empty()
}

/// Extracts the local part of an email address (before `@`). Returns an
/// empty string when there is no `@` or it sits at the start.
pub(crate) fn local_part(email: &str) -> &str {
    match email.find('@') {
        Some(i) if i > 0 => &email[..i],
        _ => "",
    }
}

/// Sanitizes a candidate into a safe username: trimmed, lowercased, any
/// character outside `[a-z0-9._-]` replaced with `-`, truncated to
/// [`PRINCIPAL_MAX_LEN`] bytes. Empty input stays empty.
pub(crate) fn safe_username(s: &str) -> String {
    let s = s.trim().to_lowercase();
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            'a'..='z' | '0'..='9' | '.' | '_' | '-' => out.push(c),
            _ => out.push('-'),
        }
    }
    // Everything above is ASCII, so byte truncation is char-safe.
    out.truncate(PRINCIPAL_MAX_LEN);
    out
}

fn unique_non_empty(values: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for v in values {
        if v.is_empty() || seen.contains(&v) {
            continue;
        }
        seen.insert(v.clone());
        out.push(v);
    }
    out
}
