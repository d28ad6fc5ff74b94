//! # Authorization
//!
//! Allow-list authorizer: access is granted when the identity's roles or
//! groups intersect the configured allow lists. Principals come from
//! templates or from the identity's normalized usernames; TTL clamping
//! against the policy bounds happens later, during spec construction.

use std::collections::{BTreeMap, HashSet};
use std::time::Duration;

use anyhow::Result;

use crate::domain::{
    normalize_principals, DenyCode, Identity, PolicyDecision, PolicyDeny, SignContext,
};
use crate::service::Authorizer;

/// Allow rules and defaults for the reference authorizer.
#[derive(Debug, Clone, Default)]
pub struct AllowListConfig {
    /// Any of these roles or groups grants access. Both empty means deny
    /// by default.
    pub allow_roles: Vec<String>,
    pub allow_groups: Vec<String>,
    /// Principal templates supporting `{username}` and `{emailLocal}`
    /// placeholders. Empty means "use the identity's normalized usernames".
    pub principal_templates: Vec<String>,
    /// Applied when the request does not ask for a specific TTL.
    pub default_ttl: Duration,
    /// Optional `source-address` critical option, one CIDR per entry.
    pub source_cidrs: Vec<String>,
}

pub struct AllowListAuthorizer {
    cfg: AllowListConfig,
}

impl AllowListAuthorizer {
    pub fn new(cfg: AllowListConfig) -> Self {
        AllowListAuthorizer { cfg }
    }

    fn allowed(&self, id: &Identity) -> bool {
        if self.cfg.allow_roles.is_empty() && self.cfg.allow_groups.is_empty() {
            return false;
        }
        intersects_fold(&self.cfg.allow_roles, &id.roles)
            || intersects_fold(&self.cfg.allow_groups, &id.groups)
    }

    fn build_principals(&self, id: &Identity) -> Vec<String> {
        if self.cfg.principal_templates.is_empty() {
            return id.normalized_usernames();
        }
        let email_local = match id.email.find('@') {
            Some(i) if i > 0 => &id.email[..i],
            _ => id.email.as_str(),
        };
        let mut out = Vec::with_capacity(self.cfg.principal_templates.len());
        for template in &self.cfg.principal_templates {
            let s = template
                .replace("{username}", &id.username)
                .replace("{emailLocal}", email_local);
            let s = s.trim();
            if !s.is_empty() {
                out.push(s.to_string());
            }
        }
        out
    }
}

impl Authorizer for AllowListAuthorizer {
    fn decide(&self, id: &Identity, ctx: &SignContext) -> Result<PolicyDecision> {
        if !self.allowed(id) {
            return Err(PolicyDeny {
                code: DenyCode::DefaultDeny,
                message: "access denied".to_string(),
            }
            .into());
        }

        let principals = normalize_principals(&self.build_principals(id));
        if principals.is_empty() {
            return Err(PolicyDeny {
                code: DenyCode::PrincipalNotAllowed,
                message: "no principals".to_string(),
            }
            .into());
        }

        let ttl = if ctx.requested_ttl > Duration::ZERO {
            ctx.requested_ttl
        } else {
            self.cfg.default_ttl
        };

        let mut critical_options = BTreeMap::new();
        if !self.cfg.source_cidrs.is_empty() {
            let cidrs = self
                .cfg
                .source_cidrs
                .iter()
                .map(|c| c.trim())
                .filter(|c| !c.is_empty())
                .collect::<Vec<_>>()
                .join(",");
            critical_options.insert("source-address".to_string(), cidrs);
        }

        Ok(PolicyDecision {
            principals,
            ttl,
            critical_options,
            extensions: BTreeMap::from([("permit-pty".to_string(), String::new())]),
        })
    }
}

/// Case-insensitive, whitespace-trimmed intersection check.
fn intersects_fold(a: &[String], b: &[String]) -> bool {
    if a.is_empty() || b.is_empty() {
        return false;
    }
    let set: HashSet<String> = a.iter().map(|s| s.trim().to_lowercase()).collect();
    b.iter().any(|s| set.contains(&s.trim().to_lowercase()))
}

#[cfg(test)]
mod test {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn ctx() -> SignContext {
        SignContext {
            requested_ttl: Duration::ZERO,
            requested_hints: Vec::new(),
            source_ip: "10.1.2.3".into(),
            now: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
            trace_id: "trace".into(),
        }
    }

    fn identity() -> Identity {
        Identity {
            subject: "sub".into(),
            username: "alice".into(),
            email: "alice@example.com".into(),
            roles: vec!["Dev".into()],
            groups: vec!["platform".into()],
            ..Identity::default()
        }
    }

    fn deny_of(err: anyhow::Error) -> PolicyDeny {
        err.downcast::<PolicyDeny>().expect("expected PolicyDeny")
    }

    #[test]
    fn empty_allow_lists_deny_by_default() {
        let authz = AllowListAuthorizer::new(AllowListConfig::default());
        let deny = deny_of(authz.decide(&identity(), &ctx()).unwrap_err());
        assert_eq!(deny.code, DenyCode::DefaultDeny);
    }

    #[test]
    fn role_match_is_case_insensitive() {
        let authz = AllowListAuthorizer::new(AllowListConfig {
            allow_roles: vec![" dev ".into()],
            default_ttl: Duration::from_secs(3600),
            ..AllowListConfig::default()
        });
        let decision = authz.decide(&identity(), &ctx()).unwrap();
        assert_eq!(decision.principals, ["alice"]);
    }

    #[test]
    fn group_match_grants_access() {
        let authz = AllowListAuthorizer::new(AllowListConfig {
            allow_groups: vec!["PLATFORM".into()],
            default_ttl: Duration::from_secs(3600),
            ..AllowListConfig::default()
        });
        assert!(authz.decide(&identity(), &ctx()).is_ok());
    }

    #[test]
    fn wrong_role_denies() {
        let authz = AllowListAuthorizer::new(AllowListConfig {
            allow_roles: vec!["ops".into()],
            ..AllowListConfig::default()
        });
        let deny = deny_of(authz.decide(&identity(), &ctx()).unwrap_err());
        assert_eq!(deny.code, DenyCode::DefaultDeny);
    }

    #[test]
    fn templates_substitute_placeholders() {
        let authz = AllowListAuthorizer::new(AllowListConfig {
            allow_roles: vec!["dev".into()],
            principal_templates: vec![
                "{username}".into(),
                "svc-{emailLocal}".into(),
                "   ".into(),
            ],
            default_ttl: Duration::from_secs(3600),
            ..AllowListConfig::default()
        });
        let decision = authz.decide(&identity(), &ctx()).unwrap();
        assert_eq!(decision.principals, ["alice", "svc-alice"]);
    }

    #[test]
    fn unresolvable_templates_deny_with_principal_code() {
        let mut id = identity();
        id.username.clear();
        id.email.clear();
        let authz = AllowListAuthorizer::new(AllowListConfig {
            allow_roles: vec!["dev".into()],
            principal_templates: vec!["{username}".into()],
            ..AllowListConfig::default()
        });
        let deny = deny_of(authz.decide(&id, &ctx()).unwrap_err());
        assert_eq!(deny.code, DenyCode::PrincipalNotAllowed);
    }

    #[test]
    fn requested_ttl_wins_over_default() {
        let authz = AllowListAuthorizer::new(AllowListConfig {
            allow_roles: vec!["dev".into()],
            default_ttl: Duration::from_secs(3600),
            ..AllowListConfig::default()
        });
        let mut c = ctx();
        c.requested_ttl = Duration::from_secs(7200);
        let decision = authz.decide(&identity(), &c).unwrap();
        assert_eq!(decision.ttl, Duration::from_secs(7200));

        c.requested_ttl = Duration::ZERO;
        let decision = authz.decide(&identity(), &c).unwrap();
        assert_eq!(decision.ttl, Duration::from_secs(3600));
    }

    #[test]
    fn source_cidrs_become_critical_option() {
        let authz = AllowListAuthorizer::new(AllowListConfig {
            allow_roles: vec!["dev".into()],
            source_cidrs: vec!["10.0.0.0/8 ".into(), " 192.168.0.0/16".into()],
            default_ttl: Duration::from_secs(3600),
            ..AllowListConfig::default()
        });
        let decision = authz.decide(&identity(), &ctx()).unwrap();
        assert_eq!(
            decision.critical_options.get("source-address").unwrap(),
            "10.0.0.0/8,192.168.0.0/16"
        );
    }

    #[test]
    fn permit_pty_extension_is_default() {
        let authz = AllowListAuthorizer::new(AllowListConfig {
            allow_roles: vec!["dev".into()],
            default_ttl: Duration::from_secs(3600),
            ..AllowListConfig::default()
        });
        let decision = authz.decide(&identity(), &ctx()).unwrap();
        assert_eq!(decision.extensions.get("permit-pty").unwrap(), "");
    }
}
