//! # Kamini
//!
//! An SSH certificate authority that issues short-lived OpenSSH user
//! certificates to clients presenting an OpenID Connect bearer token.
//! The issuance pipeline runs AUTHN -> AUTHZ -> SERIAL -> SPEC -> SIGN ->
//! AUDIT per request; every attempt, successful or not, produces exactly
//! one structured, non-PII audit event.
//!
//! The crate is organized as pure domain primitives ([`domain`]), port
//! traits plus the orchestrating services ([`service`]), and one adapter
//! module per port: OIDC verification ([`auth`]), allow-list policy
//! ([`authorize`]), OpenSSH signing ([`signer`]), CA key loading
//! ([`keystore`]), serial allocation ([`storage`]), audit emission
//! ([`audit_sink`]) and logging ([`logging`]).

pub mod audit_sink;
pub mod auth;
pub mod authorize;
pub mod config;
pub mod domain;
pub mod keystore;
pub mod logging;
pub mod service;
pub mod signer;
pub mod storage;
