//! Credential check strategies
//!
//! Picked once at startup by [`build_authenticator`]:
//! - `simulated`: the captured descriptor is derived from the identity
//!   itself, so any enrolled account matches its own template
//! - `descriptor`: the request carries a live descriptor sample that is
//!   compared character by character with the stored template

use std::sync::Arc;

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use crate::config::{AuthConfig, AuthenticatorKind};
use crate::ports::{AuthOutcome, Authenticator};

/// Confidence reported for an exact descriptor match
pub const EXACT_MATCH_CONFIDENCE: f64 = 0.95;

const DESCRIPTOR_LEN: usize = 32;

/// Deterministic enrollment descriptor for an identity
pub fn simulated_descriptor(identity: &str) -> String {
    let digest = Sha256::digest(format!("{identity}_fingerprint_features").as_bytes());
    let mut hex = hex::encode(digest);
    hex.truncate(DESCRIPTOR_LEN);
    hex
}

/// Positional similarity of two descriptors, relative to the template length
pub fn descriptor_similarity(template: &str, sample: &str) -> f64 {
    if template.is_empty() || sample.is_empty() {
        return 0.0;
    }
    if template == sample {
        return EXACT_MATCH_CONFIDENCE;
    }
    let common = template
        .bytes()
        .zip(sample.bytes())
        .filter(|(a, b)| a == b)
        .count();
    common as f64 / template.len() as f64
}

#[derive(Debug, Clone)]
pub struct SimulatedAuthenticator {
    match_threshold: f64,
}

impl SimulatedAuthenticator {
    pub fn new(match_threshold: f64) -> Self {
        Self { match_threshold }
    }
}

#[async_trait]
impl Authenticator for SimulatedAuthenticator {
    fn name(&self) -> &str {
        "simulated"
    }

    async fn verify(
        &self,
        identity: &str,
        stored_template: Option<&str>,
        _live_sample: Option<&str>,
    ) -> AuthOutcome {
        let Some(template) = stored_template else {
            tracing::warn!(identity, "No credential enrolled");
            return AuthOutcome::rejected();
        };
        let confidence = descriptor_similarity(template, &simulated_descriptor(identity));
        AuthOutcome {
            matched: confidence >= self.match_threshold,
            confidence,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DescriptorAuthenticator {
    match_threshold: f64,
}

impl DescriptorAuthenticator {
    pub fn new(match_threshold: f64) -> Self {
        Self { match_threshold }
    }
}

#[async_trait]
impl Authenticator for DescriptorAuthenticator {
    fn name(&self) -> &str {
        "descriptor"
    }

    async fn verify(
        &self,
        identity: &str,
        stored_template: Option<&str>,
        live_sample: Option<&str>,
    ) -> AuthOutcome {
        let (Some(template), Some(sample)) = (stored_template, live_sample) else {
            tracing::warn!(identity, "Missing template or live sample");
            return AuthOutcome::rejected();
        };
        let confidence = descriptor_similarity(template, sample);
        AuthOutcome {
            matched: confidence >= self.match_threshold,
            confidence,
        }
    }
}

pub fn build_authenticator(config: &AuthConfig) -> Arc<dyn Authenticator> {
    match config.authenticator {
        AuthenticatorKind::Simulated => Arc::new(SimulatedAuthenticator::new(config.match_threshold)),
        AuthenticatorKind::Descriptor => {
            Arc::new(DescriptorAuthenticator::new(config.match_threshold))
        }
    }
}
