use once_cell::sync::Lazy;
use overseer_core::{normalize_provider, CredentialNeed, NeedSource};
use regex::Regex;

/// In-text conventions a participant uses to ask for a secret it does not
/// have. Recognized even when the auditor fails to flag the request.
static MARKER_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        Regex::new(r"(?i)REQUEST_API_KEY\s*:\s*([A-Za-z0-9_\-]+)").unwrap(),
        Regex::new(r"(?i)NEED_API_KEY\s*:\s*([A-Za-z0-9_\-]+)").unwrap(),
    ]
});

/// Scan message text for credential markers, normalized and deduplicated
/// in order of first appearance.
pub fn extract_credential_needs(text: &str) -> Vec<CredentialNeed> {
    let mut needs: Vec<CredentialNeed> = Vec::new();
    for pattern in MARKER_PATTERNS.iter() {
        for caps in pattern.captures_iter(text) {
            let provider = normalize_provider(&caps[1]);
            if provider.is_empty() || needs.iter().any(|n| n.provider == provider) {
                continue;
            }
            needs.push(CredentialNeed::new(
                &provider,
                "requested by a participant via in-message marker",
                NeedSource::Marker,
            ));
        }
    }
    needs
}
