use overseer_core::{ActionDescriptor, Verdict, VerdictKind};
use serde_json::Value;
use tracing::debug;

/// Slice out the outermost JSON object even when the model wrapped it in
/// prose or code fences.
fn extract_json_object(raw: &str) -> Option<&str> {
    let trimmed = raw.trim();
    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    if end <= start {
        return None;
    }
    Some(&trimmed[start..=end])
}

/// The defined degradation for audit output that cannot be used: a
/// low-confidence pass (fail-open, the default) or a low-confidence fail.
/// Never an error past this boundary.
pub fn fallback_verdict(fail_open: bool, why: &str) -> Verdict {
    let kind = if fail_open {
        VerdictKind::Pass
    } else {
        VerdictKind::Fail
    };
    Verdict::new(kind, 0.2, why)
}

/// Parse the auditor's response content into a Verdict. Required fields
/// are verdict/confidence/reason; anything missing or malformed degrades
/// through `fallback_verdict`.
pub fn parse_verdict(raw: &str, fail_open: bool) -> Verdict {
    let Some(json_str) = extract_json_object(raw) else {
        debug!("No JSON object in verifier output");
        return fallback_verdict(fail_open, "Verifier returned no JSON object.");
    };

    let value: Value = match serde_json::from_str(json_str) {
        Ok(v) => v,
        Err(e) => {
            debug!(error = %e, "Verifier output is not valid JSON");
            return fallback_verdict(fail_open, "Verifier returned invalid JSON.");
        }
    };

    let kind = match value.get("verdict").and_then(|v| v.as_str()) {
        Some("pass") => VerdictKind::Pass,
        Some("fail") => VerdictKind::Fail,
        _ => {
            return fallback_verdict(fail_open, "Verifier output missing a usable verdict field.");
        }
    };

    let confidence = value
        .get("confidence")
        .and_then(|v| v.as_f64())
        .unwrap_or(0.0);
    let reason = value
        .get("reason")
        .and_then(|v| v.as_str())
        .unwrap_or("No reason provided")
        .to_string();

    let suggested_actions: Vec<ActionDescriptor> = value
        .get("suggested_actions")
        .and_then(|v| v.as_array())
        .map(|items| {
            items
                .iter()
                .filter_map(|item| item.as_str())
                .map(ActionDescriptor::parse)
                .collect()
        })
        .unwrap_or_default();

    let patch_for_agent = value
        .get("patch_for_agent")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());

    let mut verdict = Verdict::new(kind, confidence, &reason);
    verdict.suggested_actions = suggested_actions;
    verdict.patch_for_agent = patch_for_agent;
    verdict
}
