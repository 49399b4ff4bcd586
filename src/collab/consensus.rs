//! Consensus evaluation.
//!
//! Each persona's payload may carry a numeric risk (or approval) signal plus
//! `goals`/`requirements`/`recommendations` arrays. Alignment is the mean
//! pairwise agreement over the risk signals; low alignment produces a
//! mediation package built from the personas' shared goals and each one's
//! top-ranked requirement.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// Alignment above this approves outright.
pub const APPROVE_THRESHOLD: f64 = 0.8;
/// Alignment at or above this still approves, with notes attached.
pub const NOTES_THRESHOLD: f64 = 0.6;
/// Signal assumed for personas that return no numeric risk/approval.
pub const NEUTRAL_SIGNAL: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Verdict {
    Approved,
    ApprovedWithNotes,
    MediationRequired,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsensusOutcome {
    pub alignment: f64,
    pub verdict: Verdict,
    /// Every persona's recommendations, pooled (APPROVED / APPROVED_WITH_NOTES).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub combined_recommendations: Vec<Value>,
    /// Per-persona minor concerns (APPROVED_WITH_NOTES).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub notes: Vec<Value>,
    /// The differing positions (MEDIATION_REQUIRED).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub positions: Vec<Value>,
    /// Suggested compromise (MEDIATION_REQUIRED).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compromise: Option<Value>,
}

/// Extract the persona's risk signal: a numeric `risk` field, `1 - approval`,
/// or neutral when neither is present.
pub fn risk_signal(payload: Option<&Value>) -> f64 {
    let Some(payload) = payload else {
        return NEUTRAL_SIGNAL;
    };
    if let Some(risk) = payload.get("risk").and_then(Value::as_f64) {
        return risk.clamp(0.0, 1.0);
    }
    if let Some(approval) = payload.get("approval").and_then(Value::as_f64) {
        return (1.0 - approval).clamp(0.0, 1.0);
    }
    NEUTRAL_SIGNAL
}

/// Mean pairwise agreement, where agreement between two personas is
/// `1 - |risk_i - risk_j|`. Fewer than two signals align trivially.
pub fn alignment_score(signals: &[f64]) -> f64 {
    if signals.len() < 2 {
        return 1.0;
    }
    let mut sum = 0.0;
    let mut pairs = 0u32;
    for i in 0..signals.len() {
        for j in (i + 1)..signals.len() {
            sum += 1.0 - (signals[i] - signals[j]).abs();
            pairs += 1;
        }
    }
    sum / f64::from(pairs)
}

fn string_array(payload: &Value, key: &str) -> Vec<String> {
    payload
        .get(key)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// Goals present in every persona's `goals` array, order taken from the
/// first persona.
fn shared_goals(payloads: &[(String, Option<&Value>)]) -> Vec<String> {
    let mut goal_sets: Vec<Vec<String>> = Vec::new();
    for (_, payload) in payloads {
        if let Some(payload) = payload {
            let goals = string_array(payload, "goals");
            if !goals.is_empty() {
                goal_sets.push(goals);
            }
        }
    }
    let Some((first, rest)) = goal_sets.split_first() else {
        return Vec::new();
    };
    first
        .iter()
        .filter(|goal| rest.iter().all(|set| set.contains(goal)))
        .cloned()
        .collect()
}

/// Compromise proposal: the intersection of shared goals plus each persona's
/// top-ranked requirement.
fn build_compromise(payloads: &[(String, Option<&Value>)]) -> Value {
    let included: Vec<Value> = payloads
        .iter()
        .filter_map(|(persona, payload)| {
            let payload = payload.as_ref()?;
            let top = string_array(payload, "requirements").into_iter().next()?;
            Some(json!({"persona": persona, "requirement": top}))
        })
        .collect();

    json!({
        "shared_goals": shared_goals(payloads),
        "included_requirements": included,
    })
}

/// Evaluate a consensus round over `(persona, payload)` pairs. Personas that
/// failed pass `None` and contribute the neutral signal.
pub fn evaluate(payloads: &[(String, Option<&Value>)]) -> ConsensusOutcome {
    let signals: Vec<f64> = payloads
        .iter()
        .map(|(_, payload)| risk_signal(*payload))
        .collect();
    let alignment = alignment_score(&signals);

    if alignment > APPROVE_THRESHOLD {
        return ConsensusOutcome {
            alignment,
            verdict: Verdict::Approved,
            combined_recommendations: pooled(payloads, "recommendations"),
            notes: Vec::new(),
            positions: Vec::new(),
            compromise: None,
        };
    }

    if alignment >= NOTES_THRESHOLD {
        return ConsensusOutcome {
            alignment,
            verdict: Verdict::ApprovedWithNotes,
            combined_recommendations: pooled(payloads, "recommendations"),
            notes: pooled(payloads, "concerns"),
            positions: Vec::new(),
            compromise: None,
        };
    }

    let positions = payloads
        .iter()
        .map(|(persona, payload)| {
            json!({
                "persona": persona,
                "risk": risk_signal(*payload),
                "position": payload.cloned().unwrap_or(Value::Null),
            })
        })
        .collect();

    ConsensusOutcome {
        alignment,
        verdict: Verdict::MediationRequired,
        combined_recommendations: Vec::new(),
        notes: Vec::new(),
        positions,
        compromise: Some(build_compromise(payloads)),
    }
}

fn pooled(payloads: &[(String, Option<&Value>)], key: &str) -> Vec<Value> {
    payloads
        .iter()
        .filter_map(|(persona, payload)| {
            let payload = payload.as_ref()?;
            let entries = payload.get(key)?.as_array()?;
            if entries.is_empty() {
                return None;
            }
            Some(json!({"persona": persona, key: entries}))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(risk: f64) -> Value {
        json!({"risk": risk, "recommendations": ["ship it"]})
    }

    #[test]
    fn close_risks_approve() {
        let p1 = payload(0.2);
        let p2 = payload(0.25);
        let p3 = payload(0.3);
        let payloads = vec![
            ("athena".to_string(), Some(&p1)),
            ("artemis".to_string(), Some(&p2)),
            ("hestia".to_string(), Some(&p3)),
        ];
        let outcome = evaluate(&payloads);
        // Pairwise: 0.95, 0.9, 0.95 -> mean ~0.9333
        assert!(outcome.alignment > APPROVE_THRESHOLD);
        assert_eq!(outcome.verdict, Verdict::Approved);
        assert_eq!(outcome.combined_recommendations.len(), 3);
        assert!(outcome.compromise.is_none());
    }

    #[test]
    fn moderate_spread_approves_with_notes() {
        let p1 = json!({"risk": 0.1, "concerns": ["latency budget"]});
        let p2 = json!({"risk": 0.45, "concerns": ["cost"]});
        let payloads = vec![
            ("athena".to_string(), Some(&p1)),
            ("hestia".to_string(), Some(&p2)),
        ];
        let outcome = evaluate(&payloads);
        assert!((NOTES_THRESHOLD..=APPROVE_THRESHOLD).contains(&outcome.alignment));
        assert_eq!(outcome.verdict, Verdict::ApprovedWithNotes);
        assert_eq!(outcome.notes.len(), 2);
    }

    #[test]
    fn wide_spread_requires_mediation_with_compromise() {
        let p1 = json!({
            "risk": 0.05,
            "goals": ["reliability", "velocity"],
            "requirements": ["feature flags", "canary deploys"]
        });
        let p2 = json!({
            "risk": 0.9,
            "goals": ["reliability", "auditability"],
            "requirements": ["full review", "threat model"]
        });
        let payloads = vec![
            ("artemis".to_string(), Some(&p1)),
            ("hestia".to_string(), Some(&p2)),
        ];
        let outcome = evaluate(&payloads);
        assert!(outcome.alignment < NOTES_THRESHOLD);
        assert_eq!(outcome.verdict, Verdict::MediationRequired);
        assert_eq!(outcome.positions.len(), 2);

        let compromise = outcome.compromise.unwrap();
        assert_eq!(compromise["shared_goals"], json!(["reliability"]));
        let included = compromise["included_requirements"].as_array().unwrap();
        assert_eq!(included.len(), 2);
        assert_eq!(included[0]["requirement"], "feature flags");
        assert_eq!(included[1]["requirement"], "threat model");
    }

    #[test]
    fn missing_signal_is_neutral() {
        let p = json!({"content": "no opinion"});
        assert!((risk_signal(Some(&p)) - NEUTRAL_SIGNAL).abs() < f64::EPSILON);
        assert!((risk_signal(None) - NEUTRAL_SIGNAL).abs() < f64::EPSILON);
    }

    #[test]
    fn approval_converts_to_risk() {
        let p = json!({"approval": 0.9});
        assert!((risk_signal(Some(&p)) - 0.1).abs() < 1e-9);
    }

    #[test]
    fn single_persona_aligns_trivially() {
        assert!((alignment_score(&[0.7]) - 1.0).abs() < f64::EPSILON);
        assert!((alignment_score(&[]) - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn alignment_matches_hand_computation() {
        let score = alignment_score(&[0.2, 0.25, 0.3]);
        assert!((score - (0.95 + 0.9 + 0.95) / 3.0).abs() < 1e-9);
    }
}
