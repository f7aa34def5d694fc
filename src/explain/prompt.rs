use crate::detect::ThreatBatch;
use askama::Template;

#[derive(Template)]
#[template(
    source = "[ROLE] You are a senior hospital cybersecurity analyst briefing medical staff.
[CONTEXT] Our anomaly detection model flagged the following device telemetry records:
{{ evidence }}
[TASK] Write a concise (2-3 sentence) summary for non-technical medical staff explaining:
1. What the suspicious activity is.
2. The potential risk to patient data confidentiality.
3. One recommended immediate action.
",
    ext = "txt"
)]
struct AnalystPrompt<'a> {
    evidence: &'a str,
}

/// Render the single user message sent to the completion service.
pub fn render(batch: &ThreatBatch) -> askama::Result<String> {
    let evidence = batch.to_string();
    AnalystPrompt {
        evidence: evidence.trim_end(),
    }
    .render()
}
