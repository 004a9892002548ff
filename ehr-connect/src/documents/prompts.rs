use std::borrow::Cow;

use super::descriptor::DocumentDescriptor;

pub const TRUNCATION_MARKER: &str = "\n\n[Document truncated]";

pub const DOCUMENT_SYSTEM_PROMPT: &str = "You are a clinical documentation assistant supporting home health clinicians. \
Summarize the clinical document you are given for a nurse preparing for a home visit.

Use these sections when the document supports them:
1. **Reason for Document**: visit type, order or event that produced it
2. **Key Findings**: assessments, vital signs, wounds, functional status
3. **Diagnoses**: active problems named in the document
4. **Medications and Treatments**: changes, new orders, discontinued items
5. **Plan and Follow-up**: goals, frequency, referrals, monitoring

Report only what the document states. Do not infer diagnoses or add recommendations. \
Keep the summary under 250 words and use clear section headers.";

pub const CONSOLIDATION_SYSTEM_PROMPT: &str = "You are a clinical documentation assistant supporting home health clinicians. \
You are given summaries of several documents from one patient's chart, each labeled with its document type and date.

Write one consolidated clinical overview that:
- leads with the patient's current status and most recent findings
- notes changes over time, ordered by date
- reconciles overlapping information and flags contradictions between documents
- lists open follow-up items

Report only what the summaries state. Keep the overview under 350 words.";

/// Cut `text` to at most `max_chars` characters, appending a marker when
/// anything was dropped.
pub fn truncate_for_prompt(text: &str, max_chars: usize) -> Cow<'_, str> {
    match text.char_indices().nth(max_chars) {
        None => Cow::Borrowed(text),
        Some((byte_index, _)) => Cow::Owned(format!("{}{}", &text[..byte_index], TRUNCATION_MARKER)),
    }
}

pub fn document_prompt(document_type: &str, text: &str) -> String {
    format!(
        "Document type: {}\n\nDocument text:\n{}\n\nProvide the structured summary:",
        document_type, text
    )
}

/// User message for the cross-document call. Each summary is headed with
/// `Document N: <type> (<date>)`.
pub fn consolidation_prompt(
    patient_context: Option<&str>,
    summaries: &[(&DocumentDescriptor, &str)],
) -> String {
    let mut prompt = String::new();
    if let Some(context) = patient_context.map(str::trim).filter(|c| !c.is_empty()) {
        prompt.push_str(&format!("Patient context: {}\n\n", context));
    }
    prompt.push_str(&format!("{} document summaries follow.\n", summaries.len()));

    for (index, (document, summary)) in summaries.iter().enumerate() {
        prompt.push_str(&format!(
            "\nDocument {}: {} ({})\n{}\n",
            index + 1,
            document.document_type,
            document.date.as_deref().unwrap_or("undated"),
            summary.trim()
        ));
    }

    prompt.push_str("\nProvide the consolidated overview:");
    prompt
}
