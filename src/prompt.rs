//! Prompt assembly for grounded section generation.
//!
//! Prompt building is pure string construction: given the same document,
//! section spec and retrieved context it always produces the same prompt,
//! which keeps generation inputs reproducible and testable without any
//! model in the loop.

use crate::catalog::SectionSpec;
use crate::models::Document;
use crate::retrieval::RetrievedChunk;

/// Builds the generation prompt for one section from ranked context.
///
/// Context chunks appear in rank order, numbered from 1; the numbering is
/// what the model's bracketed citations refer back to.
pub fn build_section_prompt(
    document: &Document,
    spec: &SectionSpec,
    context: &[RetrievedChunk],
) -> String {
    let mut prompt = String::new();
    push_header(&mut prompt, document, spec);

    prompt.push_str(
        "Ground every claim in the reference excerpts below. Cite supporting \
         excerpts with bracketed numbers like [1] or [2,3]. Do not introduce \
         facts that the excerpts do not support.\n\n",
    );
    prompt.push_str("Reference excerpts:\n");
    for (i, retrieved) in context.iter().enumerate() {
        prompt.push_str(&format!("[{}] {}\n\n", i + 1, retrieved.chunk.text.trim()));
    }
    push_footer(&mut prompt, spec);
    prompt
}

/// Context-free fallback prompt used when retrieval found nothing above
/// the similarity floor and the pipeline is configured to degrade rather
/// than fail.
pub fn build_degraded_prompt(document: &Document, spec: &SectionSpec) -> String {
    let mut prompt = String::new();
    push_header(&mut prompt, document, spec);
    prompt.push_str(
        "No reference excerpts are available for this section. Write from \
         general knowledge of the stated domain, avoid specific numeric \
         claims, and do not fabricate citations.\n\n",
    );
    push_footer(&mut prompt, spec);
    prompt
}

fn push_header(prompt: &mut String, document: &Document, spec: &SectionSpec) {
    prompt.push_str(&format!(
        "Write the \"{}\" section of an IEEE conference paper.\n\n",
        spec.name
    ));
    prompt.push_str(&format!("Paper title: {}\n", document.title));
    prompt.push_str(&format!("Research domain: {}\n", document.domain));
    if !document.keywords.is_empty() {
        prompt.push_str(&format!("Keywords: {}\n", document.keywords.join(", ")));
    }
    prompt.push('\n');
}

fn push_footer(prompt: &mut String, spec: &SectionSpec) {
    prompt.push_str(&format!(
        "Section structure: {}\n",
        spec.structure
    ));
    prompt.push_str(&format!(
        "Length: between {} and {} words.\n",
        spec.min_words, spec.max_words
    ));
    prompt.push_str(
        "Output only the section body text, with no heading and no preamble.\n",
    );
}
