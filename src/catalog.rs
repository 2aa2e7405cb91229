//! The fixed, ordered section catalog and its per-section constraints.
//!
//! Final assembly order always follows catalog order regardless of the
//! order sections were generated in. Word bounds are a startup-validated
//! lookup table; a missing entry is a configuration error, never a
//! request-time surprise.

use serde::{Deserialize, Serialize};

/// Constraints and guidance for one catalog section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectionSpec {
    pub name: String,
    pub min_words: usize,
    pub max_words: usize,
    /// Structural guidance included verbatim in the generation prompt.
    pub structure: String,
}

impl SectionSpec {
    fn new(name: &str, min_words: usize, max_words: usize, structure: &str) -> Self {
        Self {
            name: name.to_string(),
            min_words,
            max_words,
            structure: structure.to_string(),
        }
    }

    pub fn within_bounds(&self, words: usize) -> bool {
        (self.min_words..=self.max_words).contains(&words)
    }
}

/// Ordered collection of section specs for one paper layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectionCatalog {
    sections: Vec<SectionSpec>,
}

impl SectionCatalog {
    /// The standard IEEE conference paper layout.
    pub fn ieee_conference() -> Self {
        Self {
            sections: vec![
                SectionSpec::new(
                    "Abstract",
                    200,
                    300,
                    "Background, problem, method, results, conclusion; standalone, no citations",
                ),
                SectionSpec::new(
                    "Introduction",
                    400,
                    600,
                    "Background, problem statement, motivation, numbered contributions",
                ),
                SectionSpec::new(
                    "Literature Review",
                    500,
                    800,
                    "Categorized related work, critical analysis, research gaps",
                ),
                SectionSpec::new(
                    "Methodology",
                    1200,
                    2500,
                    "System architecture, algorithm design, implementation details",
                ),
                SectionSpec::new(
                    "System Design",
                    500,
                    800,
                    "Architecture overview, component design, interface specifications",
                ),
                SectionSpec::new(
                    "Implementation",
                    400,
                    700,
                    "Technology stack, development process, key challenges",
                ),
                SectionSpec::new(
                    "Experimental Setup",
                    300,
                    500,
                    "Dataset description, evaluation metrics, baseline methods",
                ),
                SectionSpec::new(
                    "Results",
                    500,
                    800,
                    "Quantitative results, performance comparison, discussion",
                ),
                SectionSpec::new(
                    "Discussion",
                    400,
                    600,
                    "Key findings, implications, limitations",
                ),
                SectionSpec::new(
                    "Conclusion",
                    200,
                    300,
                    "Summary, key contributions, impact",
                ),
                SectionSpec::new(
                    "Future Work",
                    200,
                    300,
                    "Immediate extensions, long-term directions",
                ),
            ],
        }
    }

    pub fn sections(&self) -> &[SectionSpec] {
        &self.sections
    }

    pub fn names(&self) -> Vec<String> {
        self.sections.iter().map(|s| s.name.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.sections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }

    /// Spec lookup by section name.
    pub fn spec(&self, name: &str) -> Option<&SectionSpec> {
        self.sections.iter().find(|s| s.name == name)
    }

    /// Position used for final assembly ordering.
    pub fn order_of(&self, name: &str) -> Option<usize> {
        self.sections.iter().position(|s| s.name == name)
    }
}
