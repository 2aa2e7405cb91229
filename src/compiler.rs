//! IEEE paper assembly and external typesetting.
//!
//! Assembly is pure: document metadata and persisted sections fill a fixed
//! IEEEtran template through `<<PLACEHOLDER>>` substitution, authors are
//! grouped into one block per affiliation, and a bibliography is
//! synthesized from the distinct `\cite{refN}` keys appearing in the
//! section bodies. Typesetting shells out to the configured tool for
//! exactly two passes so citation references resolve; a typesetting
//! failure degrades to markup-only output rather than failing the paper.

use std::collections::BTreeSet;
use std::path::Path;
use std::process::Output;
use std::sync::LazyLock;
use std::time::Duration;

use miette::Diagnostic;
use regex::Regex;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, instrument, warn};

use crate::models::{Document, Section};
use crate::postprocess::escape_latex;

#[derive(Debug, Error, Diagnostic)]
pub enum CompileError {
    #[error("typesetting tool '{0}' is not installed")]
    #[diagnostic(
        code(paperweave::compiler::tool_missing),
        help("Install a TeX distribution or point PAPERWEAVE_LATEX_TOOL at one.")
    )]
    ToolMissing(String),

    #[error("typesetting pass {pass} failed:\n{log_tail}")]
    #[diagnostic(code(paperweave::compiler::tool_failed))]
    ToolFailed { pass: u8, log_tail: String },

    #[error("typesetting pass exceeded {0:?}")]
    #[diagnostic(code(paperweave::compiler::timeout))]
    Timeout(Duration),

    #[error("typesetting io error: {0}")]
    #[diagnostic(code(paperweave::compiler::io))]
    Io(#[from] std::io::Error),
}

/// Output of paper assembly: always the LaTeX source, plus the PDF when
/// typesetting succeeded.
#[derive(Debug, Clone)]
pub struct CompiledPaper {
    pub latex: String,
    pub pdf: Option<Vec<u8>>,
}

const TEMPLATE: &str = r"\documentclass[conference]{IEEEtran}
\usepackage{cite}
\usepackage{amsmath,amssymb,amsfonts}
\usepackage{graphicx}
\usepackage{textcomp}
\usepackage{xcolor}

\title{<<TITLE>>}
<<AUTHORS>>

\begin{document}
\maketitle

\begin{abstract}
<<ABSTRACT>>
\end{abstract}

\begin{IEEEkeywords}
<<KEYWORDS>>
\end{IEEEkeywords}

<<SECTIONS>>

\begin{thebibliography}{99}
<<REFERENCES>>
\end{thebibliography}

\end{document}
";

static CITE_KEY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\\cite\{ref(\d+)\}").expect("cite key pattern"));

/// Renders the complete LaTeX source for a document and its sections.
///
/// Sections are emitted in `order_index` order. The Abstract fills the
/// abstract environment instead of becoming a numbered section.
pub fn assemble(document: &Document, sections: &[Section]) -> String {
    let mut ordered: Vec<&Section> = sections.iter().collect();
    ordered.sort_by_key(|s| s.order_index);

    let abstract_text = ordered
        .iter()
        .find(|s| s.name == "Abstract")
        .map(|s| s.content.clone())
        .unwrap_or_default();

    let mut body = String::new();
    for section in ordered.iter().filter(|s| s.name != "Abstract") {
        body.push_str(&format!(
            "\\section{{{}}}\n{}\n\n",
            escape_latex(&section.name),
            section.content
        ));
    }

    TEMPLATE
        .replace("<<TITLE>>", &escape_latex(&document.title))
        .replace("<<AUTHORS>>", &author_blocks(document))
        .replace("<<ABSTRACT>>", &abstract_text)
        .replace("<<KEYWORDS>>", &escape_latex(&document.keywords.join(", ")))
        .replace("<<SECTIONS>>", body.trim_end())
        .replace("<<REFERENCES>>", &bibliography(sections))
}

/// One `\IEEEauthorblock` pair per affiliation, authors grouped under the
/// affiliation they were paired with, in first-appearance order.
fn author_blocks(document: &Document) -> String {
    if document.authors.is_empty() {
        return "\\author{}".to_string();
    }
    let mut groups: Vec<(String, Vec<String>)> = Vec::new();
    for (i, author) in document.authors.iter().enumerate() {
        let affiliation = document
            .affiliations
            .get(i)
            .or_else(|| document.affiliations.last())
            .cloned()
            .unwrap_or_default();
        match groups.iter_mut().find(|(a, _)| *a == affiliation) {
            Some((_, names)) => names.push(author.clone()),
            None => groups.push((affiliation, vec![author.clone()])),
        }
    }
    let blocks: Vec<String> = groups
        .into_iter()
        .map(|(affiliation, names)| {
            format!(
                "\\IEEEauthorblockN{{{}}}\n\\IEEEauthorblockA{{{}}}",
                escape_latex(&names.join(", ")),
                escape_latex(&affiliation)
            )
        })
        .collect();
    format!("\\author{{{}}}", blocks.join("\n\\and\n"))
}

/// `\bibitem` entries for every distinct citation key used by the
/// sections, in numeric order.
fn bibliography(sections: &[Section]) -> String {
    let mut keys: BTreeSet<u32> = BTreeSet::new();
    for section in sections {
        for caps in CITE_KEY.captures_iter(&section.content) {
            if let Ok(n) = caps[1].parse() {
                keys.insert(n);
            }
        }
    }
    keys.into_iter()
        .map(|n| format!("\\bibitem{{ref{n}}} Reference excerpt {n} from the uploaded corpus."))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Runs the external typesetting tool over assembled LaTeX.
pub struct LatexCompiler {
    tool: String,
    pass_timeout: Duration,
}

impl LatexCompiler {
    pub fn new(tool: impl Into<String>, pass_timeout: Duration) -> Self {
        Self {
            tool: tool.into(),
            pass_timeout,
        }
    }

    /// Whether the typesetting tool answers `--version`.
    pub async fn is_available(&self) -> bool {
        Command::new(&self.tool)
            .arg("--version")
            .output()
            .await
            .map(|out| out.status.success())
            .unwrap_or(false)
    }

    /// Typesets `latex` and returns the PDF bytes.
    ///
    /// Always exactly two passes: the second resolves the citation labels
    /// the first pass leaves dangling.
    #[instrument(skip(self, latex), fields(tool = %self.tool))]
    pub async fn compile(&self, latex: &str) -> Result<Vec<u8>, CompileError> {
        let workdir = tempfile::tempdir()?;
        let tex_path = workdir.path().join("paper.tex");
        tokio::fs::write(&tex_path, latex).await?;

        for pass in 1..=2u8 {
            let output = self.run_pass(workdir.path()).await?;
            if !output.status.success() {
                return Err(CompileError::ToolFailed {
                    pass,
                    log_tail: log_tail(&output.stdout),
                });
            }
            debug!(pass, "typesetting pass complete");
        }
        Ok(tokio::fs::read(workdir.path().join("paper.pdf")).await?)
    }

    async fn run_pass(&self, workdir: &Path) -> Result<Output, CompileError> {
        let run = Command::new(&self.tool)
            .arg("-interaction=nonstopmode")
            .arg("-halt-on-error")
            .arg("paper.tex")
            .current_dir(workdir)
            .output();
        match tokio::time::timeout(self.pass_timeout, run).await {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(err)) if err.kind() == std::io::ErrorKind::NotFound => {
                Err(CompileError::ToolMissing(self.tool.clone()))
            }
            Ok(Err(err)) => Err(CompileError::Io(err)),
            Err(_) => Err(CompileError::Timeout(self.pass_timeout)),
        }
    }

    /// Assembles and typesets, degrading to markup-only output when the
    /// tool is missing or fails. The LaTeX source is always returned.
    pub async fn compile_or_markup(
        &self,
        document: &Document,
        sections: &[Section],
    ) -> CompiledPaper {
        let latex = assemble(document, sections);
        match self.compile(&latex).await {
            Ok(pdf) => CompiledPaper {
                latex,
                pdf: Some(pdf),
            },
            Err(err) => {
                warn!(error = %err, "typesetting failed, returning markup only");
                CompiledPaper { latex, pdf: None }
            }
        }
    }
}

// Logs echo source lines, so the tail cut must not land inside a
// multibyte character.
fn log_tail(stdout: &[u8]) -> String {
    let log = String::from_utf8_lossy(stdout);
    let mut start = log.len().saturating_sub(2000);
    while !log.is_char_boundary(start) {
        start -= 1;
    }
    log[start..].to_string()
}
