//! Normalization of raw model output into valid LaTeX body text.
//!
//! The pipeline is a fixed sequence: strip conversational preamble, expand
//! bracketed citations into `\cite` commands, convert markdown lists into
//! LaTeX environments, then escape special characters. Citations and lists
//! run before escaping so the backslashes they introduce survive; the
//! escape step protects inline math spans (`$...$`) and the commands the
//! earlier steps inserted.

use std::sync::LazyLock;

use regex::Regex;

/// Model output after LaTeX normalization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessedSection {
    pub content: String,
    /// Word count of the prose, excluding LaTeX commands.
    pub word_count: usize,
}

/// Runs the full normalization pipeline on raw model output.
pub fn to_latex(raw: &str) -> ProcessedSection {
    let text = strip_preamble(raw);
    let text = normalize_citations(&text);
    let text = normalize_lists(&text);
    let content = escape_latex(&text);
    let word_count = word_count(&content);
    ProcessedSection {
        content,
        word_count,
    }
}

static PREAMBLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(here('s| is| are)|sure[,!]?|certainly[,!]?|below is|okay[,!]?|of course)")
        .expect("preamble pattern")
});

/// Drops a leading conversational line ("Here is the abstract:") and any
/// markdown code fences wrapping the body.
pub fn strip_preamble(raw: &str) -> String {
    let mut text = raw.trim();
    if let Some(rest) = text.strip_prefix("```") {
        // Opening fence, optionally with a language tag.
        text = rest.split_once('\n').map(|(_, body)| body).unwrap_or("");
        text = text.strip_suffix("```").unwrap_or(text).trim();
    }
    if let Some((first, rest)) = text.split_once('\n') {
        if PREAMBLE.is_match(first.trim()) && first.trim_end().ends_with(':') {
            return rest.trim().to_string();
        }
    }
    text.to_string()
}

static CITATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\[(\d+(?:\s*[-,]\s*\d+)*)\]").expect("citation pattern")
});

/// Expands `[1]`, `[2,5]` and `[3-6]` into one `\cite{refN}` per number,
/// in order of appearance. Repeats are kept as written. A bracket with a
/// reversed range like `[7-5]` is malformed and passes through unchanged.
pub fn normalize_citations(text: &str) -> String {
    CITATION
        .replace_all(text, |caps: &regex::Captures<'_>| {
            expand_bracket(&caps[1]).unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

fn expand_bracket(body: &str) -> Option<String> {
    let mut out = String::new();
    for part in body.split(',') {
        let part = part.trim();
        if let Some((lo, hi)) = part.split_once('-') {
            let (lo, hi) = (lo.trim().parse::<u32>().ok()?, hi.trim().parse::<u32>().ok()?);
            if lo > hi {
                return None;
            }
            for n in lo..=hi {
                out.push_str(&format!("\\cite{{ref{n}}}"));
            }
        } else if let Ok(n) = part.parse::<u32>() {
            out.push_str(&format!("\\cite{{ref{n}}}"));
        } else {
            return None;
        }
    }
    Some(out)
}

/// Converts contiguous runs of markdown bullet or numbered lines into
/// `itemize` / `enumerate` environments.
pub fn normalize_lists(text: &str) -> String {
    static BULLET: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"^\s*[-*\u{2022}]\s+(.*)$").expect("bullet pattern"));
    static NUMBERED: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"^\s*\d+[.)]\s+(.*)$").expect("numbered pattern"));

    #[derive(PartialEq, Clone, Copy)]
    enum Run {
        None,
        Itemize,
        Enumerate,
    }

    let mut out: Vec<String> = Vec::new();
    let mut run = Run::None;
    let close = |out: &mut Vec<String>, run: Run| match run {
        Run::Itemize => out.push("\\end{itemize}".into()),
        Run::Enumerate => out.push("\\end{enumerate}".into()),
        Run::None => {}
    };

    for line in text.lines() {
        let (kind, item) = if let Some(caps) = BULLET.captures(line) {
            (Run::Itemize, Some(caps[1].to_string()))
        } else if let Some(caps) = NUMBERED.captures(line) {
            (Run::Enumerate, Some(caps[1].to_string()))
        } else {
            (Run::None, None)
        };

        if kind != run {
            close(&mut out, run);
            match kind {
                Run::Itemize => out.push("\\begin{itemize}".into()),
                Run::Enumerate => out.push("\\begin{enumerate}".into()),
                Run::None => {}
            }
            run = kind;
        }
        match item {
            Some(item) => out.push(format!("\\item {item}")),
            None => out.push(line.to_string()),
        }
    }
    close(&mut out, run);
    out.join("\n")
}

static PROTECTED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?x)
        \$[^$\n]+\$                                  # inline math span
        | \\cite\{[^}]*\}                            # citations from normalization
        | \\(?:begin|end)\{(?:itemize|enumerate)\}   # list environments
        | \\item\b                                   # list items
        ",
    )
    .expect("protected pattern")
});

/// Escapes LaTeX special characters outside protected spans.
///
/// Protected spans are inline math and the commands inserted by earlier
/// pipeline steps; everything else gets `& % $ # _ { }` backslash-escaped
/// and `^ ~ \` replaced with their text-mode commands.
pub fn escape_latex(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut last = 0;
    for m in PROTECTED.find_iter(text) {
        escape_segment(&text[last..m.start()], &mut out);
        out.push_str(m.as_str());
        last = m.end();
    }
    escape_segment(&text[last..], &mut out);
    out
}

fn escape_segment(segment: &str, out: &mut String) {
    for c in segment.chars() {
        match c {
            '&' => out.push_str("\\&"),
            '%' => out.push_str("\\%"),
            '$' => out.push_str("\\$"),
            '#' => out.push_str("\\#"),
            '_' => out.push_str("\\_"),
            '{' => out.push_str("\\{"),
            '}' => out.push_str("\\}"),
            '^' => out.push_str("\\^{}"),
            '~' => out.push_str("\\textasciitilde{}"),
            '\\' => out.push_str("\\textbackslash{}"),
            other => out.push(other),
        }
    }
}

static COMMANDS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\\[a-zA-Z]+(\{[^}]*\})?|\\[\^~&%$#_{}]").expect("command pattern")
});

/// Counts prose words, ignoring LaTeX commands and their arguments.
pub fn word_count(content: &str) -> usize {
    COMMANDS
        .replace_all(content, " ")
        .split_whitespace()
        .filter(|token| token.chars().any(char::is_alphanumeric))
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preamble_line_is_stripped() {
        let raw = "Here is the abstract:\nDistributed tracing reduces debugging time.";
        assert_eq!(
            strip_preamble(raw),
            "Distributed tracing reduces debugging time."
        );
    }

    #[test]
    fn body_starting_with_prose_is_untouched() {
        let raw = "Certainly great results were observed.";
        assert_eq!(strip_preamble(raw), raw);
    }

    #[test]
    fn code_fences_are_removed() {
        let raw = "```latex\nThe method converges.\n```";
        assert_eq!(strip_preamble(raw), "The method converges.");
    }

    #[test]
    fn single_citation_expands() {
        assert_eq!(
            normalize_citations("as shown in [3]."),
            "as shown in \\cite{ref3}."
        );
    }

    #[test]
    fn comma_and_range_citations_expand_to_individual_cites() {
        assert_eq!(
            normalize_citations("prior work [1,3] and [5-7]"),
            "prior work \\cite{ref1}\\cite{ref3} and \\cite{ref5}\\cite{ref6}\\cite{ref7}"
        );
    }

    #[test]
    fn reversed_ranges_pass_through_unchanged() {
        assert_eq!(normalize_citations("broken [7-5] bracket"), "broken [7-5] bracket");
        assert_eq!(normalize_citations("mixed [1,7-5]"), "mixed [1,7-5]");
        // A valid bracket elsewhere still expands.
        assert_eq!(
            normalize_citations("[7-5] but [2] works"),
            "[7-5] but \\cite{ref2} works"
        );
    }

    #[test]
    fn repeated_citations_are_kept() {
        assert_eq!(
            normalize_citations("[2] then again [2]"),
            "\\cite{ref2} then again \\cite{ref2}"
        );
    }

    #[test]
    fn bullet_runs_become_itemize() {
        let text = "Findings:\n- low latency\n- high recall\nDone.";
        assert_eq!(
            normalize_lists(text),
            "Findings:\n\\begin{itemize}\n\\item low latency\n\\item high recall\n\\end{itemize}\nDone."
        );
    }

    #[test]
    fn numbered_runs_become_enumerate() {
        let text = "1. collect data\n2. train model";
        assert_eq!(
            normalize_lists(text),
            "\\begin{enumerate}\n\\item collect data\n\\item train model\n\\end{enumerate}"
        );
    }

    #[test]
    fn trailing_list_is_closed() {
        let text = "Steps:\n- only step";
        assert!(normalize_lists(text).ends_with("\\end{itemize}"));
    }

    #[test]
    fn special_characters_are_escaped() {
        assert_eq!(
            escape_latex("95% of R&D uses #1_a {braces} ^ ~"),
            "95\\% of R\\&D uses \\#1\\_a \\{braces\\} \\^{} \\textasciitilde{}"
        );
    }

    #[test]
    fn math_spans_pass_through_unescaped() {
        assert_eq!(escape_latex("50% & $x$"), "50\\% \\& $x$");
        let text = "accuracy $a_1 \\approx 95\\%$ overall_best";
        assert_eq!(
            escape_latex(text),
            "accuracy $a_1 \\approx 95\\%$ overall\\_best"
        );
    }

    #[test]
    fn inserted_commands_survive_escaping() {
        let text = "proved in \\cite{ref4}\n\\begin{itemize}\n\\item 100% coverage\n\\end{itemize}";
        let escaped = escape_latex(text);
        assert!(escaped.contains("\\cite{ref4}"));
        assert!(escaped.contains("\\begin{itemize}"));
        assert!(escaped.contains("\\item 100\\% coverage"));
    }

    #[test]
    fn word_count_ignores_commands() {
        assert_eq!(word_count("two words \\cite{ref1}"), 2);
        assert_eq!(
            word_count("\\begin{itemize}\n\\item one\n\\item two\n\\end{itemize}"),
            2
        );
    }

    #[test]
    fn full_pipeline_orders_citations_before_escaping() {
        let raw = "Here is the section:\nWe beat the baseline by 12% [1,2].\n- fast\n- accurate";
        let processed = to_latex(raw);
        assert!(processed.content.contains("12\\% \\cite{ref1}\\cite{ref2}."));
        assert!(processed.content.contains("\\begin{itemize}"));
        assert!(!processed.content.starts_with("Here is"));
        assert_eq!(processed.word_count, 8);
    }
}
