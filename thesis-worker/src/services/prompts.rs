//! Prompt construction for generation calls
//!
//! Prompts are plain strings; the pipeline logic never depends on their wording,
//! only on the reply formats they ask for (Markdown body, JSON, patch blocks).

use crate::models::{CitationStyle, DefectReport, OutlineNode, ReferenceRecord, ThesisSpec};

/// Literal reply that asks for a whole chapter chunk to be removed
pub const DELETE_MARKER: &str = "[[DELETE_CHAPTER]]";

const WRITING_RULES: &str = "\
Write academic prose only. No tables, images, charts or diagrams. \
No table of contents, no bibliography, no title page. \
Do not mention being an AI or any inability to produce content. \
Avoid personal pronouns; prefer impersonal constructions. \
Vary sentence length and openings.";

fn citation_rules(style: CitationStyle) -> &'static str {
    match style {
        CitationStyle::Apa | CitationStyle::Harvard => {
            "Cite in-text as (Surname, Year, p. X). Every citation carries a page number."
        }
        CitationStyle::Mla => "Cite in-text as (Surname Page). Every citation carries a page number.",
        CitationStyle::DeutscheZitierweise => {
            "Cite with footnote markers ^1, ^2 placed after the statement and give the \
             footnote definitions as [^N]: lines at the end of the section. \
             Every footnote carries a page number (S. X)."
        }
    }
}

/// Source list handed to section generation
pub fn format_sources(records: &[ReferenceRecord]) -> String {
    if records.is_empty() {
        return "No sources available. Do not invent citations.".to_string();
    }

    let mut out = String::from("Use ONLY these sources. Never invent authors, titles or years.\n");
    for (i, r) in records.iter().enumerate() {
        let authors = if r.authors.is_empty() {
            "Unknown".to_string()
        } else {
            r.authors.join("; ")
        };
        let year = r
            .year
            .map(|y| y.to_string())
            .unwrap_or_else(|| "n.d.".to_string());
        out.push_str(&format!("\n[{}] {} ({}). {}", i + 1, authors, year, r.title));
        if let (Some(start), Some(end)) = (r.page_start, r.page_end) {
            out.push_str(&format!(", pp. {}-{}", start, end));
        }
        if let Some(abstract_text) = &r.abstract_text {
            let short: String = abstract_text.chars().take(300).collect();
            out.push_str(&format!("\n    {}", short));
        }
    }
    out
}

pub struct SectionPrompt<'a> {
    pub spec: &'a ThesisSpec,
    pub leaf: &'a OutlineNode,
    pub budget: usize,
    pub sources: &'a [ReferenceRecord],
    pub upcoming: &'a [&'a OutlineNode],
    /// Words already written for this leaf (continuation attempts)
    pub written_words: usize,
}

pub fn section_prompt(p: &SectionPrompt<'_>) -> String {
    let upcoming = if p.upcoming.is_empty() {
        "This is the last section.".to_string()
    } else {
        let titles: Vec<String> = p
            .upcoming
            .iter()
            .map(|n| format!("{} {}", n.id, n.title))
            .collect();
        format!(
            "Later sections (do not anticipate their content): {}",
            titles.join("; ")
        )
    };

    let task = if p.written_words == 0 {
        format!(
            "Write section {} \"{}\" of the thesis \"{}\" ({}). Length: about {} words. \
             Output only the body text, without the section heading.",
            p.leaf.id, p.leaf.title, p.spec.title, p.spec.field, p.budget
        )
    } else {
        format!(
            "Continue section {} \"{}\" of the thesis \"{}\". {} of {} words are written; \
             add about {} more words that follow on from the text so far. \
             Output only the continuation, no headings, no repetition.",
            p.leaf.id,
            p.leaf.title,
            p.spec.title,
            p.written_words,
            p.budget,
            p.budget.saturating_sub(p.written_words)
        )
    };

    let question = if p.spec.research_question.is_empty() {
        String::new()
    } else {
        format!("\nResearch question: {}", p.spec.research_question)
    };
    let mandatory = if p.spec.mandatory_sources.is_empty() {
        String::new()
    } else {
        format!(
            "\nMandatory sources that must be cited somewhere in the thesis: {}",
            p.spec.mandatory_sources.join("; ")
        )
    };

    format!(
        "{task}\nLanguage: {lang}.{question}{mandatory}\n{rules}\n{citations}\n{upcoming}\n\n{sources}",
        task = task,
        lang = p.spec.language,
        question = question,
        mandatory = mandatory,
        rules = WRITING_RULES,
        citations = citation_rules(p.spec.citation_style),
        upcoming = upcoming,
        sources = format_sources(p.sources),
    )
}

pub fn summary_prompt(leaf: &OutlineNode, content: &str) -> String {
    format!(
        "Summarize section {} \"{}\" for the author of the following sections. \
         Reply with JSON only: {{\"topics\": [...], \"terms\": [...], \"claims\": [...]}}. \
         At most 5 entries per list, each under 20 words.\n\n{}",
        leaf.id, leaf.title, content
    )
}

pub fn critique_prompt(chapter_text: &str, min_quote_chars: usize) -> String {
    format!(
        "Review this thesis chapter for factual errors, contradictions, duplicated passages, \
         broken structure, formatting problems (tables, images, stray headings) and \
         citation problems. Reply with a JSON array only, one object per defect: \
         {{\"location\": section id, \"quote\": verbatim excerpt of at least {} characters, \
         \"description\": ..., \"proposedFix\": ...}}. Reply [] when the chapter is fine.\n\n{}",
        min_quote_chars, chapter_text
    )
}

pub fn verify_prompt(chapter_text: &str, defects: &[DefectReport]) -> String {
    let listed: Vec<String> = defects
        .iter()
        .enumerate()
        .map(|(i, d)| format!("{}. \"{}\": {}", i + 1, d.quote, d.description))
        .collect();
    format!(
        "These defects were reported earlier for the chapter below. Check ONLY these; \
         do not report anything new. Reply with a JSON array of the numbers of the \
         defects that are still present, e.g. [1, 3], or [] if all are fixed.\n\n\
         Defects:\n{}\n\nChapter:\n{}",
        listed.join("\n"),
        chapter_text
    )
}

pub fn repair_prompt(section_id: &str, section_text: &str, defects: &[DefectReport]) -> String {
    let listed: Vec<String> = defects
        .iter()
        .map(|d| {
            format!(
                "- Quote: \"{}\"\n  Problem: {}\n  Fix: {}",
                d.quote, d.description, d.proposed_fix
            )
        })
        .collect();
    format!(
        "Fix the listed defects in section {id}. Do NOT rewrite the section. Reply only with \
         one or more patch blocks of the form\n\
         <<<<<<< SEARCH\nexact text from the section\n=======\nreplacement text\n>>>>>>> REPLACE\n\
         The SEARCH text must be copied verbatim from the section. If the whole section is a \
         duplicate of another section and should be removed, reply with {marker} only.\n\n\
         Defects:\n{defects}\n\nSection {id}:\n{text}",
        id = section_id,
        marker = DELETE_MARKER,
        defects = listed.join("\n"),
        text = section_text
    )
}

pub fn rewrite_prompt(paragraph: &str, markers: &[String], language: &str) -> String {
    let keep = if markers.is_empty() {
        "The paragraph has no citations.".to_string()
    } else {
        format!(
            "Keep these citation markers exactly as written: {}",
            markers.join(", ")
        )
    };
    format!(
        "Rewrite the paragraph so it reads like careful human academic writing in {}. \
         Mix short and long sentences, vary openings, drop stock transitions. \
         Keep every fact, number, name and year. {} Keep the length within 5%. \
         Reply with the rewritten paragraph only.\n\n{}",
        language, keep, paragraph
    )
}

pub fn relevance_prompt(spec: &ThesisSpec, records: &[ReferenceRecord]) -> String {
    let listed: Vec<String> = records
        .iter()
        .enumerate()
        .map(|(i, r)| {
            let abstract_text: String = r
                .abstract_text
                .as_deref()
                .unwrap_or("")
                .chars()
                .take(400)
                .collect();
            format!("{}. {} ({:?}) {}", i, r.title, r.year, abstract_text)
        })
        .collect();
    let chapters: Vec<String> = spec
        .outline
        .iter()
        .map(|c| format!("{} {}", c.id, c.title))
        .collect();
    format!(
        "Rate how useful each reference is for the thesis \"{}\" in {} (chapters: {}). \
         Reply with JSON only: [{{\"index\": n, \"score\": 0-100}}, ...].\n\n{}",
        spec.title,
        spec.field,
        chapters.join("; "),
        listed.join("\n")
    )
}
