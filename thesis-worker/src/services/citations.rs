//! Citation markers, cited-source extraction and bibliography formatting

use crate::models::reference::author_surname;
use crate::models::{CitationStyle, ReferenceRecord};
use once_cell::sync::Lazy;
use regex::Regex;

/// `^3`, `[^3]` and `[^3]:` footnote markers
static FOOTNOTE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\[?\^(\d+)\]?(:)?").unwrap());

/// `(Müller, 2020, S. 12)`, `(Smith and Lee 2019)`, `(Smith, 2020a, p. 4)`
static PARENTHETICAL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\([^()]*\p{Lu}[^()]*?\b(?:1[5-9]|20)\d{2}[a-z]?\b[^()]*\)").unwrap()
});

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CitationCounts {
    pub footnote_refs: usize,
    pub footnote_defs: usize,
    pub parenthetical: usize,
}

impl CitationCounts {
    pub fn total(&self) -> usize {
        self.footnote_refs + self.footnote_defs + self.parenthetical
    }
}

/// Every citation marker in order of appearance
pub fn extract_markers(text: &str) -> Vec<String> {
    let mut found: Vec<(usize, String)> = FOOTNOTE
        .find_iter(text)
        .map(|m| (m.start(), m.as_str().to_string()))
        .chain(
            PARENTHETICAL
                .find_iter(text)
                .map(|m| (m.start(), m.as_str().to_string())),
        )
        .collect();
    found.sort_by_key(|(start, _)| *start);
    found.into_iter().map(|(_, marker)| marker).collect()
}

pub fn count_citations(text: &str) -> CitationCounts {
    let mut counts = CitationCounts::default();
    for caps in FOOTNOTE.captures_iter(text) {
        if caps.get(2).is_some() {
            counts.footnote_defs += 1;
        } else {
            counts.footnote_refs += 1;
        }
    }
    counts.parenthetical = PARENTHETICAL.find_iter(text).count();
    counts
}

/// True when `rewritten` carries exactly the markers of `original`
pub fn markers_preserved(original: &str, rewritten: &str) -> bool {
    let mut before = extract_markers(original);
    let mut after = extract_markers(rewritten);
    before.sort();
    after.sort();
    before == after
}

/// References whose first-author surname appears in `text` near their year
pub fn cited_references(text: &str, references: &[ReferenceRecord]) -> Vec<ReferenceRecord> {
    references
        .iter()
        .filter(|r| is_cited(text, r))
        .cloned()
        .collect()
}

fn is_cited(text: &str, record: &ReferenceRecord) -> bool {
    let Some(surname) = record.first_author_surname() else {
        return false;
    };
    let Ok(pattern) = Regex::new(&format!(r"(?i)\b{}\b", regex::escape(&surname))) else {
        return false;
    };
    let Some(year) = record.year else {
        return pattern.is_match(text);
    };
    let year = year.to_string();
    let near_year = pattern.find_iter(text).any(|m| {
        let window: String = text[m.end()..].chars().take(80).collect();
        window.contains(&year)
    });
    near_year
}

/// Bibliography section for the cited references, sorted by surname and year
pub fn render_bibliography(
    references: &[ReferenceRecord],
    style: CitationStyle,
    language: &str,
) -> String {
    let mut sorted: Vec<&ReferenceRecord> = references.iter().collect();
    sorted.sort_by(|a, b| {
        let sa = a.first_author_surname().unwrap_or_default().to_lowercase();
        let sb = b.first_author_surname().unwrap_or_default().to_lowercase();
        sa.cmp(&sb).then(a.year.cmp(&b.year))
    });

    let heading = if language.starts_with("de") {
        "Literaturverzeichnis"
    } else {
        "References"
    };
    let entries: Vec<String> = sorted
        .iter()
        .map(|r| format!("- {}", format_entry(r, style)))
        .collect();
    format!("# {}\n\n{}", heading, entries.join("\n"))
}

/// One bibliography entry
pub fn format_entry(record: &ReferenceRecord, style: CitationStyle) -> String {
    let names: Vec<(String, String)> = record.authors.iter().filter_map(|a| split_name(a)).collect();
    let title = record.title.trim().trim_end_matches('.');

    let mut entry = match style {
        CitationStyle::Apa => {
            let authors = join_names(&names, ", ", ", & ", |(s, g)| with_initials(s, g));
            let year = record.year.map(|y| y.to_string()).unwrap_or_else(|| "n.d.".into());
            format!("{} ({}). {}.", authors, year, title)
        }
        CitationStyle::Harvard => {
            let authors = join_names(&names, ", ", " and ", |(s, g)| with_initials(s, g));
            let year = record.year.map(|y| y.to_string()).unwrap_or_else(|| "n.d.".into());
            format!("{} ({}) {}.", authors, year, title)
        }
        CitationStyle::Mla => {
            let authors = match names.as_slice() {
                [] => "Unknown".to_string(),
                [(s, g)] => full_inverted(s, g),
                [(s1, g1), (s2, g2)] => format!("{}, and {} {}", full_inverted(s1, g1), g2, s2),
                [(s, g), ..] => format!("{}, et al", full_inverted(s, g)),
            };
            format!("{}. \"{}.\"", authors.trim_end_matches('.'), title)
        }
        CitationStyle::DeutscheZitierweise => {
            let authors = join_names(&names, "; ", "; ", |(s, g)| full_inverted(s, g));
            let year = record.year.map(|y| y.to_string()).unwrap_or_else(|| "o. J.".into());
            format!("{} ({}): {}.", authors, year, title)
        }
    };

    if let Some(journal) = record.journal.as_deref().filter(|j| !j.is_empty()) {
        match style {
            CitationStyle::DeutscheZitierweise => entry.push_str(&format!(" In: {}.", journal)),
            CitationStyle::Mla => {
                entry.push_str(&format!(" {}", journal));
                if let Some(year) = record.year {
                    entry.push_str(&format!(", {}", year));
                }
                entry.push('.');
            }
            _ => entry.push_str(&format!(" {}.", journal)),
        }
    } else if style == CitationStyle::Mla {
        if let Some(year) = record.year {
            entry.push_str(&format!(" {}.", year));
        }
    }

    if let (Some(start), Some(end)) = (record.page_start, record.page_end) {
        match style {
            CitationStyle::DeutscheZitierweise => entry.push_str(&format!(" S. {}–{}.", start, end)),
            _ => entry.push_str(&format!(" pp. {}–{}.", start, end)),
        }
    }

    if let Some(doi) = record.doi.as_deref() {
        entry.push_str(&format!(" https://doi.org/{}", crate::models::normalize_external_id(doi)));
    }
    entry
}

/// (surname, given names)
fn split_name(author: &str) -> Option<(String, String)> {
    let surname = author_surname(author)?;
    let given = match author.split_once(',') {
        Some((_, given)) => given.trim().to_string(),
        None => author
            .trim()
            .strip_suffix(surname.as_str())
            .unwrap_or("")
            .trim()
            .to_string(),
    };
    Some((surname, given))
}

fn with_initials(surname: &str, given: &str) -> String {
    let initials: Vec<String> = given
        .split(|c: char| c.is_whitespace() || c == '-')
        .filter_map(|part| part.chars().next())
        .filter(|c| c.is_alphabetic())
        .map(|c| format!("{}.", c))
        .collect();
    if initials.is_empty() {
        surname.to_string()
    } else {
        format!("{}, {}", surname, initials.join(" "))
    }
}

fn full_inverted(surname: &str, given: &str) -> String {
    if given.is_empty() {
        surname.to_string()
    } else {
        format!("{}, {}", surname, given)
    }
}

fn join_names<F>(names: &[(String, String)], sep: &str, last_sep: &str, fmt: F) -> String
where
    F: Fn(&(String, String)) -> String,
{
    let formatted: Vec<String> = names.iter().map(fmt).collect();
    match formatted.len() {
        0 => "Unknown".to_string(),
        1 => formatted[0].clone(),
        n => format!("{}{}{}", formatted[..n - 1].join(sep), last_sep, formatted[n - 1]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_count_citation_forms() {
        let text = "Remote work rose (Müller, 2020, S. 12) and fell^1 again (Smith and Lee 2019).\n\n\
                    [^1]: Müller 2020, S. 14.";
        let counts = count_citations(text);
        assert_eq!(counts.parenthetical, 2);
        assert_eq!(counts.footnote_refs, 1);
        assert_eq!(counts.footnote_defs, 1);
        assert_eq!(counts.total(), 4);
    }

    #[test]
    fn test_plain_parentheses_ignored() {
        assert_eq!(count_citations("Productivity (measured weekly) improved in 2020.").total(), 0);
    }

    #[test]
    fn test_markers_preserved() {
        let original = "A claim (Smith, 2019, p. 4). Another^2.";
        assert!(markers_preserved(original, "Another^2. A claim (Smith, 2019, p. 4)."));
        assert!(!markers_preserved(original, "A claim. Another^2."));
    }

    #[test]
    fn test_cited_subset() {
        let refs = vec![
            ReferenceRecord::new("Remote Work", vec!["Müller, Jana".to_string()], Some(2020)),
            ReferenceRecord::new("Office Life", vec!["Tom Smith".to_string()], Some(2018)),
            ReferenceRecord::new("Hybrid", vec!["Ana Costa".to_string()], Some(2021)),
        ];
        let text = "As shown by Müller (2020, p. 3), and contrary to (Smith, 2019).";
        let cited = cited_references(text, &refs);
        let titles: Vec<_> = cited.iter().map(|r| r.title.as_str()).collect();
        assert_eq!(titles, ["Remote Work"]);
    }

    #[test]
    fn test_entry_styles() {
        let mut record = ReferenceRecord::new(
            "Remote Work and Productivity",
            vec!["Müller, Jana Maria".to_string(), "Tom Smith".to_string()],
            Some(2020),
        );
        record.journal = Some("Journal of Work".to_string());
        record.page_start = Some(1);
        record.page_end = Some(12);

        assert_eq!(
            format_entry(&record, CitationStyle::Apa),
            "Müller, J. M., & Smith, T. (2020). Remote Work and Productivity. Journal of Work. pp. 1–12."
        );
        assert_eq!(
            format_entry(&record, CitationStyle::DeutscheZitierweise),
            "Müller, Jana Maria; Smith, Tom (2020): Remote Work and Productivity. In: Journal of Work. S. 1–12."
        );
        assert!(format_entry(&record, CitationStyle::Mla)
            .starts_with("Müller, Jana Maria, and Tom Smith. \"Remote Work and Productivity.\" Journal of Work, 2020."));
    }

    #[test]
    fn test_bibliography_sorted() {
        let refs = vec![
            ReferenceRecord::new("B", vec!["Zed, A".to_string()], Some(2001)),
            ReferenceRecord::new("A", vec!["Abel, B".to_string()], Some(1999)),
        ];
        let out = render_bibliography(&refs, CitationStyle::Harvard, "de");
        assert!(out.starts_with("# Literaturverzeichnis"));
        assert!(out.find("Abel").unwrap() < out.find("Zed").unwrap());
    }
}
