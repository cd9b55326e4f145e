//! Reference strings for arXiv papers.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, Utc};
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CitationStyle {
    Apa,
    Mla,
    Chicago,
    Bibtex,
}

impl CitationStyle {
    pub const ALL: [CitationStyle; 4] = [
        CitationStyle::Apa,
        CitationStyle::Mla,
        CitationStyle::Chicago,
        CitationStyle::Bibtex,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CitationStyle::Apa => "apa",
            CitationStyle::Mla => "mla",
            CitationStyle::Chicago => "chicago",
            CitationStyle::Bibtex => "bibtex",
        }
    }

    /// Resolve configured style names. `"all"` expands to every style; unknown names are
    /// logged and skipped; an empty result falls back to APA.
    pub fn resolve<S: AsRef<str>>(names: &[S]) -> Vec<CitationStyle> {
        let mut out = Vec::new();
        for n in names {
            let n = n.as_ref().trim().to_ascii_lowercase();
            if n == "all" {
                return Self::ALL.to_vec();
            }
            match n.parse::<CitationStyle>() {
                Ok(s) if !out.contains(&s) => out.push(s),
                Ok(_) => {}
                Err(_) => warn!(style = %n, "unknown citation style, skipping"),
            }
        }
        if out.is_empty() {
            out.push(CitationStyle::Apa);
        }
        out
    }
}

impl fmt::Display for CitationStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CitationStyle {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CitationStyle::ALL
            .iter()
            .copied()
            .find(|c| c.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown citation style `{s}`"))
    }
}

/// What a citation needs to know about a paper.
#[derive(Debug, Clone, Copy)]
pub struct PaperRef<'a> {
    pub title: &'a str,
    pub authors: &'a [String],
    pub published: DateTime<Utc>,
    pub arxiv_id: &'a str,
}

pub fn format_citation(paper: &PaperRef<'_>, style: CitationStyle) -> String {
    let year = paper.published.year();
    let title = paper.title.trim();
    let id = paper.arxiv_id;
    match style {
        CitationStyle::Apa => {
            let authors = match paper.authors {
                [] => "Anonymous".to_string(),
                [a] => a.clone(),
                [a, b] => format!("{a} & {b}"),
                [a, ..] => format!("{a} et al."),
            };
            let title = if title.ends_with('.') {
                title.to_string()
            } else {
                format!("{title}.")
            };
            format!("{authors} ({year}). {title} arXiv preprint arXiv:{id}")
        }
        CitationStyle::Mla => {
            let authors = match paper.authors {
                [] => "Anonymous".to_string(),
                [a] => last_first(a),
                [a, ..] => format!("{}, et al", last_first(a)),
            };
            format!("{authors}. \"{title}\". arXiv:{id}, {year}.")
        }
        CitationStyle::Chicago => {
            let authors = match paper.authors {
                [] => "Anonymous".to_string(),
                [a] => a.clone(),
                [a, b] => format!("{a}, and {b}"),
                [a, ..] => format!("{a} et al."),
            };
            format!("{authors}. \"{title}\" arXiv:{id} ({year}).")
        }
        CitationStyle::Bibtex => {
            let authors = if paper.authors.is_empty() {
                "Anonymous".to_string()
            } else {
                paper.authors.join(" and ")
            };
            format!(
                "@article{{{id},\n  author = {{{authors}}},\n  title = {{{title}}},\n  journal = {{arXiv preprint arXiv:{id}}},\n  year = {{{year}}},\n  url = {{https://arxiv.org/abs/{id}}}\n}}"
            )
        }
    }
}

/// "Ada King Lovelace" -> "Lovelace, Ada King"
fn last_first(name: &str) -> String {
    let parts: Vec<&str> = name.split_whitespace().collect();
    match parts.split_last() {
        Some((last, rest)) if !rest.is_empty() => format!("{last}, {}", rest.join(" ")),
        _ => name.trim().to_string(),
    }
}

pub fn citations_for(paper: &PaperRef<'_>, styles: &[CitationStyle]) -> BTreeMap<String, String> {
    styles
        .iter()
        .map(|s| (s.as_str().to_string(), format_citation(paper, *s)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn authors(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn paper<'a>(authors: &'a [String]) -> PaperRef<'a> {
        PaperRef {
            title: "Scaling Laws for Agents",
            authors,
            published: Utc.with_ymd_and_hms(2024, 11, 3, 0, 0, 0).unwrap(),
            arxiv_id: "2411.01234v1",
        }
    }

    #[test]
    fn apa_author_forms() {
        let one = authors(&["Ada Lovelace"]);
        let two = authors(&["Ada Lovelace", "Alan Turing"]);
        let many = authors(&["Ada Lovelace", "Alan Turing", "Grace Hopper"]);
        assert_eq!(
            format_citation(&paper(&one), CitationStyle::Apa),
            "Ada Lovelace (2024). Scaling Laws for Agents. arXiv preprint arXiv:2411.01234v1"
        );
        assert!(format_citation(&paper(&two), CitationStyle::Apa).starts_with("Ada Lovelace & Alan Turing (2024)"));
        assert!(format_citation(&paper(&many), CitationStyle::Apa).starts_with("Ada Lovelace et al. (2024)"));
        assert!(format_citation(&paper(&[]), CitationStyle::Apa).starts_with("Anonymous (2024)"));
    }

    #[test]
    fn mla_inverts_first_author() {
        let many = authors(&["Ada Lovelace", "Alan Turing"]);
        assert_eq!(
            format_citation(&paper(&many), CitationStyle::Mla),
            "Lovelace, Ada, et al. \"Scaling Laws for Agents\". arXiv:2411.01234v1, 2024."
        );
    }

    #[test]
    fn chicago_and_bibtex() {
        let two = authors(&["Ada Lovelace", "Alan Turing"]);
        assert_eq!(
            format_citation(&paper(&two), CitationStyle::Chicago),
            "Ada Lovelace, and Alan Turing. \"Scaling Laws for Agents\" arXiv:2411.01234v1 (2024)."
        );
        let bib = format_citation(&paper(&two), CitationStyle::Bibtex);
        assert!(bib.starts_with("@article{2411.01234v1,"));
        assert!(bib.contains("author = {Ada Lovelace and Alan Turing}"));
        assert!(bib.contains("url = {https://arxiv.org/abs/2411.01234v1}"));
        assert!(bib.ends_with('}'));
    }

    #[test]
    fn style_resolution() {
        assert_eq!(CitationStyle::resolve(&["all"]), CitationStyle::ALL.to_vec());
        assert_eq!(
            CitationStyle::resolve(&["MLA", "harvard", "mla", "bibtex"]),
            vec![CitationStyle::Mla, CitationStyle::Bibtex]
        );
        assert_eq!(CitationStyle::resolve::<&str>(&[]), vec![CitationStyle::Apa]);
    }
}
