//! GIFT question bank parser.
//!
//! Supports the subset of GIFT that gifttest can present: category headers,
//! multiple-choice and true/false entries. Anything else is skipped with a
//! `ParseWarning`; a bad entry never stops the rest of the file from loading.

use std::fmt;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;

use crate::bank::QuestionBank;
use crate::model::{Answer, Question, QuestionId, QuestionKind, UNCATEGORIZED};

const CATEGORY_HEADER: &str = "$CATEGORY:";
const MISSING_WORD_BLANK: &str = "_____";
const FORMAT_PREFIXES: [&str; 4] = ["[html]", "[moodle]", "[plain]", "[markdown]"];

/// What went wrong with an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WarningKind {
    /// Broken syntax: no answer block, unterminated block, empty text.
    Malformed,
    /// Valid GIFT that gifttest does not practice (essay, numeric, matching).
    Unsupported,
    /// No answer is marked correct.
    NoCorrectAnswer,
    /// More than one `=` answer. The entry is kept.
    MultipleCorrect,
    /// `$CATEGORY:` with no name. Following entries go to the default bucket.
    EmptyCategory,
}

/// A recoverable problem found while parsing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParseWarning {
    /// 1-based line where the entry starts.
    pub line: usize,
    /// Entry title, when it had one.
    pub entry: Option<String>,
    pub kind: WarningKind,
    pub message: String,
}

impl ParseWarning {
    /// Whether the entry this warning refers to was left out of the bank.
    pub fn rejects_entry(&self) -> bool {
        matches!(
            self.kind,
            WarningKind::Malformed | WarningKind::Unsupported | WarningKind::NoCorrectAnswer
        )
    }
}

impl fmt::Display for ParseWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.entry {
            Some(name) => write!(f, "line {} [{}]: {}", self.line, name, self.message),
            None => write!(f, "line {}: {}", self.line, self.message),
        }
    }
}

/// Read and parse a GIFT file. The file path becomes the bank's source identity.
pub fn parse_file(path: &Path) -> Result<(QuestionBank, Vec<ParseWarning>)> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read GIFT file: {}", path.display()))?;

    Ok(parse(&content, &path.display().to_string()))
}

/// Parse GIFT text into a bank. Pure and deterministic.
pub fn parse(text: &str, source: &str) -> (QuestionBank, Vec<ParseWarning>) {
    let mut warnings = Vec::new();
    let mut questions = Vec::new();
    let mut category = UNCATEGORIZED.to_string();
    let mut ordinal = 0u32;

    for chunk in split_chunks(text) {
        match chunk {
            Chunk::Category { line, name } => {
                if name.is_empty() {
                    warnings.push(ParseWarning {
                        line,
                        entry: None,
                        kind: WarningKind::EmptyCategory,
                        message: "category header without a name".into(),
                    });
                    category = UNCATEGORIZED.to_string();
                } else {
                    category = name;
                }
            }
            Chunk::Entry { line, text } => {
                ordinal += 1;
                let id = QuestionId(ordinal);
                match parse_entry(&text, id, &mut category) {
                    Ok((question, advisories)) => {
                        warnings.extend(advisories.into_iter().map(|(kind, message)| {
                            ParseWarning {
                                line,
                                entry: question.name.clone(),
                                kind,
                                message,
                            }
                        }));
                        questions.push(question);
                    }
                    Err(rejection) => {
                        tracing::debug!(line, "skipping GIFT entry: {}", rejection.message);
                        warnings.push(ParseWarning {
                            line,
                            entry: rejection.entry,
                            kind: rejection.kind,
                            message: rejection.message,
                        });
                    }
                }
            }
        }
    }

    if !warnings.is_empty() {
        tracing::warn!(
            source,
            skipped = warnings.iter().filter(|w| w.rejects_entry()).count(),
            "GIFT file parsed with {} warning(s)",
            warnings.len()
        );
    }

    (QuestionBank::from_parsed(source, questions), warnings)
}

// ---------------------------------------------------------------------------
// Chunking
// ---------------------------------------------------------------------------

#[derive(Debug)]
enum Chunk {
    Category { line: usize, name: String },
    Entry { line: usize, text: String },
}

struct OpenEntry {
    line: usize,
    text: String,
    depth: i32,
}

/// Split the file into category headers and question entries.
///
/// Entries end at a blank line outside an answer block, or at a new
/// `::title::`/category header outside an answer block.
fn split_chunks(text: &str) -> Vec<Chunk> {
    let mut chunks = Vec::new();
    let mut open: Option<OpenEntry> = None;

    let text = text.strip_prefix('\u{feff}').unwrap_or(text);
    for (idx, raw) in text.lines().enumerate() {
        let line_no = idx + 1;
        let line = raw.trim();

        if line.starts_with("//") {
            continue;
        }

        if let Some(entry) = open.as_mut() {
            let at_rest = entry.depth <= 0;
            let starts_new =
                at_rest && (line.starts_with("::") || line.starts_with(CATEGORY_HEADER));
            if (line.is_empty() && at_rest) || starts_new {
                if let Some(done) = open.take() {
                    chunks.push(Chunk::Entry {
                        line: done.line,
                        text: done.text,
                    });
                }
            } else if line.is_empty() {
                entry.text.push('\n');
                continue;
            } else {
                entry.text.push('\n');
                entry.text.push_str(line);
                track_braces(entry, line);
                continue;
            }
        }

        if line.is_empty() {
            continue;
        }

        if let Some(rest) = line.strip_prefix(CATEGORY_HEADER) {
            let rest = rest.trim();
            let name = rest.strip_prefix("name=").unwrap_or(rest).trim();
            chunks.push(Chunk::Category {
                line: line_no,
                name: name.to_string(),
            });
            continue;
        }

        let mut entry = OpenEntry {
            line: line_no,
            text: line.to_string(),
            depth: 0,
        };
        track_braces(&mut entry, line);
        open = Some(entry);
    }

    if let Some(done) = open {
        chunks.push(Chunk::Entry {
            line: done.line,
            text: done.text,
        });
    }

    chunks
}

fn track_braces(entry: &mut OpenEntry, line: &str) {
    let mut escaped = false;
    for b in line.bytes() {
        if escaped {
            escaped = false;
            continue;
        }
        match b {
            b'\\' => escaped = true,
            b'{' => entry.depth += 1,
            b'}' => entry.depth -= 1,
            _ => {}
        }
    }
}

// ---------------------------------------------------------------------------
// Entry parsing
// ---------------------------------------------------------------------------

struct Rejection {
    entry: Option<String>,
    kind: WarningKind,
    message: String,
}

type Advisory = (WarningKind, String);

fn parse_entry(
    text: &str,
    id: QuestionId,
    category: &mut String,
) -> std::result::Result<(Question, Vec<Advisory>), Rejection> {
    let (name, rest) = split_title(text).map_err(|message| Rejection {
        entry: None,
        kind: WarningKind::Malformed,
        message,
    })?;

    let name = name.map(|raw| {
        let (title, tag) = strip_topic_tag(&raw);
        if let Some(tag) = tag {
            *category = tag;
        }
        unescape(&title)
    });

    let reject = |kind: WarningKind, message: String| Rejection {
        entry: name.clone(),
        kind,
        message,
    };

    let mut rest = rest.trim_start();
    for prefix in FORMAT_PREFIXES {
        if let Some(stripped) = rest.strip_prefix(prefix) {
            rest = stripped.trim_start();
            break;
        }
    }

    let open = find_unescaped(rest, "{")
        .ok_or_else(|| reject(WarningKind::Malformed, "no answer block".into()))?;
    let close = find_unescaped(&rest[open + 1..], "}")
        .map(|pos| open + 1 + pos)
        .ok_or_else(|| reject(WarningKind::Malformed, "unterminated answer block".into()))?;

    let before = collapse_lines(&unescape(rest[..open].trim()));
    let after = collapse_lines(&unescape(rest[close + 1..].trim()));
    let stem = if after.is_empty() {
        before
    } else {
        format!("{before} {MISSING_WORD_BLANK} {after}")
    };
    if stem.is_empty() {
        return Err(reject(WarningKind::Malformed, "empty question text".into()));
    }

    let mut body = rest[open + 1..close].trim();
    if find_unescaped(body, "{").is_some() {
        return Err(reject(
            WarningKind::Malformed,
            "unterminated answer block".into(),
        ));
    }
    let mut feedback = None;
    if let Some(pos) = find_unescaped(body, "####") {
        feedback = Some(unescape(body[pos + 4..].trim())).filter(|f| !f.is_empty());
        body = body[..pos].trim();
    }

    if body.is_empty() {
        return Err(reject(
            WarningKind::Unsupported,
            "essay questions are not supported".into(),
        ));
    }
    if body.starts_with('#') {
        return Err(reject(
            WarningKind::Unsupported,
            "numeric questions are not supported".into(),
        ));
    }

    let mut advisories = Vec::new();
    let (kind, answers) = match parse_true_false(body) {
        Some(truth) => (QuestionKind::TrueFalse, true_false_answers(truth)),
        None => {
            let parsed = parse_choices(body).map_err(|(kind, message)| reject(kind, message))?;
            if parsed.explicit_correct > 1 {
                advisories.push((
                    WarningKind::MultipleCorrect,
                    format!("{} answers are marked correct", parsed.explicit_correct),
                ));
            }
            (QuestionKind::MultipleChoice, parsed.answers)
        }
    };

    if !answers.iter().any(|a| a.is_correct) {
        return Err(reject(
            WarningKind::NoCorrectAnswer,
            "no answer is marked correct".into(),
        ));
    }

    Ok((
        Question {
            id,
            name,
            category: category.clone(),
            kind,
            stem,
            answers,
            feedback,
        },
        advisories,
    ))
}

fn split_title(text: &str) -> std::result::Result<(Option<String>, &str), String> {
    let Some(after) = text.strip_prefix("::") else {
        return Ok((None, text));
    };
    match find_unescaped(after, "::") {
        Some(end) => {
            let title = after[..end].trim().to_string();
            Ok((Some(title).filter(|t| !t.is_empty()), &after[end + 2..]))
        }
        None => Err("unterminated ::title::".into()),
    }
}

/// Pull a `[tags: topico="..."]` marker out of a title.
fn strip_topic_tag(title: &str) -> (String, Option<String>) {
    let Some(start) = title.find("[tags:") else {
        return (title.to_string(), None);
    };
    let Some(len) = title[start..].find(']') else {
        return (title.to_string(), None);
    };
    let tag_body = &title[start..start + len];
    let topic = tag_body.find("topico=\"").and_then(|pos| {
        let value = &tag_body[pos + 8..];
        value
            .find('"')
            .map(|end| value[..end].trim().to_string())
            .filter(|v| !v.is_empty())
    });

    let mut cleaned = String::with_capacity(title.len());
    cleaned.push_str(title[..start].trim_end());
    cleaned.push_str(&title[start + len + 1..]);
    (cleaned.trim().to_string(), topic)
}

fn parse_true_false(body: &str) -> Option<bool> {
    let head = match find_unescaped(body, "#") {
        Some(pos) => &body[..pos],
        None => body,
    };
    match head.trim().to_ascii_uppercase().as_str() {
        "T" | "TRUE" => Some(true),
        "F" | "FALSE" => Some(false),
        _ => None,
    }
}

fn true_false_answers(truth: bool) -> Vec<Answer> {
    vec![
        Answer {
            text: "True".into(),
            is_correct: truth,
            weight: None,
            feedback: None,
        },
        Answer {
            text: "False".into(),
            is_correct: !truth,
            weight: None,
            feedback: None,
        },
    ]
}

struct ParsedChoices {
    answers: Vec<Answer>,
    explicit_correct: usize,
}

fn parse_choices(body: &str) -> std::result::Result<ParsedChoices, Advisory> {
    let mut segments: Vec<(u8, usize)> = Vec::new();
    let bytes = body.as_bytes();
    let mut escaped = false;
    for (i, &b) in bytes.iter().enumerate() {
        if escaped {
            escaped = false;
            continue;
        }
        match b {
            b'\\' => escaped = true,
            b'=' | b'~' => segments.push((b, i)),
            _ => {}
        }
    }

    let Some(&(_, first)) = segments.first() else {
        return Err((
            WarningKind::Malformed,
            "answer block has no =/~ answers".into(),
        ));
    };
    if !body[..first].trim().is_empty() {
        return Err((
            WarningKind::Malformed,
            "text before the first answer marker".into(),
        ));
    }

    let mut answers = Vec::with_capacity(segments.len());
    let mut explicit_correct = 0;
    for (n, &(marker, start)) in segments.iter().enumerate() {
        let end = segments.get(n + 1).map_or(body.len(), |&(_, next)| next);
        let mut content = body[start + 1..end].trim();

        let mut weight = None;
        if let Some(after) = content.strip_prefix('%') {
            let close = after.find('%').ok_or_else(|| {
                (WarningKind::Malformed, "unterminated %weight%".to_string())
            })?;
            let value = after[..close].trim().parse::<f64>().map_err(|_| {
                (
                    WarningKind::Malformed,
                    format!("invalid answer weight '{}'", &after[..close]),
                )
            })?;
            weight = Some(value);
            content = after[close + 1..].trim();
        }

        if marker == b'=' && find_unescaped(content, "->").is_some() {
            return Err((
                WarningKind::Unsupported,
                "matching questions are not supported".into(),
            ));
        }

        let (text, feedback) = match find_unescaped(content, "#") {
            Some(pos) => (
                &content[..pos],
                Some(unescape(content[pos + 1..].trim())).filter(|f| !f.is_empty()),
            ),
            None => (content, None),
        };
        let text = collapse_lines(&unescape(text.trim()));
        if text.is_empty() {
            return Err((WarningKind::Malformed, "empty answer text".into()));
        }

        let is_correct = marker == b'=' || weight.is_some_and(|w| w > 0.0);
        if marker == b'=' {
            explicit_correct += 1;
        }
        answers.push(Answer {
            text,
            is_correct,
            weight,
            feedback,
        });
    }

    Ok(ParsedChoices {
        answers,
        explicit_correct,
    })
}

// ---------------------------------------------------------------------------
// Escapes
// ---------------------------------------------------------------------------

/// Byte offset of the first occurrence of `pat` that is not preceded by a backslash escape.
fn find_unescaped(s: &str, pat: &str) -> Option<usize> {
    let bytes = s.as_bytes();
    let pat = pat.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' {
            i += 2;
            continue;
        }
        if bytes[i..].starts_with(pat) {
            return Some(i);
        }
        i += 1;
    }
    None
}

fn unescape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some(n @ ('~' | '=' | '#' | '{' | '}' | ':' | '\\')) => out.push(n),
            Some('n') => out.push('\n'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

fn collapse_lines(s: &str) -> String {
    s.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

// ---------------------------------------------------------------------------
// Validation summary
// ---------------------------------------------------------------------------

/// Overview of a parsed bank, as printed by `gifttest validate`.
#[derive(Debug, Clone, Serialize)]
pub struct BankReport {
    pub source: String,
    pub total_questions: usize,
    /// (category, question count), sorted by category name.
    pub per_category: Vec<(String, usize)>,
    pub rejected: usize,
    pub advisories: usize,
}

impl BankReport {
    pub fn is_clean(&self) -> bool {
        self.rejected == 0 && self.advisories == 0
    }
}

pub fn validate(bank: &QuestionBank, warnings: &[ParseWarning]) -> BankReport {
    let per_category = bank
        .categories()
        .into_iter()
        .map(|c| (c.to_string(), bank.category_len(c)))
        .collect();
    let rejected = warnings.iter().filter(|w| w.rejects_entry()).count();

    BankReport {
        source: bank.source().to_string(),
        total_questions: bank.len(),
        per_category,
        rejected,
        advisories: warnings.len() - rejected,
    }
}
