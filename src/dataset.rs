// src/dataset.rs
//! Synthetic moderation dataset for exercising the pipeline end to end.
//!
//! A fixed share of rows is toxic, split evenly between keyword toxicity (caught by
//! rules) and subtle toxicity (only a semantic classifier can catch it). The rest is
//! clean filler. Rows are shuffled, then numbered from 1.

use crate::table::{write_csv, TableError};
use rand::seq::{IndexedRandom, SliceRandom};
use rand::Rng;
use serde::Serialize;
use std::path::Path;

pub const DEFAULT_KEYWORDS: [&str; 4] = ["stupid", "idiot", "hate", "kill"];

const CLEAN_TEMPLATES: &[&str] = &[
    "The project's progress is {adj}.",
    "I think the {noun} is absolutely {adj}.",
    "What is the best way to {verb} the {noun}?",
    "The weather today is {adj}.",
    "Just finished a book about the {noun}. It was captivating.",
    "The meeting is at {num} PM.",
    "The performance of the {noun} was impressive.",
    "I'm trying to learn about the {noun}.",
    "The customer service was {adj}.",
    "The new policy affects every {noun}.",
    "Can someone help me {verb} our {noun} before Friday?",
    "Our {noun} review went {adj}, thanks everyone.",
];

const KEYWORD_TOXIC_TEMPLATES: &[&str] = &[
    "You are such a {keyword}.",
    "That is a {keyword} idea.",
    "I {keyword} people like you.",
    "This whole project is {keyword}.",
    "What a {keyword} thing to say.",
];

const SUBTLE_TOXIC_TEMPLATES: &[&str] = &[
    "If you actually knew what you were doing, this wouldn't be an issue.",
    "I'm not surprised someone like you would think that.",
    "People from your area are all the same.",
    "Maybe you should go back to school before commenting.",
    "This is the kind of quality I'd expect from a beginner.",
];

const ADJ: &[&str] = &["great", "okay", "impressive", "adequate", "sunny", "interesting"];
const NOUN: &[&str] = &["system", "design", "process", "company", "market", "team"];
const VERB: &[&str] = &["improve", "understand", "build", "organize", "manage"];
const NUM: &[&str] = &["2", "3", "4", "5"];

/// Ground-truth label of a generated row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Label {
    Clean,
    KeywordToxic,
    SubtleToxic,
}

impl Label {
    pub fn as_str(&self) -> &'static str {
        match self {
            Label::Clean => "clean",
            Label::KeywordToxic => "keyword_toxic",
            Label::SubtleToxic => "subtle_toxic",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetRow {
    pub id: usize,
    pub text: String,
    pub label: Label,
}

#[derive(Debug, Clone)]
pub struct DatasetOptions {
    pub total: usize,
    /// Share of toxic rows in [0, 1].
    pub toxic_ratio: f64,
    pub keywords: Vec<String>,
}

impl Default for DatasetOptions {
    fn default() -> Self {
        Self {
            total: 10_000,
            toxic_ratio: 0.05,
            keywords: DEFAULT_KEYWORDS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

pub fn generate<R: Rng + ?Sized>(opts: &DatasetOptions, rng: &mut R) -> Vec<DatasetRow> {
    let ratio = opts.toxic_ratio.clamp(0.0, 1.0);
    let num_toxic = (opts.total as f64 * ratio) as usize;
    let keywords: Vec<&str> = if opts.keywords.is_empty() {
        DEFAULT_KEYWORDS.to_vec()
    } else {
        opts.keywords.iter().map(String::as_str).collect()
    };

    let mut rows: Vec<(String, Label)> = Vec::with_capacity(opts.total);
    for i in 0..num_toxic {
        if i % 2 == 0 {
            rows.push((
                fill(pick(KEYWORD_TOXIC_TEMPLATES, rng), &keywords, rng),
                Label::KeywordToxic,
            ));
        } else {
            rows.push((pick(SUBTLE_TOXIC_TEMPLATES, rng).to_string(), Label::SubtleToxic));
        }
    }
    for _ in num_toxic..opts.total {
        rows.push((fill(pick(CLEAN_TEMPLATES, rng), &keywords, rng), Label::Clean));
    }

    rows.shuffle(rng);
    rows.into_iter()
        .enumerate()
        .map(|(i, (text, label))| DatasetRow {
            id: i + 1,
            text,
            label,
        })
        .collect()
}

/// Write `id,text,label`.
pub fn write_dataset(path: &Path, rows: &[DatasetRow]) -> Result<(), TableError> {
    let header = ["id", "text", "label"].map(String::from);
    write_csv(
        path,
        &header,
        rows.iter()
            .map(|r| vec![r.id.to_string(), r.text.clone(), r.label.as_str().to_string()]),
    )
}

fn pick<'a, R: Rng + ?Sized>(items: &[&'a str], rng: &mut R) -> &'a str {
    items.choose(rng).copied().unwrap_or_default()
}

fn fill<R: Rng + ?Sized>(template: &str, keywords: &[&str], rng: &mut R) -> String {
    let slots: [(&str, &[&str]); 5] = [
        ("{adj}", ADJ),
        ("{noun}", NOUN),
        ("{verb}", VERB),
        ("{num}", NUM),
        ("{keyword}", keywords),
    ];
    let mut out = template.to_string();
    for (slot, values) in slots {
        while out.contains(slot) {
            out = out.replacen(slot, pick(values, rng), 1);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn proportions_and_ids() {
        let mut rng = StdRng::seed_from_u64(7);
        let opts = DatasetOptions {
            total: 200,
            toxic_ratio: 0.1,
            ..Default::default()
        };
        let rows = generate(&opts, &mut rng);
        assert_eq!(rows.len(), 200);
        let ids: Vec<usize> = rows.iter().map(|r| r.id).collect();
        assert_eq!(ids, (1..=200).collect::<Vec<_>>());

        let kw = rows.iter().filter(|r| r.label == Label::KeywordToxic).count();
        let subtle = rows.iter().filter(|r| r.label == Label::SubtleToxic).count();
        assert_eq!(kw, 10);
        assert_eq!(subtle, 10);
        assert!(rows.iter().all(|r| !r.text.contains('{')));
    }

    #[test]
    fn keyword_rows_contain_a_keyword() {
        let mut rng = StdRng::seed_from_u64(1);
        let opts = DatasetOptions {
            total: 50,
            toxic_ratio: 1.0,
            keywords: vec!["dreadful".into()],
        };
        for r in generate(&opts, &mut rng) {
            if r.label == Label::KeywordToxic {
                assert!(r.text.contains("dreadful"), "{}", r.text);
            }
        }
    }

    #[test]
    fn seeded_generation_is_reproducible() {
        let opts = DatasetOptions {
            total: 30,
            ..Default::default()
        };
        let a = generate(&opts, &mut StdRng::seed_from_u64(42));
        let b = generate(&opts, &mut StdRng::seed_from_u64(42));
        assert_eq!(a, b);
    }
}
