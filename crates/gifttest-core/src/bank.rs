//! Parsed question banks and random selection.

use std::collections::{BTreeMap, HashMap, HashSet};

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::error::SelectionError;
use crate::model::{Question, QuestionId};

/// Which categories an operation applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CategoryFilter<'a> {
    All,
    Named(&'a str),
}

/// Every question parsed from one source, indexed by id and by category.
///
/// A bank is built once by the parser and never changes; loading another
/// file produces a new bank.
#[derive(Debug, Clone)]
pub struct QuestionBank {
    source: String,
    questions: Vec<Question>,
    index: HashMap<QuestionId, usize>,
    by_category: BTreeMap<String, Vec<QuestionId>>,
}

impl QuestionBank {
    /// Questions come from the parser, which guarantees unique ids and
    /// non-empty categories.
    pub(crate) fn from_parsed(source: &str, questions: Vec<Question>) -> Self {
        let mut index = HashMap::with_capacity(questions.len());
        let mut by_category: BTreeMap<String, Vec<QuestionId>> = BTreeMap::new();
        for (pos, q) in questions.iter().enumerate() {
            index.insert(q.id, pos);
            by_category.entry(q.category.clone()).or_default().push(q.id);
        }

        Self {
            source: source.to_string(),
            questions,
            index,
            by_category,
        }
    }

    /// File path or label the bank was parsed from.
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn len(&self) -> usize {
        self.questions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.questions.is_empty()
    }

    /// Category names that hold at least one question, sorted.
    pub fn categories(&self) -> Vec<&str> {
        self.by_category.keys().map(String::as_str).collect()
    }

    pub fn category_len(&self, category: &str) -> usize {
        self.by_category.get(category).map_or(0, Vec::len)
    }

    pub fn by_id(&self, id: QuestionId) -> Option<&Question> {
        self.index.get(&id).map(|&pos| &self.questions[pos])
    }

    /// Questions in file order.
    pub fn questions_in(&self, filter: CategoryFilter<'_>) -> Vec<&Question> {
        match filter {
            CategoryFilter::All => self.questions.iter().collect(),
            CategoryFilter::Named(name) => self
                .by_category
                .get(name)
                .map(|ids| ids.iter().filter_map(|id| self.by_id(*id)).collect())
                .unwrap_or_default(),
        }
    }

    /// Questions in `filter` whose id, title, category, stem or any answer
    /// contains `text`, ignoring case. An empty `text` matches everything.
    pub fn search(&self, filter: CategoryFilter<'_>, text: &str) -> Vec<&Question> {
        let needle = text.trim().to_lowercase();
        let mut found = self.questions_in(filter);
        if !needle.is_empty() {
            found.retain(|q| matches_text(q, &needle));
        }
        found
    }

    /// Look a question up the way a user would name it: exact title, then the
    /// number in a title such as "Questão 345", then the numeric id.
    pub fn find(&self, query: &str) -> Option<&Question> {
        let query = query.trim();
        if query.is_empty() {
            return None;
        }

        if let Some(q) = self
            .questions
            .iter()
            .find(|q| q.name.as_deref() == Some(query))
        {
            return Some(q);
        }

        let wanted = digits_of(query);
        if !wanted.is_empty() {
            if let Some(q) = self
                .questions
                .iter()
                .find(|q| q.name.as_deref().map(digits_of).as_deref() == Some(wanted.as_str()))
            {
                return Some(q);
            }
        }

        query.parse::<u32>().ok().and_then(|n| self.by_id(QuestionId(n)))
    }

    /// Draw `count` distinct questions from the union of `categories`.
    ///
    /// The order is random; passing a seed makes it reproducible.
    pub fn select(
        &self,
        categories: &[CategoryFilter<'_>],
        count: usize,
        seed: Option<u64>,
    ) -> Result<Vec<QuestionId>, SelectionError> {
        if categories.is_empty() {
            return Err(SelectionError::NoCategories);
        }
        if count == 0 {
            return Err(SelectionError::ZeroCount);
        }

        let mut wanted = HashSet::new();
        for filter in categories {
            match filter {
                CategoryFilter::All => {
                    wanted.extend(self.by_category.keys().map(String::as_str));
                }
                CategoryFilter::Named(name) => {
                    if !self.by_category.contains_key(*name) {
                        return Err(SelectionError::UnknownCategory(name.to_string()));
                    }
                    wanted.insert(*name);
                }
            }
        }

        let mut pool: Vec<QuestionId> = self
            .questions
            .iter()
            .filter(|q| wanted.contains(q.category.as_str()))
            .map(|q| q.id)
            .collect();

        if count > pool.len() {
            return Err(SelectionError::CountExceedsPool {
                requested: count,
                available: pool.len(),
            });
        }

        let mut rng = make_rng(seed);
        pool.shuffle(&mut rng);
        pool.truncate(count);

        tracing::debug!(
            count,
            categories = wanted.len(),
            seeded = seed.is_some(),
            "selected questions"
        );
        Ok(pool)
    }

    /// Draw a separate count from each category, then shuffle the union.
    ///
    /// Categories with a count of zero are ignored.
    pub fn select_per_category(
        &self,
        counts: &[(&str, usize)],
        seed: Option<u64>,
    ) -> Result<Vec<QuestionId>, SelectionError> {
        if counts.is_empty() {
            return Err(SelectionError::NoCategories);
        }

        let mut rng = make_rng(seed);
        let mut selected = Vec::new();
        for &(name, count) in counts {
            let ids = self
                .by_category
                .get(name)
                .ok_or_else(|| SelectionError::UnknownCategory(name.to_string()))?;
            if count == 0 {
                continue;
            }
            if count > ids.len() {
                return Err(SelectionError::CountExceedsPool {
                    requested: count,
                    available: ids.len(),
                });
            }
            selected.extend(ids.choose_multiple(&mut rng, count).copied());
        }

        if selected.is_empty() {
            return Err(SelectionError::ZeroCount);
        }
        selected.shuffle(&mut rng);
        Ok(selected)
    }
}

fn make_rng(seed: Option<u64>) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    }
}

fn matches_text(q: &Question, needle: &str) -> bool {
    let contains = |s: &str| s.to_lowercase().contains(needle);
    contains(&q.id.to_string())
        || q.name.as_deref().is_some_and(contains)
        || contains(&q.category)
        || contains(&q.stem)
        || q.answers.iter().any(|a| contains(&a.text))
}

fn digits_of(s: &str) -> String {
    s.chars().filter(char::is_ascii_digit).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;

    fn bank() -> QuestionBank {
        let text = "\
$CATEGORY: Math
::Questão 10:: 1+1? {=2 ~3}

::Questão 11:: 2+2? {=4 ~5}

::Questão 12:: 3+3? {=6 ~7}

$CATEGORY: History
::Tróia:: Where was Troy? {=Anatolia ~Crete}

::Questão 345:: Year of Aljubarrota? {=1385 ~1415}
";
        parse(text, "test.gift").0
    }

    #[test]
    fn categories_and_filters() {
        let bank = bank();
        assert_eq!(bank.source(), "test.gift");
        assert_eq!(bank.categories(), vec!["History", "Math"]);
        assert_eq!(bank.category_len("Math"), 3);
        assert_eq!(bank.category_len("Nope"), 0);

        let math: Vec<_> = bank
            .questions_in(CategoryFilter::Named("Math"))
            .iter()
            .map(|q| q.id.0)
            .collect();
        assert_eq!(math, vec![1, 2, 3]);
        assert_eq!(bank.questions_in(CategoryFilter::All).len(), 5);
        assert!(bank.questions_in(CategoryFilter::Named("Nope")).is_empty());
    }

    #[test]
    fn find_by_title_number_and_id() {
        let bank = bank();
        assert_eq!(bank.find("Tróia").unwrap().id, QuestionId(4));
        assert_eq!(bank.find("345").unwrap().id, QuestionId(5));
        assert_eq!(bank.find("Questão 11").unwrap().id, QuestionId(2));
        // No title carries "4", so fall back to the id.
        assert_eq!(bank.find("4").unwrap().id, QuestionId(4));
        assert!(bank.find("999").is_none());
        assert!(bank.find("  ").is_none());
    }

    #[test]
    fn search_by_text_and_category() {
        let bank = bank();
        fn ids(found: Vec<&Question>) -> Vec<u32> {
            found.iter().map(|q| q.id.0).collect()
        }

        assert_eq!(ids(bank.search(CategoryFilter::All, "")), vec![1, 2, 3, 4, 5]);
        // Stem, ignoring case.
        assert_eq!(ids(bank.search(CategoryFilter::All, "TROY")), vec![4]);
        // Answer text.
        assert_eq!(ids(bank.search(CategoryFilter::All, "anatolia")), vec![4]);
        // Title and category.
        assert_eq!(ids(bank.search(CategoryFilter::All, "questão 1")), vec![1, 2, 3]);
        assert_eq!(ids(bank.search(CategoryFilter::All, "histo")), vec![4, 5]);
        // Id.
        assert_eq!(ids(bank.search(CategoryFilter::Named("History"), "5")), vec![5]);

        assert_eq!(ids(bank.search(CategoryFilter::Named("Math"), "?")), vec![1, 2, 3]);
        assert!(bank.search(CategoryFilter::Named("Math"), "troy").is_empty());
        assert!(bank.search(CategoryFilter::Named("Art"), "").is_empty());
    }

    #[test]
    fn seeded_selection_is_reproducible() {
        let bank = bank();
        let all = [CategoryFilter::All];
        let a = bank.select(&all, 4, Some(42)).unwrap();
        let b = bank.select(&all, 4, Some(42)).unwrap();
        assert_eq!(a, b);

        let unique: HashSet<_> = a.iter().collect();
        assert_eq!(unique.len(), 4);
    }

    #[test]
    fn selection_stays_within_categories() {
        let bank = bank();
        let ids = bank
            .select(&[CategoryFilter::Named("History")], 2, None)
            .unwrap();
        assert!(ids
            .iter()
            .all(|id| bank.by_id(*id).unwrap().category == "History"));
    }

    #[test]
    fn selection_errors() {
        let bank = bank();
        let math = [CategoryFilter::Named("Math")];
        assert_eq!(
            bank.select(&math, 4, None),
            Err(SelectionError::CountExceedsPool {
                requested: 4,
                available: 3
            })
        );
        assert_eq!(bank.select(&math, 0, None), Err(SelectionError::ZeroCount));
        assert_eq!(bank.select(&[], 1, None), Err(SelectionError::NoCategories));
        assert_eq!(
            bank.select(&[CategoryFilter::Named("Art")], 1, None),
            Err(SelectionError::UnknownCategory("Art".into()))
        );
    }

    #[test]
    fn per_category_selection() {
        let bank = bank();
        let ids = bank
            .select_per_category(&[("Math", 2), ("History", 1)], Some(7))
            .unwrap();
        assert_eq!(ids.len(), 3);
        let math = ids
            .iter()
            .filter(|id| bank.by_id(**id).unwrap().category == "Math")
            .count();
        assert_eq!(math, 2);
        assert_eq!(
            ids,
            bank.select_per_category(&[("Math", 2), ("History", 1)], Some(7))
                .unwrap()
        );

        assert_eq!(
            bank.select_per_category(&[("Math", 0)], None),
            Err(SelectionError::ZeroCount)
        );
        assert_eq!(
            bank.select_per_category(&[("History", 3)], None),
            Err(SelectionError::CountExceedsPool {
                requested: 3,
                available: 2
            })
        );
    }
}
