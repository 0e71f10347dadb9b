//! Cartesian task expansion with resume filtering.

use std::collections::HashSet;

use chrono::NaiveDate;

use crate::domain::{CompletionKey, CompletionSpec, Task};

/// Per-dimension value lists. An empty tag list yields tag-less tasks.
#[derive(Debug, Clone)]
pub struct TaskEnumerator {
    dates: Vec<NaiveDate>,
    models: Vec<String>,
    brands: Vec<String>,
    tags: Vec<String>,
    completion: CompletionSpec,
}

fn unique<T: Clone + Eq + std::hash::Hash>(values: Vec<T>) -> Vec<T> {
    let mut seen = HashSet::new();
    values.into_iter().filter(|v| seen.insert(v.clone())).collect()
}

impl TaskEnumerator {
    pub fn new(
        dates: Vec<NaiveDate>,
        models: Vec<String>,
        brands: Vec<String>,
        tags: Vec<String>,
        completion: CompletionSpec,
    ) -> Self {
        Self {
            dates: unique(dates),
            models: unique(models),
            brands: unique(brands),
            tags: unique(tags),
            completion,
        }
    }

    #[must_use]
    pub fn completion(&self) -> &CompletionSpec {
        &self.completion
    }

    /// Size of the full product, before resume filtering.
    #[must_use]
    pub fn total(&self) -> usize {
        self.dates.len() * self.models.len() * self.brands.len() * self.tags.len().max(1)
    }

    /// Tasks whose completion key is not in `completed`, ordered by date, then
    /// tag, model and brand.
    #[must_use]
    pub fn enumerate(&self, completed: &HashSet<CompletionKey>) -> Vec<Task> {
        let tags: Vec<Option<String>> = if self.tags.is_empty() {
            vec![None]
        } else {
            self.tags.iter().cloned().map(Some).collect()
        };

        let mut tasks = Vec::new();
        for date in &self.dates {
            for tag in &tags {
                for model in &self.models {
                    for brand in &self.brands {
                        let task = Task::new(*date, model.clone(), brand.clone(), tag.clone());
                        if !completed.contains(&self.completion.key_for_task(&task)) {
                            tasks.push(task);
                        }
                    }
                }
            }
        }
        tasks
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Dimension, parse_date};
    use proptest::prelude::*;

    fn spec() -> CompletionSpec {
        CompletionSpec::new(vec![Dimension::Date, Dimension::Model, Dimension::Brand])
    }

    fn dates(list: &[&str]) -> Vec<NaiveDate> {
        list.iter().map(|d| parse_date(d).unwrap()).collect()
    }

    fn strings(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn four_tasks_then_three_after_resume() {
        let enumerator = TaskEnumerator::new(
            dates(&["2026-01-01", "2026-01-02"]),
            strings(&["m1", "m2"]),
            strings(&["Samsung"]),
            vec![],
            spec(),
        );
        assert_eq!(enumerator.enumerate(&HashSet::new()).len(), 4);

        let completed: HashSet<_> = [CompletionKey::new(["2026-01-01", "m1", "Samsung"])].into();
        let remaining = enumerator.enumerate(&completed);
        assert_eq!(remaining.len(), 3);
        assert!(
            !remaining
                .iter()
                .any(|t| t.date_str() == "2026-01-01" && t.model == "m1")
        );
    }

    #[test]
    fn duplicate_inputs_do_not_duplicate_tasks() {
        let enumerator = TaskEnumerator::new(
            dates(&["2026-01-01", "2026-01-01"]),
            strings(&["m1", "m1"]),
            strings(&["Samsung"]),
            strings(&["a", "a", "b"]),
            CompletionSpec::full(),
        );
        let tasks = enumerator.enumerate(&HashSet::new());
        assert_eq!(tasks.len(), 2);
        assert_eq!(enumerator.total(), 2);
    }

    #[test]
    fn tags_sit_between_date_and_model() {
        let enumerator = TaskEnumerator::new(
            dates(&["2026-01-01"]),
            strings(&["m1", "m2"]),
            strings(&["Samsung"]),
            strings(&["t1", "t2"]),
            CompletionSpec::full(),
        );
        let order: Vec<_> = enumerator
            .enumerate(&HashSet::new())
            .into_iter()
            .map(|t| format!("{}:{}", t.tag.unwrap_or_default(), t.model))
            .collect();
        assert_eq!(order, vec!["t1:m1", "t1:m2", "t2:m1", "t2:m2"]);
    }

    proptest! {
        #[test]
        fn remaining_tasks_are_disjoint_from_completed(
            days in 1usize..5,
            models in 1usize..4,
            mask in proptest::collection::vec(any::<bool>(), 20),
        ) {
            let start = parse_date("2026-01-01").unwrap();
            let day_list: Vec<_> = start.iter_days().take(days).collect();
            let model_list: Vec<_> = (0..models).map(|m| format!("m{m}")).collect();
            let enumerator = TaskEnumerator::new(
                day_list, model_list, vec!["Samsung".into()], vec![], spec(),
            );

            let all = enumerator.enumerate(&HashSet::new());
            let completed: HashSet<_> = all
                .iter()
                .zip(mask.iter().cycle())
                .filter(|(_, done)| **done)
                .map(|(t, _)| spec().key_for_task(t))
                .collect();

            let remaining = enumerator.enumerate(&completed);
            prop_assert_eq!(remaining.len() + completed.len(), all.len());
            for task in &remaining {
                prop_assert!(!completed.contains(&spec().key_for_task(task)));
            }
        }
    }
}
