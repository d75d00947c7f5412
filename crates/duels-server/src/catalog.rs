use crate::error::StoreError;
use async_trait::async_trait;
use duels_protocol::model::{Difficulty, Problem, TagId};
use rand::seq::IndexedRandom;
use std::{fs, path::Path};
use thiserror::Error;

/// Read-only problem lookup used when a duel starts.
#[async_trait]
pub trait ProblemCatalog: Send + Sync {
    async fn pick_problem(
        &self,
        difficulties: &[Difficulty],
        tags: &[TagId],
    ) -> Result<Option<Problem>, StoreError>;
}

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("failed to read catalog: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse catalog: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("catalog contains no problems")]
    Empty,
}

#[derive(Debug, Clone)]
pub struct StaticCatalog {
    problems: Vec<Problem>,
}

impl StaticCatalog {
    pub fn new(problems: Vec<Problem>) -> Result<Self, CatalogError> {
        if problems.is_empty() {
            return Err(CatalogError::Empty);
        }
        Ok(Self { problems })
    }

    pub fn from_json_file(path: &Path) -> Result<Self, CatalogError> {
        let raw = fs::read_to_string(path)?;
        Self::new(serde_json::from_str(&raw)?)
    }

    pub fn builtin() -> Self {
        let problem = |id, slug: &str, name: &str, difficulty, tags: &[TagId]| Problem {
            id,
            slug: slug.to_string(),
            name: name.to_string(),
            difficulty,
            tags: tags.to_vec(),
        };

        Self {
            problems: vec![
                problem(1, "two-sum", "Two Sum", Difficulty::Easy, &[1, 2]),
                problem(
                    20,
                    "valid-parentheses",
                    "Valid Parentheses",
                    Difficulty::Easy,
                    &[3, 4],
                ),
                problem(
                    3,
                    "longest-substring-without-repeating-characters",
                    "Longest Substring Without Repeating Characters",
                    Difficulty::Medium,
                    &[2, 3, 5],
                ),
                problem(
                    200,
                    "number-of-islands",
                    "Number of Islands",
                    Difficulty::Medium,
                    &[1, 6, 7],
                ),
                problem(322, "coin-change", "Coin Change", Difficulty::Medium, &[1, 8]),
                problem(
                    4,
                    "median-of-two-sorted-arrays",
                    "Median of Two Sorted Arrays",
                    Difficulty::Hard,
                    &[1, 9],
                ),
                problem(
                    42,
                    "trapping-rain-water",
                    "Trapping Rain Water",
                    Difficulty::Hard,
                    &[1, 5, 8],
                ),
            ],
        }
    }

    fn candidates(&self, difficulties: &[Difficulty], tags: &[TagId]) -> Vec<&Problem> {
        let difficulty_ok =
            |problem: &Problem| difficulties.is_empty() || difficulties.contains(&problem.difficulty);
        let tags_ok = |problem: &Problem| {
            tags.is_empty() || problem.tags.iter().any(|tag| tags.contains(tag))
        };

        let strict: Vec<&Problem> = self
            .problems
            .iter()
            .filter(|problem| difficulty_ok(*problem) && tags_ok(*problem))
            .collect();
        if !strict.is_empty() {
            return strict;
        }

        let by_difficulty: Vec<&Problem> = self
            .problems
            .iter()
            .filter(|problem| difficulty_ok(*problem))
            .collect();
        if !by_difficulty.is_empty() {
            return by_difficulty;
        }

        self.problems.iter().collect()
    }

    fn pick(&self, difficulties: &[Difficulty], tags: &[TagId]) -> Option<Problem> {
        self.candidates(difficulties, tags)
            .choose(&mut rand::rng())
            .map(|problem| (*problem).clone())
    }
}

#[async_trait]
impl ProblemCatalog for StaticCatalog {
    async fn pick_problem(
        &self,
        difficulties: &[Difficulty],
        tags: &[TagId],
    ) -> Result<Option<Problem>, StoreError> {
        Ok(self.pick(difficulties, tags))
    }
}
