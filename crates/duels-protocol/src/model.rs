use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type UserId = i64;
pub type TagId = i32;

const PROBLEM_URL_BASE: &str = "https://leetcode.com/problems/";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum SubmissionStatus {
    Accepted,
    #[serde(rename = "Compile Error")]
    CompileError,
    #[serde(rename = "Runtime Error")]
    RuntimeError,
    #[serde(rename = "Time Limit Exceeded")]
    TimeLimitExceeded,
    #[serde(rename = "Memory Limit Exceeded")]
    MemoryLimitExceeded,
    #[serde(rename = "Output Limit Exceeded")]
    OutputLimitExceeded,
    #[serde(rename = "Wrong Answer")]
    WrongAnswer,
}

impl SubmissionStatus {
    pub fn is_accepted(self) -> bool {
        self == Self::Accepted
    }
}

/// Languages accepted by the judge the clients submit to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    C,
    Cpp,
    Csharp,
    Java,
    Python,
    Python3,
    Javascript,
    Typescript,
    Php,
    Swift,
    Kotlin,
    Dart,
    Go,
    Ruby,
    Scala,
    Rust,
    Racket,
    Erlang,
    Elixir,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum SessionStatus {
    InProgress,
    Completed,
    Canceled,
}

impl SessionStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::InProgress)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MatchDetails {
    #[serde(default)]
    pub is_rated: bool,
    #[serde(default)]
    pub difficulties: Vec<Difficulty>,
    #[serde(default)]
    pub tags: Vec<TagId>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Problem {
    pub id: i64,
    pub slug: String,
    pub name: String,
    pub difficulty: Difficulty,
    #[serde(default)]
    pub tags: Vec<TagId>,
}

impl Problem {
    pub fn url(&self) -> String {
        format!("{PROBLEM_URL_BASE}{}", self.slug)
    }
}

/// A recorded submission. Immutable once appended to a session ledger.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Submission {
    #[serde(rename = "submissionID")]
    pub id: u64,
    #[serde(rename = "playerID")]
    pub player_id: UserId,
    pub passed_test_cases: u32,
    pub total_test_cases: u32,
    pub status: SubmissionStatus,
    pub runtime: u32,
    pub memory: u32,
    pub language: Language,
    pub time: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn submission_status_uses_judge_labels() {
        let raw = serde_json::to_value(SubmissionStatus::TimeLimitExceeded).expect("serialize");
        assert_eq!(raw, "Time Limit Exceeded");

        let parsed: SubmissionStatus =
            serde_json::from_str("\"Wrong Answer\"").expect("deserialize");
        assert_eq!(parsed, SubmissionStatus::WrongAnswer);

        assert!(serde_json::from_str::<SubmissionStatus>("\"Pending\"").is_err());
    }

    #[test]
    fn language_names_are_lowercase() {
        let raw = serde_json::to_value(Language::Python3).expect("serialize");
        assert_eq!(raw, "python3");
        let parsed: Language = serde_json::from_str("\"go\"").expect("deserialize");
        assert_eq!(parsed, Language::Go);
    }

    #[test]
    fn match_details_fill_missing_fields() {
        let details: MatchDetails =
            serde_json::from_str(r#"{"tags":[1,2]}"#).expect("deserialize");
        assert!(!details.is_rated);
        assert!(details.difficulties.is_empty());
        assert_eq!(details.tags, vec![1, 2]);
    }

    #[test]
    fn problem_url_is_derived_from_slug() {
        let problem = Problem {
            id: 1,
            slug: "two-sum".to_string(),
            name: "Two Sum".to_string(),
            difficulty: Difficulty::Easy,
            tags: vec![1],
        };
        assert_eq!(problem.url(), "https://leetcode.com/problems/two-sum");
    }

    #[test]
    fn only_in_progress_is_live() {
        assert!(!SessionStatus::InProgress.is_terminal());
        assert!(SessionStatus::Completed.is_terminal());
        assert!(SessionStatus::Canceled.is_terminal());
    }
}
