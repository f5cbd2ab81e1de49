//! CBT lesson catalog and completion tracking
//!
//! Lesson content is delivered elsewhere; the pipeline only needs ids,
//! titles and the pattern kinds each lesson addresses.

use crate::error::Result;
use crate::types::{PatternKind, UserId};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lesson {
    pub id: String,
    pub order: u32,
    pub title: String,
    pub summary: String,
    pub pattern_tags: Vec<PatternKind>,
}

impl Lesson {
    fn addresses(&self, kinds: &HashSet<PatternKind>) -> bool {
        self.pattern_tags.iter().any(|k| kinds.contains(k))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LessonCompletion {
    pub lesson_id: String,
    pub completed_at: DateTime<Utc>,
}

/// Per-user lesson completion state
#[async_trait]
pub trait LessonProgress: Send + Sync {
    async fn completed_lessons(&self, user_id: UserId) -> Result<Vec<LessonCompletion>>;

    async fn complete_lesson(
        &self,
        user_id: UserId,
        lesson_id: &str,
        at: DateTime<Utc>,
    ) -> Result<()>;

    async fn completed_lesson_on(&self, user_id: UserId, date: NaiveDate) -> Result<bool> {
        Ok(self
            .completed_lessons(user_id)
            .await?
            .iter()
            .any(|c| c.completed_at.date_naive() == date))
    }
}

#[derive(Debug, Clone)]
pub struct LessonCatalog {
    lessons: Vec<Lesson>,
}

impl Default for LessonCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}

impl LessonCatalog {
    pub fn new(mut lessons: Vec<Lesson>) -> Self {
        lessons.sort_by_key(|l| l.order);
        Self { lessons }
    }

    pub fn builtin() -> Self {
        use PatternKind::*;
        let all = [Time, Mood, Context, Sequence, Skip];
        let rhythm = [Time, Sequence, Skip];

        let entries: [(&str, &str, &[PatternKind]); 20] = [
            ("mindful-eating-basics", "What mindful eating is", &all),
            ("food-journal", "The food journal as a tool", &all),
            ("hunger-scale", "The hunger and fullness scale", &all),
            ("automatic-thoughts", "Automatic thoughts about food", &all),
            ("overeating-triggers", "Overeating triggers", &all),
            ("emotional-vs-physical", "Emotional versus physical hunger", &[Mood]),
            ("stress-eating", "Stress and overeating", &[Mood]),
            ("boredom-eating", "Boredom and habitual eating", &[Mood]),
            ("stop-technique", "The STOP technique for emotions", &[Mood]),
            ("self-compassion", "Self-compassion instead of self-criticism", &[Mood]),
            ("meal-rhythm", "Meal rhythm and body clocks", &rhythm),
            ("skipping-meals", "Why skipping meals backfires", &rhythm),
            ("evening-overeating", "Evening overeating", &rhythm),
            ("meal-planning", "Planning your meals", &rhythm),
            ("food-environment", "How surroundings shape eating", &[Context]),
            ("social-eating", "Eating with others", &[Context]),
            ("eating-out", "Mindful choices away from home", &[Context]),
            ("cognitive-restructuring", "Cognitive restructuring", &all),
            ("relapse-prevention", "Preventing relapse", &all),
            ("long-term-strategy", "A long-term strategy", &all),
        ];

        Self::new(
            entries
                .iter()
                .enumerate()
                .map(|(i, (id, title, tags))| Lesson {
                    id: id.to_string(),
                    order: i as u32 + 1,
                    title: title.to_string(),
                    summary: format!("Lesson {}: {}", i + 1, title),
                    pattern_tags: tags.to_vec(),
                })
                .collect(),
        )
    }

    pub fn lessons(&self) -> &[Lesson] {
        &self.lessons
    }

    pub fn get(&self, id: &str) -> Option<&Lesson> {
        self.lessons.iter().find(|l| l.id == id)
    }

    /// First uncompleted lesson addressing one of the active kinds, then the
    /// first uncompleted lesson, then the first addressing lesson.
    pub fn recommend(
        &self,
        active_kinds: &HashSet<PatternKind>,
        completed: &HashSet<String>,
    ) -> Option<&Lesson> {
        let open = |l: &&Lesson| !completed.contains(&l.id);

        self.lessons
            .iter()
            .filter(open)
            .find(|l| l.addresses(active_kinds))
            .or_else(|| self.lessons.iter().find(open))
            .or_else(|| self.lessons.iter().find(|l| l.addresses(active_kinds)))
    }
}
