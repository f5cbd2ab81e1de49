//! Core data types for the Nutrimind pipeline
//!
//! Food events come in from the event log, patterns come out of detection and
//! feed the risk predictor and insight generator. Patterns are values with a
//! lifecycle flag: they are never deleted, only deactivated.

use chrono::{DateTime, Datelike, NaiveDate, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            /// Create a new random id
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Parse an id from a string
            pub fn from_string(s: &str) -> Result<Self, uuid::Error> {
                Ok(Self(Uuid::parse_str(s)?))
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

uuid_id!(
    /// Identifier of a user, issued by the identity collaborator
    UserId
);
uuid_id!(
    /// Identifier of a logged food event
    EventId
);
uuid_id!(
    /// Identifier of a detected pattern. Re-detection always mints a new one.
    PatternId
);
uuid_id!(
    /// Identifier of a generated insight
    InsightId
);

/// Error returned when parsing one of the closed enums from text
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind} value: {value}")]
pub struct ParseEnumError {
    kind: &'static str,
    value: String,
}

impl ParseEnumError {
    fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}

/// Self-reported mood attached to a meal
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mood {
    Great,
    Ok,
    Meh,
    Bad,
    Awful,
}

impl Mood {
    pub const ALL: [Mood; 5] = [Mood::Great, Mood::Ok, Mood::Meh, Mood::Bad, Mood::Awful];

    /// `bad` and `awful`
    pub fn is_negative(self) -> bool {
        matches!(self, Mood::Bad | Mood::Awful)
    }

    /// `ok` and `great`; `meh` is neutral
    pub fn is_positive(self) -> bool {
        matches!(self, Mood::Ok | Mood::Great)
    }

    /// Numeric mood score from 5 (great) down to 1 (awful)
    pub fn score(self) -> f64 {
        match self {
            Mood::Great => 5.0,
            Mood::Ok => 4.0,
            Mood::Meh => 3.0,
            Mood::Bad => 2.0,
            Mood::Awful => 1.0,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Mood::Great => "great",
            Mood::Ok => "ok",
            Mood::Meh => "meh",
            Mood::Bad => "bad",
            Mood::Awful => "awful",
        }
    }
}

impl FromStr for Mood {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Mood::ALL
            .into_iter()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| ParseEnumError::new("mood", s))
    }
}

impl fmt::Display for Mood {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where the meal was eaten
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EatingContext {
    Home,
    Work,
    Street,
    Restaurant,
}

impl EatingContext {
    pub const ALL: [EatingContext; 4] = [
        EatingContext::Home,
        EatingContext::Work,
        EatingContext::Street,
        EatingContext::Restaurant,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            EatingContext::Home => "home",
            EatingContext::Work => "work",
            EatingContext::Street => "street",
            EatingContext::Restaurant => "restaurant",
        }
    }
}

impl FromStr for EatingContext {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EatingContext::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| ParseEnumError::new("context", s))
    }
}

impl fmt::Display for EatingContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One logged meal, as produced by the food-text parser.
///
/// Calendar fields are derived from the timestamp (UTC) at construction and
/// never recomputed. `day_of_week` is 0 for Monday through 6 for Sunday.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FoodEvent {
    pub id: EventId,
    pub user_id: UserId,
    /// Free text as typed by the user; not interpreted here
    pub raw_text: String,
    /// Estimated total calories for the meal
    pub calories: u32,
    pub mood: Option<Mood>,
    pub context: Option<EatingContext>,
    pub timestamp: DateTime<Utc>,
    pub day_of_week: u8,
    pub hour: u8,
}

impl FoodEvent {
    pub fn new(
        user_id: UserId,
        raw_text: impl Into<String>,
        calories: u32,
        mood: Option<Mood>,
        context: Option<EatingContext>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: EventId::new(),
            user_id,
            raw_text: raw_text.into(),
            calories,
            mood,
            context,
            timestamp,
            day_of_week: timestamp.weekday().num_days_from_monday() as u8,
            hour: timestamp.hour() as u8,
        }
    }

    /// Calendar day the event belongs to
    pub fn date(&self) -> NaiveDate {
        self.timestamp.date_naive()
    }

    pub fn is_weekend(&self) -> bool {
        self.day_of_week >= 5
    }
}

/// The five behavioral pattern kinds. Declaration order is the tie-break
/// order used when ranking patterns of equal confidence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternKind {
    Time,
    Mood,
    Context,
    Sequence,
    Skip,
}

impl PatternKind {
    pub const ALL: [PatternKind; 5] = [
        PatternKind::Time,
        PatternKind::Mood,
        PatternKind::Context,
        PatternKind::Sequence,
        PatternKind::Skip,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            PatternKind::Time => "time",
            PatternKind::Mood => "mood",
            PatternKind::Context => "context",
            PatternKind::Sequence => "sequence",
            PatternKind::Skip => "skip",
        }
    }
}

impl FromStr for PatternKind {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PatternKind::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| ParseEnumError::new("pattern kind", s))
    }
}

impl fmt::Display for PatternKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Half-open hour range `[start_hour, end_hour)`. Wraps past midnight when
/// `end_hour <= start_hour` (e.g. night, 22:00 to 06:00). Both hours are
/// 0 through 23; deserialization rejects anything else.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawHourWindow")]
pub struct HourWindow {
    pub start_hour: u8,
    pub end_hour: u8,
}

#[derive(Deserialize)]
struct RawHourWindow {
    start_hour: u8,
    end_hour: u8,
}

impl TryFrom<RawHourWindow> for HourWindow {
    type Error = String;

    fn try_from(raw: RawHourWindow) -> Result<Self, Self::Error> {
        if raw.start_hour > 23 || raw.end_hour > 23 {
            return Err(format!(
                "hour window {}..{} outside 0-23",
                raw.start_hour, raw.end_hour
            ));
        }
        Ok(Self::new(raw.start_hour, raw.end_hour))
    }
}

impl HourWindow {
    pub const fn new(start_hour: u8, end_hour: u8) -> Self {
        Self {
            start_hour,
            end_hour,
        }
    }

    pub fn contains(&self, hour: u8) -> bool {
        if self.start_hour < self.end_hour {
            hour >= self.start_hour && hour < self.end_hour
        } else {
            hour >= self.start_hour || hour < self.end_hour
        }
    }

    /// Hours from `hour` until the window opens, 0 when already inside
    pub fn hours_until_start(&self, hour: u8) -> u8 {
        if self.contains(hour) {
            0
        } else {
            ((u16::from(self.start_hour) + 24 - u16::from(hour % 24)) % 24) as u8
        }
    }

    /// Display label such as `18:00–22:00`
    pub fn label(&self) -> String {
        format!("{:02}:00–{:02}:00", self.start_hour, self.end_hour)
    }
}

impl fmt::Display for HourWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label())
    }
}

/// Kind-specific trigger the risk predictor matches against the current day
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum PatternTrigger {
    Window(HourWindow),
    Moods(Vec<Mood>),
    Context(EatingContext),
}

impl PatternTrigger {
    pub fn window(&self) -> Option<HourWindow> {
        match self {
            PatternTrigger::Window(w) => Some(*w),
            _ => None,
        }
    }
}

/// Supporting data for a detected pattern
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Evidence {
    /// Events that exhibit the pattern
    pub event_ids: Vec<EventId>,
    /// Summary numbers (bucket means, ratios, day counts)
    pub metrics: BTreeMap<String, f64>,
    /// Share of supporting events that fell on a weekend
    pub weekend_share: f64,
}

/// Where a pattern came from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PatternSource {
    Detected,
    ColdStart { cluster_id: String },
}

/// Why a pattern is no longer active
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeactivationReason {
    /// Dispute feedback pushed confidence below the activity threshold
    Disputed,
    /// A later detection run replaced the active set
    Superseded,
}

impl DeactivationReason {
    pub fn as_str(self) -> &'static str {
        match self {
            DeactivationReason::Disputed => "disputed",
            DeactivationReason::Superseded => "superseded",
        }
    }
}

impl FromStr for DeactivationReason {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "disputed" => Ok(DeactivationReason::Disputed),
            "superseded" => Ok(DeactivationReason::Superseded),
            other => Err(ParseEnumError::new("deactivation reason", other)),
        }
    }
}

/// A detected behavioral correlation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pattern {
    pub id: PatternId,
    pub user_id: UserId,
    pub kind: PatternKind,
    pub description: String,
    /// Always within [0.0, 1.0]
    pub confidence: f64,
    pub trigger: PatternTrigger,
    pub evidence: Evidence,
    pub source: PatternSource,
    /// Set for cold-start templates; callers must show a disclaimer
    pub preliminary: bool,
    pub active: bool,
    pub deactivation: Option<DeactivationReason>,
    pub discovered_at: DateTime<Utc>,
}

impl Pattern {
    /// Weekend share of the supporting evidence is at least one half
    pub fn is_weekend_flavored(&self) -> bool {
        self.evidence.weekend_share >= 0.5
    }

    pub fn deactivate(&mut self, reason: DeactivationReason) {
        self.active = false;
        self.deactivation = Some(reason);
    }
}

/// Default pattern shipped with a cold-start cluster
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternTemplate {
    pub kind: PatternKind,
    pub description: String,
    pub confidence: f64,
    pub trigger: PatternTrigger,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    /// Fixed thresholds: low below 0.3, high above 0.6, medium in between
    pub fn from_score(score: f64) -> Self {
        if score < 0.3 {
            RiskLevel::Low
        } else if score <= 0.6 {
            RiskLevel::Medium
        } else {
            RiskLevel::High
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
        }
    }
}

impl FromStr for RiskLevel {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(RiskLevel::Low),
            "medium" => Ok(RiskLevel::Medium),
            "high" => Ok(RiskLevel::High),
            other => Err(ParseEnumError::new("risk level", other)),
        }
    }
}

/// Daily risk estimate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskScore {
    pub user_id: UserId,
    pub date: NaiveDate,
    pub level: RiskLevel,
    /// Internal 0.0 to 1.0 score behind `level`
    pub score: f64,
    pub contributing_patterns: Vec<PatternId>,
    pub time_window: Option<String>,
    pub recommendation: Option<String>,
    pub computed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InsightKind {
    Pattern,
    Progress,
    Cbt,
    Risk,
    General,
}

impl InsightKind {
    pub fn as_str(self) -> &'static str {
        match self {
            InsightKind::Pattern => "pattern",
            InsightKind::Progress => "progress",
            InsightKind::Cbt => "cbt",
            InsightKind::Risk => "risk",
            InsightKind::General => "general",
        }
    }
}

impl FromStr for InsightKind {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pattern" => Ok(InsightKind::Pattern),
            "progress" => Ok(InsightKind::Progress),
            "cbt" => Ok(InsightKind::Cbt),
            "risk" => Ok(InsightKind::Risk),
            "general" => Ok(InsightKind::General),
            other => Err(ParseEnumError::new("insight kind", other)),
        }
    }
}

/// Whether the insight body came from the text generator or the template
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TextSource {
    Rendered,
    Template,
}

/// One daily user-facing message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Insight {
    pub id: InsightId,
    pub user_id: UserId,
    pub pattern_id: Option<PatternId>,
    pub title: String,
    pub body: String,
    pub action: Option<String>,
    pub kind: InsightKind,
    pub seen: bool,
    pub locked: bool,
    pub rotation_day: u8,
    pub text_source: TextSource,
    pub created_at: DateTime<Utc>,
}

impl Insight {
    pub fn date(&self) -> NaiveDate {
        self.created_at.date_naive()
    }
}

/// Per-user state owned by the pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub user_id: UserId,
    /// Onboarding cluster used for cold-start templates
    pub cluster_id: Option<String>,
    /// Rotation cursor, 1 through 7
    pub rotation_day: u8,
    /// Calendar day the cursor last moved
    pub rotation_date: Option<NaiveDate>,
    pub created_at: DateTime<Utc>,
}

impl UserProfile {
    pub fn new(user_id: UserId, cluster_id: Option<String>) -> Self {
        Self {
            user_id,
            cluster_id,
            rotation_day: 1,
            rotation_date: None,
            created_at: Utc::now(),
        }
    }
}
