//! Per-user commands: logging, detection, risk, insights and feedback

use anyhow::Context;
use chrono::{DateTime, Utc};
use nutrimind_core::services::clusters::InterviewAnswer;
use nutrimind_core::{
    DetectionOutcome, DetectionRun, EatingContext, FoodEvent, Freshness, Mood, Pattern, PatternId,
    Pipeline,
};

use super::helpers::parse_user;

fn print_pattern(pattern: &Pattern) {
    let status = if pattern.active { "active" } else { "inactive" };
    println!(
        "  [{}] {} {:.2} {} - {}",
        pattern.id,
        pattern.kind.as_str(),
        pattern.confidence,
        status,
        pattern.description
    );
}

fn print_detection(run: &DetectionRun) {
    match run {
        DetectionRun::Skipped => println!("Detection already running for this user, skipped"),
        DetectionRun::Completed(DetectionOutcome::Empty) => {
            println!("No events in the detection window, patterns unchanged")
        }
        DetectionRun::Completed(outcome) => {
            println!("Detected {} pattern(s):", outcome.patterns().len());
            for pattern in outcome.patterns() {
                print_pattern(pattern);
            }
            if outcome.is_preliminary() {
                println!();
                println!("  Preliminary: based on people with a similar profile, not your own log yet.");
            }
        }
    }
}

#[allow(clippy::too_many_arguments)]
pub async fn log(
    pipeline: &Pipeline,
    user: &str,
    text: String,
    calories: u32,
    mood: Option<Mood>,
    context: Option<EatingContext>,
    at: Option<DateTime<Utc>>,
) -> anyhow::Result<()> {
    let user_id = parse_user(user)?;
    let event = FoodEvent::new(user_id, text, calories, mood, context, at.unwrap_or_else(Utc::now));
    let event_id = event.id;

    let detection = pipeline.log_event(event).await.context("Failed to log event")?;
    println!("Logged event {}", event_id);
    if let Some(run) = detection {
        print_detection(&run);
    }
    Ok(())
}

pub async fn detect(pipeline: &Pipeline, user: &str) -> anyhow::Result<()> {
    let run = pipeline.detect_patterns(parse_user(user)?).await?;
    print_detection(&run);
    Ok(())
}

pub async fn patterns(pipeline: &Pipeline, user: &str, history: bool) -> anyhow::Result<()> {
    let patterns = pipeline.list_patterns(parse_user(user)?, history).await?;
    if patterns.is_empty() {
        println!("No patterns");
        return Ok(());
    }
    for pattern in &patterns {
        print_pattern(pattern);
    }
    Ok(())
}

pub async fn risk(pipeline: &Pipeline, user: &str) -> anyhow::Result<()> {
    let score = pipeline.get_risk_today(parse_user(user)?).await?;
    println!("Risk for {}: {}", score.date, score.level.as_str());
    if let Some(window) = &score.time_window {
        println!("  Window: {}", window);
    }
    if let Some(recommendation) = &score.recommendation {
        println!("  {}", recommendation);
    }
    Ok(())
}

pub async fn insight(pipeline: &Pipeline, user: &str) -> anyhow::Result<()> {
    let today = pipeline.get_today_insight(parse_user(user)?).await?;
    let insight = &today.insight;
    if today.freshness == Freshness::MostRecent {
        println!("(Could not generate today's insight; showing the most recent one)");
    }
    println!("{} [{}]", insight.title, insight.kind.as_str());
    println!();
    println!("{}", insight.body);
    if let Some(action) = &insight.action {
        println!();
        println!("Try this: {}", action);
    }
    Ok(())
}

pub async fn feedback(pipeline: &Pipeline, pattern: &str, disputed: bool) -> anyhow::Result<()> {
    let pattern_id = PatternId::from_string(pattern)
        .with_context(|| format!("Invalid pattern id '{}'", pattern))?;
    let outcome = pipeline.submit_pattern_feedback(pattern_id, disputed).await?;
    println!(
        "Pattern {}: confidence {:.2}, {}",
        outcome.pattern_id,
        outcome.confidence,
        if outcome.active { "active" } else { "deactivated" }
    );
    Ok(())
}

/// Answers are given as `question=answer`
pub async fn onboard(pipeline: &Pipeline, user: &str, answers: &[String]) -> anyhow::Result<()> {
    let answers = answers
        .iter()
        .map(|pair| {
            let (question_id, answer_id) = pair
                .split_once('=')
                .with_context(|| format!("Expected question=answer, got '{}'", pair))?;
            Ok(InterviewAnswer {
                question_id: question_id.trim().to_string(),
                answer_id: answer_id.trim().to_string(),
            })
        })
        .collect::<anyhow::Result<Vec<_>>>()?;

    let profile = pipeline.assign_cluster(parse_user(user)?, &answers).await?;
    println!(
        "Assigned cluster: {}",
        profile.cluster_id.as_deref().unwrap_or("general")
    );
    Ok(())
}

pub async fn lesson(pipeline: &Pipeline, user: &str, lesson_id: &str) -> anyhow::Result<()> {
    pipeline
        .complete_lesson(parse_user(user)?, lesson_id, Utc::now())
        .await?;
    println!("Lesson {} completed", lesson_id);
    Ok(())
}
