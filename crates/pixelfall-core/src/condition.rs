//! Generic condition trees and their stateless evaluator.
//!
//! The same machinery gates phase transitions, achievement unlocks, and
//! upgrade/producer visibility. A [`Condition`] is an immutable tagged
//! union; evaluation reads game state through an injected [`EvalContext`]
//! and never mutates anything.
//!
//! Besides the boolean result, [`evaluate_with_details`] reports a
//! continuous progress signal in `[0, 1]` used by UI progress bars. The
//! progress of a condition list is the unweighted mean across nodes; this
//! exact averaging is what transition bars display.

use crate::bignum::BigNum;
use crate::id::{AchievementId, ProducerId, ResourceId, UpgradeId};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Condition tree
// ---------------------------------------------------------------------------

/// Comparison operator for resource thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ComparisonOp {
    Eq,
    Gt,
    #[default]
    Gte,
    Lt,
    Lte,
}

/// A condition node. Leaves read one fact from the context; composites
/// combine children.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Condition {
    /// Current resource amount compared against a target.
    ResourceThreshold {
        resource: ResourceId,
        amount: BigNum,
        op: ComparisonOp,
    },
    /// Run time elapsed, in seconds.
    TimeElapsed { seconds: f64 },
    /// Current phase number has reached the target.
    PhaseReached { phase: u32 },
    /// The target phase has been completed at least once.
    PhaseCompleted { phase: u32 },
    /// Producer level has reached the target count.
    ProducerCount { producer: ProducerId, count: u32 },
    /// Upgrade level has reached the target.
    UpgradeLevel { upgrade: UpgradeId, level: u32 },
    /// The achievement has been unlocked.
    AchievementUnlocked { achievement: AchievementId },
    /// A story choice was made with the given value.
    StoryChoice { key: String, value: String },
    /// Trivially true.
    Always,
    /// Trivially false.
    Never,
    /// All children must be met.
    All(Vec<Condition>),
    /// At least one child must be met.
    Any(Vec<Condition>),
    /// Inverts the child.
    Not(Box<Condition>),
}

impl Condition {
    /// Shorthand for a `>=` resource threshold, the most common leaf.
    pub fn resource_at_least(resource: ResourceId, amount: BigNum) -> Self {
        Condition::ResourceThreshold {
            resource,
            amount,
            op: ComparisonOp::Gte,
        }
    }
}

/// Evaluation result with the continuous progress signal.
#[derive(Debug, Clone, PartialEq)]
pub struct ConditionReport {
    pub met: bool,
    /// Closeness to satisfaction in `[0, 1]`. `None` where no continuous
    /// reading exists (e.g. an equality threshold).
    pub progress: Option<f64>,
    pub description: String,
}

// ---------------------------------------------------------------------------
// Evaluation context
// ---------------------------------------------------------------------------

/// Read-only view of game state consumed by the evaluator.
pub trait EvalContext {
    fn resource_amount(&self, resource: ResourceId) -> BigNum;
    fn current_phase(&self) -> u32;
    fn phase_completed(&self, phase: u32) -> bool;
    /// Seconds since the current run started.
    fn run_time_secs(&self) -> f64;
    fn producer_count(&self, producer: ProducerId) -> u32;
    fn upgrade_level(&self, upgrade: UpgradeId) -> u32;
    fn has_achievement(&self, achievement: AchievementId) -> bool;
    fn story_choice(&self, key: &str) -> Option<String>;
}

// ---------------------------------------------------------------------------
// Evaluation
// ---------------------------------------------------------------------------

/// Evaluate a condition to a boolean.
pub fn evaluate(ctx: &dyn EvalContext, condition: &Condition) -> bool {
    match condition {
        Condition::ResourceThreshold {
            resource,
            amount,
            op,
        } => {
            let current = ctx.resource_amount(*resource);
            match op {
                ComparisonOp::Eq => current == *amount,
                ComparisonOp::Gt => current > *amount,
                ComparisonOp::Gte => current >= *amount,
                ComparisonOp::Lt => current < *amount,
                ComparisonOp::Lte => current <= *amount,
            }
        }
        Condition::TimeElapsed { seconds } => ctx.run_time_secs() >= *seconds,
        Condition::PhaseReached { phase } => ctx.current_phase() >= *phase,
        Condition::PhaseCompleted { phase } => ctx.phase_completed(*phase),
        Condition::ProducerCount { producer, count } => ctx.producer_count(*producer) >= *count,
        Condition::UpgradeLevel { upgrade, level } => ctx.upgrade_level(*upgrade) >= *level,
        Condition::AchievementUnlocked { achievement } => ctx.has_achievement(*achievement),
        Condition::StoryChoice { key, value } => {
            ctx.story_choice(key).as_deref() == Some(value.as_str())
        }
        Condition::Always => true,
        Condition::Never => false,
        Condition::All(children) => children.iter().all(|c| evaluate(ctx, c)),
        Condition::Any(children) => children.iter().any(|c| evaluate(ctx, c)),
        Condition::Not(inner) => !evaluate(ctx, inner),
    }
}

fn proportional(current: u32, target: u32) -> f64 {
    if target == 0 {
        1.0
    } else {
        (f64::from(current) / f64::from(target)).clamp(0.0, 1.0)
    }
}

/// Evaluate a condition to a boolean plus the progress signal.
pub fn evaluate_with_details(ctx: &dyn EvalContext, condition: &Condition) -> ConditionReport {
    match condition {
        Condition::ResourceThreshold {
            resource,
            amount,
            op,
        } => {
            let met = evaluate(ctx, condition);
            // Progress only reads sensibly for "reach this amount" ops.
            let progress = match op {
                ComparisonOp::Gte | ComparisonOp::Gt => {
                    Some(ctx.resource_amount(*resource).ratio_to(*amount))
                }
                _ => None,
            };
            ConditionReport {
                met,
                progress,
                description: format!("resource {:?} {:?} {}", resource, op, amount),
            }
        }
        Condition::TimeElapsed { seconds } => {
            let elapsed = ctx.run_time_secs();
            let progress = if *seconds <= 0.0 {
                1.0
            } else {
                (elapsed / seconds).clamp(0.0, 1.0)
            };
            ConditionReport {
                met: elapsed >= *seconds,
                progress: Some(progress),
                description: format!("{seconds}s elapsed"),
            }
        }
        Condition::PhaseReached { phase } => ConditionReport {
            met: ctx.current_phase() >= *phase,
            progress: Some(proportional(ctx.current_phase(), *phase)),
            description: format!("phase {phase} reached"),
        },
        Condition::PhaseCompleted { phase } => {
            let met = ctx.phase_completed(*phase);
            ConditionReport {
                met,
                progress: Some(if met { 1.0 } else { 0.0 }),
                description: format!("phase {phase} completed"),
            }
        }
        Condition::ProducerCount { producer, count } => ConditionReport {
            met: ctx.producer_count(*producer) >= *count,
            progress: Some(proportional(ctx.producer_count(*producer), *count)),
            description: format!("{count} of producer {producer:?}"),
        },
        Condition::UpgradeLevel { upgrade, level } => ConditionReport {
            met: ctx.upgrade_level(*upgrade) >= *level,
            progress: Some(proportional(ctx.upgrade_level(*upgrade), *level)),
            description: format!("upgrade {upgrade:?} at level {level}"),
        },
        Condition::AchievementUnlocked { achievement } => {
            let met = ctx.has_achievement(*achievement);
            ConditionReport {
                met,
                progress: Some(if met { 1.0 } else { 0.0 }),
                description: format!("achievement {achievement:?} unlocked"),
            }
        }
        Condition::StoryChoice { key, value } => {
            let met = evaluate(ctx, condition);
            ConditionReport {
                met,
                progress: Some(if met { 1.0 } else { 0.0 }),
                description: format!("chose {value:?} for {key:?}"),
            }
        }
        Condition::Always => ConditionReport {
            met: true,
            progress: Some(1.0),
            description: "always".to_string(),
        },
        Condition::Never => ConditionReport {
            met: false,
            progress: Some(0.0),
            description: "never".to_string(),
        },
        Condition::All(children) => {
            let reports: Vec<ConditionReport> =
                children.iter().map(|c| evaluate_with_details(ctx, c)).collect();
            let met = reports.iter().all(|r| r.met);
            let progress = if reports.is_empty() {
                1.0
            } else {
                reports.iter().map(report_progress).sum::<f64>() / reports.len() as f64
            };
            ConditionReport {
                met,
                progress: Some(progress),
                description: format!("all of {} conditions", children.len()),
            }
        }
        Condition::Any(children) => {
            let reports: Vec<ConditionReport> =
                children.iter().map(|c| evaluate_with_details(ctx, c)).collect();
            let met = reports.iter().any(|r| r.met);
            let progress = reports
                .iter()
                .map(report_progress)
                .fold(0.0, f64::max);
            ConditionReport {
                met,
                progress: Some(progress),
                description: format!("any of {} conditions", children.len()),
            }
        }
        Condition::Not(inner) => {
            let met = !evaluate(ctx, inner);
            ConditionReport {
                met,
                progress: Some(if met { 1.0 } else { 0.0 }),
                description: "negation".to_string(),
            }
        }
    }
}

/// Progress of a single report, falling back to the boolean as 0/1.
fn report_progress(report: &ConditionReport) -> f64 {
    report
        .progress
        .unwrap_or(if report.met { 1.0 } else { 0.0 })
}

/// True iff every condition in the list is met. An empty list is
/// trivially true.
pub fn evaluate_all(ctx: &dyn EvalContext, conditions: &[Condition]) -> bool {
    conditions.iter().all(|c| evaluate(ctx, c))
}

/// True iff any condition in the list is met. An empty list is false.
pub fn evaluate_any(ctx: &dyn EvalContext, conditions: &[Condition]) -> bool {
    conditions.iter().any(|c| evaluate(ctx, c))
}

/// Unweighted mean progress across a condition list; 1.0 for an empty
/// list. This is the value transition progress bars display.
pub fn evaluate_progress(ctx: &dyn EvalContext, conditions: &[Condition]) -> f64 {
    if conditions.is_empty() {
        return 1.0;
    }
    let total: f64 = conditions
        .iter()
        .map(|c| report_progress(&evaluate_with_details(ctx, c)))
        .sum();
    total / conditions.len() as f64
}

// ===========================================================================
// Tests
// ===========================================================================
