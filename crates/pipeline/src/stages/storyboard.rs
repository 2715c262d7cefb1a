//! Storyboard stage: continuity analysis over the beat plan.

use serde::{Deserialize, Serialize};
use storyreel_core::chunk::ChunkRole;
use storyreel_core::continuity::assign_beat_roles;
use storyreel_core::job::{Beat, ShotTransition};

use super::{BeatPlan, StageOutcome, StageOutput};
use crate::error::StageError;

/// Beats tagged HEAD or FOLLOWER.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Storyboard {
    pub target_duration: f64,
    /// End of the last beat; the timeline chunks are laid out on.
    pub covered_duration: f64,
    pub beats: Vec<Beat>,
    /// Parallel to `beats`.
    pub roles: Vec<ChunkRole>,
    /// `boundaries[i]` is the join between `beats[i]` and `beats[i + 1]`.
    pub boundaries: Vec<ShotTransition>,
}

impl Storyboard {
    pub fn from_plan(plan: BeatPlan) -> Self {
        let roles = assign_beat_roles(&plan.beats);
        let boundaries = roles
            .iter()
            .skip(1)
            .map(|role| match role {
                ChunkRole::Head => ShotTransition::Cut,
                ChunkRole::Follower => ShotTransition::Continue,
            })
            .collect();
        Self {
            target_duration: plan.target_duration,
            covered_duration: plan.covered_duration,
            beats: plan.beats,
            roles,
            boundaries,
        }
    }

    pub fn head_count(&self) -> usize {
        self.roles.iter().filter(|r| **r == ChunkRole::Head).count()
    }
}

pub(super) fn run(plan: BeatPlan) -> Result<StageOutcome, StageError> {
    let storyboard = Storyboard::from_plan(plan);
    tracing::info!(
        beats = storyboard.beats.len(),
        heads = storyboard.head_count(),
        "Storyboard built",
    );
    Ok(StageOutcome::free(StageOutput::Storyboard(storyboard)))
}

#[cfg(test)]
mod tests {
    use storyreel_core::job::ShotDescriptor;

    use super::*;

    fn beat(id: &str, start: f64, transition: ShotTransition) -> Beat {
        Beat {
            id: id.to_string(),
            start_time: start,
            duration: 5.0,
            shot: ShotDescriptor {
                framing: "wide".to_string(),
                transition,
            },
            prompt: id.to_string(),
            reference: None,
        }
    }

    #[test]
    fn boundaries_mirror_roles() {
        let storyboard = Storyboard::from_plan(BeatPlan {
            target_duration: 15.0,
            covered_duration: 15.0,
            beats: vec![
                beat("a", 0.0, ShotTransition::Cut),
                beat("b", 5.0, ShotTransition::Continue),
                beat("c", 10.0, ShotTransition::Cut),
            ],
        });
        assert_eq!(storyboard.roles, vec![ChunkRole::Head, ChunkRole::Follower, ChunkRole::Head]);
        assert_eq!(storyboard.boundaries, vec![ShotTransition::Continue, ShotTransition::Cut]);
        assert_eq!(storyboard.head_count(), 2);
    }

    #[test]
    fn first_beat_is_head_even_when_marked_continue() {
        let storyboard = Storyboard::from_plan(BeatPlan {
            target_duration: 5.0,
            covered_duration: 5.0,
            beats: vec![beat("a", 0.0, ShotTransition::Continue)],
        });
        assert_eq!(storyboard.roles, vec![ChunkRole::Head]);
        assert!(storyboard.boundaries.is_empty());
    }
}
