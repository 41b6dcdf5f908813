//! Starter scenario document for `trainexus new`.

use serde_json::{json, Value};

/// A complete, valid scenario document for `tag` that authors can edit.
pub fn starter_document(tag: &str) -> Value {
    json!({
        "tag": tag,
        "name": "New training scenario",
        "description": "Describe what the trainee practises here.",
        "didactics": {
            "didactic_goal": "The learner can explain the procedure in their own words.",
            "success_criteria": ["Asks at least one clarifying question"],
            "must_rules": ["Stay respectful and patient"],
            "never_rules": ["Never give the full answer immediately"],
            "target_profile": "New employees in their first week"
        },
        "personas": {
            "trainee": {
                "role": "Trainer",
                "instructions": "Guide the learner with questions instead of lectures.",
                "tone": "friendly"
            },
            "tester": {
                "role": "Learner",
                "instructions": "Act as a curious but unsure new employee."
            }
        },
        "templates": {
            "main": "You are {persona.role}. {persona.instructions}\nGoal: {didactic_goal}\nAlways:\n{must_rules}\nNever:\n{never_rules}\nReference material:\n{documents}\nConversation so far:\n{history}",
            "tester": "You are {persona.role}. {persona.instructions}\nYou talk to {counterpart.role}.\nConversation so far:\n{history}\nWhen you have nothing left to ask, write {end_marker}.",
            "formative": "Judge the conversation so far on: {criterion.description}\nScore range: {score_range}\n{transcript}",
            "summative": "Judge the whole conversation on: {criterion.description}\nGoal: {didactic_goal}\nScore range: {score_range}\n{transcript}"
        },
        "rubric": [
            {
                "id": "guidance",
                "description": "The trainer guides with questions",
                "weight": 1,
                "type": "scaled",
                "phase": "formative"
            },
            {
                "id": "goal_reached",
                "description": "The learner reached the didactic goal",
                "weight": 2,
                "type": "binary",
                "phase": "summative"
            }
        ],
        "max_turns": 6,
        "pass_threshold": 0.6,
        "formative_interval": 2,
        "end_marker": "[END]"
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{validate, Phase};

    #[test]
    fn starter_document_is_valid() {
        let spec = validate(&starter_document("onboarding")).unwrap();
        assert_eq!(spec.tag, "onboarding");
        assert_eq!(spec.criteria(Phase::Formative).count(), 1);
        assert_eq!(spec.criteria(Phase::Summative).count(), 1);
    }
}
