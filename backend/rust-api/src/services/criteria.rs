//! Completion criteria validation. Pure: no I/O, no clock, no mutation.

use crate::error::{ComplianceError, ComplianceResult};
use crate::models::{Rubric, Session};

/// Checks every rule in the rubric and reports all failures at once.
pub fn evaluate(
    session: &Session,
    rubric: &Rubric,
    evaluation_submitted: bool,
) -> ComplianceResult<()> {
    let reasons = unmet_criteria(session, rubric, evaluation_submitted);
    if reasons.is_empty() {
        Ok(())
    } else {
        Err(ComplianceError::CriteriaNotMet(reasons))
    }
}

/// Human-readable reasons for every unmet rule, in rubric order.
pub fn unmet_criteria(
    session: &Session,
    rubric: &Rubric,
    evaluation_submitted: bool,
) -> Vec<String> {
    let criteria = &rubric.criteria;
    let mut reasons = Vec::new();

    let answered = session.questions_answered as usize;
    if criteria.all_questions_answered
        && (answered == 0 || session.question_responses.len() < answered)
    {
        reasons.push("All questions must be answered".to_string());
    }

    let active_minutes = session.active_minutes();
    if active_minutes < u64::from(criteria.minimum_active_minutes) {
        reasons.push(format!(
            "Minimum {} active minutes required ({} completed)",
            criteria.minimum_active_minutes, active_minutes
        ));
    }

    if criteria.self_assessment_required
        && session.self_assessment_ratings.len() < rubric.objective_count
    {
        reasons.push("Self-assessment for all learning objectives is required".to_string());
    }

    if criteria.post_activity_evaluation_required && !evaluation_submitted {
        reasons.push("Post-activity evaluation must be submitted".to_string());
    }

    reasons
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CompletionCriteria, NewSession, QuestionResponse};
    use chrono::Utc;

    fn session(active_seconds: u64) -> Session {
        let mut session = Session::start(
            NewSession {
                id: "s-1".to_string(),
                learner_id: "learner-1".to_string(),
                activity_id: "case-001".to_string(),
                ce_eligible: true,
                disclaimer_accepted_at: Some(Utc::now()),
                started_at: Utc::now(),
            },
            1,
        );
        session.active_seconds = active_seconds;
        session
    }

    fn strict_rubric() -> Rubric {
        Rubric {
            criteria: CompletionCriteria {
                minimum_active_minutes: 50,
                all_questions_answered: true,
                self_assessment_required: true,
                post_activity_evaluation_required: true,
            },
            objective_count: 3,
        }
    }

    #[test]
    fn fresh_session_fails_every_rule() {
        let reasons = unmet_criteria(&session(0), &strict_rubric(), false);
        assert_eq!(
            reasons,
            vec![
                "All questions must be answered".to_string(),
                "Minimum 50 active minutes required (0 completed)".to_string(),
                "Self-assessment for all learning objectives is required".to_string(),
                "Post-activity evaluation must be submitted".to_string(),
            ]
        );
    }

    #[test]
    fn minutes_round_down_in_the_message() {
        let reasons = unmet_criteria(&session(49 * 30), &strict_rubric(), false);
        assert!(reasons
            .contains(&"Minimum 50 active minutes required (24 completed)".to_string()));
    }

    #[test]
    fn fifty_minutes_exactly_meets_the_minimum() {
        let rubric = Rubric {
            criteria: CompletionCriteria::default(),
            objective_count: 0,
        };
        assert!(evaluate(&session(3000), &rubric, false).is_ok());
        assert!(evaluate(&session(2999), &rubric, false).is_err());
    }

    fn response(question_id: &str) -> QuestionResponse {
        QuestionResponse {
            question_id: question_id.to_string(),
            phase: None,
            user_response: "answer".to_string(),
            response_length: 6,
            time_spent_sec: 40,
            hints_viewed: 0,
            answer_revealed: false,
            revealed_before_attempt: false,
            self_confidence: None,
        }
    }

    #[test]
    fn fewer_saved_responses_than_answered_counter_fails() {
        let mut s = session(3000);
        s.questions_answered = 2;
        s.question_responses.push(response("q1"));
        let reasons = unmet_criteria(&s, &strict_rubric(), true);
        assert!(reasons.contains(&"All questions must be answered".to_string()));
    }

    #[test]
    fn satisfied_session_passes() {
        let mut s = session(100 * 30);
        s.questions_answered = 2;
        s.question_responses = vec![response("q1"), response("q2")];
        for objective in ["o1", "o2", "o3"] {
            s.self_assessment_ratings.insert(objective.to_string(), 4);
        }
        assert!(evaluate(&s, &strict_rubric(), true).is_ok());
    }

    #[test]
    fn partial_self_assessment_is_reported() {
        let mut s = session(3000);
        s.questions_answered = 1;
        s.question_responses.push(response("q1"));
        s.self_assessment_ratings.insert("o1".to_string(), 5);
        match evaluate(&s, &strict_rubric(), true) {
            Err(ComplianceError::CriteriaNotMet(reasons)) => assert_eq!(
                reasons,
                vec!["Self-assessment for all learning objectives is required".to_string()]
            ),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn evaluation_leaves_session_untouched() {
        let s = session(10);
        let before = s.clone();
        let reasons = |result: ComplianceResult<()>| match result {
            Err(ComplianceError::CriteriaNotMet(reasons)) => reasons,
            other => panic!("unexpected result: {:?}", other),
        };
        let first = reasons(evaluate(&s, &strict_rubric(), false));
        let second = reasons(evaluate(&s, &strict_rubric(), false));
        assert_eq!(first, second);
        assert_eq!(first.len(), 4);
        assert_eq!(s, before);
    }
}
