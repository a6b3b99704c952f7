use anyhow::anyhow;
use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::config::EngineSettings;
use crate::error::{ComplianceError, ComplianceResult};
use crate::metrics::{CERTIFICATE_COLLISIONS_TOTAL, COMPLETIONS_TOTAL};
use crate::models::{
    Activity, CompletionLookup, CompletionRecord, CriteriaReport, LearnerProfile, Session,
};
use crate::services::catalog::{ActivityCatalog, LearnerDirectory};
use crate::services::criteria;
use crate::services::store::{CompletionWrite, SessionStore};

type NumberGenerator = dyn Fn(&str, DateTime<Utc>) -> String + Send + Sync;

/// `{prefix}-{YYYYMMDD}-{8 uppercase hex}` from four CSPRNG bytes.
pub fn certificate_number(prefix: &str, issued_at: DateTime<Utc>) -> String {
    let suffix: [u8; 4] = rand::random();
    format!(
        "{}-{}-{}",
        prefix,
        issued_at.format("%Y%m%d"),
        hex::encode_upper(suffix)
    )
}

/// Gatekeeper for CE credit: preconditions, criteria, then issuance.
pub struct CompletionService {
    store: Arc<dyn SessionStore>,
    catalog: Arc<dyn ActivityCatalog>,
    learners: Arc<dyn LearnerDirectory>,
    settings: EngineSettings,
    next_number: Arc<NumberGenerator>,
}

impl CompletionService {
    pub fn new(
        store: Arc<dyn SessionStore>,
        catalog: Arc<dyn ActivityCatalog>,
        learners: Arc<dyn LearnerDirectory>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            store,
            catalog,
            learners,
            settings,
            next_number: Arc::new(certificate_number),
        }
    }

    pub fn with_number_generator(
        mut self,
        generator: impl Fn(&str, DateTime<Utc>) -> String + Send + Sync + 'static,
    ) -> Self {
        self.next_number = Arc::new(generator);
        self
    }

    async fn load_session(&self, session_id: &str) -> ComplianceResult<Session> {
        self.store
            .find_session(session_id)
            .await?
            .ok_or_else(ComplianceError::session_not_found)
    }

    async fn load_activity(&self, activity_id: &str) -> ComplianceResult<Activity> {
        self.catalog
            .find_activity(activity_id)
            .await?
            .ok_or_else(|| ComplianceError::NotFound("Activity not found".to_string()))
    }

    /// Where the session stands, without issuing anything.
    pub async fn criteria_report(&self, session_id: &str) -> ComplianceResult<CriteriaReport> {
        let session = self.load_session(session_id).await?;
        let already_issued = self.store.find_completion(session_id).await?.is_some();
        let activity = self.load_activity(&session.activity_id).await?;
        let evaluation_submitted = self.store.find_evaluation(session_id).await?.is_some();

        let reasons = criteria::unmet_criteria(&session, &activity.rubric(), evaluation_submitted);

        Ok(CriteriaReport {
            session_id: session.id,
            ce_eligible: session.ce_eligible,
            already_issued,
            satisfied: reasons.is_empty(),
            criteria: reasons,
        })
    }

    pub async fn complete(&self, session_id: &str) -> ComplianceResult<CompletionRecord> {
        self.complete_at(session_id, Utc::now()).await
    }

    /// Runs the preconditions and criteria, then issues a certificate dated `now`.
    pub async fn complete_at(
        &self,
        session_id: &str,
        now: DateTime<Utc>,
    ) -> ComplianceResult<CompletionRecord> {
        let session = self.load_session(session_id).await?;

        if let Some(existing) = self.store.find_completion(session_id).await? {
            COMPLETIONS_TOTAL.with_label_values(&["already_issued"]).inc();
            return Err(ComplianceError::AlreadyIssued(Box::new(existing)));
        }

        if !session.ce_eligible {
            COMPLETIONS_TOTAL.with_label_values(&["not_eligible"]).inc();
            return Err(ComplianceError::NotEligible);
        }

        let activity = self.load_activity(&session.activity_id).await?;
        let evaluation_submitted = self.store.find_evaluation(session_id).await?.is_some();

        if let Err(e) = criteria::evaluate(&session, &activity.rubric(), evaluation_submitted) {
            COMPLETIONS_TOTAL
                .with_label_values(&["criteria_not_met"])
                .inc();
            tracing::warn!("Completion refused for session {}: {}", session_id, e);
            return Err(e);
        }

        let learner = self
            .learners
            .find_learner(&session.learner_id)
            .await?
            .ok_or_else(|| ComplianceError::NotFound("Learner profile not found".to_string()))?;

        self.issue(&session, &activity, &learner, now).await
    }

    /// Persists a completion record and closes the session. Callers must have
    /// validated the criteria first.
    pub async fn issue(
        &self,
        session: &Session,
        activity: &Activity,
        learner: &LearnerProfile,
        issued_at: DateTime<Utc>,
    ) -> ComplianceResult<CompletionRecord> {
        let max_attempts = self.settings.certificate_max_attempts.max(1);

        for attempt in 1..=max_attempts {
            let record = CompletionRecord {
                certificate_number: (self.next_number)(
                    &self.settings.certificate_prefix,
                    issued_at,
                ),
                session_id: session.id.clone(),
                learner_id: session.learner_id.clone(),
                activity_id: session.activity_id.clone(),
                learner_name: learner.display_name.clone(),
                learner_license: learner.license_display(),
                activity_title: activity.title.clone(),
                activity_version: activity.version.clone(),
                credit_hours: activity.credit_hours(),
                duration_minutes: session.active_minutes(),
                issued_at,
            };

            match self.store.insert_completion(&record).await? {
                CompletionWrite::Issued => {
                    COMPLETIONS_TOTAL.with_label_values(&["issued"]).inc();
                    tracing::info!(
                        "Certificate {} issued for session {} (learner {}, {} credit hours)",
                        record.certificate_number,
                        record.session_id,
                        record.learner_id,
                        record.credit_hours
                    );
                    return Ok(record);
                }
                CompletionWrite::AlreadyIssued(existing) => {
                    COMPLETIONS_TOTAL.with_label_values(&["already_issued"]).inc();
                    return Err(ComplianceError::AlreadyIssued(existing));
                }
                CompletionWrite::CertificateNumberTaken => {
                    CERTIFICATE_COLLISIONS_TOTAL.inc();
                    tracing::warn!(
                        "Certificate number {} already taken, regenerating ({}/{})",
                        record.certificate_number,
                        attempt,
                        max_attempts
                    );
                }
                CompletionWrite::NotFound => return Err(ComplianceError::session_not_found()),
                CompletionWrite::NotInProgress => return Err(ComplianceError::not_in_progress()),
            }
        }

        tracing::error!(
            "No unique certificate number for session {} after {} attempts",
            session.id,
            max_attempts
        );
        Err(ComplianceError::Internal(anyhow!(
            "Could not allocate a unique certificate number after {} attempts",
            max_attempts
        )))
    }

    /// Latest credit earned by a learner on an activity, if any.
    pub async fn completion_for(
        &self,
        activity_id: &str,
        learner_id: &str,
    ) -> ComplianceResult<CompletionLookup> {
        let completion = self
            .store
            .find_latest_completion(learner_id, activity_id)
            .await?;
        Ok(CompletionLookup {
            completed: completion.is_some(),
            completion,
        })
    }
}
