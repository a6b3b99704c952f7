use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use mongodb::bson::{self, doc, oid::ObjectId, Document};
use mongodb::error::{Error as MongoError, ErrorKind, WriteFailure, TRANSIENT_TRANSACTION_ERROR};
use mongodb::options::{IndexOptions, ReturnDocument};
use mongodb::{Client, Collection, Database, IndexModel};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::{
    CompletionWrite, EvaluationWrite, HeartbeatUpdate, HeartbeatWrite, ProgressWrite,
    SessionStore,
};
use crate::metrics::track_store_operation;
use crate::models::{
    ActivityEvent, CompletionRecord, CourseEvaluation, NewActivityEvent, NewSession,
    QuestionResponse, SaveProgressRequest, Session, SessionStatus,
};
use crate::utils::retry::{retry_when, RetryConfig};
use crate::utils::time::{bson_datetime_as_chrono, bson_datetime_as_chrono_opt, chrono_to_bson};

const SESSIONS: &str = "ce_sessions";
const EVENTS: &str = "activity_events";
const EVALUATIONS: &str = "course_evaluations";
const COMPLETIONS: &str = "ce_completions";

const DUPLICATE_KEY: i32 = 11000;
const CERTIFICATE_INDEX: &str = "certificate_number_unique";
const ATTEMPT_INSERT_RETRIES: usize = 5;

/// MongoDB-backed store. Multi-document units run in transactions, so the
/// deployment must be a replica set.
pub struct MongoSessionStore {
    client: Client,
    db: Database,
}

impl MongoSessionStore {
    pub fn new(client: Client, db: Database) -> Self {
        Self { client, db }
    }

    fn sessions(&self) -> Collection<SessionDocument> {
        self.db.collection(SESSIONS)
    }

    fn events(&self) -> Collection<EventDocument> {
        self.db.collection(EVENTS)
    }

    fn evaluations(&self) -> Collection<EvaluationDocument> {
        self.db.collection(EVALUATIONS)
    }

    fn completions(&self) -> Collection<CompletionDocument> {
        self.db.collection(COMPLETIONS)
    }

    pub async fn ensure_indexes(&self) -> Result<()> {
        self.sessions()
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "learner_id": 1, "activity_id": 1, "attempt_number": 1 })
                    .options(
                        IndexOptions::builder()
                            .unique(true)
                            .name("learner_activity_attempt_unique".to_string())
                            .build(),
                    )
                    .build(),
            )
            .await
            .context("Failed to create session attempt index")?;

        self.events()
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "session_id": 1, "_id": 1 })
                    .build(),
            )
            .await
            .context("Failed to create activity event index")?;

        self.evaluations()
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "session_id": 1 })
                    .options(IndexOptions::builder().unique(true).build())
                    .build(),
            )
            .await
            .context("Failed to create evaluation index")?;

        self.completions()
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "certificate_number": 1 })
                    .options(
                        IndexOptions::builder()
                            .unique(true)
                            .name(CERTIFICATE_INDEX.to_string())
                            .build(),
                    )
                    .build(),
            )
            .await
            .context("Failed to create certificate number index")?;

        self.completions()
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "learner_id": 1, "activity_id": 1, "issued_at": -1 })
                    .build(),
            )
            .await
            .context("Failed to create completion lookup index")?;

        tracing::info!("MongoDB indexes ensured for database {}", self.db.name());
        Ok(())
    }

    async fn heartbeat_transaction(
        &self,
        filter: &Document,
        change: &Document,
        events: &[NewActivityEvent],
    ) -> Result<Option<SessionDocument>, MongoError> {
        let mut txn = self.client.start_session().await?;
        txn.start_transaction().await?;

        let applied = match self
            .sessions()
            .find_one_and_update(filter.clone(), change.clone())
            .return_document(ReturnDocument::After)
            .session(&mut txn)
            .await
        {
            Ok(applied) => applied,
            Err(e) => {
                let _ = txn.abort_transaction().await;
                return Err(e);
            }
        };

        if applied.is_none() {
            txn.abort_transaction().await?;
            return Ok(None);
        }

        if !events.is_empty() {
            let docs: Vec<EventDocument> = events.iter().map(EventDocument::from).collect();
            if let Err(e) = self.events().insert_many(docs).session(&mut txn).await {
                let _ = txn.abort_transaction().await;
                return Err(e);
            }
        }

        txn.commit_transaction().await?;
        Ok(applied)
    }

    async fn completion_transaction(
        &self,
        record: &CompletionRecord,
    ) -> Result<IssueAttempt, MongoError> {
        let mut txn = self.client.start_session().await?;
        txn.start_transaction().await?;

        if let Err(e) = self
            .completions()
            .insert_one(CompletionDocument::from(record))
            .session(&mut txn)
            .await
        {
            let _ = txn.abort_transaction().await;
            return match duplicate_key_message(&e) {
                Some(message) => Ok(IssueAttempt::Duplicate(message)),
                None => Err(e),
            };
        }

        let updated = match self
            .sessions()
            .update_one(
                doc! { "_id": &record.session_id, "status": SessionStatus::InProgress.as_str() },
                doc! { "$set": {
                    "status": SessionStatus::Completed.as_str(),
                    "completed_at": chrono_to_bson(record.issued_at),
                } },
            )
            .session(&mut txn)
            .await
        {
            Ok(updated) => updated,
            Err(e) => {
                let _ = txn.abort_transaction().await;
                return Err(e);
            }
        };

        if updated.matched_count == 0 {
            txn.abort_transaction().await?;
            return Ok(IssueAttempt::SessionNotOpen);
        }

        txn.commit_transaction().await?;
        Ok(IssueAttempt::Committed)
    }
}

enum IssueAttempt {
    Committed,
    Duplicate(String),
    SessionNotOpen,
}

#[async_trait]
impl SessionStore for MongoSessionStore {
    async fn insert_session(&self, new: NewSession) -> Result<Session> {
        track_store_operation("insert_session", async {
            for _ in 0..ATTEMPT_INSERT_RETRIES {
                let prior_attempts = self
                    .sessions()
                    .count_documents(doc! {
                        "learner_id": &new.learner_id,
                        "activity_id": &new.activity_id,
                    })
                    .await
                    .context("Failed to count prior attempts")?;

                let session = Session::start(new.clone(), prior_attempts as u32 + 1);
                match self
                    .sessions()
                    .insert_one(SessionDocument::from(&session))
                    .await
                {
                    Ok(_) => return Ok(session),
                    Err(e) if duplicate_key_message(&e).is_some() => {
                        tracing::warn!(
                            "Attempt {} for learner {} on {} taken concurrently, recounting",
                            session.attempt_number,
                            new.learner_id,
                            new.activity_id
                        );
                    }
                    Err(e) => return Err(e).context("Failed to insert session"),
                }
            }
            anyhow::bail!(
                "Could not assign an attempt number for learner {} on {}",
                new.learner_id,
                new.activity_id
            )
        })
        .await
    }

    async fn find_session(&self, session_id: &str) -> Result<Option<Session>> {
        let found = self
            .sessions()
            .find_one(doc! { "_id": session_id })
            .await
            .context("Failed to load session")?;
        Ok(found.map(Session::from))
    }

    async fn list_sessions(&self, learner_id: &str, activity_id: &str) -> Result<Vec<Session>> {
        let cursor = self
            .sessions()
            .find(doc! { "learner_id": learner_id, "activity_id": activity_id })
            .sort(doc! { "attempt_number": -1 })
            .await
            .context("Failed to query sessions")?;
        let docs: Vec<SessionDocument> = cursor
            .try_collect()
            .await
            .context("Failed to read sessions")?;
        Ok(docs.into_iter().map(Session::from).collect())
    }

    async fn record_heartbeat(
        &self,
        session_id: &str,
        update: HeartbeatUpdate,
    ) -> Result<HeartbeatWrite> {
        let cutoff = chrono_to_bson(update.received_at - update.min_gap);
        let filter = doc! {
            "_id": session_id,
            "status": SessionStatus::InProgress.as_str(),
            "$or": [
                { "last_heartbeat_at": null },
                { "last_heartbeat_at": { "$lte": cutoff } },
            ],
        };

        let counter = if update.is_active {
            "active_seconds"
        } else {
            "idle_seconds"
        };
        let mut inc = Document::new();
        inc.insert(counter, update.increment_seconds as i64);
        let mut set = doc! { "last_heartbeat_at": chrono_to_bson(update.received_at) };
        if let Some(timings) = &update.phase_timings {
            set.insert(
                "phase_timings",
                bson::to_bson(timings).context("Failed to encode phase timings")?,
            );
        }
        let change = doc! { "$inc": inc, "$set": set };

        let applied = track_store_operation("record_heartbeat", async {
            retry_when(RetryConfig::default(), is_transient, || {
                self.heartbeat_transaction(&filter, &change, &update.events)
            })
            .await
            .context("Heartbeat transaction failed")
        })
        .await?;

        if let Some(doc) = applied {
            return Ok(HeartbeatWrite::Accepted {
                active_seconds: non_negative(doc.active_seconds),
                idle_seconds: non_negative(doc.idle_seconds),
            });
        }

        // The guarded update matched nothing; find out which guard failed.
        Ok(match self.find_session(session_id).await? {
            None => HeartbeatWrite::NotFound,
            Some(session) if !session.is_in_progress() => HeartbeatWrite::NotInProgress,
            Some(session) => HeartbeatWrite::TooFrequent {
                active_seconds: session.active_seconds,
            },
        })
    }

    async fn save_progress(
        &self,
        session_id: &str,
        update: &SaveProgressRequest,
    ) -> Result<ProgressWrite> {
        let mut set = Document::new();
        if let Some(responses) = &update.question_responses {
            set.insert(
                "question_responses",
                bson::to_bson(responses).context("Failed to encode responses")?,
            );
        }
        if let Some(answered) = update.questions_answered {
            set.insert("questions_answered", answered as i64);
        }
        if let Some(ratings) = &update.self_assessment_ratings {
            set.insert(
                "self_assessment_ratings",
                bson::to_bson(ratings).context("Failed to encode ratings")?,
            );
        }
        if let Some(notes) = &update.notes {
            set.insert("notes", notes.as_str());
        }

        let filter = doc! { "_id": session_id, "status": SessionStatus::InProgress.as_str() };
        let updated = if set.is_empty() {
            self.sessions()
                .find_one(filter)
                .await
                .context("Failed to load session")?
        } else {
            self.sessions()
                .find_one_and_update(filter, doc! { "$set": set })
                .return_document(ReturnDocument::After)
                .await
                .context("Failed to save progress")?
        };

        if let Some(doc) = updated {
            return Ok(ProgressWrite::Updated(Box::new(Session::from(doc))));
        }
        Ok(match self.find_session(session_id).await? {
            None => ProgressWrite::NotFound,
            Some(_) => ProgressWrite::NotInProgress,
        })
    }

    async fn list_events(&self, session_id: &str) -> Result<Vec<ActivityEvent>> {
        let cursor = self
            .events()
            .find(doc! { "session_id": session_id })
            .sort(doc! { "_id": 1 })
            .await
            .context("Failed to query activity events")?;
        let docs: Vec<EventDocument> = cursor
            .try_collect()
            .await
            .context("Failed to read activity events")?;
        Ok(docs.into_iter().map(ActivityEvent::from).collect())
    }

    async fn insert_evaluation(&self, evaluation: &CourseEvaluation) -> Result<EvaluationWrite> {
        match self
            .evaluations()
            .insert_one(EvaluationDocument::from(evaluation))
            .await
        {
            Ok(_) => Ok(EvaluationWrite::Created),
            Err(e) if duplicate_key_message(&e).is_some() => Ok(EvaluationWrite::AlreadyExists),
            Err(e) => Err(e).context("Failed to insert evaluation"),
        }
    }

    async fn find_evaluation(&self, session_id: &str) -> Result<Option<CourseEvaluation>> {
        let found = self
            .evaluations()
            .find_one(doc! { "session_id": session_id })
            .await
            .context("Failed to load evaluation")?;
        Ok(found.map(CourseEvaluation::from))
    }

    async fn find_completion(&self, session_id: &str) -> Result<Option<CompletionRecord>> {
        let found = self
            .completions()
            .find_one(doc! { "_id": session_id })
            .await
            .context("Failed to load completion")?;
        Ok(found.map(CompletionRecord::from))
    }

    async fn find_latest_completion(
        &self,
        learner_id: &str,
        activity_id: &str,
    ) -> Result<Option<CompletionRecord>> {
        let found = self
            .completions()
            .find_one(doc! { "learner_id": learner_id, "activity_id": activity_id })
            .sort(doc! { "issued_at": -1 })
            .await
            .context("Failed to load latest completion")?;
        Ok(found.map(CompletionRecord::from))
    }

    async fn insert_completion(&self, record: &CompletionRecord) -> Result<CompletionWrite> {
        let attempt = track_store_operation("insert_completion", async {
            retry_when(RetryConfig::aggressive(), is_transient, || {
                self.completion_transaction(record)
            })
            .await
            .context("Completion transaction failed")
        })
        .await?;

        match attempt {
            IssueAttempt::Committed => Ok(CompletionWrite::Issued),
            IssueAttempt::Duplicate(message) => {
                if let Some(existing) = self.find_completion(&record.session_id).await? {
                    return Ok(CompletionWrite::AlreadyIssued(Box::new(existing)));
                }
                if message.contains(CERTIFICATE_INDEX) || message.contains("certificate_number") {
                    return Ok(CompletionWrite::CertificateNumberTaken);
                }
                anyhow::bail!("Unexpected duplicate key while issuing completion: {}", message)
            }
            IssueAttempt::SessionNotOpen => Ok(match self.find_session(&record.session_id).await? {
                None => CompletionWrite::NotFound,
                Some(_) => CompletionWrite::NotInProgress,
            }),
        }
    }

    async fn health_check(&self) -> Result<()> {
        self.db
            .run_command(doc! { "ping": 1 })
            .await
            .context("MongoDB ping failed")?;
        Ok(())
    }
}

fn duplicate_key_message(err: &MongoError) -> Option<String> {
    match *err.kind {
        ErrorKind::Write(WriteFailure::WriteError(ref we)) if we.code == DUPLICATE_KEY => {
            Some(we.message.clone())
        }
        ErrorKind::Command(ref ce) if ce.code == DUPLICATE_KEY => Some(ce.message.clone()),
        _ => None,
    }
}

fn is_transient(err: &MongoError) -> bool {
    err.contains_label(TRANSIENT_TRANSACTION_ERROR)
}

fn non_negative(value: i64) -> u64 {
    u64::try_from(value).unwrap_or(0)
}

#[derive(Debug, Serialize, Deserialize)]
struct SessionDocument {
    #[serde(rename = "_id")]
    id: String,
    learner_id: String,
    activity_id: String,
    attempt_number: i64,
    ce_eligible: bool,
    #[serde(with = "bson_datetime_as_chrono_opt", default)]
    disclaimer_accepted_at: Option<DateTime<Utc>>,
    status: SessionStatus,
    active_seconds: i64,
    idle_seconds: i64,
    #[serde(with = "bson_datetime_as_chrono_opt", default)]
    last_heartbeat_at: Option<DateTime<Utc>>,
    #[serde(default)]
    phase_timings: HashMap<String, i64>,
    #[serde(default)]
    question_responses: Vec<QuestionResponse>,
    #[serde(default)]
    questions_answered: i64,
    #[serde(default)]
    self_assessment_ratings: HashMap<String, i32>,
    #[serde(default)]
    notes: Option<String>,
    #[serde(with = "bson_datetime_as_chrono")]
    started_at: DateTime<Utc>,
    #[serde(with = "bson_datetime_as_chrono_opt", default)]
    completed_at: Option<DateTime<Utc>>,
}

impl From<&Session> for SessionDocument {
    fn from(session: &Session) -> Self {
        Self {
            id: session.id.clone(),
            learner_id: session.learner_id.clone(),
            activity_id: session.activity_id.clone(),
            attempt_number: i64::from(session.attempt_number),
            ce_eligible: session.ce_eligible,
            disclaimer_accepted_at: session.disclaimer_accepted_at,
            status: session.status,
            active_seconds: session.active_seconds as i64,
            idle_seconds: session.idle_seconds as i64,
            last_heartbeat_at: session.last_heartbeat_at,
            phase_timings: session
                .phase_timings
                .iter()
                .map(|(phase, secs)| (phase.clone(), *secs as i64))
                .collect(),
            question_responses: session.question_responses.clone(),
            questions_answered: i64::from(session.questions_answered),
            self_assessment_ratings: session
                .self_assessment_ratings
                .iter()
                .map(|(objective, rating)| (objective.clone(), i32::from(*rating)))
                .collect(),
            notes: session.notes.clone(),
            started_at: session.started_at,
            completed_at: session.completed_at,
        }
    }
}

impl From<SessionDocument> for Session {
    fn from(doc: SessionDocument) -> Self {
        Self {
            id: doc.id,
            learner_id: doc.learner_id,
            activity_id: doc.activity_id,
            attempt_number: u32::try_from(doc.attempt_number).unwrap_or(0),
            ce_eligible: doc.ce_eligible,
            disclaimer_accepted_at: doc.disclaimer_accepted_at,
            status: doc.status,
            active_seconds: non_negative(doc.active_seconds),
            idle_seconds: non_negative(doc.idle_seconds),
            last_heartbeat_at: doc.last_heartbeat_at,
            phase_timings: doc
                .phase_timings
                .into_iter()
                .map(|(phase, secs)| (phase, non_negative(secs)))
                .collect(),
            question_responses: doc.question_responses,
            questions_answered: u32::try_from(doc.questions_answered).unwrap_or(0),
            self_assessment_ratings: doc
                .self_assessment_ratings
                .into_iter()
                .map(|(objective, rating)| (objective, u8::try_from(rating).unwrap_or(0)))
                .collect(),
            notes: doc.notes,
            started_at: doc.started_at,
            completed_at: doc.completed_at,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct EventDocument {
    #[serde(rename = "_id")]
    id: ObjectId,
    session_id: String,
    event_type: String,
    #[serde(default)]
    phase: Option<String>,
    #[serde(default)]
    metadata: Option<serde_json::Value>,
    #[serde(with = "bson_datetime_as_chrono")]
    timestamp: DateTime<Utc>,
}

impl From<&NewActivityEvent> for EventDocument {
    fn from(event: &NewActivityEvent) -> Self {
        Self {
            id: ObjectId::new(),
            session_id: event.session_id.clone(),
            event_type: event.event_type.clone(),
            phase: event.phase.clone(),
            metadata: event.metadata.clone(),
            timestamp: event.timestamp,
        }
    }
}

impl From<EventDocument> for ActivityEvent {
    fn from(doc: EventDocument) -> Self {
        Self {
            id: doc.id.to_hex(),
            session_id: doc.session_id,
            event_type: doc.event_type,
            phase: doc.phase,
            metadata: doc.metadata,
            timestamp: doc.timestamp,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct EvaluationDocument {
    #[serde(rename = "_id")]
    id: String,
    session_id: String,
    learner_id: String,
    activity_id: String,
    objectives_met: i32,
    content_relevance: i32,
    content_evidence: i32,
    material_quality: i32,
    time_appropriate: i32,
    would_recommend: i32,
    #[serde(default)]
    most_valuable: Option<String>,
    #[serde(default)]
    least_valuable: Option<String>,
    #[serde(default)]
    suggested_improvements: Option<String>,
    #[serde(default)]
    objective_ratings: Option<HashMap<String, i32>>,
    #[serde(with = "bson_datetime_as_chrono")]
    submitted_at: DateTime<Utc>,
}

fn likert(value: i32) -> u8 {
    u8::try_from(value).unwrap_or(0)
}

impl From<&CourseEvaluation> for EvaluationDocument {
    fn from(evaluation: &CourseEvaluation) -> Self {
        Self {
            id: evaluation.id.clone(),
            session_id: evaluation.session_id.clone(),
            learner_id: evaluation.learner_id.clone(),
            activity_id: evaluation.activity_id.clone(),
            objectives_met: i32::from(evaluation.objectives_met),
            content_relevance: i32::from(evaluation.content_relevance),
            content_evidence: i32::from(evaluation.content_evidence),
            material_quality: i32::from(evaluation.material_quality),
            time_appropriate: i32::from(evaluation.time_appropriate),
            would_recommend: i32::from(evaluation.would_recommend),
            most_valuable: evaluation.most_valuable.clone(),
            least_valuable: evaluation.least_valuable.clone(),
            suggested_improvements: evaluation.suggested_improvements.clone(),
            objective_ratings: evaluation.objective_ratings.as_ref().map(|ratings| {
                ratings
                    .iter()
                    .map(|(objective, rating)| (objective.clone(), i32::from(*rating)))
                    .collect()
            }),
            submitted_at: evaluation.submitted_at,
        }
    }
}

impl From<EvaluationDocument> for CourseEvaluation {
    fn from(doc: EvaluationDocument) -> Self {
        Self {
            id: doc.id,
            session_id: doc.session_id,
            learner_id: doc.learner_id,
            activity_id: doc.activity_id,
            objectives_met: likert(doc.objectives_met),
            content_relevance: likert(doc.content_relevance),
            content_evidence: likert(doc.content_evidence),
            material_quality: likert(doc.material_quality),
            time_appropriate: likert(doc.time_appropriate),
            would_recommend: likert(doc.would_recommend),
            most_valuable: doc.most_valuable,
            least_valuable: doc.least_valuable,
            suggested_improvements: doc.suggested_improvements,
            objective_ratings: doc.objective_ratings.map(|ratings| {
                ratings
                    .into_iter()
                    .map(|(objective, rating)| (objective, likert(rating)))
                    .collect()
            }),
            submitted_at: doc.submitted_at,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct CompletionDocument {
    /// Session id; one completion per session.
    #[serde(rename = "_id")]
    session_id: String,
    certificate_number: String,
    learner_id: String,
    activity_id: String,
    learner_name: String,
    #[serde(default)]
    learner_license: Option<String>,
    activity_title: String,
    activity_version: String,
    credit_hours: f64,
    duration_minutes: i64,
    #[serde(with = "bson_datetime_as_chrono")]
    issued_at: DateTime<Utc>,
}

impl From<&CompletionRecord> for CompletionDocument {
    fn from(record: &CompletionRecord) -> Self {
        Self {
            session_id: record.session_id.clone(),
            certificate_number: record.certificate_number.clone(),
            learner_id: record.learner_id.clone(),
            activity_id: record.activity_id.clone(),
            learner_name: record.learner_name.clone(),
            learner_license: record.learner_license.clone(),
            activity_title: record.activity_title.clone(),
            activity_version: record.activity_version.clone(),
            credit_hours: record.credit_hours,
            duration_minutes: record.duration_minutes as i64,
            issued_at: record.issued_at,
        }
    }
}

impl From<CompletionDocument> for CompletionRecord {
    fn from(doc: CompletionDocument) -> Self {
        Self {
            certificate_number: doc.certificate_number,
            session_id: doc.session_id,
            learner_id: doc.learner_id,
            activity_id: doc.activity_id,
            learner_name: doc.learner_name,
            learner_license: doc.learner_license,
            activity_title: doc.activity_title,
            activity_version: doc.activity_version,
            credit_hours: doc.credit_hours,
            duration_minutes: non_negative(doc.duration_minutes),
            issued_at: doc.issued_at,
        }
    }
}
