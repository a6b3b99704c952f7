pub mod activity;
pub mod catalog;
pub mod completion;
pub mod evaluation;
pub mod session;

pub use activity::{
    event_types, ActivityEvent, ActivityEventInput, EventList, HeartbeatRejection,
    HeartbeatRequest, HeartbeatResponse, NewActivityEvent,
};
pub use catalog::{Activity, CatalogSeed, CeMetadata, CompletionCriteria, LearnerProfile, Rubric};
pub use completion::{CompletionLookup, CompletionRecord, CriteriaReport};
pub use evaluation::{CourseEvaluation, SubmitEvaluationRequest};
pub use session::{
    AttemptList, AttemptSummary, CreateSessionRequest, LearnerQuery, NewSession,
    QuestionResponse, SaveProgressRequest, Session, SessionStatus,
};
