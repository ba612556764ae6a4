pub mod access;
pub mod domain;
pub mod evaluation;
pub mod lifecycle;
pub mod ports;
pub mod quota;

pub use domain::{
    CriterionScore, DailyCounter, EcosEvaluation, EcosMessage, EcosReport, EcosScenario,
    EcosSession, EvaluationDraft, Exchange, LmsSession, MessageRole, Rubric, ScenarioDraft,
    ScenarioGrant, SessionEvaluation, SessionStatus, TrainingSession, TrainingSessionDraft, User,
};
pub use ports::{
    DatabaseService, EvaluationService, KnowledgeBaseService, PatientSimulationService,
    PortError, PortResult, QuestionAnsweringService,
};
