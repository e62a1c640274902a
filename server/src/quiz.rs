//! Timed quiz attempts and their scoring
//!
//! Starting a quiz opens a session in the [`SessionStore`] and hands out the
//! questions. Submitting answers is only accepted while that session is
//! active, and consumes it: the session is deleted however evaluation ends.

use crate::config::ServerConfig;
use crate::error::{ConfigError, QuizError};
use crate::session_store::{SessionId, SessionStore};
use crate::utils::unique_id;
use chrono::{DateTime, TimeDelta, Utc};
use log::{debug, info, warn};
use parking_lot::RwLock;
use shared::{
    EvaluateQuizRequest, EvaluateQuizResponse, Problem, Question, QuestionResult,
    QuestionSubmission, StartQuizResponse,
};
use std::sync::Arc;
use uuid::Uuid;

/// Read access to the problem set a quiz draws from
pub trait ProblemStore: Send + Sync {
    fn get_problem_by_id(&self, id: &Uuid) -> Option<Problem>;

    /// Every problem, answers stripped.
    fn questions(&self) -> Vec<Question>;
}

/// Problem set held in memory, in insertion order
#[derive(Debug, Default)]
pub struct InMemoryProblemStore {
    problems: RwLock<Vec<Problem>>,
}

impl InMemoryProblemStore {
    pub fn new(problems: Vec<Problem>) -> Self {
        let store = Self::default();
        for problem in problems {
            store.add_problem(problem);
        }
        store
    }

    /// Loads a JSON array of problems. Entries without an id get a fresh one.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        let problems: Vec<Problem> = serde_json::from_str(json)?;
        Ok(Self::new(problems))
    }

    /// Stores a problem, assigning an id if it has none or a taken one.
    pub fn add_problem(&self, mut problem: Problem) -> Uuid {
        let mut problems = self.problems.write();
        if problem.id.is_nil() || problems.iter().any(|p| p.id == problem.id) {
            problem.id = unique_id(|id| id.is_nil() || problems.iter().any(|p| p.id == *id));
        }
        let id = problem.id;
        problems.push(problem);
        id
    }

    pub fn list_problems(&self) -> Vec<Problem> {
        self.problems.read().clone()
    }

    pub fn len(&self) -> usize {
        self.problems.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.problems.read().is_empty()
    }
}

impl ProblemStore for InMemoryProblemStore {
    fn get_problem_by_id(&self, id: &Uuid) -> Option<Problem> {
        self.problems.read().iter().find(|p| p.id == *id).cloned()
    }

    fn questions(&self) -> Vec<Question> {
        self.problems.read().iter().map(Problem::to_question).collect()
    }
}

/// Deletes the session when dropped, so every return path consumes it.
struct SessionCleanup<'a> {
    sessions: &'a SessionStore,
    id: SessionId,
}

impl Drop for SessionCleanup<'_> {
    fn drop(&mut self) {
        self.sessions.delete_session(&self.id);
        debug!("Session {} consumed", self.id);
    }
}

pub struct QuizService {
    problems: Arc<dyn ProblemStore>,
    sessions: Arc<SessionStore>,
    session_ttl: TimeDelta,
}

impl QuizService {
    pub fn new(
        problems: Arc<dyn ProblemStore>,
        sessions: Arc<SessionStore>,
        session_ttl: TimeDelta,
    ) -> Self {
        Self {
            problems,
            sessions,
            session_ttl,
        }
    }

    /// Service whose sessions last `config.quiz_session_duration`.
    pub fn from_config(
        problems: Arc<dyn ProblemStore>,
        sessions: Arc<SessionStore>,
        config: &ServerConfig,
    ) -> Result<Self, ConfigError> {
        Ok(Self::new(problems, sessions, config.quiz_session_ttl()?))
    }

    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    /// Opens a session and returns it with the questions to answer.
    pub fn start_quiz(&self) -> StartQuizResponse {
        self.start_quiz_at(Utc::now())
    }

    pub fn start_quiz_at(&self, now: DateTime<Utc>) -> StartQuizResponse {
        let session = self.sessions.create_session_at(self.session_ttl, now);
        let questions = self.problems.questions();
        info!(
            "Quiz session {} started with {} questions, expires {}",
            session.id,
            questions.len(),
            session.expiry
        );
        StartQuizResponse {
            session_id: session.id,
            timeout: session.expiry,
            questions,
        }
    }

    pub fn submit_quiz(
        &self,
        request: &EvaluateQuizRequest,
    ) -> Result<EvaluateQuizResponse, QuizError> {
        self.evaluate_quiz(&request.session_id, &request.question_submissions)
    }

    pub fn evaluate_quiz(
        &self,
        session_id: &SessionId,
        submissions: &[QuestionSubmission],
    ) -> Result<EvaluateQuizResponse, QuizError> {
        self.evaluate_quiz_at(session_id, submissions, Utc::now())
    }

    /// Scores a submission against the stored answers
    ///
    /// Fails if the session is unknown or expired, or if any submission names
    /// a problem that does not exist. A failure discards every result; there
    /// is no partial score. The session is deleted whatever the outcome.
    pub fn evaluate_quiz_at(
        &self,
        session_id: &SessionId,
        submissions: &[QuestionSubmission],
        now: DateTime<Utc>,
    ) -> Result<EvaluateQuizResponse, QuizError> {
        let _cleanup = SessionCleanup {
            sessions: &self.sessions,
            id: *session_id,
        };

        let active = self
            .sessions
            .is_session_active(session_id, now)
            .map_err(|_| QuizError::SessionNotFound(*session_id))?;
        if !active {
            warn!("Submission for expired session {}", session_id);
            return Err(QuizError::SessionExpired(*session_id));
        }

        let mut answers = Vec::with_capacity(submissions.len());
        let mut score = 0;
        for submission in submissions {
            let problem = self
                .problems
                .get_problem_by_id(&submission.question_id)
                .ok_or(QuizError::ProblemNotFound(submission.question_id))?;

            let correct = problem.is_correct(&submission.answer);
            if correct {
                score += 1;
            }
            answers.push(QuestionResult {
                id: submission.question_id,
                answer: problem.answer,
                correct,
            });
        }

        info!(
            "Session {} scored {}/{}",
            session_id,
            score,
            submissions.len()
        );
        Ok(EvaluateQuizResponse { score, answers })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::ProblemType;
    use tokio_test::{assert_err, assert_ok};

    const PROBLEMS_JSON: &str = r#"[
        {"Question": "Capital of France?", "Answer": "Paris"},
        {"Question": "2 + 2?", "Answer": "4"},
        {"Id": "6f1c1f7e-0b7a-4d0e-9a43-1d2c3b4a5f60", "Type": "choice",
         "Question": "Largest planet?", "Choices": ["Mars", "Jupiter"], "Answer": "Jupiter"}
    ]"#;

    fn setup() -> (QuizService, Arc<InMemoryProblemStore>) {
        let store = Arc::new(assert_ok!(InMemoryProblemStore::from_json(PROBLEMS_JSON)));
        let service = QuizService::new(
            store.clone(),
            Arc::new(SessionStore::new()),
            TimeDelta::seconds(30),
        );
        (service, store)
    }

    fn submit(question_id: Uuid, answer: &str) -> QuestionSubmission {
        QuestionSubmission {
            question_id,
            answer: answer.to_string(),
        }
    }

    #[test]
    fn test_from_json_assigns_missing_ids() {
        let (_, store) = setup();
        let problems = store.list_problems();

        assert_eq!(problems.len(), 3);
        assert!(problems.iter().all(|p| !p.id.is_nil()));
        assert_ne!(problems[0].id, problems[1].id);
        assert_eq!(
            problems[2].id,
            Uuid::parse_str("6f1c1f7e-0b7a-4d0e-9a43-1d2c3b4a5f60").unwrap()
        );
        assert_eq!(problems[2].r#type, ProblemType::Choice);
        assert_eq!(problems[0].r#type, ProblemType::Text);
    }

    #[test]
    fn test_from_json_rejects_garbage() {
        assert_err!(InMemoryProblemStore::from_json("{\"not\": \"a list\"}"));
    }

    #[test]
    fn test_start_quiz_hides_answers() {
        let (service, store) = setup();
        let now = Utc::now();

        let response = service.start_quiz_at(now);

        assert_eq!(response.timeout, now + TimeDelta::seconds(30));
        assert_eq!(response.questions.len(), store.len());
        assert_eq!(response.questions[2].choices, vec!["Mars", "Jupiter"]);
        let json = serde_json::to_string(&response).unwrap();
        assert!(!json.contains("Paris"));
        assert!(service.sessions().get_session(&response.session_id).is_ok());
    }

    #[test]
    fn test_evaluate_scores_and_consumes_session() {
        let (service, store) = setup();
        let problems = store.list_problems();
        let started = service.start_quiz();

        let response = assert_ok!(service.evaluate_quiz(
            &started.session_id,
            &[
                submit(problems[0].id, "  paris "),
                submit(problems[1].id, "5"),
                submit(problems[2].id, "JUPITER"),
            ],
        ));

        assert_eq!(response.score, 2);
        assert_eq!(response.answers.len(), 3);
        assert_eq!(response.answers[0].answer, "Paris");
        assert!(response.answers[0].correct);
        assert_eq!(response.answers[1].answer, "4");
        assert!(!response.answers[1].correct);
        assert!(response.answers[2].correct);
        assert!(service.sessions().is_empty());
    }

    #[test]
    fn test_second_submission_is_rejected() {
        let (service, store) = setup();
        let id = store.list_problems()[0].id;
        let started = service.start_quiz();

        assert_ok!(service.evaluate_quiz(&started.session_id, &[submit(id, "Paris")]));
        let second = service.evaluate_quiz(&started.session_id, &[submit(id, "Paris")]);

        assert_eq!(second, Err(QuizError::SessionNotFound(started.session_id)));
    }

    #[test]
    fn test_expired_session_rejected_and_deleted() {
        let (service, store) = setup();
        let id = store.list_problems()[0].id;
        let now = Utc::now();
        let started = service.start_quiz_at(now);

        let result = service.evaluate_quiz_at(
            &started.session_id,
            &[submit(id, "Paris")],
            now + TimeDelta::seconds(31),
        );

        assert_eq!(result, Err(QuizError::SessionExpired(started.session_id)));
        assert_eq!(result.unwrap_err().to_string(), "Session is expired");
        assert!(service.sessions().get_session(&started.session_id).is_err());
    }

    #[test]
    fn test_submission_within_window_accepted() {
        let (service, store) = setup();
        let id = store.list_problems()[1].id;
        let now = Utc::now();
        let started = service.start_quiz_at(now);

        let result = service.evaluate_quiz_at(
            &started.session_id,
            &[submit(id, "4")],
            now + TimeDelta::seconds(29),
        );

        assert_eq!(assert_ok!(result).score, 1);
    }

    #[test]
    fn test_unknown_problem_fails_whole_evaluation() {
        let (service, store) = setup();
        let known = store.list_problems()[0].id;
        let unknown = Uuid::from_u128(42);
        let started = service.start_quiz();

        let result = service.evaluate_quiz(
            &started.session_id,
            &[submit(known, "Paris"), submit(unknown, "anything")],
        );

        assert_eq!(result, Err(QuizError::ProblemNotFound(unknown)));
        assert_eq!(
            result.unwrap_err().to_string(),
            format!("Cannot find problem with Id {}", unknown)
        );
        assert!(service.sessions().is_empty());
    }

    #[test]
    fn test_unknown_session() {
        let (service, _) = setup();
        let missing = Uuid::from_u128(7);

        let result = service.evaluate_quiz(&missing, &[]);

        assert_eq!(result, Err(QuizError::SessionNotFound(missing)));
        assert_eq!(result.unwrap_err().to_string(), "Cannot find session");
    }

    #[test]
    fn test_empty_submission_scores_zero() {
        let (service, _) = setup();
        let started = service.start_quiz();

        let response = assert_ok!(service.evaluate_quiz(&started.session_id, &[]));

        assert_eq!(response.score, 0);
        assert!(response.answers.is_empty());
    }

    #[test]
    fn test_submit_quiz_request_shape() {
        let (service, store) = setup();
        let id = store.list_problems()[0].id;
        let started = service.start_quiz();
        let body = format!(
            r#"{{"SessionId": "{}", "QuestionSubmissions": [{{"QuestionId": "{}", "Answer": "paris"}}]}}"#,
            started.session_id, id
        );
        let request: EvaluateQuizRequest = serde_json::from_str(&body).unwrap();

        let response = assert_ok!(service.submit_quiz(&request));

        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(value["Score"], 1);
        assert_eq!(value["Answers"][0]["Answer"], "Paris");
        assert_eq!(value["Answers"][0]["Correct"], true);
    }

    #[test]
    fn test_from_config_uses_quiz_duration() {
        let config = ServerConfig {
            quiz_session_duration: std::time::Duration::from_secs(300),
            ..ServerConfig::default()
        };
        let service = assert_ok!(QuizService::from_config(
            Arc::new(InMemoryProblemStore::default()),
            Arc::new(SessionStore::new()),
            &config,
        ));
        let now = Utc::now();

        let started = service.start_quiz_at(now);

        assert_eq!(started.timeout, now + TimeDelta::minutes(5));
        assert!(started.questions.is_empty());
    }

    #[test]
    fn test_add_problem_replaces_taken_id() {
        let store = InMemoryProblemStore::default();
        let mut first = Problem::new("Q1", "A1");
        first.id = Uuid::from_u128(1);
        let mut second = Problem::new("Q2", "A2");
        second.id = Uuid::from_u128(1);

        let first_id = store.add_problem(first);
        let second_id = store.add_problem(second);

        assert_eq!(first_id, Uuid::from_u128(1));
        assert_ne!(second_id, first_id);
        assert_eq!(store.get_problem_by_id(&second_id).unwrap().question, "Q2");
    }
}
