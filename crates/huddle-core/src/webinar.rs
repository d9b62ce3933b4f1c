//! Webinar roles and the Q&A board.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::capabilities::Capability;
use crate::client::{request_role_change, Shared};
use crate::errors::HuddleError;
use crate::events::HuddleEvent;
use crate::lock;
use crate::privileges::{Role, RoleAction};
use crate::transport::TransportCommand;
use huddle_media::UserId;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Answer {
    pub text: String,
    pub responder: UserId,
    /// Visible to the asker only.
    pub private: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Question {
    pub id: String,
    pub text: String,
    /// `None` for anonymous questions.
    pub asker: Option<UserId>,
    pub asker_name: Option<String>,
    pub upvotes: u32,
    pub answers: Vec<Answer>,
}

impl Question {
    pub fn is_answered(&self) -> bool {
        !self.answers.is_empty()
    }
}

#[derive(Debug, Default)]
pub(crate) struct QaBoard {
    questions: Vec<Question>,
}

impl QaBoard {
    fn get_mut(&mut self, id: &str) -> Option<&mut Question> {
        self.questions.iter_mut().find(|q| q.id == id)
    }

    fn contains(&self, id: &str) -> bool {
        self.questions.iter().any(|q| q.id == id)
    }
}

pub(crate) fn on_question(shared: &Shared, question: Question) {
    {
        let mut board = lock(&shared.qa);
        if board.contains(&question.id) {
            return;
        }
        board.questions.push(question.clone());
    }
    shared.emit(HuddleEvent::QuestionAdded(question));
}

pub(crate) fn on_answer(shared: &Shared, question_id: String, answer: Answer) {
    {
        let mut board = lock(&shared.qa);
        let Some(question) = board.get_mut(&question_id) else {
            tracing::debug!(question = %question_id, "answer for unknown question");
            return;
        };
        question.answers.push(answer.clone());
    }
    shared.emit(HuddleEvent::QuestionAnswered {
        question_id,
        answer,
    });
}

pub(crate) fn on_votes(shared: &Shared, question_id: String, upvotes: u32) {
    {
        let mut board = lock(&shared.qa);
        let Some(question) = board.get_mut(&question_id) else {
            return;
        };
        question.upvotes = upvotes;
    }
    shared.emit(HuddleEvent::QuestionVotesChanged {
        question_id,
        upvotes,
    });
}

pub(crate) fn on_attendee_talk(shared: &Shared, user: UserId, allowed: bool) {
    shared.emit(HuddleEvent::AttendeeTalkChanged { user, allowed });
}

pub struct WebinarService {
    shared: Arc<Shared>,
}

impl WebinarService {
    pub(crate) fn new(shared: Arc<Shared>) -> Self {
        Self { shared }
    }

    pub fn is_webinar(&self) -> bool {
        self.shared
            .core()
            .machine
            .meeting()
            .is_some_and(|m| m.is_webinar)
    }

    pub fn questions(&self) -> Vec<Question> {
        lock(&self.shared.qa).questions.clone()
    }

    fn gate_qa(&self, operation: &'static str) -> Result<Role, HuddleError> {
        let role = self.shared.gate(operation, Some(Capability::QAndA))?;
        if !self.is_webinar() {
            return Err(HuddleError::CapabilityDisabled(Capability::QAndA));
        }
        Ok(role)
    }

    fn require_webinar(&self) -> Result<(), HuddleError> {
        if self.is_webinar() {
            Ok(())
        } else {
            Err(HuddleError::InvalidParams("meeting is not a webinar".into()))
        }
    }

    /// Post a question. Returns its id; the question is on the board
    /// immediately.
    pub fn ask_question(&self, text: &str, anonymous: bool) -> Result<String, HuddleError> {
        self.gate_qa("ask_question")?;
        let text = text.trim();
        if text.is_empty() {
            return Err(HuddleError::InvalidParams("question is empty".into()));
        }
        let question_id = Uuid::new_v4().to_string();
        self.shared.send(TransportCommand::AskQuestion {
            question_id: question_id.clone(),
            text: text.to_string(),
            anonymous,
        })?;

        let (asker, asker_name) = if anonymous {
            (None, None)
        } else {
            let core = self.shared.core();
            let me = core.roster.myself();
            (me.map(|p| p.user_id), me.map(|p| p.name.clone()))
        };
        on_question(
            &self.shared,
            Question {
                id: question_id.clone(),
                text: text.to_string(),
                asker,
                asker_name,
                upvotes: 0,
                answers: Vec::new(),
            },
        );
        Ok(question_id)
    }

    pub fn answer_question(&self, question_id: &str, text: &str, private: bool) -> Result<(), HuddleError> {
        self.gate_qa("answer_question")?
            .require(RoleAction::AnswerQuestions, "answer_question")?;
        self.require_question(question_id)?;
        if text.trim().is_empty() {
            return Err(HuddleError::InvalidParams("answer is empty".into()));
        }
        self.shared.send(TransportCommand::AnswerQuestion {
            question_id: question_id.to_string(),
            text: text.trim().to_string(),
            private,
        })
    }

    /// `up = false` withdraws an earlier vote.
    pub fn upvote(&self, question_id: &str, up: bool) -> Result<(), HuddleError> {
        self.gate_qa("upvote_question")?;
        self.require_question(question_id)?;
        self.shared.send(TransportCommand::VoteQuestion {
            question_id: question_id.to_string(),
            up,
        })
    }

    fn require_question(&self, question_id: &str) -> Result<(), HuddleError> {
        if lock(&self.shared.qa).contains(question_id) {
            Ok(())
        } else {
            Err(HuddleError::InvalidParams(format!(
                "unknown question '{question_id}'"
            )))
        }
    }

    pub fn promote_panelist(&self, user: UserId) -> Result<(), HuddleError> {
        self.require_webinar()?;
        request_role_change(
            &self.shared,
            "promote_panelist",
            RoleAction::ManagePanelists,
            user,
            Role::Panelist,
            Some(Role::Attendee),
        )
    }

    pub fn demote_panelist(&self, user: UserId) -> Result<(), HuddleError> {
        self.require_webinar()?;
        request_role_change(
            &self.shared,
            "demote_panelist",
            RoleAction::ManagePanelists,
            user,
            Role::Attendee,
            Some(Role::Panelist),
        )
    }

    /// Let an attendee speak without promoting them.
    pub fn allow_attendee_talk(&self, user: UserId, allow: bool) -> Result<(), HuddleError> {
        self.shared
            .gate_role("allow_attendee_talk", None, RoleAction::ManagePanelists)?;
        self.require_webinar()?;
        if self.shared.participant(user)?.role != Role::Attendee {
            return Err(HuddleError::InvalidParams(format!("{user} is not an attendee")));
        }
        self.shared
            .send(TransportCommand::AllowAttendeeTalk { user, allow })
    }
}
