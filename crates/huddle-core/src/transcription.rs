//! Live transcription, captions and language interpretation.

use std::collections::VecDeque;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::capabilities::Capability;
use crate::client::Shared;
use crate::errors::HuddleError;
use crate::events::HuddleEvent;
use crate::lock;
use crate::privileges::{Role, RoleAction};
use crate::transport::TransportCommand;
use huddle_media::UserId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TranscriptionStatus {
    #[default]
    Stopped,
    Starting,
    Running,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Caption {
    pub speaker: UserId,
    pub speaker_name: String,
    pub text: String,
    /// BCP 47 tag, e.g. `en-US`.
    pub language: String,
    pub timestamp_ms: i64,
    /// Interim captions are replaced by a final one for the same utterance.
    pub is_final: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterpretationLanguage {
    pub code: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interpreter {
    pub user: UserId,
    /// Pair of language codes the interpreter works between.
    pub languages: (String, String),
    /// Code of the channel the interpreter currently speaks into.
    pub active_language: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct InterpretationStatus {
    pub started: bool,
    pub languages: Vec<InterpretationLanguage>,
    pub interpreters: Vec<Interpreter>,
}

impl InterpretationStatus {
    fn has_language(&self, code: &str) -> bool {
        self.languages.iter().any(|l| l.code == code)
    }
}

#[derive(Debug, Default)]
pub(crate) struct TranscriptionState {
    status: TranscriptionStatus,
    captions: VecDeque<Caption>,
    spoken_language: Option<String>,
    translation_language: Option<String>,
    interpretation: InterpretationStatus,
    channel: Option<String>,
}

pub(crate) fn on_status(shared: &Shared, status: TranscriptionStatus) {
    {
        let mut state = lock(&shared.transcription);
        if state.status == status {
            return;
        }
        state.status = status;
    }
    tracing::info!(?status, "transcription status changed");
    shared.emit(HuddleEvent::TranscriptionStatusChanged(status));
}

pub(crate) fn on_caption(shared: &Shared, caption: Caption) {
    {
        let limit = shared.config.caption_history_limit.max(1);
        let mut state = lock(&shared.transcription);
        // An interim caption is superseded by the next one from the same speaker.
        if let Some(last) = state.captions.back() {
            if last.speaker == caption.speaker && !last.is_final {
                state.captions.pop_back();
            }
        }
        if state.captions.len() >= limit {
            state.captions.pop_front();
        }
        state.captions.push_back(caption.clone());
    }
    shared.emit(HuddleEvent::CaptionReceived(caption));
}

pub(crate) fn on_interpretation(shared: &Shared, status: InterpretationStatus) {
    {
        let mut core = shared.core();
        let ids: Vec<UserId> = core.roster.participants().iter().map(|p| p.user_id).collect();
        for id in ids {
            let Some(p) = core.roster.participant_mut(id) else { continue };
            let interpreter = status.interpreters.iter().find(|i| i.user == id);
            p.is_interpreter = p.role == Role::Interpreter || interpreter.is_some();
            p.interpreter_language = interpreter.and_then(|i| i.active_language.clone());
        }
    }
    {
        let mut state = lock(&shared.transcription);
        let channel_gone = state
            .channel
            .as_deref()
            .is_some_and(|c| !status.started || !status.has_language(c));
        if channel_gone {
            tracing::info!("interpretation channel closed, back to the floor");
            state.channel = None;
        }
        state.interpretation = status.clone();
    }
    shared.emit(HuddleEvent::InterpretationChanged(status));
}

pub struct TranscriptionService {
    shared: Arc<Shared>,
}

impl TranscriptionService {
    pub(crate) fn new(shared: Arc<Shared>) -> Self {
        Self { shared }
    }

    pub fn start(&self) -> Result<(), HuddleError> {
        self.shared.gate_role(
            "start_transcription",
            Some(Capability::LiveTranscription),
            RoleAction::ManageTranscription,
        )?;
        if self.status() != TranscriptionStatus::Stopped {
            return Ok(());
        }
        self.shared.send(TransportCommand::StartTranscription)
    }

    pub fn stop(&self) -> Result<(), HuddleError> {
        self.shared.gate_role(
            "stop_transcription",
            Some(Capability::LiveTranscription),
            RoleAction::ManageTranscription,
        )?;
        if self.status() == TranscriptionStatus::Stopped {
            return Ok(());
        }
        self.shared.send(TransportCommand::StopTranscription)
    }

    pub fn status(&self) -> TranscriptionStatus {
        lock(&self.shared.transcription).status
    }

    /// Language the local user speaks, used by the recognizer.
    pub fn set_spoken_language(&self, code: &str) -> Result<(), HuddleError> {
        self.shared
            .gate("set_spoken_language", Some(Capability::LiveTranscription))?;
        let code = code.trim();
        if code.is_empty() {
            return Err(HuddleError::InvalidParams("language code is empty".into()));
        }
        self.shared
            .send(TransportCommand::SetSpokenLanguage(code.to_string()))?;
        lock(&self.shared.transcription).spoken_language = Some(code.to_string());
        Ok(())
    }

    pub fn spoken_language(&self) -> Option<String> {
        lock(&self.shared.transcription).spoken_language.clone()
    }

    /// Translate captions into `code`; `None` shows them untranslated.
    pub fn set_translation_language(&self, code: Option<&str>) -> Result<(), HuddleError> {
        self.shared
            .gate("set_translation_language", Some(Capability::LiveTranscription))?;
        let code = code.map(str::trim).filter(|c| !c.is_empty()).map(String::from);
        self.shared
            .send(TransportCommand::SetTranslationLanguage(code.clone()))?;
        lock(&self.shared.transcription).translation_language = code;
        Ok(())
    }

    pub fn translation_language(&self) -> Option<String> {
        lock(&self.shared.transcription).translation_language.clone()
    }

    /// Recent captions, oldest first.
    pub fn captions(&self) -> Vec<Caption> {
        lock(&self.shared.transcription).captions.iter().cloned().collect()
    }

    pub fn interpretation(&self) -> InterpretationStatus {
        lock(&self.shared.transcription).interpretation.clone()
    }

    /// Listen to an interpretation channel, or the original audio with `None`.
    pub fn join_language_channel(&self, code: Option<&str>) -> Result<(), HuddleError> {
        self.shared
            .gate("join_language_channel", Some(Capability::Interpretation))?;
        {
            let state = lock(&self.shared.transcription);
            if let Some(code) = code {
                if !state.interpretation.started {
                    return Err(HuddleError::InvalidParams("interpretation has not started".into()));
                }
                if !state.interpretation.has_language(code) {
                    return Err(HuddleError::InvalidParams(format!(
                        "no interpretation channel for '{code}'"
                    )));
                }
            }
            if state.channel.as_deref() == code {
                return Ok(());
            }
        }
        let code = code.map(String::from);
        self.shared
            .send(TransportCommand::JoinInterpretationChannel(code.clone()))?;
        lock(&self.shared.transcription).channel = code;
        Ok(())
    }

    pub fn language_channel(&self) -> Option<String> {
        lock(&self.shared.transcription).channel.clone()
    }
}
