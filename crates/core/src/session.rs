use crate::answer::Answerer;
use crate::error::SessionError;
use crate::ingest::Ingestor;
use crate::models::{Answer, Feedback, UploadedFile};
use crate::voice::{VoiceInput, VoiceStatus, LISTENING_MESSAGE};
use std::sync::Arc;
use tracing::info;

/// Which sidebar form is open. Login and signup never show together.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuthPanel {
    #[default]
    Hidden,
    Login,
    Signup,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthEvent {
    ToggleLogin,
    ToggleSignup,
    SubmitLogin {
        username: String,
    },
    SubmitSignup {
        username: String,
        password: String,
        confirm_password: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    Info(String),
    Success(String),
    Warning(String),
    Error(String),
    Reply(String),
}

impl AuthPanel {
    /// Nothing is stored or verified; forms only echo a message.
    pub fn apply(self, event: &AuthEvent) -> (AuthPanel, Option<Notice>) {
        match (self, event) {
            (AuthPanel::Login, AuthEvent::ToggleLogin) => (AuthPanel::Hidden, None),
            (_, AuthEvent::ToggleLogin) => (AuthPanel::Login, None),
            (AuthPanel::Signup, AuthEvent::ToggleSignup) => (AuthPanel::Hidden, None),
            (_, AuthEvent::ToggleSignup) => (AuthPanel::Signup, None),
            (AuthPanel::Login, AuthEvent::SubmitLogin { username }) => (
                AuthPanel::Hidden,
                Some(Notice::Success(format!("Logged in as {username}"))),
            ),
            (
                AuthPanel::Signup,
                AuthEvent::SubmitSignup {
                    password,
                    confirm_password,
                    ..
                },
            ) => {
                let notice = if password == confirm_password {
                    Notice::Success("Account created successfully!".to_string())
                } else {
                    Notice::Error("Passwords do not match".to_string())
                };
                (AuthPanel::Hidden, Some(notice))
            }
            (panel, AuthEvent::SubmitLogin { .. } | AuthEvent::SubmitSignup { .. }) => (panel, None),
        }
    }
}

#[derive(Debug, Clone)]
pub enum UiEvent {
    Auth(AuthEvent),
    SubmitAndProcess(Vec<UploadedFile>),
    Ask(String),
    Speak,
    Feedback(Feedback),
}

impl UiEvent {
    /// Shown before the event runs, while the user waits on it.
    pub fn announcement(&self) -> Option<Notice> {
        match self {
            UiEvent::Speak => Some(Notice::Info(LISTENING_MESSAGE.to_string())),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionState {
    pub auth: AuthPanel,
    pub question: String,
    pub last_answer: Option<Answer>,
}

/// Routes user events to the pipeline and keeps the per-session view state.
pub struct Session {
    ingestor: Arc<Ingestor>,
    answerer: Arc<Answerer>,
    voice: Arc<VoiceInput>,
    state: SessionState,
}

impl Session {
    pub fn new(ingestor: Arc<Ingestor>, answerer: Arc<Answerer>, voice: Arc<VoiceInput>) -> Self {
        Self {
            ingestor,
            answerer,
            voice,
            state: SessionState::default(),
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub async fn dispatch(&mut self, event: UiEvent) -> Result<Vec<Notice>, SessionError> {
        match event {
            UiEvent::Auth(event) => {
                let (panel, notice) = self.state.auth.apply(&event);
                self.state.auth = panel;
                Ok(notice.into_iter().collect())
            }
            UiEvent::SubmitAndProcess(files) => {
                let report = self.ingestor.submit_and_process(&files).await?;
                info!(
                    pdf_files = report.pdf_files,
                    image_files = report.image_files,
                    chunks = report.chunk_count,
                    "processing done"
                );
                Ok(vec![Notice::Success("Processing Done!".to_string())])
            }
            UiEvent::Ask(question) => self.ask(question).await,
            UiEvent::Speak => {
                let outcome = self.voice.listen().await;
                let mut notices = Vec::new();
                let message = outcome.message();

                match outcome.status {
                    VoiceStatus::Recognized => {
                        notices.push(Notice::Success(message));
                        notices.extend(self.ask(outcome.text).await?);
                    }
                    VoiceStatus::Unintelligible => notices.push(Notice::Warning(message)),
                    VoiceStatus::Unreachable(_) | VoiceStatus::MicrophoneUnavailable(_) => {
                        notices.push(Notice::Error(message))
                    }
                }
                Ok(notices)
            }
            UiEvent::Feedback(feedback) => {
                if self.state.last_answer.is_none() {
                    return Ok(Vec::new());
                }
                Ok(vec![Notice::Success(format!(
                    "Feedback recorded: {}",
                    feedback.label()
                ))])
            }
        }
    }

    async fn ask(&mut self, question: String) -> Result<Vec<Notice>, SessionError> {
        if question.is_empty() {
            return Ok(Vec::new());
        }

        let answer = self.answerer.answer(&question).await?;
        let reply = Notice::Reply(answer.text.clone());
        self.state.question = question;
        self.state.last_answer = Some(answer);
        Ok(vec![reply])
    }
}
