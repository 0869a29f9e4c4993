use thiserror::Error;

pub const GENERIC_FAILURE_MESSAGE: &str = "Something went wrong, please try again";

#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("backend request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("backend returned {status}: {message}")]
    Backend { status: u16, message: String },

    #[error("unexpected backend payload: {0}")]
    Decode(String),

    #[error("not signed in")]
    NotAuthenticated,

    #[error("realtime channel error: {0}")]
    Realtime(String),
}

impl GatewayError {
    /// Message the backend attached to the failure, if it sent one.
    pub fn backend_message(&self) -> Option<&str> {
        match self {
            GatewayError::Backend { message, .. } => {
                let trimmed = message.trim();
                if trimmed.is_empty() {
                    None
                } else {
                    Some(trimmed)
                }
            }
            _ => None,
        }
    }

    pub fn is_unauthorized(&self) -> bool {
        matches!(
            self,
            GatewayError::NotAuthenticated | GatewayError::Backend { status: 401, .. }
        )
    }
}

impl From<serde_json::Error> for GatewayError {
    fn from(err: serde_json::Error) -> Self {
        GatewayError::Decode(err.to_string())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("please enter a name for the report")]
    EmptyName,

    #[error("please attach a photo")]
    MissingPhoto,

    #[error("category `{0}` cannot be used for new reports")]
    UnknownCategory(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SubmitError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("you are not signed in")]
    Auth,

    #[error("photo upload failed: {0}")]
    Upload(String),

    #[error("saving the report failed: {0}")]
    Persistence(String),

    #[error("a submission is already in progress")]
    InFlight,

    #[error("no confirmed location to submit")]
    NotConfirmed,
}

impl SubmitError {
    pub(crate) fn upload(err: &GatewayError) -> Self {
        SubmitError::Upload(surface_message(err))
    }

    pub(crate) fn persistence(err: &GatewayError) -> Self {
        SubmitError::Persistence(surface_message(err))
    }

    /// Text shown to the user for this failure.
    pub fn user_message(&self) -> String {
        match self {
            SubmitError::Upload(message) | SubmitError::Persistence(message) => message.clone(),
            other => other.to_string(),
        }
    }
}

fn surface_message(err: &GatewayError) -> String {
    err.backend_message()
        .map(str::to_string)
        .unwrap_or_else(|| GENERIC_FAILURE_MESSAGE.to_string())
}

/// Read-side failures. These are logged and the view keeps its previous state.
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("failed to load reports: {0}")]
    Reports(#[source] GatewayError),

    #[error("failed to resolve session: {0}")]
    Session(#[source] GatewayError),

    #[error("failed to open live updates: {0}")]
    Subscribe(#[source] GatewayError),
}
