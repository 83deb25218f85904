use thiserror::Error;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    Message(String),
    #[error("index {index} is out of range for {len} entries")]
    InvalidIndex { index: usize, len: usize },
    #[error("masked edit requested but no mask has been drawn")]
    NoMask,
    #[error("mask is {mask:?} pixels but the image is {image:?}")]
    MaskSizeMismatch { mask: (u32, u32), image: (u32, u32) },
    #[error("project {0} already has an edit in progress")]
    Busy(String),
    #[error("project not found: {0}")]
    ProjectNotFound(String),
    #[error("no project is active")]
    NoActiveProject,
    #[error(transparent)]
    Generation(#[from] GenerationError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("base64 decode error: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("image decode/encode error: {0}")]
    Image(#[from] image::ImageError),
}

impl AppError {
    pub fn msg<T: Into<String>>(message: T) -> Self {
        Self::Message(message.into())
    }

    /// Text shown in the session banner.
    pub fn user_message(&self) -> String {
        match self {
            Self::Generation(error) => error.user_message(),
            Self::NoMask => "Please draw a mask over the area you want to edit.".to_string(),
            Self::MaskSizeMismatch { .. } => {
                "The mask must have the same size as the image being edited.".to_string()
            }
            Self::Busy(_) => {
                "An edit is already running for this project. Please wait.".to_string()
            }
            other => other.to_string(),
        }
    }
}

/// Terminal outcome of a failed call to the image model.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GenerationError {
    #[error("request blocked for safety reasons: {reason}")]
    SafetyBlocked { reason: String },
    #[error("model returned no usable content")]
    EmptyResult,
    #[error("generation stopped: {reason}")]
    ExplicitStop { reason: String },
    #[error("quota or rate limit exhausted: {message}")]
    QuotaExceeded { message: String },
    #[error("transport failure: {message}")]
    TransportFailure { message: String },
    #[error("request rejected ({status}): {message}")]
    Rejected { status: u16, message: String },
    #[error("GEMINI_API_KEY is missing. Add it to .env")]
    MissingApiKey,
    #[error("invalid image: {0}")]
    InvalidImage(String),
}

impl GenerationError {
    /// Only network/server failures are worth another attempt.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::TransportFailure { .. })
    }

    pub fn user_message(&self) -> String {
        match self {
            Self::SafetyBlocked { reason } => format!(
                "Your request was blocked for safety reasons: {reason}. Please modify your prompt or image."
            ),
            Self::EmptyResult => {
                "The AI did not generate a result. Please try again with a different prompt."
                    .to_string()
            }
            Self::ExplicitStop { reason } if reason == "NO_IMAGE" => {
                "The AI could not generate an image from this command. Please try a more explicit image editing command (e.g., \"change the background to a beach\").".to_string()
            }
            Self::ExplicitStop { reason } => {
                format!("Generation was stopped due to: {reason}. Please adjust your prompt.")
            }
            Self::QuotaExceeded { .. } => {
                "You have exceeded your API quota. Please check your billing plan or try again later."
                    .to_string()
            }
            Self::TransportFailure { .. } => {
                "A connection error occurred with the AI. Please check your internet and try again."
                    .to_string()
            }
            Self::Rejected { .. } => {
                "Image generation failed. The AI may not be able to fulfill this request. Please try a different prompt or image.".to_string()
            }
            Self::MissingApiKey => self.to_string(),
            Self::InvalidImage(detail) => format!("Failed to load image: {detail}"),
        }
    }
}
