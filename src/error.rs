use std::fmt;
use std::io;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PatchError {
    #[error("not a readable document container {path}: {reason}")]
    ArchiveFormat { path: PathBuf, reason: String },
    #[error("malformed document markup: {0}")]
    MalformedDocument(String),
    #[error("required document property `{0}` not found")]
    PropertyNotFound(String),
    #[error("object name `{0}` already exists in the document")]
    DuplicateObjectName(String),
    #[error("group `{group}` references unknown object `{child}`")]
    DanglingReference { group: String, child: String },
    #[error("invalid patch plan: {0}")]
    InvalidPlan(String),
    #[error("repacked container differs from source: {0}")]
    VerificationFailed(String),
    #[error("{context}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },
}

impl PatchError {
    pub fn io(context: impl Into<String>, source: io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    pub fn code(&self) -> PatchErrorCode {
        match self {
            Self::ArchiveFormat { .. } => PatchErrorCode::E001ArchiveFormat,
            Self::MalformedDocument(_) => PatchErrorCode::E002MalformedDocument,
            Self::PropertyNotFound(_) => PatchErrorCode::E003PropertyNotFound,
            Self::DuplicateObjectName(_) => PatchErrorCode::E004DuplicateObjectName,
            Self::DanglingReference { .. } => PatchErrorCode::E005DanglingReference,
            Self::Io { .. } => PatchErrorCode::E006Io,
            Self::InvalidPlan(_) => PatchErrorCode::E007InvalidPlan,
            Self::VerificationFailed(_) => PatchErrorCode::E008VerificationFailed,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchErrorCode {
    E001ArchiveFormat,
    E002MalformedDocument,
    E003PropertyNotFound,
    E004DuplicateObjectName,
    E005DanglingReference,
    E006Io,
    E007InvalidPlan,
    E008VerificationFailed,
}

impl PatchErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::E001ArchiveFormat => "E001_ARCHIVE_FORMAT",
            Self::E002MalformedDocument => "E002_MALFORMED_DOCUMENT",
            Self::E003PropertyNotFound => "E003_PROPERTY_NOT_FOUND",
            Self::E004DuplicateObjectName => "E004_DUPLICATE_OBJECT_NAME",
            Self::E005DanglingReference => "E005_DANGLING_REFERENCE",
            Self::E006Io => "E006_IO",
            Self::E007InvalidPlan => "E007_INVALID_PLAN",
            Self::E008VerificationFailed => "E008_VERIFICATION_FAILED",
        }
    }
}

/// Pipeline step a [`StageError`] was raised from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchStage {
    Unpack,
    Load,
    Edit,
    Serialize,
    Repack,
    Verify,
    Cleanup,
}

impl PatchStage {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unpack => "unpack",
            Self::Load => "load",
            Self::Edit => "edit",
            Self::Serialize => "serialize",
            Self::Repack => "repack",
            Self::Verify => "verify",
            Self::Cleanup => "cleanup",
        }
    }
}

impl fmt::Display for PatchStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
#[error("stage `{stage}` failed [{code}]", code = .error.code().as_str())]
pub struct StageError {
    pub stage: PatchStage,
    #[source]
    pub error: PatchError,
}

pub trait AtStage<T> {
    fn at_stage(self, stage: PatchStage) -> Result<T, StageError>;
}

impl<T> AtStage<T> for Result<T, PatchError> {
    fn at_stage(self, stage: PatchStage) -> Result<T, StageError> {
        self.map_err(|error| StageError { stage, error })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_error_message_names_stage_and_code() {
        let err = Err::<(), _>(PatchError::PropertyNotFound("Company".to_string()))
            .at_stage(PatchStage::Edit)
            .unwrap_err();
        let text = format!("{:#}", anyhow::Error::from(err));
        assert!(text.contains("stage `edit` failed"));
        assert!(text.contains("E003_PROPERTY_NOT_FOUND"));
        assert!(text.contains("`Company` not found"));
    }
}
