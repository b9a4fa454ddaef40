use serde::{Deserialize, Serialize};

use crate::error::{Error, ErrorKind};
use crate::hash::ObjectId;

/// the single observable outcome of a deployment attempt
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentResult {
    pub success: bool,
    /// browsable url of the deployed files
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    /// new branch tip
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit: Option<ObjectId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// provider status code of a transport failure
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
}

impl DeploymentResult {
    pub fn succeeded(location: impl Into<String>, commit: ObjectId) -> Self {
        Self {
            success: true,
            location: Some(location.into()),
            commit: Some(commit),
            error_kind: None,
            error_message: None,
            status: None,
        }
    }

    pub fn failed(error: &Error) -> Self {
        Self {
            success: false,
            location: None,
            commit: None,
            error_kind: Some(error.kind()),
            error_message: Some(error.to_string()),
            status: error.status(),
        }
    }
}
