use serde::{Deserialize, Serialize};

/// Client-side state of an upload.
///
/// `Pending` is initial; `Complete` and `Failed` are terminal until the
/// caller starts over with a fresh selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UploadStatus {
    #[serde(rename = "pending")]
    Pending,
    #[serde(rename = "uploading")]
    Uploading,
    #[serde(rename = "paused")]
    Paused,
    #[serde(rename = "complete")]
    Complete,
    #[serde(rename = "failed")]
    Failed,
}

impl std::fmt::Display for UploadStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Uploading => "uploading",
            Self::Paused => "paused",
            Self::Complete => "complete",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upload_status_serialization() {
        assert_eq!(
            serde_json::to_string(&UploadStatus::Uploading).unwrap(),
            "\"uploading\""
        );
        assert_eq!(
            serde_json::to_string(&UploadStatus::Paused).unwrap(),
            "\"paused\""
        );
    }

    #[test]
    fn display_matches_wire_name() {
        for status in [
            UploadStatus::Pending,
            UploadStatus::Uploading,
            UploadStatus::Paused,
            UploadStatus::Complete,
            UploadStatus::Failed,
        ] {
            let wire = serde_json::to_string(&status).unwrap();
            assert_eq!(wire, format!("\"{status}\""));
        }
    }
}
