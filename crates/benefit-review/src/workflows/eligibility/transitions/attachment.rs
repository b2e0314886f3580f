use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::workflows::eligibility::domain::{ApplicationId, AttachmentRef};
use crate::workflows::eligibility::gateways::{ObjectStorage, StorageError, UploadedFile};

/// The shapes a certification document arrives in from forms, fax intake, and API clients.
#[derive(Debug, Clone, PartialEq)]
pub enum CertificationInput {
    /// Raw bytes straight from a multipart form.
    Upload(UploadedFile),
    /// A blob already written to storage.
    Stored(AttachmentRef),
    /// Opaque signed reference handed out by a direct upload.
    SignedId(String),
    /// Parameter object wrapping one of the above.
    Params(Value),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AttachmentError {
    #[error("Unrecognized certification document format")]
    Unrecognized,
    #[error("Certification document could not be verified after upload")]
    NotVisible,
    #[error(transparent)]
    Storage(#[from] StorageError),
}

#[derive(Debug, Deserialize)]
struct StoredParams {
    blob_key: String,
    #[serde(default)]
    filename: Option<String>,
}

/// Reduce any accepted input to the canonical storable reference.
pub(crate) fn normalize(
    storage: &dyn ObjectStorage,
    input: CertificationInput,
) -> Result<AttachmentRef, AttachmentError> {
    match input {
        CertificationInput::Upload(upload) => Ok(storage.store_upload(&upload)?),
        CertificationInput::Stored(attachment) => {
            if attachment.blob_key.trim().is_empty() {
                return Err(AttachmentError::Unrecognized);
            }
            Ok(attachment)
        }
        CertificationInput::SignedId(signed_id) => {
            let signed_id = signed_id.trim();
            if signed_id.is_empty() {
                return Err(AttachmentError::Unrecognized);
            }
            Ok(storage.resolve_signed_id(signed_id)?)
        }
        CertificationInput::Params(params) => normalize(storage, unwrap_params(params)?),
    }
}

fn unwrap_params(params: Value) -> Result<CertificationInput, AttachmentError> {
    match params {
        Value::String(signed_id) => Ok(CertificationInput::SignedId(signed_id)),
        Value::Object(mut map) => {
            if let Some(inner) = map.remove("medical_certification") {
                return match inner {
                    Value::Object(_) | Value::String(_) => unwrap_params(inner),
                    _ => Err(AttachmentError::Unrecognized),
                };
            }
            if let Some(Value::String(signed_id)) = map.remove("signed_id") {
                return Ok(CertificationInput::SignedId(signed_id));
            }
            if let Some(upload) = map.remove("upload") {
                let upload: UploadedFile =
                    serde_json::from_value(upload).map_err(|_| AttachmentError::Unrecognized)?;
                return Ok(CertificationInput::Upload(upload));
            }
            let stored: StoredParams = serde_json::from_value(Value::Object(map))
                .map_err(|_| AttachmentError::Unrecognized)?;
            Ok(CertificationInput::Stored(AttachmentRef {
                blob_key: stored.blob_key,
                filename: stored.filename,
            }))
        }
        _ => Err(AttachmentError::Unrecognized),
    }
}

/// Attach and confirm the attachment is readable. Storage may lag behind the write, so a
/// miss triggers one reset and a second check before giving up.
pub(crate) fn attach_and_verify(
    storage: &dyn ObjectStorage,
    application_id: &ApplicationId,
    attachment: &AttachmentRef,
) -> Result<(), AttachmentError> {
    storage.attach(application_id, attachment)?;
    if storage.is_attached(application_id, attachment)? {
        return Ok(());
    }

    debug!(
        application_id = %application_id,
        blob_key = %attachment.blob_key,
        "attachment not visible yet; resetting"
    );
    storage.reset(application_id)?;
    if storage.is_attached(application_id, attachment)? {
        return Ok(());
    }

    warn!(
        application_id = %application_id,
        blob_key = %attachment.blob_key,
        "attachment still missing after reset"
    );
    Err(AttachmentError::NotVisible)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflows::eligibility::memory::InMemoryObjectStorage;
    use serde_json::json;

    fn upload() -> UploadedFile {
        UploadedFile {
            filename: "certification.pdf".to_string(),
            content_type: "application/pdf".to_string(),
            bytes: vec![37, 80, 68, 70],
        }
    }

    #[test]
    fn every_input_shape_normalizes_to_the_same_reference() {
        let storage = InMemoryObjectStorage::default();
        let stored = normalize(&storage, CertificationInput::Upload(upload())).expect("stored");
        let signed = InMemoryObjectStorage::signed_id_for(&stored);

        let inputs = vec![
            CertificationInput::Stored(stored.clone()),
            CertificationInput::SignedId(signed.clone()),
            CertificationInput::Params(json!({ "signed_id": signed })),
            CertificationInput::Params(json!({ "medical_certification": signed })),
            CertificationInput::Params(json!({
                "medical_certification": {
                    "blob_key": stored.blob_key,
                    "filename": "certification.pdf"
                }
            })),
        ];

        for input in inputs {
            let normalized = normalize(&storage, input).expect("normalizes");
            assert_eq!(normalized, stored);
        }
    }

    #[test]
    fn unknown_shapes_are_rejected() {
        let storage = InMemoryObjectStorage::default();
        for input in [
            CertificationInput::Params(json!(42)),
            CertificationInput::Params(json!({ "document": "x" })),
            CertificationInput::SignedId("   ".to_string()),
        ] {
            assert_eq!(
                normalize(&storage, input),
                Err(AttachmentError::Unrecognized)
            );
        }
    }

    #[test]
    fn verification_resets_once_before_failing() {
        let storage = InMemoryObjectStorage::default();
        let app = ApplicationId::from("app-1");
        let blob = normalize(&storage, CertificationInput::Upload(upload())).expect("stored");

        storage.lag_next_attaches(1);
        attach_and_verify(&storage, &app, &blob).expect("visible after reset");

        let other = ApplicationId::from("app-2");
        storage.drop_attaches(true);
        assert_eq!(
            attach_and_verify(&storage, &other, &blob),
            Err(AttachmentError::NotVisible)
        );
    }
}
