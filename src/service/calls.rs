use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use super::notifier::{NewNotification, NotifierHandle, create_notifications};
use crate::config::BasicConfig;
use crate::db::models::{Call, NotificationType, ProcessingStatus, new_id};
use crate::db::{CallAnalysisUpdate, Storage};
use crate::error::CallControlError;

pub const ALLOWED_EXTENSIONS: [&str; 6] = ["mp3", "wav", "m4a", "ogg", "webm", "flac"];

#[derive(Debug, Clone, Deserialize)]
pub struct UploadRequest {
    pub organization_id: String,
    pub user_id: String,
    #[serde(default)]
    pub manager_id: Option<String>,
    #[serde(default)]
    pub customer_id: Option<String>,
    #[serde(default)]
    pub customer_phone: Option<String>,
    #[serde(default)]
    pub customer_name: Option<String>,
    pub file_name: String,
    pub data_base64: String,
}

/// Lowercased extension if it is an accepted audio type.
pub fn audio_extension(file_name: &str) -> Result<String, CallControlError> {
    let ext = Path::new(file_name)
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    if ALLOWED_EXTENSIONS.contains(&ext.as_str()) {
        Ok(ext)
    } else {
        Err(CallControlError::validation(format!(
            "unsupported audio format '{ext}', expected one of {}",
            ALLOWED_EXTENSIONS.join(", ")
        )))
    }
}

/// Decode base64 audio, accepting an optional `data:...;base64,` prefix.
pub fn decode_audio(data: &str, max_bytes: usize) -> Result<Vec<u8>, CallControlError> {
    let payload = match data.split_once(";base64,") {
        Some((prefix, rest)) if prefix.starts_with("data:") => rest,
        _ => data,
    };
    let payload = payload.trim();
    // 4 base64 chars carry 3 bytes; reject early before allocating.
    if payload.len() / 4 * 3 > max_bytes.saturating_add(3) {
        return Err(CallControlError::PayloadTooLarge(format!(
            "audio exceeds {max_bytes} bytes"
        )));
    }
    let bytes = STANDARD
        .decode(payload)
        .map_err(|e| CallControlError::validation(format!("invalid base64 audio: {e}")))?;
    if bytes.is_empty() {
        return Err(CallControlError::validation("audio file is empty"));
    }
    if bytes.len() > max_bytes {
        return Err(CallControlError::PayloadTooLarge(format!(
            "audio exceeds {max_bytes} bytes"
        )));
    }
    Ok(bytes)
}

pub fn audio_path(storage_dir: &Path, organization_id: &str, call_id: &str, ext: &str) -> PathBuf {
    storage_dir
        .join(organization_id)
        .join(format!("{call_id}.{ext}"))
}

pub async fn upload_audio(
    storage: &Storage,
    notifier: &NotifierHandle,
    cfg: &BasicConfig,
    req: UploadRequest,
) -> Result<Call, CallControlError> {
    let ext = audio_extension(&req.file_name)?;
    let bytes = decode_audio(&req.data_base64, cfg.max_upload_bytes)?;

    if storage.get_organization(&req.organization_id).await?.is_none() {
        return Err(CallControlError::NotFound("organization"));
    }
    let uploader = storage
        .get_user(&req.user_id)
        .await?
        .ok_or(CallControlError::NotFound("user"))?;
    if uploader.organization_id.as_deref() != Some(req.organization_id.as_str()) {
        return Err(CallControlError::Forbidden(
            "user does not belong to this organization".to_string(),
        ));
    }
    if let Some(manager_id) = req.manager_id.as_deref() {
        match storage.get_manager(manager_id).await? {
            Some(m) if m.organization_id == req.organization_id => {}
            _ => return Err(CallControlError::NotFound("manager")),
        }
    }
    let customer_id = match (req.customer_id, req.customer_phone.as_deref()) {
        (Some(id), _) => Some(id),
        (None, Some(phone)) if !phone.trim().is_empty() => Some(
            storage
                .find_or_create_customer(&req.organization_id, phone.trim(), req.customer_name.as_deref())
                .await?
                .id,
        ),
        _ => None,
    };

    let call_id = new_id();
    let path = audio_path(&cfg.storage_dir, &req.organization_id, &call_id, &ext);
    if let Some(dir) = path.parent() {
        tokio::fs::create_dir_all(dir).await?;
    }
    tokio::fs::write(&path, &bytes).await?;

    let now = Utc::now();
    let call = Call {
        id: call_id,
        organization_id: req.organization_id.clone(),
        manager_id: req.manager_id,
        customer_id,
        file_name: Some(req.file_name.clone()),
        audio_url: Some(path.to_string_lossy().into_owned()),
        transcription: None,
        general_score: None,
        user_satisfaction_index: None,
        communication_score: None,
        sales_score: None,
        processing_status: ProcessingStatus::Pending,
        processing_step: Some("uploaded".to_string()),
        source: "upload".to_string(),
        duration_seconds: None,
        created_at: now,
        updated_at: now,
    };
    if let Err(e) = storage.insert_call(&call).await {
        let _ = tokio::fs::remove_file(&path).await;
        return Err(e);
    }
    storage
        .record_audit(
            Some(&call.organization_id),
            Some(&uploader.id),
            "upload",
            "call",
            Some(&call.id),
            Some(json!({ "file_name": req.file_name, "bytes": bytes.len() })),
        )
        .await?;
    info!(call_id = %call.id, organization_id = %call.organization_id, bytes = bytes.len(), "call audio uploaded");

    notify(
        storage,
        notifier,
        NewNotification {
            user_id: None,
            organization_id: Some(call.organization_id.clone()),
            kind: NotificationType::NewCall,
            title: "New call uploaded".to_string(),
            message: req.file_name,
            data: Some(json!({ "call_id": call.id })),
            send_telegram: true,
        },
    )
    .await;
    Ok(call)
}

fn validate_scores(update: &CallAnalysisUpdate) -> Result<(), CallControlError> {
    let scores = [
        ("general_score", update.general_score),
        ("user_satisfaction_index", update.user_satisfaction_index),
        ("communication_score", update.communication_score),
        ("sales_score", update.sales_score),
    ];
    for (name, value) in scores {
        if let Some(v) = value
            && !(0.0..=100.0).contains(&v)
        {
            return Err(CallControlError::validation(format!(
                "{name} must be between 0 and 100"
            )));
        }
    }
    if update.duration_seconds.is_some_and(|d| d < 0) {
        return Err(CallControlError::validation("duration_seconds must not be negative"));
    }
    Ok(())
}

/// Store processing output and raise the matching notifications.
pub async fn record_analysis(
    storage: &Storage,
    notifier: &NotifierHandle,
    call_id: &str,
    update: CallAnalysisUpdate,
) -> Result<Call, CallControlError> {
    validate_scores(&update)?;
    let call = storage.update_call_analysis(call_id, &update).await?;
    let org = call.organization_id.clone();
    let label = call.file_name.clone().unwrap_or_else(|| call.id.clone());

    match update.processing_status {
        Some(ProcessingStatus::Completed) => {
            notify(
                storage,
                notifier,
                org_notification(&org, NotificationType::ProcessingComplete, "Call processed", &label, &call.id),
            )
            .await;
            let settings = storage.effective_telegram_settings(&org, None).await?;
            if let Some(score) = call.general_score
                && score < settings.low_score_threshold
            {
                notify(
                    storage,
                    notifier,
                    org_notification(
                        &org,
                        NotificationType::LowScore,
                        "Low call score",
                        &format!("{label}: {score:.1} (threshold {:.1})", settings.low_score_threshold),
                        &call.id,
                    ),
                )
                .await;
            }
        }
        Some(ProcessingStatus::Failed) => {
            let step = call.processing_step.as_deref().unwrap_or("unknown step");
            notify(
                storage,
                notifier,
                org_notification(
                    &org,
                    NotificationType::ProcessingFailed,
                    "Call processing failed",
                    &format!("{label}: {step}"),
                    &call.id,
                ),
            )
            .await;
        }
        _ => {}
    }
    Ok(call)
}

fn org_notification(
    organization_id: &str,
    kind: NotificationType,
    title: &str,
    message: &str,
    call_id: &str,
) -> NewNotification {
    NewNotification {
        user_id: None,
        organization_id: Some(organization_id.to_string()),
        kind,
        title: title.to_string(),
        message: message.to_string(),
        data: Some(json!({ "call_id": call_id })),
        send_telegram: true,
    }
}

/// Notification failures never fail the triggering write.
async fn notify(storage: &Storage, notifier: &NotifierHandle, req: NewNotification) {
    let kind = req.kind;
    if let Err(e) = create_notifications(storage, notifier, req).await {
        warn!(?kind, error = %e, "automatic notification failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extensions_are_whitelisted() {
        assert_eq!(audio_extension("Call.MP3").unwrap(), "mp3");
        assert_eq!(audio_extension("a.b.flac").unwrap(), "flac");
        assert!(audio_extension("notes.txt").is_err());
        assert!(audio_extension("noext").is_err());
    }

    #[test]
    fn decode_accepts_data_url_prefix() {
        let encoded = STANDARD.encode(b"RIFF....");
        assert_eq!(decode_audio(&encoded, 1024).unwrap(), b"RIFF....");
        let data_url = format!("data:audio/wav;base64,{encoded}");
        assert_eq!(decode_audio(&data_url, 1024).unwrap(), b"RIFF....");
    }

    #[test]
    fn decode_rejects_oversized_and_empty() {
        let encoded = STANDARD.encode(vec![0u8; 100]);
        assert!(matches!(
            decode_audio(&encoded, 10),
            Err(CallControlError::PayloadTooLarge(_))
        ));
        assert!(matches!(decode_audio("", 10), Err(CallControlError::Validation(_))));
        assert!(matches!(decode_audio("%%%", 10), Err(CallControlError::Validation(_))));
    }

    #[test]
    fn scores_must_be_percentages() {
        let ok = CallAnalysisUpdate {
            general_score: Some(55.0),
            ..Default::default()
        };
        assert!(validate_scores(&ok).is_ok());
        let bad = CallAnalysisUpdate {
            sales_score: Some(101.0),
            ..Default::default()
        };
        assert!(validate_scores(&bad).is_err());
    }

    #[test]
    fn audio_path_is_scoped_by_organization() {
        let p = audio_path(Path::new("storage"), "org", "c1", "wav");
        assert_eq!(p, Path::new("storage").join("org").join("c1.wav"));
    }
}
