use crate::error::{SubmitError, ValidationError};
use crate::gateway::ReportGateway;
use crate::report::{Category, LatLng, NewReport, Report};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

const UPLOAD_PREFIX: &str = "private";

#[derive(Debug, Clone, PartialEq)]
pub struct PhotoFile {
    pub file_name: String,
    pub content_type: Option<String>,
    pub bytes: Bytes,
}

impl PhotoFile {
    pub fn new(file_name: impl Into<String>, bytes: impl Into<Bytes>) -> Self {
        let file_name = file_name.into();
        let content_type = guess_image_type(&file_name).map(str::to_string);
        Self {
            file_name,
            content_type,
            bytes: bytes.into(),
        }
    }
}

fn guess_image_type(file_name: &str) -> Option<&'static str> {
    let (_, ext) = file_name.rsplit_once('.')?;
    match ext.to_ascii_lowercase().as_str() {
        "jpg" | "jpeg" => Some("image/jpeg"),
        "png" => Some("image/png"),
        "gif" => Some("image/gif"),
        "webp" => Some("image/webp"),
        "heic" => Some("image/heic"),
        _ => None,
    }
}

/// Replaces every character outside `[A-Za-z0-9.]` with `_`, one per UTF-16
/// unit, so a character outside the BMP becomes two underscores.
pub fn sanitize_file_name(file_name: &str) -> String {
    let mut sanitized = String::with_capacity(file_name.len());
    for ch in file_name.chars() {
        if ch.is_ascii_alphanumeric() || ch == '.' {
            sanitized.push(ch);
        } else {
            sanitized.extend(std::iter::repeat('_').take(ch.len_utf16()));
        }
    }
    sanitized
}

pub fn storage_key(now: DateTime<Utc>, file_name: &str) -> String {
    format!(
        "{UPLOAD_PREFIX}/{}-{}",
        now.timestamp_millis(),
        sanitize_file_name(file_name)
    )
}

/// What the user has typed into the form so far.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReportDraft {
    pub name: String,
    pub category: Category,
    pub photo: Option<PhotoFile>,
}

impl ReportDraft {
    fn validate(&self) -> Result<(&str, &PhotoFile), ValidationError> {
        let name = self.name.trim();
        if name.is_empty() {
            return Err(ValidationError::EmptyName);
        }
        let photo = self.photo.as_ref().ok_or(ValidationError::MissingPhoto)?;
        if !self.category.is_selectable() {
            return Err(ValidationError::UnknownCategory(
                self.category.label().to_string(),
            ));
        }
        Ok((name, photo))
    }
}

/// Uploads the photo, then inserts the report owned by the signed-in user.
/// An uploaded photo is left in storage if the insert fails.
pub async fn submit_report(
    gateway: &dyn ReportGateway,
    bucket: &str,
    candidate: LatLng,
    draft: &ReportDraft,
) -> Result<Report, SubmitError> {
    let (name, photo) = draft.validate()?;

    let identity = match gateway.current_user().await {
        Ok(Some(identity)) => identity,
        Ok(None) => return Err(SubmitError::Auth),
        Err(err) => {
            tracing::warn!(error = %err, "session lookup failed before submit");
            return Err(SubmitError::Auth);
        }
    };

    let key = storage_key(Utc::now(), &photo.file_name);
    let photo_url = gateway
        .upload_object(bucket, &key, photo.bytes.clone(), photo.content_type.as_deref())
        .await
        .map_err(|err| {
            tracing::warn!(error = %err, bucket, key = %key, "photo upload failed");
            SubmitError::upload(&err)
        })?;

    let report = gateway
        .insert_report(NewReport {
            name: name.to_string(),
            category: draft.category.clone(),
            photo_url,
            latitude: candidate.lat,
            longitude: candidate.lng,
            owner_id: identity.id,
        })
        .await
        .map_err(|err| {
            tracing::warn!(error = %err, bucket, key = %key, "report insert failed; uploaded photo kept");
            SubmitError::persistence(&err)
        })?;

    tracing::info!(report_id = %report.id, user_id = %identity.id, "report submitted");
    Ok(report)
}

/// Modal form bound to a confirmed location.
pub struct SubmissionForm {
    gateway: Arc<dyn ReportGateway>,
    bucket: String,
    draft: ReportDraft,
    busy: Arc<AtomicBool>,
}

impl SubmissionForm {
    pub fn new(gateway: Arc<dyn ReportGateway>, bucket: impl Into<String>) -> Self {
        Self {
            gateway,
            bucket: bucket.into(),
            draft: ReportDraft::default(),
            busy: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.draft.name = name.into();
    }

    pub fn set_category(&mut self, category: Category) {
        self.draft.category = category;
    }

    pub fn attach_photo(&mut self, photo: PhotoFile) {
        self.draft.photo = Some(photo);
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// Marks the form busy and captures the current draft. The form stays busy
    /// until the returned submission finishes or is dropped.
    pub fn begin(&self, candidate: LatLng) -> Result<PendingSubmission, SubmitError> {
        let busy = BusyGuard::acquire(self.busy.clone()).ok_or(SubmitError::InFlight)?;
        Ok(PendingSubmission {
            gateway: self.gateway.clone(),
            bucket: self.bucket.clone(),
            candidate,
            draft: self.draft.clone(),
            _busy: busy,
        })
    }

    /// Fails with [`SubmitError::InFlight`] while another submit on this form is running.
    pub async fn submit(&self, candidate: LatLng) -> Result<Report, SubmitError> {
        self.begin(candidate)?.run().await
    }
}

/// A submission that has claimed its form. Owns everything it needs, so it
/// can run while the form's owner keeps redrawing.
pub struct PendingSubmission {
    gateway: Arc<dyn ReportGateway>,
    bucket: String,
    candidate: LatLng,
    draft: ReportDraft,
    _busy: BusyGuard,
}

impl PendingSubmission {
    pub async fn run(self) -> Result<Report, SubmitError> {
        submit_report(self.gateway.as_ref(), &self.bucket, self.candidate, &self.draft).await
    }
}

struct BusyGuard(Arc<AtomicBool>);

impl BusyGuard {
    fn acquire(flag: Arc<AtomicBool>) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}
