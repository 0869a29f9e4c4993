use crate::config::Config;
use crate::error::{FetchError, SubmitError};
use crate::gateway::{InsertSubscription, ReportGateway};
use crate::placement::{Placement, PlacementEvent, TransitionError};
use crate::render::{MapSnapshot, SnapshotInput, Viewport};
use crate::report::{LatLng, Report, ReportSet};
use crate::session::Session;
use crate::submission::{PendingSubmission, SubmissionForm};
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct ControllerSettings {
    pub reports_table: String,
    pub photo_bucket: String,
    pub home: Viewport,
}

impl ControllerSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            reports_table: config.reports_table.clone(),
            photo_bucket: config.photo_bucket.clone(),
            home: Viewport {
                center: config.map_center,
                zoom: config.map_zoom,
            },
        }
    }
}

/// Owns the rendered report set, the session, pin placement and the live
/// subscription. Driven from a single task through `&mut self`.
pub struct MapController {
    gateway: Arc<dyn ReportGateway>,
    settings: ControllerSettings,
    viewport: Viewport,
    reports: ReportSet,
    session: Session,
    placement: Placement,
    form: Option<SubmissionForm>,
    form_error: Option<String>,
    subscription: Option<InsertSubscription>,
}

impl MapController {
    pub fn new(gateway: Arc<dyn ReportGateway>, settings: ControllerSettings) -> Self {
        let viewport = settings.home;
        Self {
            gateway,
            settings,
            viewport,
            reports: ReportSet::new(),
            session: Session::Anonymous,
            placement: Placement::Idle,
            form: None,
            form_error: None,
            subscription: None,
        }
    }

    /// Loads reports and the session, then opens the live feed. None of the
    /// three steps is fatal; failures are logged and the view degrades.
    pub async fn initialize(&mut self) -> MapSnapshot {
        self.release_subscription().await;
        self.refresh().await;

        self.session = match self.gateway.current_user().await {
            Ok(identity) => Session::from_identity(identity),
            Err(err) => {
                tracing::warn!(error = %FetchError::Session(err), "continuing signed out");
                Session::Anonymous
            }
        };

        match self
            .gateway
            .subscribe_inserts(&self.settings.reports_table)
            .await
        {
            Ok(subscription) => {
                tracing::info!(table = %self.settings.reports_table, "live updates subscribed");
                self.subscription = Some(subscription);
            }
            Err(err) => {
                tracing::warn!(error = %FetchError::Subscribe(err), "continuing without live updates");
            }
        }

        tracing::info!(
            reports = self.reports.len(),
            signed_in = self.session.is_authenticated(),
            "map initialized"
        );
        self.snapshot()
    }

    /// Re-reads every report and folds it into the rendered set. Entries
    /// already shown are kept if the read misses them.
    pub async fn refresh(&mut self) -> MapSnapshot {
        match self.gateway.list_reports().await {
            Ok(fetched) => self.reports.reconcile(fetched),
            Err(err) => {
                tracing::warn!(error = %FetchError::Reports(err), "keeping current reports");
            }
        }
        self.snapshot()
    }

    pub fn is_live(&self) -> bool {
        self.subscription
            .as_ref()
            .is_some_and(InsertSubscription::is_active)
    }

    /// Waits for the next pushed insert. Returns `None` when there is no
    /// subscription or the feed has ended; the feed is dropped in that case.
    pub async fn next_live_insert(&mut self) -> Option<Report> {
        let subscription = self.subscription.as_mut()?;
        let next = subscription.next().await;
        if next.is_none() {
            tracing::warn!("live update feed ended");
            self.subscription = None;
        }
        next
    }

    /// Merges every insert already queued on the feed. Returns how many were new.
    pub fn drain_live_inserts(&mut self) -> usize {
        let Some(subscription) = self.subscription.as_mut() else {
            return 0;
        };
        let mut merged = 0;
        while let Some(report) = subscription.try_next() {
            if self.reports.merge(report) {
                merged += 1;
            }
        }
        merged
    }

    /// Adds `report` unless it is already shown. `None` means nothing changed.
    pub fn on_live_insert(&mut self, report: Report) -> Option<MapSnapshot> {
        let id = report.id.clone();
        if self.reports.merge(report) {
            tracing::debug!(report_id = %id, "live insert merged");
            Some(self.snapshot())
        } else {
            tracing::debug!(report_id = %id, "live insert already shown");
            None
        }
    }

    pub fn pan_to(&mut self, center: LatLng, zoom: u8) -> MapSnapshot {
        self.viewport = Viewport { center, zoom };
        self.snapshot()
    }

    pub fn request_add(&mut self) -> Result<MapSnapshot, TransitionError> {
        self.transition(PlacementEvent::Add {
            center: self.viewport.center,
        })
    }

    pub fn drag_candidate(&mut self, position: LatLng) -> Result<MapSnapshot, TransitionError> {
        self.transition(PlacementEvent::DragEnd { position })
    }

    /// Locks the candidate and opens an empty submission form for it.
    pub fn confirm_placement(&mut self) -> Result<MapSnapshot, TransitionError> {
        let snapshot = self.transition(PlacementEvent::Confirm)?;
        self.form = Some(SubmissionForm::new(
            self.gateway.clone(),
            self.settings.photo_bucket.clone(),
        ));
        self.form_error = None;
        Ok(snapshot)
    }

    /// Leaves placement, closing the form if it is open.
    pub fn cancel(&mut self) -> Result<MapSnapshot, TransitionError> {
        if self.form_busy() {
            return Err(TransitionError::Invalid {
                state: "submitting",
                event: "cancel",
            });
        }
        self.transition(PlacementEvent::Cancel)?;
        self.close_form();
        Ok(self.snapshot())
    }

    pub fn form_mut(&mut self) -> Option<&mut SubmissionForm> {
        self.form.as_mut()
    }

    /// Claims the open form for a submission. The returned snapshot shows the
    /// form busy; run the pending submission and hand its result to
    /// [`MapController::finish_submit`]. The controller stays usable meanwhile.
    pub fn begin_submit(&mut self) -> Result<(MapSnapshot, PendingSubmission), SubmitError> {
        let Placement::Confirmed { candidate } = self.placement else {
            return Err(SubmitError::NotConfirmed);
        };
        let form = self.form.as_ref().ok_or(SubmitError::NotConfirmed)?;
        let pending = form.begin(candidate)?;
        self.form_error = None;
        Ok((self.snapshot(), pending))
    }

    /// On success placement returns to idle and reports are re-read; on
    /// failure the form stays open with the error message attached.
    pub async fn finish_submit(
        &mut self,
        result: Result<Report, SubmitError>,
    ) -> Result<MapSnapshot, SubmitError> {
        match result {
            Ok(report) => {
                if let Ok(next) = self
                    .placement
                    .apply(PlacementEvent::SubmitCompleted, self.session.is_authenticated())
                {
                    self.placement = next;
                    self.close_form();
                }
                self.reports.merge(report);
                Ok(self.refresh().await)
            }
            Err(err) => {
                if self.form.is_some() {
                    self.form_error = Some(err.user_message());
                }
                Err(err)
            }
        }
    }

    /// Submits the open form at the confirmed location and waits for it.
    pub async fn submit(&mut self) -> Result<MapSnapshot, SubmitError> {
        let (_, pending) = self.begin_submit()?;
        let result = pending.run().await;
        self.finish_submit(result).await
    }

    /// Signs out and starts over from a fresh view.
    pub async fn request_logout(&mut self) -> MapSnapshot {
        if let Err(err) = self.gateway.sign_out().await {
            tracing::warn!(error = %err, "sign out failed; clearing local session");
        }
        self.session = Session::Anonymous;
        self.placement = Placement::Idle;
        self.close_form();
        self.reports = ReportSet::new();
        self.viewport = self.settings.home;
        self.initialize().await
    }

    pub async fn shutdown(&mut self) {
        self.release_subscription().await;
    }

    pub fn snapshot(&self) -> MapSnapshot {
        MapSnapshot::build(SnapshotInput {
            viewport: self.viewport,
            reports: &self.reports,
            session: &self.session,
            placement: self.placement,
            form_busy: self.form_busy(),
            form_error: self.form_error.as_deref(),
        })
    }

    pub fn placement(&self) -> Placement {
        self.placement
    }

    pub fn reports(&self) -> &ReportSet {
        &self.reports
    }

    fn transition(&mut self, event: PlacementEvent) -> Result<MapSnapshot, TransitionError> {
        let from = self.placement.name();
        let next = self
            .placement
            .apply(event, self.session.is_authenticated())
            .map_err(|err| {
                tracing::debug!(error = %err, state = from, "placement event rejected");
                err
            })?;
        tracing::debug!(from, to = next.name(), "placement changed");
        self.placement = next;
        Ok(self.snapshot())
    }

    fn form_busy(&self) -> bool {
        self.form.as_ref().is_some_and(SubmissionForm::is_busy)
    }

    fn close_form(&mut self) {
        self.form = None;
        self.form_error = None;
    }

    async fn release_subscription(&mut self) {
        if let Some(subscription) = self.subscription.take() {
            subscription.unsubscribe().await;
            tracing::debug!("live updates released");
        }
    }
}
