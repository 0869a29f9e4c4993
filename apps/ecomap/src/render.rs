use crate::placement::Placement;
use crate::report::{LatLng, Report, ReportId, ReportSet};
use crate::session::Session;
use std::fmt;

pub const POPUP_MIN_WIDTH_PX: u32 = 250;
pub const PHOTO_MAX_HEIGHT_PX: u32 = 300;
pub const CANDIDATE_OPACITY: f32 = 0.8;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub center: LatLng,
    pub zoom: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFit {
    /// Scale to fit inside the box without cropping.
    Contain,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PhotoView {
    pub url: String,
    pub alt: String,
    pub max_height_px: u32,
    pub fit: ImageFit,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PopupView {
    pub title: String,
    pub category_badge: String,
    pub photo: Option<PhotoView>,
    pub min_width_px: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MarkerView {
    pub id: ReportId,
    pub position: LatLng,
    pub popup: PopupView,
}

impl MarkerView {
    pub fn from_report(report: &Report) -> Self {
        let photo = report
            .photo_url
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty())
            .map(|url| PhotoView {
                url: url.to_string(),
                alt: report.name.clone(),
                max_height_px: PHOTO_MAX_HEIGHT_PX,
                fit: ImageFit::Contain,
            });
        Self {
            id: report.id.clone(),
            position: report.position(),
            popup: PopupView {
                title: report.name.clone(),
                category_badge: report.category.label().to_uppercase(),
                photo,
                min_width_px: POPUP_MIN_WIDTH_PX,
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CandidateMarker {
    pub position: LatLng,
    pub draggable: bool,
    pub opacity: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionBadge {
    /// Offers the login link.
    SignedOut,
    SignedIn { display_name: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Toolbar {
    pub session: SessionBadge,
    pub add_button: bool,
    pub placing_hint: bool,
    pub logout_button: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ModalView {
    pub candidate: LatLng,
    pub busy: bool,
    pub error: Option<String>,
}

/// Everything a redraw needs, captured after a state change.
#[derive(Debug, Clone, PartialEq)]
pub struct MapSnapshot {
    pub viewport: Viewport,
    pub markers: Vec<MarkerView>,
    pub candidate: Option<CandidateMarker>,
    pub toolbar: Toolbar,
    pub confirm_bar: bool,
    pub modal: Option<ModalView>,
}

pub(crate) struct SnapshotInput<'a> {
    pub viewport: Viewport,
    pub reports: &'a ReportSet,
    pub session: &'a Session,
    pub placement: Placement,
    pub form_busy: bool,
    pub form_error: Option<&'a str>,
}

impl MapSnapshot {
    pub(crate) fn build(input: SnapshotInput<'_>) -> Self {
        let authenticated = input.session.is_authenticated();
        let session = match input.session.display_name() {
            Some(display_name) => SessionBadge::SignedIn { display_name },
            None => SessionBadge::SignedOut,
        };
        let candidate = match input.placement {
            Placement::Placing { candidate } => Some(CandidateMarker {
                position: candidate,
                draggable: true,
                opacity: CANDIDATE_OPACITY,
            }),
            _ => None,
        };
        let modal = match input.placement {
            Placement::Confirmed { candidate } => Some(ModalView {
                candidate,
                busy: input.form_busy,
                error: input.form_error.map(str::to_string),
            }),
            _ => None,
        };
        let placing = matches!(input.placement, Placement::Placing { .. });

        Self {
            viewport: input.viewport,
            markers: input.reports.iter().map(MarkerView::from_report).collect(),
            candidate,
            toolbar: Toolbar {
                session,
                add_button: authenticated && input.placement == Placement::Idle,
                placing_hint: authenticated && placing,
                logout_button: authenticated,
            },
            confirm_bar: placing,
            modal,
        }
    }

    pub fn marker(&self, id: &ReportId) -> Option<&MarkerView> {
        self.markers.iter().find(|marker| &marker.id == id)
    }
}

impl fmt::Display for MapSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let session = match &self.toolbar.session {
            SessionBadge::SignedOut => "signed out".to_string(),
            SessionBadge::SignedIn { display_name } => format!("signed in as {display_name}"),
        };
        write!(
            f,
            "{} markers around ({:.3}, {:.3}) zoom {}, {}",
            self.markers.len(),
            self.viewport.center.lat,
            self.viewport.center.lng,
            self.viewport.zoom,
            session
        )?;
        if let Some(candidate) = &self.candidate {
            write!(
                f,
                ", placing pin at ({:.5}, {:.5})",
                candidate.position.lat, candidate.position.lng
            )?;
        }
        if let Some(modal) = &self.modal {
            write!(
                f,
                ", form open at ({:.5}, {:.5})",
                modal.candidate.lat, modal.candidate.lng
            )?;
        }
        Ok(())
    }
}
