//! In-memory dashboard board.
//!
//! The board is the single source of what the dashboard shows: one card per
//! VM with its start/stop/delete controls, status badges keyed by VM id, and
//! an optional alert shelf. Executors and the renderer only talk to the board;
//! the terminal frame is drawn from [`Dashboard::snapshot`].

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::{debug, warn};

use crate::api::{VmAction, VmResources, VmSummary};
use crate::config::AlertTiming;
use crate::gauges::{cpu_percent, memory_percent, resident_memory_percent};

pub type AlertId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmStatus {
    Running,
    Stopped,
}

impl fmt::Display for VmStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value = match self {
            Self::Running => "running",
            Self::Stopped => "stopped",
        };
        f.write_str(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BadgeTone {
    Success,
    Danger,
}

impl BadgeTone {
    pub fn css_class(self) -> &'static str {
        match self {
            Self::Success => "bg-success",
            Self::Danger => "bg-danger",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Badge {
    pub text: String,
    pub tone: BadgeTone,
}

impl Badge {
    /// Anything other than `running` is shown as a danger badge.
    pub fn for_status(raw: &str) -> Self {
        let tone = if raw == "running" {
            BadgeTone::Success
        } else {
            BadgeTone::Danger
        };
        Self {
            text: raw.to_string(),
            tone,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ControlKind {
    #[default]
    Start,
    Stop,
    Delete,
}

impl From<VmAction> for ControlKind {
    fn from(action: VmAction) -> Self {
        match action {
            VmAction::Start => Self::Start,
            VmAction::Stop => Self::Stop,
            VmAction::Delete => Self::Delete,
        }
    }
}

impl ControlKind {
    pub const ALL: [ControlKind; 3] = [Self::Start, Self::Stop, Self::Delete];

    pub fn action(self) -> VmAction {
        match self {
            Self::Start => VmAction::Start,
            Self::Stop => VmAction::Stop,
            Self::Delete => VmAction::Delete,
        }
    }

    pub fn idle_label(self) -> &'static str {
        match self {
            Self::Start => "▶ Start",
            Self::Stop => "■ Stop",
            Self::Delete => "✖ Delete",
        }
    }

    pub fn progress_label(self) -> &'static str {
        match self {
            Self::Start => "Starting...",
            Self::Stop => "Stopping...",
            Self::Delete => "Deleting...",
        }
    }

    pub fn tooltip(self) -> &'static str {
        match self {
            Self::Start => "Power on this VM",
            Self::Stop => "Power off this VM",
            Self::Delete => "Delete this VM and its disks permanently",
        }
    }
}

/// Names a control by the card that encloses it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ControlId {
    pub card: String,
    pub kind: ControlKind,
}

impl ControlId {
    pub fn new(card: impl Into<String>, kind: ControlKind) -> Self {
        Self {
            card: card.into(),
            kind,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlContent {
    Idle(String),
    /// Spinner plus progress label.
    Busy(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Control {
    pub kind: ControlKind,
    pub vm_id: Option<String>,
    pub node: Option<String>,
    pub disabled: bool,
    pub visible: bool,
    pub content: ControlContent,
}

impl Control {
    pub fn new(kind: ControlKind, vm_id: Option<String>, node: Option<String>) -> Self {
        Self {
            kind,
            vm_id,
            node,
            disabled: false,
            visible: true,
            content: ControlContent::Idle(kind.idle_label().to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct VmCard {
    pub vm_id: String,
    pub name: String,
    pub node: Option<String>,
    pub cpu_usage: Option<f64>,
    pub memory_usage: Option<f64>,
    /// Memory capacity in bytes, from the listing.
    pub max_memory: Option<f64>,
    /// Last live reading, if one has been fetched.
    pub resources: Option<VmResources>,
    pub controls: Vec<Control>,
}

impl VmCard {
    pub fn control(&self, kind: ControlKind) -> Option<&Control> {
        self.controls.iter().find(|control| control.kind == kind)
    }

    fn control_mut(&mut self, kind: ControlKind) -> Option<&mut Control> {
        self.controls.iter_mut().find(|control| control.kind == kind)
    }

    fn from_summary(vm: &VmSummary) -> Self {
        let running = vm.status.as_deref() == Some("running");
        let mut controls: Vec<Control> = ControlKind::ALL
            .into_iter()
            .map(|kind| Control::new(kind, Some(vm.vmid.clone()), vm.node.clone()))
            .collect();
        for control in &mut controls {
            control.visible = match control.kind {
                ControlKind::Start => !running,
                ControlKind::Stop => running,
                ControlKind::Delete => true,
            };
        }

        Self {
            vm_id: vm.vmid.clone(),
            name: vm.name.clone().unwrap_or_else(|| format!("vm-{}", vm.vmid)),
            node: vm.node.clone(),
            cpu_usage: cpu_percent(vm),
            memory_usage: memory_percent(vm),
            max_memory: vm.maxmem,
            resources: None,
            controls,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertLevel {
    Success,
    Danger,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alert {
    pub id: AlertId,
    pub level: AlertLevel,
    pub message: String,
    pub fading: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BoardSnapshot {
    pub cards: Vec<VmCard>,
    pub badges: BTreeMap<String, Badge>,
    /// `None` when the board has no alert shelf.
    pub alerts: Option<Vec<Alert>>,
}

impl BoardSnapshot {
    pub fn card(&self, vm_id: &str) -> Option<&VmCard> {
        self.cards.iter().find(|card| card.vm_id == vm_id)
    }
}

#[derive(Debug, Default)]
struct BoardState {
    cards: Vec<VmCard>,
    badges: BTreeMap<String, Badge>,
    alerts: Option<Vec<Alert>>,
    next_alert_id: AlertId,
}

#[derive(Debug)]
pub struct Dashboard {
    state: Mutex<BoardState>,
    timing: AlertTiming,
}

impl Dashboard {
    /// An empty board. `with_alerts` decides whether alerts have anywhere to go.
    pub fn new(timing: AlertTiming, with_alerts: bool) -> Self {
        Self {
            state: Mutex::new(BoardState {
                alerts: with_alerts.then(Vec::new),
                ..BoardState::default()
            }),
            timing,
        }
    }

    /// Builds a board with one card and badge per listed VM, plus an alert shelf.
    pub fn initialize(vms: &[VmSummary], timing: AlertTiming) -> Self {
        let board = Self::new(timing, true);
        board.load(vms);
        board
    }

    /// Replaces every card and badge with a fresh listing. Alerts are kept.
    ///
    /// Controls with a request in flight stay disabled and busy on the new
    /// card; their executor restores them when the request settles.
    pub fn load(&self, vms: &[VmSummary]) {
        let mut state = self.lock();
        let busy: HashMap<ControlId, ControlContent> = state
            .cards
            .iter()
            .flat_map(|card| {
                card.controls.iter().filter_map(move |control| match &control.content {
                    ControlContent::Busy(_) => Some((
                        ControlId::new(card.vm_id.clone(), control.kind),
                        control.content.clone(),
                    )),
                    ControlContent::Idle(_) => None,
                })
            })
            .collect();

        state.cards.clear();
        state.badges.clear();
        for vm in vms {
            if state.badges.contains_key(&vm.vmid) {
                warn!(vm_id = %vm.vmid, "duplicate VM id in listing; keeping first entry");
                continue;
            }
            let raw_status = vm.status.as_deref().unwrap_or("unknown");
            state
                .badges
                .insert(vm.vmid.clone(), Badge::for_status(raw_status));

            let mut card = VmCard::from_summary(vm);
            for control in &mut card.controls {
                let id = ControlId::new(card.vm_id.clone(), control.kind);
                if let Some(content) = busy.get(&id) {
                    control.disabled = true;
                    control.content = content.clone();
                }
            }
            state.cards.push(card);
        }
    }

    /// Folds a live resources reading into the card's usage. Returns whether
    /// the card was found.
    pub fn apply_resources(&self, vm_id: &str, resources: VmResources) -> bool {
        let mut state = self.lock();
        let Some(card) = state.cards.iter_mut().find(|card| card.vm_id == vm_id) else {
            return false;
        };
        if resources.cpu_usage.is_some() {
            card.cpu_usage = resources.cpu_usage;
        }
        if let Some(percent) = resident_memory_percent(resources.memory_usage, card.max_memory) {
            card.memory_usage = Some(percent);
        }
        card.resources = Some(resources);
        true
    }

    pub fn timing(&self) -> AlertTiming {
        self.timing
    }

    pub fn snapshot(&self) -> BoardSnapshot {
        let state = self.lock();
        BoardSnapshot {
            cards: state.cards.clone(),
            badges: state.badges.clone(),
            alerts: state.alerts.clone(),
        }
    }

    #[cfg(test)]
    pub fn insert_card(&self, card: VmCard) {
        self.lock().cards.push(card);
    }

    #[cfg(test)]
    pub fn insert_badge(&self, vm_id: impl Into<String>, badge: Badge) {
        self.lock().badges.insert(vm_id.into(), badge);
    }

    pub fn control(&self, id: &ControlId) -> Option<Control> {
        let state = self.lock();
        state
            .cards
            .iter()
            .find(|card| card.vm_id == id.card)
            .and_then(|card| card.control(id.kind))
            .cloned()
    }

    /// Disables the control and swaps its label for a spinner and `progress`.
    pub fn begin_control(&self, id: &ControlId, progress: &str) {
        self.with_control(id, |control| {
            control.disabled = true;
            control.content = ControlContent::Busy(progress.to_string());
        });
    }

    /// Re-enables the control with its idle label. Silently skipped when the
    /// card is gone.
    pub fn restore_control(&self, id: &ControlId, label: &str) {
        self.with_control(id, |control| {
            control.disabled = false;
            control.content = ControlContent::Idle(label.to_string());
        });
    }

    fn with_control(&self, id: &ControlId, apply: impl FnOnce(&mut Control)) {
        let mut state = self.lock();
        if let Some(control) = state
            .cards
            .iter_mut()
            .find(|card| card.vm_id == id.card)
            .and_then(|card| card.control_mut(id.kind))
        {
            apply(control);
        }
    }

    /// Rewrites the VM's badge and flips its start/stop controls so exactly
    /// one of them shows. Missing badge or card is not an error.
    pub fn update_vm_status(&self, vm_id: &str, status: VmStatus) {
        let mut state = self.lock();
        if let Some(badge) = state.badges.get_mut(vm_id) {
            *badge = Badge::for_status(&status.to_string());
            debug!(vm_id, badge = badge.tone.css_class(), "status badge updated");
        }

        let Some(card) = state.cards.iter_mut().find(|card| card.vm_id == vm_id) else {
            return;
        };
        let running = status == VmStatus::Running;
        let has_both = card.control(ControlKind::Start).is_some()
            && card.control(ControlKind::Stop).is_some();
        if !has_both {
            return;
        }
        if let Some(start) = card.control_mut(ControlKind::Start) {
            start.visible = !running;
        }
        if let Some(stop) = card.control_mut(ControlKind::Stop) {
            stop.visible = running;
        }
    }

    /// Removes the card and its badge. Returns whether a card was removed.
    pub fn remove_card(&self, card_id: &str) -> bool {
        let mut state = self.lock();
        let before = state.cards.len();
        state.cards.retain(|card| card.vm_id != card_id);
        let removed = state.cards.len() != before;
        if removed {
            state.badges.remove(card_id);
        }
        removed
    }

    pub(crate) fn push_alert(&self, message: String, level: AlertLevel) -> Option<AlertId> {
        let mut state = self.lock();
        state.next_alert_id += 1;
        let id = state.next_alert_id;
        let shelf = state.alerts.as_mut()?;
        shelf.push(Alert {
            id,
            level,
            message,
            fading: false,
        });
        Some(id)
    }

    pub(crate) fn fade_alert(&self, id: AlertId) {
        let mut state = self.lock();
        if let Some(alert) = state
            .alerts
            .as_mut()
            .and_then(|shelf| shelf.iter_mut().find(|alert| alert.id == id))
        {
            alert.fading = true;
        }
    }

    /// Drops an alert; used both by the expiry timer and the close control.
    pub fn remove_alert(&self, id: AlertId) -> bool {
        let mut state = self.lock();
        let Some(shelf) = state.alerts.as_mut() else {
            return false;
        };
        let before = shelf.len();
        shelf.retain(|alert| alert.id != id);
        shelf.len() != before
    }

    /// Close control for the most recent alert.
    pub fn dismiss_latest_alert(&self) -> Option<AlertId> {
        let id = self
            .lock()
            .alerts
            .as_ref()
            .and_then(|shelf| shelf.last())
            .map(|alert| alert.id)?;
        self.remove_alert(id);
        Some(id)
    }

    fn lock(&self) -> MutexGuard<'_, BoardState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
