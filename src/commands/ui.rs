use std::cmp::min;
use std::io::{stdout, Write};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use crossterm::cursor;
use crossterm::event::{
    self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEventKind, MouseButton,
    MouseEvent, MouseEventKind,
};
use crossterm::execute;
use crossterm::terminal::{
    self, disable_raw_mode, enable_raw_mode, Clear, ClearType, EnterAlternateScreen,
    LeaveAlternateScreen,
};
use tracing::{info, warn};

use crate::actions::transport_message;
use crate::alerts::show_alert;
use crate::api::{HttpVmApi, VmApi, VmRef};
use crate::board::{
    AlertLevel, BoardSnapshot, ControlContent, ControlId, ControlKind, Dashboard, VmCard,
};
use crate::config::AppConfig;
use crate::dispatch::{self, Dispatch, PendingAction};
use crate::gauges::{GaugeKind, UsageGauge, AVAILABLE_COLOR, SEGMENT_LABELS};
use crate::ui::{alert_code, badge_code, format_percent, format_uptime};

const ALERT_LINES: usize = 3;
const TABLE_FIRST_ROW: u16 = 10;
const SPINNER: [&str; 4] = ["◐", "◓", "◑", "◒"];

pub(crate) async fn run(config: &AppConfig, node: Option<String>) -> Result<()> {
    let mut node = config.node_filter(node);
    let api: Arc<dyn VmApi> = Arc::new(HttpVmApi::new(config.api_url.clone()));
    let node_choices = match api.list_nodes().await {
        Ok(nodes) => {
            let mut names: Vec<String> = nodes.into_iter().map(|node| node.node).collect();
            names.sort();
            names
        }
        Err(err) => {
            warn!(error = %err, "node listing failed; node filter cycling disabled");
            Vec::new()
        }
    };
    let board = match api.list_vms(node.as_deref()).await {
        Ok(vms) => {
            info!(count = vms.len(), node = node.as_deref().unwrap_or("*"), "loaded VMs");
            Arc::new(Dashboard::initialize(&vms, config.alerts))
        }
        Err(err) => {
            warn!(error = %err, "initial VM listing failed");
            let board = Arc::new(Dashboard::new(config.alerts, true));
            show_alert(&board, transport_message(&err), AlertLevel::Danger);
            board
        }
    };

    let _guard = TerminalGuard::enter()?;
    let mut state = DashboardState::default();
    let mut resources_for: Option<String> = None;
    let mut needs_full_clear = true;
    let mut should_exit = false;

    while !should_exit {
        let snapshot = board.snapshot();
        state.clamp_selection(snapshot.cards.len());
        if let Some(card) = snapshot.cards.get(state.selected) {
            if resources_for.as_deref() != Some(card.vm_id.as_str()) {
                resources_for = Some(card.vm_id.clone());
                if let Some(target) = card_target(card) {
                    spawn_resources(&api, &board, target);
                }
            }
        }
        let frame_info = draw_frame(&snapshot, &state, config, node.as_deref(), needs_full_clear)?;
        needs_full_clear = false;

        if !event::poll(Duration::from_millis(90)).context("failed polling terminal input")? {
            continue;
        }

        match event::read().context("failed reading terminal input")? {
            Event::Key(key) if key.kind == KeyEventKind::Press => {
                if let Some(prompt) = state.confirm.as_mut() {
                    let answer = match key.code {
                        KeyCode::Char('y') | KeyCode::Char('Y') => Some(true),
                        KeyCode::Char('n') | KeyCode::Char('N') | KeyCode::Esc => Some(false),
                        KeyCode::Enter => Some(prompt.selected == ConfirmChoice::Yes),
                        KeyCode::Left
                        | KeyCode::Right
                        | KeyCode::Tab
                        | KeyCode::Char('h')
                        | KeyCode::Char('l') => {
                            prompt.selected = prompt.selected.toggled();
                            None
                        }
                        _ => None,
                    };
                    if let Some(accepted) = answer {
                        resolve_confirmation(&api, &board, &mut state, accepted);
                        needs_full_clear = true;
                    }
                    continue;
                }

                if state.help_open {
                    match key.code {
                        KeyCode::Char('q') => should_exit = true,
                        _ => {
                            state.help_open = false;
                            needs_full_clear = true;
                        }
                    }
                    continue;
                }

                match key.code {
                    KeyCode::Char('q') => should_exit = true,
                    KeyCode::Char('?') => {
                        state.help_open = true;
                        needs_full_clear = true;
                    }
                    KeyCode::Up | KeyCode::Char('k') => {
                        if state.selected > 0 {
                            state.selected -= 1;
                        }
                    }
                    KeyCode::Down | KeyCode::Char('j') => {
                        if state.selected + 1 < snapshot.cards.len() {
                            state.selected += 1;
                        }
                    }
                    KeyCode::Left | KeyCode::Char('h') => {
                        if let Some(card) = snapshot.cards.get(state.selected) {
                            state.focus = step_focus(card, state.focus, false);
                        }
                    }
                    KeyCode::Right | KeyCode::Char('l') | KeyCode::Tab => {
                        if let Some(card) = snapshot.cards.get(state.selected) {
                            state.focus = step_focus(card, state.focus, true);
                        }
                    }
                    KeyCode::Enter => {
                        if let Some(card) = snapshot.cards.get(state.selected) {
                            let kind = effective_focus(card, state.focus);
                            click(&api, &board, &mut state, card, kind);
                        }
                    }
                    KeyCode::Char('s') => {
                        click_selected(&api, &board, &mut state, &snapshot, ControlKind::Start)
                    }
                    KeyCode::Char('x') => {
                        click_selected(&api, &board, &mut state, &snapshot, ControlKind::Stop)
                    }
                    KeyCode::Char('d') => {
                        click_selected(&api, &board, &mut state, &snapshot, ControlKind::Delete)
                    }
                    KeyCode::Char('c') => {
                        board.dismiss_latest_alert();
                    }
                    KeyCode::Char('g') => {
                        let selected = snapshot.cards.get(state.selected).and_then(card_target);
                        spawn_refresh(&api, &board, node.clone(), selected);
                    }
                    KeyCode::Char('n') => {
                        if !node_choices.is_empty() {
                            node = next_node(&node_choices, node.as_deref());
                            state.selected = 0;
                            resources_for = None;
                            info!(node = node.as_deref().unwrap_or("*"), "node filter changed");
                            spawn_refresh(&api, &board, node.clone(), None);
                        }
                    }
                    _ => {}
                }
            }
            Event::Mouse(mouse) => {
                if state.confirm.is_some() {
                    if let Some(layout) = frame_info.confirm_layout {
                        if let Some(choice) = handle_confirm_mouse(mouse, layout) {
                            resolve_confirmation(
                                &api,
                                &board,
                                &mut state,
                                choice == ConfirmChoice::Yes,
                            );
                            needs_full_clear = true;
                        }
                    }
                    continue;
                }
                if state.help_open {
                    continue;
                }

                handle_table_mouse_selection(
                    mouse,
                    &frame_info.table_view,
                    &mut state,
                    snapshot.cards.len(),
                );
            }
            Event::Resize(_, _) => {
                needs_full_clear = true;
            }
            _ => {}
        }
    }

    Ok(())
}

#[derive(Debug, Default)]
struct DashboardState {
    selected: usize,
    focus: ControlKind,
    help_open: bool,
    confirm: Option<ConfirmPrompt>,
}

#[derive(Debug)]
struct ConfirmPrompt {
    control: ControlId,
    prompt: &'static str,
    selected: ConfirmChoice,
}

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
enum ConfirmChoice {
    Yes,
    #[default]
    No,
}

impl ConfirmChoice {
    fn toggled(self) -> Self {
        match self {
            Self::Yes => Self::No,
            Self::No => Self::Yes,
        }
    }
}

#[derive(Debug, Copy, Clone)]
struct ModalLayout {
    box_x: u16,
    box_y: u16,
    box_width: u16,
    box_height: u16,
    yes_x: u16,
    no_x: u16,
    buttons_y: u16,
}

#[derive(Debug, Copy, Clone)]
struct TableView {
    start_index: usize,
    visible_rows: usize,
}

#[derive(Debug, Copy, Clone)]
struct FrameInfo {
    table_view: TableView,
    confirm_layout: Option<ModalLayout>,
}

impl DashboardState {
    fn clamp_selection(&mut self, len: usize) {
        if len == 0 {
            self.selected = 0;
        } else if self.selected >= len {
            self.selected = len - 1;
        }
    }
}

struct TerminalGuard;

impl TerminalGuard {
    fn enter() -> Result<Self> {
        enable_raw_mode().context("failed enabling raw mode")?;
        let mut out = stdout();
        execute!(out, EnterAlternateScreen, cursor::Hide, EnableMouseCapture)
            .context("failed entering alternate screen")?;
        Ok(Self)
    }
}

impl Drop for TerminalGuard {
    fn drop(&mut self) {
        let _ = disable_raw_mode();
        let mut out = stdout();
        let _ = execute!(out, DisableMouseCapture, cursor::Show, LeaveAlternateScreen);
    }
}

fn click_selected(
    api: &Arc<dyn VmApi>,
    board: &Arc<Dashboard>,
    state: &mut DashboardState,
    snapshot: &BoardSnapshot,
    kind: ControlKind,
) {
    if let Some(card) = snapshot.cards.get(state.selected) {
        state.focus = kind;
        click(api, board, state, card, kind);
    }
}

fn click(
    api: &Arc<dyn VmApi>,
    board: &Arc<Dashboard>,
    state: &mut DashboardState,
    card: &VmCard,
    kind: ControlKind,
) {
    let control = ControlId::new(card.vm_id.clone(), kind);
    match dispatch::on_click(board, &control) {
        Dispatch::Run(pending) => spawn_action(api, board, pending),
        Dispatch::Confirm { control, prompt } => {
            state.confirm = Some(ConfirmPrompt {
                control,
                prompt,
                selected: ConfirmChoice::No,
            });
        }
        Dispatch::Ignored => {}
    }
}

fn resolve_confirmation(
    api: &Arc<dyn VmApi>,
    board: &Arc<Dashboard>,
    state: &mut DashboardState,
    accepted: bool,
) {
    let Some(prompt) = state.confirm.take() else {
        return;
    };
    if let Some(pending) = dispatch::on_confirm(board, &prompt.control, accepted) {
        spawn_action(api, board, pending);
    }
}

fn spawn_action(api: &Arc<dyn VmApi>, board: &Arc<Dashboard>, pending: PendingAction) {
    let api = Arc::clone(api);
    let board = Arc::clone(board);
    tokio::spawn(async move {
        // Outcome is already on the board as an alert.
        let _ = dispatch::execute(api.as_ref(), &board, &pending).await;
    });
}

/// Reloads the listing, then the live usage of `selected` so the reload does
/// not wipe it.
fn spawn_refresh(
    api: &Arc<dyn VmApi>,
    board: &Arc<Dashboard>,
    node: Option<String>,
    selected: Option<VmRef>,
) {
    let api = Arc::clone(api);
    let board = Arc::clone(board);
    tokio::spawn(async move {
        match api.list_vms(node.as_deref()).await {
            Ok(vms) => board.load(&vms),
            Err(err) => {
                warn!(error = %err, "VM listing refresh failed");
                show_alert(&board, transport_message(&err), AlertLevel::Danger);
                return;
            }
        }
        if let Some(target) = selected {
            fetch_resources(api.as_ref(), &board, &target).await;
        }
    });
}

fn spawn_resources(api: &Arc<dyn VmApi>, board: &Arc<Dashboard>, target: VmRef) {
    let api = Arc::clone(api);
    let board = Arc::clone(board);
    tokio::spawn(async move {
        fetch_resources(api.as_ref(), &board, &target).await;
    });
}

/// Live usage is best effort: on failure the listing's numbers stay.
async fn fetch_resources(api: &dyn VmApi, board: &Dashboard, target: &VmRef) {
    match api.vm_resources(target).await {
        Ok(resources) => {
            board.apply_resources(&target.vm_id, resources);
        }
        Err(err) => {
            warn!(
                vm_id = %target.vm_id,
                node = %target.node,
                error = %err,
                "resource fetch failed"
            );
        }
    }
}

fn card_target(card: &VmCard) -> Option<VmRef> {
    let node = card.node.as_deref().filter(|node| !node.is_empty())?;
    Some(VmRef {
        vm_id: card.vm_id.clone(),
        node: node.to_string(),
    })
}

/// All nodes, then each node in turn, then all nodes again.
fn next_node(choices: &[String], current: Option<&str>) -> Option<String> {
    match current {
        None => choices.first().cloned(),
        Some(current) => choices
            .iter()
            .position(|choice| choice == current)
            .and_then(|idx| choices.get(idx + 1))
            .cloned(),
    }
}

/// The focused control if it is visible, otherwise the first visible one.
fn effective_focus(card: &VmCard, focus: ControlKind) -> ControlKind {
    if card.control(focus).is_some_and(|control| control.visible) {
        return focus;
    }
    card.controls
        .iter()
        .find(|control| control.visible)
        .map(|control| control.kind)
        .unwrap_or(focus)
}

fn step_focus(card: &VmCard, focus: ControlKind, forward: bool) -> ControlKind {
    let visible: Vec<ControlKind> = card
        .controls
        .iter()
        .filter(|control| control.visible)
        .map(|control| control.kind)
        .collect();
    if visible.is_empty() {
        return focus;
    }
    let current = effective_focus(card, focus);
    let idx = visible
        .iter()
        .position(|kind| *kind == current)
        .unwrap_or(0);
    let next = if forward {
        (idx + 1) % visible.len()
    } else {
        (idx + visible.len() - 1) % visible.len()
    };
    visible[next]
}

fn compute_table_view(height: usize, selected: usize) -> TableView {
    let visible_rows = height.saturating_sub(16).max(3);
    let start_index = if selected >= visible_rows {
        selected + 1 - visible_rows
    } else {
        0
    };

    TableView {
        start_index,
        visible_rows,
    }
}

fn confirm_layout(width: usize, height: usize) -> Option<ModalLayout> {
    if width < 30 || height < 10 {
        return None;
    }

    let box_width = 52_u16.min(width as u16 - 2);
    let box_height = 8_u16.min(height as u16 - 2);
    let box_x = ((width as u16).saturating_sub(box_width)) / 2;
    let box_y = ((height as u16).saturating_sub(box_height)) / 2;

    Some(ModalLayout {
        box_x,
        box_y,
        box_width,
        box_height,
        yes_x: box_x + 6,
        no_x: box_x + box_width.saturating_sub(12),
        buttons_y: box_y + 6,
    })
}

fn handle_confirm_mouse(mouse: MouseEvent, layout: ModalLayout) -> Option<ConfirmChoice> {
    if !matches!(mouse.kind, MouseEventKind::Down(MouseButton::Left)) {
        return None;
    }

    let x = mouse.column;
    let y = mouse.row;
    if y != layout.buttons_y {
        return None;
    }

    if x >= layout.yes_x && x < layout.yes_x + 5 {
        return Some(ConfirmChoice::Yes);
    }
    if x >= layout.no_x && x < layout.no_x + 4 {
        return Some(ConfirmChoice::No);
    }
    None
}

fn handle_table_mouse_selection(
    mouse: MouseEvent,
    view: &TableView,
    state: &mut DashboardState,
    card_count: usize,
) {
    match mouse.kind {
        MouseEventKind::Down(MouseButton::Left) => {
            let table_last_row = TABLE_FIRST_ROW + view.visible_rows.saturating_sub(1) as u16;
            if mouse.row < TABLE_FIRST_ROW || mouse.row > table_last_row {
                return;
            }
            let relative = (mouse.row - TABLE_FIRST_ROW) as usize;
            let idx = view.start_index.saturating_add(relative);
            if idx < card_count {
                state.selected = idx;
            }
        }
        MouseEventKind::ScrollUp => {
            if state.selected > 0 {
                state.selected -= 1;
            }
        }
        MouseEventKind::ScrollDown => {
            if state.selected + 1 < card_count {
                state.selected += 1;
            }
        }
        _ => {}
    }
}

fn draw_frame(
    snapshot: &BoardSnapshot,
    state: &DashboardState,
    config: &AppConfig,
    node: Option<&str>,
    clear_all: bool,
) -> Result<FrameInfo> {
    let (width, height) = terminal::size().context("failed reading terminal size")?;
    let width = width as usize;
    let height = height as usize;
    let table_view = compute_table_view(height, state.selected);
    let confirm_layout = if state.confirm.is_some() {
        confirm_layout(width, height)
    } else {
        None
    };

    let mut frame = Vec::<u8>::new();

    if width < 80 || height < 20 {
        write_line(
            &mut frame,
            &paint(
                "1;31",
                "Terminal too small for vmdeck ui. Resize to at least 80x20.",
            ),
        )?;
        let mut out = stdout();
        execute!(out, cursor::MoveTo(0, 0)).context("failed moving cursor")?;
        if clear_all {
            execute!(out, Clear(ClearType::All)).context("failed clearing terminal frame")?;
        }
        out.write_all(&frame)
            .context("failed writing terminal warning frame")?;
        out.flush().context("failed flushing terminal frame")?;
        return Ok(FrameInfo {
            table_view,
            confirm_layout,
        });
    }

    let title = format!(
        " VMDECK  │  {}  │ {} │ node {}  │ ? help · q quit · j/k move · h/l focus · Enter click ",
        wall_clock_hms(),
        config.api_url,
        node.unwrap_or("all")
    );
    write_line(
        &mut frame,
        &paint("1;36", &frame_line("╔", "╗", width, '═')),
    )?;
    write_line(
        &mut frame,
        &paint("1;36", &frame_content_line(&title, width)),
    )?;
    write_line(
        &mut frame,
        &paint("1;36", &frame_line("╠", "╣", width, '═')),
    )?;

    let running = snapshot
        .badges
        .values()
        .filter(|badge| badge.text == "running")
        .count();
    let stopped = snapshot
        .badges
        .values()
        .filter(|badge| badge.text == "stopped")
        .count();
    let summary = format!(
        " VMs {}  •  {}  •  {}  •  {} ",
        paint("1;37", &snapshot.cards.len().to_string()),
        paint("1;32", &format!("running {running}")),
        paint("1;31", &format!("stopped {stopped}")),
        paint(
            "2;37",
            &format!("other {}", snapshot.badges.len().saturating_sub(running + stopped))
        ),
    );
    write_line(&mut frame, &frame_content_line(&summary, width))?;

    draw_alerts(&mut frame, snapshot, width)?;

    write_line(
        &mut frame,
        &paint("1;36", &frame_line("╠", "╣", width, '═')),
    )?;

    draw_table(&mut frame, snapshot, &table_view, state, width)?;

    write_line(
        &mut frame,
        &paint("1;36", &frame_line("╠", "╣", width, '═')),
    )?;
    draw_details(&mut frame, snapshot, state, width)?;
    write_line(
        &mut frame,
        &paint("1;36", &frame_line("╚", "╝", width, '═')),
    )?;

    let mut out = stdout();
    execute!(out, cursor::MoveTo(0, 0)).context("failed moving cursor")?;
    if clear_all {
        execute!(out, Clear(ClearType::All)).context("failed clearing terminal frame")?;
    }
    out.write_all(&frame)
        .context("failed writing terminal dashboard frame")?;
    execute!(out, Clear(ClearType::FromCursorDown)).context("failed clearing trailing area")?;

    if let (Some(layout), Some(prompt)) = (confirm_layout, state.confirm.as_ref()) {
        let name = snapshot
            .card(&prompt.control.card)
            .map_or(prompt.control.card.as_str(), |card| card.name.as_str());
        draw_confirm(&mut out, layout, prompt, name)?;
    } else if state.help_open {
        draw_help(&mut out, width, height)?;
    }

    out.flush().context("failed flushing terminal frame")?;

    Ok(FrameInfo {
        table_view,
        confirm_layout,
    })
}

/// The newest alerts, oldest first, each with its close marker.
fn draw_alerts(out: &mut impl Write, snapshot: &BoardSnapshot, width: usize) -> Result<()> {
    let alerts = snapshot.alerts.as_deref().unwrap_or(&[]);
    let shown = &alerts[alerts.len().saturating_sub(ALERT_LINES)..];
    for alert in shown {
        let text = format!(" {}  [x] ", alert.message);
        let line = format!(" {}", paint(alert_code(alert.level, alert.fading), &text));
        write_line(out, &frame_content_line(&line, width))?;
    }
    for _ in shown.len()..ALERT_LINES {
        write_line(out, &frame_content_line(" ", width))?;
    }
    Ok(())
}

fn draw_table(
    out: &mut impl Write,
    snapshot: &BoardSnapshot,
    table_view: &TableView,
    state: &DashboardState,
    width: usize,
) -> Result<()> {
    let cols: [(&str, usize); 7] = [
        ("S", 1),
        ("VMID", 6),
        ("NAME", 16),
        ("NODE", 8),
        ("STATUS", 8),
        ("CPU%", 5),
        ("ACTIONS", 26),
    ];

    let min_table_width = cols.iter().map(|(_, col)| *col).sum::<usize>() + (cols.len() - 1) * 3;
    if min_table_width + 4 > width {
        write_line(
            out,
            &frame_content_line(" table too wide for current terminal ", width),
        )?;
        return Ok(());
    }

    let mut header_parts = Vec::with_capacity(cols.len());
    for (name, col_width) in cols {
        header_parts.push(pad(name, col_width));
    }
    write_line(
        out,
        &frame_content_line(&paint("1;36", &header_parts.join(" │ ")), width),
    )?;
    write_line(
        out,
        &frame_content_line(&paint("2;34", &"─".repeat(min_table_width)), width),
    )?;

    let visible_rows = table_view.visible_rows.max(3);
    let start = table_view.start_index;
    let end = min(snapshot.cards.len(), start + visible_rows);

    if snapshot.cards.is_empty() {
        write_line(
            out,
            &frame_content_line(" no virtual machines (press g to reload) ", width),
        )?;
    } else {
        for (idx, card) in snapshot.cards.iter().enumerate().take(end).skip(start) {
            let is_selected = idx == state.selected;
            let mark = if is_selected { "▸" } else { " " };
            let status_cell = match snapshot.badges.get(&card.vm_id) {
                Some(badge) => paint(badge_code(badge.tone), &pad(&truncate(&badge.text, 8), 8)),
                None => pad("-", 8),
            };
            let focus = is_selected.then(|| effective_focus(card, state.focus));
            let row_cells = vec![
                pad(mark, 1),
                pad(&truncate(&card.vm_id, 6), 6),
                pad(&truncate(&card.name, 16), 16),
                pad(&truncate(card.node.as_deref().unwrap_or("-"), 8), 8),
                status_cell,
                pad(&format_percent(card.cpu_usage), 5),
                render_controls(card, focus),
            ];
            let base = row_cells.join(" │ ");
            let line = if is_selected {
                paint("48;5;236", &base)
            } else {
                base
            };
            write_line(out, &frame_content_line(&line, width))?;
        }
    }

    for _ in end.saturating_sub(start)..visible_rows {
        write_line(out, &frame_content_line(" ", width))?;
    }

    Ok(())
}

/// Visible controls as buttons; the focused one is inverted, busy ones spin.
fn render_controls(card: &VmCard, focus: Option<ControlKind>) -> String {
    let mut parts = Vec::new();
    for control in card.controls.iter().filter(|control| control.visible) {
        let text = match &control.content {
            ControlContent::Idle(label) => format!("[{label}]"),
            ControlContent::Busy(progress) => format!("[{} {progress}]", spinner_frame()),
        };
        let code = if control.disabled {
            "2;37"
        } else if Some(control.kind) == focus {
            "1;7"
        } else {
            match control.kind {
                ControlKind::Start => "1;32",
                ControlKind::Stop => "1;33",
                ControlKind::Delete => "1;31",
            }
        };
        parts.push(paint(code, &text));
    }
    parts.join(" ")
}

fn draw_details(
    out: &mut impl Write,
    snapshot: &BoardSnapshot,
    state: &DashboardState,
    width: usize,
) -> Result<()> {
    let Some(card) = snapshot.cards.get(state.selected) else {
        write_line(out, &frame_content_line(" No VM selected ", width))?;
        for _ in 0..3 {
            write_line(out, &frame_content_line(" ", width))?;
        }
        return Ok(());
    };

    let mut title = format!(
        " Selected: {} (vmid {}) on {} ",
        card.name,
        card.vm_id,
        card.node.as_deref().unwrap_or("-")
    );
    if let Some(resources) = &card.resources {
        title.push_str(&format!(
            "│ disk {} GB │ up {} ",
            format_percent(resources.disk_usage),
            format_uptime(resources.uptime)
        ));
    }
    write_line(out, &frame_content_line(&paint("1;37", &title), width))?;

    // Gauges need room for a readable bar; narrower frames skip them.
    let bar_width = width.saturating_sub(30).min(40);
    if bar_width >= 10 {
        for gauge in [
            UsageGauge::new(GaugeKind::Cpu, card.cpu_usage),
            UsageGauge::new(GaugeKind::Memory, card.memory_usage),
        ] {
            write_line(out, &frame_content_line(&render_gauge(&gauge, bar_width), width))?;
        }
    } else {
        write_line(out, &frame_content_line(" ", width))?;
        write_line(out, &frame_content_line(" ", width))?;
    }

    let focus = effective_focus(card, state.focus);
    let tip = format!(" Tip: {}", focus.tooltip());
    write_line(out, &frame_content_line(&paint("2;37", &tip), width))?;
    Ok(())
}

fn render_gauge(gauge: &UsageGauge, bar_width: usize) -> String {
    let (used, available) = gauge.cells(bar_width);
    let mut line = format!(
        " {:<3} {}{} {:>5.1}% ",
        gauge.kind.title(),
        paint(gauge.kind.used_color(), &"█".repeat(used)),
        paint(AVAILABLE_COLOR, &"░".repeat(available)),
        gauge.used
    );
    if gauge.show_legend {
        let legend: Vec<String> = SEGMENT_LABELS
            .iter()
            .zip(gauge.segments())
            .map(|(label, value)| format!("{label} {value:.1}%"))
            .collect();
        line.push_str(&legend.join(" · "));
    }
    line
}

fn draw_confirm(
    out: &mut impl Write,
    layout: ModalLayout,
    prompt: &ConfirmPrompt,
    name: &str,
) -> Result<()> {
    let x = layout.box_x;
    let y = layout.box_y;
    let inner = layout.box_width.saturating_sub(2) as usize;

    let top = format!("╔{}╗", "═".repeat(inner));
    let mid = format!("║{}║", " ".repeat(inner));
    let title = centered(&format!(" DELETE {name} "), inner);
    let bottom = format!("╚{}╝", "═".repeat(inner));
    let mut lines = wrap_words(prompt.prompt, inner.saturating_sub(2)).into_iter();

    execute!(out, cursor::MoveTo(x, y))?;
    write!(out, "{}", paint("1;31", &top))?;
    execute!(out, cursor::MoveTo(x, y + 1))?;
    write!(out, "{}", paint("1;31", &format!("║{}║", title)))?;
    execute!(out, cursor::MoveTo(x, y + 2))?;
    write!(out, "{}", paint("1;31", &mid))?;
    for row in 3..5 {
        let text = lines.next().unwrap_or_default();
        execute!(out, cursor::MoveTo(x, y + row))?;
        write!(out, "{}", paint("1;37", &format!("║{}║", centered(&text, inner))))?;
    }
    execute!(out, cursor::MoveTo(x, y + 5))?;
    write!(out, "{}", paint("1;31", &mid))?;

    execute!(out, cursor::MoveTo(x, layout.buttons_y))?;
    write!(out, "{}", paint("1;31", &mid))?;
    let yes = if prompt.selected == ConfirmChoice::Yes {
        paint("1;37;41", " Yes ")
    } else {
        paint("1;31", "[Yes]")
    };
    let no = if prompt.selected == ConfirmChoice::No {
        paint("1;30;47", " No ")
    } else {
        paint("1;37", "[No]")
    };
    execute!(out, cursor::MoveTo(layout.yes_x, layout.buttons_y))?;
    write!(out, "{yes}")?;
    execute!(out, cursor::MoveTo(layout.no_x, layout.buttons_y))?;
    write!(out, "{no}")?;
    execute!(
        out,
        cursor::MoveTo(x, y + layout.box_height.saturating_sub(1))
    )?;
    write!(out, "{}", paint("1;31", &bottom))?;
    Ok(())
}

const HELP_LINES: [&str; 10] = [
    "j/k or ↑/↓   select VM",
    "h/l or ←/→   focus action",
    "Enter        press focused action",
    "s / x / d    start / stop / delete",
    "c            close newest alert",
    "g            reload VM list",
    "n            cycle node filter",
    "?            toggle this help",
    "q            quit",
    "",
];

fn draw_help(out: &mut impl Write, width: usize, height: usize) -> Result<()> {
    let box_width = 40_usize.min(width.saturating_sub(2));
    let box_height = HELP_LINES.len() + 3;
    if height < box_height + 2 {
        return Ok(());
    }
    let inner = box_width.saturating_sub(2);
    let x = (width.saturating_sub(box_width) / 2) as u16;
    let y = (height.saturating_sub(box_height) / 2) as u16;

    execute!(out, cursor::MoveTo(x, y))?;
    write!(out, "{}", paint("1;34", &format!("╔{}╗", "═".repeat(inner))))?;
    execute!(out, cursor::MoveTo(x, y + 1))?;
    write!(
        out,
        "{}",
        paint("1;34", &format!("║{}║", centered(" KEYS ", inner)))
    )?;
    for (offset, line) in HELP_LINES.iter().enumerate() {
        execute!(out, cursor::MoveTo(x, y + 2 + offset as u16))?;
        write!(out, "{}", paint("1;34", &format!("║ {} ║", pad(line, inner - 2))))?;
    }
    execute!(out, cursor::MoveTo(x, y + 2 + HELP_LINES.len() as u16))?;
    write!(out, "{}", paint("1;34", &format!("╚{}╝", "═".repeat(inner))))?;
    Ok(())
}

fn wrap_words(text: &str, width: usize) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();
    for word in text.split_whitespace() {
        let needed = if current.is_empty() {
            word.chars().count()
        } else {
            current.chars().count() + 1 + word.chars().count()
        };
        if needed > width && !current.is_empty() {
            lines.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(word);
    }
    if !current.is_empty() {
        lines.push(current);
    }
    lines
}

fn centered(text: &str, width: usize) -> String {
    let len = text.chars().count();
    if len >= width {
        return text.chars().take(width).collect();
    }
    let left = (width - len) / 2;
    let right = width - len - left;
    format!("{}{}{}", " ".repeat(left), text, " ".repeat(right))
}

fn spinner_frame() -> &'static str {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_millis())
        .unwrap_or(0);
    SPINNER[(millis / 120) as usize % SPINNER.len()]
}

fn frame_line(left: &str, right: &str, width: usize, fill: char) -> String {
    format!(
        "{left}{}{right}",
        fill.to_string().repeat(width.saturating_sub(2))
    )
}

fn write_line(out: &mut impl Write, line: &str) -> Result<()> {
    out.write_all(line.as_bytes())?;
    out.write_all(b"\r\n")?;
    Ok(())
}

fn frame_content_line(content: &str, width: usize) -> String {
    let inner = width.saturating_sub(2);
    let visible = visible_len(content);
    let clipped = if visible > inner {
        truncate_visible_ansi(content, inner)
    } else {
        content.to_string()
    };
    let clipped_visible = visible_len(&clipped);
    let mut line = String::new();
    line.push('║');
    line.push_str(&clipped);
    if clipped_visible < inner {
        line.push_str(&" ".repeat(inner - clipped_visible));
    }
    line.push('║');
    line
}

fn visible_len(value: &str) -> usize {
    let mut len = 0usize;
    let mut iter = value.chars().peekable();
    while let Some(ch) = iter.next() {
        if ch == '\x1b' {
            if iter.peek() == Some(&'[') {
                let _ = iter.next();
                for next in iter.by_ref() {
                    if next.is_ascii_alphabetic() {
                        break;
                    }
                }
            }
            continue;
        }
        len += 1;
    }
    len
}

fn truncate_visible_ansi(value: &str, max_visible: usize) -> String {
    if max_visible == 0 {
        return String::new();
    }

    let mut out = String::new();
    let mut visible = 0usize;
    let mut saw_ansi = false;
    let mut iter = value.chars().peekable();

    while let Some(ch) = iter.next() {
        if ch == '\x1b' {
            saw_ansi = true;
            out.push(ch);
            if iter.peek() == Some(&'[') {
                out.push(iter.next().unwrap_or('['));
                for next in iter.by_ref() {
                    out.push(next);
                    if next.is_ascii_alphabetic() {
                        break;
                    }
                }
            }
            continue;
        }

        if visible >= max_visible {
            break;
        }

        out.push(ch);
        visible += 1;
        if visible >= max_visible {
            break;
        }
    }

    if saw_ansi {
        out.push_str("\x1b[0m");
    }

    out
}

fn truncate(value: &str, max_len: usize) -> String {
    let value_len = value.chars().count();
    if value_len <= max_len {
        return value.to_string();
    }
    if max_len <= 1 {
        return "…".to_string();
    }
    let mut output = String::new();
    for ch in value.chars().take(max_len - 1) {
        output.push(ch);
    }
    output.push('…');
    output
}

fn pad(value: &str, width: usize) -> String {
    let current = value.chars().count();
    if current >= width {
        value.to_string()
    } else {
        format!("{value}{}", " ".repeat(width - current))
    }
}

fn paint(code: &str, value: &str) -> String {
    format!("\x1b[{code}m{value}\x1b[0m")
}

fn wall_clock_hms() -> String {
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_secs())
        .unwrap_or(0);
    let h = (secs / 3600) % 24;
    let m = (secs / 60) % 60;
    let s = secs % 60;
    format!("{h:02}:{m:02}:{s:02}")
}
