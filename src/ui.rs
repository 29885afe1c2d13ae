use crate::{
    client::AppSnapshot,
    view::{
        APPROVAL_HINT,
        BET_AMOUNT_NOTICE,
        Controls,
    },
};
use color_eyre::eyre::{
    Result,
    eyre,
};
use crossterm::{
    event::{
        Event,
        EventStream,
        KeyCode,
        KeyEventKind,
        KeyModifiers,
    },
    terminal::{
        disable_raw_mode,
        enable_raw_mode,
    },
};
use ethers::utils::to_checksum;
use futures::StreamExt;
use ratatui::{
    prelude::*,
    widgets::*,
};
use std::io::stdout;

const MAX_BET_DIGITS: usize = 78;

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum UserEvent {
    Quit,
    Redraw,
    Connect { passphrase: String },
    ClaimToken,
    PlaceBet { number: String },
    StopGame,
    ClaimReward,
}

pub type InputEventReceiver = EventStream;

#[derive(Debug, Default)]
pub struct UiState {
    mode: Mode,
    terminal: Option<Terminal<CrosstermBackend<std::io::Stdout>>>,
    controls: Controls,
    connected: bool,
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
enum Mode {
    #[default]
    Normal,
    ConnectModal(PassphraseState),
    BetModal(BetState),
    QuitModal,
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
struct PassphraseState {
    input: String,
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
struct BetState {
    input: String,
}

pub fn terminal_enter(state: &mut UiState) -> Result<()> {
    enable_raw_mode()?;
    crossterm::execute!(
        std::io::stdout(),
        crossterm::terminal::EnterAlternateScreen,
        crossterm::event::EnableMouseCapture
    )?;
    // one persistent Terminal keeps buffers across draws
    let backend = CrosstermBackend::new(stdout());
    let terminal = Terminal::new(backend)?;
    state.terminal = Some(terminal);
    Ok(())
}

pub fn terminal_exit() -> Result<()> {
    disable_raw_mode()?;
    crossterm::execute!(
        std::io::stdout(),
        crossterm::event::DisableMouseCapture,
        crossterm::terminal::LeaveAlternateScreen
    )?;
    Ok(())
}

pub fn draw(state: &mut UiState, snap: &AppSnapshot) -> Result<()> {
    state.controls = snap.controls;
    state.connected = snap.view.account.is_some();
    // the bet form can disappear under an open modal, e.g. after a reset
    if matches!(state.mode, Mode::BetModal(_)) && !state.controls.bet_form {
        state.mode = Mode::Normal;
    }
    if let Some(mut term) = state.terminal.take() {
        term.draw(|f| ui(f, state, snap))?;
        state.terminal = Some(term);
    }
    Ok(())
}

pub fn input_event_stream() -> InputEventReceiver {
    EventStream::new()
}

pub async fn next_raw_event(events: &mut InputEventReceiver) -> Result<Event> {
    match events.next().await {
        Some(event) => Ok(event?),
        None => Err(eyre!("terminal input stream closed")),
    }
}

/// Maps a terminal event to a user action. Keys for controls that are not
/// on screen are ignored.
pub fn interpret_event(state: &mut UiState, event: Event) -> Option<UserEvent> {
    let Event::Key(k) = event else {
        return matches!(event, Event::Resize(_, _)).then_some(UserEvent::Redraw);
    };
    if k.kind != KeyEventKind::Press {
        return None;
    }
    // raw mode delivers ctrl-c as a key, not a signal
    if k.code == KeyCode::Char('c') && k.modifiers.contains(KeyModifiers::CONTROL) {
        return Some(UserEvent::Quit);
    }
    match &mut state.mode {
        Mode::ConnectModal(ps) => {
            return match k.code {
                KeyCode::Esc => {
                    state.mode = Mode::Normal;
                    Some(UserEvent::Redraw)
                }
                KeyCode::Enter => {
                    let passphrase = std::mem::take(&mut ps.input);
                    state.mode = Mode::Normal;
                    Some(UserEvent::Connect { passphrase })
                }
                KeyCode::Backspace => {
                    ps.input.pop();
                    Some(UserEvent::Redraw)
                }
                KeyCode::Char(c) => {
                    ps.input.push(c);
                    Some(UserEvent::Redraw)
                }
                _ => None,
            };
        }
        Mode::BetModal(bs) => {
            return match k.code {
                KeyCode::Esc => {
                    state.mode = Mode::Normal;
                    Some(UserEvent::Redraw)
                }
                KeyCode::Enter => {
                    let number = std::mem::take(&mut bs.input);
                    state.mode = Mode::Normal;
                    Some(UserEvent::PlaceBet { number })
                }
                KeyCode::Backspace => {
                    bs.input.pop();
                    Some(UserEvent::Redraw)
                }
                KeyCode::Char(c) if c.is_ascii_digit() && bs.input.len() < MAX_BET_DIGITS => {
                    bs.input.push(c);
                    Some(UserEvent::Redraw)
                }
                _ => None,
            };
        }
        Mode::QuitModal => {
            return match k.code {
                KeyCode::Char('y') | KeyCode::Char('Y') => Some(UserEvent::Quit),
                KeyCode::Char('n') | KeyCode::Char('N') | KeyCode::Esc => {
                    state.mode = Mode::Normal;
                    Some(UserEvent::Redraw)
                }
                _ => None,
            };
        }
        Mode::Normal => {}
    }
    let controls = state.controls;
    match k.code {
        KeyCode::Char('q') | KeyCode::Esc => {
            state.mode = Mode::QuitModal;
            Some(UserEvent::Redraw)
        }
        KeyCode::Char('w') if !state.connected => {
            state.mode = Mode::ConnectModal(PassphraseState::default());
            Some(UserEvent::Redraw)
        }
        KeyCode::Char('t') if controls.claim_token => Some(UserEvent::ClaimToken),
        KeyCode::Char('b') if controls.bet_form => {
            state.mode = Mode::BetModal(BetState::default());
            Some(UserEvent::Redraw)
        }
        KeyCode::Char('s') if controls.stop_game => Some(UserEvent::StopGame),
        KeyCode::Char('r') if controls.claim_reward => Some(UserEvent::ClaimReward),
        _ => None,
    }
}

fn ui(f: &mut Frame, state: &UiState, snap: &AppSnapshot) {
    // Clear the whole frame to avoid leftover fragments
    f.render_widget(Clear, f.area());
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(4), // connection
            Constraint::Length(3), // balance
            Constraint::Min(9),    // game
            Constraint::Length(4), // status
            Constraint::Length(4), // errors
            Constraint::Length(3), // help
        ])
        .split(f.area());

    draw_connection(f, chunks[0], snap);
    draw_balance(f, chunks[1], snap);
    draw_game(f, chunks[2], snap);
    draw_status(f, chunks[3], snap);
    draw_errors(f, chunks[4], snap);
    draw_help(f, chunks[5], snap);
    draw_modals(f, state);
}

fn draw_connection(f: &mut Frame, area: Rect, snap: &AppSnapshot) {
    let address = snap
        .view
        .account
        .map(|a| to_checksum(&a, None))
        .unwrap_or_default();
    let wallet = snap.wallet_name.as_deref().unwrap_or("none");
    let label_style = if snap.view.account.is_some() {
        Style::default().fg(Color::Green)
    } else {
        Style::default().fg(Color::Yellow)
    };
    let lines = vec![
        Line::from(vec![
            Span::styled(snap.view.connection_label.clone(), label_style),
            Span::raw(format!("  (wallet: {wallet})")),
        ]),
        Line::from(format!("Address: {address}")),
    ];
    let widget = Paragraph::new(lines).block(
        Block::default()
            .borders(Borders::ALL)
            .title("Connection"),
    );
    f.render_widget(widget, area);
}

fn draw_balance(f: &mut Frame, area: Rect, snap: &AppSnapshot) {
    let balance = snap.view.balance.clone().unwrap_or_default();
    let widget = Paragraph::new(format!("Balance: {balance}"))
        .block(Block::default().borders(Borders::ALL).title("Balance"));
    f.render_widget(widget, area);
}

fn draw_game(f: &mut Frame, area: Rect, snap: &AppSnapshot) {
    let view = &snap.view;
    let mut lines: Vec<Line> = Vec::new();
    if snap.controls.bet_form {
        lines.push(Line::styled(
            BET_AMOUNT_NOTICE,
            Style::default().add_modifier(Modifier::BOLD),
        ));
        let last = if view.bet_input.is_empty() {
            String::from("-")
        } else {
            view.bet_input.clone()
        };
        lines.push(Line::from(format!("Bet number: {last}  [b] to bet")));
        lines.push(Line::styled(
            APPROVAL_HINT,
            Style::default().fg(Color::DarkGray),
        ));
    }
    if snap.controls.claim_reward {
        lines.push(Line::from("[r] Claim reward"));
    }
    if snap.controls.stop_game {
        lines.push(Line::from("[s] Stop the game"));
    }
    if let Some(number) = view.bet_number_on_chain {
        lines.push(Line::styled(
            format!("You bet: {number}"),
            Style::default().fg(Color::Cyan),
        ));
    }
    if view.is_stopped {
        lines.push(Line::styled(
            "Game stopped!",
            Style::default()
                .fg(Color::Magenta)
                .add_modifier(Modifier::BOLD),
        ));
    }
    if let Some(reward) = view.reward {
        lines.push(Line::styled(
            format!("You claimed: {reward}"),
            Style::default().fg(Color::Green),
        ));
    }
    if lines.is_empty() {
        lines.push(Line::styled(
            "Connect a wallet to play",
            Style::default().fg(Color::DarkGray),
        ));
    }
    let widget = Paragraph::new(lines)
        .wrap(Wrap { trim: false })
        .block(Block::default().borders(Borders::ALL).title("Lottery"));
    f.render_widget(widget, area);
}

fn draw_status(f: &mut Frame, area: Rect, snap: &AppSnapshot) {
    let mut text = snap.view.status.clone();
    if !snap.in_flight.is_empty() {
        let pending: Vec<&str> = snap.in_flight.iter().map(|a| a.label()).collect();
        text.push_str(&format!(" | pending: {}", pending.join(", ")));
    }
    let widget = Paragraph::new(text)
        .wrap(Wrap { trim: false })
        .block(Block::default().borders(Borders::ALL).title("Status"))
        .style(Style::default().fg(Color::Green));
    f.render_widget(widget, area);
}

fn draw_errors(f: &mut Frame, area: Rect, snap: &AppSnapshot) {
    let text = snap.view.error_message.clone().unwrap_or_default();
    let widget = Paragraph::new(text)
        .wrap(Wrap { trim: false })
        .block(Block::default().borders(Borders::ALL).title("Errors"))
        .style(Style::default().fg(Color::Red));
    f.render_widget(widget, area);
}

fn help_text(snap: &AppSnapshot) -> String {
    let mut keys = Vec::new();
    if snap.view.account.is_none() {
        keys.push("w connect wallet");
    }
    if snap.controls.claim_token {
        keys.push("t claim token");
    }
    if snap.controls.bet_form {
        keys.push("b bet");
    }
    if snap.controls.stop_game {
        keys.push("s stop game");
    }
    if snap.controls.claim_reward {
        keys.push("r claim reward");
    }
    keys.push("q/Esc quit");
    keys.join(" | ")
}

fn draw_help(f: &mut Frame, area: Rect, snap: &AppSnapshot) {
    let help = Paragraph::new(help_text(snap))
        .block(Block::default().borders(Borders::ALL).title("Help"));
    f.render_widget(help, area);
}

fn draw_modals(f: &mut Frame, state: &UiState) {
    match &state.mode {
        Mode::ConnectModal(ps) => {
            let area = centered_rect(50, 20, f.area());
            let masked = "*".repeat(ps.input.chars().count());
            let body = Paragraph::new(vec![
                Line::from("Wallet passphrase:"),
                Line::from(masked),
                Line::styled(
                    "Enter to unlock, Esc to cancel",
                    Style::default().fg(Color::DarkGray),
                ),
            ])
            .block(
                Block::default()
                    .borders(Borders::ALL)
                    .title("Connect Wallet"),
            );
            f.render_widget(Clear, area);
            f.render_widget(body, area);
        }
        Mode::BetModal(bs) => {
            let area = centered_rect(40, 20, f.area());
            let body = Paragraph::new(vec![
                Line::from(BET_AMOUNT_NOTICE),
                Line::from(format!("Bet number: {}", bs.input)),
                Line::styled(
                    "Digits only, Enter to bet, Esc to cancel",
                    Style::default().fg(Color::DarkGray),
                ),
            ])
            .block(Block::default().borders(Borders::ALL).title("Place Bet"));
            f.render_widget(Clear, area);
            f.render_widget(body, area);
        }
        Mode::QuitModal => {
            let area = centered_rect(30, 15, f.area());
            let body = Paragraph::new("Quit? (y/n)")
                .block(Block::default().borders(Borders::ALL).title("Quit"));
            f.render_widget(Clear, area);
            f.render_widget(body, area);
        }
        Mode::Normal => {}
    }
}

fn centered_rect(w_percent: u16, h_percent: u16, r: Rect) -> Rect {
    let popup_layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - h_percent) / 2),
            Constraint::Percentage(h_percent),
            Constraint::Percentage((100 - h_percent) / 2),
        ])
        .split(r);

    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - w_percent) / 2),
            Constraint::Percentage(w_percent),
            Constraint::Percentage((100 - w_percent) / 2),
        ])
        .split(popup_layout[1])[1]
}
