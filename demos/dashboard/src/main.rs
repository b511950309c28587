//! Terminal dashboard over the agent feed.
//!
//! Run with: cargo run -p dashboard-demo
//! (start gateway-demo first, or point the env vars at a real gateway)
//!
//! Keys: 1-3 select and toggle an agent subscription, e triggers an
//! execution for the selected agent, c clears the feed, q quits.

use std::{collections::HashMap, io, sync::Arc, time::Duration};

use agent_feed_session::{ConnectionState, ExecutionOutcome, FeedConfig, FeedSession};
use crossterm::{
    event::{self, Event, KeyCode},
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use ratatui::{
    Frame, Terminal,
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout},
    style::{Color, Style},
    text::{Line, Span},
    widgets::{Block, Borders, List, ListItem, Paragraph},
};

const AGENTS: &[&str] = &["diagnostic_agent", "resolution_agent", "system_health_agent"];

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Setup terminal
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    // Run app
    let result = run_app(&mut terminal).await;

    // Restore terminal
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    result
}

async fn run_app(terminal: &mut Terminal<CrosstermBackend<io::Stdout>>) -> anyhow::Result<()> {
    let ws_url =
        std::env::var("GATEWAY_WS_URL").unwrap_or_else(|_| "ws://127.0.0.1:8504/ws".to_string());
    let api_url =
        std::env::var("GATEWAY_API_URL").unwrap_or_else(|_| "http://127.0.0.1:8504".to_string());

    let session = Arc::new(FeedSession::spawn(FeedConfig {
        ws_url,
        api_url,
        ..FeedConfig::default()
    }));
    session.connect();

    let (outcome_tx, mut outcome_rx) = tokio::sync::mpsc::unbounded_channel::<String>();
    let mut selected = 0usize;
    let mut status_line = String::from("waiting for gateway...");

    loop {
        // Pick up finished executions.
        while let Ok(line) = outcome_rx.try_recv() {
            status_line = line;
        }

        terminal.draw(|f| draw(f, &session, selected, &status_line))?;

        if event::poll(Duration::from_millis(100))? {
            if let Event::Key(key) = event::read()? {
                match key.code {
                    KeyCode::Char('q') => break,
                    KeyCode::Char('c') => session.clear_history(),
                    KeyCode::Char(c @ '1'..='3') => {
                        selected = (c as usize) - ('1' as usize);
                        let agent = AGENTS[selected];
                        if session.subscriptions().iter().any(|a| a == agent) {
                            session.unsubscribe(agent).await;
                        } else {
                            session.subscribe(agent).await;
                        }
                    }
                    KeyCode::Char('e') => {
                        let agent = AGENTS[selected].to_string();
                        status_line = format!("executing on {agent}...");
                        let session = Arc::clone(&session);
                        let outcome_tx = outcome_tx.clone();
                        tokio::spawn(async move {
                            let outcome = session
                                .execute(agent.clone(), "run a routine check", HashMap::new())
                                .await;
                            let line = match outcome {
                                ExecutionOutcome::Succeeded { payload } => {
                                    format!("{agent}: {}", payload["result"])
                                }
                                ExecutionOutcome::Failed { error } => {
                                    format!("{agent} failed: {error}")
                                }
                                ExecutionOutcome::TimedOut => format!("{agent}: timed out"),
                            };
                            let _ = outcome_tx.send(line);
                        });
                    }
                    _ => {}
                }
            }
        }
    }

    if let Ok(session) = Arc::try_unwrap(session) {
        session.close().await;
    }
    Ok(())
}

fn draw(f: &mut Frame, session: &FeedSession, selected: usize, status_line: &str) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Min(5),
            Constraint::Length(4),
        ])
        .split(f.area());

    // Connection header
    let (state_label, state_color) = match session.state() {
        ConnectionState::Connected => ("connected", Color::Green),
        ConnectionState::Connecting => ("connecting", Color::Yellow),
        ConnectionState::Reconnecting => ("reconnecting", Color::Yellow),
        ConnectionState::Disconnected => ("disconnected", Color::Red),
    };
    let subs = session.subscriptions().join(", ");
    let header = Paragraph::new(Line::from(vec![
        Span::styled(state_label, Style::default().fg(state_color)),
        Span::raw(format!("  subscribed: [{subs}]")),
        Span::raw(format!("  dropped frames: {}", session.dropped_frames())),
    ]))
    .block(Block::default().borders(Borders::ALL).title("Agent Feed"));
    f.render_widget(header, chunks[0]);

    // Event feed, newest at the bottom
    let visible = chunks[1].height.saturating_sub(2) as usize;
    let history = session.history();
    let items: Vec<ListItem> = history
        .iter()
        .rev()
        .take(visible)
        .rev()
        .map(|event| {
            let agent = event.agent_id.as_deref().unwrap_or("-");
            ListItem::new(format!(
                "#{:<5} {:?} {agent}: {}",
                event.seq, event.kind, event.payload
            ))
        })
        .collect();
    let feed = List::new(items).block(Block::default().borders(Borders::ALL).title("Events"));
    f.render_widget(feed, chunks[1]);

    // Agent selection + keys
    let agent_line = AGENTS
        .iter()
        .enumerate()
        .map(|(i, a)| {
            if i == selected {
                format!("[{a}]")
            } else {
                (*a).to_string()
            }
        })
        .collect::<Vec<_>>()
        .join("  ");
    let footer = Paragraph::new(vec![
        Line::from(format!("agents: {agent_line}")),
        Line::from(format!(
            "1-3 toggle subscription  e execute  c clear  q quit   {status_line}"
        )),
    ])
    .block(Block::default().borders(Borders::ALL));
    f.render_widget(footer, chunks[2]);
}
