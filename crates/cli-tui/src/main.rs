use anyhow::{Context, Result};
use clap::Parser;
use crossterm::event::{self, Event, KeyCode, KeyEventKind};
use humansize::{format_size, DECIMAL};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout},
    style::{Color, Modifier, Style},
    widgets::{Block, Borders, Gauge, Paragraph, Row, Table, TableState},
    Frame, Terminal,
};
use std::io::stdout;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use watcher::{config::WatcherConfig, JobRecord, JobStatus, StatusSnapshot};

/// Terminal dashboard over the watcher's status snapshot
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file (JSON or TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Status snapshot to display (overrides the config value)
    #[arg(short, long)]
    status_file: Option<PathBuf>,
}

struct App {
    snapshot: Option<StatusSnapshot>,
    table_state: TableState,
    should_quit: bool,
    status_path: PathBuf,
}

impl App {
    fn new(status_path: PathBuf) -> Self {
        Self {
            snapshot: None,
            table_state: TableState::default(),
            should_quit: false,
            status_path,
        }
    }

    fn refresh(&mut self) {
        // Errors leave the previous view in place; the daemon may simply
        // not have written a snapshot yet
        if let Ok(snapshot) = StatusSnapshot::load(&self.status_path) {
            self.snapshot = Some(snapshot);
        }
        let rows = self.row_count();
        if rows == 0 {
            self.table_state.select(None);
        } else if self.table_state.selected().map_or(true, |s| s >= rows) {
            self.table_state.select(Some(0));
        }
    }

    fn row_count(&self) -> usize {
        self.snapshot.as_ref().map_or(0, |s| s.recent.len())
    }

    fn selected_job(&self) -> Option<&JobRecord> {
        let index = self.table_state.selected()?;
        self.snapshot.as_ref()?.recent.get(index)
    }

    fn select_next(&mut self) {
        let rows = self.row_count();
        if rows == 0 {
            return;
        }
        let next = match self.table_state.selected() {
            Some(i) if i + 1 < rows => i + 1,
            _ => 0,
        };
        self.table_state.select(Some(next));
    }

    fn select_previous(&mut self) {
        let rows = self.row_count();
        if rows == 0 {
            return;
        }
        let previous = match self.table_state.selected() {
            Some(0) | None => rows - 1,
            Some(i) => i - 1,
        };
        self.table_state.select(Some(previous));
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Same default location the daemon uses
    let default_config_path = PathBuf::from("/etc/transcode-watcher/config.json");
    let config_path = if let Some(ref path) = args.config {
        Some(path.as_path())
    } else if default_config_path.exists() {
        Some(default_config_path.as_path())
    } else {
        None
    };

    let cfg = WatcherConfig::load_config(config_path).context("Failed to load configuration")?;
    let status_path = args.status_file.unwrap_or(cfg.status_file);

    crossterm::terminal::enable_raw_mode()?;
    let mut out = stdout();
    crossterm::execute!(out, crossterm::terminal::EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(out);
    let mut terminal = Terminal::new(backend)?;

    let mut app = App::new(status_path);
    let result = run(&mut terminal, &mut app);

    crossterm::terminal::disable_raw_mode()?;
    crossterm::execute!(
        terminal.backend_mut(),
        crossterm::terminal::LeaveAlternateScreen
    )?;
    terminal.show_cursor()?;

    result
}

fn run(terminal: &mut Terminal<CrosstermBackend<std::io::Stdout>>, app: &mut App) -> Result<()> {
    let refresh_interval = Duration::from_secs(1);
    app.refresh();
    let mut last_refresh = Instant::now();

    loop {
        if last_refresh.elapsed() >= refresh_interval {
            app.refresh();
            last_refresh = Instant::now();
        }

        terminal.draw(|frame| draw(frame, app))?;

        if event::poll(Duration::from_millis(250))? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    match key.code {
                        KeyCode::Char('q') | KeyCode::Esc => app.should_quit = true,
                        KeyCode::Char('r') => app.refresh(),
                        KeyCode::Down | KeyCode::Char('j') => app.select_next(),
                        KeyCode::Up | KeyCode::Char('k') => app.select_previous(),
                        _ => {}
                    }
                }
            }
        }

        if app.should_quit {
            return Ok(());
        }
    }
}

fn draw(frame: &mut Frame, app: &mut App) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Min(5),
            Constraint::Length(3),
            Constraint::Length(1),
        ])
        .split(frame.size());

    let header = match &app.snapshot {
        Some(snapshot) => format!(
            "queued {}  started {}  completed {}  failed {}   as of {}",
            snapshot.counts.queued,
            snapshot.counts.started,
            snapshot.counts.completed,
            snapshot.counts.failed,
            snapshot.generated_at.format("%H:%M:%S"),
        ),
        None => format!("waiting for snapshot: {}", app.status_path.display()),
    };
    frame.render_widget(
        Paragraph::new(header).block(Block::default().borders(Borders::ALL).title("Jobs")),
        chunks[0],
    );

    let rows: Vec<Row> = app
        .snapshot
        .as_ref()
        .map(|snapshot| snapshot.recent.iter().map(job_row).collect())
        .unwrap_or_default();

    let table = Table::new(
        rows,
        [
            Constraint::Length(18),
            Constraint::Min(20),
            Constraint::Length(10),
            Constraint::Length(6),
            Constraint::Length(20),
            Constraint::Length(10),
        ],
    )
    .header(
        Row::new(["ID", "SOURCE", "STATUS", "PROG", "QUEUED", "SIZE"])
            .style(Style::default().add_modifier(Modifier::BOLD)),
    )
    .highlight_style(Style::default().add_modifier(Modifier::REVERSED))
    .block(Block::default().borders(Borders::ALL).title("Recent"));
    frame.render_stateful_widget(table, chunks[1], &mut app.table_state);

    let (label, ratio) = match app.selected_job() {
        Some(job) => (
            format!("{} {}%", job.source_name, job.progress),
            f64::from(job.progress.min(100)) / 100.0,
        ),
        None => ("no job selected".to_string(), 0.0),
    };
    frame.render_widget(
        Gauge::default()
            .block(Block::default().borders(Borders::ALL).title("Progress"))
            .gauge_style(Style::default().fg(Color::Green))
            .label(label)
            .ratio(ratio),
        chunks[2],
    );

    frame.render_widget(
        Paragraph::new("q quit  r refresh  j/k select").style(Style::default().fg(Color::DarkGray)),
        chunks[3],
    );
}

fn job_row(job: &JobRecord) -> Row<'_> {
    let status_style = match job.status {
        JobStatus::Queued => Style::default().fg(Color::Yellow),
        JobStatus::Started => Style::default().fg(Color::Cyan),
        JobStatus::Completed => Style::default().fg(Color::Green),
        JobStatus::Failed => Style::default().fg(Color::Red),
    };
    let queued = job
        .queued_at
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "-".to_string());
    let size = job
        .file_size
        .map(|s| format_size(s, DECIMAL))
        .unwrap_or_else(|| "-".to_string());

    Row::new(vec![
        ratatui::text::Text::raw(job.id.clone()),
        ratatui::text::Text::raw(job.source_name.clone()),
        ratatui::text::Text::styled(format!("{:?}", job.status), status_style),
        ratatui::text::Text::raw(format!("{}%", job.progress)),
        ratatui::text::Text::raw(queued),
        ratatui::text::Text::raw(size),
    ])
}
