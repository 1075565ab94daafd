use anyhow::Result;
use course_ledger::{
    format_display_date, render_notice, CourseRecord, GuardianSummary, NoticeLanguage,
    PaymentDetails,
};
use crossterm::{
    event::{self, Event, KeyCode, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Cell, Paragraph, Row, Table, TableState, Wrap},
    Frame, Terminal,
};
use std::io;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Page {
    Records,
    Guardians,
}

impl Page {
    pub fn next(&self) -> Self {
        match self {
            Page::Records => Page::Guardians,
            Page::Guardians => Page::Records,
        }
    }

    pub fn title(&self) -> &str {
        match self {
            Page::Records => "Course Records",
            Page::Guardians => "Guardians",
        }
    }
}

pub struct App {
    pub records: Vec<CourseRecord>,
    pub summaries: Vec<GuardianSummary>,
    pub state: TableState,
    pub guardian_state: TableState,
    pub current_page: Page,
    pub show_detail: bool,
    pub language: NoticeLanguage,
    pub payment: PaymentDetails,
}

impl App {
    pub fn new(
        records: Vec<CourseRecord>,
        summaries: Vec<GuardianSummary>,
        payment: PaymentDetails,
    ) -> Self {
        let mut state = TableState::default();
        if !records.is_empty() {
            state.select(Some(0));
        }
        let mut guardian_state = TableState::default();
        if !summaries.is_empty() {
            guardian_state.select(Some(0));
        }

        Self {
            records,
            summaries,
            state,
            guardian_state,
            current_page: Page::Records,
            show_detail: false,
            language: NoticeLanguage::English,
            payment,
        }
    }

    pub fn toggle_detail(&mut self) {
        self.show_detail = !self.show_detail;
    }

    pub fn next_page(&mut self) {
        self.current_page = self.current_page.next();
    }

    pub fn cycle_language(&mut self) {
        self.language = match self.language {
            NoticeLanguage::English => NoticeLanguage::SimplifiedChinese,
            NoticeLanguage::SimplifiedChinese => NoticeLanguage::TraditionalChinese,
            NoticeLanguage::TraditionalChinese => NoticeLanguage::English,
        };
    }

    pub fn selected_record(&self) -> Option<&CourseRecord> {
        self.state.selected().and_then(|i| self.records.get(i))
    }

    pub fn selected_summary(&self) -> Option<&GuardianSummary> {
        self.guardian_state.selected().and_then(|i| self.summaries.get(i))
    }

    fn active(&mut self) -> (&mut TableState, usize) {
        match self.current_page {
            Page::Records => (&mut self.state, self.records.len()),
            Page::Guardians => (&mut self.guardian_state, self.summaries.len()),
        }
    }

    pub fn next(&mut self) {
        let (state, len) = self.active();
        if len == 0 {
            return;
        }
        let i = match state.selected() {
            Some(i) if i + 1 < len => i + 1,
            _ => 0,
        };
        state.select(Some(i));
    }

    pub fn previous(&mut self) {
        let (state, len) = self.active();
        if len == 0 {
            return;
        }
        let i = match state.selected() {
            Some(0) | None => len - 1,
            Some(i) => i - 1,
        };
        state.select(Some(i));
    }

    pub fn page_down(&mut self) {
        let (state, len) = self.active();
        if len == 0 {
            return;
        }
        let i = state.selected().map(|i| (i + 20).min(len - 1)).unwrap_or(0);
        state.select(Some(i));
    }

    pub fn page_up(&mut self) {
        let (state, _) = self.active();
        let i = state.selected().map(|i| i.saturating_sub(20)).unwrap_or(0);
        state.select(Some(i));
    }

    pub fn totals(&self) -> (f64, f64) {
        let hours = self.records.iter().map(|r| r.hours).sum();
        let fee = self.records.iter().map(CourseRecord::total_fee).sum();
        (hours, fee)
    }
}

pub fn run_ui(app: &mut App) -> Result<()> {
    // Setup terminal
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let res = run_app(&mut terminal, app);

    // Restore terminal
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    res?;
    Ok(())
}

fn run_app<B: ratatui::backend::Backend>(
    terminal: &mut Terminal<B>,
    app: &mut App,
) -> io::Result<()> {
    loop {
        terminal.draw(|f| ui(f, app))?;

        if let Event::Key(key) = event::read()? {
            match key.code {
                KeyCode::Char('q') | KeyCode::Esc => return Ok(()),
                KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => return Ok(()),
                KeyCode::Enter => app.toggle_detail(),
                KeyCode::Tab | KeyCode::BackTab => app.next_page(),
                KeyCode::Char('l') => app.cycle_language(),
                KeyCode::Down | KeyCode::Char('j') => app.next(),
                KeyCode::Up | KeyCode::Char('k') => app.previous(),
                KeyCode::PageDown => app.page_down(),
                KeyCode::PageUp => app.page_up(),
                _ => {}
            }
        }
    }
}

fn ui(f: &mut Frame, app: &mut App) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3), // Header with navigation
            Constraint::Min(0),    // Content area
            Constraint::Length(3), // Status bar
        ])
        .split(f.size());

    render_header(f, chunks[0], app);

    if app.show_detail {
        let content_chunks = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Percentage(55), Constraint::Percentage(45)])
            .split(chunks[1]);

        match app.current_page {
            Page::Records => {
                render_records(f, content_chunks[0], app);
                render_record_detail(f, content_chunks[1], app);
            }
            Page::Guardians => {
                render_guardians(f, content_chunks[0], app);
                render_notice_preview(f, content_chunks[1], app);
            }
        }
    } else {
        match app.current_page {
            Page::Records => render_records(f, chunks[1], app),
            Page::Guardians => render_guardians(f, chunks[1], app),
        }
    }

    render_status_bar(f, chunks[2], app);
}

fn render_header(f: &mut Frame, area: Rect, app: &App) {
    let (hours, fee) = app.totals();

    let mut tab_spans = vec![];
    for (i, page) in [Page::Records, Page::Guardians].iter().enumerate() {
        if i > 0 {
            tab_spans.push(Span::raw(" │ "));
        }
        let style = if *page == app.current_page {
            Style::default()
                .fg(Color::Yellow)
                .add_modifier(Modifier::BOLD | Modifier::UNDERLINED)
        } else {
            Style::default().fg(Color::DarkGray)
        };
        tab_spans.push(Span::styled(page.title().to_string(), style));
    }

    tab_spans.push(Span::raw("  |  "));
    tab_spans.push(Span::styled(
        format!("Lessons: {}", app.records.len()),
        Style::default().fg(Color::White),
    ));
    tab_spans.push(Span::raw("  |  "));
    tab_spans.push(Span::styled(
        format!("{:.1} h", hours),
        Style::default().fg(Color::Cyan),
    ));
    tab_spans.push(Span::raw("  "));
    tab_spans.push(Span::styled(
        format!("{} {:.2}", app.payment.currency, fee),
        Style::default().fg(Color::Green),
    ));

    let header = Paragraph::new(vec![Line::from(tab_spans)])
        .block(Block::default().borders(Borders::ALL).border_style(Style::default().fg(Color::Cyan)));

    f.render_widget(header, area);
}

fn header_row(titles: &[&'static str]) -> Row<'static> {
    let cells = titles.iter().map(|h| {
        Cell::from(*h).style(Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD))
    });
    Row::new(cells).style(Style::default().bg(Color::DarkGray)).height(1)
}

fn render_records(f: &mut Frame, area: Rect, app: &mut App) {
    let rows = app.records.iter().map(|r| {
        let status_color = if r.status.contains("Graduated") {
            Color::DarkGray
        } else {
            Color::Green
        };
        Row::new(vec![
            Cell::from(format_display_date(r.date)),
            Cell::from(truncate(&r.name, 16)),
            Cell::from(truncate(&r.guardian, 16)),
            Cell::from(format!("{:.2}", r.hours)),
            Cell::from(format!("{:.2}", r.fee_per_hour)),
            Cell::from(format!("{:.2}", r.total_fee())).style(Style::default().fg(Color::Green)),
            Cell::from(r.status.clone()).style(Style::default().fg(status_color)),
            Cell::from(truncate(&r.title, 30)),
        ])
        .height(1)
    });

    let table = Table::new(
        rows,
        [
            Constraint::Length(12),
            Constraint::Length(18),
            Constraint::Length(18),
            Constraint::Length(7),
            Constraint::Length(8),
            Constraint::Length(10),
            Constraint::Length(12),
            Constraint::Min(10),
        ],
    )
    .header(header_row(&["Date", "Name", "Guardian", "Hours", "Rate", "Fee", "Status", "Title"]))
    .block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::White))
            .title(" Course Records "),
    )
    .highlight_style(Style::default().bg(Color::DarkGray).add_modifier(Modifier::BOLD))
    .highlight_symbol("→ ");

    f.render_stateful_widget(table, area, &mut app.state);
}

fn render_guardians(f: &mut Frame, area: Rect, app: &mut App) {
    let rows = app.summaries.iter().map(|s| {
        Row::new(vec![
            Cell::from(truncate(&s.guardian, 18)),
            Cell::from(truncate(&s.students.join(", "), 24)),
            Cell::from(s.records.len().to_string()),
            Cell::from(format!("{:.1}", s.total_hours)),
            Cell::from(format!("{:.2}", s.total_fee)).style(Style::default().fg(Color::Green)),
            Cell::from(format!(
                "{} – {}",
                format_display_date(s.first_date),
                format_display_date(s.last_date)
            )),
        ])
        .height(1)
    });

    let table = Table::new(
        rows,
        [
            Constraint::Length(20),
            Constraint::Length(26),
            Constraint::Length(8),
            Constraint::Length(8),
            Constraint::Length(12),
            Constraint::Min(25),
        ],
    )
    .header(header_row(&["Guardian", "Students", "Lessons", "Hours", "Total", "Period"]))
    .block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::White))
            .title(" Guardian Summaries "),
    )
    .highlight_style(Style::default().bg(Color::DarkGray).add_modifier(Modifier::BOLD))
    .highlight_symbol("→ ");

    f.render_stateful_widget(table, area, &mut app.guardian_state);
}

fn detail_line(label: &str, value: String) -> Line<'static> {
    Line::from(vec![
        Span::styled(format!("{:<12}", label), Style::default().fg(Color::Yellow)),
        Span::raw(value),
    ])
}

fn render_record_detail(f: &mut Frame, area: Rect, app: &App) {
    let lines = match app.selected_record() {
        Some(r) => vec![
            detail_line("Name", r.name.clone()),
            detail_line("Guardian", r.guardian.clone()),
            detail_line("Group", r.group_id.to_string()),
            detail_line("Status", r.status.clone()),
            detail_line("Title", r.title.clone()),
            detail_line("Start", r.start.format("%d/%m/%Y %H:%M").to_string()),
            detail_line("End", r.end.format("%d/%m/%Y %H:%M").to_string()),
            detail_line("Duration", r.duration.clone()),
            detail_line("Hours", format!("{:.2}", r.hours)),
            detail_line("Rate", format!("{:.2}", r.fee_per_hour)),
            detail_line("Fee", format!("{:.2}", r.total_fee())),
            detail_line("Updated", r.updated_at.format("%Y-%m-%d %H:%M").to_string()),
            detail_line("ID", r.id.clone()),
        ],
        None => vec![Line::from("No record selected")],
    };

    let panel = Paragraph::new(lines)
        .wrap(Wrap { trim: false })
        .block(Block::default().borders(Borders::ALL).title(" Details "));
    f.render_widget(panel, area);
}

fn render_notice_preview(f: &mut Frame, area: Rect, app: &App) {
    let text = app
        .selected_summary()
        .and_then(|s| render_notice(s, app.language, &app.payment))
        .unwrap_or_else(|| "No guardian selected".to_string());

    let panel = Paragraph::new(text).wrap(Wrap { trim: false }).block(
        Block::default()
            .borders(Borders::ALL)
            .title(format!(" Notice ({}) ", app.language.code())),
    );
    f.render_widget(panel, area);
}

fn render_status_bar(f: &mut Frame, area: Rect, app: &App) {
    let (selected, total) = match app.current_page {
        Page::Records => (app.state.selected(), app.records.len()),
        Page::Guardians => (app.guardian_state.selected(), app.summaries.len()),
    };
    let selected = selected.map(|i| i + 1).unwrap_or(0);

    let key = |k: &'static str| Span::styled(k, Style::default().fg(Color::Yellow));
    let status_spans = vec![
        Span::styled(format!(" Row: {}/{} ", selected, total), Style::default().fg(Color::Cyan)),
        Span::raw(" | "),
        key("Enter"),
        Span::raw(" Details | "),
        key("Tab"),
        Span::raw(" Page | "),
        key("l"),
        Span::raw(" Language | "),
        key("j/k"),
        Span::raw(" Nav | "),
        Span::styled("q", Style::default().fg(Color::Red)),
        Span::raw(" Quit"),
    ];

    let status_bar = Paragraph::new(vec![Line::from(status_spans)]).block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::White)),
    );

    f.render_widget(status_bar, area);
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let head: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", head)
    }
}
