use console::{Term, style, truncate_str};
use futures_util::{Stream, StreamExt};
use std::collections::VecDeque;
use std::future::Future;

use crate::constants::{MAX_LOG_LINES, SPINNER_TICK};
use crate::progress::{ProgressEvent, ProgressReceiver};

const SPINNER_FRAMES: [&str; 10] = ["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"];
const BAR_WIDTH: usize = 40;

/// How the presentation loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenterExit {
    Finished,
    Interrupted,
    /// A second interrupt arrived while tearing down
    Forced,
}

/// Display model; pure so it can be driven without a terminal
#[derive(Debug, Default, Clone)]
pub struct PresenterState {
    pub status: String,
    pub progress: Option<f64>,
    pub log_lines: VecDeque<String>,
    frame: usize,
}

impl PresenterState {
    /// Apply one event; returns false once the orchestration is done
    pub fn apply(&mut self, event: ProgressEvent) -> bool {
        match event {
            ProgressEvent::Status(status) => self.status = status,
            ProgressEvent::Progress(percent) => {
                self.progress = percent.map(|p| p.clamp(0.0, 1.0));
            }
            ProgressEvent::LogLine(Some(line)) => {
                self.log_lines.push_back(line);
                while self.log_lines.len() > MAX_LOG_LINES {
                    self.log_lines.pop_front();
                }
            }
            ProgressEvent::LogLine(None) => self.log_lines.clear(),
            ProgressEvent::Done => return false,
        }
        true
    }

    pub fn tick(&mut self) {
        self.frame = (self.frame + 1) % SPINNER_FRAMES.len();
    }

    /// Lines to draw, each truncated to `width` columns
    pub fn render(&self, width: usize) -> Vec<String> {
        let mut lines = vec![format!(
            "{} {}",
            style(SPINNER_FRAMES[self.frame]).magenta(),
            self.status
        )];

        if let Some(percent) = self.progress {
            let filled = (percent * BAR_WIDTH as f64).round() as usize;
            lines.push(String::new());
            lines.push(format!(
                "{}{} {:>3.0}%",
                style("█".repeat(filled)).green(),
                style("░".repeat(BAR_WIDTH - filled)).dim(),
                percent * 100.0
            ));
        }

        if !self.log_lines.is_empty() {
            lines.push(String::new());
            lines.extend(self.log_lines.iter().map(|l| style(l).dim().to_string()));
        }

        lines
            .into_iter()
            .map(|line| truncate_str(&line, width, "…").into_owned())
            .collect()
    }
}

/// Interactive display running alongside the orchestration
pub struct Presenter {
    term: Term,
    state: PresenterState,
    drawn: usize,
}

impl Default for Presenter {
    fn default() -> Self {
        Self::new()
    }
}

impl Presenter {
    pub fn new() -> Self {
        Self {
            term: Term::stderr(),
            state: PresenterState::default(),
            drawn: 0,
        }
    }

    /// Drive the display until `Done` arrives or the first interrupt.
    ///
    /// On interrupt, `on_interrupt` runs to completion before this returns,
    /// unless another interrupt arrives first. An ended `interrupts` stream
    /// never interrupts.
    pub async fn run<S, C, F>(
        mut self,
        mut events: ProgressReceiver,
        interrupts: S,
        on_interrupt: C,
    ) -> PresenterExit
    where
        S: Stream<Item = ()>,
        C: FnOnce() -> F,
        F: Future<Output = ()>,
    {
        let interrupts = interrupts.fuse();
        tokio::pin!(interrupts);
        let mut ticker = tokio::time::interval(SPINNER_TICK);

        let exit = loop {
            tokio::select! {
                biased;
                Some(()) = interrupts.next() => {
                    self.state.status =
                        "Aborting, removing containers... (Ctrl-C again to quit now)".to_string();
                    self.redraw();
                    let teardown = on_interrupt();
                    tokio::pin!(teardown);
                    break tokio::select! {
                        () = &mut teardown => PresenterExit::Interrupted,
                        Some(()) = interrupts.next() => PresenterExit::Forced,
                    };
                }
                event = events.recv() => {
                    let keep_going = match event {
                        Some(event) => self.apply(event),
                        None => false,
                    };
                    if !keep_going {
                        break PresenterExit::Finished;
                    }
                }
                _ = ticker.tick() => {
                    self.state.tick();
                    self.redraw();
                }
            }
        };

        self.clear();
        exit
    }

    fn apply(&mut self, event: ProgressEvent) -> bool {
        let attended = self.term.is_term();
        if !attended && let ProgressEvent::Status(status) = &event {
            // Without a terminal only status changes are worth printing
            let _ = self.term.write_line(status);
        }
        let keep_going = self.state.apply(event);
        self.redraw();
        keep_going
    }

    fn redraw(&mut self) {
        if !self.term.is_term() {
            return;
        }
        let width = self.term.size().1 as usize;
        let lines = self.state.render(width.max(1));
        self.clear();
        for line in &lines {
            let _ = self.term.write_line(line);
        }
        self.drawn = lines.len();
    }

    fn clear(&mut self) {
        if self.drawn > 0 {
            let _ = self.term.clear_last_lines(self.drawn);
            self.drawn = 0;
        }
    }
}
