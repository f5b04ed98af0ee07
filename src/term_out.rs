use std::io::Write as _;
use std::sync::mpsc;
use std::time::{Duration, Instant};

pub(crate) fn init(start: Instant, enable_progress: bool) -> Handle {
    let (sender, receiver) = mpsc::channel();

    let join_handle = std::thread::Builder::new()
        .name("term out".into())
        .spawn(move || {
            let mut status = StatusLine {
                start,
                enabled: enable_progress,
                current: None,
                last_draw: start,
                dirty: false,
                stderr: std::io::stderr(),
            };
            status.run(&receiver);
        })
        .expect("failed to spawn thread");

    Handle {
        join_handle,
        sender,
    }
}

const UPDATE_PERIOD: Duration = Duration::from_millis(50);

/// The progress line at the bottom of stderr. Log lines are printed above
/// it.
struct StatusLine {
    start: Instant,
    enabled: bool,
    current: Option<String>,
    last_draw: Instant,
    /// `current` changed since it was last drawn.
    dirty: bool,
    stderr: std::io::Stderr,
}

impl StatusLine {
    fn run(&mut self, receiver: &mpsc::Receiver<Command>) {
        loop {
            let cmd = match self.timeout() {
                None => receiver.recv().map_err(mpsc::RecvTimeoutError::from),
                Some(timeout) if timeout.is_zero() => Err(mpsc::RecvTimeoutError::Timeout),
                Some(timeout) => receiver.recv_timeout(timeout),
            };

            match cmd {
                Ok(Command::Finish) | Err(mpsc::RecvTimeoutError::Disconnected) => {
                    self.end_line();
                    break;
                }
                Ok(Command::PrintRawLine(line)) => self.print_above(&line),
                Ok(Command::SetProgress(progress)) => {
                    if self.enabled {
                        self.current = Some(progress);
                        self.dirty = true;
                        if self.last_draw.elapsed() >= UPDATE_PERIOD {
                            self.draw();
                        }
                    }
                }
                Ok(Command::FreezeProgress) => self.end_line(),
                Err(mpsc::RecvTimeoutError::Timeout) => self.draw(),
            }
        }
    }

    /// Pending updates are throttled; otherwise the clock is redrawn every
    /// second.
    fn timeout(&self) -> Option<Duration> {
        self.current.as_ref()?;
        if self.dirty {
            Some(UPDATE_PERIOD.saturating_sub(self.last_draw.elapsed()))
        } else {
            Some(duration_to_next_second(self.start.elapsed()))
        }
    }

    fn render(&self) -> Option<String> {
        let line = self.current.as_deref()?;
        let elapsed = self.start.elapsed().as_secs();
        let secs = elapsed % 60;
        let mins = (elapsed / 60) % 60;
        let hours = elapsed / 3600;

        Some(format!("[{hours:02}:{mins:02}:{secs:02}] {line}"))
    }

    fn draw(&mut self) {
        if let Some(line) = self.render() {
            handle_err(crossterm::queue!(
                self.stderr,
                crossterm::cursor::MoveToColumn(0),
                crossterm::style::Print(line),
                crossterm::terminal::Clear(crossterm::terminal::ClearType::UntilNewLine),
            ));
            handle_err(self.stderr.flush());
        }
        self.last_draw = Instant::now();
        self.dirty = false;
    }

    /// Leaves the last progress on its own line, so that whatever is
    /// printed next (prompts, dry-run commands) starts on a clean one.
    fn end_line(&mut self) {
        if self.current.is_none() {
            return;
        }
        if self.dirty {
            self.draw();
        }
        handle_err(crossterm::queue!(
            self.stderr,
            crossterm::style::Print('\n'),
            crossterm::cursor::MoveToColumn(0),
        ));
        handle_err(self.stderr.flush());
        self.current = None;
    }

    fn print_above(&mut self, line: &[u8]) {
        if self.current.is_some() {
            handle_err(crossterm::queue!(
                self.stderr,
                crossterm::terminal::Clear(crossterm::terminal::ClearType::CurrentLine),
                crossterm::cursor::MoveToColumn(0),
            ));
            handle_err(self.stderr.write_all(line));
            self.draw();
        } else {
            handle_err(self.stderr.write_all(line));
            handle_err(self.stderr.flush());
        }
    }
}

fn handle_err<T>(r: std::io::Result<T>) -> T {
    r.expect("stderr write failed")
}

fn duration_to_next_second(duration: Duration) -> Duration {
    let subsec_nanos = duration.subsec_nanos();
    if subsec_nanos == 0 {
        Duration::ZERO
    } else {
        Duration::from_nanos((1_000_000_000 - subsec_nanos).into())
    }
}

enum Command {
    Finish,
    PrintRawLine(Vec<u8>),
    SetProgress(String),
    FreezeProgress,
}

pub(crate) struct Handle {
    join_handle: std::thread::JoinHandle<()>,
    sender: mpsc::Sender<Command>,
}

impl Handle {
    pub(crate) fn finish(self) {
        self.sender
            .send(Command::Finish)
            .expect("term out endpoint closed");
        self.join_handle.join().expect("term out thread panicked");
    }

    pub(crate) fn get_progress_print(&self) -> ProgressPrint {
        ProgressPrint {
            sender: self.sender.clone(),
        }
    }
}

/// Cheap to clone handle to the terminal output thread.
#[derive(Clone)]
pub(crate) struct ProgressPrint {
    sender: mpsc::Sender<Command>,
}

impl ProgressPrint {
    pub(crate) fn set_progress(&self, progress: String) {
        self.send(Command::SetProgress(progress));
    }

    /// Ends the progress line. Call before writing to stdout or reading
    /// from stdin.
    pub(crate) fn freeze_progress(&self) {
        self.send(Command::FreezeProgress);
    }

    pub(crate) fn print_raw_line(&self, line: Vec<u8>) {
        self.send(Command::PrintRawLine(line));
    }

    fn send(&self, cmd: Command) {
        self.sender.send(cmd).expect("term out endpoint closed");
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::duration_to_next_second;

    #[test]
    fn test_duration_to_next_second() {
        assert_eq!(duration_to_next_second(Duration::from_secs(3)), Duration::ZERO);
        assert_eq!(
            duration_to_next_second(Duration::from_millis(2250)),
            Duration::from_millis(750),
        );
    }
}
