//! Live terminal view of in-flight files.
//!
//! Read-only consumer of the status registry. Repaints on stderr only when the
//! snapshot changes, so log output on stdout is not drowned. Each frame is
//! drawn over the previous one instead of scrolling.

use camtransfer_core::stage::Stage;
use camtransfer_core::status::{StatusRegistry, StatusRow};
use crossterm::terminal::{Clear, ClearType};
use crossterm::{cursor, queue};
use std::io::{self, Write};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;

pub const DEFAULT_REFRESH: Duration = Duration::from_millis(200);

/// Format one snapshot. An empty snapshot renders as an idle line.
pub fn render(rows: &[StatusRow]) -> String {
    if rows.is_empty() {
        return "idle: waiting for new files\n".to_string();
    }
    let width = rows.iter().map(|r| r.name.len()).max().unwrap_or(0);
    let mut out = String::new();
    for row in rows {
        let line = match (row.stage, row.progress) {
            (Stage::Uploading, Some(p)) => format!("{} {p:>3}%", row.stage.label()),
            _ => row.stage.label().to_string(),
        };
        out.push_str(&format!("{:<width$}  {line}\n", row.name));
    }
    out
}

/// Draw `frame` over the `previous_lines` lines painted last time and return
/// how many lines this frame takes.
pub fn paint(out: &mut impl Write, previous_lines: u16, frame: &str) -> io::Result<u16> {
    if previous_lines > 0 {
        queue!(
            out,
            cursor::MoveUp(previous_lines),
            cursor::MoveToColumn(0),
            Clear(ClearType::FromCursorDown)
        )?;
    }
    out.write_all(frame.as_bytes())?;
    out.flush()?;
    Ok(u16::try_from(frame.lines().count()).unwrap_or(u16::MAX))
}

/// Spawn the display task. It exits once `shutdown` fires or its sender is dropped.
pub fn spawn(
    status: StatusRegistry,
    refresh: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut last: Option<Vec<StatusRow>> = None;
        let mut painted = 0u16;
        let mut ticker = tokio::time::interval(refresh);
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
            let rows = status.snapshot();
            if last.as_ref() != Some(&rows) {
                let mut stderr = io::stderr().lock();
                match paint(&mut stderr, painted, &render(&rows)) {
                    Ok(lines) => painted = lines,
                    Err(e) => debug!(error = %e, "Could not paint status display"),
                }
                last = Some(rows);
            }
        }

        let (done, failed) = status.outcome_counts();
        debug!(done, failed, "Display stopped");
    })
}
