//! Display and Buzzer Output
//!
//! Text line shown on subscriber nodes:
//!
//! ```text
//! T:<seconds> S<phase> <link>
//! T:7 S0 C     running, 7 s left (rounded up), connected
//! T:- S2 D     full default duration, stopped, disconnected
//! ```

use core::fmt::Write;

use heapless::String;

use crate::clock::{ClockMirror, Phase};

pub const LINE_LEN: usize = 24;

/// Buzzer pulse on expiry (ms)
pub const BUZZER_PULSE_MS: u32 = 500;

pub type Line = String<LINE_LEN>;

/// Display/buzzer driver seam
pub trait OutputSink {
    fn show_line(&mut self, line: &str);
    fn pulse_buzzer(&mut self, duration_ms: u32);
    fn set_link_indicator(&mut self, connected: bool);
}

impl<O: OutputSink + ?Sized> OutputSink for &mut O {
    fn show_line(&mut self, line: &str) {
        (**self).show_line(line)
    }
    fn pulse_buzzer(&mut self, duration_ms: u32) {
        (**self).pulse_buzzer(duration_ms)
    }
    fn set_link_indicator(&mut self, connected: bool) {
        (**self).set_link_indicator(connected)
    }
}

/// Format the status line. Unknown fields and a value at the full default
/// duration show as `-`.
pub fn render_line(remaining_ms: Option<u32>, phase: Option<Phase>, connected: bool, default_max_ms: u32) -> Line {
    let mut line = Line::new();
    let link = if connected { 'C' } else { 'D' };

    // LINE_LEN fits the longest possible line ("T:4294968 S3 D")
    let _ = match remaining_ms {
        Some(ms) if ms != default_max_ms => write!(line, "T:{}", ms.div_ceil(1000)),
        _ => line.push_str("T:-").map_err(|_| core::fmt::Error),
    };
    let _ = match phase {
        Some(p) => write!(line, " S{} {}", p.as_u8(), link),
        None => write!(line, " S- {}", link),
    };
    line
}

/// Renders a mirror to an output sink, redrawing only on change
pub struct ClockView<O: OutputSink> {
    output: O,
    default_max_ms: u32,
    buzzer: bool,
    connected: bool,
    last_phase: Option<Phase>,
    last_line: Line,
}

impl<O: OutputSink> ClockView<O> {
    pub fn new(output: O, default_max_ms: u32, buzzer: bool) -> Self {
        Self {
            output,
            default_max_ms,
            buzzer,
            connected: false,
            last_phase: None,
            last_line: Line::new(),
        }
    }

    pub fn output(&self) -> &O {
        &self.output
    }

    pub fn output_mut(&mut self) -> &mut O {
        &mut self.output
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn set_connected(&mut self, connected: bool) {
        if self.connected != connected {
            self.connected = connected;
            self.output.set_link_indicator(connected);
        }
    }

    pub fn render(&mut self, mirror: &ClockMirror) {
        let live = self.connected && !mirror.is_stale();
        let line = render_line(mirror.remaining_ms(), mirror.phase(), live, self.default_max_ms);
        if line != self.last_line {
            self.output.show_line(&line);
            self.last_line = line;
        }

        let phase = mirror.phase();
        let entered_expiry = matches!(self.last_phase, Some(p) if p != Phase::Expired) && phase == Some(Phase::Expired);
        if self.buzzer && live && entered_expiry {
            debug!("OUTPUT: expiry buzzer");
            self.output.pulse_buzzer(BUZZER_PULSE_MS);
        }
        self.last_phase = phase;
    }
}
