//! Interactive stdin console.
//!
//! Stdin is read on a dedicated thread. Before every prompt the thread waits
//! until the controller asks for the next event, so that the menu is not
//! printed while a benchmark is still running.

use std::{
    io::{self, BufRead, Write},
    sync::{
        mpsc::{self, Receiver, RecvTimeoutError, Sender},
        Arc,
    },
    thread,
    time::Duration,
};

use log::debug;
use uperf_common::ConfigValue;

use crate::{
    controller::{CommandSource, ControlEvent},
    node::UperfNode,
    report::format_bytes,
    settings::{BenchSettings, Parameter, Setting},
};

/// The menu shown before each key press.
#[must_use]
pub fn menu(s: &BenchSettings) -> String {
    format!(
        "[1] Start test [2] View [4] Threads ({}) [6] Time ({}s) [7] Msg size ({})\n\
         [s] Sync ({}) [o] OOB ({}) [a] Anycast count ({}) [r] Read percentage ({:.2})\n\
         [l] local gets ({}) [d] print details ({}) [i] print invokers ({})\n\
         [v] Version [x] Exit [X] Exit all\n",
        s.num_threads,
        s.time,
        format_bytes(f64::from(s.msg_size)),
        s.sync,
        s.oob,
        s.anycast_count,
        s.read_percentage,
        s.allow_local_gets,
        s.print_details,
        s.print_invokers,
    )
}

/// Maps one key press to an event, prompting on `out` and reading from
/// `input` for keys that need a value.
///
/// Unknown keys and invalid values yield `Ok(None)`.
pub fn event_for_key<R: BufRead, W: Write>(
    key: char,
    input: &mut R,
    out: &mut W,
) -> io::Result<Option<ControlEvent>> {
    let event = match key {
        '1' => ControlEvent::StartBenchmark,
        '2' => ControlEvent::PrintView,
        '4' => return read_setting(Parameter::NumThreads, "Number of sender threads: ", input, out),
        '6' => return read_setting(Parameter::Time, "Time (secs): ", input, out),
        '7' => return read_setting(Parameter::MsgSize, "Message size: ", input, out),
        'a' => return read_setting(Parameter::AnycastCount, "Anycast count: ", input, out),
        'r' => return read_setting(Parameter::ReadPercentage, "Read percentage: ", input, out),
        'o' => ControlEvent::Toggle(Parameter::Oob),
        's' => ControlEvent::Toggle(Parameter::Sync),
        'l' => ControlEvent::Toggle(Parameter::AllowLocalGets),
        'd' => ControlEvent::Toggle(Parameter::PrintDetails),
        'i' => ControlEvent::Toggle(Parameter::PrintInvokers),
        'v' => ControlEvent::PrintVersion,
        'x' => ControlEvent::Exit,
        'X' => ControlEvent::ExitAll,
        _ => return Ok(None),
    };
    Ok(Some(event))
}

fn read_setting<R: BufRead, W: Write>(
    param: Parameter,
    prompt: &str,
    input: &mut R,
    out: &mut W,
) -> io::Result<Option<ControlEvent>> {
    write!(out, "{prompt}")?;
    out.flush()?;

    let mut line = String::new();
    if input.read_line(&mut line)? == 0 {
        return Ok(None);
    }
    let text = line.trim();

    let value = if param == Parameter::ReadPercentage {
        text.parse::<f64>().ok().map(ConfigValue::Float)
    } else {
        text.parse::<i64>().ok().map(ConfigValue::Int)
    };
    let Some(value) = value else {
        writeln!(out, "'{text}' is not a valid {param}")?;
        return Ok(None);
    };

    match Setting::new(param, value) {
        Ok(setting) => Ok(Some(ControlEvent::Change(setting))),
        Err(e) => {
            writeln!(out, "{e}")?;
            Ok(None)
        }
    }
}

fn console_loop(node: &UperfNode, ready: &Receiver<()>, events: &Sender<ControlEvent>) -> io::Result<()> {
    let stdin = io::stdin();
    let mut input = stdin.lock();
    let mut out = io::stdout();

    while ready.recv().is_ok() {
        loop {
            write!(out, "\n{}", menu(&node.settings()))?;
            out.flush()?;

            let mut line = String::new();
            if input.read_line(&mut line)? == 0 {
                let _ = events.send(ControlEvent::Exit);
                return Ok(());
            }
            let Some(key) = line.trim().chars().next() else {
                continue;
            };
            if let Some(event) = event_for_key(key, &mut input, &mut out)? {
                if events.send(event).is_err() {
                    return Ok(());
                }
                break;
            }
        }
    }
    Ok(())
}

/// [`CommandSource`] reading key presses from stdin.
pub struct ConsoleSource {
    ready: Sender<()>,
    events: Receiver<ControlEvent>,
    awaiting: bool,
}

impl ConsoleSource {
    pub fn spawn(node: Arc<UperfNode>) -> io::Result<Self> {
        let (ready_tx, ready_rx) = mpsc::channel();
        let (events_tx, events_rx) = mpsc::channel();
        thread::Builder::new()
            .name("console".to_string())
            .spawn(move || {
                if let Err(e) = console_loop(&node, &ready_rx, &events_tx) {
                    debug!("console stopped: {e}");
                    let _ = events_tx.send(ControlEvent::Exit);
                }
            })?;
        Ok(Self {
            ready: ready_tx,
            events: events_rx,
            awaiting: false,
        })
    }
}

impl CommandSource for ConsoleSource {
    fn next_event(&mut self, timeout: Duration) -> Option<ControlEvent> {
        if !self.awaiting {
            if self.ready.send(()).is_err() {
                return Some(ControlEvent::Exit);
            }
            self.awaiting = true;
        }
        match self.events.recv_timeout(timeout) {
            Ok(event) => {
                self.awaiting = false;
                Some(event)
            }
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => Some(ControlEvent::Exit),
        }
    }
}
