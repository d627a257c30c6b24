//! REPL – the inolink interactive shell.
//!
//! Supported slash-commands:
//!   /help              – show this list
//!   /read [feature]    – one-shot read (defaults to the polled feature)
//!   /start, /stop      – start or stop polling
//!   /toggle on|off     – same as /start and /stop
//!   /led on|off        – switch the board's LED
//!   /chart             – sparkline of the current session
//!   /export <path>     – write the current session as JSON
//!   /stats             – poller counters
//!   /ports             – list serial ports
//!   /quit | /exit      – stop polling, close the port, exit

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use colored::Colorize;
use inolink_hal::drivers::LED;
use inolink_hal::transport;
use inolink_runtime::{Point, Series};
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use tokio::runtime::Runtime;

use crate::app::{App, display_value};

const CHART_WIDTH: usize = 60;
const SPARKS: [char; 8] = ['▁', '▂', '▃', '▄', '▅', '▆', '▇', '█'];

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Help,
    Read(Option<String>),
    Start,
    Stop,
    Toggle(bool),
    Led(bool),
    Chart,
    Export(PathBuf),
    Stats,
    Ports,
    Quit,
}

/// Parse one input line.  The error is a message for the user.
pub fn parse(line: &str) -> Result<Command, String> {
    let mut words = line.split_whitespace();
    let Some(head) = words.next() else {
        return Err("empty command".to_string());
    };
    let arg = words.next();
    if words.next().is_some() {
        return Err(format!("too many arguments for {head}"));
    }

    let command = match (head, arg) {
        ("/help", None) => Command::Help,
        ("/read", feature) => Command::Read(feature.map(str::to_string)),
        ("/start", None) => Command::Start,
        ("/stop", None) => Command::Stop,
        ("/toggle", Some(state)) => Command::Toggle(parse_switch(state)?),
        ("/led", Some(state)) => Command::Led(parse_switch(state)?),
        ("/chart", None) => Command::Chart,
        ("/export", Some(path)) => Command::Export(PathBuf::from(path)),
        ("/stats", None) => Command::Stats,
        ("/ports", None) => Command::Ports,
        ("/quit" | "/exit", None) => Command::Quit,
        ("/toggle" | "/led", None) => return Err(format!("usage: {head} on|off")),
        ("/export", None) => return Err("usage: /export <path>".to_string()),
        (
            "/help" | "/start" | "/stop" | "/chart" | "/stats" | "/ports" | "/quit" | "/exit",
            Some(_),
        ) => return Err(format!("{head} takes no arguments")),
        (other, _) => return Err(format!("unknown command '{other}'")),
    };
    Ok(command)
}

fn parse_switch(word: &str) -> Result<bool, String> {
    match word.to_ascii_lowercase().as_str() {
        "on" | "1" | "true" => Ok(true),
        "off" | "0" | "false" => Ok(false),
        other => Err(format!("expected on or off, got '{other}'")),
    }
}

/// Entry point for the interactive shell.
///
/// `shutdown` is checked before every prompt; when set the shell exits.
pub fn run(rt: &Runtime, app: &App, feature: &str, shutdown: Arc<AtomicBool>) {
    let mut editor = match DefaultEditor::new() {
        Ok(editor) => editor,
        Err(e) => {
            eprintln!("{}: {}", "Cannot start line editor".red(), e);
            return;
        }
    };

    while !shutdown.load(Ordering::SeqCst) {
        let line = match editor.readline("inolink> ") {
            Ok(line) => line,
            Err(ReadlineError::Interrupted | ReadlineError::Eof) => break,
            Err(e) => {
                eprintln!("{}: {}", "Read error".red(), e);
                break;
            }
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let _ = editor.add_history_entry(line);

        match parse(line) {
            Ok(Command::Quit) => {
                println!("{}", "Goodbye.".green());
                break;
            }
            Ok(command) => execute(rt, app, feature, command),
            Err(msg) => println!(
                "{} {}. Type {} for available commands.",
                "Error:".red(),
                msg,
                "/help".bold()
            ),
        }
    }
    shutdown.store(true, Ordering::SeqCst);
}

// ─────────────────────────────────────────────────────────────────────────────
// Command handlers
// ─────────────────────────────────────────────────────────────────────────────

fn execute(rt: &Runtime, app: &App, feature: &str, command: Command) {
    match command {
        Command::Help => cmd_help(),
        Command::Read(name) => {
            let name = name.as_deref().unwrap_or(feature);
            match rt.block_on(app.proxy.read(name)) {
                Ok(value) => println!("  {} = {}", name, display_value(&value, app.chart_unit).bold()),
                Err(e) => println!("  {} {}", "✗".red(), e),
            }
        }
        Command::Start | Command::Toggle(true) => {
            if !rt.block_on(app.controller.set_running(true)) {
                println!("  already polling");
            }
        }
        Command::Stop | Command::Toggle(false) => {
            if !rt.block_on(app.controller.set_running(false)) {
                println!("  not polling");
            }
        }
        Command::Led(on) => match rt.block_on(app.proxy.write(LED, on)) {
            Ok(()) => println!("  {} LED {}", "✓".green(), if on { "on" } else { "off" }),
            Err(e) => println!("  {} {}", "✗".red(), e),
        },
        Command::Chart => cmd_chart(&app.recorder.snapshot()),
        Command::Export(path) => match export(&app.recorder.snapshot(), &path) {
            Ok(n) => println!("  {} {} points written to {}", "✓".green(), n, path.display()),
            Err(e) => println!("  {} {}", "✗".red(), e),
        },
        Command::Stats => {
            let stats = app.controller.poller().stats();
            println!("{}", "Poller".bold().underline());
            println!("  running  : {}", app.controller.is_running());
            println!("  interval : {}", app.controller.poller().interval());
            println!("  ticks    : {}", stats.ticks);
            println!("  readings : {}", stats.readings);
            println!("  skipped  : {}", stats.skipped);
            println!("  overruns : {}", stats.overruns);
        }
        Command::Ports => match transport::available_ports() {
            Ok(ports) if ports.is_empty() => println!("  no serial ports found"),
            Ok(ports) => ports.iter().for_each(|p| println!("  • {}", p.bold())),
            Err(e) => println!("  {} {}", "✗".red(), e),
        },
        Command::Quit => {}
    }
}

fn cmd_help() {
    println!();
    println!("{}", "inolink Commands".bold().underline());
    println!("  {}    – one-shot read", "/read [feature]".bold().cyan());
    println!("  {}      – start / stop polling", "/start  /stop".bold().cyan());
    println!("  {}     – same, as a switch", "/toggle on|off".bold().cyan());
    println!("  {}        – switch the LED", "/led on|off".bold().cyan());
    println!("  {}             – chart the current session", "/chart".bold().cyan());
    println!("  {}     – save the session as JSON", "/export <path>".bold().cyan());
    println!("  {}             – poller counters", "/stats".bold().cyan());
    println!("  {}             – list serial ports", "/ports".bold().cyan());
    println!("  {}      – exit", "/quit  /exit".bold().cyan());
    println!();
}

fn cmd_chart(series: &Series) {
    let Some((lo, hi)) = series.range() else {
        println!("  nothing recorded yet; /start polling first");
        return;
    };
    println!("  {} [{}]", series.feature.bold(), series.unit);
    println!("  {}", sparkline(&series.points, CHART_WIDTH).cyan());
    println!(
        "  {} points, min {:.2}, max {:.2}, last {:.2}",
        series.points.len(),
        lo,
        hi,
        series.last().map_or(hi, |p| p.value)
    );
}

/// One block character per point for the last `width` points, scaled to
/// their own range.
pub fn sparkline(points: &[Point], width: usize) -> String {
    let tail = &points[points.len().saturating_sub(width)..];
    let (lo, hi) = tail
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), p| (lo.min(p.value), hi.max(p.value)));
    let span = hi - lo;
    tail.iter()
        .map(|p| {
            if span <= f64::EPSILON {
                SPARKS[SPARKS.len() / 2]
            } else {
                let level = ((p.value - lo) / span * (SPARKS.len() - 1) as f64).round() as usize;
                SPARKS[level.min(SPARKS.len() - 1)]
            }
        })
        .collect()
}

/// Write `series` as pretty JSON.  Returns the number of points written.
pub fn export(series: &Series, path: &Path) -> Result<usize, Box<dyn std::error::Error>> {
    let mut out = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(&mut out, series)?;
    out.flush()?;
    Ok(series.points.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use inolink_types::Unit;

    #[test]
    fn parses_commands() {
        assert_eq!(parse("/read"), Ok(Command::Read(None)));
        assert_eq!(parse("/read led"), Ok(Command::Read(Some("led".to_string()))));
        assert_eq!(parse("  /toggle ON "), Ok(Command::Toggle(true)));
        assert_eq!(parse("/led off"), Ok(Command::Led(false)));
        assert_eq!(parse("/export out.json"), Ok(Command::Export(PathBuf::from("out.json"))));
        assert_eq!(parse("/exit"), Ok(Command::Quit));
    }

    #[test]
    fn rejects_bad_input() {
        assert!(parse("/led").is_err());
        assert!(parse("/led maybe").is_err());
        assert!(parse("/start now").is_err());
        assert!(parse("/read a b").is_err());
        assert!(parse("/launch").is_err());
        assert!(parse("/export").is_err());
    }

    fn points(values: &[f64]) -> Vec<Point> {
        values
            .iter()
            .enumerate()
            .map(|(i, &value)| Point { t: i as f64, value })
            .collect()
    }

    #[test]
    fn sparkline_spans_the_range() {
        assert_eq!(sparkline(&points(&[0.0, 0.5, 1.0]), 10), "▁▅█");
        assert_eq!(sparkline(&points(&[2.0, 2.0]), 10), "▅▅");
        assert_eq!(sparkline(&points(&[9.0, 0.0, 1.0]), 2), "▁█");
        assert_eq!(sparkline(&[], 10), "");
    }

    #[test]
    fn export_writes_json() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("series.json");
        let series = Series {
            feature: "temperature".to_string(),
            unit: Unit::DegC,
            session: Some(uuid::Uuid::new_v4()),
            points: points(&[21.0, 21.5]),
        };

        assert_eq!(export(&series, &path)?, 2);
        let back: Series = serde_json::from_str(&std::fs::read_to_string(&path)?)?;
        assert_eq!(back, series);
        Ok(())
    }
}
